//! Extraction report types.

use serde::Serialize;

use crate::parser::ParseQuality;

/// Per-message extraction statistics.
#[derive(Debug, Clone, Serialize)]
pub struct MessageOutcome {
    /// Position among the session's non-empty messages.
    pub message_index: usize,
    /// Completion attempts made (0 if none were needed).
    pub attempts: u32,
    pub quality: ParseQuality,
    /// Final completion error, when every attempt failed.
    pub error: Option<String>,
    /// Parser warnings for this message.
    pub warnings: Vec<String>,
}

impl MessageOutcome {
    pub fn completion_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Report summarizing one extracted session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionReport {
    pub session_index: u64,
    pub messages: Vec<MessageOutcome>,
    pub entities: usize,
    pub events: usize,
    pub relationships: usize,
}

impl SessionReport {
    pub fn count(&self, quality: ParseQuality) -> usize {
        self.messages.iter().filter(|m| m.quality == quality).count()
    }

    pub fn failed_completions(&self) -> usize {
        self.messages.iter().filter(|m| m.completion_failed()).count()
    }

    pub fn total_attempts(&self) -> u32 {
        self.messages.iter().map(|m| m.attempts).sum()
    }
}

impl std::fmt::Display for SessionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "session {}: {} messages (well-formed: {}, partial: {}, unusable: {}, failed: {}), entities: {}, events: {}, relationships: {}",
            self.session_index,
            self.messages.len(),
            self.count(ParseQuality::WellFormed),
            self.count(ParseQuality::Partial),
            self.count(ParseQuality::Unusable),
            self.failed_completions(),
            self.entities,
            self.events,
            self.relationships,
        )
    }
}

/// Report summarizing a whole extraction run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    pub sessions: usize,
    pub messages: usize,
    pub well_formed: usize,
    pub partial: usize,
    pub unusable: usize,
    /// Messages whose completion never succeeded.
    pub failed_completions: usize,
    pub attempts: u64,
    pub entities: usize,
    pub events: usize,
    pub relationships: usize,
}

impl ExtractionReport {
    pub fn absorb(&mut self, session: &SessionReport) {
        self.sessions += 1;
        self.messages += session.messages.len();
        self.well_formed += session.count(ParseQuality::WellFormed);
        self.partial += session.count(ParseQuality::Partial);
        self.unusable += session.count(ParseQuality::Unusable);
        self.failed_completions += session.failed_completions();
        self.attempts += u64::from(session.total_attempts());
        self.entities += session.entities;
        self.events += session.events;
        self.relationships += session.relationships;
    }

    /// Whether any message lost content.
    pub fn has_degradation(&self) -> bool {
        self.partial > 0 || self.unusable > 0
    }
}

impl std::fmt::Display for ExtractionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ExtractionReport {{ sessions: {}, messages: {} (well-formed: {}, partial: {}, unusable: {}, failed: {}), attempts: {}, entities: {}, events: {}, relationships: {} }}",
            self.sessions,
            self.messages,
            self.well_formed,
            self.partial,
            self.unusable,
            self.failed_completions,
            self.attempts,
            self.entities,
            self.events,
            self.relationships,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(quality: ParseQuality, attempts: u32, error: Option<&str>) -> MessageOutcome {
        MessageOutcome {
            message_index: 0,
            attempts,
            quality,
            error: error.map(str::to_string),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_report_default() {
        let report = ExtractionReport::default();
        assert_eq!(report.sessions, 0);
        assert!(!report.has_degradation());
    }

    #[test]
    fn test_absorb_session() {
        let session = SessionReport {
            session_index: 4,
            messages: vec![
                outcome(ParseQuality::WellFormed, 1, None),
                outcome(ParseQuality::Partial, 2, None),
                outcome(ParseQuality::Unusable, 3, Some("timeout")),
            ],
            entities: 5,
            events: 1,
            relationships: 4,
        };
        assert_eq!(session.failed_completions(), 1);
        assert_eq!(session.total_attempts(), 6);

        let mut report = ExtractionReport::default();
        report.absorb(&session);
        report.absorb(&session);
        assert_eq!(report.sessions, 2);
        assert_eq!(report.messages, 6);
        assert_eq!(report.unusable, 2);
        assert_eq!(report.attempts, 12);
        assert!(report.has_degradation());
        assert!(report.to_string().contains("sessions: 2"));
    }
}
