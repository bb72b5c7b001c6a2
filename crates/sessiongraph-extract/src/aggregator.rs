//! Interchange file handling: per-session fragments in, canonical array out.
//!
//! Extraction appends one JSON object per finished session to the output
//! file. Interrupted or resumed runs therefore leave files made of arrays,
//! loose fragments, repeated `session_index` values, and a possibly
//! truncated last fragment. [`deserialize`] accepts all of these.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use sessiongraph_types::{ExtractionRecord, Session};

use crate::error::{AggregateError, Result};
use crate::parser::{find_matching, parse_record_value, salvage_items};

/// Outcome of reading an interchange document.
#[derive(Debug, Clone, Default)]
pub struct Deserialized {
    /// Merged sessions, in order of first appearance.
    pub sessions: Vec<Session>,
    /// Fragments read, before merging.
    pub fragments: usize,
    /// Fragments skipped as malformed.
    pub skipped: usize,
    /// Whether an unparseable tail was dropped.
    pub truncated: bool,
}

/// Serialize sessions as a pretty JSON array.
pub fn serialize(sessions: &[Session]) -> Result<String> {
    Ok(serde_json::to_string_pretty(sessions)?)
}

/// Read sessions from an interchange document.
pub fn deserialize(raw: &str) -> Result<Vec<Session>> {
    Ok(deserialize_detailed(raw)?.sessions)
}

/// Read sessions, reporting skipped fragments and truncation.
pub fn deserialize_detailed(raw: &str) -> Result<Deserialized> {
    let first = raw.trim_start().as_bytes().first().copied();
    match first {
        None => return Ok(Deserialized::default()),
        Some(b'[') | Some(b'{') => {}
        Some(_) => {
            return Err(AggregateError::Format(
                "expected a JSON array or session objects".to_string(),
            ));
        }
    }

    let scan = scan_fragments(raw);
    let mut result = Deserialized {
        fragments: scan.values.len(),
        skipped: scan.damaged,
        truncated: scan.truncated,
        ..Default::default()
    };

    let mut fragments = Vec::with_capacity(scan.values.len());
    for (i, value) in scan.values.into_iter().enumerate() {
        match session_from_fragment(value) {
            Ok(session) => fragments.push(session),
            Err(reason) => {
                warn!(fragment = i, reason = %reason, "Skipping malformed session fragment");
                result.skipped += 1;
            }
        }
    }

    if scan.truncated {
        warn!(
            fragments = result.fragments,
            "Interchange data ends with an incomplete fragment; tail dropped"
        );
    }

    result.sessions = merge_fragments(fragments);
    Ok(result)
}

/// Top-level values found by [`scan_fragments`].
struct Scan {
    values: Vec<Value>,
    /// Damaged regions skipped before a later fragment.
    damaged: usize,
    /// Whether the data ended inside a damaged region.
    truncated: bool,
}

/// Split `raw` into top-level values.
///
/// A fragment that cannot be closed or parsed is skipped up to the next
/// fragment start, so fragments appended after an interrupted write still
/// load. Damage with no later fragment is a truncated tail.
fn scan_fragments(raw: &str) -> Scan {
    let bytes = raw.as_bytes();
    let mut scan = Scan {
        values: Vec::new(),
        damaged: 0,
        truncated: false,
    };
    let mut pos = 0;

    loop {
        while pos < bytes.len() && (bytes[pos].is_ascii_whitespace() || bytes[pos] == b',') {
            pos += 1;
        }
        if pos >= bytes.len() {
            return scan;
        }

        // Arrays may hold compact session objects, so only a line start ends them.
        let is_array = bytes[pos] == b'[';
        let boundary = next_fragment_start(raw, pos + 1, !is_array).unwrap_or(bytes.len());
        let region = &raw[..boundary];

        let closed = find_matching(region.as_bytes(), pos);
        let parsed = closed.and_then(|end| serde_json::from_str::<Value>(&raw[pos..=end]).ok());

        match (bytes[pos], closed, parsed) {
            (b'[', Some(end), Some(Value::Array(items))) => {
                scan.values.extend(items);
                pos = end + 1;
                continue;
            }
            (b'{', Some(end), Some(value)) => {
                scan.values.push(value);
                pos = end + 1;
                continue;
            }
            // Keep the complete elements of a damaged array.
            (b'[', _, _) => scan.values.extend(salvage_items(region, pos)),
            _ => {}
        }

        // A closed but unparseable fragment ends where it closes.
        let resume = match closed {
            Some(end) if bytes[pos] == b'{' => Some(end + 1),
            _ => (boundary < bytes.len()).then_some(boundary),
        };
        let Some(resume) = resume else {
            scan.truncated = true;
            return scan;
        };
        warn!(offset = pos, resume_at = resume, "Skipping damaged fragment");
        scan.damaged += 1;
        pos = resume;
    }
}

/// Offset of the next fragment start at or after `from`: a `{` opening a
/// line, or (when `session_key` is set) a compact `{"session_index"`.
fn next_fragment_start(raw: &str, from: usize, session_key: bool) -> Option<usize> {
    let bytes = raw.as_bytes();
    (from..bytes.len()).find(|&i| {
        bytes[i] == b'{'
            && (bytes[i - 1] == b'\n'
                || (session_key && raw[i + 1..].starts_with("\"session_index\"")))
    })
}

fn session_from_fragment(value: Value) -> std::result::Result<Session, String> {
    let Value::Object(mut map) = value else {
        return Err("fragment is not an object".to_string());
    };

    let session_index = map
        .remove("session_index")
        .and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .ok_or_else(|| "missing or invalid session_index".to_string())?;

    let session_date = map
        .remove("session_date")
        .map(|v| date_text(&v))
        .unwrap_or_default();

    let records = match map.remove("llm_response") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().map(record_from_item).collect(),
        Some(single) => vec![record_from_item(&single)],
    };

    Ok(Session {
        session_index,
        session_date,
        records,
        metadata: map,
    })
}

/// Structured records are validated; raw completion strings are parsed.
fn record_from_item(item: &Value) -> ExtractionRecord {
    parse_record_value(item).record
}

/// Session date as text; lists contribute their first entry.
pub(crate) fn date_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.first().map(date_text).unwrap_or_default(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Merge fragments sharing a `session_index`.
///
/// Records concatenate in file order; the first non-empty date and the
/// first value seen for each metadata key win.
fn merge_fragments(fragments: Vec<Session>) -> Vec<Session> {
    let mut sessions: Vec<Session> = Vec::new();
    let mut positions: HashMap<u64, usize> = HashMap::new();

    for fragment in fragments {
        match positions.get(&fragment.session_index) {
            Some(&i) => {
                let existing = &mut sessions[i];
                existing.records.extend(fragment.records);
                if existing.session_date.is_empty() {
                    existing.session_date = fragment.session_date;
                }
                for (key, value) in fragment.metadata {
                    existing.metadata.entry(key).or_insert(value);
                }
            }
            None => {
                positions.insert(fragment.session_index, sessions.len());
                sessions.push(fragment);
            }
        }
    }

    sessions
}

// ─────────────────────────────────────────────────────────────────────────────
// Files
// ─────────────────────────────────────────────────────────────────────────────

/// Read and merge all sessions in an interchange file.
pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<Session>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|e| AggregateError::read(path, e))?;
    deserialize(&raw)
}

/// Write sessions as a canonical array, replacing `path` atomically.
pub fn write_file(path: impl AsRef<Path>, sessions: &[Session]) -> Result<()> {
    let path = path.as_ref();
    let mut body = serialize(sessions)?;
    body.push('\n');

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).map_err(|e| AggregateError::write(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| AggregateError::write(path, e))?;
    Ok(())
}

/// Rewrite a fragment file as a canonical array ordered by
/// `session_index`. Returns the session count.
pub fn compact(path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let mut sessions = read_file(path)?;
    sessions.sort_by_key(|session| session.session_index);
    write_file(path, &sessions)?;
    debug!(path = %path.display(), sessions = sessions.len(), "Compacted interchange file");
    Ok(sessions.len())
}

/// Indices already present in `path`; empty if the file does not exist.
pub fn session_indices(path: impl AsRef<Path>) -> Result<HashSet<u64>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(HashSet::new());
    }
    Ok(read_file(path)?
        .iter()
        .map(|session| session.session_index)
        .collect())
}

/// Append-only sink writing one session fragment per line.
pub struct SessionSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl SessionSink {
    /// Open `path` for appending, creating it and its parent directory.
    ///
    /// A file left mid-line by an interrupted write gets a newline first,
    /// so new fragments start on their own line.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| AggregateError::write(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| AggregateError::write(&path, e))?;

        if ends_mid_line(&mut file).map_err(|e| AggregateError::read(&path, e))? {
            warn!(path = %path.display(), "Output ends with a partial line; starting a new one");
            writeln!(file).map_err(|e| AggregateError::write(&path, e))?;
        }

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one session as a single line and flush it.
    pub fn append(&self, session: &Session) -> Result<()> {
        let line = serde_json::to_string(session)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")
            .and_then(|_| writer.flush())
            .map_err(|e| AggregateError::write(&self.path, e))
    }
}

fn ends_mid_line(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sessiongraph_types::{Entity, NodeRef, Relationship};

    fn session(index: u64, date: &str, entity: &str) -> Session {
        let mut record = ExtractionRecord::default().with_source(format!("I have a {entity}"));
        record.entities.push(Entity::new(entity, "object"));
        record.relationships.push(Relationship::new(
            NodeRef::User,
            NodeRef::entity(entity, "object"),
            "HAS",
        ));
        let mut session = Session::new(index, date).with_records(vec![record]);
        session
            .metadata
            .insert("question_category".into(), json!("single_session_user"));
        session
    }

    #[test]
    fn test_serialize_then_deserialize() {
        let sessions = vec![session(1, "2023/05/20", "guitar"), session(0, "", "piano")];
        let raw = serialize(&sessions).unwrap();
        assert!(raw.trim_start().starts_with('['));
        assert!(raw.contains("\"llm_response\""));

        let back = deserialize(&raw).unwrap();
        assert_eq!(back, sessions);
    }

    #[test]
    fn test_fragments_merge_in_file_order() {
        let raw = [
            json!({"session_index": 3, "session_date": "", "question": "first",
                   "llm_response": [{"entities": [{"name": "a", "type": "object"}]}]}),
            json!({"session_index": 4, "session_date": "d4", "llm_response": []}),
            json!({"session_index": 3, "session_date": "d3", "question": "second", "extra": 1,
                   "llm_response": [{"entities": [{"name": "b", "type": "object"}]}]}),
        ]
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n");

        let sessions = deserialize(&raw).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_index, 3);
        assert_eq!(sessions[0].session_date, "d3");
        assert_eq!(sessions[0].metadata["question"], "first");
        assert_eq!(sessions[0].metadata["extra"], 1);
        let names: Vec<_> = sessions[0]
            .records
            .iter()
            .map(|r| r.entities[0].name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(sessions[1].session_index, 4);
    }

    #[test]
    fn test_truncated_array_keeps_complete_sessions() {
        let full = serialize(&[
            session(0, "d0", "guitar"),
            session(1, "d1", "piano"),
            session(2, "d2", "drums"),
        ])
        .unwrap();
        let cut = full.rfind("drums").unwrap();

        let result = deserialize_detailed(&full[..cut]).unwrap();
        assert!(result.truncated);
        assert_eq!(result.sessions.len(), 2);
        assert_eq!(result.sessions[1].records[0].entities[0].name, "piano");
    }

    #[test]
    fn test_truncated_fragment_line_dropped() {
        let mut raw = serde_json::to_string(&session(0, "", "guitar")).unwrap();
        raw.push('\n');
        raw.push_str(r#"{"session_index": 1, "session_date": "d1", "llm_response": [{"enti"#);

        let result = deserialize_detailed(&raw).unwrap();
        assert!(result.truncated);
        assert_eq!(result.sessions.len(), 1);
    }

    fn fragment(index: u64, entity: &str) -> String {
        serde_json::to_string(&session(index, "", entity)).unwrap()
    }

    fn cut_fragment(index: u64) -> String {
        let full = fragment(index, "piano");
        let cut = full.find("\"enti").unwrap() + 5;
        full[..cut].to_string()
    }

    #[test]
    fn test_fragments_after_cut_line_still_load() {
        for separator in ["\n", ""] {
            let raw = format!(
                "{}\n{}{}{}\n{}\n",
                fragment(0, "guitar"),
                cut_fragment(1),
                separator,
                fragment(1, "violin"),
                fragment(2, "drums"),
            );

            let result = deserialize_detailed(&raw).unwrap();
            let indices: Vec<_> = result.sessions.iter().map(|s| s.session_index).collect();
            assert_eq!(indices, vec![0, 1, 2], "separator {separator:?}");
            assert_eq!(result.skipped, 1);
            assert!(!result.truncated);
            assert_eq!(result.sessions[1].records[0].entities[0].name, "violin");
        }
    }

    #[test]
    fn test_unparseable_closed_fragment_skipped() {
        let raw = format!(
            "{}\n{{\"session_index\": 1, \"llm_response\": oops}}\n{}",
            fragment(0, "guitar"),
            fragment(2, "drums"),
        );

        let result = deserialize_detailed(&raw).unwrap();
        let indices: Vec<_> = result.sessions.iter().map(|s| s.session_index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(result.skipped, 1);
        assert!(!result.truncated);
    }

    #[test]
    fn test_sink_starts_new_line_after_partial_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm_responses.json");
        fs::write(&path, format!("{}\n{}", fragment(0, "guitar"), cut_fragment(1))).unwrap();

        let sink = SessionSink::open(&path).unwrap();
        sink.append(&session(1, "d1", "piano")).unwrap();
        drop(sink);

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 3);
        let result = deserialize_detailed(&raw).unwrap();
        assert_eq!(result.sessions.len(), 2);
        assert_eq!(result.skipped, 1);

        assert_eq!(compact(&path).unwrap(), 2);
        let indices: Vec<_> = read_file(&path)
            .unwrap()
            .iter()
            .map(|s| s.session_index)
            .collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_array_followed_by_appended_fragments() {
        let mut raw = serialize(&[session(0, "d0", "guitar")]).unwrap();
        raw.push('\n');
        raw.push_str(&serde_json::to_string(&session(1, "d1", "piano")).unwrap());

        let sessions = deserialize(&raw).unwrap();
        let indices: Vec<_> = sessions.iter().map(|s| s.session_index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_raw_completion_strings_are_parsed() {
        let raw = json!([{
            "session_index": 0,
            "session_date": ["2023/05/20 (Sat) 02:21", "ignored"],
            "input_text": ["I just got a guitar"],
            "llm_response": [
                "```json\n{\"entities\": [{\"name\": \"guitar\", \"type\": \"object\"}], \"relationships\": [{\"source\": \"USER\", \"target\": \"guitar\", \"type\": \"HAS\"}]}\n```",
                "Sorry, I can't do that."
            ]
        }])
        .to_string();

        let sessions = deserialize(&raw).unwrap();
        let session = &sessions[0];
        assert_eq!(session.session_date, "2023/05/20 (Sat) 02:21");
        assert_eq!(session.records.len(), 2);
        assert_eq!(session.records[0].relationships[0].source_ref, NodeRef::User);
        assert!(session.records[1].is_empty());
        assert!(session.metadata.contains_key("input_text"));
    }

    #[test]
    fn test_malformed_fragments_skipped() {
        let raw = r#"[{"session_date": "no index"}, {"session_index": 2, "llm_response": []}, 7]"#;
        let result = deserialize_detailed(raw).unwrap();
        assert_eq!(result.fragments, 3);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.sessions[0].session_index, 2);
    }

    #[test]
    fn test_blank_and_garbage_inputs() {
        assert!(deserialize("  \n").unwrap().is_empty());
        assert!(matches!(
            deserialize("not json at all"),
            Err(AggregateError::Format(_))
        ));
    }

    #[test]
    fn test_sink_then_compact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("llm_responses.json");

        let sink = SessionSink::open(&path).unwrap();
        sink.append(&session(1, "d1", "piano")).unwrap();
        sink.append(&session(0, "d0", "guitar")).unwrap();
        sink.append(&session(1, "", "violin")).unwrap();
        drop(sink);

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 3);

        assert_eq!(compact(&path).unwrap(), 2);
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.trim_start().starts_with('['));

        let sessions = read_file(&path).unwrap();
        let indices: Vec<_> = sessions.iter().map(|s| s.session_index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(sessions[1].records.len(), 2);
        assert_eq!(
            session_indices(&path).unwrap(),
            HashSet::from([0u64, 1u64])
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_session_indices_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(session_indices(dir.path().join("absent.json")).unwrap().is_empty());
    }
}
