//! Question-categorised conversation datasets.
//!
//! ```text
//! { "<category>": [ { "question": ..., "question_date": ..., "answer": ...,
//!                     "sessions": { "answer_sessions": [...],
//!                                   "answer_session_dates": ... } } ] }
//! ```
//!
//! `answer_sessions` is either one session (a list of messages) or several
//! (a list of message lists). Each session becomes one [`SessionInput`],
//! numbered in dataset order.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, info};

use sessiongraph_types::SessionInput;

use crate::aggregator::date_text;
use crate::error::{AggregateError, Result};

/// Load a dataset file. `max_sessions == 0` keeps every session.
pub fn load_dataset(path: impl AsRef<Path>, max_sessions: usize) -> Result<Vec<SessionInput>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|e| AggregateError::read(path, e))?;
    let value: Value = serde_json::from_str(&raw)?;
    let inputs = parse_dataset(&value, max_sessions)?;
    info!(path = %path.display(), sessions = inputs.len(), "Loaded dataset");
    Ok(inputs)
}

/// Flatten a parsed dataset into numbered session inputs.
pub fn parse_dataset(value: &Value, max_sessions: usize) -> Result<Vec<SessionInput>> {
    let Value::Object(categories) = value else {
        return Err(AggregateError::Dataset(
            "top level must be an object of categories".to_string(),
        ));
    };

    let mut inputs = Vec::new();
    for (category, questions) in categories {
        let Value::Array(questions) = questions else {
            debug!(category = %category, "Skipping category that is not a list");
            continue;
        };

        for question in questions.iter().filter_map(Value::as_object) {
            for (messages, date) in question_sessions(question) {
                let mut input = SessionInput::new(inputs.len() as u64, date, messages);
                input.metadata = question_metadata(category, question);
                inputs.push(input);

                if max_sessions > 0 && inputs.len() >= max_sessions {
                    return Ok(inputs);
                }
            }
        }
    }

    Ok(inputs)
}

fn question_metadata(category: &str, question: &Map<String, Value>) -> Map<String, Value> {
    let text = |key: &str| {
        question
            .get(key)
            .map(date_text)
            .map(Value::String)
            .unwrap_or_else(|| Value::String(String::new()))
    };

    let mut metadata = Map::new();
    metadata.insert("question_category".into(), Value::String(category.to_string()));
    metadata.insert("question".into(), text("question"));
    metadata.insert("question_date".into(), text("question_date"));
    metadata
}

/// `(messages, date)` for each session attached to one question.
fn question_sessions(question: &Map<String, Value>) -> Vec<(Vec<String>, String)> {
    let sessions = question.get("sessions").and_then(Value::as_object);
    let answer_sessions = sessions
        .and_then(|s| s.get("answer_sessions"))
        .and_then(Value::as_array);
    let dates = sessions.and_then(|s| s.get("answer_session_dates"));

    let Some(answer_sessions) = answer_sessions.filter(|a| !a.is_empty()) else {
        return Vec::new();
    };

    let nested = answer_sessions.first().is_some_and(Value::is_array);
    if !nested {
        let date = dates.map(date_text).unwrap_or_default();
        return vec![(messages_of(answer_sessions), date)];
    }

    answer_sessions
        .iter()
        .enumerate()
        .map(|(i, session)| {
            let messages = session.as_array().map(|m| messages_of(m)).unwrap_or_default();
            (messages, date_for(dates, i))
        })
        .collect()
}

/// Date of the `i`-th session: the aligned list entry, else the first.
fn date_for(dates: Option<&Value>, i: usize) -> String {
    match dates {
        Some(Value::Array(list)) => list
            .get(i)
            .or_else(|| list.first())
            .map(date_text)
            .unwrap_or_default(),
        Some(other) => date_text(other),
        None => String::new(),
    }
}

fn messages_of(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj.get("content").and_then(Value::as_str).map(str::to_string),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .filter(|m| !m.trim().is_empty())
        .collect()
}
