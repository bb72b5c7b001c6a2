//! Tolerant parser from raw completion text to [`ExtractionRecord`].
//!
//! Models wrap JSON in fences, add prose, leave trailing commas, and get cut
//! off mid-document by token limits. The parser never fails: it recovers
//! what it can, records why anything was dropped, and reports the overall
//! [`ParseQuality`].

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use sessiongraph_types::{
    Entity, Event, ExtractionRecord, NodeKey, NodeRef, Properties, Relationship,
};

const SECTIONS: [&str; 3] = ["entities", "events", "relationships"];

/// How much of a completion survived parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseQuality {
    /// Parsed as a JSON object and every item validated.
    WellFormed,
    /// Something was recovered but something else was lost.
    Partial,
    /// Nothing recoverable; the record is empty.
    Unusable,
}

impl std::fmt::Display for ParseQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::WellFormed => "well_formed",
            Self::Partial => "partial",
            Self::Unusable => "unusable",
        })
    }
}

/// Parse result with diagnostics.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub record: ExtractionRecord,
    pub quality: ParseQuality,
    pub warnings: Vec<String>,
}

impl ParsedResponse {
    fn unusable(mut warnings: Vec<String>, reason: impl Into<String>) -> Self {
        warnings.push(reason.into());
        Self {
            record: ExtractionRecord::default(),
            quality: ParseQuality::Unusable,
            warnings,
        }
    }
}

/// Parse one raw completion into a record. Never fails.
pub fn parse_response(raw: &str) -> ExtractionRecord {
    parse_response_detailed(raw).record
}

/// Parse one raw completion, keeping quality and warnings.
pub fn parse_response_detailed(raw: &str) -> ParsedResponse {
    let cleaned = strip_code_fences(raw);
    if cleaned.is_empty() {
        return ParsedResponse::unusable(Vec::new(), "empty response");
    }

    let mut warnings = Vec::new();
    let parsed = match parse_document(cleaned, &mut warnings) {
        Some(Value::Object(map)) => {
            let mut builder = RecordBuilder::new(warnings);
            builder.read_object(&map);
            builder.finish()
        }
        Some(other) => ParsedResponse::unusable(
            warnings,
            format!("top-level JSON is {}, expected an object", kind_of(&other)),
        ),
        None => salvage(cleaned, warnings),
    };

    if parsed.quality == ParseQuality::Unusable {
        warn!(
            warnings = ?parsed.warnings,
            raw_len = raw.len(),
            "Failed to parse extraction response, returning empty record"
        );
    } else if !parsed.warnings.is_empty() {
        debug!(
            quality = %parsed.quality,
            warnings = ?parsed.warnings,
            "Extraction response repaired"
        );
    }

    parsed
}

/// Validate an already-structured record (e.g. read from an interchange
/// file). Raw strings are parsed as completions.
pub fn parse_record_value(value: &Value) -> ParsedResponse {
    match value {
        Value::Object(map) => {
            let mut builder = RecordBuilder::new(Vec::new());
            builder.read_object(map);
            builder.finish()
        }
        Value::String(raw) => parse_response_detailed(raw),
        other => ParsedResponse::unusable(
            Vec::new(),
            format!("record is {}, expected an object", kind_of(other)),
        ),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Document-level recovery
// ─────────────────────────────────────────────────────────────────────────────

fn parse_document(cleaned: &str, warnings: &mut Vec<String>) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Some(unwrap_singleton(value));
    }

    let candidate = extract_json_object(cleaned);
    if let Some(json_str) = candidate
        && let Ok(value) = serde_json::from_str::<Value>(json_str)
    {
        return Some(value);
    }

    let repaired = strip_trailing_commas(candidate.unwrap_or(cleaned));
    if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
        warnings.push("removed trailing commas".to_string());
        return Some(unwrap_singleton(value));
    }

    None
}

/// `[{...}]` is accepted as `{...}`.
fn unwrap_singleton(value: Value) -> Value {
    match value {
        Value::Array(mut items) if items.len() == 1 && items[0].is_object() => items.remove(0),
        other => other,
    }
}

/// Recover sections independently from text that is not a JSON document.
fn salvage(text: &str, mut warnings: Vec<String>) -> ParsedResponse {
    let mut sections: [Vec<Value>; 3] = Default::default();
    let mut found_any = false;

    for (slot, key) in sections.iter_mut().zip(SECTIONS) {
        if let Some((items, complete)) = salvage_section(text, key) {
            found_any = true;
            if !complete {
                warnings.push(format!(
                    "section '{key}' is truncated; kept {} complete item(s)",
                    items.len()
                ));
            }
            *slot = items;
        }
    }

    if !found_any {
        return ParsedResponse::unusable(warnings, "no JSON object or recoverable section found");
    }

    let mut builder = RecordBuilder::new(warnings);
    builder.quality = ParseQuality::Partial;
    let [entities, events, relationships] = sections;
    builder.read_sections(&entities, &events, &relationships);
    builder.finish()
}

/// Items of section `key`, and whether the array was closed.
fn salvage_section(text: &str, key: &str) -> Option<(Vec<Value>, bool)> {
    let open = find_section_array(text, key)?;

    if let Some(close) = find_matching(text.as_bytes(), open) {
        let slice = &text[open..=close];
        let parsed = serde_json::from_str::<Value>(slice)
            .or_else(|_| serde_json::from_str::<Value>(&strip_trailing_commas(slice)));
        if let Ok(Value::Array(items)) = parsed {
            return Some((items, true));
        }
    }

    Some((salvage_items(text, open), false))
}

/// Complete `{...}` items following the `[` at `open`.
pub(crate) fn salvage_items(text: &str, open: usize) -> Vec<Value> {
    let bytes = text.as_bytes();
    let mut items = Vec::new();
    let mut pos = open + 1;

    loop {
        while pos < bytes.len() && (bytes[pos].is_ascii_whitespace() || bytes[pos] == b',') {
            pos += 1;
        }
        if pos >= bytes.len() || bytes[pos] != b'{' {
            break;
        }
        let Some(end) = find_matching(bytes, pos) else {
            break;
        };
        let slice = &text[pos..=end];
        let parsed = serde_json::from_str::<Value>(slice)
            .or_else(|_| serde_json::from_str::<Value>(&strip_trailing_commas(slice)));
        if let Ok(value) = parsed {
            items.push(value);
        }
        pos = end + 1;
    }

    items
}

/// Byte offset of the `[` opening `"key": [`.
fn find_section_array(text: &str, key: &str) -> Option<usize> {
    let needle = format!("\"{key}\"");
    let bytes = text.as_bytes();
    let skip_ws = |mut pos: usize| {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        pos
    };

    let mut from = 0;
    while let Some(rel) = text[from..].find(&needle) {
        let after = from + rel + needle.len();
        let colon = skip_ws(after);
        if bytes.get(colon) == Some(&b':') {
            let open = skip_ws(colon + 1);
            if bytes.get(open) == Some(&b'[') {
                return Some(open);
            }
        }
        from = after;
    }
    None
}

/// Index of the bracket closing the one at `open`, skipping string contents.
pub(crate) fn find_matching(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strip markdown code fences from LLM output.
///
/// An unterminated fence keeps everything after its opening line.
fn strip_code_fences(s: &str) -> &str {
    let s = s.trim();

    let Some(start) = s.find("```") else {
        return s;
    };
    let after_fence = &s[start + 3..];
    let body = match after_fence.find('\n') {
        Some(nl) => &after_fence[nl + 1..],
        // ```{...}``` on one line
        None => after_fence.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Try to find a top-level JSON object `{...}` in the text.
fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end > start {
        Some(&s[start..=end])
    } else {
        None
    }
}

/// Remove commas that directly precede `}` or `]` outside strings.
fn strip_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }

    out
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed validation
// ─────────────────────────────────────────────────────────────────────────────

struct RecordBuilder {
    record: ExtractionRecord,
    quality: ParseQuality,
    warnings: Vec<String>,
    /// Names of `user`-typed entities; they resolve to the session user.
    speakers: Vec<String>,
}

impl RecordBuilder {
    fn new(warnings: Vec<String>) -> Self {
        Self {
            record: ExtractionRecord::default(),
            quality: ParseQuality::WellFormed,
            warnings,
            speakers: Vec::new(),
        }
    }

    fn degrade(&mut self, warning: String) {
        if self.quality == ParseQuality::WellFormed {
            self.quality = ParseQuality::Partial;
        }
        self.warnings.push(warning);
    }

    fn read_object(&mut self, map: &Map<String, Value>) {
        let entities = self.section(map, "entities");
        let events = self.section(map, "events");
        let relationships = self.section(map, "relationships");
        self.read_sections(entities, events, relationships);

        if let Some(source) = optional_str(map, &["source_message"]) {
            self.record.source_message = Some(source);
        }
    }

    fn section<'a>(&mut self, map: &'a Map<String, Value>, key: &str) -> &'a [Value] {
        match map.get(key) {
            None | Some(Value::Null) => &[],
            Some(Value::Array(items)) => items,
            Some(other) => {
                self.degrade(format!(
                    "section '{key}' is {}, expected an array",
                    kind_of(other)
                ));
                &[]
            }
        }
    }

    fn read_sections(&mut self, entities: &[Value], events: &[Value], relationships: &[Value]) {
        for (i, value) in entities.iter().enumerate() {
            match parse_entity(value) {
                Ok(entity) if entity.is_speaker() => self.speakers.push(entity.name),
                Ok(entity) => self.record.entities.push(entity),
                Err(reason) => self.degrade(format!("entity #{i} dropped: {reason}")),
            }
        }

        for (i, value) in events.iter().enumerate() {
            match parse_event(value) {
                Ok(event) => self.record.events.push(event),
                Err(reason) => self.degrade(format!("event #{i} dropped: {reason}")),
            }
        }

        let index = NameIndex::new(&self.record, &self.speakers);
        for (i, value) in relationships.iter().enumerate() {
            match parse_relationship(value, &index) {
                Ok(relationship) => self.record.relationships.push(relationship),
                Err(reason) => self.degrade(format!("relationship #{i} dropped: {reason}")),
            }
        }
    }

    fn finish(self) -> ParsedResponse {
        ParsedResponse {
            record: self.record,
            quality: self.quality,
            warnings: self.warnings,
        }
    }
}

fn parse_entity(value: &Value) -> Result<Entity, String> {
    let obj = as_object(value)?;
    Ok(Entity {
        name: required_str(obj, &["name"])?,
        kind: required_str(obj, &["type", "entity_type"])?,
        properties: properties_of(obj),
        extracted_from: optional_str(obj, &["extracted_from"]),
    })
}

fn parse_event(value: &Value) -> Result<Event, String> {
    let obj = as_object(value)?;
    Ok(Event {
        name: required_str(obj, &["name"])?,
        kind: required_str(obj, &["type", "event_type"])?,
        properties: properties_of(obj),
        date: optional_str(obj, &["date"]),
        location: optional_str(obj, &["location"]),
        extracted_from: optional_str(obj, &["extracted_from"]),
    })
}

fn parse_relationship(value: &Value, index: &NameIndex) -> Result<Relationship, String> {
    let obj = as_object(value)?;
    let relationship_type = required_str(obj, &["type", "relationship_type", "relation"])?;

    let source = first_field(obj, &["source", "source_ref", "from"])
        .ok_or_else(|| "missing 'source'".to_string())?;
    let target = first_field(obj, &["target", "target_ref", "to"])
        .ok_or_else(|| "missing 'target'".to_string())?;

    let source_ref = index
        .resolve(source)
        .map_err(|r| format!("unresolved source {r}"))?;
    let target_ref = index
        .resolve(target)
        .map_err(|r| format!("unresolved target {r}"))?;

    Ok(Relationship {
        source_ref,
        target_ref,
        relationship_type,
        properties: properties_of(obj),
    })
}

fn as_object(value: &Value) -> Result<&Map<String, Value>, String> {
    value
        .as_object()
        .ok_or_else(|| format!("expected an object, got {}", kind_of(value)))
}

fn first_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn required_str(obj: &Map<String, Value>, keys: &[&str]) -> Result<String, String> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| format!("missing or empty '{}'", keys[0]))
}

fn optional_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| obj.get(*k)).find_map(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn properties_of(obj: &Map<String, Value>) -> Properties {
    match obj.get("properties") {
        Some(Value::Object(map)) => map.clone(),
        _ => Properties::new(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reference resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Name lookup over one record: speakers, then entities, then events.
struct NameIndex {
    exact: HashMap<String, NodeRef>,
    folded: HashMap<String, NodeRef>,
    event_keys: HashSet<NodeKey>,
}

impl NameIndex {
    fn new(record: &ExtractionRecord, speakers: &[String]) -> Self {
        let mut index = Self {
            exact: HashMap::new(),
            folded: HashMap::new(),
            event_keys: record.events.iter().map(Event::key).collect(),
        };

        let candidates = speakers
            .iter()
            .map(|name| (name.as_str(), NodeRef::User))
            .chain(
                record
                    .entities
                    .iter()
                    .map(|e| (e.name.as_str(), NodeRef::Entity(e.key()))),
            )
            .chain(
                record
                    .events
                    .iter()
                    .map(|e| (e.name.as_str(), NodeRef::Event(e.key()))),
            );

        for (name, node) in candidates {
            index
                .folded
                .entry(name.to_lowercase())
                .or_insert_with(|| node.clone());
            index.exact.entry(name.to_string()).or_insert(node);
        }

        index
    }

    fn by_name(&self, name: &str) -> Option<NodeRef> {
        if name.is_empty() {
            return None;
        }
        if name.eq_ignore_ascii_case("user") {
            return Some(NodeRef::User);
        }
        self.exact
            .get(name)
            .or_else(|| self.folded.get(&name.to_lowercase()))
            .cloned()
    }

    fn resolve(&self, value: &Value) -> Result<NodeRef, String> {
        match value {
            Value::String(s) => {
                let name = s.trim();
                self.by_name(name).ok_or_else(|| format!("'{name}'"))
            }
            Value::Object(obj) => self.resolve_object(obj),
            other => Err(format!("reference given as {}", kind_of(other))),
        }
    }

    fn resolve_object(&self, obj: &Map<String, Value>) -> Result<NodeRef, String> {
        let label = obj.get("label").and_then(Value::as_str).map(str::trim);
        if label.is_some_and(|l| l.eq_ignore_ascii_case("user")) {
            return Ok(NodeRef::User);
        }

        let name = optional_str(obj, &["name"]);
        let kind = optional_str(obj, &["type", "entity_type", "event_type"]);

        match (name, kind) {
            (Some(_), Some(kind)) if kind.eq_ignore_ascii_case("user") => Ok(NodeRef::User),
            (Some(name), Some(kind)) => {
                let key = NodeKey::new(name, kind);
                Ok(match label {
                    Some(l) if l.eq_ignore_ascii_case("event") => NodeRef::Event(key),
                    Some(l) if l.eq_ignore_ascii_case("entity") => NodeRef::Entity(key),
                    _ if self.event_keys.contains(&key) => NodeRef::Event(key),
                    _ => NodeRef::Entity(key),
                })
            }
            (Some(name), None) => self.by_name(&name).ok_or_else(|| format!("'{name}'")),
            (None, _) => Err("reference object without a name".to_string()),
        }
    }
}
