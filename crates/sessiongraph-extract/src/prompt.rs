//! Extraction prompt for a single conversational message.

/// Builds the per-message extraction prompt.
pub struct ExtractionPrompt;

impl ExtractionPrompt {
    /// Wrap `message` in the extraction instructions and worked example.
    pub fn build(message: &str) -> String {
        let mut prompt = String::with_capacity(
            TASK_INSTRUCTION.len() + FEW_SHOT_EXAMPLE.len() + message.len() + 128,
        );

        prompt.push_str(TASK_INSTRUCTION);
        prompt.push_str("\n\n");
        prompt.push_str(FEW_SHOT_EXAMPLE);
        prompt.push_str("\n\n---\n\nNow extract from this message:\n\n");
        prompt.push_str(message.trim());
        prompt.push_str("\n\nRespond with ONLY the JSON object. No markdown, no explanation.\n");

        prompt
    }

    /// Default system prompt sent alongside [`ExtractionPrompt::build`].
    pub fn system() -> &'static str {
        SYSTEM_INSTRUCTION
    }
}

const SYSTEM_INSTRUCTION: &str = r#"You are an information extraction system that turns a single chat message into a graph of entities, events, and relationships.

Rules:
- Extract only facts stated explicitly in the message. Never infer emotions, motives, or implied facts.
- Never merge separate things unless the text says they are the same.
- Output only valid JSON. Do not show your reasoning.

Entity types:
- user: the first-person speaker ("I", "me", "my", "we"); always named "USER"
- person, pet, playlist, location, organization, degree
- object: physical or abstract items (guitar, paperwork, skills)
- platform: services, software, apps, learning platforms

Event types: request, action, creation, purchase, attendance, meeting, upgrade, utility

Relationship types: OWNS, CREATED, PURCHASED, HAS, MET, PREFERS, ATTENDED, VISITED, PLAYS, MENTIONS, REFERS_TO, RELATED_TO, BEFORE, AFTER, PERFORMS, HAS_INTEREST_IN, REQUESTS, TARGETS, HELPS_IMPROVE, HAS_RESULTED_IN, PROVIDES_UTILITY_FOR, CONCERNS, INCLUDES

Verb phrases with a direct object ("played the guitar", "bought a laptop") are NOT events: create an entity for the object and a typed relationship from USER to it. Create events only for requests, states or utilities, abstract processes, and actions without a direct object. Use PERFORMS only when no more specific type applies."#;

const TASK_INSTRUCTION: &str = r#"Extract structured information from the message below.

Return a JSON object with this structure:
```json
{
  "entities": [
    {"name": "...", "type": "...", "properties": {}, "extracted_from": "..."}
  ],
  "events": [
    {"name": "...", "type": "...", "date": null, "location": null, "properties": {}, "extracted_from": "..."}
  ],
  "relationships": [
    {"source": "...", "target": "...", "type": "...", "properties": {}}
  ]
}
```

Rules:
- If first-person pronouns appear, include an entity named "USER" of type "user"
- `properties` holds explicit attributes only
- `extracted_from` is the snippet of the message the item came from
- Event `date` and `location` are the explicit (or relative) values, or null
- Every relationship `source` and `target` must be a name from `entities` or `events`
- If nothing meaningful can be extracted, return `{"entities": [], "events": [], "relationships": []}`"#;

const FEW_SHOT_EXAMPLE: &str = r#"Example:

Message:
I graduated last year with a degree in Computer Science. It has really helped me in my current job. Do you have any tips for organizing my project documentation?

Extraction:
```json
{
  "entities": [
    {"name": "USER", "type": "user", "properties": {}, "extracted_from": "I graduated last year"},
    {"name": "Computer Science degree", "type": "degree", "properties": {"field": "Computer Science"}, "extracted_from": "degree in Computer Science"},
    {"name": "current job", "type": "organization", "properties": {}, "extracted_from": "my current job"},
    {"name": "project documentation", "type": "object", "properties": {}, "extracted_from": "my project documentation"}
  ],
  "events": [
    {"name": "graduation", "type": "attendance", "date": "last year", "location": null, "properties": {}, "extracted_from": "I graduated last year"},
    {"name": "utility of degree", "type": "utility", "date": "current", "location": null, "properties": {"intensity": "really"}, "extracted_from": "It has really helped me"},
    {"name": "request for tips", "type": "request", "date": null, "location": null, "properties": {"topic": "organizing documentation"}, "extracted_from": "Do you have any tips"}
  ],
  "relationships": [
    {"source": "USER", "target": "graduation", "type": "PERFORMS", "properties": {}},
    {"source": "graduation", "target": "Computer Science degree", "type": "HAS_RESULTED_IN", "properties": {}},
    {"source": "Computer Science degree", "target": "utility of degree", "type": "PROVIDES_UTILITY_FOR", "properties": {}},
    {"source": "USER", "target": "current job", "type": "HAS", "properties": {"status": "current"}},
    {"source": "USER", "target": "request for tips", "type": "REQUESTS", "properties": {}},
    {"source": "request for tips", "target": "project documentation", "type": "CONCERNS", "properties": {}}
  ]
}
```"#;
