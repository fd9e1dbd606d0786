use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Author of a conversation turn. `assistant` is accepted as an alias for `model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "assistant")]
    Model,
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn transcript_label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Model => "Assistant",
            Role::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }
}

/// One entry of the caller-owned conversation history. Same shape as Gemini `contents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenated text of all parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn has_text(&self) -> bool {
        !self.text().trim().is_empty()
    }
}

/// Body of `POST /stream`. A missing `history` is treated as empty.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChatRequest {
    #[serde(default)]
    pub history: Vec<Turn>,
}

/// Renders turns as a role-prefixed transcript, one turn per line.
pub fn render_transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role.transcript_label(), t.text()))
        .collect::<Vec<_>>()
        .join("\n")
}

// ───────────────────────────────────────────────────────────────────────────────
// Retrieval
// ───────────────────────────────────────────────────────────────────────────────

/// A row returned by the similarity search RPC.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SearchMatch {
    pub similarity: f32,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub source_label: String,
    pub page_range: Option<String>,
    pub similarity: f32,
    pub text: String,
}

impl Fragment {
    pub fn from_match(m: &SearchMatch) -> Self {
        let metadata = m.fields.get("metadata").and_then(|v| v.as_object());
        let lookup = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .find_map(|k| m.fields.get(*k).and_then(value_to_label))
                .or_else(|| {
                    metadata.and_then(|md| keys.iter().find_map(|k| md.get(*k).and_then(value_to_label)))
                })
        };

        Self {
            source_label: lookup(&["source", "document_name", "file_name", "title"])
                .unwrap_or_else(|| "Unknown source".to_string()),
            page_range: lookup(&["page_range", "pages", "page"]),
            similarity: m.similarity.clamp(0.0, 1.0),
            text: lookup(&["content", "text", "chunk"]).unwrap_or_default(),
        }
    }
}

fn value_to_label(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) if !items.is_empty() => Some(
            items
                .iter()
                .filter_map(value_to_label)
                .collect::<Vec<_>>()
                .join("-"),
        ),
        _ => None,
    }
}

// ───────────────────────────────────────────────────────────────────────────────
// Gemini wire format
// ───────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Turn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

impl GenerateRequest {
    pub fn new(contents: Vec<Turn>) -> Self {
        Self {
            contents,
            generation_config: None,
        }
    }

    /// Single user prompt, low temperature. Used for utility calls.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            contents: vec![Turn::user(text)],
            generation_config: Some(GenerationConfig {
                temperature: Some(0.0),
                ..Default::default()
            }),
        }
    }

    pub fn with_json_schema(mut self, schema: Value) -> Self {
        let cfg = self.generation_config.get_or_insert_with(Default::default);
        cfg.response_mime_type = Some("application/json".to_string());
        cfg.response_schema = Some(schema);
        self
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// Text of the first candidate, all parts joined.
    pub fn first_text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        Some(text)
    }
}
