//! Fact Extractor (§4.5).
//!
//! Turns a conversation into a list of atomic, self-contained fact
//! strings suitable for standalone storage as memories. Runs one LLM
//! call (plus, on a schema-validation failure, one stricter retry) and
//! degrades to an empty fact list rather than failing the caller — an
//! extraction failure just means "no new facts this turn".

use serde::Deserialize;

use crate::error::{ExtractionError, Result};
use crate::llm::{LlmClient, Message};

/// One message in the source conversation being mined for facts.
///
/// Distinct from [`crate::llm::Message`]: this is the *input* conversation
/// (open-ended role strings like `"user"`, `"assistant"`, `"tool"`), not
/// the prompt sent to the LLM.
#[derive(Clone, Debug)]
pub struct ConversationMessage {
    /// The speaker's role, as given by the caller.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ConversationMessage {
    /// Creates a conversation message.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Controls which conversation roles are fed to the extractor.
///
/// By default every role except `"system"` is kept. Setting `include_roles`
/// keeps only those roles; setting `exclude_roles` removes those roles
/// (and no others) from the default. At most one of the two should be set —
/// if both are, `include_roles` wins.
#[derive(Clone, Debug, Default)]
pub struct ExtractOptions {
    /// If set, only messages with one of these roles are kept.
    pub include_roles: Option<Vec<String>>,
    /// If set, messages with one of these roles are dropped (instead of
    /// the default "drop system only" behavior).
    pub exclude_roles: Option<Vec<String>>,
}

const FACT_EXTRACTION_PROMPT: &str = "You extract atomic, self-contained facts from a \
conversation. Each fact must stand alone without conversational context. Ignore greetings \
and other non-factual chatter. Respond with JSON matching {\"facts\": [string, ...]}.";

const STRICT_JSON_INSTRUCTION: &str =
    "Your previous response did not parse as valid JSON. Respond with valid JSON only, \
matching exactly {\"facts\": [string, ...]}, no surrounding prose or markdown fences.";

#[derive(Deserialize)]
struct FactsResponse {
    facts: Vec<String>,
}

fn normalize_messages<'a>(
    conversation: &'a [ConversationMessage],
    options: &ExtractOptions,
) -> Vec<&'a ConversationMessage> {
    if let Some(include) = &options.include_roles {
        conversation.iter().filter(|m| include.contains(&m.role)).collect()
    } else if let Some(exclude) = &options.exclude_roles {
        conversation.iter().filter(|m| !exclude.contains(&m.role)).collect()
    } else {
        conversation.iter().filter(|m| m.role != "system").collect()
    }
}

fn render_conversation(messages: &[&ConversationMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_facts(raw: &str) -> std::result::Result<Vec<String>, ExtractionError> {
    serde_json::from_str::<FactsResponse>(raw)
        .map(|r| r.facts)
        .map_err(|e| ExtractionError::SchemaMismatch(e.to_string()))
}

/// Extracts atomic facts from `conversation`.
///
/// Returns `Ok(vec![])` (not an error) both for an empty/all-filtered
/// conversation and for an extraction that fails after its retry — the
/// caller (`crate::core::MemoryCore::add`) treats both the same way:
/// "no new facts", with a warning already logged here for the latter.
pub fn extract_facts(
    llm: &dyn LlmClient,
    conversation: &[ConversationMessage],
    options: &ExtractOptions,
) -> Result<Vec<String>> {
    let normalized = normalize_messages(conversation, options);
    if normalized.is_empty() {
        return Ok(Vec::new());
    }

    let rendered = render_conversation(&normalized);
    let messages = [Message::system(FACT_EXTRACTION_PROMPT), Message::user(rendered.clone())];

    let raw = match llm.generate(&messages, Some("facts")) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::warn!(error = %err, "fact extraction LLM call failed, returning no facts");
            return Ok(Vec::new());
        }
    };

    if let Ok(facts) = parse_facts(&raw) {
        return Ok(facts);
    }

    tracing::debug!("fact extraction response failed schema validation, retrying");
    let retry_messages = [
        Message::system(FACT_EXTRACTION_PROMPT),
        Message::user(rendered),
        Message::system(STRICT_JSON_INSTRUCTION),
    ];

    let raw_retry = match llm.generate(&retry_messages, Some("facts")) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::warn!(error = %err, "fact extraction retry LLM call failed, returning no facts");
            return Ok(Vec::new());
        }
    };

    match parse_facts(&raw_retry) {
        Ok(facts) => Ok(facts),
        Err(err) => {
            tracing::warn!(error = %err, "fact extraction failed after retry, returning no facts");
            Ok(Vec::new())
        }
    }
}
