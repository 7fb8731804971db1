//! LLM client abstraction for fact extraction and reconciliation.
//!
//! The Fact Extractor (`crate::extractor`) and Reconciler (`crate::reconciler`)
//! are the only callers of this trait — both send a short message list and
//! expect a JSON string back, optionally validated against a named schema.

pub mod providers;

pub use providers::Provider;
#[cfg(feature = "providers")]
pub use providers::HttpLlmClient;

use crate::error::Result;

/// Role of a message in a chat-style LLM request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// System/instruction message.
    System,
    /// User-authored message.
    User,
    /// Prior assistant response (for multi-turn context).
    Assistant,
}

impl Role {
    /// Returns the wire-format string for this role (shared by every
    /// OpenAI-compatible provider).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a chat-style LLM request.
#[derive(Clone, Debug)]
pub struct Message {
    /// Who the message is from.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl Message {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// LLM client trait used by the Fact Extractor and Reconciler.
///
/// Implementations must be `Send + Sync`. Calls are synchronous, matching
/// the rest of the crate's core — the optional HTTP surface bridges this
/// via `spawn_blocking`.
pub trait LlmClient: Send + Sync {
    /// Sends `messages` and returns the model's raw text response.
    ///
    /// `expected_schema` is a hint (e.g. `"facts"` or `"memory"`) some
    /// providers use to request structured/JSON output; callers are
    /// still responsible for parsing and validating the returned string —
    /// this trait makes no parsing guarantee.
    fn generate(&self, messages: &[Message], expected_schema: Option<&str>) -> Result<String>;

    /// The provider this client talks to.
    fn provider(&self) -> Provider;

    /// The model name in use.
    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_as_str() {
        assert_eq!(Role::System.as_str(), "system");
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    #[test]
    fn test_message_constructors() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "hello");
    }
}
