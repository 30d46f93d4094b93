//! Model inference boundary
//!
//! Text in, text out. Providers fail with [`ProviderError`]; callers decide
//! how to retry based on [`ProviderError::is_rate_limited`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use thiserror::Error;
use tracing::{debug, trace};

pub mod gemini;
pub mod openrouter;

pub use gemini::GeminiProvider;
pub use openrouter::OpenRouterProvider;

/// Inference errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("REQUEST FAILED: {0}")]
    Request(#[from] reqwest::Error),

    #[error("MALFORMED JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API REJECTED ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("NO API KEY")]
    NoApiKey,

    #[error("INVALID RESPONSE: {0}")]
    InvalidResponse(String),

    #[error("RATE LIMITED (429)")]
    RateLimited,
}

impl ProviderError {
    /// Rate-limit and quota failures get exponential backoff, everything else
    /// a short fixed pause.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ProviderError::RateLimited => true,
            ProviderError::Api { status: 429, .. } => true,
            ProviderError::Api { message, .. } => mentions_rate_limit(message),
            _ => false,
        }
    }
}

const RATE_LIMIT_MARKERS: &[&str] = &[
    "429",
    "quota",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "resource_exhausted",
];

fn mentions_rate_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Completion result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub finish_reason: String,
    #[serde(default)]
    pub usage: Usage,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }

    /// Content, or an empty JSON object when the model returned nothing
    pub fn text_or_empty_object(&self) -> String {
        match self.content.as_deref() {
            Some(text) if !text.trim().is_empty() => text.to_string(),
            _ => "{}".to_string(),
        }
    }
}

/// Token accounting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Conversation entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Request parameters
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            model: String::new(),
            messages: Vec::new(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

impl ChatParams {
    /// System instruction plus a single user turn
    pub fn single_turn(
        model: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::system(system), Message::user(user)],
            ..Default::default()
        }
    }

    /// Concatenated system messages, if any
    pub fn system_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

/// Inference endpoint
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse>;
    fn default_model(&self) -> String;
    fn is_configured(&self) -> bool;
}

/// Turn a non-success HTTP status into the matching error
pub(crate) fn status_error(status: reqwest::StatusCode, body: &serde_json::Value) -> ProviderError {
    if status.as_u16() == 429 {
        return ProviderError::RateLimited;
    }

    let message = body["error"]["message"]
        .as_str()
        .unwrap_or("UNKNOWN ERROR")
        .to_string();
    trace!("◆ API ERROR BODY: {}", body);
    debug!("◆ API REJECTED WITH {}: {}", status, message);

    ProviderError::Api {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ========== ProviderError Tests ==========

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::NoApiKey;
        assert_eq!(err.to_string(), "NO API KEY");

        let err = ProviderError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "API REJECTED (500): boom");

        let err = ProviderError::RateLimited;
        assert_eq!(err.to_string(), "RATE LIMITED (429)");
    }

    #[test]
    fn test_rate_limited_classification() {
        assert!(ProviderError::RateLimited.is_rate_limited());
        assert!(ProviderError::Api {
            status: 429,
            message: String::new()
        }
        .is_rate_limited());
        assert!(ProviderError::Api {
            status: 403,
            message: "Quota exceeded for project".to_string()
        }
        .is_rate_limited());
        assert!(ProviderError::Api {
            status: 400,
            message: "Rate limit exceeded, retry later".to_string()
        }
        .is_rate_limited());
    }

    #[test]
    fn test_transient_classification() {
        assert!(!ProviderError::Api {
            status: 500,
            message: "internal error".to_string()
        }
        .is_rate_limited());
        assert!(!ProviderError::InvalidResponse("no candidates".to_string()).is_rate_limited());
        assert!(!ProviderError::NoApiKey.is_rate_limited());
        assert!(!ProviderError::Api {
            status: 400,
            message: "cannot generate content".to_string()
        }
        .is_rate_limited());
    }

    #[test]
    fn test_status_error_maps_429() {
        let err = status_error(reqwest::StatusCode::TOO_MANY_REQUESTS, &json!({}));
        assert!(matches!(err, ProviderError::RateLimited));
    }

    #[test]
    fn test_status_error_extracts_message() {
        let body = json!({"error": {"message": "model not found"}});
        let err = status_error(reqwest::StatusCode::NOT_FOUND, &body);
        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "model not found");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    // ========== ChatResponse Tests ==========

    #[test]
    fn test_chat_response_text_builder() {
        let response = ChatResponse::text("Hello, world!");
        assert_eq!(response.content, Some("Hello, world!".to_string()));
        assert_eq!(response.finish_reason, "stop");
    }

    #[test]
    fn test_empty_response_becomes_empty_object() {
        let response = ChatResponse {
            content: None,
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        };
        assert_eq!(response.text_or_empty_object(), "{}");
        assert_eq!(ChatResponse::text("  ").text_or_empty_object(), "{}");
        assert_eq!(ChatResponse::text("{\"a\":1}").text_or_empty_object(), "{\"a\":1}");
    }

    // ========== Message / ChatParams Tests ==========

    #[test]
    fn test_message_roles() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::user("Hello");
        let json_str = serde_json::to_string(&msg).unwrap();
        assert!(json_str.contains("\"role\":\"user\""));
        assert!(json_str.contains("\"content\":\"Hello\""));
    }

    #[test]
    fn test_chat_params_default() {
        let params = ChatParams::default();
        assert_eq!(params.model, "");
        assert!(params.messages.is_empty());
        assert_eq!(params.max_tokens, 4096);
        assert_eq!(params.temperature, 0.7);
        assert!(params.system_text().is_none());
    }

    #[test]
    fn test_single_turn() {
        let params = ChatParams::single_turn("gemini-1.5-flash", "be terse", "hi");
        assert_eq!(params.model, "gemini-1.5-flash");
        assert_eq!(params.messages.len(), 2);
        assert_eq!(params.messages[0].role, Role::System);
        assert_eq!(params.messages[1].content, "hi");
        assert_eq!(params.system_text().as_deref(), Some("be terse"));
    }
}
