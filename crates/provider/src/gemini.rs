//! Google Gemini `generateContent` node

use crate::*;
use reqwest::Client;
use serde_json::{json, Value};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Gemini node. The system message becomes `systemInstruction`.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
}

impl GeminiProvider {
    pub fn new(
        api_key: impl Into<String>,
        api_base: Option<String>,
        default_model: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_base: api_base
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        let model = if model.is_empty() {
            self.default_model.as_str()
        } else {
            model
        };
        format!("{}/models/{}:generateContent", self.api_base, model)
    }

    fn build_request(&self, params: &ChatParams) -> Value {
        let contents: Vec<Value> = params
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                json!({ "role": role, "parts": [{ "text": &m.content }] })
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": params.max_tokens,
                "temperature": params.temperature,
            }
        });

        if let Some(system) = params.system_text() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }

        body
    }

    fn parse_response(&self, json: Value) -> Result<ChatResponse> {
        let candidate = json["candidates"].get(0).ok_or_else(|| {
            let reason = json["promptFeedback"]["blockReason"]
                .as_str()
                .unwrap_or("no candidates in response");
            ProviderError::InvalidResponse(reason.to_string())
        })?;

        let text: String = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let finish_reason = candidate["finishReason"]
            .as_str()
            .unwrap_or("STOP")
            .to_lowercase();

        let meta = &json["usageMetadata"];
        let usage = Usage {
            prompt_tokens: meta["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            completion_tokens: meta["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
            total_tokens: meta["totalTokenCount"].as_u64().unwrap_or(0) as u32,
        };

        Ok(ChatResponse {
            content: if text.is_empty() { None } else { Some(text) },
            finish_reason,
            usage,
        })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NoApiKey);
        }

        let url = self.endpoint(&params.model);
        trace!("◆ GEMINI REQUEST TO {}", url);
        let body = self.build_request(&params);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let raw = response.text().await?;

        if !status.is_success() {
            let json: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
            return Err(status_error(status, &json));
        }

        let json: Value = serde_json::from_str(&raw)?;
        let parsed = self.parse_response(json)?;
        debug!(
            "◆ GEMINI RESPONSE: {} TOKENS, FINISH {}",
            parsed.usage.total_tokens, parsed.finish_reason
        );
        Ok(parsed)
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_defaults() {
        let provider = GeminiProvider::new("key", None, None);
        assert_eq!(provider.api_base, DEFAULT_API_BASE);
        assert_eq!(provider.default_model(), DEFAULT_MODEL);
        assert!(provider.is_configured());
    }

    #[test]
    fn test_gemini_not_configured_without_key() {
        let provider = GeminiProvider::new("", None, None);
        assert!(!provider.is_configured());
    }

    #[test]
    fn test_endpoint_uses_model_and_trims_base() {
        let provider = GeminiProvider::new("key", Some("http://localhost:9000/".to_string()), None);
        assert_eq!(
            provider.endpoint("gemini-1.5-pro"),
            "http://localhost:9000/models/gemini-1.5-pro:generateContent"
        );
        assert_eq!(
            provider.endpoint(""),
            "http://localhost:9000/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_build_request_moves_system_to_instruction() {
        let provider = GeminiProvider::new("key", None, None);
        let mut params = ChatParams::single_turn("gemini-1.5-flash", "You run commands", "go");
        params.max_tokens = 512;

        let request = provider.build_request(&params);

        assert_eq!(
            request["systemInstruction"]["parts"][0]["text"],
            "You run commands"
        );
        let contents = request["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["text"], "go");
        assert_eq!(request["generationConfig"]["maxOutputTokens"], 512);
    }

    #[test]
    fn test_build_request_maps_assistant_to_model() {
        let provider = GeminiProvider::new("key", None, None);
        let params = ChatParams {
            model: "m".to_string(),
            messages: vec![
                Message::user("a"),
                Message {
                    role: Role::Assistant,
                    content: "b".to_string(),
                },
            ],
            ..Default::default()
        };

        let request = provider.build_request(&params);
        assert!(request.get("systemInstruction").is_none());
        assert_eq!(request["contents"][1]["role"], "model");
    }

    #[test]
    fn test_parse_response_joins_parts() {
        let provider = GeminiProvider::new("key", None, None);
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"reason\":"}, {"text": "\"ok\"}"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15}
        });

        let response = provider.parse_response(body).unwrap();
        assert_eq!(response.content.as_deref(), Some("{\"reason\":\"ok\"}"));
        assert_eq!(response.finish_reason, "stop");
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[test]
    fn test_parse_response_without_candidates() {
        let provider = GeminiProvider::new("key", None, None);
        let body = json!({"promptFeedback": {"blockReason": "SAFETY"}});

        match provider.parse_response(body) {
            Err(ProviderError::InvalidResponse(reason)) => assert_eq!(reason, "SAFETY"),
            other => panic!("Expected InvalidResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_response_empty_parts_is_none() {
        let provider = GeminiProvider::new("key", None, None);
        let body = json!({"candidates": [{"content": {"parts": []}}]});

        let response = provider.parse_response(body).unwrap();
        assert!(response.content.is_none());
        assert_eq!(response.text_or_empty_object(), "{}");
    }

    #[tokio::test]
    async fn test_chat_without_key_fails_fast() {
        let provider = GeminiProvider::new("", None, None);
        let result = provider.chat(ChatParams::default()).await;
        assert!(matches!(result, Err(ProviderError::NoApiKey)));
    }
}
