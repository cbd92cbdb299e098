use super::{GenerationBackend, GenerationError, GenerationRequest, GenerationResponse};
use crate::prompt::tool_instructions;
use async_trait::async_trait;
use kg_core::config::GenerationConfig;
use kg_core::message::{Message, Role};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Chat-completions client for any OpenAI-compatible server.
///
/// Tool specs are not sent through the `tools` field: the call syntax is taught in a
/// system turn and the reply is parsed as plain text, so both syntaxes work with
/// servers that have no native function calling.
pub struct OpenAiCompatibleBackend {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    tool_result_role: String,
}

impl OpenAiCompatibleBackend {
    pub fn new(
        config: &GenerationConfig,
        tool_result_role: impl Into<String>,
    ) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GenerationError::Http(e.to_string()))?;
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty());
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key,
            tool_result_role: tool_result_role.into(),
        })
    }

    fn role_name(&self, role: Role) -> &str {
        match role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolResult => &self.tool_result_role,
        }
    }

    /// Chat-completions request body for `request`.
    pub fn request_body(&self, request: &GenerationRequest<'_>) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(json!({
            "role": "system",
            "content": tool_instructions(request.tools, request.call_syntax),
        }));
        messages.extend(request.messages.iter().map(|m: &Message| {
            json!({
                "role": self.role_name(m.role),
                "content": m.content.to_text(),
            })
        }));

        let params = request.params;
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": params.max_new_tokens,
            "temperature": params.effective_temperature(),
            "top_p": params.top_p,
            "stream": false,
        });
        if let (Some(top_k), Some(obj)) = (params.top_k, body.as_object_mut()) {
            obj.insert("top_k".to_string(), json!(top_k));
        }
        body
    }
}

#[async_trait]
impl GenerationBackend for OpenAiCompatibleBackend {
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
    ) -> Result<GenerationResponse, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.request_body(&request);
        debug!(%url, model = %self.model, turns = request.messages.len(), "generation request");

        let mut builder = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(format!("{url}: {e}"))
            } else {
                GenerationError::Http(format!("{url}: {e}"))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| GenerationError::Parse(e.to_string()))?;
        parse_completion(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Pull the assistant text and usage out of a chat-completions response.
fn parse_completion(json: &Value) -> Result<GenerationResponse, GenerationError> {
    if let Some(err) = json.get("error") {
        return Err(GenerationError::Api {
            status: 400,
            message: err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string(),
        });
    }

    let text = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
        .ok_or(GenerationError::EmptyResponse)?
        .to_string();

    let input_tokens = json
        .get("usage")
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(|t| t.as_u64());
    let output_tokens = json
        .get("usage")
        .and_then(|u| u.get("completion_tokens"))
        .and_then(|t| t.as_u64());

    Ok(GenerationResponse {
        text,
        input_tokens,
        output_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SamplingParams;
    use kg_core::config::CallSyntax;
    use kg_core::tool::ToolSpec;

    fn backend() -> OpenAiCompatibleBackend {
        let config = GenerationConfig {
            api_key_env: None,
            ..GenerationConfig::default()
        };
        OpenAiCompatibleBackend::new(&config, "ipython").unwrap()
    }

    #[test]
    fn test_body_maps_roles_and_sampling() {
        let messages = vec![
            Message::user("find Q42"),
            Message::assistant("{\"name\": \"search_entities\", \"parameters\": {}}"),
            Message::tool_result(json!("No matches found.")),
        ];
        let tools = vec![ToolSpec {
            name: "search_entities".into(),
            description: "Search.".into(),
            parameters: json!({"type": "object"}),
        }];
        let params = SamplingParams {
            do_sample: false,
            top_k: None,
            ..SamplingParams::default()
        };
        let request = GenerationRequest {
            messages: &messages,
            tools: &tools,
            call_syntax: CallSyntax::Json,
            params: &params,
        };

        let body = backend().request_body(&request);
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "ipython"]);
        assert!(body["messages"][0]["content"]
            .as_str()
            .unwrap()
            .contains("search_entities"));
        assert_eq!(body["temperature"], json!(0.0));
        assert!(body.get("top_k").is_none());
    }

    #[test]
    fn test_parse_completion() {
        let resp = parse_completion(&json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }))
        .unwrap();
        assert_eq!(resp.text, "hello");
        assert_eq!(resp.output_tokens, Some(3));

        assert_eq!(
            parse_completion(&json!({"choices": []})),
            Err(GenerationError::EmptyResponse)
        );
        assert!(matches!(
            parse_completion(&json!({"error": {"message": "model not loaded"}})),
            Err(GenerationError::Api { .. })
        ));
    }
}
