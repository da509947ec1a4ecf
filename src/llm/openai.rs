//! OpenAI-compatible chat completions client (OpenAI, OpenRouter, Gemini).

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::model::{ChatMessage, LanguageModel, ModelOutput, ToolSpec, Usage};
use crate::tools::ToolCall;
use serde_json::{Value, json};
use std::time::Duration;

/// Completion client for any provider speaking the OpenAI chat API.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleModel {
    http: reqwest::Client,
    config: LlmConfig,
    chat_completions_url: String,
}

impl OpenAiCompatibleModel {
    pub fn new(config: LlmConfig, request_timeout: Duration) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| LlmError::Request(error.to_string()))?;
        let chat_completions_url = format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        );
        Ok(Self {
            http,
            config,
            chat_completions_url,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": convert_messages(messages),
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        if !tools.is_empty() {
            let tools: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        if let Some(sort) = &self.config.openrouter_sort
            && self.config.provider == crate::llm::providers::Provider::OpenRouter
        {
            body["provider"] = json!({ "sort": sort });
        }

        body
    }
}

impl LanguageModel for OpenAiCompatibleModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ModelOutput, LlmError> {
        let body = self.request_body(messages, tools);

        let mut request = self
            .http
            .post(&self.chat_completions_url)
            .header("authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json");
        for (name, value) in self.config.provider.extra_headers() {
            request = request.header(*name, *value);
        }

        let response = request.json(&body).send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Request(error.to_string())
            }
        })?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|error| LlmError::Request(format!("failed to read response body: {error}")))?;

        let response_body: Value = serde_json::from_str(&response_text).map_err(|error| {
            LlmError::InvalidResponse(format!(
                "response ({status}) is not valid JSON: {error}; body: {}",
                truncate_body(&response_text)
            ))
        })?;

        if !status.is_success() {
            let message = response_body["error"]["message"]
                .as_str()
                .unwrap_or_else(|| truncate_body(&response_text));
            return Err(LlmError::Status {
                status: status.as_u16(),
                message: message.to_string(),
            });
        }

        let (output, usage) = parse_response(&response_body)?;
        if let Some(usage) = usage {
            tracing::info!(
                provider = %self.config.provider,
                model = %self.config.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total(),
                "token usage"
            );
        }
        Ok(output)
    }
}

/// Convert history into OpenAI chat messages.
pub(crate) fn convert_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match message {
            ChatMessage::System(content) => json!({ "role": "system", "content": content }),
            ChatMessage::User(content) => json!({ "role": "user", "content": content }),
            ChatMessage::Assistant(content) => json!({ "role": "assistant", "content": content }),
            ChatMessage::AssistantToolCall { id, call } => json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": call.name(),
                        // OpenAI expects arguments as a JSON string
                        "arguments": call.arguments().to_string(),
                    }
                }]
            }),
            ChatMessage::ToolResult { id, content } => json!({
                "role": "tool",
                "tool_call_id": id,
                "content": content,
            }),
        })
        .collect()
}

/// Parse `choices[0].message` into a model output. The first tool call wins.
pub(crate) fn parse_response(body: &Value) -> Result<(ModelOutput, Option<Usage>), LlmError> {
    let choice = &body["choices"][0]["message"];
    if choice.is_null() {
        return Err(LlmError::InvalidResponse("response has no choices".into()));
    }

    let usage = body["usage"].is_object().then(|| Usage {
        prompt_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    });

    if let Some(tool_calls) = choice["tool_calls"].as_array()
        && let Some(first) = tool_calls.first()
    {
        if tool_calls.len() > 1 {
            tracing::debug!(count = tool_calls.len(), "model requested several tools, using the first");
        }

        let id = first["id"].as_str().unwrap_or_default().to_string();
        let name = first["function"]["name"].as_str().unwrap_or_default();
        // Usually a JSON string, but some providers send the object itself.
        let arguments_field = &first["function"]["arguments"];
        let arguments = match arguments_field {
            Value::String(raw) if raw.trim().is_empty() => json!({}),
            Value::String(raw) => {
                serde_json::from_str(raw).map_err(|error| LlmError::InvalidToolArguments {
                    tool: name.to_string(),
                    reason: error.to_string(),
                })?
            }
            Value::Object(_) => arguments_field.clone(),
            _ => json!({}),
        };

        let call = ToolCall::parse(name, &arguments)?;
        return Ok((ModelOutput::ToolCall { id, call }, usage));
    }

    let text = choice["content"]
        .as_str()
        .filter(|text| !text.trim().is_empty())
        .or_else(|| {
            choice["reasoning_content"]
                .as_str()
                .filter(|text| !text.trim().is_empty())
        });

    match text {
        Some(text) => Ok((ModelOutput::Text(text.trim().to_string()), usage)),
        None => Err(LlmError::InvalidResponse("empty response from provider".into())),
    }
}

fn truncate_body(body: &str) -> &str {
    const LIMIT: usize = 500;
    match body.char_indices().nth(LIMIT) {
        Some((cut, _)) => &body[..cut],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::Provider;

    fn config(provider: Provider) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: "key".into(),
            base_url: provider.default_base_url().into(),
            model: "gpt-4".into(),
            max_tokens: 500,
            temperature: 0.7,
            openrouter_sort: Some("price".into()),
        }
    }

    #[test]
    fn request_body_carries_tools_and_limits() {
        let model = OpenAiCompatibleModel::new(config(Provider::OpenAi), Duration::from_secs(5)).unwrap();
        let body = model.request_body(
            &[ChatMessage::System("sys".into()), ChatMessage::User("hi".into())],
            &crate::tools::tool_specs(),
        );

        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "search_forum");
        assert!(body.get("provider").is_none());
        assert_eq!(
            model.chat_completions_url,
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn openrouter_gets_provider_sorting() {
        let model =
            OpenAiCompatibleModel::new(config(Provider::OpenRouter), Duration::from_secs(5)).unwrap();
        let body = model.request_body(&[ChatMessage::User("hi".into())], &[]);
        assert_eq!(body["provider"]["sort"], "price");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn tool_call_history_round_trips_as_openai_messages() {
        let messages = convert_messages(&[
            ChatMessage::AssistantToolCall {
                id: "call_1".into(),
                call: ToolCall::SearchForum { query: "ubuntu".into() },
            },
            ChatMessage::ToolResult {
                id: "call_1".into(),
                content: "Result 1: ...".into(),
            },
        ]);

        assert_eq!(messages[0]["tool_calls"][0]["function"]["arguments"], r#"{"query":"ubuntu"}"#);
        assert_eq!(messages[1]["role"], "tool");
        assert_eq!(messages[1]["tool_call_id"], "call_1");
    }

    #[test]
    fn parses_text_answers_and_usage() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": " Try https://discourse.aosus.org/t/a/1 "}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30}
        });
        let (output, usage) = parse_response(&body).unwrap();
        assert_eq!(output, ModelOutput::Text("Try https://discourse.aosus.org/t/a/1".into()));
        assert_eq!(usage.map(|usage| usage.total()), Some(150));
    }

    #[test]
    fn first_tool_call_wins() {
        let body = json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [
                    {"id": "a", "type": "function", "function": {"name": "search_forum", "arguments": "{\"query\": \"grub\"}"}},
                    {"id": "b", "type": "function", "function": {"name": "no_result_message", "arguments": "{}"}}
                ]
            }}]
        });
        let (output, usage) = parse_response(&body).unwrap();
        assert_eq!(
            output,
            ModelOutput::ToolCall {
                id: "a".into(),
                call: ToolCall::SearchForum { query: "grub".into() }
            }
        );
        assert!(usage.is_none());
    }

    #[test]
    fn object_arguments_are_accepted() {
        let body = json!({
            "choices": [{"message": {"tool_calls": [
                {"id": "a", "function": {"name": "send_link", "arguments": {"url": "https://x.org/t/1", "message": "m"}}}
            ]}}]
        });
        let (output, _) = parse_response(&body).unwrap();
        assert!(matches!(output, ModelOutput::ToolCall { call: ToolCall::SendLink { .. }, .. }));
    }

    #[test]
    fn malformed_responses_are_errors() {
        assert!(matches!(
            parse_response(&json!({"choices": []})),
            Err(LlmError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_response(&json!({"choices": [{"message": {"content": ""}}]})),
            Err(LlmError::InvalidResponse(_))
        ));
        let bad_args = json!({"choices": [{"message": {"tool_calls": [
            {"id": "a", "function": {"name": "search_forum", "arguments": "{not json"}}
        ]}}]});
        assert!(matches!(
            parse_response(&bad_args),
            Err(LlmError::InvalidToolArguments { .. })
        ));
    }

    #[test]
    fn truncates_on_char_boundaries() {
        let long = "ع".repeat(600);
        assert_eq!(truncate_body(&long).chars().count(), 500);
        assert_eq!(truncate_body("short"), "short");
    }
}
