//! Anthropic Messages API executor.
//!
//! System text goes in the top-level `system` field; the message list must
//! alternate user and assistant turns, so consecutive turns with the same
//! role are merged.

use sb_domain::chat::Role;
use sb_domain::error::{Error, Result};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::traits::{AgentExecutor, ExecutorSettings, RunRequest, RunResult, Usage};
use crate::util::{build_client, from_reqwest, http_error, with_cancel};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicExecutor {
    base_url: String,
    api_key: String,
    default_model: String,
    settings: ExecutorSettings,
    client: reqwest::Client,
}

impl AnthropicExecutor {
    pub fn new(
        base_url: &str,
        api_key: String,
        default_model: &str,
        settings: ExecutorSettings,
    ) -> Result<Self> {
        let client = build_client(settings.timeout)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            default_model: default_model.to_owned(),
            settings,
            client,
        })
    }

    fn build_body(&self, req: &RunRequest) -> Value {
        let mut system_parts: Vec<&str> = Vec::new();
        if let Some(prompt) = &self.settings.system_prompt {
            system_parts.push(prompt);
        }

        let mut turns: Vec<(Role, String)> = Vec::new();
        let mut push = |role: Role, text: &str| match turns.last_mut() {
            Some((last, content)) if *last == role => {
                content.push_str("\n\n");
                content.push_str(text);
            }
            _ => turns.push((role, text.to_owned())),
        };
        for entry in &req.history {
            match entry.role {
                Role::System => system_parts.push(&entry.content),
                Role::User | Role::Assistant => push(entry.role, &entry.content),
                Role::Unknown => {}
            }
        }
        push(Role::User, &req.body);

        // The API requires the first turn to come from the user.
        while turns.first().is_some_and(|(r, _)| *r == Role::Assistant) {
            turns.remove(0);
        }

        let messages: Vec<Value> = turns
            .into_iter()
            .map(|(role, content)| serde_json::json!({"role": role.as_str(), "content": content}))
            .collect();

        let model = req.model.as_deref().unwrap_or(&self.default_model);
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": self.settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if let Some(temp) = req.temperature.or(self.settings.temperature) {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }

    async fn call(&self, req: &RunRequest) -> Result<RunResult> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(req);

        tracing::debug!(provider = "anthropic", url = %url, "anthropic messages request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(http_error("anthropic", status, &resp_text));
        }

        let resp_json: Value = serde_json::from_str(&resp_text).map_err(|e| Error::Provider {
            provider: "anthropic".into(),
            message: format!("malformed response: {e}"),
        })?;
        parse_messages_response(&resp_json)
    }
}

#[async_trait::async_trait]
impl AgentExecutor for AnthropicExecutor {
    async fn run(&self, req: &RunRequest, cancel: &CancellationToken) -> Result<RunResult> {
        with_cancel(cancel, self.call(req)).await
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

fn parse_messages_response(body: &Value) -> Result<RunResult> {
    if body.get("type").and_then(Value::as_str) == Some("error") {
        let message = body
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(Error::Provider {
            provider: "anthropic".into(),
            message: message.into(),
        });
    }

    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Provider {
            provider: "anthropic".into(),
            message: "no content in response".into(),
        })?;
    let reply: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();

    let usage = body
        .get("usage")
        .map(|u| Usage {
            input_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
            output_tokens: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
        })
        .unwrap_or_default();

    Ok(RunResult {
        reply: reply.join(""),
        usage,
        model: body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_domain::chat::HistoryEntry;

    fn executor(settings: ExecutorSettings) -> AnthropicExecutor {
        AnthropicExecutor::new("https://api.anthropic.com/", "k".into(), "claude-3-5-haiku-latest", settings)
            .unwrap()
    }

    #[test]
    fn system_history_lifted_and_turns_merged() {
        let exec = executor(ExecutorSettings {
            system_prompt: Some("persona".into()),
            ..Default::default()
        });
        let req = RunRequest {
            body: "third".into(),
            history: vec![
                HistoryEntry::new(Role::Assistant, "orphan"),
                HistoryEntry::new(Role::System, "context"),
                HistoryEntry::new(Role::User, "first"),
                HistoryEntry::new(Role::User, "second"),
                HistoryEntry::new(Role::Assistant, "ok"),
            ],
            ..Default::default()
        };
        let body = exec.build_body(&req);
        assert_eq!(body["system"], "persona\n\ncontext");
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0]["role"], "user");
        assert_eq!(msgs[0]["content"], "first\n\nsecond");
        assert_eq!(msgs[2]["content"], "third");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(exec.base_url, "https://api.anthropic.com");
    }

    #[test]
    fn parse_text_blocks_and_usage() {
        let body = serde_json::json!({
            "model": "claude-3-5-haiku-20241022",
            "content": [{"type": "text", "text": "Hi "}, {"type": "text", "text": "there"}],
            "usage": {"input_tokens": 9, "output_tokens": 2}
        });
        let res = parse_messages_response(&body).unwrap();
        assert_eq!(res.reply, "Hi there");
        assert_eq!(res.usage, Usage { input_tokens: 9, output_tokens: 2 });
    }

    #[test]
    fn error_envelope_is_provider_error() {
        let body = serde_json::json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        });
        match parse_messages_response(&body) {
            Err(Error::Provider { message, .. }) => assert_eq!(message, "Overloaded"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
