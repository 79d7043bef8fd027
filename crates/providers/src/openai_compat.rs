//! OpenAI-compatible executor.
//!
//! Works with OpenAI, OpenRouter, Groq, DeepSeek, Ollama, vLLM and any
//! other endpoint that follows the chat completions contract.

use sb_domain::chat::Role;
use sb_domain::error::{Error, Result};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::traits::{AgentExecutor, ExecutorSettings, RunRequest, RunResult, Usage};
use crate::util::{build_client, from_reqwest, http_error, with_cancel};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatExecutor {
    id: String,
    base_url: String,
    /// `None` for keyless local servers.
    api_key: Option<String>,
    default_model: String,
    settings: ExecutorSettings,
    client: reqwest::Client,
}

impl OpenAiCompatExecutor {
    pub fn new(
        id: &str,
        base_url: &str,
        api_key: Option<String>,
        default_model: &str,
        settings: ExecutorSettings,
    ) -> Result<Self> {
        let client = build_client(settings.timeout)?;
        Ok(Self {
            id: id.to_owned(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            default_model: default_model.to_owned(),
            settings,
            client,
        })
    }

    fn build_body(&self, req: &RunRequest) -> Value {
        let mut messages: Vec<Value> = Vec::with_capacity(req.history.len() + 2);
        if let Some(prompt) = &self.settings.system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": prompt}));
        }
        for entry in &req.history {
            if entry.role == Role::Unknown {
                continue;
            }
            messages.push(serde_json::json!({
                "role": entry.role.as_str(),
                "content": entry.content,
            }));
        }
        messages.push(serde_json::json!({"role": "user", "content": req.body}));

        let model = req.model.as_deref().unwrap_or(&self.default_model);
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });
        if let Some(temp) = req.temperature.or(self.settings.temperature) {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = self.settings.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }

    async fn call(&self, req: &RunRequest) -> Result<RunResult> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(req);

        tracing::debug!(provider = %self.id, url = %url, "openai_compat chat request");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().await.map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(http_error(&self.id, status, &resp_text));
        }

        let resp_json: Value = serde_json::from_str(&resp_text).map_err(|e| Error::Provider {
            provider: self.id.clone(),
            message: format!("malformed response: {e}"),
        })?;
        parse_chat_response(&self.id, &resp_json)
    }
}

#[async_trait::async_trait]
impl AgentExecutor for OpenAiCompatExecutor {
    async fn run(&self, req: &RunRequest, cancel: &CancellationToken) -> Result<RunResult> {
        with_cancel(cancel, self.call(req)).await
    }

    fn name(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider: &str, body: &Value) -> Result<RunResult> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "no choices in response".into(),
        })?;

    let reply = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let usage = body.get("usage").map(parse_usage).unwrap_or_default();

    Ok(RunResult {
        reply,
        usage,
        model,
    })
}

fn parse_usage(v: &Value) -> Usage {
    Usage {
        input_tokens: v.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
        output_tokens: v
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    }
}
