//! Executor router.
//!
//! Resolves the effective `provider/model` for a turn (request override,
//! then the session override the pipeline copies into the request, then
//! `agent.model`) and dispatches to a lazily built, cached executor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use sb_domain::config::{split_model, AgentConfig};
use sb_domain::error::{Error, Result};
use sb_domain::trace::TraceEvent;
use tokio_util::sync::CancellationToken;

use crate::anthropic::AnthropicExecutor;
use crate::catalog::{self, ProviderKind};
use crate::echo::EchoExecutor;
use crate::openai_compat::OpenAiCompatExecutor;
use crate::traits::{AgentExecutor, ExecutorSettings, RunRequest, RunResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ExecutorRouter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ExecutorRouter {
    agent: RwLock<Arc<AgentConfig>>,
    executors: Mutex<HashMap<String, Arc<dyn AgentExecutor>>>,
}

impl ExecutorRouter {
    pub fn new(agent: &AgentConfig) -> Self {
        Self {
            agent: RwLock::new(Arc::new(agent.clone())),
            executors: Mutex::new(HashMap::new()),
        }
    }

    /// Swap in a new `agent` section. Cached executors are dropped so new
    /// credentials and settings apply to the next turn.
    pub fn update(&self, agent: &AgentConfig) {
        *self.agent.write() = Arc::new(agent.clone());
        self.executors.lock().clear();
    }

    pub fn agent(&self) -> Arc<AgentConfig> {
        self.agent.read().clone()
    }

    /// Effective `(provider, model)` for a request.
    pub fn resolve(&self, req: &RunRequest) -> Result<(String, String)> {
        let agent = self.agent();
        let (default_provider, default_model) = split_model(&agent.model).ok_or_else(|| {
            Error::Validation(format!(
                "agent.model '{}' must have the form provider/model",
                agent.model
            ))
        })?;

        let resolved = match (req.provider.as_deref(), req.model.as_deref()) {
            (Some(p), Some(m)) => {
                let bare = m.strip_prefix(p).and_then(|r| r.strip_prefix('/')).unwrap_or(m);
                (p.to_owned(), bare.to_owned())
            }
            (Some(p), None) if p == default_provider => (p.to_owned(), default_model.to_owned()),
            (Some(p), None) => {
                let model = catalog::lookup(p)
                    .and_then(|info| info.models.first().copied())
                    .ok_or_else(|| {
                        Error::Validation(format!("no default model known for provider '{p}'"))
                    })?;
                (p.to_owned(), model.to_owned())
            }
            (None, Some(m)) => match split_model(m) {
                Some((p, rest)) if is_provider(&agent, p) => (p.to_owned(), rest.to_owned()),
                _ => (default_provider.to_owned(), m.to_owned()),
            },
            (None, None) => (default_provider.to_owned(), default_model.to_owned()),
        };
        Ok(resolved)
    }

    /// Executor for `provider`, built on first use.
    pub fn executor_for(&self, provider: &str) -> Result<Arc<dyn AgentExecutor>> {
        if let Some(exec) = self.executors.lock().get(provider) {
            return Ok(exec.clone());
        }
        let exec = build_executor(&self.agent(), provider)?;
        tracing::info!(provider = %provider, "registered executor");
        self.executors
            .lock()
            .insert(provider.to_owned(), exec.clone());
        Ok(exec)
    }
}

#[async_trait::async_trait]
impl AgentExecutor for ExecutorRouter {
    async fn run(&self, req: &RunRequest, cancel: &CancellationToken) -> Result<RunResult> {
        let (provider, model) = self.resolve(req)?;
        let exec = self.executor_for(&provider)?;

        let mut routed = req.clone();
        routed.provider = Some(provider.clone());
        routed.model = Some(model.clone());

        let started = Instant::now();
        let result = exec.run(&routed, cancel).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(res) => TraceEvent::ExecutorCall {
                provider,
                model: res.model.clone(),
                duration_ms: elapsed.as_millis() as u64,
                input_tokens: res.usage.input_tokens,
                output_tokens: res.usage.output_tokens,
            }
            .emit(),
            Err(e) => tracing::warn!(
                provider = %provider,
                model = %model,
                duration_ms = elapsed.as_millis() as u64,
                error = %e,
                "executor call failed"
            ),
        }
        result
    }

    fn name(&self) -> &str {
        "router"
    }
}

// ── Construction helpers ─────────────────────────────────────────────

fn is_provider(agent: &AgentConfig, id: &str) -> bool {
    catalog::lookup(id).is_some() || agent.providers.contains_key(id)
}

/// Environment variable consulted for `provider`'s key.
pub fn env_var_for(provider: &str) -> String {
    catalog::lookup(provider)
        .and_then(|p| p.env_var)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("{}_API_KEY", provider.to_uppercase().replace('-', "_")))
}

/// API key for `provider`: a non-empty environment variable wins over the
/// configured key.
pub fn api_key_for(agent: &AgentConfig, provider: &str) -> Option<String> {
    if let Ok(v) = std::env::var(env_var_for(provider)) {
        if !v.trim().is_empty() {
            return Some(v);
        }
    }
    agent
        .providers
        .get(provider)
        .and_then(|c| c.api_key.clone())
        .filter(|k| !k.trim().is_empty())
}

fn build_executor(agent: &AgentConfig, provider: &str) -> Result<Arc<dyn AgentExecutor>> {
    let settings = ExecutorSettings::from(agent);
    let creds = agent.providers.get(provider);
    let base_override = creds.and_then(|c| c.base_url.as_deref()).filter(|b| !b.is_empty());
    let key = api_key_for(agent, provider);
    let missing_key = || {
        Error::Auth(format!(
            "no API key for provider '{provider}' (set {} or agent.providers.{provider}.apiKey)",
            env_var_for(provider)
        ))
    };

    let (kind, base_url, requires_key, default_model) = match catalog::lookup(provider) {
        Some(info) => (
            info.kind,
            base_override.unwrap_or(info.base_url),
            info.requires_key && base_override.is_none(),
            info.models.first().copied().unwrap_or_default(),
        ),
        None => match base_override {
            Some(base) => (ProviderKind::OpenaiCompat, base, false, ""),
            None => {
                return Err(Error::Validation(format!(
                    "unknown provider '{provider}': add agent.providers.{provider}.baseUrl for an OpenAI-compatible endpoint"
                )))
            }
        },
    };

    let exec: Arc<dyn AgentExecutor> = match kind {
        ProviderKind::Echo => Arc::new(EchoExecutor),
        ProviderKind::Anthropic => {
            let key = key.ok_or_else(missing_key)?;
            Arc::new(AnthropicExecutor::new(base_url, key, default_model, settings)?)
        }
        ProviderKind::OpenaiCompat => {
            if requires_key && key.is_none() {
                return Err(missing_key());
            }
            Arc::new(OpenAiCompatExecutor::new(
                provider,
                base_url,
                key,
                default_model,
                settings,
            )?)
        }
    };
    Ok(exec)
}
