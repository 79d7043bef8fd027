//! Read-only catalog surfaces: models, providers and skills.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sb_domain::config::{split_model, AgentConfig, Config, HomeLayout};
use sb_domain::error::{Error, Result};
use sb_providers::catalog::{self, ProviderKind, KNOWN_PROVIDERS};
use sb_providers::router::{api_key_for, env_var_for};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    /// `provider/model`.
    pub id: String,
    pub provider: String,
    pub is_default: bool,
    /// Credentials for the provider are available.
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderView {
    pub id: String,
    pub kind: Option<ProviderKind>,
    pub base_url: Option<String>,
    pub env_var: String,
    pub requires_key: bool,
    pub has_credentials: bool,
    /// Listed under `agent.providers`.
    pub configured: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillEntry {
    pub name: String,
    pub bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

fn has_credentials(agent: &AgentConfig, provider: &str) -> bool {
    let keyless = catalog::lookup(provider).is_some_and(|p| !p.requires_key);
    keyless
        || api_key_for(agent, provider).is_some()
        || agent
            .providers
            .get(provider)
            .and_then(|c| c.base_url.as_deref())
            .is_some_and(|b| !b.is_empty())
}

/// Catalog models plus the configured default when it is not listed.
pub fn models(config: &Config) -> Vec<ModelEntry> {
    let agent = &config.agent;
    let mut ids = catalog::all_models();
    if !ids.contains(&agent.model) {
        ids.insert(0, agent.model.clone());
    }
    ids.into_iter()
        .map(|id| {
            let provider = split_model(&id).map(|(p, _)| p.to_owned()).unwrap_or_default();
            ModelEntry {
                is_default: id == agent.model,
                available: has_credentials(agent, &provider),
                provider,
                id,
            }
        })
        .collect()
}

/// Built-in providers followed by any extra ones configured by name.
pub fn providers(config: &Config) -> Vec<ProviderView> {
    let agent = &config.agent;
    let mut out: Vec<ProviderView> = KNOWN_PROVIDERS
        .iter()
        .map(|p| ProviderView {
            id: p.id.to_owned(),
            kind: Some(p.kind),
            base_url: agent
                .providers
                .get(p.id)
                .and_then(|c| c.base_url.clone())
                .or_else(|| (!p.base_url.is_empty()).then(|| p.base_url.to_owned())),
            env_var: env_var_for(p.id),
            requires_key: p.requires_key,
            has_credentials: has_credentials(agent, p.id),
            configured: agent.providers.contains_key(p.id),
        })
        .collect();

    for (id, creds) in &agent.providers {
        if catalog::lookup(id).is_none() {
            out.push(ProviderView {
                id: id.clone(),
                kind: None,
                base_url: creds.base_url.clone(),
                env_var: env_var_for(id),
                requires_key: true,
                has_credentials: has_credentials(agent, id),
                configured: true,
            });
        }
    }
    out
}

/// Hook files under `hooks/`, exposed as the skill list.
pub fn skills(layout: &HomeLayout) -> Vec<SkillEntry> {
    let dir = layout.hooks_dir();
    let mut out: Vec<SkillEntry> = std::fs::read_dir(&dir)
        .map(|rd| {
            rd.flatten()
                .filter_map(|e| {
                    let meta = e.metadata().ok()?;
                    if !meta.is_file() {
                        return None;
                    }
                    Some(SkillEntry {
                        name: e.file_name().to_string_lossy().into_owned(),
                        bytes: meta.len(),
                        modified: meta.modified().ok().map(DateTime::<Utc>::from),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

// ── Remote scan ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub provider: String,
    pub models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(serde::Deserialize)]
struct ModelListing {
    #[serde(default)]
    data: Vec<ModelId>,
}

#[derive(serde::Deserialize)]
struct ModelId {
    id: String,
}

/// Ask every provider with credentials for its model list
/// (`GET {base}/models`).
pub async fn scan(config: &Config) -> Vec<ScanResult> {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            return vec![ScanResult {
                provider: "*".into(),
                models: Vec::new(),
                error: Some(e.to_string()),
            }]
        }
    };

    let mut out = Vec::new();
    for view in providers(config) {
        if !view.has_credentials || view.kind == Some(ProviderKind::Echo) {
            continue;
        }
        let Some(base) = view.base_url.clone() else { continue };
        let result = list_remote(&client, &config.agent, &view, &base).await;
        out.push(match result {
            Ok(models) => ScanResult {
                provider: view.id,
                models,
                error: None,
            },
            Err(e) => ScanResult {
                provider: view.id,
                models: Vec::new(),
                error: Some(e.to_string()),
            },
        });
    }
    out
}

async fn list_remote(
    client: &reqwest::Client,
    agent: &AgentConfig,
    view: &ProviderView,
    base: &str,
) -> Result<Vec<String>> {
    let base = base.trim_end_matches('/');
    let key = api_key_for(agent, &view.id);
    let req = match view.kind {
        Some(ProviderKind::Anthropic) => {
            let mut r = client
                .get(format!("{base}/v1/models"))
                .header("anthropic-version", "2023-06-01");
            if let Some(k) = &key {
                r = r.header("x-api-key", k);
            }
            r
        }
        _ => {
            let mut r = client.get(format!("{base}/models"));
            if let Some(k) = &key {
                r = r.bearer_auth(k);
            }
            r
        }
    };
    let resp = req
        .send()
        .await
        .map_err(|e| Error::Transient(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Provider {
            provider: view.id.clone(),
            message: format!("HTTP {status}"),
        });
    }
    let listing: ModelListing = resp.json().await.map_err(|e| Error::Provider {
        provider: view.id.clone(),
        message: e.to_string(),
    })?;
    let mut ids: Vec<String> = listing.data.into_iter().map(|m| m.id).collect();
    ids.sort();
    Ok(ids)
}

/// `hooks/` exists and is readable.
pub fn hooks_dir_ok(layout: &HomeLayout) -> bool {
    layout.hooks_dir().is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_domain::config::ProviderCredentials;

    #[test]
    fn default_model_is_flagged_and_listed_once() {
        let mut cfg = Config::default();
        cfg.agent.model = "echo/echo".into();
        let list = models(&cfg);
        let defaults: Vec<_> = list.iter().filter(|m| m.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert!(defaults[0].available);
        assert_eq!(list.iter().filter(|m| m.id == "echo/echo").count(), 1);
    }

    #[test]
    fn custom_default_model_is_prepended() {
        let mut cfg = Config::default();
        cfg.agent.model = "ollama/mistral-nemo".into();
        let list = models(&cfg);
        assert_eq!(list[0].id, "ollama/mistral-nemo");
        assert_eq!(list[0].provider, "ollama");
    }

    #[test]
    fn configured_extra_provider_is_listed() {
        let mut cfg = Config::default();
        cfg.agent.providers.insert(
            "lmstudio".into(),
            ProviderCredentials {
                api_key: None,
                base_url: Some("http://127.0.0.1:1234/v1".into()),
            },
        );
        let list = providers(&cfg);
        let extra = list.iter().find(|p| p.id == "lmstudio").unwrap();
        assert!(extra.configured);
        assert!(extra.has_credentials);
        assert!(extra.kind.is_none());
        assert!(list.iter().any(|p| p.id == "echo" && p.has_credentials));
    }

    #[test]
    fn skills_come_from_hooks_dir() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        assert!(skills(&layout).is_empty());
        std::fs::create_dir_all(layout.hooks_dir()).unwrap();
        std::fs::write(layout.hooks_dir().join("b.sh"), "#!/bin/sh\n").unwrap();
        std::fs::write(layout.hooks_dir().join("a.md"), "notes").unwrap();
        let names: Vec<String> = skills(&layout).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a.md", "b.sh"]);
        assert!(hooks_dir_ok(&layout));
    }
}
