//! Talks to a running gateway over its loopback-only `/api/internal/*`
//! endpoints. No token is needed: the gateway trusts local peers there.

use std::time::Duration;

use sb_domain::config::Config;
use sb_domain::error::Error;
use serde_json::Value;

pub struct GatewayClient {
    base: String,
    http: reqwest::Client,
}

impl GatewayClient {
    pub fn new(port: u16) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base: format!("http://127.0.0.1:{port}"),
            http,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::new(config.gateway.port)
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub async fn status(&self) -> anyhow::Result<Value> {
        self.send(self.http.get(self.url("/api/internal/status"))).await
    }

    pub async fn channel_status(&self) -> anyhow::Result<Value> {
        self.send(self.http.get(self.url("/api/internal/channel-status")))
            .await
    }

    pub async fn reload(&self) -> anyhow::Result<Value> {
        self.send(self.http.post(self.url("/api/internal/reload")))
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> anyhow::Result<Value> {
        let resp = req.send().await.map_err(|e| {
            if e.is_connect() {
                Error::Transient(format!(
                    "gateway is not running at {} (start it with `switchboard gateway`)",
                    self.base
                ))
            } else {
                Error::Transient(e.to_string())
            }
        })?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let msg = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_owned();
            let err = match status.as_u16() {
                400 => Error::Validation(msg),
                401 | 403 => Error::Auth(msg),
                404 => Error::NotFound(msg),
                429 => Error::RateLimited,
                _ => Error::Other(format!("gateway returned {status}: {msg}")),
            };
            return Err(err.into());
        }
        Ok(body)
    }
}
