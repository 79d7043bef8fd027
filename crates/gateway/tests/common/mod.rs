//! Shared fixtures for the gateway integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use sb_domain::config::HomeLayout;
use sb_domain::error::{Error, Result};
use sb_gateway::bootstrap::{build_app_state, Overrides};
use sb_gateway::logging::LogBuffer;
use sb_gateway::server::build_app;
use sb_gateway::state::AppState;
use sb_providers::{AgentExecutor, RunRequest, RunResult, Usage};

pub const TOKEN: &str = "test-token";

/// Replies `re: <body>`.
pub struct Scripted;

#[async_trait]
impl AgentExecutor for Scripted {
    async fn run(&self, req: &RunRequest, cancel: &CancellationToken) -> Result<RunResult> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(RunResult {
            reply: format!("re: {}", req.body),
            usage: Usage {
                input_tokens: 3,
                output_tokens: 2,
            },
            model: "scripted-1".into(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub state: AppState,
    pub app: Router,
}

pub async fn harness(config_yaml: &str) -> Harness {
    harness_with(config_yaml, Arc::new(Scripted)).await
}

pub async fn harness_with(config_yaml: &str, executor: Arc<dyn AgentExecutor>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let layout = HomeLayout::new(dir.path());
    let config_path = layout.config_file();
    std::fs::write(&config_path, config_yaml).unwrap();

    let state = build_app_state(
        layout,
        &config_path,
        Arc::new(LogBuffer::with_capacity(64)),
        Overrides {
            executor: Some(executor),
            adapters: None,
        },
    )
    .await
    .unwrap();
    let app = build_app(state.clone());
    Harness {
        dir,
        state,
        app,
    }
}

/// Static-token config; most tests do not care about pairing.
pub async fn token_harness() -> Harness {
    harness(&format!("gateway:\n  auth:\n    token: {TOKEN}\n")).await
}

pub fn request(method: Method, uri: &str, peer: Option<&str>, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        builder = builder.header("authorization", format!("Bearer {t}"));
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let mut req = builder.body(body).unwrap();
    if let Some(p) = peer {
        let addr: SocketAddr = p.parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
    }
    req
}

pub async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

pub const LOCAL: Option<&str> = Some("127.0.0.1:40000");
