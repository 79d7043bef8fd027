use sb_domain::config::{AuthMode, BindMode, Config, MemoryBackend};

#[test]
fn default_bind_is_loopback() {
    let config = Config::default();
    assert_eq!(config.gateway.bind, BindMode::Loopback);
    assert_eq!(config.gateway.port, 7420);
}

#[test]
fn default_auth_uses_pairing() {
    let config = Config::default();
    assert_eq!(config.gateway.auth.mode, AuthMode::Token);
    assert!(config.gateway.auth.static_token().is_none());
    assert!(!config.gateway.auth.persist_tokens);
}

#[test]
fn session_bounds_default() {
    let config = Config::default();
    assert_eq!(config.sessions.agent_id, "main");
    assert_eq!(config.sessions.max_messages, 200);
    assert_eq!(config.sessions.history_limit, 16);
    assert_eq!(config.sessions.max_message_chars, 3000);
}

#[test]
fn task_log_retention_defaults() {
    let config = Config::default();
    assert!(config.task_log.enabled);
    assert_eq!(config.task_log.retention_days, 30);
    assert_eq!(config.task_log.max_records, 10_000);
}

#[test]
fn default_cors_allows_only_localhost() {
    let config = Config::default();
    assert!(config
        .gateway
        .cors
        .allowed_origins
        .contains(&"http://localhost:*".to_string()));
    assert!(config
        .gateway
        .cors
        .allowed_origins
        .contains(&"http://127.0.0.1:*".to_string()));
}

#[test]
fn partial_document_fills_defaults() {
    let yaml = r#"
agent:
  model: anthropic/claude-3-5-sonnet-latest
memory:
  backend: none
"#;
    let config = Config::from_yaml_str(yaml).unwrap();
    assert_eq!(config.agent.model, "anthropic/claude-3-5-sonnet-latest");
    assert_eq!(config.memory.backend, MemoryBackend::None);
    assert_eq!(config.gateway.port, 7420);
    assert!(config.channels.is_empty());
}

#[test]
fn session_overrides_parse() {
    let yaml = r#"
sessions:
  overrides:
    - channel: telegram
      peer: "42"
      conversation: family
    - group: ops
      conversation: oncall
"#;
    let config = Config::from_yaml_str(yaml).unwrap();
    assert_eq!(config.sessions.overrides.len(), 2);
    assert_eq!(config.sessions.overrides[0].specificity(), 2);
    assert_eq!(config.sessions.overrides[1].specificity(), 1);
}

#[test]
fn unknown_fields_are_ignored() {
    let yaml = r#"
gateway:
  port: 7000
  futureKnob: true
"#;
    let config = Config::from_yaml_str(yaml).unwrap();
    assert_eq!(config.gateway.port, 7000);
}
