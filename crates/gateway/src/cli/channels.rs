//! `switchboard channels ...`

use std::path::Path;

use serde_json::{json, Value};

use sb_domain::config::{Config, KNOWN_CHANNEL_KINDS};
use sb_domain::error::Error;

use crate::cli::client::GatewayClient;
use crate::cli::{print_json, ChannelsCommand};
use crate::runtime::ConfigStore;

pub async fn run(config: &Config, config_path: &Path, cmd: ChannelsCommand) -> anyhow::Result<bool> {
    match cmd {
        ChannelsCommand::Doctor => return Ok(doctor(config)),
        ChannelsCommand::Status { json } => {
            let status = GatewayClient::from_config(config)?.channel_status().await?;
            if json {
                print_json(&status)?;
            } else {
                print_status(&status);
            }
        }
        ChannelsCommand::Login { name, kind, token } => {
            login(config_path, &name, kind.as_deref(), token)?;
        }
        ChannelsCommand::Logout { name } => logout(config_path, &name)?,
        ChannelsCommand::Reload => {
            let report = GatewayClient::from_config(config)?.reload().await?;
            print_reload(&report);
        }
    }
    Ok(true)
}

/// Check every configured channel. Returns `false` when an enabled
/// channel cannot start.
pub fn doctor(config: &Config) -> bool {
    if config.channels.is_empty() {
        println!("No channels configured. Add one with `switchboard channels login telegram`.");
        return true;
    }
    let mut ok = true;
    for (name, ch) in &config.channels {
        let kind = ch.kind_for(name);
        let mut problems = Vec::new();
        if !KNOWN_CHANNEL_KINDS.contains(&kind) {
            problems.push(format!("unknown kind '{kind}'"));
        }
        if ch.enabled && !ch.has_credentials(name) {
            problems.push(match kind {
                "webhook" => "`listen` is not set".to_owned(),
                _ => "no token".to_owned(),
            });
        }
        if ch.allow_users.is_empty() && ch.allow_groups.is_empty() && !ch.require_bind {
            problems.push("allowlist is empty, every peer will be denied".to_owned());
        }

        let state = if !ch.enabled { "disabled" } else if problems.is_empty() { "ok" } else { "problem" };
        println!("{name} ({kind}): {state}");
        for p in &problems {
            println!("    - {p}");
        }
        if ch.enabled && !problems.is_empty() {
            ok = false;
        }
    }
    ok
}

fn print_status(status: &Value) {
    let Some(map) = status.as_object() else {
        println!("{status}");
        return;
    };
    if map.is_empty() {
        println!("No adapters running.");
        return;
    }
    for (name, view) in map {
        let state = view["status"].as_str().unwrap_or("?");
        let kind = view["kind"].as_str().unwrap_or("?");
        let detail = match (view["error"].as_str(), view["bindCode"].as_str()) {
            (Some(e), _) => format!("  ({e})"),
            (None, Some(code)) => format!("  (send {code} to bind)"),
            (None, None) => String::new(),
        };
        println!("{name:<16} {kind:<10} {state}{detail}");
    }
}

fn print_reload(report: &Value) {
    let Some(map) = report["channels"].as_object() else {
        println!("Reloaded.");
        return;
    };
    if map.is_empty() {
        println!("Reloaded; no channels configured.");
        return;
    }
    for (name, entry) in map {
        println!(
            "{name:<16} {:<10} {}",
            entry["action"].as_str().unwrap_or("?"),
            entry["status"].as_str().unwrap_or("?"),
        );
    }
}

fn login(config_path: &Path, name: &str, kind: Option<&str>, token: Option<String>) -> anyhow::Result<()> {
    let token = match token {
        Some(t) => t,
        None => rpassword::prompt_password_stderr(&format!("Token for {name}: "))?,
    };
    let token = token.trim().to_owned();
    if token.is_empty() {
        return Err(Error::Validation("token must not be empty".into()).into());
    }

    let mut entry = json!({ "enabled": true, "token": token });
    if let Some(kind) = kind {
        entry["kind"] = json!(kind);
    }
    let store = ConfigStore::load(config_path)?;
    store.patch(&json!({ "channels": { name: entry } }))?;

    eprintln!("Saved credentials for '{name}' to {}", config_path.display());
    eprintln!("Run `switchboard channels reload` to apply them to a running gateway.");
    Ok(())
}

fn logout(config_path: &Path, name: &str) -> anyhow::Result<()> {
    let store = ConfigStore::load(config_path)?;
    if !store.snapshot().channels.contains_key(name) {
        return Err(Error::NotFound(format!("channel '{name}'")).into());
    }
    store.patch(&json!({
        "channels": { name: { "enabled": false, "token": null, "secret": null } }
    }))?;
    eprintln!("Removed credentials for '{name}' and disabled it.");
    Ok(())
}
