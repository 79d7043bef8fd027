use std::path::Path;

use sb_domain::config::{split_model, Config, ConfigSeverity, HomeLayout};
use sb_tasklog::TaskLog;

use crate::cli::client::GatewayClient;
use crate::runtime::catalog;

/// Run all diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes, `Ok(false)` when at least
/// one check failed.
pub async fn run(config: &Config, layout: &HomeLayout, config_path: &Path) -> anyhow::Result<bool> {
    println!("switchboard doctor");
    println!("==================\n");

    let mut all_passed = true;

    // 1. Config file
    check_config_file(config_path, &mut all_passed);

    // 2. Config validation
    check_config_validation(config, &mut all_passed);

    // 3. Home directories
    check_directories(config, layout, &mut all_passed);

    // 4. Model provider credentials
    check_provider(config, &mut all_passed);

    // 5. Channel credentials
    check_channels(config, &mut all_passed);

    // 6. Task log
    check_task_log(config, layout, &mut all_passed);

    // 7. Running gateway (informational)
    check_gateway(config).await;

    // Summary
    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

// ── Individual checks ─────────────────────────────────────────────────

fn check_config_file(config_path: &Path, all_passed: &mut bool) {
    let exists = config_path.exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.display().to_string()
        } else {
            format!(
                "{} not found (run `switchboard onboard`)",
                config_path.display()
            )
        },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check(
            "Config validation",
            error_count == 0,
            format!("{} issue(s) ({} error(s))", issues.len(), error_count),
        );
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

fn check_directories(config: &Config, layout: &HomeLayout, all_passed: &mut bool) {
    let missing: Vec<String> = layout
        .required_dirs(config)
        .into_iter()
        .filter(|d| !d.is_dir())
        .map(|d| d.display().to_string())
        .collect();

    let writable = {
        let probe = layout.root().join(".switchboard_doctor_probe");
        let w = std::fs::write(&probe, b"probe").is_ok();
        let _ = std::fs::remove_file(&probe);
        w
    };

    let ok = missing.is_empty() && writable;
    let detail = if !missing.is_empty() {
        format!("missing: {}", missing.join(", "))
    } else if !writable {
        format!("{} (not writable)", layout.root().display())
    } else {
        format!("{} (writable)", layout.root().display())
    };
    print_check("Home directories", ok, detail);

    if !ok {
        *all_passed = false;
    }
}

fn check_provider(config: &Config, all_passed: &mut bool) {
    let model = &config.agent.model;
    let Some((provider, _)) = split_model(model) else {
        print_check("Model provider", false, format!("'{model}' is not provider/model"));
        *all_passed = false;
        return;
    };

    let view = catalog::providers(config)
        .into_iter()
        .find(|p| p.id == provider);
    let (ok, detail) = match view {
        Some(v) if v.has_credentials => (true, format!("{model} ({} credentials found)", v.id)),
        Some(v) => (false, format!("{model} (set {} or agent.providers.{}.apiKey)", v.env_var, v.id)),
        None => (false, format!("unknown provider '{provider}'")),
    };
    print_check("Model provider", ok, detail);

    if !ok {
        *all_passed = false;
    }
}

fn check_channels(config: &Config, all_passed: &mut bool) {
    if config.channels.is_empty() {
        print_check("Channels", true, "none configured".into());
        return;
    }
    for (name, ch) in &config.channels {
        let label = format!("Channel {name}");
        if !ch.enabled {
            print_check(&label, true, "disabled".into());
            continue;
        }
        let ok = ch.has_credentials(name);
        let detail = match (ok, ch.kind_for(name)) {
            (true, kind) => format!("{kind}, credentials present"),
            (false, "webhook") => "webhook, `listen` not set".into(),
            (false, kind) => format!("{kind}, no token (run `switchboard channels login {name}`)"),
        };
        print_check(&label, ok, detail);
        if !ok {
            *all_passed = false;
        }
    }
}

fn check_task_log(config: &Config, layout: &HomeLayout, all_passed: &mut bool) {
    if !config.task_log.enabled {
        print_check("Task log", true, "disabled".into());
        return;
    }
    let dir = layout.task_log_dir(config);
    match TaskLog::open(&dir).and_then(|log| {
        let count = log.count()?;
        log.close();
        Ok(count)
    }) {
        Ok(count) => print_check("Task log", true, format!("{} ({count} records)", dir.display())),
        Err(e) => {
            print_check("Task log", false, format!("{}: {e}", dir.display()));
            *all_passed = false;
        }
    }
}

async fn check_gateway(config: &Config) {
    let Ok(client) = GatewayClient::from_config(config) else {
        return;
    };
    match client.status().await {
        Ok(status) => {
            let uptime = status["uptimeSecs"].as_u64().unwrap_or(0);
            println!("  [INFO] Gateway: running at {} (up {uptime}s)", client.base_url());
        }
        Err(_) => println!("  [INFO] Gateway: not running at {}", client.base_url()),
    }
}

// ── Formatting helper ─────────────────────────────────────────────────

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
