//! `switchboard daemon ...`: run the gateway in the background.
//!
//! `install` writes a per-user service definition (systemd on Linux,
//! launchd on macOS). `start`/`stop` manage a detached child directly and
//! track it in `state/daemon.json`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sb_domain::config::{Config, HomeLayout};
use sb_domain::error::Error;

use crate::cli::client::GatewayClient;
use crate::cli::DaemonCommand;
use crate::runtime::config_store::write_private;

const SERVICE_NAME: &str = "switchboard";
const LAUNCHD_LABEL: &str = "dev.switchboard.gateway";
const STOP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonRecord {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

pub async fn run(config: &Config, layout: &HomeLayout, cmd: DaemonCommand) -> anyhow::Result<()> {
    match cmd {
        DaemonCommand::Install => install(layout),
        DaemonCommand::Uninstall => uninstall(),
        DaemonCommand::Start => start(config, layout),
        DaemonCommand::Stop => stop(layout).await,
        DaemonCommand::Status => status(config, layout).await,
    }
}

// ── Service definitions ──────────────────────────────────────────────

fn exe_path() -> String {
    std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "/usr/local/bin/switchboard".to_string())
}

fn service_file() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| Error::Other("cannot determine home directory".into()))?;
    Ok(if cfg!(target_os = "macos") {
        home.join("Library/LaunchAgents")
            .join(format!("{LAUNCHD_LABEL}.plist"))
    } else {
        home.join(".config/systemd/user")
            .join(format!("{SERVICE_NAME}.service"))
    })
}

pub fn systemd_unit(exe_path: &str, home: &Path) -> String {
    let home = home.display();
    format!(
        "\
[Unit]
Description=Switchboard AI assistant gateway
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
ExecStart={exe_path} gateway
Environment=SB_HOME={home}
Restart=on-failure
RestartSec=5

# Logging
StandardOutput=journal
StandardError=journal
SyslogIdentifier={SERVICE_NAME}

# Security hardening
NoNewPrivileges=true
PrivateTmp=true

[Install]
WantedBy=default.target
"
    )
}

pub fn launchd_plist(exe_path: &str, home: &Path) -> String {
    let home = home.display();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{LAUNCHD_LABEL}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{exe_path}</string>
        <string>gateway</string>
    </array>
    <key>EnvironmentVariables</key>
    <dict>
        <key>SB_HOME</key>
        <string>{home}</string>
    </dict>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
    <key>StandardErrorPath</key>
    <string>{home}/logs/daemon.err</string>
</dict>
</plist>
"#
    )
}

fn install(layout: &HomeLayout) -> anyhow::Result<()> {
    let path = service_file()?;
    let exe = exe_path();
    let body = if cfg!(target_os = "macos") {
        launchd_plist(&exe, layout.root())
    } else {
        systemd_unit(&exe, layout.root())
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, body)?;

    eprintln!("Wrote {}", path.display());
    if cfg!(target_os = "macos") {
        eprintln!("Load it with: launchctl load -w {}", path.display());
    } else {
        eprintln!("Enable it with: systemctl --user daemon-reload && systemctl --user enable --now {SERVICE_NAME}");
    }
    Ok(())
}

fn uninstall() -> anyhow::Result<()> {
    let path = service_file()?;
    match std::fs::remove_file(&path) {
        Ok(()) => {
            eprintln!("Removed {}", path.display());
            if !cfg!(target_os = "macos") {
                eprintln!("Run `systemctl --user daemon-reload` to forget it.");
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            eprintln!("No service file at {}", path.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

// ── Detached process ─────────────────────────────────────────────────

pub fn read_record(layout: &HomeLayout) -> anyhow::Result<Option<DaemonRecord>> {
    let path = layout.daemon_file();
    match std::fs::read_to_string(&path) {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn is_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

fn start(config: &Config, layout: &HomeLayout) -> anyhow::Result<()> {
    if let Some(rec) = read_record(layout)? {
        if is_alive(rec.pid) {
            return Err(Error::Validation(format!(
                "gateway already running (pid {})",
                rec.pid
            ))
            .into());
        }
    }

    let logs = layout.logs_dir(config);
    std::fs::create_dir_all(&logs)?;
    let out = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs.join("daemon.err"))?;

    let mut cmd = Command::new(std::env::current_exe()?);
    cmd.arg("--home")
        .arg(layout.root())
        .arg("gateway")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(out);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let child = cmd.spawn()?;

    let rec = DaemonRecord {
        pid: child.id(),
        started_at: Utc::now(),
    };
    write_private(&layout.daemon_file(), &serde_json::to_vec_pretty(&rec)?)?;
    eprintln!(
        "Gateway started (pid {}) on port {}. Logs: {}",
        rec.pid,
        config.gateway.port,
        logs.display()
    );
    Ok(())
}

async fn stop(layout: &HomeLayout) -> anyhow::Result<()> {
    let Some(rec) = read_record(layout)? else {
        return Err(Error::NotFound("no daemon record; the gateway was not started with `daemon start`".into()).into());
    };
    if is_alive(rec.pid) {
        let status = Command::new("kill")
            .args(["-TERM", &rec.pid.to_string()])
            .status()?;
        if !status.success() {
            return Err(Error::Other(format!("failed to signal pid {}", rec.pid)).into());
        }
        let deadline = tokio::time::Instant::now() + STOP_TIMEOUT;
        while is_alive(rec.pid) {
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "pid {} still running after {}s",
                    rec.pid,
                    STOP_TIMEOUT.as_secs()
                ))
                .into());
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        eprintln!("Gateway stopped (pid {}).", rec.pid);
    } else {
        eprintln!("Gateway (pid {}) was not running.", rec.pid);
    }
    std::fs::remove_file(layout.daemon_file())?;
    Ok(())
}

async fn status(config: &Config, layout: &HomeLayout) -> anyhow::Result<()> {
    match read_record(layout)? {
        Some(rec) if is_alive(rec.pid) => {
            println!("pid:      {} (started {})", rec.pid, rec.started_at.to_rfc3339());
        }
        Some(rec) => println!("pid:      {} (not running; stale record)", rec.pid),
        None => println!("pid:      none"),
    }
    let client = GatewayClient::from_config(config)?;
    match client.status().await {
        Ok(s) => println!(
            "gateway:  up {}s at {}",
            s["uptimeSecs"].as_u64().unwrap_or(0),
            client.base_url()
        ),
        Err(_) => println!("gateway:  not reachable at {}", client.base_url()),
    }
    Ok(())
}
