//! Whole-install commands: `status`, `reset`, `uninstall`, `version`.

use std::path::Path;

use sb_domain::config::{Config, HomeLayout};
use sb_domain::error::Error;

use crate::cli::client::GatewayClient;
use crate::cli::print_json;

pub async fn status(config: &Config) -> anyhow::Result<()> {
    let report = GatewayClient::from_config(config)?.status().await?;
    print_json(&report)
}

pub fn version() {
    println!("switchboard {}", env!("CARGO_PKG_VERSION"));
}

async fn ensure_stopped(config: &Config) -> anyhow::Result<()> {
    let client = GatewayClient::from_config(config)?;
    if client.status().await.is_ok() {
        return Err(Error::Validation(format!(
            "the gateway is running at {}; stop it first",
            client.base_url()
        ))
        .into());
    }
    Ok(())
}

fn require_yes(yes: bool, what: &str) -> Result<(), Error> {
    if yes {
        Ok(())
    } else {
        Err(Error::Validation(format!("this deletes {what}; re-run with --yes to confirm")))
    }
}

fn remove_dir(path: &Path) -> anyhow::Result<bool> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(anyhow::Error::new(e).context(format!("removing {}", path.display()))),
    }
}

/// Delete sessions, tokens, pairing code and the task log. `config.yaml`,
/// hooks and the workspace are kept.
pub async fn reset(config: &Config, layout: &HomeLayout, yes: bool) -> anyhow::Result<()> {
    require_yes(yes, "all sessions, tokens and the task log")?;
    ensure_stopped(config).await?;

    for dir in [
        layout.sessions_dir(),
        layout.state_dir(),
        layout.task_log_dir(config),
    ] {
        if remove_dir(&dir)? {
            eprintln!("Removed {}", dir.display());
        }
        std::fs::create_dir_all(&dir)?;
    }
    eprintln!("Reset complete. config.yaml was kept.");
    Ok(())
}

/// Delete the whole home directory.
pub async fn uninstall(config: &Config, layout: &HomeLayout, yes: bool) -> anyhow::Result<()> {
    require_yes(yes, &format!("everything under {}", layout.root().display()))?;
    ensure_stopped(config).await?;

    if remove_dir(layout.root())? {
        eprintln!("Removed {}", layout.root().display());
    } else {
        eprintln!("Nothing to remove at {}", layout.root().display());
    }
    eprintln!("If you ran `switchboard daemon install`, run `switchboard daemon uninstall` too.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_unused_port() -> Config {
        let mut cfg = Config::default();
        // Nothing listens here, so the running-gateway check passes.
        cfg.gateway.port = 1;
        cfg
    }

    #[tokio::test]
    async fn reset_without_yes_is_a_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        let err = reset(&Config::default(), &layout, false).await.unwrap_err();
        assert_eq!(err.downcast::<Error>().unwrap().exit_code(), 1);
    }

    #[tokio::test]
    async fn reset_keeps_config() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        let cfg = config_with_unused_port();
        std::fs::create_dir_all(layout.sessions_dir()).unwrap();
        std::fs::write(layout.sessions_dir().join("x.json"), "{}").unwrap();
        std::fs::write(layout.config_file(), "gateway:\n  port: 1\n").unwrap();

        reset(&cfg, &layout, true).await.unwrap();
        assert!(layout.config_file().exists());
        assert!(layout.sessions_dir().is_dir());
        assert!(!layout.sessions_dir().join("x.json").exists());
    }

    #[tokio::test]
    async fn uninstall_removes_home() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("home");
        std::fs::create_dir_all(root.join("state")).unwrap();
        let layout = HomeLayout::new(&root);

        let err = uninstall(&config_with_unused_port(), &layout, false)
            .await
            .unwrap_err();
        assert_eq!(err.downcast::<Error>().unwrap().exit_code(), 1);
        assert!(root.exists());

        uninstall(&config_with_unused_port(), &layout, true).await.unwrap();
        assert!(!root.exists());
    }
}
