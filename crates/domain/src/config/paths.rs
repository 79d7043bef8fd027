use std::path::{Path, PathBuf};

use super::Config;

/// On-disk layout of a Switchboard home directory.
///
/// ```text
/// config.yaml
/// sessions/<sha>.json
/// state/tasks.db, tokens.json, daemon.json, memory_index.json
/// logs/YYYY-MM-DD.log
/// hooks/<name>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeLayout {
    root: PathBuf,
}

impl HomeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.root.join("hooks")
    }

    pub fn pairing_code_file(&self) -> PathBuf {
        self.root.join("pairing_code")
    }

    pub fn tokens_file(&self) -> PathBuf {
        self.state_dir().join("tokens.json")
    }

    pub fn daemon_file(&self) -> PathBuf {
        self.state_dir().join("daemon.json")
    }

    pub fn memory_index_file(&self) -> PathBuf {
        self.state_dir().join("memory_index.json")
    }

    /// Directory holding `tasks.db`, honouring `taskLog.dir`.
    pub fn task_log_dir(&self, config: &Config) -> PathBuf {
        config
            .task_log
            .dir
            .clone()
            .unwrap_or_else(|| self.state_dir())
    }

    pub fn logs_dir(&self, config: &Config) -> PathBuf {
        config
            .logging
            .dir
            .clone()
            .unwrap_or_else(|| self.root.join("logs"))
    }

    pub fn workspace_dir(&self, config: &Config) -> PathBuf {
        config
            .agent
            .workspace
            .clone()
            .unwrap_or_else(|| self.root.join("workspace"))
    }

    pub fn memory_dir(&self, config: &Config) -> PathBuf {
        config
            .memory
            .dir
            .clone()
            .unwrap_or_else(|| self.workspace_dir(config).join("memory"))
    }

    /// Every directory the gateway expects to exist.
    pub fn required_dirs(&self, config: &Config) -> Vec<PathBuf> {
        vec![
            self.root.clone(),
            self.sessions_dir(),
            self.state_dir(),
            self.hooks_dir(),
            self.task_log_dir(config),
            self.logs_dir(config),
            self.workspace_dir(config),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_live_under_root() {
        let layout = HomeLayout::new("/home/u/.switchboard");
        let cfg = Config::default();
        assert_eq!(
            layout.task_log_dir(&cfg),
            PathBuf::from("/home/u/.switchboard/state")
        );
        assert_eq!(
            layout.memory_dir(&cfg),
            PathBuf::from("/home/u/.switchboard/workspace/memory")
        );
    }

    #[test]
    fn configured_dirs_win() {
        let layout = HomeLayout::new("/srv/sb");
        let mut cfg = Config::default();
        cfg.task_log.dir = Some("/var/lib/sb".into());
        assert_eq!(layout.task_log_dir(&cfg), PathBuf::from("/var/lib/sb"));
    }
}
