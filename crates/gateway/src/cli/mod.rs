pub mod agent;
pub mod channels;
pub mod client;
pub mod config;
pub mod daemon;
pub mod doctor;
pub mod home;
pub mod logs;
pub mod memory;
pub mod models;
pub mod onboard;
pub mod sessions;
pub mod tasks;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use sb_domain::config::{Config, HomeLayout};

use crate::runtime::config_store::read_config_file;

/// Switchboard: a personal AI assistant gateway.
#[derive(Debug, Parser)]
#[command(name = "switchboard", version, about)]
pub struct Cli {
    /// Home directory (default: $SB_HOME or ~/.switchboard).
    #[arg(long, global = true, value_name = "DIR")]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway process in the foreground.
    Gateway,
    /// Talk to the agent without the gateway.
    #[command(subcommand)]
    Agent(AgentCommand),
    /// Create the home directory and a starter config.
    Onboard {
        /// Prompt for model, API key and channels.
        #[arg(long, conflicts_with = "channels_only")]
        interactive: bool,
        /// Only prompt for channel adapters.
        #[arg(long)]
        channels_only: bool,
    },
    /// Inspect and manage conversation sessions.
    #[command(subcommand)]
    Sessions(SessionsCommand),
    /// Channel adapter utilities.
    #[command(subcommand)]
    Channels(ChannelsCommand),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Model catalog.
    #[command(subcommand)]
    Models(ModelsCommand),
    /// Query the task audit log.
    #[command(subcommand)]
    Tasks(TasksCommand),
    /// Read gateway logs.
    #[command(subcommand)]
    Logs(LogsCommand),
    /// File-backed agent memory.
    #[command(subcommand)]
    Memory(MemoryCommand),
    /// Background service management.
    #[command(subcommand)]
    Daemon(DaemonCommand),
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Show the running gateway's status.
    Status,
    /// Delete sessions and state, keeping config.yaml.
    Reset {
        #[arg(long)]
        yes: bool,
    },
    /// Delete the whole home directory.
    Uninstall {
        #[arg(long)]
        yes: bool,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum AgentCommand {
    /// Send a single message and print the reply.
    Chat {
        message: String,
        /// Session key or conversation label (default: the current session,
        /// else `cli`).
        #[arg(long)]
        session: Option<String>,
        /// Model override, e.g. `openai/gpt-4o`.
        #[arg(long)]
        model: Option<String>,
        /// Print the full outcome as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum SessionsCommand {
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print a session's messages.
    Get {
        key: String,
        #[arg(long)]
        json: bool,
    },
    /// Select the session `agent chat` uses by default.
    Switch { key: String },
    Delete {
        key: String,
        /// Succeed when the session does not exist.
        #[arg(long)]
        missing_ok: bool,
    },
    /// Clear a session's history.
    Reset { key: String },
    /// Route a conversation to a session.
    Bind {
        channel: String,
        /// Peer id, or `grp:<groupId>` for a group.
        conversation: String,
        key: String,
    },
    Unbind {
        channel: String,
        conversation: String,
    },
    Bindings {
        #[arg(long)]
        json: bool,
    },
    /// Print the selected session.
    Current,
}

#[derive(Debug, Subcommand)]
pub enum ChannelsCommand {
    /// Check channel configuration and credentials.
    Doctor,
    /// Live adapter state from the running gateway.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Store credentials for a channel.
    Login {
        name: String,
        /// Transport kind, when it differs from the name.
        #[arg(long)]
        kind: Option<String>,
        /// Read the token from this argument instead of prompting.
        #[arg(long)]
        token: Option<String>,
    },
    /// Remove a channel's credentials and disable it.
    Logout { name: String },
    /// Ask the running gateway to re-read config.yaml.
    Reload,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print one value by dotted path, e.g. `gateway.port`.
    Get { path: String },
    /// Set one value by dotted path; the value is parsed as YAML.
    Set { path: String, value: String },
    /// Dump the resolved configuration (secrets redacted).
    Show,
    /// Parse the config file and report any errors.
    Validate,
}

#[derive(Debug, Subcommand)]
pub enum ModelsCommand {
    List {
        #[arg(long)]
        json: bool,
    },
    /// Set `agent.model`.
    Set { model: String },
    /// Ask each configured provider for its live model list.
    Scan,
}

#[derive(Debug, Args, Default)]
pub struct TaskFilterArgs {
    #[arg(long)]
    pub action: Option<String>,
    #[arg(long)]
    pub module: Option<String>,
    #[arg(long)]
    pub channel: Option<String>,
    #[arg(long)]
    pub status: Option<String>,
    /// RFC 3339 or relative (`24h`, `7d`).
    #[arg(long)]
    pub since: Option<String>,
    #[arg(long)]
    pub until: Option<String>,
    /// created_at | duration_ms | tokens_input | action
    #[arg(long)]
    pub sort: Option<String>,
    /// asc | desc
    #[arg(long)]
    pub order: Option<String>,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum TasksCommand {
    List(TaskFilterArgs),
    Get {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Substring search across request, response and note.
    Search {
        query: String,
        #[command(flatten)]
        filter: TaskFilterArgs,
    },
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Apply retention now.
    Clean {
        /// Defaults to taskLog.retentionDays.
        #[arg(long)]
        days: Option<u32>,
        /// Defaults to taskLog.maxRecords.
        #[arg(long)]
        max_records: Option<u64>,
    },
    Count,
}

#[derive(Debug, Subcommand)]
pub enum LogsCommand {
    /// Last lines of the daily log files.
    Tail {
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
    /// Filter log records on disk.
    Query {
        #[arg(long)]
        level: Option<String>,
        /// Regex over the event target.
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        contains: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum MemoryCommand {
    Search { query: String },
    /// Print a memory file by its relative path.
    Get { path: String },
    List,
    Status,
    /// Drop the index.
    Reset,
    /// Rebuild the index.
    Sync,
}

#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Write a systemd user unit (Linux) or launchd agent (macOS).
    Install,
    Uninstall,
    /// Start the gateway in the background.
    Start,
    Stop,
    Status,
}

// ── Home & config resolution ────────────────────────────────────────

/// `--home`, else `$SB_HOME`, else `~/.switchboard`.
pub fn resolve_home(flag: Option<PathBuf>) -> HomeLayout {
    let root = flag
        .or_else(|| std::env::var_os("SB_HOME").map(PathBuf::from))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".switchboard")
        });
    HomeLayout::new(root)
}

/// `$SB_CONFIG`, else `<home>/config.yaml`.
pub fn config_path(layout: &HomeLayout) -> PathBuf {
    std::env::var_os("SB_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| layout.config_file())
}

/// Read the config file (defaults when absent). Shared by every
/// subcommand so the logic lives in one place.
pub fn load_config(layout: &HomeLayout) -> anyhow::Result<(Config, PathBuf)> {
    let path = config_path(layout);
    let config = read_config_file(&path)?;
    Ok((config, path))
}

/// Print `value` as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
