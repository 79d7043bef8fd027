use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use sb_domain::config::{Config, HomeLayout};
use sb_gateway::bootstrap::{self, Overrides};
use sb_gateway::cli::{self, AgentCommand, Cli, Command, ConfigCommand};
use sb_gateway::logging::{files, LogBuffer, LogBufferLayer};
use sb_gateway::server;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// `1` for client errors (bad input, auth, not found), `2` for everything
/// else.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|e| e.downcast_ref::<sb_domain::error::Error>())
        .map_or(2, |e| e.exit_code() as u8)
}

fn passed(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let layout = cli::resolve_home(cli.home);

    if !matches!(cli.command, Command::Gateway) {
        init_cli_tracing();
    }
    let (config, config_path) = cli::load_config(&layout)?;

    match cli.command {
        Command::Gateway => run_gateway(layout, &config, &config_path).await?,
        Command::Agent(AgentCommand::Chat {
            message,
            session,
            model,
            json,
        }) => {
            cli::agent::chat(layout, &config_path, message, session, model, json).await?;
        }
        Command::Onboard {
            interactive,
            channels_only,
        } => {
            let mode = if interactive {
                cli::onboard::Mode::Interactive
            } else if channels_only {
                cli::onboard::Mode::ChannelsOnly
            } else {
                cli::onboard::Mode::Defaults
            };
            cli::onboard::onboard(&layout, &config_path, mode)?;
        }
        Command::Sessions(cmd) => cli::sessions::run(&config, &layout, cmd)?,
        Command::Channels(cmd) => {
            return Ok(passed(cli::channels::run(&config, &config_path, cmd).await?));
        }
        Command::Config(ConfigCommand::Validate) => {
            return Ok(passed(cli::config::validate(&config, &config_path)));
        }
        Command::Config(ConfigCommand::Show) => cli::config::show(&config)?,
        Command::Config(ConfigCommand::Get { path }) => cli::config::get(&config, &path)?,
        Command::Config(ConfigCommand::Set { path, value }) => {
            cli::config::set(&config_path, &path, &value)?;
        }
        Command::Models(cmd) => cli::models::run(&config, &config_path, cmd).await?,
        Command::Tasks(cmd) => cli::tasks::run(&config, &layout, cmd)?,
        Command::Logs(cmd) => cli::logs::run(&config, &layout, cmd)?,
        Command::Memory(cmd) => cli::memory::run(&config, &layout, cmd)?,
        Command::Daemon(cmd) => cli::daemon::run(&config, &layout, cmd).await?,
        Command::Doctor => {
            return Ok(passed(cli::doctor::run(&config, &layout, &config_path).await?));
        }
        Command::Status => cli::home::status(&config).await?,
        Command::Reset { yes } => cli::home::reset(&config, &layout, yes).await?,
        Command::Uninstall { yes } => cli::home::uninstall(&config, &layout, yes).await?,
        Command::Version => cli::home::version(),
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_gateway(layout: HomeLayout, config: &Config, config_path: &Path) -> anyhow::Result<()> {
    let logs = Arc::new(LogBuffer::with_capacity(config.logging.buffer_capacity));
    let _guard = init_tracing(config, &layout, logs.clone())?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        home = %layout.root().display(),
        "Switchboard starting"
    );
    let state = bootstrap::build_app_state(layout, config_path, logs, Overrides::default()).await?;
    server::run(state).await
}

/// Structured JSON tracing for the gateway: stderr, the daily log files
/// and the in-memory ring behind `/api/logs`.
///
/// The filter comes from `RUST_LOG`, else `logging.level`, else
/// `info,sb_gateway=debug`. The returned guard flushes the file writer on
/// drop and must live until shutdown.
fn init_tracing(config: &Config, layout: &HomeLayout, logs: Arc<LogBuffer>) -> anyhow::Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = config
            .logging
            .level
            .as_deref()
            .unwrap_or("info,sb_gateway=debug");
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    let appender = files::daily_appender(&layout.logs_dir(config), config.logging.max_files)?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .with(LogBufferLayer::new(logs))
        .init();

    Ok(guard)
}

/// Initialize compact stderr-only tracing for CLI one-shot commands.
///
/// Defaults to `warn` level so diagnostic output does not pollute stdout.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
