//! `switchboard onboard`: create the home directory and a starter config.

use std::path::Path;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use sb_domain::config::{ChannelConfig, Config, HomeLayout, ProviderCredentials};
use sb_providers::catalog::{self, KNOWN_PROVIDERS};

use crate::runtime::config_store::{read_config_file, write_config_file};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Defaults,
    Interactive,
    ChannelsOnly,
}

/// Answers collected from the prompts.
#[derive(Debug, Default)]
struct Answers {
    provider: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    port: Option<u16>,
    telegram: Option<TelegramAnswers>,
}

#[derive(Debug)]
struct TelegramAnswers {
    token: String,
    allow_users: Vec<String>,
    require_bind: bool,
}

// ── Public entry point ───────────────────────────────────────────────

pub fn onboard(layout: &HomeLayout, config_path: &Path, mode: Mode) -> anyhow::Result<()> {
    let existed = config_path.exists();
    let mut config = read_config_file(config_path)?;

    let answers = match mode {
        Mode::Defaults => Answers::default(),
        Mode::Interactive => {
            let mut p = Prompter::new()?;
            let mut a = p.model_answers(&config)?;
            a.telegram = p.telegram_answers()?;
            a
        }
        Mode::ChannelsOnly => Answers {
            telegram: Prompter::new()?.telegram_answers()?,
            ..Default::default()
        },
    };
    apply(&mut config, answers);
    config.ensure_valid()?;

    // ── Write files ──────────────────────────────────────────────────
    for dir in layout.required_dirs(&config) {
        std::fs::create_dir_all(&dir)?;
    }
    if !existed || mode != Mode::Defaults {
        write_config_file(config_path, &config)?;
    }

    // ── Success message ──────────────────────────────────────────────
    eprintln!();
    eprintln!("  Switchboard home ready at {}", layout.root().display());
    eprintln!();
    if existed && mode == Mode::Defaults {
        eprintln!("    config.yaml   - kept existing file");
    } else {
        eprintln!("    config.yaml   - gateway configuration");
    }
    eprintln!("    sessions/     - conversation history");
    eprintln!("    state/        - tokens, pairing code, task log");
    eprintln!("    hooks/        - skill files");
    eprintln!();
    eprintln!("  Next steps:");
    eprintln!("    1. Run `switchboard doctor` to verify the setup");
    eprintln!("    2. Run `switchboard gateway` to start the gateway");
    eprintln!();
    Ok(())
}

fn apply(config: &mut Config, answers: Answers) {
    if let Some(model) = answers.model {
        config.agent.model = model;
    }
    if let (Some(provider), Some(key)) = (&answers.provider, answers.api_key) {
        config
            .agent
            .providers
            .entry(provider.clone())
            .or_insert_with(ProviderCredentials::default)
            .api_key = Some(key);
    }
    if let Some(port) = answers.port {
        config.gateway.port = port;
    }
    if let Some(tg) = answers.telegram {
        let entry = config.channels.entry("telegram".into()).or_default();
        *entry = ChannelConfig {
            enabled: true,
            token: Some(tg.token),
            allow_users: tg.allow_users,
            require_bind: tg.require_bind,
            ..entry.clone()
        };
    }
}

// ── Prompts ──────────────────────────────────────────────────────────

struct Prompter {
    rl: DefaultEditor,
}

impl Prompter {
    fn new() -> anyhow::Result<Self> {
        Ok(Self {
            rl: DefaultEditor::new()?,
        })
    }

    /// Read one line; an empty answer yields `default`.
    fn ask(&mut self, question: &str, default: &str) -> anyhow::Result<String> {
        let prompt = if default.is_empty() {
            format!("  {question}: ")
        } else {
            format!("  {question} [{default}]: ")
        };
        match self.rl.readline(&prompt) {
            Ok(line) if line.trim().is_empty() => Ok(default.to_owned()),
            Ok(line) => Ok(line.trim().to_owned()),
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                anyhow::bail!("onboarding aborted")
            }
            Err(e) => Err(e.into()),
        }
    }

    fn confirm(&mut self, question: &str, default: bool) -> anyhow::Result<bool> {
        let answer = self.ask(question, if default { "Y/n" } else { "y/N" })?;
        Ok(match answer.to_ascii_lowercase().as_str() {
            "y" | "yes" => true,
            "n" | "no" => false,
            _ => default,
        })
    }

    fn model_answers(&mut self, config: &Config) -> anyhow::Result<Answers> {
        eprintln!();
        eprintln!("  Welcome to Switchboard!");
        eprintln!("  Let's set up your assistant.\n");

        let ids: Vec<&str> = KNOWN_PROVIDERS.iter().map(|p| p.id).collect();
        let menu: Vec<String> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| format!("[{}] {id}", i + 1))
            .collect();
        eprintln!("  Providers: {}", menu.join("  "));
        let choice = self.ask("Which provider?", "1")?;
        let provider = provider_choice(&choice).unwrap_or_else(|| {
            eprintln!("  Invalid choice, defaulting to openai.");
            "openai"
        });
        let info = catalog::lookup(provider);

        let default_model = info
            .and_then(|p| p.models.first())
            .map(|m| format!("{provider}/{m}"))
            .unwrap_or_else(|| config.agent.model.clone());
        let model = self.ask("Default model", &default_model)?;

        let api_key = match info.filter(|p| p.requires_key) {
            Some(p) => {
                let env = p.env_var.unwrap_or("the provider env var");
                eprintln!("  Leave the key empty to use ${env} at runtime.");
                let key = rpassword::prompt_password_stderr("  API key: ")?;
                Some(key.trim().to_owned()).filter(|k| !k.is_empty())
            }
            None => None,
        };

        let port = self.ask("Gateway port", &config.gateway.port.to_string())?;
        let port = port.parse::<u16>().ok().filter(|p| *p != 0);
        if port.is_none() {
            eprintln!("  Invalid port, keeping {}.", config.gateway.port);
        }

        Ok(Answers {
            provider: Some(provider.to_owned()),
            model: Some(model),
            api_key,
            port,
            telegram: None,
        })
    }

    fn telegram_answers(&mut self) -> anyhow::Result<Option<TelegramAnswers>> {
        eprintln!();
        if !self.confirm("Connect a Telegram bot?", false)? {
            return Ok(None);
        }
        let token = rpassword::prompt_password_stderr("  Bot token (from @BotFather): ")?;
        let token = token.trim().to_owned();
        if token.is_empty() {
            eprintln!("  No token given, skipping Telegram.");
            return Ok(None);
        }
        let users = self.ask("Allowed usernames or ids, comma separated", "")?;
        let require_bind = self.confirm("Require a bind code from new chats?", true)?;
        Ok(Some(TelegramAnswers {
            token,
            allow_users: parse_list(&users),
            require_bind,
        }))
    }
}

/// `"2"` → second catalog provider; a provider id is accepted as-is.
fn provider_choice(choice: &str) -> Option<&'static str> {
    if let Ok(n) = choice.parse::<usize>() {
        return KNOWN_PROVIDERS.get(n.checked_sub(1)?).map(|p| p.id);
    }
    catalog::lookup(choice).map(|p| p.id)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('@').to_owned())
        .filter(|s| !s.is_empty())
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────
