//! `switchboard sessions ...`: operates on the session files directly.
//!
//! A running gateway keeps its own in-memory copy; edits made here are
//! picked up on its next start.

use sb_domain::config::{Config, HomeLayout};
use sb_sessions::{normalize_key, SessionManager};

use crate::cli::{print_json, SessionsCommand};

pub fn run(config: &Config, layout: &HomeLayout, cmd: SessionsCommand) -> anyhow::Result<()> {
    let manager = SessionManager::open(&layout.sessions_dir(), config.sessions.max_messages)?;
    let agent_id = config.sessions.agent_id.as_str();
    let key = |raw: &str| normalize_key(agent_id, raw);

    match cmd {
        SessionsCommand::List { json } => {
            let sessions = manager.list();
            if json {
                return print_json(&sessions);
            }
            if sessions.is_empty() {
                println!("No sessions.");
                return Ok(());
            }
            let current = manager.current();
            for s in &sessions {
                let marker = if current.as_deref() == Some(s.key.as_str()) { "*" } else { " " };
                println!(
                    "{marker} {:<40} {:>5} msgs  {:<10} {}{}",
                    s.key,
                    s.retained,
                    s.channel,
                    s.last_activity_at.format("%Y-%m-%d %H:%M"),
                    s.model
                        .as_deref()
                        .map(|m| format!("  [{m}]"))
                        .unwrap_or_default(),
                );
            }
            println!("\n{} session(s)", sessions.len());
        }

        SessionsCommand::Get { key: raw, json } => {
            let session = manager.get(&key(&raw)?)?;
            if json {
                return print_json(&session);
            }
            println!("{} ({} messages total)", session.key, session.message_count);
            if let Some(model) = &session.model {
                println!("model: {model}");
            }
            println!();
            for msg in &session.messages {
                println!("[{}] {}", msg.role.as_str(), msg.content);
            }
        }

        SessionsCommand::Switch { key: raw } => {
            let k = key(&raw)?;
            manager.set_current(&k)?;
            println!("Current session: {k}");
        }

        SessionsCommand::Delete { key: raw, missing_ok } => {
            let k = key(&raw)?;
            if manager.delete(&k, missing_ok)? {
                println!("Deleted {k}");
            } else {
                println!("{k} did not exist");
            }
        }

        SessionsCommand::Reset { key: raw } => {
            let k = key(&raw)?;
            manager.reset(&k)?;
            manager.flush()?;
            println!("Cleared history of {k}");
        }

        SessionsCommand::Bind {
            channel,
            conversation,
            key: raw,
        } => {
            let k = key(&raw)?;
            manager.bindings().set(&channel, &conversation, &k)?;
            println!("{channel}/{conversation} -> {k}");
        }

        SessionsCommand::Unbind {
            channel,
            conversation,
        } => {
            manager.bindings().remove(&channel, &conversation)?;
            println!("Removed binding for {channel}/{conversation}");
        }

        SessionsCommand::Bindings { json } => {
            let bindings = manager.bindings().list();
            if json {
                return print_json(&bindings);
            }
            if bindings.is_empty() {
                println!("No bindings.");
            }
            for b in &bindings {
                println!("{}/{} -> {}", b.channel, b.conversation, b.session_key);
            }
        }

        SessionsCommand::Current => match manager.current() {
            Some(k) => println!("{k}"),
            None => println!("No session selected; `agent chat` uses the `cli` conversation."),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Config, HomeLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        std::fs::create_dir_all(layout.sessions_dir()).unwrap();
        (dir, Config::default(), layout)
    }

    fn seed(config: &Config, layout: &HomeLayout, label: &str) -> String {
        let manager = SessionManager::open(&layout.sessions_dir(), 100).unwrap();
        let key = normalize_key(&config.sessions.agent_id, label).unwrap();
        manager.get_or_create(&key, "cli");
        manager.flush().unwrap();
        key
    }

    #[test]
    fn switch_requires_existing_session() {
        let (_dir, config, layout) = setup();
        let err = run(
            &config,
            &layout,
            SessionsCommand::Switch { key: "ghost".into() },
        )
        .unwrap_err();
        let err = err.downcast::<sb_domain::error::Error>().unwrap();
        assert_eq!(err.exit_code(), 1);

        let key = seed(&config, &layout, "family");
        run(&config, &layout, SessionsCommand::Switch { key: "family".into() }).unwrap();
        let manager = SessionManager::open(&layout.sessions_dir(), 100).unwrap();
        assert_eq!(manager.current(), Some(key));
    }

    #[test]
    fn bind_and_unbind_persist() {
        let (_dir, config, layout) = setup();
        run(
            &config,
            &layout,
            SessionsCommand::Bind {
                channel: "telegram".into(),
                conversation: "42".into(),
                key: "family".into(),
            },
        )
        .unwrap();
        let manager = SessionManager::open(&layout.sessions_dir(), 100).unwrap();
        let expected = normalize_key(&config.sessions.agent_id, "family").unwrap();
        assert_eq!(manager.bindings().get("telegram", "42"), Some(expected));

        run(
            &config,
            &layout,
            SessionsCommand::Unbind {
                channel: "telegram".into(),
                conversation: "42".into(),
            },
        )
        .unwrap();
        assert!(run(
            &config,
            &layout,
            SessionsCommand::Unbind {
                channel: "telegram".into(),
                conversation: "42".into(),
            },
        )
        .is_err());
    }

    #[test]
    fn delete_missing_ok() {
        let (_dir, config, layout) = setup();
        assert!(run(
            &config,
            &layout,
            SessionsCommand::Delete {
                key: "nope".into(),
                missing_ok: false
            }
        )
        .is_err());
        run(
            &config,
            &layout,
            SessionsCommand::Delete {
                key: "nope".into(),
                missing_ok: true,
            },
        )
        .unwrap();

        seed(&config, &layout, "work");
        run(
            &config,
            &layout,
            SessionsCommand::Delete {
                key: "work".into(),
                missing_ok: false,
            },
        )
        .unwrap();
        let manager = SessionManager::open(&layout.sessions_dir(), 100).unwrap();
        assert!(manager.is_empty());
    }
}
