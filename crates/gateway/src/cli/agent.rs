//! `switchboard agent chat`: one-shot turn without a running gateway.
//!
//! Boots the same runtime the gateway uses (minus the HTTP server, channel
//! adapters and background tasks), runs a single turn through the
//! pipeline, flushes the session and exits. Useful for scripting.

use std::path::Path;
use std::sync::Arc;

use sb_domain::config::HomeLayout;
use sb_sessions::normalize_key;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::{self, Overrides};
use crate::cli::print_json;
use crate::logging::LogBuffer;
use crate::runtime::Turn;

/// Conversation used when neither `--session` nor a current session is set.
const DEFAULT_CONVERSATION: &str = "cli";

pub async fn chat(
    layout: HomeLayout,
    config_path: &Path,
    message: String,
    session: Option<String>,
    model: Option<String>,
    json_output: bool,
) -> anyhow::Result<()> {
    // 1. Boot the runtime.
    let logs = Arc::new(LogBuffer::with_capacity(64));
    let state = bootstrap::build_app_state(layout, config_path, logs, Overrides::default()).await?;

    // 2. Resolve the session: flag, then current selection, then `cli`.
    let agent_id = state.snapshot().sessions.agent_id.clone();
    let raw = session
        .or_else(|| state.sessions.current())
        .unwrap_or_else(|| DEFAULT_CONVERSATION.to_owned());
    let key = normalize_key(&agent_id, &raw)?;

    // 3. Run the turn; Ctrl-C cancels it.
    let mut turn = Turn::new(&key, "cli", &message);
    turn.model = model.filter(|m| !m.trim().is_empty());
    let cancel = CancellationToken::new();
    let result = tokio::select! {
        r = state.pipeline.run_turn(turn, &cancel) => r,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            Err(sb_domain::error::Error::Cancelled)
        }
    };

    // 4. Persist whatever was appended, even on failure.
    state.sessions.flush()?;
    if let Some(log) = state.audit.task_log() {
        log.close();
    }

    let outcome = result?;
    if json_output {
        print_json(&outcome)?;
    } else {
        println!("{}", outcome.reply);
        eprintln!(
            "[{} · {} in / {} out · {} ms · {}]",
            outcome.model,
            outcome.usage.input_tokens,
            outcome.usage.output_tokens,
            outcome.duration.as_millis(),
            outcome.session_key,
        );
    }
    Ok(())
}
