//! `switchboard models ...`

use std::path::Path;

use serde_json::json;

use sb_domain::config::{split_model, Config};
use sb_domain::error::Error;

use crate::cli::{print_json, ModelsCommand};
use crate::runtime::{catalog, ConfigStore};

pub async fn run(config: &Config, config_path: &Path, cmd: ModelsCommand) -> anyhow::Result<()> {
    match cmd {
        ModelsCommand::List { json } => {
            let models = catalog::models(config);
            if json {
                return print_json(&models);
            }
            for m in &models {
                let default = if m.is_default { "*" } else { " " };
                let avail = if m.available { "" } else { "  (no credentials)" };
                println!("{default} {}{avail}", m.id);
            }
        }
        ModelsCommand::Set { model } => {
            if split_model(&model).is_none() {
                return Err(Error::Validation(format!(
                    "'{model}' must be provider/model, e.g. openai/gpt-4o"
                ))
                .into());
            }
            let store = ConfigStore::load(config_path)?;
            store.patch(&json!({ "agent": { "model": model } }))?;
            println!("Default model set to {model}");
        }
        ModelsCommand::Scan => {
            let results = catalog::scan(config).await;
            if results.is_empty() {
                println!("No providers with credentials to scan.");
            }
            for r in &results {
                match &r.error {
                    Some(e) => println!("{}: error: {e}", r.provider),
                    None => {
                        println!("{} ({} models)", r.provider, r.models.len());
                        for m in &r.models {
                            println!("  {}/{m}", r.provider);
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
