//! `switchboard memory ...`

use sb_domain::config::{Config, HomeLayout};

use crate::cli::MemoryCommand;
use crate::runtime::MemoryStore;

pub fn run(config: &Config, layout: &HomeLayout, cmd: MemoryCommand) -> anyhow::Result<()> {
    let store = MemoryStore::from_config(config, layout);
    match cmd {
        MemoryCommand::Search { query } => {
            let hits = store.search(&query)?;
            if hits.is_empty() {
                println!("No matches for '{query}'.");
            }
            for h in &hits {
                println!("{}:{}: {}", h.path, h.line, h.text);
            }
        }
        MemoryCommand::Get { path } => print!("{}", store.get(&path)?),
        MemoryCommand::List => {
            let entries = store.list()?;
            if entries.is_empty() {
                println!("Index is empty; run `switchboard memory sync`.");
            }
            for e in &entries {
                println!("{:<48} {:>6} lines {:>8} B", e.path, e.lines, e.bytes);
            }
        }
        MemoryCommand::Status => {
            let s = store.status()?;
            println!("backend:  {:?}", s.backend);
            println!(
                "dir:      {}{}",
                s.dir.display(),
                if s.dir_exists { "" } else { " (missing)" }
            );
            println!("indexed:  {} file(s), {} bytes", s.indexed_files, s.indexed_bytes);
            match s.synced_at {
                Some(t) => println!("synced:   {}", t.to_rfc3339()),
                None => println!("synced:   never"),
            }
        }
        MemoryCommand::Reset => {
            if store.reset()? {
                println!("Memory index removed. Notes in {} were kept.", store.dir().display());
            } else {
                println!("No index to remove.");
            }
        }
        MemoryCommand::Sync => {
            let index = store.sync()?;
            println!("Indexed {} note(s) from {}", index.entries.len(), store.dir().display());
        }
    }
    Ok(())
}
