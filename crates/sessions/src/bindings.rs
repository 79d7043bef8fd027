//! Persisted `(channel, conversation) → session key` overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use sb_domain::error::{Error, Result};

use crate::persist::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBinding {
    pub channel: String,
    /// Peer id for direct chats, `grp:<groupId>` for groups.
    pub conversation: String,
    pub session_key: String,
}

/// Binding table, written through to `_bindings.json` on every change.
/// Memory only changes once the file write succeeds.
pub struct SessionBindings {
    path: PathBuf,
    entries: RwLock<BTreeMap<(String, String), String>>,
}

impl SessionBindings {
    pub fn load(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| Error::Storage(format!("reading {}: {e}", path.display())))?;
            let list: Vec<SessionBinding> = serde_json::from_str(&raw)
                .map_err(|e| Error::Storage(format!("parsing {}: {e}", path.display())))?;
            list.into_iter()
                .map(|b| ((b.channel, b.conversation), b.session_key))
                .collect()
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_owned(),
            entries: RwLock::new(entries),
        })
    }

    pub fn get(&self, channel: &str, conversation: &str) -> Option<String> {
        self.entries
            .read()
            .get(&(channel.to_owned(), conversation.to_owned()))
            .cloned()
    }

    pub fn set(&self, channel: &str, conversation: &str, session_key: &str) -> Result<()> {
        let mut entries = self.entries.write();
        let mut next = entries.clone();
        next.insert(
            (channel.to_owned(), conversation.to_owned()),
            session_key.to_owned(),
        );
        self.save(&next)?;
        *entries = next;
        Ok(())
    }

    /// Remove a binding. `NotFound` when nothing was bound.
    pub fn remove(&self, channel: &str, conversation: &str) -> Result<()> {
        let mut entries = self.entries.write();
        let mut next = entries.clone();
        if next
            .remove(&(channel.to_owned(), conversation.to_owned()))
            .is_none()
        {
            return Err(Error::NotFound(format!(
                "no binding for {channel}/{conversation}"
            )));
        }
        self.save(&next)?;
        *entries = next;
        Ok(())
    }

    pub fn list(&self) -> Vec<SessionBinding> {
        to_list(&self.entries.read())
    }

    fn save(&self, entries: &BTreeMap<(String, String), String>) -> Result<()> {
        let json = serde_json::to_vec_pretty(&to_list(entries))?;
        write_atomic(&self.path, &json)
    }
}

fn to_list(entries: &BTreeMap<(String, String), String>) -> Vec<SessionBinding> {
    entries
        .iter()
        .map(|((channel, conversation), key)| SessionBinding {
            channel: channel.clone(),
            conversation: conversation.clone(),
            session_key: key.clone(),
        })
        .collect()
}
