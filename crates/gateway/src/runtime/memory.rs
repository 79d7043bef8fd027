//! File-backed agent memory: Markdown and text notes under the memory
//! directory, indexed into `state/memory_index.json`.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use sb_domain::config::{Config, HomeLayout, MemoryBackend};
use sb_domain::error::{Error, Result};
use serde::{Deserialize, Serialize};

use super::config_store::write_private;

const NOTE_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    /// Path relative to the memory directory, `/`-separated.
    pub path: String,
    pub bytes: u64,
    pub lines: usize,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryIndex {
    pub synced_at: Option<DateTime<Utc>>,
    pub entries: Vec<MemoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryHit {
    pub path: String,
    /// 1-based line number.
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStatus {
    pub backend: MemoryBackend,
    pub dir: PathBuf,
    pub dir_exists: bool,
    pub indexed_files: usize,
    pub indexed_bytes: u64,
    pub synced_at: Option<DateTime<Utc>>,
}

pub struct MemoryStore {
    backend: MemoryBackend,
    dir: PathBuf,
    index_file: PathBuf,
    max_results: usize,
}

impl MemoryStore {
    pub fn from_config(config: &Config, layout: &HomeLayout) -> Self {
        Self {
            backend: config.memory.backend,
            dir: layout.memory_dir(config),
            index_file: layout.memory_index_file(),
            max_results: config.memory.max_results.max(1),
        }
    }

    fn ensure_enabled(&self) -> Result<()> {
        match self.backend {
            MemoryBackend::File => Ok(()),
            MemoryBackend::None => Err(Error::Validation(
                "memory is disabled (memory.backend: none)".into(),
            )),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rebuild the index from the files on disk.
    pub fn sync(&self) -> Result<MemoryIndex> {
        self.ensure_enabled()?;
        let mut entries = Vec::new();
        if self.dir.is_dir() {
            collect_notes(&self.dir, &self.dir, &mut entries)?;
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        let index = MemoryIndex {
            synced_at: Some(Utc::now()),
            entries,
        };
        write_private(&self.index_file, &serde_json::to_vec_pretty(&index)?)?;
        tracing::info!(files = index.entries.len(), "memory index rebuilt");
        Ok(index)
    }

    /// The stored index, empty when never synced.
    pub fn index(&self) -> Result<MemoryIndex> {
        match std::fs::read_to_string(&self.index_file) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                Error::Storage(format!("parsing {}: {e}", self.index_file.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MemoryIndex::default()),
            Err(e) => Err(Error::Storage(format!(
                "reading {}: {e}",
                self.index_file.display()
            ))),
        }
    }

    pub fn list(&self) -> Result<Vec<MemoryEntry>> {
        self.ensure_enabled()?;
        Ok(self.index()?.entries)
    }

    pub fn get(&self, path: &str) -> Result<String> {
        self.ensure_enabled()?;
        let full = self.resolve(path)?;
        std::fs::read_to_string(&full).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!("memory note '{path}'")),
            _ => Error::Storage(format!("reading {}: {e}", full.display())),
        })
    }

    /// Case-insensitive line search across indexed notes. Syncs first when
    /// no index exists yet.
    pub fn search(&self, query: &str) -> Result<Vec<MemoryHit>> {
        self.ensure_enabled()?;
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(Error::Validation("search query must not be empty".into()));
        }
        let mut index = self.index()?;
        if index.synced_at.is_none() {
            index = self.sync()?;
        }

        let mut hits = Vec::new();
        for entry in &index.entries {
            let Ok(content) = std::fs::read_to_string(self.dir.join(&entry.path)) else {
                continue;
            };
            for (i, line) in content.lines().enumerate() {
                if line.to_lowercase().contains(&needle) {
                    hits.push(MemoryHit {
                        path: entry.path.clone(),
                        line: i + 1,
                        text: line.trim().to_owned(),
                    });
                    if hits.len() >= self.max_results {
                        return Ok(hits);
                    }
                }
            }
        }
        Ok(hits)
    }

    pub fn status(&self) -> Result<MemoryStatus> {
        let index = self.index()?;
        Ok(MemoryStatus {
            backend: self.backend,
            dir: self.dir.clone(),
            dir_exists: self.dir.is_dir(),
            indexed_files: index.entries.len(),
            indexed_bytes: index.entries.iter().map(|e| e.bytes).sum(),
            synced_at: index.synced_at,
        })
    }

    /// Drop the index. Notes are left untouched.
    pub fn reset(&self) -> Result<bool> {
        match std::fs::remove_file(&self.index_file) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Storage(format!(
                "removing {}: {e}",
                self.index_file.display()
            ))),
        }
    }

    /// Join a relative note path onto the memory dir, refusing escapes.
    fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let rel_path = Path::new(rel);
        let safe = rel_path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if rel.is_empty() || !safe {
            return Err(Error::Validation(format!(
                "'{rel}' must be a relative path inside the memory directory"
            )));
        }
        Ok(self.dir.join(rel_path))
    }
}

fn collect_notes(root: &Path, dir: &Path, out: &mut Vec<MemoryEntry>) -> Result<()> {
    let rd = std::fs::read_dir(dir)
        .map_err(|e| Error::Storage(format!("listing {}: {e}", dir.display())))?;
    for entry in rd.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            collect_notes(root, &path, out)?;
            continue;
        }
        let is_note = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| NOTE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if !is_note {
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else { continue };
        let lines = std::fs::read_to_string(&path)
            .map(|c| c.lines().count())
            .unwrap_or(0);
        out.push(MemoryEntry {
            path: rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            bytes: meta.len(),
            lines,
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, MemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        let cfg = Config::default();
        let store = MemoryStore::from_config(&cfg, &layout);
        std::fs::create_dir_all(store.dir().join("people")).unwrap();
        std::fs::write(store.dir().join("todo.md"), "# Todo\nBuy milk\nCall Alice\n").unwrap();
        std::fs::write(store.dir().join("people/alice.txt"), "alice likes tea\n").unwrap();
        std::fs::write(store.dir().join("photo.png"), [0u8, 1, 2]).unwrap();
        (dir, store)
    }

    #[test]
    fn sync_indexes_notes_only() {
        let (_dir, store) = store();
        let index = store.sync().unwrap();
        let paths: Vec<&str> = index.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["people/alice.txt", "todo.md"]);
        assert_eq!(index.entries[1].lines, 3);
        assert_eq!(store.list().unwrap().len(), 2);
        assert_eq!(store.status().unwrap().indexed_files, 2);
    }

    #[test]
    fn search_is_case_insensitive_and_syncs_lazily() {
        let (_dir, store) = store();
        let hits = store.search("ALICE").unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().any(|h| h.path == "todo.md" && h.line == 3));
        assert!(store.status().unwrap().synced_at.is_some());
    }

    #[test]
    fn get_rejects_escapes() {
        let (_dir, store) = store();
        assert!(store.get("todo.md").unwrap().contains("Buy milk"));
        assert!(matches!(store.get("../config.yaml"), Err(Error::Validation(_))));
        assert!(matches!(store.get("/etc/passwd"), Err(Error::Validation(_))));
        assert!(matches!(store.get("nope.md"), Err(Error::NotFound(_))));
    }

    #[test]
    fn reset_drops_index() {
        let (_dir, store) = store();
        store.sync().unwrap();
        assert!(store.reset().unwrap());
        assert!(!store.reset().unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn disabled_backend_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.memory.backend = MemoryBackend::None;
        let store = MemoryStore::from_config(&cfg, &HomeLayout::new(dir.path()));
        assert!(matches!(store.search("x"), Err(Error::Validation(_))));
    }
}
