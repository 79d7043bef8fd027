//! Daily log files: `logs/YYYY-MM-DD.log`, one JSON record per line.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use super::buffer::LogLevel;

/// Daily-rotating appender keeping at most `max_files` files.
pub fn daily_appender(dir: &Path, max_files: usize) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_suffix("log")
        .max_log_files(max_files.max(1))
        .build(dir)
        .with_context(|| format!("opening log files in {}", dir.display()))
}

/// Log files in `dir`, oldest first.
pub fn log_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
                .collect()
        })
        .unwrap_or_default();
    // Date-named, so lexical order is chronological.
    files.sort();
    files
}

/// One line written by the JSON `fmt` layer.
#[derive(Debug, Clone, Deserialize)]
pub struct FileRecord {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl FileRecord {
    pub fn parse(line: &str) -> Option<Self> {
        serde_json::from_str(line).ok()
    }

    pub fn level(&self) -> Option<LogLevel> {
        self.level.parse().ok()
    }

    pub fn message(&self) -> &str {
        self.fields
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("")
    }
}

/// The last `n` lines across the newest files.
pub fn tail_lines(dir: &Path, n: usize) -> anyhow::Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for file in log_files(dir).iter().rev() {
        let raw = std::fs::read_to_string(file)
            .with_context(|| format!("reading {}", file.display()))?;
        let mut lines: Vec<String> = raw.lines().map(str::to_owned).collect();
        lines.append(&mut out);
        out = lines;
        if out.len() >= n {
            break;
        }
    }
    let skip = out.len().saturating_sub(n);
    Ok(out.split_off(skip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_spans_files_in_date_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2026-01-01.log"), "a\nb\n").unwrap();
        std::fs::write(dir.path().join("2026-01-02.log"), "c\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "zzz\n").unwrap();

        assert_eq!(tail_lines(dir.path(), 2).unwrap(), vec!["b", "c"]);
        assert_eq!(tail_lines(dir.path(), 10).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn parses_json_fmt_lines() {
        let line = r#"{"timestamp":"2026-01-01T00:00:00Z","level":"WARN","fields":{"message":"send failed","channel":"telegram"},"target":"sb_channels::telegram"}"#;
        let rec = FileRecord::parse(line).unwrap();
        assert_eq!(rec.level(), Some(LogLevel::Warn));
        assert_eq!(rec.message(), "send failed");
        assert_eq!(rec.target, "sb_channels::telegram");
        assert!(FileRecord::parse("not json").is_none());
    }
}
