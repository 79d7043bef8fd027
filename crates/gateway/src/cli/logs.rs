//! `switchboard logs ...`: reads the daily JSON log files.

use anyhow::Context;
use regex::Regex;

use sb_domain::config::{Config, HomeLayout};
use sb_domain::error::Error;

use crate::cli::LogsCommand;
use crate::logging::files::{log_files, tail_lines, FileRecord};
use crate::logging::LogLevel;

pub fn run(config: &Config, layout: &HomeLayout, cmd: LogsCommand) -> anyhow::Result<()> {
    let dir = layout.logs_dir(config);
    match cmd {
        LogsCommand::Tail { lines } => {
            for line in tail_lines(&dir, lines)? {
                println!("{}", render(&line));
            }
        }
        LogsCommand::Query {
            level,
            target,
            contains,
            limit,
        } => {
            let filter = FileFilter::new(level.as_deref(), target.as_deref(), contains)?;
            let mut matches = Vec::new();
            for file in log_files(&dir) {
                let raw = std::fs::read_to_string(&file)
                    .with_context(|| format!("reading {}", file.display()))?;
                matches.extend(
                    raw.lines()
                        .filter_map(|l| FileRecord::parse(l).map(|r| (l.to_owned(), r)))
                        .filter(|(_, r)| filter.matches(r))
                        .map(|(l, _)| l),
                );
            }
            let skip = matches.len().saturating_sub(limit);
            for line in &matches[skip..] {
                println!("{}", render(line));
            }
        }
    }
    Ok(())
}

struct FileFilter {
    level: Option<LogLevel>,
    target: Option<Regex>,
    contains: Option<String>,
}

impl FileFilter {
    fn new(level: Option<&str>, target: Option<&str>, contains: Option<String>) -> Result<Self, Error> {
        Ok(Self {
            level: level.map(|l| l.parse().map_err(Error::Validation)).transpose()?,
            target: target
                .map(|t| Regex::new(t).map_err(|e| Error::Validation(format!("invalid target regex: {e}"))))
                .transpose()?,
            contains: contains.map(|c| c.to_lowercase()),
        })
    }

    fn matches(&self, rec: &FileRecord) -> bool {
        if let Some(min) = self.level {
            if rec.level().map_or(true, |l| l < min) {
                return false;
            }
        }
        if self.target.as_ref().is_some_and(|re| !re.is_match(&rec.target)) {
            return false;
        }
        if let Some(needle) = &self.contains {
            if !rec.message().to_lowercase().contains(needle) {
                return false;
            }
        }
        true
    }
}

/// `timestamp LEVEL target: message key=value...`, or the raw line when it
/// is not a JSON record.
fn render(line: &str) -> String {
    let Some(rec) = FileRecord::parse(line) else {
        return line.to_owned();
    };
    let extra: Vec<String> = rec
        .fields
        .iter()
        .filter(|(k, _)| k.as_str() != "message")
        .map(|(k, v)| match v.as_str() {
            Some(s) => format!("{k}={s}"),
            None => format!("{k}={v}"),
        })
        .collect();
    let mut out = format!("{} {:>5} {}: {}", rec.timestamp, rec.level, rec.target, rec.message());
    if !extra.is_empty() {
        out.push(' ');
        out.push_str(&extra.join(" "));
    }
    out
}
