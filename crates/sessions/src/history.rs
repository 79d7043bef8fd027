//! Builds the bounded history handed to an executor.

use sb_domain::chat::{HistoryEntry, Role};

use crate::session::Message;

/// Suffix appended to truncated message content.
pub const ELLIPSIS: char = '…';

/// Take the most recent `limit` messages, drop unusable ones, and cap each
/// content at `max_chars` characters. Order is preserved.
pub fn trim_history<'a, I>(messages: I, limit: usize, max_chars: usize) -> Vec<HistoryEntry>
where
    I: IntoIterator<Item = &'a Message>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut recent: Vec<&Message> = messages.into_iter().rev().take(limit).collect();
    recent.reverse();

    recent
        .into_iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant | Role::System))
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| HistoryEntry::new(m.role, truncate_chars(&m.content, max_chars)))
        .collect()
}

/// Cap `s` at `max_chars` Unicode scalar values, appending [`ELLIPSIS`]
/// when anything was cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_owned(),
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + ELLIPSIS.len_utf8());
            out.push_str(&s[..byte_idx]);
            out.push(ELLIPSIS);
            out
        }
    }
}
