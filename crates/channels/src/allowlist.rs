use std::collections::HashSet;

use sb_domain::channel::{ChatType, IncomingMessage};

const WILDCARD: &str = "*";

/// Principals an adapter accepts messages from.
///
/// `*` admits everyone; an empty list admits no one. A group message is
/// admitted when its group or its sender is listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowlist {
    users: HashSet<String>,
    groups: HashSet<String>,
}

impl Allowlist {
    pub fn new(users: &[String], groups: &[String]) -> Self {
        Self {
            users: normalize(users),
            groups: normalize(groups),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty()
    }

    fn user_allowed(&self, principal: &str) -> bool {
        self.users.contains(WILDCARD) || self.users.contains(principal)
    }

    /// Whether `msg` passes. `aliases` are extra names the transport knows
    /// the sender by (e.g. `@username` beside a numeric id).
    pub fn admits(&self, msg: &IncomingMessage, aliases: &[String]) -> bool {
        let sender_ok = self.user_allowed(&msg.sender)
            || aliases.iter().any(|a| self.user_allowed(a));
        if sender_ok {
            return true;
        }
        match (msg.chat_type, msg.group_id.as_deref()) {
            (ChatType::Group, Some(group)) => {
                self.groups.contains(WILDCARD) || self.groups.contains(group)
            }
            _ => false,
        }
    }

    pub fn users(&self) -> Vec<String> {
        let mut v: Vec<String> = self.users.iter().cloned().collect();
        v.sort();
        v
    }

    pub fn groups(&self) -> Vec<String> {
        let mut v: Vec<String> = self.groups.iter().cloned().collect();
        v.sort();
        v
    }
}

fn normalize(entries: &[String]) -> HashSet<String> {
    entries
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    fn group_msg(sender: &str, group: &str) -> IncomingMessage {
        let mut m = IncomingMessage::direct("tg", "1", sender, "hi");
        m.chat_type = ChatType::Group;
        m.group_id = Some(group.into());
        m
    }

    #[test]
    fn empty_admits_no_one() {
        let a = Allowlist::new(&[], &[]);
        assert!(a.is_empty());
        assert!(!a.admits(&IncomingMessage::direct("tg", "1", "alice", "hi"), &[]));
    }

    #[test]
    fn wildcard_admits_everyone() {
        let a = Allowlist::new(&s(&["*"]), &[]);
        assert!(a.admits(&IncomingMessage::direct("tg", "1", "anyone", "hi"), &[]));
    }

    #[test]
    fn listed_sender_or_alias() {
        let a = Allowlist::new(&s(&["alice", "@bob "]), &[]);
        assert!(a.admits(&IncomingMessage::direct("tg", "1", "alice", "hi"), &[]));
        assert!(a.admits(&IncomingMessage::direct("tg", "1", "42", "hi"), &s(&["@bob"])));
        assert!(!a.admits(&IncomingMessage::direct("tg", "1", "carol", "hi"), &[]));
    }

    #[test]
    fn group_admitted_by_group_or_sender() {
        let a = Allowlist::new(&s(&["alice"]), &s(&["-100"]));
        assert!(a.admits(&group_msg("mallory", "-100"), &[]));
        assert!(a.admits(&group_msg("alice", "-200"), &[]));
        assert!(!a.admits(&group_msg("mallory", "-200"), &[]));
        // A direct message from a principal named like a group is not a group message.
        assert!(!a.admits(&IncomingMessage::direct("tg", "1", "-100", "hi"), &[]));
    }
}
