//! Out-of-band ownership check: until a peer sends the bind code over the
//! transport, the adapter accepts nothing.

use std::collections::HashSet;

use parking_lot::RwLock;
use rand::Rng;
use sb_domain::channel::{ChatType, IncomingMessage};

const CODE_LEN: usize = 6;
// No 0/O or 1/I so codes survive being read aloud or retyped.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// Gate disabled, or the sender already bound.
    Pass,
    /// This message carried the code; the contained principal is now bound.
    JustBound(String),
    /// Not bound and no code: drop.
    Drop,
}

#[derive(Debug)]
pub struct BindGate {
    code: Option<String>,
    bound: RwLock<HashSet<String>>,
}

impl BindGate {
    /// Gate that lets everything through.
    pub fn disabled() -> Self {
        Self {
            code: None,
            bound: RwLock::new(HashSet::new()),
        }
    }

    /// Gate with a freshly generated code.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self::with_code(code)
    }

    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            bound: RwLock::new(HashSet::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.code.is_some()
    }

    pub fn is_bound(&self) -> bool {
        !self.bound.read().is_empty()
    }

    /// The code while nobody has bound yet.
    pub fn pending_code(&self) -> Option<String> {
        if self.is_bound() {
            None
        } else {
            self.code.clone()
        }
    }

    /// Principal bound by a message: the group for group chats, else the sender.
    fn principal(msg: &IncomingMessage) -> String {
        match (msg.chat_type, msg.group_id.as_deref()) {
            (ChatType::Group, Some(g)) => format!("grp:{g}"),
            _ => msg.sender.clone(),
        }
    }

    pub fn is_principal_bound(&self, msg: &IncomingMessage) -> bool {
        self.bound.read().contains(&Self::principal(msg))
    }

    pub fn check(&self, msg: &IncomingMessage) -> BindOutcome {
        let Some(code) = self.code.as_deref() else {
            return BindOutcome::Pass;
        };
        if self.is_principal_bound(msg) {
            return BindOutcome::Pass;
        }
        let body = msg.body.trim();
        let offered = body.strip_prefix("/bind").map(str::trim).unwrap_or(body);
        if offered.eq_ignore_ascii_case(code) {
            let principal = Self::principal(msg);
            self.bound.write().insert(principal.clone());
            BindOutcome::JustBound(principal)
        } else if self.is_bound() {
            // Someone else owns the adapter; the allowlist decides.
            BindOutcome::Pass
        } else {
            BindOutcome::Drop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_gate_passes_everything() {
        let g = BindGate::disabled();
        assert!(!g.is_enabled());
        assert_eq!(
            g.check(&IncomingMessage::direct("tg", "1", "x", "hello")),
            BindOutcome::Pass
        );
        assert_eq!(g.pending_code(), None);
    }

    #[test]
    fn generated_codes_use_alphabet() {
        let g = BindGate::generate();
        let code = g.pending_code().unwrap();
        assert_eq!(code.len(), CODE_LEN);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn binds_with_command_or_bare_code() {
        let g = BindGate::with_code("AB12CD");
        assert_eq!(
            g.check(&IncomingMessage::direct("tg", "1", "alice", "hello")),
            BindOutcome::Drop
        );
        assert_eq!(
            g.check(&IncomingMessage::direct("tg", "2", "alice", "/bind ab12cd")),
            BindOutcome::JustBound("alice".into())
        );
        assert!(g.is_bound());
        assert_eq!(g.pending_code(), None);
        assert_eq!(
            g.check(&IncomingMessage::direct("tg", "3", "alice", "hello")),
            BindOutcome::Pass
        );

        let g2 = BindGate::with_code("ZZ99ZZ");
        assert_eq!(
            g2.check(&IncomingMessage::direct("tg", "1", "bob", " ZZ99ZZ ")),
            BindOutcome::JustBound("bob".into())
        );
    }

    #[test]
    fn group_binding_covers_the_group() {
        let g = BindGate::with_code("AB12CD");
        let mut m = IncomingMessage::direct("tg", "1", "alice", "/bind AB12CD");
        m.chat_type = ChatType::Group;
        m.group_id = Some("-100".into());
        assert_eq!(g.check(&m), BindOutcome::JustBound("grp:-100".into()));
        m.sender = "carol".into();
        m.body = "hi".into();
        assert!(g.is_principal_bound(&m));
    }
}
