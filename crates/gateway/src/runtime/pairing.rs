//! Control-plane authentication.
//!
//! In `token` mode without a static token, a one-time pairing code is
//! generated at startup and exchanged through `POST /api/pair` for a random
//! bearer token. Only SHA-256 hashes of issued tokens are kept.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use sb_domain::config::{AuthConfig, AuthMode, HomeLayout};
use sb_domain::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::config_store::write_private;

const CODE_LEN: usize = 8;
const TOKEN_BYTES: usize = 32;

type TokenHash = [u8; 32];

fn hash(value: &str) -> TokenHash {
    Sha256::digest(value.as_bytes()).into()
}

/// Compare through fixed-length digests so timing leaks neither content
/// nor length.
fn secret_eq(a: &str, b: &str) -> bool {
    hash(a).ct_eq(&hash(b)).into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingState {
    pub mode: AuthMode,
    /// Protected routes need a bearer token.
    pub required: bool,
    /// A pairing code is waiting to be exchanged.
    pub pending: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    tokens: Vec<String>,
}

pub struct PairingGuard {
    mode: AuthMode,
    static_hash: Option<TokenHash>,
    code: Mutex<Option<String>>,
    issued: RwLock<HashSet<TokenHash>>,
    /// Where issued hashes are persisted, when enabled.
    tokens_file: Option<PathBuf>,
    code_file: Option<PathBuf>,
    login: Option<(String, String)>,
}

impl PairingGuard {
    /// Build the guard for `auth`. Generates and writes a pairing code when
    /// token mode has no static token.
    pub fn from_config(auth: &AuthConfig, layout: &HomeLayout) -> Result<Self> {
        let mut guard = Self::new(auth);
        if auth.persist_tokens {
            let path = layout.tokens_file();
            guard.issued = RwLock::new(load_token_file(&path)?);
            guard.tokens_file = Some(path);
        }
        if guard.needs_pairing_code() {
            let code = generate_code();
            let path = layout.pairing_code_file();
            write_private(&path, format!("{code}\n").as_bytes())?;
            guard.code_file = Some(path);
            *guard.code.lock() = Some(code);
        }
        Ok(guard)
    }

    /// In-memory guard with no pairing code. Used by `from_config` and tests.
    pub fn new(auth: &AuthConfig) -> Self {
        let login = match (auth.username.as_deref(), auth.password.as_deref()) {
            (Some(u), Some(p)) if !p.is_empty() => Some((u.to_owned(), p.to_owned())),
            _ => None,
        };
        Self {
            mode: auth.mode,
            static_hash: auth.static_token().map(hash),
            code: Mutex::new(None),
            issued: RwLock::new(HashSet::new()),
            tokens_file: None,
            code_file: None,
            login,
        }
    }

    /// Replace the pending pairing code.
    pub fn with_code(self, code: &str) -> Self {
        *self.code.lock() = Some(code.to_owned());
        self
    }

    fn needs_pairing_code(&self) -> bool {
        self.mode == AuthMode::Token && self.static_hash.is_none()
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// The code to announce at startup, if one is pending.
    pub fn pending_code(&self) -> Option<String> {
        self.code.lock().clone()
    }

    pub fn code_file(&self) -> Option<&Path> {
        self.code_file.as_deref()
    }

    pub fn state(&self) -> PairingState {
        PairingState {
            mode: self.mode,
            required: self.mode != AuthMode::None,
            pending: self.code.lock().is_some(),
        }
    }

    /// Exchange a pairing code for a new bearer token. The code is single-use.
    pub fn exchange(&self, provided: &str) -> Result<String> {
        let mut code = self.code.lock();
        let Some(expected) = code.as_deref() else {
            return Err(Error::Auth("no pairing code is pending".into()));
        };
        if !secret_eq(&provided.trim().to_ascii_uppercase(), expected) {
            return Err(Error::Auth("invalid pairing code".into()));
        }
        *code = None;
        drop(code);

        if let Some(path) = &self.code_file {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "could not remove pairing code file");
            }
        }
        self.mint()
    }

    /// Password-mode login. Returns a new bearer token.
    pub fn login(&self, username: &str, password: &str) -> Result<String> {
        let Some((user, pass)) = &self.login else {
            return Err(Error::Auth("password login is not configured".into()));
        };
        // Evaluate both so a wrong username costs the same as a wrong password.
        let user_ok = secret_eq(username, user);
        let pass_ok = secret_eq(password, pass);
        if self.mode != AuthMode::Password || !(user_ok && pass_ok) {
            return Err(Error::Auth("invalid username or password".into()));
        }
        self.mint()
    }

    fn mint(&self) -> Result<String> {
        let bytes: [u8; TOKEN_BYTES] = rand::thread_rng().gen();
        let token = hex::encode(bytes);
        self.issued.write().insert(hash(&token));
        if let Some(path) = &self.tokens_file {
            self.persist(path)?;
        }
        Ok(token)
    }

    fn persist(&self, path: &Path) -> Result<()> {
        let file = TokenFile {
            tokens: self.issued.read().iter().map(hex::encode).collect(),
        };
        write_private(path, &serde_json::to_vec_pretty(&file)?)
    }

    /// Whether `bearer` authorizes a protected request.
    pub fn authorize(&self, bearer: Option<&str>) -> bool {
        if self.mode == AuthMode::None {
            return true;
        }
        let Some(bearer) = bearer.filter(|b| !b.is_empty()) else {
            return false;
        };
        let provided = hash(bearer);
        if let Some(expected) = &self.static_hash {
            if bool::from(provided.ct_eq(expected)) {
                return true;
            }
        }
        self.issued
            .read()
            .iter()
            .any(|h| bool::from(provided.ct_eq(h)))
    }

    pub fn issued_count(&self) -> usize {
        self.issued.read().len()
    }
}

fn load_token_file(path: &Path) -> Result<HashSet<TokenHash>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(Error::Storage(format!("reading {}: {e}", path.display()))),
    };
    let file: TokenFile = serde_json::from_str(&raw)
        .map_err(|e| Error::Storage(format!("parsing {}: {e}", path.display())))?;
    Ok(file
        .tokens
        .iter()
        .filter_map(|h| hex::decode(h).ok())
        .filter_map(|bytes| TokenHash::try_from(bytes.as_slice()).ok())
        .collect())
}

/// Eight uppercase hex characters.
fn generate_code() -> String {
    let bytes: [u8; CODE_LEN / 2] = rand::thread_rng().gen();
    hex::encode_upper(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_mode() -> AuthConfig {
        AuthConfig::default()
    }

    #[test]
    fn code_exchange_is_single_use() {
        let guard = PairingGuard::new(&token_mode()).with_code("ABCDEFGH");
        assert!(guard.state().pending);
        assert!(guard.exchange("WRONG").is_err());
        assert!(guard.state().pending);

        let token = guard.exchange("abcdefgh").unwrap();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(guard.authorize(Some(&token)));
        assert!(!guard.state().pending);
        assert!(matches!(guard.exchange("ABCDEFGH"), Err(Error::Auth(_))));
    }

    #[test]
    fn static_token_authorizes_without_pairing() {
        let auth = AuthConfig {
            token: Some("s3cret".into()),
            ..token_mode()
        };
        let guard = PairingGuard::new(&auth);
        assert!(guard.authorize(Some("s3cret")));
        assert!(!guard.authorize(Some("nope")));
        assert!(!guard.authorize(None));
        assert!(!guard.state().pending);
    }

    #[test]
    fn none_mode_allows_everything() {
        let auth = AuthConfig {
            mode: AuthMode::None,
            ..Default::default()
        };
        let guard = PairingGuard::new(&auth);
        assert!(guard.authorize(None));
        assert!(!guard.state().required);
    }

    #[test]
    fn password_login_mints_token() {
        let auth = AuthConfig {
            mode: AuthMode::Password,
            username: Some("admin".into()),
            password: Some("hunter2".into()),
            ..Default::default()
        };
        let guard = PairingGuard::new(&auth);
        assert!(guard.login("admin", "wrong").is_err());
        assert!(guard.login("root", "hunter2").is_err());
        let token = guard.login("admin", "hunter2").unwrap();
        assert!(guard.authorize(Some(&token)));
    }

    #[test]
    fn from_config_writes_code_file_and_persists_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        let auth = AuthConfig {
            persist_tokens: true,
            ..token_mode()
        };

        let guard = PairingGuard::from_config(&auth, &layout).unwrap();
        let code = guard.pending_code().unwrap();
        assert_eq!(code.len(), CODE_LEN);
        let on_disk = std::fs::read_to_string(layout.pairing_code_file()).unwrap();
        assert_eq!(on_disk.trim(), code);

        let token = guard.exchange(&code).unwrap();
        assert!(!layout.pairing_code_file().exists());

        let restarted = PairingGuard::from_config(&auth, &layout).unwrap();
        assert!(restarted.authorize(Some(&token)));
        assert_eq!(restarted.issued_count(), 1);
    }

    #[test]
    fn tokens_are_forgotten_on_restart_without_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        let guard = PairingGuard::from_config(&token_mode(), &layout).unwrap();
        let token = guard.exchange(&guard.pending_code().unwrap()).unwrap();

        let restarted = PairingGuard::from_config(&token_mode(), &layout).unwrap();
        assert!(!restarted.authorize(Some(&token)));
    }
}
