//! Session identity — a stable per-visitor identifier
//!
//! The identifier is a correlation key, not a security token. It is
//! synthesized once (base-36 millisecond timestamp + base-36 random suffix)
//! and then read back from durable storage on every later run.
//!
//! Storage sits behind the `SessionStore` trait. `SessionIdentity` walks an
//! ordered list of stores, returns the first identifier found and backfills
//! every store that was missing it. Backends:
//! - **CookieJarStore** — cookie file, `Path=/; SameSite=Strict` with expiry
//! - **LocalStore** — JSON key/value file (localStorage analogue)
//! - **MemoryStore** — in-process, for tests and throwaway sessions

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use thiserror::Error;

use crate::config::SessionConfig;

/// Cookie name and local store key shared by every backend
pub const SESSION_KEY: &str = "chat_bubble_session_id";

/// Length of the random base-36 suffix
const RANDOM_SUFFIX_LEN: usize = 9;

const COOKIE_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed store {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot expand path {path}: {reason}")]
    Path { path: String, reason: String },
}

// ============================================================================
// SessionStore trait
// ============================================================================

/// A durable location for the session identifier.
pub trait SessionStore: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Read the stored identifier. Missing or empty values read as `None`.
    fn load(&self) -> Result<Option<String>, StorageError>;

    fn save(&self, id: &str) -> Result<(), StorageError>;

    fn clear(&self) -> Result<(), StorageError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn io_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))
        }
        _ => Ok(()),
    }
}

/// Read a file, treating "not found" as empty.
fn read_optional(path: &Path) -> Result<Option<String>, StorageError> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Expand `~` and environment variables in a configured storage path.
pub fn expand_path(raw: &str) -> Result<PathBuf, StorageError> {
    shellexpand::full(raw)
        .map(|p| PathBuf::from(p.as_ref()))
        .map_err(|e| StorageError::Path {
            path: raw.to_string(),
            reason: e.to_string(),
        })
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-process store. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(id: &str) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(id.to_string()))),
        }
    }

    pub fn value(&self) -> Option<String> {
        lock(&self.slot).clone()
    }
}

impl SessionStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(lock(&self.slot).clone().filter(|v| !v.is_empty()))
    }

    fn save(&self, id: &str) -> Result<(), StorageError> {
        *lock(&self.slot) = Some(id.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *lock(&self.slot) = None;
        Ok(())
    }
}

// ============================================================================
// LocalStore
// ============================================================================

/// JSON object file mapping keys to string values.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match read_optional(&self.path)? {
            Some(raw) if !raw.trim().is_empty() => {
                serde_json::from_str(&raw).map_err(|source| StorageError::Malformed {
                    path: self.path.display().to_string(),
                    source,
                })
            }
            _ => Ok(BTreeMap::new()),
        }
    }

    /// Writers start over from an empty map when the file is unreadable JSON,
    /// so a corrupt store cannot block persisting the identifier.
    fn read_map_or_reset(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match self.read_map() {
            Err(e @ StorageError::Malformed { .. }) => {
                tracing::warn!(error = %e, "Discarding malformed local store");
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        ensure_parent(&self.path)?;
        let body = serde_json::to_string_pretty(map).map_err(|source| StorageError::Malformed {
            path: self.path.display().to_string(),
            source,
        })?;
        fs::write(&self.path, body).map_err(|e| io_err(&self.path, e))
    }
}

impl SessionStore for LocalStore {
    fn name(&self) -> &str {
        "local_store"
    }

    fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self.read_map()?.remove(SESSION_KEY).filter(|v| !v.is_empty()))
    }

    fn save(&self, id: &str) -> Result<(), StorageError> {
        let mut map = self.read_map_or_reset()?;
        map.insert(SESSION_KEY.to_string(), id.to_string());
        self.write_map(&map)
    }

    fn clear(&self) -> Result<(), StorageError> {
        let mut map = self.read_map_or_reset()?;
        if map.remove(SESSION_KEY).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

// ============================================================================
// CookieJarStore
// ============================================================================

/// Cookie file with one `Set-Cookie`-style line per cookie.
///
/// Only the `chat_bubble_session_id` line is touched; other cookies in the
/// jar are preserved. A cookie whose `Expires` is in the past, or cannot be
/// parsed, reads as absent.
#[derive(Debug, Clone)]
pub struct CookieJarStore {
    path: PathBuf,
    lifetime: Duration,
}

impl CookieJarStore {
    pub fn new(path: impl Into<PathBuf>, lifetime: Duration) -> Self {
        Self {
            path: path.into(),
            lifetime,
        }
    }

    fn lines(&self) -> Result<Vec<String>, StorageError> {
        Ok(read_optional(&self.path)?
            .map(|raw| {
                raw.lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn write_lines(&self, lines: &[String]) -> Result<(), StorageError> {
        ensure_parent(&self.path)?;
        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs::write(&self.path, body).map_err(|e| io_err(&self.path, e))
    }

    fn format_cookie(&self, id: &str, now: DateTime<Utc>) -> String {
        let expires = (now + self.lifetime).format(COOKIE_DATE_FORMAT);
        format!(
            "{}={}; Expires={}; Path=/; SameSite=Strict",
            SESSION_KEY, id, expires
        )
    }
}

/// Parsed view of a single cookie line.
#[derive(Debug, PartialEq)]
struct CookieLine<'a> {
    name: &'a str,
    value: &'a str,
    expires: Option<DateTime<Utc>>,
}

/// Parse an `Expires` attribute. Anything unreadable counts as already expired.
fn parse_expires(raw: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(raw, COOKIE_DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc2822(raw).map(|dt| dt.with_timezone(&Utc)))
        .unwrap_or_else(|e| {
            tracing::warn!(
                expires = raw,
                error = %e,
                "Unreadable cookie expiry, treating as expired"
            );
            DateTime::<Utc>::MIN_UTC
        })
}

fn parse_cookie_line(line: &str) -> Option<CookieLine<'_>> {
    let mut parts = line.split(';').map(str::trim);
    let (name, value) = parts.next()?.split_once('=')?;
    let expires = parts
        .filter_map(|attr| attr.split_once('='))
        .find(|(k, _)| k.eq_ignore_ascii_case("expires"))
        .map(|(_, v)| parse_expires(v));
    Some(CookieLine {
        name: name.trim(),
        value: value.trim(),
        expires,
    })
}

impl SessionStore for CookieJarStore {
    fn name(&self) -> &str {
        "cookie"
    }

    fn load(&self) -> Result<Option<String>, StorageError> {
        let now = Utc::now();
        let value = self
            .lines()?
            .iter()
            .filter_map(|l| parse_cookie_line(l))
            .find(|c| c.name == SESSION_KEY)
            .filter(|c| c.expires.map_or(true, |exp| exp > now))
            .map(|c| c.value.to_string())
            .filter(|v| !v.is_empty());
        Ok(value)
    }

    fn save(&self, id: &str) -> Result<(), StorageError> {
        let mut lines: Vec<String> = self
            .lines()?
            .into_iter()
            .filter(|l| parse_cookie_line(l).map_or(true, |c| c.name != SESSION_KEY))
            .collect();
        lines.push(self.format_cookie(id, Utc::now()));
        self.write_lines(&lines)
    }

    fn clear(&self) -> Result<(), StorageError> {
        let lines = self.lines()?;
        let kept: Vec<String> = lines
            .iter()
            .filter(|l| parse_cookie_line(l).map_or(true, |c| c.name != SESSION_KEY))
            .cloned()
            .collect();
        if kept.len() != lines.len() {
            self.write_lines(&kept)?;
        }
        Ok(())
    }
}

// ============================================================================
// Identifier generation
// ============================================================================

fn to_base36(mut n: u128) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Synthesize a fresh identifier: base-36 timestamp + base-36 random suffix.
pub fn generate_session_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u128;
    let random = to_base36(uuid::Uuid::new_v4().as_u128());
    let suffix: String = random.chars().rev().take(RANDOM_SUFFIX_LEN).collect();
    format!("{}{}", to_base36(millis), suffix)
}

// ============================================================================
// SessionIdentity
// ============================================================================

/// Resolves the per-visitor identifier across an ordered list of stores.
pub struct SessionIdentity {
    stores: Vec<Box<dyn SessionStore>>,
    cached: Mutex<Option<String>>,
}

impl SessionIdentity {
    pub fn new(stores: Vec<Box<dyn SessionStore>>) -> Self {
        Self {
            stores,
            cached: Mutex::new(None),
        }
    }

    /// Build the store list for the configured profile.
    pub fn from_config(config: &SessionConfig) -> Result<Self, StorageError> {
        let mut stores: Vec<Box<dyn SessionStore>> = Vec::new();
        if let Some(lifetime) = config.profile.cookie_lifetime() {
            stores.push(Box::new(CookieJarStore::new(
                expand_path(&config.cookie_path)?,
                lifetime,
            )));
        }
        stores.push(Box::new(LocalStore::new(expand_path(
            &config.local_store_path,
        )?)));
        Ok(Self::new(stores))
    }

    /// Return the identifier, creating and persisting one on first use.
    ///
    /// Never fails: unreadable or unwritable stores are logged and skipped.
    pub fn get_or_create(&self) -> String {
        let mut cached = lock(&self.cached);
        if let Some(id) = cached.as_ref() {
            return id.clone();
        }

        let id = match self.find() {
            Some((id, found_at)) => {
                for (i, store) in self.stores.iter().enumerate() {
                    if i != found_at {
                        self.backfill(store.as_ref(), &id);
                    }
                }
                id
            }
            None => {
                let id = generate_session_id();
                tracing::info!(session_id = %id, "Created new session identifier");
                for store in &self.stores {
                    if let Err(e) = store.save(&id) {
                        tracing::warn!(store = store.name(), error = %e, "Failed to persist session id");
                    }
                }
                id
            }
        };

        *cached = Some(id.clone());
        id
    }

    /// Read the identifier without creating one.
    pub fn current(&self) -> Option<String> {
        if let Some(id) = lock(&self.cached).as_ref() {
            return Some(id.clone());
        }
        self.find().map(|(id, _)| id)
    }

    /// Forget the identifier everywhere; the next call synthesizes a new one.
    pub fn reset(&self) -> Result<(), StorageError> {
        *lock(&self.cached) = None;
        let mut first_err = None;
        for store in &self.stores {
            if let Err(e) = store.clear() {
                tracing::warn!(store = store.name(), error = %e, "Failed to clear session id");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn store_names(&self) -> Vec<&str> {
        self.stores.iter().map(|s| s.name()).collect()
    }

    fn find(&self) -> Option<(String, usize)> {
        self.stores.iter().enumerate().find_map(|(i, store)| match store.load() {
            Ok(Some(id)) => {
                tracing::debug!(store = store.name(), "Found existing session id");
                Some((id, i))
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(store = store.name(), error = %e, "Failed to read session id");
                None
            }
        })
    }

    fn backfill(&self, store: &dyn SessionStore, id: &str) {
        match store.load() {
            Ok(Some(existing)) if existing == id => {}
            _ => {
                if let Err(e) = store.save(id) {
                    tracing::warn!(store = store.name(), error = %e, "Failed to backfill session id");
                } else {
                    tracing::debug!(store = store.name(), "Backfilled session id");
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;

    fn memory_identity() -> (SessionIdentity, MemoryStore, MemoryStore) {
        let primary = MemoryStore::new();
        let fallback = MemoryStore::new();
        let identity = SessionIdentity::new(vec![
            Box::new(primary.clone()),
            Box::new(fallback.clone()),
        ]);
        (identity, primary, fallback)
    }

    #[test]
    fn test_generated_id_is_lowercase_base36() {
        let id = generate_session_id();
        assert!(id.len() > RANDOM_SUFFIX_LEN);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(id, generate_session_id());
    }

    #[test]
    fn test_to_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_295), "zz");
    }

    #[test]
    fn test_get_or_create_is_idempotent_and_writes_all_stores() {
        let (identity, primary, fallback) = memory_identity();
        let first = identity.get_or_create();
        let second = identity.get_or_create();
        assert_eq!(first, second);
        assert_eq!(primary.value().as_deref(), Some(first.as_str()));
        assert_eq!(fallback.value().as_deref(), Some(first.as_str()));
    }

    #[test]
    fn test_same_storage_scope_survives_new_process() {
        let (identity, primary, fallback) = memory_identity();
        let id = identity.get_or_create();

        // A second manager over the same stores models a page reload.
        let reloaded = SessionIdentity::new(vec![Box::new(primary), Box::new(fallback)]);
        assert_eq!(reloaded.get_or_create(), id);
    }

    #[test]
    fn test_cleared_storage_yields_new_id() {
        let (identity, primary, fallback) = memory_identity();
        let id = identity.get_or_create();

        identity.reset().unwrap();
        assert!(primary.value().is_none());
        assert!(fallback.value().is_none());
        assert!(identity.current().is_none());

        let fresh = identity.get_or_create();
        assert_ne!(fresh, id);
    }

    #[test]
    fn test_fallback_value_is_backfilled_into_primary() {
        let primary = MemoryStore::new();
        let fallback = MemoryStore::with_value("abc123");
        let identity = SessionIdentity::new(vec![
            Box::new(primary.clone()),
            Box::new(fallback.clone()),
        ]);

        assert_eq!(identity.get_or_create(), "abc123");
        assert_eq!(primary.value().as_deref(), Some("abc123"));
    }

    #[test]
    fn test_primary_wins_over_fallback() {
        let primary = MemoryStore::with_value("from-cookie");
        let fallback = MemoryStore::with_value("from-local");
        let identity = SessionIdentity::new(vec![
            Box::new(primary.clone()),
            Box::new(fallback.clone()),
        ]);

        assert_eq!(identity.get_or_create(), "from-cookie");
        assert_eq!(fallback.value().as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_local_store_round_trip_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("local.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"theme":"dark"}"#).unwrap();

        let store = LocalStore::new(&path);
        assert_eq!(store.load().unwrap(), None);
        store.save("xyz").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("xyz"));

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"theme\""));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_local_store_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        fs::write(&path, "not json").unwrap();

        let store = LocalStore::new(&path);
        assert!(matches!(store.load(), Err(StorageError::Malformed { .. })));
    }

    #[test]
    fn test_malformed_local_store_is_rewritten_and_id_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l.json");
        fs::write(&path, "not json").unwrap();
        let config = SessionConfig {
            profile: Profile::V1,
            cookie_path: dir.path().join("c.txt").display().to_string(),
            local_store_path: path.display().to_string(),
        };

        let first = SessionIdentity::from_config(&config).unwrap().get_or_create();
        let second = SessionIdentity::from_config(&config).unwrap().get_or_create();
        assert_eq!(first, second);
        assert_eq!(
            LocalStore::new(&path).load().unwrap().as_deref(),
            Some(first.as_str())
        );
    }

    #[test]
    fn test_clear_on_malformed_local_store_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l.json");
        fs::write(&path, "{broken").unwrap();

        let store = LocalStore::new(&path);
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_cookie_store_writes_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        let store = CookieJarStore::new(&path, Duration::days(365));

        store.save("abc").unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("chat_bubble_session_id=abc;"));
        assert!(raw.contains("Path=/"));
        assert!(raw.contains("SameSite=Strict"));
        assert!(raw.contains("Expires="));
        assert_eq!(store.load().unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn test_cookie_store_ignores_expired_cookie_and_keeps_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        fs::write(
            &path,
            "other=1; Path=/\nchat_bubble_session_id=old; Expires=Mon, 01 Jan 2001 00:00:00 GMT; Path=/\n",
        )
        .unwrap();

        let store = CookieJarStore::new(&path, Duration::days(365));
        assert_eq!(store.load().unwrap(), None);

        store.save("new").unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("other=1; Path=/"));
        assert!(!raw.contains("=old"));
        assert_eq!(store.load().unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn test_parse_cookie_line() {
        let parsed =
            parse_cookie_line("chat_bubble_session_id=v1; Expires=Tue, 02 Jan 2035 03:04:05 GMT")
                .unwrap();
        assert_eq!(parsed.name, SESSION_KEY);
        assert_eq!(parsed.value, "v1");
        assert_eq!(
            parsed.expires.unwrap().to_rfc3339(),
            "2035-01-02T03:04:05+00:00"
        );
        assert!(parse_cookie_line("garbage").is_none());
    }

    #[test]
    fn test_unreadable_expiry_counts_as_expired() {
        let parsed = parse_cookie_line("chat_bubble_session_id=v1; Expires=next tuesday").unwrap();
        assert!(parsed.expires.unwrap() < Utc::now());

        let rfc =
            parse_cookie_line("chat_bubble_session_id=v1; Expires=Tue, 2 Jan 2035 03:04:05 +0000")
                .unwrap();
        assert_eq!(
            rfc.expires.unwrap().to_rfc3339(),
            "2035-01-02T03:04:05+00:00"
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        fs::write(&path, "chat_bubble_session_id=stale; Expires=not-a-date; Path=/\n").unwrap();
        let store = CookieJarStore::new(&path, Duration::days(365));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_from_config_respects_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SessionConfig {
            profile: Profile::V2,
            cookie_path: dir.path().join("c.txt").display().to_string(),
            local_store_path: dir.path().join("l.json").display().to_string(),
        };
        let v2 = SessionIdentity::from_config(&config).unwrap();
        assert_eq!(v2.store_names(), vec!["cookie", "local_store"]);

        config.profile = Profile::V1;
        let v1 = SessionIdentity::from_config(&config).unwrap();
        assert_eq!(v1.store_names(), vec!["local_store"]);
    }

    #[test]
    fn test_file_backed_identity_backfills_cookie() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            profile: Profile::V2,
            cookie_path: dir.path().join("c.txt").display().to_string(),
            local_store_path: dir.path().join("l.json").display().to_string(),
        };
        LocalStore::new(dir.path().join("l.json")).save("legacy").unwrap();

        let identity = SessionIdentity::from_config(&config).unwrap();
        assert_eq!(identity.get_or_create(), "legacy");

        let cookie = CookieJarStore::new(dir.path().join("c.txt"), Duration::days(1));
        assert_eq!(cookie.load().unwrap().as_deref(), Some("legacy"));
    }
}
