//! Persistent storage of the session credentials.
//!
//! The session is three fixed entries: the access token, the refresh token
//! and the user record as JSON text. Backends only need to be a synchronous
//! string key-value store; `TokenStore` layers the session semantics on top
//! and turns every backend failure into a missing value.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use keyring::credential::CredentialPersistence;
use keyring::Entry;
use tracing::{debug, warn};

use crate::models::User;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_KEY: &str = "user";

const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

/// Session file name in cache directory
pub const SESSION_FILE: &str = "session.json";

/// Keychain service name for `KeyringStore`
const SERVICE_NAME: &str = "lkforum";

/// A synchronous string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Write several entries. Backends that can do this in one update should.
    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

// ============================================================================
// Backends
// ============================================================================

/// In-process store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory store lock poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// JSON object file holding all entries, re-read on every access so that
/// several processes sharing the file see each other's writes.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at `<dir>/session.json`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents =
            std::fs::read_to_string(&self.path).context("Failed to read session file")?;
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&contents).context("Failed to parse session file")
    }

    /// Replace the file contents in one rename
    fn write(&self, entries: &HashMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).context("Failed to remove session file")?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        write_private(&tmp, contents.as_bytes()).context("Failed to write session file")?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace session file")?;
        Ok(())
    }
}

/// Write a file readable by the owner only. The mode is reset on an existing
/// file too, since `mode()` only applies when the file is created.
#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key, value)])
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.remove_many(&[key])
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut map = self.load().unwrap_or_else(|e| {
            warn!(error = %e, "Discarding unreadable session file");
            HashMap::new()
        });
        for (key, value) in entries {
            map.insert(key.to_string(), value.to_string());
        }
        self.write(&map)
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let mut map = self.load().unwrap_or_default();
        for key in keys {
            map.remove(*key);
        }
        self.write(&map)
    }
}

/// One OS keychain entry per key
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Whether the active credential store keeps entries beyond the `Entry`
    /// that wrote them. False when keyring fell back to its mock store.
    pub fn is_persistent() -> bool {
        !matches!(
            keyring::default::default_credential_builder().persistence(),
            CredentialPersistence::EntryOnly
        )
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve value from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store value in keychain")
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete value from keychain"),
        }
    }
}

// ============================================================================
// Session view
// ============================================================================

/// The persisted session: access token, refresh token and user record.
/// Clone is cheap and clones share the backend.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    pub fn new(backend: impl KeyValueStore + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn from_arc(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.backend.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Session storage read failed");
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        if let Err(e) = self.backend.set(key, value) {
            warn!(key, error = %e, "Session storage write failed");
        }
    }

    fn remove(&self, key: &str) {
        if let Err(e) = self.backend.remove(key) {
            warn!(key, error = %e, "Session storage delete failed");
        }
    }

    // ===== Access token =====

    pub fn set_access_token(&self, token: &str) {
        self.write(ACCESS_TOKEN_KEY, token);
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(ACCESS_TOKEN_KEY)
    }

    pub fn clear_access_token(&self) {
        self.remove(ACCESS_TOKEN_KEY);
    }

    // ===== Refresh token =====

    pub fn set_refresh_token(&self, token: &str) {
        self.write(REFRESH_TOKEN_KEY, token);
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY)
    }

    pub fn clear_refresh_token(&self) {
        self.remove(REFRESH_TOKEN_KEY);
    }

    // ===== User =====

    pub fn set_user(&self, user: &User) {
        match serde_json::to_string(user) {
            Ok(text) => self.write(USER_KEY, &text),
            Err(e) => warn!(error = %e, "Failed to serialize user record"),
        }
    }

    /// Stored user record; unparsable text reads as no user
    pub fn user(&self) -> Option<User> {
        let text = self.read(USER_KEY)?;
        match serde_json::from_str(&text) {
            Ok(user) => Some(user),
            Err(e) => {
                debug!(error = %e, "Stored user record is not valid JSON");
                None
            }
        }
    }

    pub fn clear_user(&self) {
        self.remove(USER_KEY);
    }

    // ===== Whole session =====

    /// Whether an access token is stored, expired or not
    pub fn is_logged_in(&self) -> bool {
        self.access_token().is_some()
    }

    /// Store the token pair after a refresh in one backend update
    pub fn save_tokens(&self, access_token: &str, refresh_token: &str) {
        let entries = [
            (ACCESS_TOKEN_KEY, access_token),
            (REFRESH_TOKEN_KEY, refresh_token),
        ];
        if let Err(e) = self.backend.set_many(&entries) {
            warn!(error = %e, "Session storage write failed");
        }
    }

    /// Store all three session values in one backend update
    pub fn save_session(&self, access_token: &str, refresh_token: &str, user: &User) {
        let user_text = match serde_json::to_string(user) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to serialize user record");
                return;
            }
        };
        let entries = [
            (ACCESS_TOKEN_KEY, access_token),
            (REFRESH_TOKEN_KEY, refresh_token),
            (USER_KEY, user_text.as_str()),
        ];
        if let Err(e) = self.backend.set_many(&entries) {
            warn!(error = %e, "Session storage write failed");
        }
    }

    pub fn clear_all(&self) {
        if let Err(e) = self.backend.remove_many(&SESSION_KEYS) {
            warn!(error = %e, "Session storage delete failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn alice() -> User {
        User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            email: Some("alice@example.com".to_string()),
            role: Role::User,
        }
    }

    /// Backend where every operation fails
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(anyhow::anyhow!("disk on fire"))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(anyhow::anyhow!("disk on fire"))
        }

        fn remove(&self, _key: &str) -> Result<()> {
            Err(anyhow::anyhow!("disk on fire"))
        }
    }

    #[test]
    fn test_set_get_clear_each_value() {
        let store = TokenStore::in_memory();
        assert_eq!(store.access_token(), None);
        assert!(!store.is_logged_in());

        store.set_access_token("a1");
        store.set_refresh_token("r1");
        store.set_user(&alice());
        assert_eq!(store.access_token().as_deref(), Some("a1"));
        assert_eq!(store.refresh_token().as_deref(), Some("r1"));
        assert_eq!(store.user(), Some(alice()));
        assert!(store.is_logged_in());

        store.clear_access_token();
        assert_eq!(store.access_token(), None);
        assert_eq!(store.refresh_token().as_deref(), Some("r1"));

        store.clear_refresh_token();
        store.clear_user();
        assert_eq!(store.refresh_token(), None);
        assert_eq!(store.user(), None);
    }

    #[test]
    fn test_corrupt_user_record_reads_as_missing() {
        let backend = Arc::new(MemoryStore::new());
        backend.set(USER_KEY, "{not json").unwrap();
        let store = TokenStore::from_arc(backend);
        assert_eq!(store.user(), None);
    }

    #[test]
    fn test_backend_failure_reads_as_missing() {
        let store = TokenStore::new(BrokenStore);
        store.save_session("a1", "r1", &alice());
        store.set_access_token("a1");
        assert_eq!(store.access_token(), None);
        assert_eq!(store.refresh_token(), None);
        assert_eq!(store.user(), None);
        store.clear_all();
    }

    #[test]
    fn test_clones_share_backend() {
        let store = TokenStore::in_memory();
        let other = store.clone();
        store.save_session("a1", "r1", &alice());
        assert_eq!(other.access_token().as_deref(), Some("a1"));
        other.clear_all();
        assert_eq!(store.user(), None);
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(FileStore::in_dir(dir.path()));
        store.save_session("a1", "r1", &alice());

        let reopened = TokenStore::new(FileStore::in_dir(dir.path()));
        assert_eq!(reopened.access_token().as_deref(), Some("a1"));
        assert_eq!(reopened.refresh_token().as_deref(), Some("r1"));
        assert_eq!(reopened.user(), Some(alice()));

        let on_disk = std::fs::read_to_string(dir.path().join(SESSION_FILE)).unwrap();
        let map: HashMap<String, String> = serde_json::from_str(&on_disk).unwrap();
        assert_eq!(map.len(), 3);
        assert!(!dir.path().join("session.json.tmp").exists());
    }

    #[test]
    fn test_file_store_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(FileStore::in_dir(dir.path()));
        store.save_session("a1", "r1", &alice());
        store.clear_all();
        assert!(!dir.path().join(SESSION_FILE).exists());
        assert_eq!(store.access_token(), None);
    }

    #[test]
    fn test_file_store_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("cache").join("lkforum");
        let store = FileStore::in_dir(&nested);
        store.set(ACCESS_TOKEN_KEY, "a1").unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("a1"));
    }

    #[test]
    fn test_file_store_recovers_from_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SESSION_FILE), "garbage").unwrap();
        let store = TokenStore::new(FileStore::in_dir(dir.path()));
        assert_eq!(store.access_token(), None);

        store.save_tokens("a2", "r2");
        assert_eq!(store.access_token().as_deref(), Some("a2"));
        assert_eq!(store.refresh_token().as_deref(), Some("r2"));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        // A stale temp file left with the default umask
        let tmp = dir.path().join("session.json.tmp");
        std::fs::write(&tmp, "{}").unwrap();
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = TokenStore::new(FileStore::in_dir(dir.path()));
        store.save_session("a1", "r1", &alice());

        let mode = std::fs::metadata(dir.path().join(SESSION_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);

        store.save_tokens("a2", "r2");
        let mode = std::fs::metadata(dir.path().join(SESSION_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_keyring_backend_is_persistent() {
        // The mock store forgets every value once its Entry is dropped
        assert!(KeyringStore::is_persistent());
    }

    #[test]
    #[ignore = "needs an unlocked OS keychain"]
    fn test_keyring_store_round_trip() {
        let store = TokenStore::new(KeyringStore::with_service("lkforum-test"));
        store.save_session("a1", "r1", &alice());

        let reopened = TokenStore::new(KeyringStore::with_service("lkforum-test"));
        assert_eq!(reopened.access_token().as_deref(), Some("a1"));
        assert_eq!(reopened.refresh_token().as_deref(), Some("r1"));
        assert_eq!(reopened.user(), Some(alice()));

        reopened.clear_all();
        assert_eq!(store.access_token(), None);
    }
}
