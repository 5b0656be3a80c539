//! Credential persistence.
//!
//! A [`CredentialStore`] holds four named entries (see [`Key`]) and nothing
//! else. It has no knowledge of expiry or refresh; that logic lives in
//! [`auth`](crate::auth). Multi-key updates go through
//! [`CredentialStore::update`], which applies all changes at once so that a
//! concurrent reader never observes a new access token next to an old
//! expiry.
//!
//! Two implementations are provided:
//! * [`MemoryStore`] for the lifetime of the process
//! * [`FileStore`], a TOML file that survives restarts
//!
//! # File Format
//!
//! ```toml
//! access_token = "BQD..."
//! refresh_token = "AQC..."
//! expires_at = "1767225600000"
//! ```

use std::{
    collections::BTreeMap,
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::error::Result;

/// Names of the persisted entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    AccessToken,
    RefreshToken,
    /// Absolute expiry in milliseconds since the Unix epoch
    ExpiresAt,
    /// Transient PKCE verifier, only present during a pending login
    CodeVerifier,
}

impl Key {
    pub const ALL: [Key; 4] = [
        Key::AccessToken,
        Key::RefreshToken,
        Key::ExpiresAt,
        Key::CodeVerifier,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Key::AccessToken => "access_token",
            Key::RefreshToken => "refresh_token",
            Key::ExpiresAt => "expires_at",
            Key::CodeVerifier => "code_verifier",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single change: `Some` writes the value, `None` removes the entry.
pub type Change<'a> = (Key, Option<&'a str>);

/// Key/value storage boundary for credentials.
pub trait CredentialStore: Send + Sync {
    /// Reads an entry.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backing medium cannot be read.
    fn get(&self, key: Key) -> Result<Option<String>>;

    /// Applies all `changes` atomically.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backing medium cannot be written. In
    /// that case none of the changes are visible.
    fn update(&self, changes: &[Change<'_>]) -> Result<()>;

    fn set(&self, key: Key, value: &str) -> Result<()> {
        self.update(&[(key, Some(value))])
    }

    fn remove(&self, key: Key) -> Result<()> {
        self.update(&[(key, None)])
    }

    /// Reads and removes an entry in one step.
    fn take(&self, key: Key) -> Result<Option<String>>;
}

fn apply(entries: &mut BTreeMap<Key, String>, changes: &[Change<'_>]) {
    for (key, value) in changes {
        match value {
            Some(value) => {
                entries.insert(*key, (*value).to_owned());
            }
            None => {
                entries.remove(key);
            }
        }
    }
}

/// Store that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<Key, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: Key) -> Result<Option<String>> {
        Ok(self.entries.lock()?.get(&key).cloned())
    }

    fn update(&self, changes: &[Change<'_>]) -> Result<()> {
        apply(&mut *self.entries.lock()?, changes);
        Ok(())
    }

    fn take(&self, key: Key) -> Result<Option<String>> {
        Ok(self.entries.lock()?.remove(&key))
    }
}

/// Store persisted to a TOML file.
///
/// The file is read once on open and rewritten on every update through a
/// temporary file and a rename, so that a crash never leaves a half-written
/// file behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<Key, String>>,
}

impl FileStore {
    /// Prevent out-of-memory condition: session files should be small.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Opens the store at `path`, starting empty when the file does not exist.
    ///
    /// Unknown entries in the file are ignored.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the file exists but cannot be read, is too large
    /// or is not valid TOML.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut entries = BTreeMap::new();
        if path.exists() {
            if fs::metadata(&path)?.len() > Self::MAX_FILE_SIZE {
                return Err(crate::error::Error::invalid_data(format!(
                    "{} is too large",
                    path.display()
                )));
            }

            let contents = fs::read_to_string(&path)?;
            let table: BTreeMap<String, String> = toml::from_str(&contents)?;
            for (name, value) in table {
                match Key::from_name(&name) {
                    Some(key) => {
                        entries.insert(key, value);
                    }
                    None => warn!("{}: ignoring unknown entry {name}", path.display()),
                }
            }
        }

        debug!("opened session file {}", path.display());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<Key, String>) -> Result<()> {
        let table: BTreeMap<&str, &str> = entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        let contents = toml::to_string(&table)?;

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            // Owner only: the file holds bearer and refresh tokens.
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                file.set_permissions(fs::Permissions::from_mode(0o600))?;
            }
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: Key) -> Result<Option<String>> {
        Ok(self.entries.lock()?.get(&key).cloned())
    }

    fn update(&self, changes: &[Change<'_>]) -> Result<()> {
        let mut entries = self.entries.lock()?;

        let mut next = entries.clone();
        apply(&mut next, changes);
        self.persist(&next)?;

        *entries = next;
        Ok(())
    }

    fn take(&self, key: Key) -> Result<Option<String>> {
        let mut entries = self.entries.lock()?;
        if !entries.contains_key(&key) {
            return Ok(None);
        }

        let mut next = entries.clone();
        let value = next.remove(&key);
        self.persist(&next)?;

        *entries = next;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_update_is_all_or_nothing() {
        let store = MemoryStore::new();
        store
            .update(&[
                (Key::AccessToken, Some("A")),
                (Key::RefreshToken, Some("R")),
                (Key::ExpiresAt, Some("1000")),
            ])
            .unwrap();

        assert_eq!(store.get(Key::AccessToken).unwrap().as_deref(), Some("A"));
        assert_eq!(store.get(Key::ExpiresAt).unwrap().as_deref(), Some("1000"));

        store
            .update(&[(Key::AccessToken, None), (Key::ExpiresAt, None)])
            .unwrap();
        assert_eq!(store.get(Key::AccessToken).unwrap(), None);
        assert_eq!(store.get(Key::RefreshToken).unwrap().as_deref(), Some("R"));
    }

    #[test]
    fn take_removes_entry() {
        let store = MemoryStore::new();
        store.set(Key::CodeVerifier, "verifier").unwrap();

        assert_eq!(
            store.take(Key::CodeVerifier).unwrap().as_deref(),
            Some("verifier")
        );
        assert_eq!(store.take(Key::CodeVerifier).unwrap(), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");

        {
            let store = FileStore::open(&path).unwrap();
            store
                .update(&[
                    (Key::AccessToken, Some("A")),
                    (Key::RefreshToken, Some("R")),
                    (Key::CodeVerifier, Some("V")),
                ])
                .unwrap();
            store.remove(Key::CodeVerifier).unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get(Key::AccessToken).unwrap().as_deref(), Some("A"));
        assert_eq!(store.get(Key::RefreshToken).unwrap().as_deref(), Some("R"));
        assert_eq!(store.get(Key::CodeVerifier).unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_private_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        let store = FileStore::open(&path).unwrap();
        store.set(Key::AccessToken, "A").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn file_store_ignores_unknown_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        fs::write(&path, "access_token = \"A\"\ntheme = \"dark\"\n").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get(Key::AccessToken).unwrap().as_deref(), Some("A"));
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("absent.toml")).unwrap();
        for key in Key::ALL {
            assert_eq!(store.get(key).unwrap(), None);
        }
    }
}
