//! File-per-user conversation history.
//!
//! Each username maps to `chat_history_<username>.json` inside the store
//! directory, holding a JSON array of `{"role", "content"}` objects. A save
//! always replaces the whole record; there is no append or merge.

pub mod models;

use models::{ConversationHistory, Message, StoredMessage};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const RECORD_PREFIX: &str = "chat_history_";
const RECORD_EXTENSION: &str = "json";
const TEMP_PREFIX: &str = ".chat_history_";
const TEMP_SUFFIX: &str = ".tmp";

/// Longest encoded username that still leaves a portable file name.
const MAX_ENCODED_USERNAME: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid username {0:?}")]
    InvalidUsername(String),
    #[error("Malformed history record {}: {source}", path.display())]
    MalformedRecord {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Cannot read history record {}: {source}", path.display())]
    Unreadable { path: PathBuf, source: io::Error },
    #[error("Failed to persist history record {}: {source}", path.display())]
    PersistenceFailure { path: PathBuf, source: io::Error },
}

/// Durable username -> history mapping. Holds nothing but its directory.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::PersistenceFailure {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Path of the backing record for `username`, whether or not it exists.
    pub fn record_path(&self, username: &str) -> Result<PathBuf, StoreError> {
        Ok(self.dir.join(record_file_name(username)?))
    }

    /// Read the stored history. A user with no record yet has an empty history.
    ///
    /// Entries with a role other than `user` or `assistant` are skipped.
    pub fn load(&self, username: &str) -> Result<ConversationHistory, StoreError> {
        let path = self.record_path(username)?;

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(username, path = %path.display(), "no history record yet");
                return Ok(Vec::new());
            }
            Err(source) => return Err(StoreError::Unreadable { path, source }),
        };

        let stored: Vec<StoredMessage> = match serde_json::from_slice(&bytes) {
            Ok(stored) => stored,
            Err(source) => return Err(StoreError::MalformedRecord { path, source }),
        };

        let history: ConversationHistory = stored
            .into_iter()
            .filter_map(|entry| match entry.into_message() {
                Ok(message) => Some(message),
                Err(role) => {
                    debug!(username, role = role.as_str(), "skipping entry with unknown role");
                    None
                }
            })
            .collect();

        info!(username, messages = history.len(), "history loaded");
        Ok(history)
    }

    /// Replace the stored history for `username` with `history`.
    ///
    /// The record is written to a temporary file next to it and renamed into
    /// place, so a reader sees either the previous record or the new one.
    pub fn save(&self, username: &str, history: &[Message]) -> Result<(), StoreError> {
        let path = self.record_path(username)?;

        let json = serde_json::to_vec_pretty(history).map_err(|e| {
            StoreError::PersistenceFailure {
                path: path.clone(),
                source: io::Error::other(e),
            }
        })?;

        if let Err(source) = write_atomically(&self.dir, &path, &json) {
            return Err(StoreError::PersistenceFailure { path, source });
        }

        info!(username, messages = history.len(), path = %path.display(), "history saved");
        Ok(())
    }
}

fn write_atomically(dir: &Path, path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir)
}

/// Make the rename itself durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Percent-encode the username so distinct names never share a file name and
/// no name can contain a path separator. Plain names stay readable. Case is
/// kept, so `Alice` and `alice` only stay apart on case-sensitive filesystems.
fn record_file_name(username: &str) -> Result<String, StoreError> {
    if username.is_empty() {
        return Err(StoreError::InvalidUsername(username.to_string()));
    }
    let encoded = urlencoding::encode(username);
    if encoded.len() > MAX_ENCODED_USERNAME {
        return Err(StoreError::InvalidUsername(username.to_string()));
    }
    Ok(format!("{RECORD_PREFIX}{encoded}.{RECORD_EXTENSION}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    #[test]
    fn plain_usernames_keep_their_file_name() {
        assert_eq!(record_file_name("alice").unwrap(), "chat_history_alice.json");
        assert_eq!(
            record_file_name("bob_smith-2").unwrap(),
            "chat_history_bob_smith-2.json"
        );
    }

    #[test]
    fn path_separators_are_encoded() {
        let name = record_file_name("../../etc/passwd").unwrap();
        assert!(!name.contains('/'));
        assert_eq!(name, "chat_history_..%2F..%2Fetc%2Fpasswd.json");

        let name = record_file_name("a\\b").unwrap();
        assert!(!name.contains('\\'));
    }

    #[test]
    fn encoding_keeps_distinct_usernames_apart() {
        // Lossy sanitizing would map both of these to "a_b".
        let slash = record_file_name("a/b").unwrap();
        let underscore = record_file_name("a_b").unwrap();
        let literal = record_file_name("a%2Fb").unwrap();
        assert_ne!(slash, underscore);
        assert_ne!(slash, literal);
    }

    #[test]
    fn case_is_preserved_in_file_names() {
        assert_eq!(record_file_name("Alice").unwrap(), "chat_history_Alice.json");
        assert_ne!(
            record_file_name("Alice").unwrap(),
            record_file_name("alice").unwrap()
        );
    }

    #[test]
    fn empty_and_oversized_usernames_are_rejected() {
        assert!(matches!(
            record_file_name(""),
            Err(StoreError::InvalidUsername(_))
        ));
        let long = "x".repeat(MAX_ENCODED_USERNAME + 1);
        assert!(matches!(
            record_file_name(&long),
            Err(StoreError::InvalidUsername(_))
        ));
        assert!(record_file_name(&"x".repeat(MAX_ENCODED_USERNAME)).is_ok());
    }

    #[test]
    fn new_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        let store = ConversationStore::new(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(
            store.record_path("alice").unwrap(),
            nested.join("chat_history_alice.json")
        );
    }

    #[test]
    fn save_writes_indented_array() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConversationStore::new(temp_dir.path()).unwrap();

        store
            .save("alice", &[Message::user("hi"), Message::assistant("hello")])
            .unwrap();

        let written = std::fs::read_to_string(store.record_path("alice").unwrap()).unwrap();
        let expected = "[\n  {\n    \"role\": \"user\",\n    \"content\": \"hi\"\n  },\n  {\n    \"role\": \"assistant\",\n    \"content\": \"hello\"\n  }\n]";
        assert_eq!(written, expected);
    }

    #[test]
    fn save_leaves_no_temporary_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConversationStore::new(temp_dir.path()).unwrap();

        store.save("alice", &[Message::user("hi")]).unwrap();
        store.save("alice", &[Message::user("hi again")]).unwrap();

        let names: Vec<String> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["chat_history_alice.json".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn saved_record_is_private_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let store = ConversationStore::new(temp_dir.path()).unwrap();
        store.save("alice", &[Message::user("hi")]).unwrap();

        let mode = std::fs::metadata(store.record_path("alice").unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn record_that_is_a_directory_is_unreadable() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConversationStore::new(temp_dir.path()).unwrap();
        std::fs::create_dir(store.record_path("alice").unwrap()).unwrap();

        assert!(matches!(
            store.load("alice"),
            Err(StoreError::Unreadable { .. })
        ));
    }

    #[test]
    fn save_into_removed_directory_is_a_persistence_failure() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("gone");
        let store = ConversationStore::new(&dir).unwrap();
        std::fs::remove_dir(&dir).unwrap();

        let err = store.save("alice", &[Message::user("hi")]).unwrap_err();
        assert!(matches!(err, StoreError::PersistenceFailure { .. }));
    }

    #[test]
    #[traced_test]
    fn skipped_roles_are_logged() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConversationStore::new(temp_dir.path()).unwrap();
        std::fs::write(
            store.record_path("alice").unwrap(),
            r#"[{"role": "system", "content": "be brief"}]"#,
        )
        .unwrap();

        assert!(store.load("alice").unwrap().is_empty());
        assert!(logs_contain("skipping entry with unknown role"));
    }
}
