//! Session persistence.
//!
//! The controller only needs `save`, `load`, `load_all` and `load_range`.
//! [`JsonSessionStore`] keeps every session in one versioned JSON file:
//!
//! ```json
//! {
//!   "version": 1,
//!   "sessions": {
//!     "01J...": { ... Session fields ... }
//!   }
//! }
//! ```
//!
//! Empty or corrupt files load as an empty store with a warning, so a damaged
//! history never blocks a new session. Before the first write over a corrupt
//! file, the file is renamed to `<name>.corrupt-<timestamp>` so nothing is lost.
//! Writes go through a temp file and a rename so readers never observe a
//! partial file.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::StoreError;
use crate::session::Session;

const STORE_VERSION: u32 = 1;
const DEFAULT_STORE_RELATIVE_PATH: &str = ".mindful/sessions.json";

pub trait SessionStore: Send + Sync {
    /// Inserts or replaces the session with the same id.
    fn save(&self, session: &Session) -> Result<(), StoreError>;

    fn load(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    /// Every stored session, newest start first.
    fn load_all(&self) -> Result<Vec<Session>, StoreError>;

    /// Sessions whose start falls inside `[start, end]`, newest first.
    fn load_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|s| s.start_date() >= start && s.start_date() <= end)
            .collect())
    }

    fn delete(&self, session_id: &str) -> Result<bool, StoreError>;
}

pub fn default_store_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_STORE_RELATIVE_PATH))
}

fn newest_first(sessions: impl IntoIterator<Item = Session>) -> Vec<Session> {
    let mut sessions: Vec<Session> = sessions.into_iter().collect();
    sessions.sort_by(|a, b| b.start_date().cmp(&a.start_date()));
    sessions
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    sessions: BTreeMap<String, Session>,
}

impl Default for StoreFile {
    fn default() -> Self {
        StoreFile {
            version: STORE_VERSION,
            sessions: BTreeMap::new(),
        }
    }
}

/// File-backed store. Each call reads the file, so external edits are seen.
#[derive(Debug)]
pub struct JsonSessionStore {
    file_path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonSessionStore {
    pub fn new(file_path: &Path) -> Self {
        JsonSessionStore {
            file_path: file_path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn at_default_path() -> Result<Self, StoreError> {
        default_store_path()
            .map(|path| Self::new(&path))
            .ok_or(StoreError::NoPath)
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_file(&self) -> Result<StoreFile, StoreError> {
        self.read_checked().map(|(store_file, _)| store_file)
    }

    /// The parsed file, plus whether unparseable content is sitting on disk.
    fn read_checked(&self) -> Result<(StoreFile, bool), StoreError> {
        if !self.file_path.exists() {
            return Ok((StoreFile::default(), false));
        }

        let content = fs_err::read_to_string(&self.file_path).map_err(|source| StoreError::Io {
            context: "read session store".to_string(),
            source,
        })?;

        if content.trim().is_empty() {
            tracing::warn!(path = %self.file_path.display(), "Empty session store, treating as empty");
            return Ok((StoreFile::default(), false));
        }

        match serde_json::from_str::<StoreFile>(&content) {
            Ok(store_file) if store_file.version == STORE_VERSION => Ok((store_file, false)),
            Ok(store_file) => Err(StoreError::UnsupportedVersion(store_file.version)),
            Err(err) => {
                tracing::warn!(
                    path = %self.file_path.display(),
                    error = %err,
                    "Corrupt session store, treating as empty"
                );
                Ok((StoreFile::default(), true))
            }
        }
    }

    /// Reads for a read-modify-write cycle, moving a corrupt file aside first.
    fn read_for_write(&self) -> Result<StoreFile, StoreError> {
        let (store_file, corrupt) = self.read_checked()?;
        if corrupt {
            let aside = self.corrupt_path(Utc::now());
            fs_err::rename(&self.file_path, &aside).map_err(|source| StoreError::Io {
                context: "move corrupt session store aside".to_string(),
                source,
            })?;
            tracing::warn!(
                path = %self.file_path.display(),
                moved_to = %aside.display(),
                "Moved corrupt session store aside"
            );
        }
        Ok(store_file)
    }

    fn corrupt_path(&self, at: DateTime<Utc>) -> PathBuf {
        let mut name = self
            .file_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "sessions.json".into());
        name.push(format!(".corrupt-{}", at.format("%Y%m%dT%H%M%S%.3fZ")));
        self.file_path.with_file_name(name)
    }

    fn write_file(&self, store_file: &StoreFile) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(store_file).map_err(|source| StoreError::Json {
            context: "serialize session store".to_string(),
            source,
        })?;

        let parent_dir = self
            .file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs_err::create_dir_all(parent_dir).map_err(|source| StoreError::Io {
            context: "create session store directory".to_string(),
            source,
        })?;

        let io_err = |context: &str| {
            let context = context.to_string();
            move |source: std::io::Error| StoreError::Io { context, source }
        };

        let mut temp_file =
            NamedTempFile::new_in(parent_dir).map_err(io_err("create temp session store"))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(io_err("write temp session store"))?;
        temp_file
            .flush()
            .map_err(io_err("flush temp session store"))?;
        temp_file
            .persist(&self.file_path)
            .map_err(|err| StoreError::Io {
                context: "replace session store".to_string(),
                source: err.error,
            })?;
        Ok(())
    }
}

impl SessionStore for JsonSessionStore {
    fn save(&self, session: &Session) -> Result<(), StoreError> {
        let _guard = self.guard();
        let mut store_file = self.read_for_write()?;
        store_file
            .sessions
            .insert(session.id().to_string(), session.clone());
        self.write_file(&store_file)?;
        tracing::debug!(session_id = %session.id(), samples = session.total_samples(), "Saved session");
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.read_file()?.sessions.remove(session_id))
    }

    fn load_all(&self) -> Result<Vec<Session>, StoreError> {
        Ok(newest_first(self.read_file()?.sessions.into_values()))
    }

    fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        let _guard = self.guard();
        let mut store_file = self.read_for_write()?;
        let removed = store_file.sessions.remove(session_id).is_some();
        if removed {
            self.write_file(&store_file)?;
        }
        Ok(removed)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<BTreeMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionStore for InMemorySessionStore {
    fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.lock()
            .insert(session.id().to_string(), session.clone());
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.lock().get(session_id).cloned())
    }

    fn load_all(&self) -> Result<Vec<Session>, StoreError> {
        Ok(newest_first(self.lock().values().cloned()))
    }

    fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock().remove(session_id).is_some())
    }
}
