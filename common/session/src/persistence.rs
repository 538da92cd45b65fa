use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};
use crate::identity::Identity;
use crate::roles::Role;

/// Persisted blob seeding the session store at process start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub identity: Option<Identity>,
    #[serde(default)]
    pub current_role: Option<Role>,
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Key-value persistence for the session snapshot.
pub trait SessionPersistence: Send + Sync {
    fn load(&self) -> SessionResult<Option<SessionSnapshot>>;
    fn save(&self, snapshot: &SessionSnapshot) -> SessionResult<()>;
    fn clear(&self) -> SessionResult<()>;
}

/// Process-local snapshot slot; nothing survives a restart.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    inner: Arc<RwLock<Option<SessionSnapshot>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(snapshot))),
        }
    }

    pub fn current(&self) -> Option<SessionSnapshot> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SessionPersistence for InMemoryPersistence {
    fn load(&self) -> SessionResult<Option<SessionSnapshot>> {
        Ok(self.current())
    }

    fn save(&self, snapshot: &SessionSnapshot) -> SessionResult<()> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(snapshot.clone());
        Ok(())
    }

    fn clear(&self) -> SessionResult<()> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
        Ok(())
    }
}

/// Snapshot stored as a JSON document on disk.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionPersistence for FilePersistence {
    fn load(&self) -> SessionResult<Option<SessionSnapshot>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(SessionError::Persistence(format!(
                    "failed to read {}: {err}",
                    self.path.display()
                )))
            }
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&raw).map(Some).map_err(|err| {
            SessionError::Persistence(format!(
                "malformed snapshot in {}: {err}",
                self.path.display()
            ))
        })
    }

    fn save(&self, snapshot: &SessionSnapshot) -> SessionResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                SessionError::Persistence(format!(
                    "failed to create {}: {err}",
                    parent.display()
                ))
            })?;
        }
        let body = serde_json::to_vec_pretty(snapshot)
            .map_err(|err| SessionError::Persistence(err.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, body)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|err| {
                SessionError::Persistence(format!(
                    "failed to write {}: {err}",
                    self.path.display()
                ))
            })
    }

    fn clear(&self) -> SessionResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SessionError::Persistence(format!(
                "failed to remove {}: {err}",
                self.path.display()
            ))),
        }
    }
}
