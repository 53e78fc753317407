//! Persisted login session used for auto-resume.
//!
//! The store owns exactly one key in its backend. Every failure on the read
//! path fails closed: the record is cleared and the caller sees "no session".

use anyhow::{Context, Result};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Backend key holding the session record.
pub const SESSION_KEY: &str = "chat_session";

/// A session older than this is discarded on load.
pub const SESSION_TTL: TimeDelta = TimeDelta::hours(24);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "nickname", alias = "username")]
    pub identity: String,
    #[serde(rename = "serverUrl")]
    pub server_address: String,
    #[serde(rename = "createdAt", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at >= SESSION_TTL
    }
}

/// Whether `validate` insists on a session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionIdPolicy {
    /// The chat view refuses sessions without an id.
    Required,
    #[default]
    Optional,
}

/// A small string key/value backend.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process backend. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

/// Durable backend: one `<key>.json` file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.path_for(key);
        fs::write(&path, value).with_context(|| format!("writing {}", path.display()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Reads and writes the single session record.
pub struct SessionStore {
    backend: Box<dyn KeyValueStore>,
    clock: Clock,
}

impl SessionStore {
    pub fn new(backend: impl KeyValueStore + 'static) -> Self {
        Self::with_clock(backend, Utc::now)
    }

    pub fn with_clock(
        backend: impl KeyValueStore + 'static,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        Self {
            backend: Box::new(backend),
            clock: Box::new(clock),
        }
    }

    /// Builds a fresh session and writes it. A failed write is logged and the
    /// session is still returned.
    pub fn save(&self, identity: &str, server_address: &str) -> Session {
        let session = Session {
            identity: identity.to_string(),
            server_address: server_address.to_string(),
            // Stored as epoch millis, so drop the rest now.
            created_at: (self.clock)().trunc_subsecs(3),
            id: Some(format!("session_{}", Uuid::new_v4().simple())),
        };

        let written = serde_json::to_string(&session)
            .context("encoding session")
            .and_then(|json| self.backend.set(SESSION_KEY, &json));
        match written {
            Ok(()) => info!(identity = %session.identity, server = %session.server_address, "Session saved"),
            Err(e) => warn!(error = %e, "Failed to persist session"),
        }
        session
    }

    /// Returns the stored session, or `None` after clearing anything that is
    /// unreadable or expired.
    pub fn load(&self) -> Option<Session> {
        let raw = match self.backend.get(SESSION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Session storage unreadable, clearing");
                self.clear();
                return None;
            }
        };

        let session: Session = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Malformed session record, clearing");
                self.clear();
                return None;
            }
        };

        if session.is_expired((self.clock)()) {
            info!(identity = %session.identity, "Session expired, clearing");
            self.clear();
            return None;
        }
        Some(session)
    }

    /// Structural check only.
    pub fn validate(&self, session: &Session, policy: SessionIdPolicy) -> bool {
        let has_id = session.id.as_deref().is_some_and(|id| !id.is_empty());
        !session.identity.trim().is_empty()
            && !session.server_address.trim().is_empty()
            && (policy == SessionIdPolicy::Optional || has_id)
    }

    pub fn clear(&self) {
        match self.backend.remove(SESSION_KEY) {
            Ok(()) => debug!("Session cleared"),
            Err(e) => warn!(error = %e, "Failed to clear session"),
        }
    }
}
