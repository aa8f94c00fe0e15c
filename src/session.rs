use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{AppError, AppResult};

pub const AUTH_REQUIRED: &str = "AUTH/REQUIRED";
pub const AUTH_EXPIRED: &str = "AUTH/EXPIRED";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Bearer credentials for the back-office API.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    #[serde(default)]
    pub user: Option<SessionUser>,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user: None,
            issued_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_user(mut self, user: SessionUser) -> Self {
        self.user = Some(user);
        self
    }

    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.expires_at = Some(self.issued_at + Duration::seconds(seconds));
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("user", &self.user)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub trait SessionStore: Send + Sync {
    fn load(&self) -> AppResult<Option<Session>>;
    fn save(&self, session: &Session) -> AppResult<()>;
    fn clear(&self) -> AppResult<()>;
}

/// JSON file on disk, written through a sibling temp file.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> AppResult<Option<Session>> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(AppError::from(err).with_context("operation", "session_load"))
            }
        };
        let session = serde_json::from_str(&data)
            .map_err(|err| AppError::from(err).with_context("operation", "session_load"))?;
        Ok(Some(session))
    }

    fn save(&self, session: &Session) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| AppError::from(err).with_context("operation", "session_save"))?;
        }
        let data = serde_json::to_vec_pretty(session)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)
            .map_err(|err| AppError::from(err).with_context("operation", "session_save"))?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|err| AppError::from(err).with_context("operation", "session_save"))?;
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::from(err).with_context("operation", "session_clear")),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> AppResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|err| AppError::from(err).with_context("operation", "session_permissions"))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> AppResult<()> {
    Ok(())
}

#[derive(Default)]
pub struct MemorySessionStore {
    data: Mutex<Option<Session>>,
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> AppResult<Option<Session>> {
        Ok(self.data.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, session: &Session) -> AppResult<()> {
        *self.data.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        *self.data.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// The one place credentials live. Login begins a session, logout or
/// expiry ends it; every request reads the token from here.
#[derive(Clone)]
pub struct SessionHandle {
    current: Arc<RwLock<Option<Session>>>,
    store: Arc<dyn SessionStore>,
}

impl SessionHandle {
    /// Restore whatever session the store holds. An expired one is dropped.
    pub fn restore(store: Arc<dyn SessionStore>) -> AppResult<Self> {
        let mut loaded = store.load()?;
        if loaded
            .as_ref()
            .is_some_and(|session| session.is_expired_at(Utc::now()))
        {
            info!(target: "listing_desk", event = "session_expired", phase = "restore");
            store.clear()?;
            loaded = None;
        }
        Ok(Self {
            current: Arc::new(RwLock::new(loaded)),
            store,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            store: Arc::new(MemorySessionStore::default()),
        }
    }

    pub fn begin(&self, session: Session) -> AppResult<()> {
        self.store.save(&session)?;
        info!(
            target: "listing_desk",
            event = "session_started",
            expires_at = session.expires_at.map(|at| at.to_rfc3339()).as_deref()
        );
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(session);
        Ok(())
    }

    pub fn end(&self) -> AppResult<()> {
        let had_session = self
            .current
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some();
        if had_session {
            info!(target: "listing_desk", event = "session_ended");
        }
        self.store.clear()
    }

    pub fn current(&self) -> Option<Session> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    /// Token for an authenticated call. An expired session is ended here.
    pub fn bearer(&self) -> AppResult<String> {
        let Some(session) = self.current() else {
            return Err(AppError::new(AUTH_REQUIRED, "Sign in to continue."));
        };
        if session.is_expired_at(Utc::now()) {
            if let Err(err) = self.end() {
                warn!(target: "listing_desk", event = "session_clear_failed", code = err.code());
            }
            return Err(AppError::new(AUTH_EXPIRED, "Your session has expired. Sign in again."));
        }
        Ok(session.token)
    }
}
