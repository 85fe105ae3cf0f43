//! # Session Registry - Identity & Enumeration
//!
//! A session is a logical identity (`id`, `name`, `kind`) bound to one
//! bundle. The registry is derived by scanning bundle directories plus
//! the implicit primary slot. There is no separate index file that can
//! drift from disk state.
//!
//! ## Metadata Is Advisory
//!
//! `Session.json` carries the display name and kind. It is
//! reconstructible: if the file is unreadable or absent the session
//! degrades to sane defaults (id as name, kind inferred from the id)
//! with a warning, never an error. The authoritative facts, which
//! sessions exist, come from the directory scan alone.

use crate::bundle::{Bundle, BundleStore};
use crate::constants::{PRIMARY_SESSION_ID, validate_id};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

// =============================================================================
// Session Kind
// =============================================================================

/// Whether a session persists across stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// The one long-lived session; its bundle survives stops.
    Primary,
    /// A throwaway session; its bundle is deleted when it stops.
    Disposable,
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Disposable => write!(f, "disposable"),
        }
    }
}

// =============================================================================
// Session Descriptor
// =============================================================================

/// A named, running-capable VM identity bound to a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique identifier; also the bundle directory name.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Persistence kind.
    pub kind: SessionKind,
}

impl Session {
    /// The implicit primary session descriptor.
    pub fn primary() -> Self {
        Self {
            id: PRIMARY_SESSION_ID.to_string(),
            name: "Primary".to_string(),
            kind: SessionKind::Primary,
        }
    }

    /// A new disposable session with a generated unique identifier.
    pub fn disposable(name: impl Into<String>) -> Self {
        Self {
            id: format!("disp-{}", Uuid::now_v7().simple()),
            name: name.into(),
            kind: SessionKind::Disposable,
        }
    }

    /// Reconstructed defaults for a session whose metadata is unreadable
    /// or absent.
    fn fallback(id: &str) -> Self {
        let kind = if id == PRIMARY_SESSION_ID {
            SessionKind::Primary
        } else {
            SessionKind::Disposable
        };
        Self {
            id: id.to_string(),
            name: id.to_string(),
            kind,
        }
    }

    /// Writes the descriptor as JSON to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Reads a descriptor from `path`.
    pub fn read_from(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Loads the descriptor from a bundle's metadata, degrading to
    /// defaults (with a warning) if the file is missing or corrupt.
    pub fn load_or_default(bundle: &Bundle, id: &str) -> Self {
        let path = bundle.artifacts().metadata;
        match Self::read_from(&path) {
            Ok(session) => session,
            Err(e) => {
                if path.exists() {
                    warn!(
                        session = id,
                        error = %e,
                        "session metadata unreadable; using defaults"
                    );
                }
                Self::fallback(id)
            }
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Enumerates known sessions by scanning the store.
///
/// Exactly one session has `id = "primary"` and appears in every
/// enumeration even if its bundle does not yet exist on disk. Disposable
/// sessions exist only once their bundle is materialized.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    store: BundleStore,
}

impl SessionRegistry {
    /// Creates a registry over the given store.
    pub fn new(store: BundleStore) -> Self {
        Self { store }
    }

    /// Returns the bundle for a session id after validating the id for
    /// path safety.
    pub fn bundle(&self, id: &str) -> Result<Bundle> {
        validate_id(id).map_err(|reason| Error::InvalidId {
            id: id.to_string(),
            reason,
        })?;
        Ok(self.store.session(id))
    }

    /// Lists all sessions: the implicit primary first, then every
    /// materialized session bundle in directory order.
    pub fn list(&self) -> Result<Vec<Session>> {
        let mut sessions = vec![self.get(PRIMARY_SESSION_ID)?];

        let sessions_dir = self.store.sessions_dir();
        if sessions_dir.is_dir() {
            let mut ids: Vec<String> = Vec::new();
            for entry in fs::read_dir(&sessions_dir)? {
                let entry = entry?;
                if !entry.path().is_dir() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                // Skip in-progress staging directories and the primary
                // slot already emitted above.
                if validate_id(&name).is_err() || name == PRIMARY_SESSION_ID {
                    continue;
                }
                ids.push(name);
            }
            ids.sort();

            for id in ids {
                let bundle = self.store.session(&id);
                sessions.push(Session::load_or_default(&bundle, &id));
            }
        }

        debug!(count = sessions.len(), "sessions enumerated");
        Ok(sessions)
    }

    /// Returns one session descriptor.
    ///
    /// The primary session always resolves, even before its bundle is
    /// materialized; any other id requires its bundle to exist.
    pub fn get(&self, id: &str) -> Result<Session> {
        let bundle = self.bundle(id)?;
        if bundle.exists() {
            Ok(Session::load_or_default(&bundle, id))
        } else if id == PRIMARY_SESSION_ID {
            Ok(Session::primary())
        } else {
            Err(Error::SessionNotFound(id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_primary_listed_without_bundle() {
        let temp = TempDir::new().unwrap();
        let store = BundleStore::with_path(temp.path().to_path_buf()).unwrap();
        let registry = SessionRegistry::new(store);

        let sessions = registry.list().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, PRIMARY_SESSION_ID);
        assert_eq!(sessions[0].kind, SessionKind::Primary);
    }

    #[test]
    fn test_disposable_ids_are_unique_and_valid() {
        let a = Session::disposable("scratch");
        let b = Session::disposable("scratch");
        assert_ne!(a.id, b.id);
        assert!(validate_id(&a.id).is_ok());
    }

    #[test]
    fn test_corrupt_metadata_degrades_to_defaults() {
        let temp = TempDir::new().unwrap();
        let store = BundleStore::with_path(temp.path().to_path_buf()).unwrap();
        let bundle = store.session("disp-x");
        fs::create_dir_all(bundle.dir()).unwrap();
        fs::write(bundle.artifacts().metadata, b"not json").unwrap();

        let session = Session::load_or_default(&bundle, "disp-x");
        assert_eq!(session.id, "disp-x");
        assert_eq!(session.name, "disp-x");
        assert_eq!(session.kind, SessionKind::Disposable);
    }
}
