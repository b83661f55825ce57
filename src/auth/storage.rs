//! Durable credential persistence

use crate::auth::CredentialBundle;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

/// Backing store for the credential bundle
///
/// `load` treats an absent or unreadable bundle as "anonymous" and never
/// errors; a corrupt file is indistinguishable from no file.
pub trait TokenStorage: Send + Sync {
    /// The last persisted bundle, or `None` if absent or unreadable
    fn load(&self) -> Option<CredentialBundle>;

    /// Persist the bundle, overwriting any prior one
    fn save(&self, bundle: &CredentialBundle) -> io::Result<()>;

    /// Remove the persisted bundle
    fn clear(&self) -> io::Result<()>;
}

/// JSON-file-backed credential storage
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStorage for FileTokenStorage {
    fn load(&self) -> Option<CredentialBundle> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn save(&self, bundle: &CredentialBundle) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string(bundle)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.path, raw)
    }

    fn clear(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// In-process credential storage, used by tests and embedded callers
#[derive(Default)]
pub struct MemoryTokenStorage {
    slot: Mutex<Option<CredentialBundle>>,
}

impl TokenStorage for MemoryTokenStorage {
    fn load(&self) -> Option<CredentialBundle> {
        self.slot.lock().ok()?.clone()
    }

    fn save(&self, bundle: &CredentialBundle) -> io::Result<()> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(bundle.clone());
        }
        Ok(())
    }

    fn clear(&self) -> io::Result<()> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
        Ok(())
    }
}
