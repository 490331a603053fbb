//! Confidential credential storage.
//!
//! Exactly one opaque session token is persisted per device. The production
//! backend is the OS keychain via `keyring`; an in-process backend backs
//! tests and headless environments. Absence of the entry means
//! unauthenticated.

use keyring::Entry;
use thiserror::Error;
use tokio::sync::Mutex;

/// Keychain account name the token entry is filed under.
const TOKEN_ACCOUNT: &str = "user-token";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("storage task failed: {0}")]
    Task(String),
}

enum Backend {
    /// OS keychain, keyed by service name. Keyring calls block, so they run
    /// on the blocking thread pool.
    Keyring { service: String },
    /// In-process storage for tests and headless environments.
    Memory(Mutex<Option<String>>),
}

/// Durable, confidential store for the session token.
///
/// Operations are idempotent: `clear` on an empty store is a no-op and `set`
/// overwrites unconditionally. A failed `set` means the credential cannot be
/// assumed persisted; callers must not treat the session as authenticated.
pub struct CredentialStore {
    backend: Backend,
}

impl CredentialStore {
    /// Store backed by the OS keychain under the given service name.
    pub fn keychain(service: impl Into<String>) -> Self {
        Self {
            backend: Backend::Keyring {
                service: service.into(),
            },
        }
    }

    /// Store backed by process memory. Not durable; intended for tests.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(None)),
        }
    }

    /// Read the stored credential, if any. A missing keychain entry is
    /// `Ok(None)`, not an error.
    pub async fn get(&self) -> Result<Option<String>, StorageError> {
        match &self.backend {
            Backend::Memory(slot) => Ok(slot.lock().await.clone()),
            Backend::Keyring { service } => {
                let service = service.clone();
                let token = Self::run_blocking(move || {
                    let entry = Entry::new(&service, TOKEN_ACCOUNT)?;
                    match entry.get_password() {
                        Ok(token) => Ok(Some(token)),
                        Err(keyring::Error::NoEntry) => Ok(None),
                        Err(e) => Err(e),
                    }
                })
                .await??;
                Ok(token)
            }
        }
    }

    /// Store a credential, overwriting any previous one.
    pub async fn set(&self, credential: &str) -> Result<(), StorageError> {
        match &self.backend {
            Backend::Memory(slot) => {
                *slot.lock().await = Some(credential.to_string());
                Ok(())
            }
            Backend::Keyring { service } => {
                let service = service.clone();
                let credential = credential.to_string();
                Self::run_blocking(move || {
                    let entry = Entry::new(&service, TOKEN_ACCOUNT)?;
                    entry.set_password(&credential)
                })
                .await??;
                Ok(())
            }
        }
    }

    /// Erase the stored credential. A no-op when nothing is stored.
    pub async fn clear(&self) -> Result<(), StorageError> {
        match &self.backend {
            Backend::Memory(slot) => {
                *slot.lock().await = None;
                Ok(())
            }
            Backend::Keyring { service } => {
                let service = service.clone();
                Self::run_blocking(move || {
                    let entry = Entry::new(&service, TOKEN_ACCOUNT)?;
                    match entry.delete_credential() {
                        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                        Err(e) => Err(e),
                    }
                })
                .await??;
                Ok(())
            }
        }
    }

    async fn run_blocking<T: Send + 'static>(
        f: impl FnOnce() -> Result<T, keyring::Error> + Send + 'static,
    ) -> Result<Result<T, keyring::Error>, StorageError> {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| StorageError::Task(e.to_string()))
    }
}
