//! Authentication module for session state and credential storage.
//!
//! This module provides:
//! - `SessionManager`: the process-wide authenticated/unauthenticated state machine
//! - `CredentialStore`: confidential session-token storage via the OS keychain
//!
//! The credential survives process restarts and is revalidated against the
//! backend on startup. Any authorization failure from any endpoint revokes it.

pub mod credentials;
pub mod session;

pub use credentials::{CredentialStore, StorageError};
pub use session::{Session, SessionManager, SessionState};
