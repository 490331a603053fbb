//! Core library for the ParkMate parking-reservation client.
//!
//! This crate owns everything below the UI: the authenticated session state
//! machine, confidential credential storage, and the HTTP gateway that
//! authorizes outbound requests and reacts to authorization failures.
//! Screens, navigation, and styling live in the platform shells and consume
//! this crate through [`SessionManager`] and [`ApiClient`].

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{CredentialStore, Session, SessionManager, SessionState, StorageError};
pub use config::Config;
