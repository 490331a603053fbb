//! HTTP gateway for the ParkMate REST API.
//!
//! This module provides the `ApiClient`, the single shared request gateway.
//! Every outbound call passes through a request stage that attaches the
//! stored credential; every inbound response passes through a response stage
//! that classifies failures and enforces the 401 revocation policy.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
