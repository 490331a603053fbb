//! Request gateway for the ParkMate REST API.
//!
//! This module provides the `ApiClient`, a single shared HTTP client with a
//! fixed base address and a bounded timeout. Requests and responses flow
//! through an explicit two-stage pipeline: `attach_credential` authorizes
//! outbound calls from the credential store, and `classify_response` maps
//! inbound failures onto `ApiError` and enforces the systemic 401 policy
//! (any 401, from any endpoint, erases the stored credential).

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::auth::CredentialStore;
use crate::models::{Booking, BookingRequest, ParkingSpot, ProfileUpdate, User};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 10s tolerates slow cellular links while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Buffer size for the authorization-failure broadcast channel.
/// Failures arrive one per rejected call; 8 leaves headroom for bursts.
const AUTH_FAILURE_BUFFER_SIZE: usize = 8;

#[derive(Debug, Deserialize)]
struct LoginResponse {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    status: Option<u16>,
    message: Option<String>,
}

/// Gateway for the ParkMate backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    store: Arc<CredentialStore>,
    auth_failed: broadcast::Sender<()>,
}

impl ApiClient {
    /// Create the gateway. `base_url` includes the fixed `/api` prefix and is
    /// immutable for the life of the client, as is the timeout.
    pub fn new(base_url: impl Into<String>, store: Arc<CredentialStore>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        let (auth_failed, _) = broadcast::channel(AUTH_FAILURE_BUFFER_SIZE);

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
            auth_failed,
        })
    }

    /// Subscribe to authorization failures. An event is emitted every time a
    /// 401 response erases the stored credential, regardless of which call
    /// produced it.
    pub fn subscribe_auth_failures(&self) -> broadcast::Receiver<()> {
        self.auth_failed.subscribe()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ===== Interceptor pipeline =====

    /// Request stage: attach the stored credential, if any.
    ///
    /// A store read failure degrades to an unauthenticated request rather
    /// than failing the call.
    async fn attach_credential(&self, request: RequestBuilder) -> RequestBuilder {
        match self.store.get().await {
            Ok(Some(token)) => {
                request.header(header::AUTHORIZATION, format!("Token {token}"))
            }
            Ok(None) => request,
            Err(e) => {
                warn!(error = %e, "credential read failed, sending request unauthenticated");
                request
            }
        }
    }

    /// Response stage: classify failures and enforce the 401 policy.
    ///
    /// A 401 erases the stored credential and emits an authorization-failure
    /// event before the error propagates. No retry, no re-authentication.
    async fn classify_response(&self, response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            if let Err(e) = self.store.clear().await {
                warn!(error = %e, "failed to erase credential after 401");
            }
            let _ = self.auth_failed.send(());
            return Err(ApiError::Unauthorized);
        }
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, &body))
    }

    async fn dispatch(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let request = self.attach_credential(request).await;
        let response = request.send().await?;
        self.classify_response(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            debug!(error = %e, "undecodable response body");
            ApiError::Validation(format!("malformed server response: {e}"))
        })
    }

    // ===== Verbs =====

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        debug!(path, "GET");
        let response = self.dispatch(self.client.get(self.url(path))).await?;
        Self::decode(response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        debug!(path, "POST");
        let response = self
            .dispatch(self.client.post(self.url(path)).json(body))
            .await?;
        Self::decode(response).await
    }

    /// POST with no body, for endpoints that only acknowledge.
    async fn post_ack(&self, path: &str) -> Result<(), ApiError> {
        debug!(path, "POST");
        self.dispatch(self.client.post(self.url(path))).await?;
        Ok(())
    }

    async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        debug!(path, "PUT");
        let response = self
            .dispatch(self.client.put(self.url(path)).json(body))
            .await?;
        Self::decode(response).await
    }

    // ===== Account endpoints =====

    /// Exchange credentials for a session token.
    pub async fn login(&self, email: &str, password: &str) -> Result<String, ApiError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let response: LoginResponse = self.post("/accounts/login/", &body).await?;
        response
            .message
            .ok_or_else(|| ApiError::Validation("login response missing token".to_string()))
    }

    /// Create a new account. The backend reports the outcome in the body's
    /// `status` field; anything but 200 is surfaced as a server failure.
    pub async fn register(
        &self,
        fullname: &str,
        vehicle_number: &str,
        email: &str,
        password: &str,
    ) -> Result<(), ApiError> {
        let body = serde_json::json!({
            "fullname": fullname,
            "vehicle_no": vehicle_number,
            "email": email,
            "password": password,
        });
        let response: RegisterResponse = self.post("/accounts/register/", &body).await?;
        match response.status {
            Some(200) => Ok(()),
            Some(code) => Err(ApiError::Server {
                status: code,
                message: response
                    .message
                    .unwrap_or_else(|| "registration failed".to_string()),
            }),
            None => Err(ApiError::Validation(
                "register response missing status".to_string(),
            )),
        }
    }

    /// Invalidate the session server-side.
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.post_ack("/accounts/logout/").await
    }

    /// Fetch the authenticated user's profile.
    pub async fn fetch_profile(&self) -> Result<User, ApiError> {
        self.get("/accounts/profile/").await
    }

    /// Update profile fields, returning the replacement profile.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        self.put("/accounts/profile/", update).await
    }

    // ===== Parking endpoints =====

    /// Fetch available parking spots.
    pub async fn fetch_spots(&self) -> Result<Vec<ParkingSpot>, ApiError> {
        self.get("/parking/spots/").await
    }

    /// Fetch details for a single spot.
    pub async fn fetch_spot(&self, spot_id: &str) -> Result<ParkingSpot, ApiError> {
        self.get(&format!("/parking/spots/{spot_id}/")).await
    }

    /// Fetch the user's bookings.
    pub async fn fetch_bookings(&self) -> Result<Vec<Booking>, ApiError> {
        self.get("/parking/bookings/").await
    }

    /// Reserve a spot for a time window.
    pub async fn create_booking(&self, booking: &BookingRequest) -> Result<Booking, ApiError> {
        self.post("/parking/bookings/", booking).await
    }

    /// Cancel a booking.
    pub async fn cancel_booking(&self, booking_id: &str) -> Result<(), ApiError> {
        self.post_ack(&format!("/parking/bookings/{booking_id}/cancel/"))
            .await
    }
}
