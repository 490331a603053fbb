//! Session state machine.
//!
//! One `SessionManager` exists per process. It owns the current `Session`
//! (state plus user profile) and is the only writer of session state: login,
//! registration, logout, profile refresh, and the startup validation all go
//! through it, serialized so overlapping mutations can never interleave.
//! Consumers observe the session through a `watch` channel instead of
//! callbacks; the UI reacts to transitions (e.g. navigating home after a
//! login) by subscribing.

use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::auth::CredentialStore;
use crate::models::{ProfileUpdate, User};

/// Lifecycle states of the process-wide session.
///
/// `Unauthenticated` and `Authenticated` are the rest states; the others mark
/// an operation in flight. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Startup validation of a previously stored credential is in progress.
    Initializing,
    Unauthenticated,
    /// A login or registration is in flight.
    Authenticating,
    Authenticated,
    /// A logout is in flight.
    Terminating,
}

/// Observable snapshot of the session.
///
/// `user` is `Some` only while `state` is `Authenticated`, or `Terminating`
/// (the outgoing profile stays attached until the logout completes). A
/// credential may transiently exist without a user during profile
/// validation, but that window is never observable here.
#[derive(Debug, Clone)]
pub struct Session {
    pub state: SessionState,
    pub user: Option<User>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }
}

/// Process-wide session manager.
///
/// Created once at startup via [`SessionManager::spawn`] and injected into
/// consumers; it lives for the process lifetime.
pub struct SessionManager {
    api: ApiClient,
    store: Arc<CredentialStore>,
    session: watch::Sender<Session>,
    /// Serializes session-mutating operations. Readers never take this.
    mutation: Mutex<()>,
}

impl SessionManager {
    /// Create the session manager and the background task that reacts to
    /// gateway authorization failures.
    pub fn spawn(api: ApiClient, store: Arc<CredentialStore>) -> Arc<Self> {
        let (session, _) = watch::channel(Session {
            state: SessionState::Initializing,
            user: None,
        });
        let manager = Arc::new(Self {
            api: api.clone(),
            store,
            session,
            mutation: Mutex::new(()),
        });

        // Any 401, from any endpoint, revokes the whole session. The gateway
        // has already erased the stored credential by the time this fires.
        let mut auth_failures = api.subscribe_auth_failures();
        let listener = Arc::downgrade(&manager);
        tokio::spawn(async move {
            loop {
                match auth_failures.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let Some(manager) = listener.upgrade() else { break };
                        manager.revoke();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        manager
    }

    /// Observe session transitions.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    /// Current session snapshot.
    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.borrow().is_authenticated()
    }

    pub fn user(&self) -> Option<User> {
        self.session.borrow().user.clone()
    }

    fn publish(&self, state: SessionState, user: Option<User>) {
        self.session.send_replace(Session { state, user });
    }

    /// Externally-triggered drop to `Unauthenticated`. Deliberately does not
    /// take the mutation guard: it may fire while an operation holds it, and
    /// that operation's own error path publishes the same rest state.
    fn revoke(&self) {
        info!("session revoked by authorization failure");
        self.publish(SessionState::Unauthenticated, None);
    }

    /// Validate any stored credential against the backend. Called once at
    /// process startup.
    ///
    /// Resolves to `Authenticated` only when a credential exists and the
    /// profile fetch succeeds; every failure path resolves to
    /// `Unauthenticated` with storage and memory left consistent. Failures
    /// are logged rather than surfaced - a stale token at startup is an
    /// expected outcome, not an error the caller can act on.
    pub async fn initialize(&self) -> Session {
        let _guard = self.mutation.lock().await;

        // A degraded store read counts as "no credential", same as the
        // gateway's request stage.
        let credential = match self.store.get().await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "credential read failed during startup");
                None
            }
        };

        if credential.is_none() {
            debug!("no stored credential");
            self.publish(SessionState::Unauthenticated, None);
            return self.session();
        }

        match self.api.fetch_profile().await {
            Ok(user) => {
                info!(email = %user.email, "restored session from stored credential");
                self.publish(SessionState::Authenticated, Some(user));
            }
            Err(e) => {
                warn!(error = %e, "stored credential failed validation");
                // A 401 already erased the store; erase explicitly otherwise
                // so storage and memory stay consistent.
                if !e.is_unauthorized() {
                    if let Err(e) = self.store.clear().await {
                        warn!(error = %e, "failed to erase stale credential");
                    }
                }
                self.publish(SessionState::Unauthenticated, None);
            }
        }
        self.session()
    }

    /// Log in and populate the user profile.
    ///
    /// On any failure no partial state survives: the credential is not
    /// persisted (or is erased again) and the session rests at
    /// `Unauthenticated`.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let _guard = self.mutation.lock().await;
        self.login_locked(email, password).await
    }

    /// Login body; the caller must hold the mutation guard.
    async fn login_locked(&self, email: &str, password: &str) -> Result<User, ApiError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ApiError::Validation(
                "email and password are required".to_string(),
            ));
        }

        self.publish(SessionState::Authenticating, None);

        let result = self.try_login(email, password).await;
        match &result {
            Ok(user) => info!(email = %user.email, "login succeeded"),
            Err(e) => {
                warn!(error = %e, "login failed");
                self.publish(SessionState::Unauthenticated, None);
            }
        }
        result
    }

    async fn try_login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let credential = self.api.login(email, password).await?;

        // A failed persist means the credential cannot be assumed durable,
        // so the login must not be reported as successful.
        if let Err(persist) = self.store.set(&credential).await {
            if let Err(e) = self.store.clear().await {
                warn!(error = %e, "failed to erase credential after failed persist");
            }
            return Err(ApiError::Storage(persist));
        }

        match self.api.fetch_profile().await {
            Ok(user) => {
                self.publish(SessionState::Authenticated, Some(user.clone()));
                Ok(user)
            }
            Err(e) => {
                // A 401 already erased the store via the gateway policy.
                if !e.is_unauthorized() {
                    if let Err(e) = self.store.clear().await {
                        warn!(error = %e, "failed to unwind credential after login failure");
                    }
                }
                Err(e)
            }
        }
    }

    /// Register a new account, then log in with the same credentials.
    ///
    /// The backend has no transaction spanning the two steps: when
    /// registration succeeds but the chained login fails, the account exists
    /// server-side with no local session, and this call reports a single
    /// failure. Retrying with [`SessionManager::login`] is the recovery path.
    pub async fn register(
        &self,
        fullname: &str,
        vehicle_number: &str,
        email: &str,
        password: &str,
    ) -> Result<User, ApiError> {
        let _guard = self.mutation.lock().await;

        if fullname.trim().is_empty()
            || vehicle_number.trim().is_empty()
            || email.trim().is_empty()
            || password.is_empty()
        {
            return Err(ApiError::Validation(
                "all registration fields are required".to_string(),
            ));
        }

        self.publish(SessionState::Authenticating, None);

        if let Err(e) = self
            .api
            .register(fullname, vehicle_number, email, password)
            .await
        {
            warn!(error = %e, "registration failed");
            self.publish(SessionState::Unauthenticated, None);
            return Err(e);
        }

        self.login_locked(email, password).await
    }

    /// Log out.
    ///
    /// The backend call is best-effort; the local session and stored
    /// credential are cleared regardless of its outcome. Safe to call in any
    /// state, including repeatedly.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let _guard = self.mutation.lock().await;

        self.publish(SessionState::Terminating, self.user());

        if let Err(e) = self.api.logout().await {
            warn!(error = %e, "backend logout failed, clearing local session anyway");
        }

        let cleared = self.store.clear().await;
        self.publish(SessionState::Unauthenticated, None);
        info!("logged out");
        cleared.map_err(ApiError::Storage)
    }

    /// Replace the profile wholesale.
    ///
    /// On failure the previous profile is retained, except a 401, which
    /// revokes the whole session.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        let _guard = self.mutation.lock().await;

        if !self.is_authenticated() {
            return Err(ApiError::Validation("not signed in".to_string()));
        }

        match self.api.update_profile(update).await {
            Ok(user) => {
                info!(email = %user.email, "profile updated");
                self.publish(SessionState::Authenticated, Some(user.clone()));
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "profile update failed");
                if e.is_unauthorized() {
                    self.publish(SessionState::Unauthenticated, None);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const ANN: &str = r#"{"id": "1", "name": "Ann", "email": "a@x.com", "vehicle_no": "AB12"}"#;

    async fn manager_with(
        server: &mockito::ServerGuard,
    ) -> (Arc<SessionManager>, Arc<CredentialStore>) {
        let store = Arc::new(CredentialStore::in_memory());
        let api = ApiClient::new(server.url(), Arc::clone(&store)).unwrap();
        (SessionManager::spawn(api, Arc::clone(&store)), store)
    }

    async fn assert_invariant(manager: &SessionManager, store: &CredentialStore) {
        assert_eq!(
            manager.is_authenticated(),
            store.get().await.unwrap().is_some(),
            "session state diverged from stored credential"
        );
    }

    #[tokio::test]
    async fn fresh_install_resolves_unauthenticated_without_network() {
        let mut server = mockito::Server::new_async().await;
        let profile = server
            .mock("GET", "/accounts/profile/")
            .expect(0)
            .create_async()
            .await;

        let (manager, store) = manager_with(&server).await;
        let session = manager.initialize().await;

        assert_eq!(session.state, SessionState::Unauthenticated);
        assert!(session.user.is_none());
        profile.assert_async().await;
        assert_invariant(&manager, &store).await;
    }

    #[tokio::test]
    async fn stored_credential_restores_session_on_startup() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/accounts/profile/")
            .match_header("authorization", "Token tok123")
            .with_status(200)
            .with_body(ANN)
            .create_async()
            .await;

        let (manager, store) = manager_with(&server).await;
        store.set("tok123").await.unwrap();

        let session = manager.initialize().await;
        assert_eq!(session.state, SessionState::Authenticated);
        let user = session.user.unwrap();
        assert_eq!(user.name, "Ann");
        assert_eq!(user.vehicle_number, "AB12");
        assert_invariant(&manager, &store).await;
    }

    #[tokio::test]
    async fn stale_credential_is_erased_on_startup() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/accounts/profile/")
            .with_status(401)
            .create_async()
            .await;

        let (manager, store) = manager_with(&server).await;
        store.set("stale").await.unwrap();

        let session = manager.initialize().await;
        assert_eq!(session.state, SessionState::Unauthenticated);
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn login_persists_credential_and_fetches_profile() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/accounts/login/")
            .with_status(200)
            .with_body(r#"{"message": "tok123"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/accounts/profile/")
            .match_header("authorization", "Token tok123")
            .with_status(200)
            .with_body(ANN)
            .create_async()
            .await;

        let (manager, store) = manager_with(&server).await;
        let user = manager.login("a@x.com", "secret").await.unwrap();

        assert_eq!(user.email, "a@x.com");
        assert_eq!(store.get().await.unwrap().as_deref(), Some("tok123"));
        assert!(manager.is_authenticated());
        assert_invariant(&manager, &store).await;
    }

    #[tokio::test]
    async fn login_with_empty_fields_makes_no_network_call() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/accounts/login/")
            .expect(0)
            .create_async()
            .await;

        let (manager, store) = manager_with(&server).await;
        let err = manager.login("", "secret").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        login.assert_async().await;
        assert_invariant(&manager, &store).await;
    }

    #[tokio::test]
    async fn login_reverts_when_profile_fetch_is_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/accounts/login/")
            .with_status(200)
            .with_body(r#"{"message": "tok123"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/accounts/profile/")
            .with_status(401)
            .create_async()
            .await;

        let (manager, store) = manager_with(&server).await;
        let err = manager.login("a@x.com", "secret").await.unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(store.get().await.unwrap(), None);
        assert_eq!(manager.session().state, SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn login_transport_failure_reverts_to_unauthenticated() {
        // Bind a listener for a routable address, then drop it so the login
        // call fails at the transport, not with an HTTP status. (A dropped
        // mockito server goes back to the pool and keeps listening, so it
        // cannot provide a dead address.)
        let url = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            format!("http://{}", listener.local_addr().unwrap())
        };

        let store = Arc::new(CredentialStore::in_memory());
        let api = ApiClient::new(url, Arc::clone(&store)).unwrap();
        let manager = SessionManager::spawn(api, Arc::clone(&store));

        let err = manager.login("a@x.com", "secret").await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
        assert_eq!(manager.session().state, SessionState::Unauthenticated);
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn register_chains_into_login() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/accounts/register/")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "fullname": "Ann",
                "vehicle_no": "AB12",
                "email": "a@x.com",
                "password": "secret",
            })))
            .with_status(200)
            .with_body(r#"{"status": 200, "message": "created"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/accounts/login/")
            .with_status(200)
            .with_body(r#"{"message": "tok123"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/accounts/profile/")
            .with_status(200)
            .with_body(ANN)
            .create_async()
            .await;

        let (manager, store) = manager_with(&server).await;
        let user = manager
            .register("Ann", "AB12", "a@x.com", "secret")
            .await
            .unwrap();
        assert_eq!(user.name, "Ann");
        assert!(manager.is_authenticated());
        assert_invariant(&manager, &store).await;
    }

    #[tokio::test]
    async fn register_surfaces_chained_login_failure_as_one_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/accounts/register/")
            .with_status(200)
            .with_body(r#"{"status": 200, "message": "created"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/accounts/login/")
            .with_status(500)
            .create_async()
            .await;

        let (manager, store) = manager_with(&server).await;
        let err = manager
            .register("Ann", "AB12", "a@x.com", "secret")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Server { .. }));
        assert_eq!(store.get().await.unwrap(), None);
        assert_eq!(manager.session().state, SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_best_effort() {
        let server = mockito::Server::new_async().await;
        // No logout mock: the backend call fails, the local transition must
        // still complete.
        let (manager, store) = manager_with(&server).await;
        store.set("tok123").await.unwrap();

        manager.logout().await.unwrap();
        manager.logout().await.unwrap();

        assert_eq!(manager.session().state, SessionState::Unauthenticated);
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn domain_call_401_revokes_the_session() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/accounts/profile/")
            .with_status(200)
            .with_body(ANN)
            .create_async()
            .await;
        server
            .mock("GET", "/parking/bookings/")
            .with_status(401)
            .create_async()
            .await;

        let store = Arc::new(CredentialStore::in_memory());
        let api = ApiClient::new(server.url(), Arc::clone(&store)).unwrap();
        let manager = SessionManager::spawn(api.clone(), Arc::clone(&store));

        store.set("tok123").await.unwrap();
        manager.initialize().await;
        assert!(manager.is_authenticated());

        let err = api.fetch_bookings().await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(store.get().await.unwrap(), None);

        // The revocation arrives through the gateway's event channel.
        let mut sessions = manager.subscribe();
        tokio::time::timeout(
            Duration::from_secs(1),
            sessions.wait_for(|s| s.state == SessionState::Unauthenticated),
        )
        .await
        .expect("session was not revoked")
        .unwrap();
        assert_invariant(&manager, &store).await;
    }

    #[tokio::test]
    async fn update_profile_replaces_user_wholesale() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/accounts/profile/")
            .with_status(200)
            .with_body(ANN)
            .create_async()
            .await;
        server
            .mock("PUT", "/accounts/profile/")
            .match_body(mockito::Matcher::Json(
                serde_json::json!({ "vehicle_no": "CD34" }),
            ))
            .with_status(200)
            .with_body(r#"{"id": "1", "name": "Ann", "email": "a@x.com", "vehicle_no": "CD34"}"#)
            .create_async()
            .await;

        let (manager, store) = manager_with(&server).await;
        store.set("tok123").await.unwrap();
        manager.initialize().await;

        let update = ProfileUpdate {
            vehicle_number: Some("CD34".to_string()),
            ..Default::default()
        };
        let user = manager.update_profile(&update).await.unwrap();
        assert_eq!(user.vehicle_number, "CD34");
        assert_eq!(manager.user().unwrap().vehicle_number, "CD34");
    }

    #[tokio::test]
    async fn update_profile_failure_retains_previous_user() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/accounts/profile/")
            .with_status(200)
            .with_body(ANN)
            .create_async()
            .await;
        server
            .mock("PUT", "/accounts/profile/")
            .with_status(500)
            .create_async()
            .await;

        let (manager, store) = manager_with(&server).await;
        store.set("tok123").await.unwrap();
        manager.initialize().await;

        let update = ProfileUpdate {
            name: Some("Bea".to_string()),
            ..Default::default()
        };
        let err = manager.update_profile(&update).await.unwrap_err();
        assert!(matches!(err, ApiError::Server { .. }));
        assert_eq!(manager.user().unwrap().name, "Ann");
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn concurrent_logins_never_mix_credential_and_user() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/accounts/login/")
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({ "email": "a@x.com" }),
            ))
            .with_status(200)
            .with_body(r#"{"message": "tok_ann"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/accounts/login/")
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({ "email": "b@x.com" }),
            ))
            .with_status(200)
            .with_body(r#"{"message": "tok_bob"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/accounts/profile/")
            .match_header("authorization", "Token tok_ann")
            .with_status(200)
            .with_body(ANN)
            .create_async()
            .await;
        server
            .mock("GET", "/accounts/profile/")
            .match_header("authorization", "Token tok_bob")
            .with_status(200)
            .with_body(r#"{"id": "2", "name": "Bob", "email": "b@x.com", "vehicle_no": "CD34"}"#)
            .create_async()
            .await;

        let (manager, store) = manager_with(&server).await;
        let (first, second) = tokio::join!(
            manager.login("a@x.com", "secret"),
            manager.login("b@x.com", "secret"),
        );
        first.unwrap();
        second.unwrap();

        // Whichever login finished last, its credential and user must pair up.
        let token = store.get().await.unwrap().unwrap();
        let user = manager.user().unwrap();
        match token.as_str() {
            "tok_ann" => assert_eq!(user.email, "a@x.com"),
            "tok_bob" => assert_eq!(user.email, "b@x.com"),
            other => panic!("unexpected credential: {other}"),
        }
        assert_invariant(&manager, &store).await;
    }

    #[tokio::test]
    async fn concurrent_login_and_logout_stay_consistent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/accounts/login/")
            .with_status(200)
            .with_body(r#"{"message": "tok123"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/accounts/profile/")
            .with_status(200)
            .with_body(ANN)
            .create_async()
            .await;
        server
            .mock("POST", "/accounts/logout/")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let (manager, store) = manager_with(&server).await;
        let (login, logout) = tokio::join!(
            manager.login("a@x.com", "secret"),
            manager.logout(),
        );
        login.unwrap();
        logout.unwrap();

        // Either order is legal; state and storage must agree.
        assert_invariant(&manager, &store).await;
    }
}
