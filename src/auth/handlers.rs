use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, State},
    http::{request::Parts, StatusCode},
    routing::post,
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::dto::{Credentials, LoginRequest, LoginResponse, LogoutResponse};
use crate::session::{Step, WizardSession};
use crate::state::{AppState, SessionStore};

pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

/// All login failures look alike on purpose: no username enumeration.
fn login_failed() -> (StatusCode, String) {
    (StatusCode::UNAUTHORIZED, "Login failed".into())
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, String)> {
    // validation failures stop here, before the gate (and its rate limiter)
    let Ok(user) = Credentials::try_from(&payload) else {
        warn!("malformed login submission");
        return Err(login_failed());
    };

    if !state.gate.check_is_legit_user(&user).await {
        info!("login failed");
        return Err(login_failed());
    }

    if let Err(e) = state.config.data.ensure_dirs(Some(&user.username)) {
        tracing::error!(error = %e, "failed to prepare user data directories");
        return Err(crate::error::internal(e));
    }

    let session = WizardSession::logged_in(&user.username);
    let step = session.step;
    let token = state.sessions.create(session);
    info!(username = %user.username, "login succeeded");
    Ok(Json(LoginResponse { token, step }))
}

#[instrument(skip(state))]
pub async fn logout(
    State(state): State<AppState>,
    SessionAuth(token): SessionAuth,
) -> Json<LogoutResponse> {
    if let Some(session) = state.sessions.remove(&token) {
        info!(username = ?session.username, "logged out");
    }
    Json(LogoutResponse { step: Step::Login })
}

/// Extracts the session token of a logged-in session from the
/// `X-Session-Token` header.
pub struct SessionAuth(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for SessionAuth
where
    S: Send + Sync,
    SessionStore: FromRef<S>,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let store = SessionStore::from_ref(state);

        let header = parts
            .headers
            .get(SESSION_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or((
                StatusCode::UNAUTHORIZED,
                "Missing X-Session-Token header".to_string(),
            ))?;

        let token = Uuid::parse_str(header)
            .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid session token".to_string()))?;

        match store.get(&token) {
            Some(session) if session.is_logged_in => Ok(SessionAuth(token)),
            _ => {
                warn!("request with unknown or logged-out session token");
                Err((StatusCode::UNAUTHORIZED, "Not logged in".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, password: &str) -> Json<LoginRequest> {
        Json(LoginRequest {
            username: username.into(),
            password: password.into(),
        })
    }

    #[tokio::test]
    async fn login_with_correct_credentials_lands_on_upload() {
        let state = AppState::fake();
        let Json(response) = login(State(state.clone()), request("og", "test-password"))
            .await
            .expect("login should succeed");
        assert_eq!(response.step, Step::Upload);

        let session = state.sessions.get(&response.token).expect("session created");
        assert!(session.is_logged_in);
        assert_eq!(session.username.as_deref(), Some("og"));
        assert_eq!(session.step, Step::Upload);
    }

    #[tokio::test]
    async fn empty_credentials_are_rejected_without_reaching_the_gate() {
        let state = AppState::fake();
        let err = login(State(state), request("", ""))
            .await
            .expect_err("empty credentials must fail");
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
        assert_eq!(err.1, "Login failed");
    }

    #[tokio::test]
    async fn wrong_password_gets_the_same_generic_message() {
        let state = AppState::fake();
        let err = login(State(state), request("og", "-.-"))
            .await
            .expect_err("wrong password must fail");
        assert_eq!(err.1, "Login failed");
    }

    #[tokio::test]
    async fn logout_drops_the_session() {
        let state = AppState::fake();
        let Json(response) = login(State(state.clone()), request("og", "test-password"))
            .await
            .expect("login should succeed");

        let Json(out) = logout(State(state.clone()), SessionAuth(response.token)).await;
        assert_eq!(out.step, Step::Login);
        assert!(state.sessions.get(&response.token).is_none());
    }
}
