use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::Step;

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Response returned after a successful login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: Uuid,
    pub step: Step,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub step: Step,
}

/// A validated username/password pair. Construction fails on empty fields, so
/// malformed submissions never reach the auth gate (and never touch a
/// credential backend or the rate limiter).
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Option<Self> {
        if username.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

impl TryFrom<&LoginRequest> for Credentials {
    type Error = ();

    fn try_from(request: &LoginRequest) -> Result<Self, Self::Error> {
        Credentials::new(request.username.trim(), &request.password).ok_or(())
    }
}
