//! The login decision.

use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::auth::dto::Credentials;
use crate::auth::password::verify_password;
use crate::auth::ratelimit::RateLimiter;
use crate::auth::store::CredentialBackend;

pub struct AuthGate {
    limiter: Mutex<RateLimiter>,
    backends: Vec<Box<dyn CredentialBackend>>,
}

impl AuthGate {
    pub fn new(limiter: RateLimiter, backends: Vec<Box<dyn CredentialBackend>>) -> Self {
        Self {
            limiter: Mutex::new(limiter),
            backends,
        }
    }

    /// Accept or reject a login attempt.
    ///
    /// Every call counts against the rate limit, success or failure. Past the
    /// limiter, the first available backend is asked for the stored hash and
    /// the submitted password is verified against it. All failure modes (rate
    /// limited, no backend, unknown user, wrong password) collapse to `false`
    /// so callers cannot distinguish them.
    pub async fn check_is_legit_user(&self, user: &Credentials) -> bool {
        let exceeded = self
            .limiter
            .lock()
            .expect("rate limiter mutex poisoned")
            .check_limit_exceeded(&user.username);
        if exceeded {
            info!(username = %user.username, "login rejected by rate limiter");
            return false;
        }

        let mut stored_hash: Option<Vec<u8>> = None;
        for backend in &self.backends {
            if !backend.is_available().await {
                debug!(backend = backend.name(), "credential backend unavailable");
                continue;
            }
            debug!(backend = backend.name(), "using credential backend");
            match backend.fetch_password_hash(&user.username).await {
                Ok(hash) => stored_hash = Some(hash.unwrap_or_default()),
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "credential lookup failed");
                    stored_hash = Some(Vec::new());
                }
            }
            break;
        }

        let Some(stored_hash) = stored_hash else {
            debug!("no credential backend available");
            return false;
        };
        if stored_hash.is_empty() {
            debug!(username = %user.username, "no stored hash for user");
            return false;
        }

        verify_password(&user.password, &stored_hash).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password;
    use crate::auth::store::MemoryUserStore;

    const WINDOW_SECS: u64 = 60;

    fn gate_with(backends: Vec<Box<dyn CredentialBackend>>) -> AuthGate {
        // generous limit so rate limiting does not interfere unless a test wants it
        AuthGate::new(RateLimiter::new(100, WINDOW_SECS), backends)
    }

    fn og() -> Credentials {
        Credentials::new("og", "correct-password").unwrap()
    }

    fn store_with_og() -> MemoryUserStore {
        let hash = hash_password("correct-password").unwrap();
        MemoryUserStore::available().with_user("og", hash.into_bytes())
    }

    #[tokio::test]
    async fn accepts_known_user_with_correct_password() {
        let gate = gate_with(vec![Box::new(store_with_og())]);
        assert!(gate.check_is_legit_user(&og()).await);
    }

    #[tokio::test]
    async fn rejects_wrong_password() {
        let gate = gate_with(vec![Box::new(store_with_og())]);
        let user = Credentials::new("og", "-.-").unwrap();
        assert!(!gate.check_is_legit_user(&user).await);
    }

    #[tokio::test]
    async fn rejects_unknown_user() {
        let gate = gate_with(vec![Box::new(store_with_og())]);
        let user = Credentials::new("nobody", "correct-password").unwrap();
        assert!(!gate.check_is_legit_user(&user).await);
    }

    #[tokio::test]
    async fn rejects_when_no_backend_is_available() {
        let gate = gate_with(vec![
            Box::new(MemoryUserStore::unavailable()),
            Box::new(MemoryUserStore::unavailable()),
        ]);
        assert!(!gate.check_is_legit_user(&og()).await);
    }

    #[tokio::test]
    async fn first_available_backend_wins() {
        // first backend is reachable but has no row for og; the second one,
        // which does, must not be consulted
        let empty_first = MemoryUserStore::available();
        let gate = gate_with(vec![Box::new(empty_first), Box::new(store_with_og())]);
        assert!(!gate.check_is_legit_user(&og()).await);
    }

    #[tokio::test]
    async fn skips_unavailable_backends_in_order() {
        let gate = gate_with(vec![
            Box::new(MemoryUserStore::unavailable()),
            Box::new(store_with_og()),
        ]);
        assert!(gate.check_is_legit_user(&og()).await);
    }

    #[tokio::test]
    async fn rate_limit_rejects_regardless_of_password() {
        let gate = AuthGate::new(RateLimiter::new(1, WINDOW_SECS), vec![Box::new(store_with_og())]);
        assert!(gate.check_is_legit_user(&og()).await);
        // second attempt inside the window fails even with correct credentials
        assert!(!gate.check_is_legit_user(&og()).await);
    }

    #[tokio::test]
    async fn failed_attempts_also_count_against_the_limit() {
        let gate = AuthGate::new(RateLimiter::new(1, WINDOW_SECS), vec![Box::new(store_with_og())]);
        let wrong = Credentials::new("og", "-.-").unwrap();
        assert!(!gate.check_is_legit_user(&wrong).await);
        assert!(!gate.check_is_legit_user(&og()).await);
    }

    #[tokio::test]
    async fn malformed_stored_hash_rejects_instead_of_erroring() {
        let store = MemoryUserStore::available().with_user("og", b"not-a-bcrypt-hash".to_vec());
        let gate = gate_with(vec![Box::new(store)]);
        assert!(!gate.check_is_legit_user(&og()).await);
    }
}
