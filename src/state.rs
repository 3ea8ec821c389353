use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::extract::FromRef;
use uuid::Uuid;

use crate::auth::gate::AuthGate;
use crate::auth::ratelimit::RateLimiter;
use crate::auth::store::{CredentialBackend, MemoryUserStore, PostgresUserStore, SqliteUserStore};
use crate::config::AppConfig;
use crate::extract::{AnthropicExtractor, CannedExtractor, ReceiptExtractor};
use crate::session::WizardSession;

/// Token-keyed store of the live wizard sessions. Sessions are value types:
/// handlers fetch a clone, work on it, and put it back — the lock is never
/// held across an await.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, WizardSession>>>,
}

impl SessionStore {
    pub fn create(&self, session: WizardSession) -> Uuid {
        let token = Uuid::new_v4();
        self.inner
            .write()
            .expect("session store lock poisoned")
            .insert(token, session);
        token
    }

    pub fn get(&self, token: &Uuid) -> Option<WizardSession> {
        self.inner
            .read()
            .expect("session store lock poisoned")
            .get(token)
            .cloned()
    }

    pub fn put(&self, token: Uuid, session: WizardSession) {
        self.inner
            .write()
            .expect("session store lock poisoned")
            .insert(token, session);
    }

    pub fn remove(&self, token: &Uuid) -> Option<WizardSession> {
        self.inner
            .write()
            .expect("session store lock poisoned")
            .remove(token)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: SessionStore,
    pub gate: Arc<AuthGate>,
    pub extractor: Arc<dyn ReceiptExtractor>,
}

impl FromRef<AppState> for SessionStore {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

impl AppState {
    pub fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        config.data.ensure_dirs(None)?;

        // probe order is fixed: the local file first, then the hosted db
        let backends: Vec<Box<dyn CredentialBackend>> = vec![
            Box::new(SqliteUserStore::new(&config.user_db_path)),
            Box::new(PostgresUserStore::new(config.database_url.clone())),
        ];
        let limiter = RateLimiter::new(config.rate_limit.count, config.rate_limit.window_secs);
        let gate = Arc::new(AuthGate::new(limiter, backends));

        let extractor = Arc::new(AnthropicExtractor::new(
            config.anthropic.resolve_api_key()?,
            config.anthropic.model.clone(),
            config.anthropic.max_tokens,
            config.anthropic.max_retries,
        )) as Arc<dyn ReceiptExtractor>;

        Ok(Self {
            config,
            sessions: SessionStore::default(),
            gate,
            extractor,
        })
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        gate: Arc<AuthGate>,
        extractor: Arc<dyn ReceiptExtractor>,
    ) -> Self {
        Self {
            config,
            sessions: SessionStore::default(),
            gate,
            extractor,
        }
    }

    /// State with an in-memory user "og" (password "test-password") and a
    /// canned extractor; no network, no databases.
    pub fn fake() -> Self {
        use crate::config::{AnthropicConfig, DataConfig, RateLimitConfig};
        use crate::receipt::{Item, Receipt, Shop};

        let config = Arc::new(AppConfig {
            data: DataConfig {
                root_dir: std::env::temp_dir().join("receipt-wrangler-fake"),
                extraction_subdir: "extractions".into(),
                collation_subdir: "collations".into(),
                use_user: true,
            },
            anthropic: AnthropicConfig {
                api_key: Some("sk-fake".into()),
                key_file: None,
                model: "fake-model".into(),
                max_tokens: 1024,
                max_retries: 1,
            },
            rate_limit: RateLimitConfig {
                count: 100,
                window_secs: 60,
            },
            user_db_path: "user.db".into(),
            database_url: None,
        });

        let hash = crate::auth::password::hash_password("test-password")
            .expect("hashing a literal cannot fail");
        let backends: Vec<Box<dyn CredentialBackend>> = vec![Box::new(
            MemoryUserStore::available().with_user("og", hash.into_bytes()),
        )];
        let gate = Arc::new(AuthGate::new(RateLimiter::new(100, 60), backends));

        let receipt = Receipt {
            shop: Shop {
                name: "Edeka".into(),
                date_str: "2021-05-13".into(),
                time_str: "16:46".into(),
                total: 12.34,
            },
            items: vec![Item {
                name: "G&G Tomatens.1l".into(),
                price: 1.11,
                count: Some(1),
                mass: None,
                tax: Some("A".into()),
                category: None,
            }],
        };
        let extractor = Arc::new(CannedExtractor::new(receipt)) as Arc<dyn ReceiptExtractor>;

        Self::from_parts(config, gate, extractor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_store_round_trip() {
        let store = SessionStore::default();
        let token = store.create(WizardSession::logged_in("og"));
        let session = store.get(&token).expect("session exists");
        assert_eq!(session.username.as_deref(), Some("og"));

        assert!(store.remove(&token).is_some());
        assert!(store.get(&token).is_none());
    }

    #[test]
    fn unknown_tokens_resolve_to_nothing() {
        let store = SessionStore::default();
        assert!(store.get(&Uuid::new_v4()).is_none());
    }
}
