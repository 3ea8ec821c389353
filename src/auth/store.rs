//! Credential lookup backends.
//!
//! Backends are probed in a fixed priority order (local sqlite file first,
//! then the hosted postgres instance) and the first available one answers.
//! A backend that cannot be reached is a normal condition, never an error.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, PgConnection, Row};
use tracing::{debug, warn};

#[async_trait]
pub trait CredentialBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this backend can currently be reached at all.
    async fn is_available(&self) -> bool;

    /// Stored password hash for `username`, `None` when no row matches.
    async fn fetch_password_hash(&self, username: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Read-only user database in a local sqlite file. The file is provisioned by
/// an external tool; a missing file simply means "not available".
pub struct SqliteUserStore {
    path: PathBuf,
}

impl SqliteUserStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.path)
            .read_only(true)
            .create_if_missing(false)
    }
}

#[async_trait]
impl CredentialBackend for SqliteUserStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn is_available(&self) -> bool {
        let mut conn = match self.options().connect().await {
            Ok(conn) => conn,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "failed to connect to sqlite user db");
                return false;
            }
        };
        let ok = sqlx::query("SELECT 1").execute(&mut conn).await.is_ok();
        if !ok {
            debug!(path = %self.path.display(), "sqlite user db did not answer a probe query");
        }
        ok
    }

    async fn fetch_password_hash(&self, username: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.options().connect().await?;
        let row = sqlx::query("SELECT hashed_password FROM user WHERE username = ?")
            .bind(username)
            .fetch_optional(&mut conn)
            .await?;
        Ok(row.map(|row| sqlite_hash_bytes(&row)).transpose()?)
    }
}

/// User database on a hosted postgres instance, addressed by `DATABASE_URL`.
/// The table is `app_users` because `user` is taken in postgres.
pub struct PostgresUserStore {
    connection_string: Option<String>,
}

impl PostgresUserStore {
    pub fn new(connection_string: Option<String>) -> Self {
        if connection_string.is_none() {
            warn!("DATABASE_URL is not set, postgres user db will be unavailable");
        }
        Self { connection_string }
    }

    async fn connect(&self) -> anyhow::Result<PgConnection> {
        let Some(url) = &self.connection_string else {
            anyhow::bail!("no postgres connection string configured");
        };
        Ok(PgConnection::connect(url).await?)
    }
}

#[async_trait]
impl CredentialBackend for PostgresUserStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn is_available(&self) -> bool {
        let mut conn = match self.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                debug!(error = %e, "failed to establish connection to postgres user db");
                return false;
            }
        };
        sqlx::query("SELECT 1").execute(&mut conn).await.is_ok()
    }

    async fn fetch_password_hash(&self, username: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.connect().await?;
        let row = sqlx::query("SELECT hashed_password FROM app_users WHERE username = $1")
            .bind(username)
            .fetch_optional(&mut conn)
            .await?;
        Ok(row.map(|row| pg_hash_bytes(&row)).transpose()?)
    }
}

/// The hash column may be bytes or text depending on how the database was
/// provisioned; accept both.
fn sqlite_hash_bytes(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Vec<u8>> {
    row.try_get::<Vec<u8>, _>("hashed_password").or_else(|_| {
        row.try_get::<String, _>("hashed_password")
            .map(String::into_bytes)
    })
}

fn pg_hash_bytes(row: &sqlx::postgres::PgRow) -> sqlx::Result<Vec<u8>> {
    row.try_get::<Vec<u8>, _>("hashed_password").or_else(|_| {
        row.try_get::<String, _>("hashed_password")
            .map(String::into_bytes)
    })
}

/// In-memory backend for tests and the fake app state.
#[derive(Default)]
pub struct MemoryUserStore {
    available: bool,
    users: HashMap<String, Vec<u8>>,
}

impl MemoryUserStore {
    pub fn available() -> Self {
        Self {
            available: true,
            users: HashMap::new(),
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, username: &str, stored_hash: impl Into<Vec<u8>>) -> Self {
        self.users.insert(username.to_string(), stored_hash.into());
        self
    }
}

#[async_trait]
impl CredentialBackend for MemoryUserStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn fetch_password_hash(&self, username: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.users.get(username).cloned())
    }
}
