use std::fs;
use std::path::PathBuf;

use anyhow::Context;

/// Where receipt data lives. With `use_user` set (the default) every user gets
/// their own subtree under the root.
#[derive(Debug, Clone)]
pub struct DataConfig {
    pub root_dir: PathBuf,
    pub extraction_subdir: String,
    pub collation_subdir: String,
    pub use_user: bool,
}

impl DataConfig {
    fn user_root(&self, username: Option<&str>) -> PathBuf {
        match (self.use_user, username) {
            (true, Some(username)) => self.root_dir.join(username),
            _ => self.root_dir.clone(),
        }
    }

    pub fn extraction_dir(&self, username: Option<&str>) -> PathBuf {
        self.user_root(username).join(&self.extraction_subdir)
    }

    pub fn collation_dir(&self, username: Option<&str>) -> PathBuf {
        self.user_root(username).join(&self.collation_subdir)
    }

    /// Create the extraction and collation directories if needed.
    pub fn ensure_dirs(&self, username: Option<&str>) -> anyhow::Result<()> {
        for dir in [self.extraction_dir(username), self.collation_dir(username)] {
            fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: Option<String>,
    pub key_file: Option<PathBuf>,
    pub model: String,
    pub max_tokens: u32,
    pub max_retries: u32,
}

impl AnthropicConfig {
    /// The key from the environment, or the first line of the key file.
    pub fn resolve_api_key(&self) -> anyhow::Result<String> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        let Some(path) = &self.key_file else {
            anyhow::bail!("neither ANTHROPIC_API_KEY nor ANTHROPIC_KEY_FILE is set");
        };
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading anthropic key file {}", path.display()))?;
        let key = contents.lines().next().unwrap_or_default().trim();
        if key.is_empty() {
            anyhow::bail!("anthropic key file {} is empty", path.display());
        }
        Ok(key.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub count: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data: DataConfig,
    pub anthropic: AnthropicConfig,
    pub rate_limit: RateLimitConfig,
    pub user_db_path: PathBuf,
    pub database_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let data = DataConfig {
            root_dir: PathBuf::from(env_or("DATA_ROOT_DIR", "./data")),
            extraction_subdir: env_or("EXTRACTION_SUBDIR", "extractions"),
            collation_subdir: env_or("COLLATION_SUBDIR", "collations"),
            use_user: std::env::var("USE_USER")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        };

        let anthropic = AnthropicConfig {
            api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            key_file: std::env::var("ANTHROPIC_KEY_FILE").ok().map(PathBuf::from),
            model: env_or("ANTHROPIC_MODEL", "claude-3-5-sonnet-latest"),
            max_tokens: env_parse("ANTHROPIC_MAX_TOKENS", 4096),
            max_retries: env_parse("EXTRACT_MAX_RETRIES", 3),
        };

        let rate_limit = RateLimitConfig {
            count: env_parse("RATE_LIMIT_COUNT", 1),
            window_secs: env_parse("RATE_LIMIT_WINDOW_SECS", 60),
        };

        Ok(Self {
            data,
            anthropic,
            rate_limit,
            user_db_path: PathBuf::from(env_or("USER_DB_PATH", "user.db")),
            database_url: std::env::var("DATABASE_URL").ok(),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
