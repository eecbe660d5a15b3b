//! Configuration manager for MilkIt.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Listening address.
    pub address: String,
    /// Listening port. `PORT` environment variable takes precedence.
    pub port: u16,
    #[serde(skip_deserializing)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to PostgreSQL configuration.
    /// Records are kept in process memory when missing.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to JsonWebToken configuration.
    #[serde(skip_serializing)]
    pub token: Token,
    /// Per-IP request limits. Disabled when missing.
    #[serde(skip_serializing)]
    pub rate_limit: Option<RateLimit>,
    /// Old records purge.
    #[serde(skip_serializing)]
    pub retention: Retention,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: "MilkIt".into(),
            address: "0.0.0.0".into(),
            port: 3000,
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            postgres: None,
            argon2: None,
            token: Token::default(),
            rate_limit: None,
            retention: Retention::default(),
        }
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Json Web Token configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Token {
    /// HMAC secret. `JWT_SECRET` environment variable takes precedence.
    pub secret: Option<String>,
    pub issuer: String,
    pub audience: String,
    /// Token lifetime in days.
    pub expiration_days: u64,
}

impl Default for Token {
    fn default() -> Self {
        Self {
            secret: None,
            issuer: "milkit".into(),
            audience: "milkit-app".into(),
            expiration_days: 30,
        }
    }
}

/// Sliding window limits, counted per client IP.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    /// Window size in seconds.
    pub window_secs: u64,
    /// Requests allowed per window on every route.
    pub max_requests: u64,
    /// Requests allowed per window on signup and login.
    pub auth_max_requests: u64,
    /// Count clients by the first `X-Forwarded-For` entry instead of the
    /// socket address. Clients can forge this header when no proxy
    /// rewrites it.
    pub trust_proxy: bool,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            window_secs: 15 * 60,
            max_requests: 100,
            auth_max_requests: 5,
            trust_proxy: false,
        }
    }
}

/// Retention sweeper configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Retention {
    /// Records created more than this many months ago are purged.
    pub months: u32,
    /// UTC hour of the day the sweep runs at.
    pub hour: u32,
}

impl Default for Retention {
    fn default() -> Self {
        Self { months: 6, hour: 2 }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Arc<Self> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let mut config = match File::open(file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Configuration>(file) {
                Ok(config) => config,
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        // set app version.
        config.version = VERSION.to_owned();

        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            config.token.secret = Some(secret);
        }
        if config.retention.hour > 23 {
            tracing::warn!(hour = config.retention.hour, "invalid retention hour, using 2");
            config.retention.hour = Retention::default().hour;
        }

        Arc::new(config)
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid");
        Self::default()
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}
