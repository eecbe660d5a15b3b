//! Storage backends for users and records.
use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::Postgres;
use crate::record::{MemoryRecordStore, PgRecordStore, RecordStore};
use crate::user::{MemoryUserStore, PgUserStore, UserStore};

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "milkit";
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Stores shared by every route.
#[derive(Clone)]
pub struct Database {
    pub users: Arc<dyn UserStore>,
    pub records: Arc<dyn RecordStore>,
}

impl Database {
    /// Connect to PostgreSQL and run pending migrations.
    pub async fn postgres(config: &Postgres) -> Result<Self, Box<dyn std::error::Error>> {
        let username = config.username.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let password = config.password.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let db = config.database.as_deref().unwrap_or(DEFAULT_DATABASE_NAME);
        let hostname = &config.address;

        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let pool: PgPool = PgPoolOptions::new()
            .max_connections(config.pool_size.unwrap_or(DEFAULT_POOL_SIZE))
            .connect(&addr)
            .await?;

        tracing::info!(%hostname, %db, "postgres connected");

        // execute migrations scripts on start.
        sqlx::migrate!().run(&pool).await?;

        Ok(Self {
            users: Arc::new(PgUserStore::new(pool.clone())),
            records: Arc::new(PgRecordStore::new(pool)),
        })
    }

    /// Process-local stores.
    pub fn memory() -> Self {
        Self {
            users: Arc::new(MemoryUserStore::new()),
            records: Arc::new(MemoryRecordStore::new()),
        }
    }
}
