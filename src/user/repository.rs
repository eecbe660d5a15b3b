//! Handle user persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::StoreError;
use crate::user::{ProfileUpdate, User};

pub type Result<T> = std::result::Result<T, StoreError>;

pub const USERNAME_KEY: &str = "username";
pub const PHONE_KEY: &str = "phone";
const CONSTRAINTS: &[(&str, &'static str)] = &[
    ("users_username_key", USERNAME_KEY),
    ("users_phone_key", PHONE_KEY),
];

/// Persistence of [`User`]. `username` and `phone` are each unique.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user. Fails with [`StoreError::Conflict`] naming the
    /// taken key.
    async fn insert(&self, user: &User) -> Result<()>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Active user whose username or phone is `identifier`.
    async fn find_active_by_login(&self, identifier: &str) -> Result<Option<User>>;

    /// Change username and/or phone, re-checking uniqueness.
    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<Option<User>>;

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()>;

    async fn touch_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

#[derive(Debug, Clone)]
enum Field {
    Id,
    Login,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Field::Id => write!(f, "id = $1"),
            Field::Login => write!(f, "(username = $1 OR phone = $2) AND is_active"),
        }
    }
}

fn get_by_field_query(field: Field) -> String {
    format!(
        r#"SELECT id, username, phone, password_hash, is_active, created_at, last_login
            FROM users
            WHERE {field}"#
    )
}

/// PostgreSQL-backed [`UserStore`].
#[derive(Clone)]
pub struct PgUserStore {
    pool: Pool<Postgres>,
}

impl PgUserStore {
    /// Create a new [`PgUserStore`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO users (id, username, phone, password_hash, is_active, created_at, last_login)
                VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.phone)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.last_login)
        .execute(&self.pool)
        .await
        .map_err(|err| StoreError::from_sql(err, CONSTRAINTS))?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(sqlx::query_as::<_, User>(&get_by_field_query(Field::Id))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_active_by_login(&self, identifier: &str) -> Result<Option<User>> {
        Ok(sqlx::query_as::<_, User>(&get_by_field_query(Field::Login))
            .bind(super::normalize_username(identifier))
            .bind(identifier.trim())
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"UPDATE users
                SET username = COALESCE($2, username), phone = COALESCE($3, phone)
                WHERE id = $1
                RETURNING id, username, phone, password_hash, is_active, created_at, last_login"#,
        )
        .bind(id)
        .bind(update.username.as_deref())
        .bind(update.phone.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| StoreError::from_sql(err, CONSTRAINTS))
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn touch_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
