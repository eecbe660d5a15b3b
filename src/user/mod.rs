//! Accounts owning milk records.
mod memory;
mod repository;
mod service;

pub use memory::*;
pub use repository::*;
pub use service::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub phone: String,
    #[serde(skip)]
    pub password_hash: String,
    #[serde(skip)]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

impl User {
    /// New active account. `username` is stored trimmed and lower-cased.
    pub fn new(username: &str, phone: &str, password_hash: String, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: normalize_username(username),
            phone: phone.trim().to_owned(),
            password_hash,
            is_active: true,
            created_at: at,
            last_login: at,
        }
    }
}

pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Profile fields to change. `None` keeps the stored value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub phone: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.phone.is_none()
    }
}
