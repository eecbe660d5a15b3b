//! In-process user store.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::user::{PHONE_KEY, ProfileUpdate, Result, USERNAME_KEY, User, UserStore};

/// [`UserStore`] kept in memory. Data is lost on restart.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// First unique key of `candidate` already held by another user.
fn taken_key(users: &HashMap<Uuid, User>, candidate: &User) -> Option<&'static str> {
    let others = users.values().filter(|u| u.id != candidate.id);
    for other in others {
        if other.username == candidate.username {
            return Some(USERNAME_KEY);
        }
        if other.phone == candidate.phone {
            return Some(PHONE_KEY);
        }
    }
    None
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: &User) -> Result<()> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(key) = taken_key(&users, user) {
            return Err(StoreError::Conflict(key));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        Ok(users.get(&id).cloned())
    }

    async fn find_active_by_login(&self, identifier: &str) -> Result<Option<User>> {
        let username = super::normalize_username(identifier);
        let phone = identifier.trim();

        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        Ok(users
            .values()
            .find(|u| u.is_active && (u.username == username || u.phone == phone))
            .cloned())
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<Option<User>> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let Some(mut user) = users.get(&id).cloned() else {
            return Ok(None);
        };
        if let Some(username) = &update.username {
            user.username = username.clone();
        }
        if let Some(phone) = &update.phone {
            user.phone = phone.clone();
        }
        if let Some(key) = taken_key(&users, &user) {
            return Err(StoreError::Conflict(key));
        }

        users.insert(id, user.clone());
        Ok(Some(user))
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.password_hash = password_hash.to_owned();
        Ok(())
    }

    async fn touch_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(user) = users.get_mut(&id) {
            user.last_login = at;
        }
        Ok(())
    }
}
