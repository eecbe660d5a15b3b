use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::crypto::{CryptoError, PasswordManager};
use crate::error::{Result, ServerError, StoreError};
use crate::token::TokenManager;
use crate::user::{ProfileUpdate, User, UserStore};

/// Account manager.
#[derive(Clone)]
pub struct UserService {
    pub repo: Arc<dyn UserStore>,
    pub pwd: Arc<PasswordManager>,
    pub token: TokenManager,
    clock: Arc<dyn Clock>,
}

fn conflict(err: StoreError) -> ServerError {
    match err {
        StoreError::Conflict(key) => ServerError::Conflict(format!("{key} already exists")),
        err => err.into(),
    }
}

impl UserService {
    /// Create a new [`UserService`].
    pub fn new(
        repo: Arc<dyn UserStore>,
        pwd: Arc<PasswordManager>,
        token: TokenManager,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            pwd,
            token,
            clock,
        }
    }

    fn hash(&self, password: &str) -> Result<String> {
        self.pwd
            .hash_password(password)
            .map_err(|err| ServerError::internal("cannot hash password", err))
    }

    /// Create an account and sign its first token.
    pub async fn signup(&self, username: &str, phone: &str, password: &str) -> Result<(User, String)> {
        let user = User::new(username, phone, self.hash(password)?, self.clock.now());
        self.repo.insert(&user).await.map_err(conflict)?;

        tracing::info!(user_id = %user.id, "user created");
        let token = self.token.create(user.id)?;
        Ok((user, token))
    }

    /// Log in by username or phone. Only active accounts may log in.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<(User, String)> {
        let Some(mut user) = self.repo.find_active_by_login(identifier).await? else {
            return Err(ServerError::InvalidCredentials(
                "User not found or account deactivated",
            ));
        };

        match self.pwd.verify_password(password, &user.password_hash) {
            Ok(()) => (),
            Err(CryptoError::Mismatch) => {
                return Err(ServerError::InvalidCredentials("Incorrect password"));
            },
            Err(err) => return Err(ServerError::internal("stored hash is not valid", err)),
        }

        user.last_login = self.clock.now();
        self.repo.touch_login(user.id, user.last_login).await?;

        let token = self.token.create(user.id)?;
        Ok((user, token))
    }

    /// Resolve a bearer token to an active user.
    pub async fn authenticate(&self, token: &str) -> Result<User> {
        let claims = self.token.decode(token)?;
        let id = Uuid::parse_str(&claims.sub).map_err(|_| ServerError::Unauthorized)?;

        self.repo
            .find_by_id(id)
            .await?
            .filter(|user| user.is_active)
            .ok_or(ServerError::Unauthorized)
    }

    pub async fn update_profile(&self, user: &User, mut update: ProfileUpdate) -> Result<User> {
        update.username = update.username.as_deref().map(super::normalize_username);
        update.phone = update.phone.map(|p| p.trim().to_owned());
        if update.is_empty() {
            return Err(ServerError::invalid(
                "No valid fields to update.",
                vec!["Provide a username or a phone number".to_owned()],
            ));
        }

        self.repo
            .update_profile(user.id, &update)
            .await
            .map_err(conflict)?
            .ok_or(ServerError::NotFound("User not found"))
    }

    /// Replace the password after checking the current one.
    pub async fn change_password(&self, user: &User, current: &str, new: &str) -> Result<()> {
        match self.pwd.verify_password(current, &user.password_hash) {
            Ok(()) => (),
            Err(CryptoError::Mismatch) => {
                return Err(ServerError::InvalidCredentials("Current password is incorrect"));
            },
            Err(err) => return Err(ServerError::internal("stored hash is not valid", err)),
        }

        self.repo.update_password(user.id, &self.hash(new)?).await?;
        tracing::info!(user_id = %user.id, "password changed");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::Utc;

    use super::*;
    use crate::clock::FixedClock;
    use crate::config::{Argon2, Token};
    use crate::user::MemoryUserStore;

    pub(crate) fn service() -> UserService {
        let pwd = PasswordManager::new(Some(Argon2 {
            memory_cost: 1024,
            iterations: 1,
            parallelism: 1,
            hash_length: 32,
        }))
        .unwrap();
        let token = TokenManager::new(&Token {
            secret: Some("test".into()),
            ..Default::default()
        });

        UserService::new(
            Arc::new(MemoryUserStore::new()),
            Arc::new(pwd),
            token,
            Arc::new(FixedClock::at("2024-03-15T09:30:00Z")),
        )
    }

    #[tokio::test]
    async fn test_signup_then_login() {
        let service = service();
        let (user, token) = service.signup("Milkman", "9876543210", "secret").await.unwrap();
        assert_eq!(service.authenticate(&token).await.unwrap().id, user.id);

        let (logged, _) = service.login("MILKMAN", "secret").await.unwrap();
        assert_eq!(logged.id, user.id);
        let (logged, _) = service.login("9876543210", "secret").await.unwrap();
        assert_eq!(logged.id, user.id);

        assert!(matches!(
            service.login("milkman", "wrong!").await,
            Err(ServerError::InvalidCredentials("Incorrect password"))
        ));
        assert!(matches!(
            service.login("nobody", "secret").await,
            Err(ServerError::InvalidCredentials(_))
        ));
    }

    #[tokio::test]
    async fn test_signup_conflicts() {
        let service = service();
        service.signup("milkman", "9876543210", "secret").await.unwrap();

        let err = service.signup("other", "9876543210", "secret").await.unwrap_err();
        assert!(matches!(err, ServerError::Conflict(ref m) if m == "phone already exists"));
    }

    #[tokio::test]
    async fn test_deactivated_user_cannot_authenticate() {
        let base = service();
        let mut user = User::new("milkman", "9876543210", "hash".into(), Utc::now());
        user.is_active = false;
        let repo = MemoryUserStore::new();
        repo.insert(&user).await.unwrap();

        let service = UserService::new(
            Arc::new(repo),
            Arc::clone(&base.pwd),
            base.token.clone(),
            Arc::new(FixedClock::at("2024-03-15T09:30:00Z")),
        );
        let token = service.token.create(user.id).unwrap();

        assert!(matches!(
            service.authenticate(&token).await,
            Err(ServerError::Unauthorized)
        ));
        assert!(service.login("milkman", "secret").await.is_err());
    }

    #[tokio::test]
    async fn test_change_password() {
        let service = service();
        let (user, _) = service.signup("milkman", "9876543210", "secret").await.unwrap();

        assert!(service.change_password(&user, "nope", "newsecret").await.is_err());
        service.change_password(&user, "secret", "newsecret").await.unwrap();
        assert!(service.login("milkman", "newsecret").await.is_ok());
        assert!(service.login("milkman", "secret").await.is_err());
    }

    #[tokio::test]
    async fn test_update_profile() {
        let service = service();
        let (user, _) = service.signup("milkman", "9876543210", "secret").await.unwrap();
        service.signup("dairy", "1234567890", "secret").await.unwrap();

        assert!(matches!(
            service.update_profile(&user, ProfileUpdate::default()).await,
            Err(ServerError::Invalid { .. })
        ));
        assert!(matches!(
            service
                .update_profile(
                    &user,
                    ProfileUpdate {
                        username: Some("Dairy".into()),
                        phone: None
                    }
                )
                .await,
            Err(ServerError::Conflict(_))
        ));

        let updated = service
            .update_profile(
                &user,
                ProfileUpdate {
                    username: Some(" Milk_Man ".into()),
                    phone: Some("5555555555".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.username, "milk_man");
        assert_eq!(updated.phone, "5555555555");
    }
}
