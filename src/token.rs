//! Manage json web tokens.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Token as TokenConfig;
use crate::error::{Result, ServerError};

const SECONDS_PER_DAY: u64 = 60 * 60 * 24;

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Recipients that the JWT is intended for.
    pub aud: String,
    /// Expiration time, in seconds since epoch.
    pub exp: u64,
    /// Identifies the time at which the JWT was issued.
    pub iat: u64,
    /// Identifies the organization that issued the JWT.
    pub iss: String,
    /// User ID.
    pub sub: String,
}

/// Manage HS256 tokens.
#[derive(Clone)]
pub struct TokenManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    lifetime: u64,
}

impl TokenManager {
    /// Create a new [`TokenManager`] instance.
    ///
    /// Without a configured secret a random one is drawn: tokens then do not
    /// survive a restart.
    pub fn new(config: &TokenConfig) -> Self {
        let secret = match config.secret.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => secret.as_bytes().to_vec(),
            None => {
                tracing::warn!("missing `JWT_SECRET`, tokens are signed with an ephemeral key");
                let mut bytes = vec![0u8; 64];
                OsRng.fill_bytes(&mut bytes);
                bytes
            },
        };

        Self {
            encoding: EncodingKey::from_secret(&secret),
            decoding: DecodingKey::from_secret(&secret),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            lifetime: config.expiration_days * SECONDS_PER_DAY,
        }
    }

    /// Token lifetime in seconds.
    pub fn lifetime(&self) -> u64 {
        self.lifetime
    }

    /// Create a new [`jsonwebtoken`].
    pub fn create(&self, user_id: Uuid) -> Result<String> {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| ServerError::internal("clock before unix epoch", err))?
            .as_secs();
        let claims = Claims {
            aud: self.audience.clone(),
            exp: time + self.lifetime,
            iat: time,
            iss: self.issuer.clone(),
            sub: user_id.to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| ServerError::internal("cannot sign token", err))
    }

    /// Decode and check a token.
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| {
                tracing::debug!(error = %err, "token rejected");
                ServerError::Unauthorized
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: &str) -> TokenConfig {
        TokenConfig {
            secret: Some(secret.to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn test_round_trip_claims() {
        let manager = TokenManager::new(&config("milk"));
        let user = Uuid::new_v4();

        let claims = manager.decode(&manager.create(user).unwrap()).unwrap();
        assert_eq!(claims.sub, user.to_string());
        assert_eq!(claims.iss, "milkit");
        assert_eq!(claims.exp - claims.iat, 30 * SECONDS_PER_DAY);
    }

    #[test]
    fn test_foreign_tokens_are_rejected() {
        let token = TokenManager::new(&config("one")).create(Uuid::new_v4()).unwrap();

        assert!(matches!(
            TokenManager::new(&config("two")).decode(&token),
            Err(ServerError::Unauthorized)
        ));
        assert!(TokenManager::new(&config("one")).decode("not.a.jwt").is_err());
    }
}
