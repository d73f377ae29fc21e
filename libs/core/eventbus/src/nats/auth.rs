//! Authentication strategy resolution.

use crate::config::env_non_empty;
use crate::error::EventBusError;
use async_nats::ConnectOptions;
use std::fmt;
use std::sync::Arc;

pub const NATS_JWT_TOKEN: &str = "NATS_JWT_TOKEN";
pub const NATS_NKEY_SEED: &str = "NATS_NKEY_SEED";
pub const NATS_USERNAME: &str = "NATS_USERNAME";
pub const NATS_PASSWORD: &str = "NATS_PASSWORD";
pub const NATS_TOKEN: &str = "NATS_TOKEN";

/// How a connection authenticates.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    /// User JWT signed with the companion nkey seed.
    Jwt { jwt: String, seed: String },
    UserPassword { username: String, password: String },
    Token(String),
    #[default]
    Anonymous,
}

impl Credentials {
    /// Resolve credentials from the process environment.
    ///
    /// First match wins: JWT + seed, username + password, static token,
    /// otherwise anonymous. Empty variables count as unset.
    pub fn from_env() -> Result<Self, EventBusError> {
        Self::resolve(env_non_empty)
    }

    /// Resolve credentials from an arbitrary variable lookup.
    pub fn resolve<F>(lookup: F) -> Result<Self, EventBusError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(jwt) = lookup(NATS_JWT_TOKEN) {
            let seed = lookup(NATS_NKEY_SEED).ok_or_else(|| {
                EventBusError::Auth(format!(
                    "{} is required when using JWT authentication",
                    NATS_NKEY_SEED
                ))
            })?;
            return Ok(Credentials::Jwt { jwt, seed });
        }

        if let Some(username) = lookup(NATS_USERNAME) {
            let password = lookup(NATS_PASSWORD).unwrap_or_default();
            return Ok(Credentials::UserPassword { username, password });
        }

        if let Some(token) = lookup(NATS_TOKEN) {
            return Ok(Credentials::Token(token));
        }

        Ok(Credentials::Anonymous)
    }

    /// Short name of the strategy, safe to log.
    pub fn strategy(&self) -> &'static str {
        match self {
            Credentials::Jwt { .. } => "jwt",
            Credentials::UserPassword { .. } => "user_password",
            Credentials::Token(_) => "token",
            Credentials::Anonymous => "anonymous",
        }
    }

    /// Apply the strategy to NATS connect options.
    pub fn apply(&self, options: ConnectOptions) -> Result<ConnectOptions, EventBusError> {
        let options = match self {
            Credentials::Jwt { jwt, seed } => {
                let key_pair = nkeys::KeyPair::from_seed(seed)
                    .map_err(|e| EventBusError::Auth(format!("invalid nkey seed: {}", e)))?;
                let key_pair = Arc::new(key_pair);
                options.jwt(jwt.clone(), move |nonce| {
                    let key_pair = key_pair.clone();
                    async move { key_pair.sign(&nonce).map_err(async_nats::AuthError::new) }
                })
            }
            Credentials::UserPassword { username, password } => {
                options.user_and_password(username.clone(), password.clone())
            }
            Credentials::Token(token) => options.token(token.clone()),
            Credentials::Anonymous => options,
        };
        Ok(options)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Jwt { .. } => f.write_str("Credentials::Jwt { .. }"),
            Credentials::UserPassword { username, .. } => f
                .debug_struct("Credentials::UserPassword")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Credentials::Token(_) => f.write_str("Credentials::Token(***)"),
            Credentials::Anonymous => f.write_str("Credentials::Anonymous"),
        }
    }
}
