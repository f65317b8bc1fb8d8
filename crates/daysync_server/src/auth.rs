//! Authentication support for the sync server.
//!
//! This module provides bearer tokens signed with HMAC-SHA256. A token binds
//! a user id and an issue timestamp; validation yields the user id.
//!
//! ## Token Format
//!
//! Tokens are composed of:
//! - 2 bytes: user id length (big-endian)
//! - N bytes: user id (UTF-8)
//! - 8 bytes: timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature
//!
//! The whole token is hex-encoded for transport.

use crate::error::{ServerError, ServerResult};
use daysync_protocol::now_millis;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_LEN: usize = 32;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60), // 24 hours
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and validates user tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a new auth token for a user.
    pub fn create_token(&self, user_id: &str) -> ServerResult<String> {
        let user = user_id.as_bytes();
        let user_len = u16::try_from(user.len())
            .map_err(|_| ServerError::InvalidRequest("user id too long".into()))?;
        if user.is_empty() {
            return Err(ServerError::InvalidRequest("empty user id".into()));
        }

        let mut data = Vec::with_capacity(2 + user.len() + 8 + SIGNATURE_LEN);
        data.extend_from_slice(&user_len.to_be_bytes());
        data.extend_from_slice(user);
        data.extend_from_slice(&now_millis().to_be_bytes());

        let signature = self.mac(&data)?.finalize().into_bytes();
        data.extend_from_slice(&signature);
        Ok(hex::encode(data))
    }

    /// Validates a token and returns the user id it was issued for.
    pub fn validate_token(&self, token: &str) -> ServerResult<String> {
        let raw = hex::decode(token.trim())
            .map_err(|_| ServerError::AuthenticationFailed("malformed token".into()))?;
        if raw.len() < 2 {
            return Err(ServerError::AuthenticationFailed("invalid token length".into()));
        }

        let user_len = u16::from_be_bytes([raw[0], raw[1]]) as usize;
        if user_len == 0 || raw.len() != 2 + user_len + 8 + SIGNATURE_LEN {
            return Err(ServerError::AuthenticationFailed("invalid token length".into()));
        }
        let (data, signature) = raw.split_at(2 + user_len + 8);

        self.mac(data)?
            .verify_slice(signature)
            .map_err(|_| ServerError::AuthenticationFailed("invalid signature".into()))?;

        let mut ts = [0u8; 8];
        ts.copy_from_slice(&data[2 + user_len..]);
        let issued_at = u64::from_be_bytes(ts);
        let expiry_millis = self.config.token_expiry.as_millis() as u64;
        if now_millis() > issued_at.saturating_add(expiry_millis) {
            return Err(ServerError::AuthenticationFailed("token expired".into()));
        }

        String::from_utf8(data[2..2 + user_len].to_vec())
            .map_err(|_| ServerError::AuthenticationFailed("invalid user id".into()))
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

/// Resolves the calling user of a request.
#[derive(Clone)]
pub enum Authenticator {
    /// Development mode: the user id is taken from a plain header.
    Disabled,
    /// Bearer tokens are required.
    Tokens(TokenValidator),
}

impl Authenticator {
    /// Resolves the user from a bearer token or, in development mode, a user header.
    ///
    /// Runs before any state is touched; failure means no partial effects.
    pub fn resolve_user(
        &self,
        bearer: Option<&str>,
        user_header: Option<&str>,
    ) -> ServerResult<String> {
        match self {
            Authenticator::Tokens(validator) => {
                let token = bearer
                    .ok_or_else(|| ServerError::AuthenticationFailed("missing bearer token".into()))?;
                validator.validate_token(token)
            }
            Authenticator::Disabled => match user_header.map(str::trim) {
                Some(user) if !user.is_empty() => Ok(user.to_string()),
                _ => Err(ServerError::AuthenticationFailed("missing user id".into())),
            },
        }
    }
}
