// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Admin authentication and action nonces.
//!
//! Admin routes require the configured API key. State-changing admin actions
//! additionally require a nonce bound to the action name, valid for between
//! 12 and 24 hours after issue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::AppError;

pub const REGENERATE_ACTION: &str = "regenerate-feed";
pub const DELETE_ACTION: &str = "delete-feed";
pub const FLUSH_ACTION: &str = "flush-feed";

/// Half of a nonce's lifetime, in seconds.
const NONCE_TICK_SECS: i64 = 12 * 60 * 60;
const NONCE_HEX_LEN: usize = 20;

/// Admin API key check
#[derive(Clone, Default)]
pub struct AdminAuth {
    api_key: Option<Arc<str>>,
}

impl AdminAuth {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
                .map(Arc::from),
        }
    }

    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Validate a presented key. Without a configured key every admin
    /// request is refused.
    pub fn authorize(&self, presented: Option<&str>) -> Result<(), AppError> {
        let Some(expected) = self.api_key.as_deref() else {
            return Err(AppError::unauthorized("admin access is not configured"));
        };

        let Some(presented) = presented else {
            return Err(AppError::unauthorized("missing admin API key"));
        };

        if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(())
        } else {
            tracing::warn!("rejected admin request with invalid API key");
            Err(AppError::unauthorized("invalid admin API key"))
        }
    }
}

/// Issues and checks action nonces.
#[derive(Clone)]
pub struct NonceVerifier {
    secret: Arc<[u8]>,
}

impl NonceVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    pub fn create(&self, action: &str) -> String {
        self.create_at(action, Utc::now())
    }

    pub fn create_at(&self, action: &str, now: DateTime<Utc>) -> String {
        self.digest(action, tick(now))
    }

    pub fn verify(&self, nonce: &str, action: &str) -> bool {
        self.verify_at(nonce, action, Utc::now())
    }

    /// Accepts nonces from the current tick or the one before it.
    pub fn verify_at(&self, nonce: &str, action: &str, now: DateTime<Utc>) -> bool {
        let nonce = nonce.trim();
        if nonce.is_empty() {
            return false;
        }

        let current = tick(now);
        [current, current - 1].into_iter().any(|tick| {
            let expected = self.digest(action, tick);
            bool::from(nonce.as_bytes().ct_eq(expected.as_bytes()))
        })
    }

    /// Verify or fail with 403.
    pub fn require(&self, nonce: Option<&str>, action: &str) -> Result<(), AppError> {
        match nonce {
            Some(nonce) if self.verify(nonce, action) => Ok(()),
            _ => {
                tracing::warn!(action, "rejected request with missing or invalid nonce");
                Err(AppError::forbidden("invalid or expired nonce"))
            }
        }
    }

    fn digest(&self, action: &str, tick: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(tick.to_be_bytes());
        hasher.update(b"|");
        hasher.update(action.as_bytes());
        let mut encoded = hex::encode(hasher.finalize());
        encoded.truncate(NONCE_HEX_LEN);
        encoded
    }
}

fn tick(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(NONCE_TICK_SECS) + 1
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(auth_header: Option<&str>) -> Option<&str> {
    auth_header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extract API key from X-API-Key header
pub fn extract_api_key(header: Option<&str>) -> Option<&str> {
    header.map(str::trim).filter(|h| !h.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    #[test]
    fn admin_key_must_match() {
        let auth = AdminAuth::new(Some("s3cret".to_string()));
        assert!(auth.enabled());
        assert!(auth.authorize(Some("s3cret")).is_ok());
        assert!(matches!(auth.authorize(Some("nope")), Err(AppError::Unauthorized(_))));
        assert!(matches!(auth.authorize(None), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn unconfigured_admin_refuses_everything() {
        let auth = AdminAuth::new(Some("   ".to_string()));
        assert!(!auth.enabled());
        assert!(auth.authorize(Some("")).is_err());
        assert!(AdminAuth::default().authorize(Some("anything")).is_err());
    }

    #[test]
    fn nonce_is_bound_to_action_and_secret() {
        let verifier = NonceVerifier::new("secret");
        let nonce = verifier.create_at(REGENERATE_ACTION, at(0));

        assert_eq!(nonce.len(), NONCE_HEX_LEN);
        assert!(verifier.verify_at(&nonce, REGENERATE_ACTION, at(0)));
        assert!(!verifier.verify_at(&nonce, DELETE_ACTION, at(0)));
        assert!(!NonceVerifier::new("other").verify_at(&nonce, REGENERATE_ACTION, at(0)));
        assert!(!verifier.verify_at("", REGENERATE_ACTION, at(0)));
    }

    #[test]
    fn nonce_survives_one_tick_and_then_expires() {
        let verifier = NonceVerifier::new("secret");
        let nonce = verifier.create_at(FLUSH_ACTION, at(1));

        assert!(verifier.verify_at(&nonce, FLUSH_ACTION, at(13)));
        assert!(!verifier.verify_at(&nonce, FLUSH_ACTION, at(25)));
    }

    #[test]
    fn require_maps_to_forbidden() {
        let verifier = NonceVerifier::new("secret");
        let nonce = verifier.create(DELETE_ACTION);
        assert!(verifier.require(Some(&nonce), DELETE_ACTION).is_ok());
        assert!(matches!(
            verifier.require(None, DELETE_ACTION),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn header_extraction() {
        assert_eq!(extract_bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(extract_bearer_token(Some("Basic abc")), None);
        assert_eq!(extract_api_key(Some(" key ")), Some("key"));
        assert_eq!(extract_api_key(Some("")), None);
    }
}
