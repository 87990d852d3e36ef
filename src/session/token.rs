//! Bearer token expiry decoding
//!
//! The UI holds no verification key, so the signature is not checked; only
//! the `exp` claim is read.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

/// Why a token's expiry could not be read
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is empty")]
    Missing,

    #[error("invalid token: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    exp: i64,
}

/// Expiry information decoded from a bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub raw_token: String,
    /// `exp` claim, seconds since the Unix epoch
    pub expires_at: i64,
}

impl TokenInfo {
    /// Decode the `exp` claim of a JWT without verifying its signature
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Missing` for an empty token and
    /// `TokenError::Invalid` when the token is malformed or has no `exp`
    pub fn decode(token: &str) -> Result<Self, TokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::Missing);
        }

        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;

        Ok(Self {
            raw_token: token.to_string(),
            expires_at: data.claims.exp,
        })
    }

    /// Seconds until expiry at `now` (negative once expired)
    #[must_use]
    pub const fn remaining_secs(&self, now: i64) -> i64 {
        self.expires_at.saturating_sub(now)
    }

    /// Expiry as a UTC timestamp
    #[must_use]
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expires_at, 0)
    }
}

/// Whole minutes in `secs`, rounded half up
#[must_use]
pub const fn rounded_minutes(secs: i64) -> i64 {
    secs.saturating_add(30).div_euclid(60)
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Claims {
        sub: &'static str,
        exp: i64,
    }

    #[test]
    fn reads_exp_without_the_signing_key() {
        let token = encode(
            &Header::default(),
            &Claims {
                sub: "cashier",
                exp: 1_900_000_000,
            },
            &EncodingKey::from_secret(b"server-side-secret"),
        )
        .unwrap();

        let info = TokenInfo::decode(&token).unwrap();
        assert_eq!(info.expires_at, 1_900_000_000);
        assert_eq!(info.remaining_secs(1_899_999_880), 120);
    }

    #[test]
    fn expired_tokens_still_decode() {
        let token = encode(
            &Header::default(),
            &Claims { sub: "x", exp: 1 },
            &EncodingKey::from_secret(b"k"),
        )
        .unwrap();
        assert!(TokenInfo::decode(&token).unwrap().remaining_secs(100) < 0);
    }

    #[test]
    fn missing_exp_is_invalid() {
        #[derive(Serialize)]
        struct NoExp {
            sub: &'static str,
        }
        let token = encode(
            &Header::default(),
            &NoExp { sub: "x" },
            &EncodingKey::from_secret(b"k"),
        )
        .unwrap();
        assert!(matches!(TokenInfo::decode(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn garbage_and_empty_tokens() {
        assert_eq!(TokenInfo::decode("  "), Err(TokenError::Missing));
        assert!(matches!(TokenInfo::decode("not.a.jwt"), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn minutes_round_like_the_ui() {
        assert_eq!(rounded_minutes(89), 1);
        assert_eq!(rounded_minutes(90), 2);
        assert_eq!(rounded_minutes(29), 0);
        assert_eq!(rounded_minutes(-90), -1);
    }
}
