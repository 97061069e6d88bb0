//! Handshake authentication.
//!
//! A credential token is presented once, at connection establishment, and
//! gates all subsequent event handling. The token is read from the
//! `Authorization: Bearer` header when present, falling back to the `token`
//! query parameter; it is verified as an HS256 JWT against the configured
//! secret. The user-identity claim tolerates two legacy field names
//! (`userId` and `id`) left behind by earlier token issuers.

use crate::config::AuthConfig;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

/// Authentication failures. The display form is what rejected connections
/// see.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Neither token slot was populated.
    #[error("Authentication error: No token provided")]
    MissingToken,

    /// Signature, expiry, or claim verification failed.
    #[error("Authentication error: {0}")]
    Verification(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(rename = "userId", alias = "id")]
    user_id: Uuid,
}

/// Resolve the connection's credential to a user identity.
///
/// # Errors
///
/// Returns [`AuthError::MissingToken`] when no token is presented, or
/// [`AuthError::Verification`] when the token fails validation.
pub fn authenticate(
    headers: &HeaderMap,
    query_token: Option<&str>,
    config: &AuthConfig,
) -> Result<Uuid, AuthError> {
    let token = bearer_token(headers)
        .or(query_token)
        .ok_or(AuthError::MissingToken)?;
    verify(token, config)
}

/// Verify a raw token and extract the user-identity claim.
///
/// # Errors
///
/// Returns [`AuthError::Verification`] on any signature, expiry, or claim
/// failure.
pub fn verify(token: &str, config: &AuthConfig) -> Result<Uuid, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = config.leeway_secs;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )?;

    Ok(data.claims.user_id)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".to_string(),
            leeway_secs: 0,
        }
    }

    fn token_for(claims: serde_json::Value, secret: &str) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn fresh_exp() -> i64 {
        (Utc::now() + Duration::hours(1)).timestamp()
    }

    #[test]
    fn test_valid_token_from_query() {
        let user_id = Uuid::new_v4();
        let token = token_for(json!({ "userId": user_id, "exp": fresh_exp() }), "test-secret");

        let resolved = authenticate(&HeaderMap::new(), Some(&token), &config()).unwrap();
        assert_eq!(resolved, user_id);
    }

    #[test]
    fn test_legacy_id_claim_is_accepted() {
        let user_id = Uuid::new_v4();
        let token = token_for(json!({ "id": user_id, "exp": fresh_exp() }), "test-secret");

        let resolved = verify(&token, &config()).unwrap();
        assert_eq!(resolved, user_id);
    }

    #[test]
    fn test_header_wins_over_query() {
        let header_user = Uuid::new_v4();
        let query_user = Uuid::new_v4();
        let header_token =
            token_for(json!({ "userId": header_user, "exp": fresh_exp() }), "test-secret");
        let query_token =
            token_for(json!({ "userId": query_user, "exp": fresh_exp() }), "test-secret");

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {header_token}").parse().unwrap(),
        );

        let resolved = authenticate(&headers, Some(&query_token), &config()).unwrap();
        assert_eq!(resolved, header_user);
    }

    #[test]
    fn test_missing_token_has_distinct_reason() {
        let result = authenticate(&HeaderMap::new(), None, &config());
        assert_eq!(
            result.unwrap_err().to_string(),
            "Authentication error: No token provided"
        );
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let expired = (Utc::now() - Duration::hours(1)).timestamp();
        let token = token_for(
            json!({ "userId": Uuid::new_v4(), "exp": expired }),
            "test-secret",
        );

        let result = verify(&token, &config());
        assert!(matches!(result, Err(AuthError::Verification(_))));
        assert!(result
            .unwrap_err()
            .to_string()
            .starts_with("Authentication error: "));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = token_for(
            json!({ "userId": Uuid::new_v4(), "exp": fresh_exp() }),
            "other-secret",
        );

        assert!(matches!(
            verify(&token, &config()),
            Err(AuthError::Verification(_))
        ));
    }
}
