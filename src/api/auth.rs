// =============================================================================
// Admin authentication — bearer-token guard for calibration mutators
// =============================================================================
//
// Calibration writes are the only authenticated surface; dashboards consume
// the read side without credentials. The expected token lives in Settings
// (NOVA_ADMIN_TOKEN, resolved once at startup) and requests present it as
// `Authorization: Bearer <token>`.
//
// Tokens are never compared byte-for-byte. Both sides are hashed and the
// digests compared, so response timing carries no information about how much
// of a guessed token matched.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    Json,
};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::app_state::AppState;

/// Marker extractor: listing it on a handler makes that route admin-only.
pub struct RequireAdmin;

type Rejection = (StatusCode, Json<serde_json::Value>);

fn forbidden(message: &'static str) -> Rejection {
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({ "error": message })),
    )
}

/// Pull the token out of an `Authorization: Bearer ...` header.
fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Timing-safe equality via digest comparison: hashing both sides first means
/// the comparison cost is fixed regardless of where the strings diverge.
fn token_matches(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = Rejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let expected = state.settings.admin_token.as_str();
        if expected.is_empty() {
            warn!("NOVA_ADMIN_TOKEN is not set, rejecting all calibration mutations");
            return Err(forbidden("Server authentication not configured"));
        }

        match bearer_token(parts) {
            Some(token) if token_matches(token, expected) => Ok(RequireAdmin),
            Some(_) => {
                warn!("Invalid admin token presented");
                Err(forbidden("Invalid authorization token"))
            }
            None => {
                warn!("Missing or malformed Authorization header");
                Err(forbidden("Missing or invalid authorization token"))
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn parts_with_auth(value: Option<&str>) -> Parts {
        let mut builder = axum::http::Request::builder().uri("/discovery/calibration/hybrid_v1");
        if let Some(value) = value {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn matching_tokens_accepted() {
        assert!(token_matches("s3cret-token", "s3cret-token"));
    }

    #[test]
    fn mismatched_tokens_rejected() {
        assert!(!token_matches("s3cret-token", "s3cr3t-token"));
        assert!(!token_matches("", "s3cret-token"));
    }

    #[test]
    fn token_prefix_is_not_enough() {
        assert!(!token_matches("s3cret", "s3cret-token"));
        assert!(!token_matches("s3cret-token-extended", "s3cret-token"));
    }

    #[test]
    fn bearer_header_extraction() {
        let parts = parts_with_auth(Some("Bearer abc123"));
        assert_eq!(bearer_token(&parts), Some("abc123"));
    }

    #[test]
    fn non_bearer_schemes_are_ignored() {
        let parts = parts_with_auth(Some("Token abc123"));
        assert_eq!(bearer_token(&parts), None);

        let parts = parts_with_auth(Some("bearer abc123")); // scheme is case-sensitive
        assert_eq!(bearer_token(&parts), None);
    }

    #[test]
    fn missing_header_yields_none() {
        let parts = parts_with_auth(None);
        assert_eq!(bearer_token(&parts), None);
    }
}
