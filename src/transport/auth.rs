// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket handshake authentication (§4.1).

use axum::http::HeaderMap;

use crate::config::AuthConfig;
use crate::error::ArqonError;
use crate::session::{self, Claims};

/// Claims used when `enable_auth=false` (dev profile convenience). Every
/// connection is treated as a single default tenant with admin rights.
fn dev_claims() -> Claims {
    Claims {
        sub: "dev".to_owned(),
        tenant_id: "dev".to_owned(),
        role: Some("admin".to_owned()),
        client_type: None,
        default_room: None,
        default_channel: None,
    }
}

/// Resolve the bearer token for a WebSocket upgrade from either the
/// `Authorization` header or the `?token=` query parameter, then verify it
/// against the configured JWT secret/algorithm (§4.1).
///
/// Returns `AuthRequired` if no token was supplied at all, `AuthInvalid` if a
/// token was supplied but failed verification.
pub fn authenticate(
    headers: &HeaderMap,
    raw_query: &str,
    auth: &AuthConfig,
) -> Result<Claims, ArqonError> {
    if !auth.enable_auth {
        return Ok(dev_claims());
    }

    let header_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(session::extract_bearer);
    let query_token = session::extract_ws_token(raw_query);

    let token = header_token.map(str::to_owned).or(query_token).ok_or(ArqonError::AuthRequired)?;

    let secret = auth.jwt_secret.as_deref().ok_or(ArqonError::AuthInvalid)?;
    session::verify_token(&token, secret, &auth.jwt_algorithm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_disabled_yields_dev_claims() {
        let config = AuthConfig { enable_auth: false, jwt_secret: None, jwt_algorithm: "HS256".into() };
        let claims = authenticate(&HeaderMap::new(), "", &config).unwrap();
        assert_eq!(claims.tenant_id, "dev");
    }

    #[test]
    fn missing_token_is_auth_required() {
        let config =
            AuthConfig { enable_auth: true, jwt_secret: Some("x".repeat(32)), jwt_algorithm: "HS256".into() };
        let err = authenticate(&HeaderMap::new(), "", &config).unwrap_err();
        assert_eq!(err, ArqonError::AuthRequired);
    }

    #[test]
    fn malformed_token_is_auth_invalid() {
        let config =
            AuthConfig { enable_auth: true, jwt_secret: Some("x".repeat(32)), jwt_algorithm: "HS256".into() };
        let err = authenticate(&HeaderMap::new(), "token=not-a-jwt", &config).unwrap_err();
        assert_eq!(err, ArqonError::AuthInvalid);
    }
}
