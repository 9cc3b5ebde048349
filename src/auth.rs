use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseUser {
    pub id: String,
    pub email: Option<String>,
    pub user_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    sub: String,
    email: Option<String>,
    user_metadata: Option<Value>,
}

/// Resolves the acting user from the request headers.
///
/// Order: dev override header (non-production only), local JWT verification
/// when `SUPABASE_JWT_SECRET` is set, otherwise a round-trip to the Supabase
/// auth endpoint using the service key.
pub async fn require_user(state: &AppState, headers: &HeaderMap) -> AppResult<SupabaseUser> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user_id) = header_str(headers, "x-user-id") {
            return Ok(SupabaseUser {
                id: user_id,
                email: None,
                user_metadata: None,
            });
        }
    }

    let token = bearer_token(headers)?;

    if let Some(secret) = state.config.supabase_jwt_secret.as_deref() {
        return verify_local(&token, secret);
    }
    verify_remote(state, &token).await
}

pub async fn require_user_id(state: &AppState, headers: &HeaderMap) -> AppResult<String> {
    let user = require_user(state, headers).await?;
    if user.id.trim().is_empty() {
        return Err(AppError::Unauthorized(
            "Unauthorized: token has no subject.".to_string(),
        ));
    }
    Ok(user.id)
}

fn bearer_token(headers: &HeaderMap) -> AppResult<String> {
    let raw = header_str(headers, "authorization")
        .ok_or_else(|| AppError::Unauthorized("Unauthorized: missing bearer token.".to_string()))?;
    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Unauthorized: missing bearer token.".to_string()))?;
    Ok(token.to_string())
}

fn verify_local(token: &str, secret: &str) -> AppResult<SupabaseUser> {
    let mut validation = Validation::new(Algorithm::HS256);
    // Supabase sets aud = "authenticated"; membership checks happen per-route.
    validation.validate_aud = false;

    let data = decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|error| AppError::Unauthorized(format!("Unauthorized: invalid token ({error}).")))?;

    Ok(SupabaseUser {
        id: data.claims.sub,
        email: data.claims.email,
        user_metadata: data.claims.user_metadata,
    })
}

async fn verify_remote(state: &AppState, token: &str) -> AppResult<SupabaseUser> {
    let base_url = state.config.supabase_url.as_deref().ok_or_else(|| {
        AppError::Dependency("Supabase auth is not configured. Set SUPABASE_URL.".to_string())
    })?;
    let service_key = state
        .config
        .supabase_service_role_key
        .as_deref()
        .unwrap_or_default();

    let response = state
        .http_client
        .get(format!("{}/auth/v1/user", base_url.trim_end_matches('/')))
        .header("apikey", service_key)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|error| AppError::Dependency(format!("Supabase auth request failed: {error}")))?;

    if !response.status().is_success() {
        return Err(AppError::Unauthorized(
            "Unauthorized: invalid or expired token.".to_string(),
        ));
    }

    response
        .json::<SupabaseUser>()
        .await
        .map_err(|error| AppError::Dependency(format!("Supabase auth response invalid: {error}")))
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::bearer_token;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def");
    }

    #[test]
    fn rejects_missing_or_blank_token() {
        let headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Token abc"));
        assert!(bearer_token(&headers).is_err());
    }
}
