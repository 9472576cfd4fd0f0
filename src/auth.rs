//! HTTP Basic authentication for the control surface.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use tracing::warn;

use crate::api::AppState;
use crate::config::AuthConfig;

const REALM: &str = r#"Basic realm="leadcrawl""#;

/// The authenticated operator.
#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: String,
}

pub type AuthRejection = (
    StatusCode,
    [(header::HeaderName, &'static str); 1],
    Json<AuthResponse>,
);

fn unauthorized(message: &str) -> AuthRejection {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, REALM)],
        Json(AuthResponse {
            message: message.to_string(),
        }),
    )
}

/// `Authorization: Basic <base64(user:pass)>` → (user, pass).
pub fn parse_basic(auth_header: &str) -> Option<(String, String)> {
    let encoded = auth_header.strip_prefix("Basic ")?.trim();
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Constant time for equal lengths.
fn same(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn verify(username: &str, password: &str, config: &AuthConfig) -> bool {
    same(username, &config.username) & same(password, &config.password)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| unauthorized("Missing Authorization header"))?;

        let (username, password) = parse_basic(auth_header)
            .ok_or_else(|| unauthorized("Invalid Authorization header format"))?;

        if !verify(&username, &password, &state.config.auth) {
            warn!(%username, "⚠️ Auth failed");
            return Err(unauthorized("Invalid credentials"));
        }

        Ok(AuthUser { username })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            username: "admin".into(),
            password: "changeme123".into(),
        }
    }

    #[test]
    fn test_parse_basic_header() {
        // admin:changeme123
        let header = "Basic YWRtaW46Y2hhbmdlbWUxMjM=";
        assert_eq!(
            parse_basic(header),
            Some(("admin".to_string(), "changeme123".to_string()))
        );
    }

    #[test]
    fn test_password_may_contain_colons() {
        let header = format!("Basic {}", STANDARD.encode("admin:a:b"));
        assert_eq!(parse_basic(&header), Some(("admin".into(), "a:b".into())));
    }

    #[test]
    fn test_rejects_other_schemes_and_garbage() {
        assert_eq!(parse_basic("Bearer abc.def"), None);
        assert_eq!(parse_basic("Basic %%%"), None);
        assert_eq!(parse_basic(&format!("Basic {}", STANDARD.encode("nocolon"))), None);
    }

    #[test]
    fn test_verify_credentials() {
        assert!(verify("admin", "changeme123", &config()));
        assert!(!verify("admin", "changeme124", &config()));
        assert!(!verify("root", "changeme123", &config()));
        assert!(!verify("admin", "", &config()));
    }
}
