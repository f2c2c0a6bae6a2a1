use axum::http::{header::AUTHORIZATION, HeaderMap};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tracing::warn;

use clearview_core::config::AdminConfig;

use super::ApiError;

/// Admin endpoints: `Authorization: Bearer <admin.token>`. With no token
/// configured every request is rejected.
pub(crate) fn admin_guard(headers: &HeaderMap, admin: &AdminConfig) -> Result<(), ApiError> {
    if bearer_matches(headers, admin.token.as_ref()) {
        return Ok(());
    }
    reject(headers, "admin", admin.token.is_some())
}

/// The follow-up trigger accepts the cron secret or the admin token.
pub(crate) fn cron_guard(headers: &HeaderMap, admin: &AdminConfig) -> Result<(), ApiError> {
    if bearer_matches(headers, admin.cron_secret.as_ref())
        || bearer_matches(headers, admin.token.as_ref())
    {
        return Ok(());
    }
    reject(headers, "cron", admin.cron_secret.is_some() || admin.token.is_some())
}

fn reject(headers: &HeaderMap, realm: &'static str, configured: bool) -> Result<(), ApiError> {
    warn!(
        event_name = "api.auth.rejected",
        correlation_id = realm,
        realm,
        credential_configured = configured,
        header_present = headers.contains_key(AUTHORIZATION),
        "bearer credential missing or invalid"
    );
    Err(ApiError::unauthorized(realm))
}

fn bearer_matches(headers: &HeaderMap, expected: Option<&SecretString>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .is_some_and(|token| {
            bool::from(token.as_bytes().ct_eq(expected.expose_secret().as_bytes()))
        })
}

#[cfg(test)]
mod tests {
    use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode};

    use clearview_core::config::AdminConfig;

    use super::{admin_guard, cron_guard};

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).expect("header"));
        headers
    }

    fn admin(token: Option<&str>, cron: Option<&str>) -> AdminConfig {
        AdminConfig {
            token: token.map(|value| value.to_string().into()),
            cron_secret: cron.map(|value| value.to_string().into()),
        }
    }

    #[test]
    fn admin_guard_requires_matching_bearer_token() {
        let config = admin(Some("s3cret"), None);

        assert!(admin_guard(&headers("Bearer s3cret"), &config).is_ok());

        let wrong = admin_guard(&headers("Bearer nope"), &config).expect_err("wrong token");
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert!(admin_guard(&headers("s3cret"), &config).is_err());
        assert!(admin_guard(&HeaderMap::new(), &config).is_err());
    }

    #[test]
    fn unconfigured_admin_token_rejects_everything() {
        let config = admin(None, None);
        assert!(admin_guard(&headers("Bearer "), &config).is_err());
        assert!(admin_guard(&headers("Bearer anything"), &config).is_err());
    }

    #[test]
    fn cron_guard_accepts_cron_secret_or_admin_token() {
        let config = admin(Some("admin"), Some("cron"));

        assert!(cron_guard(&headers("Bearer cron"), &config).is_ok());
        assert!(cron_guard(&headers("Bearer admin"), &config).is_ok());
        assert!(cron_guard(&headers("Bearer other"), &config).is_err());
        assert!(admin_guard(&headers("Bearer cron"), &config).is_err());
    }
}
