//! Input validation, cookies and header helpers shared by the auth handlers.

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE, USER_AGENT},
    HeaderMap, HeaderValue,
};
use regex::Regex;
use std::{net::SocketAddr, sync::LazyLock, time::Duration};

use crate::auth::{AuthError, AuthResult};

pub const REFRESH_COOKIE_NAME: &str = "refreshToken";
pub const CSRF_COOKIE_NAME: &str = "sessionId";
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";

const NAME_MESSAGE: &str =
    "Name must be 2-50 characters and contain only letters, spaces, hyphens, or apostrophes";
const EMAIL_MESSAGE: &str = "Please provide a valid email address";
const PASSWORD_MESSAGE: &str =
    "Password must be at least 8 characters with at least one letter and one number";

static EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());
static NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z\s'-]{2,50}$").ok());

/// Strip angle brackets and surrounding whitespace.
pub(crate) fn sanitize(input: &str) -> String {
    input.replace(['<', '>'], "").trim().to_string()
}

pub(crate) fn normalize_email(email: &str) -> String {
    sanitize(email).to_lowercase()
}

pub(crate) fn valid_email(email: &str) -> bool {
    (*EMAIL_RE).as_ref().is_some_and(|re| re.is_match(email))
}

pub(crate) fn valid_name(name: &str) -> bool {
    (*NAME_RE).as_ref().is_some_and(|re| re.is_match(name))
}

/// At least 8 characters with one letter and one digit.
pub(crate) fn valid_password(password: &str) -> bool {
    password.chars().count() >= 8
        && password.chars().any(|c| c.is_ascii_alphabetic())
        && password.chars().any(|c| c.is_ascii_digit())
}

/// Returns the sanitized name and normalized email.
pub(crate) fn validate_signup(
    name: &str,
    email: &str,
    password: &str,
) -> AuthResult<(String, String)> {
    let name = sanitize(name);
    if !valid_name(&name) {
        return Err(AuthError::validation(NAME_MESSAGE));
    }
    let email = validate_email(email)?;
    if !valid_password(password) {
        return Err(AuthError::validation(PASSWORD_MESSAGE));
    }
    Ok((name, email))
}

pub(crate) fn validate_email(email: &str) -> AuthResult<String> {
    let email = normalize_email(email);
    if valid_email(&email) {
        Ok(email)
    } else {
        Err(AuthError::validation(EMAIL_MESSAGE))
    }
}

pub(crate) fn validate_login(email: &str, password: &str) -> AuthResult<String> {
    let email = validate_email(email)?;
    if password.is_empty() {
        return Err(AuthError::validation("Password is required"));
    }
    Ok(email)
}

pub(crate) fn validate_reset(token: &str, password: &str) -> AuthResult<String> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::validation("Reset token is required"));
    }
    if !valid_password(password) {
        return Err(AuthError::validation(PASSWORD_MESSAGE));
    }
    Ok(token.to_string())
}

/// `HttpOnly`, strict same-site cookie scoped to the whole API.
pub(crate) fn cookie(
    name: &str,
    value: &str,
    max_age: Duration,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = max_age.as_secs();
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_cookie(name: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    cookie(name, "", Duration::ZERO, secure)
}

pub(crate) fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            let value = value.trim();
            (key.trim() == name && !value.is_empty()).then(|| value.to_string())
        })
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub(crate) fn extract_csrf_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CSRF_HEADER_NAME)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Extract a client IP for rate limiting from common proxy headers.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Rate limit key for a request: the forwarded client when proxy headers are
/// trusted and present, otherwise the socket peer.
pub(crate) fn client_key(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> String {
    if trust_proxy_headers {
        if let Some(forwarded) = extract_client_ip(headers) {
            return forwarded;
        }
    }
    peer.map_or_else(|| "unknown".to_string(), |peer| peer.ip().to_string())
}

/// Device descriptor recorded on the session.
pub(crate) fn device(headers: &HeaderMap) -> String {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(*name, value);
            }
        }
        headers
    }

    #[test]
    fn sanitize_strips_angle_brackets() {
        assert_eq!(sanitize("  <b>Alice</b> "), "bAlice/b");
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn name_rules() {
        assert!(valid_name("Alice"));
        assert!(valid_name("Mary-Jane O'Neil"));
        assert!(!valid_name("A"));
        assert!(!valid_name("R2D2"));
        assert!(!valid_name(&"a".repeat(51)));
    }

    #[test]
    fn email_rules() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
        assert!(!valid_email("a b@example.com"));
    }

    #[test]
    fn patterns_compile() {
        assert!(EMAIL_RE.is_some());
        assert!(NAME_RE.is_some());
    }

    #[test]
    fn password_rules() {
        assert!(valid_password("pass1234"));
        assert!(!valid_password("short1"));
        assert!(!valid_password("lettersonly"));
        assert!(!valid_password("12345678"));
    }

    #[test]
    fn validate_signup_reports_first_problem() {
        assert!(validate_signup("Alice", "Alice@X.com", "pass1234")
            .is_ok_and(|(name, email)| name == "Alice" && email == "alice@x.com"));
        assert!(matches!(
            validate_signup("A", "alice@x.com", "pass1234"),
            Err(AuthError::Validation(message)) if message == NAME_MESSAGE
        ));
        assert!(matches!(
            validate_signup("Alice", "bad", "pass1234"),
            Err(AuthError::Validation(message)) if message == EMAIL_MESSAGE
        ));
        assert!(matches!(
            validate_signup("Alice", "alice@x.com", "weak"),
            Err(AuthError::Validation(message)) if message == PASSWORD_MESSAGE
        ));
    }

    #[test]
    fn validate_login_requires_password() {
        assert!(validate_login("alice@x.com", "").is_err());
        assert!(validate_login("alice@x.com", "x").is_ok());
        assert!(validate_reset(" ", "pass1234").is_err());
        assert!(validate_reset("tok", "pass1234").is_ok());
    }

    #[test]
    fn cookie_flags() -> Result<(), InvalidHeaderValue> {
        let value = cookie("refreshToken", "abc", Duration::from_secs(60), true)?;
        assert_eq!(
            value.to_str().unwrap_or_default(),
            "refreshToken=abc; Path=/; HttpOnly; SameSite=Strict; Max-Age=60; Secure"
        );
        let cleared = clear_cookie("refreshToken", false)?;
        assert_eq!(
            cleared.to_str().unwrap_or_default(),
            "refreshToken=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0"
        );
        Ok(())
    }

    #[test]
    fn extract_cookie_finds_named_value() {
        let headers = headers(&[
            ("cookie", "theme=dark; broken; refreshToken=abc.def"),
            ("cookie", "sessionId=s1"),
        ]);
        assert_eq!(
            extract_cookie(&headers, REFRESH_COOKIE_NAME).as_deref(),
            Some("abc.def")
        );
        assert_eq!(extract_cookie(&headers, CSRF_COOKIE_NAME).as_deref(), Some("s1"));
        assert_eq!(extract_cookie(&headers, "missing"), None);
    }

    #[test]
    fn bearer_and_client_ip() {
        let headers = headers(&[
            ("authorization", "Bearer token-1"),
            ("x-forwarded-for", "203.0.113.1, 10.0.0.1"),
            ("x-real-ip", "10.0.0.2"),
        ]);
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("token-1"));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("203.0.113.1"));

        let fallback = self::headers(&[("x-real-ip", "10.0.0.2"), ("authorization", "Basic x")]);
        assert_eq!(extract_client_ip(&fallback).as_deref(), Some("10.0.0.2"));
        assert_eq!(extract_bearer_token(&fallback), None);
    }

    #[test]
    fn client_key_prefers_peer_unless_proxy_trusted() {
        let peer: SocketAddr = ([198, 51, 100, 7], 40_000).into();
        let forwarded = headers(&[("x-forwarded-for", "203.0.113.1")]);

        assert_eq!(client_key(&forwarded, Some(peer), false), "198.51.100.7");
        assert_eq!(client_key(&forwarded, Some(peer), true), "203.0.113.1");
        assert_eq!(client_key(&HeaderMap::new(), Some(peer), true), "198.51.100.7");
        assert_eq!(client_key(&forwarded, None, false), "unknown");
    }

    #[test]
    fn device_defaults_to_unknown() {
        assert_eq!(device(&HeaderMap::new()), "unknown");
        assert_eq!(device(&headers(&[("user-agent", "curl/8")])), "curl/8");
    }
}
