//! Refresh cookie parsing and construction.

use axum::http::header;

/// Cookie name for the refresh token.
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// The cookie is only ever sent to the refresh endpoint.
pub const REFRESH_COOKIE_PATH: &str = "/auth/refresh";

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    for cookie_header in headers.get_all(header::COOKIE) {
        let Ok(cookie_header) = cookie_header.to_str() else {
            continue;
        };
        for part in cookie_header.split(';') {
            let part = part.trim();
            if let Some((key, value)) = part.split_once('=') {
                if key.trim() == name {
                    return Some(value.trim());
                }
            }
        }
    }
    None
}

/// Cookie attributes shared by set and clear.
/// Strict same-site in production, lax for plain-HTTP development.
fn attributes(secure: bool) -> &'static str {
    if secure {
        "HttpOnly; SameSite=Strict; Secure"
    } else {
        "HttpOnly; SameSite=Lax"
    }
}

/// Set-Cookie value carrying a refresh token.
pub fn refresh_cookie(token: &str, max_age_secs: u64, secure: bool) -> String {
    format!(
        "{}={}; {}; Path={}; Max-Age={}",
        REFRESH_COOKIE_NAME,
        token,
        attributes(secure),
        REFRESH_COOKIE_PATH,
        max_age_secs
    )
}

/// Set-Cookie value that removes the refresh cookie.
pub fn clear_refresh_cookie(secure: bool) -> String {
    format!(
        "{}=; {}; Path={}; Max-Age=0",
        REFRESH_COOKIE_NAME,
        attributes(secure),
        REFRESH_COOKIE_PATH
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_get_cookie_simple() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("refresh_token=abc123"),
        );

        assert_eq!(get_cookie(&headers, "refresh_token"), Some("abc123"));
    }

    #[test]
    fn test_get_cookie_multiple() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("foo=bar; refresh_token=xyz789"),
        );

        assert_eq!(get_cookie(&headers, "refresh_token"), Some("xyz789"));
        assert_eq!(get_cookie(&headers, "foo"), Some("bar"));
    }

    #[test]
    fn test_get_cookie_not_found() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("foo=bar"));

        assert_eq!(get_cookie(&headers, "refresh_token"), None);
    }

    #[test]
    fn test_get_cookie_no_header() {
        let headers = axum::http::HeaderMap::new();
        assert_eq!(get_cookie(&headers, "refresh_token"), None);
    }

    #[test]
    fn test_refresh_cookie_attributes() {
        let cookie = refresh_cookie("tok", 604800, true);
        assert!(cookie.starts_with("refresh_token=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("Path=/auth/refresh"));
        assert!(cookie.contains("Max-Age=604800"));

        let dev = refresh_cookie("tok", 10, false);
        assert!(dev.contains("SameSite=Lax"));
        assert!(!dev.contains("Secure"));
    }

    #[test]
    fn test_clear_cookie() {
        let cookie = clear_refresh_cookie(false);
        assert!(cookie.starts_with("refresh_token=;"));
        assert!(cookie.contains("Max-Age=0"));
        assert!(cookie.contains("Path=/auth/refresh"));
    }
}
