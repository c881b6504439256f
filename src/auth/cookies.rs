//! Set-Cookie helpers for handing tokens to browsers

use axum::http::{header::COOKIE, HeaderMap};
use chrono::Duration;
use cookie::{Cookie, SameSite};

use super::models::AuthTokens;
use crate::common::{AuthConfig, CookieConfig};

/// `Set-Cookie` value for a token cookie living `max_age`
pub fn token_cookie(config: &CookieConfig, name: &str, value: &str, max_age: Duration) -> String {
    let mut builder = Cookie::build((name.to_string(), value.to_string()))
        .path("/")
        .http_only(config.http_only)
        .secure(config.secure)
        .same_site(SameSite::Lax)
        .max_age(cookie::time::Duration::seconds(max_age.num_seconds().max(0)));

    if let Some(domain) = &config.domain {
        builder = builder.domain(domain.clone());
    }

    builder.build().to_string()
}

/// `Set-Cookie` value that removes the cookie
pub fn clear_cookie(config: &CookieConfig, name: &str) -> String {
    token_cookie(config, name, "", Duration::zero())
}

/// Access and refresh cookies for a freshly minted pair.
///
/// The access cookie uses the configured cookie lifetime rather than the
/// token TTL, so the browser still sends the expired token to `/auth/renew`.
pub fn auth_cookies(config: &AuthConfig, tokens: &AuthTokens) -> [String; 2] {
    [
        token_cookie(
            &config.cookies,
            &config.cookies.access_token_name,
            &tokens.access_token,
            config.cookies.max_age,
        ),
        token_cookie(
            &config.cookies,
            &config.cookies.refresh_token_name,
            &tokens.refresh_token,
            config.refresh_token_ttl,
        ),
    ]
}

pub fn clear_auth_cookies(config: &CookieConfig) -> [String; 2] {
    [
        clear_cookie(config, &config.access_token_name),
        clear_cookie(config, &config.refresh_token_name),
    ]
}

/// Value of cookie `name` from the request's `Cookie` headers
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|c| c.name() == name)
        .map(|c| c.value_trimmed().to_string())
        .filter(|v| !v.is_empty())
}
