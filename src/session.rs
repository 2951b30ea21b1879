use crate::settings::Settings;
use axum::http::HeaderMap;
use std::time::Duration;

pub const ACCESS_COOKIE_NAME: &str = "access-token";
pub const REFRESH_COOKIE_NAME: &str = "refresh-token";

const ACCESS_COOKIE_PATH: &str = "/";
const REFRESH_COOKIE_PATH: &str = "/auth";

/// Tokens carried by the request cookies.
#[derive(Clone, Debug, Default)]
pub struct SessionCookies {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl SessionCookies {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            access_token: cookie_value(headers, ACCESS_COOKIE_NAME),
            refresh_token: cookie_value(headers, REFRESH_COOKIE_NAME),
        }
    }
}

/// First non-empty value of cookie `name` across all Cookie headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .find_map(|cookie| {
            let (key, value) = cookie.trim().split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
}

pub fn access_cookie_header(settings: &Settings, token: &str, ttl: Duration) -> String {
    cookie_header(settings, ACCESS_COOKIE_NAME, token, ACCESS_COOKIE_PATH, ttl.as_secs())
}

pub fn refresh_cookie_header(settings: &Settings, token: &str, ttl: Duration) -> String {
    cookie_header(settings, REFRESH_COOKIE_NAME, token, REFRESH_COOKIE_PATH, ttl.as_secs())
}

/// Expire both token cookies.
pub fn clear_cookie_headers(settings: &Settings) -> [String; 2] {
    [
        cookie_header(settings, ACCESS_COOKIE_NAME, "", ACCESS_COOKIE_PATH, 0),
        cookie_header(settings, REFRESH_COOKIE_NAME, "", REFRESH_COOKIE_PATH, 0),
    ]
}

fn cookie_header(settings: &Settings, name: &str, value: &str, path: &str, max_age: u64) -> String {
    format!(
        "{}={}; HttpOnly; {}SameSite=Lax; Path={}; Max-Age={}",
        name,
        value,
        if settings.secure_cookies() { "Secure; " } else { "" },
        path,
        max_age
    )
}
