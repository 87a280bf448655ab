use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::{config::CookiePolicy, tokens::TokenPair};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

fn session_cookie(
    name: &'static str,
    value: String,
    max_age_secs: i64,
    policy: CookiePolicy,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(policy.secure)
        .same_site(policy.same_site)
        .path("/")
        .max_age(time::Duration::seconds(max_age_secs))
        .build()
}

/// Places both tokens of a fresh session in the jar.
pub fn set_session_cookies(
    jar: CookieJar,
    tokens: TokenPair,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
    policy: CookiePolicy,
) -> CookieJar {
    jar.add(session_cookie(ACCESS_COOKIE, tokens.access_token, access_ttl_secs, policy))
        .add(session_cookie(REFRESH_COOKIE, tokens.refresh_token, refresh_ttl_secs, policy))
}

pub fn set_access_cookie(
    jar: CookieJar,
    access_token: String,
    ttl_secs: i64,
    policy: CookiePolicy,
) -> CookieJar {
    jar.add(session_cookie(ACCESS_COOKIE, access_token, ttl_secs, policy))
}

/// clear_session_cookies
///
/// Emits removal cookies for both tokens whether or not the request carried them,
/// so logging out twice behaves the same as logging out once.
pub fn clear_session_cookies(jar: CookieJar, policy: CookiePolicy) -> CookieJar {
    [ACCESS_COOKIE, REFRESH_COOKIE]
        .into_iter()
        .fold(jar, |jar, name| {
            let mut removal = session_cookie(name, String::new(), 0, policy);
            removal.make_removal();
            jar.add(removal)
        })
}

pub fn access_token(jar: &CookieJar) -> Option<String> {
    non_empty(jar, ACCESS_COOKIE)
}

pub fn refresh_token(jar: &CookieJar) -> Option<String> {
    non_empty(jar, REFRESH_COOKIE)
}

fn non_empty(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}
