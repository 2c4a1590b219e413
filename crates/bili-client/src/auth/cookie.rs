//! Cookie string parsing for browser-exported sessions.

use crate::auth::credential::Credentials;
use crate::error::AuthError;

pub const SESSDATA_KEY: &str = "SESSDATA";
pub const CSRF_KEY: &str = "bili_jct";

/// Split a `name=value; name2=value2` cookie string into pairs.
///
/// Accepts `;` from Cookie headers and newlines from copy/paste; empty names,
/// empty values and fragments without `=` are dropped.
pub fn parse_cookie_string(raw: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for part in raw.split(&[';', '\n'][..]).map(str::trim) {
        if part.is_empty() {
            continue;
        }
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() || value.is_empty() {
            continue;
        }
        pairs.push((name.to_owned(), value.to_owned()));
    }
    pairs
}

/// Case-insensitive lookup, since browser exports disagree on casing.
pub fn cookie_value<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Build [`Credentials`] from a browser cookie string.
///
/// The two keys backing the session token and the CSRF token are mandatory;
/// anything else is picked up opportunistically.
pub fn credentials_from_cookie_string(raw: &str) -> Result<Credentials, AuthError> {
    let pairs = parse_cookie_string(raw);

    let sessdata = cookie_value(&pairs, SESSDATA_KEY)
        .ok_or(AuthError::InvalidCookieFormat {
            missing: SESSDATA_KEY,
        })?
        .to_owned();
    let bili_jct = cookie_value(&pairs, CSRF_KEY)
        .ok_or(AuthError::InvalidCookieFormat { missing: CSRF_KEY })?
        .to_owned();

    let mut credentials = Credentials::new(sessdata, bili_jct);
    credentials.dede_user_id = cookie_value(&pairs, "DedeUserID").map(str::to_owned);
    credentials.buvid3 = cookie_value(&pairs, "buvid3").map(str::to_owned);
    Ok(credentials)
}

/// Parse cookies from `Set-Cookie` response headers into pairs.
pub fn parse_set_cookies(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for value in headers.get_all(reqwest::header::SET_COOKIE) {
        let Ok(cookie_str) = value.to_str() else {
            continue;
        };
        // Only the leading "name=value"; attributes like Path are irrelevant.
        if let Some(kv) = cookie_str.split(';').next()
            && let Some((name, value)) = kv.split_once('=')
        {
            let name = name.trim();
            let value = value.trim();
            if !name.is_empty() && !value.is_empty() {
                pairs.push((name.to_owned(), value.to_owned()));
            }
        }
    }
    pairs
}
