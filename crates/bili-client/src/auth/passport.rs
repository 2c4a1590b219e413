//! Passport (login) API transport.
//!
//! The QR login flow against the web passport endpoints: request a challenge,
//! poll it until the companion app confirms, then collect the session cookies
//! from the poll response. Behind a trait so the session state machine is
//! testable without the network.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::auth::cookie::{self, parse_set_cookies};
use crate::auth::credential::Credentials;
use crate::client::{DEFAULT_UA, WEB_REFERER};
use crate::error::AuthError;

const QR_GENERATE_URL: &str =
    "https://passport.bilibili.com/x/passport-login/web/qrcode/generate";
const QR_POLL_URL: &str = "https://passport.bilibili.com/x/passport-login/web/qrcode/poll";
const NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";

// Inner status codes of the poll payload.
const POLL_CONFIRMED: i64 = 0;
const POLL_EXPIRED: i64 = 86038;
const POLL_SCANNED: i64 = 86090;
const POLL_PENDING: i64 = 86101;

/// One login challenge as produced by the generate endpoint.
#[derive(Debug, Clone)]
pub struct LoginChallenge {
    /// Opaque key used to poll the challenge status.
    pub challenge_id: String,
    /// Content to render as a scannable QR code.
    pub qr_content: String,
}

/// Observed state of a pending challenge.
#[derive(Debug, Clone)]
pub enum ChallengePoll {
    Pending,
    Scanned,
    Confirmed(Box<Credentials>),
    Expired,
}

/// Account metadata used to derive the entitlement tier.
#[derive(Debug, Clone, Default)]
pub struct AccountProfile {
    pub user_id: Option<u64>,
    pub name: Option<String>,
    /// 0 none, 1 monthly, 2 yearly.
    pub vip_type: i64,
}

impl AccountProfile {
    pub fn is_vip(&self) -> bool {
        self.vip_type >= 1
    }
}

#[async_trait]
pub trait PassportApi: Send + Sync {
    async fn request_challenge(&self) -> Result<LoginChallenge, AuthError>;

    async fn poll_challenge(&self, challenge_id: &str) -> Result<ChallengePoll, AuthError>;

    /// Fetch the profile behind `credentials`. An authentication-rejected
    /// response maps to [`AuthError::AuthExpired`].
    async fn fetch_profile(&self, credentials: &Credentials) -> Result<AccountProfile, AuthError>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct QrGenerateData {
    url: String,
    qrcode_key: String,
}

#[derive(Deserialize)]
struct QrPollData {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    refresh_token: String,
}

#[derive(Deserialize)]
struct NavData {
    #[serde(rename = "isLogin", default)]
    is_login: bool,
    #[serde(default)]
    mid: Option<u64>,
    #[serde(default)]
    uname: Option<String>,
    #[serde(rename = "vipType", default)]
    vip_type: i64,
}

/// Real passport transport over the web endpoints.
pub struct HttpPassport {
    client: Client,
}

impl HttpPassport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PassportApi for HttpPassport {
    async fn request_challenge(&self) -> Result<LoginChallenge, AuthError> {
        let body: Envelope<QrGenerateData> = self
            .client
            .get(QR_GENERATE_URL)
            .header(reqwest::header::USER_AGENT, DEFAULT_UA)
            .header(reqwest::header::REFERER, WEB_REFERER)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AuthError::decode(format!("challenge response: {e}")))?;

        if body.code != 0 {
            return Err(AuthError::api(body.code, body.message));
        }
        let data = body
            .data
            .ok_or_else(|| AuthError::decode("challenge response has no data"))?;

        Ok(LoginChallenge {
            challenge_id: data.qrcode_key,
            qr_content: data.url,
        })
    }

    async fn poll_challenge(&self, challenge_id: &str) -> Result<ChallengePoll, AuthError> {
        let response = self
            .client
            .get(QR_POLL_URL)
            .query(&[("qrcode_key", challenge_id)])
            .header(reqwest::header::USER_AGENT, DEFAULT_UA)
            .header(reqwest::header::REFERER, WEB_REFERER)
            .send()
            .await?;

        // Session cookies arrive as Set-Cookie on the confirming poll.
        let header_cookies = parse_set_cookies(response.headers());

        let body: Envelope<QrPollData> = response
            .json()
            .await
            .map_err(|e| AuthError::decode(format!("poll response: {e}")))?;

        if body.code != 0 {
            return Err(AuthError::api(body.code, body.message));
        }
        let data = body
            .data
            .ok_or_else(|| AuthError::decode("poll response has no data"))?;

        debug!(code = data.code, message = %data.message, "qr login poll");

        match data.code {
            POLL_PENDING => Ok(ChallengePoll::Pending),
            POLL_SCANNED => Ok(ChallengePoll::Scanned),
            POLL_EXPIRED => Ok(ChallengePoll::Expired),
            POLL_CONFIRMED => {
                let mut credentials = credentials_from_poll(&header_cookies, &data.url)?;
                if !data.refresh_token.is_empty() {
                    credentials.refresh_token = Some(data.refresh_token);
                }
                Ok(ChallengePoll::Confirmed(Box::new(credentials)))
            }
            other => Err(AuthError::api(other, data.message)),
        }
    }

    async fn fetch_profile(&self, credentials: &Credentials) -> Result<AccountProfile, AuthError> {
        let body: Envelope<NavData> = self
            .client
            .get(NAV_URL)
            .header(reqwest::header::USER_AGENT, DEFAULT_UA)
            .header(reqwest::header::REFERER, WEB_REFERER)
            .header(reqwest::header::COOKIE, credentials.cookie_header())
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AuthError::decode(format!("nav response: {e}")))?;

        let data = body.data.unwrap_or(NavData {
            is_login: false,
            mid: None,
            uname: None,
            vip_type: 0,
        });

        // -101 is "account not logged in"; either way the cookies are dead.
        if body.code == -101 || !data.is_login {
            return Err(AuthError::AuthExpired);
        }
        if body.code != 0 {
            return Err(AuthError::api(body.code, body.message));
        }

        Ok(AccountProfile {
            user_id: data.mid,
            name: data.uname,
            vip_type: data.vip_type,
        })
    }
}

/// Assemble credentials from the confirming poll: Set-Cookie headers first,
/// the cross-domain URL's query parameters as fallback.
fn credentials_from_poll(
    header_cookies: &[(String, String)],
    cross_domain_url: &str,
) -> Result<Credentials, AuthError> {
    let mut pairs = header_cookies.to_vec();

    if cookie::cookie_value(&pairs, cookie::SESSDATA_KEY).is_none()
        && let Ok(url) = url::Url::parse(cross_domain_url)
    {
        pairs.extend(
            url.query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        );
    }

    let sessdata = cookie::cookie_value(&pairs, cookie::SESSDATA_KEY)
        .ok_or_else(|| AuthError::decode("confirmed poll carried no session cookie"))?
        .to_owned();
    let bili_jct = cookie::cookie_value(&pairs, cookie::CSRF_KEY)
        .ok_or_else(|| AuthError::decode("confirmed poll carried no csrf cookie"))?
        .to_owned();

    let mut credentials = Credentials::new(sessdata, bili_jct);
    credentials.dede_user_id = cookie::cookie_value(&pairs, "DedeUserID").map(str::to_owned);
    credentials.buvid3 = cookie::cookie_value(&pairs, "buvid3").map(str::to_owned);
    Ok(credentials)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_prefer_set_cookie_headers() {
        let headers = vec![
            ("SESSDATA".to_string(), "from-header".to_string()),
            ("bili_jct".to_string(), "csrf".to_string()),
            ("DedeUserID".to_string(), "99".to_string()),
        ];
        let creds = credentials_from_poll(&headers, "").unwrap();
        assert_eq!(creds.sessdata, "from-header");
        assert_eq!(creds.dede_user_id.as_deref(), Some("99"));
    }

    #[test]
    fn credentials_fall_back_to_cross_domain_url() {
        let creds = credentials_from_poll(
            &[],
            "https://passport.biligame.com/crossDomain?DedeUserID=7&SESSDATA=from-url&bili_jct=csrf",
        )
        .unwrap();
        assert_eq!(creds.sessdata, "from-url");
        assert_eq!(creds.bili_jct, "csrf");
        assert_eq!(creds.dede_user_id.as_deref(), Some("7"));
    }

    #[test]
    fn confirmed_poll_without_cookies_is_a_decode_error() {
        let err = credentials_from_poll(&[], "not a url").unwrap_err();
        assert!(matches!(err, AuthError::Decode { .. }));
    }
}
