//! Credential snapshot and its on-disk persistence.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AuthError;

/// Immutable session credentials.
///
/// Replaced wholesale on re-login or cookie import, never patched in place.
/// `sessdata` authorizes requests; `bili_jct` is the CSRF token required by
/// mutating endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub sessdata: String,
    pub bili_jct: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dede_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buvid3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(sessdata: impl Into<String>, bili_jct: impl Into<String>) -> Self {
        Self {
            sessdata: sessdata.into(),
            bili_jct: bili_jct.into(),
            dede_user_id: None,
            buvid3: None,
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Render the `Cookie` request header value.
    pub fn cookie_header(&self) -> String {
        let mut header = format!("SESSDATA={}; bili_jct={}", self.sessdata, self.bili_jct);
        if let Some(uid) = &self.dede_user_id {
            header.push_str("; DedeUserID=");
            header.push_str(uid);
        }
        if let Some(buvid3) = &self.buvid3 {
            header.push_str("; buvid3=");
            header.push_str(buvid3);
        }
        header
    }
}

/// On-disk record. `saved_at` is informational; absence of the whole file
/// means the session starts anonymous.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(flatten)]
    credentials: Credentials,
    saved_at: DateTime<Utc>,
}

/// Load/save/clear for the persisted credential record. No other logic.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Read the persisted record. A missing or unreadable record degrades to
    /// `None` (anonymous startup) rather than failing the process.
    pub async fn load(&self) -> Option<Credentials> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read credential store");
                return None;
            }
        };

        match serde_json::from_str::<StoredCredentials>(&raw) {
            Ok(stored) => {
                debug!(saved_at = %stored.saved_at, "loaded persisted credentials");
                Some(stored.credentials)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "credential store is malformed; ignoring");
                None
            }
        }
    }

    pub async fn save(&self, credentials: &Credentials) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let stored = StoredCredentials {
            credentials: credentials.clone(),
            saved_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&stored)
            .map_err(|e| AuthError::decode(format!("serialize credentials: {e}")))?;
        tokio::fs::write(&self.path, body).await?;
        debug!(path = %self.path.display(), "persisted credentials");
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), AuthError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
