use thiserror::Error;

use crate::auth::session::EntitlementTier;
use crate::media::StreamKind;
use crate::media::quality::VideoQuality;

/// Failures of the authentication state machine and credential handling.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login challenge expired before confirmation")]
    LoginTimeout,

    #[error("cookie string is missing required key `{missing}`")]
    InvalidCookieFormat { missing: &'static str },

    #[error("platform rejected the session credentials")]
    AuthExpired,

    #[error("passport request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("passport response malformed: {reason}")]
    Decode { reason: String },

    #[error("passport api error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("credential store i/o: {source}")]
    Store {
        #[from]
        source: std::io::Error,
    },
}

impl AuthError {
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    pub fn api(code: i64, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }
}

/// Failures while turning a raw identifier into a [`crate::media::VideoDescriptor`].
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("unrecognized video identifier `{input}`")]
    InvalidIdentifier { input: String },

    #[error("video `{id}` not found")]
    NotFound { id: String },

    #[error("video `{id}` is region-locked or age-gated")]
    GeoOrAgeRestricted { id: String },

    #[error("transient fetch failure for `{id}`: {reason}")]
    TransientFetch { id: String, reason: String },

    #[error("catalog response malformed for `{id}`: {reason}")]
    Decode { id: String, reason: String },
}

impl ResolutionError {
    pub fn invalid_identifier(input: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            input: input.into(),
        }
    }

    pub fn transient(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransientFetch {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn decode(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller may reasonably retry the whole resolution.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetch { .. })
    }
}

/// Failures of the pure quality negotiation. Never produced by I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// The requested label did not survive filtering. `known_to_platform`
    /// distinguishes "exists but above your tier" from "never offered".
    #[error("requested quality `{requested}` is not available")]
    QualityUnavailable {
        requested: VideoQuality,
        known_to_platform: bool,
    },

    #[error("no {kind} stream is eligible at tier {tier:?}")]
    NoEligibleStream {
        kind: StreamKind,
        tier: EntitlementTier,
    },

    #[error("catalog delivered no {kind} options")]
    EmptyCatalog { kind: StreamKind },
}
