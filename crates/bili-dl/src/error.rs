use reqwest::StatusCode;

/// Failure of a single fetch attempt, classified for the retry loop.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("http request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("authentication rejected (HTTP {status})")]
    AuthRejected { status: StatusCode },

    #[error("i/o error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    /// Whether the retry loop may attempt again.
    ///
    /// Auth rejections are surfaced immediately (the session has to expire,
    /// not the attempt counter); 4xx responses other than 429 are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { source } => is_retryable_reqwest_error(source),
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Io { .. } => true,
            Self::AuthRejected { .. } | Self::Cancelled => false,
        }
    }
}

/// Classify a reqwest error as retryable or not.
///
/// Connect, timeout, request, body and decode failures are transient;
/// redirect and builder errors are not.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}

/// Job-level failures surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("download cancelled")]
    Cancelled,

    #[error("session rejected while fetching `{url}`")]
    AuthExpired { url: String },

    #[error("download failed after {attempts} attempt(s): {source}")]
    DownloadExhausted {
        attempts: u32,
        #[source]
        source: FetchError,
    },

    #[error("muxer failed: {detail}")]
    MuxFailed { detail: String },

    #[error("muxer executable `{program}` not found on the search path")]
    MuxerNotFound { program: String },

    #[error("i/o error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl TransferError {
    /// Mux failures keep the downloaded sources on disk so the caller can
    /// retry muxing without re-downloading.
    pub fn preserves_sources(&self) -> bool {
        matches!(self, Self::MuxFailed { .. } | Self::MuxerNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_classification() {
        assert!(
            FetchError::http_status(StatusCode::INTERNAL_SERVER_ERROR, "u").is_retryable()
        );
        assert!(FetchError::http_status(StatusCode::BAD_GATEWAY, "u").is_retryable());
        assert!(FetchError::http_status(StatusCode::TOO_MANY_REQUESTS, "u").is_retryable());
        assert!(!FetchError::http_status(StatusCode::NOT_FOUND, "u").is_retryable());
        assert!(!FetchError::http_status(StatusCode::GONE, "u").is_retryable());
    }

    #[test]
    fn auth_rejection_is_never_retried() {
        let err = FetchError::AuthRejected {
            status: StatusCode::FORBIDDEN,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn mux_errors_preserve_sources() {
        assert!(
            TransferError::MuxFailed {
                detail: "exit 1".into()
            }
            .preserves_sources()
        );
        assert!(
            TransferError::MuxerNotFound {
                program: "ffmpeg".into()
            }
            .preserves_sources()
        );
        assert!(!TransferError::Cancelled.preserves_sources());
    }
}
