use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("failed to parse JSON from {context}")]
    ParseJson {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("event stream closed by the server")]
    StreamClosed,

    #[error("client failed to initialize")]
    InitFailed,

    /// A coalesced request failed; every waiter observes the same error.
    #[error(transparent)]
    Shared(Arc<Error>),
}

impl Error {
    pub(crate) fn parse_json(context: &'static str, source: serde_json::Error) -> Self {
        Error::ParseJson { context, source }
    }

    /// Whether retrying can help. Transport errors and server-side
    /// failures are worth retrying; a rejected SDK key is not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::HttpStatus(status) => is_http_error_recoverable(status.as_u16()),
            Error::Http(_) | Error::StreamClosed | Error::ParseJson { .. } => true,
            Error::InvalidConfig(_) | Error::InitFailed => false,
            Error::Shared(inner) => inner.is_recoverable(),
        }
    }
}

/// The shared recoverability table: client errors other than 408 and 429
/// are permanent (401/403 mean the SDK key is bad); everything else —
/// transport failures, 5xx, timeouts, throttling — is worth a retry.
pub fn is_http_error_recoverable(status: u16) -> bool {
    match status {
        408 | 429 => true,
        400..=499 => false,
        _ => true,
    }
}
