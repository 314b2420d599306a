//! Error types for the client.
//!
//! # Design
//! Only exceptional conditions become a `ClientError`: bad arguments,
//! interceptor contract violations, serialization failures, cancellation and
//! transport failures. A server answering with a non-2xx status is not one of
//! them; that case resolves normally and is reported through
//! `Response::err` (see `ResponseError` in the `response` module).

use thiserror::Error;

/// Errors that reject a dispatched call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An argument was outside the accepted shape or enumerated set.
    #[error("{0}")]
    InvalidArgument(String),

    /// An interceptor rewrote a field that is fixed once the call is bound.
    #[error("{0}")]
    InterceptorContract(&'static str),

    /// The outgoing body could not be serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The call was cancelled through its token, its signal or `abort_all`.
    #[error("The user aborted a request.")]
    Aborted,

    /// The transport failed before a response could be produced.
    #[error("transport error: {0}")]
    Transport(String),

    /// The raw response body was already consumed.
    #[error("body has already been consumed")]
    BodyUsed,

    /// An interceptor stage failed.
    #[error("{0}")]
    Interceptor(String),
}

impl ClientError {
    /// Returns true if the call was cancelled.
    pub fn is_abort(&self) -> bool {
        matches!(self, ClientError::Aborted)
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ClientError::InvalidArgument(message.into())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}
