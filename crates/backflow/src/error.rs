//! Error types for stream dispatch.
//!
//! Every failure a dispatch session can observe funnels into the single
//! [`Error`] enum. A session settles with at most one of these, the first one
//! encountered.
//!
//! ## Error Cases
//! - `InvalidConfiguration`: a ceiling, batch size or endpoint count was zero.
//! - `Transport`: a remote call failed or timed out.
//! - `Source`: the upstream source emitted an error.
//! - `PoolExhausted`: selection ran with no ready client. This is a
//!   backpressure discipline bug, never a retryable condition.
//! - `Response`: the caller's response handler failed.
//! - `Worker`: a spawned worker panicked or was aborted before settling.
//! - `Cancelled`: the session was cancelled through its token.
//! - `SourceClosed`: a producer pushed into a source the consumer had closed.

use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// Boxed error accepted from caller-provided hooks and sources.
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// Unified error type for dispatch sessions.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A sizing parameter was out of range.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// The remote call to `function` failed.
    #[error("Error sending request to {function}: {message}")]
    Transport { function: String, message: String },

    /// The upstream source reported an error.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// No client was ready when one was selected.
    #[error("No idle clients; the source should have been paused")]
    PoolExhausted,

    /// The response handler rejected a response.
    #[error("Response handler failed: {message}")]
    Response { message: String },

    /// A spawned worker ended without producing an outcome.
    #[error("Worker failed: {message}")]
    Worker { message: String },

    /// The session was cancelled before the source ended.
    #[error("Dispatch session cancelled")]
    Cancelled,

    /// The consuming side of a source has been closed.
    #[error("Source is closed")]
    SourceClosed,
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(function: &str, message: impl fmt::Display) -> Self {
        Self::Transport {
            function: function.to_string(),
            message: message.to_string(),
        }
    }
}

/// An error emitted by a [`Source`](crate::Source).
///
/// Only the rendered message is kept so the error stays `Clone` and can be
/// carried through the session's single rejection path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceError {
    message: String,
}

impl SourceError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl core::error::Error for SourceError {}

impl From<BoxError> for SourceError {
    fn from(err: BoxError) -> Self {
        Self::new(err)
    }
}
