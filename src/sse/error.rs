#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::str::Utf8Error;

use reqwest::StatusCode;

/// Transport-level failure causes.
#[non_exhaustive]
#[derive(Debug)]
pub enum SseError {
    /// Error connecting to the SSE endpoint
    Connection(reqwest::Error),
    /// The endpoint answered with a non-success status
    Status {
        /// Status returned by the endpoint
        status: StatusCode,
    },
    /// The endpoint answered with something other than `text/event-stream`
    ContentType(String),
    /// Error reading the response body of an established stream
    Body(reqwest::Error),
    /// A field line of the event stream was not valid UTF-8
    Decode(Utf8Error),
    /// A field line exceeded the decoder's line limit
    LineTooLong {
        /// Limit in bytes
        limit: usize,
    },
    /// Event stream subscriber lagged and missed events
    Lagged {
        /// Number of events that were missed
        count: u64,
    },
}

impl fmt::Display for SseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "SSE connection error: {e}"),
            Self::Status { status } => write!(f, "SSE endpoint rejected request ({status})"),
            Self::ContentType(ct) => write!(f, "Unexpected SSE content type: {ct}"),
            Self::Body(e) => write!(f, "SSE stream read error: {e}"),
            Self::Decode(e) => write!(f, "Failed to decode SSE line: {e}"),
            Self::LineTooLong { limit } => {
                write!(f, "SSE line exceeds {limit} bytes without a terminator")
            }
            Self::Lagged { count } => write!(f, "Event stream lagged, missed {count} events"),
        }
    }
}

impl StdError for SseError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) | Self::Body(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SseError> for crate::error::Error {
    fn from(e: SseError) -> Self {
        let kind = match e {
            SseError::Lagged { .. } => crate::error::Kind::Internal,
            _ => crate::error::Kind::Transport,
        };
        crate::error::Error::with_source(kind, e)
    }
}
