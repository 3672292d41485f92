use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Serialize;

use crate::error::Error;

/// Connection state tracking.
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    /// No connection has been requested yet
    #[default]
    Idle,
    /// A transport handle is being opened
    Connecting,
    /// The stream is open and delivering events
    Connected,
    /// Closed, either by the caller or by the remote end
    Disconnected,
    /// The last attempt failed and no recovery is pending
    Error,
    /// Waiting for (or performing) an automatic recovery attempt
    Reconnecting,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    #[must_use]
    pub const fn is_connecting(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    #[must_use]
    pub const fn is_disconnected(self) -> bool {
        matches!(self, Self::Disconnected | Self::Idle)
    }

    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, Self::Error)
    }
}

/// Category under which a [`StreamEvent`] is dispatched.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum_macros::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    Opened,
    Message,
    Errored,
    Closed,
    TimedOut,
    TransportException,
}

impl EventKind {
    /// Every category, in declaration order.
    pub const ALL: [EventKind; 6] = [
        Self::Opened,
        Self::Message,
        Self::Errored,
        Self::Closed,
        Self::TimedOut,
        Self::TransportException,
    ];
}

/// One observed transport occurrence.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Opened,
    Message(MessageEvent),
    Errored(ErrorEvent),
    Closed,
    TimedOut,
    TransportException(ErrorEvent),
}

impl StreamEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Opened => EventKind::Opened,
            Self::Message(_) => EventKind::Message,
            Self::Errored(_) => EventKind::Errored,
            Self::Closed => EventKind::Closed,
            Self::TimedOut => EventKind::TimedOut,
            Self::TransportException(_) => EventKind::TransportException,
        }
    }

    /// Wrap `error` as an `errored` event.
    #[must_use]
    pub fn errored(error: Error) -> Self {
        Self::Errored(ErrorEvent::from(error))
    }

    #[must_use]
    pub fn as_message(&self) -> Option<&MessageEvent> {
        match self {
            Self::Message(message) => Some(message),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_error(&self) -> Option<&ErrorEvent> {
        match self {
            Self::Errored(error) | Self::TransportException(error) => Some(error),
            _ => None,
        }
    }
}

/// Payload of a `message` event.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Raw `data` payload; multiple `data:` lines are joined with `\n`
    pub data: String,
    /// Last event id seen on the stream, if the server sent one
    pub event_id: Option<String>,
    /// The `event:` name when it was something other than `message`
    pub event_type: Option<String>,
    /// Address of the stream the event was read from
    pub url: Option<String>,
}

impl MessageEvent {
    #[must_use]
    pub fn new<S: Into<String>>(data: S) -> Self {
        Self {
            data: data.into(),
            event_id: None,
            event_type: None,
            url: None,
        }
    }

    #[must_use]
    pub fn with_event_id(mut self, event_id: Option<String>) -> Self {
        self.event_id = event_id;
        self
    }

    #[must_use]
    pub fn with_event_type(mut self, event_type: Option<String>) -> Self {
        self.event_type = event_type;
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }
}

/// Payload of an `errored` or `transport-exception` event.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    /// Human-readable description
    pub message: String,
    /// HTTP status, when the endpoint rejected the request
    pub status: Option<StatusCode>,
    /// Underlying fault
    pub fault: Option<Arc<Error>>,
}

impl ErrorEvent {
    #[must_use]
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            status: None,
            fault: None,
        }
    }

    /// Error kind of the underlying fault, if any.
    #[must_use]
    pub fn error_kind(&self) -> Option<crate::error::Kind> {
        self.fault.as_deref().map(Error::kind)
    }
}

impl From<Error> for ErrorEvent {
    fn from(error: Error) -> Self {
        Self {
            message: error.to_string(),
            status: error.status(),
            fault: Some(Arc::new(error)),
        }
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Human-readable diagnostic entry derived from a [`StreamEvent`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    /// Monotonic per manager, starting at 1
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub content: String,
}

/// Tag distinguishing a transport handle from every handle opened before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub(crate) u64);

impl Generation {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
