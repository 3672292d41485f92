//! Server-sent events client infrastructure.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: owns one stream connection, its state machine and automatic recovery
//! - [`Transport`]: seam for whatever actually opens the stream; [`HttpTransport`] is the default
//! - [`EventDispatcher`]: routes each [`StreamEvent`] to the listeners of its [`EventKind`]
//! - [`MessageLog`]: bounded, human-readable history of recent events
//! - [`policy`]: retry budget and backoff arithmetic
//! - [`EventDecoder`]: incremental `text/event-stream` parser used by [`HttpTransport`]
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt as _;
//! use sse_client_sdk::sse::{ConnectionManager, StreamConfig, StreamEvent};
//!
//! # async fn run() -> sse_client_sdk::Result<()> {
//! let manager = ConnectionManager::http()?;
//! let mut events = Box::pin(manager.events());
//! manager.connect(StreamConfig::new("https://example.com/events"));
//!
//! while let Some(event) = events.next().await {
//!     if let StreamEvent::Message(message) = event? {
//!         println!("{}", message.data);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod decode;
pub mod dispatcher;
pub mod error;
pub mod log;
pub mod policy;
pub mod transport;
pub mod types;

pub use config::{Method, StreamConfig};
pub use connection::ConnectionManager;
pub use decode::{EventDecoder, Frame, MAX_LINE_LENGTH};
pub use dispatcher::{EventDispatcher, Listener, ListenerId};
#[expect(
    clippy::module_name_repetitions,
    reason = "SseError includes module name for clarity when used outside this module"
)]
pub use error::SseError;
pub use log::MessageLog;
pub use transport::{
    HttpTransport, Notification, NotificationSink, OpenRequest, Transport, TransportHandle,
};
pub use types::{
    ConnectionState, ErrorEvent, EventKind, Generation, LogRecord, MessageEvent, StreamEvent,
};
