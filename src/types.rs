//! Re-exported types from external crates for convenience.
//!
//! These types are commonly used in this SDK and are re-exported here
//! so users don't need to add these dependencies to their `Cargo.toml`.

/// Date and time types for [`LogRecord`](crate::sse::LogRecord) timestamps.
pub use chrono::{DateTime, Utc};
/// HTTP status attached to [`ErrorEvent`](crate::sse::ErrorEvent)s from rejected requests.
pub use reqwest::StatusCode;
/// Cancellation primitive, handy for tying a consumer loop to the manager's lifetime.
pub use tokio_util::sync::CancellationToken;
