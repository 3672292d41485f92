//! Follow a server-sent event stream and print what arrives.
//!
//! Connects to the address given on the command line, logs every state change
//! and message, and exits after the stream gives up or 20 messages arrive.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,sse_client_sdk=debug cargo run --example stream -- https://example.com/events
//! ```

use std::time::Duration;

use futures::StreamExt as _;
use sse_client_sdk::sse::{ConnectionManager, EventKind, StreamConfig, StreamEvent};
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const MAX_MESSAGES: usize = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8080/events".to_owned());

    let manager = ConnectionManager::http()?;
    manager.subscribe(EventKind::Errored, |event| {
        if let Some(error) = event.as_error() {
            warn!(error = %error, "stream error");
        }
    });

    let mut state = manager.state_receiver();
    let watcher = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            info!(state = %current);
        }
    });

    let mut events = Box::pin(manager.events());
    let config = StreamConfig::builder()
        .address(address)
        .read_timeout(Duration::from_secs(60))
        .max_reconnect_attempts(3)
        .debug(true)
        .build();
    manager.connect(config);

    let mut received = 0;
    while let Ok(Some(event)) = timeout(Duration::from_secs(120), events.next()).await {
        match event {
            Ok(StreamEvent::Message(message)) => {
                info!(
                    id = ?message.event_id,
                    event = message.event_type.as_deref().unwrap_or("message"),
                    data = %message.data
                );
                received += 1;
                if received >= MAX_MESSAGES {
                    break;
                }
            }
            Ok(StreamEvent::Closed) => break,
            // the manager only stays in `error` once it has stopped retrying
            Ok(StreamEvent::Errored(_)) if manager.state().is_error() => break,
            Ok(_) => {}
            Err(e) => warn!(error = %e, "event stream"),
        }
    }

    manager.disconnect();
    watcher.abort();

    for record in manager.messages() {
        info!(id = record.id, kind = %record.kind, at = %record.timestamp, "{}", record.content);
    }

    Ok(())
}
