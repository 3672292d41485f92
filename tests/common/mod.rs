#![allow(
    dead_code,
    reason = "Each integration test binary uses a different subset of these helpers"
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sse_client_sdk::error::{Error, Kind};
use sse_client_sdk::sse::{
    ConnectionManager, ConnectionState, NotificationSink, OpenRequest, StreamConfig, Transport,
    TransportHandle,
};
use sse_client_sdk::types::StatusCode;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

pub const ADDRESS: &str = "https://stream.test/events";

/// Long enough that the connect watchdog never fires unless a test wants it to.
pub const PATIENT_CONNECT: Duration = Duration::from_secs(600);

/// One call to [`Transport::open`], as seen by the test.
#[derive(Debug)]
pub struct Open {
    pub at: Instant,
    pub request: OpenRequest,
    pub sink: NotificationSink,
}

/// Transport that performs no I/O; the test drives every handle through its sink.
pub struct MockTransport {
    opens: mpsc::UnboundedSender<Open>,
    closes: Arc<AtomicUsize>,
}

/// Test side of a [`MockTransport`].
pub struct MockRemote {
    opens: mpsc::UnboundedReceiver<Open>,
    closes: Arc<AtomicUsize>,
}

struct MockHandle {
    closes: Arc<AtomicUsize>,
    closed: bool,
}

impl TransportHandle for MockHandle {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Transport for MockTransport {
    fn open(&self, request: OpenRequest, sink: NotificationSink) -> Box<dyn TransportHandle> {
        self.opens
            .send(Open {
                at: Instant::now(),
                request,
                sink,
            })
            .unwrap();
        Box::new(MockHandle {
            closes: Arc::clone(&self.closes),
            closed: false,
        })
    }
}

impl MockRemote {
    /// Wait for the manager to open the next handle.
    pub async fn next_open(&mut self) -> Open {
        timeout(Duration::from_secs(30), self.opens.recv())
            .await
            .expect("manager never opened a handle")
            .unwrap()
    }

    /// The next open, if one has already happened.
    pub fn try_next_open(&mut self) -> Option<Open> {
        self.opens.try_recv().ok()
    }

    /// Number of handles the manager has closed.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub fn mock_transport() -> (MockTransport, MockRemote) {
    let (tx, rx) = mpsc::unbounded_channel();
    let closes = Arc::new(AtomicUsize::new(0));
    (
        MockTransport {
            opens: tx,
            closes: Arc::clone(&closes),
        },
        MockRemote { opens: rx, closes },
    )
}

pub fn mock_manager() -> (ConnectionManager, MockRemote) {
    let (transport, remote) = mock_transport();
    (ConnectionManager::new(transport).unwrap(), remote)
}

/// Config for the mock transport with automatic recovery tuned by the caller.
pub fn config(max_attempts: u32, base_delay: Duration) -> StreamConfig {
    StreamConfig::builder()
        .address(ADDRESS)
        .connect_timeout(PATIENT_CONNECT)
        .reconnect_base_delay(base_delay)
        .max_reconnect_attempts(max_attempts)
        .build()
}

pub fn unavailable() -> Error {
    sse_client_sdk::sse::SseError::Status {
        status: StatusCode::SERVICE_UNAVAILABLE,
    }
    .into()
}

pub fn connection_reset() -> Error {
    Error::with_source(
        Kind::Transport,
        std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset"),
    )
}

pub async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
    let mut rx = manager.state_receiver();
    timeout(Duration::from_secs(30), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("never reached {state}, stuck at {}", manager.state()))
        .unwrap();
}

/// Let the manager's background task drain pending notifications.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
