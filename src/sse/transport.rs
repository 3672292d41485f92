//! Transport seam between the connection manager and the streaming HTTP client.
//!
//! The manager only ever calls [`Transport::open`] and [`TransportHandle::close`];
//! everything else flows back through the [`NotificationSink`] it hands to `open`.
//! Each sink is tagged with the [`Generation`] of the handle it belongs to, which
//! is how the manager discards notifications from superseded handles.
#![expect(
    clippy::module_name_repetitions,
    reason = "HttpTransport names the concrete implementation of the Transport seam"
)]

use std::fmt;
use std::sync::Arc;

use futures::StreamExt as _;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, HeaderName, HeaderValue};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::config::StreamConfig;
use super::decode::EventDecoder;
use super::error::SseError;
use super::types::{Generation, MessageEvent};
use crate::error::{Error, TimeoutPhase};

const EVENT_STREAM: &str = "text/event-stream";
const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");

/// Everything a transport needs to open one stream.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub config: Arc<StreamConfig>,
    /// Id of the last event received on a previous handle, for resumption
    pub last_event_id: Option<String>,
}

impl OpenRequest {
    #[must_use]
    pub fn new(config: Arc<StreamConfig>, last_event_id: Option<String>) -> Self {
        Self {
            config,
            last_event_id,
        }
    }
}

/// Something that can open a server-sent event stream.
pub trait Transport: Send + Sync + 'static {
    /// Start opening a stream and return immediately.
    ///
    /// The outcome is reported through `sink`: `opened` once the stream is
    /// established, `message` per event, then exactly one of `error` or `closed`.
    fn open(&self, request: OpenRequest, sink: NotificationSink) -> Box<dyn TransportHandle>;
}

/// Live resource for one stream attempt.
pub trait TransportHandle: Send + 'static {
    /// Stop the stream. No notification may be emitted afterwards.
    fn close(&mut self);
}

/// What a transport can report about its stream.
#[non_exhaustive]
#[derive(Debug)]
pub enum Notification {
    Opened,
    Message(MessageEvent),
    /// Terminal failure of the stream
    Error(Error),
    /// The remote end finished the stream
    Closed,
    /// No data within the read window; informational
    TimedOut,
    /// Recoverable fault inside the stream, e.g. an undecodable frame
    Exception(Error),
}

#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) generation: Generation,
    pub(crate) notification: Notification,
}

/// Channel back to the connection manager, bound to one handle generation.
#[derive(Clone)]
pub struct NotificationSink {
    generation: Generation,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl fmt::Debug for NotificationSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationSink")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl NotificationSink {
    pub(crate) fn new(generation: Generation, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { generation, tx }
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Forward `notification`. Returns `false` once the manager is gone.
    pub fn notify(&self, notification: Notification) -> bool {
        self.tx
            .send(Envelope {
                generation: self.generation,
                notification,
            })
            .is_ok()
    }

    pub fn opened(&self) -> bool {
        self.notify(Notification::Opened)
    }

    pub fn message(&self, message: MessageEvent) -> bool {
        self.notify(Notification::Message(message))
    }

    pub fn error(&self, error: Error) -> bool {
        self.notify(Notification::Error(error))
    }

    pub fn closed(&self) -> bool {
        self.notify(Notification::Closed)
    }

    pub fn timed_out(&self) -> bool {
        self.notify(Notification::TimedOut)
    }

    pub fn exception(&self, error: Error) -> bool {
        self.notify(Notification::Exception(error))
    }
}

/// [`Transport`] backed by [`reqwest`].
///
/// Sends `Accept: text/event-stream`, `Cache-Control: no-cache` and, when resuming,
/// `Last-Event-ID`. The connect timeout bounds the wait for the response head; the
/// optional read timeout bounds the gap between body chunks.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client, e.g. one with custom TLS roots or a proxy.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn open(&self, request: OpenRequest, sink: NotificationSink) -> Box<dyn TransportHandle> {
        let client = self.client.clone();
        let task = tokio::spawn(async move {
            run_stream(&client, &request, &sink).await;
        });

        Box::new(HttpHandle { task })
    }
}

struct HttpHandle {
    task: JoinHandle<()>,
}

impl TransportHandle for HttpHandle {
    fn close(&mut self) {
        self.task.abort();
    }
}

impl Drop for HttpHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn build_request(client: &reqwest::Client, request: &OpenRequest) -> reqwest::RequestBuilder {
    let config = &request.config;
    let mut builder = client
        .request(config.method.into(), &config.address)
        .header(ACCEPT, HeaderValue::from_static(EVENT_STREAM))
        .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    for (name, value) in &config.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    if let Some(id) = &request.last_event_id {
        builder = builder.header(LAST_EVENT_ID, id.as_str());
    }

    if let Some(body) = &config.body {
        builder = builder.body(body.clone());
    }

    builder
}

async fn run_stream(client: &reqwest::Client, request: &OpenRequest, sink: &NotificationSink) {
    let config = &request.config;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        url = %config.address,
        method = %config.method,
        generation = %sink.generation(),
        resume_from = ?request.last_event_id,
        "Opening SSE stream"
    );

    let response = match timeout(
        config.connect_timeout,
        build_request(client, request).send(),
    )
    .await
    {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            sink.error(e.into());
            return;
        }
        Err(_elapsed) => {
            sink.error(Error::timeout(TimeoutPhase::Connect, config.connect_timeout));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        sink.error(SseError::Status { status }.into());
        return;
    }

    if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
        let content_type = content_type.to_str().unwrap_or_default();
        if !content_type.contains(EVENT_STREAM) {
            sink.error(SseError::ContentType(content_type.to_owned()).into());
            return;
        }
    }

    if !sink.opened() {
        return;
    }

    let mut body = std::pin::pin!(response.bytes_stream());
    let mut decoder = EventDecoder::new();

    loop {
        let next = match config.read_timeout {
            Some(limit) => {
                if let Ok(next) = timeout(limit, body.next()).await {
                    next
                } else {
                    sink.timed_out();
                    sink.error(Error::timeout(TimeoutPhase::Read, limit));
                    return;
                }
            }
            None => body.next().await,
        };

        match next {
            Some(Ok(chunk)) => {
                for frame in decoder.feed(&chunk) {
                    let delivered = match frame {
                        Ok(frame) => {
                            let event_type = frame.custom_event().map(str::to_owned);
                            sink.message(
                                MessageEvent::new(frame.data)
                                    .with_event_id(frame.id)
                                    .with_event_type(event_type)
                                    .with_url(Some(config.address.clone())),
                            )
                        }
                        Err(e) => sink.exception(e.into()),
                    };
                    if !delivered {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                sink.error(SseError::Body(e).into());
                return;
            }
            None => {
                sink.closed();
                return;
            }
        }
    }
}
