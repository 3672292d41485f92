#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::config::StreamConfig;
use super::dispatcher::{EventDispatcher, ListenerId};
use super::error::SseError;
use super::log::MessageLog;
use super::policy;
use super::transport::{
    Envelope, HttpTransport, Notification, NotificationSink, OpenRequest, Transport,
    TransportHandle,
};
use super::types::{ConnectionState, ErrorEvent, EventKind, Generation, LogRecord, StreamEvent};
use crate::Result;
use crate::error::{Error, Kind, TimeoutPhase};

/// Broadcast channel capacity for [`ConnectionManager::events`].
const BROADCAST_CAPACITY: usize = 1024;

/// Owns one logical stream connection: its transport handle, state machine,
/// reconnection timer, listeners and diagnostic log.
///
/// Every operation returns immediately. Transport notifications are applied on a
/// background task, in the order the transport produced them, and notifications
/// from a handle that has since been replaced are dropped.
///
/// Cloning is cheap and every clone drives the same connection. The connection is
/// torn down when the last clone is dropped.
///
/// # Example
///
/// ```no_run
/// use sse_client_sdk::sse::{ConnectionManager, EventKind, StreamConfig};
///
/// # async fn run() -> sse_client_sdk::Result<()> {
/// let manager = ConnectionManager::http()?;
/// manager.subscribe(EventKind::Message, |event| {
///     if let Some(message) = event.as_message() {
///         println!("{}", message.data);
///     }
/// });
/// manager.connect(StreamConfig::new("https://example.com/events"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    core: Mutex<Core>,
    transport: Box<dyn Transport>,
    runtime: Handle,
    notify_tx: mpsc::UnboundedSender<Envelope>,
    state_tx: watch::Sender<ConnectionState>,
    broadcast_tx: broadcast::Sender<StreamEvent>,
    dispatcher: EventDispatcher,
    log: MessageLog,
}

/// Everything guarded by the single connection lock.
#[derive(Default)]
struct Core {
    state: ConnectionState,
    config: Option<Arc<StreamConfig>>,
    handle: Option<Box<dyn TransportHandle>>,
    /// Generation of `handle`; `None` once the handle has been released
    active: Option<Generation>,
    next_generation: u64,
    attempts: u32,
    /// An open has been requested and neither `opened` nor a failure has arrived
    in_flight: bool,
    retry_timer: Option<CancellationToken>,
    watchdog: Option<CancellationToken>,
    last_event_id: Option<String>,
    last_event: Option<StreamEvent>,
    last_error: Option<ErrorEvent>,
}

impl Core {
    fn cancel_retry_timer(&mut self) {
        if let Some(token) = self.retry_timer.take() {
            token.cancel();
        }
    }

    /// Close the current handle and stop accepting its notifications.
    fn release_handle(&mut self) {
        if let Some(token) = self.watchdog.take() {
            token.cancel();
        }
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
        self.active = None;
        self.in_flight = false;
    }

    fn next_generation(&mut self) -> Generation {
        self.next_generation += 1;
        Generation(self.next_generation)
    }

    fn verbose(&self) -> bool {
        self.config.as_deref().is_some_and(|config| config.debug)
    }

    /// Record `event` as the latest observation and queue it for emission.
    fn record(&mut self, event: StreamEvent, out: &mut Vec<StreamEvent>) {
        if let StreamEvent::Errored(error) = &event {
            self.last_error = Some(error.clone());
        }
        self.last_event = Some(event.clone());
        out.push(event);
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.cancel_retry_timer();
        self.release_handle();
    }
}

/// Who asked for a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Caller,
    RetryTimer,
}

impl ConnectionManager {
    /// Create an idle manager that opens streams through `transport`.
    ///
    /// Must be called from within a Tokio runtime; the manager keeps a handle to
    /// it for its background tasks, so later calls may come from any thread.
    ///
    /// # Errors
    ///
    /// Returns a [`Kind::Internal`] error when there is no current Tokio runtime.
    pub fn new<T: Transport>(transport: T) -> Result<Self> {
        Self::with_log_capacity(transport, super::log::DEFAULT_CAPACITY)
    }

    /// Like [`ConnectionManager::new`], keeping at most `capacity` log records.
    ///
    /// # Errors
    ///
    /// Returns a [`Kind::Internal`] error when there is no current Tokio runtime.
    pub fn with_log_capacity<T: Transport>(transport: T, capacity: usize) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| Error::with_source(Kind::Internal, e))?;
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        let inner = Arc::new(Inner {
            core: Mutex::new(Core::default()),
            transport: Box::new(transport),
            runtime,
            notify_tx,
            state_tx,
            broadcast_tx,
            dispatcher: EventDispatcher::new(),
            log: MessageLog::new(capacity),
        });

        inner
            .runtime
            .spawn(notification_loop(Arc::downgrade(&inner), notify_rx));

        Ok(Self { inner })
    }

    /// Create a manager backed by [`HttpTransport`].
    ///
    /// # Errors
    ///
    /// Returns a [`Kind::Internal`] error when there is no current Tokio runtime.
    pub fn http() -> Result<Self> {
        Self::new(HttpTransport::new())
    }

    /// Open a stream with `config`, replacing any existing one.
    ///
    /// Does nothing while an attempt is already in flight. An invalid `config` is
    /// reported as an `errored` event and moves the manager to
    /// [`ConnectionState::Error`] without touching the transport.
    ///
    /// Unless a recovery is already pending, the reconnection budget starts over.
    pub fn connect(&self, config: StreamConfig) {
        self.inner.connect(Arc::new(config), Origin::Caller);
    }

    /// Close the stream, cancel any pending retry and reset the attempt counter.
    ///
    /// Always ends in [`ConnectionState::Disconnected`]. No event is emitted.
    pub fn disconnect(&self) {
        let mut core = self.inner.lock();
        self.inner.reset(&mut core);
        self.inner.transition(&mut core, ConnectionState::Disconnected);
    }

    /// Disconnect and connect again with the last configuration passed to
    /// [`ConnectionManager::connect`].
    ///
    /// Without a stored configuration this only appends an error record to the
    /// message log.
    pub fn reconnect(&self) {
        let mut events = Vec::new();
        let verbose;
        {
            let mut core = self.inner.lock();
            let Some(config) = core.config.clone() else {
                drop(core);
                let error = Error::validation("no stream configuration to reconnect with");
                #[cfg(feature = "tracing")]
                tracing::warn!("Reconnect requested before any connect: {error}");
                self.inner.log.append(&StreamEvent::errored(error));
                return;
            };

            verbose = config.debug;
            self.inner.reset(&mut core);
            self.inner.transition(&mut core, ConnectionState::Disconnected);
            self.inner
                .start(&mut core, config, Origin::Caller, &mut events);
        }
        self.inner.emit(events, verbose);
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Automatic retries performed since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    /// The configuration of the current (or last) connection.
    #[must_use]
    pub fn config(&self) -> Option<Arc<StreamConfig>> {
        self.inner.lock().config.clone()
    }

    #[must_use]
    pub fn last_event(&self) -> Option<StreamEvent> {
        self.inner.lock().last_event.clone()
    }

    /// The most recent `errored` event, cleared once a stream opens.
    #[must_use]
    pub fn last_error(&self) -> Option<ErrorEvent> {
        self.inner.lock().last_error.clone()
    }

    /// Id of the last event received, sent as `Last-Event-ID` on the next open.
    #[must_use]
    pub fn last_event_id(&self) -> Option<String> {
        self.inner.lock().last_event_id.clone()
    }

    /// Snapshot of the diagnostic log, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<LogRecord> {
        self.inner.log.snapshot()
    }

    pub fn clear_messages(&self) {
        self.inner.log.clear();
    }

    #[must_use]
    pub fn message_log(&self) -> &MessageLog {
        &self.inner.log
    }

    /// Register `listener` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(kind, listener)
    }

    /// Remove one listener, or all listeners of `kind` when `id` is `None`.
    pub fn unsubscribe(&self, kind: EventKind, id: Option<ListenerId>) -> usize {
        self.inner.dispatcher.unsubscribe(kind, id)
    }

    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Stream of every event emitted from now on.
    ///
    /// A consumer that falls more than the channel capacity behind receives an
    /// [`SseError::Lagged`] error item and then continues with newer events.
    pub fn events(&self) -> impl Stream<Item = Result<StreamEvent>> + use<> {
        let mut rx = self.inner.broadcast_tx.subscribe();

        stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield Ok(event),
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("SSE event subscriber lagged, missed {count} events");
                        yield Err(Error::from(SseError::Lagged { count }));
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.lock();
        f.debug_struct("ConnectionManager")
            .field("state", &core.state)
            .field("active", &core.active)
            .field("attempts", &core.attempts)
            .field("address", &core.config.as_deref().map(|c| c.address.as_str()))
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, core: &mut Core, next: ConnectionState) {
        let previous = core.state;
        core.state = next;
        self.state_tx.send_replace(next);

        #[cfg(feature = "tracing")]
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "SSE connection state changed");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = previous;
    }

    /// Tear down the handle and any pending retry; the counter starts over.
    fn reset(&self, core: &mut Core) {
        core.cancel_retry_timer();
        core.release_handle();
        core.attempts = 0;
        core.last_error = None;
    }

    fn connect(self: &Arc<Self>, config: Arc<StreamConfig>, origin: Origin) {
        let mut events = Vec::new();
        let verbose = config.debug;
        {
            let mut core = self.lock();
            self.start(&mut core, config, origin, &mut events);
        }
        self.emit(events, verbose);
    }

    fn start(
        self: &Arc<Self>,
        core: &mut Core,
        config: Arc<StreamConfig>,
        origin: Origin,
        events: &mut Vec<StreamEvent>,
    ) {
        if let Err(error) = config.validate() {
            #[cfg(feature = "tracing")]
            tracing::warn!("Rejected stream configuration: {error}");
            core.cancel_retry_timer();
            core.release_handle();
            self.transition(core, ConnectionState::Error);
            core.record(StreamEvent::errored(error), events);
        } else if core.in_flight {
            #[cfg(feature = "tracing")]
            tracing::trace!(generation = ?core.active, "Connect ignored, attempt already in flight");
        } else {
            if origin == Origin::Caller && core.state != ConnectionState::Reconnecting {
                core.attempts = 0;
            }
            self.open(core, config);
        }
    }

    /// Replace the current handle with a freshly opened one.
    fn open(self: &Arc<Self>, core: &mut Core, config: Arc<StreamConfig>) {
        core.cancel_retry_timer();
        core.release_handle();

        let generation = core.next_generation();
        core.active = Some(generation);
        core.in_flight = true;
        core.config = Some(Arc::clone(&config));
        if core.state != ConnectionState::Reconnecting {
            self.transition(core, ConnectionState::Connecting);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            %generation,
            address = %config.address,
            attempt = core.attempts,
            "Opening SSE transport handle"
        );

        let request = OpenRequest::new(Arc::clone(&config), core.last_event_id.clone());
        let sink = NotificationSink::new(generation, self.notify_tx.clone());
        let _guard = self.runtime.enter();
        core.handle = Some(self.transport.open(request, sink));
        core.watchdog = Some(self.arm_watchdog(generation, config.connect_timeout));
    }

    /// Fail the attempt for `generation` if it has not opened within `limit`.
    fn arm_watchdog(self: &Arc<Self>, generation: Generation, limit: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let weak = Arc::downgrade(self);

        self.runtime.spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = sleep(limit) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.connect_timed_out(generation, limit);
                    }
                }
            }
        });

        token
    }

    fn connect_timed_out(self: &Arc<Self>, generation: Generation, limit: Duration) {
        let mut events = Vec::new();
        let verbose;
        {
            let mut core = self.lock();
            verbose = core.verbose();
            if core.active != Some(generation) || !core.in_flight {
                return;
            }

            #[cfg(feature = "tracing")]
            tracing::warn!(%generation, "SSE stream did not open within {limit:?}");
            self.fail(&mut core, Error::timeout(TimeoutPhase::Connect, limit), &mut events);
        }
        self.emit(events, verbose);
    }

    /// Schedule the next attempt after `delay`.
    fn schedule_retry(self: &Arc<Self>, delay: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let weak = Arc::downgrade(self);

        self.runtime.spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = sleep(delay) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.retry(&cancelled);
                    }
                }
            }
        });

        token
    }

    fn retry(self: &Arc<Self>, token: &CancellationToken) {
        let mut events = Vec::new();
        let verbose;
        {
            let mut core = self.lock();
            // Cancellation happens under the lock, so this check cannot race.
            if token.is_cancelled() {
                return;
            }
            core.retry_timer = None;
            let Some(config) = core.config.clone() else {
                return;
            };
            verbose = config.debug;
            self.start(&mut core, config, Origin::RetryTimer, &mut events);
        }
        self.emit(events, verbose);
    }

    /// Record a terminal failure of the active handle and run the reconnection path.
    fn fail(self: &Arc<Self>, core: &mut Core, error: Error, events: &mut Vec<StreamEvent>) {
        core.release_handle();
        self.transition(core, ConnectionState::Error);
        core.record(StreamEvent::errored(error), events);

        let Some(config) = core.config.clone() else {
            return;
        };
        if !config.auto_reconnect || config.max_reconnect_attempts == 0 {
            return;
        }

        core.attempts = core.attempts.saturating_add(1);
        if !policy::should_retry(core.attempts, config.max_reconnect_attempts) {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                attempts = core.attempts - 1,
                "SSE reconnection budget exhausted, giving up"
            );
            core.record(
                StreamEvent::errored(Error::max_attempts_exceeded(config.max_reconnect_attempts)),
                events,
            );
            return;
        }

        let delay = policy::delay_for(core.attempts, config.reconnect_base_delay);
        #[cfg(feature = "tracing")]
        tracing::info!(
            attempt = core.attempts,
            max_attempts = config.max_reconnect_attempts,
            delay_ms = %delay.as_millis(),
            "Scheduling SSE reconnection"
        );
        self.transition(core, ConnectionState::Reconnecting);
        core.retry_timer = Some(self.schedule_retry(delay));
    }

    fn handle_notification(self: &Arc<Self>, envelope: Envelope) {
        let mut events = Vec::new();
        let verbose;
        {
            let mut core = self.lock();
            verbose = core.verbose();
            let Envelope {
                generation,
                notification,
            } = envelope;

            if core.active != Some(generation) {
                #[cfg(feature = "tracing")]
                tracing::trace!(%generation, active = ?core.active, "Dropping notification from stale handle");
                return;
            }

            match notification {
                Notification::Opened => {
                    core.in_flight = false;
                    if let Some(token) = core.watchdog.take() {
                        token.cancel();
                    }
                    core.attempts = 0;
                    core.last_error = None;
                    self.transition(&mut core, ConnectionState::Connected);
                    core.record(StreamEvent::Opened, &mut events);
                }
                Notification::Message(message) => {
                    if message.event_id.is_some() {
                        core.last_event_id.clone_from(&message.event_id);
                    }
                    core.record(StreamEvent::Message(message), &mut events);
                }
                Notification::Error(error) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%generation, "SSE stream failed: {error}");
                    self.fail(&mut core, error, &mut events);
                }
                Notification::Closed => {
                    core.release_handle();
                    self.transition(&mut core, ConnectionState::Disconnected);
                    core.record(StreamEvent::Closed, &mut events);
                }
                Notification::TimedOut => core.record(StreamEvent::TimedOut, &mut events),
                Notification::Exception(error) => {
                    core.record(StreamEvent::TransportException(error.into()), &mut events);
                }
            }
        }
        self.emit(events, verbose);
    }

    /// Log, dispatch and broadcast `events`. Runs without the connection lock held.
    fn emit(&self, events: Vec<StreamEvent>, verbose: bool) {
        for event in events {
            trace_event(&event, verbose);
            self.log.append(&event);
            self.dispatcher.publish(&event);
            _ = self.broadcast_tx.send(event);
        }
    }
}

#[cfg(feature = "tracing")]
fn trace_event(event: &StreamEvent, verbose: bool) {
    let kind = event.kind();
    if verbose {
        tracing::debug!(%kind, ?event, "SSE event");
    } else {
        tracing::trace!(%kind, "SSE event");
    }
}

#[cfg(not(feature = "tracing"))]
fn trace_event(_event: &StreamEvent, _verbose: bool) {}

/// Apply transport notifications in arrival order until the manager is dropped.
async fn notification_loop(inner: Weak<Inner>, mut notify_rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = notify_rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_notification(envelope);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Transport that hands every sink back to the test.
    struct Recording {
        sinks: mpsc::UnboundedSender<NotificationSink>,
        closes: Arc<AtomicUsize>,
    }

    struct RecordingHandle(Arc<AtomicUsize>);

    impl TransportHandle for RecordingHandle {
        fn close(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Transport for Recording {
        fn open(&self, _request: OpenRequest, sink: NotificationSink) -> Box<dyn TransportHandle> {
            self.sinks.send(sink).unwrap();
            Box::new(RecordingHandle(Arc::clone(&self.closes)))
        }
    }

    fn manager() -> (
        ConnectionManager,
        mpsc::UnboundedReceiver<NotificationSink>,
        Arc<AtomicUsize>,
    ) {
        let (sinks, rx) = mpsc::unbounded_channel();
        let closes = Arc::new(AtomicUsize::new(0));
        let transport = Recording {
            sinks,
            closes: Arc::clone(&closes),
        };
        (ConnectionManager::new(transport).unwrap(), rx, closes)
    }

    async fn wait_for(manager: &ConnectionManager, state: ConnectionState) {
        manager
            .state_receiver()
            .wait_for(|s| *s == state)
            .await
            .unwrap();
    }

    #[test]
    fn new_outside_runtime_fails() {
        let (sinks, _rx) = mpsc::unbounded_channel();
        let transport = Recording {
            sinks,
            closes: Arc::default(),
        };

        let error = ConnectionManager::new(transport).unwrap_err();
        assert_eq!(error.kind(), Kind::Internal);
    }

    #[tokio::test]
    async fn starts_idle() {
        let (manager, _sinks, _closes) = manager();

        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(manager.last_event().is_none());
        assert!(manager.config().is_none());
        assert!(manager.messages().is_empty());
    }

    #[tokio::test]
    async fn connect_then_open() {
        let (manager, mut sinks, _closes) = manager();
        manager.connect(StreamConfig::new("https://example.com/events"));
        assert_eq!(manager.state(), ConnectionState::Connecting);

        let sink = sinks.recv().await.unwrap();
        assert_eq!(sink.generation().get(), 1);
        sink.opened();
        wait_for(&manager, ConnectionState::Connected).await;

        assert!(manager.is_connected());
        assert!(matches!(manager.last_event(), Some(StreamEvent::Opened)));
        assert_eq!(manager.messages()[0].content, "Connection established");
    }

    #[tokio::test]
    async fn disconnect_closes_handle_and_drops_late_notifications() {
        let (manager, mut sinks, closes) = manager();
        manager.connect(StreamConfig::new("https://example.com/events"));
        let sink = sinks.recv().await.unwrap();

        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        sink.opened();
        sink.message(crate::sse::MessageEvent::new("late"));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.messages().is_empty());
    }

    #[tokio::test]
    async fn message_updates_last_event_id() {
        let (manager, mut sinks, _closes) = manager();
        manager.connect(StreamConfig::new("https://example.com/events"));
        let sink = sinks.recv().await.unwrap();
        sink.opened();
        sink.message(crate::sse::MessageEvent::new("a").with_event_id(Some("41".to_owned())));
        sink.message(crate::sse::MessageEvent::new("b"));

        let mut rx = manager.state_receiver();
        rx.wait_for(|s| s.is_connected()).await.unwrap();
        while manager.messages().len() < 3 {
            tokio::task::yield_now().await;
        }

        assert_eq!(manager.last_event_id().as_deref(), Some("41"));
    }
}
