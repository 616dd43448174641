//! Stream connection manager.
//!
//! Owns at most one live push connection at a time. Each `connect` starts a
//! new *generation*; the session task carries its generation and every
//! tracker mutation it makes is checked against the current generation
//! under the tracker lock, so a torn-down session can never overwrite the
//! state of its successor. Teardown cancels the session and waits for its
//! task to finish before a new transport is opened.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::event::WireEvent;
use super::transport::{EventStream, EventTransport, TransportFrame, validate_subscriber_id};
use crate::config::EngineConfig;
use crate::health::{ConnectionState, ConnectionStatus, ConnectionTracker};
use crate::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Upper bound on waiting for a cancelled session task to wind down.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Receives parsed events in arrival order.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: WireEvent);
}

/// Connection telemetry published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StatusChanged(ConnectionState),
    /// An automatic reconnect will be attempted after `delay`.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// The attempt ceiling was reached; only a manual reconnect resumes.
    ReconnectExhausted { attempts: u32 },
    /// The endpoint refused the connection with a non-transient error.
    ConnectionRejected { reason: String },
    /// A message could not be parsed and was dropped.
    MessageDropped { reason: String },
}

struct Shared {
    tracker: Mutex<ConnectionTracker>,
    generation: AtomicU64,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl Shared {
    /// Start a new generation. Taken under the tracker lock so no
    /// generation-checked transition can interleave.
    fn advance(&self) -> u64 {
        let _tracker = self.tracker.lock();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Apply a transition on behalf of `generation`. Returns `None` if the
    /// generation is stale or the transition is invalid.
    fn apply<T>(
        &self,
        generation: u64,
        transition: impl FnOnce(&mut ConnectionTracker) -> Result<T>,
    ) -> Option<T> {
        let mut tracker = self.tracker.lock();
        if !self.is_current(generation) {
            debug!(generation, "Ignoring transition from stale connection");
            return None;
        }
        let before = tracker.status();
        match transition(&mut tracker) {
            Ok(value) => {
                if tracker.status() != before {
                    let snapshot = tracker.snapshot(Utc::now());
                    drop(tracker);
                    trace!(status = %snapshot.status, "Connection status changed");
                    let _ = self.event_tx.send(ConnectionEvent::StatusChanged(snapshot));
                }
                Some(value)
            }
            Err(e) => {
                warn!(generation, "Rejected connection transition: {}", e);
                None
            }
        }
    }

    fn record_latency(&self, generation: u64, latency_ms: u64) {
        let mut tracker = self.tracker.lock();
        if self.is_current(generation) {
            tracker.record_latency(latency_ms);
        }
    }

    fn status(&self) -> ConnectionStatus {
        self.tracker.lock().status()
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.event_tx.send(event);
    }
}

struct Session {
    subscriber_id: String,
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Manages the push connection for one subscriber at a time.
pub struct StreamManager {
    config: EngineConfig,
    transport: Arc<dyn EventTransport>,
    sink: Arc<dyn EventSink>,
    shared: Arc<Shared>,
    session: tokio::sync::Mutex<Option<Session>>,
    last_subscriber: Mutex<Option<String>>,
}

impl StreamManager {
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn EventTransport>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            transport,
            sink,
            shared: Arc::new(Shared {
                tracker: Mutex::new(ConnectionTracker::new()),
                generation: AtomicU64::new(0),
                event_tx,
            }),
            session: tokio::sync::Mutex::new(None),
            last_subscriber: Mutex::new(None),
        }
    }

    /// Open the stream for `subscriber_id`, tearing down any previous
    /// connection first.
    ///
    /// A call for the subscriber that is already connecting is ignored.
    /// Invalid subscriber ids are rejected without touching the connection.
    pub async fn connect(&self, subscriber_id: &str) -> Result<()> {
        validate_subscriber_id(subscriber_id)?;

        let mut session = self.session.lock().await;
        if let Some(current) = session.as_ref()
            && current.subscriber_id == subscriber_id
            && self.shared.status() == ConnectionStatus::Connecting
        {
            debug!(subscriber = %subscriber_id, "Already connecting, ignoring connect request");
            return Ok(());
        }

        if let Some(previous) = session.take() {
            info!(
                from = %previous.subscriber_id,
                to = %subscriber_id,
                "Closing existing event stream before connecting"
            );
            self.teardown(previous).await;
        }

        let generation = self.shared.advance();
        self.shared.apply(generation, |t| t.mark_disconnected());
        self.shared.apply(generation, |t| t.begin_connect());
        *self.last_subscriber.lock() = Some(subscriber_id.to_string());

        let cancel = CancellationToken::new();
        let context = SessionContext {
            subscriber_id: subscriber_id.to_string(),
            generation,
            config: self.config.clone(),
            transport: self.transport.clone(),
            sink: self.sink.clone(),
            shared: self.shared.clone(),
            cancel: cancel.clone(),
            failures: 0,
        };
        let task = tokio::spawn(context.run());

        info!(
            subscriber = %subscriber_id,
            transport = self.transport.name(),
            generation,
            "Event stream session started"
        );
        *session = Some(Session {
            subscriber_id: subscriber_id.to_string(),
            generation,
            cancel,
            task,
        });
        Ok(())
    }

    /// Cancel any pending reconnect, close the transport and mark the
    /// connection disconnected. Idempotent.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            self.teardown(previous).await;
        }
        let generation = self.shared.advance();
        self.shared.apply(generation, |t| t.mark_disconnected());
    }

    /// Disconnect, wait the configured grace period, then connect again to
    /// the most recent subscriber.
    pub async fn reconnect(&self) -> Result<()> {
        let subscriber_id = self
            .subscriber_id()
            .ok_or_else(|| Error::config("no subscriber to reconnect"))?;
        self.disconnect().await;
        tokio::time::sleep(self.config.reconnect_grace()).await;
        self.connect(&subscriber_id).await
    }

    async fn teardown(&self, session: Session) {
        debug!(
            subscriber = %session.subscriber_id,
            generation = session.generation,
            "Tearing down event stream session"
        );
        session.cancel.cancel();
        let mut task = session.task;
        if tokio::time::timeout(TEARDOWN_TIMEOUT, &mut task).await.is_err() {
            warn!(
                subscriber = %session.subscriber_id,
                "Event stream session did not stop in time, aborting"
            );
            task.abort();
        }
    }

    /// Most recently requested subscriber, if any.
    pub fn subscriber_id(&self) -> Option<String> {
        self.last_subscriber.lock().clone()
    }

    /// Health read; `uptime_ms` is computed at call time.
    pub fn state(&self) -> ConnectionState {
        self.shared.tracker.lock().snapshot(Utc::now())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Store a latency measured outside the stream (e.g. ping/pong).
    pub fn record_latency(&self, latency_ms: u64) {
        self.shared.tracker.lock().record_latency(latency_ms);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
            session.task.abort();
        }
    }
}

enum PumpOutcome {
    Cancelled,
    Failed(Error),
}

/// Everything a session task needs; owned by the task.
struct SessionContext {
    subscriber_id: String,
    generation: u64,
    config: EngineConfig,
    transport: Arc<dyn EventTransport>,
    sink: Arc<dyn EventSink>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    /// Retry budget for this session. Unlike the reported attempt count it
    /// starts at zero on every caller-initiated connect.
    failures: u32,
}

impl SessionContext {
    async fn run(mut self) {
        loop {
            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                opened = self.transport.open(&self.subscriber_id) => opened,
            };

            let failure = match opened {
                Ok(mut stream) => {
                    if self
                        .shared
                        .apply(self.generation, |t| t.mark_open(Utc::now()))
                        .is_none()
                    {
                        stream.close().await;
                        return;
                    }
                    self.failures = 0;
                    info!(subscriber = %self.subscriber_id, "Event stream connected");

                    let outcome = self.pump(&mut *stream).await;
                    stream.close().await;
                    match outcome {
                        PumpOutcome::Cancelled => return,
                        PumpOutcome::Failed(e) => e,
                    }
                }
                Err(e) => e,
            };

            if !self.handle_failure(failure).await {
                break;
            }
        }
        debug!(subscriber = %self.subscriber_id, "Event stream session stopped");
    }

    /// Record a failed attempt and wait out the backoff. Returns `true` when
    /// the next attempt should start.
    async fn handle_failure(&mut self, failure: Error) -> bool {
        warn!(subscriber = %self.subscriber_id, "Event stream failed: {}", failure);

        let message = failure.to_string();
        if self
            .shared
            .apply(self.generation, |t| t.mark_failed(message))
            .is_none()
        {
            return false;
        }
        self.failures += 1;
        let attempts = self.failures;

        if !failure.is_retryable() {
            error!(
                subscriber = %self.subscriber_id,
                "Event stream rejected, not retrying: {}", failure
            );
            self.shared.emit(ConnectionEvent::ConnectionRejected {
                reason: failure.to_string(),
            });
            return false;
        }

        if !self.config.should_reconnect(attempts) {
            error!(
                subscriber = %self.subscriber_id,
                attempts,
                "Max reconnect attempts reached"
            );
            self.shared
                .emit(ConnectionEvent::ReconnectExhausted { attempts });
            return false;
        }

        let delay = self.config.reconnect_delay(attempts - 1);
        info!(
            subscriber = %self.subscriber_id,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.shared.emit(ConnectionEvent::ReconnectScheduled {
            attempt: attempts,
            delay,
        });

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }

        self.shared
            .apply(self.generation, |t| t.begin_connect())
            .is_some()
    }

    async fn pump(&self, stream: &mut dyn EventStream) -> PumpOutcome {
        let stale_timeout = self.config.stale_timeout();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PumpOutcome::Cancelled,
                next = next_frame_within(stream, stale_timeout) => next,
            };

            let frame = match next {
                Some(Some(Ok(frame))) => frame,
                Some(Some(Err(e))) => return PumpOutcome::Failed(e),
                Some(None) => {
                    return PumpOutcome::Failed(Error::transport(
                        "event stream closed by server",
                    ));
                }
                None => {
                    return PumpOutcome::Failed(Error::transport(format!(
                        "no data received for {} ms",
                        self.config.stale_timeout_ms
                    )));
                }
            };

            match frame {
                TransportFrame::KeepAlive => trace!("Event stream keepalive"),
                TransportFrame::Message(raw) => self.handle_message(&raw).await,
            }
        }
    }

    async fn handle_message(&self, raw: &str) {
        let event = match WireEvent::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(subscriber = %self.subscriber_id, "Dropping malformed event: {}", e);
                self.shared.emit(ConnectionEvent::MessageDropped {
                    reason: e.to_string(),
                });
                return;
            }
        };

        if event.is_control() {
            if let Some(sent_at) = event.timestamp {
                let latency_ms = Utc::now()
                    .signed_duration_since(sent_at)
                    .num_milliseconds()
                    .max(0) as u64;
                self.shared.record_latency(self.generation, latency_ms);
            }
            return;
        }

        if !self.shared.is_current(self.generation) {
            return;
        }
        trace!(event_type = %event.event_type, "Delivering event");
        self.sink.deliver(event).await;
    }
}

/// `None` when the stale timeout elapsed before a frame arrived.
async fn next_frame_within(
    stream: &mut dyn EventStream,
    stale_timeout: Option<Duration>,
) -> Option<Option<Result<TransportFrame>>> {
    match stale_timeout {
        Some(limit) => tokio::time::timeout(limit, stream.next_frame()).await.ok(),
        None => Some(stream.next_frame().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;

    /// What the scripted transport does on one `open`.
    enum Step {
        Fail(Error),
        /// Open, yield the frames, then hang until closed.
        Open(Vec<TransportFrame>),
        /// Open, yield the frames, then report the stream closed.
        OpenThenClose(Vec<TransportFrame>),
    }

    struct ScriptedTransport {
        script: Mutex<VecDeque<Step>>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.into()),
                log: Arc::new(Mutex::new(Vec::new())),
            })
        }

        fn push(&self, step: Step) {
            self.script.lock().push_back(step);
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }

        fn opens(&self) -> usize {
            self.log().iter().filter(|l| l.starts_with("open")).count()
        }
    }

    #[async_trait]
    impl EventTransport for ScriptedTransport {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn open(&self, subscriber_id: &str) -> Result<Box<dyn EventStream>> {
            self.log.lock().push(format!("open {subscriber_id}"));
            let step = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Step::Fail(Error::transport("connection refused")));
            match step {
                Step::Fail(e) => Err(e),
                Step::Open(frames) => Ok(Box::new(ScriptedStream {
                    subscriber_id: subscriber_id.to_string(),
                    frames: frames.into(),
                    close_at_end: false,
                    closed: AtomicBool::new(false),
                    log: self.log.clone(),
                })),
                Step::OpenThenClose(frames) => Ok(Box::new(ScriptedStream {
                    subscriber_id: subscriber_id.to_string(),
                    frames: frames.into(),
                    close_at_end: true,
                    closed: AtomicBool::new(false),
                    log: self.log.clone(),
                })),
            }
        }
    }

    struct ScriptedStream {
        subscriber_id: String,
        frames: VecDeque<TransportFrame>,
        close_at_end: bool,
        closed: AtomicBool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventStream for ScriptedStream {
        async fn next_frame(&mut self) -> Option<Result<TransportFrame>> {
            if let Some(frame) = self.frames.pop_front() {
                return Some(Ok(frame));
            }
            if self.close_at_end {
                return None;
            }
            futures::future::pending().await
        }

        async fn close(&mut self) {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.log.lock().push(format!("close {}", self.subscriber_id));
            }
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<WireEvent>>,
    }

    impl CollectingSink {
        fn types(&self) -> Vec<String> {
            self.events
                .lock()
                .iter()
                .map(|e| e.event_type.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventSink for CollectingSink {
        async fn deliver(&self, event: WireEvent) {
            self.events.lock().push(event);
        }
    }

    fn message(json: &str) -> TransportFrame {
        TransportFrame::Message(json.to_string())
    }

    fn config() -> EngineConfig {
        EngineConfig {
            reconnect_delay_ms: 1000,
            max_reconnect_attempts: 5,
            stale_timeout_ms: 0,
            ..Default::default()
        }
    }

    fn manager(
        config: EngineConfig,
        transport: Arc<ScriptedTransport>,
    ) -> (StreamManager, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        (StreamManager::new(config, transport, sink.clone()), sink)
    }

    async fn wait_for(manager: &StreamManager, status: ConnectionStatus) {
        for _ in 0..2000 {
            if manager.status() == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {status}, still {}", manager.status());
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_until_ceiling() {
        let transport = ScriptedTransport::new(vec![]);
        let (manager, _) = manager(config(), transport.clone());
        let mut events = manager.subscribe();

        manager.connect("user-1").await.unwrap();

        let mut delays = Vec::new();
        let exhausted_at = loop {
            match events.recv().await.unwrap() {
                ConnectionEvent::ReconnectScheduled { delay, .. } => delays.push(delay),
                ConnectionEvent::ReconnectExhausted { attempts } => break attempts,
                _ => {}
            }
        };

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(8000),
            ]
        );
        assert_eq!(exhausted_at, 5);

        // No automatic attempt happens past the ceiling.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.opens(), 5);
        let state = manager.state();
        assert_eq!(state.status, ConnectionStatus::Error);
        assert_eq!(state.connection_attempts, 5);
        assert!(state.error_message.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_reset_on_successful_open() {
        let transport = ScriptedTransport::new(vec![
            Step::Fail(Error::transport("down")),
            Step::Fail(Error::transport("down")),
            Step::Open(vec![]),
        ]);
        let (manager, _) = manager(config(), transport.clone());

        manager.connect("user-1").await.unwrap();
        wait_for(&manager, ConnectionStatus::Connected).await;

        let state = manager.state();
        assert_eq!(state.connection_attempts, 0);
        assert_eq!(state.total_connections, 1);
        assert!(state.last_connected.is_some());
        assert!(state.uptime_ms.is_some());
        assert_eq!(transport.opens(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_delivered_in_order_and_malformed_dropped() {
        let transport = ScriptedTransport::new(vec![Step::Open(vec![
            message(r#"{"type":"email","title":"one"}"#),
            message("{garbage"),
            TransportFrame::KeepAlive,
            message(r#"{"type":"task_due","title":"two"}"#),
            message(r#"{"no_type":true}"#),
            message(r#"{"type":"file_shared","title":"three"}"#),
        ])]);
        let (manager, sink) = manager(config(), transport);
        let mut events = manager.subscribe();

        manager.connect("user-1").await.unwrap();
        wait_for(&manager, ConnectionStatus::Connected).await;
        settle().await;

        assert_eq!(sink.types(), vec!["email", "task_due", "file_shared"]);
        let state = manager.state();
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert_eq!(state.connection_attempts, 0);

        let mut dropped = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ConnectionEvent::MessageDropped { .. }) {
                dropped += 1;
            }
        }
        assert_eq!(dropped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let transport = ScriptedTransport::new(vec![]);
        let (manager, _) = manager(config(), transport.clone());
        let mut events = manager.subscribe();

        manager.connect("user-1").await.unwrap();
        loop {
            if let ConnectionEvent::ReconnectScheduled { .. } = events.recv().await.unwrap() {
                break;
            }
        }

        manager.disconnect().await;
        manager.disconnect().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(transport.opens(), 1);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_subscriber_fails_fast() {
        let transport = ScriptedTransport::new(vec![]);
        let (manager, _) = manager(config(), transport.clone());

        let err = manager.connect("bad/id").await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(transport.opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_subscriber_closes_previous_first() {
        let transport = ScriptedTransport::new(vec![Step::Open(vec![]), Step::Open(vec![])]);
        let (manager, _) = manager(config(), transport.clone());

        manager.connect("alice").await.unwrap();
        wait_for(&manager, ConnectionStatus::Connected).await;
        manager.connect("bob").await.unwrap();
        wait_for(&manager, ConnectionStatus::Connected).await;

        assert_eq!(
            transport.log(),
            vec!["open alice", "close alice", "open bob"]
        );
        assert_eq!(manager.subscriber_id().as_deref(), Some("bob"));
        assert_eq!(manager.state().total_connections, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_connecting_is_ignored() {
        struct SlowTransport {
            opens: AtomicU64,
        }

        #[async_trait]
        impl EventTransport for SlowTransport {
            fn name(&self) -> &'static str {
                "slow"
            }

            async fn open(&self, _subscriber_id: &str) -> Result<Box<dyn EventStream>> {
                self.opens.fetch_add(1, Ordering::SeqCst);
                futures::future::pending().await
            }
        }

        let transport = Arc::new(SlowTransport {
            opens: AtomicU64::new(0),
        });
        let sink = Arc::new(CollectingSink::default());
        let manager = StreamManager::new(config(), transport.clone(), sink);

        manager.connect("user-1").await.unwrap();
        settle().await;
        manager.connect("user-1").await.unwrap();
        settle().await;

        assert_eq!(manager.status(), ConnectionStatus::Connecting);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_close_triggers_backoff() {
        let transport = ScriptedTransport::new(vec![
            Step::OpenThenClose(vec![message(r#"{"type":"email"}"#)]),
            Step::Open(vec![]),
        ]);
        let (manager, sink) = manager(config(), transport.clone());
        let mut events = manager.subscribe();

        manager.connect("user-1").await.unwrap();
        let scheduled = loop {
            if let ConnectionEvent::ReconnectScheduled { attempt, delay } =
                events.recv().await.unwrap()
            {
                break (attempt, delay);
            }
        };
        assert_eq!(scheduled, (1, Duration::from_millis(1000)));

        wait_for(&manager, ConnectionStatus::Connected).await;
        assert_eq!(sink.types(), vec!["email"]);
        assert_eq!(manager.state().total_connections, 2);
        assert_eq!(transport.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_stream_is_treated_as_failure() {
        let transport = ScriptedTransport::new(vec![Step::Open(vec![])]);
        let config = EngineConfig {
            stale_timeout_ms: 1500,
            ..config()
        };
        let (manager, _) = manager(config, transport);

        manager.connect("user-1").await.unwrap();
        wait_for(&manager, ConnectionStatus::Connected).await;
        wait_for(&manager, ConnectionStatus::Error).await;

        let state = manager.state();
        assert_eq!(state.connection_attempts, 1);
        assert!(
            state
                .error_message
                .as_deref()
                .is_some_and(|m| m.contains("no data received"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reconnect_after_exhaustion() {
        let transport = ScriptedTransport::new(vec![]);
        let config = EngineConfig {
            max_reconnect_attempts: 2,
            ..config()
        };
        let (manager, _) = manager(config, transport.clone());
        let mut events = manager.subscribe();

        manager.connect("user-1").await.unwrap();
        loop {
            if let ConnectionEvent::ReconnectExhausted { .. } = events.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(manager.status(), ConnectionStatus::Error);

        transport.push(Step::Open(vec![]));
        manager.reconnect().await.unwrap();
        wait_for(&manager, ConnectionStatus::Connected).await;
        assert_eq!(manager.state().connection_attempts, 0);
        assert_eq!(transport.opens(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reconnect_gets_fresh_budget() {
        let transport = ScriptedTransport::new(vec![]);
        let config = EngineConfig {
            max_reconnect_attempts: 2,
            ..config()
        };
        let (manager, _) = manager(config, transport.clone());
        let mut events = manager.subscribe();

        manager.connect("user-1").await.unwrap();
        loop {
            if let ConnectionEvent::ReconnectExhausted { .. } = events.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(manager.state().connection_attempts, 2);

        transport.push(Step::Fail(Error::transport("still down")));
        transport.push(Step::Open(vec![]));
        manager.reconnect().await.unwrap();

        let scheduled = loop {
            if let ConnectionEvent::ReconnectScheduled { attempt, delay } =
                events.recv().await.unwrap()
            {
                break (attempt, delay);
            }
        };
        // Backoff restarts while the reported count keeps growing until an open.
        assert_eq!(scheduled, (1, Duration::from_millis(1000)));
        assert_eq!(manager.state().connection_attempts, 3);

        wait_for(&manager, ConnectionStatus::Connected).await;
        assert_eq!(manager.state().connection_attempts, 0);
        assert_eq!(transport.opens(), 4);
    }

    #[test]
    fn test_stale_generation_cannot_touch_state() {
        let (event_tx, mut events) = broadcast::channel(8);
        let shared = Shared {
            tracker: Mutex::new(ConnectionTracker::new()),
            generation: AtomicU64::new(0),
            event_tx,
        };
        let old = shared.advance();
        let current = shared.advance();
        assert!(!shared.is_current(old));
        assert!(shared.is_current(current));

        assert!(shared.apply(old, |t| t.begin_connect()).is_none());
        shared.record_latency(old, 99);
        let state = shared.tracker.lock().snapshot(Utc::now());
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.latency_ms, None);
        assert!(events.try_recv().is_err());

        assert!(shared.apply(current, |t| t.begin_connect()).is_some());
        shared.record_latency(current, 12);
        match events.try_recv() {
            Ok(ConnectionEvent::StatusChanged(state)) => {
                assert_eq!(state.status, ConnectionStatus::Connecting)
            }
            other => panic!("expected a status change, got {other:?}"),
        }
        assert_eq!(shared.tracker.lock().snapshot(Utc::now()).latency_ms, Some(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let transport =
            ScriptedTransport::new(vec![Step::Fail(Error::permission("subscriber revoked"))]);
        let (manager, _) = manager(config(), transport.clone());
        let mut events = manager.subscribe();

        manager.connect("user-1").await.unwrap();
        loop {
            if let ConnectionEvent::ConnectionRejected { reason } = events.recv().await.unwrap() {
                assert!(reason.contains("subscriber revoked"));
                break;
            }
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.opens(), 1);
        assert_eq!(manager.status(), ConnectionStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_records_latency() {
        let sent_at = (Utc::now() - chrono::Duration::milliseconds(250)).to_rfc3339();
        let transport = ScriptedTransport::new(vec![Step::Open(vec![message(&format!(
            r#"{{"type":"heartbeat","timestamp":"{sent_at}"}}"#
        ))])]);
        let (manager, sink) = manager(config(), transport);

        manager.connect("user-1").await.unwrap();
        wait_for(&manager, ConnectionStatus::Connected).await;
        settle().await;

        assert!(sink.types().is_empty());
        assert!(manager.state().latency_ms.is_some_and(|l| l >= 250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_without_subscriber_is_rejected() {
        let transport = ScriptedTransport::new(vec![]);
        let (manager, _) = manager(config(), transport);
        assert!(matches!(
            manager.reconnect().await,
            Err(Error::Configuration(_))
        ));
    }
}
