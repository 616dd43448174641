//! Notification service implementation.
//!
//! The NotificationService is the composition root. It is responsible for:
//! - Owning the stream connection for the current subscriber
//! - Routing inbound events through the dispatcher
//! - Delivering notifications to the queue, history log and side channels
//! - Exposing the public surface used by presentation code

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::Result;
use crate::channels::{
    AudioBackend, ChannelSet, DeliveryChannel, NotificationPlatform, PermissionState, SilentAudio,
    SoundChannel, SystemChannel, ToastSurface, UnsupportedPlatform,
};
use crate::config::EngineConfig;
use crate::dispatcher::{Dispatch, EventDispatcher, RoutingTable};
use crate::health::ConnectionState;
use crate::history::HistoryLog;
use crate::notification::{NotificationId, NotificationRequest};
use crate::queue::{NotificationQueue, QueueStats};
use crate::settings::{InMemorySettings, SettingsStore};
use crate::store::{KeyValueStore, MemoryStore};
use crate::stream::{ConnectionEvent, EventSink, EventTransport, StreamManager, WireEvent};

/// External collaborators the service is built from.
pub struct ServiceDeps {
    pub transport: Arc<dyn EventTransport>,
    pub history_store: Arc<dyn KeyValueStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub platform: Arc<dyn NotificationPlatform>,
    pub audio: Arc<dyn AudioBackend>,
}

impl ServiceDeps {
    /// Volatile history, default settings, no system notifications and no
    /// audio.
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self {
            transport,
            history_store: Arc::new(MemoryStore::new()),
            settings: Arc::new(InMemorySettings::default()),
            platform: Arc::new(UnsupportedPlatform),
            audio: Arc::new(SilentAudio),
        }
    }

    pub fn with_history_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.history_store = store;
        self
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_platform(mut self, platform: Arc<dyn NotificationPlatform>) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_audio(mut self, audio: Arc<dyn AudioBackend>) -> Self {
        self.audio = audio;
        self
    }
}

/// Everything between a routed event and the user.
struct Pipeline {
    config: EngineConfig,
    queue: NotificationQueue,
    history: HistoryLog,
    system: Arc<SystemChannel>,
    channels: Vec<Arc<dyn DeliveryChannel>>,
    settings: Arc<dyn SettingsStore>,
    dispatcher: EventDispatcher,
    next_id: AtomicU64,
}

impl Pipeline {
    /// Queue first, then history, then side channels. Failures past the
    /// queue are logged and never stop the remaining channels.
    async fn accept(&self, request: NotificationRequest, channels: ChannelSet) -> NotificationId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let default_duration = self.config.durations.resolve(&request.kind, request.priority);
        let notification = request.into_notification(id, default_duration, Utc::now());

        let evicted = self.queue.enqueue(notification.clone());
        if !evicted.is_empty() {
            debug!(id, ?evicted, "Evicted notifications to make room");
        }

        if let Err(e) = self.history.append(notification.clone()).await {
            warn!(id, "Failed to record notification history: {}", e);
        }

        for channel in &self.channels {
            if !channels.allows(channel.channel_type()) || !channel.is_enabled() {
                continue;
            }
            if let Err(e) = channel.send(&notification).await {
                warn!(
                    id,
                    channel = channel.channel_type(),
                    "Failed to deliver notification: {}", e
                );
            }
        }

        debug!(
            id,
            kind = %notification.kind,
            priority = %notification.priority,
            "Notification delivered"
        );
        id
    }

    async fn route(&self, event: &WireEvent) -> Option<NotificationId> {
        match self.dispatcher.dispatch(event).await {
            Dispatch::Deliver(routed) => {
                let routed = *routed;
                Some(self.accept(routed.request, routed.channels).await)
            }
            Dispatch::Suppressed(_) | Dispatch::Unrouted => None,
        }
    }
}

#[async_trait]
impl EventSink for Pipeline {
    async fn deliver(&self, event: WireEvent) {
        self.route(&event).await;
    }
}

/// The notification engine as seen by presentation code.
pub struct NotificationService {
    pipeline: Arc<Pipeline>,
    toasts: ToastSurface,
    stream: StreamManager,
}

impl NotificationService {
    /// Validate `config`, load the history log and wire the components.
    pub async fn new(config: EngineConfig, deps: ServiceDeps) -> Result<Self> {
        config.validate()?;

        let queue = NotificationQueue::new(config.max_visible);
        let history = HistoryLog::load(deps.history_store, config.max_history).await?;
        // Keep ids unique across restarts that share a history store.
        let first_id = history
            .all()
            .await
            .iter()
            .map(|record| record.id())
            .max()
            .map_or(1, |max| max + 1);

        let system = Arc::new(SystemChannel::new(
            deps.platform,
            config.enable_system_notifications,
        ));
        let sound = Arc::new(SoundChannel::new(
            deps.audio,
            config.sounds.clone(),
            config.enable_sounds,
        ));
        // Sound goes first; the system channel may wait on a permission prompt.
        let channels: Vec<Arc<dyn DeliveryChannel>> = vec![sound, system.clone()];

        let dispatcher = EventDispatcher::new(
            RoutingTable::with_overrides(&config.routes),
            config.durations.clone(),
            deps.settings.clone(),
        );

        let pipeline = Arc::new(Pipeline {
            config: config.clone(),
            queue: queue.clone(),
            history,
            system,
            channels,
            settings: deps.settings,
            dispatcher,
            next_id: AtomicU64::new(first_id),
        });

        let stream = StreamManager::new(config, deps.transport, pipeline.clone());

        info!(
            max_visible = pipeline.config.max_visible,
            max_history = pipeline.config.max_history,
            "Notification service initialized"
        );

        Ok(Self {
            pipeline,
            toasts: ToastSurface::new(queue),
            stream,
        })
    }

    /// Show a caller-supplied notification on every enabled channel.
    ///
    /// Explicit requests bypass routing and suppression windows; the user's
    /// sound and system toggles still apply.
    pub async fn show_notification(&self, request: NotificationRequest) -> NotificationId {
        let settings = self.pipeline.settings.get().await;
        let channels = ChannelSet {
            system: settings.system_enabled,
            sound: settings.sounds_enabled,
        };
        self.pipeline.accept(request, channels).await
    }

    /// Route an event as if it had arrived on the stream.
    pub async fn handle_event(&self, event: WireEvent) -> Option<NotificationId> {
        self.pipeline.route(&event).await
    }

    /// Remove a visible notification. Unknown ids are a no-op.
    pub fn dismiss(&self, id: NotificationId) -> bool {
        self.pipeline.queue.dismiss(id)
    }

    pub fn clear_all(&self) -> usize {
        self.pipeline.queue.clear()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.stream.state()
    }

    pub async fn connect(&self, subscriber_id: &str) -> Result<()> {
        self.stream.connect(subscriber_id).await
    }

    pub async fn reconnect(&self) -> Result<()> {
        self.stream.reconnect().await
    }

    pub async fn disconnect(&self) {
        self.stream.disconnect().await
    }

    pub fn record_latency(&self, latency_ms: u64) {
        self.stream.record_latency(latency_ms);
    }

    /// Ask for system notification permission. Returns the grant.
    pub async fn request_system_permission(&self) -> bool {
        self.pipeline.system.request_permission().await
    }

    pub fn system_permission(&self) -> PermissionState {
        self.pipeline.system.permission()
    }

    pub fn toasts(&self) -> &ToastSurface {
        &self.toasts
    }

    pub fn history(&self) -> &HistoryLog {
        &self.pipeline.history
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.pipeline.settings
    }

    pub fn config(&self) -> &EngineConfig {
        &self.pipeline.config
    }

    pub fn routes(&self) -> &RoutingTable {
        self.pipeline.dispatcher.routes()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.pipeline.queue.stats()
    }

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.stream.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::channels::SoundHandle;
    use crate::health::ConnectionStatus;
    use crate::history::HistoryFilter;
    use crate::settings::DeliverySettings;
    use crate::stream::{EventStream, TransportFrame};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Yields the given messages once, then stays open.
    struct FixedTransport {
        messages: Mutex<Option<Vec<String>>>,
    }

    impl FixedTransport {
        fn new(messages: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                messages: Mutex::new(Some(messages.iter().map(|m| m.to_string()).collect())),
            })
        }
    }

    #[async_trait]
    impl EventTransport for FixedTransport {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn open(&self, _subscriber_id: &str) -> Result<Box<dyn EventStream>> {
            let messages = self.messages.lock().take().unwrap_or_default();
            Ok(Box::new(FixedStream {
                frames: messages.into_iter().map(TransportFrame::Message).collect(),
            }))
        }
    }

    struct FixedStream {
        frames: VecDeque<TransportFrame>,
    }

    #[async_trait]
    impl EventStream for FixedStream {
        async fn next_frame(&mut self) -> Option<Result<TransportFrame>> {
            match self.frames.pop_front() {
                Some(frame) => Some(Ok(frame)),
                None => futures::future::pending().await,
            }
        }
    }

    struct DenyingPlatform {
        shown: Mutex<u32>,
    }

    #[async_trait]
    impl NotificationPlatform for DenyingPlatform {
        fn is_supported(&self) -> bool {
            true
        }

        async fn request_permission(&self) -> Result<bool> {
            Ok(false)
        }

        async fn show(&self, _tag: &str, _n: &crate::notification::Notification) -> Result<()> {
            *self.shown.lock() += 1;
            Ok(())
        }

        async fn close(&self, _tag: &str) -> Result<()> {
            Ok(())
        }
    }

    /// Grants permission but fails every show.
    struct BrokenPlatform;

    #[async_trait]
    impl NotificationPlatform for BrokenPlatform {
        fn is_supported(&self) -> bool {
            true
        }

        async fn request_permission(&self) -> Result<bool> {
            Ok(true)
        }

        async fn show(&self, _tag: &str, _n: &crate::notification::Notification) -> Result<()> {
            Err(Error::Io(std::io::Error::other("platform crashed")))
        }

        async fn close(&self, _tag: &str) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingSound {
        plays: Mutex<u32>,
    }

    impl SoundHandle for CountingSound {
        fn rewind(&self) -> Result<()> {
            Ok(())
        }

        fn play(&self) -> Result<()> {
            *self.plays.lock() += 1;
            Ok(())
        }
    }

    struct OneSoundBackend(Arc<CountingSound>);

    #[async_trait]
    impl AudioBackend for OneSoundBackend {
        async fn load(&self, _resource: &str) -> Result<Option<Arc<dyn SoundHandle>>> {
            Ok(Some(self.0.clone()))
        }
    }

    async fn service(config: EngineConfig, deps: ServiceDeps) -> NotificationService {
        NotificationService::new(config, deps).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_oldest_toast_evicted() {
        let config = EngineConfig {
            max_visible: 3,
            ..Default::default()
        };
        let service = service(config, ServiceDeps::new(FixedTransport::new(&[]))).await;

        let mut ids = Vec::new();
        for title in ["A", "B", "C", "D"] {
            ids.push(
                service
                    .show_notification(NotificationRequest::new(title, ""))
                    .await,
            );
        }

        let titles: Vec<_> = service
            .toasts()
            .visible()
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert_eq!(titles, vec!["B", "C", "D"]);
        assert_eq!(service.queue_stats().evicted, 1);
        // History keeps everything regardless of the queue.
        assert_eq!(service.history().len().await, 4);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_do_not_disturb_blocks_non_critical_events() {
        let mut settings = DeliverySettings::default();
        settings.do_not_disturb.enabled = true;
        let deps = ServiceDeps::new(FixedTransport::new(&[]))
            .with_settings(Arc::new(InMemorySettings::new(settings)));
        let service = service(EngineConfig::default(), deps).await;

        let normal = WireEvent::new("email").with_field("title", "Lunch?");
        assert_eq!(service.handle_event(normal).await, None);
        assert!(service.toasts().is_empty());
        assert!(service.history().is_empty().await);

        let critical = WireEvent::new("email")
            .with_field("title", "Server down")
            .with_field("critical", true);
        let id = service.handle_event(critical).await.unwrap();
        assert_eq!(service.toasts().visible()[0].id, id);
        assert_eq!(service.history().len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_still_delivers_in_app() {
        let platform = Arc::new(DenyingPlatform {
            shown: Mutex::new(0),
        });
        let deps = ServiceDeps::new(FixedTransport::new(&[])).with_platform(platform.clone());
        let service = service(EngineConfig::default(), deps).await;

        let id = service
            .show_notification(NotificationRequest::new("Heads up", "meeting moved"))
            .await;

        assert_eq!(service.toasts().visible()[0].id, id);
        assert_eq!(service.history().get(id).await.map(|r| r.read), Some(false));
        assert_eq!(*platform.shown.lock(), 0);
        assert_eq!(service.system_permission(), PermissionState::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_channel_does_not_block_others() {
        let sound = Arc::new(CountingSound::default());
        let deps = ServiceDeps::new(FixedTransport::new(&[]))
            .with_platform(Arc::new(BrokenPlatform))
            .with_audio(Arc::new(OneSoundBackend(sound.clone())));
        let service = service(EngineConfig::default(), deps).await;

        service
            .show_notification(
                NotificationRequest::new("New mail", "")
                    .with_kind("email")
                    .with_sound(true),
            )
            .await;

        assert_eq!(*sound.plays.lock(), 1);
        assert_eq!(service.toasts().len(), 1);
        assert_eq!(service.history().len().await, 1);
    }

    /// Takes ten seconds to answer the permission prompt.
    struct SlowPromptPlatform {
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl NotificationPlatform for SlowPromptPlatform {
        fn is_supported(&self) -> bool {
            true
        }

        async fn request_permission(&self) -> Result<bool> {
            self.log.lock().push("prompt");
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(true)
        }

        async fn show(&self, _tag: &str, _n: &crate::notification::Notification) -> Result<()> {
            self.log.lock().push("show");
            Ok(())
        }

        async fn close(&self, _tag: &str) -> Result<()> {
            Ok(())
        }
    }

    struct LoggedSound(Arc<Mutex<Vec<&'static str>>>);

    impl SoundHandle for LoggedSound {
        fn rewind(&self) -> Result<()> {
            Ok(())
        }

        fn play(&self) -> Result<()> {
            self.0.lock().push("sound");
            Ok(())
        }
    }

    struct LoggedSoundBackend(Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl AudioBackend for LoggedSoundBackend {
        async fn load(&self, _resource: &str) -> Result<Option<Arc<dyn SoundHandle>>> {
            Ok(Some(Arc::new(LoggedSound(self.0.clone()))))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sound_not_held_up_by_permission_prompt() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let deps = ServiceDeps::new(FixedTransport::new(&[]))
            .with_platform(Arc::new(SlowPromptPlatform { log: log.clone() }))
            .with_audio(Arc::new(LoggedSoundBackend(log.clone())));
        let service = service(EngineConfig::default(), deps).await;

        service
            .show_notification(
                NotificationRequest::new("New mail", "")
                    .with_kind("email")
                    .with_sound(true),
            )
            .await;

        assert_eq!(*log.lock(), vec!["sound", "prompt", "show"]);
        assert_eq!(service.system_permission(), PermissionState::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_system_permission() {
        let deps =
            ServiceDeps::new(FixedTransport::new(&[])).with_platform(Arc::new(BrokenPlatform));
        let service = service(EngineConfig::default(), deps).await;
        assert_eq!(service.system_permission(), PermissionState::Unknown);
        assert!(service.request_system_permission().await);
        assert_eq!(service.system_permission(), PermissionState::Granted);

        let platform = Arc::new(DenyingPlatform {
            shown: Mutex::new(0),
        });
        let deps = ServiceDeps::new(FixedTransport::new(&[])).with_platform(platform);
        let service = self::service(EngineConfig::default(), deps).await;
        assert!(!service.request_system_permission().await);
        assert_eq!(service.system_permission(), PermissionState::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_events_reach_toasts_in_order() {
        let transport = FixedTransport::new(&[
            r#"{"type":"email","title":"first"}"#,
            r#"{"type":"weather","title":"unrouted"}"#,
            r#"{"type":"task_due","title":"second"}"#,
            r#"{"type":"heartbeat"}"#,
            r#"{"type":"file_shared","title":"third"}"#,
        ]);
        let service = service(EngineConfig::default(), ServiceDeps::new(transport)).await;

        service.connect("user-1").await.unwrap();
        for _ in 0..100 {
            if service.toasts().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let titles: Vec<_> = service
            .toasts()
            .visible()
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
        assert_eq!(service.connection_state().status, ConnectionStatus::Connected);

        service.disconnect().await;
        assert_eq!(
            service.connection_state().status,
            ConnectionStatus::Disconnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_duration_applies_to_explicit_requests() {
        let mut config = EngineConfig::default();
        config.durations.by_type.insert("deploy".to_string(), 1200);
        let service = service(config, ServiceDeps::new(FixedTransport::new(&[]))).await;

        let typed = service
            .show_notification(NotificationRequest::new("Deployed", "").with_kind("deploy"))
            .await;
        let untyped = service
            .show_notification(NotificationRequest::new("Hello", ""))
            .await;
        let explicit = service
            .show_notification(
                NotificationRequest::new("Pinned", "")
                    .with_kind("deploy")
                    .with_duration_ms(9000),
            )
            .await;

        let duration = |id| {
            service
                .toasts()
                .visible()
                .into_iter()
                .find(|n| n.id == id)
                .map(|n| n.duration_ms)
        };
        assert_eq!(duration(typed), Some(1200));
        assert_eq!(duration(untyped), Some(5000));
        assert_eq!(duration(explicit), Some(9000));

        tokio::time::sleep(Duration::from_millis(1300)).await;
        let visible: Vec<_> = service.toasts().visible().iter().map(|n| n.id).collect();
        assert_eq!(visible, vec![untyped, explicit]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_and_clear() {
        let service = service(EngineConfig::default(), ServiceDeps::new(FixedTransport::new(&[])))
            .await;
        let first = service.show_notification(NotificationRequest::new("a", "")).await;
        service.show_notification(NotificationRequest::new("b", "")).await;

        assert!(service.dismiss(first));
        assert!(!service.dismiss(first));
        assert!(!service.dismiss(999));
        assert_eq!(service.clear_all(), 1);
        assert!(service.toasts().is_empty());
        assert_eq!(service.history().unread_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ids_continue_after_reload() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let deps = || {
            ServiceDeps::new(FixedTransport::new(&[])).with_history_store(store.clone())
        };

        let first = service(EngineConfig::default(), deps()).await;
        let a = first.show_notification(NotificationRequest::new("a", "")).await;
        let b = first.show_notification(NotificationRequest::new("b", "")).await;
        drop(first);

        let second = service(EngineConfig::default(), deps()).await;
        let c = second.show_notification(NotificationRequest::new("c", "")).await;
        assert!(c > a && c > b);
        let ids: Vec<_> = second
            .history()
            .query(&HistoryFilter::new())
            .await
            .iter()
            .map(|r| r.id())
            .collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = EngineConfig {
            max_visible: 0,
            ..Default::default()
        };
        let result =
            NotificationService::new(config, ServiceDeps::new(FixedTransport::new(&[]))).await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_subscriber_rejected() {
        let service = service(EngineConfig::default(), ServiceDeps::new(FixedTransport::new(&[])))
            .await;
        assert!(matches!(
            service.connect("").await,
            Err(Error::Configuration(_))
        ));
        assert_eq!(
            service.connection_state().status,
            ConnectionStatus::Disconnected
        );
    }
}
