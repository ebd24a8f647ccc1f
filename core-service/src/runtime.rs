//! Wiring of the sync services into one runtime.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bridge_traits::{ChangeFeed, Clock, RowSource, SheetSink, SystemClock};
use core_runtime::config::{
    IntervalKind, ListenerStrategy, ServiceConfig, SyncSettings, DEFAULT_NOTIFY_CHANNEL,
};
use core_runtime::events::{CoreEvent, EventBus, EventSeverity, EventStream, RecvError};
use core_sync::listener::default_targets;
use core_sync::{
    sync_callback, BackgroundSyncService, CallbackId, ChangeListener, ListenerStatus,
    ManualSyncService, PollChangeListener, PushChangeListener, RequestPriorityTracker,
    ScheduledLoop, SessionCleanupService, TaskSupervisor, TriggeredSyncService,
};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{CoreError, Result};

const EVENT_BUS_CAPACITY: usize = 256;

/// External collaborators the runtime is built from.
pub struct SyncDependencies {
    pub row_source: Arc<dyn RowSource>,
    pub sink: Arc<dyn SheetSink>,
    /// Required for the push listener strategy
    pub change_feed: Option<Arc<dyn ChangeFeed>>,
    pub clock: Arc<dyn Clock>,
}

impl SyncDependencies {
    pub fn new(row_source: Arc<dyn RowSource>, sink: Arc<dyn SheetSink>) -> Self {
        Self {
            row_source,
            sink,
            change_feed: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_change_feed(mut self, feed: Arc<dyn ChangeFeed>) -> Self {
        self.change_feed = Some(feed);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Owns every sync service and the tasks they spawn.
///
/// Shared with the admin surface as `Arc<SyncRuntime>`.
pub struct SyncRuntime {
    settings: Arc<SyncSettings>,
    events: EventBus,
    supervisor: TaskSupervisor,
    strategy: ListenerStrategy,
    manual: Arc<ManualSyncService>,
    triggered: Arc<TriggeredSyncService>,
    background: Arc<BackgroundSyncService>,
    cleanup: Arc<SessionCleanupService>,
    listener: Option<Arc<dyn ChangeListener>>,
    priority: Arc<RequestPriorityTracker>,
    listener_callback: Mutex<Option<CallbackId>>,
    event_log: tokio::sync::Mutex<Option<ScheduledLoop>>,
}

impl SyncRuntime {
    /// Build the runtime; the push strategy listens on the default channel.
    pub fn new(
        deps: SyncDependencies,
        settings: Arc<SyncSettings>,
        strategy: ListenerStrategy,
    ) -> Result<Self> {
        Self::build(deps, settings, strategy, DEFAULT_NOTIFY_CHANNEL)
    }

    pub fn from_service_config(deps: SyncDependencies, config: &ServiceConfig) -> Result<Self> {
        Self::build(
            deps,
            Arc::new(SyncSettings::new(config.sync.clone())),
            config.listener_strategy,
            &config.notify_channel,
        )
    }

    fn build(
        deps: SyncDependencies,
        settings: Arc<SyncSettings>,
        strategy: ListenerStrategy,
        notify_channel: &str,
    ) -> Result<Self> {
        let snapshot = settings.snapshot();
        let events = EventBus::new(EVENT_BUS_CAPACITY);
        let supervisor = TaskSupervisor::new();

        let manual = Arc::new(
            ManualSyncService::new(
                Arc::clone(&deps.row_source),
                Arc::clone(&deps.sink),
                Arc::clone(&settings),
                Arc::clone(&deps.clock),
            )
            .with_event_bus(events.clone()),
        );

        let triggered = Arc::new(TriggeredSyncService::new(
            manual.clone(),
            Arc::clone(&deps.clock),
            supervisor.clone(),
            snapshot.triggered_sync_cooldown,
            snapshot.toggles.triggered_sync,
        ));

        let background = Arc::new(BackgroundSyncService::new(
            manual.clone(),
            Arc::clone(&settings),
            Arc::clone(&deps.clock),
            supervisor.clone(),
        ));

        let cleanup = Arc::new(
            SessionCleanupService::new(
                Arc::clone(&deps.row_source),
                Arc::clone(&settings),
                Arc::clone(&deps.clock),
                supervisor.clone(),
            )
            .with_event_bus(events.clone()),
        );

        let listener: Option<Arc<dyn ChangeListener>> = match strategy {
            ListenerStrategy::Push => {
                let feed = deps.change_feed.clone().ok_or_else(|| {
                    CoreError::InitializationFailed(
                        "push listener strategy needs a change feed".to_string(),
                    )
                })?;
                let push = PushChangeListener::new(
                    feed,
                    notify_channel,
                    Arc::clone(&settings),
                    Arc::clone(&deps.clock),
                    supervisor.clone(),
                )
                .with_event_bus(events.clone());
                Some(Arc::new(push) as Arc<dyn ChangeListener>)
            }
            ListenerStrategy::Poll => {
                let poll = PollChangeListener::new(
                    Arc::clone(&deps.row_source),
                    default_targets(),
                    Arc::clone(&settings),
                    Arc::clone(&deps.clock),
                    supervisor.clone(),
                )
                .with_event_bus(events.clone());
                Some(Arc::new(poll) as Arc<dyn ChangeListener>)
            }
            ListenerStrategy::Disabled => None,
        };

        let priority = Arc::new(RequestPriorityTracker::new(background.clone()));

        info!(
            strategy = strategy.as_str(),
            triggered = snapshot.toggles.triggered_sync,
            background = snapshot.toggles.background_sync,
            listener = snapshot.toggles.change_listener,
            cleanup = snapshot.toggles.session_cleanup,
            "Sync runtime assembled"
        );

        Ok(Self {
            settings,
            events,
            supervisor,
            strategy,
            manual,
            triggered,
            background,
            cleanup,
            listener,
            priority,
            listener_callback: Mutex::new(None),
            event_log: tokio::sync::Mutex::new(None),
        })
    }

    /// Start the enabled long-running services.
    ///
    /// Safe to call again after [`SyncRuntime::stop`]; services already running
    /// are left alone.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        let toggles = self.settings.snapshot().toggles;

        {
            let mut event_log = self.event_log.lock().await;
            if event_log.is_none() {
                *event_log = Some(self.spawn_event_log());
            }
        }

        if toggles.background_sync {
            self.background.start().await;
        }
        if toggles.session_cleanup {
            self.cleanup.start().await;
        }
        if toggles.change_listener {
            if let Some(listener) = &self.listener {
                self.register_listener_callback(listener.as_ref());
                listener.start().await;
            }
        }

        info!("Sync runtime started");
    }

    fn register_listener_callback(&self, listener: &dyn ChangeListener) {
        let mut registered = self
            .listener_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if registered.is_some() {
            return;
        }

        let triggered = Arc::clone(&self.triggered);
        let id = listener.add_callback(sync_callback(move |notification| {
            let reason = format!("{} on {}", notification.action, notification.action_type);
            triggered.trigger_sync(&reason);
            Ok(())
        }));
        *registered = Some(id);
    }

    /// Forward service events at info level and above to the log.
    fn spawn_event_log(&self) -> ScheduledLoop {
        let receiver = self.events.subscribe();
        self.supervisor.spawn_loop("event-log", move |cancel| async move {
            let mut stream =
                EventStream::new(receiver).filter(|event| event.severity() >= EventSeverity::Info);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = stream.recv() => match received {
                        Ok(event) => log_event(&event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Event log fell behind");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Event log stopped");
        })
    }

    /// Stop the schedulers and the listener. In-flight sync bodies keep running.
    pub async fn stop(&self) {
        if let Some(listener) = &self.listener {
            listener.stop().await;
        }
        self.background.stop().await;
        self.cleanup.stop().await;
        if let Some(event_log) = self.event_log.lock().await.take() {
            event_log.stop().await;
        }
    }

    /// Stop everything, refuse new export passes and drain spawned tasks.
    ///
    /// Returns false when tasks were still running after `grace`.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.stop().await;
        self.manual.close();

        let drained = self.supervisor.shutdown(grace).await;
        if drained {
            info!("Sync runtime shut down");
        } else {
            warn!(
                grace_secs = grace.as_secs(),
                "Sync tasks still running after shutdown grace period"
            );
        }
        drained
    }

    /// Validate and apply one interval. Cooldown changes reach the gate immediately.
    pub fn set_interval(&self, kind: IntervalKind, seconds: u64) -> core_runtime::Result<Duration> {
        let value = self.settings.set_interval(kind, seconds)?;
        if kind == IntervalKind::TriggeredSyncCooldown {
            self.triggered.set_cooldown(value);
        }
        info!(interval = kind.as_str(), seconds, "Interval updated");
        Ok(value)
    }

    pub fn settings(&self) -> &Arc<SyncSettings> {
        &self.settings
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.supervisor
    }

    pub fn listener_strategy(&self) -> ListenerStrategy {
        self.strategy
    }

    pub fn manual(&self) -> &Arc<ManualSyncService> {
        &self.manual
    }

    pub fn triggered(&self) -> &Arc<TriggeredSyncService> {
        &self.triggered
    }

    pub fn background(&self) -> &Arc<BackgroundSyncService> {
        &self.background
    }

    pub fn cleanup(&self) -> &Arc<SessionCleanupService> {
        &self.cleanup
    }

    pub fn listener(&self) -> Option<&Arc<dyn ChangeListener>> {
        self.listener.as_ref()
    }

    pub fn listener_status(&self) -> Option<ListenerStatus> {
        self.listener.as_ref().map(|listener| listener.status())
    }

    pub fn priority(&self) -> &Arc<RequestPriorityTracker> {
        &self.priority
    }
}

fn log_event(event: &CoreEvent) {
    match event.severity() {
        EventSeverity::Error => error!(event = ?event, "{}", event.description()),
        EventSeverity::Warning => warn!(event = ?event, "{}", event.description()),
        _ => info!(event = ?event, "{}", event.description()),
    }
}
