//! # Real-time Client
//!
//! Composition root. Wires one connection manager, its router, the
//! subscription registry and the notification store together, and hands
//! out progress syncs. Construct one per process and share it.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::configs::RealtimeConfig;
use crate::core::{
    ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState, Connector, MessageCategory,
    MessageRouter, RoutedEvent, SubscriptionRegistry, TransportError, WsConnector,
};
use crate::notifications::{NotificationCache, NotificationStore};
use crate::sync::{
    CompletionLedger, HttpProgressWriter, ProgressError, ProgressRecord, ProgressSync, ProgressTarget, ProgressWriter,
};

/// The assembled transport.
pub struct RealtimeClient<C: Connector = WsConnector> {
    config: RealtimeConfig,
    connection: ConnectionManager<C>,
    registry: Arc<SubscriptionRegistry>,
    notifications: Arc<NotificationStore>,
    completions: CompletionLedger,
    pump: JoinHandle<()>,
}

impl RealtimeClient<WsConnector> {
    /// Client over real WebSockets. Must be called inside a tokio runtime.
    pub fn new(config: RealtimeConfig, cache: Arc<dyn NotificationCache>) -> Self {
        Self::with_connector(config, WsConnector, cache)
    }
}

impl<C: Connector> RealtimeClient<C> {
    /// Client over an arbitrary connector. Hydrates the notification store
    /// from `cache` and starts feeding it from the router.
    pub fn with_connector(config: RealtimeConfig, connector: C, cache: Arc<dyn NotificationCache>) -> Self {
        let router = Arc::new(MessageRouter::new());
        let connection = ConnectionManager::new(connector, config.connection_settings(), Arc::clone(&router));

        let registry = Arc::new(SubscriptionRegistry::new(connection.handle()));
        connection.add_listener(registry.clone());

        let notifications = Arc::new(NotificationStore::new(
            cache,
            config.notification_capacity,
            config.toast_duration(),
        ));
        notifications.hydrate();

        let mut inbound = router.subscribe(MessageCategory::Notification);
        let store = Arc::clone(&notifications);
        let pump = tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                if let RoutedEvent::Notification(payload) = event.as_ref() {
                    store.add(payload.clone());
                }
            }
        });

        Self {
            config,
            connection,
            registry,
            notifications,
            completions: CompletionLedger::new(),
            pump,
        }
    }

    /// See [`ConnectionManager::connect`].
    pub fn connect(&self, token: &str) -> Result<(), TransportError> {
        self.connection.connect(token)
    }

    /// See [`ConnectionManager::disconnect`].
    pub async fn disconnect(&self) {
        self.connection.disconnect().await
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// State change stream.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.events()
    }

    /// Raw frame sending handle.
    pub fn handle(&self) -> ConnectionHandle {
        self.connection.handle()
    }

    /// Router for custom listeners.
    pub fn router(&self) -> Arc<MessageRouter> {
        self.connection.router()
    }

    /// Adds a course subscription.
    pub fn subscribe_course(&self, course_id: &str) -> bool {
        self.registry.subscribe(course_id)
    }

    /// Removes a course subscription.
    pub fn unsubscribe_course(&self, course_id: &str) -> bool {
        self.registry.unsubscribe(course_id)
    }

    /// Subscribed courses.
    pub fn subscriptions(&self) -> Vec<String> {
        self.registry.topics()
    }

    /// Notification list.
    pub fn notifications(&self) -> &Arc<NotificationStore> {
        &self.notifications
    }

    /// Configuration in effect.
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Progress sync posting to the configured API with `token`.
    pub fn progress_sync(&self, target: ProgressTarget, token: &str) -> Result<ProgressSync, ProgressError> {
        let writer = HttpProgressWriter::connect(&self.config.api_base_url, token, self.config.progress_http_retries)?;
        Ok(self.progress_sync_with(target, Arc::new(writer)))
    }

    /// Progress sync over a caller-supplied writer.
    ///
    /// Every sync handed out by this client shares one completion ledger, so
    /// content completed once keeps writing `completed: true`.
    pub fn progress_sync_with(&self, target: ProgressTarget, writer: Arc<dyn ProgressWriter>) -> ProgressSync {
        ProgressSync::new(target, writer, self.config.progress_debounce()).with_ledger(self.completions.clone())
    }

    /// Like [`RealtimeClient::progress_sync_with`], seeded with the stored
    /// record for the target.
    pub fn progress_sync_from(
        &self,
        target: ProgressTarget,
        writer: Arc<dyn ProgressWriter>,
        initial: ProgressRecord,
    ) -> ProgressSync {
        ProgressSync::with_initial(target, writer, self.config.progress_debounce(), initial)
            .with_ledger(self.completions.clone())
    }

    /// Content completed through this client.
    pub fn completions(&self) -> &CompletionLedger {
        &self.completions
    }
}

impl<C: Connector> Drop for RealtimeClient<C> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
