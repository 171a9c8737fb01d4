use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ReminderConfig, SignatureConfig};
use crate::error::Result;
use crate::notify::{Notification, Notifier, TracingNotifier};
use crate::render::{Renderer, StorageRenderer};
use crate::store::Store;
use std::sync::Arc;
use tracing::warn;

/// Entry point of every lifecycle operation. Each operation runs in its own
/// transaction on the store; notifications are only sent once it committed.
pub struct Engine {
    pub(crate) store: Store,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) renderer: Arc<dyn Renderer>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) signatures: SignatureConfig,
    pub(crate) reminders: ReminderConfig,
}

impl Engine {
    pub fn new(store: Store) -> Engine {
        Engine {
            store,
            notifier: Arc::new(TracingNotifier),
            renderer: Arc::new(StorageRenderer::new("documents")),
            clock: Arc::new(SystemClock),
            signatures: SignatureConfig::default(),
            reminders: ReminderConfig::default(),
        }
    }

    /// Connect to the configured database and apply the configured policies.
    pub async fn from_config(config: &Config) -> Result<Engine> {
        let store = Store::connect(&config.database.url).await?;
        Ok(Engine::new(store)
            .with_renderer(Arc::new(StorageRenderer::new(config.documents.prefix.clone())))
            .with_signature_config(config.signatures.clone())
            .with_reminder_config(config.reminders.clone()))
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Engine {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Engine {
        self.renderer = renderer;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Engine {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_signature_config(mut self, config: SignatureConfig) -> Engine {
        self.signatures = config;
        self
    }

    #[must_use]
    pub fn with_reminder_config(mut self, config: ReminderConfig) -> Engine {
        self.reminders = config;
        self
    }

    pub fn store(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Hand the notification over for delivery. A failure is logged and
    /// otherwise ignored, as the state change has already been committed.
    pub(crate) fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.send(&notification) {
            warn!(
                recipient = %notification.recipient,
                kind = notification.kind.as_str(),
                error = %e,
                "cannot deliver notification",
            );
        }
    }
}
