//! Stream context: the binding layer assembled once at startup

use crate::messaging::bindings::BindingTable;
use crate::messaging::config::StreamConfig;
use crate::messaging::dispatcher::{DeliveryOptions, Dispatcher};
use crate::messaging::error::MessagingResult;
use crate::messaging::error_router::ErrorRouter;
use crate::messaging::metrics::init_messaging_metrics;
use crate::messaging::registry::BinderRegistry;
use crate::messaging::traits::Binder;
use std::sync::Arc;
use tracing::info;

/// Registry, bindings, error router and dispatcher for one process.
///
/// Built once from configuration and shared by reference; nothing in it is
/// rebound at runtime.
#[derive(Clone)]
pub struct StreamContext {
    registry: Arc<BinderRegistry>,
    binder_id: String,
    binder: Arc<dyn Binder>,
    bindings: Arc<BindingTable>,
    router: Arc<ErrorRouter>,
    dispatcher: Arc<Dispatcher>,
}

impl StreamContext {
    /// Build the binder registry and everything on top of it from configuration
    pub async fn from_config(config: &StreamConfig) -> MessagingResult<Self> {
        let registry = BinderRegistry::from_config(config).await?;
        Self::with_registry(registry, config)
    }

    /// Assemble the context over an existing registry.
    ///
    /// Must be called inside a Tokio runtime (the error router spawns its worker).
    pub fn with_registry(registry: BinderRegistry, config: &StreamConfig) -> MessagingResult<Self> {
        init_messaging_metrics();

        let (binder_id, binder) = registry.active_binder()?;
        let bindings = Arc::new(BindingTable::from_config(&binder_id, &config.bindings)?);
        let router = Arc::new(ErrorRouter::new(config.error_queue_size));
        let dispatcher = Arc::new(Dispatcher::new(
            bindings.clone(),
            binder.clone(),
            router.clone(),
            DeliveryOptions::from(config),
        ));

        info!(
            binder = %binder_id,
            kind = %binder.kind(),
            bindings = bindings.len(),
            error_queue_size = config.error_queue_size,
            "Stream context initialized"
        );

        Ok(Self {
            registry: Arc::new(registry),
            binder_id,
            binder,
            bindings,
            router,
            dispatcher,
        })
    }

    pub fn registry(&self) -> &BinderRegistry {
        &self.registry
    }

    pub fn binder_id(&self) -> &str {
        &self.binder_id
    }

    pub fn binder(&self) -> &Arc<dyn Binder> {
        &self.binder
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    pub fn router(&self) -> &Arc<ErrorRouter> {
        &self.router
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Whether the active binder reports a live connection
    pub async fn is_connected(&self) -> bool {
        self.binder.is_connected().await
    }

    /// Stop delivery workers and close the active binder
    pub async fn shutdown(&self) -> MessagingResult<()> {
        self.dispatcher.shutdown();
        self.binder.close().await
    }
}
