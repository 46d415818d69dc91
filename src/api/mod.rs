pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::messaging::{Dispatcher, StreamContext};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub context: Option<StreamContext>,
    pub prometheus_enabled: bool,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            context: None,
            prometheus_enabled: true,
        }
    }

    /// Attach the full stream context, used by the health endpoint
    pub fn with_context(mut self, context: StreamContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_prometheus(mut self, enabled: bool) -> Self {
        self.prometheus_enabled = enabled;
        self
    }
}
