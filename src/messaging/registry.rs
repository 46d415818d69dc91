//! Binder registry
//!
//! Holds the broker backends known to the process and designates exactly one
//! of them as active. Ambiguity (no active binder, or several) is a
//! configuration error; the registry never picks one on its own.

use crate::messaging::config::{BinderConfig, BinderKind, StreamConfig};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::kafka::KafkaBinder;
use crate::messaging::memory::InMemoryBinder;
use crate::messaging::nats::NatsBinder;
use crate::messaging::traits::Binder;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

struct Entry {
    binder: Arc<dyn Binder>,
    active: bool,
}

/// Registered binders keyed by binder id
#[derive(Default)]
pub struct BinderRegistry {
    entries: BTreeMap<String, Entry>,
}

impl BinderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configuration.
    ///
    /// The active-binder rule is checked before any backend is built, so a bad
    /// profile fails without opening broker connections. Only the active
    /// binder is realized.
    pub async fn from_config(config: &StreamConfig) -> MessagingResult<Self> {
        let (id, binder_config) = select_active(config)?;

        for (other, cfg) in config.binders.iter().filter(|(_, cfg)| !cfg.active) {
            info!(binder = %other, kind = %cfg.kind, "Binder configured but inactive");
        }

        let binder = build_binder(binder_config).await?;

        let mut registry = Self::new();
        registry.register(id.clone(), binder)?;
        registry.mark_active(&id)?;

        info!(binder = %id, kind = %binder_config.kind, "Active binder ready");
        Ok(registry)
    }

    /// Register a binder under an id
    pub fn register(&mut self, id: impl Into<String>, binder: Arc<dyn Binder>) -> MessagingResult<()> {
        let id = id.into();
        if self.entries.contains_key(&id) {
            return Err(MessagingError::Configuration(format!(
                "binder '{}' is already registered",
                id
            )));
        }

        self.entries.insert(id, Entry { binder, active: false });
        Ok(())
    }

    /// Mark a registered binder as active
    pub fn mark_active(&mut self, id: &str) -> MessagingResult<()> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| MessagingError::BinderNotFound(id.to_string()))?;
        entry.active = true;
        Ok(())
    }

    /// Resolve a binder by id
    pub fn resolve(&self, id: &str) -> MessagingResult<Arc<dyn Binder>> {
        self.entries
            .get(id)
            .map(|entry| entry.binder.clone())
            .ok_or_else(|| MessagingError::BinderNotFound(id.to_string()))
    }

    /// The single active binder and its id
    pub fn active_binder(&self) -> MessagingResult<(String, Arc<dyn Binder>)> {
        let mut active = self.entries.iter().filter(|(_, entry)| entry.active);

        match (active.next(), active.next()) {
            (Some((id, entry)), None) => Ok((id.clone(), entry.binder.clone())),
            (None, _) => Err(MessagingError::Configuration(
                "no binder is marked active".to_string(),
            )),
            (Some(_), Some(_)) => {
                let ids: Vec<&str> = self
                    .entries
                    .iter()
                    .filter(|(_, entry)| entry.active)
                    .map(|(id, _)| id.as_str())
                    .collect();
                Err(MessagingError::Configuration(format!(
                    "multiple binders marked active: {}",
                    ids.join(", ")
                )))
            }
        }
    }

    /// Registered binder ids
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Pick the single binder marked active in configuration
fn select_active(config: &StreamConfig) -> MessagingResult<(String, &BinderConfig)> {
    let active: Vec<(&String, &BinderConfig)> =
        config.binders.iter().filter(|(_, cfg)| cfg.active).collect();

    match active.as_slice() {
        [(id, cfg)] => Ok(((*id).clone(), *cfg)),
        [] => Err(MessagingError::Configuration(
            "no binder is marked active".to_string(),
        )),
        many => {
            let ids: Vec<&str> = many.iter().map(|(id, _)| id.as_str()).collect();
            Err(MessagingError::Configuration(format!(
                "multiple binders marked active: {}",
                ids.join(", ")
            )))
        }
    }
}

async fn build_binder(config: &BinderConfig) -> MessagingResult<Arc<dyn Binder>> {
    let binder: Arc<dyn Binder> = match config.kind {
        BinderKind::Kafka => Arc::new(KafkaBinder::new(config.kafka.clone())?),
        BinderKind::Nats => Arc::new(NatsBinder::connect(config.nats.clone()).await?),
        BinderKind::InMemory => Arc::new(InMemoryBinder::new()),
    };
    Ok(binder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Arc<dyn Binder> {
        Arc::new(InMemoryBinder::new())
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = BinderRegistry::new();
        registry.register("memory", memory()).unwrap();

        assert!(registry.resolve("memory").is_ok());
        assert!(matches!(
            registry.resolve("kafka"),
            Err(MessagingError::BinderNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = BinderRegistry::new();
        registry.register("memory", memory()).unwrap();
        assert!(matches!(
            registry.register("memory", memory()),
            Err(MessagingError::Configuration(_))
        ));
    }

    #[test]
    fn test_no_active_binder() {
        let mut registry = BinderRegistry::new();
        registry.register("memory", memory()).unwrap();
        assert!(matches!(
            registry.active_binder(),
            Err(MessagingError::Configuration(_))
        ));
    }

    #[test]
    fn test_multiple_active_binders() {
        let mut registry = BinderRegistry::new();
        registry.register("a", memory()).unwrap();
        registry.register("b", memory()).unwrap();
        registry.mark_active("a").unwrap();
        registry.mark_active("b").unwrap();

        match registry.active_binder() {
            Err(MessagingError::Configuration(msg)) => assert!(msg.contains("a, b")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("ambiguous activation must fail"),
        }
    }

    #[test]
    fn test_mark_unknown_binder() {
        let mut registry = BinderRegistry::new();
        assert!(matches!(
            registry.mark_active("kafka"),
            Err(MessagingError::BinderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_from_config_in_memory() {
        let registry = BinderRegistry::from_config(&StreamConfig::default()).await.unwrap();
        let (id, binder) = registry.active_binder().unwrap();
        assert_eq!(id, "memory");
        assert_eq!(binder.kind(), BinderKind::InMemory);
    }

    #[tokio::test]
    async fn test_from_config_requires_exactly_one_active() {
        let mut config = StreamConfig::default();
        config
            .binders
            .insert("kafka".to_string(), BinderConfig::new(BinderKind::Kafka).active());
        assert!(matches!(
            BinderRegistry::from_config(&config).await,
            Err(MessagingError::Configuration(_))
        ));

        config.binders.clear();
        config
            .binders
            .insert("kafka".to_string(), BinderConfig::new(BinderKind::Kafka));
        assert!(matches!(
            BinderRegistry::from_config(&config).await,
            Err(MessagingError::Configuration(_))
        ));
    }
}
