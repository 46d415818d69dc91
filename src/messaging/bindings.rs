//! Channel binding table
//!
//! Maps logical channel names to physical destinations for the active binder.
//! The table is built once at startup and only read afterwards.
//!
//! Delivery is decided by destination alone. A producer on `invoiceOutput` and
//! a consumer on `invoiceInput` talk to each other when both are bound to
//! `invoice-topic`; if one side says `invoice-queue` instead, messages are
//! silently never delivered. The table does not try to detect that.

use crate::messaging::config::BindingConfig;
use crate::messaging::error::{MessagingError, MessagingResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Direction of a binding
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Producer,
    Consumer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Producer => write!(f, "producer"),
            Role::Consumer => write!(f, "consumer"),
        }
    }
}

/// A resolved association between a channel and a destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub channel: String,
    pub destination: String,
    pub binder: String,
    pub role: Role,
    /// Consumer group, only ever set on consumer bindings
    pub group: Option<String>,
}

/// Bindings realized for the active binder, unique per (channel, role)
#[derive(Debug, Clone)]
pub struct BindingTable {
    binder: String,
    bindings: HashMap<(String, Role), Binding>,
}

impl BindingTable {
    /// Create an empty table for the given active binder
    pub fn new(binder: impl Into<String>) -> Self {
        Self {
            binder: binder.into(),
            bindings: HashMap::new(),
        }
    }

    /// Build the table from configuration.
    ///
    /// Bindings that name a binder other than the active one are skipped.
    pub fn from_config(binder: &str, configs: &[BindingConfig]) -> MessagingResult<Self> {
        let mut table = Self::new(binder);

        for config in configs {
            if let Some(ref other) = config.binder {
                if other != binder {
                    debug!(
                        channel = %config.channel,
                        binder = %other,
                        active_binder = %binder,
                        "Skipping binding for inactive binder"
                    );
                    continue;
                }
            }

            table.bind(
                config.channel.clone(),
                config.destination.clone(),
                config.role,
                config.group.clone(),
            )?;
        }

        Ok(table)
    }

    /// Bind a channel to a destination for a role.
    ///
    /// Fails with [`MessagingError::DuplicateBinding`] when the channel already
    /// has a binding for the role; the existing binding is left untouched.
    pub fn bind(
        &mut self,
        channel: impl Into<String>,
        destination: impl Into<String>,
        role: Role,
        group: Option<String>,
    ) -> MessagingResult<Binding> {
        let channel = channel.into();
        let destination = destination.into();

        if channel.trim().is_empty() {
            return Err(MessagingError::Configuration(
                "binding channel name is empty".to_string(),
            ));
        }
        if destination.trim().is_empty() {
            return Err(MessagingError::Configuration(format!(
                "binding for channel '{}' has an empty destination",
                channel
            )));
        }
        if role == Role::Producer && group.is_some() {
            return Err(MessagingError::Configuration(format!(
                "producer binding for channel '{}' cannot declare a consumer group",
                channel
            )));
        }

        let key = (channel.clone(), role);
        if self.bindings.contains_key(&key) {
            return Err(MessagingError::duplicate(&channel, role));
        }

        let binding = Binding {
            channel,
            destination,
            binder: self.binder.clone(),
            role,
            group,
        };

        debug!(
            channel = %binding.channel,
            destination = %binding.destination,
            role = %role,
            group = ?binding.group,
            "Channel bound"
        );

        self.bindings.insert(key, binding.clone());
        Ok(binding)
    }

    /// Resolve the binding for a channel and role
    pub fn lookup(&self, channel: &str, role: Role) -> MessagingResult<&Binding> {
        self.bindings
            .get(&(channel.to_string(), role))
            .ok_or_else(|| MessagingError::unbound(channel, role))
    }

    /// Active binder id these bindings belong to
    pub fn binder(&self) -> &str {
        &self.binder
    }

    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.values()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
