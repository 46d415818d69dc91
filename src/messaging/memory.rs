//! In-memory binder
//!
//! Process-local topics with broker-like consumer group semantics: every
//! group gets each message once (round-robin across its members), and every
//! ungrouped subscription gets every message. Messages go through the same
//! header encoding as the network binders so handlers see identical data.

use crate::messaging::config::BinderKind;
use crate::messaging::error::MessagingResult;
use crate::messaging::message::Message;
use crate::messaging::traits::{Binder, MessageStream};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::trace;

type Subscriber = mpsc::UnboundedSender<Message>;

#[derive(Default)]
struct Group {
    members: Vec<Subscriber>,
    next: usize,
}

impl Group {
    /// Deliver to the next live member, pruning closed ones
    fn deliver(&mut self, message: &Message) -> bool {
        while !self.members.is_empty() {
            let index = self.next % self.members.len();
            if self.members[index].send(message.clone()).is_ok() {
                self.next = index + 1;
                return true;
            }
            self.members.remove(index);
        }
        false
    }
}

#[derive(Default)]
struct Topic {
    groups: HashMap<String, Group>,
    listeners: Vec<Subscriber>,
}

/// Binder keeping destinations in process memory
#[derive(Default)]
pub struct InMemoryBinder {
    topics: RwLock<HashMap<String, Topic>>,
}

impl InMemoryBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscriptions on a destination, grouped or not
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.topics
            .read()
            .get(destination)
            .map(|topic| {
                topic.listeners.len()
                    + topic
                        .groups
                        .values()
                        .map(|group| group.members.len())
                        .sum::<usize>()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl Binder for InMemoryBinder {
    fn kind(&self) -> BinderKind {
        BinderKind::InMemory
    }

    async fn publish(&self, destination: &str, message: &Message) -> MessagingResult<()> {
        let wire = Message::from_wire(
            message.payload().to_vec(),
            message.wire_headers().into_iter().collect(),
        );

        let mut topics = self.topics.write();
        let Some(topic) = topics.get_mut(destination) else {
            trace!(destination, "No subscribers, message dropped");
            return Ok(());
        };

        topic.listeners.retain(|listener| listener.send(wire.clone()).is_ok());
        for (group, members) in topic.groups.iter_mut() {
            if !members.deliver(&wire) {
                trace!(destination, group = %group, "Consumer group has no live members");
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        destination: &str,
        group: Option<&str>,
    ) -> MessagingResult<Box<dyn MessageStream>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut topics = self.topics.write();
        let topic = topics.entry(destination.to_string()).or_default();
        match group {
            Some(group) => topic
                .groups
                .entry(group.to_string())
                .or_default()
                .members
                .push(tx),
            None => topic.listeners.push(tx),
        }

        Ok(Box::new(InMemoryStream { rx }))
    }

    async fn is_connected(&self) -> bool {
        true
    }

    async fn close(&self) -> MessagingResult<()> {
        // Dropping the senders ends every open stream
        self.topics.write().clear();
        Ok(())
    }
}

/// Stream over an in-memory subscription
pub struct InMemoryStream {
    rx: mpsc::UnboundedReceiver<Message>,
}

#[async_trait]
impl MessageStream for InMemoryStream {
    async fn next(&mut self) -> MessagingResult<Option<Message>> {
        Ok(self.rx.recv().await)
    }

    async fn ack(&mut self) -> MessagingResult<()> {
        Ok(())
    }
}
