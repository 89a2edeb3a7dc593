//! Event fan-out to registered sinks.
//!
//! The bus delivers one canonical message to zero or more sinks: chat
//! transports, persistence adapters, audit logs. Each sink is
//! independently fallible: a failure is caught and logged, never
//! allowed to block delivery to the other sinks.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::state::Message;

/// An output channel consuming runtime side effects.
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    /// A canonical message was produced (agent reply or new memory).
    async fn on_message(&self, message: &Message) -> Result<()>;

    /// A document/memory was soft-deleted.
    async fn on_delete(&self, id: &str) -> Result<()>;

    /// A whole room's context was reset.
    async fn on_clear(&self, room_id: &str) -> Result<()>;
}

/// Fan-out dispatcher over registered sinks.
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Register a sink. Idempotent by name: a duplicate replaces the
    /// prior entry with a warning.
    pub fn register(&mut self, sink: Arc<dyn EventSink>) {
        if let Some(existing) = self.sinks.iter_mut().find(|s| s.name() == sink.name()) {
            warn!(sink = sink.name(), "replacing registered event sink");
            *existing = sink;
        } else {
            self.sinks.push(sink);
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Deliver a message to every sink. Returns how many succeeded.
    pub async fn publish_message(&self, message: &Message) -> usize {
        let mut delivered = 0;
        for sink in &self.sinks {
            match sink.on_message(message).await {
                Ok(()) => delivered += 1,
                Err(err) => warn!(sink = sink.name(), error = %err, "sink failed on message"),
            }
        }
        delivered
    }

    /// Announce a deletion to every sink. Returns how many succeeded.
    pub async fn publish_delete(&self, id: &str) -> usize {
        let mut delivered = 0;
        for sink in &self.sinks {
            match sink.on_delete(id).await {
                Ok(()) => delivered += 1,
                Err(err) => warn!(sink = sink.name(), error = %err, "sink failed on delete"),
            }
        }
        delivered
    }

    /// Announce a room reset to every sink. Returns how many succeeded.
    pub async fn publish_clear(&self, room_id: &str) -> usize {
        let mut delivered = 0;
        for sink in &self.sinks {
            match sink.on_clear(room_id).await {
                Ok(()) => delivered += 1,
                Err(err) => warn!(sink = sink.name(), error = %err, "sink failed on clear"),
            }
        }
        delivered
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
