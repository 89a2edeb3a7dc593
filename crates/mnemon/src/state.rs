//! Messages, provider outputs, and the composed state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProviderFailureKind;

/// A canonical message flowing through the runtime: inbound from a
/// conversation, or outbound as the agent's reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub agent_id: String,
    pub room_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        agent_id: impl Into<String>,
        room_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            room_id: room_id.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// One provider's contribution to a composition pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderOutput {
    /// Free-text fragment appended to the composed prompt text.
    pub text: String,
    /// Key/value pairs readable by lower-priority providers in the same
    /// pass.
    pub values: HashMap<String, String>,
    /// Structured payload, stored under the provider's name.
    pub data: serde_json::Value,
}

impl ProviderOutput {
    /// The contribution of a failed or skipped provider.
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            values: HashMap::new(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::empty()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.values.is_empty() && self.data.is_null()
    }
}

/// A provider failure recorded for observability.
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    pub provider: String,
    pub kind: ProviderFailureKind,
    pub detail: String,
}

/// The merged output of all context providers for one inbound message.
///
/// Owned by the composer for the lifetime of one message and discarded
/// after the action pipeline completes. Providers executing later in the
/// pass read the values accumulated so far, so registration order (via
/// priority) is significant.
#[derive(Debug, Clone)]
pub struct ComposedState {
    /// The message this state was composed for.
    pub message: Message,
    /// Concatenated provider text fragments, in execution order.
    pub text: String,
    /// Merged key/value pairs from all providers.
    pub values: HashMap<String, String>,
    /// Structured payloads keyed by provider name.
    pub data: HashMap<String, serde_json::Value>,
    /// Providers that contributed nothing and why.
    pub failures: Vec<ProviderFailure>,
    /// Ordered action names the model decision selected for execution.
    pub action_names: Vec<String>,
}

impl ComposedState {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            text: String::new(),
            values: HashMap::new(),
            data: HashMap::new(),
            failures: Vec::new(),
            action_names: Vec::new(),
        }
    }

    /// Merge one provider's output into the accumulated state.
    pub fn absorb(&mut self, provider: &str, output: ProviderOutput) {
        if !output.text.is_empty() {
            if !self.text.is_empty() {
                self.text.push('\n');
            }
            self.text.push_str(&output.text);
        }
        self.values.extend(output.values);
        if !output.data.is_null() {
            self.data.insert(provider.to_string(), output.data);
        }
    }

    /// Look up a value contributed by an earlier provider.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}
