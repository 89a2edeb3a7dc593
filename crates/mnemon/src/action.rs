//! Action contract and the execution pipeline.
//!
//! Each action moves through `Validating → Selected → Executing →
//! {Completed | Failed}`. Validation is non-exclusive: the composed
//! state declares an ordered list of action names and the pipeline runs
//! them in that order, catching per-action failure without aborting the
//! rest. A failed action still produces user-facing text so the
//! conversation can continue, never a silent no-op.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::state::ComposedState;

/// What one action produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    /// User-facing text. Required even on failure.
    pub text: String,
    /// Structured payload for downstream consumers.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ActionResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            success: false,
            text: text.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// A capability the model can select. Stateless between invocations:
/// any required state lives in the [`ComposedState`] or an external
/// service.
#[async_trait]
pub trait Action: Send + Sync {
    /// Registry name, matched against the state's declared action list.
    fn name(&self) -> &str;

    /// Example invocations, used for model prompting.
    fn examples(&self) -> &[&str] {
        &[]
    }

    /// Whether this action is applicable to the given state. Multiple
    /// actions may validate true for the same state.
    async fn validate(&self, state: &ComposedState) -> bool;

    /// Execute the capability. An error here is recovered by the
    /// pipeline into a failed [`ActionResult`].
    async fn execute(&self, state: &ComposedState) -> Result<ActionResult>;
}

/// Where an action's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionPhase {
    Completed,
    Failed,
}

/// The recorded outcome of one declared action.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub action: String,
    pub phase: ActionPhase,
    pub result: ActionResult,
}

/// Executes the state's declared actions in order.
pub struct ActionPipeline {
    actions: Vec<Arc<dyn Action>>,
}

impl ActionPipeline {
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    /// Register an action. Idempotent by name: a duplicate replaces the
    /// prior entry with a warning.
    pub fn register(&mut self, action: Arc<dyn Action>) {
        if let Some(existing) = self.actions.iter_mut().find(|a| a.name() == action.name()) {
            warn!(action = action.name(), "replacing registered action");
            *existing = action;
        } else {
            self.actions.push(action);
        }
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.actions.iter().find(|a| a.name() == name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run the state's declared actions in declared order.
    ///
    /// Unknown names and validation rejections are recorded as failed
    /// outcomes; execution errors are recovered into failed results with
    /// user-facing text. No outcome aborts the ones after it.
    pub async fn run(&self, state: &ComposedState) -> Vec<ActionOutcome> {
        let mut outcomes = Vec::with_capacity(state.action_names.len());

        for name in &state.action_names {
            let Some(action) = self.find(name) else {
                warn!(action = %name, "unknown action requested");
                outcomes.push(ActionOutcome {
                    action: name.clone(),
                    phase: ActionPhase::Failed,
                    result: ActionResult::failed(format!(
                        "I don't know how to '{name}' yet."
                    )),
                });
                continue;
            };

            if !action.validate(state).await {
                debug!(action = %name, "action validation rejected");
                outcomes.push(ActionOutcome {
                    action: name.clone(),
                    phase: ActionPhase::Failed,
                    result: ActionResult::failed(format!(
                        "'{name}' is not applicable right now."
                    )),
                });
                continue;
            }

            match action.execute(state).await {
                Ok(mut result) => {
                    if result.text.is_empty() {
                        // The contract requires user-facing text even on
                        // success; backfill a minimal confirmation.
                        result.text = format!("Done: {name}.");
                    }
                    let phase = if result.success {
                        ActionPhase::Completed
                    } else {
                        ActionPhase::Failed
                    };
                    debug!(action = %name, success = result.success, "action executed");
                    outcomes.push(ActionOutcome {
                        action: name.clone(),
                        phase,
                        result,
                    });
                }
                Err(err) => {
                    warn!(action = %name, error = %err, "action execution failed");
                    outcomes.push(ActionOutcome {
                        action: name.clone(),
                        phase: ActionPhase::Failed,
                        result: ActionResult::failed(format!(
                            "Something went wrong while trying to {name}."
                        ))
                        .with_data(serde_json::json!({ "error": err.to_string() })),
                    });
                }
            }
        }

        outcomes
    }
}

impl Default for ActionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Message;
    use anyhow::bail;

    struct ReplyAction;

    #[async_trait]
    impl Action for ReplyAction {
        fn name(&self) -> &str {
            "reply"
        }
        async fn validate(&self, _state: &ComposedState) -> bool {
            true
        }
        async fn execute(&self, _state: &ComposedState) -> Result<ActionResult> {
            Ok(ActionResult::ok("Here you go."))
        }
    }

    struct BrokenAction;

    #[async_trait]
    impl Action for BrokenAction {
        fn name(&self) -> &str {
            "broken"
        }
        async fn validate(&self, _state: &ComposedState) -> bool {
            true
        }
        async fn execute(&self, _state: &ComposedState) -> Result<ActionResult> {
            bail!("downstream service exploded")
        }
    }

    struct PickyAction;

    #[async_trait]
    impl Action for PickyAction {
        fn name(&self) -> &str {
            "picky"
        }
        async fn validate(&self, state: &ComposedState) -> bool {
            state.value("allowed").is_some()
        }
        async fn execute(&self, _state: &ComposedState) -> Result<ActionResult> {
            Ok(ActionResult::ok("Picky ran."))
        }
    }

    fn state_with_actions(names: &[&str]) -> ComposedState {
        let mut state = ComposedState::new(Message::new("a", "r", "hi"));
        state.action_names = names.iter().map(|s| s.to_string()).collect();
        state
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_later_actions() {
        let mut pipeline = ActionPipeline::new();
        pipeline.register(Arc::new(BrokenAction));
        pipeline.register(Arc::new(ReplyAction));

        let outcomes = pipeline.run(&state_with_actions(&["broken", "reply"])).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].phase, ActionPhase::Failed);
        assert!(!outcomes[0].result.text.is_empty(), "failure still speaks");
        assert_eq!(outcomes[1].phase, ActionPhase::Completed);
        assert!(outcomes[1].result.success);
    }

    #[tokio::test]
    async fn test_declared_order_preserved() {
        let mut pipeline = ActionPipeline::new();
        pipeline.register(Arc::new(ReplyAction));
        pipeline.register(Arc::new(BrokenAction));

        let outcomes = pipeline.run(&state_with_actions(&["reply", "broken"])).await;
        assert_eq!(outcomes[0].action, "reply");
        assert_eq!(outcomes[1].action, "broken");
    }

    #[tokio::test]
    async fn test_unknown_action_recorded() {
        let pipeline = ActionPipeline::new();
        let outcomes = pipeline.run(&state_with_actions(&["missing"])).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].phase, ActionPhase::Failed);
    }

    #[tokio::test]
    async fn test_validation_rejection_not_executed() {
        let mut pipeline = ActionPipeline::new();
        pipeline.register(Arc::new(PickyAction));

        let outcomes = pipeline.run(&state_with_actions(&["picky"])).await;
        assert_eq!(outcomes[0].phase, ActionPhase::Failed);
        assert!(outcomes[0].result.text.contains("not applicable"));
    }

    #[tokio::test]
    async fn test_register_replaces_by_name() {
        let mut pipeline = ActionPipeline::new();
        pipeline.register(Arc::new(ReplyAction));
        pipeline.register(Arc::new(ReplyAction));
        assert_eq!(pipeline.len(), 1);
    }
}
