//! Context composition under a time budget with partial-failure
//! tolerance.
//!
//! The composer drives a priority-ordered list of providers. A provider
//! that fails or exceeds its timeout contributes an empty output; the
//! failure is recorded on the state and traced, never propagated. A
//! single flaky integration must never block the ability to respond at
//! all.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::config::ComposerConfig;
use crate::error::ProviderFailureKind;
use crate::provider::ContextProvider;
use crate::state::{ComposedState, Message, ProviderFailure};

/// Per-pass options.
#[derive(Debug, Clone, Default)]
pub struct ComposeOptions {
    /// Names of dynamic providers to include in this pass. Dynamic
    /// providers not listed here are skipped without a failure record.
    pub dynamic: Vec<String>,
}

impl ComposeOptions {
    pub fn with_dynamic(names: &[&str]) -> Self {
        Self {
            dynamic: names.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Priority-ordered provider executor.
pub struct ContextComposer {
    providers: Vec<Arc<dyn ContextProvider>>,
    provider_timeout: Duration,
    total_budget: Duration,
}

impl ContextComposer {
    pub fn new(config: &ComposerConfig) -> Self {
        Self {
            providers: Vec::new(),
            provider_timeout: Duration::from_millis(config.provider_timeout_ms),
            total_budget: Duration::from_millis(config.total_budget_ms),
        }
    }

    /// Register a provider. Registration is idempotent by name: a
    /// duplicate replaces the prior entry with a warning.
    pub fn register(&mut self, provider: Arc<dyn ContextProvider>) {
        if let Some(existing) = self
            .providers
            .iter_mut()
            .find(|p| p.name() == provider.name())
        {
            warn!(provider = provider.name(), "replacing registered provider");
            *existing = provider;
        } else {
            self.providers.push(provider);
        }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Run all applicable providers and merge their outputs.
    ///
    /// Execution order is priority descending, registration order for
    /// equal priorities. Each provider sees the state accumulated so
    /// far. The soft total budget stops launching further providers once
    /// exhausted; those are recorded as failed with
    /// [`ProviderFailureKind::BudgetExhausted`].
    pub async fn compose(&self, message: &Message, opts: &ComposeOptions) -> ComposedState {
        let mut state = ComposedState::new(message.clone());
        let deadline = Instant::now() + self.total_budget;

        let mut ordered: Vec<&Arc<dyn ContextProvider>> = self.providers.iter().collect();
        ordered.sort_by_key(|p| std::cmp::Reverse(p.priority()));

        for provider in ordered {
            let name = provider.name().to_string();
            if provider.dynamic() && !opts.dynamic.iter().any(|n| n == &name) {
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(provider = %name, "composition budget exhausted, skipping");
                state.failures.push(ProviderFailure {
                    provider: name,
                    kind: ProviderFailureKind::BudgetExhausted,
                    detail: "composition budget exhausted".to_string(),
                });
                continue;
            }

            let slot = remaining.min(self.provider_timeout);
            match timeout(slot, provider.get(message, &state)).await {
                Ok(Ok(output)) => {
                    debug!(provider = %name, empty = output.is_empty(), "provider contributed");
                    state.absorb(&name, output);
                }
                Ok(Err(err)) => {
                    warn!(provider = %name, error = %err, "provider failed");
                    state.failures.push(ProviderFailure {
                        provider: name,
                        kind: ProviderFailureKind::Error,
                        detail: err.to_string(),
                    });
                }
                Err(_) => {
                    warn!(provider = %name, timeout_ms = slot.as_millis() as u64, "provider timed out");
                    state.failures.push(ProviderFailure {
                        provider: name,
                        kind: ProviderFailureKind::Timeout,
                        detail: format!("exceeded {}ms", slot.as_millis()),
                    });
                }
            }
        }

        state
    }
}
