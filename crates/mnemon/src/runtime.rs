//! The per-agent runtime: one instance per agent, owning all mutable
//! state for that agent.
//!
//! Control flow for one inbound message:
//!
//! 1. The composer queries providers (retrieval included, on request).
//! 2. The assembled state feeds one [`ModelClient::decide`] call.
//! 3. The decision's action names run through the pipeline in order.
//! 4. The reply is fanned out via the event bus.
//!
//! All indices and caches are fields of the runtime instance, keyed to
//! its agent. There is no process-wide mutable state, so concurrent
//! runtimes for different agents are fully independent. Cancellation is
//! dropping the returned future: index mutations are synchronous and
//! individually atomic, so a drop between them never leaves a partially
//! mutated index.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use mnemon_core::models::Document;

use crate::action::{Action, ActionOutcome, ActionPipeline};
use crate::bus::{EventBus, EventSink};
use crate::composer::{ComposeOptions, ContextComposer};
use crate::config::{validate, RuntimeConfig};
use crate::plugin::{resolve_order, Plugin};
use crate::provider::ContextProvider;
use crate::retrieval::{
    DocumentSource, Embedder, RetrievalEngine, RetrievalProvider, RETRIEVAL_PROVIDER,
};
use crate::state::{ComposedState, Message, ProviderFailure};

/// A model's structured output for one message: reply text plus the
/// ordered action names to execute.
#[derive(Debug, Clone, Default)]
pub struct ModelDecision {
    pub text: String,
    pub actions: Vec<String>,
}

/// The single downstream model invocation per message. External
/// collaborator, like [`Embedder`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn decide(&self, state: &ComposedState) -> Result<ModelDecision>;
}

/// Everything one message produced.
#[derive(Debug)]
pub struct Reply {
    /// The canonical outbound message that was fanned out.
    pub message: Message,
    /// Per-action outcomes, in declared order.
    pub outcomes: Vec<ActionOutcome>,
    /// Providers that contributed nothing during composition.
    pub provider_failures: Vec<ProviderFailure>,
}

/// Observability snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RuntimeStats {
    pub agent_id: String,
    pub documents: usize,
    pub vectors: usize,
    pub embedding_cache_hits: u64,
    pub embedding_cache_misses: u64,
    pub providers: usize,
    pub actions: usize,
    pub sinks: usize,
}

/// One agent's runtime instance.
pub struct AgentRuntime {
    agent_id: String,
    composer: ContextComposer,
    pipeline: ActionPipeline,
    bus: EventBus,
    engine: Arc<Mutex<RetrievalEngine>>,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ModelClient>,
}

impl AgentRuntime {
    /// Build a runtime wired to its external collaborators. The
    /// retrieval provider is registered automatically (as a dynamic
    /// provider; [`process_message`](Self::process_message) requests it
    /// each pass).
    pub fn new(
        agent_id: impl Into<String>,
        config: RuntimeConfig,
        source: Arc<dyn DocumentSource>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ModelClient>,
    ) -> Result<Self> {
        validate(&config)?;
        let agent_id = agent_id.into();

        let engine = Arc::new(Mutex::new(RetrievalEngine::new(
            agent_id.clone(),
            embedder.dims(),
            config.retrieval.clone(),
            &config.cache,
        )));

        let mut composer = ContextComposer::new(&config.composer);
        composer.register(Arc::new(RetrievalProvider::new(
            engine.clone(),
            source,
            embedder.clone(),
        )));

        Ok(Self {
            agent_id,
            composer,
            pipeline: ActionPipeline::new(),
            bus: EventBus::new(),
            engine,
            embedder,
            model,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn register_provider(&mut self, provider: Arc<dyn ContextProvider>) {
        self.composer.register(provider);
    }

    pub fn register_action(&mut self, action: Arc<dyn Action>) {
        self.pipeline.register(action);
    }

    pub fn register_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.bus.register(sink);
    }

    /// Initialize plugins in dependency order.
    ///
    /// Fails fast, before any plugin's `init` runs, on a cyclic or
    /// missing dependency.
    pub async fn load_plugins(&mut self, plugins: Vec<Box<dyn Plugin>>) -> Result<()> {
        let order = resolve_order(&plugins)?;
        for i in order {
            let name = plugins[i].name().to_string();
            plugins[i]
                .init(self)
                .await
                .with_context(|| format!("initializing plugin '{name}'"))?;
            info!(plugin = %name, "plugin initialized");
        }
        Ok(())
    }

    /// Process one inbound message end to end and return the reply.
    pub async fn process_message(&mut self, message: Message) -> Result<Reply> {
        let opts = ComposeOptions::with_dynamic(&[RETRIEVAL_PROVIDER]);
        let mut state = self.composer.compose(&message, &opts).await;

        let decision = self.model.decide(&state).await?;
        state.action_names = decision.actions;

        let outcomes = self.pipeline.run(&state).await;

        let mut text = decision.text;
        for outcome in &outcomes {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&outcome.result.text);
        }

        let outbound = Message::new(self.agent_id.clone(), message.room_id.clone(), text);
        self.bus.publish_message(&outbound).await;

        Ok(Reply {
            message: outbound,
            outcomes,
            provider_failures: state.failures,
        })
    }

    /// Capture new knowledge: embed once, index, and fan out to sinks
    /// (durable persistence is a sink's concern; the runtime never
    /// writes to the document source directly).
    pub async fn remember(
        &mut self,
        content: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<Document> {
        let content = content.into();
        let embedding = self.embedder.embed(&content).await?;
        let doc = Document::new(self.agent_id.clone(), content)
            .with_embedding(embedding)
            .with_metadata(metadata);

        self.engine.lock().await.add(doc.clone())?;

        let mut note = Message::new(self.agent_id.clone(), "memories", doc.content.clone());
        note.id = doc.id.clone();
        self.bus.publish_message(&note).await;

        Ok(doc)
    }

    /// Soft-delete a memory from both indices and announce it.
    pub async fn forget(&mut self, id: &str) -> bool {
        let removed = self.engine.lock().await.remove(id);
        if removed {
            self.bus.publish_delete(id).await;
        }
        removed
    }

    /// Drop all indexed context for a room reset. Indices rebuild from
    /// the durable source on the next retrieval pass.
    pub async fn reset(&mut self, room_id: &str) {
        self.engine.lock().await.clear();
        self.bus.publish_clear(room_id).await;
    }

    pub async fn stats(&self) -> RuntimeStats {
        let engine = self.engine.lock().await;
        RuntimeStats {
            agent_id: self.agent_id.clone(),
            documents: engine.document_count(),
            vectors: engine.vector_count(),
            embedding_cache_hits: engine.cache_hits(),
            embedding_cache_misses: engine.cache_misses(),
            providers: self.composer.len(),
            actions: self.pipeline.len(),
            sinks: self.bus.len(),
        }
    }
}
