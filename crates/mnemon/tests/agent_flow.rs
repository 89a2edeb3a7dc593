//! End-to-end runtime tests: inbound message through composition, model
//! decision, action execution, and event fan-out, with in-memory fakes
//! standing in for the durable store, the embedder, and the model.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use mnemon::action::{Action, ActionPhase, ActionResult};
use mnemon::bus::EventSink;
use mnemon::config::RuntimeConfig;
use mnemon::error::ProviderFailureKind;
use mnemon::plugin::Plugin;
use mnemon::provider::ContextProvider;
use mnemon::retrieval::{DocumentSource, Embedder};
use mnemon::runtime::{AgentRuntime, ModelClient, ModelDecision};
use mnemon::state::{ComposedState, Message, ProviderOutput};
use mnemon_core::models::Document;

const AGENT: &str = "agent-1";
const ROOM: &str = "room-1";

// ---- fakes ----------------------------------------------------------------

struct MemorySource {
    docs: Vec<Document>,
}

impl MemorySource {
    fn empty() -> Self {
        Self { docs: Vec::new() }
    }

    fn seeded(contents: &[&str]) -> Self {
        let docs = contents
            .iter()
            .map(|c| Document::new(AGENT, *c).with_embedding(bucket_embedding(c)))
            .collect();
        Self { docs }
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn list_documents(&self, agent_id: &str) -> Result<Vec<Document>> {
        Ok(self
            .docs
            .iter()
            .filter(|d| d.agent_id == agent_id)
            .cloned()
            .collect())
    }

    async fn document_count(&self, agent_id: &str) -> Result<usize> {
        Ok(self.docs.iter().filter(|d| d.agent_id == agent_id).count())
    }
}

/// Buckets a few known words onto axes so related texts land close
/// together.
fn bucket_embedding(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v = [0.05f32; 4];
    if lower.contains("ship") || lower.contains("boat") {
        v[0] += 1.0;
    }
    if lower.contains("rust") || lower.contains("crab") {
        v[1] += 1.0;
    }
    if lower.contains("coffee") {
        v[2] += 1.0;
    }
    if lower.contains("music") {
        v[3] += 1.0;
    }
    v.to_vec()
}

/// Counts calls so tests can assert embedding was skipped.
struct CountingEmbedder {
    calls: AtomicUsize,
}

impl CountingEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn dims(&self) -> usize {
        4
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(bucket_embedding(text))
    }
}

/// Replies with a fixed decision and records the state text it saw.
struct ScriptedModel {
    text: &'static str,
    actions: Vec<String>,
    last_context: Mutex<String>,
}

impl ScriptedModel {
    fn new(text: &'static str, actions: &[&str]) -> Self {
        Self {
            text,
            actions: actions.iter().map(|s| s.to_string()).collect(),
            last_context: Mutex::new(String::new()),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn decide(&self, state: &ComposedState) -> Result<ModelDecision> {
        *self.last_context.lock().await = state.text.clone();
        Ok(ModelDecision {
            text: self.text.to_string(),
            actions: self.actions.clone(),
        })
    }
}

struct RecordingSink {
    messages: Mutex<Vec<Message>>,
    deletes: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }
    async fn on_message(&self, message: &Message) -> Result<()> {
        self.messages.lock().await.push(message.clone());
        Ok(())
    }
    async fn on_delete(&self, id: &str) -> Result<()> {
        self.deletes.lock().await.push(id.to_string());
        Ok(())
    }
    async fn on_clear(&self, _room_id: &str) -> Result<()> {
        Ok(())
    }
}

struct StaticProvider {
    name: &'static str,
    priority: i32,
    text: &'static str,
}

#[async_trait]
impl ContextProvider for StaticProvider {
    fn name(&self) -> &str {
        self.name
    }
    fn priority(&self) -> i32 {
        self.priority
    }
    async fn get(&self, _message: &Message, _state: &ComposedState) -> Result<ProviderOutput> {
        Ok(ProviderOutput::with_text(self.text))
    }
}

struct FailingProvider;

#[async_trait]
impl ContextProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }
    fn priority(&self) -> i32 {
        5
    }
    async fn get(&self, _message: &Message, _state: &ComposedState) -> Result<ProviderOutput> {
        bail!("upstream unavailable")
    }
}

struct SlowProvider;

#[async_trait]
impl ContextProvider for SlowProvider {
    fn name(&self) -> &str {
        "slow"
    }
    async fn get(&self, _message: &Message, _state: &ComposedState) -> Result<ProviderOutput> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(ProviderOutput::with_text("too late"))
    }
}

// ---- helpers --------------------------------------------------------------

fn runtime_with(
    source: MemorySource,
    embedder: Arc<CountingEmbedder>,
    model: Arc<ScriptedModel>,
) -> AgentRuntime {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    AgentRuntime::new(
        AGENT,
        RuntimeConfig::default(),
        Arc::new(source),
        embedder,
        model,
    )
    .unwrap()
}

fn inbound(content: &str) -> Message {
    Message::new("user-7", ROOM, content)
}

// ---- tests ----------------------------------------------------------------

#[tokio::test]
async fn test_reply_flows_through_to_sinks() {
    let model = Arc::new(ScriptedModel::new("Hello there.", &[]));
    let mut rt = runtime_with(MemorySource::empty(), Arc::new(CountingEmbedder::new()), model);

    let sink = Arc::new(RecordingSink::new());
    rt.register_sink(sink.clone());

    let reply = rt.process_message(inbound("hi")).await.unwrap();
    assert_eq!(reply.message.content, "Hello there.");

    let seen = sink.messages.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].room_id, ROOM);
    assert_eq!(seen[0].agent_id, AGENT);
}

#[tokio::test]
async fn test_empty_corpus_skips_embedding_entirely() {
    let embedder = Arc::new(CountingEmbedder::new());
    let model = Arc::new(ScriptedModel::new("ok", &[]));
    let mut rt = runtime_with(MemorySource::empty(), embedder.clone(), model);

    rt.process_message(inbound("what do you remember?"))
        .await
        .unwrap();

    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_relevant_memories_reach_the_model() {
    let embedder = Arc::new(CountingEmbedder::new());
    let model = Arc::new(ScriptedModel::new("ok", &[]));
    let source = MemorySource::seeded(&[
        "The ship sails at dawn",
        "I prefer coffee in the morning",
    ]);
    let mut rt = runtime_with(source, embedder.clone(), model.clone());

    rt.process_message(inbound("tell me about the ship"))
        .await
        .unwrap();

    let context = model.last_context.lock().await;
    assert!(
        context.contains("The ship sails at dawn"),
        "expected the relevant memory in composed context, got: {context}"
    );
    assert!(embedder.calls.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn test_provider_failure_and_timeout_are_isolated() {
    let model = Arc::new(ScriptedModel::new("ok", &[]));
    let mut config = RuntimeConfig::default();
    config.composer.provider_timeout_ms = 50;
    let mut rt = AgentRuntime::new(
        AGENT,
        config,
        Arc::new(MemorySource::empty()),
        Arc::new(CountingEmbedder::new()),
        model.clone(),
    )
    .unwrap();

    rt.register_provider(Arc::new(StaticProvider {
        name: "facts",
        priority: 0,
        text: "The agent lives on a boat.",
    }));
    rt.register_provider(Arc::new(FailingProvider));
    rt.register_provider(Arc::new(SlowProvider));

    let reply = rt.process_message(inbound("hi")).await.unwrap();

    assert_eq!(reply.provider_failures.len(), 2);
    let kinds: Vec<ProviderFailureKind> =
        reply.provider_failures.iter().map(|f| f.kind).collect();
    assert!(kinds.contains(&ProviderFailureKind::Error));
    assert!(kinds.contains(&ProviderFailureKind::Timeout));

    // The healthy provider's contribution still made it through.
    let context = model.last_context.lock().await;
    assert!(context.contains("The agent lives on a boat."));
}

#[tokio::test]
async fn test_mixed_action_outcomes_in_declared_order() {
    struct GoodAction;

    #[async_trait]
    impl Action for GoodAction {
        fn name(&self) -> &str {
            "remind"
        }
        async fn validate(&self, _state: &ComposedState) -> bool {
            true
        }
        async fn execute(&self, _state: &ComposedState) -> Result<ActionResult> {
            Ok(ActionResult::ok("Reminder set."))
        }
    }

    struct BadAction;

    #[async_trait]
    impl Action for BadAction {
        fn name(&self) -> &str {
            "lookup"
        }
        async fn validate(&self, _state: &ComposedState) -> bool {
            true
        }
        async fn execute(&self, _state: &ComposedState) -> Result<ActionResult> {
            bail!("backend offline")
        }
    }

    let model = Arc::new(ScriptedModel::new("Working on it.", &["lookup", "remind"]));
    let mut rt = runtime_with(MemorySource::empty(), Arc::new(CountingEmbedder::new()), model);
    rt.register_action(Arc::new(BadAction));
    rt.register_action(Arc::new(GoodAction));

    let reply = rt.process_message(inbound("do both")).await.unwrap();

    assert_eq!(reply.outcomes.len(), 2);
    assert_eq!(reply.outcomes[0].action, "lookup");
    assert_eq!(reply.outcomes[0].phase, ActionPhase::Failed);
    assert!(!reply.outcomes[0].result.text.is_empty());
    assert_eq!(reply.outcomes[1].action, "remind");
    assert_eq!(reply.outcomes[1].phase, ActionPhase::Completed);

    // Both outcome texts land in the outbound message after the model text.
    assert!(reply.message.content.starts_with("Working on it."));
    assert!(reply.message.content.contains("Reminder set."));
}

#[tokio::test]
async fn test_plugin_cycle_detected_before_any_init() {
    struct TrackedPlugin {
        name: &'static str,
        deps: Vec<&'static str>,
        initialized: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Plugin for TrackedPlugin {
        fn name(&self) -> &str {
            self.name
        }
        fn dependencies(&self) -> &[&str] {
            &self.deps
        }
        async fn init(&self, _runtime: &mut AgentRuntime) -> Result<()> {
            self.initialized.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    let model = Arc::new(ScriptedModel::new("ok", &[]));
    let mut rt = runtime_with(MemorySource::empty(), Arc::new(CountingEmbedder::new()), model);

    let flag_a = Arc::new(AtomicBool::new(false));
    let flag_b = Arc::new(AtomicBool::new(false));
    let plugins: Vec<Box<dyn Plugin>> = vec![
        Box::new(TrackedPlugin {
            name: "p1",
            deps: vec!["p2"],
            initialized: flag_a.clone(),
        }),
        Box::new(TrackedPlugin {
            name: "p2",
            deps: vec!["p1"],
            initialized: flag_b.clone(),
        }),
    ];

    let err = rt.load_plugins(plugins).await.unwrap_err();
    assert!(err.to_string().contains("cyclic"), "got: {err}");
    assert!(!flag_a.load(Ordering::SeqCst));
    assert!(!flag_b.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_plugin_contributions_are_usable() {
    struct ActionPlugin;

    struct PingAction;

    #[async_trait]
    impl Action for PingAction {
        fn name(&self) -> &str {
            "ping"
        }
        async fn validate(&self, _state: &ComposedState) -> bool {
            true
        }
        async fn execute(&self, _state: &ComposedState) -> Result<ActionResult> {
            Ok(ActionResult::ok("pong"))
        }
    }

    #[async_trait]
    impl Plugin for ActionPlugin {
        fn name(&self) -> &str {
            "ping-plugin"
        }
        async fn init(&self, runtime: &mut AgentRuntime) -> Result<()> {
            runtime.register_action(Arc::new(PingAction));
            Ok(())
        }
    }

    let model = Arc::new(ScriptedModel::new("", &["ping"]));
    let mut rt = runtime_with(MemorySource::empty(), Arc::new(CountingEmbedder::new()), model);
    rt.load_plugins(vec![Box::new(ActionPlugin)]).await.unwrap();

    let reply = rt.process_message(inbound("ping me")).await.unwrap();
    assert_eq!(reply.outcomes[0].phase, ActionPhase::Completed);
    assert_eq!(reply.message.content, "pong");
}

#[tokio::test]
async fn test_forget_fans_out_deletion() {
    let model = Arc::new(ScriptedModel::new("ok", &[]));
    let mut rt = runtime_with(MemorySource::empty(), Arc::new(CountingEmbedder::new()), model);
    let sink = Arc::new(RecordingSink::new());
    rt.register_sink(sink.clone());

    let doc = rt
        .remember("I collect vinyl music records", serde_json::Value::Null)
        .await
        .unwrap();
    assert!(rt.forget(&doc.id).await);

    let deletes = sink.deletes.lock().await;
    assert_eq!(deletes.as_slice(), [doc.id]);
}
