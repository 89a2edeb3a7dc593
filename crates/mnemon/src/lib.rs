//! # Mnemon
//!
//! An in-process agent runtime. On every inbound message it assembles a
//! bounded, relevant slice of long-term memory and world context, feeds
//! the assembled state to one model invocation, executes the actions the
//! model selected, and fans side effects out to registered sinks.
//!
//! ## Architecture
//!
//! ```text
//! inbound message
//!       │
//!       ▼
//! ┌──────────────────┐   providers (retrieval, facts, …)
//! │ ContextComposer   │◀──────────────────────────────┐
//! └────────┬─────────┘                                │
//!          ▼                                          │
//!    ComposedState ──▶ ModelClient::decide            │
//!          │                 │                        │
//!          ▼                 ▼                        │
//! ┌──────────────────┐  action names          ┌───────┴───────┐
//! │ ActionPipeline    │◀──────────────────────│ PluginRegistry │
//! └────────┬─────────┘                        └───────────────┘
//!          ▼
//!     EventBus fan-out (sinks, each independently fallible)
//! ```
//!
//! The retrieval core (ANN vector index, BM25 lexical index, rank
//! fusion, bounded cache) lives in [`mnemon_core`]; this crate owns the
//! async orchestration around it.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with validated defaults |
//! | [`state`] | Messages, provider outputs, composed state |
//! | [`provider`] | Context provider contract |
//! | [`composer`] | Budgeted, partial-failure-tolerant composition |
//! | [`retrieval`] | Hybrid retrieval engine and provider |
//! | [`action`] | Action contract and execution pipeline |
//! | [`plugin`] | Plugin registry with dependency resolution |
//! | [`bus`] | Event fan-out to registered sinks |
//! | [`runtime`] | Per-agent runtime tying the loop together |

pub mod action;
pub mod bus;
pub mod composer;
pub mod config;
pub mod error;
pub mod plugin;
pub mod provider;
pub mod retrieval;
pub mod runtime;
pub mod state;

pub use mnemon_core as core;
