//! Plugin registry with declared-dependency resolution.
//!
//! Plugins contribute providers, actions, and event sinks to an agent
//! runtime. Each declares a name and the names it depends on; the
//! registry computes a topological initialization order and fails fast,
//! before any plugin initializes, if the graph has a cycle or a missing
//! dependency.

use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use async_trait::async_trait;

use crate::error::PluginError;
use crate::runtime::AgentRuntime;

/// An installable extension bundle.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Names of plugins that must initialize before this one.
    fn dependencies(&self) -> &[&str] {
        &[]
    }

    /// Contribute providers/actions/sinks to the runtime. Called once,
    /// in dependency order.
    async fn init(&self, runtime: &mut AgentRuntime) -> Result<()>;
}

/// Compute a dependency-respecting initialization order over `plugins`.
///
/// Returns indices into the input slice. Kahn's algorithm; fails with
/// [`PluginError::MissingDependency`] for an undeclared name and
/// [`PluginError::CyclicDependency`] when no full ordering exists.
/// Ties (plugins whose dependencies are all satisfied at the same step)
/// keep declaration order for determinism.
pub fn resolve_order(plugins: &[Box<dyn Plugin>]) -> Result<Vec<usize>, PluginError> {
    let index_of: HashMap<&str, usize> = plugins
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name(), i))
        .collect();

    let mut in_degree = vec![0usize; plugins.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); plugins.len()];

    for (i, plugin) in plugins.iter().enumerate() {
        for dep in plugin.dependencies() {
            let Some(&d) = index_of.get(dep) else {
                return Err(PluginError::MissingDependency {
                    plugin: plugin.name().to_string(),
                    dependency: dep.to_string(),
                });
            };
            in_degree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut ready: VecDeque<usize> = (0..plugins.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(plugins.len());

    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &dep in &dependents[i] {
            in_degree[dep] -= 1;
            if in_degree[dep] == 0 {
                ready.push_back(dep);
            }
        }
    }

    if order.len() != plugins.len() {
        // Any node still carrying in-degree sits on a cycle.
        let stuck = (0..plugins.len())
            .find(|&i| in_degree[i] > 0)
            .expect("incomplete order implies a stuck node");
        return Err(PluginError::CyclicDependency {
            plugin: plugins[stuck].name().to_string(),
        });
    }

    Ok(order)
}
