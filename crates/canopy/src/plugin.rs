//! Lifecycle plugins
//!
//! Plugins observe graph and instance lifecycle without being registered as
//! services. The registry holds its plugin list behind an [`ArcSwap`] so
//! resolution paths read a lock-free snapshot while registration rebuilds the
//! list copy-on-write.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::component::ComponentBuilder;
use crate::error::Result;
use crate::graph::Graph;
use crate::scope::Scope;
use crate::service::DynInstance;

/// Observer of graph and instance lifecycle events.
///
/// Every hook has a no-op default, so implementations override only what
/// they care about.
pub trait Plugin: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Called while a graph is being opened, before its declaration is
    /// frozen. The plugin may add entries to the builder.
    fn graph_initializing(
        &self,
        _parent: Option<&Graph>,
        _builder: &mut ComponentBuilder,
    ) -> Result<()> {
        Ok(())
    }

    /// Called after a graph has opened and its eager singletons exist.
    fn graph_initialized(&self, _graph: &Graph) {}

    /// Called after a fresh instance and its dependency subtree exist.
    fn post_construct(
        &self,
        _graph: &Graph,
        _scope: Scope,
        _argument: Option<&DynInstance>,
        _instance: &DynInstance,
    ) {
    }

    /// Called while a graph is closing, before its cached services are
    /// disposed. The graph is still resolvable at this point.
    fn graph_close(&self, _graph: &Graph) {}
}

/// Copy-on-write collection of registered plugins.
pub struct PluginRegistry {
    plugins: ArcSwap<Vec<Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Register a plugin. Returns false when this exact plugin instance is
    /// already registered.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> bool {
        let mut added = false;
        self.plugins.rcu(|current| {
            let mut next = (**current).clone();
            if next.iter().any(|existing| Arc::ptr_eq(existing, &plugin)) {
                added = false;
            } else {
                next.push(plugin.clone());
                added = true;
            }
            next
        });
        added
    }

    /// Remove a previously registered plugin instance.
    pub fn unregister(&self, plugin: &Arc<dyn Plugin>) -> bool {
        let mut removed = false;
        self.plugins.rcu(|current| {
            let next: Vec<_> = current
                .iter()
                .filter(|existing| !Arc::ptr_eq(existing, plugin))
                .cloned()
                .collect();
            removed = next.len() != current.len();
            next
        });
        removed
    }

    /// The current plugin list. Graphs capture one snapshot when they open.
    pub fn snapshot(&self) -> Arc<Vec<Arc<dyn Plugin>>> {
        self.plugins.load_full()
    }

    pub fn len(&self) -> usize {
        self.plugins.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.load().is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("len", &self.len())
            .finish()
    }
}
