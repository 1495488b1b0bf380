//! Application wiring
//!
//! An [`Application`] ties a root [`Component`] declaration to a plugin
//! registry and manages the lifecycle of the root [`Graph`]. There is no
//! global instance; libraries receive an `Application` or a `Graph`
//! explicitly.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::component::Component;
use crate::error::{Error, Result};
use crate::graph::{open_graph, Configure, Graph};
use crate::plugin::{Plugin, PluginRegistry};

struct AppInner {
    name: String,
    component: Mutex<Component>,
    registry: Arc<PluginRegistry>,
    root: Mutex<Option<Graph>>,
}

/// Top-level handle owning the root declaration, the plugin registry, and
/// the root graph. Cheap to clone and share.
#[derive(Clone)]
pub struct Application {
    inner: Arc<AppInner>,
}

impl Application {
    /// Create an application with an empty root declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_component(name, Component::builder().build())
    }

    /// Create an application from a prebuilt root declaration.
    pub fn with_component(name: impl Into<String>, component: Component) -> Self {
        Self {
            inner: Arc::new(AppInner {
                name: name.into(),
                component: Mutex::new(component),
                registry: Arc::new(PluginRegistry::new()),
                root: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The current root declaration.
    pub fn component(&self) -> Component {
        self.inner
            .component
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the root declaration.
    ///
    /// Fails while the root graph is open; the already-open graph keeps
    /// resolving against the declaration it was opened from.
    pub fn register_component(&self, component: Component) -> Result<()> {
        if self.graph().is_some() {
            return Err(Error::invalid_state(
                "cannot replace the root component while the root graph is open",
            ));
        }
        *self
            .inner
            .component
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = component;
        Ok(())
    }

    /// The plugin registry consulted when graphs open.
    pub fn plugins(&self) -> &PluginRegistry {
        &self.inner.registry
    }

    /// Register a plugin for graphs opened from now on.
    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> bool {
        self.inner.registry.register(plugin)
    }

    /// Remove a previously registered plugin.
    pub fn unregister_plugin(&self, plugin: &Arc<dyn Plugin>) -> bool {
        self.inner.registry.unregister(plugin)
    }

    /// Open the root graph. Fails when it is already open.
    pub fn open(&self) -> Result<Graph> {
        self.open_with(None)
    }

    /// Open the root graph with an ad-hoc builder block.
    pub fn open_with(&self, configure: Option<Configure<'_>>) -> Result<Graph> {
        let mut root = self
            .inner
            .root
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if root.as_ref().is_some_and(Graph::is_open) {
            return Err(Error::invalid_state("root graph is already open"));
        }
        let component = self.component();
        let graph = open_graph(&component, &self.inner.registry, None, None, configure)?;
        debug!(application = %self.inner.name, "root graph opened");
        *root = Some(graph.clone());
        Ok(graph)
    }

    /// The root graph while it is open.
    pub fn graph(&self) -> Option<Graph> {
        let mut root = self
            .inner
            .root
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match &*root {
            Some(graph) if graph.is_open() => Some(graph.clone()),
            // A graph closed directly leaves a stale slot behind.
            Some(_) => {
                *root = None;
                None
            }
            None => None,
        }
    }

    /// The root graph, opening it first if necessary.
    pub fn get_or_open(&self) -> Result<Graph> {
        if let Some(graph) = self.graph() {
            return Ok(graph);
        }
        match self.open() {
            Ok(graph) => Ok(graph),
            // Lost the race to another opener.
            Err(Error::InvalidState { .. }) => self
                .graph()
                .ok_or_else(|| Error::invalid_state("root graph closed while opening")),
            Err(error) => Err(error),
        }
    }

    /// Close the root graph. Fails when it is not open.
    pub fn close(&self) -> Result<()> {
        if self.close_if_open() {
            Ok(())
        } else {
            Err(Error::GraphClosed)
        }
    }

    /// Close the root graph unless it is not open. Returns true when this
    /// call performed the close.
    pub fn close_if_open(&self) -> bool {
        let graph = {
            let mut root = self
                .inner
                .root
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            root.take()
        };
        match graph {
            Some(graph) => graph.close_if_open(),
            None => false,
        }
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.inner.name)
            .field("open", &self.graph().is_some())
            .finish()
    }
}
