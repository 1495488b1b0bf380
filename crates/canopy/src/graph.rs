//! Dependency graphs
//!
//! A [`Graph`] is a live instantiation of a [`Component`] declaration: it
//! caches bound services, answers typed resolution, delegates misses to its
//! parent, and owns the subgraphs opened from its subcomponent declarations.
//! Graphs are cheap to clone and safe to share across threads.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use crate::bound::{downcast_instance, BoundService};
use crate::component::{Component, ComponentBuilder};
use crate::error::{Error, Result};
use crate::key::{Qualifier, TypeKey};
use crate::plugin::{Plugin, PluginRegistry};
use crate::registry::KeyedRegistry;
use crate::service::DynInstance;

enum GraphState {
    Open {
        /// Bound services created from this graph's declaration, by key.
        cache: KeyedRegistry<Arc<dyn BoundService>>,
        /// Open subgraphs in opening order, keyed by identifier.
        children: Vec<(Qualifier, Graph)>,
    },
    Closed,
}

struct GraphInner {
    component: Component,
    parent: Option<Graph>,
    /// Identifier this graph is registered under in its parent.
    identifier: Option<Qualifier>,
    /// Registry used when opening subgraphs; plugin hooks run against the
    /// `plugins` snapshot taken when this graph opened.
    registry: Arc<PluginRegistry>,
    plugins: Arc<Vec<Arc<dyn Plugin>>>,
    /// True when instances need post-construct bookkeeping, either because
    /// the declaration registers callbacks or because plugins are present.
    needs_lifecycle: bool,
    /// Set once when close begins; makes close idempotent.
    disposing: AtomicBool,
    state: Mutex<GraphState>,
}

/// A live dependency graph.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

/// Ad-hoc builder block applied while a graph opens.
pub type Configure<'a> = Box<dyn FnOnce(&mut ComponentBuilder) -> Result<()> + 'a>;

pub(crate) fn open_graph(
    component: &Component,
    registry: &Arc<PluginRegistry>,
    parent: Option<Graph>,
    identifier: Option<Qualifier>,
    configure: Option<Configure<'_>>,
) -> Result<Graph> {
    let plugins = registry.snapshot();

    // Plugins and ad-hoc configuration both extend the declaration through a
    // derived builder; plain opens skip the derive.
    let component = if plugins.is_empty() && configure.is_none() {
        component.clone()
    } else {
        component.derive(|builder| {
            for plugin in plugins.iter() {
                plugin.graph_initializing(parent.as_ref(), builder)?;
            }
            if let Some(configure) = configure {
                configure(builder)?;
            }
            Ok(())
        })?
    };

    let needs_lifecycle = component.requires_lifecycle() || !plugins.is_empty();
    let cache = KeyedRegistry::with_capacity(component.len());
    let graph = Graph {
        inner: Arc::new(GraphInner {
            component,
            parent,
            identifier,
            registry: registry.clone(),
            plugins,
            needs_lifecycle,
            disposing: AtomicBool::new(false),
            state: Mutex::new(GraphState::Open {
                cache,
                children: Vec::new(),
            }),
        }),
    };

    if let Err(error) = graph.initialize_eager_services() {
        graph.close_if_open();
        return Err(error);
    }

    for plugin in graph.inner.plugins.iter() {
        plugin.graph_initialized(&graph);
    }

    debug!(qualifier = %graph.inner.component.qualifier(), "opened graph");
    Ok(graph)
}

impl Graph {
    /// The declaration this graph was opened from.
    pub fn component(&self) -> &Component {
        &self.inner.component
    }

    /// The parent graph, if this is a subgraph.
    pub fn parent(&self) -> Option<&Graph> {
        self.inner.parent.as_ref()
    }

    /// The identifier this subgraph is registered under in its parent.
    pub fn identifier(&self) -> Option<&Qualifier> {
        self.inner.identifier.as_ref()
    }

    /// True until `close` has completed.
    pub fn is_open(&self) -> bool {
        matches!(*self.lock_state(), GraphState::Open { .. })
    }

    /// True once `close` has completed.
    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }

    /// Identity comparison; clones of the same graph compare equal.
    pub fn ptr_eq(&self, other: &Graph) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable identity for in-flight resolution tracking.
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn needs_lifecycle(&self) -> bool {
        self.inner.needs_lifecycle
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, GraphState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ---- resolution -----------------------------------------------------

    /// Resolve an instance of `R`.
    pub fn instance<R: Clone + Send + Sync + 'static>(&self) -> Result<R> {
        self.typed_instance(&TypeKey::of::<R>(), None)
    }

    /// Resolve an instance of `R` registered under a qualifier.
    pub fn instance_qualified<R: Clone + Send + Sync + 'static>(
        &self,
        qualifier: impl Into<Qualifier>,
    ) -> Result<R> {
        self.typed_instance(&TypeKey::of_qualified::<R>(qualifier), None)
    }

    /// Resolve an instance of `R`, or `None` when nothing is registered.
    ///
    /// Only the top-level miss maps to `None`; failures inside factory
    /// blocks still surface as errors.
    pub fn instance_or_none<R: Clone + Send + Sync + 'static>(&self) -> Result<Option<R>> {
        flatten_not_found(self.instance::<R>())
    }

    /// Qualified variant of [`Graph::instance_or_none`].
    pub fn instance_or_none_qualified<R: Clone + Send + Sync + 'static>(
        &self,
        qualifier: impl Into<Qualifier>,
    ) -> Result<Option<R>> {
        flatten_not_found(self.instance_qualified::<R>(qualifier))
    }

    /// Resolve through a single-argument factory registered as `(A) -> R`.
    pub fn factory_instance<A, R>(&self, argument: A) -> Result<R>
    where
        A: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
    {
        self.typed_instance(&TypeKey::compound::<A, R>(), Some(Arc::new(argument)))
    }

    /// Qualified variant of [`Graph::factory_instance`].
    pub fn factory_instance_qualified<A, R>(
        &self,
        qualifier: impl Into<Qualifier>,
        argument: A,
    ) -> Result<R>
    where
        A: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
    {
        self.typed_instance(
            &TypeKey::compound_qualified::<A, R>(qualifier),
            Some(Arc::new(argument)),
        )
    }

    /// A deferred handle resolving `R` on demand.
    ///
    /// The registration is checked now; the instance is produced on each
    /// `get`.
    pub fn provider<R: Clone + Send + Sync + 'static>(&self) -> Result<Provider<R>> {
        self.provider_for(TypeKey::of::<R>())
    }

    /// Qualified variant of [`Graph::provider`].
    pub fn provider_qualified<R: Clone + Send + Sync + 'static>(
        &self,
        qualifier: impl Into<Qualifier>,
    ) -> Result<Provider<R>> {
        self.provider_for(TypeKey::of_qualified::<R>(qualifier))
    }

    fn provider_for<R: Clone + Send + Sync + 'static>(
        &self,
        key: TypeKey,
    ) -> Result<Provider<R>> {
        self.lookup(&key)?;
        Ok(Provider {
            graph: self.clone(),
            key,
            _marker: PhantomData,
        })
    }

    /// A deferred handle invoking a registered `(A) -> R` factory.
    pub fn factory<A, R>(&self) -> Result<FactoryHandle<A, R>>
    where
        A: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
    {
        let key = TypeKey::compound::<A, R>();
        self.lookup(&key)?;
        Ok(FactoryHandle {
            graph: self.clone(),
            key,
            _marker: PhantomData,
        })
    }

    /// Resolve every registration of `R` across this graph and its
    /// ancestors, regardless of qualifier.
    ///
    /// A key declared in both a graph and an ancestor resolves once, from
    /// the nearest declaration.
    pub fn instances_of_type<R: Clone + Send + Sync + 'static>(&self) -> Result<Vec<R>> {
        let keys = self.keys_of_type::<R>();
        let mut instances = Vec::with_capacity(keys.len());
        for key in keys {
            instances.push(self.typed_instance::<R>(&key, None)?);
        }
        Ok(instances)
    }

    /// Deferred handles for every registration of `R`, see
    /// [`Graph::instances_of_type`].
    pub fn providers_of_type<R: Clone + Send + Sync + 'static>(&self) -> Vec<Provider<R>> {
        self.keys_of_type::<R>()
            .into_iter()
            .map(|key| Provider {
                graph: self.clone(),
                key,
                _marker: PhantomData,
            })
            .collect()
    }

    fn keys_of_type<R: 'static>(&self) -> Vec<TypeKey> {
        let probe = TypeKey::of::<R>();
        let mut keys: Vec<TypeKey> = Vec::new();
        let mut current = Some(self.clone());
        while let Some(graph) = current {
            graph.inner.component.for_each_entry(|key, _| {
                if key.type_matches(&probe) && !keys.contains(key) {
                    keys.push(key.clone());
                }
            });
            current = graph.inner.parent.clone();
        }
        keys
    }

    fn typed_instance<R: Clone + Send + Sync + 'static>(
        &self,
        key: &TypeKey,
        argument: Option<DynInstance>,
    ) -> Result<R> {
        let (graph, service) = self.lookup(key)?;
        let instance = service.instance_any(&graph, argument)?;
        downcast_instance::<R>(key, &instance)
    }

    /// Find the bound service for `key` in this graph or the nearest
    /// ancestor declaring it. Instances are cached in the declaring graph,
    /// so a singleton reached from several subgraphs stays one instance.
    fn lookup(&self, key: &TypeKey) -> Result<(Graph, Arc<dyn BoundService>)> {
        let mut current = Some(self.clone());
        while let Some(graph) = current {
            if let Some(service) = graph.bound_service(key)? {
                return Ok((graph, service));
            }
            current = graph.inner.parent.clone();
        }
        Err(Error::EntryNotFound { key: key.clone() })
    }

    fn bound_service(&self, key: &TypeKey) -> Result<Option<Arc<dyn BoundService>>> {
        let mut state = self.lock_state();
        let GraphState::Open { cache, .. } = &mut *state else {
            return Err(Error::GraphClosed);
        };
        if let Some(service) = cache.get(key) {
            return Ok(Some(service.clone()));
        }
        match self.inner.component.service(key) {
            Some(unbound) => {
                let bound = unbound.bind();
                cache.put(key.clone(), bound.clone());
                Ok(Some(bound))
            }
            None => Ok(None),
        }
    }

    fn initialize_eager_services(&self) -> Result<()> {
        for key in self.inner.component.eager_keys() {
            trace!(key = %key, "initializing eager singleton");
            let (graph, service) = self.lookup(key)?;
            service.instance_any(&graph, None)?;
        }
        Ok(())
    }

    pub(crate) fn notify_post_construct(
        &self,
        service: &dyn BoundService,
        argument: Option<&DynInstance>,
        instance: &DynInstance,
    ) {
        service.post_construct(self, argument, instance);
        for plugin in self.inner.plugins.iter() {
            plugin.post_construct(self, service.scope(), argument, instance);
        }
    }

    // ---- subgraphs ------------------------------------------------------

    /// Open the subcomponent declared under `qualifier` as a child graph,
    /// registered under the same identifier.
    ///
    /// Fails when a child with that identifier is already open.
    pub fn open_subgraph(&self, qualifier: impl Into<Qualifier>) -> Result<Graph> {
        let qualifier = qualifier.into();
        self.open_subgraph_with(qualifier.clone(), Some(qualifier), None)
    }

    /// Open the subcomponent declared under `qualifier`, registered under a
    /// distinct identifier so the same declaration can back several children.
    pub fn open_subgraph_as(
        &self,
        qualifier: impl Into<Qualifier>,
        identifier: impl Into<Qualifier>,
    ) -> Result<Graph> {
        self.open_subgraph_with(qualifier.into(), Some(identifier.into()), None)
    }

    /// Full form of subgraph opening: explicit identifier and an ad-hoc
    /// builder block extending the subcomponent declaration for this child
    /// only.
    pub fn open_subgraph_with(
        &self,
        qualifier: Qualifier,
        identifier: Option<Qualifier>,
        configure: Option<Configure<'_>>,
    ) -> Result<Graph> {
        let component = self.find_subcomponent(&qualifier)?;
        let identifier = identifier.unwrap_or(qualifier);

        {
            let state = self.lock_state();
            let GraphState::Open { children, .. } = &*state else {
                return Err(Error::GraphClosed);
            };
            if children.iter().any(|(declared, _)| *declared == identifier) {
                return Err(Error::SubgraphAlreadyOpen { identifier });
            }
        }

        // The state lock is not held while the child opens; eager services
        // and plugin hooks may resolve through this graph.
        let child = open_graph(
            &component,
            &self.inner.registry,
            Some(self.clone()),
            Some(identifier.clone()),
            configure,
        )?;

        let mut state = self.lock_state();
        let GraphState::Open { children, .. } = &mut *state else {
            drop(state);
            child.close_if_open();
            return Err(Error::GraphClosed);
        };
        if children.iter().any(|(declared, _)| *declared == identifier) {
            drop(state);
            child.close_if_open();
            return Err(Error::SubgraphAlreadyOpen { identifier });
        }
        children.push((identifier, child.clone()));
        Ok(child)
    }

    /// The open child registered under `identifier`, or open it from the
    /// same-named subcomponent declaration.
    pub fn get_or_open_subgraph(&self, qualifier: impl Into<Qualifier>) -> Result<Graph> {
        let qualifier = qualifier.into();
        loop {
            if let Some(existing) = self.subgraph(&qualifier) {
                return Ok(existing);
            }
            match self.open_subgraph(qualifier.clone()) {
                Ok(child) => return Ok(child),
                // Lost the race to another opener; pick up their child.
                Err(Error::SubgraphAlreadyOpen { .. }) => continue,
                Err(error) => return Err(error),
            }
        }
    }

    /// The open child registered under `identifier`, if any.
    pub fn subgraph(&self, identifier: &Qualifier) -> Option<Graph> {
        match &*self.lock_state() {
            GraphState::Open { children, .. } => children
                .iter()
                .find(|(declared, _)| declared == identifier)
                .map(|(_, child)| child.clone()),
            GraphState::Closed => None,
        }
    }

    /// Close the child registered under `identifier`. Returns false when no
    /// such child is open.
    pub fn close_subgraph(&self, identifier: &Qualifier) -> bool {
        match self.subgraph(identifier) {
            Some(child) => child.close_if_open(),
            None => false,
        }
    }

    fn find_subcomponent(&self, qualifier: &Qualifier) -> Result<Component> {
        let mut current = Some(self.clone());
        while let Some(graph) = current {
            if let Some(component) = graph.inner.component.subcomponent(qualifier) {
                return Ok(component);
            }
            current = graph.inner.parent.clone();
        }
        Err(Error::SubcomponentNotFound {
            qualifier: qualifier.clone(),
        })
    }

    // ---- teardown -------------------------------------------------------

    /// Close this graph: close children depth-first, run plugin close hooks,
    /// dispose cached services, then detach from the parent.
    ///
    /// Fails when the graph is already closed.
    pub fn close(&self) -> Result<()> {
        if self.close_if_open() {
            Ok(())
        } else {
            Err(Error::GraphClosed)
        }
    }

    /// Close unless already closed. Returns true when this call performed
    /// the close.
    pub fn close_if_open(&self) -> bool {
        if self.inner.disposing.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!(qualifier = %self.inner.component.qualifier(), "closing graph");

        // Children first, in opening order. The vec is taken under the lock
        // so closing children never re-enters it through detach.
        let children = {
            let mut state = self.lock_state();
            match &mut *state {
                GraphState::Open { children, .. } => std::mem::take(children),
                GraphState::Closed => Vec::new(),
            }
        };
        for (_, child) in children {
            child.close_if_open();
        }

        // Plugins see the graph while it still resolves.
        for plugin in self.inner.plugins.iter() {
            plugin.graph_close(self);
        }

        // Dispose cached services before the state flips, then mark closed.
        let services = {
            let mut state = self.lock_state();
            match &mut *state {
                GraphState::Open { cache, .. } => {
                    let mut services = Vec::with_capacity(cache.len());
                    cache.for_each(|_, service| services.push(service.clone()));
                    services
                }
                GraphState::Closed => Vec::new(),
            }
        };
        for service in services {
            service.close(self);
        }
        *self.lock_state() = GraphState::Closed;

        if let Some(parent) = &self.inner.parent {
            let mut state = parent.lock_state();
            if let GraphState::Open { children, .. } = &mut *state {
                children.retain(|(_, child)| !child.ptr_eq(self));
            }
        }
        true
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("qualifier", self.inner.component.qualifier())
            .field("identifier", &self.inner.identifier)
            .field("open", &self.is_open())
            .finish()
    }
}

fn flatten_not_found<R>(result: Result<R>) -> Result<Option<R>> {
    match result {
        Ok(instance) => Ok(Some(instance)),
        Err(error) if error.is_not_found() => Ok(None),
        Err(error) => Err(error),
    }
}

/// Deferred resolution handle for a single registration.
pub struct Provider<R> {
    graph: Graph,
    key: TypeKey,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Clone + Send + Sync + 'static> Provider<R> {
    /// Resolve now, honoring the registration's scope.
    pub fn get(&self) -> Result<R> {
        self.graph.typed_instance(&self.key, None)
    }

    /// The key this provider resolves.
    pub fn key(&self) -> &TypeKey {
        &self.key
    }
}

impl<R> std::fmt::Debug for Provider<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("graph", &self.graph)
            .field("key", &self.key)
            .finish()
    }
}

impl<R> Clone for Provider<R> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

/// Deferred handle for a registered `(A) -> R` factory.
pub struct FactoryHandle<A, R> {
    graph: Graph,
    key: TypeKey,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R> FactoryHandle<A, R>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Invoke the factory with `argument`.
    pub fn call(&self, argument: A) -> Result<R> {
        self.graph
            .typed_instance(&self.key, Some(Arc::new(argument)))
    }
}

impl<A, R> Clone for FactoryHandle<A, R> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}
