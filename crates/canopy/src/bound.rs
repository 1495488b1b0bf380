//! Bound service entries
//!
//! A bound service is the per-graph form of a registered entry. It owns
//! whatever cache state its scope needs (none for prototypes, a slot for
//! singletons, a per-argument map for multitons) and knows how to run its
//! factory and lifecycle callbacks against type-erased instances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::evaluator;
use crate::graph::Graph;
use crate::key::TypeKey;
use crate::scope::Scope;
use crate::service::{
    DynInstance, UnboundFactoryService, UnboundMultitonService, UnboundPrototypeService,
    UnboundSingletonService,
};

/// Outcome of a factory invocation.
pub struct Evaluated {
    /// The produced (or cached) instance.
    pub instance: DynInstance,
    /// False when a memoizing scope answered from its cache, in which case
    /// post-construct callbacks must not fire again.
    pub fresh: bool,
}

/// A service entry bound to a graph.
pub trait BoundService: Send + Sync {
    /// The key this entry is registered under.
    fn key(&self) -> &TypeKey;

    /// The scope policy of this entry.
    fn scope(&self) -> Scope;

    /// Resolve an instance, consulting the scope cache before going through
    /// the evaluator.
    fn instance_any(
        self: Arc<Self>,
        graph: &Graph,
        argument: Option<DynInstance>,
    ) -> Result<DynInstance>;

    /// Run the factory. Called by the evaluator inside an in-flight frame;
    /// never call directly.
    fn new_instance(&self, graph: &Graph, argument: Option<&DynInstance>) -> Result<Evaluated>;

    /// Run the registered post-construct callback, if any.
    fn post_construct(&self, graph: &Graph, argument: Option<&DynInstance>, instance: &DynInstance);

    /// Dispose cached instances on graph close.
    fn close(&self, graph: &Graph);
}

pub(crate) fn downcast_instance<R: Clone + Send + Sync + 'static>(
    key: &TypeKey,
    instance: &DynInstance,
) -> Result<R> {
    instance
        .downcast_ref::<R>()
        .cloned()
        .ok_or_else(|| Error::internal(format!("instance for `{key}` has an unexpected type")))
}

fn downcast_argument<'a, A: 'static>(
    key: &TypeKey,
    argument: Option<&'a DynInstance>,
) -> Result<&'a A> {
    argument
        .and_then(|argument| argument.downcast_ref::<A>())
        .ok_or_else(|| Error::internal(format!("argument for `{key}` has an unexpected type")))
}

pub(crate) struct BoundPrototypeService<R: Clone + Send + Sync + 'static> {
    unbound: Arc<UnboundPrototypeService<R>>,
}

impl<R: Clone + Send + Sync + 'static> BoundPrototypeService<R> {
    pub(crate) fn new(unbound: Arc<UnboundPrototypeService<R>>) -> Self {
        Self { unbound }
    }
}

impl<R: Clone + Send + Sync + 'static> BoundService for BoundPrototypeService<R> {
    fn key(&self) -> &TypeKey {
        &self.unbound.key
    }

    fn scope(&self) -> Scope {
        Scope::Prototype
    }

    fn instance_any(
        self: Arc<Self>,
        graph: &Graph,
        argument: Option<DynInstance>,
    ) -> Result<DynInstance> {
        evaluator::evaluate(self, graph, argument)
    }

    fn new_instance(&self, graph: &Graph, _argument: Option<&DynInstance>) -> Result<Evaluated> {
        let value = (self.unbound.factory)(graph)?;
        Ok(Evaluated {
            instance: Arc::new(value),
            fresh: true,
        })
    }

    fn post_construct(
        &self,
        graph: &Graph,
        _argument: Option<&DynInstance>,
        instance: &DynInstance,
    ) {
        if let (Some(callback), Some(value)) =
            (&self.unbound.post_construct, instance.downcast_ref::<R>())
        {
            callback(graph, value);
        }
    }

    fn close(&self, _graph: &Graph) {}
}

pub(crate) struct BoundSingletonService<R: Clone + Send + Sync + 'static> {
    unbound: Arc<UnboundSingletonService<R>>,
    /// Serializes factory invocation so the factory runs at most once.
    /// Nested resolution of the same key on the same thread is rejected by
    /// the evaluator's cycle check before this lock is reached.
    creation: Mutex<()>,
    cached: RwLock<Option<DynInstance>>,
}

impl<R: Clone + Send + Sync + 'static> BoundSingletonService<R> {
    pub(crate) fn new(unbound: Arc<UnboundSingletonService<R>>) -> Self {
        Self {
            unbound,
            creation: Mutex::new(()),
            cached: RwLock::new(None),
        }
    }

    fn cached_instance(&self) -> Option<DynInstance> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<R: Clone + Send + Sync + 'static> BoundService for BoundSingletonService<R> {
    fn key(&self) -> &TypeKey {
        &self.unbound.key
    }

    fn scope(&self) -> Scope {
        if self.unbound.eager {
            Scope::EagerSingleton
        } else {
            Scope::Singleton
        }
    }

    fn instance_any(
        self: Arc<Self>,
        graph: &Graph,
        argument: Option<DynInstance>,
    ) -> Result<DynInstance> {
        if let Some(cached) = self.cached_instance() {
            return Ok(cached);
        }
        evaluator::evaluate(self, graph, argument)
    }

    fn new_instance(&self, graph: &Graph, _argument: Option<&DynInstance>) -> Result<Evaluated> {
        let _guard = self
            .creation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Another thread may have won the race while this one waited.
        if let Some(cached) = self.cached_instance() {
            return Ok(Evaluated {
                instance: cached,
                fresh: false,
            });
        }
        let value = (self.unbound.factory)(graph)?;
        let instance: DynInstance = Arc::new(value);
        *self
            .cached
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(instance.clone());
        Ok(Evaluated {
            instance,
            fresh: true,
        })
    }

    fn post_construct(
        &self,
        graph: &Graph,
        _argument: Option<&DynInstance>,
        instance: &DynInstance,
    ) {
        if let (Some(callback), Some(value)) =
            (&self.unbound.post_construct, instance.downcast_ref::<R>())
        {
            callback(graph, value);
        }
    }

    fn close(&self, graph: &Graph) {
        let cached = self
            .cached
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(callback), Some(instance)) = (&self.unbound.dispose, cached) {
            if let Some(value) = instance.downcast_ref::<R>() {
                callback(graph, value);
            }
        }
    }
}

pub(crate) struct BoundFactoryService<A, R>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    unbound: Arc<UnboundFactoryService<A, R>>,
}

impl<A, R> BoundFactoryService<A, R>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(unbound: Arc<UnboundFactoryService<A, R>>) -> Self {
        Self { unbound }
    }
}

impl<A, R> BoundService for BoundFactoryService<A, R>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn key(&self) -> &TypeKey {
        &self.unbound.key
    }

    fn scope(&self) -> Scope {
        Scope::Prototype
    }

    fn instance_any(
        self: Arc<Self>,
        graph: &Graph,
        argument: Option<DynInstance>,
    ) -> Result<DynInstance> {
        evaluator::evaluate(self, graph, argument)
    }

    fn new_instance(&self, graph: &Graph, argument: Option<&DynInstance>) -> Result<Evaluated> {
        let argument = downcast_argument::<A>(&self.unbound.key, argument)?;
        let value = (self.unbound.factory)(graph, argument.clone())?;
        Ok(Evaluated {
            instance: Arc::new(value),
            fresh: true,
        })
    }

    fn post_construct(
        &self,
        graph: &Graph,
        argument: Option<&DynInstance>,
        instance: &DynInstance,
    ) {
        let Some(callback) = &self.unbound.post_construct else {
            return;
        };
        let argument = argument.and_then(|argument| argument.downcast_ref::<A>());
        if let (Some(argument), Some(value)) = (argument, instance.downcast_ref::<R>()) {
            callback(graph, argument, value);
        }
    }

    fn close(&self, _graph: &Graph) {}
}

pub(crate) struct BoundMultitonService<A, R>
where
    A: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    unbound: Arc<UnboundMultitonService<A, R>>,
    /// Serializes factory invocation per service, like the singleton lock.
    creation: Mutex<()>,
    cached: RwLock<HashMap<A, DynInstance>>,
}

impl<A, R> BoundMultitonService<A, R>
where
    A: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(unbound: Arc<UnboundMultitonService<A, R>>) -> Self {
        Self {
            unbound,
            creation: Mutex::new(()),
            cached: RwLock::new(HashMap::new()),
        }
    }

    fn cached_instance(&self, argument: &A) -> Option<DynInstance> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(argument)
            .cloned()
    }
}

impl<A, R> BoundService for BoundMultitonService<A, R>
where
    A: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn key(&self) -> &TypeKey {
        &self.unbound.key
    }

    fn scope(&self) -> Scope {
        Scope::Multiton
    }

    fn instance_any(
        self: Arc<Self>,
        graph: &Graph,
        argument: Option<DynInstance>,
    ) -> Result<DynInstance> {
        let typed = downcast_argument::<A>(&self.unbound.key, argument.as_ref())?;
        if let Some(cached) = self.cached_instance(typed) {
            return Ok(cached);
        }
        evaluator::evaluate(self, graph, argument)
    }

    fn new_instance(&self, graph: &Graph, argument: Option<&DynInstance>) -> Result<Evaluated> {
        let argument = downcast_argument::<A>(&self.unbound.key, argument)?;
        let _guard = self
            .creation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = self.cached_instance(argument) {
            return Ok(Evaluated {
                instance: cached,
                fresh: false,
            });
        }
        let value = (self.unbound.factory)(graph, argument.clone())?;
        let instance: DynInstance = Arc::new(value);
        self.cached
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(argument.clone(), instance.clone());
        Ok(Evaluated {
            instance,
            fresh: true,
        })
    }

    fn post_construct(
        &self,
        graph: &Graph,
        argument: Option<&DynInstance>,
        instance: &DynInstance,
    ) {
        let Some(callback) = &self.unbound.post_construct else {
            return;
        };
        let argument = argument.and_then(|argument| argument.downcast_ref::<A>());
        if let (Some(argument), Some(value)) = (argument, instance.downcast_ref::<R>()) {
            callback(graph, argument, value);
        }
    }

    fn close(&self, graph: &Graph) {
        let cached = std::mem::take(
            &mut *self
                .cached
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let Some(callback) = &self.unbound.dispose else {
            return;
        };
        for (argument, instance) in cached {
            if let Some(value) = instance.downcast_ref::<R>() {
                callback(graph, &argument, value);
            }
        }
    }
}
