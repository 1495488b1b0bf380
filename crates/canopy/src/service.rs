//! Unbound service entries
//!
//! An unbound service is what a [`Component`](crate::Component) declaration
//! owns: a factory block plus scope policy (or a constant), not yet tied to a
//! graph. Binding to a [`Graph`](crate::Graph) produces the per-graph
//! [`BoundService`](crate::bound::BoundService) that carries cache state.

use std::any::Any;
use std::sync::Arc;

use crate::bound::{
    BoundFactoryService, BoundMultitonService, BoundPrototypeService, BoundService,
    BoundSingletonService,
};
use crate::error::Result;
use crate::graph::Graph;
use crate::key::TypeKey;
use crate::scope::Scope;

/// Type-erased instance handed across the evaluator and plugin boundary.
pub type DynInstance = Arc<dyn Any + Send + Sync>;

/// Factory block for an argument-less service.
pub type FactoryFn<R> = Box<dyn Fn(&Graph) -> Result<R> + Send + Sync>;

/// Factory block for a single-argument service.
pub type ArgFactoryFn<A, R> = Box<dyn Fn(&Graph, A) -> Result<R> + Send + Sync>;

/// Post-construct or dispose callback for an argument-less service.
pub type CallbackFn<R> = Box<dyn Fn(&Graph, &R) + Send + Sync>;

/// Post-construct or dispose callback for a single-argument service.
pub type ArgCallbackFn<A, R> = Box<dyn Fn(&Graph, &A, &R) + Send + Sync>;

/// A service entry registered in a component declaration.
pub trait UnboundService: Send + Sync {
    /// The key this entry is registered under.
    fn key(&self) -> &TypeKey;

    /// The scope policy of this entry.
    fn scope(&self) -> Scope;

    /// True if this entry declares a post-construct or dispose hook.
    ///
    /// Component builders aggregate this into the declaration's
    /// "requires lifecycle callbacks" flag.
    fn requires_lifecycle(&self) -> bool;

    /// Produce the per-graph binding of this entry.
    fn bind(self: Arc<Self>) -> Arc<dyn BoundService>;
}

/// Prototype-scoped entry: the factory runs on every resolution.
pub(crate) struct UnboundPrototypeService<R: Clone + Send + Sync + 'static> {
    pub(crate) key: TypeKey,
    pub(crate) factory: FactoryFn<R>,
    pub(crate) post_construct: Option<CallbackFn<R>>,
}

impl<R: Clone + Send + Sync + 'static> UnboundService for UnboundPrototypeService<R> {
    fn key(&self) -> &TypeKey {
        &self.key
    }

    fn scope(&self) -> Scope {
        Scope::Prototype
    }

    fn requires_lifecycle(&self) -> bool {
        self.post_construct.is_some()
    }

    fn bind(self: Arc<Self>) -> Arc<dyn BoundService> {
        Arc::new(BoundPrototypeService::new(self))
    }
}

/// Singleton-scoped entry; also used for eager singletons.
pub(crate) struct UnboundSingletonService<R: Clone + Send + Sync + 'static> {
    pub(crate) key: TypeKey,
    pub(crate) eager: bool,
    pub(crate) factory: FactoryFn<R>,
    pub(crate) post_construct: Option<CallbackFn<R>>,
    pub(crate) dispose: Option<CallbackFn<R>>,
}

impl<R: Clone + Send + Sync + 'static> UnboundService for UnboundSingletonService<R> {
    fn key(&self) -> &TypeKey {
        &self.key
    }

    fn scope(&self) -> Scope {
        if self.eager {
            Scope::EagerSingleton
        } else {
            Scope::Singleton
        }
    }

    fn requires_lifecycle(&self) -> bool {
        self.post_construct.is_some() || self.dispose.is_some()
    }

    fn bind(self: Arc<Self>) -> Arc<dyn BoundService> {
        Arc::new(BoundSingletonService::new(self))
    }
}

/// Single-argument factory entry, prototype semantics per call.
pub(crate) struct UnboundFactoryService<A, R>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub(crate) key: TypeKey,
    pub(crate) factory: ArgFactoryFn<A, R>,
    pub(crate) post_construct: Option<ArgCallbackFn<A, R>>,
}

impl<A, R> UnboundService for UnboundFactoryService<A, R>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn key(&self) -> &TypeKey {
        &self.key
    }

    fn scope(&self) -> Scope {
        Scope::Prototype
    }

    fn requires_lifecycle(&self) -> bool {
        self.post_construct.is_some()
    }

    fn bind(self: Arc<Self>) -> Arc<dyn BoundService> {
        Arc::new(BoundFactoryService::new(self))
    }
}

/// Single-argument factory entry memoized per argument.
pub(crate) struct UnboundMultitonService<A, R>
where
    A: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub(crate) key: TypeKey,
    pub(crate) factory: ArgFactoryFn<A, R>,
    pub(crate) post_construct: Option<ArgCallbackFn<A, R>>,
    pub(crate) dispose: Option<ArgCallbackFn<A, R>>,
}

impl<A, R> UnboundService for UnboundMultitonService<A, R>
where
    A: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn key(&self) -> &TypeKey {
        &self.key
    }

    fn scope(&self) -> Scope {
        Scope::Multiton
    }

    fn requires_lifecycle(&self) -> bool {
        self.post_construct.is_some() || self.dispose.is_some()
    }

    fn bind(self: Arc<Self>) -> Arc<dyn BoundService> {
        Arc::new(BoundMultitonService::new(self))
    }
}

/// Precomputed constant entry.
///
/// A constant is its own binding: resolution returns the stored value without
/// going through the evaluator, so constants never trigger cycle checks or
/// post-construct callbacks.
pub(crate) struct ConstantService<R: Clone + Send + Sync + 'static> {
    pub(crate) key: TypeKey,
    pub(crate) value: Arc<R>,
}

impl<R: Clone + Send + Sync + 'static> UnboundService for ConstantService<R> {
    fn key(&self) -> &TypeKey {
        &self.key
    }

    fn scope(&self) -> Scope {
        Scope::Singleton
    }

    fn requires_lifecycle(&self) -> bool {
        false
    }

    fn bind(self: Arc<Self>) -> Arc<dyn BoundService> {
        self
    }
}

impl<R: Clone + Send + Sync + 'static> BoundService for ConstantService<R> {
    fn key(&self) -> &TypeKey {
        &self.key
    }

    fn scope(&self) -> Scope {
        Scope::Singleton
    }

    fn instance_any(
        self: Arc<Self>,
        _graph: &Graph,
        _argument: Option<DynInstance>,
    ) -> Result<DynInstance> {
        Ok(self.value.clone())
    }

    fn new_instance(
        &self,
        _graph: &Graph,
        _argument: Option<&DynInstance>,
    ) -> Result<crate::bound::Evaluated> {
        Err(crate::error::Error::internal(
            "constant services are never evaluated",
        ))
    }

    fn post_construct(&self, _graph: &Graph, _argument: Option<&DynInstance>, _instance: &DynInstance) {}

    fn close(&self, _graph: &Graph) {}
}
