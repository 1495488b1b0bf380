//! Component declarations
//!
//! A [`Component`] is the immutable registration set a graph is opened from:
//! service entries keyed by [`TypeKey`], subcomponent declarations keyed by
//! qualifier, and the precomputed bookkeeping graphs need (eager keys,
//! whether any entry carries lifecycle callbacks). Declarations are built
//! through [`ComponentBuilder`], frozen by `build`, and shared by cheap
//! clone.

use std::hash::Hash;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::key::{Qualifier, TypeKey};
use crate::registry::KeyedRegistry;
use crate::scope::Scope;
use crate::service::{
    ArgCallbackFn, CallbackFn, ConstantService, UnboundFactoryService, UnboundMultitonService,
    UnboundPrototypeService, UnboundService, UnboundSingletonService,
};

/// How `include` treats the subcomponents of the included declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubcomponentIncludeMode {
    /// Ignore the included declaration's subcomponents entirely.
    DoNotInclude,
    /// Include only subcomponents whose qualifier is not already declared.
    DoNotIncludeIfAlreadyPresent,
    /// Replace same-qualifier subcomponents with the included ones.
    Replace,
    /// Merge same-qualifier subcomponents entry by entry, recursively.
    Merge,
}

/// Registration options for argument-less services.
pub struct ServiceOptions<R> {
    qualifier: Option<Qualifier>,
    override_existing: bool,
    post_construct: Option<CallbackFn<R>>,
    dispose: Option<CallbackFn<R>>,
}

impl<R> Default for ServiceOptions<R> {
    fn default() -> Self {
        Self {
            qualifier: None,
            override_existing: false,
            post_construct: None,
            dispose: None,
        }
    }
}

impl<R> ServiceOptions<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under a qualifier instead of the bare type.
    pub fn with_qualifier(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Replace an existing registration under the same key instead of
    /// failing.
    pub fn with_override(mut self, override_existing: bool) -> Self {
        self.override_existing = override_existing;
        self
    }

    /// Callback fired after the instance and its dependency subtree exist.
    pub fn on_post_construct(
        mut self,
        callback: impl Fn(&Graph, &R) + Send + Sync + 'static,
    ) -> Self {
        self.post_construct = Some(Box::new(callback));
        self
    }

    /// Callback fired for cached instances when the graph closes.
    ///
    /// Only memoizing scopes accept one; prototype registration with a
    /// dispose callback is rejected.
    pub fn on_dispose(mut self, callback: impl Fn(&Graph, &R) + Send + Sync + 'static) -> Self {
        self.dispose = Some(Box::new(callback));
        self
    }
}

/// Registration options for single-argument factories and multitons.
pub struct FactoryOptions<A, R> {
    qualifier: Option<Qualifier>,
    override_existing: bool,
    post_construct: Option<ArgCallbackFn<A, R>>,
    dispose: Option<ArgCallbackFn<A, R>>,
}

impl<A, R> Default for FactoryOptions<A, R> {
    fn default() -> Self {
        Self {
            qualifier: None,
            override_existing: false,
            post_construct: None,
            dispose: None,
        }
    }
}

impl<A, R> FactoryOptions<A, R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    pub fn with_override(mut self, override_existing: bool) -> Self {
        self.override_existing = override_existing;
        self
    }

    pub fn on_post_construct(
        mut self,
        callback: impl Fn(&Graph, &A, &R) + Send + Sync + 'static,
    ) -> Self {
        self.post_construct = Some(Box::new(callback));
        self
    }

    /// Only multitons accept one; plain factories are never cached.
    pub fn on_dispose(
        mut self,
        callback: impl Fn(&Graph, &A, &R) + Send + Sync + 'static,
    ) -> Self {
        self.dispose = Some(Box::new(callback));
        self
    }
}

/// Registration options for constants.
#[derive(Default)]
pub struct ConstantOptions {
    qualifier: Option<Qualifier>,
    override_existing: bool,
}

impl ConstantOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    pub fn with_override(mut self, override_existing: bool) -> Self {
        self.override_existing = override_existing;
        self
    }
}

struct ComponentInner {
    qualifier: Qualifier,
    entries: KeyedRegistry<Arc<dyn UnboundService>>,
    subcomponents: Vec<(Qualifier, Component)>,
    /// Eager singleton keys in registration order.
    eager: Vec<TypeKey>,
    requires_lifecycle: bool,
}

/// An immutable, shareable registration set.
#[derive(Clone)]
pub struct Component {
    inner: Arc<ComponentInner>,
}

impl Component {
    /// Start a builder for a root declaration.
    pub fn builder() -> ComponentBuilder {
        ComponentBuilder::new(Qualifier::from("root"))
    }

    /// Start a builder under an explicit qualifier.
    pub fn builder_qualified(qualifier: impl Into<Qualifier>) -> ComponentBuilder {
        ComponentBuilder::new(qualifier.into())
    }

    /// The qualifier this declaration was built under.
    pub fn qualifier(&self) -> &Qualifier {
        &self.inner.qualifier
    }

    /// Number of service entries.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// True when no services are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub(crate) fn service(&self, key: &TypeKey) -> Option<Arc<dyn UnboundService>> {
        self.inner.entries.get(key).cloned()
    }

    /// The subcomponent declared under `qualifier`, if any.
    pub fn subcomponent(&self, qualifier: &Qualifier) -> Option<Component> {
        self.inner
            .subcomponents
            .iter()
            .find(|(declared, _)| declared == qualifier)
            .map(|(_, component)| component.clone())
    }

    pub(crate) fn eager_keys(&self) -> &[TypeKey] {
        &self.inner.eager
    }

    pub(crate) fn requires_lifecycle(&self) -> bool {
        self.inner.requires_lifecycle
    }

    pub(crate) fn for_each_entry(
        &self,
        action: impl FnMut(&TypeKey, &Arc<dyn UnboundService>),
    ) {
        self.inner.entries.for_each(action);
    }

    /// Derive a new declaration by re-opening this one in a builder.
    ///
    /// Existing entries keep their keys; replacing one requires the override
    /// flag, exactly as in a fresh builder.
    pub fn derive(
        &self,
        configure: impl FnOnce(&mut ComponentBuilder) -> Result<()>,
    ) -> Result<Component> {
        let mut builder = self.to_builder();
        configure(&mut builder)?;
        Ok(builder.build())
    }

    fn to_builder(&self) -> ComponentBuilder {
        let mut entries = Vec::with_capacity(self.inner.entries.len());
        self.inner
            .entries
            .for_each(|key, service| entries.push((key.clone(), service.clone())));
        ComponentBuilder {
            qualifier: self.inner.qualifier.clone(),
            entries,
            subcomponents: self.inner.subcomponents.clone(),
        }
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("qualifier", &self.inner.qualifier)
            .field("entries", &self.inner.entries.len())
            .field("subcomponents", &self.inner.subcomponents.len())
            .finish()
    }
}

/// Mutable builder producing [`Component`] declarations.
pub struct ComponentBuilder {
    qualifier: Qualifier,
    /// Insertion-order entry list; order fixes eager initialization order.
    entries: Vec<(TypeKey, Arc<dyn UnboundService>)>,
    subcomponents: Vec<(Qualifier, Component)>,
}

impl std::fmt::Debug for ComponentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentBuilder")
            .field("qualifier", &self.qualifier)
            .field("entries", &self.entries.len())
            .field("subcomponents", &self.subcomponents.len())
            .finish()
    }
}

impl ComponentBuilder {
    fn new(qualifier: Qualifier) -> Self {
        Self {
            qualifier,
            entries: Vec::new(),
            subcomponents: Vec::new(),
        }
    }

    /// The qualifier the built declaration will carry.
    pub fn qualifier(&self) -> &Qualifier {
        &self.qualifier
    }

    fn register(
        &mut self,
        key: TypeKey,
        service: Arc<dyn UnboundService>,
        override_existing: bool,
    ) -> Result<&mut Self> {
        match self.entries.iter().position(|(existing, _)| *existing == key) {
            Some(index) => {
                if !override_existing {
                    return Err(Error::DuplicateEntry { key });
                }
                self.entries[index] = (key, service);
            }
            None => self.entries.push((key, service)),
        }
        Ok(self)
    }

    /// Register a precomputed constant under its bare type.
    pub fn constant<R: Clone + Send + Sync + 'static>(&mut self, value: R) -> Result<&mut Self> {
        self.constant_with(value, ConstantOptions::new())
    }

    /// Register a precomputed constant under a qualifier.
    pub fn constant_qualified<R: Clone + Send + Sync + 'static>(
        &mut self,
        value: R,
        qualifier: impl Into<Qualifier>,
    ) -> Result<&mut Self> {
        self.constant_with(value, ConstantOptions::new().with_qualifier(qualifier))
    }

    pub fn constant_with<R: Clone + Send + Sync + 'static>(
        &mut self,
        value: R,
        options: ConstantOptions,
    ) -> Result<&mut Self> {
        let key = match options.qualifier {
            Some(qualifier) => TypeKey::of_qualified::<R>(qualifier),
            None => TypeKey::of::<R>(),
        };
        let service = Arc::new(ConstantService {
            key: key.clone(),
            value: Arc::new(value),
        });
        self.register(key, service, options.override_existing)
    }

    /// Register a prototype: the factory runs on every resolution.
    pub fn prototype<R: Clone + Send + Sync + 'static>(
        &mut self,
        factory: impl Fn(&Graph) -> Result<R> + Send + Sync + 'static,
    ) -> Result<&mut Self> {
        self.prototype_with(factory, ServiceOptions::new())
    }

    pub fn prototype_with<R: Clone + Send + Sync + 'static>(
        &mut self,
        factory: impl Fn(&Graph) -> Result<R> + Send + Sync + 'static,
        options: ServiceOptions<R>,
    ) -> Result<&mut Self> {
        if options.dispose.is_some() {
            return Err(Error::invalid_state(
                "prototype services cannot have a dispose callback",
            ));
        }
        let key = match options.qualifier {
            Some(qualifier) => TypeKey::of_qualified::<R>(qualifier),
            None => TypeKey::of::<R>(),
        };
        let service = Arc::new(UnboundPrototypeService {
            key: key.clone(),
            factory: Box::new(factory),
            post_construct: options.post_construct,
        });
        self.register(key, service, options.override_existing)
    }

    /// Register a lazy singleton.
    pub fn singleton<R: Clone + Send + Sync + 'static>(
        &mut self,
        factory: impl Fn(&Graph) -> Result<R> + Send + Sync + 'static,
    ) -> Result<&mut Self> {
        self.singleton_with(factory, ServiceOptions::new())
    }

    /// Register a lazy singleton under a qualifier.
    pub fn singleton_qualified<R: Clone + Send + Sync + 'static>(
        &mut self,
        qualifier: impl Into<Qualifier>,
        factory: impl Fn(&Graph) -> Result<R> + Send + Sync + 'static,
    ) -> Result<&mut Self> {
        self.singleton_with(factory, ServiceOptions::new().with_qualifier(qualifier))
    }

    pub fn singleton_with<R: Clone + Send + Sync + 'static>(
        &mut self,
        factory: impl Fn(&Graph) -> Result<R> + Send + Sync + 'static,
        options: ServiceOptions<R>,
    ) -> Result<&mut Self> {
        self.singleton_scoped(factory, options, false)
    }

    /// Register a singleton created as soon as its graph opens.
    pub fn eager_singleton<R: Clone + Send + Sync + 'static>(
        &mut self,
        factory: impl Fn(&Graph) -> Result<R> + Send + Sync + 'static,
    ) -> Result<&mut Self> {
        self.eager_singleton_with(factory, ServiceOptions::new())
    }

    pub fn eager_singleton_with<R: Clone + Send + Sync + 'static>(
        &mut self,
        factory: impl Fn(&Graph) -> Result<R> + Send + Sync + 'static,
        options: ServiceOptions<R>,
    ) -> Result<&mut Self> {
        self.singleton_scoped(factory, options, true)
    }

    fn singleton_scoped<R: Clone + Send + Sync + 'static>(
        &mut self,
        factory: impl Fn(&Graph) -> Result<R> + Send + Sync + 'static,
        options: ServiceOptions<R>,
        eager: bool,
    ) -> Result<&mut Self> {
        let key = match options.qualifier {
            Some(qualifier) => TypeKey::of_qualified::<R>(qualifier),
            None => TypeKey::of::<R>(),
        };
        let service = Arc::new(UnboundSingletonService {
            key: key.clone(),
            eager,
            factory: Box::new(factory),
            post_construct: options.post_construct,
            dispose: options.dispose,
        });
        self.register(key, service, options.override_existing)
    }

    /// Register a single-argument factory with prototype semantics.
    pub fn factory<A, R>(
        &mut self,
        factory: impl Fn(&Graph, A) -> Result<R> + Send + Sync + 'static,
    ) -> Result<&mut Self>
    where
        A: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
    {
        self.factory_with(factory, FactoryOptions::new())
    }

    pub fn factory_with<A, R>(
        &mut self,
        factory: impl Fn(&Graph, A) -> Result<R> + Send + Sync + 'static,
        options: FactoryOptions<A, R>,
    ) -> Result<&mut Self>
    where
        A: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
    {
        if options.dispose.is_some() {
            return Err(Error::invalid_state(
                "factory services cannot have a dispose callback",
            ));
        }
        let key = match options.qualifier {
            Some(qualifier) => TypeKey::compound_qualified::<A, R>(qualifier),
            None => TypeKey::compound::<A, R>(),
        };
        let service = Arc::new(UnboundFactoryService {
            key: key.clone(),
            factory: Box::new(factory),
            post_construct: options.post_construct,
        });
        self.register(key, service, options.override_existing)
    }

    /// Register a single-argument factory memoized per argument.
    pub fn multiton<A, R>(
        &mut self,
        factory: impl Fn(&Graph, A) -> Result<R> + Send + Sync + 'static,
    ) -> Result<&mut Self>
    where
        A: Clone + Eq + Hash + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
    {
        self.multiton_with(factory, FactoryOptions::new())
    }

    pub fn multiton_with<A, R>(
        &mut self,
        factory: impl Fn(&Graph, A) -> Result<R> + Send + Sync + 'static,
        options: FactoryOptions<A, R>,
    ) -> Result<&mut Self>
    where
        A: Clone + Eq + Hash + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
    {
        let key = match options.qualifier {
            Some(qualifier) => TypeKey::compound_qualified::<A, R>(qualifier),
            None => TypeKey::compound::<A, R>(),
        };
        let service = Arc::new(UnboundMultitonService {
            key: key.clone(),
            factory: Box::new(factory),
            post_construct: options.post_construct,
            dispose: options.dispose,
        });
        self.register(key, service, options.override_existing)
    }

    /// Remove an entry registered earlier in this builder.
    pub fn remove(&mut self, key: &TypeKey) -> &mut Self {
        self.entries.retain(|(existing, _)| existing != key);
        self
    }

    /// Declare a subcomponent under `qualifier`.
    pub fn subcomponent(
        &mut self,
        qualifier: impl Into<Qualifier>,
        configure: impl FnOnce(&mut ComponentBuilder) -> Result<()>,
    ) -> Result<&mut Self> {
        let qualifier = qualifier.into();
        if self
            .subcomponents
            .iter()
            .any(|(declared, _)| *declared == qualifier)
        {
            return Err(Error::invalid_state(format!(
                "subcomponent with qualifier `{qualifier}` is already declared"
            )));
        }
        let mut builder = ComponentBuilder::new(qualifier.clone());
        configure(&mut builder)?;
        self.subcomponents.push((qualifier, builder.build()));
        Ok(self)
    }

    /// Copy every entry of `other` into this builder.
    ///
    /// `override_existing` governs key collisions between the two entry sets;
    /// `mode` governs what happens to the included declaration's
    /// subcomponents.
    pub fn include(
        &mut self,
        other: &Component,
        override_existing: bool,
        mode: SubcomponentIncludeMode,
    ) -> Result<&mut Self> {
        let mut incoming = Vec::with_capacity(other.len());
        other.for_each_entry(|key, service| incoming.push((key.clone(), service.clone())));
        for (key, service) in incoming {
            self.register(key, service, override_existing)?;
        }

        for (qualifier, component) in &other.inner.subcomponents {
            let existing = self
                .subcomponents
                .iter()
                .position(|(declared, _)| declared == qualifier);
            match (mode, existing) {
                (SubcomponentIncludeMode::DoNotInclude, _) => {}
                (SubcomponentIncludeMode::DoNotIncludeIfAlreadyPresent, Some(_)) => {}
                (SubcomponentIncludeMode::Replace, Some(index)) => {
                    self.subcomponents[index].1 = component.clone();
                }
                (SubcomponentIncludeMode::Merge, Some(index)) => {
                    let merged = self.subcomponents[index].1.derive(|builder| {
                        builder.include(component, override_existing, mode)?;
                        Ok(())
                    })?;
                    self.subcomponents[index].1 = merged;
                }
                (_, None) => self.subcomponents.push((qualifier.clone(), component.clone())),
            }
        }
        Ok(self)
    }

    /// Run every self-registered declaration hook against this builder.
    pub fn apply_registrars(&mut self) -> Result<&mut Self> {
        for registrar in crate::registrar::COMPONENT_REGISTRARS {
            (registrar.register)(self)
                .map_err(|error| match error {
                    Error::Factory(source) => Error::invalid_state(format!(
                        "registrar `{}` failed: {source}",
                        registrar.name
                    )),
                    other => other,
                })?;
        }
        Ok(self)
    }

    /// Freeze the builder into an immutable declaration.
    pub fn build(self) -> Component {
        let mut entries = KeyedRegistry::with_capacity(self.entries.len());
        let mut eager = Vec::new();
        let mut requires_lifecycle = false;
        for (key, service) in self.entries {
            if service.scope() == Scope::EagerSingleton {
                eager.push(key.clone());
            }
            requires_lifecycle |= service.requires_lifecycle();
            entries.put(key, service);
        }
        Component {
            inner: Arc::new(ComponentInner {
                qualifier: self.qualifier,
                entries,
                subcomponents: self.subcomponents,
                eager,
                requires_lifecycle,
            }),
        }
    }
}
