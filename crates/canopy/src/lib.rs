//! # Canopy
//!
//! A dependency graph container: declare services in immutable components,
//! open them as graphs, and resolve typed instances with scope-aware
//! caching, cycle detection, and lifecycle callbacks.
//!
//! ## Example
//!
//! ```
//! use canopy::Component;
//!
//! #[derive(Clone)]
//! struct Greeter {
//!     prefix: String,
//! }
//!
//! # fn main() -> canopy::Result<()> {
//! let mut builder = Component::builder();
//! builder.constant(String::from("hello"))?;
//! builder.singleton(|graph| {
//!     Ok(Greeter {
//!         prefix: graph.instance::<String>()?,
//!     })
//! })?;
//! let component = builder.build();
//!
//! let graph = canopy::Application::with_component("demo", component).open()?;
//! let greeter = graph.instance::<Greeter>()?;
//! assert_eq!(greeter.prefix, "hello");
//! graph.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - `key` - service identity: return type, optional argument type, qualifier
//! - `registry` - bucketed hash table keyed by [`TypeKey`]
//! - `component` - immutable declarations and their builder
//! - `graph` - live graphs, parent delegation, subgraph tree, teardown
//! - `bound` / `service` - per-graph and declaration-side service entries
//! - `plugin` - lifecycle observers with a copy-on-write registry
//! - `registrar` - link-time self-registration of declarations
//! - `app` - application handle owning the root graph

pub mod app;
pub mod bound;
pub mod component;
pub mod error;
pub mod graph;
pub mod key;
pub mod plugin;
pub mod registrar;
pub mod registry;
pub mod scope;
pub mod service;

mod evaluator;

pub use app::Application;
pub use component::{
    Component, ComponentBuilder, ConstantOptions, FactoryOptions, ServiceOptions,
    SubcomponentIncludeMode,
};
pub use error::{BoxError, Error, Result};
pub use graph::{Configure, FactoryHandle, Graph, Provider};
pub use key::{Qualifier, TypeKey};
pub use plugin::{Plugin, PluginRegistry};
pub use registrar::{ComponentRegistrar, COMPONENT_REGISTRARS};
pub use scope::Scope;
pub use service::DynInstance;
