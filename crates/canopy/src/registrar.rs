//! Self-registered component declarations
//!
//! Crates that contribute services can register a [`ComponentRegistrar`] in
//! the [`COMPONENT_REGISTRARS`] distributed slice; a builder calling
//! [`apply_registrars`](crate::ComponentBuilder::apply_registrars) picks
//! them all up at link time, without a central registration site.
//!
//! ```text
//! #[distributed_slice(COMPONENT_REGISTRARS)]
//! static REGISTER_CLOCK: ComponentRegistrar = ComponentRegistrar {
//!     name: "clock",
//!     register: |builder| {
//!         builder.singleton(|_| Ok(SystemClock::new()))?;
//!         Ok(())
//!     },
//! };
//! ```

use linkme::distributed_slice;

use crate::component::ComponentBuilder;
use crate::error::Result;

/// A link-time registration hook contributing entries to a builder.
pub struct ComponentRegistrar {
    /// Identifier used in error messages when the hook fails.
    pub name: &'static str,
    /// The registration body.
    pub register: fn(&mut ComponentBuilder) -> Result<()>,
}

/// All registrars linked into the final binary.
#[distributed_slice]
pub static COMPONENT_REGISTRARS: [ComponentRegistrar] = [..];
