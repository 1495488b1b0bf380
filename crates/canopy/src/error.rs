//! Error handling types

use thiserror::Error;

use crate::key::{Qualifier, TypeKey};

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error type carried as the source of resolution failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for the canopy dependency graph
#[derive(Error, Debug)]
pub enum Error {
    /// No service is registered under the requested key in this graph or any ancestor
    #[error("service with key `{key}` does not exist")]
    EntryNotFound {
        /// The key that was requested
        key: TypeKey,
    },

    /// A key was registered twice in a declaration builder without an override flag
    #[error("entry with key `{key}` already exists")]
    DuplicateEntry {
        /// The key that was registered twice
        key: TypeKey,
    },

    /// A cyclic dependency was detected during resolution
    #[error("cyclic dependency found for key `{key}`; dependency chain: {chain}")]
    CyclicDependency {
        /// The key whose resolution closed the cycle
        key: TypeKey,
        /// Human-readable arrow-joined chain, e.g. `A -> B => A`
        chain: String,
    },

    /// A factory block failed while resolving a service
    #[error("factory of service with key `{key}` failed on invocation")]
    Resolution {
        /// The key that was being resolved
        key: TypeKey,
        /// The underlying failure reported by the factory block
        #[source]
        source: BoxError,
    },

    /// A nested lookup inside a factory block did not find its dependency
    #[error("error while resolving `{key}`: could not find dependency with key `{missing}`")]
    MissingDependency {
        /// The key whose factory performed the failing lookup
        key: TypeKey,
        /// The key the nested lookup did not find
        missing: TypeKey,
    },

    /// A failure raised by a factory block before it is attributed to a key
    ///
    /// The service evaluator translates this into [`Error::Resolution`] naming
    /// the offending key; it only surfaces unwrapped when produced outside of
    /// a resolution.
    #[error("factory error: {0}")]
    Factory(#[source] BoxError),

    /// Operation on a graph that has already been closed
    #[error("graph is already closed")]
    GraphClosed,

    /// Strict subgraph open while a child with the same identifier is open
    #[error("subgraph with identifier `{identifier}` is already open")]
    SubgraphAlreadyOpen {
        /// The identifier under which the open was attempted
        identifier: Qualifier,
    },

    /// The requested subcomponent qualifier is not declared on this graph or its ancestors
    #[error("subcomponent with qualifier `{qualifier}` does not exist")]
    SubcomponentNotFound {
        /// The qualifier that was requested
        qualifier: Qualifier,
    },

    /// An operation was attempted in a state that does not permit it
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the violated expectation
        message: String,
    },

    /// Internal invariant violation
    #[error("internal error: {message}")]
    Internal {
        /// Description of the broken invariant
        message: String,
    },
}

impl Error {
    /// Wrap a foreign error raised by a factory block
    pub fn factory<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Factory(Box::new(source))
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for the entry-not-found family translated to `None` by `*_or_none` APIs
    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, Self::EntryNotFound { .. })
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Self::Factory(message.into())
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Self::Factory(message.into())
    }
}
