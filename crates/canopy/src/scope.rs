//! Scope policies governing instance lifetime and caching

use std::fmt;

/// Lifetime/caching policy of a registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// A new instance on every resolution; never cached
    Prototype,
    /// One instance per graph, created lazily on first resolution
    Singleton,
    /// One instance per graph, created when the graph is opened
    EagerSingleton,
    /// One instance per graph and factory argument
    Multiton,
}

impl Scope {
    /// True for the singleton family whose instances are memoized per graph.
    pub fn is_singleton(self) -> bool {
        matches!(self, Self::Singleton | Self::EagerSingleton)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Prototype => "prototype",
            Self::Singleton => "singleton",
            Self::EagerSingleton => "eagerSingleton",
            Self::Multiton => "multiton",
        };
        write!(f, "{name}")
    }
}
