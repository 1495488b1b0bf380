//! Identity keys for registered services
//!
//! A [`TypeKey`] identifies what is being asked for: the declared return type,
//! an optional argument type for single-argument factories, and an optional
//! [`Qualifier`] that distinguishes multiple registrations of the same type.
//!
//! Equality and hashing cover only the semantic (argument type, return type,
//! qualifier) triple. Display names are carried for diagnostics but excluded
//! from identity, so keys built through different construction paths for the
//! same triple always collide and compare equal.

use std::any::{type_name, TypeId};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Discriminator distinguishing multiple registrations of the same type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// A named qualifier
    Name(Cow<'static, str>),
    /// A numeric qualifier
    Index(u64),
}

impl From<&'static str> for Qualifier {
    fn from(name: &'static str) -> Self {
        Self::Name(Cow::Borrowed(name))
    }
}

impl From<String> for Qualifier {
    fn from(name: String) -> Self {
        Self::Name(Cow::Owned(name))
    }
}

impl From<u64> for Qualifier {
    fn from(index: u64) -> Self {
        Self::Index(index)
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Immutable identity of a registered dependency.
#[derive(Debug, Clone)]
pub struct TypeKey {
    return_id: TypeId,
    argument_id: Option<TypeId>,
    qualifier: Option<Qualifier>,
    return_name: &'static str,
    argument_name: Option<&'static str>,
    hash: u64,
}

impl TypeKey {
    /// Key for an argument-less service of type `R`.
    pub fn of<R: 'static>() -> Self {
        Self::new::<R>(None)
    }

    /// Key for an argument-less service of type `R` with a qualifier.
    pub fn of_qualified<R: 'static>(qualifier: impl Into<Qualifier>) -> Self {
        Self::new::<R>(Some(qualifier.into()))
    }

    /// Key for a single-argument factory `(A) -> R`.
    pub fn compound<A: 'static, R: 'static>() -> Self {
        Self::new_compound::<A, R>(None)
    }

    /// Key for a single-argument factory `(A) -> R` with a qualifier.
    pub fn compound_qualified<A: 'static, R: 'static>(qualifier: impl Into<Qualifier>) -> Self {
        Self::new_compound::<A, R>(Some(qualifier.into()))
    }

    fn new<R: 'static>(qualifier: Option<Qualifier>) -> Self {
        let return_id = TypeId::of::<R>();
        let hash = hash_parts(return_id, None, qualifier.as_ref());
        Self {
            return_id,
            argument_id: None,
            qualifier,
            return_name: type_name::<R>(),
            argument_name: None,
            hash,
        }
    }

    fn new_compound<A: 'static, R: 'static>(qualifier: Option<Qualifier>) -> Self {
        let return_id = TypeId::of::<R>();
        let argument_id = Some(TypeId::of::<A>());
        let hash = hash_parts(return_id, argument_id, qualifier.as_ref());
        Self {
            return_id,
            argument_id,
            qualifier,
            return_name: type_name::<R>(),
            argument_name: Some(type_name::<A>()),
            hash,
        }
    }

    /// The declared return type.
    pub fn return_id(&self) -> TypeId {
        self.return_id
    }

    /// The declared argument type for factory keys.
    pub fn argument_id(&self) -> Option<TypeId> {
        self.argument_id
    }

    /// The qualifier, if any.
    pub fn qualifier(&self) -> Option<&Qualifier> {
        self.qualifier.as_ref()
    }

    /// Precomputed hash over the semantic triple.
    pub(crate) fn hash_value(&self) -> u64 {
        self.hash
    }

    /// Type equality ignoring the qualifier.
    ///
    /// Used by of-type queries to collect every registration of a type
    /// regardless of how it is qualified.
    pub fn type_matches(&self, other: &TypeKey) -> bool {
        self.return_id == other.return_id && self.argument_id == other.argument_id
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.return_id == other.return_id
            && self.argument_id == other.argument_id
            && self.qualifier == other.qualifier
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.argument_name {
            Some(argument) => write!(f, "({argument}) -> {}", self.return_name)?,
            None => write!(f, "{}", self.return_name)?,
        }
        if let Some(qualifier) = &self.qualifier {
            write!(f, " (qualifier = {qualifier})")?;
        }
        Ok(())
    }
}

/// Hash the semantic triple without constructing a key.
///
/// Registries use this to look entries up by components; it must stay in sync
/// with [`TypeKey::new`] and [`TypeKey::new_compound`].
pub(crate) fn hash_parts(
    return_id: TypeId,
    argument_id: Option<TypeId>,
    qualifier: Option<&Qualifier>,
) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    return_id.hash(&mut hasher);
    argument_id.hash(&mut hasher);
    qualifier.hash(&mut hasher);
    hasher.finish()
}
