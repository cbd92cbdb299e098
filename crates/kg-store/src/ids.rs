//! Typed graph identifiers.
//!
//! Identifiers are parsed before they get anywhere near a query, so a corrupted id
//! from model output becomes a recoverable result instead of a malformed query.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

fn parse_prefixed(raw: &str, prefix: char) -> Result<String, StoreError> {
    let trimmed = raw.trim();
    let valid = trimmed
        .strip_prefix(prefix)
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()));
    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(StoreError::InvalidIdentifier(raw.to_string()))
    }
}

/// An entity identifier such as `Q41421`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

/// A predicate identifier such as `P31`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PredicateId(String);

macro_rules! impl_id {
    ($ty:ident, $prefix:literal) => {
        impl $ty {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $ty {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_prefixed(s, $prefix).map(Self)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = StoreError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$ty> for String {
            fn from(id: $ty) -> Self {
                id.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

impl_id!(EntityId, 'Q');
impl_id!(PredicateId, 'P');

/// Which identifier space a search or lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Entity,
    Predicate,
}

impl IdKind {
    pub fn prefix(self) -> char {
        match self {
            IdKind::Entity => 'Q',
            IdKind::Predicate => 'P',
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdKind::Entity => write!(f, "entity"),
            IdKind::Predicate => write!(f, "predicate"),
        }
    }
}

/// Either kind of identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GraphId {
    Entity(EntityId),
    Predicate(PredicateId),
}

impl GraphId {
    pub fn as_str(&self) -> &str {
        match self {
            GraphId::Entity(id) => id.as_str(),
            GraphId::Predicate(id) => id.as_str(),
        }
    }

    pub fn kind(&self) -> IdKind {
        match self {
            GraphId::Entity(_) => IdKind::Entity,
            GraphId::Predicate(_) => IdKind::Predicate,
        }
    }

    /// Parse an id of the given kind.
    pub fn parse(kind: IdKind, raw: &str) -> Result<Self, StoreError> {
        match kind {
            IdKind::Entity => raw.parse().map(GraphId::Entity),
            IdKind::Predicate => raw.parse().map(GraphId::Predicate),
        }
    }
}

impl FromStr for GraphId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().chars().next() {
            Some('P') => s.parse().map(GraphId::Predicate),
            _ => s.parse().map(GraphId::Entity),
        }
    }
}

impl From<EntityId> for GraphId {
    fn from(id: EntityId) -> Self {
        GraphId::Entity(id)
    }
}

impl From<PredicateId> for GraphId {
    fn from(id: PredicateId) -> Self {
        GraphId::Predicate(id)
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
