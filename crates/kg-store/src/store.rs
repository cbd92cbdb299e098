//! The graph store abstraction the knowledge-graph tool queries.

use crate::error::StoreError;
use crate::ids::{EntityId, GraphId, IdKind, PredicateId};
use async_trait::async_trait;

/// Where an entity sits in a triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Subject,
    Object,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Position::Subject => write!(f, "subject"),
            Position::Object => write!(f, "object"),
        }
    }
}

/// One label or description matching a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub id: GraphId,
    pub text: String,
}

/// Read-only access to a triple store.
///
/// Implementations must not retry internally: connection, timeout and malformed
/// query failures are reported as they happen.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Zero-side-effect liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Does the identifier occur anywhere in the graph?
    async fn exists(&self, id: &GraphId) -> Result<bool, StoreError>;

    /// Every description literal attached to the identifier.
    async fn descriptions(&self, id: &GraphId) -> Result<Vec<String>, StoreError>;

    /// Case-insensitive substring match on labels and descriptions.
    async fn search(
        &self,
        kind: IdKind,
        text: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, StoreError>;

    /// Distinct predicates of triples where `entity` is at `position`.
    async fn predicates_with(
        &self,
        entity: &EntityId,
        position: Position,
    ) -> Result<Vec<PredicateId>, StoreError>;

    /// Number of distinct entities at `position` for `predicate`.
    async fn count_entities(
        &self,
        predicate: &PredicateId,
        position: Position,
    ) -> Result<u64, StoreError>;

    /// Stable-ordered page of the entities counted by [`GraphStore::count_entities`].
    async fn entities_page(
        &self,
        predicate: &PredicateId,
        position: Position,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<EntityId>, StoreError>;
}
