//! Graph store access for knowledge-graph tool calling.
//!
//! [`sparql::SparqlStore`] talks to a remote SPARQL endpoint, [`memory::MemoryStore`]
//! holds a small graph in memory, and [`tool::KnowledgeGraphTool`] exposes either one
//! to the model as a set of read-only capabilities.

pub mod error;
pub mod ids;
pub mod memory;
pub mod query;
pub mod sparql;
pub mod store;
pub mod tool;

pub use error::StoreError;
pub use ids::{EntityId, GraphId, IdKind, PredicateId};
pub use memory::MemoryStore;
pub use sparql::SparqlStore;
pub use store::{GraphStore, Position, SearchHit};
pub use tool::KnowledgeGraphTool;
