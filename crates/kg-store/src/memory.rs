//! In-memory triple store for tests and offline demos.

use crate::error::StoreError;
use crate::ids::{EntityId, GraphId, IdKind, PredicateId};
use crate::store::{GraphStore, Position, SearchHit};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A small graph held in memory. Every trait call counts as one query.
#[derive(Debug, Default)]
pub struct MemoryStore {
    labels: BTreeMap<GraphId, String>,
    descriptions: BTreeMap<GraphId, Vec<String>>,
    triples: BTreeSet<(EntityId, PredicateId, EntityId)>,
    failure: Option<StoreError>,
    queries: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a label. Panics on an id that does not parse; this is a fixture builder.
    #[must_use]
    pub fn with_label(mut self, id: &str, label: &str) -> Self {
        self.labels.insert(fixture_id(id), label.to_string());
        self
    }

    #[must_use]
    pub fn with_description(mut self, id: &str, text: &str) -> Self {
        self.descriptions
            .entry(fixture_id(id))
            .or_default()
            .push(text.to_string());
        self
    }

    #[must_use]
    pub fn with_triple(mut self, subject: &str, predicate: &str, object: &str) -> Self {
        let (GraphId::Entity(s), GraphId::Predicate(p), GraphId::Entity(o)) =
            (fixture_id(subject), fixture_id(predicate), fixture_id(object))
        else {
            panic!("triple fixture must be entity-predicate-entity: {subject} {predicate} {object}");
        };
        self.triples.insert((s, p, o));
        self
    }

    /// Make every subsequent call fail with `error`.
    #[must_use]
    pub fn with_failure(mut self, error: StoreError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Number of store calls made so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<(), StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn entities_at(&self, predicate: &PredicateId, position: Position) -> BTreeSet<&EntityId> {
        self.triples
            .iter()
            .filter(|(_, p, _)| p == predicate)
            .map(|(s, _, o)| match position {
                Position::Subject => s,
                Position::Object => o,
            })
            .collect()
    }
}

fn fixture_id(raw: &str) -> GraphId {
    match raw.parse() {
        Ok(id) => id,
        Err(e) => panic!("invalid fixture id: {e}"),
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.begin()
    }

    async fn exists(&self, id: &GraphId) -> Result<bool, StoreError> {
        self.begin()?;
        let in_triples = self.triples.iter().any(|(s, p, o)| match id {
            GraphId::Entity(e) => s == e || o == e,
            GraphId::Predicate(q) => p == q,
        });
        Ok(in_triples || self.labels.contains_key(id) || self.descriptions.contains_key(id))
    }

    async fn descriptions(&self, id: &GraphId) -> Result<Vec<String>, StoreError> {
        self.begin()?;
        Ok(self.descriptions.get(id).cloned().unwrap_or_default())
    }

    async fn search(
        &self,
        kind: IdKind,
        text: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        self.begin()?;
        let needle = text.trim().to_lowercase();
        let labels = self.labels.iter();
        let descriptions = self
            .descriptions
            .iter()
            .flat_map(|(id, ds)| ds.iter().map(move |d| (id, d)));
        Ok(labels
            .chain(descriptions)
            .filter(|(id, t)| id.kind() == kind && t.to_lowercase().contains(&needle))
            .take(limit)
            .map(|(id, t)| SearchHit {
                id: id.clone(),
                text: t.clone(),
            })
            .collect())
    }

    async fn predicates_with(
        &self,
        entity: &EntityId,
        position: Position,
    ) -> Result<Vec<PredicateId>, StoreError> {
        self.begin()?;
        let preds: BTreeSet<&PredicateId> = self
            .triples
            .iter()
            .filter(|(s, _, o)| match position {
                Position::Subject => s == entity,
                Position::Object => o == entity,
            })
            .map(|(_, p, _)| p)
            .collect();
        Ok(preds.into_iter().cloned().collect())
    }

    async fn count_entities(
        &self,
        predicate: &PredicateId,
        position: Position,
    ) -> Result<u64, StoreError> {
        self.begin()?;
        Ok(self.entities_at(predicate, position).len() as u64)
    }

    async fn entities_page(
        &self,
        predicate: &PredicateId,
        position: Position,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<EntityId>, StoreError> {
        self.begin()?;
        Ok(self
            .entities_at(predicate, position)
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with_label("Q1", "Alpha")
            .with_label("P7", "sibling")
            .with_description("Q1", "first letter")
            .with_triple("Q1", "P7", "Q2")
            .with_triple("Q3", "P7", "Q2")
    }

    #[tokio::test]
    async fn test_exists_covers_triples_and_labels() {
        let store = store();
        assert!(store.exists(&"Q2".parse().unwrap()).await.unwrap());
        assert!(store.exists(&"P7".parse().unwrap()).await.unwrap());
        assert!(!store.exists(&"Q99".parse().unwrap()).await.unwrap());
        assert_eq!(store.query_count(), 3);
    }

    #[tokio::test]
    async fn test_count_and_page_are_distinct() {
        let store = store();
        let p7: PredicateId = "P7".parse().unwrap();
        assert_eq!(store.count_entities(&p7, Position::Subject).await.unwrap(), 2);
        assert_eq!(store.count_entities(&p7, Position::Object).await.unwrap(), 1);
        let page = store
            .entities_page(&p7, Position::Subject, 5, 1)
            .await
            .unwrap();
        assert_eq!(page, vec!["Q3".parse::<EntityId>().unwrap()]);
    }

    #[tokio::test]
    async fn test_search_filters_by_kind() {
        let store = store();
        let hits = store.search(IdKind::Predicate, "SIB", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "P7");
        assert!(store.search(IdKind::Entity, "sib", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new().with_failure(StoreError::ConnectionFailed("down".into()));
        assert!(store.ping().await.unwrap_err().is_fatal());
    }
}
