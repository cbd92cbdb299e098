//! The knowledge-graph tool: read-only graph capabilities that record provenance.
//!
//! Every identifier-accepting capability parses the id, then checks it exists, and
//! only then runs its real queries. Identifiers surfaced to the model are recorded in
//! the task's provenance once all queries of the call have succeeded.

use crate::error::StoreError;
use crate::ids::{EntityId, GraphId, IdKind, PredicateId};
use crate::store::{GraphStore, Position, SearchHit};
use async_trait::async_trait;
use kg_core::session::TaskSession;
use kg_core::tool::{
    CapabilitySpec, Tool, ToolError, ToolOutput, decode_arguments, parameters_schema,
};
use rand::Rng;
use rand::seq::SliceRandom;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Maximum characters of an entity description.
pub const ENTITY_DESCRIPTION_CHARS: usize = 300;
/// Maximum characters of a predicate description.
pub const PREDICATE_DESCRIPTION_CHARS: usize = 150;
/// Predicates returned per neighbourhood lookup.
pub const MAX_PREDICATES: usize = 5;
/// Entities returned per page.
pub const PAGE_SIZE: u64 = 5;
/// Store-side candidates fetched per returned search hit, before ranking.
const SEARCH_OVERFETCH: usize = 5;

pub const NO_MATCHES: &str = "No matches found.";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EntityIdParams {
    /// Entity identifier, e.g. Q42
    pub entity_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PredicateIdParams {
    /// Predicate identifier, e.g. P31
    pub predicate_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// Text to match against labels and descriptions
    pub query: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NoParams {}

static CAPABILITIES: &[CapabilitySpec] = &[
    CapabilitySpec {
        name: "get_entity_description",
        description: "Retrieve the textual description of an entity given its identifier.",
        exposed: true,
        parameters: parameters_schema::<EntityIdParams>,
    },
    CapabilitySpec {
        name: "get_predicate_description",
        description: "Retrieve the textual description of a predicate given its identifier.",
        exposed: true,
        parameters: parameters_schema::<PredicateIdParams>,
    },
    CapabilitySpec {
        name: "search_entities",
        description: "Search for entities with a label or description matching the given query.",
        exposed: true,
        parameters: parameters_schema::<SearchParams>,
    },
    CapabilitySpec {
        name: "search_predicates",
        description: "Search for predicates with a label or description matching the given query.",
        exposed: true,
        parameters: parameters_schema::<SearchParams>,
    },
    CapabilitySpec {
        name: "get_predicates_with_subject",
        description: "Get a random list of predicates in which the given entity occurs as a subject.",
        exposed: true,
        parameters: parameters_schema::<EntityIdParams>,
    },
    CapabilitySpec {
        name: "get_predicates_with_object",
        description: "Get a random list of predicates in which the given entity occurs as an object.",
        exposed: true,
        parameters: parameters_schema::<EntityIdParams>,
    },
    CapabilitySpec {
        name: "get_subject_entities",
        description: "Get a random page of entities that occur as subject of the given predicate.",
        exposed: true,
        parameters: parameters_schema::<PredicateIdParams>,
    },
    CapabilitySpec {
        name: "get_object_entities",
        description: "Get a random page of entities that occur as object of the given predicate.",
        exposed: true,
        parameters: parameters_schema::<PredicateIdParams>,
    },
    CapabilitySpec {
        name: "ping",
        description: "Check that the graph store is reachable.",
        exposed: false,
        parameters: parameters_schema::<NoParams>,
    },
];

/// Truncate to at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Uniformly random page index over `ceil(count / page_size)` pages, or `None` when empty.
pub fn random_page<R: Rng + ?Sized>(count: u64, page_size: u64, rng: &mut R) -> Option<u64> {
    let pages = count.div_ceil(page_size.max(1));
    (pages > 0).then(|| rng.gen_range(0..pages))
}

/// Order search hits by similarity to the query and keep the best hit per id.
pub fn rank_hits(query: &str, hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    let query = query.trim().to_lowercase();
    let mut scored: Vec<(f64, SearchHit)> = hits
        .into_iter()
        .map(|hit| {
            let text = hit.text.to_lowercase();
            let mut score = strsim::normalized_levenshtein(&query, &text);
            if text == query {
                score += 1.0;
            } else if text.starts_with(&query) {
                score += 0.5;
            }
            (score, hit)
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));

    let mut seen = std::collections::HashSet::new();
    scored
        .into_iter()
        .map(|(_, hit)| hit)
        .filter(|hit| seen.insert(hit.id.clone()))
        .take(limit)
        .collect()
}

/// Graph capabilities backed by a [`GraphStore`].
pub struct KnowledgeGraphTool {
    store: Arc<dyn GraphStore>,
    search_limit: usize,
}

impl KnowledgeGraphTool {
    pub fn new(store: Arc<dyn GraphStore>, search_limit: usize) -> Self {
        Self {
            store,
            search_limit: search_limit.max(1),
        }
    }

    pub fn capability_table() -> &'static [CapabilitySpec] {
        CAPABILITIES
    }

    async fn describe(&self, id: &GraphId, max_chars: usize) -> Result<String, StoreError> {
        let parts = self.store.descriptions(id).await?;
        Ok(truncate_chars(&parts.join(", "), max_chars))
    }

    async fn description(
        &self,
        kind: IdKind,
        raw: &str,
        session: &mut TaskSession,
    ) -> Result<ToolOutput, ToolError> {
        let Ok(id) = GraphId::parse(kind, raw) else {
            return Ok(invalid_id(kind, raw));
        };
        if !self.store.exists(&id).await? {
            return Ok(not_found(kind, &id));
        }
        let max = match kind {
            IdKind::Entity => ENTITY_DESCRIPTION_CHARS,
            IdKind::Predicate => PREDICATE_DESCRIPTION_CHARS,
        };
        let text = self.describe(&id, max).await?;
        session.provenance.record(id.as_str());
        if text.is_empty() {
            return Ok(ToolOutput::value(format!("No description available for {id}.")));
        }
        Ok(ToolOutput::value(text))
    }

    async fn search(
        &self,
        kind: IdKind,
        query: &str,
        session: &mut TaskSession,
    ) -> Result<ToolOutput, ToolError> {
        if query.trim().is_empty() {
            return Ok(ToolOutput::value(NO_MATCHES));
        }
        let hits = self
            .store
            .search(kind, query, self.search_limit * SEARCH_OVERFETCH)
            .await?;
        let ranked = rank_hits(query, hits, self.search_limit);
        debug!(kind = %kind, query, hits = ranked.len(), "graph search");
        if ranked.is_empty() {
            return Ok(ToolOutput::value(NO_MATCHES));
        }

        session
            .provenance
            .record_all(ranked.iter().map(|h| h.id.as_str()));
        let map: Map<String, Value> = ranked
            .into_iter()
            .map(|h| (h.id.to_string(), Value::String(h.text)))
            .collect();
        Ok(ToolOutput::value(map))
    }

    async fn predicates_with(
        &self,
        raw: &str,
        position: Position,
        session: &mut TaskSession,
    ) -> Result<ToolOutput, ToolError> {
        let Ok(entity) = raw.parse::<EntityId>() else {
            return Ok(invalid_id(IdKind::Entity, raw));
        };
        let id = GraphId::Entity(entity.clone());
        if !self.store.exists(&id).await? {
            return Ok(not_found(IdKind::Entity, &id));
        }

        let mut predicates = self.store.predicates_with(&entity, position).await?;
        if predicates.is_empty() {
            return Ok(ToolOutput::value(format!(
                "No predicates found with {entity} as {position}."
            )));
        }
        {
            let mut rng = rand::thread_rng();
            predicates.shuffle(&mut rng);
        }
        predicates.truncate(MAX_PREDICATES);

        let mut map = Map::new();
        for predicate in &predicates {
            let pid = GraphId::Predicate(predicate.clone());
            let text = self.describe(&pid, PREDICATE_DESCRIPTION_CHARS).await?;
            map.insert(predicate.to_string(), Value::String(text));
        }
        session
            .provenance
            .record_all(predicates.iter().map(PredicateId::as_str));
        Ok(ToolOutput::value(map))
    }

    async fn entities_of(
        &self,
        raw: &str,
        position: Position,
        session: &mut TaskSession,
    ) -> Result<ToolOutput, ToolError> {
        let Ok(predicate) = raw.parse::<PredicateId>() else {
            return Ok(invalid_id(IdKind::Predicate, raw));
        };
        let id = GraphId::Predicate(predicate.clone());
        if !self.store.exists(&id).await? {
            return Ok(not_found(IdKind::Predicate, &id));
        }

        let count = self.store.count_entities(&predicate, position).await?;
        let page = {
            let mut rng = rand::thread_rng();
            random_page(count, PAGE_SIZE, &mut rng)
        };
        let Some(page) = page else {
            return Ok(ToolOutput::value(format!(
                "No {position} entities found for {predicate}."
            )));
        };
        debug!(%predicate, %position, count, page, "entity page");

        let entities = self
            .store
            .entities_page(&predicate, position, PAGE_SIZE, page * PAGE_SIZE)
            .await?;
        let mut map = Map::new();
        for entity in &entities {
            let eid = GraphId::Entity(entity.clone());
            let text = self.describe(&eid, ENTITY_DESCRIPTION_CHARS).await?;
            map.insert(entity.to_string(), Value::String(text));
        }
        session
            .provenance
            .record_all(entities.iter().map(EntityId::as_str));
        Ok(ToolOutput::value(map))
    }
}

fn invalid_id(kind: IdKind, raw: &str) -> ToolOutput {
    ToolOutput::value(format!("{raw} is not a valid {kind} identifier."))
}

fn not_found(kind: IdKind, id: &GraphId) -> ToolOutput {
    let noun = match kind {
        IdKind::Entity => "Entity",
        IdKind::Predicate => "Predicate",
    };
    ToolOutput::value(format!("{noun} {id} not found."))
}

#[async_trait]
impl Tool for KnowledgeGraphTool {
    fn name(&self) -> &'static str {
        "knowledge_graph"
    }

    fn capabilities(&self) -> &'static [CapabilitySpec] {
        CAPABILITIES
    }

    async fn invoke(
        &self,
        capability: &str,
        arguments: Map<String, Value>,
        session: &mut TaskSession,
    ) -> Result<ToolOutput, ToolError> {
        match capability {
            "get_entity_description" => {
                let p: EntityIdParams = decode_arguments(capability, arguments)?;
                self.description(IdKind::Entity, &p.entity_id, session).await
            }
            "get_predicate_description" => {
                let p: PredicateIdParams = decode_arguments(capability, arguments)?;
                self.description(IdKind::Predicate, &p.predicate_id, session)
                    .await
            }
            "search_entities" => {
                let p: SearchParams = decode_arguments(capability, arguments)?;
                self.search(IdKind::Entity, &p.query, session).await
            }
            "search_predicates" => {
                let p: SearchParams = decode_arguments(capability, arguments)?;
                self.search(IdKind::Predicate, &p.query, session).await
            }
            "get_predicates_with_subject" => {
                let p: EntityIdParams = decode_arguments(capability, arguments)?;
                self.predicates_with(&p.entity_id, Position::Subject, session)
                    .await
            }
            "get_predicates_with_object" => {
                let p: EntityIdParams = decode_arguments(capability, arguments)?;
                self.predicates_with(&p.entity_id, Position::Object, session)
                    .await
            }
            "get_subject_entities" => {
                let p: PredicateIdParams = decode_arguments(capability, arguments)?;
                self.entities_of(&p.predicate_id, Position::Subject, session)
                    .await
            }
            "get_object_entities" => {
                let p: PredicateIdParams = decode_arguments(capability, arguments)?;
                self.entities_of(&p.predicate_id, Position::Object, session)
                    .await
            }
            "ping" => {
                self.store.ping().await?;
                Ok(ToolOutput::value(true))
            }
            other => Err(ToolError::Runtime(format!(
                "knowledge_graph has no capability {other}"
            ))),
        }
    }
}
