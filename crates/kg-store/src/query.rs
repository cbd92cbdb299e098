//! Parameterized SPARQL queries.
//!
//! A [`Query`] is a fixed template plus typed bindings. Identifiers are bound as
//! IRIs built from validated ids and free text is bound as an escaped string
//! literal, so nothing the model writes is ever spliced into query structure.

use crate::error::StoreError;
use crate::ids::{EntityId, GraphId, IdKind, PredicateId};
use crate::store::Position;
use kg_core::config::StoreConfig;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

/// An absolute IRI, checked for characters that would break out of `<...>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iri(String);

impl Iri {
    pub fn new(iri: impl Into<String>) -> Result<Self, StoreError> {
        let iri = iri.into();
        let bad = iri.is_empty()
            || iri
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\'));
        if bad {
            Err(StoreError::InvalidIri(iri))
        } else {
            Ok(Self(iri))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// IRIs used to expand identifiers and reach label/description triples.
#[derive(Debug, Clone)]
pub struct Namespaces {
    pub entity: Iri,
    pub predicate: Iri,
    pub description: Iri,
    pub label: Iri,
}

impl Namespaces {
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        Ok(Self {
            entity: Iri::new(config.entity_namespace.clone())?,
            predicate: Iri::new(config.predicate_namespace.clone())?,
            description: Iri::new(config.description_predicate.clone())?,
            label: Iri::new(config.label_predicate.clone())?,
        })
    }

    /// Full IRI for an identifier.
    pub fn expand(&self, id: &GraphId) -> String {
        match id {
            GraphId::Entity(e) => format!("{}{}", self.entity.as_str(), e),
            GraphId::Predicate(p) => format!("{}{}", self.predicate.as_str(), p),
        }
    }

    /// Strip the namespace off a result IRI and parse it as an id of `kind`.
    /// IRIs outside the namespace, or with a non-matching local name, yield `None`.
    pub fn compact(&self, kind: IdKind, iri: &str) -> Option<GraphId> {
        let ns = match kind {
            IdKind::Entity => self.entity.as_str(),
            IdKind::Predicate => self.predicate.as_str(),
        };
        let local = iri.strip_prefix(ns)?;
        GraphId::parse(kind, local).ok()
    }

    /// IRI prefix shared by every id of `kind`, e.g. `http://www.wikidata.org/entity/Q`.
    pub fn id_prefix(&self, kind: IdKind) -> String {
        let ns = match kind {
            IdKind::Entity => self.entity.as_str(),
            IdKind::Predicate => self.predicate.as_str(),
        };
        format!("{}{}", ns, kind.prefix())
    }
}

/// A value bound into a query template.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Id(GraphId),
    Iri(Iri),
    Literal(String),
    Integer(u64),
}

impl From<EntityId> for Term {
    fn from(id: EntityId) -> Self {
        Term::Id(GraphId::Entity(id))
    }
}

impl From<PredicateId> for Term {
    fn from(id: PredicateId) -> Self {
        Term::Id(GraphId::Predicate(id))
    }
}

/// Escape text as a double-quoted SPARQL string literal.
pub fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$([a-z_]+)").expect("placeholder pattern is valid"))
}

/// A query template with `$name` placeholders and their bindings.
#[derive(Debug, Clone)]
pub struct Query {
    template: &'static str,
    bindings: BTreeMap<&'static str, Term>,
}

impl Query {
    pub fn new(template: &'static str) -> Self {
        Self {
            template,
            bindings: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn bind(mut self, name: &'static str, term: impl Into<Term>) -> Self {
        self.bindings.insert(name, term.into());
        self
    }

    pub fn template(&self) -> &'static str {
        self.template
    }

    /// Produce query text. Every placeholder must be bound.
    pub fn render(&self, ns: &Namespaces) -> Result<String, StoreError> {
        let re = placeholder_re();
        if let Some(missing) = re
            .captures_iter(self.template)
            .map(|c| c[1].to_string())
            .find(|name| !self.bindings.contains_key(name.as_str()))
        {
            return Err(StoreError::MalformedQuery {
                query: self.template.to_string(),
                message: format!("unbound placeholder ${missing}"),
            });
        }

        let mut out = String::with_capacity(self.template.len() + 64);
        let mut last = 0;
        for caps in re.captures_iter(self.template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&self.template[last..whole.start()]);
            if let Some(term) = self.bindings.get(name.as_str()) {
                render_term(&mut out, term, ns);
            }
            last = whole.end();
        }
        out.push_str(&self.template[last..]);
        Ok(out)
    }
}

fn render_term(out: &mut String, term: &Term, ns: &Namespaces) {
    match term {
        Term::Id(id) => {
            let _ = write!(out, "<{}>", ns.expand(id));
        }
        Term::Iri(iri) => {
            let _ = write!(out, "<{}>", iri.as_str());
        }
        Term::Literal(text) => out.push_str(&escape_literal(text)),
        Term::Integer(n) => {
            let _ = write!(out, "{n}");
        }
    }
}

// Query builders. Each returns an unrendered query; stores render against their namespaces.

pub fn ping() -> Query {
    Query::new("ASK {}")
}

pub fn exists(id: &GraphId) -> Query {
    Query::new("ASK { { $id ?p ?o } UNION { ?s $id ?o } UNION { ?s ?p $id } }")
        .bind("id", Term::Id(id.clone()))
}

pub fn descriptions(id: &GraphId, ns: &Namespaces) -> Query {
    Query::new("SELECT ?description WHERE { $id $description ?description }")
        .bind("id", Term::Id(id.clone()))
        .bind("description", Term::Iri(ns.description.clone()))
}

pub fn search(kind: IdKind, text: &str, limit: usize, ns: &Namespaces) -> Query {
    Query::new(
        "SELECT DISTINCT ?item ?text WHERE { \
         { ?item $label ?text } UNION { ?item $description ?text } \
         FILTER(STRSTARTS(STR(?item), $prefix)) \
         FILTER(CONTAINS(LCASE(STR(?text)), $needle)) \
         } LIMIT $limit",
    )
    .bind("label", Term::Iri(ns.label.clone()))
    .bind("description", Term::Iri(ns.description.clone()))
    .bind("prefix", Term::Literal(ns.id_prefix(kind)))
    .bind("needle", Term::Literal(text.trim().to_lowercase()))
    .bind("limit", Term::Integer(limit as u64))
}

pub fn predicates_with(entity: &EntityId, position: Position, ns: &Namespaces) -> Query {
    let template = match position {
        Position::Subject => {
            "SELECT DISTINCT ?predicate WHERE { $entity ?predicate ?o . \
             FILTER(STRSTARTS(STR(?predicate), $prefix)) }"
        }
        Position::Object => {
            "SELECT DISTINCT ?predicate WHERE { ?s ?predicate $entity . \
             FILTER(STRSTARTS(STR(?predicate), $prefix)) }"
        }
    };
    Query::new(template)
        .bind("entity", entity.clone())
        .bind("prefix", Term::Literal(ns.id_prefix(IdKind::Predicate)))
}

pub fn count_entities(predicate: &PredicateId, position: Position, ns: &Namespaces) -> Query {
    let template = match position {
        Position::Subject => {
            "SELECT (COUNT(DISTINCT ?entity) AS ?count) WHERE { ?entity $predicate ?o . \
             FILTER(STRSTARTS(STR(?entity), $prefix)) }"
        }
        Position::Object => {
            "SELECT (COUNT(DISTINCT ?entity) AS ?count) WHERE { ?s $predicate ?entity . \
             FILTER(STRSTARTS(STR(?entity), $prefix)) }"
        }
    };
    Query::new(template)
        .bind("predicate", predicate.clone())
        .bind("prefix", Term::Literal(ns.id_prefix(IdKind::Entity)))
}

pub fn entities_page(
    predicate: &PredicateId,
    position: Position,
    limit: u64,
    offset: u64,
    ns: &Namespaces,
) -> Query {
    let template = match position {
        Position::Subject => {
            "SELECT DISTINCT ?entity WHERE { ?entity $predicate ?o . \
             FILTER(STRSTARTS(STR(?entity), $prefix)) } \
             ORDER BY ?entity LIMIT $limit OFFSET $offset"
        }
        Position::Object => {
            "SELECT DISTINCT ?entity WHERE { ?s $predicate ?entity . \
             FILTER(STRSTARTS(STR(?entity), $prefix)) } \
             ORDER BY ?entity LIMIT $limit OFFSET $offset"
        }
    };
    Query::new(template)
        .bind("predicate", predicate.clone())
        .bind("prefix", Term::Literal(ns.id_prefix(IdKind::Entity)))
        .bind("limit", Term::Integer(limit))
        .bind("offset", Term::Integer(offset))
}
