//! HTTP client for a SPARQL 1.1 query endpoint (GraphDB, Blazegraph, Fuseki, ...).

use crate::error::StoreError;
use crate::ids::{EntityId, GraphId, IdKind, PredicateId};
use crate::query::{self, Namespaces, Query};
use crate::store::{GraphStore, Position, SearchHit};
use async_trait::async_trait;
use kg_core::config::StoreConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const RESULTS_JSON: &str = "application/sparql-results+json";

/// `application/sparql-results+json` body. ASK queries set `boolean`, SELECT queries set `results`.
#[derive(Debug, Deserialize)]
pub(crate) struct SparqlResponse {
    #[serde(default)]
    boolean: Option<bool>,
    #[serde(default)]
    results: Option<SparqlBindings>,
}

#[derive(Debug, Deserialize)]
struct SparqlBindings {
    bindings: Vec<HashMap<String, RdfTerm>>,
}

#[derive(Debug, Deserialize)]
struct RdfTerm {
    #[serde(rename = "type")]
    kind: String,
    value: String,
}

type Row = HashMap<String, RdfTerm>;

pub(crate) fn parse_response(body: &str) -> Result<SparqlResponse, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Decode(e.to_string()))
}

impl SparqlResponse {
    fn into_boolean(self) -> Result<bool, StoreError> {
        self.boolean
            .ok_or_else(|| StoreError::Decode("ASK response without a boolean".to_string()))
    }

    fn into_rows(self) -> Result<Vec<Row>, StoreError> {
        self.results
            .map(|r| r.bindings)
            .ok_or_else(|| StoreError::Decode("SELECT response without results".to_string()))
    }
}

fn value<'a>(row: &'a Row, var: &str) -> Option<&'a str> {
    row.get(var).map(|t| t.value.as_str())
}

fn iri<'a>(row: &'a Row, var: &str) -> Option<&'a str> {
    row.get(var)
        .filter(|t| t.kind == "uri")
        .map(|t| t.value.as_str())
}

/// A remote SPARQL endpoint.
pub struct SparqlStore {
    http: reqwest::Client,
    endpoint: String,
    ns: Namespaces,
}

impl SparqlStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            ns: Namespaces::from_config(config)?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.ns
    }

    async fn execute(&self, query: &Query) -> Result<SparqlResponse, StoreError> {
        let text = query.render(&self.ns)?;
        debug!(endpoint = %self.endpoint, query = %text, "sparql query");

        let resp = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, RESULTS_JSON)
            .form(&[("query", text.as_str())])
            .send()
            .await
            .map_err(|e| map_transport_error(&e, &self.endpoint))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::BAD_REQUEST {
                return Err(StoreError::MalformedQuery {
                    query: text,
                    message: body.trim().to_string(),
                });
            }
            return Err(StoreError::Http {
                status: status.as_u16(),
                message: body.trim().to_string(),
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| map_transport_error(&e, &self.endpoint))?;
        parse_response(&body)
    }

    async fn ask(&self, query: &Query) -> Result<bool, StoreError> {
        self.execute(query).await?.into_boolean()
    }

    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        self.execute(query).await?.into_rows()
    }
}

fn map_transport_error(err: &reqwest::Error, endpoint: &str) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout(format!("{endpoint}: {err}"))
    } else if err.is_decode() {
        StoreError::Decode(err.to_string())
    } else {
        StoreError::ConnectionFailed(format!("{endpoint}: {err}"))
    }
}

#[async_trait]
impl GraphStore for SparqlStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.ask(&query::ping()).await.map(|_| ())
    }

    async fn exists(&self, id: &GraphId) -> Result<bool, StoreError> {
        self.ask(&query::exists(id)).await
    }

    async fn descriptions(&self, id: &GraphId) -> Result<Vec<String>, StoreError> {
        let rows = self.select(&query::descriptions(id, &self.ns)).await?;
        Ok(rows
            .iter()
            .filter_map(|row| value(row, "description"))
            .map(ToString::to_string)
            .collect())
    }

    async fn search(
        &self,
        kind: IdKind,
        text: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let rows = self
            .select(&query::search(kind, text, limit, &self.ns))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let id = self.ns.compact(kind, iri(row, "item")?)?;
                let text = value(row, "text")?.to_string();
                Some(SearchHit { id, text })
            })
            .collect())
    }

    async fn predicates_with(
        &self,
        entity: &EntityId,
        position: Position,
    ) -> Result<Vec<PredicateId>, StoreError> {
        let rows = self
            .select(&query::predicates_with(entity, position, &self.ns))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| match self.ns.compact(IdKind::Predicate, iri(row, "predicate")?)? {
                GraphId::Predicate(p) => Some(p),
                GraphId::Entity(_) => None,
            })
            .collect())
    }

    async fn count_entities(
        &self,
        predicate: &PredicateId,
        position: Position,
    ) -> Result<u64, StoreError> {
        let rows = self
            .select(&query::count_entities(predicate, position, &self.ns))
            .await?;
        let raw = rows
            .first()
            .and_then(|row| value(row, "count"))
            .ok_or_else(|| StoreError::Decode("COUNT query returned no rows".to_string()))?;
        raw.parse()
            .map_err(|_| StoreError::Decode(format!("non-numeric count '{raw}'")))
    }

    async fn entities_page(
        &self,
        predicate: &PredicateId,
        position: Position,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<EntityId>, StoreError> {
        let rows = self
            .select(&query::entities_page(
                predicate, position, limit, offset, &self.ns,
            ))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| match self.ns.compact(IdKind::Entity, iri(row, "entity")?)? {
                GraphId::Entity(e) => Some(e),
                GraphId::Predicate(_) => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Read one HTTP request (headers plus `Content-Length` body) off the stream.
    fn read_request(stream: &mut std::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0_u8; 1024];
        loop {
            let n = stream.read(&mut chunk).unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|l| l.split_once(':'))
                    .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// Endpoint that answers every request with `response`.
    fn stub_endpoint(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for mut stream in listener.incoming().flatten() {
                read_request(&mut stream);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}/repositories/test")
    }

    /// Endpoint that accepts connections and never replies.
    fn silent_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming().flatten() {
                held.push(stream);
            }
        });
        format!("http://{addr}/repositories/test")
    }

    fn store_at(endpoint: String, timeout_secs: u64) -> SparqlStore {
        SparqlStore::new(&StoreConfig {
            endpoint,
            timeout_secs,
            ..StoreConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_ask_response() {
        let resp = parse_response(r#"{"head": {}, "boolean": true}"#).unwrap();
        assert!(resp.into_boolean().unwrap());
    }

    #[test]
    fn test_parse_select_response() {
        let body = r#"{
            "head": {"vars": ["item", "text"]},
            "results": {"bindings": [
                {"item": {"type": "uri", "value": "http://www.wikidata.org/entity/Q41421"},
                 "text": {"type": "literal", "xml:lang": "en", "value": "Michael Jordan"}}
            ]}
        }"#;
        let rows = parse_response(body).unwrap().into_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            iri(&rows[0], "item"),
            Some("http://www.wikidata.org/entity/Q41421")
        );
        assert_eq!(value(&rows[0], "text"), Some("Michael Jordan"));
        assert_eq!(iri(&rows[0], "text"), None);
    }

    #[test]
    fn test_select_without_results_is_decode_error() {
        let resp = parse_response(r#"{"head": {}}"#).unwrap();
        assert!(matches!(resp.into_rows(), Err(StoreError::Decode(_))));
        assert!(matches!(
            parse_response("<html>oops</html>"),
            Err(StoreError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_failure() {
        let config = StoreConfig {
            endpoint: "http://127.0.0.1:9/repositories/none".to_string(),
            timeout_secs: 5,
            ..StoreConfig::default()
        };
        let store = SparqlStore::new(&config).unwrap();
        let err = store.ping().await.unwrap_err();
        assert!(err.is_fatal(), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn test_bad_request_is_malformed_query_with_query_text() {
        let endpoint = stub_endpoint(
            "HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain\r\nContent-Length: 20\r\nConnection: close\r\n\r\nMALFORMED QUERY: bad",
        );
        let store = store_at(endpoint, 5);

        let err = store.exists(&"Q1".parse().unwrap()).await.unwrap_err();

        match &err {
            StoreError::MalformedQuery { query, message } => {
                assert!(
                    query.contains("<http://www.wikidata.org/entity/Q1>"),
                    "query text missing expanded IRI: {query}"
                );
                assert_eq!(message, "MALFORMED QUERY: bad");
            }
            other => panic!("expected MalformedQuery, got {other:?}"),
        }
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_server_error_is_not_fatal() {
        let endpoint = stub_endpoint(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy",
        );
        let store = store_at(endpoint, 5);

        let err = store.ping().await.unwrap_err();

        assert_eq!(
            err,
            StoreError::Http {
                status: 503,
                message: "busy".into()
            }
        );
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_silent_endpoint_times_out() {
        let store = store_at(silent_endpoint(), 1);

        let err = store.ping().await.unwrap_err();

        assert!(matches!(err, StoreError::Timeout(_)), "unexpected error: {err:?}");
        assert!(err.is_fatal());
    }
}
