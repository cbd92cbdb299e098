//! The terminal `submit_final_answer` capability and answer grammars.

use async_trait::async_trait;
use kg_core::session::TaskSession;
use kg_core::tool::{
    CapabilitySpec, Tool, ToolError, ToolOutput, decode_arguments, parameters_schema,
};
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

pub const SUBMIT_FINAL_ANSWER: &str = "submit_final_answer";
pub const ANSWER_ACCEPTED: &str = "Answer submitted successfully.";

/// A parsed answer plus every graph identifier it cites.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedAnswer {
    pub answer: Value,
    pub ids: BTreeSet<String>,
}

/// Checks raw answer text against an expected grammar.
pub trait AnswerValidator: Send + Sync {
    /// `Err` carries a reason meant for the model.
    fn validate(&self, text: &str) -> Result<ValidatedAnswer, String>;
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AnswerParams {
    /// The final answer to the task
    pub answer: String,
}

static CAPABILITIES: &[CapabilitySpec] = &[CapabilitySpec {
    name: SUBMIT_FINAL_ANSWER,
    description: "Submit the final answer to the task. Call this once you are done.",
    exposed: true,
    parameters: parameters_schema::<AnswerParams>,
}];

/// Accepts the final answer, optionally gated by a validator and by provenance.
#[derive(Default)]
pub struct AnswerTool {
    validator: Option<Arc<dyn AnswerValidator>>,
}

impl AnswerTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validator(validator: Arc<dyn AnswerValidator>) -> Self {
        Self {
            validator: Some(validator),
        }
    }

    pub fn capability_table() -> &'static [CapabilitySpec] {
        CAPABILITIES
    }

    fn submit(&self, text: String, session: &mut TaskSession) -> ToolOutput {
        let Some(validator) = &self.validator else {
            session.answer.accept(Value::String(text));
            info!("answer accepted without validation");
            return ToolOutput::terminal(ANSWER_ACCEPTED);
        };

        let validated = match validator.validate(&text) {
            Ok(v) => v,
            Err(reason) => {
                warn!(%reason, "answer rejected by validator");
                return ToolOutput::value(reason);
            }
        };

        let hallucinated = session.unknown_ids(&validated.ids);
        if !hallucinated.is_empty() {
            warn!(ids = ?hallucinated, "answer cites unknown identifiers");
            return ToolOutput::value(format!(
                "The answer contains identifiers that were not returned by any tool and were \
                 not given in the task: {}. Only use identifiers you have seen and try again.",
                hallucinated.join(", ")
            ));
        }

        session.answer.accept(validated.answer);
        info!(ids = validated.ids.len(), "answer accepted");
        ToolOutput::terminal(ANSWER_ACCEPTED)
    }
}

#[async_trait]
impl Tool for AnswerTool {
    fn name(&self) -> &'static str {
        "answer"
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
        if capability != SUBMIT_FINAL_ANSWER {
            return Err(ToolError::Runtime(format!(
                "answer tool has no capability {capability}"
            )));
        }
        let params: AnswerParams = decode_arguments(capability, arguments)?;
        Ok(self.submit(params.answer, session))
    }
}

fn triple_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\[([^:\]]+):([PQ]\d+)\]\s+\[([^:\]]+):([PQ]\d+)\]\s+\[([^:\]]+):([PQ]\d+)\]$",
        )
        .expect("triple line pattern is valid")
    })
}

/// One `[label:ID] [label:ID] [label:ID]` triple per line.
///
/// The parsed answer has id triples under `neg_non_formatted_wikidata_id_output` and
/// label triples under `neg_non_formatted_surface_output`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TripleAnswerParser;

impl AnswerValidator for TripleAnswerParser {
    fn validate(&self, text: &str) -> Result<ValidatedAnswer, String> {
        let mut id_triples = Vec::new();
        let mut label_triples = Vec::new();
        let mut ids = BTreeSet::new();

        for line in text.trim().lines().map(str::trim).filter(|l| !l.is_empty()) {
            let caps = triple_line_re()
                .captures(line)
                .ok_or_else(|| format!("Invalid format detected in line: {line}"))?;
            let labels = [&caps[1], &caps[3], &caps[5]].map(|s| s.trim().to_string());
            let triple = [&caps[2], &caps[4], &caps[6]].map(str::to_string);
            ids.extend(triple.iter().cloned());
            label_triples.push(labels);
            id_triples.push(triple);
        }

        if id_triples.is_empty() {
            return Err("The answer is empty. Submit at least one triple.".to_string());
        }

        Ok(ValidatedAnswer {
            answer: json!({
                "neg_non_formatted_wikidata_id_output": id_triples,
                "neg_non_formatted_surface_output": label_triples,
            }),
            ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(answer: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("answer".into(), Value::String(answer.into()));
        map
    }

    fn seeded_session() -> TaskSession {
        let mut session = TaskSession::new(Some(BTreeSet::from(["Q3".to_string()])));
        session.provenance.record_all(["Q1", "Q2", "P31"]);
        session
    }

    #[test]
    fn test_triple_grammar() {
        let parsed = TripleAnswerParser
            .validate("[Douglas Adams:Q42] [occupation:P106] [novelist:Q6625963]\n")
            .unwrap();
        assert_eq!(
            parsed.answer["neg_non_formatted_wikidata_id_output"],
            json!([["Q42", "P106", "Q6625963"]])
        );
        assert_eq!(
            parsed.answer["neg_non_formatted_surface_output"][0][2],
            "novelist"
        );
        assert_eq!(parsed.ids.len(), 3);
    }

    #[test]
    fn test_triple_grammar_rejects_bad_line() {
        let err = TripleAnswerParser
            .validate("[a:Q1] [b:P2] [c:Q3]\nQ1 P2 Q4")
            .unwrap_err();
        assert!(err.contains("Q1 P2 Q4"));
        assert!(TripleAnswerParser.validate("   ").is_err());
    }

    #[tokio::test]
    async fn test_unvalidated_answer_is_terminal() {
        let tool = AnswerTool::new();
        let mut session = TaskSession::new(None);
        let out = tool
            .invoke(SUBMIT_FINAL_ANSWER, args("Q42"), &mut session)
            .await
            .unwrap();
        assert!(out.terminal);
        assert_eq!(session.answer.answer(), Some(&json!("Q42")));
    }

    #[tokio::test]
    async fn test_known_ids_are_accepted() {
        let tool = AnswerTool::with_validator(Arc::new(TripleAnswerParser));
        let mut session = seeded_session();
        let out = tool
            .invoke(SUBMIT_FINAL_ANSWER, args("[a:Q1] [is a:P31] [c:Q3]"), &mut session)
            .await
            .unwrap();
        assert!(out.terminal);
        assert!(session.answer.is_answered());
    }

    #[tokio::test]
    async fn test_hallucinated_ids_are_named() {
        let tool = AnswerTool::with_validator(Arc::new(TripleAnswerParser));
        let mut session = seeded_session();
        let out = tool
            .invoke(SUBMIT_FINAL_ANSWER, args("[a:Q1] [is a:P31] [z:Q9]"), &mut session)
            .await
            .unwrap();
        assert!(!out.terminal);
        assert!(out.value.as_str().unwrap().contains("Q9"));
        assert!(!session.answer.is_answered());
    }

    #[tokio::test]
    async fn test_grammar_failure_is_not_terminal() {
        let tool = AnswerTool::with_validator(Arc::new(TripleAnswerParser));
        let mut session = seeded_session();
        let out = tool
            .invoke(SUBMIT_FINAL_ANSWER, args("Q1 is a Q3"), &mut session)
            .await
            .unwrap();
        assert!(!out.terminal);
        assert!(out.value.as_str().unwrap().starts_with("Invalid format"));
        assert!(!session.answer.is_answered());
    }
}
