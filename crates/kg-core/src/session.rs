//! Per-task state: identifier provenance and the submitted answer.
//!
//! A fresh [`TaskSession`] is created for every task and passed by `&mut` into each
//! capability invocation, so repeated or concurrent tasks never share provenance.

use serde_json::Value;
use std::collections::BTreeSet;

/// Identifiers the graph tool has itself returned to the model during one task.
///
/// Grows monotonically: there is no removal API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    ids: BTreeSet<String>,
}

impl Provenance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: impl Into<String>) {
        self.ids.insert(id.into());
    }

    pub fn record_all<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids.extend(ids.into_iter().map(Into::into));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

/// The final answer slot plus the identifiers seeded into the task up front.
#[derive(Debug, Clone, Default)]
pub struct AnswerState {
    answer: Option<Value>,
    initial_ids: Option<BTreeSet<String>>,
}

impl AnswerState {
    pub fn new(initial_ids: Option<BTreeSet<String>>) -> Self {
        Self {
            answer: None,
            initial_ids,
        }
    }

    /// Record the accepted answer. Callers validate before accepting.
    pub fn accept(&mut self, answer: Value) {
        self.answer = Some(answer);
    }

    pub fn answer(&self) -> Option<&Value> {
        self.answer.as_ref()
    }

    pub fn is_answered(&self) -> bool {
        self.answer.is_some()
    }

    pub fn take(&mut self) -> Option<Value> {
        self.answer.take()
    }

    pub fn initial_ids(&self) -> Option<&BTreeSet<String>> {
        self.initial_ids.as_ref()
    }
}

/// All mutable state of one task. The graph tool writes `provenance`; the answer tool
/// writes `answer` and reads `provenance`.
#[derive(Debug, Clone, Default)]
pub struct TaskSession {
    pub provenance: Provenance,
    pub answer: AnswerState,
}

impl TaskSession {
    pub fn new(initial_ids: Option<BTreeSet<String>>) -> Self {
        Self {
            provenance: Provenance::new(),
            answer: AnswerState::new(initial_ids),
        }
    }

    /// Is `id` legitimately citable: surfaced by a tool or seeded into the task?
    pub fn is_known(&self, id: &str) -> bool {
        self.provenance.contains(id)
            || self
                .answer
                .initial_ids()
                .is_some_and(|seed| seed.contains(id))
    }

    /// The referenced identifiers that are neither in provenance nor seeded.
    pub fn unknown_ids<'a, I>(&self, referenced: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        referenced
            .into_iter()
            .filter(|id| !self.is_known(id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_provenance_only_grows() {
        let mut prov = Provenance::new();
        prov.record("Q1");
        prov.record_all(["Q2", "P31"]);
        prov.record("Q1");
        assert_eq!(prov.len(), 3);
        assert!(prov.contains("P31"));
    }

    #[test]
    fn test_unknown_ids_considers_seed_and_provenance() {
        let mut session = TaskSession::new(Some(ids(&["Q3"])));
        session.provenance.record_all(["Q1", "Q2"]);

        let ok = ids(&["Q1", "Q3"]);
        assert!(session.unknown_ids(&ok).is_empty());

        let bad = ids(&["Q1", "Q9"]);
        assert_eq!(session.unknown_ids(&bad), vec!["Q9".to_string()]);
    }

    #[test]
    fn test_no_seed_means_only_provenance() {
        let mut session = TaskSession::new(None);
        session.provenance.record("Q1");
        assert!(session.is_known("Q1"));
        assert!(!session.is_known("Q3"));
    }

    #[test]
    fn test_answer_starts_unset() {
        let mut state = AnswerState::new(None);
        assert!(!state.is_answered());
        state.accept(Value::String("Q42".into()));
        assert_eq!(state.answer(), Some(&Value::String("Q42".into())));
        assert_eq!(state.take(), Some(Value::String("Q42".into())));
        assert!(!state.is_answered());
    }
}
