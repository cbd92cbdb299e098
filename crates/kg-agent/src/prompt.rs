//! Task prompts and the tool-use system instructions.
//!
//! Templates use `{{key}}` placeholders. Built-in templates cover entity linking and
//! contradiction generation; a template directory may add or override tasks as
//! `<dir>/<task>.txt`.

use kg_core::config::CallSyntax;
use kg_core::tool::ToolSpec;
use regex::Regex;
use serde_json::json;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromptError {
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("task {task} needs a value for '{key}'")]
    MissingKey { task: String, key: String },
    #[error("failed to read template {path}: {message}")]
    Io { path: String, message: String },
}

/// Turns a task name and keyword arguments into the first user turn.
pub trait PromptRenderer: Send + Sync {
    fn render(&self, task: &str, kwargs: &BTreeMap<String, String>)
    -> Result<String, PromptError>;
}

const ENTITY_LINKING: &str = "\
Identify every entity mentioned in the text below and link it to its identifier in the \
knowledge graph. Use the available functions to search the graph; do not guess identifiers.

Text: {{text}}

When you are done, call submit_final_answer with one line per entity in the form \
[mention:ID].";

const CONTRADICTION_GENERATION: &str = "\
You are given a passage and the facts extracted from it as knowledge-graph triples, one per \
line, in the form [subject label:ID] [predicate label:ID] [object label:ID].

Passage: {{passage}}

Triples:
{{triples}}

Write new triples that contradict the passage. Every identifier you use must either appear \
in the triples above or have been returned by one of the functions. Use the functions to \
find suitable entities and predicates.

When you are done, call submit_final_answer with your triples, one per line, in exactly the \
same [label:ID] [label:ID] [label:ID] form.";

fn builtin(task: &str) -> Option<&'static str> {
    match task {
        "entity_linking" => Some(ENTITY_LINKING),
        "contradiction_generation" => Some(CONTRADICTION_GENERATION),
        _ => None,
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("placeholder pattern is valid"))
}

/// Substitute `{{key}}` placeholders. Every placeholder must have a value.
pub fn render_template(
    task: &str,
    template: &str,
    kwargs: &BTreeMap<String, String>,
) -> Result<String, PromptError> {
    let re = placeholder_re();
    if let Some(key) = re
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .find(|k| !kwargs.contains_key(k))
    {
        return Err(PromptError::MissingKey {
            task: task.to_string(),
            key,
        });
    }
    Ok(re
        .replace_all(template, |caps: &regex::Captures<'_>| {
            kwargs.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}

/// Built-in templates, optionally extended from a directory.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    dir: Option<PathBuf>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    fn template(&self, task: &str) -> Result<Cow<'static, str>, PromptError> {
        let valid_name =
            !task.is_empty() && task.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_name {
            return Err(PromptError::UnknownTask(task.to_string()));
        }
        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{task}.txt"));
            if path.exists() {
                return std::fs::read_to_string(&path)
                    .map(Cow::Owned)
                    .map_err(|e| PromptError::Io {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    });
            }
        }
        builtin(task)
            .map(Cow::Borrowed)
            .ok_or_else(|| PromptError::UnknownTask(task.to_string()))
    }
}

impl PromptRenderer for TemplateRenderer {
    fn render(
        &self,
        task: &str,
        kwargs: &BTreeMap<String, String>,
    ) -> Result<String, PromptError> {
        let template = self.template(task)?;
        render_template(task, &template, kwargs)
    }
}

/// System-turn text teaching the model the available functions and the call syntax.
pub fn tool_instructions(tools: &[ToolSpec], syntax: CallSyntax) -> String {
    let mut out = String::from(
        "You have access to the following functions. Use them to gather information from \
         the knowledge graph before answering.\n\n",
    );
    for tool in tools {
        let spec = json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            }
        });
        let _ = writeln!(out, "{spec}");
    }
    out.push('\n');
    match syntax {
        CallSyntax::Json => out.push_str(
            "To call a function, respond with a JSON object of the form \
             {\"name\": function name, \"parameters\": dictionary of argument name and its value}.",
        ),
        CallSyntax::Tag => out.push_str(
            "To call a function, respond in the form \
             <function=function_name>{\"argument\": \"value\"}</function>.",
        ),
    }
    out.push_str(
        "\nOnly call one function at a time and wait for its result. \
         Do not use variables.",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kwargs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_builtin_contradiction_prompt() {
        let text = TemplateRenderer::new()
            .render(
                "contradiction_generation",
                &kwargs(&[("passage", "Adams wrote books."), ("triples", "[a:Q1] [b:P2] [c:Q3]")]),
            )
            .unwrap();
        assert!(text.contains("Passage: Adams wrote books."));
        assert!(text.contains("[a:Q1] [b:P2] [c:Q3]"));
        assert!(!text.contains("{{"));
    }

    #[test]
    fn test_missing_key_is_error() {
        let err = TemplateRenderer::new()
            .render("entity_linking", &BTreeMap::new())
            .unwrap_err();
        assert_eq!(
            err,
            PromptError::MissingKey {
                task: "entity_linking".into(),
                key: "text".into()
            }
        );
    }

    #[test]
    fn test_directory_template_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("custom.txt"), "Answer about {{ topic }}.").unwrap();
        let renderer = TemplateRenderer::with_dir(tmp.path());
        assert_eq!(
            renderer
                .render("custom", &kwargs(&[("topic", "Q42")]))
                .unwrap(),
            "Answer about Q42."
        );
        assert!(matches!(
            renderer.render("../custom", &BTreeMap::new()),
            Err(PromptError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_instructions_name_the_syntax() {
        let tools = vec![ToolSpec {
            name: "search_entities".into(),
            description: "Search.".into(),
            parameters: json!({"type": "object"}),
        }];
        let tag = tool_instructions(&tools, CallSyntax::Tag);
        assert!(tag.contains("<function=function_name>"));
        assert!(tag.contains("\"search_entities\""));
        let json_mode = tool_instructions(&tools, CallSyntax::Json);
        assert!(json_mode.contains("\"parameters\""));
    }
}
