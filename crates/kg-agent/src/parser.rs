//! Extract a single tool call from generated text.
//!
//! Two encodings are recognised:
//! - `json`: `{"name": "search_entities", "parameters": {"query": "..."}}` anywhere in the text
//! - `tag`: `<function=search_entities>{"query": "..."}</function>`
//!
//! All occurrences are located; only the first is returned. Calls may span lines.

use kg_core::config::CallSyntax;
use kg_core::tool::ToolCall;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Advisory shown to the model when it emitted more than one call.
pub const MULTIPLE_CALLS_NOTICE: &str =
    "Only one function call is allowed. Executing the first one.";

/// The first call found in a piece of generated text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCall {
    pub name: String,
    /// `Err` carries the reason the payload is not a JSON object.
    pub arguments: Result<Map<String, Value>, String>,
    /// Set when more calls were present than the one returned.
    pub diagnostic: Option<&'static str>,
}

impl ParsedCall {
    /// The call with its decoded arguments, or `None` when the payload was malformed.
    pub fn tool_call(&self) -> Option<ToolCall> {
        let arguments = self.arguments.as_ref().ok()?.clone();
        Some(ToolCall {
            name: self.name.clone(),
            arguments,
        })
    }
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<function=(\w+)>(.*?)</function>").expect("tag call pattern is valid")
    })
}

fn json_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""name"\s*:\s*"(\w+)"\s*,\s*"parameters"\s*:\s*\{"#)
            .expect("json call pattern is valid")
    })
}

/// Length of the balanced `{...}` object at the start of `s`, honouring string escapes.
fn balanced_object_len(s: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escape = false;
    let mut depth = 0_usize;

    for (i, ch) in s.char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Decode a payload into an argument map. An empty payload means no arguments.
pub fn parse_arguments(payload: &str) -> Result<Map<String, Value>, String> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!(
            "function arguments must be a JSON object, got {}",
            kind_of(&other)
        )),
        Err(e) => Err(format!("function arguments are not valid JSON: {e}")),
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn tag_calls(text: &str) -> Vec<(String, Result<Map<String, Value>, String>)> {
    tag_re()
        .captures_iter(text)
        .map(|caps| (caps[1].to_string(), parse_arguments(&caps[2])))
        .collect()
}

fn json_calls(text: &str) -> Vec<(String, Result<Map<String, Value>, String>)> {
    let mut calls = Vec::new();
    let mut consumed = 0;
    for caps in json_header_re().captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        // A header nested inside an earlier payload is part of that call.
        if whole.start() < consumed {
            continue;
        }
        let body_start = whole.end() - 1;
        let rest = &text[body_start..];
        let arguments = match balanced_object_len(rest) {
            Some(len) => {
                consumed = body_start + len;
                parse_arguments(&rest[..len])
            }
            None => {
                consumed = text.len();
                Err("function arguments are not a complete JSON object".to_string())
            }
        };
        calls.push((caps[1].to_string(), arguments));
    }
    calls
}

/// Find the first call in `text`. `None` means the text contains no call syntax at all.
pub fn parse_tool_call(text: &str, syntax: CallSyntax) -> Option<ParsedCall> {
    let calls = match syntax {
        CallSyntax::Json => json_calls(text),
        CallSyntax::Tag => tag_calls(text),
    };
    let diagnostic = (calls.len() > 1).then_some(MULTIPLE_CALLS_NOTICE);
    calls
        .into_iter()
        .next()
        .map(|(name, arguments)| ParsedCall {
            name,
            arguments,
            diagnostic,
        })
}
