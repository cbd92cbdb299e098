use kg_agent::parser::{MULTIPLE_CALLS_NOTICE, parse_tool_call};
use kg_core::config::CallSyntax;
use serde_json::json;

#[test]
fn test_single_json_call_inside_prose() {
    let text = r#"Let me look that up. {"name": "search_entities", "parameters": {"query": "Chicago Bulls"}} Then I'll answer."#;
    let call = parse_tool_call(text, CallSyntax::Json).unwrap();
    assert_eq!(call.name, "search_entities");
    assert_eq!(
        call.arguments.unwrap().get("query"),
        Some(&json!("Chicago Bulls"))
    );
    assert!(call.diagnostic.is_none());
}

#[test]
fn test_multiple_calls_keep_the_first() {
    let text = r#"{"name": "get_entity_description", "parameters": {"entity_id": "Q1"}}
{"name": "get_entity_description", "parameters": {"entity_id": "Q2"}}"#;
    let call = parse_tool_call(text, CallSyntax::Json).unwrap();
    assert_eq!(call.arguments.unwrap()["entity_id"], json!("Q1"));
    assert_eq!(call.diagnostic, Some(MULTIPLE_CALLS_NOTICE));
}

#[test]
fn test_no_call() {
    assert!(parse_tool_call("The answer is Q42.", CallSyntax::Json).is_none());
    assert!(parse_tool_call("The answer is Q42.", CallSyntax::Tag).is_none());
    assert!(parse_tool_call("", CallSyntax::Json).is_none());
}

#[test]
fn test_tag_call_spans_lines() {
    let text = "<function=search_predicates>{\n  \"query\": \"member of\"\n}</function>";
    let call = parse_tool_call(text, CallSyntax::Tag).unwrap();
    assert_eq!(call.name, "search_predicates");
    assert_eq!(call.arguments.unwrap()["query"], json!("member of"));
}

#[test]
fn test_multiple_tag_calls_keep_the_first() {
    let text = "<function=get_entity_description>{\"entity_id\": \"Q1\"}</function>\n\
                <function=search_entities>{\"query\": \"Chicago\"}</function>";
    let call = parse_tool_call(text, CallSyntax::Tag).unwrap();
    assert_eq!(call.name, "get_entity_description");
    assert_eq!(call.arguments.unwrap()["entity_id"], json!("Q1"));
    assert_eq!(call.diagnostic, Some(MULTIPLE_CALLS_NOTICE));
}

#[test]
fn test_tag_syntax_ignores_json_calls() {
    let text = r#"{"name": "search_entities", "parameters": {"query": "x"}}"#;
    assert!(parse_tool_call(text, CallSyntax::Tag).is_none());
}

#[test]
fn test_tag_call_without_arguments() {
    let call = parse_tool_call("<function=ping></function>", CallSyntax::Tag).unwrap();
    assert_eq!(call.name, "ping");
    assert!(call.arguments.unwrap().is_empty());
}

#[test]
fn test_multiline_json_call() {
    let text = "{\n  \"name\": \"submit_final_answer\",\n  \"parameters\": {\n    \"answer\": \"[a:Q1] [b:P2] [c:Q3]\\n[a:Q1] [b:P2] [d:Q4]\"\n  }\n}";
    let call = parse_tool_call(text, CallSyntax::Json).unwrap();
    assert_eq!(call.name, "submit_final_answer");
    let answer = call.arguments.unwrap()["answer"].clone();
    assert_eq!(answer.as_str().unwrap().lines().count(), 2);
}

#[test]
fn test_malformed_payload_is_still_a_call() {
    let tag = parse_tool_call(
        "<function=search_entities>query=Chicago</function>",
        CallSyntax::Tag,
    )
    .unwrap();
    assert_eq!(tag.name, "search_entities");
    assert!(tag.arguments.is_err());

    let json_call = parse_tool_call(
        r#"{"name": "search_entities", "parameters": {"query": "unterminated"#,
        CallSyntax::Json,
    )
    .unwrap();
    assert!(json_call.arguments.is_err());
}
