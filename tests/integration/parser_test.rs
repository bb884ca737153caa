//! Tool-Call Parser Integration Tests
//!
//! Drives model output through the parser and into the tool registry:
//! - Text without recoverable calls parses to nothing
//! - Serialized calls parse back to the same name and arguments
//! - Native and XML-dialect calls reach the built-in tools

use serde_json::json;
use tempfile::TempDir;

use orchestrator_llm::{LlmResponse, StopReason, ToolCall};
use orchestrator_tools::{
    format_tool_result, parse_tool_calls, register_builtin_tools, ToolExecutionContext,
    ToolRegistry,
};

fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry);
    registry
}

// ============================================================================
// Robustness
// ============================================================================

#[test]
fn test_unrecoverable_text_yields_no_calls() {
    for text in [
        "",
        "   \n",
        "not a tool call",
        "<tool_call>{broken json</tool_call>",
        "<tool_call></tool_call>",
        "<tool_call>[1, 2, 3]</tool_call>",
    ] {
        assert!(
            parse_tool_calls(text).is_empty(),
            "expected no calls from {:?}",
            text
        );
    }
}

#[test]
fn test_surrounding_prose_is_ignored() {
    let text = "I will read the file first.\n\
        <tool_call>{\"name\": \"read_file\", \"arguments\": {\"path\": \"notes.txt\"}}</tool_call>\n\
        Then I will summarize it.";
    let calls = parse_tool_calls(text);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "read_file");
    assert_eq!(calls[0].arguments_value(), json!({"path": "notes.txt"}));
}

// ============================================================================
// Round Trip
// ============================================================================

#[test]
fn test_serialized_call_parses_back() {
    let value = json!({"name": "read_file", "arguments": {"path": "a.txt"}});
    let text = format!("<tool_call>{}</tool_call>", value);

    let calls = parse_tool_calls(&text);
    assert_eq!(calls.len(), 1, "one serialized call should parse to one call");
    assert_eq!(calls[0].name, "read_file");
    assert_eq!(calls[0].arguments_value(), json!({"path": "a.txt"}));
}

#[test]
fn test_native_calls_rendered_for_parsing() {
    let response = LlmResponse {
        content: Some("Reading both files.".to_string()),
        tool_calls: vec![
            ToolCall {
                id: "call_1".to_string(),
                name: "read_file".to_string(),
                arguments: json!({"path": "a.txt"}),
            },
            ToolCall {
                id: String::new(),
                name: "write_file".to_string(),
                arguments: json!({"path": "b.txt", "content": "x"}),
            },
        ],
        stop_reason: StopReason::ToolUse,
        model: "QWEN_4B".to_string(),
    };

    let calls = parse_tool_calls(&response.text_for_parsing());
    let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["read_file", "write_file"]);
    assert_eq!(calls[1].arguments_value(), json!({"path": "b.txt", "content": "x"}));
}

// ============================================================================
// Parsed Calls Through the Registry
// ============================================================================

#[tokio::test]
async fn test_xml_call_writes_then_json_call_reads() {
    let dir = TempDir::new().unwrap();
    let registry = builtin_registry();
    let ctx = ToolExecutionContext::new("session-1", dir.path());

    let write = parse_tool_calls(
        "<function=write_file>\n<parameter=path>out/notes.txt</parameter>\n\
         <parameter=content>line one\\nline two</parameter>\n</function>",
    );
    assert_eq!(write.len(), 1);
    let result = registry
        .execute(&write[0].name, &ctx, write[0].arguments_value())
        .await;
    assert!(result.success, "write failed: {:?}", result.error);

    let read = parse_tool_calls(
        r#"<tool_call>{"name": "read_file", "arguments": {"path": "out/notes.txt"}}</tool_call>"#,
    );
    let result = registry
        .execute(&read[0].name, &ctx, read[0].arguments_value())
        .await;
    assert_eq!(result.output.as_deref(), Some("line one\nline two"));
    assert_eq!(
        format_tool_result("read_file", &result),
        "[Tool read_file result]\nline one\nline two"
    );
}

#[tokio::test]
async fn test_parsed_call_to_unknown_tool_is_an_error_result() {
    let dir = TempDir::new().unwrap();
    let registry = builtin_registry();
    let ctx = ToolExecutionContext::new("session-1", dir.path());

    let calls = parse_tool_calls(r#"<tool_call>{"name": "search_web", "arguments": {}}</tool_call>"#);
    let result = registry
        .execute(&calls[0].name, &ctx, calls[0].arguments_value())
        .await;
    assert!(!result.success);
    assert!(result.to_content().contains("Unknown tool 'search_web'"));
}

#[tokio::test]
async fn test_parsed_call_missing_argument_is_rejected() {
    let dir = TempDir::new().unwrap();
    let registry = builtin_registry();
    let ctx = ToolExecutionContext::new("session-1", dir.path());

    let calls = parse_tool_calls(r#"<tool_call>{"name": "read_file", "arguments": {}}</tool_call>"#);
    assert_eq!(calls.len(), 1);
    let result = registry
        .execute(&calls[0].name, &ctx, calls[0].arguments_value())
        .await;
    assert!(!result.success);
    assert!(result.to_content().contains("Missing required argument 'path'"));
}

#[tokio::test]
async fn test_missing_file_is_reported_in_output() {
    let dir = TempDir::new().unwrap();
    let registry = builtin_registry();
    let ctx = ToolExecutionContext::new("session-1", dir.path());

    let result = registry
        .execute("read_file", &ctx, json!({"path": "absent.txt"}))
        .await;
    assert_eq!(
        result.to_content(),
        "Error: File 'absent.txt' does not exist."
    );
}
