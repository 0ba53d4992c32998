//! Unit tests for the event normalizer.
//!
//! The parser is the only pure component: one NDJSON line in, zero or
//! more normalized events out, never an error.

use agent_relay::models::event::StreamEvent;
use agent_relay::stream::parser::parse_line;

const SESSION: &str = "sess-1";

#[test]
fn text_block_becomes_text_delta() {
    let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello"}]}}"#;
    let events = parse_line(line, SESSION);
    assert_eq!(
        events,
        vec![StreamEvent::TextDelta {
            session_id: SESSION.into(),
            text: "hello".into(),
        }]
    );
}

#[test]
fn empty_text_block_is_skipped() {
    let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":""}]}}"#;
    assert!(parse_line(line, SESSION).is_empty());
}

#[test]
fn thinking_block_becomes_thinking_delta() {
    let line =
        r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"hmm"}]}}"#;
    let events = parse_line(line, SESSION);
    assert_eq!(
        events,
        vec![StreamEvent::ThinkingDelta {
            session_id: SESSION.into(),
            thinking: "hmm".into(),
        }]
    );
}

#[test]
fn empty_thinking_block_is_skipped() {
    let line =
        r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":""}]}}"#;
    assert!(parse_line(line, SESSION).is_empty());
}

#[test]
fn tool_use_block_becomes_tool_use_start() {
    let line = r#"{"type":"assistant","message":{"content":[
        {"type":"tool_use","name":"Read","id":"tu-1","input":{"file_path":"/tmp/a"}}
    ]}}"#;
    let events = parse_line(line, SESSION);
    assert_eq!(
        events,
        vec![StreamEvent::ToolUseStart {
            session_id: SESSION.into(),
            tool_name: "Read".into(),
            tool_id: "tu-1".into(),
            input: serde_json::json!({"file_path": "/tmp/a"}),
        }]
    );
}

#[test]
fn tool_result_with_string_content() {
    let line = r#"{"type":"assistant","message":{"content":[
        {"type":"tool_result","tool_use_id":"tu-1","content":"file contents","is_error":false}
    ]}}"#;
    let events = parse_line(line, SESSION);
    assert_eq!(
        events,
        vec![StreamEvent::ToolResult {
            session_id: SESSION.into(),
            tool_id: "tu-1".into(),
            output: "file contents".into(),
            is_error: false,
        }]
    );
}

#[test]
fn tool_result_with_block_list_content_joins_text_blocks() {
    let line = r#"{"type":"assistant","message":{"content":[
        {"type":"tool_result","tool_use_id":"tu-2","is_error":true,"content":[
            {"type":"text","text":"line one"},
            {"type":"image","source":"ignored"},
            {"type":"text","text":"line two"}
        ]}
    ]}}"#;
    let events = parse_line(line, SESSION);
    assert_eq!(
        events,
        vec![StreamEvent::ToolResult {
            session_id: SESSION.into(),
            tool_id: "tu-2".into(),
            output: "line one\nline two".into(),
            is_error: true,
        }]
    );
}

#[test]
fn multiple_blocks_map_one_to_one_in_order() {
    let line = r#"{"type":"assistant","message":{"content":[
        {"type":"thinking","thinking":"pondering"},
        {"type":"text","text":"answer"},
        {"type":"tool_use","name":"Bash","id":"tu-3","input":{}}
    ]}}"#;
    let events = parse_line(line, SESSION);
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], StreamEvent::ThinkingDelta { .. }));
    assert!(matches!(events[1], StreamEvent::TextDelta { .. }));
    assert!(matches!(events[2], StreamEvent::ToolUseStart { .. }));
}

#[test]
fn result_message_becomes_message_complete() {
    let line = r#"{"type":"result","result":"all done","usage":{"output_tokens":12},"cost_usd":0.034}"#;
    let events = parse_line(line, SESSION);
    assert_eq!(
        events,
        vec![StreamEvent::MessageComplete {
            session_id: SESSION.into(),
            result_text: "all done".into(),
            usage: Some(serde_json::json!({"output_tokens": 12})),
            cost_usd: Some(0.034),
        }]
    );
}

#[test]
fn result_message_prefers_wire_session_id() {
    let line = r#"{"type":"result","session_id":"wire-sess","result":"done"}"#;
    let events = parse_line(line, SESSION);
    assert_eq!(events[0].session_id(), "wire-sess");
}

#[test]
fn error_message_carries_text_and_code() {
    let line = r#"{"type":"error","message":"rate limited","code":"rate_limit"}"#;
    let events = parse_line(line, SESSION);
    assert_eq!(
        events,
        vec![StreamEvent::Error {
            session_id: SESSION.into(),
            error: "rate limited".into(),
            code: Some("rate_limit".into()),
        }]
    );
}

#[test]
fn error_message_without_text_gets_placeholder() {
    let line = r#"{"type":"error"}"#;
    let events = parse_line(line, SESSION);
    assert_eq!(
        events,
        vec![StreamEvent::Error {
            session_id: SESSION.into(),
            error: "Unknown error".into(),
            code: None,
        }]
    );
}

#[test]
fn malformed_json_yields_nothing() {
    assert!(parse_line("not json at all", SESSION).is_empty());
    assert!(parse_line("{\"type\":", SESSION).is_empty());
    assert!(parse_line("", SESSION).is_empty());
}

#[test]
fn unknown_outer_kind_yields_nothing() {
    let line = r#"{"type":"system","subtype":"init","session_id":"x"}"#;
    assert!(parse_line(line, SESSION).is_empty());
}

#[test]
fn unknown_content_block_is_skipped() {
    let line = r#"{"type":"assistant","message":{"content":[
        {"type":"hologram","text":"??"},
        {"type":"text","text":"kept"}
    ]}}"#;
    let events = parse_line(line, SESSION);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], StreamEvent::TextDelta { ref text, .. } if text == "kept"));
}

#[test]
fn assistant_without_message_yields_nothing() {
    assert!(parse_line(r#"{"type":"assistant"}"#, SESSION).is_empty());
}
