//! Unit tests for observer-facing event serialization.
//!
//! The serialized shape is the wire protocol; these tests pin the exact
//! field layout the frontend consumes.

use agent_relay::models::event::StreamEvent;

fn to_value(event: &StreamEvent) -> serde_json::Value {
    serde_json::to_value(event).expect("event serializes")
}

#[test]
fn text_delta_wire_shape() {
    let event = StreamEvent::TextDelta {
        session_id: "s1".into(),
        text: "hi".into(),
    };
    assert_eq!(
        to_value(&event),
        serde_json::json!({"type": "text_delta", "session_id": "s1", "text": "hi"})
    );
}

#[test]
fn thinking_delta_wire_shape() {
    let event = StreamEvent::ThinkingDelta {
        session_id: "s1".into(),
        thinking: "mull".into(),
    };
    assert_eq!(
        to_value(&event),
        serde_json::json!({"type": "thinking_delta", "session_id": "s1", "thinking": "mull"})
    );
}

#[test]
fn tool_use_start_wire_shape() {
    let event = StreamEvent::ToolUseStart {
        session_id: "s1".into(),
        tool_name: "Bash".into(),
        tool_id: "tu-9".into(),
        input: serde_json::json!({"command": "ls"}),
    };
    assert_eq!(
        to_value(&event),
        serde_json::json!({
            "type": "tool_use_start",
            "session_id": "s1",
            "tool_name": "Bash",
            "tool_id": "tu-9",
            "input": {"command": "ls"},
        })
    );
}

#[test]
fn message_complete_passes_usage_through_verbatim() {
    let event = StreamEvent::MessageComplete {
        session_id: "s1".into(),
        result_text: "done".into(),
        usage: Some(serde_json::json!({"input_tokens": 10, "output_tokens": 3})),
        cost_usd: Some(0.5),
    };
    assert_eq!(
        to_value(&event),
        serde_json::json!({
            "type": "message_complete",
            "session_id": "s1",
            "result_text": "done",
            "usage": {"input_tokens": 10, "output_tokens": 3},
            "cost_usd": 0.5,
        })
    );
}

#[test]
fn task_replay_nests_buffered_events() {
    let event = StreamEvent::TaskReplay {
        session_id: "s1".into(),
        events: vec![
            StreamEvent::MessageStart {
                session_id: "s1".into(),
            },
            StreamEvent::Cancelled {
                session_id: "s1".into(),
            },
        ],
        is_complete: true,
    };

    let value = to_value(&event);
    assert_eq!(value["type"], "task_replay");
    assert_eq!(value["is_complete"], true);
    assert_eq!(value["events"][0]["type"], "message_start");
    assert_eq!(value["events"][1]["type"], "cancelled");
}

#[test]
fn session_id_accessor_covers_every_variant() {
    let events = [
        StreamEvent::MessageStart {
            session_id: "s".into(),
        },
        StreamEvent::InputRequired {
            session_id: "s".into(),
        },
        StreamEvent::SessionTitle {
            session_id: "s".into(),
            title: "T".into(),
        },
        StreamEvent::error("s", "boom"),
    ];
    for event in &events {
        assert_eq!(event.session_id(), "s");
    }
}

#[test]
fn error_helper_has_no_code() {
    assert_eq!(
        to_value(&StreamEvent::error("s1", "boom")),
        serde_json::json!({"type": "error", "session_id": "s1", "error": "boom", "code": null})
    );
}
