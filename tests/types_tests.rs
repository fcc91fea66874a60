//! Tests for core types and delta accumulation.

use cadence::accumulator::DeltaAccumulator;
use cadence::bus::ControlSignal;
use cadence::error::CadenceError;
use cadence::types::*;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn message_constructors_set_role_and_origin() {
    assert_eq!(Message::user("Hello").role, Role::User);
    assert_eq!(Message::system("Be brief.").text(), "Be brief.");

    let injected = Message::intervention("Keep going.");
    assert_eq!(injected.role, Role::User);
    assert_eq!(injected.origin, MessageOrigin::Intervention);

    let placeholder = Message::placeholder();
    assert!(placeholder.is_placeholder());
    assert_eq!(placeholder.text(), EMPTY_TURN_PLACEHOLDER);

    let handoff = Message::handoff("planner", "coder", Some("Plan is ready."));
    assert_eq!(handoff.role, Role::System);
    assert!(handoff.text().contains("'planner' to agent 'coder'"));
    assert!(handoff.text().contains("Plan is ready."));
}

#[test]
fn tool_result_message_keeps_strings_verbatim() {
    let text = Message::tool_result("call_1", &json!("plain"), false);
    assert_eq!(text.text(), "plain");
    assert_eq!(text.tool_call_id.as_deref(), Some("call_1"));

    let object = ToolResult::error("call_2", "boom").into_message();
    assert!(object.is_error);
    assert_eq!(object.role, Role::Tool);
}

#[test]
fn message_serde_omits_empty_fields() {
    let msg = Message::user("test");
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["role"], "user");
    assert!(value.get("tool_calls").is_none());
    assert!(value.get("reasoning").is_none());

    let back: Message = serde_json::from_value(value).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn control_signals_parse_from_wire_json() {
    let inject =
        ControlSignal::from_value(json!({ "kind": "injectMessage", "text": "hi" })).unwrap();
    assert_eq!(
        inject,
        ControlSignal::InjectMessage {
            text: "hi".into(),
            intervention: false,
        }
    );
    let start = ControlSignal::from_value(json!({ "kind": "start", "prompt": "go" })).unwrap();
    assert!(matches!(start, ControlSignal::Start { agent_id: None, .. }));

    let err = ControlSignal::from_value(json!({ "kind": "rewind" })).unwrap_err();
    assert!(matches!(err, CadenceError::UnknownControlSignal(_)));
}

#[test]
fn fragmented_stream_accumulates_into_one_message() {
    let mut acc = DeltaAccumulator::new();
    let deltas = vec![
        StreamDelta::reasoning("Need the weather. "),
        StreamDelta::text("Checking"),
        StreamDelta::text("..."),
        StreamDelta::tool_call_start(0, "call_w", "weather"),
        StreamDelta::tool_call_arguments(0, r#"{"city":"#),
        StreamDelta::tool_call_arguments(0, r#""Oslo"}"#),
        StreamDelta::finish(FinishReason::ToolCalls),
    ];

    let mut finished = None;
    for delta in deltas {
        let update = acc.accumulate(delta);
        if update.is_final() {
            finished = update.finished;
        }
    }

    let output = finished.expect("turn finished");
    assert_eq!(output.content.as_deref(), Some("Checking..."));
    assert_eq!(output.reasoning.as_deref(), Some("Need the weather. "));
    assert_eq!(output.tool_calls.len(), 1);
    assert_eq!(output.tool_calls[0].arguments, Some(json!({ "city": "Oslo" })));
    assert!(acc.finish().is_none());

    let message = output.to_message();
    assert_eq!(message.role, Role::Assistant);
    assert_eq!(message.tool_calls[0].name, "weather");
}

#[test]
fn stream_delta_helpers_mark_terminal_deltas() {
    assert!(!StreamDelta::text("a").is_terminal());
    assert!(StreamDelta::finish(FinishReason::Stop).is_terminal());
    let failed = StreamDelta::failure("backend overloaded");
    assert!(failed.is_terminal());
    assert_eq!(failed.finish_reason, Some(FinishReason::Error));

    let handoff = StreamDelta::finish(FinishReason::Stop).with_directive(
        ContinuationDirective::Handoff {
            agent_id: "reviewer".into(),
            summary: None,
        },
    );
    assert_eq!(
        serde_json::to_value(&handoff.directive).unwrap(),
        json!({ "type": "handoff", "agent_id": "reviewer" })
    );
}
