mod support;

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::bus::{ControlSignal, EventPayload, SessionEndReason, TurnOutcome};
use crate::channel::Channel;
use crate::config::ToolExecutionMode;
use crate::llm::{Script, ScriptedLlm};
use crate::session::{AgentDirectory, AgentProfile, SessionPhase};
use crate::tools::{FnTool, ToolParameters, ToolRegistry};
use crate::types::{
    ContinuationDirective, FinishReason, MessageOrigin, Role, StreamDelta, EMPTY_TURN_PLACEHOLDER,
};
use crate::util::retry::RetryPolicy;
use support::{echo_tools, fast_retry, Harness};

#[tokio::test(start_paused = true)]
async fn text_turn_returns_control_without_leaving_running() {
    let h = Harness::new(ScriptedLlm::new([Script::text("hello back")]));
    h.start("hello");

    let snapshot = h
        .wait_until(|s| s.phase == SessionPhase::Running && s.message_count == 2)
        .await;
    h.settle().await;

    let messages = h.handle.messages();
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].text(), "hello back");
    assert_eq!(messages[1].agent_id.as_deref(), Some("default"));
    assert_eq!(snapshot.turn_index, 1);
    assert_eq!(h.llm.request_count(), 1);

    let events = h.events();
    assert!(matches!(
        events[0],
        EventPayload::PhaseChanged {
            from: SessionPhase::Idle,
            to: SessionPhase::Running
        }
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, EventPayload::SessionStarted { agent_id } if agent_id == "default")));
    assert!(events.iter().any(|e| matches!(
        e,
        EventPayload::TurnCompleted { turn_index: 1, outcome: TurnOutcome::Text, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn direct_tool_calls_feed_the_next_request() {
    let llm = ScriptedLlm::new([
        Script::tool_call("call_1", "echo", json!({ "text": "ping" })),
        Script::text("pong received"),
    ]);
    let h = Harness::builder(llm).tools(echo_tools()).build();
    h.start("use the tool");

    h.wait_until(|s| s.phase == SessionPhase::Running && s.message_count == 4)
        .await;

    let messages = h.handle.messages();
    assert_eq!(messages[1].tool_calls.len(), 1);
    assert_eq!(messages[2].role, Role::Tool);
    assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(messages[2].text(), r#"{"echo":"ping"}"#);
    assert_eq!(messages[3].text(), "pong received");

    let requests = h.llm.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[1].messages.len(), 3);

    let events = h.events();
    assert!(events.iter().any(|e| matches!(
        e,
        EventPayload::ToolCallIdentified { tool_call_id, name, .. }
            if tool_call_id == "call_1" && name == "echo"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        EventPayload::PhaseChanged { to: SessionPhase::AwaitingToolResult, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn empty_turn_is_replaced_by_placeholder() {
    let llm = ScriptedLlm::new([Script::Deltas(vec![StreamDelta::finish(FinishReason::Stop)])]);
    let h = Harness::new(llm);
    h.start("say nothing");

    h.wait_until(|s| s.turn_index == 1).await;
    h.settle().await;

    let messages = h.handle.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[1].is_placeholder());
    assert_eq!(messages[1].text(), EMPTY_TURN_PLACEHOLDER);
    assert_eq!(h.llm.request_count(), 1);
    assert!(h.events().iter().any(|e| matches!(
        e,
        EventPayload::TurnCompleted { outcome: TurnOutcome::Placeholder, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn malformed_arguments_reach_the_model_as_tool_errors() {
    let llm = ScriptedLlm::new([
        Script::Deltas(vec![
            StreamDelta::tool_call_start(0, "call_1", "echo"),
            StreamDelta::tool_call_arguments(0, r#"{"text":"#),
            StreamDelta::finish(FinishReason::ToolCalls),
        ]),
        Script::text("sorry"),
    ]);
    let h = Harness::builder(llm).tools(echo_tools()).build();
    h.start("go");

    h.wait_until(|s| s.phase == SessionPhase::Running && s.message_count == 4)
        .await;

    let messages = h.handle.messages();
    assert_eq!(messages[2].role, Role::Tool);
    assert!(messages[2].is_error);
    assert!(messages[2].text().contains("malformed tool call"));

    let events = h.events();
    assert!(events.iter().any(|e| matches!(
        e,
        EventPayload::SessionError { kind, .. } if kind == "malformed_tool_call"
    )));
    assert!(!events
        .iter()
        .any(|e| matches!(e, EventPayload::ToolCallIdentified { .. })));
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried() {
    let llm = ScriptedLlm::new([
        Script::FailMidStream(vec![StreamDelta::text("par")], "connection reset".into()),
        Script::text("whole answer"),
    ]);
    let h = Harness::builder(llm).retry(fast_retry(3)).build();
    h.start("hi");

    h.wait_until(|s| s.message_count == 2).await;

    let messages = h.handle.messages();
    assert_eq!(messages[1].text(), "whole answer");
    assert_eq!(h.llm.request_count(), 2);
    assert!(h.events().iter().any(|e| matches!(
        e,
        EventPayload::SessionError { kind, retryable: true, .. } if kind == "transport_error"
    )));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_end_in_errored() {
    let llm = ScriptedLlm::new([
        Script::Fail("reset".into()),
        Script::Fail("reset".into()),
        Script::Fail("reset".into()),
    ]);
    let h = Harness::builder(llm).retry(fast_retry(3)).build();
    h.start("hi");

    let snapshot = h.wait_until(|s| s.phase == SessionPhase::Errored).await;
    assert!(snapshot.last_error.as_deref().unwrap_or_default().contains("reset"));
    assert_eq!(h.llm.request_count(), 3);
    assert_eq!(h.handle.messages().len(), 1);

    h.settle().await;
    let events = h.events();
    assert!(events.iter().any(|e| matches!(
        e,
        EventPayload::SessionEnded { reason: SessionEndReason::Error, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn pause_holds_the_next_request_until_resume() {
    let h = Harness::new(ScriptedLlm::default());
    h.start("hi");
    h.send(ControlSignal::Pause);

    h.wait_until(|s| s.phase == SessionPhase::Paused).await;
    h.settle().await;
    assert_eq!(h.llm.request_count(), 0);

    h.send(ControlSignal::Resume);
    h.wait_until(|s| s.phase == SessionPhase::Running && s.message_count == 2)
        .await;
    assert_eq!(h.llm.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_unblocks_a_hanging_stream() {
    let llm = ScriptedLlm::new([Script::DeltasThenHang(vec![StreamDelta::text("partial")])]);
    let h = Harness::new(llm);
    h.start("hi");
    h.until(|| h.llm.request_count() == 1).await;

    h.send(ControlSignal::Stop);
    h.wait_until(|s| s.phase == SessionPhase::Stopped).await;

    assert_eq!(h.handle.messages().len(), 1);
    h.settle().await;
    assert!(h.handle.is_finished());
    assert!(h.events().iter().any(|e| matches!(
        e,
        EventPayload::SessionEnded { reason: SessionEndReason::Stopped, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn stop_unblocks_a_delegated_tool_wait() {
    let llm = ScriptedLlm::new([Script::tool_call("call_1", "lookup", json!({ "id": 7 }))]);
    let h = Harness::builder(llm)
        .tool_mode(ToolExecutionMode::Delegated)
        .build();
    h.start("look it up");
    h.wait_until(|s| s.phase == SessionPhase::AwaitingToolResult)
        .await;

    h.send(ControlSignal::Stop);
    h.wait_until(|s| s.phase == SessionPhase::Stopped).await;
    assert_eq!(h.handle.messages().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_unblocks_the_pause_gate() {
    let h = Harness::new(ScriptedLlm::default());
    h.start("hi");
    h.send(ControlSignal::Pause);
    h.wait_until(|s| s.phase == SessionPhase::Paused).await;

    h.send(ControlSignal::Stop);
    h.wait_until(|s| s.phase == SessionPhase::Stopped).await;
    assert_eq!(h.llm.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn delegated_results_resume_the_loop() {
    let llm = ScriptedLlm::new([Script::tool_call("call_1", "lookup", json!({ "id": 7 }))]);
    let h = Harness::builder(llm)
        .tool_mode(ToolExecutionMode::Delegated)
        .build();
    h.start("look it up");
    h.wait_until(|s| s.phase == SessionPhase::AwaitingToolResult)
        .await;

    // Unknown ids are ignored.
    h.send(ControlSignal::ProvideToolResult {
        tool_call_id: "call_9".into(),
        result: json!("nope"),
        is_error: false,
    });
    h.send(ControlSignal::ProvideToolResult {
        tool_call_id: "call_1".into(),
        result: json!({ "name": "widget" }),
        is_error: false,
    });

    h.wait_until(|s| s.phase == SessionPhase::Running && s.message_count == 4)
        .await;
    let messages = h.handle.messages();
    assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(messages[2].text(), r#"{"name":"widget"}"#);
    assert_eq!(messages[3].text(), "done");
}

#[tokio::test(start_paused = true)]
async fn injected_message_resolves_pending_tool_calls() {
    let llm = ScriptedLlm::new([Script::tool_call("call_1", "lookup", json!({ "id": 7 }))]);
    let h = Harness::builder(llm)
        .tool_mode(ToolExecutionMode::Delegated)
        .build();
    h.start("look it up");
    h.wait_until(|s| s.phase == SessionPhase::AwaitingToolResult)
        .await;

    h.send(ControlSignal::InjectMessage {
        text: "Please continue without the lookup.".into(),
        intervention: true,
    });

    h.wait_until(|s| s.phase == SessionPhase::Running && s.message_count == 5)
        .await;
    let messages = h.handle.messages();
    assert!(messages[2].is_error);
    assert!(messages[2].text().contains("no result received"));
    assert_eq!(messages[3].origin, MessageOrigin::Intervention);
    assert_eq!(messages[4].text(), "done");
}

#[tokio::test(start_paused = true)]
async fn autonomous_turns_are_capped() {
    let llm = ScriptedLlm::default().with_fallback(Script::tool_call(
        "call_1",
        "echo",
        json!({ "text": "again" }),
    ));
    let h = Harness::builder(llm)
        .tools(echo_tools())
        .max_autonomous_turns(2)
        .build();
    h.start("loop forever");

    h.wait_until(|s| s.autonomous_turns == 3).await;
    h.settle().await;

    assert_eq!(h.llm.request_count(), 3);
    assert_eq!(h.handle.snapshot().phase, SessionPhase::Running);
    assert!(h.events().iter().any(|e| matches!(
        e,
        EventPayload::SessionError { kind, .. } if kind == "autonomy_limit"
    )));

    // New input restores the budget.
    h.send(ControlSignal::UserMessage { text: "stop looping".into() });
    h.until(|| h.llm.request_count() >= 4).await;
}

#[tokio::test(start_paused = true)]
async fn handoff_switches_agent_and_shares_the_log() {
    let llm = ScriptedLlm::new([Script::Deltas(vec![
        StreamDelta::text("passing this on"),
        StreamDelta::finish(FinishReason::Stop).with_directive(ContinuationDirective::Handoff {
            agent_id: "reviewer".into(),
            summary: Some("draft is ready".into()),
        }),
    ])]);
    let agents = AgentDirectory::new().with(
        AgentProfile::builder()
            .id("reviewer")
            .instructions("Review the draft.")
            .build(),
    );
    let h = Harness::builder(llm).agents(agents).build();
    h.start("write a draft");

    let snapshot = h
        .wait_until(|s| s.phase == SessionPhase::Running && s.message_count == 4)
        .await;
    assert_eq!(snapshot.active_agent_id, "reviewer");

    let messages = h.handle.messages();
    assert_eq!(messages[2].role, Role::System);
    assert_eq!(messages[2].origin, MessageOrigin::Handoff);
    assert!(messages[2].text().contains("draft is ready"));
    assert_eq!(messages[3].agent_id.as_deref(), Some("reviewer"));

    let requests = h.llm.requests();
    assert_eq!(requests[1].agent_id, "reviewer");
    assert_eq!(requests[1].instructions.as_deref(), Some("Review the draft."));
    assert_eq!(requests[1].messages.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn handoff_to_unknown_agent_returns_control() {
    let llm = ScriptedLlm::new([Script::Deltas(vec![
        StreamDelta::text("over to you"),
        StreamDelta::finish(FinishReason::Stop).with_directive(ContinuationDirective::Handoff {
            agent_id: "ghost".into(),
            summary: None,
        }),
    ])]);
    let h = Harness::new(llm);
    h.start("hi");

    h.wait_until(|s| s.turn_index == 1).await;
    h.settle().await;

    assert_eq!(h.llm.request_count(), 1);
    assert_eq!(h.handle.snapshot().active_agent_id, "default");
    assert!(h.events().iter().any(|e| matches!(
        e,
        EventPayload::SessionError { kind, .. } if kind == "agent_not_found"
    )));
}

#[tokio::test(start_paused = true)]
async fn second_start_is_ignored() {
    let h = Harness::new(ScriptedLlm::default());
    h.start("first");
    h.wait_until(|s| s.message_count == 2).await;

    h.start("second");
    h.settle().await;
    assert_eq!(h.handle.messages().len(), 2);
    assert_eq!(h.llm.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_stream_times_out_as_transport_error() {
    let llm = ScriptedLlm::new([Script::hang(), Script::text("recovered")]);
    let h = Harness::builder(llm)
        .retry(fast_retry(2))
        .stream_idle_timeout(Duration::from_secs(5))
        .build();
    h.start("hi");

    h.wait_until(|s| s.message_count == 2).await;
    assert_eq!(h.handle.messages()[1].text(), "recovered");
    assert!(h.events().iter().any(|e| matches!(
        e,
        EventPayload::SessionError { message, .. } if message.contains("Timeout")
    )));
}

#[tokio::test(start_paused = true)]
async fn failed_attempts_never_close_the_final_channel() {
    let llm = ScriptedLlm::new([
        Script::Deltas(vec![
            StreamDelta::text("WRONG"),
            StreamDelta::failure("upstream reset"),
        ]),
        Script::text("right"),
    ]);
    let h = Harness::builder(llm).retry(fast_retry(3)).build();
    h.start("hi");

    h.wait_until(|s| s.message_count == 2).await;
    h.settle().await;

    let closed: Vec<String> = h
        .events()
        .into_iter()
        .filter_map(|e| match e {
            EventPayload::ChannelMessage(event)
                if event.channel == Channel::Final && !event.is_partial =>
            {
                Some(event.content)
            }
            _ => None,
        })
        .collect();
    assert_eq!(closed, vec!["right".to_string()]);
    assert_eq!(h.handle.messages()[1].text(), "right");
    assert_eq!(h.llm.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn tools_outside_the_agent_allow_list_are_refused() {
    let llm = ScriptedLlm::new([
        Script::tool_call("call_1", "echo", json!({ "text": "secret" })),
        Script::text("understood"),
    ]);
    let agents = AgentDirectory::new().with(
        AgentProfile::builder()
            .id("reader")
            .tools(Vec::new())
            .build(),
    );
    let h = Harness::builder(llm)
        .tools(echo_tools())
        .agents(agents)
        .build();
    h.send(ControlSignal::Start {
        prompt: "echo something".into(),
        agent_id: Some("reader".into()),
    });

    h.wait_until(|s| s.phase == SessionPhase::Running && s.message_count == 4)
        .await;

    assert!(h.llm.requests()[0].tools.is_empty());
    let messages = h.handle.messages();
    assert_eq!(messages[2].role, Role::Tool);
    assert!(messages[2].is_error);
    assert!(messages[2]
        .text()
        .contains("tool 'echo' not available to agent 'reader'"));
    assert!(!messages[2].text().contains("secret"));
}

#[tokio::test(start_paused = true)]
async fn stop_is_honored_during_retry_backoff() {
    let llm = ScriptedLlm::new([Script::Fail("reset".into())]);
    let backoff = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_secs(600),
        max_backoff: Duration::from_secs(600),
        multiplier: 1.0,
        jitter: false,
    };
    let h = Harness::builder(llm).retry(backoff).build();
    h.start("hi");
    h.until(|| h.llm.request_count() == 1).await;
    h.settle().await;

    h.send(ControlSignal::Stop);
    let snapshot = h.wait_until(|s| s.phase.is_terminal()).await;

    assert_eq!(snapshot.phase, SessionPhase::Stopped);
    assert_eq!(h.llm.request_count(), 1);
    h.settle().await;
    assert!(h.events().iter().any(|e| matches!(
        e,
        EventPayload::SessionEnded { reason: SessionEndReason::Stopped, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn stop_is_honored_during_direct_tool_execution() {
    let hanging = ToolRegistry::new().with(FnTool::new(
        "wait_forever",
        "Never returns",
        ToolParameters::empty(),
        |_args, _ctx| async move {
            std::future::pending::<()>().await;
            Ok(json!(null))
        },
    ));
    let llm = ScriptedLlm::new([Script::tool_call("call_1", "wait_forever", json!({}))]);
    let h = Harness::builder(llm).tools(hanging).build();
    h.start("hang");
    h.wait_until(|s| s.phase == SessionPhase::AwaitingToolResult)
        .await;

    h.send(ControlSignal::Stop);
    let snapshot = h.wait_until(|s| s.phase.is_terminal()).await;

    assert_eq!(snapshot.phase, SessionPhase::Stopped);
    assert_eq!(h.handle.messages().len(), 2);
    h.settle().await;
    assert!(h.handle.is_finished());
}
