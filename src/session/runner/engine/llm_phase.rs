use std::time::Duration;

use futures::StreamExt;
use tokio::time::{self, Instant};

use super::SessionLoop;
use crate::accumulator::{DeltaAccumulator, TurnOutput};
use crate::bus::EventPayload;
use crate::channel::ChannelEvent;
use crate::error::CadenceError;
use crate::types::FinishReason;
use crate::util::timeout::{cancellable, with_timeout};

pub(super) enum LlmPhaseOutcome {
    Ready {
        output: TurnOutput,
        latency: Duration,
    },
    Canceled,
    Failed(CadenceError),
}

/// Request one turn, retrying transport failures with backoff.
pub(super) async fn run_llm_phase(session: &mut SessionLoop) -> LlmPhaseOutcome {
    let mut attempt = 1;
    loop {
        let started = Instant::now();
        match stream_turn(session).await {
            Ok(output) => {
                return LlmPhaseOutcome::Ready {
                    output,
                    latency: started.elapsed(),
                }
            }
            Err(CadenceError::Cancelled) => return LlmPhaseOutcome::Canceled,
            Err(err) => {
                let policy = &session.limits.retry;
                if !policy.should_retry(&err, attempt) {
                    return LlmPhaseOutcome::Failed(err);
                }
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    session_id = %session.state.session_id,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "LLM request failed; retrying"
                );
                session.emitter.emit(EventPayload::session_error(&err));
                tokio::select! {
                    biased;
                    _ = session.cancel.cancelled() => return LlmPhaseOutcome::Canceled,
                    _ = time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

/// One attempt: send, then consume deltas until the turn finishes.
///
/// Partial output of a failed attempt is discarded; only its partial channel
/// fragments were published. Closing events are emitted for successful
/// attempts only.
async fn stream_turn(session: &mut SessionLoop) -> Result<TurnOutput, CadenceError> {
    let request = session.build_request();
    let send = with_timeout(session.limits.request_timeout, session.llm.send(request));
    let mut stream = cancellable(&session.cancel, send).await?;

    let mut accumulator = DeltaAccumulator::new();
    session.router.begin_turn();
    let idle_timeout = session.limits.stream_idle_timeout;
    let idle = time::sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        let next = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => return Err(CadenceError::Cancelled),
            _ = idle.as_mut() => {
                return Err(CadenceError::Timeout(idle_timeout.as_millis() as u64));
            }
            next = stream.next() => next,
        };

        let output = match next {
            Some(Ok(delta)) => {
                idle.as_mut().reset(Instant::now() + idle_timeout);
                let mut update = accumulator.accumulate(delta);
                let finished = update.finished.take();
                let mut events = session.router.route(&update);
                let Some(output) = finished else {
                    publish_channel_events(session, events);
                    continue;
                };
                // A failed attempt never closes its channels; the retry does.
                if output.finish_reason != Some(FinishReason::Error) {
                    events.extend(session.router.close_turn(&output));
                }
                publish_channel_events(session, events);
                output
            }
            Some(Err(err)) => return Err(err),
            None => match accumulator.finish() {
                Some(output) => {
                    let events = session.router.close_turn(&output);
                    publish_channel_events(session, events);
                    output
                }
                None => TurnOutput::default(),
            },
        };

        if output.finish_reason == Some(FinishReason::Error) {
            let message = output
                .error
                .unwrap_or_else(|| "stream reported an error".to_string());
            return Err(CadenceError::Transport(message));
        }
        return Ok(output);
    }
}

fn publish_channel_events(session: &SessionLoop, events: Vec<ChannelEvent>) {
    for event in events {
        session.emitter.emit(EventPayload::ChannelMessage(event));
    }
}
