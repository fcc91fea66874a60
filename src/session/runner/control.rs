//! Bus plumbing for one session loop: control ingress and notification egress.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::{
    BusEvent, ControlSignal, EventBus, EventPayload, SubscribeOptions, SubscriptionToken, Topic,
};
use crate::session::SessionId;

/// Publishes notifications for one session.
#[derive(Clone)]
pub(super) struct SessionEmitter {
    session_id: SessionId,
    bus: EventBus,
}

impl SessionEmitter {
    pub(super) fn new(session_id: SessionId, bus: EventBus) -> Self {
        Self { session_id, bus }
    }

    pub(super) fn emit(&self, payload: EventPayload) -> u64 {
        self.bus.publish(self.session_id, payload)
    }

    pub(super) fn bus(&self) -> &EventBus {
        &self.bus
    }
}

/// Route this session's control topics into the loop's inbox.
///
/// Delivery is inline on the publisher's task. `stop` also cancels the
/// session token right away so every suspension point unblocks without
/// waiting for the loop to read its inbox.
pub(super) fn subscribe_control(
    bus: &EventBus,
    session_id: SessionId,
    cancel: CancellationToken,
) -> (SubscriptionToken, mpsc::UnboundedReceiver<ControlSignal>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = Arc::new(move |event: &BusEvent| {
        let EventPayload::Control(signal) = &event.payload else {
            return;
        };
        if matches!(signal, ControlSignal::Stop) {
            cancel.cancel();
        }
        if tx.send(signal.clone()).is_err() {
            tracing::debug!(session_id = %event.session_id, "control signal for finished session");
        }
    });
    let token = bus.subscribe_with(
        &Topic::control(),
        SubscribeOptions::for_session(session_id),
        handler,
    );
    (token, rx)
}
