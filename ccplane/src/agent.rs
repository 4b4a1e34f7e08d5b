//! Out-of-process congestion control.
//!
//! The dataplane binds each socket to a [`RemoteController`], which forwards
//! callbacks as [`Msg`]s over a [`Channel`]. On the other end a
//! [`ControlPlane`] hosts the real controllers, one per connection id, and
//! their window updates travel back as `Cwnd` messages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::congestion::{AlgorithmRegistry, Controller, DropEvent, OutboundSink};
use crate::ipc::{Channel, Msg};

/// Hosts controllers on behalf of remote dataplanes.
pub struct ControlPlane {
    registry: Arc<AlgorithmRegistry>,
    sink: Arc<dyn OutboundSink>,
    flows: HashMap<u32, Box<dyn Controller>>,
}

impl ControlPlane {
    /// Controllers created here publish window updates to `sink`, usually
    /// the [`Channel`] back to the dataplane.
    pub fn new(registry: Arc<AlgorithmRegistry>, sink: Arc<dyn OutboundSink>) -> Self {
        Self {
            registry,
            sink,
            flows: HashMap::new(),
        }
    }

    pub fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Create { sid, alg } => match self.registry.instantiate(&alg) {
                Ok(mut ctrl) => {
                    ctrl.on_create(sid, self.sink.clone());
                    if self.flows.insert(sid, ctrl).is_some() {
                        tracing::warn!(sid, algorithm = %alg, "flow re-created, previous controller replaced");
                    } else {
                        tracing::info!(sid, algorithm = %alg, "flow created");
                    }
                }
                Err(e) => tracing::warn!(sid, error = %e, "cannot create flow"),
            },
            Msg::Measure { sid, ack, rtt_us } => match self.flows.get_mut(&sid) {
                Some(ctrl) => ctrl.on_ack(ack, Duration::from_micros(rtt_us)),
                None => tracing::debug!(sid, "measurement for unknown flow"),
            },
            Msg::Drop { sid, event } => match self.flows.get_mut(&sid) {
                Some(ctrl) => {
                    ctrl.on_drop(event);
                    if event == DropEvent::Complete {
                        self.flows.remove(&sid);
                        tracing::info!(sid, "flow completed");
                    }
                }
                None => tracing::debug!(sid, %event, "drop for unknown flow"),
            },
            Msg::Cwnd { sid, .. } => {
                tracing::debug!(sid, "ignoring window update sent to the control plane");
            }
        }
    }

    /// Handle messages until `inbound` ends.
    pub async fn run(&mut self, mut inbound: mpsc::Receiver<Msg>) {
        while let Some(msg) = inbound.recv().await {
            self.handle(msg);
        }
        tracing::info!(flows = self.flows.len(), "control plane stopped");
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn has_flow(&self, sid: u32) -> bool {
        self.flows.contains_key(&sid)
    }
}

/// Dataplane-side stand-in for a controller hosted by a [`ControlPlane`].
pub struct RemoteController {
    algorithm: String,
    channel: Arc<Channel>,
    sid: Option<u32>,
}

impl RemoteController {
    pub fn new(algorithm: impl Into<String>, channel: Arc<Channel>) -> Self {
        Self {
            algorithm: algorithm.into(),
            channel,
            sid: None,
        }
    }

    fn forward(&self, msg: Msg) {
        if let Err(e) = self.channel.send_msg(&msg) {
            tracing::warn!(sid = msg.sid(), kind = ?msg.msg_type(), error = %e, "control message not sent");
        }
    }
}

impl Controller for RemoteController {
    fn name(&self) -> &str {
        &self.algorithm
    }

    // Window updates come back over the channel; see `route_window_updates`.
    fn on_create(&mut self, sid: u32, _sink: Arc<dyn OutboundSink>) {
        self.sid = Some(sid);
        self.forward(Msg::Create {
            sid,
            alg: self.algorithm.clone(),
        });
    }

    fn on_ack(&mut self, ack: u32, rtt: Duration) {
        if let Some(sid) = self.sid {
            self.forward(Msg::measure(sid, ack, rtt));
        }
    }

    fn on_drop(&mut self, event: DropEvent) {
        if let Some(sid) = self.sid {
            self.forward(Msg::Drop { sid, event });
        }
    }
}

/// Deliver `Cwnd` messages from the control plane to `sink`. Returns the
/// number delivered once `inbound` ends.
pub async fn route_window_updates(
    mut inbound: mpsc::Receiver<Msg>,
    sink: Arc<dyn OutboundSink>,
) -> usize {
    let mut delivered = 0;
    while let Some(msg) = inbound.recv().await {
        match msg {
            Msg::Cwnd { sid, cwnd } => match sink.send_window_update(sid, cwnd) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(sid, error = %e, "window update not applied"),
            },
            other => tracing::debug!(sid = other.sid(), kind = ?other.msg_type(), "unexpected message on dataplane"),
        }
    }
    delivered
}
