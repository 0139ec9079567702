//! Acknowledgment tracking for publish and subscribe requests
//!
//! rumqttc assigns packet identifiers inside its event loop and does not hand
//! them back to the caller. Requests reach the event loop in the order they
//! are enqueued, so each caller registers a waiter before enqueueing and the
//! event loop binds the oldest unbound waiter to the packet id it reports in
//! the matching outgoing event. The final acknowledgment then completes the
//! waiter bound to that packet id.
//!
//! A refused acknowledgment reaches the event loop as an error without a
//! packet id. Brokers acknowledge in order, so the refusal is charged to the
//! oldest request at the matching stage of its exchange.

use crate::error::{PublishError, SubscribeError};
use crate::transport::QosLevel;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::debug;

pub type PublishWaiter = oneshot::Receiver<Result<(), PublishError>>;
pub type SubscribeWaiter = oneshot::Receiver<Result<(), SubscribeError>>;

type PublishDone = oneshot::Sender<Result<(), PublishError>>;
type SubscribeDone = oneshot::Sender<Result<(), SubscribeError>>;

struct PendingPublish {
    qos: QosLevel,
    done: PublishDone,
}

struct InflightPublish {
    pkid: u16,
    /// PUBREC accepted and PUBREL sent; only PUBCOMP remains
    released: bool,
    done: PublishDone,
}

/// Outstanding requests awaiting broker acknowledgment
#[derive(Default)]
pub struct AckTracker {
    unbound_publishes: VecDeque<PendingPublish>,
    inflight_publishes: VecDeque<InflightPublish>,
    unbound_subscribes: VecDeque<SubscribeDone>,
    inflight_subscribes: VecDeque<(u16, SubscribeDone)>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publish about to be enqueued
    pub fn register_publish(&mut self, qos: QosLevel) -> PublishWaiter {
        let (done, waiter) = oneshot::channel();
        self.unbound_publishes.push_back(PendingPublish { qos, done });
        waiter
    }

    /// Withdraw the most recent registration when enqueueing failed
    pub fn cancel_last_publish(&mut self) {
        self.unbound_publishes.pop_back();
    }

    /// The event loop wrote a PUBLISH with this packet id
    pub fn publish_written(&mut self, pkid: u16) {
        let Some(pending) = self.unbound_publishes.pop_front() else {
            debug!(pkid, "Outgoing publish with no registered waiter");
            return;
        };

        match pending.qos {
            // QoS 0 has no acknowledgment; writing it is completion
            QosLevel::AtMostOnce => {
                let _ = pending.done.send(Ok(()));
            }
            QosLevel::AtLeastOnce | QosLevel::ExactlyOnce => {
                self.inflight_publishes.push_back(InflightPublish {
                    pkid,
                    released: false,
                    done: pending.done,
                });
            }
        }
        self.prune_abandoned();
    }

    /// The event loop answered PUBREC with PUBREL for this packet id
    pub fn publish_released(&mut self, pkid: u16) {
        if let Some(publish) = self
            .inflight_publishes
            .iter_mut()
            .find(|publish| publish.pkid == pkid)
        {
            publish.released = true;
        }
    }

    /// Final acknowledgment (PUBACK for QoS 1, PUBCOMP for QoS 2)
    pub fn publish_acknowledged(&mut self, pkid: u16) {
        let Some(index) = self
            .inflight_publishes
            .iter()
            .position(|publish| publish.pkid == pkid)
        else {
            return;
        };
        if let Some(publish) = self.inflight_publishes.remove(index) {
            let _ = publish.done.send(Ok(()));
        }
    }

    /// Fail the oldest in-flight publish at the given stage with `error`
    ///
    /// `released` selects publishes waiting for PUBCOMP; otherwise the
    /// publish is one still waiting for PUBACK or PUBREC. Returns false when
    /// no publish matched.
    pub fn reject_publish(&mut self, released: bool, error: PublishError) -> bool {
        let Some(index) = self
            .inflight_publishes
            .iter()
            .position(|publish| publish.released == released)
        else {
            return false;
        };
        match self.inflight_publishes.remove(index) {
            Some(publish) => {
                debug!(pkid = publish.pkid, error = %error, "Publish refused by broker");
                let _ = publish.done.send(Err(error));
                true
            }
            None => false,
        }
    }

    pub fn register_subscribe(&mut self) -> SubscribeWaiter {
        let (done, waiter) = oneshot::channel();
        self.unbound_subscribes.push_back(done);
        waiter
    }

    pub fn cancel_last_subscribe(&mut self) {
        self.unbound_subscribes.pop_back();
    }

    pub fn subscribe_written(&mut self, pkid: u16) {
        match self.unbound_subscribes.pop_front() {
            Some(done) => self.inflight_subscribes.push_back((pkid, done)),
            None => debug!(pkid, "Outgoing subscribe with no registered waiter"),
        }
        self.prune_abandoned();
    }

    pub fn subscribe_acknowledged(&mut self, pkid: u16) {
        let Some(index) = self
            .inflight_subscribes
            .iter()
            .position(|(inflight, _)| *inflight == pkid)
        else {
            return;
        };
        if let Some((_, done)) = self.inflight_subscribes.remove(index) {
            let _ = done.send(Ok(()));
        }
    }

    /// Fail the oldest in-flight subscribe with `error`
    pub fn reject_subscribe(&mut self, error: SubscribeError) -> bool {
        match self.inflight_subscribes.pop_front() {
            Some((pkid, done)) => {
                debug!(pkid, error = %error, "Subscribe refused by broker");
                let _ = done.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Drop in-flight entries whose caller stopped waiting
    ///
    /// Unbound entries stay: each still has to claim the packet id of the
    /// request it was registered for.
    pub fn prune_abandoned(&mut self) -> usize {
        let before = self.inflight_publishes.len() + self.inflight_subscribes.len();
        self.inflight_publishes
            .retain(|publish| !publish.done.is_closed());
        self.inflight_subscribes.retain(|(_, done)| !done.is_closed());
        before - (self.inflight_publishes.len() + self.inflight_subscribes.len())
    }

    /// Fail every outstanding request; used when the connection ends
    pub fn fail_all(&mut self) {
        for pending in self.unbound_publishes.drain(..) {
            let _ = pending.done.send(Err(PublishError::NotConnected));
        }
        for publish in self.inflight_publishes.drain(..) {
            let _ = publish.done.send(Err(PublishError::NotConnected));
        }
        for done in self.unbound_subscribes.drain(..) {
            let _ = done.send(Err(SubscribeError::NotConnected));
        }
        for (_, done) in self.inflight_subscribes.drain(..) {
            let _ = done.send(Err(SubscribeError::NotConnected));
        }
    }

    pub fn outstanding(&self) -> usize {
        self.unbound_publishes.len()
            + self.inflight_publishes.len()
            + self.unbound_subscribes.len()
            + self.inflight_subscribes.len()
    }
}
