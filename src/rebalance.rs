//! A bounded, lossy notification channel the cpuset rebalancer uses to tell an (optional)
//! listener that a device's effective CPU set changed.
//!
//! The channel deliberately drops events rather than block the thread that detected the
//! rebalance — a listener that falls behind should see the *latest* state next time it checks,
//! not replay a backlog of stale ones.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};

const CHANNEL_CAPACITY: usize = 2;

/// What changed and for which device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRebalanceEvent {
    pub instance_type: String,
    pub instance_name: String,
    pub status: String,
}

/// Sending half. Cheap to clone; every clone shares the same bounded buffer.
#[derive(Clone)]
pub struct RebalanceSender {
    inner: SyncSender<DeviceRebalanceEvent>,
}

pub type RebalanceReceiver = Receiver<DeviceRebalanceEvent>;

impl RebalanceSender {
    /// Enqueues an event, dropping it silently if the channel is full or the receiver is gone.
    pub fn notify(&self, event: DeviceRebalanceEvent) {
        match self.inner.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                log::debug!(
                    "rebalance channel full, dropping event for {}/{}",
                    dropped.instance_type,
                    dropped.instance_name
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("rebalance channel has no receiver; dropping event");
            }
        }
    }
}

/// Builds a fresh bounded channel pair.
pub fn channel() -> (RebalanceSender, RebalanceReceiver) {
    let (tx, rx) = sync_channel(CHANNEL_CAPACITY);
    (RebalanceSender { inner: tx }, rx)
}
