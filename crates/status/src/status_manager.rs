//! Manages and updates the unified status bundle.

use std::sync::Arc;

use tokio::sync::watch::{self, error::RecvError};
use tracing::warn;

use crate::status::EpochStatus;

/// A wrapper around the status sender and receiver.
///
/// This struct provides a convenient way to manage and access both the
/// sender and receiver components of a status communication channel.
#[derive(Clone)]
pub struct StatusChannel {
    /// Shared reference to the status sender.
    sender: Arc<watch::Sender<EpochStatus>>,
    /// Shared reference to the status receiver.
    receiver: Arc<watch::Receiver<EpochStatus>>,
}

impl StatusChannel {
    /// Creates a new channel seeded with the given lifecycle status.
    pub fn new(epoch_status: EpochStatus) -> Self {
        let (tx, rx) = watch::channel(epoch_status);
        Self {
            sender: Arc::new(tx),
            receiver: Arc::new(rx),
        }
    }

    // Receiver methods

    /// Gets the latest [`EpochStatus`].
    pub fn get_epoch_status(&self) -> EpochStatus {
        self.receiver.borrow().clone()
    }

    /// Gets the epoch the lifecycle is currently on.
    pub fn get_cur_epoch(&self) -> u64 {
        self.receiver.borrow().epoch
    }

    /// Returns if the lifecycle has reported itself stalled.
    pub fn is_stalled(&self) -> bool {
        self.receiver.borrow().stalled
    }

    /// Create a subscription to the epoch status watcher.
    pub fn subscribe_epoch_status(&self) -> watch::Receiver<EpochStatus> {
        self.sender.subscribe()
    }

    /// Waits until the lifecycle reports a stalled epoch and returns the
    /// status that tripped it.
    pub async fn wait_until_stalled(&self) -> Result<EpochStatus, RecvError> {
        let mut rx = self.receiver.as_ref().clone();
        loop {
            if rx.borrow().stalled {
                return Ok(rx.borrow().clone());
            }
            rx.changed().await?;
        }
    }

    // Sender methods

    /// Sends the updated [`EpochStatus`] to any receivers.  Logs a warning if
    /// all receivers are dropped.
    pub fn update_epoch_status(&self, post_status: EpochStatus) {
        if self.sender.send(post_status).is_err() {
            warn!("epoch status receiver dropped");
        }
    }
}
