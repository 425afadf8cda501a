// Copyright (c) The retest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The session-wide cancellation scope.
//!
//! One [`CancelSource`] exists per rerun session. Cancelling it (or dropping
//! it, which the orchestrator relies on when unwinding) releases any
//! in-flight event-stream read and prevents further subprocess starts.

use tokio::sync::watch;

/// The cancelling side of a session's cancellation scope.
#[derive(Debug)]
pub struct CancelSource {
    sender: watch::Sender<bool>,
}

impl CancelSource {
    /// Creates a new, un-cancelled scope.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// A handle observing this scope.
    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            receiver: self.sender.subscribe(),
        }
    }

    /// Cancels the session.
    pub fn cancel(&self) {
        // Send failures just mean nobody is listening.
        let _ = self.sender.send(true);
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancelSource {
    fn drop(&mut self) {
        let _ = self.sender.send(true);
    }
}

/// The observing side of a session's cancellation scope.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    receiver: watch::Receiver<bool>,
}

impl CancelHandle {
    /// True if the session has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the session is cancelled. A dropped [`CancelSource`]
    /// counts as cancellation.
    pub async fn cancelled(&mut self) {
        let _ = self.receiver.wait_for(|cancelled| *cancelled).await;
    }
}
