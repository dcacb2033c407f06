// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run-wide cancellation.
//!
//! A single [`CancelHandle`] is owned by whoever decides to stop the run (the signal listener in
//! the controller, or the stdin reader in a worker). Every component that can block holds a
//! [`CancelReceiver`] and checks it at its suspension points.

use std::sync::Arc;
use tokio::sync::watch;

/// Creates a linked handle/receiver pair.
pub fn cancel_pair() -> (CancelHandle, CancelReceiver) {
    let (sender, receiver) = watch::channel(false);
    (
        CancelHandle { sender },
        CancelReceiver {
            receiver,
            _keepalive: None,
        },
    )
}

/// The sending side of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns a new receiver for this handle.
    pub fn subscribe(&self) -> CancelReceiver {
        CancelReceiver {
            receiver: self.sender.subscribe(),
            _keepalive: None,
        }
    }
}

/// The receiving side of a cancellation signal.
#[derive(Clone, Debug)]
pub struct CancelReceiver {
    receiver: watch::Receiver<bool>,
    // Only set for `never()`, which has no handle of its own.
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl CancelReceiver {
    /// Returns a receiver that is never cancelled.
    pub fn never() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            receiver,
            _keepalive: Some(Arc::new(sender)),
        }
    }

    /// Returns true if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Waits until cancellation is requested.
    ///
    /// If the handle is dropped without cancelling, this never returns.
    pub async fn cancelled(&mut self) {
        if self.receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_wakes_receivers() {
        let (handle, mut receiver) = cancel_pair();
        let mut second = handle.subscribe();
        assert!(!receiver.is_cancelled());

        handle.cancel();
        receiver.cancelled().await;
        second.cancelled().await;
        assert!(receiver.is_cancelled());
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn never_pends() {
        let mut receiver = CancelReceiver::never();
        let result = tokio::time::timeout(Duration::from_millis(20), receiver.cancelled()).await;
        assert!(result.is_err(), "never-cancelled receiver must not resolve");
    }
}
