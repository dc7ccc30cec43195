//! Cooperative cancellation for long-running operations.
//!
//! Scans, bulk writes and task distribution check a [`CancelSignal`] between
//! pages and batches. The work in flight is never interrupted mid-request.

use tokio::sync::watch;

use crate::error::{StorageError, StorageResult};

/// Creates a connected handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        CancelHandle { sender },
        CancelSignal {
            receiver: Some(receiver),
        },
    )
}

/// The triggering side of a cancellation.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns another signal observing this handle.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            receiver: Some(self.sender.subscribe()),
        }
    }
}

/// The observing side of a cancellation. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    receiver: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.receiver.as_ref().is_some_and(|r| *r.borrow())
    }

    /// Fails with [`StorageError::Cancelled`] if cancellation was requested.
    pub fn check(&self, operation: &str) -> StorageResult<()> {
        if self.is_cancelled() {
            return Err(StorageError::Cancelled {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// Resolves once cancellation is requested.
    ///
    /// Never resolves for [`CancelSignal::never`] or when the handle is dropped
    /// without cancelling.
    pub async fn cancelled(&mut self) {
        if let Some(receiver) = self.receiver.as_mut() {
            loop {
                if *receiver.borrow_and_update() {
                    return;
                }
                if receiver.changed().await.is_err() {
                    break;
                }
            }
        }
        std::future::pending::<()>().await;
    }
}
