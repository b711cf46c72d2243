//! Cancellation signal passed into every tool execution.
//!
//! A [`CancelHandle`] is kept by the session's in-flight set; the matching
//! [`CancellationSignal`] travels with the call. Triggering the handle wakes
//! every clone of the signal.

use tokio::sync::watch;

/// Create a connected handle/signal pair.
pub fn cancellation_pair() -> (CancelHandle, CancellationSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancellationSignal { rx })
}

/// Owner side: requests cancellation.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observer side: checked or awaited by the running call.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    rx: watch::Receiver<bool>,
}

impl CancellationSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // A closed channel reads as "never cancelled".
        drop(tx);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation has been requested.
    ///
    /// If the handle is dropped without cancelling, this future never resolves.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
