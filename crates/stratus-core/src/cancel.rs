//! Cooperative cancellation signal.
//!
//! The signal is only checked between pipeline steps. Hard termination of an
//! in-flight step happens out-of-band by aborting the task that runs it.

use tokio::sync::watch;

/// Create a linked trigger/signal pair.
pub fn cancel_pair() -> (CancelTrigger, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelTrigger { tx }, CancelSignal { rx })
}

/// Sending half, held by the session manager.
#[derive(Debug)]
pub struct CancelTrigger {
    tx: watch::Sender<bool>,
}

impl CancelTrigger {
    /// Raise the signal. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, observed by the running pipeline.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that is never raised.
    pub fn never() -> Self {
        let (_, signal) = cancel_pair();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the signal is raised. Pends forever if the trigger is dropped unraised.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|raised| *raised).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_trigger_raises_signal() {
        let (trigger, mut signal) = cancel_pair();
        assert!(!signal.is_cancelled());

        trigger.trigger();
        assert!(signal.is_cancelled());
        timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_never_stays_quiet() {
        let mut signal = CancelSignal::never();
        assert!(!signal.is_cancelled());
        assert!(timeout(Duration::from_millis(20), signal.cancelled())
            .await
            .is_err());
    }
}
