//! Cancellation and deadline context for push and pull.
//!
//! Every registry request made on behalf of one operation runs under the
//! same [`Context`]. Cancelling it, or passing its deadline, aborts all
//! outstanding requests with [`CnabError::Cancelled`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cnab_oci_core::{CnabError, Result};
use tokio::sync::watch;
use tokio::time::Instant;

/// Cancellation signal plus optional deadline.
#[derive(Debug, Clone)]
pub struct Context {
    cancelled: watch::Receiver<bool>,
    deadline: Option<Instant>,
    // Keeps the channel open for contexts nobody can cancel
    _sender: Option<Arc<watch::Sender<bool>>>,
}

/// Cancels the [`Context`] it was created with.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            cancelled: rx,
            deadline: None,
            _sender: Some(Arc::new(tx)),
        }
    }

    /// A context plus the handle that cancels it.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            cancelled: rx,
            deadline: None,
            _sender: None,
        };
        (ctx, CancelHandle { tx })
    }

    /// This context, additionally bounded by `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Whether the context is already cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        *self.cancelled.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast if the context is done.
    pub fn check(&self) -> Result<()> {
        if *self.cancelled.borrow() {
            return Err(CnabError::Cancelled("operation cancelled".to_string()));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(CnabError::Cancelled("deadline exceeded".to_string()));
        }
        Ok(())
    }

    /// Resolves with the cancellation error once the context is done.
    pub async fn done(&self) -> CnabError {
        let mut rx = self.cancelled.clone();
        let cancelled = async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Handle dropped without cancelling: never fires
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = cancelled => CnabError::Cancelled("operation cancelled".to_string()),
                _ = tokio::time::sleep_until(deadline) => {
                    CnabError::Cancelled("deadline exceeded".to_string())
                }
            },
            None => {
                cancelled.await;
                CnabError::Cancelled("operation cancelled".to_string())
            }
        }
    }

    /// Run `fut` unless the context finishes first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            result = fut => result,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
