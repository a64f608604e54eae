//! Execution of admitted effect units.
//!
//! Each admitted `Single` or `Sequence` runs as its own tokio task. A unit:
//!
//! 1. waits for its queue slot time (if the queue has a delay)
//! 2. races its work against its [`CancelFlag`] at every await point
//! 3. feeds produced actions back through the store's command channel
//! 4. reports completion exactly once via [`FinishGuard`], even on panic
//!
//! Cancellation is cooperative: the flag is observed between polls, so a
//! unit stops at its next await point and never feeds back after it has seen
//! the flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::effect::{ActionStream, SingleOperation};
use crate::error::StoreError;
use crate::queue::EffectQueue;
use crate::store::{Command, SendOptions};
use crate::task::EffectTask;

// =============================================================================
// Cancel Flag
// =============================================================================

/// Shared cancellation flag for one unit.
#[derive(Clone, Default)]
pub(crate) struct CancelFlag(Arc<CancelInner>);

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark cancelled and wake anything waiting in [`CancelFlag::cancelled`].
    pub(crate) fn cancel(&self) {
        if !self.0.cancelled.swap(true, Ordering::AcqRel) {
            self.0.notify.notify_waiters();
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    /// Resolve once the flag is set.
    pub(crate) async fn cancelled(&self) {
        loop {
            // Register before checking so a cancel in between is not lost
            let notified = self.0.notify.notified();

            if self.is_cancelled() {
                return;
            }

            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CancelFlag")
            .field(&self.is_cancelled())
            .finish()
    }
}

// =============================================================================
// Finish Guard (RAII)
// =============================================================================

/// Reports a unit's completion to the store loop on drop.
///
/// Dropping covers every exit path: normal return, error, cancellation,
/// panic, and the task being aborted.
pub(crate) struct FinishGuard<A: Send + 'static> {
    commands: mpsc::WeakUnboundedSender<Command<A>>,
    serial: u64,
    queue: Option<EffectQueue>,
}

impl<A: Send + 'static> Drop for FinishGuard<A> {
    fn drop(&mut self) {
        // Store gone: the registry went with it
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let _ = commands.send(Command::UnitFinished {
            serial: self.serial,
            queue: self.queue.take(),
        });
    }
}

// =============================================================================
// Unit
// =============================================================================

/// Everything a spawned unit needs to run and report back.
pub(crate) struct Unit<A: Send + 'static> {
    pub(crate) serial: u64,
    pub(crate) queue: Option<EffectQueue>,
    pub(crate) cancel: CancelFlag,
    pub(crate) start_at: Option<Instant>,
    pub(crate) commands: mpsc::WeakUnboundedSender<Command<A>>,
    pub(crate) options: SendOptions,
}

impl<A: Send + 'static> Unit<A> {
    fn guard(&self) -> FinishGuard<A> {
        FinishGuard {
            commands: self.commands.clone(),
            serial: self.serial,
            queue: self.queue.clone(),
        }
    }

    /// Sleep until the queue slot time. Returns false if cancelled meanwhile.
    async fn wait_for_slot(&self) -> bool {
        let Some(start_at) = self.start_at else {
            return !self.cancel.is_cancelled();
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep_until(start_at) => true,
        }
    }

    /// Send a produced action back into the store.
    ///
    /// Returns the feedback's own handle when feedback is tracked.
    async fn feed_back(&self, action: A) -> Result<Option<EffectTask>, StoreError> {
        let commands = self.commands.upgrade().ok_or(StoreError::Closed)?;

        if !self.options.track_feedbacks {
            commands
                .send(Command::Send {
                    action,
                    options: self.options,
                    reply: None,
                })
                .map_err(|_| StoreError::Closed)?;
            return Ok(None);
        }

        let (reply, task) = oneshot::channel();
        commands
            .send(Command::Send {
                action,
                options: self.options,
                reply: Some(reply),
            })
            .map_err(|_| StoreError::Closed)?;
        drop(commands);

        task.await.map_err(|_| StoreError::Closed)
    }

    /// Run a `Single` effect to completion.
    ///
    /// Errors from the operation are returned to the unit's handle. Errors
    /// from tracked feedback propagate too.
    pub(crate) async fn run_single(self, operation: SingleOperation<A>) -> anyhow::Result<()> {
        let _guard = self.guard();

        if !self.wait_for_slot().await {
            trace!(serial = self.serial, "cancelled before start");
            return Ok(());
        }

        let output = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(serial = self.serial, "single effect cancelled");
                return Ok(());
            }
            output = operation => output?,
        };

        let Some(action) = output else {
            return Ok(());
        };

        if self.cancel.is_cancelled() {
            debug!(serial = self.serial, "dropping feedback of cancelled effect");
            return Ok(());
        }

        if let Some(feedback) = self.feed_back(action).await? {
            feedback.wait().await?;
        }

        Ok(())
    }

    /// Run a `Sequence` effect until the stream ends, fails or is cancelled.
    ///
    /// Stream errors are logged and end the unit without failing its handle.
    pub(crate) async fn run_sequence(self, mut stream: ActionStream<A>) -> anyhow::Result<()> {
        let _guard = self.guard();

        if !self.wait_for_slot().await {
            trace!(serial = self.serial, "cancelled before start");
            return Ok(());
        }

        let mut feedbacks = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(serial = self.serial, "sequence effect cancelled");
                    break;
                }
                next = stream.next() => next,
            };

            let action = match next {
                None => break,
                Some(Ok(action)) => action,
                Some(Err(e)) => {
                    warn!(serial = self.serial, error = %e, "effect stream failed, stopping");
                    break;
                }
            };

            if self.cancel.is_cancelled() {
                break;
            }

            match self.feed_back(action).await {
                Ok(Some(feedback)) => feedbacks.push(feedback),
                Ok(None) => {}
                Err(e) => {
                    warn!(serial = self.serial, error = %e, "feedback rejected, stopping");
                    break;
                }
            }
        }

        // Release the stream before waiting on feedback
        drop(stream);

        for feedback in feedbacks {
            if let Err(e) = feedback.wait().await {
                warn!(serial = self.serial, error = %e, "tracked feedback failed");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_flag_wakes_waiter() {
        let flag = CancelFlag::new();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        flag.cancel();
        tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(flag.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_set() {
        let flag = CancelFlag::new();
        flag.cancel();
        flag.cancel();

        tokio::time::timeout(Duration::from_millis(100), flag.cancelled())
            .await
            .expect("already cancelled");
    }

    #[tokio::test]
    async fn test_finish_guard_reports_on_drop() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command<()>>();
        let guard = FinishGuard {
            commands: tx.downgrade(),
            serial: 7,
            queue: Some(EffectQueue::newest("q", 1)),
        };
        drop(guard);

        match rx.recv().await {
            Some(Command::UnitFinished { serial, queue }) => {
                assert_eq!(serial, 7);
                assert_eq!(queue.map(|q| q.name().to_string()), Some("q".to_string()));
            }
            other => panic!("unexpected command: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_finish_guard_silent_when_store_gone() {
        let (tx, rx) = mpsc::unbounded_channel::<Command<()>>();
        let weak = tx.downgrade();
        drop(tx);
        drop(rx);

        // Must not panic
        drop(FinishGuard {
            commands: weak,
            serial: 1,
            queue: None,
        });
    }
}
