//! Unified handle over the units started by one `send`.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{panic_message, StoreError};
use crate::unit::CancelFlag;

/// Handle to one running unit.
pub(crate) struct UnitHandle {
    pub(crate) join: JoinHandle<anyhow::Result<()>>,
    pub(crate) cancel: CancelFlag,
}

/// Handle over every unit admitted by a single `send`.
///
/// Awaiting it (or calling [`EffectTask::wait`]) waits for all of them. If any
/// unit fails, the first failure observed is returned after the rest have
/// finished. Cancelled units count as successful.
///
/// Dropping the handle does not stop the units.
///
/// # Example
///
/// ```ignore
/// if let Some(task) = store.send(Action::Refresh).await {
///     task.await?;
/// }
/// ```
#[must_use = "dropping an EffectTask detaches from its units; await it or call cancel()"]
pub struct EffectTask {
    units: Vec<UnitHandle>,
}

impl EffectTask {
    /// Combine unit handles. `None` when nothing was started.
    pub(crate) fn from_units(units: Vec<UnitHandle>) -> Option<Self> {
        if units.is_empty() {
            None
        } else {
            Some(Self { units })
        }
    }

    /// Number of units covered by this handle. Never zero.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Returns true once every covered unit has finished.
    pub fn is_finished(&self) -> bool {
        self.units.iter().all(|unit| unit.join.is_finished())
    }

    /// Cooperatively cancel every covered unit.
    ///
    /// Units stop at their next await point and skip feeding back. Their
    /// registry entries are cleaned up as they finish.
    pub fn cancel(&self) {
        for unit in &self.units {
            unit.cancel.cancel();
        }
    }

    /// Wait for every covered unit; first failure wins.
    pub async fn wait(self) -> Result<(), StoreError> {
        let mut pending: FuturesUnordered<_> =
            self.units.into_iter().map(|unit| unit.join).collect();
        let mut first_error = None;

        while let Some(joined) = pending.next().await {
            let error = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => StoreError::Effect(e),
                Err(join_error) if join_error.is_panic() => {
                    StoreError::EffectPanicked(panic_message(join_error.into_panic().as_ref()))
                }
                // Aborted by the runtime shutting down
                Err(_) => continue,
            };

            if first_error.is_none() {
                first_error = Some(error);
            } else {
                debug!(error = %error, "additional effect failure");
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl IntoFuture for EffectTask {
    type Output = Result<(), StoreError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl fmt::Debug for EffectTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectTask")
            .field("units", &self.units.len())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spawn_unit<F>(fut: F) -> UnitHandle
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        UnitHandle {
            join: tokio::spawn(fut),
            cancel: CancelFlag::new(),
        }
    }

    #[test]
    fn test_empty_units_produce_no_task() {
        assert!(EffectTask::from_units(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn test_wait_all_success() {
        let task = EffectTask::from_units(vec![
            spawn_unit(async { Ok(()) }),
            spawn_unit(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(())
            }),
        ])
        .unwrap();

        assert_eq!(task.unit_count(), 2);
        assert!(task.await.is_ok());
    }

    #[tokio::test]
    async fn test_first_error_wins_and_waits_for_rest() {
        let (done_tx, mut done_rx) = tokio::sync::oneshot::channel();

        let task = EffectTask::from_units(vec![
            spawn_unit(async { Err(anyhow::anyhow!("first error")) }),
            spawn_unit(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(anyhow::anyhow!("second error"))
            }),
            spawn_unit(async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                let _ = done_tx.send(());
                Ok(())
            }),
        ])
        .unwrap();

        let err = task.wait().await.unwrap_err();
        assert!(err.to_string().contains("first error"));

        // The slowest unit finished before wait() returned
        assert!(done_rx.try_recv().is_ok());
    }

    fn explode() -> anyhow::Result<()> {
        panic!("unit exploded")
    }

    #[tokio::test]
    async fn test_panic_surfaces_as_error() {
        let task = EffectTask::from_units(vec![spawn_unit(async { explode() })]).unwrap();

        match task.wait().await {
            Err(StoreError::EffectPanicked(msg)) => assert!(msg.contains("unit exploded")),
            other => panic!("expected panic error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_sets_every_flag() {
        let a = spawn_unit(async { Ok(()) });
        let b = spawn_unit(async { Ok(()) });
        let flags = vec![a.cancel.clone(), b.cancel.clone()];

        let task = EffectTask::from_units(vec![a, b]).unwrap();
        task.cancel();

        assert!(flags.iter().all(CancelFlag::is_cancelled));
        task.await.unwrap();
    }
}
