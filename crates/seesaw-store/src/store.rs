//! The store - serialized owner of state and effect scheduler.
//!
//! ```text
//! send(action) ──► command channel ──► store loop (single consumer)
//!                                          │
//!                                          ├─► reducer.reduce(action, &mut state)
//!                                          ├─► publish state (watch)
//!                                          └─► for each EffectKind:
//!                                                 Cancel ─► registry.cancel_matching
//!                                                 Single/Sequence ─► queue policy
//!                                                      │ admitted
//!                                                      ▼
//!                                                 tokio::spawn(unit)
//!                                                      │
//!           ┌──── Command::Send (feedback) ◄───────────┤
//!           │                                          ▼
//!           └──────────────────────────────── Command::UnitFinished
//!                                               (cleanup + release pending)
//! ```
//!
//! Every mutation of state and of the task registry happens inside the loop,
//! one command at a time, in submission order. Units run concurrently and
//! talk to the loop only through the channel.
//!
//! # Usage
//!
//! ```ignore
//! use seesaw_store::{Effect, Store};
//!
//! let store = Store::new(0_i64, |action: Action, count: &mut i64| match action {
//!     Action::Increment => {
//!         *count += 1;
//!         Effect::none()
//!     }
//! });
//!
//! // Fire-and-forget
//! store.send_and_forget(Action::Increment);
//!
//! // Or wait for every effect and every feedback action to settle
//! store.send_and_wait(Action::Increment).await?;
//!
//! assert_eq!(store.state(), 2);
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, debug_span, info, info_span, trace, warn, Instrument};

use crate::effect::{ActionStream, Effect, EffectId, EffectKind, SingleOperation};
use crate::error::StoreError;
use crate::queue::EffectQueue;
use crate::reducer::{Reducer, ReducerRunner};
use crate::registry::{RegistryStats, Submission, TaskRegistry, UnitKey};
use crate::task::{EffectTask, UnitHandle};
use crate::unit::{CancelFlag, Unit};

/// Default timeout for [`Store::send_and_wait`].
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Send Options
// =============================================================================

/// Priority hint attached to a `send`.
///
/// Tokio schedules all tasks alike, so the priority does not reorder work.
/// It is recorded on effect spans and carried to every feedback `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Options for [`Store::send_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Priority carried by the spawned units and their feedback.
    pub priority: Option<Priority>,
    /// Make the returned handle also wait for actions fed back by the units,
    /// recursively.
    pub track_feedbacks: bool,
}

impl SendOptions {
    /// Options that track feedback.
    pub fn tracked() -> Self {
        Self {
            priority: None,
            track_feedbacks: true,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Messages processed by the store loop.
pub(crate) enum Command<A> {
    /// Apply an action. `reply` receives the unified handle, if wanted.
    Send {
        action: A,
        options: SendOptions,
        reply: Option<oneshot::Sender<Option<EffectTask>>>,
    },
    /// A unit finished; clean it up and maybe release a pending unit.
    UnitFinished {
        serial: u64,
        queue: Option<EffectQueue>,
    },
    /// Report registry counts.
    Stats {
        reply: oneshot::Sender<RegistryStats>,
    },
    /// Cancel everything and stop.
    Shutdown { reply: oneshot::Sender<()> },
}

// =============================================================================
// Store
// =============================================================================

/// Handle to a running store.
///
/// Cheap to clone; all clones talk to the same loop. When the last clone is
/// dropped the loop cancels every running effect and exits.
pub struct Store<A, S> {
    commands: mpsc::UnboundedSender<Command<A>>,
    state: watch::Receiver<S>,
    name: Arc<str>,
}

impl<A, S> Clone for Store<A, S> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            state: self.state.clone(),
            name: self.name.clone(),
        }
    }
}

impl<A, S> Store<A, S>
where
    A: Send + 'static,
    S: Send + Sync + 'static,
{
    /// Start a store with `initial_state` and `reducer`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<R>(initial_state: S, reducer: R) -> Self
    where
        R: Reducer<A, S>,
    {
        StoreBuilder::new(initial_state, reducer).build()
    }

    /// Create a store builder.
    pub fn builder<R>(initial_state: S, reducer: R) -> StoreBuilder<A, S>
    where
        R: Reducer<A, S>,
    {
        StoreBuilder::new(initial_state, reducer)
    }

    /// Apply `action` and return a handle over the effects it started.
    ///
    /// The action is applied before this returns. `None` means no unit was
    /// started (no effects, all suspended or discarded, or the store is closed).
    pub async fn send(&self, action: A) -> Option<EffectTask> {
        self.send_with(action, SendOptions::default()).await
    }

    /// Like [`Store::send`], with explicit options.
    pub async fn send_with(&self, action: A, options: SendOptions) -> Option<EffectTask> {
        let (reply, task) = oneshot::channel();
        let command = Command::Send {
            action,
            options,
            reply: Some(reply),
        };

        if self.commands.send(command).is_err() {
            warn!(store = %self.name, "send on closed store, action dropped");
            return None;
        }

        task.await.ok().flatten()
    }

    /// Enqueue `action` without waiting for it to be applied.
    ///
    /// Ordering with other sends from this task is preserved.
    pub fn send_and_forget(&self, action: A) {
        let command = Command::Send {
            action,
            options: SendOptions::default(),
            reply: None,
        };
        if self.commands.send(command).is_err() {
            warn!(store = %self.name, "send on closed store, action dropped");
        }
    }

    /// Apply `action` and wait for its effects and all their feedback.
    ///
    /// Uses [`DEFAULT_WAIT_TIMEOUT`].
    pub async fn send_and_wait(&self, action: A) -> Result<(), StoreError> {
        self.send_and_wait_timeout(action, DEFAULT_WAIT_TIMEOUT)
            .await
    }

    /// Like [`Store::send_and_wait`], with a custom timeout.
    ///
    /// On timeout the effects keep running; only the wait is abandoned.
    pub async fn send_and_wait_timeout(
        &self,
        action: A,
        timeout: Duration,
    ) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }

        let wait = async {
            match self.send_with(action, SendOptions::tracked()).await {
                Some(task) => task.wait().await,
                None => Ok(()),
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout { duration: timeout }),
        }
    }

    /// Snapshot of the registry.
    pub async fn stats(&self) -> Result<RegistryStats, StoreError> {
        let (reply, stats) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply })
            .map_err(|_| StoreError::Closed)?;
        stats.await.map_err(|_| StoreError::Closed)
    }

    /// Cancel every running effect and stop the loop.
    ///
    /// Pending (suspended) effects are dropped without running. Sends after
    /// shutdown are ignored.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Returns true once the loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Watch state changes.
    ///
    /// A new value is published after every transition step.
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.state.clone()
    }

    /// Run `f` against the latest published state.
    pub fn with_state<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        f(&self.state.borrow())
    }

    /// The store's name, as used in tracing spans.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<A, S> Store<A, S>
where
    A: Send + 'static,
    S: Clone + Send + Sync + 'static,
{
    /// Clone of the latest published state.
    pub fn state(&self) -> S {
        self.state.borrow().clone()
    }
}

impl<A, S> std::fmt::Debug for Store<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("closed", &self.commands.is_closed())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Store Builder
// =============================================================================

/// Builder for a [`Store`].
///
/// # Example
///
/// ```ignore
/// let store = StoreBuilder::new(SearchState::default(), SearchReducer::new(client))
///     .name("search")
///     .build();
/// ```
pub struct StoreBuilder<A, S> {
    state: S,
    reducer: ReducerRunner<A, S>,
    name: Arc<str>,
}

impl<A, S> StoreBuilder<A, S>
where
    A: Send + 'static,
    S: Send + Sync + 'static,
{
    /// Create a builder with the initial state and reducer.
    pub fn new<R>(initial_state: S, reducer: R) -> Self
    where
        R: Reducer<A, S>,
    {
        Self {
            state: initial_state,
            reducer: ReducerRunner::new(reducer),
            name: Arc::from("store"),
        }
    }

    /// Name recorded on the store's tracing spans.
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Spawn the store loop and return its handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Store<A, S> {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(self.state);

        let store_loop = StoreLoop {
            reducer: self.reducer,
            state: state_tx,
            registry: TaskRegistry::new(),
            receiver,
            commands: commands.downgrade(),
        };

        let span = info_span!("store", name = %self.name);
        tokio::spawn(store_loop.run().instrument(span));

        Store {
            commands,
            state: state_rx,
            name: self.name,
        }
    }
}

// =============================================================================
// Store Loop
// =============================================================================

struct StoreLoop<A: Send + 'static, S> {
    reducer: ReducerRunner<A, S>,
    state: watch::Sender<S>,
    registry: TaskRegistry<A>,
    receiver: mpsc::UnboundedReceiver<Command<A>>,
    /// Handed to units; never keeps the loop alive on its own.
    commands: mpsc::WeakUnboundedSender<Command<A>>,
}

impl<A, S> StoreLoop<A, S>
where
    A: Send + 'static,
    S: Send + Sync + 'static,
{
    async fn run(mut self) {
        info!(reducer = self.reducer.name(), "store starting");

        let mut shutdown_reply = None;
        while let Some(command) = self.receiver.recv().await {
            match command {
                Command::Send {
                    action,
                    options,
                    reply,
                } => {
                    let task = self.handle_send(action, options);
                    if let Some(reply) = reply {
                        // Caller gave up waiting; units keep running
                        let _ = reply.send(task);
                    }
                }
                Command::UnitFinished { serial, queue } => {
                    self.handle_finished(serial, queue);
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.registry.stats());
                }
                Command::Shutdown { reply } => {
                    shutdown_reply = Some(reply);
                    break;
                }
            }
        }

        let cancelled = self.registry.cancel_all();
        info!(cancelled, "store stopped");

        // Close before acknowledging so `is_closed` holds once shutdown returns
        self.receiver.close();
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    /// Run one transition step and schedule its effects.
    fn handle_send(&mut self, action: A, options: SendOptions) -> Option<EffectTask> {
        let reducer = &mut self.reducer;
        let mut effect = Effect::none();
        self.state.send_modify(|state| {
            effect = reducer.reduce(action, state);
        });

        let mut units = Vec::new();
        for kind in effect.into_kinds() {
            if let Some(unit) = self.schedule(Submission { kind, options }) {
                units.push(unit);
            }
        }
        EffectTask::from_units(units)
    }

    /// Cancel, or admit and start, one effect kind.
    fn schedule(&mut self, submission: Submission<A>) -> Option<UnitHandle> {
        let Submission { kind, options } = self.registry.check_queue_policy(submission)?;

        let (work, id, queue) = match kind {
            EffectKind::Single {
                operation,
                id,
                queue,
            } => (Work::Single(operation), id, queue),
            EffectKind::Sequence { stream, id, queue } => (Work::Sequence(stream), id, queue),
            EffectKind::Cancel(predicate) => {
                let cancelled = self.registry.cancel_matching(predicate);
                debug!(cancelled, "cancel effect applied");
                return None;
            }
        };

        Some(self.start(work, id, queue, options))
    }

    /// Register an admitted unit and spawn it.
    fn start(
        &mut self,
        work: Work<A>,
        id: Option<EffectId>,
        queue: Option<EffectQueue>,
        options: SendOptions,
    ) -> UnitHandle {
        let span = debug_span!(
            "effect",
            id = id.as_ref().map_or("", EffectId::as_str),
            queue = queue.as_ref().map_or("", EffectQueue::name),
            priority = ?options.priority,
        );

        let cancel = CancelFlag::new();
        let start_at = queue
            .as_ref()
            .and_then(|queue| self.registry.reserve_start(queue));
        let serial = self
            .registry
            .register(UnitKey::for_id(id), queue.clone(), cancel.clone());

        trace!(serial, running = self.registry.len(), "effect admitted");

        let unit = Unit {
            serial,
            queue,
            cancel: cancel.clone(),
            start_at,
            commands: self.commands.clone(),
            options,
        };

        let join = match work {
            Work::Single(operation) => tokio::spawn(unit.run_single(operation).instrument(span)),
            Work::Sequence(stream) => tokio::spawn(unit.run_sequence(stream).instrument(span)),
        };

        UnitHandle { join, cancel }
    }

    /// Clean up a finished unit and release one pending unit of its queue.
    fn handle_finished(&mut self, serial: u64, queue: Option<EffectQueue>) {
        let removed = self.registry.finish(serial);
        trace!(serial, removed, "effect finished");

        let Some(queue) = queue else {
            return;
        };
        if !queue.policy().suspends() {
            return;
        }

        if let Some(submission) = self.registry.pop_pending(&queue) {
            debug!(
                queue = %queue,
                still_pending = self.registry.pending_count(&queue),
                "releasing suspended effect"
            );
            // Not part of any caller's handle
            let _ = self.schedule(submission);
        }
    }
}

enum Work<A> {
    Single(SingleOperation<A>),
    Sequence(ActionStream<A>),
}
