//! Testing utilities for seesaw-store reducers and stores.
//!
//! Reducers are plain synchronous functions, so most tests never need a
//! running store. For the ones that do, this crate offers latches and state
//! waiters so tests wait for meaning, not time.
//!
//! # Quick Start
//!
//! ## Using `assert_reduces!` Macro
//!
//! ```ignore
//! use seesaw_store_testing::assert_reduces;
//!
//! let mut reducer = CounterReducer;
//! let mut count = 0;
//!
//! assert_reduces!(
//!     reducer, count,
//!     Action::Increment => 0,
//!     Action::IncrementLater => 1,
//! );
//! assert_eq!(count, 1);
//! ```
//!
//! ## Using Fluent Builder
//!
//! ```ignore
//! use seesaw_store_testing::ReducerTest;
//!
//! ReducerTest::new(SearchReducer::default(), SearchState::default())
//!     .given(Action::QueryChanged("rust".into()))
//!     .expect_effects(1)
//!     .expect_queue("search")
//!     .then(Action::Cancel)
//!     .expect_cancel_of("search")
//!     .assert_state(|s| s.query.is_empty());
//! ```
//!
//! ## Using `ActionLatch` With a Live Store
//!
//! ```ignore
//! use seesaw_store_testing::{shared_latch, RecordingReducer};
//!
//! let latch = shared_latch(3);
//! let (reducer, log) = RecordingReducer::new(MyReducer);
//! let store = Store::new(State::default(), reducer.with_latch(latch.clone()));
//!
//! store.send(Action::Start).await;
//!
//! latch.await_zero().await;  // Start plus two feedback actions
//! assert_eq!(log.len(), 3);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Notify;

use seesaw_store::{Effect, EffectId, EffectKind, Reducer, Store, StoreError};

/// Run one transition step of `reducer`.
///
/// Used by [`assert_reduces!`]; handy on its own for one-off checks.
pub fn reduce_once<A, S, R>(reducer: &mut R, action: A, state: &mut S) -> Effect<A>
where
    R: Reducer<A, S>,
{
    reducer.reduce(action, state)
}

/// Asserts how many effect kinds each action produces, in order.
///
/// # Syntax
///
/// ```ignore
/// assert_reduces!(
///     reducer, state,
///     action1 => expected_kind_count1,
///     action2 => expected_kind_count2,
/// );
/// ```
///
/// # Panics
///
/// Panics if any step produces a different number of effect kinds.
#[macro_export]
macro_rules! assert_reduces {
    ($reducer:expr, $state:expr, $($action:expr => $kinds:expr),+ $(,)?) => {
        $(
            let effect = $crate::reduce_once(&mut $reducer, $action, &mut $state);
            assert_eq!(
                effect.len(),
                $kinds,
                "Unexpected effect for action {}\n  expected kinds: {}\n  actual: {:?}",
                stringify!($action),
                $kinds,
                effect
            );
        )+
    };
}

// =============================================================================
// Reducer Test
// =============================================================================

/// Fluent test builder for reducers.
///
/// Runs the reducer directly, without a store. Effects are captured for
/// inspection and can be executed with [`ReducerTest::run_effects`] or fed
/// back with [`ReducerTest::feed_back`].
///
/// # Example
///
/// ```ignore
/// ReducerTest::new(counter, 0)
///     .given(Action::Increment)
///     .expect_no_effect()
///     .then(Action::IncrementLater)
///     .expect_effect(|e| e.kinds().all(|k| !k.is_cancel()))
///     .assert_state(|count| *count == 1);
/// ```
pub struct ReducerTest<A, S, R> {
    reducer: R,
    state: S,
    last_effect: Option<Effect<A>>,
}

impl<A, S, R> ReducerTest<A, S, R>
where
    A: Send + 'static,
    R: Reducer<A, S>,
{
    /// Create a test around `reducer` starting from `state`.
    pub fn new(reducer: R, state: S) -> Self {
        Self {
            reducer,
            state,
            last_effect: None,
        }
    }

    /// Reduce the first action and capture its effect.
    pub fn given(mut self, action: A) -> Self {
        self.last_effect = Some(self.reducer.reduce(action, &mut self.state));
        self
    }

    /// Reduce a subsequent action and capture its effect.
    pub fn then(self, action: A) -> Self {
        self.given(action)
    }

    fn effect(&self) -> &Effect<A> {
        match &self.last_effect {
            Some(effect) => effect,
            None => panic!("No action reduced yet; call given() first"),
        }
    }

    /// Assert the last effect has exactly `count` kinds.
    pub fn expect_effects(self, count: usize) -> Self {
        let effect = self.effect();
        assert_eq!(
            effect.len(),
            count,
            "Effect kind count mismatch\n  expected: {}\n  actual: {:?}",
            count,
            effect
        );
        self
    }

    /// Assert the last effect is empty.
    pub fn expect_no_effect(self) -> Self {
        let effect = self.effect();
        assert!(effect.is_empty(), "Expected no effect, got {:?}", effect);
        self
    }

    /// Assert the last effect matches a predicate.
    pub fn expect_effect<F>(self, predicate: F) -> Self
    where
        F: FnOnce(&Effect<A>) -> bool,
    {
        let effect = self.effect();
        assert!(predicate(effect), "Effect predicate failed for {:?}", effect);
        self
    }

    /// Assert some kind of the last effect is tagged with `id`.
    pub fn expect_id(self, id: impl Into<EffectId>) -> Self {
        let id = id.into();
        let effect = self.effect();
        assert!(
            effect.kinds().any(|kind| kind.id() == Some(&id)),
            "Expected an effect with id {}, got {:?}",
            id,
            effect
        );
        self
    }

    /// Assert some kind of the last effect is scheduled on the named queue.
    pub fn expect_queue(self, name: &str) -> Self {
        let effect = self.effect();
        assert!(
            effect
                .kinds()
                .any(|kind| kind.queue().is_some_and(|queue| queue.name() == name)),
            "Expected an effect on queue {}, got {:?}",
            name,
            effect
        );
        self
    }

    /// Assert some cancel kind of the last effect selects `id`.
    pub fn expect_cancel_of(self, id: impl Into<EffectId>) -> Self {
        let id = id.into();
        let effect = self.effect();
        assert!(
            effect.kinds().any(|kind| kind.cancels(&id)),
            "Expected a cancel of {}, got {:?}",
            id,
            effect
        );
        self
    }

    /// Assert the state matches a predicate.
    pub fn assert_state<F>(self, predicate: F) -> Self
    where
        F: FnOnce(&S) -> bool,
    {
        assert!(predicate(&self.state), "State predicate failed");
        self
    }

    /// Execute the last effect's `Single` and `Sequence` kinds one after
    /// another and collect the actions they produce.
    ///
    /// Cancel kinds are skipped. The captured effect is consumed.
    pub async fn run_effects(&mut self) -> anyhow::Result<Vec<A>> {
        let effect = self.last_effect.take().unwrap_or_default();
        let mut actions = Vec::new();

        for kind in effect.into_kinds() {
            match kind {
                EffectKind::Single { operation, .. } => actions.extend(operation.await?),
                EffectKind::Sequence { mut stream, .. } => {
                    while let Some(item) = stream.next().await {
                        actions.push(item?);
                    }
                }
                EffectKind::Cancel(_) => {}
            }
        }

        Ok(actions)
    }

    /// Execute the last effect and reduce every produced action.
    ///
    /// The effects of those reductions become the new captured effect, so
    /// calling this repeatedly walks a feedback chain one level at a time.
    pub async fn feed_back(mut self) -> anyhow::Result<Self> {
        let actions = self.run_effects().await?;

        let mut next = Effect::none();
        for action in actions {
            next = next.merge(self.reducer.reduce(action, &mut self.state));
        }
        self.last_effect = Some(next);

        Ok(self)
    }

    /// Get a reference to the state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Get the last captured effect.
    pub fn last_effect(&self) -> Option<&Effect<A>> {
        self.last_effect.as_ref()
    }

    /// Consume the test and return the state.
    pub fn into_state(self) -> S {
        self.state
    }
}

// =============================================================================
// Action Latch
// =============================================================================

/// Synchronization primitive for waiting on a number of observed actions.
///
/// Pair it with [`RecordingReducer::with_latch`] to wait until the store has
/// reduced an exact number of actions, feedback included.
///
/// # Timeout Safety
///
/// ```ignore
/// tokio::time::timeout(Duration::from_secs(5), latch.await_zero())
///     .await
///     .expect("latch timed out");
/// ```
#[derive(Debug)]
pub struct ActionLatch {
    remaining: AtomicUsize,
    notify: Notify,
}

impl ActionLatch {
    /// Create a latch expecting `expected` actions.
    pub fn new(expected: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(expected),
            notify: Notify::new(),
        }
    }

    /// Count one observed action.
    ///
    /// # Panics
    ///
    /// Panics if called more times than expected.
    pub fn dec(&self) {
        let prev = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(1) => self.notify.notify_waiters(),
            Ok(_) => {}
            Err(_) => panic!("ActionLatch decremented below zero - more actions than expected"),
        }
    }

    /// Wait for the count to reach zero.
    ///
    /// Returns immediately if it already has.
    pub async fn await_zero(&self) {
        loop {
            let notified = self.notify.notified();

            if self.remaining.load(Ordering::Acquire) == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Actions still expected.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Returns true once every expected action was observed.
    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}

/// Arc-wrapped [`ActionLatch`] for sharing with a reducer.
pub type SharedActionLatch = Arc<ActionLatch>;

/// Convenience function for `Arc::new(ActionLatch::new(expected))`.
pub fn shared_latch(expected: usize) -> SharedActionLatch {
    Arc::new(ActionLatch::new(expected))
}

// =============================================================================
// Recording Reducer
// =============================================================================

/// Shared, append-only log of the actions a [`RecordingReducer`] saw.
#[derive(Debug)]
pub struct ActionLog<A> {
    actions: Arc<Mutex<Vec<A>>>,
}

impl<A> Clone for ActionLog<A> {
    fn clone(&self) -> Self {
        Self {
            actions: self.actions.clone(),
        }
    }
}

impl<A: Clone> ActionLog<A> {
    fn new() -> Self {
        Self {
            actions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn push(&self, action: A) {
        self.actions.lock().unwrap().push(action);
    }

    /// Every recorded action, in reduction order.
    pub fn actions(&self) -> Vec<A> {
        self.actions.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.actions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Actions matching a predicate.
    pub fn matching<F>(&self, predicate: F) -> Vec<A>
    where
        F: Fn(&A) -> bool,
    {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .filter(|action| predicate(action))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.actions.lock().unwrap().clear();
    }
}

impl<A: Clone + PartialEq> ActionLog<A> {
    /// Returns true if `action` was reduced at least once.
    pub fn contains(&self, action: &A) -> bool {
        self.actions.lock().unwrap().contains(action)
    }
}

/// Wraps a reducer and records every action it reduces.
///
/// # Example
///
/// ```ignore
/// let (reducer, log) = RecordingReducer::new(CounterReducer);
/// let store = Store::new(0, reducer);
///
/// store.send_and_wait(Action::IncrementLater).await?;
/// assert_eq!(log.actions(), vec![Action::IncrementLater, Action::Increment]);
/// ```
pub struct RecordingReducer<R, A> {
    inner: R,
    log: ActionLog<A>,
    latch: Option<SharedActionLatch>,
}

impl<R, A: Clone> RecordingReducer<R, A> {
    /// Wrap `inner`; returns the reducer and a handle to its log.
    pub fn new(inner: R) -> (Self, ActionLog<A>) {
        let log = ActionLog::new();
        let reducer = Self {
            inner,
            log: log.clone(),
            latch: None,
        };
        (reducer, log)
    }

    /// Also count every reduced action down on `latch`.
    pub fn with_latch(mut self, latch: SharedActionLatch) -> Self {
        self.latch = Some(latch);
        self
    }
}

impl<R, A, S> Reducer<A, S> for RecordingReducer<R, A>
where
    R: Reducer<A, S>,
    A: Clone + Send + 'static,
{
    fn reduce(&mut self, action: A, state: &mut S) -> Effect<A> {
        self.log.push(action.clone());
        let effect = self.inner.reduce(action, state);
        if let Some(latch) = &self.latch {
            latch.dec();
        }
        effect
    }
}

// =============================================================================
// Store Helpers
// =============================================================================

/// Wait until the store's state satisfies `predicate`, then return it.
///
/// Checks the current state first. Fails with [`StoreError::Timeout`] if the
/// predicate does not hold within `timeout`, or [`StoreError::Closed`] if the
/// store stops first.
pub async fn wait_for_state<A, S, F>(
    store: &Store<A, S>,
    predicate: F,
    timeout: Duration,
) -> Result<S, StoreError>
where
    A: Send + 'static,
    S: Clone + Send + Sync + 'static,
    F: FnMut(&S) -> bool,
{
    let mut states = store.subscribe();
    let wait = async {
        match states.wait_for(predicate).await {
            Ok(state) => Ok(state.clone()),
            Err(_) => Err(StoreError::Closed),
        }
    };

    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| StoreError::Timeout { duration: timeout })?
}

#[cfg(test)]
mod tests {
    use super::*;

    use seesaw_store::EffectQueue;

    #[derive(Debug, Clone, PartialEq)]
    enum Action {
        Increment,
        IncrementLater,
        Search(String),
        Cancel,
        Tick(u32),
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct State {
        count: i64,
        query: String,
        ticks: Vec<u32>,
    }

    struct TestReducer;

    impl Reducer<Action, State> for TestReducer {
        fn reduce(&mut self, action: Action, state: &mut State) -> Effect<Action> {
            match action {
                Action::Increment => {
                    state.count += 1;
                    Effect::none()
                }
                Action::IncrementLater => Effect::single(async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Some(Action::Increment)
                }),
                Action::Search(query) => {
                    state.query = query;
                    Effect::sequence(futures::stream::iter(vec![Action::Tick(1), Action::Tick(2)]))
                        .with_id("search")
                        .with_queue(EffectQueue::newest("search", 1))
                }
                Action::Cancel => {
                    state.query.clear();
                    Effect::cancel_id("search")
                }
                Action::Tick(n) => {
                    state.ticks.push(n);
                    Effect::none()
                }
            }
        }
    }

    // =========================================================================
    // assert_reduces! Tests
    // =========================================================================

    #[test]
    fn test_assert_reduces_macro() {
        let mut reducer = TestReducer;
        let mut state = State::default();

        assert_reduces!(
            reducer, state,
            Action::Increment => 0,
            Action::IncrementLater => 1,
            Action::Cancel => 1,
        );
        assert_eq!(state.count, 1);
    }

    #[test]
    #[should_panic(expected = "Unexpected effect")]
    fn test_assert_reduces_macro_failure() {
        let mut reducer = TestReducer;
        let mut state = State::default();

        assert_reduces!(reducer, state, Action::Increment => 1);
    }

    // =========================================================================
    // ReducerTest Tests
    // =========================================================================

    #[test]
    fn test_reducer_test_fluent_api() {
        ReducerTest::new(TestReducer, State::default())
            .given(Action::Increment)
            .expect_no_effect()
            .then(Action::Search("rust".into()))
            .expect_effects(1)
            .expect_id("search")
            .expect_queue("search")
            .assert_state(|s| s.query == "rust")
            .then(Action::Cancel)
            .expect_cancel_of("search")
            .expect_effect(|e| e.kinds().all(|k| k.is_cancel()))
            .assert_state(|s| s.query.is_empty() && s.count == 1);
    }

    #[test]
    #[should_panic(expected = "Expected no effect")]
    fn test_reducer_test_expect_no_effect_failure() {
        ReducerTest::new(TestReducer, State::default())
            .given(Action::IncrementLater)
            .expect_no_effect();
    }

    #[tokio::test]
    async fn test_reducer_test_runs_effects() {
        let mut test =
            ReducerTest::new(TestReducer, State::default()).given(Action::Search("q".into()));

        let actions = test.run_effects().await.unwrap();
        assert_eq!(actions, vec![Action::Tick(1), Action::Tick(2)]);
        assert!(test.last_effect().is_none());
    }

    #[tokio::test]
    async fn test_reducer_test_feed_back() {
        let test = ReducerTest::new(TestReducer, State::default())
            .given(Action::IncrementLater)
            .feed_back()
            .await
            .unwrap()
            .expect_no_effect();

        assert_eq!(test.into_state().count, 1);
    }

    // =========================================================================
    // ActionLatch Tests
    // =========================================================================

    #[test]
    fn test_action_latch_basic() {
        let latch = ActionLatch::new(2);
        assert_eq!(latch.remaining(), 2);
        assert!(!latch.is_complete());

        latch.dec();
        latch.dec();
        assert!(latch.is_complete());
    }

    #[test]
    #[should_panic(expected = "decremented below zero")]
    fn test_action_latch_underflow_panics() {
        let latch = ActionLatch::new(1);
        latch.dec();
        latch.dec();
    }

    #[tokio::test]
    async fn test_action_latch_await_immediate() {
        ActionLatch::new(0).await_zero().await;
    }

    #[tokio::test]
    async fn test_shared_latch_across_tasks() {
        let latch = shared_latch(2);

        let remote = latch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            remote.dec();
            remote.dec();
        });

        latch.await_zero().await;
        assert!(latch.is_complete());
    }

    // =========================================================================
    // RecordingReducer / Store Helper Tests
    // =========================================================================

    #[tokio::test]
    async fn test_recording_reducer_with_store() {
        let latch = shared_latch(2);
        let (reducer, log) = RecordingReducer::new(TestReducer);
        let store = Store::new(State::default(), reducer.with_latch(latch.clone()));

        store.send_and_forget(Action::IncrementLater);

        tokio::time::timeout(Duration::from_secs(1), latch.await_zero())
            .await
            .expect("latch timed out");

        assert_eq!(log.actions(), vec![Action::IncrementLater, Action::Increment]);
        assert!(log.contains(&Action::Increment));
        assert_eq!(log.matching(|a| *a == Action::Increment).len(), 1);
        assert_eq!(store.state().count, 1);

        log.clear();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_state() {
        let store = Store::new(State::default(), TestReducer);
        store.send(Action::IncrementLater).await;

        let state = wait_for_state(&store, |s| s.count == 1, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(state.count, 1);
    }

    #[tokio::test]
    async fn test_wait_for_state_times_out() {
        let store = Store::new(State::default(), TestReducer);

        let err = wait_for_state(&store, |s| s.count == 5, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }));
    }
}
