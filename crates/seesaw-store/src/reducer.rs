//! Reducer trait and panic-isolating runner.
//!
//! A reducer is the store's transition function. It receives each action
//! together with exclusive access to the state, mutates the state in place and
//! returns an [`Effect`] describing any asynchronous follow-up work.
//!
//! # Key Properties
//!
//! - **Synchronous**: no IO, no `.await`; asynchrony goes in the returned effect
//! - **Serial**: the store never calls `reduce` concurrently
//! - **Deterministic**: same action and state, same result

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use crate::effect::Effect;
use crate::error::panic_message;

/// The transition function of a store.
///
/// Closures of the shape `FnMut(A, &mut S) -> Effect<A>` implement this
/// trait, so most reducers are written inline.
///
/// # Example
///
/// ```ignore
/// use seesaw_store::{Effect, Reducer};
///
/// struct CounterReducer;
///
/// impl Reducer<CounterAction, i64> for CounterReducer {
///     fn reduce(&mut self, action: CounterAction, count: &mut i64) -> Effect<CounterAction> {
///         match action {
///             CounterAction::Increment => {
///                 *count += 1;
///                 Effect::none()
///             }
///             CounterAction::IncrementLater => Effect::single(async {
///                 tokio::time::sleep(Duration::from_secs(1)).await;
///                 Some(CounterAction::Increment)
///             }),
///         }
///     }
/// }
/// ```
pub trait Reducer<A, S>: Send + 'static {
    /// Apply `action` to `state` and describe the resulting effects.
    fn reduce(&mut self, action: A, state: &mut S) -> Effect<A>;
}

impl<A, S, F> Reducer<A, S> for F
where
    F: FnMut(A, &mut S) -> Effect<A> + Send + 'static,
{
    fn reduce(&mut self, action: A, state: &mut S) -> Effect<A> {
        self(action, state)
    }
}

/// Owns the store's reducer and contains its panics.
pub(crate) struct ReducerRunner<A, S> {
    inner: Box<dyn Reducer<A, S>>,
    name: &'static str,
}

impl<A: 'static, S: 'static> ReducerRunner<A, S> {
    pub(crate) fn new<R: Reducer<A, S>>(reducer: R) -> Self {
        Self {
            inner: Box::new(reducer),
            name: std::any::type_name::<R>(),
        }
    }

    /// Run one transition step.
    ///
    /// A panicking reducer yields no effects. The state keeps whatever
    /// mutations happened before the panic.
    pub(crate) fn reduce(&mut self, action: A, state: &mut S) -> Effect<A> {
        let result = catch_unwind(AssertUnwindSafe(|| self.inner.reduce(action, state)));

        match result {
            Ok(effect) => effect,
            Err(payload) => {
                error!(
                    reducer = self.name,
                    panic = %panic_message(payload.as_ref()),
                    "reducer panicked"
                );
                Effect::none()
            }
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum TestAction {
        Add(i32),
        Explode,
    }

    struct Adder;

    impl Reducer<TestAction, i32> for Adder {
        fn reduce(&mut self, action: TestAction, state: &mut i32) -> Effect<TestAction> {
            match action {
                TestAction::Add(n) => {
                    *state += n;
                    Effect::none()
                }
                TestAction::Explode => panic!("reducer exploded"),
            }
        }
    }

    #[test]
    fn test_struct_reducer() {
        let mut runner = ReducerRunner::new(Adder);
        let mut state = 0;
        runner.reduce(TestAction::Add(2), &mut state);
        runner.reduce(TestAction::Add(3), &mut state);
        assert_eq!(state, 5);
        assert!(runner.name().ends_with("Adder"));
    }

    #[test]
    fn test_closure_reducer() {
        let mut calls = 0;
        let mut runner = ReducerRunner::new(move |action: TestAction, state: &mut i32| {
            calls += 1;
            if let TestAction::Add(n) = action {
                *state += n * calls;
            }
            Effect::none()
        });

        let mut state = 0;
        runner.reduce(TestAction::Add(1), &mut state);
        runner.reduce(TestAction::Add(1), &mut state);
        assert_eq!(state, 3);
    }

    #[test]
    fn test_panic_is_contained() {
        let mut runner = ReducerRunner::new(Adder);
        let mut state = 1;

        let effect = runner.reduce(TestAction::Explode, &mut state);
        assert!(effect.is_empty());

        // Runner remains usable after a panic
        runner.reduce(TestAction::Add(1), &mut state);
        assert_eq!(state, 2);
    }
}
