//! # Counter Demo
//!
//! A counter with a debounced follow-up increment. Every `Increment` bumps
//! the count and schedules a delayed bump on a `RunNewest(1)` queue, so a
//! burst of increments only earns one delayed bump.
//!
//! ```text
//! RUST_LOG=debug cargo run -p counter-demo
//! ```

use std::time::Duration;

use anyhow::Result;
use seesaw_store::{Effect, EffectQueue, Priority, SendOptions, Store};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// ============================================================================
// Actions
// ============================================================================

#[derive(Debug, Clone)]
enum CounterAction {
    /// Bump now, and once more after the burst settles
    Increment,
    /// The debounced bump
    DelayedIncrement,
    /// Drop any pending delayed bump
    CancelDelayed,
    Reset,
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Counter {
    count: i64,
    delayed_applied: u32,
}

// ============================================================================
// Reducer
// ============================================================================

const DEBOUNCE: Duration = Duration::from_millis(200);

fn reduce(action: CounterAction, counter: &mut Counter) -> Effect<CounterAction> {
    match action {
        CounterAction::Increment => {
            counter.count += 1;
            Effect::single(async {
                tokio::time::sleep(DEBOUNCE).await;
                Some(CounterAction::DelayedIncrement)
            })
            .with_id("delayed-increment")
            .with_queue(EffectQueue::newest("delayed-increment", 1))
        }
        CounterAction::DelayedIncrement => {
            counter.count += 1;
            counter.delayed_applied += 1;
            Effect::none()
        }
        CounterAction::CancelDelayed => Effect::cancel_id("delayed-increment"),
        CounterAction::Reset => {
            *counter = Counter::default();
            Effect::cancel_id("delayed-increment")
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,seesaw_store=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Store::builder(Counter::default(), reduce)
        .name("counter")
        .build();

    // Burst: only the last delayed bump survives
    for _ in 0..3 {
        store.send_and_forget(CounterAction::Increment);
    }
    let last = store
        .send_with(
            CounterAction::Increment,
            SendOptions::tracked().with_priority(Priority::High),
        )
        .await;
    if let Some(task) = last {
        task.await?;
    }
    let counter = store.state();
    println!(
        "after burst: count = {} (delayed bumps applied: {})",
        counter.count, counter.delayed_applied
    );

    // Cancel before the debounce fires
    store.send(CounterAction::Increment).await;
    store.send(CounterAction::CancelDelayed).await;
    tokio::time::sleep(DEBOUNCE * 2).await;
    println!("after cancel: count = {}", store.state().count);

    // One increment, waiting for its feedback
    store.send_and_wait(CounterAction::Reset).await?;
    store.send_and_wait(CounterAction::Increment).await?;
    println!("after reset: count = {}", store.state().count);

    let stats = store.stats().await?;
    tracing::info!(running = stats.running, "shutting down");
    store.shutdown().await;

    Ok(())
}
