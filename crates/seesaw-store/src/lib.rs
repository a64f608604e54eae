//! # Seesaw Store
//!
//! A single-writer, action-driven state engine. A reducer decides, effects
//! execute, and every result comes back as another action.
//!
//! ## Core Concepts
//!
//! - **Action** - a value describing something that happened or was requested
//! - **State** - owned exclusively by the [`Store`]; only the reducer mutates it
//! - **[`Reducer`]** - `(action, &mut state) -> Effect`, synchronous and pure
//! - **[`Effect`]** - an inert description of asynchronous follow-up work
//!
//! ## Architecture
//!
//! ```text
//! caller ──send(action)──► Store loop (one action at a time)
//!                               │
//!                               ├─► Reducer.reduce(action, &mut state)
//!                               │        │
//!                               │        └─► Effect [Single | Sequence | Cancel]*
//!                               │
//!                               ├─► Cancel ─► task registry (by ID)
//!                               │
//!                               └─► Single/Sequence ─► queue policy
//!                                        │
//!                             admitted ──┼── suspended ──► pending (FIFO)
//!                                        │── discarded
//!                                        ▼
//!                                   spawned unit
//!                                        │
//!                     feedback action ◄──┘ (back through send)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Serialized** - actions reduce strictly one at a time, in arrival order
//! 2. **Inert effects** - nothing runs until the store schedules it
//! 3. **Bounded queues** - a queue never runs more than its `max_count` units
//! 4. **Silent cancellation** - a cancelled unit never feeds an action back
//! 5. **Idempotent cleanup** - a unit leaves the registry exactly once
//!
//! ## Queue Policies
//!
//! | Policy | When full |
//! |--------|-----------|
//! | `RunNewest { max_count }` | cancel the oldest running unit, start the new one |
//! | `RunOldest { max_count, DiscardNew }` | drop the new unit |
//! | `RunOldest { max_count, SuspendNew }` | buffer the new unit until a slot frees |
//!
//! ## Example
//!
//! ```ignore
//! use seesaw_store::{Effect, EffectQueue, Store};
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone)]
//! enum Action {
//!     QueryChanged(String),
//!     ResultsLoaded(Vec<String>),
//! }
//!
//! #[derive(Debug, Clone, Default)]
//! struct Search {
//!     query: String,
//!     results: Vec<String>,
//! }
//!
//! let store = Store::new(Search::default(), |action: Action, state: &mut Search| {
//!     match action {
//!         Action::QueryChanged(query) => {
//!             state.query = query.clone();
//!             Effect::single(async move {
//!                 tokio::time::sleep(Duration::from_millis(300)).await;
//!                 Some(Action::ResultsLoaded(lookup(&query).await))
//!             })
//!             .with_id("search")
//!             .with_queue(EffectQueue::newest("search", 1))
//!         }
//!         Action::ResultsLoaded(results) => {
//!             state.results = results;
//!             Effect::none()
//!         }
//!     }
//! });
//!
//! store.send(Action::QueryChanged("ru".into())).await;
//! store.send_and_wait(Action::QueryChanged("rust".into())).await?;
//! ```
//!
//! ## What Seesaw Store Is Not
//!
//! - A persistence layer: state lives in memory only
//! - A distributed scheduler: one process, one store loop
//! - A preemptive executor: cancellation is cooperative

mod effect;
mod error;
mod queue;
mod reducer;
mod registry;
mod store;
mod task;
mod unit;


// Re-export effect types
pub use effect::{ActionStream, CancelPredicate, Effect, EffectId, EffectKind, SingleOperation};

// Re-export queue types
pub use queue::{EffectQueue, OverflowPolicy, QueueDelay, QueuePolicy};

// Re-export reducer types
pub use reducer::Reducer;

// Re-export store types (primary entry point)
pub use store::{Priority, SendOptions, Store, StoreBuilder, DEFAULT_WAIT_TIMEOUT};

// Re-export handle and registry types
pub use registry::{QueueStats, RegistryStats};
pub use task::EffectTask;

// Re-export error types
pub use error::StoreError;
