//! # Search Demo
//!
//! Type-ahead search over an in-memory catalog, plus a download manager.
//!
//! - Queries run on a `RunNewest(1)` queue: typing supersedes the previous
//!   lookup, and `Cancel` stops it outright.
//! - Downloads run on a `RunOldest(2, SuspendNew)` queue with jittered start
//!   spacing; extra downloads wait their turn.
//! - Each download reports progress as a stream of actions.
//!
//! ```text
//! RUST_LOG=seesaw_store=trace cargo run -p search-demo
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use futures::stream;
use seesaw_store::{Effect, EffectQueue, QueueDelay, Reducer, Store};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CATALOG: &[&str] = &[
    "rust-analyzer",
    "rustfmt",
    "rustup",
    "ripgrep",
    "tokio",
    "tracing",
    "serde",
    "smallvec",
];

// ============================================================================
// Actions
// ============================================================================

#[derive(Debug, Clone)]
enum SearchAction {
    QueryChanged(String),
    ResultsLoaded { query: String, hits: Vec<String> },
    Cancel,
    Download(String),
    Progress { name: String, percent: u8 },
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Default)]
struct SearchState {
    query: String,
    hits: Vec<String>,
    searching: bool,
    downloads: BTreeMap<String, u8>,
}

// ============================================================================
// Reducer
// ============================================================================

struct SearchReducer {
    search: EffectQueue,
    downloads: EffectQueue,
}

impl SearchReducer {
    fn new() -> Self {
        Self {
            search: EffectQueue::newest("search", 1),
            downloads: EffectQueue::oldest_suspend_new("downloads", 2).with_delay(
                QueueDelay::Random {
                    min: Duration::from_millis(20),
                    max: Duration::from_millis(60),
                },
            ),
        }
    }
}

async fn lookup(query: String) -> SearchAction {
    // Simulated backend latency
    tokio::time::sleep(Duration::from_millis(150)).await;
    let hits = CATALOG
        .iter()
        .filter(|name| name.contains(query.as_str()))
        .map(|name| name.to_string())
        .collect();
    SearchAction::ResultsLoaded { query, hits }
}

impl Reducer<SearchAction, SearchState> for SearchReducer {
    fn reduce(&mut self, action: SearchAction, state: &mut SearchState) -> Effect<SearchAction> {
        match action {
            SearchAction::QueryChanged(query) => {
                state.query = query.clone();
                if query.is_empty() {
                    state.hits.clear();
                    state.searching = false;
                    return Effect::cancel_id("search");
                }
                state.searching = true;
                Effect::single(async move { Some(lookup(query).await) })
                    .with_id("search")
                    .with_queue(self.search.clone())
            }
            SearchAction::ResultsLoaded { query, hits } => {
                if query == state.query {
                    state.hits = hits;
                    state.searching = false;
                }
                Effect::none()
            }
            SearchAction::Cancel => {
                state.searching = false;
                Effect::cancel_id("search")
            }
            SearchAction::Download(name) => {
                state.downloads.insert(name.clone(), 0);
                let steps = stream::unfold(0_u8, move |percent| {
                    let name = name.clone();
                    async move {
                        if percent >= 100 {
                            return None;
                        }
                        tokio::time::sleep(Duration::from_millis(40)).await;
                        let percent = percent + 25;
                        Some((SearchAction::Progress { name, percent }, percent))
                    }
                });
                Effect::sequence(steps).with_queue(self.downloads.clone())
            }
            SearchAction::Progress { name, percent } => {
                state.downloads.insert(name, percent);
                Effect::none()
            }
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

    let store = Store::builder(SearchState::default(), SearchReducer::new())
        .name("search")
        .build();

    // Typing: each keystroke supersedes the previous lookup
    for prefix in ["r", "ru", "rus", "rust"] {
        store.send_and_forget(SearchAction::QueryChanged(prefix.to_string()));
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    store
        .send_and_wait(SearchAction::QueryChanged("rustu".to_string()))
        .await?;
    let state = store.state();
    println!("query {:?} -> {:?}", state.query, state.hits);

    // Cancelled lookup never lands
    store.send(SearchAction::QueryChanged("tok".to_string())).await;
    store.send(SearchAction::Cancel).await;
    println!("after cancel: hits = {:?}", store.state().hits);

    // Four downloads, two at a time
    let mut tasks = Vec::new();
    for name in ["tokio", "serde", "tracing", "smallvec"] {
        if let Some(task) = store.send(SearchAction::Download(name.to_string())).await {
            tasks.push(task);
        }
    }
    println!(
        "registry: {}",
        serde_json::to_string_pretty(&store.stats().await?)?
    );

    for task in tasks {
        task.await?;
    }
    println!("first batch finished: {:?}", store.state().downloads);

    // Suspended downloads start as slots free up
    let mut states = store.subscribe();
    states
        .wait_for(|state| state.downloads.values().all(|percent| *percent >= 100))
        .await?;
    println!("all downloads finished: {:?}", store.state().downloads);

    store.shutdown().await;
    Ok(())
}
