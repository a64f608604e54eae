//! Effect queues and their admission policies.
//!
//! A queue names a concurrency category. Every unit scheduled on the same
//! queue shares its running slots:
//!
//! - [`QueuePolicy::RunNewest`] - admitting a new unit evicts the oldest
//!   running ones. Never suspends.
//! - [`QueuePolicy::RunOldest`] - running units keep their slots; overflow is
//!   either dropped ([`OverflowPolicy::DiscardNew`]) or buffered until a slot
//!   frees up ([`OverflowPolicy::SuspendNew`]).
//!
//! Queues compare and hash by name only. The policy used for a decision is
//! the one carried by the effect being admitted.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do with a unit that arrives while a `RunOldest` queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Buffer the unit and start it once a slot frees up (FIFO).
    SuspendNew,
    /// Drop the unit.
    DiscardNew,
}

/// Admission rules for an [`EffectQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum QueuePolicy {
    /// Up to `max_count` running units; the oldest are evicted to make room.
    RunNewest { max_count: usize },
    /// Up to `max_count` running units; new arrivals wait or are dropped.
    RunOldest {
        max_count: usize,
        overflow: OverflowPolicy,
    },
}

/// Outcome of checking a queue policy against the current running count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Start the unit after cancelling `evict` of the oldest running units.
    Admit { evict: usize },
    /// Buffer the unit in the queue's pending list.
    Suspend,
    /// Drop the unit.
    Discard,
}

impl QueuePolicy {
    /// Maximum concurrently running units. Zero is treated as one.
    pub fn max_count(&self) -> usize {
        match *self {
            QueuePolicy::RunNewest { max_count } | QueuePolicy::RunOldest { max_count, .. } => {
                max_count.max(1)
            }
        }
    }

    /// Returns true if overflow is buffered rather than dropped or evicted.
    pub fn suspends(&self) -> bool {
        matches!(
            self,
            QueuePolicy::RunOldest {
                overflow: OverflowPolicy::SuspendNew,
                ..
            }
        )
    }

    /// Decide what happens to one more unit given `running` units.
    pub(crate) fn admit(&self, running: usize) -> Admission {
        let max_count = self.max_count();
        match self {
            QueuePolicy::RunNewest { .. } => Admission::Admit {
                evict: (running + 1).saturating_sub(max_count),
            },
            QueuePolicy::RunOldest { overflow, .. } => {
                if running < max_count {
                    Admission::Admit { evict: 0 }
                } else {
                    match overflow {
                        OverflowPolicy::SuspendNew => Admission::Suspend,
                        OverflowPolicy::DiscardNew => Admission::Discard,
                    }
                }
            }
        }
    }
}

/// Minimum spacing between the starts of consecutive units on a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "delay", rename_all = "snake_case")]
pub enum QueueDelay {
    /// Start as soon as admitted.
    #[default]
    None,
    /// Fixed spacing.
    Constant(Duration),
    /// Spacing drawn uniformly from `min..=max` for every unit.
    Random { min: Duration, max: Duration },
}

impl QueueDelay {
    /// Draw the spacing for the next unit.
    pub(crate) fn sample(&self) -> Duration {
        match *self {
            QueueDelay::None => Duration::ZERO,
            QueueDelay::Constant(delay) => delay,
            QueueDelay::Random { min, max } => {
                if max <= min {
                    return min;
                }
                let span = u64::try_from((max - min).as_nanos()).unwrap_or(u64::MAX);
                min + Duration::from_nanos(fastrand::u64(0..=span))
            }
        }
    }

    pub(crate) fn is_none(&self) -> bool {
        matches!(self, QueueDelay::None)
    }
}

/// A named concurrency category with its admission policy.
///
/// # Example
///
/// ```ignore
/// use seesaw_store::{EffectQueue, QueueDelay};
/// use std::time::Duration;
///
/// // Latest search wins
/// let search = EffectQueue::newest("search", 1);
///
/// // At most 3 downloads, the rest wait their turn, spaced 100ms apart
/// let downloads = EffectQueue::oldest_suspend_new("downloads", 3)
///     .with_delay(QueueDelay::Constant(Duration::from_millis(100)));
/// ```
#[derive(Clone)]
pub struct EffectQueue {
    name: Arc<str>,
    policy: QueuePolicy,
    delay: QueueDelay,
}

impl EffectQueue {
    /// Create a queue with an explicit policy.
    pub fn new(name: impl Into<Arc<str>>, policy: QueuePolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            delay: QueueDelay::None,
        }
    }

    /// `RunNewest` queue: the latest `max_count` units win.
    pub fn newest(name: impl Into<Arc<str>>, max_count: usize) -> Self {
        Self::new(name, QueuePolicy::RunNewest { max_count })
    }

    /// `RunOldest` queue that drops overflow.
    pub fn oldest_discard_new(name: impl Into<Arc<str>>, max_count: usize) -> Self {
        Self::new(
            name,
            QueuePolicy::RunOldest {
                max_count,
                overflow: OverflowPolicy::DiscardNew,
            },
        )
    }

    /// `RunOldest` queue that buffers overflow.
    pub fn oldest_suspend_new(name: impl Into<Arc<str>>, max_count: usize) -> Self {
        Self::new(
            name,
            QueuePolicy::RunOldest {
                max_count,
                overflow: OverflowPolicy::SuspendNew,
            },
        )
    }

    /// Space out unit starts on this queue.
    pub fn with_delay(mut self, delay: QueueDelay) -> Self {
        self.delay = delay;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    pub fn delay(&self) -> QueueDelay {
        self.delay
    }
}

impl PartialEq for EffectQueue {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for EffectQueue {}

impl Hash for EffectQueue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for EffectQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectQueue")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("delay", &self.delay)
            .finish()
    }
}

impl fmt::Display for EffectQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
