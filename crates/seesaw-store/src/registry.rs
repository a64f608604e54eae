//! Bookkeeping for in-flight effect units.
//!
//! The registry keeps two indexes over running units:
//!
//! - **by ID** - for cancellation. Units without an [`EffectId`] get a private
//!   key that no cancel predicate can reach.
//! - **by queue** - arrival-ordered running lists for policy enforcement.
//!
//! plus a FIFO pending buffer per `RunOldest`/`SuspendNew` queue.
//!
//! The registry is owned by the store loop and only touched from it, so every
//! "check then remove" here is a single step with respect to other units.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::effect::{EffectId, EffectKind};
use crate::queue::{Admission, EffectQueue};
use crate::store::SendOptions;
use crate::unit::CancelFlag;

/// Key of an ID bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum UnitKey {
    Id(EffectId),
    Private(Uuid),
}

impl UnitKey {
    pub(crate) fn for_id(id: Option<EffectId>) -> Self {
        match id {
            Some(id) => UnitKey::Id(id),
            None => UnitKey::Private(Uuid::new_v4()),
        }
    }
}

/// An effect kind waiting for admission, with the options it was sent with.
pub(crate) struct Submission<A> {
    pub(crate) kind: EffectKind<A>,
    pub(crate) options: SendOptions,
}

struct UnitEntry {
    key: UnitKey,
    queue: Option<EffectQueue>,
    cancel: CancelFlag,
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Units currently registered.
    pub running: usize,
    /// Named effect IDs with at least one running unit, sorted.
    pub ids: Vec<String>,
    /// Per-queue counts, keyed by queue name.
    pub queues: BTreeMap<String, QueueStats>,
}

/// Counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub running: usize,
    pub pending: usize,
}

pub(crate) struct TaskRegistry<A> {
    units: HashMap<u64, UnitEntry>,
    by_id: HashMap<UnitKey, SmallVec<[u64; 2]>>,
    by_queue: HashMap<EffectQueue, VecDeque<u64>>,
    pending: HashMap<EffectQueue, VecDeque<Submission<A>>>,
    last_start: HashMap<EffectQueue, Instant>,
    next_serial: u64,
}

impl<A> TaskRegistry<A> {
    pub(crate) fn new() -> Self {
        Self {
            units: HashMap::new(),
            by_id: HashMap::new(),
            by_queue: HashMap::new(),
            pending: HashMap::new(),
            last_start: HashMap::new(),
            next_serial: 0,
        }
    }

    /// Number of registered units.
    pub(crate) fn len(&self) -> usize {
        self.units.len()
    }

    /// Running units on `queue`.
    pub(crate) fn running_count(&self, queue: &EffectQueue) -> usize {
        self.by_queue.get(queue).map_or(0, VecDeque::len)
    }

    /// Buffered units on `queue`.
    pub(crate) fn pending_count(&self, queue: &EffectQueue) -> usize {
        self.pending.get(queue).map_or(0, VecDeque::len)
    }

    /// Apply the queue policy of `submission`.
    ///
    /// Returns the submission if it may start now. Evicts the oldest running
    /// units of a `RunNewest` queue to make room; buffers or drops overflow of
    /// a `RunOldest` queue.
    pub(crate) fn check_queue_policy(&mut self, submission: Submission<A>) -> Option<Submission<A>> {
        let Some(queue) = submission.kind.queue().cloned() else {
            return Some(submission);
        };

        let running = self.running_count(&queue);
        match queue.policy().admit(running) {
            Admission::Admit { evict } => {
                if evict > 0 {
                    let evicted = self.evict_oldest(&queue, evict);
                    debug!(queue = %queue, evicted, "evicted oldest running effects");
                }
                Some(submission)
            }
            Admission::Suspend => {
                debug!(queue = %queue, running, "queue full, suspending effect");
                self.pending.entry(queue).or_default().push_back(submission);
                None
            }
            Admission::Discard => {
                debug!(queue = %queue, running, "queue full, discarding effect");
                None
            }
        }
    }

    /// Register a unit that is about to start. Returns its serial.
    pub(crate) fn register(
        &mut self,
        key: UnitKey,
        queue: Option<EffectQueue>,
        cancel: CancelFlag,
    ) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;

        self.by_id.entry(key.clone()).or_default().push(serial);
        if let Some(queue) = &queue {
            self.by_queue
                .entry(queue.clone())
                .or_default()
                .push_back(serial);
        }
        self.units.insert(serial, UnitEntry { key, queue, cancel });
        serial
    }

    /// Reserve the start time of the next unit on a delayed queue.
    ///
    /// Returns `None` when the unit may start immediately.
    pub(crate) fn reserve_start(&mut self, queue: &EffectQueue) -> Option<Instant> {
        let delay = queue.delay();
        if delay.is_none() {
            return None;
        }

        let now = Instant::now();
        let start = match self.last_start.get(queue) {
            Some(previous) => (*previous + delay.sample()).max(now),
            None => now,
        };
        self.last_start.insert(queue.clone(), start);

        (start > now).then_some(start)
    }

    /// Remove a finished unit from both indexes.
    ///
    /// Returns false if it was already removed by cancellation or eviction.
    pub(crate) fn finish(&mut self, serial: u64) -> bool {
        let Some(entry) = self.units.remove(&serial) else {
            return false;
        };
        self.detach(serial, &entry);
        true
    }

    /// Cancel and deregister every unit whose ID satisfies `predicate`.
    ///
    /// Returns the number of units cancelled.
    pub(crate) fn cancel_matching(&mut self, predicate: impl Fn(&EffectId) -> bool) -> usize {
        let keys: Vec<UnitKey> = self
            .by_id
            .keys()
            .filter(|key| matches!(key, UnitKey::Id(id) if predicate(id)))
            .cloned()
            .collect();

        let mut cancelled = 0;
        for key in keys {
            let Some(serials) = self.by_id.remove(&key) else {
                continue;
            };
            for serial in serials {
                if let Some(entry) = self.units.remove(&serial) {
                    if let Some(queue) = &entry.queue {
                        self.remove_from_queue(queue, serial);
                    }
                    entry.cancel.cancel();
                    cancelled += 1;
                }
            }
        }
        cancelled
    }

    /// Release the oldest pending submission of `queue` if a slot is free.
    ///
    /// Releases at most one entry per call.
    pub(crate) fn pop_pending(&mut self, queue: &EffectQueue) -> Option<Submission<A>> {
        if self.running_count(queue) >= queue.policy().max_count() {
            return None;
        }

        let buffer = self.pending.get_mut(queue)?;
        let submission = buffer.pop_front();
        if buffer.is_empty() {
            self.pending.remove(queue);
        }
        submission
    }

    /// Cancel everything and drop all pending submissions.
    pub(crate) fn cancel_all(&mut self) -> usize {
        let cancelled = self.units.len();
        for (_, entry) in self.units.drain() {
            entry.cancel.cancel();
        }
        self.by_id.clear();
        self.by_queue.clear();
        self.pending.clear();
        self.last_start.clear();
        cancelled
    }

    pub(crate) fn stats(&self) -> RegistryStats {
        let mut ids: Vec<String> = self
            .by_id
            .keys()
            .filter_map(|key| match key {
                UnitKey::Id(id) => Some(id.to_string()),
                UnitKey::Private(_) => None,
            })
            .collect();
        ids.sort();

        let mut queues: BTreeMap<String, QueueStats> = BTreeMap::new();
        for (queue, running) in &self.by_queue {
            queues.entry(queue.name().to_string()).or_default().running = running.len();
        }
        for (queue, pending) in &self.pending {
            queues.entry(queue.name().to_string()).or_default().pending = pending.len();
        }

        RegistryStats {
            running: self.units.len(),
            ids,
            queues,
        }
    }

    fn evict_oldest(&mut self, queue: &EffectQueue, count: usize) -> usize {
        let mut evicted = 0;
        while evicted < count {
            let Some(serial) = self.by_queue.get_mut(queue).and_then(VecDeque::pop_front) else {
                break;
            };
            if let Some(entry) = self.units.remove(&serial) {
                self.remove_from_id(&entry.key, serial);
                entry.cancel.cancel();
            }
            evicted += 1;
        }
        if self.by_queue.get(queue).is_some_and(VecDeque::is_empty) {
            self.by_queue.remove(queue);
        }
        evicted
    }

    fn detach(&mut self, serial: u64, entry: &UnitEntry) {
        self.remove_from_id(&entry.key, serial);
        if let Some(queue) = &entry.queue {
            self.remove_from_queue(queue, serial);
        }
    }

    fn remove_from_id(&mut self, key: &UnitKey, serial: u64) {
        if let Some(bucket) = self.by_id.get_mut(key) {
            bucket.retain(|s| *s != serial);
            if bucket.is_empty() {
                self.by_id.remove(key);
            }
        }
    }

    fn remove_from_queue(&mut self, queue: &EffectQueue, serial: u64) {
        if let Some(running) = self.by_queue.get_mut(queue) {
            if let Some(index) = running.iter().position(|s| *s == serial) {
                running.remove(index);
            }
            if running.is_empty() {
                self.by_queue.remove(queue);
            }
        }
    }
}
