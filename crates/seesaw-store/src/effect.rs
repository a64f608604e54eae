//! Effect descriptions returned by reducers.
//!
//! An [`Effect`] is an inert value. Nothing runs until the store schedules it.
//! Each effect is an ordered list of [`EffectKind`]s:
//!
//! - `Single` - one future producing at most one follow-up action
//! - `Sequence` - a stream producing follow-up actions over time
//! - `Cancel` - a request to cancel running units whose [`EffectId`] matches
//!
//! # Example
//!
//! ```ignore
//! use seesaw_store::{Effect, EffectQueue};
//! use std::time::Duration;
//!
//! let search = EffectQueue::newest("search", 1);
//!
//! let effect = Effect::single(async move {
//!     tokio::time::sleep(Duration::from_millis(300)).await;
//!     Some(Action::Search(query))
//! })
//! .with_id("search")
//! .with_queue(search);
//! ```

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::ops::Add;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use smallvec::SmallVec;

use crate::queue::EffectQueue;

/// Future backing a `Single` effect.
pub type SingleOperation<A> = BoxFuture<'static, anyhow::Result<Option<A>>>;

/// Stream backing a `Sequence` effect.
pub type ActionStream<A> = BoxStream<'static, anyhow::Result<A>>;

/// Predicate selecting which effect IDs a `Cancel` effect targets.
pub type CancelPredicate = Box<dyn Fn(&EffectId) -> bool + Send>;

/// Identity used to target running effects for cancellation.
///
/// Cheap to clone. Effects without an ID still get tracked, but under a
/// private key no cancel predicate can see.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(Arc<str>);

impl EffectId {
    /// Create a new effect ID.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// The ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EffectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EffectId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EffectId({})", self.0)
    }
}

/// One unit of an effect description.
pub enum EffectKind<A> {
    /// One asynchronous operation producing at most one follow-up action.
    Single {
        operation: SingleOperation<A>,
        id: Option<EffectId>,
        queue: Option<EffectQueue>,
    },
    /// A single-pass stream producing follow-up actions as they arrive.
    Sequence {
        stream: ActionStream<A>,
        id: Option<EffectId>,
        queue: Option<EffectQueue>,
    },
    /// Cancel every running unit whose ID satisfies the predicate.
    Cancel(CancelPredicate),
}

impl<A> EffectKind<A> {
    /// The effect ID, if this kind carries one.
    pub fn id(&self) -> Option<&EffectId> {
        match self {
            EffectKind::Single { id, .. } | EffectKind::Sequence { id, .. } => id.as_ref(),
            EffectKind::Cancel(_) => None,
        }
    }

    /// The queue this kind is scheduled on, if any.
    pub fn queue(&self) -> Option<&EffectQueue> {
        match self {
            EffectKind::Single { queue, .. } | EffectKind::Sequence { queue, .. } => {
                queue.as_ref()
            }
            EffectKind::Cancel(_) => None,
        }
    }

    /// Returns true for `Cancel` kinds.
    pub fn is_cancel(&self) -> bool {
        matches!(self, EffectKind::Cancel(_))
    }

    /// Returns true if `predicate` would select `id`. Always false for
    /// executable kinds.
    pub fn cancels(&self, id: &EffectId) -> bool {
        match self {
            EffectKind::Cancel(predicate) => predicate(id),
            _ => false,
        }
    }

    fn set_id(&mut self, new_id: &EffectId) {
        match self {
            EffectKind::Single { id, .. } | EffectKind::Sequence { id, .. } => {
                *id = Some(new_id.clone());
            }
            EffectKind::Cancel(_) => {}
        }
    }

    fn set_queue(&mut self, new_queue: &EffectQueue) {
        match self {
            EffectKind::Single { queue, .. } | EffectKind::Sequence { queue, .. } => {
                *queue = Some(new_queue.clone());
            }
            EffectKind::Cancel(_) => {}
        }
    }
}

impl<A> fmt::Debug for EffectKind<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectKind::Single { id, queue, .. } => f
                .debug_struct("EffectKind::Single")
                .field("id", id)
                .field("queue", queue)
                .finish_non_exhaustive(),
            EffectKind::Sequence { id, queue, .. } => f
                .debug_struct("EffectKind::Sequence")
                .field("id", id)
                .field("queue", queue)
                .finish_non_exhaustive(),
            EffectKind::Cancel(_) => write!(f, "EffectKind::Cancel(<predicate>)"),
        }
    }
}

/// Description of the asynchronous work produced by one reducer step.
///
/// Effects combine with [`Effect::merge`] (or `+`); [`Effect::none`] is the
/// identity. Kinds run in the order they were combined.
pub struct Effect<A> {
    kinds: SmallVec<[EffectKind<A>; 1]>,
}

impl<A> Effect<A> {
    /// No effect.
    pub fn none() -> Self {
        Self {
            kinds: SmallVec::new(),
        }
    }

    /// Cancel every running unit whose ID satisfies `predicate`.
    pub fn cancel<P>(predicate: P) -> Self
    where
        P: Fn(&EffectId) -> bool + Send + 'static,
    {
        Self::from_kind(EffectKind::Cancel(Box::new(predicate)))
    }

    /// Cancel every running unit registered under `id`.
    pub fn cancel_id(id: impl Into<EffectId>) -> Self {
        let id = id.into();
        Self::cancel(move |candidate| *candidate == id)
    }

    /// Cancel every running unit registered under any of `ids`.
    pub fn cancel_ids<I>(ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<EffectId>,
    {
        let ids: HashSet<EffectId> = ids.into_iter().map(Into::into).collect();
        Self::cancel(move |candidate| ids.contains(candidate))
    }

    /// Wrap a single effect kind.
    pub fn from_kind(kind: EffectKind<A>) -> Self {
        let mut kinds = SmallVec::new();
        kinds.push(kind);
        Self { kinds }
    }

    /// Tag every executable kind with `id`.
    pub fn with_id(mut self, id: impl Into<EffectId>) -> Self {
        let id = id.into();
        for kind in &mut self.kinds {
            kind.set_id(&id);
        }
        self
    }

    /// Schedule every executable kind on `queue`.
    pub fn with_queue(mut self, queue: EffectQueue) -> Self {
        for kind in &mut self.kinds {
            kind.set_queue(&queue);
        }
        self
    }

    /// Append `other`'s kinds after this effect's kinds.
    pub fn merge(mut self, other: Effect<A>) -> Self {
        self.kinds.extend(other.kinds);
        self
    }

    /// Number of kinds in this description.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Returns true if this is the empty effect.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Inspect the kinds in scheduling order.
    pub fn kinds(&self) -> impl Iterator<Item = &EffectKind<A>> {
        self.kinds.iter()
    }

    /// Consume the description, yielding its kinds in scheduling order.
    pub fn into_kinds(self) -> impl Iterator<Item = EffectKind<A>> {
        self.kinds.into_iter()
    }
}

impl<A: Send + 'static> Effect<A> {
    /// Run `future` and feed its output back as an action, if any.
    pub fn single<F>(future: F) -> Self
    where
        F: Future<Output = Option<A>> + Send + 'static,
    {
        Self::try_single(async move { Ok(future.await) })
    }

    /// Like [`Effect::single`], but the operation may fail.
    ///
    /// The error surfaces on the handle returned by `send`.
    pub fn try_single<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<Option<A>>> + Send + 'static,
    {
        Self::from_kind(EffectKind::Single {
            operation: Box::pin(future),
            id: None,
            queue: None,
        })
    }

    /// Feed `action` straight back into the store.
    pub fn action(action: A) -> Self {
        Self::single(async move { Some(action) })
    }

    /// Run `future` for its side effect only.
    pub fn fire_and_forget<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::single(async move {
            future.await;
            None
        })
    }

    /// Feed back every action the stream yields, in order.
    pub fn sequence<St>(stream: St) -> Self
    where
        St: Stream<Item = A> + Send + 'static,
    {
        Self::try_sequence(stream.map(Ok))
    }

    /// Like [`Effect::sequence`], but the stream may fail.
    ///
    /// A stream error ends that unit quietly: it is logged and never
    /// reaches the handle returned by `send`.
    pub fn try_sequence<St>(stream: St) -> Self
    where
        St: Stream<Item = anyhow::Result<A>> + Send + 'static,
    {
        Self::from_kind(EffectKind::Sequence {
            stream: stream.boxed(),
            id: None,
            queue: None,
        })
    }

    /// Transform the action type of this effect.
    ///
    /// Used to embed a child feature's effects in a parent action enum.
    /// IDs, queues and cancel predicates are kept as they are.
    pub fn map<B, F>(self, f: F) -> Effect<B>
    where
        F: Fn(A) -> B + Clone + Send + Sync + 'static,
        B: Send + 'static,
    {
        let kinds = self
            .kinds
            .into_iter()
            .map(|kind| match kind {
                EffectKind::Single {
                    operation,
                    id,
                    queue,
                } => {
                    let f = f.clone();
                    EffectKind::Single {
                        operation: Box::pin(async move { operation.await.map(|a| a.map(f)) }),
                        id,
                        queue,
                    }
                }
                EffectKind::Sequence { stream, id, queue } => {
                    let f = f.clone();
                    EffectKind::Sequence {
                        stream: stream.map(move |item| item.map(&f)).boxed(),
                        id,
                        queue,
                    }
                }
                EffectKind::Cancel(predicate) => EffectKind::Cancel(predicate),
            })
            .collect();
        Effect { kinds }
    }
}

impl<A> Default for Effect<A> {
    fn default() -> Self {
        Self::none()
    }
}

impl<A> Add for Effect<A> {
    type Output = Effect<A>;

    fn add(self, rhs: Effect<A>) -> Effect<A> {
        self.merge(rhs)
    }
}

impl<A> FromIterator<Effect<A>> for Effect<A> {
    fn from_iter<I: IntoIterator<Item = Effect<A>>>(iter: I) -> Self {
        let mut effect = Effect::none();
        effect.extend(iter);
        effect
    }
}

impl<A> Extend<Effect<A>> for Effect<A> {
    fn extend<I: IntoIterator<Item = Effect<A>>>(&mut self, iter: I) {
        for effect in iter {
            self.kinds.extend(effect.kinds);
        }
    }
}

impl<A> fmt::Debug for Effect<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds.iter()).finish()
    }
}
