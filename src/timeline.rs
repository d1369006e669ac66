//! Virtual-time timer queue with cancellable handles.
//!
//! The timeline never runs anything on its own. Entries become due as the
//! owner advances the clock and pulls them out with [`Timeline::pop_due`],
//! which keeps every callback on the caller's thread and makes cancellation
//! synchronous: once an entry is cancelled it can no longer be popped, even
//! if its due time has already passed.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use slotmap::{new_key_type, SlotMap};
use thiserror::Error;

new_key_type! {
    struct EntryKey;
}

static NEXT_TIMELINE: AtomicU64 = AtomicU64::new(1);

/// Handle to a scheduled timeline entry.
///
/// A handle only refers to an entry on the timeline that issued it; other
/// timelines treat it as unknown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId {
    timeline: u64,
    key: EntryKey,
}

/// Error type for scheduling operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Delays are durations from a trigger and cannot point into the past
    #[error("negative delay: {0}ms")]
    NegativeDelay(i64),
}

/// A non-negative delay in milliseconds.
///
/// Negative values are rejected at construction, so scheduling itself
/// cannot fail.
///
/// ```rust
/// use parallel_anim_core::{Delay, ScheduleError};
///
/// assert_eq!(Delay::try_from(700i64).unwrap().as_millis(), 700);
/// assert_eq!(Delay::try_from(-1i64), Err(ScheduleError::NegativeDelay(-1)));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "i64", into = "i64")
)]
pub struct Delay(u64);

impl Delay {
    /// Zero delay: still deferred to the next pull from the timeline.
    pub const ZERO: Delay = Delay(0);

    /// Create a delay from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Delay(ms)
    }

    /// Get the delay in milliseconds.
    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

impl TryFrom<i64> for Delay {
    type Error = ScheduleError;

    fn try_from(ms: i64) -> Result<Self, Self::Error> {
        u64::try_from(ms)
            .map(Delay)
            .map_err(|_| ScheduleError::NegativeDelay(ms))
    }
}

impl From<Delay> for i64 {
    fn from(delay: Delay) -> Self {
        i64::try_from(delay.0).unwrap_or(i64::MAX)
    }
}

#[derive(Debug)]
struct Entry<T> {
    due: u64,
    payload: T,
}

/// An entry that came due and was removed from the timeline.
#[derive(Debug)]
pub struct Fired<T> {
    /// Handle the entry was scheduled under (no longer pending)
    pub id: TimerId,
    /// Absolute time the entry was due at
    pub due: u64,
    /// The scheduled payload
    pub payload: T,
}

/// Single-threaded timer queue over a virtual millisecond clock.
///
/// Entries are ordered by due time; entries due at the same time come out
/// in the order they were scheduled.
///
/// ## Example
///
/// ```rust
/// use parallel_anim_core::{Delay, Timeline};
///
/// let mut timeline = Timeline::new();
/// let a = timeline.schedule(Delay::from_millis(10), "a");
/// timeline.schedule(Delay::from_millis(5), "b");
///
/// timeline.cancel(a);
///
/// let fired = timeline.pop_due(100).unwrap();
/// assert_eq!(fired.payload, "b");
/// assert_eq!(timeline.now(), 5);
/// assert!(timeline.pop_due(100).is_none());
/// ```
#[derive(Debug)]
pub struct Timeline<T> {
    /// Tag stamped into every handle this timeline issues
    tag: u64,
    now: u64,
    next_seq: u64,
    entries: SlotMap<EntryKey, Entry<T>>,
    /// (due, seq, key); stale keys of cancelled entries are skipped lazily
    queue: BinaryHeap<Reverse<(u64, u64, EntryKey)>>,
}

impl<T> Default for Timeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Timeline<T> {
    /// Create an empty timeline with the clock at zero.
    pub fn new() -> Self {
        Self {
            tag: NEXT_TIMELINE.fetch_add(1, Ordering::Relaxed),
            now: 0,
            next_seq: 0,
            entries: SlotMap::with_key(),
            queue: BinaryHeap::new(),
        }
    }

    /// Current virtual time in milliseconds.
    #[inline]
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Schedule `payload` to come due `delay` after the current time.
    ///
    /// Nothing runs during this call, even for [`Delay::ZERO`].
    pub fn schedule(&mut self, delay: Delay, payload: T) -> TimerId {
        let due = self.now.saturating_add(delay.as_millis());
        let key = self.entries.insert(Entry { due, payload });
        self.queue.push(Reverse((due, self.next_seq, key)));
        self.next_seq += 1;
        TimerId { timeline: self.tag, key }
    }

    fn own_key(&self, id: TimerId) -> Option<EntryKey> {
        (id.timeline == self.tag).then_some(id.key)
    }

    /// Cancel a pending entry.
    ///
    /// Returns `true` if the entry was pending. Unknown, fired and already
    /// cancelled handles are ignored, as are handles from other timelines.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.own_key(id) {
            Some(key) => self.entries.remove(key).is_some(),
            None => false,
        }
    }

    /// Cancel a batch of entries, returning how many were still pending.
    pub fn cancel_all<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = TimerId>,
    {
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Drop every pending entry. The clock is left untouched.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.queue.clear();
    }

    /// Check whether a handle is still pending.
    #[inline]
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.own_key(id).is_some_and(|key| self.entries.contains_key(key))
    }

    /// Number of pending entries.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    /// Check whether nothing is pending.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.entries.is_empty()
    }

    /// Due time of the earliest pending entry.
    pub fn next_due(&mut self) -> Option<u64> {
        self.prune();
        self.queue.peek().map(|Reverse((due, _, _))| *due)
    }

    /// Remove and return the earliest entry due at or before `until`.
    ///
    /// The clock moves forward to the entry's due time.
    pub fn pop_due(&mut self, until: u64) -> Option<Fired<T>> {
        self.prune();
        let Reverse((due, _, key)) = *self.queue.peek()?;
        if due > until {
            return None;
        }
        self.queue.pop();
        let entry = self.entries.remove(key)?;
        self.now = self.now.max(entry.due);
        Some(Fired {
            id: TimerId { timeline: self.tag, key },
            due: entry.due,
            payload: entry.payload,
        })
    }

    /// Move the clock forward without firing anything.
    ///
    /// The clock never moves backwards.
    pub fn advance_clock(&mut self, to: u64) {
        self.now = self.now.max(to);
    }

    fn prune(&mut self) {
        while let Some(Reverse((_, _, key))) = self.queue.peek() {
            if self.entries.contains_key(*key) {
                break;
            }
            self.queue.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Delay {
        Delay::from_millis(n)
    }

    #[test]
    fn test_fires_in_due_order() {
        let mut timeline = Timeline::new();
        timeline.schedule(ms(30), 3);
        timeline.schedule(ms(10), 1);
        timeline.schedule(ms(20), 2);

        let mut order = Vec::new();
        while let Some(fired) = timeline.pop_due(u64::MAX) {
            order.push((fired.due, fired.payload));
        }
        assert_eq!(order, vec![(10, 1), (20, 2), (30, 3)]);
        assert_eq!(timeline.now(), 30);
    }

    #[test]
    fn test_ties_keep_schedule_order() {
        let mut timeline = Timeline::new();
        for i in 0..5 {
            timeline.schedule(ms(100), i);
        }
        let order: Vec<_> = std::iter::from_fn(|| timeline.pop_due(100))
            .map(|f| f.payload)
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_delay_is_deferred() {
        let mut timeline = Timeline::new();
        let id = timeline.schedule(Delay::ZERO, "now");
        // Nothing ran synchronously; the entry waits for a pull.
        assert!(timeline.is_pending(id));
        assert_eq!(timeline.pop_due(0).map(|f| f.payload), Some("now"));
    }

    #[test]
    fn test_not_due_yet() {
        let mut timeline = Timeline::new();
        timeline.schedule(ms(50), ());
        assert!(timeline.pop_due(49).is_none());
        assert_eq!(timeline.now(), 0);
        assert!(timeline.pop_due(50).is_some());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut timeline = Timeline::new();
        let id = timeline.schedule(ms(5), ());
        assert!(timeline.cancel(id));
        assert!(!timeline.cancel(id));
        assert!(timeline.pop_due(u64::MAX).is_none());
    }

    #[test]
    fn test_cancel_after_fire_is_noop() {
        let mut timeline = Timeline::new();
        let id = timeline.schedule(ms(5), ());
        assert!(timeline.pop_due(5).is_some());
        assert!(!timeline.cancel(id));
    }

    #[test]
    fn test_cancel_all_beats_elapsed_entries() {
        let mut timeline = Timeline::new();
        let ids: Vec<_> = (0..4).map(|i| timeline.schedule(ms(i), i)).collect();
        // Everything is already due.
        timeline.advance_clock(1_000);

        assert_eq!(timeline.cancel_all(ids.iter().copied()), 4);
        assert!(timeline.pop_due(u64::MAX).is_none());
        assert!(timeline.is_idle());
        assert_eq!(timeline.cancel_all(ids), 0);
    }

    #[test]
    fn test_schedule_relative_to_clock() {
        let mut timeline = Timeline::new();
        timeline.advance_clock(1_000);
        timeline.schedule(ms(500), ());
        assert_eq!(timeline.next_due(), Some(1_500));
    }

    #[test]
    fn test_next_due_skips_cancelled() {
        let mut timeline = Timeline::new();
        let first = timeline.schedule(ms(1), ());
        timeline.schedule(ms(2), ());
        timeline.cancel(first);
        assert_eq!(timeline.next_due(), Some(2));
        assert_eq!(timeline.pending_count(), 1);
    }

    #[test]
    fn test_clock_never_rewinds() {
        let mut timeline: Timeline<()> = Timeline::new();
        timeline.advance_clock(10);
        timeline.advance_clock(3);
        assert_eq!(timeline.now(), 10);
    }

    #[test]
    fn test_negative_delay_rejected() {
        assert_eq!(Delay::try_from(-5i64), Err(ScheduleError::NegativeDelay(-5)));
        assert_eq!(Delay::try_from(0i64), Ok(Delay::ZERO));
        assert_eq!(Delay::try_from(700i64), Ok(ms(700)));
    }

    #[test]
    fn test_handle_from_other_timeline_is_unknown() {
        let mut a = Timeline::new();
        let mut b = Timeline::new();
        let from_a = a.schedule(ms(5), "a");
        let from_b = b.schedule(ms(5), "b");

        assert!(!b.is_pending(from_a));
        assert!(!b.cancel(from_a));
        assert_eq!(b.pending_count(), 1);
        assert!(b.is_pending(from_b));
        assert_eq!(b.pop_due(5).map(|f| f.payload), Some("b"));
        assert!(a.is_pending(from_a));
    }
}
