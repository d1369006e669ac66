//! Declarative step sequences and the interpreter that runs them.
//!
//! A [`Sequence`] is plain data: an ordered list of tagged [`Step`]s, some of
//! which hold child sequences (fan-out branches, repeat bodies). A
//! [`SequenceRun`] walks that tree with cursors, scheduling one timeline entry
//! per eligible step and applying each step's actions to the state store when
//! the entry fires.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use thiserror::Error;

use crate::state::{AnimationState, FlagValue, StateError, StateSchema, StateStore, Update};
use crate::timeline::{Delay, Fired, Timeline, TimerId};

/// Error type for sequence validation and firing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    /// An action refers to the repeat counter outside any repeat body
    #[error("action on `{0}` uses the repeat counter outside a repeat body")]
    CounterOutOfScope(String),
    /// A `wait_for` step names a label no step carries
    #[error("wait_for references unknown label `{0}`")]
    UnknownLabel(String),
    /// An action does not fit the state schema
    #[error(transparent)]
    State(#[from] StateError),
}

/// Index operand of an action: literal, or the enclosing repeat counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum IndexRef {
    At(usize),
    Counter,
}

impl IndexRef {
    fn resolve(self, counter: Option<usize>) -> Option<usize> {
        match self {
            IndexRef::At(index) => Some(index),
            IndexRef::Counter => counter,
        }
    }

    /// Largest index this operand can take under a repeat of `bound`.
    fn max_under(self, bound: Option<usize>) -> Option<usize> {
        match self {
            IndexRef::At(index) => Some(index),
            IndexRef::Counter => bound.map(|b| b.saturating_sub(1)),
        }
    }
}

/// One flag mutation, computed from the previous state when its step fires.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum Action {
    SetBool {
        flag: String,
        value: bool,
    },
    /// `None` clears the index back to the sentinel
    SetIndex {
        flag: String,
        #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
        value: Option<IndexRef>,
    },
    SetListEntry {
        flag: String,
        index: IndexRef,
        value: bool,
    },
    /// Flip a boolean flag
    Toggle {
        flag: String,
    },
}

impl Action {
    /// Set a boolean flag to `true`.
    pub fn show(flag: &str) -> Self {
        Action::SetBool { flag: flag.to_string(), value: true }
    }

    /// Set a boolean flag to `false`.
    pub fn hide(flag: &str) -> Self {
        Action::SetBool { flag: flag.to_string(), value: false }
    }

    /// Point an index flag at `index`.
    pub fn set_index(flag: &str, index: IndexRef) -> Self {
        Action::SetIndex { flag: flag.to_string(), value: Some(index) }
    }

    /// Reset an index flag to the sentinel.
    pub fn clear_index(flag: &str) -> Self {
        Action::SetIndex { flag: flag.to_string(), value: None }
    }

    /// Set one entry of a list flag.
    pub fn set_entry(flag: &str, index: IndexRef, value: bool) -> Self {
        Action::SetListEntry { flag: flag.to_string(), index, value }
    }

    /// Flip a boolean flag.
    pub fn toggle(flag: &str) -> Self {
        Action::Toggle { flag: flag.to_string() }
    }

    /// Name of the flag this action writes.
    pub fn flag(&self) -> &str {
        match self {
            Action::SetBool { flag, .. }
            | Action::SetIndex { flag, .. }
            | Action::SetListEntry { flag, .. }
            | Action::Toggle { flag } => flag,
        }
    }

    fn uses_counter(&self) -> bool {
        matches!(
            self,
            Action::SetIndex { value: Some(IndexRef::Counter), .. }
                | Action::SetListEntry { index: IndexRef::Counter, .. }
        )
    }

    /// Compute the update for this action against the previous state.
    pub fn resolve(&self, counter: Option<usize>, prev: &AnimationState) -> Result<Update, SequenceError> {
        let flag = self.flag().to_string();
        let out_of_scope = || SequenceError::CounterOutOfScope(self.flag().to_string());
        Ok(match self {
            Action::SetBool { value, .. } => Update::Bool { flag, value: *value },
            Action::SetIndex { value, .. } => {
                let value = match value {
                    Some(index) => Some(index.resolve(counter).ok_or_else(out_of_scope)?),
                    None => None,
                };
                Update::Index { flag, value }
            }
            Action::SetListEntry { index, value, .. } => Update::ListEntry {
                index: index.resolve(counter).ok_or_else(out_of_scope)?,
                flag,
                value: *value,
            },
            Action::Toggle { .. } => {
                let current = match prev.get(&flag) {
                    Some(FlagValue::Bool(current)) => *current,
                    Some(other) => {
                        return Err(StateError::ShapeMismatch {
                            flag,
                            expected: other.shape(),
                            found: "bool",
                        }
                        .into())
                    }
                    None => return Err(StateError::UnknownFlag(flag).into()),
                };
                Update::Bool { flag, value: !current }
            }
        })
    }
}

/// One scheduled unit of a sequence.
///
/// Every step waits `delay` after the previous step of its chain fired (or
/// after the chain started).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum Step {
    /// Apply actions as one state transition
    Set {
        delay: Delay,
        #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
        label: Option<String>,
        actions: Vec<Action>,
    },
    /// Start every branch from this step's firing time; the chain continues too
    Fork {
        delay: Delay,
        branches: Vec<Rc<Sequence>>,
    },
    /// Run `body` with the counter at 0, 1, .. `bound - 1`, then run `then`
    Repeat {
        delay: Delay,
        bound: usize,
        body: Rc<Sequence>,
        #[cfg_attr(feature = "serde", serde(default))]
        then: Rc<Sequence>,
    },
    /// Hold the chain until the step labelled `label` has fired
    WaitFor {
        label: String,
        delay: Delay,
    },
}

impl Step {
    /// Delay from the step's trigger to its firing.
    pub fn delay(&self) -> Delay {
        match self {
            Step::Set { delay, .. }
            | Step::Fork { delay, .. }
            | Step::Repeat { delay, .. }
            | Step::WaitFor { delay, .. } => *delay,
        }
    }

    /// Short name of the step kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Set { .. } => "set",
            Step::Fork { .. } => "fork",
            Step::Repeat { .. } => "repeat",
            Step::WaitFor { .. } => "wait_for",
        }
    }
}

/// An ordered chain of steps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sequence {
    #[cfg_attr(feature = "serde", serde(default))]
    steps: Vec<Step>,
}

impl Sequence {
    /// Start building a sequence.
    pub fn builder() -> SequenceBuilder {
        SequenceBuilder::default()
    }

    /// Wrap an existing list of steps.
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Steps in chain order.
    #[inline]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of top-level steps.
    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check whether the chain has no steps.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check every action against `schema` and every wait against the
    /// declared labels.
    ///
    /// Counter-indexed list entries are checked against the highest counter
    /// value their repeat can produce.
    pub fn validate(&self, schema: &StateSchema) -> Result<(), SequenceError> {
        let mut labels = HashSet::new();
        let mut waits = Vec::new();
        self.walk(schema, None, &mut labels, &mut waits)?;
        match waits.into_iter().find(|label| !labels.contains(label)) {
            Some(label) => Err(SequenceError::UnknownLabel(label)),
            None => Ok(()),
        }
    }

    fn walk(
        &self,
        schema: &StateSchema,
        bound: Option<usize>,
        labels: &mut HashSet<String>,
        waits: &mut Vec<String>,
    ) -> Result<(), SequenceError> {
        for step in &self.steps {
            match step {
                Step::Set { label, actions, .. } => {
                    if let Some(label) = label {
                        labels.insert(label.clone());
                    }
                    for action in actions {
                        check_action(action, schema, bound)?;
                    }
                }
                Step::Fork { branches, .. } => {
                    for branch in branches {
                        branch.walk(schema, bound, labels, waits)?;
                    }
                }
                Step::Repeat { bound: n, body, then, .. } => {
                    body.walk(schema, Some(*n), labels, waits)?;
                    then.walk(schema, bound, labels, waits)?;
                }
                Step::WaitFor { label, .. } => waits.push(label.clone()),
            }
        }
        Ok(())
    }
}

fn check_action(action: &Action, schema: &StateSchema, bound: Option<usize>) -> Result<(), SequenceError> {
    let flag = action.flag().to_string();
    if action.uses_counter() && bound.is_none() {
        return Err(SequenceError::CounterOutOfScope(flag));
    }
    // A repeat of zero iterations never evaluates its body.
    if bound == Some(0) && action.uses_counter() {
        return Ok(());
    }
    let probe = match action {
        Action::SetBool { value, .. } => Update::Bool { flag, value: *value },
        Action::Toggle { .. } => Update::Bool { flag, value: true },
        Action::SetIndex { value, .. } => Update::Index {
            flag,
            value: value.and_then(|v| v.max_under(bound)),
        },
        Action::SetListEntry { index, value, .. } => Update::ListEntry {
            flag,
            index: index.max_under(bound).unwrap_or(0),
            value: *value,
        },
    };
    schema.check(std::slice::from_ref(&probe))?;
    Ok(())
}

/// Fluent construction of a [`Sequence`].
///
/// ```rust
/// use parallel_anim_core::{Action, IndexRef, Sequence};
///
/// let unit = Sequence::builder()
///     .set(1000, Action::set_entry("expand", IndexRef::Counter, true))
///     .build();
/// let seq = Sequence::builder()
///     .set(2000, Action::show("is_split"))
///     .repeat(0, 3, unit, Sequence::default())
///     .build();
/// assert_eq!(seq.len(), 2);
/// ```
#[derive(Clone, Debug, Default)]
pub struct SequenceBuilder {
    steps: Vec<Step>,
}

impl SequenceBuilder {
    /// Append a step applying one action.
    pub fn set(self, delay_ms: u64, action: Action) -> Self {
        self.set_all(delay_ms, [action])
    }

    /// Append a step applying several actions as one transition.
    pub fn set_all<I>(mut self, delay_ms: u64, actions: I) -> Self
    where
        I: IntoIterator<Item = Action>,
    {
        self.steps.push(Step::Set {
            delay: Delay::from_millis(delay_ms),
            label: None,
            actions: actions.into_iter().collect(),
        });
        self
    }

    /// Append a labelled step that `wait_for` steps can depend on.
    pub fn set_labeled<I>(mut self, label: &str, delay_ms: u64, actions: I) -> Self
    where
        I: IntoIterator<Item = Action>,
    {
        self.steps.push(Step::Set {
            delay: Delay::from_millis(delay_ms),
            label: Some(label.to_string()),
            actions: actions.into_iter().collect(),
        });
        self
    }

    /// Append a fan-out into independent branches.
    pub fn fork<I>(mut self, delay_ms: u64, branches: I) -> Self
    where
        I: IntoIterator<Item = Sequence>,
    {
        self.steps.push(Step::Fork {
            delay: Delay::from_millis(delay_ms),
            branches: branches.into_iter().map(Rc::new).collect(),
        });
        self
    }

    /// Append a counted repeat of `body`, followed by `then`.
    pub fn repeat(mut self, delay_ms: u64, bound: usize, body: Sequence, then: Sequence) -> Self {
        self.steps.push(Step::Repeat {
            delay: Delay::from_millis(delay_ms),
            bound,
            body: Rc::new(body),
            then: Rc::new(then),
        });
        self
    }

    /// Append a dependency on a labelled step.
    pub fn wait_for(mut self, label: &str, delay_ms: u64) -> Self {
        self.steps.push(Step::WaitFor {
            label: label.to_string(),
            delay: Delay::from_millis(delay_ms),
        });
        self
    }

    /// Append an already-built step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Finish the sequence.
    pub fn build(self) -> Sequence {
        Sequence { steps: self.steps }
    }
}

#[derive(Clone, Debug)]
struct RepeatFrame {
    index: usize,
    bound: usize,
    then: Rc<Sequence>,
}

#[derive(Clone, Debug)]
struct Frame {
    seq: Rc<Sequence>,
    pos: usize,
    counter: Option<usize>,
    repeat: Option<RepeatFrame>,
}

/// Position of one chain inside a sequence tree.
///
/// Cursors are the timeline payload of a [`SequenceRun`]; each pending entry
/// points at the step it will fire.
#[derive(Clone, Debug)]
pub struct Cursor {
    frames: Vec<Frame>,
}

impl Cursor {
    fn start(seq: Rc<Sequence>, counter: Option<usize>) -> Self {
        Self {
            frames: vec![Frame { seq, pos: 0, counter, repeat: None }],
        }
    }

    /// Repeat counter visible to the current step.
    pub fn counter(&self) -> Option<usize> {
        self.frames.last().and_then(|f| f.counter)
    }

    /// The step this cursor points at.
    pub fn current(&self) -> Option<&Step> {
        let frame = self.frames.last()?;
        frame.seq.steps.get(frame.pos)
    }

    fn enter_repeat(&mut self, bound: usize, body: &Rc<Sequence>, then: &Rc<Sequence>) {
        let outer = self.counter();
        if bound == 0 {
            self.frames.push(Frame { seq: Rc::clone(then), pos: 0, counter: outer, repeat: None });
        } else {
            self.frames.push(Frame {
                seq: Rc::clone(body),
                pos: 0,
                counter: Some(0),
                repeat: Some(RepeatFrame { index: 0, bound, then: Rc::clone(then) }),
            });
        }
    }

    /// Unwind finished frames until the cursor points at a step.
    ///
    /// Returns `None` once the chain has nothing left to run.
    fn settle(mut self) -> Option<Self> {
        loop {
            let top = self.frames.last()?;
            if top.pos < top.seq.steps.len() {
                return Some(self);
            }
            let done = self.frames.pop()?;
            if let Some(repeat) = done.repeat {
                let next = repeat.index + 1;
                if next < repeat.bound {
                    self.frames.push(Frame {
                        seq: done.seq,
                        pos: 0,
                        counter: Some(next),
                        repeat: Some(RepeatFrame { index: next, ..repeat }),
                    });
                } else {
                    let outer = self.counter();
                    self.frames.push(Frame { seq: repeat.then, pos: 0, counter: outer, repeat: None });
                }
            }
        }
    }
}

/// One live pass over a sequence.
///
/// The run tracks the handles it scheduled so it can cancel exactly its own
/// entries; steps blocked on a label are parked here rather than on the
/// timeline.
#[derive(Debug, Default)]
pub struct SequenceRun {
    pending: HashSet<TimerId>,
    parked: HashMap<String, Vec<Cursor>>,
    fired_labels: HashSet<String>,
    fired: usize,
}

impl SequenceRun {
    /// Schedule the first step of `sequence` relative to the timeline clock.
    pub fn start(sequence: Rc<Sequence>, timeline: &mut Timeline<Cursor>) -> Self {
        let mut run = Self::default();
        run.advance(Cursor::start(sequence, None), timeline);
        tracing::debug!(at = timeline.now(), pending = run.pending.len(), "sequence run started");
        run
    }

    /// Apply a fired entry and schedule whatever became eligible.
    ///
    /// Entries that do not belong to this run are ignored. Sequences that
    /// passed [`Sequence::validate`] against the store's schema never fail
    /// here; otherwise a step whose actions do not fit the store returns the
    /// error without changing state, and its chain carries on.
    pub fn fire(
        &mut self,
        fired: Fired<Cursor>,
        timeline: &mut Timeline<Cursor>,
        store: &mut StateStore,
    ) -> Result<(), SequenceError> {
        if !self.pending.remove(&fired.id) {
            return Ok(());
        }
        let mut cursor = fired.payload;
        let counter = cursor.counter();
        let Some(frame) = cursor.frames.last_mut() else {
            return Ok(());
        };
        let seq = Rc::clone(&frame.seq);
        let pos = frame.pos;
        frame.pos += 1;
        let Some(step) = seq.steps.get(pos) else {
            return Ok(());
        };

        tracing::trace!(at = fired.due, kind = step.kind(), counter = ?counter, "step fired");
        self.fired += 1;

        match step {
            Step::Set { label, actions, .. } => {
                let applied = actions
                    .iter()
                    .map(|action| action.resolve(counter, store.get()))
                    .collect::<Result<Vec<_>, _>>()
                    .and_then(|updates| store.set(&updates).map_err(SequenceError::from));
                // A failed step leaves the state and its label untouched, but
                // the chain still moves on.
                if applied.is_ok() {
                    if let Some(label) = label {
                        self.release(label, timeline);
                    }
                }
                self.advance(cursor, timeline);
                applied?;
            }
            Step::Fork { branches, .. } => {
                for branch in branches {
                    self.advance(Cursor::start(Rc::clone(branch), counter), timeline);
                }
                self.advance(cursor, timeline);
            }
            Step::Repeat { bound, body, then, .. } => {
                cursor.enter_repeat(*bound, body, then);
                self.advance(cursor, timeline);
            }
            Step::WaitFor { .. } => self.advance(cursor, timeline),
        }
        Ok(())
    }

    /// Cancel every entry this run scheduled and drop parked chains.
    ///
    /// Returns the number of timeline entries cancelled.
    pub fn cancel(&mut self, timeline: &mut Timeline<Cursor>) -> usize {
        let cancelled = timeline.cancel_all(self.pending.drain());
        self.parked.clear();
        tracing::debug!(cancelled, "sequence run cancelled");
        cancelled
    }

    /// Check whether nothing from this run can fire any more.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of scheduled, unfired entries.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of chains waiting on a label.
    pub fn parked_count(&self) -> usize {
        self.parked.values().map(Vec::len).sum()
    }

    /// Number of steps fired so far.
    #[inline]
    pub fn fired_count(&self) -> usize {
        self.fired
    }

    fn advance(&mut self, cursor: Cursor, timeline: &mut Timeline<Cursor>) {
        let Some(cursor) = cursor.settle() else {
            return;
        };
        let Some(step) = cursor.current() else {
            return;
        };
        if let Step::WaitFor { label, .. } = step {
            if !self.fired_labels.contains(label) {
                let label = label.clone();
                self.parked.entry(label).or_default().push(cursor);
                return;
            }
        }
        let delay = step.delay();
        let id = timeline.schedule(delay, cursor);
        self.pending.insert(id);
    }

    fn release(&mut self, label: &str, timeline: &mut Timeline<Cursor>) {
        self.fired_labels.insert(label.to_string());
        for cursor in self.parked.remove(label).unwrap_or_default() {
            self.advance(cursor, timeline);
        }
    }
}
