//! Lifecycle controller for a scripted animation.

use std::rc::Rc;

use thiserror::Error;

use crate::script::AnimationScript;
use crate::sequence::{Cursor, Sequence, SequenceError, SequenceRun};
use crate::state::{AnimationState, ObserverId, StateStore};
use crate::timeline::Timeline;

/// Where the controller is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created, not mounted yet
    Idle,
    /// A sequence run is in progress (or has finished and awaits a reset)
    Running,
    /// Cancelling the current run before restarting
    Resetting,
    /// Unmounted; no further state changes happen
    TornDown,
}

/// Error type for controller operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// The requested transition is not valid from the current state
    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: Lifecycle,
    },
    /// The controller was unmounted
    #[error("animation controller has been torn down")]
    TornDown,
    /// A step failed to apply
    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

/// Callback invoked with the virtual time at which a run finished.
pub type CompletionCallback = Box<dyn FnMut(u64)>;

/// Owns the timeline, the state store and the current sequence run.
///
/// Time is virtual: the caller advances it with [`AnimationController::advance`]
/// (from a frame timer, a test, or the `web` driver), and every step due
/// within that window fires in order before the call returns. The
/// controller holds the only handle able to schedule, so nothing can fire
/// once it is torn down.
///
/// ## Example
///
/// ```rust
/// use parallel_anim_core::{scenes, AnimationController, Lifecycle};
///
/// let mut controller = AnimationController::new(scenes::model_split());
/// controller.mount().unwrap();
/// assert_eq!(controller.lifecycle(), Lifecycle::Running);
///
/// // Nothing happens before the first delay elapses.
/// controller.advance(1_999).unwrap();
/// assert_eq!(controller.state().bool(scenes::flags::IS_SPLIT), Some(false));
///
/// controller.advance(1).unwrap();
/// assert_eq!(controller.state().bool(scenes::flags::IS_SPLIT), Some(true));
///
/// // Reset restarts from the initial configuration.
/// controller.reset().unwrap();
/// assert_eq!(controller.state().bool(scenes::flags::IS_SPLIT), Some(false));
/// ```
pub struct AnimationController {
    name: String,
    sequence: Rc<Sequence>,
    timeline: Timeline<Cursor>,
    store: StateStore,
    run: Option<SequenceRun>,
    lifecycle: Lifecycle,
    /// Number of runs started so far
    generation: u64,
    completed_at: Option<u64>,
    on_complete: Vec<CompletionCallback>,
}

impl std::fmt::Debug for AnimationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationController")
            .field("name", &self.name)
            .field("lifecycle", &self.lifecycle)
            .field("now", &self.timeline.now())
            .field("generation", &self.generation)
            .field("completed_at", &self.completed_at)
            .finish()
    }
}

impl AnimationController {
    /// Create an idle controller for a validated script.
    pub fn new(script: AnimationScript) -> Self {
        let (name, schema, sequence) = script.into_parts();
        Self {
            name,
            sequence: Rc::new(sequence),
            timeline: Timeline::new(),
            store: StateStore::new(schema),
            run: None,
            lifecycle: Lifecycle::Idle,
            generation: 0,
            completed_at: None,
            on_complete: Vec::new(),
        }
    }

    /// Script name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    #[inline]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Check if a run is in progress or finished but not torn down.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    /// Current virtual time in milliseconds.
    #[inline]
    pub fn now(&self) -> u64 {
        self.timeline.now()
    }

    /// Start the sequence. Only valid once, from `Idle`.
    pub fn mount(&mut self) -> Result<(), ControllerError> {
        match self.lifecycle {
            Lifecycle::Idle => {
                self.start_run();
                self.lifecycle = Lifecycle::Running;
                tracing::debug!(name = %self.name, at = self.now(), "animation mounted");
                Ok(())
            }
            Lifecycle::TornDown => Err(ControllerError::TornDown),
            state => Err(ControllerError::InvalidTransition { action: "mount", state }),
        }
    }

    /// Cancel the current run, restore the start state and run again.
    ///
    /// Every entry of the interrupted run is cancelled before the store is
    /// reset, so none of them can fire afterwards.
    pub fn reset(&mut self) -> Result<(), ControllerError> {
        match self.lifecycle {
            Lifecycle::Running => {
                self.lifecycle = Lifecycle::Resetting;
                self.cancel_run();
                self.store.reset();
                self.start_run();
                self.lifecycle = Lifecycle::Running;
                tracing::debug!(
                    name = %self.name,
                    at = self.now(),
                    generation = self.generation,
                    "animation reset"
                );
                Ok(())
            }
            Lifecycle::TornDown => Err(ControllerError::TornDown),
            state => {
                tracing::warn!(name = %self.name, ?state, "reset ignored");
                Err(ControllerError::InvalidTransition { action: "reset", state })
            }
        }
    }

    /// Cancel everything and stop for good. Idempotent.
    pub fn unmount(&mut self) {
        if self.lifecycle == Lifecycle::TornDown {
            return;
        }
        self.cancel_run();
        self.on_complete.clear();
        self.lifecycle = Lifecycle::TornDown;
        tracing::debug!(name = %self.name, at = self.now(), "animation torn down");
    }

    /// Advance virtual time by `elapsed_ms`, firing every step that comes due.
    ///
    /// Returns the number of steps fired.
    pub fn advance(&mut self, elapsed_ms: u64) -> Result<usize, ControllerError> {
        let target = self.now().saturating_add(elapsed_ms);
        self.advance_to(target)
    }

    /// Advance virtual time to the absolute time `at`.
    pub fn advance_to(&mut self, at: u64) -> Result<usize, ControllerError> {
        if self.lifecycle == Lifecycle::TornDown {
            return Err(ControllerError::TornDown);
        }
        let fired = self.fire_until(at)?;
        self.timeline.advance_clock(at);
        Ok(fired)
    }

    /// Fire every remaining step of the current run, however far away.
    ///
    /// Returns the number of steps fired.
    pub fn run_until_idle(&mut self) -> Result<usize, ControllerError> {
        if self.lifecycle == Lifecycle::TornDown {
            return Err(ControllerError::TornDown);
        }
        self.fire_until(u64::MAX)
    }

    /// Absolute time of the next pending step.
    pub fn next_due(&mut self) -> Option<u64> {
        self.timeline.next_due()
    }

    /// Current animation state.
    #[inline]
    pub fn state(&self) -> &AnimationState {
        self.store.get()
    }

    /// Owned copy of the current animation state.
    pub fn snapshot(&self) -> AnimationState {
        self.store.snapshot()
    }

    /// The state store (read-only).
    #[inline]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Observe every state transition (steps and resets).
    pub fn subscribe<F>(&mut self, observer: F) -> ObserverId
    where
        F: FnMut(&AnimationState) + 'static,
    {
        self.store.subscribe(observer)
    }

    /// Stop observing.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.store.unsubscribe(id)
    }

    /// Register a callback for when a run has nothing left to fire.
    ///
    /// Called once per run, with the virtual completion time.
    pub fn on_complete<F>(&mut self, callback: F)
    where
        F: FnMut(u64) + 'static,
    {
        self.on_complete.push(Box::new(callback));
    }

    /// Check whether the current run has finished.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Virtual time at which the current run finished.
    #[inline]
    pub fn completed_at(&self) -> Option<u64> {
        self.completed_at
    }

    /// Number of runs started (1 after mount, +1 per reset).
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of pending timeline entries.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.timeline.pending_count()
    }

    /// Number of steps fired by the current run.
    pub fn fired_count(&self) -> usize {
        self.run.as_ref().map_or(0, SequenceRun::fired_count)
    }

    fn start_run(&mut self) {
        self.generation += 1;
        self.completed_at = None;
        self.run = Some(SequenceRun::start(Rc::clone(&self.sequence), &mut self.timeline));
        self.check_complete();
    }

    fn cancel_run(&mut self) {
        if let Some(mut run) = self.run.take() {
            run.cancel(&mut self.timeline);
        }
        debug_assert!(self.timeline.is_idle());
    }

    fn fire_until(&mut self, until: u64) -> Result<usize, ControllerError> {
        let mut count = 0;
        while let Some(fired) = self.timeline.pop_due(until) {
            if let Some(run) = self.run.as_mut() {
                run.fire(fired, &mut self.timeline, &mut self.store)?;
                count += 1;
            }
            self.check_complete();
        }
        Ok(count)
    }

    fn check_complete(&mut self) {
        let finished = self.run.as_ref().is_some_and(SequenceRun::is_finished);
        if finished && self.completed_at.is_none() {
            let at = self.timeline.now();
            self.completed_at = Some(at);
            tracing::debug!(
                name = %self.name,
                at,
                generation = self.generation,
                "animation run complete"
            );
            for callback in &mut self.on_complete {
                callback(at);
            }
        }
    }
}

impl Drop for AnimationController {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{Action, IndexRef};
    use crate::state::StateSchema;
    use std::cell::RefCell;

    fn script() -> AnimationScript {
        let schema = StateSchema::new().bool("a").bool("b").list("units", 2);
        let body = Sequence::builder()
            .set(100, Action::set_entry("units", IndexRef::Counter, true))
            .build();
        let seq = Sequence::builder()
            .set(1000, Action::show("a"))
            .repeat(0, 2, body, Sequence::builder().set(50, Action::show("b")).build())
            .build();
        AnimationScript::new("test", schema, seq).unwrap()
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut ctrl = AnimationController::new(script());
        assert_eq!(ctrl.lifecycle(), Lifecycle::Idle);
        assert_eq!(
            ctrl.reset(),
            Err(ControllerError::InvalidTransition { action: "reset", state: Lifecycle::Idle })
        );

        ctrl.mount().unwrap();
        assert_eq!(ctrl.lifecycle(), Lifecycle::Running);
        assert!(matches!(ctrl.mount(), Err(ControllerError::InvalidTransition { .. })));

        ctrl.reset().unwrap();
        assert_eq!(ctrl.lifecycle(), Lifecycle::Running);
        assert_eq!(ctrl.generation(), 2);

        ctrl.unmount();
        assert_eq!(ctrl.lifecycle(), Lifecycle::TornDown);
        ctrl.unmount();
        assert_eq!(ctrl.mount(), Err(ControllerError::TornDown));
        assert_eq!(ctrl.reset(), Err(ControllerError::TornDown));
        assert_eq!(ctrl.advance(10), Err(ControllerError::TornDown));
    }

    #[test]
    fn test_idle_controller_does_not_run() {
        let mut ctrl = AnimationController::new(script());
        assert_eq!(ctrl.advance(10_000), Ok(0));
        assert_eq!(ctrl.state(), ctrl.store().schema().initial());
    }

    #[test]
    fn test_advance_fires_due_steps() {
        let mut ctrl = AnimationController::new(script());
        ctrl.mount().unwrap();

        assert_eq!(ctrl.advance(999), Ok(0));
        // "a" and the zero-delay repeat step behind it both fall due at 1000
        assert_eq!(ctrl.advance(1), Ok(2));
        assert_eq!(ctrl.state().bool("a"), Some(true));

        assert_eq!(ctrl.advance(100), Ok(1));
        assert_eq!(ctrl.state().list("units"), Some(&[true, false][..]));
        assert_eq!(ctrl.now(), 1100);
        assert_eq!(ctrl.next_due(), Some(1200));
    }

    #[test]
    fn test_completion_reported_once_per_run() {
        let mut ctrl = AnimationController::new(script());
        let done = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&done);
        ctrl.on_complete(move |at| sink.borrow_mut().push(at));
        ctrl.mount().unwrap();

        ctrl.run_until_idle().unwrap();
        assert!(ctrl.is_complete());
        assert_eq!(ctrl.completed_at(), Some(1250));
        assert_eq!(ctrl.state().bool("b"), Some(true));

        ctrl.advance(10_000).unwrap();
        assert_eq!(*done.borrow(), vec![1250]);

        ctrl.reset().unwrap();
        assert!(!ctrl.is_complete());
        ctrl.run_until_idle().unwrap();
        assert_eq!(*done.borrow(), vec![1250, 11_250 + 1250]);
    }

    #[test]
    fn test_reset_emits_single_transition() {
        let mut ctrl = AnimationController::new(script());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        ctrl.subscribe(move |state| sink.borrow_mut().push(state.clone()));
        ctrl.mount().unwrap();
        ctrl.advance(1_100).unwrap();
        let before = seen.borrow().len();

        ctrl.reset().unwrap();
        assert_eq!(seen.borrow().len(), before + 1);
        assert_eq!(seen.borrow().last(), Some(ctrl.store().schema().initial()));
    }

    #[test]
    fn test_unmount_cancels_everything() {
        let mut ctrl = AnimationController::new(script());
        ctrl.mount().unwrap();
        ctrl.advance(1_000).unwrap();
        assert!(ctrl.pending_count() > 0);
        let frozen = ctrl.snapshot();

        ctrl.unmount();
        assert_eq!(ctrl.pending_count(), 0);
        assert!(ctrl.run_until_idle().is_err());
        assert_eq!(ctrl.state(), &frozen);
    }

    #[test]
    fn test_empty_sequence_completes_on_mount() {
        let schema = StateSchema::new().bool("a");
        let script = AnimationScript::new("empty", schema, Sequence::default()).unwrap();
        let mut ctrl = AnimationController::new(script);
        ctrl.mount().unwrap();
        assert_eq!(ctrl.completed_at(), Some(0));
    }
}
