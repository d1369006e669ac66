//! Animation state: named visual flags and the store that owns them.

use indexmap::IndexMap;
use slotmap::{new_key_type, SlotMap};
use thiserror::Error;

/// Shape of a flag, fixed when the schema is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagShape {
    /// Visible/hidden style switch
    Bool,
    /// Optional index (e.g. which chevron is fading out)
    Index,
    /// Fixed-length list of per-unit switches
    List(usize),
}

impl std::fmt::Display for FlagShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagShape::Bool => write!(f, "bool"),
            FlagShape::Index => write!(f, "index"),
            FlagShape::List(len) => write!(f, "list[{}]", len),
        }
    }
}

/// Current value of one flag.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum FlagValue {
    Bool(bool),
    /// `None` is the "no index" sentinel
    Index(Option<usize>),
    /// One entry per unit, left to right
    List(Vec<bool>),
}

impl FlagValue {
    /// Get the shape of this value.
    pub fn shape(&self) -> FlagShape {
        match self {
            FlagValue::Bool(_) => FlagShape::Bool,
            FlagValue::Index(_) => FlagShape::Index,
            FlagValue::List(items) => FlagShape::List(items.len()),
        }
    }
}

/// Error type for state store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Flag is not part of the schema
    #[error("unknown flag `{0}`")]
    UnknownFlag(String),
    /// Update does not match the flag's shape
    #[error("flag `{flag}` is {expected}, update targets {found}")]
    ShapeMismatch {
        flag: String,
        expected: FlagShape,
        found: &'static str,
    },
    /// List update past the end of the list
    #[error("flag `{flag}` has {len} entries, index {index} is out of range")]
    IndexOutOfRange {
        flag: String,
        index: usize,
        len: usize,
    },
    /// Two flags declared under the same name
    #[error("flag `{0}` declared twice")]
    DuplicateFlag(String),
}

/// Declares every flag with its start value.
///
/// ```rust
/// use parallel_anim_core::{FlagShape, StateSchema};
///
/// let schema = StateSchema::new()
///     .bool("is_split")
///     .index("fade_out")
///     .list("expand", 3);
///
/// assert_eq!(schema.shape("expand"), Some(FlagShape::List(3)));
/// assert_eq!(schema.initial().list("expand"), Some(&[false, false, false][..]));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateSchema {
    start: AnimationState,
}

impl StateSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a boolean flag starting hidden (`false`).
    pub fn bool(self, name: &str) -> Self {
        self.with(name, FlagValue::Bool(false))
    }

    /// Add an index flag starting at the "none" sentinel.
    pub fn index(self, name: &str) -> Self {
        self.with(name, FlagValue::Index(None))
    }

    /// Add a per-unit list flag of `len` entries, all `false`.
    pub fn list(self, name: &str, len: usize) -> Self {
        self.with(name, FlagValue::List(vec![false; len]))
    }

    /// Add a flag with an explicit start value.
    ///
    /// Redeclaring a name replaces the earlier declaration; use
    /// [`StateSchema::declare`] to reject duplicates instead.
    pub fn with(mut self, name: &str, start: FlagValue) -> Self {
        self.start.flags.insert(name.to_string(), start);
        self
    }

    /// Add a flag, failing if the name is taken.
    pub fn declare(&mut self, name: &str, start: FlagValue) -> Result<(), StateError> {
        if self.start.flags.contains_key(name) {
            return Err(StateError::DuplicateFlag(name.to_string()));
        }
        self.start.flags.insert(name.to_string(), start);
        Ok(())
    }

    /// Shape of a declared flag.
    pub fn shape(&self, name: &str) -> Option<FlagShape> {
        self.start.get(name).map(FlagValue::shape)
    }

    /// Check that a batch of updates fits the declared flags.
    pub fn check(&self, updates: &[Update]) -> Result<(), StateError> {
        updates.iter().try_for_each(|u| u.check(&self.start))
    }

    /// The start configuration.
    #[inline]
    pub fn initial(&self) -> &AnimationState {
        &self.start
    }

    /// Number of declared flags.
    #[inline]
    pub fn len(&self) -> usize {
        self.start.flags.len()
    }

    /// Check whether no flags are declared.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start.flags.is_empty()
    }
}

/// A full snapshot of every flag, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct AnimationState {
    flags: IndexMap<String, FlagValue>,
}

impl AnimationState {
    /// Get a flag value by name.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&FlagValue> {
        self.flags.get(name)
    }

    /// Get a boolean flag.
    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.flags.get(name)? {
            FlagValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Get an index flag; the outer `Option` is `None` for unknown flags.
    pub fn index(&self, name: &str) -> Option<Option<usize>> {
        match self.flags.get(name)? {
            FlagValue::Index(value) => Some(*value),
            _ => None,
        }
    }

    /// Get a per-unit list flag.
    pub fn list(&self, name: &str) -> Option<&[bool]> {
        match self.flags.get(name)? {
            FlagValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Iterate over flags in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FlagValue)> {
        self.flags.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of flags.
    #[inline]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Check whether the state has no flags.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Names of flags whose value differs from `other`.
    pub fn diff<'a>(&'a self, other: &AnimationState) -> Vec<&'a str> {
        self.flags
            .iter()
            .filter(|(name, value)| other.get(name) != Some(*value))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// A single-flag write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Update {
    /// Overwrite a boolean flag
    Bool { flag: String, value: bool },
    /// Overwrite an index flag
    Index { flag: String, value: Option<usize> },
    /// Overwrite one entry of a list flag; other entries are untouched
    ListEntry { flag: String, index: usize, value: bool },
}

impl Update {
    /// Name of the flag this update writes.
    pub fn flag(&self) -> &str {
        match self {
            Update::Bool { flag, .. } | Update::Index { flag, .. } | Update::ListEntry { flag, .. } => {
                flag
            }
        }
    }

    fn target(&self) -> &'static str {
        match self {
            Update::Bool { .. } => "bool",
            Update::Index { .. } => "index",
            Update::ListEntry { .. } => "list entry",
        }
    }

    /// Check that this update fits `state` without applying it.
    fn check(&self, state: &AnimationState) -> Result<(), StateError> {
        let current = state
            .get(self.flag())
            .ok_or_else(|| StateError::UnknownFlag(self.flag().to_string()))?;
        match (self, current) {
            (Update::Bool { .. }, FlagValue::Bool(_)) => Ok(()),
            (Update::Index { .. }, FlagValue::Index(_)) => Ok(()),
            (Update::ListEntry { flag, index, .. }, FlagValue::List(items)) => {
                if *index < items.len() {
                    Ok(())
                } else {
                    Err(StateError::IndexOutOfRange {
                        flag: flag.clone(),
                        index: *index,
                        len: items.len(),
                    })
                }
            }
            (update, current) => Err(StateError::ShapeMismatch {
                flag: update.flag().to_string(),
                expected: current.shape(),
                found: update.target(),
            }),
        }
    }

    fn apply(&self, state: &mut AnimationState) {
        match (self, state.flags.get_mut(self.flag())) {
            (Update::Bool { value, .. }, Some(FlagValue::Bool(slot))) => *slot = *value,
            (Update::Index { value, .. }, Some(FlagValue::Index(slot))) => *slot = *value,
            (Update::ListEntry { index, value, .. }, Some(FlagValue::List(items))) => {
                if let Some(slot) = items.get_mut(*index) {
                    *slot = *value;
                }
            }
            _ => {}
        }
    }
}

new_key_type! {
    /// Handle to a registered state observer
    pub struct ObserverId;
}

/// Callback invoked with the full snapshot after every change.
pub type StateObserver = Box<dyn FnMut(&AnimationState)>;

/// Owns the current animation state.
///
/// Flag names and shapes are fixed by the schema; updates only overwrite
/// values. Each successful [`StateStore::set`] or [`StateStore::reset`] is one
/// observable transition.
///
/// ## Example
///
/// ```rust
/// use parallel_anim_core::{StateSchema, StateStore, Update};
///
/// let mut store = StateStore::new(StateSchema::new().list("expand", 3));
/// store
///     .set(&[Update::ListEntry { flag: "expand".into(), index: 1, value: true }])
///     .unwrap();
/// assert_eq!(store.get().list("expand"), Some(&[false, true, false][..]));
///
/// store.reset();
/// assert_eq!(store.get(), store.schema().initial());
/// ```
pub struct StateStore {
    schema: StateSchema,
    current: AnimationState,
    revision: u64,
    observers: SlotMap<ObserverId, StateObserver>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("current", &self.current)
            .field("revision", &self.revision)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl StateStore {
    /// Create a store with every flag at its start value.
    pub fn new(schema: StateSchema) -> Self {
        let current = schema.initial().clone();
        Self {
            schema,
            current,
            revision: 0,
            observers: SlotMap::with_key(),
        }
    }

    /// The schema this store was built from.
    #[inline]
    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    /// Current snapshot.
    #[inline]
    pub fn get(&self) -> &AnimationState {
        &self.current
    }

    /// Owned copy of the current snapshot.
    pub fn snapshot(&self) -> AnimationState {
        self.current.clone()
    }

    /// Number of transitions applied so far (sets and resets).
    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Check that a batch of updates would apply cleanly.
    pub fn check(&self, updates: &[Update]) -> Result<(), StateError> {
        updates.iter().try_for_each(|u| u.check(&self.current))
    }

    /// Merge a batch of updates as one transition.
    ///
    /// Either every update applies or none does. Later updates to the same
    /// flag win. An empty batch is not a transition.
    pub fn set(&mut self, updates: &[Update]) -> Result<(), StateError> {
        self.check(updates)?;
        if updates.is_empty() {
            return Ok(());
        }
        for update in updates {
            update.apply(&mut self.current);
        }
        self.commit();
        Ok(())
    }

    /// Restore every flag to its start value as one transition.
    pub fn reset(&mut self) {
        self.current = self.schema.initial().clone();
        self.commit();
    }

    /// Register an observer; it sees every later transition.
    pub fn subscribe<F>(&mut self, observer: F) -> ObserverId
    where
        F: FnMut(&AnimationState) + 'static,
    {
        self.observers.insert(Box::new(observer))
    }

    /// Remove an observer. Unknown ids are ignored.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.remove(id).is_some()
    }

    fn commit(&mut self) {
        self.revision += 1;
        for observer in self.observers.values_mut() {
            observer(&self.current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn schema() -> StateSchema {
        StateSchema::new()
            .bool("visible")
            .index("fade_out")
            .list("units", 3)
    }

    fn entry(index: usize, value: bool) -> Update {
        Update::ListEntry {
            flag: "units".into(),
            index,
            value,
        }
    }

    #[test]
    fn test_initial_state_fully_defined() {
        let store = StateStore::new(schema());
        let state = store.get();
        assert_eq!(state.len(), 3);
        assert_eq!(state.bool("visible"), Some(false));
        assert_eq!(state.index("fade_out"), Some(None));
        assert_eq!(state.list("units"), Some(&[false, false, false][..]));
    }

    #[test]
    fn test_list_entry_isolation() {
        for i in 0..3 {
            let mut store = StateStore::new(schema());
            store.set(&[entry(i, true)]).unwrap();
            let units = store.get().list("units").unwrap();
            for (j, value) in units.iter().enumerate() {
                assert_eq!(*value, i == j, "index {} after setting {}", j, i);
            }
        }
    }

    #[test]
    fn test_last_write_wins() {
        let mut store = StateStore::new(schema());
        store
            .set(&[
                Update::Index { flag: "fade_out".into(), value: Some(0) },
                Update::Index { flag: "fade_out".into(), value: Some(2) },
            ])
            .unwrap();
        assert_eq!(store.get().index("fade_out"), Some(Some(2)));
    }

    #[test]
    fn test_rejects_unknown_and_mismatched() {
        let mut store = StateStore::new(schema());
        let err = store
            .set(&[Update::Bool { flag: "missing".into(), value: true }])
            .unwrap_err();
        assert_eq!(err, StateError::UnknownFlag("missing".into()));

        let err = store
            .set(&[Update::Bool { flag: "units".into(), value: true }])
            .unwrap_err();
        assert!(matches!(err, StateError::ShapeMismatch { .. }));

        let err = store.set(&[entry(3, true)]).unwrap_err();
        assert_eq!(
            err,
            StateError::IndexOutOfRange { flag: "units".into(), index: 3, len: 3 }
        );
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let mut store = StateStore::new(schema());
        let result = store.set(&[
            Update::Bool { flag: "visible".into(), value: true },
            entry(7, true),
        ]);
        assert!(result.is_err());
        assert_eq!(store.get().bool("visible"), Some(false));
    }

    #[test]
    fn test_reset_restores_and_keeps_shapes() {
        let mut store = StateStore::new(schema());
        store
            .set(&[
                Update::Bool { flag: "visible".into(), value: true },
                Update::Index { flag: "fade_out".into(), value: Some(1) },
                entry(2, true),
            ])
            .unwrap();
        store.reset();
        assert_eq!(store.get(), schema().initial());
        assert_eq!(store.schema().shape("units"), Some(FlagShape::List(3)));
    }

    #[test]
    fn test_observers_see_each_transition_once() {
        let mut store = StateStore::new(schema());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = store.subscribe(move |state| {
            sink.borrow_mut().push(state.list("units").unwrap().to_vec());
        });

        store.set(&[entry(0, true), entry(1, true)]).unwrap();
        store.reset();
        assert_eq!(
            *seen.borrow(),
            vec![vec![true, true, false], vec![false, false, false]]
        );

        assert!(store.unsubscribe(id));
        store.set(&[entry(0, true)]).unwrap();
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn test_duplicate_declaration() {
        let mut schema = schema();
        assert_eq!(
            schema.declare("visible", FlagValue::Bool(true)),
            Err(StateError::DuplicateFlag("visible".into()))
        );
        assert!(schema.declare("other", FlagValue::Bool(true)).is_ok());
        assert_eq!(schema.initial().bool("other"), Some(true));
    }

    #[test]
    fn test_diff() {
        let mut store = StateStore::new(schema());
        let before = store.snapshot();
        store.set(&[entry(1, true)]).unwrap();
        assert_eq!(store.get().diff(&before), vec!["units"]);
    }

    #[test]
    fn test_empty_batch_is_not_a_transition() {
        let mut store = StateStore::new(schema());
        let calls = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&calls);
        store.subscribe(move |_| *sink.borrow_mut() += 1);

        store.set(&[]).unwrap();
        assert_eq!(store.revision(), 0);
        assert_eq!(*calls.borrow(), 0);

        store.set(&[entry(2, true)]).unwrap();
        assert_eq!(store.revision(), 1);
        assert_eq!(*calls.borrow(), 1);
    }
}
