//! Animation scripts: a flag schema plus the sequence that drives it.
//!
//! Scripts are plain data and can be loaded from TOML with the `toml`
//! feature:
//!
//! ```toml
//! name = "demo"
//!
//! [[flags]]
//! kind = "bool"
//! name = "visible"
//!
//! [[flags]]
//! kind = "list"
//! name = "units"
//! len = 3
//!
//! [[sequence.steps]]
//! kind = "set"
//! delay = 500
//! actions = [{ kind = "set_bool", flag = "visible", value = true }]
//! ```

use thiserror::Error;

use crate::sequence::{Sequence, SequenceError};
use crate::state::{StateError, StateSchema};

/// Error type for building or loading a script.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// TOML syntax error, unknown step kind, missing or negative delay
    #[cfg(feature = "toml")]
    #[error("invalid script: {0}")]
    Toml(#[from] toml::de::Error),
    /// Bad flag declarations
    #[error(transparent)]
    State(#[from] StateError),
    /// Sequence does not fit the declared flags
    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

/// A validated animation: every step in `sequence` targets a flag declared in
/// `schema` with the right shape.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "ScriptFile", into = "ScriptFile"))]
pub struct AnimationScript {
    name: String,
    schema: StateSchema,
    sequence: Sequence,
}

impl AnimationScript {
    /// Bundle a schema and a sequence, validating one against the other.
    pub fn new(name: &str, schema: StateSchema, sequence: Sequence) -> Result<Self, ScriptError> {
        sequence.validate(&schema)?;
        Ok(Self {
            name: name.to_string(),
            schema,
            sequence,
        })
    }

    /// Bundle parts that are known to fit, skipping validation.
    ///
    /// Only for built-in scripts; their tests run the full validation.
    pub(crate) fn trusted(name: &str, schema: StateSchema, sequence: Sequence) -> Self {
        Self {
            name: name.to_string(),
            schema,
            sequence,
        }
    }

    /// Parse and validate a script from TOML.
    #[cfg(feature = "toml")]
    pub fn from_toml_str(s: &str) -> Result<Self, ScriptError> {
        Ok(toml::from_str(s)?)
    }

    /// Script name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared flags and their start values.
    #[inline]
    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    /// The step sequence.
    #[inline]
    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    /// Split into parts.
    pub fn into_parts(self) -> (String, StateSchema, Sequence) {
        (self.name, self.schema, self.sequence)
    }
}

/// On-disk shape of a script.
#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct ScriptFile {
    name: String,
    #[serde(default)]
    flags: Vec<FlagDecl>,
    #[serde(default)]
    sequence: Sequence,
}

#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum FlagDecl {
    Bool {
        name: String,
        #[serde(default)]
        start: bool,
    },
    Index {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<usize>,
    },
    /// Lists always start all-false
    List { name: String, len: usize },
}

#[cfg(feature = "serde")]
impl TryFrom<ScriptFile> for AnimationScript {
    type Error = ScriptError;

    fn try_from(file: ScriptFile) -> Result<Self, Self::Error> {
        use crate::state::FlagValue;

        let mut schema = StateSchema::new();
        for decl in file.flags {
            match decl {
                FlagDecl::Bool { name, start } => schema.declare(&name, FlagValue::Bool(start))?,
                FlagDecl::Index { name, start } => schema.declare(&name, FlagValue::Index(start))?,
                FlagDecl::List { name, len } => schema.declare(&name, FlagValue::List(vec![false; len]))?,
            }
        }
        AnimationScript::new(&file.name, schema, file.sequence)
    }
}

#[cfg(feature = "serde")]
impl From<AnimationScript> for ScriptFile {
    fn from(script: AnimationScript) -> Self {
        use crate::state::FlagValue;

        let flags = script
            .schema
            .initial()
            .iter()
            .map(|(name, value)| {
                let name = name.to_string();
                match value {
                    FlagValue::Bool(start) => FlagDecl::Bool { name, start: *start },
                    FlagValue::Index(start) => FlagDecl::Index { name, start: *start },
                    FlagValue::List(items) => FlagDecl::List { name, len: items.len() },
                }
            })
            .collect();
        ScriptFile {
            name: script.name,
            flags,
            sequence: script.sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{Action, IndexRef};

    #[test]
    fn test_new_validates() {
        let schema = StateSchema::new().bool("visible");
        let good = Sequence::builder().set(10, Action::show("visible")).build();
        assert!(AnimationScript::new("ok", schema.clone(), good).is_ok());

        let bad = Sequence::builder()
            .set(10, Action::set_entry("visible", IndexRef::At(0), true))
            .build();
        let err = AnimationScript::new("bad", schema, bad).unwrap_err();
        assert!(matches!(
            err,
            ScriptError::Sequence(SequenceError::State(StateError::ShapeMismatch { .. }))
        ));
    }

    #[cfg(feature = "toml")]
    mod toml_loading {
        use super::*;
        use crate::timeline::Delay;
        use crate::Step;

        const SCRIPT: &str = r#"
name = "units"

[[flags]]
kind = "bool"
name = "visible"

[[flags]]
kind = "index"
name = "fade_out"

[[flags]]
kind = "list"
name = "expand"
len = 3

[[sequence.steps]]
kind = "set"
delay = 500
label = "shown"
actions = [{ kind = "set_bool", flag = "visible", value = true }]

[[sequence.steps]]
kind = "repeat"
delay = 0
bound = 3

[[sequence.steps.body.steps]]
kind = "set"
delay = 1000
actions = [{ kind = "set_list_entry", flag = "expand", index = "counter", value = true }]

[[sequence.steps.then.steps]]
kind = "set"
delay = 700
actions = [{ kind = "set_index", flag = "fade_out", value = { at = 2 } }]
"#;

        #[test]
        fn test_from_toml_str() {
            let script = AnimationScript::from_toml_str(SCRIPT).unwrap();
            assert_eq!(script.name(), "units");
            assert_eq!(script.schema().len(), 3);
            assert_eq!(script.sequence().len(), 2);
            match &script.sequence().steps()[0] {
                Step::Set { delay, label, actions } => {
                    assert_eq!(*delay, Delay::from_millis(500));
                    assert_eq!(label.as_deref(), Some("shown"));
                    assert_eq!(actions, &vec![Action::show("visible")]);
                }
                other => panic!("unexpected step {:?}", other),
            }
            match &script.sequence().steps()[1] {
                Step::Repeat { bound, body, then, .. } => {
                    assert_eq!(*bound, 3);
                    assert_eq!(
                        body.steps()[0],
                        Step::Set {
                            delay: Delay::from_millis(1000),
                            label: None,
                            actions: vec![Action::set_entry("expand", IndexRef::Counter, true)],
                        }
                    );
                    assert_eq!(then.len(), 1);
                }
                other => panic!("unexpected step {:?}", other),
            }
        }

        #[test]
        fn test_negative_delay_rejected() {
            let script = SCRIPT.replace("delay = 500", "delay = -500");
            let err = AnimationScript::from_toml_str(&script).unwrap_err();
            assert!(matches!(err, ScriptError::Toml(_)));
            assert!(err.to_string().contains("negative delay"));
        }

        #[test]
        fn test_missing_delay_rejected() {
            let script = SCRIPT.replace("delay = 500\n", "");
            assert!(AnimationScript::from_toml_str(&script).is_err());
        }

        #[test]
        fn test_duplicate_flag_rejected() {
            let script = SCRIPT.replace("name = \"fade_out\"", "name = \"visible\"");
            let err = AnimationScript::from_toml_str(&script).unwrap_err();
            assert!(err.to_string().contains("declared twice"));
        }

        #[test]
        fn test_unknown_flag_rejected() {
            let script = SCRIPT.replace("flag = \"visible\"", "flag = \"hidden\"");
            let err = AnimationScript::from_toml_str(&script).unwrap_err();
            assert!(err.to_string().contains("unknown flag"));
        }

        #[test]
        fn test_toml_round_trip_of_builtin_scene() {
            let script = crate::scenes::model_split();
            let text = toml::to_string(&script).unwrap();
            assert_eq!(AnimationScript::from_toml_str(&text).unwrap(), script);
        }
    }
}
