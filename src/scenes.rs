//! Built-in animation scripts.
//!
//! The model-split scene narrates splitting a model into units across two
//! GPUs: the model box splits into three units, each unit moves onto the
//! GPUs as params/grads/optimizer-state halves, then each unit's params
//! expand, produce activations and shrink back, one unit at a time, with
//! chevrons showing the direction of the pass.

use crate::script::AnimationScript;
use crate::sequence::{Action, IndexRef, Sequence};
use crate::state::StateSchema;

/// Flag names of the model-split scene.
pub mod flags {
    pub const IS_SPLIT: &str = "is_split";
    pub const IS_SHIFTED: &str = "is_shifted";
    pub const SHOW_GPUS: &str = "show_gpus";
    /// Per unit: the unit box fades into its GPU halves
    pub const SHOW_HALVES: &str = "show_halves";
    pub const CENTER_GPUS: &str = "center_gpus";
    pub const SHOW_INTERNAL_STRUCTURE: &str = "show_internal_structure";
    /// First (forward) chevron group
    pub const SHOW_CHEVRONS: &str = "show_chevrons";
    pub const CHEVRONS_VISIBLE: &str = "chevrons_visible";
    /// Chevrons with index <= this value are faded out
    pub const CHEVRON_FADE_OUT: &str = "chevron_fade_out";
    /// Second (backward) chevron group
    pub const SHOW_CHEVRONS2: &str = "show_chevrons2";
    pub const CHEVRONS2_VISIBLE: &str = "chevrons2_visible";
    pub const EXPAND_PARAMS: &str = "expand_params";
    pub const SHOW_TOP_BOX: &str = "show_top_box";
    pub const SHRINK_PARAMS: &str = "shrink_params";
}

/// Number of model units.
pub const UNIT_COUNT: usize = 3;
/// Chevrons per group.
pub const CHEVRON_COUNT: usize = 3;
/// Gap between consecutive chevron fade-ins.
pub const CHEVRON_STAGGER_MS: u64 = 200;
/// Virtual time at which the model-split scene reaches its final state.
pub const MODEL_SPLIT_DURATION_MS: u64 = 21_600;

/// Flags of the model-split scene, all hidden.
pub fn model_split_schema() -> StateSchema {
    use flags::*;

    StateSchema::new()
        .bool(IS_SPLIT)
        .bool(IS_SHIFTED)
        .bool(SHOW_GPUS)
        .list(SHOW_HALVES, UNIT_COUNT)
        .bool(CENTER_GPUS)
        .bool(SHOW_INTERNAL_STRUCTURE)
        .bool(SHOW_CHEVRONS)
        .list(CHEVRONS_VISIBLE, CHEVRON_COUNT)
        .index(CHEVRON_FADE_OUT)
        .bool(SHOW_CHEVRONS2)
        .list(CHEVRONS2_VISIBLE, CHEVRON_COUNT)
        .list(EXPAND_PARAMS, UNIT_COUNT)
        .list(SHOW_TOP_BOX, UNIT_COUNT)
        .list(SHRINK_PARAMS, UNIT_COUNT)
}

/// Staggered fade-in of one chevron group, in the given index order.
fn chevron_fade_in(flag: &str, order: [usize; CHEVRON_COUNT]) -> Sequence {
    order
        .iter()
        .enumerate()
        .fold(Sequence::builder(), |seq, (i, &index)| {
            let delay = if i == 0 { 0 } else { CHEVRON_STAGGER_MS };
            seq.set(delay, Action::set_entry(flag, IndexRef::At(index), true))
        })
        .build()
}

/// Expand params, show activations, shrink params for the unit at the counter.
fn unit_pass() -> Sequence {
    use flags::*;

    Sequence::builder()
        .set(1000, Action::set_entry(EXPAND_PARAMS, IndexRef::Counter, true))
        .set(500, Action::set_entry(SHOW_TOP_BOX, IndexRef::Counter, true))
        .set(1500, Action::set_entry(SHRINK_PARAMS, IndexRef::Counter, true))
        .build()
}

/// Fade the first chevron group out one by one, then bring in the second.
fn chevron_handover() -> Sequence {
    use flags::*;

    let fade_outs = (0..CHEVRON_COUNT).map(|i| {
        Sequence::builder()
            .set(1000 + i as u64 * 700, Action::set_index(CHEVRON_FADE_OUT, IndexRef::At(i)))
            .build()
    });
    let second_group = Sequence::builder()
        .set(3400, Action::show(SHOW_CHEVRONS2))
        .fork(0, [chevron_fade_in(CHEVRONS2_VISIBLE, [2, 1, 0])])
        .build();

    Sequence::builder()
        .fork(0, fade_outs.chain(std::iter::once(second_group)))
        .build()
}

/// The model-split scene.
pub fn model_split() -> AnimationScript {
    use flags::*;

    let sequence = Sequence::builder()
        .set(2000, Action::show(IS_SPLIT))
        .set(1000, Action::show(IS_SHIFTED))
        .set(1000, Action::show(SHOW_GPUS))
        .set(700, Action::set_entry(SHOW_HALVES, IndexRef::At(0), true))
        .set(700, Action::set_entry(SHOW_HALVES, IndexRef::At(1), true))
        .set(700, Action::set_entry(SHOW_HALVES, IndexRef::At(2), true))
        .set(700, Action::show(CENTER_GPUS))
        .set(1000, Action::show(SHOW_INTERNAL_STRUCTURE))
        .set(1000, Action::show(SHOW_CHEVRONS))
        .fork(0, [chevron_fade_in(CHEVRONS_VISIBLE, [0, 1, 2])])
        .repeat(0, UNIT_COUNT, unit_pass(), chevron_handover())
        .build();

    AnimationScript::trusted("model-split", model_split_schema(), sequence)
}
