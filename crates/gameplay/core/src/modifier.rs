//! Modifier records and the evaluation parameters they qualify against.

use std::rc::Rc;

use strum::{EnumCount, EnumIter};

use crate::handle::EffectHandle;
use crate::tags::{TagContainer, TagRequirements};

/// Arithmetic role of a modifier.
///
/// Variants are ordered by their position in the per-channel fold; `Override`
/// is checked first but listed last since it replaces the fold entirely.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, EnumCount, EnumIter,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModifierOp {
    Additive,
    Multiplicative,
    Division,
    Override,
}

impl ModifierOp {
    /// Identity element used by the sum-with-bias fold.
    ///
    /// Override has no meaningful bias; it is reported as 0.
    pub const fn bias(self) -> f32 {
        match self {
            Self::Additive | Self::Override => 0.0,
            Self::Multiplicative | Self::Division => 1.0,
        }
    }

    /// Magnitude of `stack_count` stacks of one modifier.
    ///
    /// The distance from the bias scales with the stack count, so two stacks
    /// of `Multiplicative 1.5` give `2.0`. Overrides ignore stacking.
    pub fn stacked_magnitude(self, magnitude: f32, stack_count: u32) -> f32 {
        match self {
            Self::Override => magnitude,
            _ => (magnitude - self.bias()) * stack_count as f32 + self.bias(),
        }
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

/// One contribution to an attribute's value.
///
/// Fields are read-only outside this crate. A modifier is never edited in
/// place; replacing an effect's modifiers means removing and re-adding them.
#[derive(Clone, Debug, PartialEq)]
pub struct Modifier {
    pub(crate) evaluated_magnitude: f32,
    pub(crate) op: ModifierOp,
    pub(crate) source_requirements: Option<Rc<TagRequirements>>,
    pub(crate) target_requirements: Option<Rc<TagRequirements>>,
    pub(crate) is_predicted: bool,
    pub(crate) handle: EffectHandle,
}

impl Modifier {
    pub fn evaluated_magnitude(&self) -> f32 {
        self.evaluated_magnitude
    }

    pub fn op(&self) -> ModifierOp {
        self.op
    }

    pub fn source_requirements(&self) -> Option<&TagRequirements> {
        self.source_requirements.as_deref()
    }

    pub fn target_requirements(&self) -> Option<&TagRequirements> {
        self.target_requirements.as_deref()
    }

    pub fn is_predicted(&self) -> bool {
        self.is_predicted
    }

    pub fn handle(&self) -> EffectHandle {
        self.handle
    }

    /// Returns true if this modifier takes part in an evaluation with `params`.
    ///
    /// All of the following must hold:
    /// - source and target requirements are absent, empty or met;
    /// - the modifier is not predicted, unless predictive mods are included;
    /// - the handle is not ignored;
    /// - the owning effect's captured tags carry every applied filter tag.
    pub fn qualifies(&self, params: &EvaluateParams) -> bool {
        if !params.include_predictive_mods && self.is_predicted {
            return false;
        }
        if params.ignore_handles.contains(&self.handle) {
            return false;
        }
        if !requirements_met(self.source_requirements.as_deref(), params.source_tags.as_ref()) {
            return false;
        }
        if !requirements_met(self.target_requirements.as_deref(), params.target_tags.as_ref()) {
            return false;
        }
        self.applied_filters_met(params)
    }

    fn applied_filters_met(&self, params: &EvaluateParams) -> bool {
        let source_open = params.applied_source_tag_filter.is_empty();
        let target_open = params.applied_target_tag_filter.is_empty();
        if source_open && target_open {
            return true;
        }

        // Without a resolvable owner the filters cannot be checked and are treated as met.
        let Some(owner) = self.handle.owning_component() else {
            return true;
        };
        let Some(tags) = owner.captured_effect_tags(self.handle) else {
            return false;
        };

        (source_open || tags.source.has_all(&params.applied_source_tag_filter))
            && (target_open || tags.target.has_all(&params.applied_target_tag_filter))
    }
}

fn requirements_met(requirements: Option<&TagRequirements>, tags: Option<&TagContainer>) -> bool {
    match requirements {
        None => true,
        Some(reqs) if reqs.is_empty() => true,
        Some(reqs) => tags.is_some_and(|tags| reqs.requirements_met(tags)),
    }
}

/// Inputs controlling which modifiers qualify during an evaluation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvaluateParams {
    pub source_tags: Option<TagContainer>,
    pub target_tags: Option<TagContainer>,
    /// Only modifiers whose effect captured all of these source tags qualify.
    pub applied_source_tag_filter: TagContainer,
    /// Only modifiers whose effect captured all of these target tags qualify.
    pub applied_target_tag_filter: TagContainer,
    pub ignore_handles: Vec<EffectHandle>,
    pub include_predictive_mods: bool,
}

impl EvaluateParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_tags(mut self, tags: TagContainer) -> Self {
        self.source_tags = Some(tags);
        self
    }

    pub fn with_target_tags(mut self, tags: TagContainer) -> Self {
        self.target_tags = Some(tags);
        self
    }

    pub fn ignoring(mut self, handle: EffectHandle) -> Self {
        self.ignore_handles.push(handle);
        self
    }

    pub fn including_predictive_mods(mut self) -> Self {
        self.include_predictive_mods = true;
        self
    }
}
