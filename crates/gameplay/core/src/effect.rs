//! Effect definitions and the per-application effect spec.
//!
//! An [`EffectDef`] is immutable content shared by every application. An
//! [`EffectSpec`] is one application of it: evaluated magnitudes, resolved
//! channels, captured tags and captured attributes.

use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::aggregator::AggregatorRef;
use crate::attribute::AttributeId;
use crate::capture::{CaptureDefinition, CaptureSpecContainer};
use crate::channel::EvaluationChannel;
use crate::config::AggregatorConfig;
use crate::error::EffectError;
use crate::handle::{EffectOwner, EffectTags};
use crate::modifier::{EvaluateParams, ModifierOp};
use crate::tags::{TagContainer, TagRequirements};

/// Which value of a captured attribute an attribute-based magnitude reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttributeCalculation {
    /// Fully evaluated value.
    #[default]
    Magnitude,
    BaseValue,
    /// Evaluated value minus base value.
    BonusMagnitude,
    /// Value evaluated through `final_channel` inclusive.
    MagnitudeUpToChannel,
}

/// `coefficient * (captured + pre_multiply_additive) + post_multiply_additive`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttributeBasedFloat {
    #[cfg_attr(feature = "serde", serde(default = "unit_coefficient"))]
    pub coefficient: f32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub pre_multiply_additive: f32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub post_multiply_additive: f32,
    pub backing: CaptureDefinition,
    #[cfg_attr(feature = "serde", serde(default))]
    pub calculation: AttributeCalculation,
    #[cfg_attr(feature = "serde", serde(default))]
    pub final_channel: EvaluationChannel,
    /// Only modifiers whose effect captured all of these source tags count.
    #[cfg_attr(feature = "serde", serde(default))]
    pub source_tag_filter: TagContainer,
    #[cfg_attr(feature = "serde", serde(default))]
    pub target_tag_filter: TagContainer,
}

#[cfg(feature = "serde")]
fn unit_coefficient() -> f32 {
    1.0
}

impl AttributeBasedFloat {
    /// Plain `coefficient * captured` with no filters.
    pub fn new(backing: CaptureDefinition, coefficient: f32) -> Self {
        Self {
            coefficient,
            pre_multiply_additive: 0.0,
            post_multiply_additive: 0.0,
            backing,
            calculation: AttributeCalculation::Magnitude,
            final_channel: EvaluationChannel::Channel0,
            source_tag_filter: TagContainer::new(),
            target_tag_filter: TagContainer::new(),
        }
    }

    pub fn calculate_magnitude(&self, spec: &EffectSpec) -> Result<f32, EffectError> {
        let missing = || EffectError::MissingCapture {
            attribute: self.backing.attribute.clone(),
            side: self.backing.source,
        };

        let capture = spec
            .captures
            .find_capture_spec(&self.backing)
            .ok_or_else(missing)?;

        let params = EvaluateParams {
            source_tags: Some(spec.captured_source_tags.clone()),
            target_tags: Some(spec.captured_target_tags.clone()),
            applied_source_tag_filter: self.source_tag_filter.clone(),
            applied_target_tag_filter: self.target_tag_filter.clone(),
            ..EvaluateParams::default()
        };

        let captured = match self.calculation {
            AttributeCalculation::Magnitude => capture.attempt_calculate_attribute_magnitude(&params),
            AttributeCalculation::BaseValue => capture.attempt_calculate_attribute_base_value(),
            AttributeCalculation::BonusMagnitude => {
                capture.attempt_calculate_attribute_bonus_magnitude(&params)
            }
            AttributeCalculation::MagnitudeUpToChannel => capture
                .attempt_calculate_attribute_magnitude_up_to_channel(&params, self.final_channel),
        }
        .ok_or_else(missing)?;

        Ok(self.coefficient * (captured + self.pre_multiply_additive) + self.post_multiply_additive)
    }
}

/// How a modifier's magnitude is produced.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MagnitudeDef {
    Scalable(f32),
    AttributeBased(AttributeBasedFloat),
    /// Supplied at runtime through [`EffectSpec::set_set_by_caller_magnitude`].
    SetByCaller { name: String },
}

impl MagnitudeDef {
    pub fn capture_definition(&self) -> Option<&CaptureDefinition> {
        match self {
            Self::AttributeBased(based) => Some(&based.backing),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModifierDef {
    pub attribute: AttributeId,
    pub op: ModifierOp,
    pub magnitude: MagnitudeDef,
    #[cfg_attr(feature = "serde", serde(default))]
    pub channel: EvaluationChannel,
    /// Requirements on the source's captured tags.
    #[cfg_attr(feature = "serde", serde(default))]
    pub source_tags: Rc<TagRequirements>,
    /// Requirements on the target's captured tags.
    #[cfg_attr(feature = "serde", serde(default))]
    pub target_tags: Rc<TagRequirements>,
}

impl ModifierDef {
    pub fn new(attribute: impl Into<AttributeId>, op: ModifierOp, magnitude: MagnitudeDef) -> Self {
        Self {
            attribute: attribute.into(),
            op,
            magnitude,
            channel: EvaluationChannel::Channel0,
            source_tags: Rc::default(),
            target_tags: Rc::default(),
        }
    }

    pub fn in_channel(mut self, channel: EvaluationChannel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_source_tags(mut self, requirements: TagRequirements) -> Self {
        self.source_tags = Rc::new(requirements);
        self
    }

    pub fn with_target_tags(mut self, requirements: TagRequirements) -> Self {
        self.target_tags = Rc::new(requirements);
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DurationPolicy {
    /// Folded into base values on application; never becomes active.
    #[default]
    Instant,
    /// Stays active until removed.
    Infinite,
}

/// How repeated applications of the same durational effect combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StackingPolicy {
    /// Every application is a separate active effect.
    #[default]
    None,
    /// Applications from the same instigator share one active effect.
    AggregateBySource,
    /// All applications on a target share one active effect.
    AggregateByTarget,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EffectDef {
    pub name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub duration: DurationPolicy,
    #[cfg_attr(feature = "serde", serde(default))]
    pub modifiers: Vec<ModifierDef>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub stacking: StackingPolicy,
    /// Maximum stack count. 0 means unlimited.
    #[cfg_attr(feature = "serde", serde(default))]
    pub stack_limit: u32,
    /// Owner tags an active effect needs for its modifiers to apply.
    ///
    /// While unmet the effect stays active but inhibited.
    #[cfg_attr(feature = "serde", serde(default))]
    pub ongoing_tags: TagRequirements,
}

impl EffectDef {
    pub fn new(name: impl Into<String>, duration: DurationPolicy) -> Self {
        Self {
            name: name.into(),
            duration,
            modifiers: Vec::new(),
            stacking: StackingPolicy::None,
            stack_limit: 0,
            ongoing_tags: TagRequirements::default(),
        }
    }

    pub fn with_modifier(mut self, modifier: ModifierDef) -> Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn with_stacking(mut self, stacking: StackingPolicy, stack_limit: u32) -> Self {
        self.stacking = stacking;
        self.stack_limit = stack_limit;
        self
    }

    pub fn with_ongoing_tags(mut self, requirements: TagRequirements) -> Self {
        self.ongoing_tags = requirements;
        self
    }

    /// Clamps `stack_count` to the stack limit, if any.
    pub fn clamp_stack_count(&self, stack_count: u32) -> u32 {
        if self.stack_limit > 0 {
            stack_count.min(self.stack_limit)
        } else {
            stack_count
        }
    }

    /// Attribute captures required by the modifier magnitudes, deduplicated.
    pub fn capture_definitions(&self) -> Vec<CaptureDefinition> {
        let mut definitions: Vec<CaptureDefinition> = Vec::new();
        for def in self.modifiers.iter().filter_map(|m| m.magnitude.capture_definition()) {
            if !definitions.contains(def) {
                definitions.push(def.clone());
            }
        }
        definitions
    }
}

/// One application of an [`EffectDef`].
#[derive(Clone, Debug)]
pub struct EffectSpec {
    def: Rc<EffectDef>,
    magnitudes: Vec<f32>,
    channels: Vec<EvaluationChannel>,
    pub captured_source_tags: TagContainer,
    pub captured_target_tags: TagContainer,
    set_by_caller: BTreeMap<String, f32>,
    stack_count: u32,
    instigator: Option<Weak<dyn EffectOwner>>,
    pub(crate) captures: CaptureSpecContainer,
}

impl EffectSpec {
    /// Fresh spec with zeroed magnitudes and channels resolved against `config`.
    pub fn new(def: Rc<EffectDef>, config: &AggregatorConfig) -> Self {
        let channels = def
            .modifiers
            .iter()
            .map(|m| config.resolve_channel(m.channel))
            .collect();
        let mut captures = CaptureSpecContainer::new();
        for definition in def.capture_definitions() {
            captures.add_capture_definition(definition);
        }

        Self {
            magnitudes: vec![0.0; def.modifiers.len()],
            channels,
            captured_source_tags: TagContainer::new(),
            captured_target_tags: TagContainer::new(),
            set_by_caller: BTreeMap::new(),
            stack_count: 1,
            instigator: None,
            captures,
            def,
        }
    }

    pub fn def(&self) -> &EffectDef {
        &self.def
    }

    pub fn captures(&self) -> &CaptureSpecContainer {
        &self.captures
    }

    pub fn captures_mut(&mut self) -> &mut CaptureSpecContainer {
        &mut self.captures
    }

    pub fn modifier_magnitude(&self, index: usize) -> f32 {
        self.magnitudes.get(index).copied().unwrap_or(0.0)
    }

    /// Magnitude of modifier `index` scaled by the stack count.
    pub fn stacked_modifier_magnitude(&self, index: usize) -> f32 {
        let Some(def) = self.def.modifiers.get(index) else {
            return 0.0;
        };
        def.op
            .stacked_magnitude(self.modifier_magnitude(index), self.stack_count)
    }

    pub fn stack_count(&self) -> u32 {
        self.stack_count
    }

    /// Sets the stack count, clamped to `1..=stack_limit`.
    pub fn set_stack_count(&mut self, stack_count: u32) {
        self.stack_count = self.def.clamp_stack_count(stack_count.max(1));
    }

    pub fn set_instigator(&mut self, instigator: Weak<dyn EffectOwner>) {
        self.instigator = Some(instigator);
    }

    /// True if applying `self` should add stacks to the active `existing` spec.
    pub fn stacks_onto(&self, existing: &EffectSpec) -> bool {
        if !Rc::ptr_eq(&self.def, &existing.def) {
            return false;
        }
        match self.def.stacking {
            StackingPolicy::None => false,
            StackingPolicy::AggregateByTarget => true,
            StackingPolicy::AggregateBySource => match (&self.instigator, &existing.instigator) {
                (Some(ours), Some(theirs)) => Weak::ptr_eq(ours, theirs),
                _ => false,
            },
        }
    }

    pub fn modifier_channel(&self, index: usize) -> EvaluationChannel {
        self.channels.get(index).copied().unwrap_or_default()
    }

    pub fn effect_tags(&self) -> EffectTags {
        EffectTags {
            source: self.captured_source_tags.clone(),
            target: self.captured_target_tags.clone(),
        }
    }

    pub fn set_set_by_caller_magnitude(&mut self, name: impl Into<String>, magnitude: f32) {
        self.set_by_caller.insert(name.into(), magnitude);
    }

    /// Caller-supplied magnitude, or 0.0 (logged) if it was never set.
    pub fn set_by_caller_magnitude(&self, name: &str) -> f32 {
        match self.set_by_caller.get(name) {
            Some(magnitude) => *magnitude,
            None => {
                tracing::error!(
                    "Set-by-caller magnitude '{}' was never set on effect '{}'; using 0.0",
                    name,
                    self.def.name
                );
                0.0
            }
        }
    }

    /// Evaluates every modifier magnitude. Stops at the first missing capture.
    pub fn calculate_modifier_magnitudes(&mut self) -> Result<(), EffectError> {
        for index in 0..self.def.modifiers.len() {
            self.magnitudes[index] = self.calculate_magnitude(index)?;
        }
        Ok(())
    }

    pub fn calculate_magnitude(&self, index: usize) -> Result<f32, EffectError> {
        let Some(def) = self.def.modifiers.get(index) else {
            return Ok(0.0);
        };
        match &def.magnitude {
            MagnitudeDef::Scalable(value) => Ok(*value),
            MagnitudeDef::AttributeBased(based) => based.calculate_magnitude(self),
            MagnitudeDef::SetByCaller { name } => Ok(self.set_by_caller_magnitude(name)),
        }
    }

    /// Recalculates modifier `index` if its magnitude reads a live capture of `changed`.
    ///
    /// Returns true if the magnitude was recalculated.
    pub fn attempt_recalculate_from_dependency_change(
        &mut self,
        index: usize,
        changed: &AggregatorRef,
    ) -> bool {
        let Some(definition) = self
            .def
            .modifiers
            .get(index)
            .and_then(|m| m.magnitude.capture_definition())
        else {
            return false;
        };
        let linked = self
            .captures
            .find_capture_spec(definition)
            .is_some_and(|capture| capture.should_refresh_linked_aggregator(Some(changed)));
        if !linked {
            return false;
        }

        match self.calculate_magnitude(index) {
            Ok(magnitude) => {
                self.magnitudes[index] = magnitude;
                true
            }
            Err(err) => {
                tracing::warn!("Failed to recalculate modifier {} of '{}': {}", index, self.def.name, err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureSource;

    fn strength_based(coefficient: f32) -> AttributeBasedFloat {
        AttributeBasedFloat::new(
            CaptureDefinition::new("Strength", CaptureSource::Source, false),
            coefficient,
        )
    }

    fn spec_with(def: EffectDef) -> EffectSpec {
        EffectSpec::new(Rc::new(def), &AggregatorConfig::default())
    }

    #[test]
    fn scalable_and_set_by_caller_magnitudes() {
        let def = EffectDef::new("Burn", DurationPolicy::Instant)
            .with_modifier(ModifierDef::new("Health", ModifierOp::Additive, MagnitudeDef::Scalable(-5.0)))
            .with_modifier(ModifierDef::new(
                "Health",
                ModifierOp::Additive,
                MagnitudeDef::SetByCaller { name: "Damage".into() },
            ));
        let mut spec = spec_with(def);
        spec.set_set_by_caller_magnitude("Damage", -12.0);
        spec.calculate_modifier_magnitudes().expect("no captures needed");

        assert_eq!(spec.modifier_magnitude(0), -5.0);
        assert_eq!(spec.modifier_magnitude(1), -12.0);
    }

    #[test]
    fn missing_set_by_caller_is_zero() {
        let spec = spec_with(EffectDef::new("Empty", DurationPolicy::Instant));
        assert_eq!(spec.set_by_caller_magnitude("Nope"), 0.0);
    }

    #[test]
    fn attribute_based_needs_its_capture() {
        let def = EffectDef::new("Smash", DurationPolicy::Instant).with_modifier(ModifierDef::new(
            "Health",
            ModifierOp::Additive,
            MagnitudeDef::AttributeBased(strength_based(-2.0)),
        ));
        let mut spec = spec_with(def);

        let err = spec.calculate_modifier_magnitudes().unwrap_err();
        assert!(matches!(err, EffectError::MissingCapture { side: CaptureSource::Source, .. }));
    }

    #[test]
    fn attribute_based_formula_and_calculation_kinds() {
        let strength = AggregatorRef::new(10.0);
        strength.add_aggregator_mod(
            5.0,
            ModifierOp::Additive,
            EvaluationChannel::Channel0,
            None,
            None,
            false,
            crate::handle::EffectHandle(950),
        );

        let mut based = strength_based(2.0);
        based.pre_multiply_additive = 1.0;
        based.post_multiply_additive = 3.0;
        let def = EffectDef::new("Smash", DurationPolicy::Instant).with_modifier(ModifierDef::new(
            "Health",
            ModifierOp::Additive,
            MagnitudeDef::AttributeBased(based.clone()),
        ));
        let mut spec = spec_with(def);
        spec.captures_mut()
            .find_capture_spec_mut(&based.backing)
            .expect("declared by the modifier")
            .set_aggregator(Some(strength.clone()));

        // 2 * (15 + 1) + 3
        assert_eq!(based.calculate_magnitude(&spec), Ok(35.0));

        based.calculation = AttributeCalculation::BaseValue;
        assert_eq!(based.calculate_magnitude(&spec), Ok(25.0));

        based.calculation = AttributeCalculation::BonusMagnitude;
        assert_eq!(based.calculate_magnitude(&spec), Ok(15.0));

        spec.calculate_modifier_magnitudes().expect("captured");
        assert_eq!(spec.modifier_magnitude(0), 35.0);

        strength.set_base_value(20.0, false);
        assert!(spec.attempt_recalculate_from_dependency_change(0, &strength));
        assert_eq!(spec.modifier_magnitude(0), 55.0);
        assert!(!spec.attempt_recalculate_from_dependency_change(0, &AggregatorRef::new(0.0)));
    }

    #[test]
    fn channels_resolve_against_config() {
        let def = EffectDef::new("Armor", DurationPolicy::Infinite).with_modifier(
            ModifierDef::new("Armor", ModifierOp::Additive, MagnitudeDef::Scalable(1.0))
                .in_channel(EvaluationChannel::Channel4),
        );
        let spec = spec_with(def);
        assert_eq!(spec.modifier_channel(0), EvaluationChannel::Channel0);
    }

    #[test]
    fn capture_definitions_are_deduplicated() {
        let def = EffectDef::new("Double", DurationPolicy::Instant)
            .with_modifier(ModifierDef::new(
                "Health",
                ModifierOp::Additive,
                MagnitudeDef::AttributeBased(strength_based(1.0)),
            ))
            .with_modifier(ModifierDef::new(
                "Mana",
                ModifierOp::Additive,
                MagnitudeDef::AttributeBased(strength_based(2.0)),
            ));
        assert_eq!(def.capture_definitions().len(), 1);
    }

    #[test]
    fn stack_counts_clamp_and_scale_magnitudes() {
        let def = Rc::new(
            EffectDef::new("Rage", DurationPolicy::Infinite)
                .with_modifier(ModifierDef::new("Damage", ModifierOp::Additive, MagnitudeDef::Scalable(4.0)))
                .with_stacking(StackingPolicy::AggregateByTarget, 5),
        );
        let mut spec = EffectSpec::new(Rc::clone(&def), &AggregatorConfig::default());
        spec.calculate_modifier_magnitudes().expect("no captures needed");

        spec.set_stack_count(9);
        assert_eq!(spec.stack_count(), 5);
        assert_eq!(spec.modifier_magnitude(0), 4.0);
        assert_eq!(spec.stacked_modifier_magnitude(0), 20.0);
        spec.set_stack_count(0);
        assert_eq!(spec.stack_count(), 1);

        let other = EffectSpec::new(def, &AggregatorConfig::default());
        assert!(other.stacks_onto(&spec));
        let unrelated = spec_with(EffectDef::new("Rage", DurationPolicy::Infinite));
        assert!(!unrelated.stacks_onto(&spec));
    }
}
