//! Attribute captures: how an effect spec reads another aggregator.
//!
//! A non-snapshot capture shares the live aggregator and registers the
//! effect as a dependent, so later changes flow back through
//! `on_attribute_dependency_changed`. A snapshot capture holds a private
//! copy taken at capture time and never refreshes.

use crate::aggregator::AggregatorRef;
use crate::attribute::AttributeId;
use crate::channel::EvaluationChannel;
use crate::component::AttributeComponent;
use crate::handle::EffectHandle;
use crate::modifier::{EvaluateParams, Modifier};

/// Which side of an effect application an attribute is captured from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CaptureSource {
    Source,
    Target,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CaptureDefinition {
    pub attribute: AttributeId,
    pub source: CaptureSource,
    /// Copy the aggregator at capture time instead of tracking it.
    #[cfg_attr(feature = "serde", serde(default))]
    pub snapshot: bool,
}

impl CaptureDefinition {
    pub fn new(attribute: impl Into<AttributeId>, source: CaptureSource, snapshot: bool) -> Self {
        Self {
            attribute: attribute.into(),
            source,
            snapshot,
        }
    }
}

/// One captured attribute. Every query returns `None` until the capture succeeds.
#[derive(Clone, Debug)]
pub struct AttributeCaptureSpec {
    definition: CaptureDefinition,
    aggregator: Option<AggregatorRef>,
}

impl AttributeCaptureSpec {
    pub fn new(definition: CaptureDefinition) -> Self {
        Self {
            definition,
            aggregator: None,
        }
    }

    pub fn definition(&self) -> &CaptureDefinition {
        &self.definition
    }

    pub fn has_valid_capture(&self) -> bool {
        self.aggregator.is_some()
    }

    pub fn set_aggregator(&mut self, aggregator: Option<AggregatorRef>) {
        self.aggregator = aggregator;
    }

    pub fn attempt_calculate_attribute_magnitude(&self, params: &EvaluateParams) -> Option<f32> {
        self.aggregator.as_ref().map(|agg| agg.evaluate(params))
    }

    pub fn attempt_calculate_attribute_magnitude_up_to_channel(
        &self,
        params: &EvaluateParams,
        channel: EvaluationChannel,
    ) -> Option<f32> {
        self.aggregator
            .as_ref()
            .map(|agg| agg.evaluate_to_channel(params, channel))
    }

    pub fn attempt_calculate_attribute_magnitude_with_base(
        &self,
        params: &EvaluateParams,
        base: f32,
    ) -> Option<f32> {
        self.aggregator
            .as_ref()
            .map(|agg| agg.evaluate_with_base(base, params))
    }

    pub fn attempt_calculate_attribute_base_value(&self) -> Option<f32> {
        self.aggregator.as_ref().map(AggregatorRef::base_value)
    }

    pub fn attempt_calculate_attribute_bonus_magnitude(&self, params: &EvaluateParams) -> Option<f32> {
        self.aggregator.as_ref().map(|agg| agg.evaluate_bonus(params))
    }

    /// `None` for invalid handles as well as missing captures.
    pub fn attempt_calculate_attribute_contribution_magnitude(
        &self,
        params: &EvaluateParams,
        handle: EffectHandle,
    ) -> Option<f32> {
        if !handle.is_valid() {
            return None;
        }
        self.aggregator
            .as_ref()
            .map(|agg| agg.evaluate_contribution(params, handle))
    }

    /// Detached copy of the captured aggregator.
    pub fn attempt_get_attribute_aggregator_snapshot(&self) -> Option<AggregatorRef> {
        self.aggregator.as_ref().map(AggregatorRef::snapshot)
    }

    /// Appends the captured modifiers to `target` without broadcasting.
    pub fn attempt_add_aggregator_mods_to_aggregator(&self, target: &AggregatorRef) -> bool {
        match &self.aggregator {
            Some(agg) => {
                target.add_mods_from(agg);
                true
            }
            None => false,
        }
    }

    pub fn attempt_gather_attribute_mods(&self) -> Option<Vec<(EvaluationChannel, Modifier)>> {
        self.aggregator.as_ref().map(AggregatorRef::all_modifiers)
    }

    /// Makes `handle` a dependent of the live aggregator. Snapshots are never linked.
    pub fn register_linked_aggregator_callback(&self, handle: EffectHandle) {
        if self.definition.snapshot {
            return;
        }
        if let Some(agg) = &self.aggregator {
            agg.add_dependent(handle);
        }
    }

    pub fn unregister_linked_aggregator_callback(&self, handle: EffectHandle) {
        if let Some(agg) = &self.aggregator {
            agg.remove_dependent(handle);
        }
    }

    /// True if a change to `changed` (or to anything, when `None`) should refresh this capture.
    pub fn should_refresh_linked_aggregator(&self, changed: Option<&AggregatorRef>) -> bool {
        if self.definition.snapshot {
            return false;
        }
        match (changed, &self.aggregator) {
            (None, _) => true,
            (Some(changed), Some(ours)) => ours.ptr_eq(changed),
            (Some(_), None) => false,
        }
    }

    /// Retargets a capture of `from` to `to`.
    ///
    /// Linked callbacks stay on `from`. Unregister them before swapping and
    /// register again afterwards.
    pub fn swap_aggregator(&mut self, from: &AggregatorRef, to: &AggregatorRef) {
        if self.aggregator.as_ref().is_some_and(|agg| agg.ptr_eq(from)) {
            self.aggregator = Some(to.clone());
        }
    }
}

/// Source- and target-side captures of one effect spec.
#[derive(Clone, Debug, Default)]
pub struct CaptureSpecContainer {
    source: Vec<AttributeCaptureSpec>,
    target: Vec<AttributeCaptureSpec>,
}

impl CaptureSpecContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an empty capture for `definition` unless one already exists.
    pub fn add_capture_definition(&mut self, definition: CaptureDefinition) {
        if self.find_capture_spec(&definition).is_some() {
            return;
        }
        self.side_mut(definition.source)
            .push(AttributeCaptureSpec::new(definition));
    }

    pub fn find_capture_spec(&self, definition: &CaptureDefinition) -> Option<&AttributeCaptureSpec> {
        self.side(definition.source)
            .iter()
            .find(|spec| spec.definition == *definition)
    }

    pub fn find_capture_spec_mut(
        &mut self,
        definition: &CaptureDefinition,
    ) -> Option<&mut AttributeCaptureSpec> {
        self.side_mut(definition.source)
            .iter_mut()
            .find(|spec| spec.definition == *definition)
    }

    /// Fills every pending capture on `side` from `component`.
    pub fn capture_from(&mut self, side: CaptureSource, component: &AttributeComponent) {
        for spec in self.side_mut(side) {
            if !spec.has_valid_capture() {
                spec.aggregator = component.capture_attribute(&spec.definition);
            }
        }
    }

    /// True if every capture has resolved, optionally restricted to one side.
    pub fn has_valid_captures(&self, side: Option<CaptureSource>) -> bool {
        self.iter()
            .filter(|spec| side.is_none_or(|side| spec.definition.source == side))
            .all(AttributeCaptureSpec::has_valid_capture)
    }

    pub fn has_non_snapshot_captures(&self) -> bool {
        self.iter().any(|spec| !spec.definition.snapshot)
    }

    pub fn register_linked_aggregator_callbacks(&self, handle: EffectHandle) {
        for spec in self.iter() {
            spec.register_linked_aggregator_callback(handle);
        }
    }

    pub fn unregister_linked_aggregator_callbacks(&self, handle: EffectHandle) {
        for spec in self.iter() {
            spec.unregister_linked_aggregator_callback(handle);
        }
    }

    pub fn swap_aggregator(&mut self, from: &AggregatorRef, to: &AggregatorRef) {
        for spec in self.source.iter_mut().chain(self.target.iter_mut()) {
            spec.swap_aggregator(from, to);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeCaptureSpec> {
        self.source.iter().chain(self.target.iter())
    }

    fn side(&self, side: CaptureSource) -> &Vec<AttributeCaptureSpec> {
        match side {
            CaptureSource::Source => &self.source,
            CaptureSource::Target => &self.target,
        }
    }

    fn side_mut(&mut self, side: CaptureSource) -> &mut Vec<AttributeCaptureSpec> {
        match side {
            CaptureSource::Source => &mut self.source,
            CaptureSource::Target => &mut self.target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::ModifierOp;

    fn live(attribute: &str) -> AttributeCaptureSpec {
        AttributeCaptureSpec::new(CaptureDefinition::new(attribute, CaptureSource::Source, false))
    }

    #[test]
    fn uncaptured_specs_answer_none() {
        let spec = live("Strength");
        let params = EvaluateParams::new();
        assert_eq!(spec.attempt_calculate_attribute_magnitude(&params), None);
        assert_eq!(spec.attempt_calculate_attribute_base_value(), None);
        assert!(spec.attempt_gather_attribute_mods().is_none());
        assert!(!spec.attempt_add_aggregator_mods_to_aggregator(&AggregatorRef::new(0.0)));
    }

    #[test]
    fn captured_specs_read_the_aggregator() {
        let agg = AggregatorRef::new(10.0);
        let handle = EffectHandle(900);
        agg.add_aggregator_mod(
            4.0,
            ModifierOp::Additive,
            EvaluationChannel::Channel0,
            None,
            None,
            false,
            handle,
        );

        let mut spec = live("Strength");
        spec.set_aggregator(Some(agg.clone()));
        let params = EvaluateParams::new();

        assert_eq!(spec.attempt_calculate_attribute_magnitude(&params), Some(14.0));
        assert_eq!(spec.attempt_calculate_attribute_base_value(), Some(10.0));
        assert_eq!(spec.attempt_calculate_attribute_bonus_magnitude(&params), Some(4.0));
        assert_eq!(spec.attempt_calculate_attribute_magnitude_with_base(&params, 0.0), Some(4.0));
        assert_eq!(
            spec.attempt_calculate_attribute_contribution_magnitude(&params, handle),
            Some(4.0)
        );
        assert_eq!(
            spec.attempt_calculate_attribute_contribution_magnitude(&params, EffectHandle::INVALID),
            None
        );
        assert_eq!(spec.attempt_gather_attribute_mods().map(|mods| mods.len()), Some(1));
    }

    #[test]
    fn snapshots_are_never_linked_or_refreshed() {
        let agg = AggregatorRef::new(1.0);
        let mut spec =
            AttributeCaptureSpec::new(CaptureDefinition::new("Armor", CaptureSource::Target, true));
        spec.set_aggregator(Some(agg.snapshot()));

        spec.register_linked_aggregator_callback(EffectHandle(910));
        assert!(agg.dependents().is_empty());
        assert!(!spec.should_refresh_linked_aggregator(None));
    }

    #[test]
    fn live_captures_refresh_only_for_their_aggregator() {
        let agg = AggregatorRef::new(1.0);
        let other = AggregatorRef::new(1.0);
        let mut spec = live("Armor");
        spec.set_aggregator(Some(agg.clone()));

        spec.register_linked_aggregator_callback(EffectHandle(920));
        assert_eq!(agg.dependents(), vec![EffectHandle(920)]);

        assert!(spec.should_refresh_linked_aggregator(None));
        assert!(spec.should_refresh_linked_aggregator(Some(&agg)));
        assert!(!spec.should_refresh_linked_aggregator(Some(&other)));

        spec.swap_aggregator(&agg, &other);
        assert!(spec.should_refresh_linked_aggregator(Some(&other)));
        assert!(!spec.should_refresh_linked_aggregator(Some(&agg)));
    }

    #[test]
    fn swapping_leaves_linked_callbacks_on_the_old_aggregator() {
        let old = AggregatorRef::new(1.0);
        let new = AggregatorRef::new(1.0);
        let mut spec = live("Armor");
        spec.set_aggregator(Some(old.clone()));
        spec.register_linked_aggregator_callback(EffectHandle(920));

        spec.swap_aggregator(&old, &new);
        assert_eq!(old.dependents(), vec![EffectHandle(920)]);
        assert!(new.dependents().is_empty());

        let mut moved = live("Armor");
        moved.set_aggregator(Some(old.clone()));
        moved.register_linked_aggregator_callback(EffectHandle(921));
        moved.unregister_linked_aggregator_callback(EffectHandle(921));
        moved.swap_aggregator(&old, &new);
        moved.register_linked_aggregator_callback(EffectHandle(921));
        assert_eq!(old.dependents(), vec![EffectHandle(920)]);
        assert_eq!(new.dependents(), vec![EffectHandle(921)]);
    }

    #[test]
    fn container_deduplicates_definitions() {
        let mut container = CaptureSpecContainer::new();
        let def = CaptureDefinition::new("Strength", CaptureSource::Source, false);
        container.add_capture_definition(def.clone());
        container.add_capture_definition(def.clone());
        container.add_capture_definition(CaptureDefinition::new("Strength", CaptureSource::Target, false));

        assert_eq!(container.iter().count(), 2);
        assert!(container.find_capture_spec(&def).is_some());
        assert!(!container.has_valid_captures(None));
        assert!(container.has_non_snapshot_captures());
    }
}
