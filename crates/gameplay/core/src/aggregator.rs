//! Per-attribute aggregator and its dirty broadcast.
//!
//! An [`Aggregator`] combines one base value with a [`ChannelContainer`] of
//! modifiers. It is shared through [`AggregatorRef`] because captures,
//! registries and deferred batches all need to reach the same instance.
//!
//! # Broadcast rules
//!
//! - Inside a [`DirtyBatch`] an aggregator with listeners only records itself
//!   and broadcasts once when the outermost batch ends.
//! - Each broadcast bumps a per-aggregator depth counter. Beyond
//!   [`AggregatorConfig::MAX_BROADCAST_DEPTH`] the chain is treated as a
//!   dependency cycle: only the recursive delegates run and a warning is logged.
//! - No `RefCell` borrow is held while delegates or dependents run, so they
//!   may freely call back into this or any other aggregator.

use std::cell::{Ref, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::attribute::AttributeId;
use crate::batch::DirtyBatch;
use crate::channel::EvaluationChannel;
use crate::config::AggregatorConfig;
use crate::container::ChannelContainer;
use crate::effect::EffectSpec;
use crate::handle::EffectHandle;
use crate::modifier::{EvaluateParams, Modifier, ModifierOp};
use crate::tags::TagRequirements;

/// Callback bound to an aggregator's dirty broadcast.
pub type DirtyCallback = Rc<dyn Fn(&AggregatorRef)>;

/// Base value plus layered modifiers for a single attribute.
#[derive(Default)]
pub struct Aggregator {
    base_value: f32,
    channels: ChannelContainer,
    dependents: BTreeSet<EffectHandle>,
    broadcasting_depth: u32,
    net_update_id: u32,
    on_dirty: Vec<DirtyCallback>,
    on_dirty_recursive: Vec<DirtyCallback>,
}

impl Aggregator {
    pub fn new(base_value: f32) -> Self {
        Self {
            base_value,
            ..Self::default()
        }
    }

    pub fn base_value(&self) -> f32 {
        self.base_value
    }

    pub fn channels(&self) -> &ChannelContainer {
        &self.channels
    }

    pub fn evaluate(&self, params: &EvaluateParams) -> f32 {
        self.channels.evaluate_with_base(self.base_value, params)
    }

    pub fn evaluate_to_channel(&self, params: &EvaluateParams, stop_at: EvaluationChannel) -> f32 {
        self.channels
            .evaluate_with_base_to_channel(self.base_value, params, stop_at)
    }

    pub fn evaluate_with_base(&self, base: f32, params: &EvaluateParams) -> f32 {
        self.channels.evaluate_with_base(base, params)
    }

    /// Base value that would evaluate to `final_value`, or `None` if any channel is not invertible.
    pub fn try_reverse_evaluate(&self, final_value: f32, params: &EvaluateParams) -> Option<f32> {
        self.channels.reverse_evaluate(final_value, params)
    }

    /// Best-effort inverse of [`evaluate`](Self::evaluate); returns `final_value` unchanged on failure.
    pub fn reverse_evaluate(&self, final_value: f32, params: &EvaluateParams) -> f32 {
        self.try_reverse_evaluate(final_value, params)
            .unwrap_or(final_value)
    }

    /// How far the evaluated value sits above the base value.
    pub fn evaluate_bonus(&self, params: &EvaluateParams) -> f32 {
        self.evaluate(params) - self.base_value
    }

    /// Marginal contribution of one active effect. Zero for invalid handles.
    pub fn evaluate_contribution(&self, params: &EvaluateParams, handle: EffectHandle) -> f32 {
        if !handle.is_valid() {
            return 0.0;
        }
        let mut without = params.clone();
        without.ignore_handles.push(handle);
        self.evaluate(params) - self.evaluate(&without)
    }

    /// Applies one operation permanently to `base`.
    ///
    /// Division by a nearly zero magnitude leaves `base` unchanged.
    pub fn static_exec_mod_on_base_value(base: f32, op: ModifierOp, magnitude: f32) -> f32 {
        match op {
            ModifierOp::Override => magnitude,
            ModifierOp::Additive => base + magnitude,
            ModifierOp::Multiplicative => base * magnitude,
            ModifierOp::Division if magnitude.abs() > AggregatorConfig::NEARLY_ZERO => base / magnitude,
            ModifierOp::Division => base,
        }
    }

    pub fn dependents(&self) -> impl Iterator<Item = EffectHandle> + '_ {
        self.dependents.iter().copied()
    }

    pub fn net_update_id(&self) -> u32 {
        self.net_update_id
    }

    pub fn broadcasting_depth(&self) -> u32 {
        self.broadcasting_depth
    }

    /// Copy of base value and modifiers only. Dependents, delegates and depth start empty.
    pub fn snapshot(&self) -> Aggregator {
        Self {
            base_value: self.base_value,
            channels: self.channels.clone(),
            ..Self::default()
        }
    }

    fn has_listeners(&self) -> bool {
        !self.dependents.is_empty() || !self.on_dirty.is_empty()
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("base_value", &self.base_value)
            .field("modifiers", &self.channels.modifier_count())
            .field("dependents", &self.dependents)
            .field("broadcasting_depth", &self.broadcasting_depth)
            .field("net_update_id", &self.net_update_id)
            .finish_non_exhaustive()
    }
}

/// Shared handle to an [`Aggregator`].
///
/// Every mutating operation that changes the evaluated value broadcasts dirty
/// unless stated otherwise.
#[derive(Clone, Debug)]
pub struct AggregatorRef(Rc<RefCell<Aggregator>>);

impl AggregatorRef {
    pub fn new(base_value: f32) -> Self {
        Self::from_aggregator(Aggregator::new(base_value))
    }

    pub fn from_aggregator(aggregator: Aggregator) -> Self {
        Self(Rc::new(RefCell::new(aggregator)))
    }

    /// Immutable view of the aggregator. Do not hold it across calls that may broadcast.
    pub fn borrow(&self) -> Ref<'_, Aggregator> {
        self.0.borrow()
    }

    pub fn ptr_eq(&self, other: &AggregatorRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<Aggregator>> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &Weak<RefCell<Aggregator>>) -> Option<Self> {
        weak.upgrade().map(Self)
    }

    // ===== queries =====

    pub fn base_value(&self) -> f32 {
        self.0.borrow().base_value
    }

    pub fn evaluate(&self, params: &EvaluateParams) -> f32 {
        self.0.borrow().evaluate(params)
    }

    pub fn evaluate_to_channel(&self, params: &EvaluateParams, stop_at: EvaluationChannel) -> f32 {
        self.0.borrow().evaluate_to_channel(params, stop_at)
    }

    pub fn evaluate_with_base(&self, base: f32, params: &EvaluateParams) -> f32 {
        self.0.borrow().evaluate_with_base(base, params)
    }

    pub fn reverse_evaluate(&self, final_value: f32, params: &EvaluateParams) -> f32 {
        self.0.borrow().reverse_evaluate(final_value, params)
    }

    pub fn try_reverse_evaluate(&self, final_value: f32, params: &EvaluateParams) -> Option<f32> {
        self.0.borrow().try_reverse_evaluate(final_value, params)
    }

    pub fn evaluate_bonus(&self, params: &EvaluateParams) -> f32 {
        self.0.borrow().evaluate_bonus(params)
    }

    pub fn evaluate_contribution(&self, params: &EvaluateParams, handle: EffectHandle) -> f32 {
        self.0.borrow().evaluate_contribution(params, handle)
    }

    pub fn net_update_id(&self) -> u32 {
        self.0.borrow().net_update_id
    }

    pub fn set_net_update_id(&self, id: u32) {
        self.0.borrow_mut().net_update_id = id;
    }

    pub fn dependents(&self) -> Vec<EffectHandle> {
        self.0.borrow().dependents().collect()
    }

    /// Every modifier with its channel.
    pub fn all_modifiers(&self) -> Vec<(EvaluationChannel, Modifier)> {
        self.0
            .borrow()
            .channels
            .all_modifiers()
            .into_iter()
            .map(|(channel, m)| (channel, m.clone()))
            .collect()
    }

    /// Detached copy of base value and modifiers.
    pub fn snapshot(&self) -> AggregatorRef {
        Self::from_aggregator(self.0.borrow().snapshot())
    }

    // ===== base value =====

    pub fn set_base_value(&self, value: f32, broadcast: bool) {
        self.0.borrow_mut().base_value = value;
        if broadcast {
            self.broadcast_on_dirty();
        }
    }

    /// Folds one operation into the base value permanently, then broadcasts.
    pub fn exec_mod_on_base_value(&self, op: ModifierOp, magnitude: f32) {
        {
            let mut agg = self.0.borrow_mut();
            agg.base_value = Aggregator::static_exec_mod_on_base_value(agg.base_value, op, magnitude);
        }
        self.broadcast_on_dirty();
    }

    // ===== modifiers =====

    #[allow(clippy::too_many_arguments)]
    pub fn add_aggregator_mod(
        &self,
        magnitude: f32,
        op: ModifierOp,
        channel: EvaluationChannel,
        source_requirements: Option<Rc<TagRequirements>>,
        target_requirements: Option<Rc<TagRequirements>>,
        is_predicted: bool,
        handle: EffectHandle,
    ) {
        self.0
            .borrow_mut()
            .channels
            .find_or_create_channel(channel)
            .add_modifier(
                magnitude,
                op,
                source_requirements,
                target_requirements,
                is_predicted,
                handle,
            );
        self.broadcast_on_dirty();
    }

    /// Removes every modifier owned by `handle`. Invalid handles are ignored.
    pub fn remove_aggregator_mod(&self, handle: EffectHandle) {
        if !handle.is_valid() {
            return;
        }
        self.0.borrow_mut().channels.remove_aggregator_mod(handle);
        self.broadcast_on_dirty();
    }

    /// Replaces `handle`'s modifiers for `attribute` with fresh ones from `spec`.
    ///
    /// The old modifiers are removed without a broadcast so listeners only
    /// ever observe the net change, once.
    pub fn update_aggregator_mod(
        &self,
        handle: EffectHandle,
        attribute: &AttributeId,
        spec: &EffectSpec,
        locally_generated: bool,
        new_handle: EffectHandle,
    ) {
        {
            let mut agg = self.0.borrow_mut();
            agg.channels.remove_aggregator_mod(handle);

            for (index, def) in spec.def().modifiers.iter().enumerate() {
                if &def.attribute != attribute {
                    continue;
                }
                agg.channels
                    .find_or_create_channel(spec.modifier_channel(index))
                    .add_modifier(
                        spec.stacked_modifier_magnitude(index),
                        def.op,
                        Some(Rc::clone(&def.source_tags)),
                        Some(Rc::clone(&def.target_tags)),
                        locally_generated,
                        new_handle,
                    );
            }
        }
        self.broadcast_on_dirty();
    }

    /// Appends another aggregator's modifiers without broadcasting.
    pub fn add_mods_from(&self, other: &AggregatorRef) {
        if self.ptr_eq(other) {
            let copy = self.0.borrow().channels.clone();
            self.0.borrow_mut().channels.add_mods_from(&copy);
            return;
        }
        let other = other.0.borrow();
        self.0.borrow_mut().channels.add_mods_from(&other.channels);
    }

    /// Replaces base value and modifiers with a copy of `other`'s. Nothing else is touched.
    pub fn take_snapshot_of(&self, other: &AggregatorRef) {
        if self.ptr_eq(other) {
            return;
        }
        let other = other.0.borrow();
        let mut agg = self.0.borrow_mut();
        agg.base_value = other.base_value;
        agg.channels = other.channels.clone();
    }

    // ===== dependents and delegates =====

    pub fn add_dependent(&self, handle: EffectHandle) {
        self.0.borrow_mut().dependents.insert(handle);
    }

    pub fn remove_dependent(&self, handle: EffectHandle) {
        self.0.borrow_mut().dependents.remove(&handle);
    }

    /// Rewrites modifier and dependent handles that appear as keys in `swapped`.
    pub fn on_active_effect_dependencies_swapped(
        &self,
        swapped: &BTreeMap<EffectHandle, EffectHandle>,
    ) {
        let mut agg = self.0.borrow_mut();
        agg.channels.swap_handles(swapped);

        let dependents = std::mem::take(&mut agg.dependents);
        agg.dependents = dependents
            .into_iter()
            .map(|handle| swapped.get(&handle).copied().unwrap_or(handle))
            .collect();
    }

    pub fn add_on_dirty(&self, callback: DirtyCallback) {
        self.0.borrow_mut().on_dirty.push(callback);
    }

    /// Delegates run instead of `on_dirty` once the broadcast depth ceiling is hit.
    pub fn add_on_dirty_recursive(&self, callback: DirtyCallback) {
        self.0.borrow_mut().on_dirty_recursive.push(callback);
    }

    /// Notifies delegates and dependents that the evaluated value may have changed.
    pub fn broadcast_on_dirty(&self) {
        let (has_listeners, depth) = {
            let agg = self.0.borrow();
            (agg.has_listeners(), agg.broadcasting_depth)
        };

        if has_listeners && DirtyBatch::is_locked() {
            tracing::trace!("Deferring dirty broadcast to the active batch");
            DirtyBatch::defer(self);
            return;
        }

        if depth > AggregatorConfig::MAX_BROADCAST_DEPTH {
            let (callbacks, base_value) = {
                let agg = self.0.borrow();
                (agg.on_dirty_recursive.clone(), agg.base_value)
            };
            for callback in &callbacks {
                callback(self);
            }
            tracing::warn!(
                "Dirty broadcast depth {} exceeded {} (base value {}); likely a cyclic attribute dependency, value may be stale",
                depth,
                AggregatorConfig::MAX_BROADCAST_DEPTH,
                base_value
            );
            return;
        }

        let callbacks = {
            let mut agg = self.0.borrow_mut();
            agg.broadcasting_depth += 1;
            agg.on_dirty.clone()
        };
        for callback in &callbacks {
            callback(self);
        }

        // Iterate a copy: nested broadcasts still see the live set.
        let dependents = self.dependents();
        let mut stale = Vec::new();
        for handle in dependents {
            match handle.owning_component() {
                Some(owner) => owner.on_attribute_dependency_changed(handle, self),
                None => stale.push(handle),
            }
        }

        let mut agg = self.0.borrow_mut();
        for handle in stale {
            agg.dependents.remove(&handle);
        }
        agg.broadcasting_depth = agg.broadcasting_depth.saturating_sub(1);
    }
}
