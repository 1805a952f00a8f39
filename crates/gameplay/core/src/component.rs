//! The owner of attributes, aggregators and active effects.
//!
//! [`AttributeComponent`] is what effect handles resolve to. It receives
//! dependency notifications from aggregators it captured, and every
//! aggregator it creates routes dirty broadcasts back into it, where the
//! evaluated value is written to the attribute table.
//!
//! Interior state lives in `RefCell`s. Borrows are kept to single
//! statements because almost every path can re-enter the component through
//! a broadcast.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

use crate::aggregator::AggregatorRef;
use crate::attribute::{AttributeId, AttributeSet, AttributeTable};
use crate::batch::{DirtyBatch, ScopedDirtyBatch};
use crate::capture::{CaptureDefinition, CaptureSource};
use crate::config::AggregatorConfig;
use crate::effect::{DurationPolicy, EffectDef, EffectSpec};
use crate::error::EffectError;
use crate::handle::{EffectHandle, EffectOwner, EffectTags};
use crate::modifier::EvaluateParams;
use crate::registry::{AggregatorRegistry, AttributeChangeSink};
use crate::tags::{GameplayTag, TagContainer};

/// Called with `(attribute, old_value, new_value)` after an attribute's current value changes.
pub type AttributeChangeListener = Rc<dyn Fn(&AttributeId, f32, f32)>;

#[derive(Clone, Debug)]
struct ActiveEffect {
    handle: EffectHandle,
    spec: EffectSpec,
    predicted: bool,
    /// Ongoing tag requirements unmet; modifiers are withdrawn from the aggregators.
    inhibited: bool,
}

pub struct AttributeComponent {
    self_ref: Weak<AttributeComponent>,
    config: AggregatorConfig,
    attributes: RefCell<AttributeTable>,
    registry: RefCell<AggregatorRegistry>,
    owned_tags: RefCell<TagContainer>,
    active_effects: RefCell<Vec<ActiveEffect>>,
    listeners: RefCell<Vec<(AttributeId, AttributeChangeListener)>>,
    net_simulating: Cell<bool>,
}

impl AttributeComponent {
    pub fn new(attributes: AttributeTable, config: AggregatorConfig) -> Rc<Self> {
        Rc::new_cyclic(|self_ref: &Weak<Self>| {
            let sink: Weak<dyn AttributeChangeSink> = self_ref.clone();
            Self {
                self_ref: self_ref.clone(),
                config,
                attributes: RefCell::new(attributes),
                registry: RefCell::new(AggregatorRegistry::with_sink(sink)),
                owned_tags: RefCell::new(TagContainer::new()),
                active_effects: RefCell::new(Vec::new()),
                listeners: RefCell::new(Vec::new()),
                net_simulating: Cell::new(false),
            }
        })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    // ===== tags =====

    /// Adds an owned tag and re-checks every active effect's ongoing tag requirements.
    pub fn add_owned_tag(&self, tag: impl Into<GameplayTag>) {
        self.owned_tags.borrow_mut().insert(tag);
        self.check_ongoing_tag_requirements();
    }

    pub fn remove_owned_tag(&self, tag: &GameplayTag) {
        self.owned_tags.borrow_mut().remove(tag);
        self.check_ongoing_tag_requirements();
    }

    pub fn owned_tags(&self) -> TagContainer {
        self.owned_tags.borrow().clone()
    }

    // ===== attributes =====

    pub fn has_attribute(&self, attribute: &AttributeId) -> bool {
        self.attributes.borrow().has_attribute(attribute)
    }

    /// Current (evaluated) value.
    pub fn numeric_attribute(&self, attribute: &AttributeId) -> Option<f32> {
        self.attributes.borrow().current_value(attribute)
    }

    pub fn numeric_attribute_base(&self, attribute: &AttributeId) -> Option<f32> {
        self.attributes.borrow().base_value(attribute)
    }

    /// Sets the base value and re-evaluates the current value.
    pub fn set_numeric_attribute_base(&self, attribute: &AttributeId, value: f32) -> Result<(), EffectError> {
        if !self.attributes.borrow_mut().set_base_value(attribute, value) {
            return Err(EffectError::UnknownAttribute {
                attribute: attribute.clone(),
            });
        }

        let aggregator = self.registry.borrow().find(attribute);
        match aggregator {
            Some(aggregator) => aggregator.set_base_value(value, true),
            None => self.internal_update_numeric_attribute(attribute, value, false),
        }
        Ok(())
    }

    pub fn add_attribute_change_listener(
        &self,
        attribute: impl Into<AttributeId>,
        listener: AttributeChangeListener,
    ) {
        self.listeners.borrow_mut().push((attribute.into(), listener));
    }

    /// The aggregator for `attribute`, if one has been created.
    pub fn aggregator(&self, attribute: &AttributeId) -> Option<AggregatorRef> {
        self.registry.borrow().find(attribute)
    }

    /// Live aggregator for a capture, or a private copy for snapshot captures.
    ///
    /// `None` if this component does not own the attribute.
    pub fn capture_attribute(&self, definition: &CaptureDefinition) -> Option<AggregatorRef> {
        let aggregator = self.find_or_create_aggregator(&definition.attribute)?;
        if definition.snapshot {
            Some(aggregator.snapshot())
        } else {
            Some(aggregator)
        }
    }

    fn find_or_create_aggregator(&self, attribute: &AttributeId) -> Option<AggregatorRef> {
        let base = self.attributes.borrow().base_value(attribute)?;
        Some(self.registry.borrow_mut().find_or_create(attribute, base))
    }

    // ===== effects =====

    /// Spec for applying `def` from this component, with source tags and source captures taken now.
    pub fn make_outgoing_spec(&self, def: Rc<EffectDef>) -> EffectSpec {
        let mut spec = EffectSpec::new(def, &self.config);
        let instigator: Weak<dyn EffectOwner> = self.self_ref.clone();
        spec.set_instigator(instigator);
        spec.captured_source_tags = self.owned_tags();
        spec.captures_mut().capture_from(CaptureSource::Source, self);
        spec
    }

    pub fn apply_effect_spec_to_target(
        &self,
        spec: &EffectSpec,
        target: &AttributeComponent,
        predicted: bool,
    ) -> Result<EffectHandle, EffectError> {
        target.apply_effect_spec_to_self(spec, predicted)
    }

    /// Applies `spec` to this component.
    ///
    /// Instant effects fold into base values and return [`EffectHandle::INVALID`].
    /// Infinite effects become active and return their new handle, or add
    /// stacks to a matching active effect and return its handle. All dirty
    /// broadcasts caused by the application are flushed once at the end.
    pub fn apply_effect_spec_to_self(
        &self,
        spec: &EffectSpec,
        predicted: bool,
    ) -> Result<EffectHandle, EffectError> {
        let _batch = ScopedDirtyBatch::new();

        let mut spec = spec.clone();
        spec.captured_target_tags = self.owned_tags();
        spec.captures_mut().capture_from(CaptureSource::Target, self);
        spec.calculate_modifier_magnitudes()?;

        match spec.def().duration {
            DurationPolicy::Instant => {
                self.execute_instant(&spec);
                Ok(EffectHandle::INVALID)
            }
            DurationPolicy::Infinite => match self.find_stackable_effect(&spec) {
                Some(handle) => Ok(self.add_stacks(handle, spec)),
                None => Ok(self.add_active_effect(spec, predicted)),
            },
        }
    }

    fn execute_instant(&self, spec: &EffectSpec) {
        for (index, def) in spec.def().modifiers.iter().enumerate() {
            let Some(aggregator) = self.find_or_create_aggregator(&def.attribute) else {
                tracing::debug!(
                    "Skipping modifier on {}: not owned by this component",
                    def.attribute
                );
                continue;
            };
            aggregator.exec_mod_on_base_value(def.op, spec.stacked_modifier_magnitude(index));
            self.attributes
                .borrow_mut()
                .set_base_value(&def.attribute, aggregator.base_value());
        }
    }

    fn add_active_effect(&self, spec: EffectSpec, predicted: bool) -> EffectHandle {
        let owner: Weak<dyn EffectOwner> = self.self_ref.clone();
        let handle = EffectHandle::generate(owner);
        let inhibited = !spec.def().ongoing_tags.requirements_met(&self.owned_tags());

        self.active_effects.borrow_mut().push(ActiveEffect {
            handle,
            spec: spec.clone(),
            predicted,
            inhibited,
        });

        if !inhibited {
            self.add_effect_modifiers(handle, &spec, predicted);
        }
        spec.captures().register_linked_aggregator_callbacks(handle);
        tracing::debug!(
            "Activated effect '{}' as {} (inhibited: {})",
            spec.def().name,
            handle,
            inhibited
        );
        handle
    }

    fn find_stackable_effect(&self, spec: &EffectSpec) -> Option<EffectHandle> {
        self.active_effects
            .borrow()
            .iter()
            .find(|effect| spec.stacks_onto(&effect.spec))
            .map(|effect| effect.handle)
    }

    /// Folds a new application into an active effect: the new spec replaces
    /// the old one and carries the combined stack count.
    fn add_stacks(&self, handle: EffectHandle, spec: EffectSpec) -> EffectHandle {
        let Some(existing) = self.active_effect(handle) else {
            return handle;
        };

        let mut stacked = spec;
        let stack_count = existing.spec.stack_count() + stacked.stack_count();
        stacked.set_stack_count(stack_count);

        // The new application may have captured different aggregators.
        existing.spec.captures().unregister_linked_aggregator_callbacks(handle);
        self.replace_active_spec(handle, &stacked);
        stacked.captures().register_linked_aggregator_callbacks(handle);

        if !existing.inhibited {
            self.update_effect_modifiers(handle, &stacked, existing.predicted);
        }
        tracing::debug!(
            "Effect '{}' ({}) now has {} stacks",
            stacked.def().name,
            handle,
            stacked.stack_count()
        );
        handle
    }

    /// Removes an active effect and all of its modifiers. Returns false for unknown handles.
    pub fn remove_active_effect(&self, handle: EffectHandle) -> bool {
        let removed = {
            let mut effects = self.active_effects.borrow_mut();
            effects
                .iter()
                .position(|effect| effect.handle == handle)
                .map(|index| effects.remove(index))
        };
        let Some(effect) = removed else {
            return false;
        };

        {
            let _batch = ScopedDirtyBatch::new();
            effect.spec.captures().unregister_linked_aggregator_callbacks(handle);
            if !effect.inhibited {
                self.remove_effect_modifiers(handle, &effect.spec);
            }
        }

        handle.release();
        tracing::debug!("Removed effect '{}' ({})", effect.spec.def().name, handle);
        true
    }

    /// Removes `stacks` stacks of an active effect; removing all of them removes the effect.
    ///
    /// Returns false for unknown handles.
    pub fn remove_active_effect_stacks(&self, handle: EffectHandle, stacks: u32) -> bool {
        let Some(effect) = self.active_effect(handle) else {
            return false;
        };
        if stacks >= effect.spec.stack_count() {
            return self.remove_active_effect(handle);
        }

        let mut spec = effect.spec;
        spec.set_stack_count(spec.stack_count() - stacks);
        self.replace_active_spec(handle, &spec);
        if !effect.inhibited {
            let _batch = ScopedDirtyBatch::new();
            self.update_effect_modifiers(handle, &spec, effect.predicted);
        }
        true
    }

    pub fn active_effect_count(&self) -> usize {
        self.active_effects.borrow().len()
    }

    pub fn active_effect_handles(&self) -> Vec<EffectHandle> {
        self.active_effects.borrow().iter().map(|effect| effect.handle).collect()
    }

    pub fn active_effect_stack_count(&self, handle: EffectHandle) -> Option<u32> {
        self.active_effect(handle).map(|effect| effect.spec.stack_count())
    }

    /// Whether an active effect is currently inhibited by its ongoing tag requirements.
    pub fn is_active_effect_inhibited(&self, handle: EffectHandle) -> Option<bool> {
        self.active_effect(handle).map(|effect| effect.inhibited)
    }

    /// Evaluated magnitude of modifier `index` of an active effect, for a single stack.
    pub fn active_effect_magnitude(&self, handle: EffectHandle, index: usize) -> Option<f32> {
        self.active_effects
            .borrow()
            .iter()
            .find(|effect| effect.handle == handle)
            .map(|effect| effect.spec.modifier_magnitude(index))
    }

    // ===== replication =====

    /// Marks this component as a simulated proxy whose values come from the network.
    pub fn set_net_simulating(&self, simulating: bool) {
        self.net_simulating.set(simulating);
    }

    pub fn is_net_simulating(&self) -> bool {
        self.net_simulating.get()
    }

    /// Accepts a replicated final value for `attribute`.
    ///
    /// When net-simulating, the base value is reconstructed from `final_value`
    /// and local predicted modifiers are layered back on top.
    pub fn receive_replicated_attribute(&self, attribute: &AttributeId, final_value: f32) {
        DirtyBatch::begin_net_receive_lock();

        let old_value = self.numeric_attribute(attribute);
        self.attributes
            .borrow_mut()
            .set_current_value(attribute, final_value);

        match self.aggregator(attribute) {
            Some(aggregator) => aggregator.broadcast_on_dirty(),
            None => {
                self.attributes.borrow_mut().set_base_value(attribute, final_value);
                if let Some(old_value) = old_value {
                    self.notify_listeners(attribute, old_value, final_value);
                }
            }
        }

        DirtyBatch::end_net_receive_lock();
    }

    // ===== internals =====

    fn active_effect(&self, handle: EffectHandle) -> Option<ActiveEffect> {
        self.active_effects
            .borrow()
            .iter()
            .find(|effect| effect.handle == handle)
            .cloned()
    }

    fn replace_active_spec(&self, handle: EffectHandle, spec: &EffectSpec) {
        if let Some(stored) = self
            .active_effects
            .borrow_mut()
            .iter_mut()
            .find(|effect| effect.handle == handle)
        {
            stored.spec = spec.clone();
        }
    }

    fn add_effect_modifiers(&self, handle: EffectHandle, spec: &EffectSpec, predicted: bool) {
        for (index, def) in spec.def().modifiers.iter().enumerate() {
            let Some(aggregator) = self.find_or_create_aggregator(&def.attribute) else {
                tracing::debug!(
                    "Skipping modifier on {}: not owned by this component",
                    def.attribute
                );
                continue;
            };
            aggregator.add_aggregator_mod(
                spec.stacked_modifier_magnitude(index),
                def.op,
                spec.modifier_channel(index),
                Some(Rc::clone(&def.source_tags)),
                Some(Rc::clone(&def.target_tags)),
                predicted,
                handle,
            );
        }
    }

    fn remove_effect_modifiers(&self, handle: EffectHandle, spec: &EffectSpec) {
        for attribute in modified_attributes(spec) {
            if let Some(aggregator) = self.aggregator(attribute) {
                aggregator.remove_aggregator_mod(handle);
            }
        }
    }

    fn update_effect_modifiers(&self, handle: EffectHandle, spec: &EffectSpec, predicted: bool) {
        for attribute in modified_attributes(spec) {
            if let Some(aggregator) = self.aggregator(attribute) {
                aggregator.update_aggregator_mod(handle, attribute, spec, predicted, handle);
            }
        }
    }

    /// Withdraws or restores the modifiers of every active effect whose
    /// ongoing tag requirements changed state against the owned tags.
    fn check_ongoing_tag_requirements(&self) {
        let tags = self.owned_tags();
        let effects = self.active_effects.borrow().clone();
        let _batch = ScopedDirtyBatch::new();

        for effect in effects {
            let inhibited = !effect.spec.def().ongoing_tags.requirements_met(&tags);
            if inhibited == effect.inhibited {
                continue;
            }
            // Flag first so delegates fired by the change see the new state.
            if let Some(stored) = self
                .active_effects
                .borrow_mut()
                .iter_mut()
                .find(|stored| stored.handle == effect.handle)
            {
                stored.inhibited = inhibited;
            }

            if inhibited {
                self.remove_effect_modifiers(effect.handle, &effect.spec);
            } else {
                self.add_effect_modifiers(effect.handle, &effect.spec, effect.predicted);
            }
            tracing::debug!(
                "Effect '{}' ({}) inhibited: {}",
                effect.spec.def().name,
                effect.handle,
                inhibited
            );
        }
    }

    fn internal_update_numeric_attribute(&self, attribute: &AttributeId, new_value: f32, from_recursive: bool) {
        let old_value = {
            let mut attributes = self.attributes.borrow_mut();
            let old = attributes.current_value(attribute);
            attributes.set_current_value(attribute, new_value);
            old
        };
        if from_recursive {
            return;
        }
        if let Some(old_value) = old_value {
            self.notify_listeners(attribute, old_value, new_value);
        }
    }

    fn notify_listeners(&self, attribute: &AttributeId, old_value: f32, new_value: f32) {
        let listeners: Vec<AttributeChangeListener> = self
            .listeners
            .borrow()
            .iter()
            .filter(|(id, _)| id == attribute)
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener(attribute, old_value, new_value);
        }
    }
}

impl AttributeChangeSink for AttributeComponent {
    fn on_attribute_aggregator_dirty(
        &self,
        attribute: &AttributeId,
        aggregator: &AggregatorRef,
        from_recursive: bool,
    ) {
        let mut params = EvaluateParams::new();

        if self.net_simulating.get() {
            let net_update_id = DirtyBatch::net_update_id();
            if DirtyBatch::is_from_network_update() && aggregator.net_update_id() != net_update_id {
                // The current value holds the replicated final value; recover the base from it.
                let replicated = self
                    .numeric_attribute(attribute)
                    .unwrap_or_else(|| aggregator.base_value());
                let base = aggregator.reverse_evaluate(replicated, &params);
                tracing::debug!(
                    "Reconstructed base {} for {} from replicated value {}",
                    base,
                    attribute,
                    replicated
                );
                aggregator.set_base_value(base, false);
                aggregator.set_net_update_id(net_update_id);
                self.attributes.borrow_mut().set_base_value(attribute, base);
            }
            params.include_predictive_mods = true;
        }

        let new_value = aggregator.evaluate(&params);
        self.internal_update_numeric_attribute(attribute, new_value, from_recursive);
    }
}

impl EffectOwner for AttributeComponent {
    fn on_attribute_dependency_changed(&self, handle: EffectHandle, changed: &AggregatorRef) {
        let Some(effect) = self.active_effect(handle) else {
            return;
        };

        // Recalculate outside any borrow: evaluation can read our captured tags.
        let mut spec = effect.spec;
        let mut attributes: Vec<AttributeId> = Vec::new();
        for index in 0..spec.def().modifiers.len() {
            if spec.attempt_recalculate_from_dependency_change(index, changed) {
                let attribute = &spec.def().modifiers[index].attribute;
                if !attributes.contains(attribute) {
                    attributes.push(attribute.clone());
                }
            }
        }
        if attributes.is_empty() {
            return;
        }

        self.replace_active_spec(handle, &spec);
        if effect.inhibited {
            return;
        }

        for attribute in &attributes {
            if let Some(aggregator) = self.aggregator(attribute) {
                aggregator.update_aggregator_mod(handle, attribute, &spec, effect.predicted, handle);
            }
        }
    }

    fn captured_effect_tags(&self, handle: EffectHandle) -> Option<EffectTags> {
        self.active_effects
            .borrow()
            .iter()
            .find(|effect| effect.handle == handle)
            .map(|effect| effect.spec.effect_tags())
    }
}

impl Drop for AttributeComponent {
    fn drop(&mut self) {
        for effect in self.active_effects.get_mut().drain(..) {
            effect.handle.release();
        }
    }
}

fn modified_attributes(spec: &EffectSpec) -> BTreeSet<&AttributeId> {
    spec.def().modifiers.iter().map(|m| &m.attribute).collect()
}
