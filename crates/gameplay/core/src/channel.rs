//! Evaluation channels and the per-channel modifier fold.
//!
//! A channel folds its modifiers over a base value as
//!
//! ```text
//! ((base + additive) * multiplicative) / division
//! ```
//!
//! where each term is a sum-with-bias over the qualifying modifiers of that
//! op: `bias + Σ(magnitude - bias)`. An empty op list therefore reduces to the
//! op's identity. The first qualifying `Override` replaces the fold entirely.

use std::collections::BTreeMap;
use std::rc::Rc;

use strum::{EnumCount, EnumIter, FromRepr};

use crate::config::AggregatorConfig;
use crate::handle::EffectHandle;
use crate::modifier::{EvaluateParams, Modifier, ModifierOp};
use crate::tags::TagRequirements;

/// Ordered evaluation stage. Lower channels feed their result into higher ones.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumCount,
    EnumIter,
    FromRepr,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum EvaluationChannel {
    #[default]
    Channel0,
    Channel1,
    Channel2,
    Channel3,
    Channel4,
    Channel5,
    Channel6,
    Channel7,
    Channel8,
    Channel9,
}

impl EvaluationChannel {
    pub const fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::from_repr(index)
    }
}

/// Modifiers of one channel, kept in four insertion-ordered lists by op.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModifierChannel {
    mods: [Vec<Modifier>; ModifierOp::COUNT],
}

impl ModifierChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a modifier to the list for `op`. Magnitudes are not validated.
    pub fn add_modifier(
        &mut self,
        magnitude: f32,
        op: ModifierOp,
        source_requirements: Option<Rc<TagRequirements>>,
        target_requirements: Option<Rc<TagRequirements>>,
        is_predicted: bool,
        handle: EffectHandle,
    ) {
        self.mods[op.index()].push(Modifier {
            evaluated_magnitude: magnitude,
            op,
            source_requirements,
            target_requirements,
            is_predicted,
            handle,
        });
    }

    /// Drops every modifier owned by `handle`. Unknown handles are a no-op.
    pub fn remove_modifiers_for_handle(&mut self, handle: EffectHandle) {
        for list in &mut self.mods {
            list.retain(|m| m.handle != handle);
        }
    }

    pub fn modifiers(&self, op: ModifierOp) -> &[Modifier] {
        &self.mods[op.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Modifier> {
        self.mods.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.mods.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.iter().all(Vec::is_empty)
    }

    pub fn evaluate_with_base(&self, base: f32, params: &EvaluateParams) -> f32 {
        if let Some(over) = self.qualifying_override(params) {
            return over.evaluated_magnitude;
        }

        let additive = self.sum_mods(ModifierOp::Additive, params);
        let multiplicative = self.sum_mods(ModifierOp::Multiplicative, params);
        let mut division = self.sum_mods(ModifierOp::Division, params);

        if division.abs() <= AggregatorConfig::NEARLY_ZERO {
            tracing::warn!(
                "Division sum {} is nearly zero; clamping to 1.0 (base {}, additive {}, multiplicative {})",
                division,
                base,
                additive,
                multiplicative
            );
            division = 1.0;
        }

        ((base + additive) * multiplicative) / division
    }

    /// Solves the fold for the base value that produces `final_value`.
    ///
    /// Returns `None` if an override qualifies or the multiplicative sum is
    /// not positive enough to divide by.
    pub fn reverse_evaluate(&self, final_value: f32, params: &EvaluateParams) -> Option<f32> {
        if self.qualifying_override(params).is_some() {
            return None;
        }

        let additive = self.sum_mods(ModifierOp::Additive, params);
        let multiplicative = self.sum_mods(ModifierOp::Multiplicative, params);
        let mut division = self.sum_mods(ModifierOp::Division, params);

        if multiplicative <= AggregatorConfig::NEARLY_ZERO {
            return None;
        }
        // Mirror the forward clamp so a round trip recovers the base.
        if division.abs() <= AggregatorConfig::NEARLY_ZERO {
            division = 1.0;
        }

        Some(final_value * division / multiplicative - additive)
    }

    /// Rewrites handles that appear as keys in `swapped`.
    pub fn swap_handles(&mut self, swapped: &BTreeMap<EffectHandle, EffectHandle>) {
        for m in self.mods.iter_mut().flatten() {
            if let Some(new_handle) = swapped.get(&m.handle) {
                m.handle = *new_handle;
            }
        }
    }

    /// Appends copies of every modifier in `other`, preserving op and order.
    pub fn add_mods_from(&mut self, other: &ModifierChannel) {
        for (ours, theirs) in self.mods.iter_mut().zip(&other.mods) {
            ours.extend(theirs.iter().cloned());
        }
    }

    fn qualifying_override(&self, params: &EvaluateParams) -> Option<&Modifier> {
        self.modifiers(ModifierOp::Override)
            .iter()
            .find(|m| m.qualifies(params))
    }

    fn sum_mods(&self, op: ModifierOp, params: &EvaluateParams) -> f32 {
        let bias = op.bias();
        self.modifiers(op)
            .iter()
            .filter(|m| m.qualifies(params))
            .fold(bias, |sum, m| sum + (m.evaluated_magnitude - bias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1.0e-4;

    fn add(channel: &mut ModifierChannel, magnitude: f32, op: ModifierOp, handle: u32) {
        channel.add_modifier(magnitude, op, None, None, false, EffectHandle(handle));
    }

    #[test]
    fn empty_channel_is_identity() {
        let channel = ModifierChannel::new();
        for base in [-50.0, 0.0, 3.5, 1.0e6] {
            assert_eq!(channel.evaluate_with_base(base, &EvaluateParams::new()), base);
        }
    }

    #[test]
    fn additive_order_does_not_matter() {
        let orders = [[5.0, 3.0, -2.0], [-2.0, 5.0, 3.0], [3.0, -2.0, 5.0]];
        for order in orders {
            let mut channel = ModifierChannel::new();
            for magnitude in order {
                add(&mut channel, magnitude, ModifierOp::Additive, 0);
            }
            assert_eq!(channel.evaluate_with_base(10.0, &EvaluateParams::new()), 16.0);
        }
    }

    #[test]
    fn multiplicative_mods_sum_with_bias() {
        let mut channel = ModifierChannel::new();
        add(&mut channel, 2.0, ModifierOp::Multiplicative, 0);
        add(&mut channel, 3.0, ModifierOp::Multiplicative, 0);
        // 1 + (2 - 1) + (3 - 1) = 4, not 2 * 3.
        assert_eq!(channel.evaluate_with_base(10.0, &EvaluateParams::new()), 40.0);
    }

    #[test]
    fn first_qualifying_override_wins() {
        let mut channel = ModifierChannel::new();
        add(&mut channel, 10.0, ModifierOp::Additive, 0);
        add(&mut channel, 7.0, ModifierOp::Override, 1);
        add(&mut channel, 9.0, ModifierOp::Override, 2);
        let params = EvaluateParams::new();
        assert_eq!(channel.evaluate_with_base(100.0, &params), 7.0);

        let params = params.ignoring(EffectHandle(1));
        assert_eq!(channel.evaluate_with_base(100.0, &params), 9.0);
    }

    #[test]
    fn near_zero_division_is_clamped() {
        let mut channel = ModifierChannel::new();
        add(&mut channel, 4.0, ModifierOp::Additive, 0);
        add(&mut channel, 3.0, ModifierOp::Multiplicative, 0);
        // Division sum: 1 + (0.5 - 1) + (0.5 - 1) = 0.
        add(&mut channel, 0.5, ModifierOp::Division, 0);
        add(&mut channel, 0.5, ModifierOp::Division, 0);
        assert_eq!(channel.evaluate_with_base(6.0, &EvaluateParams::new()), 30.0);
    }

    #[test]
    fn reverse_evaluate_round_trips_without_overrides() {
        let mut channel = ModifierChannel::new();
        add(&mut channel, 12.0, ModifierOp::Additive, 0);
        add(&mut channel, 1.5, ModifierOp::Multiplicative, 0);
        add(&mut channel, 2.0, ModifierOp::Division, 0);
        let params = EvaluateParams::new();

        for base in [0.0, 17.0, -4.25, 250.0] {
            let final_value = channel.evaluate_with_base(base, &params);
            let recovered = channel
                .reverse_evaluate(final_value, &params)
                .expect("invertible channel");
            assert!((recovered - base).abs() < EPS, "{recovered} != {base}");
        }
    }

    #[test]
    fn reverse_evaluate_refuses_overrides_and_zero_multipliers() {
        let mut overridden = ModifierChannel::new();
        add(&mut overridden, 5.0, ModifierOp::Override, 0);
        assert_eq!(overridden.reverse_evaluate(5.0, &EvaluateParams::new()), None);

        let mut zeroed = ModifierChannel::new();
        add(&mut zeroed, 0.0, ModifierOp::Multiplicative, 0);
        assert_eq!(zeroed.reverse_evaluate(5.0, &EvaluateParams::new()), None);
    }

    #[test]
    fn reverse_evaluate_clamps_cancelling_division() {
        let mut channel = ModifierChannel::new();
        add(&mut channel, 2.0, ModifierOp::Additive, 0);
        add(&mut channel, 0.5, ModifierOp::Division, 0);
        add(&mut channel, 0.5, ModifierOp::Division, 0);
        let params = EvaluateParams::new();

        let final_value = channel.evaluate_with_base(10.0, &params);
        assert_eq!(final_value, 12.0);
        assert_eq!(channel.reverse_evaluate(final_value, &params), Some(10.0));
    }

    #[test]
    fn removal_is_scoped_to_one_handle() {
        let mut channel = ModifierChannel::new();
        for magnitude in [1.0, 2.0, 3.0] {
            add(&mut channel, magnitude, ModifierOp::Additive, 1);
        }
        add(&mut channel, 10.0, ModifierOp::Additive, 2);
        add(&mut channel, 2.0, ModifierOp::Multiplicative, 2);

        channel.remove_modifiers_for_handle(EffectHandle(1));
        channel.remove_modifiers_for_handle(EffectHandle(99));

        assert_eq!(channel.len(), 2);
        assert!(channel.iter().all(|m| m.handle() == EffectHandle(2)));
        assert_eq!(channel.evaluate_with_base(0.0, &EvaluateParams::new()), 20.0);
    }

    #[test]
    fn channel_indices_round_trip() {
        assert_eq!(EvaluationChannel::COUNT, AggregatorConfig::MAX_EVALUATION_CHANNELS);
        assert_eq!(EvaluationChannel::from_index(3), Some(EvaluationChannel::Channel3));
        assert_eq!(EvaluationChannel::from_index(10), None);
        assert!(EvaluationChannel::Channel2 < EvaluationChannel::Channel7);
    }
}
