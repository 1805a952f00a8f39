use std::collections::BTreeMap;

use crate::channel::{EvaluationChannel, ModifierChannel};
use crate::handle::EffectHandle;
use crate::modifier::{EvaluateParams, Modifier};

/// Channels of one aggregator, evaluated in ascending channel order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelContainer {
    channels: BTreeMap<EvaluationChannel, ModifierChannel>,
}

impl ChannelContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_or_create_channel(&mut self, channel: EvaluationChannel) -> &mut ModifierChannel {
        self.channels.entry(channel).or_default()
    }

    pub fn channel(&self, channel: EvaluationChannel) -> Option<&ModifierChannel> {
        self.channels.get(&channel)
    }

    /// Folds `base` through every channel, lowest first.
    pub fn evaluate_with_base(&self, base: f32, params: &EvaluateParams) -> f32 {
        self.channels
            .values()
            .fold(base, |value, channel| channel.evaluate_with_base(value, params))
    }

    /// Like [`evaluate_with_base`](Self::evaluate_with_base) but stops after `stop_at` (inclusive).
    pub fn evaluate_with_base_to_channel(
        &self,
        base: f32,
        params: &EvaluateParams,
        stop_at: EvaluationChannel,
    ) -> f32 {
        self.channels
            .range(..=stop_at)
            .fold(base, |value, (_, channel)| channel.evaluate_with_base(value, params))
    }

    /// Walks channels highest first, undoing each fold.
    ///
    /// Any channel that cannot be inverted aborts the whole walk with `None`;
    /// partial reversals are never returned.
    pub fn reverse_evaluate(&self, final_value: f32, params: &EvaluateParams) -> Option<f32> {
        self.channels
            .values()
            .rev()
            .try_fold(final_value, |value, channel| channel.reverse_evaluate(value, params))
    }

    pub fn remove_aggregator_mod(&mut self, handle: EffectHandle) {
        for channel in self.channels.values_mut() {
            channel.remove_modifiers_for_handle(handle);
        }
    }

    pub fn swap_handles(&mut self, swapped: &BTreeMap<EffectHandle, EffectHandle>) {
        for channel in self.channels.values_mut() {
            channel.swap_handles(swapped);
        }
    }

    /// Appends every modifier of `other` into the matching channels here.
    pub fn add_mods_from(&mut self, other: &ChannelContainer) {
        for (index, channel) in &other.channels {
            self.find_or_create_channel(*index).add_mods_from(channel);
        }
    }

    /// Every modifier with the channel it lives in, channel order then op order.
    pub fn all_modifiers(&self) -> Vec<(EvaluationChannel, &Modifier)> {
        self.channels
            .iter()
            .flat_map(|(index, channel)| channel.iter().map(move |m| (*index, m)))
            .collect()
    }

    pub fn modifier_count(&self) -> usize {
        self.channels.values().map(ModifierChannel::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::ModifierOp;

    fn add(container: &mut ChannelContainer, channel: EvaluationChannel, magnitude: f32, op: ModifierOp) {
        container
            .find_or_create_channel(channel)
            .add_modifier(magnitude, op, None, None, false, EffectHandle::INVALID);
    }

    #[test]
    fn channels_run_ascending_regardless_of_creation_order() {
        let mut container = ChannelContainer::new();
        add(&mut container, EvaluationChannel::Channel1, 2.0, ModifierOp::Multiplicative);
        add(&mut container, EvaluationChannel::Channel0, 5.0, ModifierOp::Additive);

        // (10 + 5) * 2, not 10 * 2 + 5.
        assert_eq!(container.evaluate_with_base(10.0, &EvaluateParams::new()), 30.0);
    }

    #[test]
    fn evaluation_can_stop_at_a_channel() {
        let mut container = ChannelContainer::new();
        add(&mut container, EvaluationChannel::Channel0, 5.0, ModifierOp::Additive);
        add(&mut container, EvaluationChannel::Channel2, 2.0, ModifierOp::Multiplicative);

        let params = EvaluateParams::new();
        assert_eq!(
            container.evaluate_with_base_to_channel(10.0, &params, EvaluationChannel::Channel1),
            15.0
        );
        assert_eq!(
            container.evaluate_with_base_to_channel(10.0, &params, EvaluationChannel::Channel2),
            30.0
        );
    }

    #[test]
    fn reverse_walk_aborts_on_any_override() {
        let mut container = ChannelContainer::new();
        add(&mut container, EvaluationChannel::Channel0, 50.0, ModifierOp::Override);
        add(&mut container, EvaluationChannel::Channel1, 2.0, ModifierOp::Multiplicative);
        assert_eq!(container.reverse_evaluate(100.0, &EvaluateParams::new()), None);
    }

    #[test]
    fn reverse_walk_undoes_channels_in_reverse() {
        let mut container = ChannelContainer::new();
        add(&mut container, EvaluationChannel::Channel0, 5.0, ModifierOp::Additive);
        add(&mut container, EvaluationChannel::Channel1, 2.0, ModifierOp::Multiplicative);
        assert_eq!(container.reverse_evaluate(30.0, &EvaluateParams::new()), Some(10.0));
    }

    #[test]
    fn all_modifiers_reports_channels() {
        let mut container = ChannelContainer::new();
        add(&mut container, EvaluationChannel::Channel3, 1.0, ModifierOp::Additive);
        add(&mut container, EvaluationChannel::Channel0, 2.0, ModifierOp::Division);
        let all = container.all_modifiers();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, EvaluationChannel::Channel0);
        assert_eq!(all[1].0, EvaluationChannel::Channel3);
        assert_eq!(container.modifier_count(), 2);
    }
}
