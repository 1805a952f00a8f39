use arrayvec::ArrayVec;
use strum::EnumCount;

use crate::channel::EvaluationChannel;

const CHANNEL_SLOTS: usize = <EvaluationChannel as EnumCount>::COUNT;

/// A display name bound to an evaluation channel.
///
/// Channels without an alias are considered unused when channels are allowed.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelAlias {
    pub channel: EvaluationChannel,
    pub alias: String,
}

impl ChannelAlias {
    pub fn new(channel: EvaluationChannel, alias: impl Into<String>) -> Self {
        Self {
            channel,
            alias: alias.into(),
        }
    }
}

/// Aggregation configuration constants and tunable parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AggregatorConfig {
    /// When false every modifier evaluates in `Channel0`, whatever its definition says.
    pub allow_evaluation_channels: bool,

    /// Aliases for the channels in use. A channel is valid only if it has one.
    pub channel_aliases: ArrayVec<ChannelAlias, CHANNEL_SLOTS>,
}

impl AggregatorConfig {
    // ===== compile-time constants =====
    /// Number of evaluation channels (`Channel0..Channel9`).
    pub const MAX_EVALUATION_CHANNELS: usize = CHANNEL_SLOTS;
    /// Nested dirty broadcasts on one aggregator beyond this depth are treated as a cycle.
    pub const MAX_BROADCAST_DEPTH: u32 = 10;
    /// Tolerance for every "nearly zero" guard in evaluation and reverse evaluation.
    pub const NEARLY_ZERO: f32 = 1.0e-8;

    pub const DEFAULT_CHANNEL_ALIAS: &'static str = "Default";

    pub fn new() -> Self {
        let mut channel_aliases = ArrayVec::new();
        channel_aliases.push(ChannelAlias::new(
            EvaluationChannel::Channel0,
            Self::DEFAULT_CHANNEL_ALIAS,
        ));
        Self {
            allow_evaluation_channels: false,
            channel_aliases,
        }
    }

    /// Config with channels enabled and the given aliases (in channel order of appearance).
    pub fn with_channels(aliases: impl IntoIterator<Item = ChannelAlias>) -> Self {
        let mut config = Self::new();
        config.allow_evaluation_channels = true;
        for alias in aliases {
            config.set_channel_alias(alias.channel, alias.alias);
        }
        config
    }

    /// Binds (or rebinds) an alias to a channel.
    pub fn set_channel_alias(&mut self, channel: EvaluationChannel, alias: impl Into<String>) {
        let alias = alias.into();
        if let Some(existing) = self.channel_aliases.iter_mut().find(|a| a.channel == channel) {
            existing.alias = alias;
            return;
        }
        // One slot per channel, so this cannot overflow once duplicates are merged above.
        self.channel_aliases.push(ChannelAlias::new(channel, alias));
    }

    pub fn channel_alias(&self, channel: EvaluationChannel) -> Option<&str> {
        self.channel_aliases
            .iter()
            .find(|a| a.channel == channel)
            .map(|a| a.alias.as_str())
    }

    /// Returns true if modifiers may be placed in `channel`.
    pub fn is_channel_valid(&self, channel: EvaluationChannel) -> bool {
        if self.allow_evaluation_channels {
            self.channel_alias(channel).is_some()
        } else {
            channel == EvaluationChannel::Channel0
        }
    }

    /// Maps a requested channel to the one modifiers will actually use.
    pub fn resolve_channel(&self, channel: EvaluationChannel) -> EvaluationChannel {
        if self.is_channel_valid(channel) {
            return channel;
        }
        if self.allow_evaluation_channels {
            tracing::warn!(
                "Evaluation channel {:?} has no alias; falling back to {:?}",
                channel,
                EvaluationChannel::Channel0
            );
        }
        EvaluationChannel::Channel0
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_disabled_by_default() {
        let config = AggregatorConfig::default();
        assert!(config.is_channel_valid(EvaluationChannel::Channel0));
        assert!(!config.is_channel_valid(EvaluationChannel::Channel3));
        assert_eq!(
            config.resolve_channel(EvaluationChannel::Channel3),
            EvaluationChannel::Channel0
        );
    }

    #[test]
    fn aliased_channels_resolve_to_themselves() {
        let config = AggregatorConfig::with_channels([
            ChannelAlias::new(EvaluationChannel::Channel1, "Armor"),
            ChannelAlias::new(EvaluationChannel::Channel2, "Resistances"),
        ]);
        assert_eq!(config.channel_alias(EvaluationChannel::Channel0), Some("Default"));
        assert_eq!(
            config.resolve_channel(EvaluationChannel::Channel2),
            EvaluationChannel::Channel2
        );
        assert_eq!(
            config.resolve_channel(EvaluationChannel::Channel5),
            EvaluationChannel::Channel0
        );
    }

    #[test]
    fn rebinding_an_alias_does_not_grow_the_table() {
        let mut config = AggregatorConfig::new();
        config.set_channel_alias(EvaluationChannel::Channel0, "Base");
        assert_eq!(config.channel_aliases.len(), 1);
        assert_eq!(config.channel_alias(EvaluationChannel::Channel0), Some("Base"));
    }
}
