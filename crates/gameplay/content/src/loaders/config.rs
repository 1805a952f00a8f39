//! Aggregator configuration loader.

use std::collections::BTreeSet;
use std::path::Path;

use gameplay_core::AggregatorConfig;

use crate::loaders::{LoadResult, read_file};

/// Loader for aggregator configuration from TOML files.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config data from a TOML file.
    ///
    /// Missing keys take their defaults. A channel may be aliased only once.
    pub fn load(path: &Path) -> LoadResult<AggregatorConfig> {
        let content = read_file(path)?;
        let config: AggregatorConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config TOML: {}", e))?;

        let mut channels = BTreeSet::new();
        for alias in &config.channel_aliases {
            if !channels.insert(alias.channel) {
                anyhow::bail!("Channel {:?} is aliased more than once", alias.channel);
            }
        }

        Ok(config)
    }
}
