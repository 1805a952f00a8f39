//! Content factory for loading a whole data directory.

use std::path::{Path, PathBuf};

use gameplay_core::{AggregatorConfig, AttributeTable, EffectDef};

use crate::loaders::{AttributeLoader, ConfigLoader, EffectLoader, LoadResult};

/// Loads gameplay content from a data directory.
///
/// # Directory Structure
///
/// ```text
/// data_dir/
/// ├── aggregator.toml
/// ├── attributes.toml
/// └── effects.ron
/// ```
pub struct ContentFactory {
    data_dir: PathBuf,
}

impl ContentFactory {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Load aggregator configuration from `aggregator.toml`, or defaults if the file is absent.
    pub fn load_config(&self) -> LoadResult<AggregatorConfig> {
        let path = self.data_dir.join("aggregator.toml");
        if !path.exists() {
            return Ok(AggregatorConfig::default());
        }
        ConfigLoader::load(&path)
    }

    /// Load initial attributes from `attributes.toml`.
    pub fn load_attributes(&self) -> LoadResult<AttributeTable> {
        AttributeLoader::load(&self.data_dir.join("attributes.toml"))
    }

    /// Load effect definitions from `effects.ron`.
    pub fn load_effects(&self) -> LoadResult<Vec<EffectDef>> {
        EffectLoader::load(&self.data_dir.join("effects.ron"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_paths() {
        let factory = ContentFactory::new("/tmp/gameplay");
        assert_eq!(factory.data_dir(), Path::new("/tmp/gameplay"));
    }
}
