//! Effect catalog loader.

use std::collections::BTreeSet;
use std::path::Path;

use gameplay_core::EffectDef;
use serde::{Deserialize, Serialize};

use crate::loaders::{LoadResult, read_file};

/// Effect catalog structure for RON files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectCatalog {
    pub effects: Vec<EffectDef>,
}

impl EffectCatalog {
    pub fn find(&self, name: &str) -> Option<&EffectDef> {
        self.effects.iter().find(|effect| effect.name == name)
    }
}

/// Loader for effect definitions from RON files.
pub struct EffectLoader;

impl EffectLoader {
    /// Load effect definitions from a RON file containing an [`EffectCatalog`].
    ///
    /// Effect names must be unique within the catalog.
    pub fn load(path: &Path) -> LoadResult<Vec<EffectDef>> {
        Ok(Self::load_catalog(path)?.effects)
    }

    pub fn load_catalog(path: &Path) -> LoadResult<EffectCatalog> {
        let content = read_file(path)?;
        let catalog: EffectCatalog = ron::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse effect catalog RON: {}", e))?;

        let mut seen = BTreeSet::new();
        for effect in &catalog.effects {
            if !seen.insert(effect.name.as_str()) {
                anyhow::bail!("Duplicate effect '{}' in {}", effect.name, path.display());
            }
        }

        Ok(catalog)
    }
}
