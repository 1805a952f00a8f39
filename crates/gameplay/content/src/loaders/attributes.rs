//! Initial attribute table loader.

use std::collections::BTreeMap;
use std::path::Path;

use gameplay_core::AttributeTable;
use serde::Deserialize;

use crate::loaders::{LoadResult, read_file};

/// `[attributes]` table of base values, e.g. `Health = 100.0`.
#[derive(Debug, Deserialize)]
struct AttributeFile {
    attributes: BTreeMap<String, f32>,
}

/// Loader for initial attribute values from TOML files.
pub struct AttributeLoader;

impl AttributeLoader {
    /// Every attribute starts with its current value equal to its base value.
    pub fn load(path: &Path) -> LoadResult<AttributeTable> {
        let content = read_file(path)?;
        let file: AttributeFile = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse attributes TOML: {}", e))?;

        if let Some((name, value)) = file.attributes.iter().find(|(_, value)| !value.is_finite()) {
            anyhow::bail!("Attribute {} has a non-finite base value {}", name, value);
        }

        Ok(file.attributes.into_iter().collect())
    }
}
