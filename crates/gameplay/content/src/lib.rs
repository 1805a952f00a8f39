//! Data-driven gameplay content and loaders.
//!
//! This crate reads gameplay data files into `gameplay-core` types:
//! - Effect catalogs (data-driven via RON)
//! - Aggregator configuration and channel aliases (data-driven via TOML)
//! - Initial attribute tables (data-driven via TOML)
//!
//! All loaders deserialize `gameplay-core` types directly with serde.

#[cfg(feature = "loaders")]
pub mod loaders;

#[cfg(feature = "loaders")]
pub use loaders::{
    AttributeLoader, ConfigLoader, ContentFactory, EffectCatalog, EffectLoader, LoadResult,
};
