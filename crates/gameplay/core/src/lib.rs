//! Attribute aggregation and effect modifiers for gameplay systems.
//!
//! `gameplay-core` computes the final value of numeric attributes (Health,
//! Damage, Mana, ...) from a base value and the modifiers contributed by
//! active effects. Evaluation is deterministic and synchronous; all shared
//! state is single-threaded (`Rc`/`RefCell`, per-thread batch state).
//!
//! Layers, leaf first:
//!
//! ```text
//! Modifier → ModifierChannel → ChannelContainer → Aggregator
//!                                                    │ dirty
//!                       DirtyBatch (deferral) ◄──────┤
//!                                                    ▼
//!              AggregatorRegistry ──► AttributeComponent ──► listeners
//! ```
//!
//! Effects reach aggregators through [`EffectSpec`]s applied by an
//! [`AttributeComponent`]; attribute-based magnitudes read other aggregators
//! through captures and are refreshed when those aggregators change.
pub mod aggregator;
pub mod attribute;
pub mod batch;
pub mod capture;
pub mod channel;
pub mod component;
pub mod config;
pub mod container;
pub mod effect;
pub mod error;
pub mod handle;
pub mod modifier;
pub mod registry;
pub mod tags;

pub use aggregator::{Aggregator, AggregatorRef, DirtyCallback};
pub use attribute::{AttributeData, AttributeId, AttributeSet, AttributeTable};
pub use batch::{DirtyBatch, ScopedDirtyBatch};
pub use capture::{AttributeCaptureSpec, CaptureDefinition, CaptureSource, CaptureSpecContainer};
pub use channel::{EvaluationChannel, ModifierChannel};
pub use component::{AttributeChangeListener, AttributeComponent};
pub use config::{AggregatorConfig, ChannelAlias};
pub use container::ChannelContainer;
pub use effect::{
    AttributeBasedFloat, AttributeCalculation, DurationPolicy, EffectDef, EffectSpec, MagnitudeDef,
    ModifierDef, StackingPolicy,
};
pub use error::{EffectError, ErrorSeverity, GameplayError};
pub use handle::{EffectHandle, EffectOwner, EffectTags};
pub use modifier::{EvaluateParams, Modifier, ModifierOp};
pub use registry::{AggregatorRegistry, AttributeChangeSink};
pub use tags::{GameplayTag, TagContainer, TagRequirements};
