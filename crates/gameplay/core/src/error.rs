//! Common error infrastructure for gameplay-core.
//!
//! The aggregation engine itself never fails: numeric degeneracies are clamped
//! and logged, stale handles resolve to `None`, and removals of unknown handles
//! are no-ops. Errors only exist at the effect-application boundary, where a
//! definition can ask for data the caller did not provide.
//!
//! # Design Principles
//!
//! - **Type Safety**: Each boundary has its own error type with specific variants
//! - **Severity Classification**: Errors are categorized for recovery strategies
//! - **Stable Codes**: Every variant has a static code usable in logs and tests

use crate::attribute::AttributeId;
use crate::capture::CaptureSource;

/// Severity level of an error, used for categorization and recovery strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// Temporary condition; the same request may succeed later.
    Recoverable,

    /// Invalid input; should not be retried without changes.
    Validation,

    /// Unexpected state inconsistency that indicates a bug.
    Internal,

    /// Unrecoverable; the owning component should be reset.
    Fatal,
}

impl ErrorSeverity {
    /// Returns a human-readable description of this severity level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Recoverable => "recoverable",
            Self::Validation => "validation",
            Self::Internal => "internal",
            Self::Fatal => "fatal",
        }
    }

    /// Returns true if this error is potentially recoverable.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable)
    }

    /// Returns true if this error indicates an internal bug.
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal | Self::Fatal)
    }
}

/// Common trait for all gameplay-core errors.
///
/// # Implementation Guidelines
///
/// - Use `#[derive(thiserror::Error)]` for Display/Error impl
/// - Classify severity based on recoverability, not impact
pub trait GameplayError: core::fmt::Display + core::fmt::Debug {
    /// Returns the severity level of this error.
    fn severity(&self) -> ErrorSeverity;

    /// Returns a static string identifier for this error variant.
    fn error_code(&self) -> &'static str {
        core::any::type_name::<Self>()
    }
}

/// Errors raised while building or applying a gameplay effect spec.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EffectError {
    /// A modifier magnitude is backed by an attribute that could not be captured.
    #[error("attribute {attribute} could not be captured from the {side:?} side")]
    MissingCapture {
        /// Attribute backing the magnitude.
        attribute: AttributeId,
        /// Side the capture was expected from.
        side: CaptureSource,
    },

    /// The component does not own the requested attribute.
    #[error("attribute {attribute} is not part of this component's attribute set")]
    UnknownAttribute {
        /// The missing attribute.
        attribute: AttributeId,
    },
}

impl GameplayError for EffectError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            // The source may gain the attribute later (e.g. a set is granted).
            EffectError::MissingCapture { .. } => ErrorSeverity::Recoverable,
            EffectError::UnknownAttribute { .. } => ErrorSeverity::Validation,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            EffectError::MissingCapture { .. } => "EFFECT_MISSING_CAPTURE",
            EffectError::UnknownAttribute { .. } => "EFFECT_UNKNOWN_ATTRIBUTE",
        }
    }
}
