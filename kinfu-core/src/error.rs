//! Error types for the fusion engine.

use std::collections::TryReserveError;
use thiserror::Error;

/// Errors surfaced by [`crate::KinFu`] and its components.
///
/// Losing track is not an error: `KinFu::process` reports it through its
/// boolean result and [`crate::TrackingState::Lost`].
#[derive(Debug, Error)]
pub enum KinfuError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to allocate {bytes} bytes for {what}")]
    AllocationFailure { what: &'static str, bytes: usize },

    #[error("Frame index {index} out of range (history holds {len} poses)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Frame size mismatch: expected {expected:?}, got {actual:?}")]
    FrameSizeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Config IO error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl KinfuError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        KinfuError::InvalidConfiguration(msg.into())
    }

    /// Map a failed reservation of `count` elements of `T` to [`KinfuError::AllocationFailure`].
    pub(crate) fn alloc<T>(what: &'static str, count: usize) -> impl FnOnce(TryReserveError) -> Self {
        move |_| KinfuError::AllocationFailure {
            what,
            bytes: count.saturating_mul(std::mem::size_of::<T>()),
        }
    }
}

pub type Result<T> = std::result::Result<T, KinfuError>;
