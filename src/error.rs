use std::time::Duration;

use thiserror::Error;

/// Failure of the tiling pipeline as a whole.
///
/// Every variant is fatal to a run: the assembler never retries and never
/// returns a partially merged output.
#[derive(Debug, Error)]
pub enum TilingError {
    #[error("invalid dimension: {reason}")]
    InvalidDimension { reason: String },

    #[error("enhancement failed at tile {index}: {source}")]
    EnhancementFailed {
        index: usize,
        #[source]
        source: EnhanceError,
    },

    #[error("failed to allocate {bytes} bytes for {what}")]
    AllocationFailed {
        what: &'static str,
        bytes: usize,
        tile: Option<usize>,
    },
}

impl TilingError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        TilingError::InvalidDimension {
            reason: reason.into(),
        }
    }

    /// Index of the tile that triggered the failure, if it happened while
    /// processing a tile.
    pub fn tile_index(&self) -> Option<usize> {
        match self {
            TilingError::InvalidDimension { .. } => None,
            TilingError::EnhancementFailed { index, .. } => Some(*index),
            TilingError::AllocationFailed { tile, .. } => *tile,
        }
    }

    pub(crate) fn at_tile(self, index: usize) -> Self {
        match self {
            TilingError::AllocationFailed { what, bytes, .. } => TilingError::AllocationFailed {
                what,
                bytes,
                tile: Some(index),
            },
            other => other,
        }
    }
}

/// Failure raised by an enhance operator for a single tile.
#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error("operator returned {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("operator returned {actual} channels, expected {expected}")]
    ChannelMismatch { expected: u8, actual: u8 },

    #[error("scale {scale} is not supported by {operator}")]
    UnsupportedScale { operator: String, scale: f64 },

    #[error("{channels}-channel input is not supported by {operator}")]
    UnsupportedChannels { operator: String, channels: u8 },

    #[error("operator timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("process exited with {status}")]
    Process { status: String },

    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] image::ImageError),

    #[cfg(feature = "remote")]
    #[error("remote operator: {0}")]
    Remote(#[from] reqwest::Error),

    #[error(transparent)]
    Tiling(#[from] Box<TilingError>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<TilingError> for EnhanceError {
    fn from(err: TilingError) -> Self {
        EnhanceError::Tiling(Box::new(err))
    }
}
