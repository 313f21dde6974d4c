//! Tile enhancement operators.
//!
//! An operator maps a `w x h` tile to a `round(w * s) x round(h * s)` tile
//! with the same channel count. The assembler checks that law on every
//! output, so operators only need to fail cleanly when they cannot honour it.

pub mod cache;
pub mod classical;
pub mod command;
#[cfg(feature = "remote")]
pub mod remote;
pub mod resample;

use crate::core::buffer::{ImageBuffer, Sample};
use crate::core::scale::Scale;
use crate::error::EnhanceError;

pub use cache::{OperatorCache, OperatorSpec};
pub use classical::{ClassicalEnhancer, ClassicalOptions};
pub use command::CommandOperator;
#[cfg(feature = "remote")]
pub use remote::RemoteOperator;
pub use resample::{NearestOperator, ResampleOperator};

/// A resolution enhancement applied to one tile at a time.
///
/// Implementations are shared across worker threads and must not rely on
/// call order: tiles can be enhanced concurrently and out of scan order.
pub trait EnhanceOperator<S: Sample = u8>: Send + Sync {
    fn name(&self) -> &str;

    fn enhance(&self, tile: &ImageBuffer<S>, scale: Scale) -> Result<ImageBuffer<S>, EnhanceError>;
}

/// Dimensions an operator must return for a `width x height` input.
pub fn expected_size(width: u32, height: u32, scale: Scale) -> (u32, u32) {
    (scale.apply(width), scale.apply(height))
}

/// Check an operator result against the dimension law and the input's
/// channel count.
pub fn validate_output<S: Sample>(
    input: &ImageBuffer<S>,
    output: &ImageBuffer<S>,
    scale: Scale,
) -> Result<(), EnhanceError> {
    let (expected_width, expected_height) = expected_size(input.width(), input.height(), scale);
    if output.dimensions() != (expected_width, expected_height) {
        return Err(EnhanceError::DimensionMismatch {
            expected_width,
            expected_height,
            actual_width: output.width(),
            actual_height: output.height(),
        });
    }
    if output.channels() != input.channels() {
        return Err(EnhanceError::ChannelMismatch {
            expected: input.channels(),
            actual: output.channels(),
        });
    }
    Ok(())
}

/// Integral scale factor, for operators that only support whole multiples.
pub(crate) fn integer_scale(operator: &str, scale: Scale) -> Result<u32, EnhanceError> {
    scale.as_integer().ok_or_else(|| EnhanceError::UnsupportedScale {
        operator: operator.to_string(),
        scale: scale.factor(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_law() {
        let input = ImageBuffer::<u8>::new(5, 3, 3).unwrap();
        let output = ImageBuffer::<u8>::new(8, 5, 3).unwrap();
        validate_output(&input, &output, Scale::new(1.5).unwrap()).unwrap();
    }

    #[test]
    fn test_validate_rejects_dimensions() {
        let input = ImageBuffer::<u8>::new(4, 4, 3).unwrap();
        let output = ImageBuffer::<u8>::new(8, 7, 3).unwrap();
        let err = validate_output(&input, &output, Scale::integer(2)).unwrap_err();
        assert!(matches!(
            err,
            EnhanceError::DimensionMismatch {
                expected_width: 8,
                expected_height: 8,
                actual_width: 8,
                actual_height: 7
            }
        ));
    }

    #[test]
    fn test_validate_rejects_channels() {
        let input = ImageBuffer::<u8>::new(4, 4, 4).unwrap();
        let output = ImageBuffer::<u8>::new(8, 8, 3).unwrap();
        let err = validate_output(&input, &output, Scale::integer(2)).unwrap_err();
        assert!(matches!(err, EnhanceError::ChannelMismatch { expected: 4, actual: 3 }));
    }

    #[test]
    fn test_integer_scale() {
        assert_eq!(integer_scale("x", Scale::integer(3)).unwrap(), 3);
        assert!(integer_scale("x", Scale::new(2.5).unwrap()).is_err());
    }
}
