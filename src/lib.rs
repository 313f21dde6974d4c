//! Tiled image upscaling.
//!
//! A source image is cut into overlapping tiles ([`TilePlan`]), each tile is
//! enhanced independently by an [`EnhanceOperator`], and the results are
//! merged back in scan order with linear blending across the overlap bands
//! ([`merge_tile`]). [`TileAssembler`] drives the whole pipeline.

pub mod assemble;
pub mod config;
pub mod core;
pub mod describe;
pub mod enhance;
pub mod error;
pub mod io;
pub mod lowlight;
pub mod postprocess;
pub mod upscale;

pub use crate::assemble::{Assembly, AssemblyState, AssemblyStats, TileAssembler};
pub use crate::config::PipelineConfig;
pub use crate::core::blend::{merge_tile, EnhancedTile};
pub use crate::core::buffer::{ImageBuffer, Region, Sample};
pub use crate::core::plan::{Tile, TilePlan};
pub use crate::core::scale::Scale;
pub use crate::core::ResampleFilter;
pub use crate::enhance::{EnhanceOperator, OperatorCache, OperatorSpec};
pub use crate::error::{EnhanceError, TilingError};
