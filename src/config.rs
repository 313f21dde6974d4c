use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::scale::Scale;
use crate::error::TilingError;

/// Tiling and scheduling parameters for one run.
///
/// Zero for `workers` or `max_pending` means "pick automatically".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub tile_size: u32,
    pub overlap: u32,
    pub scale: Scale,
    pub workers: usize,
    pub max_pending: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tile_size: 512,
            overlap: 32,
            scale: Scale::default(),
            workers: 0,
            max_pending: 0,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TilingError> {
        if self.tile_size == 0 {
            return Err(TilingError::invalid("tile size must be positive"));
        }
        if self.overlap >= self.tile_size {
            return Err(TilingError::invalid(format!(
                "overlap {} must be smaller than tile size {}",
                self.overlap, self.tile_size
            )));
        }
        Ok(())
    }

    /// Worker threads to run, resolving 0 to the rayon pool size.
    pub fn resolved_workers(&self) -> usize {
        match self.workers {
            0 => rayon::current_num_threads().max(1),
            n => n,
        }
    }

    /// Bound on enhanced-but-unmerged tiles, resolving 0 to twice the workers.
    pub fn resolved_max_pending(&self) -> usize {
        match self.max_pending {
            0 => 2 * self.resolved_workers(),
            n => n.max(1),
        }
    }
}
