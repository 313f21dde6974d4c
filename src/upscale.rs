use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Args;
use image::ImageFormat;
use serde::Serialize;
use tracing::info;

use crate::assemble::{AssemblyStats, TileAssembler};
use crate::config::PipelineConfig;
use crate::core::scale::Scale;
use crate::enhance::{OperatorCache, OperatorSpec};
use crate::io;
use crate::lowlight::LowLight;
use crate::postprocess::EdgeBoost;

#[derive(Args, Debug, Clone)]
pub struct UpscaleArgs {
    /// Source image
    #[arg(long, short)]
    pub input: PathBuf,

    /// Output image; the format follows the extension
    #[arg(long, short)]
    pub output: PathBuf,

    /// Scale factor, e.g. 4 or 2.5 [default: 4]
    #[arg(long, short)]
    pub scale: Option<Scale>,

    /// Tile size in source pixels [default: 512]
    #[arg(long)]
    pub tile: Option<u32>,

    /// Overlap between adjacent tiles in source pixels [default: 32]
    #[arg(long)]
    pub overlap: Option<u32>,

    /// Enhance operator: classical, resample[:filter], nearest,
    /// command:<program>[#model], remote:<url>
    #[arg(long, default_value = "classical")]
    pub operator: String,

    /// Worker threads enhancing tiles (0 = one per core)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Maximum enhanced tiles waiting to be merged (0 = twice the workers)
    #[arg(long)]
    pub max_pending: Option<usize>,

    /// Brighten a dark source image before tiling
    #[arg(long, default_value_t = false)]
    pub low_light: bool,

    /// Blend a Canny edge map into the assembled image
    #[arg(long, default_value_t = false)]
    pub edge_boost: bool,

    /// JSON pipeline config; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write summary.json next to the output
    #[arg(long, default_value_t = false)]
    pub summary: bool,
}

impl UpscaleArgs {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            scale: None,
            tile: None,
            overlap: None,
            operator: "classical".to_string(),
            workers: None,
            max_pending: None,
            low_light: false,
            edge_boost: false,
            config: None,
            summary: false,
        }
    }

    /// Config file (or defaults) with command-line overrides applied.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(scale) = self.scale {
            config.scale = scale;
        }
        if let Some(tile) = self.tile {
            config.tile_size = tile;
        }
        if let Some(overlap) = self.overlap {
            config.overlap = overlap;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(max_pending) = self.max_pending {
            config.max_pending = max_pending;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub input: PathBuf,
    pub output: PathBuf,
    pub source_width: u32,
    pub source_height: u32,
    pub tile_size: u32,
    pub overlap: u32,
    pub low_light: bool,
    pub edge_boost: bool,
    #[serde(flatten)]
    pub stats: AssemblyStats,
}

/// Hidden sibling the output is written to before the final rename.
fn partial_path(output: &Path) -> Result<PathBuf> {
    let name = output
        .file_name()
        .ok_or_else(|| anyhow!("output path {} has no file name", output.display()))?;
    Ok(output.with_file_name(format!(".{}.partial", name.to_string_lossy())))
}

pub fn run(args: UpscaleArgs) -> Result<RunSummary> {
    let config = args.pipeline_config()?;
    let format = ImageFormat::from_path(&args.output)
        .with_context(|| format!("cannot infer image format from {}", args.output.display()))?;

    let mut source = io::load_image(&args.input)?;
    info!(
        "loaded {} ({}x{}, {} channels)",
        args.input.display(),
        source.width(),
        source.height(),
        source.channels()
    );

    if args.low_light {
        LowLight::default().apply(&mut source);
        info!("applied low-light correction");
    }

    let spec: OperatorSpec = args.operator.parse()?;
    let operator = OperatorCache::default().get(&spec)?;

    let assembly = TileAssembler::new(config.clone(), operator.as_ref())
        .run(&source)
        .with_context(|| format!("failed to upscale {}", args.input.display()))?;
    let mut image = assembly.image;

    if args.edge_boost {
        EdgeBoost::default().apply(&mut image)?;
    }

    let partial = partial_path(&args.output)?;
    if let Err(e) = io::save_image_as(&image, &partial, format) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, &args.output)
        .with_context(|| format!("failed to move output into place at {}", args.output.display()))?;
    info!(
        "wrote {} ({}x{})",
        args.output.display(),
        image.width(),
        image.height()
    );

    let summary = RunSummary {
        input: args.input.clone(),
        output: args.output.clone(),
        source_width: source.width(),
        source_height: source.height(),
        tile_size: config.tile_size,
        overlap: config.overlap,
        low_light: args.low_light,
        edge_boost: args.edge_boost,
        stats: assembly.stats,
    };
    if args.summary {
        let path = args.output.with_file_name("summary.json");
        fs::write(&path, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("summary written to {}", path.display());
    }
    Ok(summary)
}
