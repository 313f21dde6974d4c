use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::core::buffer::Region;
use crate::core::plan::TilePlan;
use crate::core::scale::Scale;

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    /// Source image width
    #[arg(long)]
    pub width: u32,

    /// Source image height
    #[arg(long)]
    pub height: u32,

    /// Tile size in source pixels
    #[arg(long, default_value_t = 512)]
    pub tile: u32,

    /// Overlap between adjacent tiles
    #[arg(long, default_value_t = 32)]
    pub overlap: u32,

    /// Scale factor used to report destination regions
    #[arg(long, default_value = "4")]
    pub scale: Scale,
}

#[derive(Debug, Serialize)]
struct PlannedTile {
    index: usize,
    row: u32,
    col: u32,
    source: Region,
    destination: Region,
    left_band: u32,
    top_band: u32,
}

#[derive(Debug, Serialize)]
pub struct PlanReport {
    width: u32,
    height: u32,
    tile_size: u32,
    overlap: u32,
    scale: Scale,
    cols: u32,
    rows: u32,
    output_width: u32,
    output_height: u32,
    tiles: Vec<PlannedTile>,
}

impl PlanReport {
    pub fn new(plan: &TilePlan, scale: Scale) -> Self {
        let (output_width, output_height) = plan.output_size(scale);
        Self {
            width: plan.image_width,
            height: plan.image_height,
            tile_size: plan.tile_size,
            overlap: plan.overlap,
            scale,
            cols: plan.cols,
            rows: plan.rows,
            output_width,
            output_height,
            tiles: plan
                .tiles()
                .iter()
                .map(|t| PlannedTile {
                    index: t.index,
                    row: t.row,
                    col: t.col,
                    source: t.region,
                    destination: t.destination(scale),
                    left_band: t.left_band(scale),
                    top_band: t.top_band(scale),
                })
                .collect(),
        }
    }
}

pub fn describe(args: &PlanArgs) -> Result<PlanReport> {
    let plan = TilePlan::new(args.width, args.height, args.tile, args.overlap)?;
    Ok(PlanReport::new(&plan, args.scale))
}

/// Print the tile plan as JSON on stdout.
pub fn run(args: PlanArgs) -> Result<()> {
    let report = describe(&args)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_json() {
        let args = PlanArgs {
            width: 1024,
            height: 1024,
            tile: 512,
            overlap: 32,
            scale: Scale::integer(2),
        };
        let report = describe(&args).unwrap();
        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["output_width"], 2048);
        assert_eq!(json["tiles"].as_array().unwrap().len(), 9);
        assert_eq!(json["tiles"][1]["source"]["x"], 480);
        assert_eq!(json["tiles"][1]["left_band"], 64);
    }

    #[test]
    fn test_invalid_plan_is_error() {
        let args = PlanArgs {
            width: 0,
            height: 10,
            tile: 512,
            overlap: 32,
            scale: Scale::default(),
        };
        assert!(describe(&args).is_err());
    }
}
