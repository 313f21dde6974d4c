use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use tilescale::describe::{self, PlanArgs};
use tilescale::upscale::{self, UpscaleArgs};

#[derive(Parser)]
#[command(name = "tilescale", about = "Tiled image upscaling with seam blending")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Rayon thread pool size used by the filter stages (default: all cores)
    #[arg(long, global = true)]
    rayon_threads: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Upscale an image tile by tile
    Upscale(UpscaleArgs),

    /// Print the tile plan for an image size as JSON
    Plan(PlanArgs),
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(threads) = cli.rayon_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| anyhow!("rayon init failed: {}", e))?;
    }

    match cli.command {
        Command::Upscale(args) => {
            let summary = upscale::run(args)?;
            info!(
                "done: {} tiles ({}x{} grid) in {:.2}s",
                summary.stats.tiles,
                summary.stats.cols,
                summary.stats.rows,
                summary.stats.total_ms / 1000.0
            );
        }
        Command::Plan(args) => describe::run(args)?,
    }

    Ok(())
}
