use anyhow::Result;
use clap::Parser;
use mlngen::{
    pipeline::{self, YearRun},
    resolve::DEFAULT_EDGE_ROOT,
};
use std::{path::PathBuf, time::Instant};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Build one year's multi-layer network from the raw CBS person and network tables.
///
/// Example loop over all years:
///   for year in `seq 2009 2023`; do mlngen 2009 2023 $year <node_data_folder> <output_folder>; done
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// First year of the node panel (part of the node file name)
    start_year: u32,
    /// Last year of the node panel (part of the node file name)
    end_year: u32,
    /// Year whose network is built
    actual_year: u32,
    /// Folder holding `base_start_<s>_end_<e>_year_<y>.csv.gz`
    node_data_folder: PathBuf,
    /// Outputs go to `<output_folder>/<actual_year>/`
    output_folder: PathBuf,

    /// Fallback table of node and edge files per year
    #[arg(long, default_value = "files_per_year.json")]
    files_per_year: PathBuf,
    /// Root of the CBS network tables
    #[arg(long, default_value = DEFAULT_EDGE_ROOT)]
    edge_root: PathBuf,
    /// Relation-code table
    #[arg(long, default_value = "layers.csv")]
    layers: String,
    /// Read at most this many rows per edge file
    #[arg(long)]
    nrows: Option<usize>,
}

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    // ─── 2) parse arguments ──────────────────────────────────────────
    let args = Args::parse();
    let run = YearRun {
        start_year: args.start_year,
        end_year: args.end_year,
        year: args.actual_year,
        node_data_folder: args.node_data_folder,
        output_folder: args.output_folder,
        files_per_year: args.files_per_year,
        edge_root: args.edge_root,
        layers_file: args.layers,
        nrows: args.nrows,
    };

    // ─── 3) build the year ───────────────────────────────────────────
    let start = Instant::now();
    let manifest = pipeline::run_year(&run)?;
    info!(
        year = manifest.year,
        layers = manifest.layers.len(),
        nodes = manifest.nodes,
        elapsed = ?start.elapsed(),
        "all done"
    );
    Ok(())
}
