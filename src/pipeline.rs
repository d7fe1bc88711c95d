//! One year of network generation, from file resolution to written outputs.
use anyhow::{Context, Result};
use chrono::Utc;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

use crate::{
    config::{EdgeConf, LayerConf, MlnConfig, NodeConf, ADJACENCY_NAMES},
    history::{LayerRecord, YearManifest},
    mln::RawCsvToMln,
    resolve::{self, FilesPerYear},
};

/// Inputs of a single-year run.
#[derive(Debug, Clone)]
pub struct YearRun {
    pub start_year: u32,
    pub end_year: u32,
    pub year: u32,
    pub node_data_folder: PathBuf,
    pub output_folder: PathBuf,
    pub files_per_year: PathBuf,
    pub edge_root: PathBuf,
    pub layers_file: String,
    pub nrows: Option<usize>,
}

impl YearRun {
    pub fn year_dir(&self) -> PathBuf {
        self.output_folder.join(self.year.to_string())
    }
}

fn ensure_dir(p: &Path) -> Result<()> {
    if !p.exists() {
        fs::create_dir_all(p).with_context(|| format!("creating {}", p.display()))?;
        println!("Directory {} created.", p.display());
    }
    Ok(())
}

/// Resolve inputs, then build and save one adjacency matrix per edge file.
/// Node and layer tables are written with the first layer only.
#[instrument(level = "info", skip(run), fields(year = run.year))]
pub fn run_year(run: &YearRun) -> Result<YearManifest> {
    println!("Processing network for year {}.", run.year);
    let lookup = FilesPerYear::load(&run.files_per_year)?;

    let node_candidates =
        resolve::default_node_files(&run.node_data_folder, run.start_year, run.end_year, run.year);
    let node_files = resolve::resolve_node_files(&node_candidates, run.year, &lookup)?;
    println!("Concatenating the following node files into nodes.csv.gz:");
    println!("{}", node_files.join("\n"));

    let edge_candidates = resolve::default_edge_files(&run.edge_root, run.year);
    let edge_files = resolve::resolve_edge_files(&edge_candidates, run.year, &lookup)?;
    println!("Adding layers from the following edge files:");
    println!("{}", edge_files.join("\n"));

    let year_dir = run.year_dir();
    let node_conf = NodeConf::cbs(node_files.clone(), &year_dir);
    let mut edge_base = EdgeConf::cbs_base(&year_dir);
    edge_base.nrows = run.nrows;
    let layer_conf = LayerConf::cbs(&run.layers_file, &year_dir);

    ensure_dir(&year_dir)?;

    let mut manifest = YearManifest::new(run.year, run.start_year, run.end_year, node_files);
    let mut first = true;

    for (ef, adj_name) in edge_files.iter().zip(ADJACENCY_NAMES) {
        println!("Creating layer from {} into {}...", ef, adj_name);
        let processing_start = Utc::now();
        let sep = resolve::separator_for(ef);
        let edge_conf = edge_base.for_layer(ef, adj_name, sep);

        let config = MlnConfig::new(node_conf.clone(), edge_conf, layer_conf.clone());
        println!("Current config:");
        println!("{}", config.to_pretty_json()?);

        let mut r = RawCsvToMln::new(config);
        r.init_layers()?;
        r.init_nodes()?;
        r.init_edges()?;
        r.read_all_edges()
            .with_context(|| format!("building layer {} for {}", adj_name, run.year))?;
        if first {
            r.save_layer_df(&r.layer_conf().output)?;
            r.save_node_df(&r.node_conf().output)?;
            manifest.nodes = r.nodes()?.count() as u64;
        }
        first = false;
        let npz_bytes = r.save_edge_npz(&r.edge_conf().output)?;

        manifest.record(LayerRecord {
            adjacency: adj_name.to_string(),
            input_file: ef.clone(),
            separator: sep,
            stats: r.stats(),
            nnz: r.adjacency()?.nnz() as u64,
            npz_bytes,
            processing_start,
            processing_end: Utc::now(),
        });
        manifest.save(&year_dir)?;
    }

    info!(layers = manifest.layers.len(), dir = %year_dir.display(), "year done");
    Ok(manifest)
}
