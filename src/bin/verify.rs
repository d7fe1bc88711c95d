use anyhow::{bail, Context, Result};
use glob::glob;
use mlngen::{
    history::{YearManifest, MANIFEST_FILE},
    mln::{npz::load_csr_npz, table::read_table},
};
use rayon::prelude::*;
use std::{env, path::PathBuf};
use tracing::{info, warn};

/// Outcome of checking one year directory.
struct YearCheck {
    dir: PathBuf,
    year: u32,
    layers: usize,
    nnz: u64,
    problems: Vec<String>,
}

fn check_year(dir: PathBuf) -> Result<YearCheck> {
    let manifest = YearManifest::load(&dir)?;
    let mut problems = Vec::new();

    let nodes = read_table(&dir.join("nodes.csv.gz"), ',', None)
        .with_context(|| format!("reading node table in {}", dir.display()))?;
    if nodes.rows.len() as u64 != manifest.nodes {
        problems.push(format!(
            "nodes.csv.gz has {} rows, manifest says {}",
            nodes.rows.len(),
            manifest.nodes
        ));
    }
    if !dir.join("layers.csv").exists() {
        problems.push("layers.csv missing".to_string());
    }

    let mut nnz = 0u64;
    for record in &manifest.layers {
        let path = dir.join(&record.adjacency);
        match load_csr_npz(&path) {
            Ok(m) => {
                nnz += m.nnz() as u64;
                if m.nnz() as u64 != record.nnz {
                    problems.push(format!(
                        "{}: {} non-zeros, manifest says {}",
                        record.adjacency,
                        m.nnz(),
                        record.nnz
                    ));
                }
                if m.shape.0 < nodes.rows.len() {
                    problems.push(format!(
                        "{}: {} rows for {} nodes",
                        record.adjacency, m.shape.0, nodes.rows.len()
                    ));
                }
            }
            Err(e) => problems.push(format!("{}: {:#}", record.adjacency, e)),
        }
    }

    Ok(YearCheck {
        dir,
        year: manifest.year,
        layers: manifest.layers.len(),
        nnz,
        problems,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    // usage: verify <OUTPUT_FOLDER>
    let root = PathBuf::from(
        env::args()
            .nth(1)
            .context("Usage: verify <OUTPUT_FOLDER>")?,
    );

    // 1) Find every year directory with a manifest
    let pattern = format!("{}/*/{}", root.display(), MANIFEST_FILE);
    let year_dirs: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("Failed to read glob pattern '{}'", pattern))?
        .filter_map(|entry| entry.ok())
        .filter_map(|p| p.parent().map(|d| d.to_path_buf()))
        .collect();
    if year_dirs.is_empty() {
        bail!("No {} files found under '{}'", MANIFEST_FILE, root.display());
    }
    info!(years = year_dirs.len(), "checking");

    // 2) In parallel: check each year
    let mut checks: Vec<YearCheck> = year_dirs
        .into_par_iter()
        .map(check_year)
        .collect::<Result<Vec<_>>>()?;
    checks.sort_by_key(|c| c.year);

    // 3) Print summary table
    println!("\n{: <8} {:>8} {:>15} {:>10}", "Year", "Layers", "Non-zeros", "Problems");
    println!("{:-<44}", "");
    let mut failed = 0;
    for c in &checks {
        println!("{: <8} {:>8} {:>15} {:>10}", c.year, c.layers, c.nnz, c.problems.len());
        for p in &c.problems {
            warn!(dir = %c.dir.display(), "{}", p);
        }
        if !c.problems.is_empty() {
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{} of {} years failed verification", failed, checks.len());
    }
    Ok(())
}
