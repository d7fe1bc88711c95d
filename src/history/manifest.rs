use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::mln::EdgeStats;

pub const MANIFEST_FILE: &str = "manifest.json";

/// One processed layer file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub adjacency: String,
    pub input_file: String,
    pub separator: char,
    #[serde(flatten)]
    pub stats: EdgeStats,
    pub nnz: u64,
    pub npz_bytes: u64,
    pub processing_start: DateTime<Utc>,
    pub processing_end: DateTime<Utc>,
}

/// What a run produced for one year, stored next to the outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearManifest {
    pub year: u32,
    pub start_year: u32,
    pub end_year: u32,
    pub node_files: Vec<String>,
    pub nodes: u64,
    pub layers: Vec<LayerRecord>,
}

impl YearManifest {
    pub fn new(year: u32, start_year: u32, end_year: u32, node_files: Vec<String>) -> Self {
        Self {
            year,
            start_year,
            end_year,
            node_files,
            nodes: 0,
            layers: Vec::new(),
        }
    }

    pub fn path_in(year_dir: &Path) -> PathBuf {
        year_dir.join(MANIFEST_FILE)
    }

    /// Add or replace the record for `record.adjacency`.
    pub fn record(&mut self, record: LayerRecord) {
        match self
            .layers
            .iter_mut()
            .find(|r| r.adjacency == record.adjacency)
        {
            Some(existing) => *existing = record,
            None => self.layers.push(record),
        }
    }

    /// Write to `<year_dir>/manifest.json` via a temp file and rename.
    pub fn save(&self, year_dir: &Path) -> Result<PathBuf> {
        let final_path = Self::path_in(year_dir);
        let tmp = year_dir.join(format!("{}.tmp", MANIFEST_FILE));
        {
            let file = File::create(&tmp)
                .with_context(|| format!("creating manifest {}", tmp.display()))?;
            let mut w = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut w, self).context("serializing manifest")?;
            w.flush()?;
        }
        fs::rename(&tmp, &final_path)
            .with_context(|| format!("moving manifest into {}", final_path.display()))?;
        debug!(path = %final_path.display(), layers = self.layers.len(), "manifest saved");
        Ok(final_path)
    }

    pub fn load(year_dir: &Path) -> Result<Self> {
        let path = Self::path_in(year_dir);
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing {}", path.display()))
    }
}
