//! Raw CSV tables to a multi-layer network: a node table, a layer table and
//! one binary-encoded adjacency matrix per run.
//!
//! A run goes through the steps in order: `init_layers`, `init_nodes`,
//! `init_edges`, `read_all_edges`, then any of the `save_*` calls.
use anyhow::{anyhow, Context, Result};
use std::{path::Path, time::Instant};
use tracing::{info, instrument};

pub mod csr;
pub mod edges;
pub mod layers;
pub mod nodes;
pub mod npz;
pub mod table;

pub use csr::CsrMatrix;
pub use edges::{EdgeAccumulator, EdgeStats};
pub use layers::{Layer, LayerTable};
pub use nodes::NodeTable;

use crate::config::{EdgeConf, LayerConf, MlnConfig, NodeConf};

pub struct RawCsvToMln {
    config: MlnConfig,
    layers: Option<LayerTable>,
    nodes: Option<NodeTable>,
    edges: Option<EdgeAccumulator>,
    adjacency: Option<CsrMatrix>,
    stats: EdgeStats,
}

impl RawCsvToMln {
    pub fn new(config: MlnConfig) -> Self {
        Self {
            config,
            layers: None,
            nodes: None,
            edges: None,
            adjacency: None,
            stats: EdgeStats::default(),
        }
    }

    pub fn node_conf(&self) -> &NodeConf {
        &self.config.node_conf
    }

    pub fn edge_conf(&self) -> &EdgeConf {
        &self.config.edge_conf
    }

    pub fn layer_conf(&self) -> &LayerConf {
        &self.config.layer_conf
    }

    pub fn init_layers(&mut self) -> Result<()> {
        let table = LayerTable::load(&self.config.layer_conf, self.config.grouped)?;
        self.layers = Some(table);
        Ok(())
    }

    pub fn init_nodes(&mut self) -> Result<()> {
        let table = NodeTable::load(&self.config.node_conf)?;
        self.nodes = Some(table);
        Ok(())
    }

    /// Check the edge configuration and start an empty edge buffer.
    pub fn init_edges(&mut self) -> Result<()> {
        self.layers()?;
        self.nodes()?;
        edges::validate_colmap(&self.config.edge_conf.colmap)?;
        self.edges = Some(EdgeAccumulator::new(self.config.chunksize));
        self.adjacency = None;
        self.stats = EdgeStats::default();
        Ok(())
    }

    /// Read every configured edge file and build the adjacency matrix.
    #[instrument(level = "info", skip(self), fields(files = self.config.edge_conf.files.len()))]
    pub fn read_all_edges(&mut self) -> Result<()> {
        let mut acc = self
            .edges
            .take()
            .ok_or_else(|| anyhow!("read_all_edges called before init_edges"))?;
        let nodes = self.nodes()?;
        let layers = self.layers()?;
        let conf = &self.config.edge_conf;

        let start = Instant::now();
        let mut stats = EdgeStats::default();
        for file in &conf.files {
            let path = format!("{}{}", conf.input_folder_prefix, file);
            let file_stats = edges::read_edge_file(Path::new(&path), conf, nodes, layers, &mut acc)
                .with_context(|| format!("reading edge file {}", path))?;
            stats.add(file_stats);
        }

        let adjacency = acc.into_csr(nodes.dimension());
        info!(
            rows = stats.rows_read,
            kept = stats.edges_kept,
            nnz = adjacency.nnz(),
            elapsed = ?start.elapsed(),
            "adjacency built"
        );
        self.stats = stats;
        self.adjacency = Some(adjacency);
        Ok(())
    }

    pub fn save_layer_df<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        table::write_table(path, &self.layers()?.to_table())
            .with_context(|| format!("saving layer table to {}", path.display()))
    }

    pub fn save_node_df<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        table::write_table(path, &self.nodes()?.to_table())
            .with_context(|| format!("saving node table to {}", path.display()))
    }

    /// Write the adjacency matrix; returns the file size in bytes.
    pub fn save_edge_npz<P: AsRef<Path>>(&self, path: P) -> Result<u64> {
        let path = path.as_ref();
        let adjacency = self.adjacency()?;
        let bytes = npz::save_csr_npz(path, adjacency)
            .with_context(|| format!("saving adjacency to {}", path.display()))?;
        info!(path = %path.display(), nnz = adjacency.nnz(), bytes, "saved adjacency");
        Ok(bytes)
    }

    pub fn layers(&self) -> Result<&LayerTable> {
        self.layers
            .as_ref()
            .ok_or_else(|| anyhow!("layers are not initialised; call init_layers first"))
    }

    pub fn nodes(&self) -> Result<&NodeTable> {
        self.nodes
            .as_ref()
            .ok_or_else(|| anyhow!("nodes are not initialised; call init_nodes first"))
    }

    pub fn adjacency(&self) -> Result<&CsrMatrix> {
        self.adjacency
            .as_ref()
            .ok_or_else(|| anyhow!("no adjacency yet; call read_all_edges first"))
    }

    pub fn stats(&self) -> EdgeStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EdgeConf, LayerConf, NodeConf};
    use std::fs;
    use tempfile::tempdir;

    fn fixture(dir: &Path) -> MlnConfig {
        fs::write(
            dir.join("layers.csv"),
            "layer,label,group\n101,neighbor,neighbor\n201,colleague,work\n",
        )
        .unwrap();
        fs::write(
            dir.join("nodes.csv"),
            "RINPERSOON,gender,unused\n001,1,x\n002,2,y\n003,1,z\n",
        )
        .unwrap();
        fs::write(
            dir.join("edges.csv"),
            "RINPERSOON;RINPERSOONRELATIE;RELATIE\n001;002;101\n001;002;201\n003;001;201\n",
        )
        .unwrap();

        let out = dir.join("out");
        let node_conf = NodeConf::cbs(vec![dir.join("nodes.csv").display().to_string()], &out);
        let edge_conf = EdgeConf::cbs_base(&out).for_layer(
            &dir.join("edges.csv").display().to_string(),
            "neighbor_detailed_adjacency.npz",
            ';',
        );
        let layer_conf = LayerConf::cbs(&dir.join("layers.csv").display().to_string(), &out);
        MlnConfig::new(node_conf, edge_conf, layer_conf)
    }

    #[test]
    fn full_run_writes_three_artifacts() {
        let tmp = tempdir().unwrap();
        let mut r = RawCsvToMln::new(fixture(tmp.path()));
        r.init_layers().unwrap();
        r.init_nodes().unwrap();
        r.init_edges().unwrap();
        r.read_all_edges().unwrap();

        let m = r.adjacency().unwrap();
        assert_eq!(m.shape, (3, 3));
        assert_eq!(m.get(0, 1), Some(0b11));
        assert_eq!(m.get(2, 0), Some(0b10));
        assert_eq!(r.stats().edges_kept, 3);

        r.save_layer_df(&r.layer_conf().output).unwrap();
        r.save_node_df(&r.node_conf().output).unwrap();
        r.save_edge_npz(&r.edge_conf().output).unwrap();

        let out = tmp.path().join("out");
        let layers = fs::read_to_string(out.join("layers.csv")).unwrap();
        assert_eq!(
            layers,
            "layer_id,layer,label,group,group_id,binary\n0,101,neighbor,neighbor,0,1\n1,201,colleague,work,1,2\n"
        );
        let nodes = table::read_table(&out.join("nodes.csv.gz"), ',', None).unwrap();
        assert_eq!(nodes.headers, vec!["id", "label", "gender"]);
        assert_eq!(nodes.rows[2], vec!["2", "003", "1"]);

        let back = npz::load_csr_npz(&out.join("neighbor_detailed_adjacency.npz")).unwrap();
        assert_eq!(&back, m);
    }

    #[test]
    fn grouped_run_uses_group_bits() {
        let tmp = tempdir().unwrap();
        let mut cfg = fixture(tmp.path());
        cfg.grouped = true;
        cfg.layer_conf.symmetrize_all = true;
        let mut r = RawCsvToMln::new(cfg);
        r.init_layers().unwrap();
        r.init_nodes().unwrap();
        r.init_edges().unwrap();
        r.read_all_edges().unwrap();

        let m = r.adjacency().unwrap();
        assert_eq!(m.get(1, 0), Some(0b11));
        assert_eq!(m.get(0, 2), Some(0b10));
        assert_eq!(m.nnz(), 4);
    }

    #[test]
    fn steps_out_of_order_fail() {
        let tmp = tempdir().unwrap();
        let mut r = RawCsvToMln::new(fixture(tmp.path()));
        assert!(r.init_edges().is_err());
        assert!(r.read_all_edges().is_err());
        assert!(r.save_edge_npz(tmp.path().join("x.npz")).is_err());
        assert!(r.save_node_df(tmp.path().join("n.csv")).is_err());
    }
}
