use anyhow::{anyhow, bail, Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use super::{
    csr::CsrMatrix,
    layers::LayerTable,
    nodes::NodeTable,
    table::{clean_str, csv_reader, ColumnSelection},
};
use crate::config::{ColumnMap, EdgeConf};

/// Counters for one or more edge files.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeStats {
    pub rows_read: u64,
    pub edges_kept: u64,
    pub unknown_node: u64,
    pub unknown_layer: u64,
    /// Records whose field count differs from the header.
    #[serde(default)]
    pub malformed: u64,
}

impl EdgeStats {
    pub fn add(&mut self, other: EdgeStats) {
        self.rows_read = self.rows_read.saturating_add(other.rows_read);
        self.edges_kept = self.edges_kept.saturating_add(other.edges_kept);
        self.unknown_node = self.unknown_node.saturating_add(other.unknown_node);
        self.unknown_layer = self.unknown_layer.saturating_add(other.unknown_layer);
        self.malformed = self.malformed.saturating_add(other.malformed);
    }
}

/// Source, target and layer column positions in an edge file.
#[derive(Debug, Clone, Copy)]
struct EdgeColumns {
    source: usize,
    target: usize,
    layer: usize,
}

impl EdgeColumns {
    fn locate(selection: &ColumnSelection) -> Result<Self> {
        let find = |name: &str| {
            selection
                .source_index(name)
                .ok_or_else(|| anyhow!("edge file has no column mapped to `{}`", name))
        };
        Ok(Self {
            source: find("source")?,
            target: find("target")?,
            layer: find("layer")?,
        })
    }
}

/// Checks that a column map produces the three edge columns.
pub fn validate_colmap(colmap: &ColumnMap) -> Result<()> {
    let targets = colmap.targets();
    for needed in ["source", "target", "layer"] {
        if !targets.contains(&needed) {
            bail!("edge colmap does not map any column to `{}`", needed);
        }
    }
    Ok(())
}

/// Buffer of `(row, col, value)` entries. Repeated pairs are merged with
/// bitwise OR every `chunksize` pushes and once more at the end.
#[derive(Debug)]
pub struct EdgeAccumulator {
    triplets: Vec<(u32, u32, i64)>,
    pending: usize,
    chunksize: usize,
}

impl EdgeAccumulator {
    pub fn new(chunksize: usize) -> Self {
        Self {
            triplets: Vec::new(),
            pending: 0,
            chunksize: chunksize.max(1),
        }
    }

    pub fn push(&mut self, row: u32, col: u32, value: i64) {
        self.triplets.push((row, col, value));
        self.pending += 1;
        if self.pending >= self.chunksize {
            self.compact();
        }
    }

    /// Sort and OR-merge repeated pairs in place.
    pub fn compact(&mut self) {
        let before = self.triplets.len();
        self.triplets.par_sort_unstable_by_key(|&(r, c, _)| (r, c));
        self.triplets.dedup_by(|later, kept| {
            if later.0 == kept.0 && later.1 == kept.1 {
                kept.2 |= later.2;
                true
            } else {
                false
            }
        });
        self.pending = 0;
        debug!(before, after = self.triplets.len(), "compacted edge buffer");
    }

    pub fn len(&self) -> usize {
        self.triplets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }

    pub fn into_csr(mut self, dimension: usize) -> CsrMatrix {
        self.compact();
        CsrMatrix::from_sorted_triplets(dimension, dimension, &self.triplets)
    }
}

/// Stream one edge file into `acc`, mapping labels to node ids and relation
/// codes to their binary value. Unknown labels and codes are dropped.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn read_edge_file(
    path: &Path,
    conf: &EdgeConf,
    nodes: &NodeTable,
    layers: &LayerTable,
    acc: &mut EdgeAccumulator,
) -> Result<EdgeStats> {
    let mut rdr = csv_reader(path, conf.sep)?;
    let headers = rdr
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .clone();
    let cols = EdgeColumns::locate(&ColumnSelection::new(&headers, Some(&conf.colmap)))
        .with_context(|| format!("mapping columns of {}", path.display()))?;

    let mut stats = EdgeStats::default();
    let limit = conf.nrows.unwrap_or(usize::MAX);
    for (idx, result) in rdr.records().take(limit).enumerate() {
        let record =
            result.with_context(|| format!("CSV parse error in {} at record {}", path.display(), idx))?;
        stats.rows_read += 1;
        if record.len() != headers.len() {
            stats.malformed += 1;
        }

        let field = |i: usize| clean_str(record.get(i).unwrap_or(""));
        let Some(layer) = layers.lookup(&field(cols.layer)) else {
            stats.unknown_layer += 1;
            continue;
        };
        let (Some(src), Some(dst)) = (nodes.id_of(&field(cols.source)), nodes.id_of(&field(cols.target)))
        else {
            stats.unknown_node += 1;
            continue;
        };

        acc.push(src, dst, layer.binary);
        if layers.is_symmetric(layer.layer_id) && src != dst {
            acc.push(dst, src, layer.binary);
        }
        stats.edges_kept += 1;

        if stats.rows_read % 1_000_000 == 0 {
            debug!(rows = stats.rows_read, buffered = acc.len(), "reading edges");
        }
    }

    if stats.malformed > 0 {
        warn!(
            malformed = stats.malformed,
            expected_fields = headers.len(),
            "records with a wrong number of fields"
        );
    }
    if stats.unknown_node > 0 || stats.unknown_layer > 0 {
        warn!(
            unknown_node = stats.unknown_node,
            unknown_layer = stats.unknown_layer,
            "dropped edges"
        );
    }
    info!(rows = stats.rows_read, kept = stats.edges_kept, "edge file done");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{cbs_edge_colmap, EdgeConf};
    use crate::mln::table::RawTable;
    use std::fs;
    use tempfile::tempdir;

    fn nodes() -> NodeTable {
        NodeTable::from_main(RawTable {
            headers: vec!["label".into()],
            rows: ["a", "b", "c"].iter().map(|s| vec![s.to_string()]).collect(),
        })
        .unwrap()
    }

    fn layers(symmetric: &[&str]) -> LayerTable {
        let mut t = LayerTable::from_raw(
            &RawTable {
                headers: vec!["layer".into(), "label".into()],
                rows: vec![
                    vec!["101".into(), "parent".into()],
                    vec!["102".into(), "child".into()],
                    vec!["103".into(), "sibling".into()],
                ],
            },
            false,
        )
        .unwrap();
        let names: Vec<String> = symmetric.iter().map(|s| s.to_string()).collect();
        t.set_symmetrize(&names, false).unwrap();
        t
    }

    fn conf(sep: char) -> EdgeConf {
        let mut c = EdgeConf::cbs_base(Path::new("."));
        c.sep = sep;
        c
    }

    #[test]
    fn accumulator_merges_with_or() {
        let mut acc = EdgeAccumulator::new(2);
        acc.push(1, 0, 1);
        acc.push(0, 2, 2);
        acc.push(1, 0, 4);
        acc.push(1, 0, 1);
        let m = acc.into_csr(3);
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.get(1, 0), Some(5));
        assert_eq!(m.get(0, 2), Some(2));
    }

    #[test]
    fn reads_cbs_style_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("FAMILIENETWERK2020TABV1.csv");
        fs::write(
            &path,
            "RINPERSOONS;RINPERSOON;RINPERSOONSRELATIE;RINPERSOONRELATIE;RELATIE\n\
             R;a;R;b;101\n\
             R;a;R;b;102\n\
             R;b;R;c;103\n\
             R;a;R;zz;101\n\
             R;a;R;c;999\n",
        )
        .unwrap();

        let mut acc = EdgeAccumulator::new(100);
        let stats = read_edge_file(&path, &conf(';'), &nodes(), &layers(&["sibling"]), &mut acc).unwrap();
        assert_eq!(
            stats,
            EdgeStats {
                rows_read: 5,
                edges_kept: 3,
                unknown_node: 1,
                unknown_layer: 1,
                malformed: 0,
            }
        );

        let m = acc.into_csr(3);
        assert_eq!(m.get(0, 1), Some(1 | 2));
        assert_eq!(m.get(1, 0), None);
        assert_eq!(m.get(1, 2), Some(4));
        assert_eq!(m.get(2, 1), Some(4));
        assert_eq!(m.nnz(), 3);
    }

    #[test]
    fn nrows_limits_records() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("e.csv");
        fs::write(&path, "RINPERSOON,RINPERSOONRELATIE,RELATIE\na,b,101\nb,c,101\n").unwrap();

        let mut c = conf(',');
        c.nrows = Some(1);
        let mut acc = EdgeAccumulator::new(10);
        let stats = read_edge_file(&path, &c, &nodes(), &layers(&[]), &mut acc).unwrap();
        assert_eq!(stats.rows_read, 1);
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn counts_records_with_wrong_field_count() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("e.csv");
        fs::write(
            &path,
            "RINPERSOONS;RINPERSOON;RINPERSOONSRELATIE;RINPERSOONRELATIE;RELATIE\n\
             R;a;R;b;101\n\
             R;R;a;R;b;101\n\
             R;b;R;c\n",
        )
        .unwrap();

        let mut acc = EdgeAccumulator::new(10);
        let stats = read_edge_file(&path, &conf(';'), &nodes(), &layers(&[]), &mut acc).unwrap();
        assert_eq!(stats.rows_read, 3);
        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.edges_kept, 1);
        assert_eq!(stats.unknown_layer, 2);
    }

    #[test]
    fn missing_mapped_column_fails() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("e.csv");
        fs::write(&path, "RINPERSOON;RELATIE\na;101\n").unwrap();
        let mut acc = EdgeAccumulator::new(10);
        assert!(read_edge_file(&path, &conf(';'), &nodes(), &layers(&[]), &mut acc).is_err());
    }

    #[test]
    fn colmap_validation() {
        assert!(validate_colmap(&cbs_edge_colmap()).is_ok());
        let partial = ColumnMap::new().with("RINPERSOON", "source");
        assert!(validate_colmap(&partial).is_err());
    }
}
