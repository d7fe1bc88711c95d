use anyhow::{bail, Context, Result};
use indexmap::{IndexMap, IndexSet};
use std::{collections::HashMap, path::Path};
use tracing::{debug, info};

use super::table::{read_table, RawTable};
use crate::config::LayerConf;

/// Matrix values are signed 64-bit, so bit 63 is off limits.
pub const MAX_LAYER_BITS: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub layer_id: usize,
    /// Relation code as it appears in the edge files.
    pub code: String,
    pub label: String,
    pub group: String,
    pub group_id: usize,
    pub binary: i64,
    pub color: Option<String>,
}

/// Relation types known to a run, and how each one is encoded in the matrix.
#[derive(Debug, Clone)]
pub struct LayerTable {
    /// Keyed by relation code; the insertion index is the `layer_id`.
    layers: IndexMap<String, Layer>,
    groups: IndexSet<String>,
    symmetric: Vec<bool>,
}

impl LayerTable {
    /// Build from a table with a `layer` column and optional `label`/`group`.
    pub fn from_raw(table: &RawTable, grouped: bool) -> Result<Self> {
        let Some(code_col) = table.column("layer") else {
            bail!("layer table has no `layer` column (columns: {:?})", table.headers);
        };
        let label_col = table.column("label");
        let group_col = table.column("group");

        let mut layers: IndexMap<String, Layer> = IndexMap::with_capacity(table.rows.len());
        let mut groups: IndexSet<String> = IndexSet::new();

        for (row_no, row) in table.rows.iter().enumerate() {
            let field = |col: Option<usize>| col.and_then(|c| row.get(c)).filter(|s| !s.is_empty());
            let code = row.get(code_col).cloned().unwrap_or_default();
            if code.is_empty() {
                bail!("layer table row {} has an empty `layer` value", row_no);
            }
            if layers.contains_key(&code) {
                bail!("duplicate layer code {:?} in layer table", code);
            }
            let label = field(label_col).cloned().unwrap_or_else(|| code.clone());
            let group = field(group_col).cloned().unwrap_or_else(|| label.clone());
            let (group_id, _) = groups.insert_full(group.clone());

            let layer_id = layers.len();
            let bit = if grouped { group_id } else { layer_id };
            if bit >= MAX_LAYER_BITS {
                bail!(
                    "{} distinct {} do not fit in a 64-bit binary encoding",
                    bit + 1,
                    if grouped { "groups" } else { "layers" }
                );
            }
            layers.insert(
                code.clone(),
                Layer {
                    layer_id,
                    code,
                    label,
                    group,
                    group_id,
                    binary: 1i64 << bit,
                    color: None,
                },
            );
        }

        let symmetric = vec![false; layers.len()];
        Ok(Self {
            layers,
            groups,
            symmetric,
        })
    }

    /// Read the prepared table if configured, otherwise the raw one.
    pub fn load(conf: &LayerConf, grouped: bool) -> Result<Self> {
        let (file, sep) = if conf.file.is_empty() {
            (&conf.raw_file, conf.raw_sep)
        } else {
            (&conf.file, conf.sep)
        };
        let path = format!("{}{}", conf.input_folder_prefix, file);
        let raw = read_table(Path::new(&path), sep, conf.colmap.as_ref())
            .with_context(|| format!("reading layer table {}", path))?;
        let mut table = Self::from_raw(&raw, grouped)?;

        if !conf.colors.is_empty() {
            let colors_path = format!("{}{}", conf.input_folder_prefix, conf.colors);
            let colors = read_table(Path::new(&colors_path), ',', None)
                .with_context(|| format!("reading layer colors {}", colors_path))?;
            table.apply_colors(&colors)?;
        }
        table.set_symmetrize(&conf.symmetrize, conf.symmetrize_all)?;

        info!(
            layers = table.len(),
            groups = table.group_count(),
            grouped,
            "layers initialised"
        );
        Ok(table)
    }

    /// Attach colors from a `group,color` table; groups without an entry stay uncolored.
    pub fn apply_colors(&mut self, colors: &RawTable) -> Result<()> {
        let (Some(g), Some(c)) = (colors.column("group"), colors.column("color")) else {
            bail!("color table needs `group` and `color` columns, got {:?}", colors.headers);
        };
        let lookup: HashMap<&str, &str> = colors
            .rows
            .iter()
            .filter_map(|r| Some((r.get(g)?.as_str(), r.get(c)?.as_str())))
            .collect();
        for layer in self.layers.values_mut() {
            layer.color = lookup.get(layer.group.as_str()).map(|s| s.to_string());
        }
        Ok(())
    }

    /// Mark layers whose edges are stored in both directions. Names match a
    /// layer code or label.
    pub fn set_symmetrize(&mut self, names: &[String], all: bool) -> Result<()> {
        if all {
            self.symmetric.iter_mut().for_each(|s| *s = true);
            return Ok(());
        }
        for name in names {
            let ids: Vec<usize> = self
                .layers
                .values()
                .filter(|l| l.code == *name || l.label == *name)
                .map(|l| l.layer_id)
                .collect();
            if ids.is_empty() {
                bail!("cannot symmetrize unknown layer {:?}", name);
            }
            for id in ids {
                self.symmetric[id] = true;
            }
        }
        debug!(
            symmetric = self.symmetric.iter().filter(|s| **s).count(),
            "symmetrized layers"
        );
        Ok(())
    }

    pub fn lookup(&self, code: &str) -> Option<&Layer> {
        self.layers.get(code)
    }

    pub fn is_symmetric(&self, layer_id: usize) -> bool {
        self.symmetric.get(layer_id).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Output form of the layer table.
    pub fn to_table(&self) -> RawTable {
        let with_color = self.layers.values().any(|l| l.color.is_some());
        let mut headers: Vec<String> = ["layer_id", "layer", "label", "group", "group_id", "binary"]
            .into_iter()
            .map(String::from)
            .collect();
        if with_color {
            headers.push("color".into());
        }
        let rows = self
            .layers
            .values()
            .map(|l| {
                let mut row = vec![
                    l.layer_id.to_string(),
                    l.code.clone(),
                    l.label.clone(),
                    l.group.clone(),
                    l.group_id.to_string(),
                    l.binary.to_string(),
                ];
                if with_color {
                    row.push(l.color.clone().unwrap_or_default());
                }
                row
            })
            .collect();
        RawTable { headers, rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(rows: &[[&str; 3]]) -> RawTable {
        RawTable {
            headers: vec!["layer".into(), "label".into(), "group".into()],
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    fn sample() -> RawTable {
        raw(&[
            ["101", "neighbor", "neighbor"],
            ["201", "colleague", "work"],
            ["301", "parent", "family"],
            ["302", "child", "family"],
        ])
    }

    #[test]
    fn ids_and_bits_follow_row_order() {
        let t = LayerTable::from_raw(&sample(), false).unwrap();
        assert_eq!(t.len(), 4);
        assert_eq!(t.group_count(), 3);
        let child = t.lookup("302").unwrap();
        assert_eq!(child.layer_id, 3);
        assert_eq!(child.group_id, 2);
        assert_eq!(child.binary, 8);
        assert!(t.lookup("999").is_none());
    }

    #[test]
    fn grouped_encoding_shares_bits() {
        let t = LayerTable::from_raw(&sample(), true).unwrap();
        assert_eq!(t.lookup("301").unwrap().binary, 4);
        assert_eq!(t.lookup("302").unwrap().binary, 4);
        assert_eq!(t.lookup("201").unwrap().binary, 2);
    }

    #[test]
    fn groups_number_in_first_seen_order() {
        let t = LayerTable::from_raw(
            &raw(&[
                ["1", "a", "work"],
                ["2", "b", "family"],
                ["3", "c", "work"],
                ["4", "d", "school"],
            ]),
            false,
        )
        .unwrap();
        let ids: Vec<usize> = ["1", "2", "3", "4"]
            .iter()
            .map(|c| t.lookup(c).unwrap().group_id)
            .collect();
        assert_eq!(ids, vec![0, 1, 0, 2]);
        assert_eq!(t.group_count(), 3);
        assert_eq!(t.lookup("3").unwrap().layer_id, 2);
    }

    #[test]
    fn label_and_group_default_to_code() {
        let table = RawTable {
            headers: vec!["layer".into()],
            rows: vec![vec!["7".into()]],
        };
        let t = LayerTable::from_raw(&table, false).unwrap();
        let l = t.lookup("7").unwrap();
        assert_eq!((l.label.as_str(), l.group.as_str()), ("7", "7"));
    }

    #[test]
    fn rejects_duplicates_and_too_many_bits() {
        assert!(LayerTable::from_raw(&raw(&[["1", "a", "g"], ["1", "b", "g"]]), false).is_err());
        assert!(LayerTable::from_raw(&raw(&[["", "a", "g"]]), false).is_err());

        let many = RawTable {
            headers: vec!["layer".into()],
            rows: (0..64).map(|i| vec![i.to_string()]).collect(),
        };
        assert!(LayerTable::from_raw(&many, false).is_err());
        assert!(LayerTable::from_raw(&many, true).is_err());
    }

    #[test]
    fn symmetrize_by_code_or_label() {
        let mut t = LayerTable::from_raw(&sample(), false).unwrap();
        t.set_symmetrize(&["101".into(), "colleague".into()], false)
            .unwrap();
        assert!(t.is_symmetric(0));
        assert!(t.is_symmetric(1));
        assert!(!t.is_symmetric(2));
        assert!(t.set_symmetrize(&["nope".into()], false).is_err());

        t.set_symmetrize(&[], true).unwrap();
        assert!((0..4).all(|i| t.is_symmetric(i)));
    }

    #[test]
    fn output_table_with_colors() {
        let mut t = LayerTable::from_raw(&sample(), false).unwrap();
        let colors = RawTable {
            headers: vec!["group".into(), "color".into()],
            rows: vec![vec!["family".into(), "#ff0000".into()]],
        };
        t.apply_colors(&colors).unwrap();
        let out = t.to_table();
        assert_eq!(out.headers.last().unwrap(), "color");
        assert_eq!(out.rows[2], vec!["2", "301", "parent", "family", "2", "4", "#ff0000"]);
        assert_eq!(out.rows[0][6], "");
    }
}
