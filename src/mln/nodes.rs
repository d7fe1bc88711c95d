use anyhow::{bail, Context, Result};
use std::{collections::HashMap, path::Path};
use tracing::{info, warn};

use super::table::{read_table, RawTable};
use crate::config::NodeConf;

/// Unused ids allowed below the largest explicit id. The matrix is
/// `max(id) + 1` wide, so larger gaps are rejected instead of allocated.
pub const MAX_ID_GAP: usize = 1 << 20;

/// The node set of a run: one row per person, addressed by a dense id.
#[derive(Debug, Clone)]
pub struct NodeTable {
    /// Attribute columns; `label` is always first.
    columns: Vec<String>,
    ids: Vec<u32>,
    rows: Vec<Vec<String>>,
    index: HashMap<String, u32>,
    dimension: usize,
}

impl NodeTable {
    /// Build from the main node table. Ids come from an `id` column when
    /// present, otherwise from row order.
    pub fn from_main(table: RawTable) -> Result<Self> {
        let Some(label_col) = table.column("label") else {
            bail!("node table has no `label` column (columns: {:?})", table.headers);
        };
        let id_col = table.column("id");

        let mut columns = vec!["label".to_string()];
        let attr_cols: Vec<usize> = (0..table.headers.len())
            .filter(|&i| i != label_col && Some(i) != id_col)
            .collect();
        columns.extend(attr_cols.iter().map(|&i| table.headers[i].clone()));

        let mut ids = Vec::with_capacity(table.rows.len());
        let mut rows = Vec::with_capacity(table.rows.len());
        let mut index = HashMap::with_capacity(table.rows.len());
        let mut taken: HashMap<u32, String> = HashMap::new();
        let mut duplicates = 0u64;

        for (row_no, row) in table.rows.into_iter().enumerate() {
            let label = row.get(label_col).cloned().unwrap_or_default();
            if index.contains_key(&label) {
                duplicates += 1;
                continue;
            }
            let id = match id_col {
                Some(c) => {
                    let raw = row.get(c).map(String::as_str).unwrap_or("");
                    raw.parse::<u32>().with_context(|| {
                        format!("node row {}: id {:?} is not a non-negative integer", row_no, raw)
                    })?
                }
                None => ids.len() as u32,
            };
            if let Some(other) = taken.insert(id, label.clone()) {
                bail!("node id {} used by both {:?} and {:?}", id, other, label);
            }

            let mut values = Vec::with_capacity(columns.len());
            values.push(label.clone());
            values.extend(attr_cols.iter().map(|&i| row.get(i).cloned().unwrap_or_default()));

            index.insert(label, id);
            ids.push(id);
            rows.push(values);
        }
        if duplicates > 0 {
            warn!(duplicates, "duplicate node labels dropped, first occurrence kept");
        }

        let dimension = ids.iter().max().map(|&m| m as usize + 1).unwrap_or(0);
        if dimension > ids.len() + MAX_ID_GAP {
            bail!(
                "largest node id {} leaves {} unused ids for {} nodes (limit {})",
                dimension - 1,
                dimension - ids.len(),
                ids.len(),
                MAX_ID_GAP
            );
        }
        Ok(Self {
            columns,
            ids,
            rows,
            index,
            dimension,
        })
    }

    /// Left-join `other` on `label`; only columns not yet present are added.
    pub fn join(&mut self, other: &RawTable) -> Result<()> {
        let Some(label_col) = other.column("label") else {
            bail!("joined node table has no `label` column");
        };
        let new_cols: Vec<usize> = (0..other.headers.len())
            .filter(|&i| i != label_col && other.headers[i] != "id")
            .filter(|&i| !self.columns.contains(&other.headers[i]))
            .collect();
        if new_cols.is_empty() {
            return Ok(());
        }

        let mut by_label: HashMap<&str, &Vec<String>> = HashMap::with_capacity(other.rows.len());
        for row in &other.rows {
            if let Some(label) = row.get(label_col) {
                by_label.entry(label.as_str()).or_insert(row);
            }
        }

        let mut matched = 0usize;
        for values in &mut self.rows {
            let hit = by_label.get(values[0].as_str());
            if hit.is_some() {
                matched += 1;
            }
            for &c in &new_cols {
                values.push(hit.and_then(|r| r.get(c)).cloned().unwrap_or_default());
            }
        }
        self.columns
            .extend(new_cols.iter().map(|&c| other.headers[c].clone()));
        info!(
            columns = new_cols.len(),
            matched,
            nodes = self.rows.len(),
            "joined node attributes"
        );
        Ok(())
    }

    /// Read the main file and join every other file onto it.
    pub fn load(conf: &NodeConf) -> Result<Self> {
        if conf.add_geo {
            bail!("geographic node enrichment (add_geo) is not supported");
        }
        let Some(main) = conf.files.get(conf.main_file) else {
            bail!(
                "main_file index {} out of range for {} node files",
                conf.main_file,
                conf.files.len()
            );
        };
        let read = |file: &str| -> Result<RawTable> {
            let path = format!("{}{}", conf.input_folder_prefix, file);
            read_table(Path::new(&path), conf.sep, Some(&conf.colmap))
                .with_context(|| format!("reading node file {}", path))
        };

        let mut nodes = Self::from_main(read(main.as_str())?)?;
        for (i, file) in conf.files.iter().enumerate() {
            if i != conf.main_file {
                nodes.join(&read(file.as_str())?)?;
            }
        }
        info!(nodes = nodes.count(), dimension = nodes.dimension(), "nodes initialised");
        Ok(nodes)
    }

    pub fn id_of(&self, label: &str) -> Option<u32> {
        self.index.get(label).copied()
    }

    /// Number of nodes.
    pub fn count(&self) -> usize {
        self.ids.len()
    }

    /// Side length of the adjacency matrix.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Output form: `id` first, rows ordered by id.
    pub fn to_table(&self) -> RawTable {
        let mut order: Vec<usize> = (0..self.ids.len()).collect();
        order.sort_unstable_by_key(|&i| self.ids[i]);

        let mut headers = Vec::with_capacity(self.columns.len() + 1);
        headers.push("id".to_string());
        headers.extend(self.columns.iter().cloned());

        let rows = order
            .into_iter()
            .map(|i| {
                let mut row = Vec::with_capacity(headers.len());
                row.push(self.ids[i].to_string());
                row.extend(self.rows[i].iter().cloned());
                row
            })
            .collect();
        RawTable { headers, rows }
    }
}
