use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use flate2::{read::MultiGzDecoder, write::GzEncoder, Compression};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};
use tracing::{debug, warn};

use crate::config::ColumnMap;

/// A small in-memory table: header names plus string rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// Trim whitespace and strip one pair of outer quotes.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

fn is_gz(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}

/// Open a file for reading, gunzipping it when the name ends in `.gz`.
pub fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);
    if is_gz(path) {
        Ok(Box::new(MultiGzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// CSV reader over `path` with the given field separator and a header row.
pub fn csv_reader(path: &Path, sep: char) -> Result<csv::Reader<Box<dyn Read>>> {
    if !sep.is_ascii() {
        return Err(anyhow!("separator {:?} is not a single-byte character", sep));
    }
    Ok(ReaderBuilder::new()
        .delimiter(sep as u8)
        .has_headers(true)
        .flexible(true)
        .from_reader(open_input(path)?))
}

/// Which source columns survive a read, and what they are called afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSelection {
    pub indices: Vec<usize>,
    pub names: Vec<String>,
}

impl ColumnSelection {
    /// Keep the columns named in `colmap` (renamed), or every column when no
    /// map is given. When two source columns map to the same name the first
    /// one in header order is used.
    pub fn new(headers: &StringRecord, colmap: Option<&ColumnMap>) -> Self {
        let mut indices = Vec::new();
        let mut names: Vec<String> = Vec::new();
        for (idx, raw) in headers.iter().enumerate() {
            let source = clean_str(raw);
            let target = match colmap {
                Some(map) => match map.target(&source) {
                    Some(t) => t.to_string(),
                    None => continue,
                },
                None => source.clone(),
            };
            if names.contains(&target) {
                warn!(column = %source, target = %target, "duplicate mapped column ignored");
                continue;
            }
            indices.push(idx);
            names.push(target);
        }
        Self { indices, names }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Raw field index in the source record for canonical column `name`.
    pub fn source_index(&self, name: &str) -> Option<usize> {
        self.position(name).map(|p| self.indices[p])
    }

    /// Pick and clean the selected fields; missing trailing fields read as "".
    pub fn project(&self, record: &StringRecord) -> Vec<String> {
        self.indices
            .iter()
            .map(|&i| record.get(i).map(clean_str).unwrap_or_default())
            .collect()
    }
}

/// Read a whole delimited file, keeping only mapped columns.
pub fn read_table(path: &Path, sep: char, colmap: Option<&ColumnMap>) -> Result<RawTable> {
    let mut rdr = csv_reader(path, sep)?;
    let headers = rdr
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .clone();
    let selection = ColumnSelection::new(&headers, colmap);

    let mut rows = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record =
            result.with_context(|| format!("CSV parse error in {} at record {}", path.display(), idx))?;
        rows.push(selection.project(&record));
    }
    debug!(
        path = %path.display(),
        columns = selection.names.len(),
        rows = rows.len(),
        "read table"
    );
    Ok(RawTable {
        headers: selection.names,
        rows,
    })
}

fn write_records<W: Write>(inner: W, table: &RawTable) -> Result<W> {
    let mut wtr = WriterBuilder::new().from_writer(inner);
    wtr.write_record(&table.headers)?;
    for row in &table.rows {
        wtr.write_record(row)?;
    }
    wtr.into_inner()
        .map_err(|e| anyhow!("flushing CSV writer: {}", e.error()))
}

/// Write `table` as comma-separated text, gzip-compressed for `.gz` paths.
pub fn write_table(path: &Path, table: &RawTable) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let out = BufWriter::new(file);
    if is_gz(path) {
        let encoder = write_records(GzEncoder::new(out, Compression::default()), table)?;
        encoder.finish()?.flush()?;
    } else {
        write_records(out, table)?.flush()?;
    }
    debug!(path = %path.display(), rows = table.rows.len(), "wrote table");
    Ok(())
}
