//! Sparse matrices in the `.npz` layout written by `scipy.sparse.save_npz`:
//! a zip archive of `.npy` arrays named `indices`, `indptr`, `format`,
//! `shape` and `data`.
use anyhow::{anyhow, bail, Context, Result};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};
use tracing::debug;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

use super::csr::CsrMatrix;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;
const WRITE_CHUNK: usize = 64 * 1024;

/// One decoded `.npy` member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyArray {
    pub descr: String,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl NpyArray {
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Little-endian signed integers of either width, widened to `i64`.
    pub fn to_i64_vec(&self) -> Result<Vec<i64>> {
        match self.descr.as_str() {
            "<i4" => Ok(self
                .data
                .chunks_exact(4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64)
                .collect()),
            "<i8" => Ok(self
                .data
                .chunks_exact(8)
                .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect()),
            other => bail!("unsupported integer dtype {:?}", other),
        }
    }

    /// Value of a zero-dimensional byte-string array such as `format.npy`.
    pub fn to_bytes_str(&self) -> Result<String> {
        if !self.descr.starts_with("|S") {
            bail!("expected a byte-string dtype, got {:?}", self.descr);
        }
        let end = self.data.iter().position(|&b| b == 0).unwrap_or(self.data.len());
        Ok(String::from_utf8_lossy(&self.data[..end]).into_owned())
    }
}

fn shape_literal(shape: &[usize]) -> String {
    match shape {
        [] => "()".to_string(),
        [n] => format!("({},)", n),
        dims => format!(
            "({})",
            dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    }
}

/// Version 1.0 `.npy` header, padded so the payload starts on a 64-byte boundary.
pub fn npy_header(descr: &str, shape: &[usize]) -> Result<Vec<u8>> {
    let dict = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        descr,
        shape_literal(shape)
    );
    let unpadded = NPY_MAGIC.len() + 2 + 2 + dict.len() + 1;
    let total = unpadded.div_ceil(HEADER_ALIGN) * HEADER_ALIGN;
    let header_len = u16::try_from(total - NPY_MAGIC.len() - 4)
        .map_err(|_| anyhow!("npy header for shape {:?} is too long", shape))?;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.resize(total - 1, b' ');
    out.push(b'\n');
    Ok(out)
}

/// Write integers as `<i4` or `<i8`, buffering in fixed-size chunks.
fn write_ints<W: Write, I: Iterator<Item = i64>>(w: &mut W, values: I, wide: bool) -> Result<()> {
    let mut buf = Vec::with_capacity(WRITE_CHUNK);
    for v in values {
        if wide {
            buf.extend_from_slice(&v.to_le_bytes());
        } else {
            let narrow = i32::try_from(v).map_err(|_| anyhow!("value {} does not fit int32", v))?;
            buf.extend_from_slice(&narrow.to_le_bytes());
        }
        if buf.len() >= WRITE_CHUNK {
            w.write_all(&buf)?;
            buf.clear();
        }
    }
    w.write_all(&buf)?;
    Ok(())
}

/// Save `m` as a deflate-compressed `.npz`. Returns the file size in bytes.
pub fn save_csr_npz(path: &Path, m: &CsrMatrix) -> Result<u64> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    let (index_descr, wide_index) = if m.fits_i32() {
        ("<i4", false)
    } else {
        ("<i8", true)
    };
    let large = m.nnz().saturating_mul(8) >= u32::MAX as usize;
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(large);

    zip.start_file("indices.npy", options)?;
    zip.write_all(&npy_header(index_descr, &[m.nnz()])?)?;
    write_ints(&mut zip, m.indices.iter().map(|&c| c as i64), wide_index)?;

    zip.start_file("indptr.npy", options)?;
    zip.write_all(&npy_header(index_descr, &[m.indptr.len()])?)?;
    write_ints(&mut zip, m.indptr.iter().map(|&p| p as i64), wide_index)?;

    zip.start_file("format.npy", options)?;
    zip.write_all(&npy_header("|S3", &[])?)?;
    zip.write_all(b"csr")?;

    zip.start_file("shape.npy", options)?;
    zip.write_all(&npy_header("<i8", &[2])?)?;
    write_ints(&mut zip, [m.shape.0 as i64, m.shape.1 as i64].into_iter(), true)?;

    zip.start_file("data.npy", options)?;
    zip.write_all(&npy_header("<i8", &[m.nnz()])?)?;
    write_ints(&mut zip, m.data.iter().copied(), true)?;

    zip.finish()
        .with_context(|| format!("finishing {}", path.display()))?
        .flush()?;

    let size = fs::metadata(path)?.len();
    debug!(path = %path.display(), nnz = m.nnz(), bytes = size, "wrote npz");
    Ok(size)
}

fn header_value<'a>(header: &'a str, key: &str) -> Result<&'a str> {
    let needle = format!("'{}':", key);
    let start = header
        .find(&needle)
        .map(|i| i + needle.len())
        .ok_or_else(|| anyhow!("npy header has no {:?} entry", key))?;
    Ok(header[start..].trim_start())
}

/// Decode one `.npy` byte buffer (versions 1 to 3, C order only).
pub fn parse_npy(bytes: &[u8]) -> Result<NpyArray> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        bail!("not an npy array (bad magic)");
    }
    let (header_start, header_len) = match bytes[6] {
        1 => (10, u16::from_le_bytes([bytes[8], bytes[9]]) as usize),
        2 | 3 if bytes.len() >= 12 => (
            12,
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
        ),
        v => bail!("unsupported npy version {}", v),
    };
    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        bail!("truncated npy header");
    }
    let header = std::str::from_utf8(&bytes[header_start..data_start])
        .context("npy header is not valid text")?;

    let descr_rest = header_value(header, "descr")?;
    let descr = descr_rest
        .strip_prefix('\'')
        .and_then(|s| s.split('\'').next())
        .ok_or_else(|| anyhow!("malformed descr in npy header"))?
        .to_string();

    if header_value(header, "fortran_order")?.starts_with("True") {
        bail!("fortran-ordered arrays are not supported");
    }

    let shape_rest = header_value(header, "shape")?;
    let shape_body = shape_rest
        .strip_prefix('(')
        .and_then(|s| s.split(')').next())
        .ok_or_else(|| anyhow!("malformed shape in npy header"))?;
    let shape = shape_body
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().with_context(|| format!("bad dimension {:?}", s)))
        .collect::<Result<Vec<_>>>()?;

    Ok(NpyArray {
        descr,
        shape,
        data: bytes[data_start..].to_vec(),
    })
}

/// Read every `.npy` member of an `.npz`, keyed by name without extension.
pub fn read_npz(path: &Path) -> Result<BTreeMap<String, NpyArray>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("reading zip archive {}", path.display()))?;

    let mut members = BTreeMap::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        let Some(key) = name.strip_suffix(".npy") else {
            continue;
        };
        let key = key.to_string();
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut buf)
            .with_context(|| format!("reading {} from {}", name, path.display()))?;
        let array = parse_npy(&buf).with_context(|| format!("decoding {}", name))?;
        members.insert(key, array);
    }
    Ok(members)
}

/// Load a CSR matrix written by [`save_csr_npz`] or by scipy.
pub fn load_csr_npz(path: &Path) -> Result<CsrMatrix> {
    let mut members = read_npz(path)?;
    let mut take = |name: &str| {
        members
            .remove(name)
            .ok_or_else(|| anyhow!("{} has no {}.npy member", path.display(), name))
    };

    let format = take("format")?.to_bytes_str()?;
    if format != "csr" {
        bail!("{} holds a {:?} matrix, expected csr", path.display(), format);
    }
    let shape = take("shape")?.to_i64_vec()?;
    let [rows, cols] = shape[..] else {
        bail!("{} has shape {:?}, expected two dimensions", path.display(), shape);
    };
    let indptr = take("indptr")?.to_i64_vec()?;
    let indices = take("indices")?.to_i64_vec()?;
    let data = take("data")?.to_i64_vec()?;

    if indptr.len() != rows as usize + 1 || indices.len() != data.len() {
        bail!("{} has inconsistent CSR array lengths", path.display());
    }
    Ok(CsrMatrix {
        shape: (rows as usize, cols as usize),
        indptr: indptr.into_iter().map(|p| p as u64).collect(),
        indices: indices.into_iter().map(|c| c as u32).collect(),
        data,
    })
}
