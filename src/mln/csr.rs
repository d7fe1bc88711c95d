/// Compressed sparse row matrix with `i64` values, the in-memory form of one
/// layer's adjacency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrMatrix {
    pub shape: (usize, usize),
    pub indptr: Vec<u64>, // [rows + 1] row -> first entry
    pub indices: Vec<u32>,
    pub data: Vec<i64>,
}

impl CsrMatrix {
    /// Build from triplets already sorted by `(row, col)` with no repeats.
    pub fn from_sorted_triplets(n_rows: usize, n_cols: usize, triplets: &[(u32, u32, i64)]) -> Self {
        // Count entries per row
        let mut indptr = vec![0u64; n_rows + 1];
        for &(row, _, _) in triplets {
            indptr[row as usize + 1] += 1;
        }
        // Prefix sum
        for i in 0..n_rows {
            indptr[i + 1] += indptr[i];
        }

        let indices = triplets.iter().map(|&(_, col, _)| col).collect();
        let data = triplets.iter().map(|&(_, _, v)| v).collect();
        Self {
            shape: (n_rows, n_cols),
            indptr,
            indices,
            data,
        }
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Column indices and values of one row.
    pub fn row(&self, row: usize) -> (&[u32], &[i64]) {
        let start = self.indptr[row] as usize;
        let end = self.indptr[row + 1] as usize;
        (&self.indices[start..end], &self.data[start..end])
    }

    pub fn get(&self, row: usize, col: usize) -> Option<i64> {
        if row >= self.shape.0 {
            return None;
        }
        let (cols, vals) = self.row(row);
        cols.binary_search(&(col as u32)).ok().map(|i| vals[i])
    }

    /// Whether index arrays fit numpy's `int32`.
    pub fn fits_i32(&self) -> bool {
        let limit = i32::MAX as usize;
        self.nnz() <= limit && self.shape.0 <= limit && self.shape.1 <= limit
    }

    /// How often each distinct value occurs, ascending by value.
    pub fn value_counts(&self) -> Vec<(i64, usize)> {
        let mut counts = std::collections::BTreeMap::new();
        for &v in &self.data {
            *counts.entry(v).or_insert(0usize) += 1;
        }
        counts.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_rows_from_sorted_triplets() {
        let m = CsrMatrix::from_sorted_triplets(4, 4, &[(0, 1, 1), (0, 3, 2), (2, 0, 4)]);
        assert_eq!(m.indptr, vec![0, 2, 2, 3, 3]);
        assert_eq!(m.indices, vec![1, 3, 0]);
        assert_eq!(m.data, vec![1, 2, 4]);
        assert_eq!(m.get(0, 3), Some(2));
        assert_eq!(m.get(1, 0), None);
        assert_eq!(m.get(9, 0), None);
        assert_eq!(m.row(1).0.len(), 0);
        assert_eq!(m.value_counts(), vec![(1, 1), (2, 1), (4, 1)]);
    }

    #[test]
    fn empty_matrix_has_zero_indptr() {
        let m = CsrMatrix::from_sorted_triplets(3, 3, &[]);
        assert_eq!(m.indptr, vec![0; 4]);
        assert_eq!(m.nnz(), 0);
        assert!(m.fits_i32());
    }
}
