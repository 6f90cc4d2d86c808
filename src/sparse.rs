use ndarray::{Array2, ArrayBase, Data, Ix2, Zip};
use crate::error::{Error, Result};


/// Sparse matrix in CSR format with `f32` values.
/// Column indices are sorted inside every row and unique.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseMatrix {
    rows: usize,
    cols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f32>,
}

impl SparseMatrix {

    /// Builds a matrix from `(row, col, value)` entries, duplicate positions are summed.
    pub fn from_triplets(rows: usize, cols: usize, triplets: &[(usize, usize, f32)]) -> Result<SparseMatrix> {

        if let Some((i, j, _)) = triplets.iter().find(|(i, j, _)| *i >= rows || *j >= cols) {
            return Err(Error::Shape(format!("entry ({}, {}) out of bounds for a {}x{} matrix", i, j, rows, cols)));
        }

        let mut sorted = triplets.to_vec();
        sorted.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut row_ptr = vec![0; rows + 1];
        let mut col_idx = Vec::with_capacity(sorted.len());
        let mut values: Vec<f32> = Vec::with_capacity(sorted.len());

        let mut last: Option<(usize, usize)> = None;
        for (i, j, v) in sorted {
            if last == Some((i, j)) {
                if let Some(tail) = values.last_mut() {
                    *tail += v;
                }
                continue;
            }
            row_ptr[i + 1] += 1;
            col_idx.push(j);
            values.push(v);
            last = Some((i, j));
        }

        for i in 0..rows {
            row_ptr[i + 1] += row_ptr[i];
        }

        Ok(Self { rows, cols, row_ptr, col_idx, values })
    }

    /// Square 0/1 matrix from an edge list, repeated edges collapse to a single 1.
    pub fn from_edges(num_nodes: usize, edges: &[(usize, usize)]) -> Result<SparseMatrix> {
        let triplets: Vec<(usize, usize, f32)> = edges.iter().map(|&(u, v)| (u, v, 1.0)).collect();
        let mut matrix = SparseMatrix::from_triplets(num_nodes, num_nodes, &triplets)?;
        matrix.values.iter_mut().for_each(|v| *v = 1.0);
        Ok(matrix)
    }

    pub fn from_diag(diag: &[f32]) -> SparseMatrix {
        let n = diag.len();
        Self {
            rows: n,
            cols: n,
            row_ptr: (0..=n).collect(),
            col_idx: (0..n).collect(),
            values: diag.to_vec(),
        }
    }

    pub fn identity(n: usize) -> SparseMatrix {
        SparseMatrix::from_diag(&vec![1.0; n])
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn nrows(&self) -> usize {
        self.rows
    }

    pub fn ncols(&self) -> usize {
        self.cols
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    /// number of stored entries
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, i: usize, j: usize) -> f32 {
        if i >= self.rows {
            return 0.0;
        }
        let (start, end) = (self.row_ptr[i], self.row_ptr[i + 1]);
        match self.col_idx[start..end].binary_search(&j) {
            Ok(k) => self.values[start + k],
            Err(_) => 0.0,
        }
    }

    /// Iterates stored entries row by row.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        (0..self.rows).flat_map(move |i| {
            (self.row_ptr[i]..self.row_ptr[i + 1]).map(move |k| (i, self.col_idx[k], self.values[k]))
        })
    }

    pub fn row_sums(&self) -> Vec<f32> {
        (0..self.rows)
            .map(|i| self.values[self.row_ptr[i]..self.row_ptr[i + 1]].iter().sum())
            .collect()
    }

    pub fn transpose(&self) -> SparseMatrix {

        let mut row_ptr = vec![0; self.cols + 1];
        for &j in &self.col_idx {
            row_ptr[j + 1] += 1;
        }
        for j in 0..self.cols {
            row_ptr[j + 1] += row_ptr[j];
        }

        // rows are visited in order so every transposed row stays sorted
        let mut next = row_ptr.clone();
        let mut col_idx = vec![0; self.nnz()];
        let mut values = vec![0.0; self.nnz()];
        for (i, j, v) in self.iter() {
            let slot = next[j];
            col_idx[slot] = i;
            values[slot] = v;
            next[j] += 1;
        }

        Self { rows: self.cols, cols: self.rows, row_ptr, col_idx, values }
    }

    pub fn add(&self, other: &SparseMatrix) -> Result<SparseMatrix> {
        if self.shape() != other.shape() {
            return Err(Error::Shape(format!("cannot add {:?} and {:?}", self.shape(), other.shape())));
        }
        let triplets: Vec<(usize, usize, f32)> = self.iter().chain(other.iter()).collect();
        SparseMatrix::from_triplets(self.rows, self.cols, &triplets)
    }

    pub fn scale(&self, alpha: f32) -> SparseMatrix {
        let mut scaled = self.clone();
        scaled.values.iter_mut().for_each(|v| *v *= alpha);
        scaled
    }

    /// Computes `diag(left) * self * diag(right)`.
    pub fn scale_rows_cols(&self, left: &[f32], right: &[f32]) -> Result<SparseMatrix> {
        if left.len() != self.rows || right.len() != self.cols {
            return Err(Error::Shape(format!(
                "diagonal scaling with lengths ({}, {}) for a {:?} matrix", left.len(), right.len(), self.shape()
            )));
        }
        let mut scaled = self.clone();
        for i in 0..self.rows {
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                scaled.values[k] *= left[i] * right[self.col_idx[k]];
            }
        }
        Ok(scaled)
    }

    /// Sparse x dense product, output rows are computed in parallel.
    pub fn matmul<S>(&self, dense: &ArrayBase<S, Ix2>) -> Result<Array2<f32>>
    where
        S: Data<Elem = f32>,
    {
        if self.cols != dense.nrows() {
            return Err(Error::Shape(format!(
                "cannot multiply {:?} by ({}, {})", self.shape(), dense.nrows(), dense.ncols()
            )));
        }

        let dense = dense.view();
        let mut out = Array2::<f32>::zeros((self.rows, dense.ncols()));
        Zip::indexed(out.rows_mut()).par_for_each(|i, mut row| {
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                row.scaled_add(self.values[k], &dense.row(self.col_idx[k]));
            }
        });
        Ok(out)
    }

    pub fn to_dense(&self) -> Array2<f32> {
        let mut dense = Array2::zeros((self.rows, self.cols));
        for (i, j, v) in self.iter() {
            dense[[i, j]] = v;
        }
        dense
    }

}
