// Compressed sparse column storage and its binary layout.

use std::io::Write;
use std::path::Path;

use log::info;
use ndarray::Array2;

use crate::error::{PrepError, Result};
use crate::matrix_io::{read_whole_file, write_atomically};

/// Base of the row/column indices written to a sparse matrix file.
///
/// Indices are always 0-based in memory; the base only applies on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexBase {
    Zero,
    One,
}

impl IndexBase {
    fn offset(self) -> i64 {
        match self {
            IndexBase::Zero => 0,
            IndexBase::One => 1,
        }
    }
}

/// Sparse matrix in compressed-column form.
///
/// `col_ptr[j]..col_ptr[j + 1]` is the range of `row_indices`/`values` that belongs
/// to column `j`. Row indices are strictly increasing within a column.
#[derive(Clone, Debug, PartialEq)]
pub struct CscMatrix {
    nrows: usize,
    ncols: usize,
    col_ptr: Vec<usize>,
    row_indices: Vec<usize>,
    values: Vec<f64>,
}

impl CscMatrix {
    /// An `nrows x ncols` matrix with no stored entries.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            col_ptr: vec![0; ncols + 1],
            row_indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Builds a matrix from `(row, col, value)` triplets in any order.
    ///
    /// Duplicate coordinates are summed and entries that end up exactly zero are dropped.
    ///
    /// # Errors
    /// `PrepError::InvalidArgument` if a coordinate is outside the matrix.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self> {
        if let Some(&(r, c, _)) = triplets.iter().find(|&&(r, c, _)| r >= nrows || c >= ncols) {
            return Err(PrepError::invalid(format!(
                "triplet ({}, {}) lies outside a {} x {} matrix",
                r, c, nrows, ncols
            )));
        }

        let mut sorted: Vec<(usize, usize, f64)> = triplets.to_vec();
        sorted.sort_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));

        let mut merged: Vec<(usize, usize, f64)> = Vec::with_capacity(sorted.len());
        for (r, c, v) in sorted {
            match merged.last_mut() {
                Some(last) if last.0 == r && last.1 == c => last.2 += v,
                _ => merged.push((r, c, v)),
            }
        }
        merged.retain(|&(_, _, v)| v != 0.0);

        Ok(Self::from_sorted_unique(nrows, ncols, &merged))
    }

    /// Stores every nonzero entry of a dense matrix.
    pub fn from_dense(dense: &Array2<f64>) -> Self {
        let (nrows, ncols) = dense.dim();
        let mut col_ptr = Vec::with_capacity(ncols + 1);
        let mut row_indices = Vec::new();
        let mut values = Vec::new();
        col_ptr.push(0);
        for column in dense.columns() {
            for (row, &value) in column.iter().enumerate() {
                if value != 0.0 {
                    row_indices.push(row);
                    values.push(value);
                }
            }
            col_ptr.push(values.len());
        }
        Self {
            nrows,
            ncols,
            col_ptr,
            row_indices,
            values,
        }
    }

    /// Triplets must already be sorted column-major without repeated coordinates.
    fn from_sorted_unique(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let mut col_ptr = vec![0usize; ncols + 1];
        for &(_, c, _) in triplets {
            col_ptr[c + 1] += 1;
        }
        for j in 0..ncols {
            col_ptr[j + 1] += col_ptr[j];
        }
        Self {
            nrows,
            ncols,
            col_ptr,
            row_indices: triplets.iter().map(|t| t.0).collect(),
            values: triplets.iter().map(|t| t.2).collect(),
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn row_indices(&self) -> &[usize] {
        &self.row_indices
    }

    pub fn col_ptr(&self) -> &[usize] {
        &self.col_ptr
    }

    /// Stored entries as `(row, col, value)` in column-major order.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.ncols).flat_map(move |c| {
            (self.col_ptr[c]..self.col_ptr[c + 1]).map(move |k| (self.row_indices[k], c, self.values[k]))
        })
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.nrows, self.ncols));
        for (r, c, v) in self.triplets() {
            dense[[r, c]] = v;
        }
        dense
    }

    /// Largest absolute stored value; zero when nothing is stored.
    pub fn max_abs(&self) -> f64 {
        self.values.iter().fold(0.0f64, |acc, v| acc.max(v.abs()))
    }
}

fn to_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| PrepError::invalid(format!("{} {} does not fit in i32", what, value)))
}

/// Saves a sparse matrix as
/// `[i32 rows][i32 cols][i32 nnz][nnz f64 values][nnz i32 rows][nnz i32 cols]`, little-endian.
///
/// Entries are written in storage (column-major) order. With `IndexBase::One`
/// every written index is shifted by one for 1-based consumers.
///
/// # Errors
/// `PrepError::Io` on create/write failure, `PrepError::InvalidArgument` if a
/// dimension, count or shifted index does not fit in `i32`.
pub fn save_sparse<P: AsRef<Path>>(path: P, matrix: &CscMatrix, base: IndexBase) -> Result<()> {
    let path = path.as_ref();
    let rows = to_i32(matrix.nrows, "row count")?;
    let cols = to_i32(matrix.ncols, "column count")?;
    let nnz = to_i32(matrix.nnz(), "nonzero count")?;
    let offset = base.offset() as usize;
    // Largest shifted index must also fit.
    to_i32(matrix.nrows.max(matrix.ncols).saturating_sub(1) + offset, "index")?;

    write_atomically(path, |writer| {
        writer.write_all(&rows.to_le_bytes())?;
        writer.write_all(&cols.to_le_bytes())?;
        writer.write_all(&nnz.to_le_bytes())?;
        for value in &matrix.values {
            writer.write_all(&value.to_le_bytes())?;
        }
        for &row in &matrix.row_indices {
            writer.write_all(&((row + offset) as i32).to_le_bytes())?;
        }
        for (_, col, _) in matrix.triplets() {
            writer.write_all(&((col + offset) as i32).to_le_bytes())?;
        }
        Ok(())
    })?;

    info!(
        "Saved sparse {} x {} matrix ({} nonzeros, {:?}-based) to {:?}",
        matrix.nrows,
        matrix.ncols,
        matrix.nnz(),
        base,
        path
    );
    Ok(())
}

struct LeCursor<'a> {
    path: &'a Path,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> LeCursor<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(PrepError::format(
                self.path,
                format!("truncated while reading {} at byte {}", what, self.pos),
            )),
        }
    }

    fn i32(&mut self, what: &str) -> Result<i32> {
        let b = self.take(4, what)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self, what: &str) -> Result<f64> {
        let b = self.take(8, what)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(f64::from_le_bytes(buf))
    }
}

/// Loads a sparse matrix written by [`save_sparse`], undoing the index shift of `base`.
///
/// # Errors
/// `PrepError::Io` if the file cannot be read; `PrepError::Format` on truncation,
/// negative sizes, indices outside the declared shape, or entries that are not
/// sorted column-major with increasing rows.
pub fn load_sparse<P: AsRef<Path>>(path: P, base: IndexBase) -> Result<CscMatrix> {
    let path = path.as_ref();
    let bytes = read_whole_file(path)?;
    let mut cursor = LeCursor {
        path,
        bytes: &bytes,
        pos: 0,
    };

    let mut dimension = |what: &str| -> Result<usize> {
        let v = cursor.i32(what)?;
        usize::try_from(v).map_err(|_| PrepError::format(path, format!("negative {}: {}", what, v)))
    };
    let nrows = dimension("row count")?;
    let ncols = dimension("column count")?;
    let nnz = dimension("nonzero count")?;

    let mut values = Vec::with_capacity(nnz.min(bytes.len() / 8));
    for _ in 0..nnz {
        values.push(cursor.f64("values")?);
    }
    let offset = base.offset();
    let mut read_indices = |what: &str, bound: usize| -> Result<Vec<usize>> {
        let mut out = Vec::with_capacity(nnz.min(bytes.len() / 4));
        for _ in 0..nnz {
            let raw = cursor.i32(what)? as i64 - offset;
            if raw < 0 || raw as usize >= bound {
                return Err(PrepError::format(
                    path,
                    format!("{} {} outside 0..{} after removing base {}", what, raw, bound, offset),
                ));
            }
            out.push(raw as usize);
        }
        Ok(out)
    };
    let row_indices = read_indices("row index", nrows)?;
    let col_indices = read_indices("column index", ncols)?;

    let mut col_ptr = vec![0usize; ncols + 1];
    for k in 0..nnz {
        if k > 0 {
            let previous = (col_indices[k - 1], row_indices[k - 1]);
            if previous >= (col_indices[k], row_indices[k]) {
                return Err(PrepError::format(
                    path,
                    format!("entry {} is not in increasing column-major order", k),
                ));
            }
        }
        col_ptr[col_indices[k] + 1] += 1;
    }
    for j in 0..ncols {
        col_ptr[j + 1] += col_ptr[j];
    }

    info!("Loaded sparse {} x {} matrix ({} nonzeros) from {:?}", nrows, ncols, nnz, path);
    Ok(CscMatrix {
        nrows,
        ncols,
        col_ptr,
        row_indices,
        values,
    })
}
