// Whitespace-delimited phenotype tables.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, info};
use ndarray::Array2;

use crate::error::{PrepError, Result};

fn parse_value(token: &str) -> Option<f64> {
    if token.eq_ignore_ascii_case("na") || token.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Reads a phenotype table into a `(rows, tokens - skip_columns)` matrix.
///
/// Tokens are separated by spaces or tabs and blank lines are ignored. The first
/// `skip_columns` tokens of every row (family and individual IDs in a PLINK `.pheno`
/// file) are dropped. `NA` and `nan` are read as missing (`NaN`).
///
/// # Errors
/// * `PrepError::Io` if the file cannot be opened or read.
/// * `PrepError::Format` if a row has a different token count than the first row,
///   or a kept token is not a finite number (`inf` and overflowing literals included).
/// * `PrepError::InvalidArgument` if `skip_columns` leaves no value columns.
pub fn read_pheno<P: AsRef<Path>>(path: P, skip_columns: usize) -> Result<Array2<f64>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| PrepError::io(path, e))?;
    let reader = BufReader::new(file);

    let mut n_tokens: Option<usize> = None;
    let mut n_rows = 0usize;
    let mut values: Vec<f64> = Vec::new();

    for (line_index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| PrepError::io(path, e))?;
        let line_no = line_index + 1;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        match n_tokens {
            None => {
                if skip_columns >= tokens.len() {
                    return Err(PrepError::invalid(format!(
                        "skipping {} columns leaves no values in {:?}, whose rows have {} columns",
                        skip_columns,
                        path,
                        tokens.len()
                    )));
                }
                n_tokens = Some(tokens.len());
            }
            Some(expected) if expected != tokens.len() => {
                return Err(PrepError::format(
                    path,
                    format!(
                        "line {} has {} columns, expected {}",
                        line_no,
                        tokens.len(),
                        expected
                    ),
                ));
            }
            Some(_) => {}
        }

        for (offset, token) in tokens[skip_columns..].iter().enumerate() {
            let value = parse_value(token).ok_or_else(|| {
                PrepError::format(
                    path,
                    format!(
                        "line {}, column {}: '{}' is not a finite number",
                        line_no,
                        skip_columns + offset + 1,
                        token
                    ),
                )
            })?;
            values.push(value);
        }
        n_rows += 1;
    }

    let n_cols = n_tokens.map_or(0, |n| n - skip_columns);
    let matrix = Array2::from_shape_vec((n_rows, n_cols), values)
        .map_err(|e| PrepError::format(path, format!("shape error: {}", e)))?;

    debug!("Skipped {} leading columns in {:?}", skip_columns, path);
    info!("Loaded {} x {} phenotype matrix from {:?}", n_rows, n_cols, path);
    Ok(matrix)
}
