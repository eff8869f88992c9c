// Column standardization of genotype and phenotype matrices.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};
use crate::matrix_io::write_atomically;

/// Columns whose variance falls below this value are centered but never scaled.
pub const VAR_TOL: f64 = 1e-9;

/// Variance estimator used to scale a column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StandardizationModel {
    /// Sample variance of the observed values (`n - 1` denominator).
    #[default]
    Sd,
    /// Binomial variance `p(1 - p)` with allele frequency `p = mean / 2`.
    /// Only meaningful for 0/1/2 genotype columns.
    Binomial,
}

impl StandardizationModel {
    fn variance(self, observed: &[f64], mean: f64) -> f64 {
        match self {
            StandardizationModel::Sd => {
                if observed.len() < 2 {
                    return 0.0;
                }
                let sum_sq: f64 = observed.iter().map(|v| (v - mean).powi(2)).sum();
                sum_sq / (observed.len() - 1) as f64
            }
            StandardizationModel::Binomial => {
                let p = mean / 2.0;
                p * (1.0 - p)
            }
        }
    }
}

/// Per-column centering and scaling parameters learned from a matrix.
///
/// Non-finite entries (`NaN`, `±inf`) are treated as missing: they are left out of
/// the mean and the variance, and are written as `0.0` (the column mean, after centering) when the
/// transform is applied. A column with no observed values gets mean `0` and is
/// left unscaled, so it maps to all zeros.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Standardization {
    model: StandardizationModel,
    /// Shape: (n_columns)
    mean: Array1<f64>,
    /// Divisor applied after centering; exactly `1.0` for unscaled columns.
    /// Shape: (n_columns)
    scale: Array1<f64>,
    scaled: Vec<bool>,
}

struct ColumnParams {
    mean: f64,
    scale: f64,
    scaled: bool,
}

fn fit_column(column: ArrayView1<f64>, scale: bool, model: StandardizationModel) -> ColumnParams {
    let observed: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
    if observed.is_empty() {
        return ColumnParams {
            mean: 0.0,
            scale: 1.0,
            scaled: false,
        };
    }
    let mean = observed.iter().sum::<f64>() / observed.len() as f64;
    if !scale {
        return ColumnParams {
            mean,
            scale: 1.0,
            scaled: false,
        };
    }
    let variance = model.variance(&observed, mean);
    if variance.is_finite() && variance >= VAR_TOL {
        ColumnParams {
            mean,
            scale: variance.sqrt(),
            scaled: true,
        }
    } else {
        ColumnParams {
            mean,
            scale: 1.0,
            scaled: false,
        }
    }
}

impl Standardization {
    /// Learns per-column means and, when `scale` is set, scale factors under `model`.
    pub fn fit(x: &Array2<f64>, scale: bool, model: StandardizationModel) -> Self {
        let params: Vec<ColumnParams> = x
            .axis_iter(Axis(1))
            .into_par_iter()
            .map(|column| fit_column(column, scale, model))
            .collect();

        let fitted = Self {
            model,
            mean: params.iter().map(|p| p.mean).collect(),
            scale: params.iter().map(|p| p.scale).collect(),
            scaled: params.iter().map(|p| p.scaled).collect(),
        };

        if scale {
            let unscaled = fitted.scaled.iter().filter(|s| !**s).count();
            if unscaled > 0 {
                warn!(
                    "{} of {} columns have variance below {:e} and are centered only",
                    unscaled,
                    fitted.n_columns(),
                    VAR_TOL
                );
            }
        }
        debug!(
            "Fitted {:?} standardization on {} x {} matrix",
            model,
            x.nrows(),
            x.ncols()
        );
        fitted
    }

    /// Applies the learned transform to a matrix with the same number of columns.
    ///
    /// # Errors
    /// `PrepError::InvalidArgument` if the column count differs from the fitted one.
    pub fn apply(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_columns() {
            return Err(PrepError::invalid(format!(
                "matrix has {} columns but the standardization was fitted on {}",
                x.ncols(),
                self.n_columns()
            )));
        }
        Ok(self.transform(x))
    }

    fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.to_owned();
        out.axis_iter_mut(Axis(1))
            .into_par_iter()
            .enumerate()
            .for_each(|(j, mut column)| {
                let (mean, scale) = (self.mean[j], self.scale[j]);
                column.mapv_inplace(|v| if v.is_finite() { (v - mean) / scale } else { 0.0 });
            });
        out
    }

    /// Fits on `x` and returns the transformed copy together with the parameters.
    pub fn fit_transform(
        x: &Array2<f64>,
        scale: bool,
        model: StandardizationModel,
    ) -> (Self, Array2<f64>) {
        let fitted = Self::fit(x, scale, model);
        let transformed = fitted.transform(x);
        (fitted, transformed)
    }

    pub fn model(&self) -> StandardizationModel {
        self.model
    }

    pub fn n_columns(&self) -> usize {
        self.mean.len()
    }

    pub fn means(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Divisors per column; `1.0` wherever the column was left unscaled.
    pub fn scales(&self) -> &Array1<f64> {
        &self.scale
    }

    /// Whether column `j` is divided by its scale factor. Panics if `j` is out of range.
    pub fn is_scaled(&self, j: usize) -> bool {
        self.scaled[j]
    }

    /// Saves the fitted parameters with bincode.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut encoded = Vec::new();
        bincode::serde::encode_into_std_write(self, &mut encoded, bincode::config::standard())
            .map_err(|e| PrepError::Serialization {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        write_atomically(path, |writer| writer.write_all(&encoded))?;
        info!("Saved standardization for {} columns to {:?}", self.n_columns(), path);
        Ok(())
    }

    /// Loads parameters written by [`save`](Self::save) and checks their consistency.
    ///
    /// # Errors
    /// `PrepError::Io` if the file cannot be opened, `PrepError::Serialization` if it
    /// cannot be decoded, `PrepError::Format` if the vectors disagree in length, a
    /// mean or scale factor is not finite (scale factors must also be positive), or an
    /// unscaled column carries a divisor other than `1.0`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PrepError::io(path, e))?;
        let mut reader = BufReader::new(file);
        let loaded: Standardization =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| PrepError::Serialization {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;

        let n = loaded.mean.len();
        if loaded.scale.len() != n || loaded.scaled.len() != n {
            return Err(PrepError::format(
                path,
                format!(
                    "inconsistent lengths: mean={}, scale={}, scaled={}",
                    n,
                    loaded.scale.len(),
                    loaded.scaled.len()
                ),
            ));
        }
        if loaded.mean.iter().any(|m| !m.is_finite()) {
            return Err(PrepError::format(path, "mean vector contains non-finite values"));
        }
        if loaded.scale.iter().any(|&s| !s.is_finite() || s <= 0.0) {
            return Err(PrepError::format(
                path,
                "scale vector contains non-finite, zero or negative values",
            ));
        }
        if let Some(j) = (0..n).find(|&j| !loaded.scaled[j] && loaded.scale[j] != 1.0) {
            return Err(PrepError::format(
                path,
                format!(
                    "column {} is marked unscaled but has scale factor {}",
                    j, loaded.scale[j]
                ),
            ));
        }
        info!("Loaded standardization for {} columns from {:?}", n, path);
        Ok(loaded)
    }
}

/// Returns a centered, and optionally scaled, copy of `x`. The input is not modified.
///
/// See [`Standardization`] for the handling of missing values and zero-variance columns.
pub fn standardize(x: &Array2<f64>, scale: bool, model: StandardizationModel) -> Array2<f64> {
    Standardization::fit_transform(x, scale, model).1
}
