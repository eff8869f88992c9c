// Random column subsets.

use log::{debug, warn};
use ndarray::{Array2, Axis};
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{PrepError, Result};

/// Columns drawn by [`subsample_snps`].
#[derive(Clone, Debug, PartialEq)]
pub struct SnpSubsample {
    /// Indices of the chosen columns in the input, strictly increasing.
    pub columns: Vec<usize>,
    /// The chosen columns, shape `(rows, columns.len())`.
    pub data: Array2<f64>,
}

/// Draws `floor(proportion * ncols)` distinct columns uniformly without replacement.
///
/// Chosen columns keep their original relative order. With `Some(seed)` the draw is
/// reproducible; with `None` the generator is seeded from the OS.
///
/// # Errors
/// `PrepError::InvalidArgument` if `proportion` is not in `(0, 1]`.
pub fn subsample_snps(x: &Array2<f64>, proportion: f64, seed: Option<u64>) -> Result<SnpSubsample> {
    if !(proportion > 0.0 && proportion <= 1.0) {
        return Err(PrepError::invalid(format!(
            "subsampling proportion must be in (0, 1], got {}",
            proportion
        )));
    }

    let n_cols = x.ncols();
    let n_keep = (proportion * n_cols as f64).floor() as usize;
    if n_keep == 0 && n_cols > 0 {
        warn!(
            "Proportion {} of {} columns selects no columns",
            proportion, n_cols
        );
    }

    let mut rng = match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_entropy(),
    };
    let mut columns = index::sample(&mut rng, n_cols, n_keep).into_vec();
    columns.sort_unstable();

    let data = if columns.is_empty() {
        Array2::zeros((x.nrows(), 0))
    } else {
        x.select(Axis(1), &columns)
    };
    debug!("Subsampled {} of {} columns", n_keep, n_cols);
    Ok(SnpSubsample { columns, data })
}
