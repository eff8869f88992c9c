// In tests/pipeline_tests.rs

use geno_prep::{
    encode_bed, load_matrix, load_sparse, read_bed, read_pheno, save_matrix, save_sparse,
    standardize, subsample_snps, CscMatrix, IndexBase, Standardization, StandardizationModel,
};
use approx::assert_abs_diff_eq;
use ndarray::{Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::io::Write;
use std::sync::Once;
use tempfile::tempdir;

static LOGGER_INIT: Once = Once::new();

fn init_logging() {
    LOGGER_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn random_genotypes(rng: &mut ChaCha8Rng, rows: usize, cols: usize, missing_rate: f64) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |_| {
        if rng.gen_bool(missing_rate) {
            f64::NAN
        } else {
            rng.gen_range(0..=2) as f64
        }
    })
}

#[test]
fn dense_round_trip_is_bit_exact() {
    init_logging();
    let dir = tempdir().unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let mut shapes = vec![(0, 0), (0, 4), (6, 0), (1, 1)];
    for _ in 0..10 {
        shapes.push((rng.gen_range(1..40), rng.gen_range(1..40)));
    }

    for (k, &(rows, cols)) in shapes.iter().enumerate() {
        let m: Array2<f64> = Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0e6..1.0e6));
        let path = dir.path().join(format!("dense_{}.bin", k));
        save_matrix(&path, &m).unwrap();
        let back: Array2<f64> = load_matrix(&path).unwrap();
        assert_eq!(back.dim(), (rows, cols), "shape mismatch for case {}", k);
        for (a, b) in back.iter().zip(m.iter()) {
            assert_eq!(a.to_bits(), b.to_bits(), "value mismatch for case {}", k);
        }
    }
}

#[test]
fn dense_round_trip_preserves_missing_markers() {
    let dir = tempdir().unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(8);
    let m = random_genotypes(&mut rng, 17, 11, 0.2);
    let path = dir.path().join("geno.bin");
    save_matrix(&path, &m).unwrap();
    let back: Array2<f64> = load_matrix(&path).unwrap();
    for (a, b) in back.iter().zip(m.iter()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

#[test]
fn sparse_round_trip_reproduces_triplets() {
    init_logging();
    let dir = tempdir().unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let (rows, cols) = (30, 12);
    let mut coordinates = HashSet::new();
    while coordinates.len() < 45 {
        coordinates.insert((rng.gen_range(0..rows), rng.gen_range(0..cols)));
    }
    let triplets: Vec<(usize, usize, f64)> = coordinates
        .into_iter()
        .map(|(r, c)| (r, c, rng.gen_range(-5.0..5.0)))
        .filter(|t| t.2 != 0.0)
        .collect();
    let matrix = CscMatrix::from_triplets(rows, cols, &triplets).unwrap();

    for base in [IndexBase::Zero, IndexBase::One] {
        let path = dir.path().join(format!("beta_{:?}.bin", base));
        save_sparse(&path, &matrix, base).unwrap();
        let back = load_sparse(&path, base).unwrap();
        assert_eq!((back.nrows(), back.ncols()), (rows, cols));

        let mut expected: Vec<(usize, usize, u64)> =
            triplets.iter().map(|&(r, c, v)| (r, c, v.to_bits())).collect();
        let mut actual: Vec<(usize, usize, u64)> =
            back.triplets().map(|(r, c, v)| (r, c, v.to_bits())).collect();
        expected.sort_unstable();
        actual.sort_unstable();
        assert_eq!(actual, expected);
    }
}

#[test]
fn genotype_file_to_standardized_subsample() {
    init_logging();
    let dir = tempdir().unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(31);
    let n_individuals = 23; // not a multiple of 4, exercises padding
    let mut genotypes = random_genotypes(&mut rng, n_individuals, 40, 0.05);
    genotypes.column_mut(3).fill(f64::NAN);
    genotypes.column_mut(7).fill(1.0);

    let bed_path = dir.path().join("cohort.bed");
    encode_bed(&bed_path, &genotypes).unwrap();
    let decoded = read_bed(&bed_path, n_individuals).unwrap();
    assert_eq!(decoded.dim(), (n_individuals, 40));

    let standardized = standardize(&decoded, true, StandardizationModel::Binomial);
    assert!(standardized.iter().all(|v| v.is_finite()));
    assert!(standardized.column(3).iter().all(|&v| v == 0.0));
    assert!(standardized.column(7).iter().all(|&v| v == 0.0));

    let sub = subsample_snps(&standardized, 0.5, Some(5)).unwrap();
    assert_eq!(sub.data.dim(), (n_individuals, 20));
    for (k, &j) in sub.columns.iter().enumerate() {
        assert_eq!(sub.data.column(k), standardized.column(j));
    }

    let out_path = dir.path().join("subsample.bin");
    save_matrix(&out_path, &sub.data).unwrap();
    let reloaded: Array2<f64> = load_matrix(&out_path).unwrap();
    assert_eq!(reloaded, sub.data);
}

#[test]
fn phenotype_file_is_standardized_per_column() {
    init_logging();
    let dir = tempdir().unwrap();
    let path = dir.path().join("trait.pheno");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "F1 I1 1 10").unwrap();
    writeln!(file, "F1 I2 2 10").unwrap();
    writeln!(file, "F2 I3 3 10").unwrap();
    writeln!(file, "F2 I4 4 10").unwrap();
    writeln!(file, "F3 I5 5 10").unwrap();
    drop(file);

    let y = read_pheno(&path, 2).unwrap();
    let (fitted, s) = Standardization::fit_transform(&y, true, StandardizationModel::Sd);
    assert!(fitted.is_scaled(0));
    assert!(!fitted.is_scaled(1));

    let first = s.index_axis(Axis(1), 0).to_vec();
    let mean = first.iter().sum::<f64>() / 5.0;
    let var = first.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0;
    assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(var, 1.0, epsilon = 1e-12);
    assert!(s.column(1).iter().all(|&v| v == 0.0));
}
