// Genotype and phenotype preprocessing for genomic regression

#![doc = include_str!("../README.md")]

pub mod bed;
pub mod error;
pub mod matrix_io;
pub mod pheno;
pub mod sparse;
pub mod standardize;
pub mod subsample;

pub use bed::{decode_genotype, encode_bed, read_bed, BedFile, GenotypeCode};
pub use error::{PrepError, Result};
pub use matrix_io::{describe_dims, load_matrix, save_matrix, save_text, BinaryScalar};
pub use pheno::read_pheno;
pub use sparse::{load_sparse, save_sparse, CscMatrix, IndexBase};
pub use standardize::{standardize, Standardization, StandardizationModel, VAR_TOL};
pub use subsample::{subsample_snps, SnpSubsample};
