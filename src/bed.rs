// PLINK .bed genotype decoding (variant-major, 2 bits per genotype).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{debug, info};
use ndarray::{Array2, ArrayViewMut1, Axis, ShapeBuilder};
use rayon::prelude::*;

use crate::error::{PrepError, Result};
use crate::matrix_io::{read_whole_file, write_atomically};

/// Magic bytes `0x6c 0x1b` followed by the variant-major mode byte.
pub const BED_MAGIC: [u8; 3] = [0x6c, 0x1b, 0x01];

/// Genotypes packed into one byte.
pub const GENOTYPES_PER_BYTE: usize = 4;

/// One 2-bit genotype call.
///
/// | bits | call | dosage |
/// |------|------|--------|
/// | `00` | homozygous major | `0.0` |
/// | `01` | missing | `NaN` |
/// | `10` | heterozygous | `1.0` |
/// | `11` | homozygous minor | `2.0` |
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GenotypeCode {
    HomozygousMajor,
    Missing,
    Heterozygous,
    HomozygousMinor,
}

impl GenotypeCode {
    /// Interprets the two low bits of `bits`.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => GenotypeCode::HomozygousMajor,
            0b01 => GenotypeCode::Missing,
            0b10 => GenotypeCode::Heterozygous,
            _ => GenotypeCode::HomozygousMinor,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            GenotypeCode::HomozygousMajor => 0b00,
            GenotypeCode::Missing => 0b01,
            GenotypeCode::Heterozygous => 0b10,
            GenotypeCode::HomozygousMinor => 0b11,
        }
    }

    /// Minor allele count, or `NaN` for a missing call.
    pub fn dosage(self) -> f64 {
        match self {
            GenotypeCode::HomozygousMajor => 0.0,
            GenotypeCode::Missing => f64::NAN,
            GenotypeCode::Heterozygous => 1.0,
            GenotypeCode::HomozygousMinor => 2.0,
        }
    }

    /// Inverse of [`dosage`](Self::dosage); `None` for anything but 0, 1, 2 or `NaN`.
    pub fn from_dosage(value: f64) -> Option<Self> {
        if value.is_nan() {
            Some(GenotypeCode::Missing)
        } else if value == 0.0 {
            Some(GenotypeCode::HomozygousMajor)
        } else if value == 1.0 {
            Some(GenotypeCode::Heterozygous)
        } else if value == 2.0 {
            Some(GenotypeCode::HomozygousMinor)
        } else {
            None
        }
    }
}

/// Extracts the genotype of the individual at `position` within a packed byte.
///
/// The first individual sits in the two least significant bits. `position` is taken
/// modulo 4, so an individual index can be passed directly.
pub fn decode_genotype(byte: u8, position: usize) -> GenotypeCode {
    GenotypeCode::from_bits(byte >> (2 * (position % GENOTYPES_PER_BYTE)))
}

/// Number of bytes that hold one SNP for `n_individuals` individuals.
pub fn bytes_per_snp(n_individuals: usize) -> usize {
    n_individuals.div_ceil(GENOTYPES_PER_BYTE)
}

fn decode_table() -> &'static [[f64; 4]; 256] {
    static TABLE: OnceLock<[[f64; 4]; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [[0.0f64; 4]; 256];
        for (byte, entry) in table.iter_mut().enumerate() {
            for (position, slot) in entry.iter_mut().enumerate() {
                *slot = decode_genotype(byte as u8, position).dosage();
            }
        }
        table
    })
}

/// Unpacks one SNP block into `dest`; padding bits past `dest.len()` are never read.
fn decode_snp_into(block: &[u8], mut dest: ArrayViewMut1<f64>) {
    debug_assert!(block.len() * GENOTYPES_PER_BYTE >= dest.len());
    let table = decode_table();
    for (i, value) in dest.iter_mut().enumerate() {
        *value = table[block[i / GENOTYPES_PER_BYTE] as usize][i % GENOTYPES_PER_BYTE];
    }
}

/// An in-memory `.bed` payload with a known individual count.
#[derive(Debug)]
pub struct BedFile {
    path: PathBuf,
    payload: Vec<u8>,
    n_individuals: usize,
    bytes_per_snp: usize,
    n_snps: usize,
}

impl BedFile {
    /// Reads and validates a `.bed` file. The SNP count is inferred from the file size.
    ///
    /// # Errors
    /// `PrepError::InvalidArgument` if `n_individuals` is zero, `PrepError::Io` if the file
    /// cannot be read, and `PrepError::Format` for a bad header or a payload that is not a
    /// whole number of SNP blocks.
    pub fn open<P: AsRef<Path>>(path: P, n_individuals: usize) -> Result<Self> {
        let path = path.as_ref();
        if n_individuals == 0 {
            return Err(PrepError::invalid("a .bed file needs at least one individual"));
        }
        let mut bytes = read_whole_file(path)?;
        validate_header(path, &bytes)?;

        let bytes_per_snp = bytes_per_snp(n_individuals);
        let payload_len = bytes.len() - BED_MAGIC.len();
        if payload_len % bytes_per_snp != 0 {
            return Err(PrepError::format(
                path,
                format!(
                    "payload of {} bytes is not a multiple of {} bytes per SNP for {} individuals",
                    payload_len, bytes_per_snp, n_individuals
                ),
            ));
        }
        let n_snps = payload_len / bytes_per_snp;
        bytes.drain(..BED_MAGIC.len());

        debug!(
            "{:?}: {} individuals, {} bytes per SNP, {} SNPs",
            path, n_individuals, bytes_per_snp, n_snps
        );
        Ok(Self {
            path: path.to_path_buf(),
            payload: bytes,
            n_individuals,
            bytes_per_snp,
            n_snps,
        })
    }

    pub fn n_individuals(&self) -> usize {
        self.n_individuals
    }

    pub fn n_snps(&self) -> usize {
        self.n_snps
    }

    fn snp_block(&self, snp: usize) -> &[u8] {
        let start = snp * self.bytes_per_snp;
        &self.payload[start..start + self.bytes_per_snp]
    }

    /// Decodes every SNP into an `(individuals, snps)` dosage matrix.
    pub fn read_all(&self) -> Array2<f64> {
        let all: Vec<usize> = (0..self.n_snps).collect();
        let matrix = self.decode_columns(&all);
        info!(
            "Decoded {} individuals x {} SNPs from {:?}",
            self.n_individuals, self.n_snps, self.path
        );
        matrix
    }

    /// Decodes only the SNPs in `snps`, in the given order.
    ///
    /// # Errors
    /// `PrepError::InvalidArgument` if an index is not below [`n_snps`](Self::n_snps).
    pub fn read_snps(&self, snps: &[usize]) -> Result<Array2<f64>> {
        if let Some(&bad) = snps.iter().find(|&&s| s >= self.n_snps) {
            return Err(PrepError::invalid(format!(
                "SNP index {} out of range for {} SNPs",
                bad, self.n_snps
            )));
        }
        Ok(self.decode_columns(snps))
    }

    fn decode_columns(&self, snps: &[usize]) -> Array2<f64> {
        let mut matrix = Array2::<f64>::zeros((self.n_individuals, snps.len()).f());
        matrix
            .axis_iter_mut(Axis(1))
            .into_par_iter()
            .enumerate()
            .for_each(|(j, column)| decode_snp_into(self.snp_block(snps[j]), column));
        matrix
    }
}

fn validate_header(path: &Path, bytes: &[u8]) -> Result<()> {
    match bytes {
        [0x6c, 0x1b, 0x01, ..] => Ok(()),
        [0x6c, 0x1b, mode, ..] => Err(PrepError::format(
            path,
            format!("unsupported mode byte {:#04x} (only variant-major mode is supported)", mode),
        )),
        _ if bytes.len() < BED_MAGIC.len() => Err(PrepError::format(
            path,
            format!("file has {} bytes, shorter than the .bed header", bytes.len()),
        )),
        _ => Err(PrepError::format(path, "missing PLINK magic bytes 0x6c 0x1b")),
    }
}

/// Reads a `.bed` file into an `(n_individuals, n_snps)` matrix of dosages
/// (`NaN` marks missing calls).
pub fn read_bed<P: AsRef<Path>>(path: P, n_individuals: usize) -> Result<Array2<f64>> {
    Ok(BedFile::open(path, n_individuals)?.read_all())
}

/// Packs a dosage matrix (rows = individuals, columns = SNPs) into a `.bed` file.
///
/// # Errors
/// `PrepError::InvalidArgument` for zero individuals or a value other than 0, 1, 2
/// or `NaN`; `PrepError::Io` if the file cannot be written.
pub fn encode_bed<P: AsRef<Path>>(path: P, dosages: &Array2<f64>) -> Result<()> {
    let path = path.as_ref();
    let n_individuals = dosages.nrows();
    if n_individuals == 0 {
        return Err(PrepError::invalid("cannot encode a .bed file with zero individuals"));
    }
    let block_len = bytes_per_snp(n_individuals);
    let mut payload = vec![0u8; block_len * dosages.ncols()];

    for (j, column) in dosages.columns().into_iter().enumerate() {
        let block = &mut payload[j * block_len..(j + 1) * block_len];
        for (i, &value) in column.iter().enumerate() {
            let code = GenotypeCode::from_dosage(value).ok_or_else(|| {
                PrepError::invalid(format!(
                    "value {} at individual {}, SNP {} is not a genotype dosage",
                    value, i, j
                ))
            })?;
            block[i / GENOTYPES_PER_BYTE] |= code.bits() << (2 * (i % GENOTYPES_PER_BYTE));
        }
    }

    write_atomically(path, |writer| {
        writer.write_all(&BED_MAGIC)?;
        writer.write_all(&payload)
    })?;
    info!(
        "Encoded {} individuals x {} SNPs into {:?}",
        n_individuals,
        dosages.ncols(),
        path
    );
    Ok(())
}
