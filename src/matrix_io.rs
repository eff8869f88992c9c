// Dense matrix (de)serialization: fixed binary layout and plain text.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use log::{debug, info, warn};
use ndarray::{Array2, ShapeBuilder};

use crate::error::{PrepError, Result};

/// Size in bytes of the `[u32 rows][u32 cols]` header of a dense matrix file.
pub const DENSE_HEADER_LEN: usize = 8;

mod private {
    pub trait Sealed {}
}

/// Fixed-width IEEE floating point element that can be stored in the dense binary layout.
///
/// Values are always stored little-endian, so files are portable between hosts.
/// The trait is sealed; it is implemented for `f32` and `f64` only.
pub trait BinaryScalar: Copy + Send + Sync + private::Sealed + 'static {
    /// Number of bytes occupied by one element on disk.
    const WIDTH: usize;

    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()>;

    /// Decodes one element; `bytes` has exactly `WIDTH` bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_binary_scalar {
    ($t:ty) => {
        impl private::Sealed for $t {}

        impl BinaryScalar for $t {
            const WIDTH: usize = std::mem::size_of::<$t>();

            fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()> {
                writer.write_all(&self.to_le_bytes())
            }

            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(bytes);
                <$t>::from_le_bytes(buf)
            }
        }
    };
}

impl_binary_scalar!(f32);
impl_binary_scalar!(f64);

/// Formats the shape of a matrix as `"rows x cols"`.
pub fn describe_dims<T>(matrix: &Array2<T>) -> String {
    format!("{} x {}", matrix.nrows(), matrix.ncols())
}

/// Writes `path` through a temporary file in the same directory that is renamed
/// over the target only once `write_payload` and the final flush succeed.
pub(crate) fn write_atomically<F>(path: &Path, write_payload: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&File>) -> io::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut builder = tempfile::Builder::new();
    // Same mode as `File::create`; the process umask still applies.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    let staging = builder.tempfile_in(dir).map_err(|e| PrepError::io(path, e))?;
    {
        let mut writer = BufWriter::new(staging.as_file());
        write_payload(&mut writer).map_err(|e| PrepError::io(path, e))?;
        writer.flush().map_err(|e| PrepError::io(path, e))?;
    }
    staging
        .persist(path)
        .map_err(|e| PrepError::io(path, e.error))?;
    Ok(())
}

pub(crate) fn read_whole_file(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path).map_err(|e| PrepError::io(path, e))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| PrepError::io(path, e))?;
    Ok(bytes)
}

/// Saves a dense matrix as `[u32 rows][u32 cols][rows*cols scalars]`.
///
/// The payload is written in column-major order, little-endian, with no padding
/// and no checksum. A matrix with either dimension above `u32::MAX` is rejected.
///
/// # Errors
/// `PrepError::Io` if the file cannot be created or written,
/// `PrepError::InvalidArgument` if a dimension does not fit the header.
pub fn save_matrix<T: BinaryScalar, P: AsRef<Path>>(path: P, matrix: &Array2<T>) -> Result<()> {
    let path = path.as_ref();
    let rows = u32::try_from(matrix.nrows())
        .map_err(|_| PrepError::invalid(format!("row count {} exceeds u32", matrix.nrows())))?;
    let cols = u32::try_from(matrix.ncols())
        .map_err(|_| PrepError::invalid(format!("column count {} exceeds u32", matrix.ncols())))?;

    write_atomically(path, |writer| {
        writer.write_all(&rows.to_le_bytes())?;
        writer.write_all(&cols.to_le_bytes())?;
        // Iterating the transposed view walks the original column by column.
        for &value in matrix.t().iter() {
            value.write_le(writer)?;
        }
        Ok(())
    })?;

    info!("Saved {} matrix to {:?}", describe_dims(matrix), path);
    Ok(())
}

/// Loads a dense matrix written by [`save_matrix`] with the same scalar type.
///
/// The header is trusted as written: the element width must match the one used
/// when saving. Extra bytes after the declared payload are ignored with a warning.
///
/// # Errors
/// `PrepError::Io` if the file cannot be opened or read,
/// `PrepError::Format` if it is shorter than its header declares.
pub fn load_matrix<T: BinaryScalar, P: AsRef<Path>>(path: P) -> Result<Array2<T>> {
    let path = path.as_ref();
    let bytes = read_whole_file(path)?;

    if bytes.len() < DENSE_HEADER_LEN {
        return Err(PrepError::format(
            path,
            format!("file has {} bytes, shorter than the {}-byte header", bytes.len(), DENSE_HEADER_LEN),
        ));
    }
    let rows = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let cols = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

    let expected_payload = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(T::WIDTH))
        .ok_or_else(|| PrepError::format(path, format!("declared shape {} x {} overflows", rows, cols)))?;
    let payload = &bytes[DENSE_HEADER_LEN..];
    if payload.len() < expected_payload {
        return Err(PrepError::format(
            path,
            format!(
                "truncated payload: {} x {} needs {} bytes, found {}",
                rows,
                cols,
                expected_payload,
                payload.len()
            ),
        ));
    }
    if payload.len() > expected_payload {
        warn!(
            "{:?}: ignoring {} trailing bytes after the {} x {} payload",
            path,
            payload.len() - expected_payload,
            rows,
            cols
        );
    }

    let values: Vec<T> = payload[..expected_payload]
        .chunks_exact(T::WIDTH)
        .map(T::from_le_slice)
        .collect();
    let matrix = Array2::from_shape_vec((rows, cols).f(), values)
        .map_err(|e| PrepError::format(path, format!("shape error: {}", e)))?;

    debug!("Read {} payload bytes from {:?}", expected_payload, path);
    info!("Loaded {} matrix from {:?}", describe_dims(&matrix), path);
    Ok(matrix)
}

/// Writes a matrix as text: one row per line, values separated by a single space,
/// each printed with `precision` significant digits.
///
/// # Errors
/// `PrepError::Io` if the file cannot be created or written,
/// `PrepError::InvalidArgument` if `precision` is zero.
pub fn save_text<P: AsRef<Path>>(path: P, matrix: &Array2<f64>, precision: usize) -> Result<()> {
    let path = path.as_ref();
    if precision == 0 {
        return Err(PrepError::invalid("text precision must be at least 1"));
    }
    write_atomically(path, |writer| {
        for row in matrix.rows() {
            let mut first = true;
            for &value in row.iter() {
                if !first {
                    writer.write_all(b" ")?;
                }
                first = false;
                writer.write_all(format_significant(value, precision).as_bytes())?;
            }
            writer.write_all(b"\n")?;
        }
        Ok(())
    })?;
    info!("Wrote {} matrix as text to {:?}", describe_dims(matrix), path);
    Ok(())
}

/// Shortest of fixed or scientific notation with `precision` significant digits,
/// trailing zeros removed (the `%g` convention).
pub(crate) fn format_significant(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if value == 0.0 {
        return "0".to_string();
    }

    // Round first so that e.g. 9.9999999 at 6 digits is classified by its rounded exponent.
    let scientific = format!("{:.*e}", precision - 1, value);
    let exponent: i32 = scientific
        .rsplit('e')
        .next()
        .and_then(|e| e.parse().ok())
        .unwrap_or(0);

    if exponent < -4 || exponent >= precision as i32 {
        let (mantissa, exp) = scientific.split_once('e').unwrap_or((scientific.as_str(), "0"));
        format!("{}e{}", trim_fraction(mantissa), exp)
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}
