use crate::error::{Error, Result};
use zerocopy::FromBytes;
use zerocopy::byteorder::big_endian::{U32 as U32BE, U64 as U64BE};

/// The server encodes doubles as `(int_part, frac_part)` where
/// `value = int_part + frac_part * 1e-12`.
pub const DOUBLE_FRACTION_SCALE: f64 = 1e12;

/// Read 1-byte integer
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    if data.is_empty() {
        return Err(Error::Decode("truncated 1-byte integer".to_string()));
    }
    Ok((data[0], &data[1..]))
}

/// Read 4-byte big-endian integer
pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    if data.len() < 4 {
        return Err(Error::Decode("truncated 4-byte integer".to_string()));
    }
    let value = U32BE::ref_from_bytes(&data[..4])
        .map_err(Error::from_debug)?
        .get();
    Ok((value, &data[4..]))
}

/// Read 8-byte big-endian integer
pub fn read_u64(data: &[u8]) -> Result<(u64, &[u8])> {
    if data.len() < 8 {
        return Err(Error::Decode("truncated 8-byte integer".to_string()));
    }
    let value = U64BE::ref_from_bytes(&data[..8])
        .map_err(Error::from_debug)?
        .get();
    Ok((value, &data[8..]))
}

/// Read fixed-length bytes
pub fn read_bytes_fix(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(Error::Decode("truncated byte run".to_string()));
    }
    Ok((&data[..len], &data[len..]))
}

/// Read a u32 length followed by that many bytes
pub fn read_bytes_len(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, rest) = read_u32(data)?;
    read_bytes_fix(rest, len as usize)
}

/// Write 1-byte integer
pub fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

/// Write 4-byte big-endian integer
pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write 8-byte big-endian integer
pub fn write_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write a u32 length followed by the bytes (list element encoding)
pub fn write_bytes_len(out: &mut Vec<u8>, data: &[u8]) {
    write_u32(out, data.len() as u32);
    out.extend_from_slice(data);
}

/// Split a double into the wire pair `(int_part, frac_part)`.
///
/// Negative values wrap through the two's-complement representation, which
/// is the convention the server applies when summing.
pub fn split_double(num: f64) -> (u64, u64) {
    let int_part = num.trunc();
    let frac_part = ((num - int_part) * DOUBLE_FRACTION_SCALE).round();
    (int_part as i64 as u64, frac_part as i64 as u64)
}

/// Compose a double from the wire pair, undoing the wrap of [`split_double`].
pub fn compose_double(int_part: u64, frac_part: u64) -> f64 {
    (int_part as i64) as f64 + (frac_part as i64) as f64 / DOUBLE_FRACTION_SCALE
}
