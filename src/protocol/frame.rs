//! Request frame packing.
//!
//! A request is `[0xC8][command byte]` followed by every integer argument in
//! big-endian, followed by every payload byte run. The server derives payload
//! lengths from the integer arguments, so callers must pass lengths in the
//! same order as the corresponding payloads.

use crate::constant::{CommandByte, PROTOCOL_MAGIC};
use crate::error::{Error, Result};
use crate::protocol::primitive::{write_bytes_len, write_u8, write_u32, write_u64};

/// One typed request argument.
///
/// The explicit width avoids the ambiguity of inferring it from a runtime
/// value: a timestamp is a `U64` even when it happens to be small.
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    U32(u32),
    U64(u64),
    /// Raw payload bytes, emitted verbatim with no inline length.
    Bytes(&'a [u8]),
    /// A sequence of byte strings, each prefixed by its u32 length.
    /// This is the encoding used by MGET and MISC.
    List(&'a [&'a [u8]]),
}

/// Serialize one request frame into `out`.
pub fn write_frame(out: &mut Vec<u8>, command: CommandByte, args: &[Arg<'_>]) {
    write_u8(out, PROTOCOL_MAGIC);
    write_u8(out, command as u8);
    for arg in args {
        match arg {
            Arg::U32(v) => write_u32(out, *v),
            Arg::U64(v) => write_u64(out, *v),
            Arg::Bytes(_) | Arg::List(_) => {}
        }
    }
    for arg in args {
        match arg {
            Arg::U32(_) | Arg::U64(_) => {}
            Arg::Bytes(data) => out.extend_from_slice(data),
            Arg::List(items) => {
                for item in *items {
                    write_bytes_len(out, item);
                }
            }
        }
    }
}

/// Validate that a payload length fits the u32 the wire format requires.
pub fn len_u32(data: &[u8]) -> Result<u32> {
    u32::try_from(data.len())
        .map_err(|_| Error::BadUsage(format!("argument of {} bytes exceeds u32", data.len())))
}
