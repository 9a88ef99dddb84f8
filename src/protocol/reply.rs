//! Reply decoding.
//!
//! Every reply starts with a status byte. Zero means the command-specific
//! payload follows; anything else is a server error code and the reply ends
//! there. [`ReplyDecoder`] is a state machine fed from the receive buffer;
//! it yields `Ok(None)` until a whole reply is buffered, so a partially
//! received reply never consumes bytes.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::{Error, Result};
use crate::protocol::primitive::compose_double;

/// The payload layout a command expects after a zero status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// Status byte only.
    Ack,
    /// u32 big-endian.
    U32,
    /// u64 big-endian.
    U64,
    /// u32 length followed by that many bytes.
    Data,
    /// Two u64 halves of a fixed-point double.
    Double,
    /// u32 count, then count length-prefixed byte strings.
    List,
    /// u32 count, then count (u32 klen, u32 vlen, key, value) records.
    Pairs,
}

/// A fully decoded reply payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ack,
    U32(u32),
    U64(u64),
    Data(Vec<u8>),
    Double(f64),
    List(Vec<Vec<u8>>),
    Pairs(Vec<(Vec<u8>, Vec<u8>)>),
}

impl Reply {
    fn kind(&self) -> &'static str {
        match self {
            Reply::Ack => "Ack",
            Reply::U32(_) => "U32",
            Reply::U64(_) => "U64",
            Reply::Data(_) => "Data",
            Reply::Double(_) => "Double",
            Reply::List(_) => "List",
            Reply::Pairs(_) => "Pairs",
        }
    }

    pub(crate) fn into_data(self) -> Result<Vec<u8>> {
        match self {
            Reply::Data(data) => Ok(data),
            other => Err(shape_mismatch("Data", &other)),
        }
    }

    pub(crate) fn into_u32(self) -> Result<u32> {
        match self {
            Reply::U32(v) => Ok(v),
            other => Err(shape_mismatch("U32", &other)),
        }
    }

    pub(crate) fn into_u64(self) -> Result<u64> {
        match self {
            Reply::U64(v) => Ok(v),
            other => Err(shape_mismatch("U64", &other)),
        }
    }

    pub(crate) fn into_double(self) -> Result<f64> {
        match self {
            Reply::Double(v) => Ok(v),
            other => Err(shape_mismatch("Double", &other)),
        }
    }

    pub(crate) fn into_list(self) -> Result<Vec<Vec<u8>>> {
        match self {
            Reply::List(items) => Ok(items),
            other => Err(shape_mismatch("List", &other)),
        }
    }

    pub(crate) fn into_pairs(self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        match self {
            Reply::Pairs(pairs) => Ok(pairs),
            other => Err(shape_mismatch("Pairs", &other)),
        }
    }
}

fn shape_mismatch(expected: &str, got: &Reply) -> Error {
    Error::LibraryBug(crate::error::eyre!(
        "reply shape mismatch: expected {expected}, decoded {}",
        got.kind()
    ))
}

enum DecoderState {
    /// Waiting for the status byte.
    Status,
    /// Waiting for a fixed-width integer payload.
    Fixed { width: usize },
    /// Waiting for a length-prefixed byte run.
    Data,
    /// Waiting for the element count of a list or pair list.
    Count,
    /// Collecting list elements.
    ListItems { remaining: u32, items: Vec<Vec<u8>> },
    /// Collecting key/value records.
    PairItems {
        remaining: u32,
        pairs: Vec<(Vec<u8>, Vec<u8>)>,
    },
}

/// Decodes one reply of a known [`ReplyShape`] from the receive stream.
pub struct ReplyDecoder {
    shape: ReplyShape,
    state: DecoderState,
}

impl ReplyDecoder {
    pub fn new(shape: ReplyShape) -> Self {
        Self {
            shape,
            state: DecoderState::Status,
        }
    }

    /// True while no byte of the reply has been consumed yet.
    pub fn is_fresh(&self) -> bool {
        matches!(self.state, DecoderState::Status)
    }
}

fn peek_u32(src: &BytesMut, at: usize) -> Option<u32> {
    let bytes = src.get(at..at + 4)?;
    let mut word = [0_u8; 4];
    word.copy_from_slice(bytes);
    Some(u32::from_be_bytes(word))
}

impl Decoder for ReplyDecoder {
    /// `Err(code)` carries a non-zero status byte.
    type Item = core::result::Result<Reply, u8>;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match &mut self.state {
                DecoderState::Status => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let status = src.get_u8();
                    if status != 0 {
                        // No payload follows an error status.
                        return Ok(Some(Err(status)));
                    }
                    self.state = match self.shape {
                        ReplyShape::Ack => return Ok(Some(Ok(Reply::Ack))),
                        ReplyShape::U32 => DecoderState::Fixed { width: 4 },
                        ReplyShape::U64 => DecoderState::Fixed { width: 8 },
                        ReplyShape::Double => DecoderState::Fixed { width: 16 },
                        ReplyShape::Data => DecoderState::Data,
                        ReplyShape::List | ReplyShape::Pairs => DecoderState::Count,
                    };
                }

                DecoderState::Fixed { width } => {
                    let width = *width;
                    if src.len() < width {
                        return Ok(None);
                    }
                    let reply = match self.shape {
                        ReplyShape::U32 => Reply::U32(src.get_u32()),
                        ReplyShape::U64 => Reply::U64(src.get_u64()),
                        ReplyShape::Double => {
                            let int_part = src.get_u64();
                            let frac_part = src.get_u64();
                            Reply::Double(compose_double(int_part, frac_part))
                        }
                        _ => {
                            return Err(Error::LibraryBug(crate::error::eyre!(
                                "fixed-width state for shape {:?}",
                                self.shape
                            )));
                        }
                    };
                    return Ok(Some(Ok(reply)));
                }

                DecoderState::Data => {
                    let Some(len) = peek_u32(src, 0) else {
                        return Ok(None);
                    };
                    let len = len as usize;
                    if src.len() < 4 + len {
                        src.reserve(4 + len - src.len());
                        return Ok(None);
                    }
                    src.advance(4);
                    let body = src.split_to(len).to_vec();
                    return Ok(Some(Ok(Reply::Data(body))));
                }

                DecoderState::Count => {
                    if src.len() < 4 {
                        return Ok(None);
                    }
                    let count = src.get_u32();
                    self.state = match self.shape {
                        ReplyShape::List => DecoderState::ListItems {
                            remaining: count,
                            items: Vec::with_capacity(count as usize),
                        },
                        ReplyShape::Pairs => DecoderState::PairItems {
                            remaining: count,
                            pairs: Vec::with_capacity(count as usize),
                        },
                        _ => {
                            return Err(Error::LibraryBug(crate::error::eyre!(
                                "count state for shape {:?}",
                                self.shape
                            )));
                        }
                    };
                }

                DecoderState::ListItems { remaining, items } => {
                    if *remaining == 0 {
                        let items = core::mem::take(items);
                        self.state = DecoderState::Status;
                        return Ok(Some(Ok(Reply::List(items))));
                    }
                    let Some(len) = peek_u32(src, 0) else {
                        return Ok(None);
                    };
                    let len = len as usize;
                    if src.len() < 4 + len {
                        src.reserve(4 + len - src.len());
                        return Ok(None);
                    }
                    src.advance(4);
                    items.push(src.split_to(len).to_vec());
                    *remaining -= 1;
                }

                DecoderState::PairItems { remaining, pairs } => {
                    if *remaining == 0 {
                        let pairs = core::mem::take(pairs);
                        self.state = DecoderState::Status;
                        return Ok(Some(Ok(Reply::Pairs(pairs))));
                    }
                    let (Some(klen), Some(vlen)) = (peek_u32(src, 0), peek_u32(src, 4)) else {
                        return Ok(None);
                    };
                    let (klen, vlen) = (klen as usize, vlen as usize);
                    if src.len() < 8 + klen + vlen {
                        src.reserve(8 + klen + vlen - src.len());
                        return Ok(None);
                    }
                    src.advance(8);
                    let key = src.split_to(klen).to_vec();
                    let value = src.split_to(vlen).to_vec();
                    pairs.push((key, value));
                    *remaining -= 1;
                }
            }
        }
    }
}
