//! Abbreviation definitions and abbreviated record decoding.

use std::sync::Arc;

use super::reader::{BitReader, MAX_FIXED_WIDTH, MAX_VBR_WIDTH, MIN_VBR_WIDTH};
use crate::error::BitstreamError;

/// One operand of an abbreviation definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbbrevOp {
    Literal(u64),
    Fixed(u32),
    Vbr(u32),
    /// Length-prefixed (vbr6) sequence of the element encoding.
    Array(Box<AbbrevOp>),
    /// Six-bit alphabet `[a-zA-Z0-9._]`.
    Char6,
    /// Length-prefixed, 32-bit aligned byte string.
    Blob,
}

// Encoding discriminants as they appear in DEFINE_ABBREV.
const ENC_FIXED: u64 = 1;
const ENC_VBR: u64 = 2;
const ENC_ARRAY: u64 = 3;
const ENC_CHAR6: u64 = 4;
const ENC_BLOB: u64 = 5;

impl AbbrevOp {
    pub(crate) fn encoding(&self) -> u64 {
        match self {
            AbbrevOp::Literal(_) => 0,
            AbbrevOp::Fixed(_) => ENC_FIXED,
            AbbrevOp::Vbr(_) => ENC_VBR,
            AbbrevOp::Array(_) => ENC_ARRAY,
            AbbrevOp::Char6 => ENC_CHAR6,
            AbbrevOp::Blob => ENC_BLOB,
        }
    }

    fn read_scalar(&self, r: &mut BitReader<'_>) -> Result<u64, BitstreamError> {
        match self {
            AbbrevOp::Literal(v) => Ok(*v),
            AbbrevOp::Fixed(w) => r.read_fixed(*w),
            AbbrevOp::Vbr(w) => r.read_vbr(*w),
            AbbrevOp::Char6 => Ok(u64::from(decode_char6(r.read_fixed(6)? as u8))),
            AbbrevOp::Array(_) | AbbrevOp::Blob => Err(BitstreamError::InvalidAbbreviationEncoding {
                encoding: self.encoding(),
                position: r.position(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Abbreviation {
    pub ops: Vec<AbbrevOp>,
}

impl Abbreviation {
    pub fn new(ops: Vec<AbbrevOp>) -> Arc<Self> {
        Arc::new(Self { ops })
    }

    /// Reads a DEFINE_ABBREV body (the abbreviation id has been consumed).
    pub fn read_definition(r: &mut BitReader<'_>) -> Result<Self, BitstreamError> {
        let count = r.read_vbr(5)?;
        let mut ops = Vec::with_capacity(count.min(1 << 16) as usize);
        let mut i = 0;
        while i < count {
            let op = read_op(r)?;
            i += 1;
            if let AbbrevOp::Array(_) = op {
                // The element encoding is the next operand and is counted.
                let element = read_op(r)?;
                i += 1;
                ops.push(AbbrevOp::Array(Box::new(element)));
            } else {
                ops.push(op);
            }
        }
        Ok(Self { ops })
    }

    /// Decodes one record with this abbreviation. The first operand is the
    /// record code.
    pub fn read_record(&self, r: &mut BitReader<'_>) -> Result<Record, BitstreamError> {
        let mut values = Vec::with_capacity(self.ops.len() + 4);
        let mut blob = None;
        for op in &self.ops {
            match op {
                AbbrevOp::Array(element) => {
                    let len = r.read_vbr(6)?;
                    for _ in 0..len {
                        values.push(element.read_scalar(r)?);
                    }
                }
                AbbrevOp::Blob => {
                    let len = r.read_vbr(6)? as usize;
                    r.align32()?;
                    blob = Some(r.read_bytes(len)?);
                    r.align32()?;
                }
                scalar => values.push(scalar.read_scalar(r)?),
            }
        }
        if values.is_empty() {
            return Err(BitstreamError::InvalidAbbreviationEncoding {
                encoding: 0,
                position: r.position(),
            });
        }
        let code = values.remove(0) as u32;
        Ok(Record {
            code,
            ops: values,
            blob,
        })
    }
}

fn read_op(r: &mut BitReader<'_>) -> Result<AbbrevOp, BitstreamError> {
    if r.read_fixed(1)? == 1 {
        return Ok(AbbrevOp::Literal(r.read_vbr(8)?));
    }
    let position = r.position();
    let encoding = r.read_fixed(3)?;
    match encoding {
        ENC_FIXED | ENC_VBR => {
            let width = r.read_vbr(5)?;
            let max = if encoding == ENC_FIXED { MAX_FIXED_WIDTH } else { MAX_VBR_WIDTH };
            Ok(match width {
                // A zero-width field always reads as zero.
                0 => AbbrevOp::Literal(0),
                w if w > u64::from(max) => {
                    return Err(BitstreamError::InvalidAbbreviationEncoding { encoding, position })
                }
                w if encoding == ENC_FIXED => AbbrevOp::Fixed(w as u32),
                w if w < u64::from(MIN_VBR_WIDTH) => {
                    return Err(BitstreamError::InvalidAbbreviationEncoding { encoding, position })
                }
                w => AbbrevOp::Vbr(w as u32),
            })
        }
        // Placeholder element, replaced by the caller.
        ENC_ARRAY => Ok(AbbrevOp::Array(Box::new(AbbrevOp::Literal(0)))),
        ENC_CHAR6 => Ok(AbbrevOp::Char6),
        ENC_BLOB => Ok(AbbrevOp::Blob),
        _ => Err(BitstreamError::InvalidAbbreviationEncoding { encoding, position }),
    }
}

/// A decoded record: code plus flat operand list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub code: u32,
    pub ops: Vec<u64>,
    pub blob: Option<Vec<u8>>,
}

impl Record {
    pub fn new(code: u32, ops: Vec<u64>) -> Self {
        Self {
            code,
            ops,
            blob: None,
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u64> {
        self.ops.get(index).copied()
    }

    /// Operands from `start` interpreted as one byte per operand.
    pub fn string_from(&self, start: usize) -> String {
        let bytes: Vec<u8> = self.ops.iter().skip(start).map(|&c| c as u8).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

const CHAR6: &[u8; 64] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789._";

pub fn decode_char6(v: u8) -> u8 {
    CHAR6[(v & 63) as usize]
}

pub fn encode_char6(c: u8) -> Option<u8> {
    CHAR6.iter().position(|&x| x == c).map(|p| p as u8)
}
