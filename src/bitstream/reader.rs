//! Bit-granular cursor over a bitcode buffer.
//!
//! Fields are packed little-endian: the first bit of a field is the lowest
//! unread bit of the current byte. The cursor carries a `limit` so a block
//! can never read past its declared length.

use crate::error::BitstreamError;

pub const MAX_FIXED_WIDTH: u32 = 64;
/// A one-bit chunk has no payload bits, only the continuation flag.
pub const MIN_VBR_WIDTH: u32 = 2;
pub const MAX_VBR_WIDTH: u32 = 32;

pub struct BitReader<'a> {
    data: &'a [u8],
    pos: u64,
    limit: u64,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            limit: data.len() as u64 * 8,
        }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.pos)
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.limit
    }

    /// Narrows the readable window to end at `end` (a bit offset) and returns
    /// the previous limit so the caller can restore it.
    pub fn push_limit(&mut self, end: u64) -> Result<u64, BitstreamError> {
        if end > self.limit {
            return Err(BitstreamError::TruncatedStream {
                requested: end - self.pos,
                position: self.pos,
                remaining: self.remaining(),
            });
        }
        Ok(std::mem::replace(&mut self.limit, end))
    }

    pub fn restore_limit(&mut self, limit: u64) {
        self.limit = limit;
    }

    /// Moves the cursor to an absolute bit offset within the current window.
    pub fn seek(&mut self, bit: u64) -> Result<(), BitstreamError> {
        if bit > self.limit {
            return Err(self.truncated(bit.saturating_sub(self.pos)));
        }
        self.pos = bit;
        Ok(())
    }

    fn truncated(&self, requested: u64) -> BitstreamError {
        BitstreamError::TruncatedStream {
            requested,
            position: self.pos,
            remaining: self.remaining(),
        }
    }

    /// Reads an unsigned field of `width` bits (0..=64). Wider fields are
    /// rejected as an invalid fixed encoding.
    pub fn read_fixed(&mut self, width: u32) -> Result<u64, BitstreamError> {
        if width > MAX_FIXED_WIDTH {
            return Err(BitstreamError::InvalidAbbreviationEncoding {
                encoding: 1,
                position: self.pos,
            });
        }
        if u64::from(width) > self.remaining() {
            return Err(self.truncated(u64::from(width)));
        }
        let mut value = 0u64;
        let mut read = 0u32;
        while read < width {
            let byte = self.data[(self.pos >> 3) as usize];
            let offset = (self.pos & 7) as u32;
            let take = (8 - offset).min(width - read);
            let bits = (u64::from(byte) >> offset) & ((1u64 << take) - 1);
            value |= bits << read;
            read += take;
            self.pos += u64::from(take);
        }
        Ok(value)
    }

    /// Reads a variable-bit-rate integer made of `chunk`-bit pieces. The top
    /// bit of each piece flags a continuation.
    pub fn read_vbr(&mut self, chunk: u32) -> Result<u64, BitstreamError> {
        if !(MIN_VBR_WIDTH..=MAX_VBR_WIDTH).contains(&chunk) {
            return Err(BitstreamError::InvalidAbbreviationEncoding {
                encoding: 2,
                position: self.pos,
            });
        }
        let start = self.pos;
        let continuation = 1u64 << (chunk - 1);
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let piece = self.read_fixed(chunk)?;
            let payload = piece & (continuation - 1);
            if shift < 64 {
                let shifted = payload << shift;
                if shifted >> shift != payload {
                    return Err(BitstreamError::VbrOverflow { position: start });
                }
                result |= shifted;
            } else if payload != 0 {
                return Err(BitstreamError::VbrOverflow { position: start });
            }
            if piece & continuation == 0 {
                return Ok(result);
            }
            shift += chunk - 1;
            if shift > 128 {
                return Err(BitstreamError::VbrOverflow { position: start });
            }
        }
    }

    /// Signed VBR: the low bit carries the sign, the rest the magnitude.
    pub fn read_signed_vbr(&mut self, chunk: u32) -> Result<i64, BitstreamError> {
        Ok(decode_sign_rotated(self.read_vbr(chunk)?))
    }

    /// Advances to the next 32-bit boundary.
    pub fn align32(&mut self) -> Result<(), BitstreamError> {
        let aligned = (self.pos + 31) & !31;
        if aligned > self.limit {
            return Err(self.truncated(aligned - self.pos));
        }
        self.pos = aligned;
        Ok(())
    }

    /// Copies `len` raw bytes. The cursor must be byte aligned.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, BitstreamError> {
        if self.pos % 8 != 0 {
            return Err(BitstreamError::UnalignedBlob { position: self.pos });
        }
        let bits = len as u64 * 8;
        if bits > self.remaining() {
            return Err(self.truncated(bits));
        }
        let start = (self.pos / 8) as usize;
        self.pos += bits;
        Ok(self.data[start..start + len].to_vec())
    }
}

/// Undoes the sign rotation used for signed operands: the magnitude is
/// shifted up by one and the sign lives in bit 0.
pub fn decode_sign_rotated(v: u64) -> i64 {
    if v & 1 == 0 {
        (v >> 1) as i64
    } else if v != 1 {
        -((v >> 1) as i64)
    } else {
        // `1` encodes negative zero, which LLVM uses for i64::MIN.
        i64::MIN
    }
}

/// Inverse of [`decode_sign_rotated`].
pub fn encode_sign_rotated(v: i64) -> u64 {
    if v >= 0 {
        (v as u64) << 1
    } else if v == i64::MIN {
        1
    } else {
        ((v.unsigned_abs()) << 1) | 1
    }
}
