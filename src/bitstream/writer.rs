//! Bit-granular writer, the mirror image of [`BitReader`](super::reader::BitReader).
//!
//! Block lengths are back-patched on `end_block`, so callers can stream
//! records without knowing sizes up front.

use std::collections::HashMap;
use std::sync::Arc;

use super::abbrev::{encode_char6, AbbrevOp, Abbreviation};
use super::scanner::{
    DEFINE_ABBREV, END_BLOCK, ENTER_SUBBLOCK, FIRST_APPLICATION_ABBREV, RAW_MAGIC,
    TOP_LEVEL_ABBREV_WIDTH, UNABBREV_RECORD,
};

struct OpenBlock {
    length_offset: usize,
    outer_width: u32,
    outer_abbrevs: Vec<Arc<Abbreviation>>,
    is_block_info: bool,
}

pub struct BitWriter {
    out: Vec<u8>,
    bits: u64,
    abbrev_width: u32,
    abbrevs: Vec<Arc<Abbreviation>>,
    blocks: Vec<OpenBlock>,
    block_info: HashMap<u32, Vec<Arc<Abbreviation>>>,
    block_info_target: Option<u32>,
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BitWriter {
    /// A writer with nothing emitted yet (no magic).
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            bits: 0,
            abbrev_width: TOP_LEVEL_ABBREV_WIDTH,
            abbrevs: Vec::new(),
            blocks: Vec::new(),
            block_info: HashMap::new(),
            block_info_target: None,
        }
    }

    /// A writer that has already emitted the `BC 0xC0DE` magic.
    pub fn with_magic() -> Self {
        let mut w = Self::new();
        w.emit(u64::from(RAW_MAGIC), 32);
        w
    }

    pub fn bit_position(&self) -> u64 {
        self.bits
    }

    pub fn emit(&mut self, value: u64, width: u32) {
        let mut written = 0u32;
        while written < width {
            let offset = (self.bits & 7) as u32;
            if offset == 0 {
                self.out.push(0);
            }
            let take = (8 - offset).min(width - written);
            let chunk = ((value >> written) & ((1u64 << take) - 1)) as u8;
            if let Some(last) = self.out.last_mut() {
                *last |= chunk << offset;
            }
            written += take;
            self.bits += u64::from(take);
        }
    }

    pub fn emit_vbr(&mut self, mut value: u64, chunk: u32) {
        let continuation = 1u64 << (chunk - 1);
        while value >= continuation {
            self.emit((value & (continuation - 1)) | continuation, chunk);
            value >>= chunk - 1;
        }
        self.emit(value, chunk);
    }

    pub fn align32(&mut self) {
        let pad = (32 - (self.bits % 32)) % 32;
        if pad > 0 {
            self.emit(0, pad as u32);
        }
    }

    pub fn enter_block(&mut self, block_id: u32, abbrev_width: u32) {
        self.emit(ENTER_SUBBLOCK, self.abbrev_width);
        self.emit_vbr(u64::from(block_id), 8);
        self.emit_vbr(u64::from(abbrev_width), 4);
        self.align32();
        let length_offset = self.out.len();
        self.emit(0, 32);
        let inherited = self.block_info.get(&block_id).cloned().unwrap_or_default();
        self.blocks.push(OpenBlock {
            length_offset,
            outer_width: self.abbrev_width,
            outer_abbrevs: std::mem::replace(&mut self.abbrevs, inherited),
            is_block_info: block_id == 0,
        });
        self.abbrev_width = abbrev_width;
    }

    pub fn end_block(&mut self) {
        let Some(block) = self.blocks.pop() else {
            return;
        };
        self.emit(END_BLOCK, self.abbrev_width);
        self.align32();
        let words = ((self.out.len() - block.length_offset - 4) / 4) as u32;
        self.out[block.length_offset..block.length_offset + 4].copy_from_slice(&words.to_le_bytes());
        self.abbrev_width = block.outer_width;
        self.abbrevs = block.outer_abbrevs;
        if block.is_block_info {
            self.block_info_target = None;
        }
    }

    /// Emits DEFINE_ABBREV and returns the id records should use.
    ///
    /// Inside BLOCKINFO the abbreviation is registered for the target block
    /// selected by [`set_block_info_target`](Self::set_block_info_target).
    pub fn define_abbrev(&mut self, abbrev: Arc<Abbreviation>) -> u64 {
        self.emit(DEFINE_ABBREV, self.abbrev_width);
        let count: usize = abbrev
            .ops
            .iter()
            .map(|op| if matches!(op, AbbrevOp::Array(_)) { 2 } else { 1 })
            .sum();
        self.emit_vbr(count as u64, 5);
        for op in &abbrev.ops {
            match op {
                AbbrevOp::Array(element) => {
                    self.emit_op_definition(op);
                    self.emit_op_definition(element);
                }
                other => self.emit_op_definition(other),
            }
        }
        let in_block_info = self.blocks.last().map(|b| b.is_block_info).unwrap_or(false);
        match (in_block_info, self.block_info_target) {
            (true, Some(target)) => {
                let list = self.block_info.entry(target).or_default();
                list.push(abbrev);
                FIRST_APPLICATION_ABBREV + list.len() as u64 - 1
            }
            _ => {
                self.abbrevs.push(abbrev);
                FIRST_APPLICATION_ABBREV + self.abbrevs.len() as u64 - 1
            }
        }
    }

    fn emit_op_definition(&mut self, op: &AbbrevOp) {
        match op {
            AbbrevOp::Literal(v) => {
                self.emit(1, 1);
                self.emit_vbr(*v, 8);
            }
            AbbrevOp::Fixed(w) | AbbrevOp::Vbr(w) => {
                self.emit(0, 1);
                self.emit(op.encoding(), 3);
                self.emit_vbr(u64::from(*w), 5);
            }
            AbbrevOp::Array(_) | AbbrevOp::Char6 | AbbrevOp::Blob => {
                self.emit(0, 1);
                self.emit(op.encoding(), 3);
            }
        }
    }

    /// Inside BLOCKINFO: emits SETBID and routes later definitions to `block_id`.
    pub fn set_block_info_target(&mut self, block_id: u32) {
        self.emit_record(1, &[u64::from(block_id)]);
        self.block_info_target = Some(block_id);
    }

    /// Emits an unabbreviated record.
    pub fn emit_record(&mut self, code: u32, ops: &[u64]) {
        self.emit(UNABBREV_RECORD, self.abbrev_width);
        self.emit_vbr(u64::from(code), 6);
        self.emit_vbr(ops.len() as u64, 6);
        for &op in ops {
            self.emit_vbr(op, 6);
        }
    }

    /// Emits a record through abbreviation `id`. `values` holds the code
    /// followed by the operands, exactly as the reader produces them.
    pub fn emit_abbreviated(&mut self, id: u64, values: &[u64], blob: Option<&[u8]>) {
        let Some(abbrev) = self.abbrevs.get((id - FIRST_APPLICATION_ABBREV) as usize).cloned() else {
            return;
        };
        self.emit(id, self.abbrev_width);
        let mut rest = values;
        for op in &abbrev.ops {
            match op {
                AbbrevOp::Literal(_) => {
                    rest = rest.get(1..).unwrap_or(&[]);
                }
                AbbrevOp::Array(element) => {
                    self.emit_vbr(rest.len() as u64, 6);
                    for &v in rest {
                        self.emit_scalar(element, v);
                    }
                    rest = &[];
                }
                AbbrevOp::Blob => {
                    let bytes = blob.unwrap_or(&[]);
                    self.emit_vbr(bytes.len() as u64, 6);
                    self.align32();
                    for &b in bytes {
                        self.emit(u64::from(b), 8);
                    }
                    self.align32();
                }
                scalar => {
                    let v = rest.first().copied().unwrap_or(0);
                    self.emit_scalar(scalar, v);
                    rest = rest.get(1..).unwrap_or(&[]);
                }
            }
        }
    }

    fn emit_scalar(&mut self, op: &AbbrevOp, value: u64) {
        match op {
            AbbrevOp::Fixed(w) => self.emit(value, *w),
            AbbrevOp::Vbr(w) => self.emit_vbr(value, *w),
            AbbrevOp::Char6 => self.emit(u64::from(encode_char6(value as u8).unwrap_or(0)), 6),
            AbbrevOp::Literal(_) | AbbrevOp::Array(_) | AbbrevOp::Blob => {}
        }
    }

    /// Closes any open blocks and returns the bytes.
    pub fn finish(mut self) -> Vec<u8> {
        while !self.blocks.is_empty() {
            self.end_block();
        }
        let pad = (4 - self.out.len() % 4) % 4;
        self.out.extend(std::iter::repeat(0).take(pad));
        self.out
    }
}
