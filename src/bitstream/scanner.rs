//! Block-structured traversal of a bitstream.
//!
//! The parser owns the block stack and the abbreviation scopes; it hands
//! every decoded record to a [`BlockListener`] and lets the listener decide
//! whether a block is worth entering.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use super::abbrev::{Abbreviation, Record};
use super::reader::BitReader;
use crate::error::{BitstreamError, Error};

// Builtin abbreviation ids.
pub const END_BLOCK: u64 = 0;
pub const ENTER_SUBBLOCK: u64 = 1;
pub const DEFINE_ABBREV: u64 = 2;
pub const UNABBREV_RECORD: u64 = 3;
pub const FIRST_APPLICATION_ABBREV: u64 = 4;

/// Abbreviation id width outside of any block.
pub const TOP_LEVEL_ABBREV_WIDTH: u32 = 2;
/// Widest abbreviation id a block header may declare.
pub const MAX_ABBREV_WIDTH: u32 = 32;

/// `'B' 'C' 0xC0 0xDE` read as a little-endian word.
pub const RAW_MAGIC: u32 = 0xdec0_4342;
pub const WRAPPER_MAGIC: u32 = 0x0b17_c0de;

// BLOCKINFO record codes.
const BLOCKINFO_SETBID: u32 = 1;
const BLOCKINFO_BLOCKNAME: u32 = 2;
const BLOCKINFO_SETRECORDNAME: u32 = 3;

/// Known block ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    BlockInfo,
    Module,
    ParamAttr,
    ParamAttrGroup,
    Constants,
    Function,
    Identification,
    ValueSymtab,
    Metadata,
    MetadataAttachment,
    Type,
    UseList,
    ModuleStrtab,
    GlobalValueSummary,
    OperandBundleTags,
    MetadataKind,
    Strtab,
    FullLtoGlobalValueSummary,
    Symtab,
    SyncScopeNames,
    Unknown(u32),
}

impl BlockKind {
    pub fn from_id(id: u32) -> Self {
        match id {
            0 => BlockKind::BlockInfo,
            8 => BlockKind::Module,
            9 => BlockKind::ParamAttr,
            10 => BlockKind::ParamAttrGroup,
            11 => BlockKind::Constants,
            12 => BlockKind::Function,
            13 => BlockKind::Identification,
            14 => BlockKind::ValueSymtab,
            15 => BlockKind::Metadata,
            16 => BlockKind::MetadataAttachment,
            17 => BlockKind::Type,
            18 => BlockKind::UseList,
            19 => BlockKind::ModuleStrtab,
            20 => BlockKind::GlobalValueSummary,
            21 => BlockKind::OperandBundleTags,
            22 => BlockKind::MetadataKind,
            23 => BlockKind::Strtab,
            24 => BlockKind::FullLtoGlobalValueSummary,
            25 => BlockKind::Symtab,
            26 => BlockKind::SyncScopeNames,
            other => BlockKind::Unknown(other),
        }
    }

    pub fn id(self) -> u32 {
        match self {
            BlockKind::BlockInfo => 0,
            BlockKind::Module => 8,
            BlockKind::ParamAttr => 9,
            BlockKind::ParamAttrGroup => 10,
            BlockKind::Constants => 11,
            BlockKind::Function => 12,
            BlockKind::Identification => 13,
            BlockKind::ValueSymtab => 14,
            BlockKind::Metadata => 15,
            BlockKind::MetadataAttachment => 16,
            BlockKind::Type => 17,
            BlockKind::UseList => 18,
            BlockKind::ModuleStrtab => 19,
            BlockKind::GlobalValueSummary => 20,
            BlockKind::OperandBundleTags => 21,
            BlockKind::MetadataKind => 22,
            BlockKind::Strtab => 23,
            BlockKind::FullLtoGlobalValueSummary => 24,
            BlockKind::Symtab => 25,
            BlockKind::SyncScopeNames => 26,
            BlockKind::Unknown(id) => id,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BlockKind::BlockInfo => "BLOCKINFO",
            BlockKind::Module => "MODULE",
            BlockKind::ParamAttr => "PARAMATTR",
            BlockKind::ParamAttrGroup => "PARAMATTR_GROUP",
            BlockKind::Constants => "CONSTANTS",
            BlockKind::Function => "FUNCTION",
            BlockKind::Identification => "IDENTIFICATION",
            BlockKind::ValueSymtab => "VALUE_SYMTAB",
            BlockKind::Metadata => "METADATA",
            BlockKind::MetadataAttachment => "METADATA_ATTACHMENT",
            BlockKind::Type => "TYPE",
            BlockKind::UseList => "USELIST",
            BlockKind::ModuleStrtab => "MODULE_STRTAB",
            BlockKind::GlobalValueSummary => "GLOBALVAL_SUMMARY",
            BlockKind::OperandBundleTags => "OPERAND_BUNDLE_TAGS",
            BlockKind::MetadataKind => "METADATA_KIND",
            BlockKind::Strtab => "STRTAB",
            BlockKind::FullLtoGlobalValueSummary => "FULL_LTO_GLOBALVAL_SUMMARY",
            BlockKind::Symtab => "SYMTAB",
            BlockKind::SyncScopeNames => "SYNC_SCOPE_NAMES",
            BlockKind::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Receives the block structure of a stream in order.
pub trait BlockListener {
    /// Called after ENTER_SUBBLOCK. Returning `false` skips the whole block
    /// using its declared length.
    fn enter_block(&mut self, kind: BlockKind) -> Result<bool, Error>;

    /// Called for every record of an entered block.
    fn record(&mut self, kind: BlockKind, record: Record) -> Result<(), Error>;

    /// Called when the matching END_BLOCK is read.
    fn exit_block(&mut self, kind: BlockKind) -> Result<(), Error>;
}

struct Scope {
    kind: BlockKind,
    abbrev_width: u32,
    abbrevs: Vec<Arc<Abbreviation>>,
    end: u64,
    outer_limit: u64,
}

/// Checks the container header and returns the raw bitstream, magic included.
///
/// Accepts a bare `BC 0xC0DE` stream or one embedded in a bitcode wrapper.
pub fn strip_wrapper(data: &[u8]) -> Result<&[u8], BitstreamError> {
    let word = |at: usize| -> Result<u32, BitstreamError> {
        data.get(at..at + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or(BitstreamError::TruncatedStream {
                requested: 32,
                position: at as u64 * 8,
                remaining: (data.len().saturating_sub(at) * 8) as u64,
            })
    };
    let magic = word(0)?;
    let stream = if magic == WRAPPER_MAGIC {
        let offset = word(8)? as usize;
        let size = word(12)? as usize;
        let end = offset.checked_add(size).filter(|&e| e <= data.len()).ok_or(
            BitstreamError::TruncatedStream {
                requested: (size * 8) as u64,
                position: (offset * 8) as u64,
                remaining: (data.len().saturating_sub(offset) * 8) as u64,
            },
        )?;
        &data[offset..end]
    } else {
        data
    };
    let inner = match stream.get(0..4) {
        Some(b) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        None => return Err(BitstreamError::BadMagic { found: magic }),
    };
    if inner != RAW_MAGIC {
        return Err(BitstreamError::BadMagic { found: inner });
    }
    Ok(stream)
}

pub struct BlockParser<'a> {
    reader: BitReader<'a>,
    scopes: Vec<Scope>,
    block_info: HashMap<u32, Vec<Arc<Abbreviation>>>,
}

impl<'a> BlockParser<'a> {
    /// Validates the header and positions the cursor after the magic.
    pub fn new(data: &'a [u8]) -> Result<Self, BitstreamError> {
        let stream = strip_wrapper(data)?;
        let mut reader = BitReader::new(stream);
        reader.read_fixed(32)?;
        Ok(Self::from_reader(reader))
    }

    /// Starts at the reader's current position, without a magic check.
    pub fn from_reader(reader: BitReader<'a>) -> Self {
        Self {
            reader,
            scopes: Vec::new(),
            block_info: HashMap::new(),
        }
    }

    /// Abbreviations registered through BLOCKINFO for `block_id`.
    pub fn block_info_abbrevs(&self, block_id: u32) -> &[Arc<Abbreviation>] {
        self.block_info.get(&block_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn abbrev_width(&self) -> u32 {
        self.scopes
            .last()
            .map(|s| s.abbrev_width)
            .unwrap_or(TOP_LEVEL_ABBREV_WIDTH)
    }

    /// Drives `listener` over the whole stream.
    pub fn parse<L: BlockListener>(&mut self, listener: &mut L) -> Result<(), Error> {
        loop {
            let width = self.abbrev_width();
            if self.scopes.is_empty() && self.reader.remaining() < u64::from(width) {
                return Ok(());
            }
            let position = self.reader.position();
            let id = self.reader.read_fixed(width)?;
            match id {
                END_BLOCK => {
                    if self.scopes.is_empty() {
                        // Zero padding after the last top-level block.
                        trace!(position, "trailing padding after top-level blocks");
                        return Ok(());
                    }
                    self.exit_scope(listener)?;
                }
                ENTER_SUBBLOCK => self.enter_scope(listener)?,
                DEFINE_ABBREV => {
                    let abbrev = Arc::new(Abbreviation::read_definition(&mut self.reader)?);
                    match self.scopes.last_mut() {
                        Some(scope) => scope.abbrevs.push(abbrev),
                        None => debug!(position, "ignoring abbreviation defined outside of any block"),
                    }
                }
                UNABBREV_RECORD => {
                    let record = self.read_unabbreviated()?;
                    self.deliver(listener, record)?;
                }
                abbrev_id => {
                    let record = self.read_abbreviated(abbrev_id, position)?;
                    self.deliver(listener, record)?;
                }
            }
        }
    }

    fn deliver<L: BlockListener>(&mut self, listener: &mut L, record: Record) -> Result<(), Error> {
        match self.scopes.last() {
            Some(scope) => listener.record(scope.kind, record),
            None => {
                debug!(code = record.code, "ignoring record outside of any block");
                Ok(())
            }
        }
    }

    fn read_unabbreviated(&mut self) -> Result<Record, BitstreamError> {
        let code = self.reader.read_vbr(6)? as u32;
        let count = self.reader.read_vbr(6)?;
        let mut ops = Vec::with_capacity(count.min(1 << 16) as usize);
        for _ in 0..count {
            ops.push(self.reader.read_vbr(6)?);
        }
        Ok(Record::new(code, ops))
    }

    fn read_abbreviated(&mut self, id: u64, position: u64) -> Result<Record, BitstreamError> {
        let scope = self
            .scopes
            .last()
            .ok_or(BitstreamError::UndefinedAbbreviation { id, block: u32::MAX, position })?;
        let abbrev = scope
            .abbrevs
            .get((id - FIRST_APPLICATION_ABBREV) as usize)
            .cloned()
            .ok_or(BitstreamError::UndefinedAbbreviation {
                id,
                block: scope.kind.id(),
                position,
            })?;
        abbrev.read_record(&mut self.reader)
    }

    fn read_block_header(&mut self) -> Result<(u32, u32, u64), BitstreamError> {
        let block_id = self.reader.read_vbr(8)? as u32;
        let position = self.reader.position();
        let abbrev_width = self.reader.read_vbr(4)?;
        if abbrev_width > u64::from(MAX_ABBREV_WIDTH) {
            return Err(BitstreamError::InvalidAbbreviationEncoding {
                encoding: abbrev_width,
                position,
            });
        }
        let abbrev_width = abbrev_width as u32;
        self.reader.align32()?;
        let words = self.reader.read_fixed(32)?;
        let end = self.reader.position() + words * 32;
        Ok((block_id, abbrev_width, end))
    }

    fn enter_scope<L: BlockListener>(&mut self, listener: &mut L) -> Result<(), Error> {
        let (block_id, abbrev_width, end) = self.read_block_header()?;
        let kind = BlockKind::from_id(block_id);
        if kind == BlockKind::BlockInfo {
            return self.read_block_info(abbrev_width, end);
        }
        if !listener.enter_block(kind)? {
            debug!(block = kind.name(), id = block_id, end, "skipping block");
            self.reader.seek(end)?;
            return Ok(());
        }
        trace!(block = kind.name(), abbrev_width, end, "entering block");
        let outer_limit = self.reader.push_limit(end)?;
        let abbrevs = self.block_info.get(&block_id).cloned().unwrap_or_default();
        self.scopes.push(Scope {
            kind,
            abbrev_width,
            abbrevs,
            end,
            outer_limit,
        });
        Ok(())
    }

    fn exit_scope<L: BlockListener>(&mut self, listener: &mut L) -> Result<(), Error> {
        self.reader.align32()?;
        let position = self.reader.position();
        let scope = self
            .scopes
            .pop()
            .ok_or(BitstreamError::UnbalancedBlock { position })?;
        if position < scope.end {
            debug!(block = scope.kind.name(), position, end = scope.end, "block ended before its declared length");
            self.reader.seek(scope.end)?;
        }
        self.reader.restore_limit(scope.outer_limit);
        listener.exit_block(scope.kind)
    }

    /// Consumes a BLOCKINFO block, registering its abbreviations for their
    /// target blocks.
    fn read_block_info(&mut self, abbrev_width: u32, end: u64) -> Result<(), Error> {
        let outer_limit = self.reader.push_limit(end)?;
        let mut target: Option<u32> = None;
        loop {
            let position = self.reader.position();
            match self.reader.read_fixed(abbrev_width)? {
                END_BLOCK => {
                    self.reader.align32()?;
                    if self.reader.position() < end {
                        self.reader.seek(end)?;
                    }
                    self.reader.restore_limit(outer_limit);
                    return Ok(());
                }
                ENTER_SUBBLOCK => {
                    let (_, _, nested_end) = self.read_block_header()?;
                    self.reader.seek(nested_end)?;
                }
                DEFINE_ABBREV => {
                    let abbrev = Arc::new(Abbreviation::read_definition(&mut self.reader)?);
                    match target {
                        Some(block) => self.block_info.entry(block).or_default().push(abbrev),
                        None => debug!(position, "BLOCKINFO abbreviation before SETBID"),
                    }
                }
                UNABBREV_RECORD => {
                    let record = self.read_unabbreviated()?;
                    match record.code {
                        BLOCKINFO_SETBID => target = record.get(0).map(|id| id as u32),
                        BLOCKINFO_BLOCKNAME | BLOCKINFO_SETRECORDNAME => {}
                        code => debug!(code, "unknown BLOCKINFO record"),
                    }
                }
                id => {
                    return Err(BitstreamError::UndefinedAbbreviation {
                        id,
                        block: BlockKind::BlockInfo.id(),
                        position,
                    }
                    .into())
                }
            }
        }
    }
}
