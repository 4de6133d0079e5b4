//! METADATA and METADATA_KIND block handler.
//!
//! Every record that defines a node gets the next metadata number, whether
//! or not its content is modeled. Records that only attach names or kinds
//! take no number.

use tracing::trace;

use super::{invalid, ModuleBuilder, Ops};
use crate::bitstream::{BitReader, BlockKind, Record};
use crate::error::{Error, ParseError};
use crate::ir::{MetadataBlock, MetadataNode, MetadataRef, NamedMetadata, ValueRef};

const STRING_OLD: u32 = 1;
const VALUE: u32 = 2;
const NODE: u32 = 3;
const NAME: u32 = 4;
const DISTINCT_NODE: u32 = 5;
const KIND: u32 = 6;
const LOCATION: u32 = 7;
const NAMED_NODE: u32 = 10;
const ATTACHMENT: u32 = 11;
const STRINGS: u32 = 35;
const GLOBAL_DECL_ATTACHMENT: u32 = 36;
const INDEX_OFFSET: u32 = 38;
const INDEX: u32 = 39;

impl ModuleBuilder {
    pub(crate) fn begin_metadata(&mut self) {
        self.pending_metadata_name = None;
    }

    /// The block new nodes are appended to: the function's while a body
    /// is open, the module's otherwise.
    fn metadata_target(&mut self) -> &mut MetadataBlock {
        let local = self
            .function
            .as_ref()
            .map(|s| s.id)
            .and_then(|id| self.module.functions.get_mut(id.0 as usize))
            .and_then(|f| f.metadata.as_mut());
        match local {
            Some(block) => block,
            None => &mut self.module.metadata,
        }
    }

    pub(crate) fn metadata_record(&mut self, kind: BlockKind, record: &Record) -> Result<(), Error> {
        let code = record.code;
        let mut ops = Ops::new(record, "METADATA");
        if kind == BlockKind::MetadataKind && code != KIND {
            return self.unknown_record(kind, record);
        }
        let node = match code {
            KIND => {
                let id = ops.next()?;
                self.module.metadata_kinds.push((id, record.string_from(1)));
                return Ok(());
            }
            NAME => {
                self.pending_metadata_name = Some(record.string_from(0));
                return Ok(());
            }
            NAMED_NODE => {
                let name = self
                    .pending_metadata_name
                    .take()
                    .ok_or_else(|| invalid("METADATA", code, "named node without a preceding NAME"))?;
                let operands = record.ops.iter().map(|&id| MetadataRef::Node(id as u32)).collect();
                self.module.named_metadata.push(NamedMetadata { name, operands });
                return Ok(());
            }
            ATTACHMENT | GLOBAL_DECL_ATTACHMENT | INDEX_OFFSET | INDEX => {
                trace!(code, "ignoring metadata attachment/index record");
                return Ok(());
            }
            STRINGS => return self.metadata_strings(record),
            STRING_OLD => MetadataNode::String(record.string_from(0)),
            VALUE => {
                let ty = self.types.get(ops.next()?)?;
                let value = ValueRef(ops.next()? as u32);
                MetadataNode::Value { ty, value }
            }
            NODE | DISTINCT_NODE => MetadataNode::Node {
                operands: record.ops.iter().map(|&op| MetadataRef::from_operand(op)).collect(),
                distinct: code == DISTINCT_NODE,
            },
            LOCATION => {
                let distinct = ops.next()? != 0;
                let line = ops.next()?;
                let column = ops.next()?;
                let scope = MetadataRef::from_operand(ops.next()?);
                let inlined_at = MetadataRef::from_operand(ops.next()?);
                MetadataNode::Location {
                    line,
                    column,
                    scope,
                    inlined_at,
                    distinct,
                }
            }
            // Debug-info records and the pre-3.6 OLD_NODE/OLD_FN_NODE forms.
            _ => MetadataNode::Opaque {
                code,
                operands: record.ops.clone(),
            },
        };
        self.metadata_target().push(node);
        Ok(())
    }

    // [count, offset] blob: `count` vbr6 lengths, then the characters at `offset`.
    fn metadata_strings(&mut self, record: &Record) -> Result<(), Error> {
        let mut ops = Ops::new(record, "METADATA");
        let count = ops.next()?;
        let offset = ops.next()? as usize;
        let blob = record
            .blob
            .as_deref()
            .ok_or_else(|| invalid("METADATA", STRINGS, "strings record without a blob"))?;
        if offset > blob.len() {
            return Err(invalid(
                "METADATA",
                STRINGS,
                format!("character offset {} is past the {}-byte blob", offset, blob.len()),
            )
            .into());
        }
        let mut lengths = BitReader::new(&blob[..offset]);
        let mut chars = &blob[offset..];
        let mut strings = Vec::with_capacity(count.min(1 << 16) as usize);
        for _ in 0..count {
            let len = lengths.read_vbr(6)? as usize;
            if len > chars.len() {
                return Err(ParseError::InvalidRecord {
                    block: "METADATA",
                    code: STRINGS,
                    detail: format!("string of {} bytes overruns the blob", len),
                }
                .into());
            }
            let (head, tail) = chars.split_at(len);
            strings.push(String::from_utf8_lossy(head).into_owned());
            chars = tail;
        }
        let target = self.metadata_target();
        for s in strings {
            target.push(MetadataNode::String(s));
        }
        Ok(())
    }
}
