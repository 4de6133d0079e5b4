//! Metadata graph.
//!
//! Metadata is numbered densely in record order. Operands refer to nodes by
//! number; forward references are plain numbers that become present once the
//! array has grown far enough, so no patching is needed.

use crate::ir::types::TypeId;
use crate::ir::value::ValueRef;

/// A reference to a metadata node, or the void singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataRef {
    Void,
    Node(u32),
}

impl MetadataRef {
    /// Decodes an operand stored as `id + 1`, where 0 means void.
    pub fn from_operand(op: u64) -> Self {
        if op == 0 {
            MetadataRef::Void
        } else {
            MetadataRef::Node((op - 1) as u32)
        }
    }

    pub fn to_operand(self) -> u64 {
        match self {
            MetadataRef::Void => 0,
            MetadataRef::Node(id) => u64::from(id) + 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetadataNode {
    String(String),
    Value { ty: TypeId, value: ValueRef },
    Node { operands: Vec<MetadataRef>, distinct: bool },
    Location {
        line: u64,
        column: u64,
        scope: MetadataRef,
        inlined_at: MetadataRef,
        distinct: bool,
    },
    /// Debug-info and other records kept only for numbering.
    Opaque { code: u32, operands: Vec<u64> },
}

/// A growable, offset-indexed list of metadata nodes.
///
/// `start_index` is the number of the first node in this block, so a
/// function-local block continues the module's numbering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataBlock {
    start_index: u32,
    nodes: Vec<MetadataNode>,
}

impl MetadataBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(start_index: u32) -> Self {
        Self {
            start_index,
            nodes: Vec::new(),
        }
    }

    pub fn start_index(&self) -> u32 {
        self.start_index
    }

    /// Number the next appended node will get.
    pub fn next_index(&self) -> u32 {
        self.start_index + self.nodes.len() as u32
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push(&mut self, node: MetadataNode) -> MetadataRef {
        let id = self.next_index();
        self.nodes.push(node);
        MetadataRef::Node(id)
    }

    /// `true` when the reference is void or names a node this block holds.
    pub fn is_present(&self, r: MetadataRef) -> bool {
        match r {
            MetadataRef::Void => true,
            MetadataRef::Node(id) => id >= self.start_index && id < self.next_index(),
        }
    }

    pub fn get(&self, r: MetadataRef) -> Option<&MetadataNode> {
        match r {
            MetadataRef::Void => None,
            MetadataRef::Node(id) if self.is_present(r) => {
                self.nodes.get((id - self.start_index) as usize)
            }
            MetadataRef::Node(_) => None,
        }
    }

    pub fn string(&self, r: MetadataRef) -> Option<&str> {
        match self.get(r) {
            Some(MetadataNode::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetadataRef, &MetadataNode)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(move |(i, n)| (MetadataRef::Node(self.start_index + i as u32), n))
    }
}

/// `!name = !{...}` at module level.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedMetadata {
    pub name: String,
    pub operands: Vec<MetadataRef>,
}
