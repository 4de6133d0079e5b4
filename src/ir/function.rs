use crate::ir::block::{BasicBlock, InstructionData};
use crate::ir::metadata::MetadataBlock;
use crate::ir::types::TypeId;
use crate::ir::value::{FunctionId, Linkage, LocalValue, ValueRef, Visibility};

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub ty: TypeId,
    pub name: Option<String>,
}

/// A function declaration or definition.
///
/// Value numbering inside the body: refs below `local_base` are module
/// symbols, refs from `local_base` up index `locals` (parameters first).
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    /// The function type (never a pointer to it).
    pub ty: TypeId,
    /// Type of the function used as a value.
    pub ptr_ty: TypeId,
    pub return_ty: TypeId,
    pub params: Vec<Param>,
    pub vararg: bool,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub calling_conv: u64,
    pub align: u32,
    pub is_declaration: bool,
    pub blocks: Vec<BasicBlock>,
    pub local_base: u32,
    pub locals: Vec<LocalValue>,
    pub metadata: Option<MetadataBlock>,
}

impl Function {
    pub fn new(id: FunctionId, name: impl Into<String>, ty: TypeId, return_ty: TypeId, params: Vec<Param>) -> Self {
        Self {
            id,
            name: name.into(),
            ty,
            ptr_ty: ty,
            return_ty,
            params,
            vararg: false,
            linkage: Linkage::External,
            visibility: Visibility::Default,
            calling_conv: 0,
            align: 0,
            is_declaration: true,
            blocks: Vec::new(),
            local_base: 0,
            locals: Vec::new(),
            metadata: None,
        }
    }

    pub fn is_definition(&self) -> bool {
        !self.is_declaration
    }

    pub fn entry_block(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn block(&self, index: u32) -> Option<&BasicBlock> {
        self.blocks.get(index as usize)
    }

    /// Resolves a ref to a local, or `None` for module symbols.
    pub fn local(&self, r: ValueRef) -> Option<LocalValue> {
        r.0.checked_sub(self.local_base)
            .and_then(|i| self.locals.get(i as usize))
            .copied()
    }

    /// Position of `r` in the local list.
    pub fn local_index(&self, r: ValueRef) -> Option<u32> {
        r.0.checked_sub(self.local_base)
            .filter(|&i| (i as usize) < self.locals.len())
    }

    pub fn param_ref(&self, index: u32) -> ValueRef {
        ValueRef(self.local_base + index)
    }

    pub fn instruction(&self, block: u32, index: u32) -> Option<&InstructionData> {
        self.blocks.get(block as usize)?.instrs.get(index as usize)
    }

    /// Iterates `(block, index, instruction)` in declaration order.
    pub fn instructions(&self) -> impl Iterator<Item = (u32, u32, &InstructionData)> + '_ {
        self.blocks.iter().enumerate().flat_map(|(b, block)| {
            block
                .instrs
                .iter()
                .enumerate()
                .map(move |(i, data)| (b as u32, i as u32, data))
        })
    }

    /// Predecessor lists, derived from successor arrays.
    pub fn predecessors(&self) -> Vec<Vec<u32>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for (b, block) in self.blocks.iter().enumerate() {
            for &s in &block.successors {
                if let Some(list) = preds.get_mut(s as usize) {
                    if !list.contains(&(b as u32)) {
                        list.push(b as u32);
                    }
                }
            }
        }
        preds
    }
}
