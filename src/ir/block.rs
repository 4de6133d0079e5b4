use smallvec::SmallVec;

use crate::ir::instr::Instruction;
use crate::ir::types::TypeId;
use crate::ir::value::ValueRef;

/// One instruction plus the value it defines, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionData {
    pub instr: Instruction,
    /// Result type; a void type for instructions that define nothing.
    pub ty: TypeId,
    pub value: Option<ValueRef>,
    pub name: Option<String>,
}

/// A basic block.
///
/// Invariants once sealed:
/// 1. `instrs` is non-empty and its last element is the only terminator.
/// 2. Phi instructions form a prefix of `instrs`.
/// 3. `successors` mirrors the terminator's targets in branch-outcome order;
///    a return yields `[RETURN_SUCCESSOR]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicBlock {
    pub name: Option<String>,
    pub instrs: Vec<InstructionData>,
    pub successors: SmallVec<[u32; 2]>,
}

impl BasicBlock {
    pub fn new(name: Option<String>) -> Self {
        Self {
            name,
            instrs: Vec::new(),
            successors: SmallVec::new(),
        }
    }

    pub fn terminator(&self) -> Option<&InstructionData> {
        self.instrs.last().filter(|i| i.instr.is_terminator())
    }

    pub fn is_sealed(&self) -> bool {
        self.terminator().is_some()
    }

    /// Recomputes `successors` from the terminator.
    pub fn seal(&mut self) {
        self.successors = self
            .terminator()
            .map(|t| t.instr.successors())
            .unwrap_or_default();
    }

    pub fn phis(&self) -> impl Iterator<Item = &InstructionData> + '_ {
        self.instrs.iter().take_while(|i| i.instr.is_phi())
    }

    /// Index of the first non-phi instruction.
    pub fn first_non_phi(&self) -> usize {
        self.instrs.iter().take_while(|i| i.instr.is_phi()).count()
    }

    pub fn all_defs(&self) -> impl Iterator<Item = ValueRef> + '_ {
        self.instrs.iter().filter_map(|i| i.value)
    }
}
