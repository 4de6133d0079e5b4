//! FUNCTION block handler: decodes instruction records into basic blocks.

use std::collections::HashMap;

use tracing::trace;

use super::module::decode_alignment;
use super::{invalid, ModuleBuilder, Ops};
use crate::bitstream::reader::decode_sign_rotated;
use crate::bitstream::{BlockKind, Record};
use crate::error::{Error, ParseError};
use crate::ir::{
    AtomicOrdering, AtomicRmwOp, BasicBlock, BinOp, CastOp, CmpPredicate, ConstantKind,
    FunctionId, Instruction, InstructionData, LocalValue, MetadataBlock, Symbol, Type, TypeId,
    ValueRef,
};

const DECLAREBLOCKS: u32 = 1;
const BINOP: u32 = 2;
const CAST: u32 = 3;
const GEP_OLD: u32 = 4;
const SELECT: u32 = 5;
const EXTRACTELT: u32 = 6;
const INSERTELT: u32 = 7;
const SHUFFLEVEC: u32 = 8;
const CMP: u32 = 9;
const RET: u32 = 10;
const BR: u32 = 11;
const SWITCH: u32 = 12;
const INVOKE: u32 = 13;
const UNREACHABLE: u32 = 15;
const PHI: u32 = 16;
const ALLOCA: u32 = 19;
const LOAD: u32 = 20;
const VAARG: u32 = 23;
const STORE_OLD: u32 = 24;
const EXTRACTVAL: u32 = 26;
const INSERTVAL: u32 = 27;
const CMP2: u32 = 28;
const VSELECT: u32 = 29;
const INBOUNDS_GEP_OLD: u32 = 30;
const INDIRECTBR: u32 = 31;
const DEBUG_LOC_AGAIN: u32 = 33;
const CALL: u32 = 34;
const DEBUG_LOC: u32 = 35;
const FENCE: u32 = 36;
const CMPXCHG_OLD: u32 = 37;
const ATOMICRMW_OLD: u32 = 38;
const RESUME: u32 = 39;
const LANDINGPAD_OLD: u32 = 40;
const LOADATOMIC: u32 = 41;
const STOREATOMIC_OLD: u32 = 42;
const GEP: u32 = 43;
const STORE: u32 = 44;
const STOREATOMIC: u32 = 45;
const CMPXCHG: u32 = 46;
const LANDINGPAD: u32 = 47;
const CLEANUPRET: u32 = 48;
const CATCHRET: u32 = 49;
const CATCHPAD: u32 = 50;
const CLEANUPPAD: u32 = 51;
const CATCHSWITCH: u32 = 52;
const OPERAND_BUNDLE: u32 = 55;
const UNOP: u32 = 56;
const CALLBR: u32 = 57;
const FREEZE: u32 = 58;
const ATOMICRMW: u32 = 59;
const BLOCKADDR_USERS: u32 = 60;

const CALL_EXPLICIT_TYPE: u64 = 1 << 15;
const CALL_FMF: u64 = 1 << 17;
const ALLOCA_EXPLICIT_TYPE: u64 = 1 << 6;
/// Marker in the type operand of the pre-3.3 case-range switch encoding.
const SWITCH_RANGE_MAGIC: u64 = 0x4b5;

/// Decoding state of the function body being read.
#[derive(Debug)]
pub(crate) struct FunctionState {
    pub(crate) id: FunctionId,
    /// Value number the next defined value gets.
    pub(crate) next_value: u32,
    current_block: u32,
    relative: bool,
    /// Types announced for operands referenced before their definition.
    forward_types: HashMap<u32, TypeId>,
}

impl ModuleBuilder {
    pub(crate) fn begin_function(&mut self, id: FunctionId) -> Result<(), Error> {
        let relative = self.layout().relative_ids;
        let base = self.module.symbols.len() as u32;
        let metadata_start = self.module.metadata.next_index();
        let declared = self.module.functions.len();
        let func = self
            .module
            .function_mut(id)
            .ok_or(ParseError::MissingFunctionBody { declared })?;
        func.is_declaration = false;
        func.local_base = base;
        func.locals = (0..func.params.len() as u32).map(LocalValue::Param).collect();
        func.metadata = Some(MetadataBlock::starting_at(metadata_start));
        let next_value = base + func.params.len() as u32;
        trace!(function = %func.name, base, "decoding function body");
        self.function = Some(FunctionState {
            id,
            next_value,
            current_block: 0,
            relative,
            forward_types: HashMap::new(),
        });
        Ok(())
    }

    pub(crate) fn end_function(&mut self) -> Result<(), Error> {
        let Some(state) = self.function.take() else {
            return Ok(());
        };
        let name = self.function_name(state.id);
        let Some(func) = self.module.function_mut(state.id) else {
            return Ok(());
        };
        if (state.current_block as usize) < func.blocks.len() {
            return Err(ParseError::Verification {
                function: name,
                detail: format!(
                    "block {} has no terminator ({} blocks declared)",
                    state.current_block,
                    func.blocks.len()
                ),
            }
            .into());
        }
        for block in &mut func.blocks {
            block.seal();
        }
        let limit = state.next_value;
        let func = &self.module.functions[state.id.0 as usize];
        for (b, i, data) in func.instructions() {
            if let Some(bad) = data.instr.operands().into_iter().find(|r| r.0 >= limit) {
                return Err(ParseError::ForwardReferenceUnresolved {
                    index: u64::from(bad.0),
                    holder: format!("instruction {} of block {} in function '{}'", i, b, name),
                }
                .into());
            }
        }
        for local in &func.locals {
            if let LocalValue::Constant(c) = local {
                let operands = self.module.constant(*c).map(|c| c.operands()).unwrap_or_default();
                if let Some(bad) = operands.into_iter().find(|r| r.0 >= limit) {
                    return Err(ParseError::ForwardReferenceUnresolved {
                        index: u64::from(bad.0),
                        holder: format!("local constant in function '{}'", name),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    fn state(&self) -> Result<&FunctionState, ParseError> {
        self.function
            .as_ref()
            .ok_or_else(|| invalid("FUNCTION", 0, "instruction outside of a function body"))
    }

    fn value_ref(&self, raw: u64) -> Result<ValueRef, ParseError> {
        let state = self.state()?;
        Ok(if state.relative {
            ValueRef(state.next_value.wrapping_sub(raw as u32))
        } else {
            ValueRef(raw as u32)
        })
    }

    fn note_forward(&mut self, r: ValueRef, ty: Option<TypeId>) {
        if let (Some(state), Some(ty)) = (self.function.as_mut(), ty) {
            if r.0 >= state.next_value {
                state.forward_types.insert(r.0, ty);
            }
        }
    }

    /// Reads a value operand; forward references carry an explicit type.
    fn value_and_type(&mut self, ops: &mut Ops<'_>) -> Result<(ValueRef, TypeId), ParseError> {
        let r = self.value_ref(ops.next()?)?;
        if r.0 >= self.state()?.next_value {
            let ty = self.types.get(ops.next()?)?;
            self.note_forward(r, Some(ty));
            return Ok((r, ty));
        }
        let ty = self.type_of(r, ops.code())?;
        Ok((r, ty))
    }

    /// Reads a value operand whose type is implied by the instruction.
    fn value_of(&mut self, ops: &mut Ops<'_>, implied: Option<TypeId>) -> Result<ValueRef, ParseError> {
        let r = self.value_ref(ops.next()?)?;
        self.note_forward(r, implied);
        Ok(r)
    }

    fn type_of(&self, r: ValueRef, code: u32) -> Result<TypeId, ParseError> {
        let state = self.state()?;
        if let Some(ty) = state.forward_types.get(&r.0) {
            return Ok(*ty);
        }
        self.module
            .value_type(self.module.function(state.id), r)
            .ok_or_else(|| invalid("FUNCTION", code, format!("operand {} has no known type", r)))
    }

    fn constant_int(&self, r: ValueRef) -> Option<i64> {
        let func = self.module.function(self.state().ok()?.id)?;
        let id = match func.local(r) {
            Some(LocalValue::Constant(c)) => c,
            Some(_) => return None,
            None => match self.module.symbol(r)? {
                Symbol::Constant(c) => c,
                _ => return None,
            },
        };
        match self.module.constant(id)?.kind {
            ConstantKind::Integer(v) => Some(v),
            ConstantKind::Null => Some(0),
            _ => None,
        }
    }

    fn type_at(&self, index: u64) -> Result<TypeId, ParseError> {
        self.types.get(index)
    }

    fn i1_like(&mut self, operand_ty: TypeId) -> TypeId {
        let i1 = self.module.types.int(1);
        match self.module.types.vector_len(operand_ty) {
            Some(n) => self.module.types.vector(i1, n),
            None => i1,
        }
    }

    fn gep_result(&mut self, source_ty: TypeId, base_ty: TypeId, indices: &[ValueRef]) -> TypeId {
        let types = &self.module.types;
        if types.pointee(base_ty).is_none() {
            return base_ty;
        }
        let mut current = source_ty;
        for &index in indices.iter().skip(1) {
            current = match types.ty(current) {
                Type::Struct(st) => {
                    let field = self.constant_int(index).unwrap_or(0);
                    match st.fields.get(field as usize) {
                        Some(f) => *f,
                        None => break,
                    }
                }
                Type::Array { element, .. } | Type::Vector { element, .. } => *element,
                _ => break,
            };
        }
        self.pointer_for(current)
    }

    fn aggregate_member(&self, mut ty: TypeId, indices: &[u32], code: u32) -> Result<TypeId, ParseError> {
        for &i in indices {
            ty = self
                .module
                .types
                .member(ty, u64::from(i))
                .ok_or_else(|| invalid("FUNCTION", code, format!("aggregate index {} out of range", i)))?;
        }
        Ok(ty)
    }

    fn emit(&mut self, instr: Instruction, ty: TypeId, code: u32) -> Result<(), Error> {
        let defines = !self.module.types.is_void(ty);
        let state = self
            .function
            .as_mut()
            .ok_or_else(|| invalid("FUNCTION", code, "instruction outside of a function body"))?;
        let func = self
            .module
            .functions
            .get_mut(state.id.0 as usize)
            .ok_or_else(|| invalid("FUNCTION", code, "function body without declaration"))?;
        let block_index = state.current_block;
        let declared = func.blocks.len();
        let block = func.blocks.get_mut(block_index as usize).ok_or_else(|| {
            invalid(
                "FUNCTION",
                code,
                format!("instruction after the last of {} declared blocks", declared),
            )
        })?;
        let index = block.instrs.len() as u32;
        let is_terminator = instr.is_terminator();
        let value = if defines {
            let r = ValueRef(state.next_value);
            state.next_value += 1;
            Some(r)
        } else {
            None
        };
        block.instrs.push(InstructionData {
            instr,
            ty,
            value,
            name: None,
        });
        if defines {
            func.locals.push(LocalValue::Instruction {
                block: block_index,
                index,
            });
        }
        if is_terminator {
            state.current_block += 1;
        }
        Ok(())
    }

    pub(crate) fn function_record(&mut self, record: &Record) -> Result<(), Error> {
        if self.function.is_none() {
            return self.unknown_record(BlockKind::Function, record);
        }
        let code = record.code;
        let mut ops = Ops::new(record, "FUNCTION");
        let void = self.module.types.void();
        let (instr, ty) = match code {
            DECLAREBLOCKS => {
                let count = ops.next()?;
                if let Some(func) = self.function.as_ref().and_then(|s| self.module.functions.get_mut(s.id.0 as usize)) {
                    func.blocks = (0..count).map(|_| BasicBlock::new(None)).collect();
                }
                return Ok(());
            }
            BINOP => {
                let (lhs, ty) = self.value_and_type(&mut ops)?;
                let rhs = self.value_of(&mut ops, Some(ty))?;
                let opcode = ops.next()?;
                let op = BinOp::from_code(opcode, self.is_float_like(ty))
                    .ok_or_else(|| invalid("FUNCTION", code, format!("unknown binary opcode {}", opcode)))?;
                (Instruction::Binary { op, lhs, rhs }, ty)
            }
            UNOP => {
                let (value, ty) = self.value_and_type(&mut ops)?;
                let opcode = ops.next()?;
                if opcode != 0 {
                    return Err(invalid("FUNCTION", code, format!("unknown unary opcode {}", opcode)).into());
                }
                (Instruction::FNeg { value }, ty)
            }
            FREEZE => {
                let (value, ty) = self.value_and_type(&mut ops)?;
                (Instruction::Freeze { value }, ty)
            }
            CAST => {
                let (value, _) = self.value_and_type(&mut ops)?;
                let to = self.type_at(ops.next()?)?;
                let opcode = ops.next()?;
                let op = CastOp::from_code(opcode)
                    .ok_or_else(|| invalid("FUNCTION", code, format!("unknown cast opcode {}", opcode)))?;
                (Instruction::Cast { op, value, to }, to)
            }
            CMP | CMP2 => {
                let (lhs, ty) = self.value_and_type(&mut ops)?;
                let rhs = self.value_of(&mut ops, Some(ty))?;
                let raw = ops.next()?;
                let pred = CmpPredicate::from_code(raw)
                    .ok_or_else(|| invalid("FUNCTION", code, format!("unknown predicate {}", raw)))?;
                let result = self.i1_like(ty);
                (Instruction::Compare { pred, lhs, rhs }, result)
            }
            SELECT | VSELECT => {
                let (then_value, ty) = self.value_and_type(&mut ops)?;
                let else_value = self.value_of(&mut ops, Some(ty))?;
                let cond = if code == VSELECT {
                    self.value_and_type(&mut ops)?.0
                } else {
                    let i1 = self.module.types.int(1);
                    self.value_of(&mut ops, Some(i1))?
                };
                (
                    Instruction::Select {
                        cond,
                        then_value,
                        else_value,
                    },
                    ty,
                )
            }
            EXTRACTELT => {
                let (vector, vty) = self.value_and_type(&mut ops)?;
                let (index, _) = self.value_and_type(&mut ops)?;
                let elem = self
                    .module
                    .types
                    .element(vty)
                    .ok_or_else(|| invalid("FUNCTION", code, "extractelement on a non-vector"))?;
                (Instruction::ExtractElement { vector, index }, elem)
            }
            INSERTELT => {
                let (vector, vty) = self.value_and_type(&mut ops)?;
                let elem = self.module.types.element(vty);
                let element = self.value_of(&mut ops, elem)?;
                let (index, _) = self.value_and_type(&mut ops)?;
                (
                    Instruction::InsertElement {
                        vector,
                        element,
                        index,
                    },
                    vty,
                )
            }
            SHUFFLEVEC => {
                let (lhs, vty) = self.value_and_type(&mut ops)?;
                let rhs = self.value_of(&mut ops, Some(vty))?;
                let (mask, mty) = self.value_and_type(&mut ops)?;
                let elem = self
                    .module
                    .types
                    .element(vty)
                    .ok_or_else(|| invalid("FUNCTION", code, "shufflevector on a non-vector"))?;
                let lanes = self.module.types.vector_len(mty).unwrap_or(0);
                let result = self.module.types.vector(elem, lanes);
                (Instruction::ShuffleVector { lhs, rhs, mask }, result)
            }
            EXTRACTVAL => {
                let (aggregate, aty) = self.value_and_type(&mut ops)?;
                let indices: Vec<u32> = ops.rest().iter().map(|&i| i as u32).collect();
                let result = self.aggregate_member(aty, &indices, code)?;
                (Instruction::ExtractValue { aggregate, indices }, result)
            }
            INSERTVAL => {
                let (aggregate, aty) = self.value_and_type(&mut ops)?;
                let (value, _) = self.value_and_type(&mut ops)?;
                let indices: Vec<u32> = ops.rest().iter().map(|&i| i as u32).collect();
                (
                    Instruction::InsertValue {
                        aggregate,
                        value,
                        indices,
                    },
                    aty,
                )
            }
            GEP | GEP_OLD | INBOUNDS_GEP_OLD => {
                let (inbounds, explicit) = if code == GEP {
                    let inbounds = ops.next()? != 0;
                    (inbounds, Some(self.type_at(ops.next()?)?))
                } else {
                    (code == INBOUNDS_GEP_OLD, None)
                };
                let (base, base_ty) = self.value_and_type(&mut ops)?;
                let mut indices = Vec::new();
                while ops.remaining() > 0 {
                    indices.push(self.value_and_type(&mut ops)?.0);
                }
                let source_ty = match explicit {
                    Some(ty) => ty,
                    None => self
                        .module
                        .types
                        .pointee(base_ty)
                        .ok_or_else(|| invalid("FUNCTION", code, "getelementptr base is not a typed pointer"))?,
                };
                let result = self.gep_result(source_ty, base_ty, &indices);
                (
                    Instruction::GetElementPtr {
                        source_ty,
                        base,
                        indices,
                        inbounds,
                    },
                    result,
                )
            }
            ALLOCA => {
                let inst_ty = self.type_at(ops.next()?)?;
                let count_ty = self.type_at(ops.next()?)?;
                // The element count is an absolute value id.
                let count = ValueRef(ops.next()? as u32);
                self.note_forward(count, Some(count_ty));
                let align_field = ops.next()?;
                let (allocated, result) = if align_field & ALLOCA_EXPLICIT_TYPE != 0 {
                    (inst_ty, self.pointer_for(inst_ty))
                } else {
                    (self.module.types.pointee(inst_ty).unwrap_or(inst_ty), inst_ty)
                };
                (
                    Instruction::Alloca {
                        allocated,
                        count,
                        align: decode_alignment(align_field),
                    },
                    result,
                )
            }
            LOAD | LOADATOMIC => {
                let (ptr, ptr_ty) = self.value_and_type(&mut ops)?;
                let explicit = if code == LOAD { 3 } else { 5 };
                let ty = if ops.remaining() == explicit {
                    self.type_at(ops.next()?)?
                } else {
                    self.module
                        .types
                        .pointee(ptr_ty)
                        .ok_or_else(|| invalid("FUNCTION", code, "load without a result type"))?
                };
                let align = decode_alignment(ops.next()?);
                let volatile = ops.next()? != 0;
                let ordering = if code == LOADATOMIC {
                    AtomicOrdering::from_code(ops.next()?)
                } else {
                    AtomicOrdering::NotAtomic
                };
                (
                    Instruction::Load {
                        ptr,
                        align,
                        volatile,
                        ordering,
                    },
                    ty,
                )
            }
            STORE | STORE_OLD | STOREATOMIC | STOREATOMIC_OLD => {
                let (ptr, ptr_ty) = self.value_and_type(&mut ops)?;
                let value = if code == STORE || code == STOREATOMIC {
                    self.value_and_type(&mut ops)?.0
                } else {
                    let pointee = self.module.types.pointee(ptr_ty);
                    self.value_of(&mut ops, pointee)?
                };
                let align = decode_alignment(ops.next()?);
                let volatile = ops.next()? != 0;
                let ordering = if code == STOREATOMIC || code == STOREATOMIC_OLD {
                    AtomicOrdering::from_code(ops.next()?)
                } else {
                    AtomicOrdering::NotAtomic
                };
                (
                    Instruction::Store {
                        ptr,
                        value,
                        align,
                        volatile,
                        ordering,
                    },
                    void,
                )
            }
            CMPXCHG | CMPXCHG_OLD => {
                let (ptr, ptr_ty) = self.value_and_type(&mut ops)?;
                let (expected, value_ty) = if code == CMPXCHG {
                    self.value_and_type(&mut ops)?
                } else {
                    let pointee = self
                        .module
                        .types
                        .pointee(ptr_ty)
                        .ok_or_else(|| invalid("FUNCTION", code, "cmpxchg through an untyped pointer"))?;
                    (self.value_of(&mut ops, Some(pointee))?, pointee)
                };
                let new = self.value_of(&mut ops, Some(value_ty))?;
                let volatile = ops.next()? != 0;
                let success = AtomicOrdering::from_code(ops.next()?);
                let _sync_scope = ops.next()?;
                let failure = ops
                    .opt()
                    .map(AtomicOrdering::from_code)
                    .unwrap_or_else(|| strongest_failure_ordering(success));
                let weak = ops.opt().map(|w| w != 0).unwrap_or(false);
                let i1 = self.module.types.int(1);
                let result = self.module.types.anon_struct(vec![value_ty, i1], false);
                (
                    Instruction::CmpXchg {
                        ptr,
                        expected,
                        new,
                        success,
                        failure,
                        weak,
                        volatile,
                    },
                    result,
                )
            }
            ATOMICRMW | ATOMICRMW_OLD => {
                let (ptr, ptr_ty) = self.value_and_type(&mut ops)?;
                let (value, ty) = if code == ATOMICRMW {
                    self.value_and_type(&mut ops)?
                } else {
                    let pointee = self
                        .module
                        .types
                        .pointee(ptr_ty)
                        .ok_or_else(|| invalid("FUNCTION", code, "atomicrmw through an untyped pointer"))?;
                    (self.value_of(&mut ops, Some(pointee))?, pointee)
                };
                let raw = ops.next()?;
                let op = AtomicRmwOp::from_code(raw)
                    .ok_or_else(|| invalid("FUNCTION", code, format!("unsupported atomicrmw operation {}", raw)))?;
                let volatile = ops.next()? != 0;
                let ordering = AtomicOrdering::from_code(ops.next()?);
                (
                    Instruction::AtomicRmw {
                        op,
                        ptr,
                        value,
                        ordering,
                        volatile,
                    },
                    ty,
                )
            }
            FENCE => {
                let ordering = AtomicOrdering::from_code(ops.next()?);
                (Instruction::Fence { ordering }, void)
            }
            CALL => self.decode_call(&mut ops)?,
            PHI => {
                let ty = self.type_at(ops.next()?)?;
                let relative = self.state()?.relative;
                let next = self.state()?.next_value;
                let mut incoming = Vec::new();
                // A trailing odd operand holds fast-math flags.
                while ops.remaining() >= 2 {
                    let raw = ops.next()?;
                    let value = if relative {
                        ValueRef((i64::from(next) - decode_sign_rotated(raw)) as u32)
                    } else {
                        ValueRef(raw as u32)
                    };
                    self.note_forward(value, Some(ty));
                    let block = ops.next()? as u32;
                    incoming.push((value, block));
                }
                (Instruction::Phi { incoming }, ty)
            }
            RET => {
                let value = if ops.remaining() == 0 {
                    None
                } else {
                    Some(self.value_and_type(&mut ops)?.0)
                };
                (Instruction::Ret { value }, void)
            }
            BR => {
                let target = ops.next()? as u32;
                let instr = match ops.opt() {
                    Some(else_block) => {
                        let i1 = self.module.types.int(1);
                        let cond = self.value_of(&mut ops, Some(i1))?;
                        Instruction::CondBr {
                            cond,
                            then_block: target,
                            else_block: else_block as u32,
                        }
                    }
                    None => Instruction::Br { target },
                };
                (instr, void)
            }
            SWITCH => {
                let raw_ty = ops.next()?;
                if raw_ty >> 16 == SWITCH_RANGE_MAGIC {
                    return Err(ParseError::UnsupportedInstruction {
                        code,
                        function: self.current_function_name(),
                    }
                    .into());
                }
                let cond_ty = self.type_at(raw_ty)?;
                let cond = self.value_of(&mut ops, Some(cond_ty))?;
                let default = ops.next()? as u32;
                let mut cases = Vec::new();
                while ops.remaining() >= 2 {
                    // Case values are absolute ids.
                    let value = ValueRef(ops.next()? as u32);
                    let block = ops.next()? as u32;
                    cases.push((value, block));
                }
                (Instruction::Switch { cond, default, cases }, void)
            }
            INDIRECTBR => {
                let addr_ty = self.type_at(ops.next()?)?;
                let address = self.value_of(&mut ops, Some(addr_ty))?;
                let targets = ops.rest().iter().map(|&b| b as u32).collect();
                (Instruction::IndirectBr { address, targets }, void)
            }
            UNREACHABLE => (Instruction::Unreachable, void),
            DEBUG_LOC | DEBUG_LOC_AGAIN | OPERAND_BUNDLE | BLOCKADDR_USERS | 61..=65 => {
                trace!(code, "ignoring debug/bundle record");
                return Ok(());
            }
            INVOKE | VAARG | RESUME | LANDINGPAD_OLD | LANDINGPAD | CLEANUPRET | CATCHRET | CATCHPAD
            | CLEANUPPAD | CATCHSWITCH | CALLBR => {
                return Err(ParseError::UnsupportedInstruction {
                    code,
                    function: self.current_function_name(),
                }
                .into())
            }
            _ => return self.unknown_record(BlockKind::Function, record),
        };
        self.emit(instr, ty, code)
    }

    fn current_function_name(&self) -> String {
        self.function
            .as_ref()
            .map(|s| self.function_name(s.id))
            .unwrap_or_default()
    }

    // [paramattrs, cc, fmf?, fnty?, fnid, args...]
    fn decode_call(&mut self, ops: &mut Ops<'_>) -> Result<(Instruction, TypeId), ParseError> {
        let code = ops.code();
        let _attributes = ops.next()?;
        let cc = ops.next()?;
        if cc & CALL_FMF != 0 {
            ops.next()?;
        }
        let explicit = if cc & CALL_EXPLICIT_TYPE != 0 {
            Some(self.type_at(ops.next()?)?)
        } else {
            None
        };
        let (callee, callee_ty) = self.value_and_type(ops)?;
        let fn_ty = match explicit {
            Some(ty) => ty,
            None => self
                .module
                .types
                .pointee(callee_ty)
                .ok_or_else(|| invalid("FUNCTION", code, "call through a value that is not a function pointer"))?,
        };
        let (ret, params, vararg) = self
            .module
            .types
            .signature(fn_ty)
            .map(|(r, p, v)| (r, p.to_vec(), v))
            .ok_or_else(|| invalid("FUNCTION", code, "call type is not a function type"))?;
        let mut args = Vec::with_capacity(params.len());
        for param in params {
            if matches!(self.module.types.ty(param), Type::Label) {
                return Err(invalid("FUNCTION", code, "label arguments are not supported"));
            }
            args.push(self.value_of(ops, Some(param))?);
        }
        if vararg {
            while ops.remaining() > 0 {
                args.push(self.value_and_type(ops)?.0);
            }
        }
        Ok((Instruction::Call { callee, fn_ty, args }, ret))
    }
}

/// Failure ordering implied by a success ordering when the record omits it.
fn strongest_failure_ordering(success: AtomicOrdering) -> AtomicOrdering {
    match success {
        AtomicOrdering::AcquireRelease => AtomicOrdering::Acquire,
        AtomicOrdering::Release => AtomicOrdering::Monotonic,
        other => other,
    }
}
