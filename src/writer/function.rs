//! CONSTANTS blocks and function bodies.

use crate::bitstream::reader::encode_sign_rotated;
use crate::bitstream::BlockKind;
use crate::error::WriteError;
use crate::ir::{
    AtomicOrdering, ConstId, Constant, ConstantKind, FloatKind, Function, Instruction,
    InstructionData, LocalValue, Module, Resolution, Symbol, Type, TypeId, ValueRef,
};

use super::types::{chars, TypeOrder};
use super::{encode_alignment, ModuleWriter};

const CST_SETTYPE: u32 = 1;
const CST_NULL: u32 = 2;
const CST_UNDEF: u32 = 3;
const CST_INTEGER: u32 = 4;
const CST_WIDE_INTEGER: u32 = 5;
const CST_FLOAT: u32 = 6;
const CST_AGGREGATE: u32 = 7;
const CST_STRING: u32 = 8;
const CST_CSTRING: u32 = 9;
const CST_CE_BINOP: u32 = 10;
const CST_CE_CAST: u32 = 11;
const CST_CE_SELECT: u32 = 13;
const CST_CE_CMP: u32 = 17;
const CST_BLOCKADDRESS: u32 = 21;
const CST_DATA: u32 = 22;
const CST_POISON: u32 = 26;
const CST_CE_GEP: u32 = 32;

const INST_DECLAREBLOCKS: u32 = 1;
const INST_BINOP: u32 = 2;
const INST_CAST: u32 = 3;
const INST_EXTRACTELT: u32 = 6;
const INST_INSERTELT: u32 = 7;
const INST_SHUFFLEVEC: u32 = 8;
const INST_RET: u32 = 10;
const INST_BR: u32 = 11;
const INST_SWITCH: u32 = 12;
const INST_UNREACHABLE: u32 = 15;
const INST_PHI: u32 = 16;
const INST_ALLOCA: u32 = 19;
const INST_LOAD: u32 = 20;
const INST_EXTRACTVAL: u32 = 26;
const INST_INSERTVAL: u32 = 27;
const INST_CMP2: u32 = 28;
const INST_VSELECT: u32 = 29;
const INST_INDIRECTBR: u32 = 31;
const INST_CALL: u32 = 34;
const INST_FENCE: u32 = 36;
const INST_LOADATOMIC: u32 = 41;
const INST_GEP: u32 = 43;
const INST_STORE: u32 = 44;
const INST_STOREATOMIC: u32 = 45;
const INST_CMPXCHG: u32 = 46;
const INST_UNOP: u32 = 56;
const INST_FREEZE: u32 = 58;
const INST_ATOMICRMW: u32 = 59;

const VST_ENTRY: u32 = 1;
const VST_BBENTRY: u32 = 2;

const CALL_EXPLICIT_TYPE: u64 = 1 << 15;
const ALLOCA_EXPLICIT_TYPE: u64 = 1 << 6;
/// The "system" synchronization scope.
const SYNC_SCOPE_SYSTEM: u64 = 1;

/// Maps model value numbers to the numbers the reader will assign.
pub(crate) struct Numbering<'m> {
    module: &'m Module,
    func: Option<&'m Function>,
    symbols: u32,
    /// New number of each entry of `func.locals`.
    locals: Vec<Option<u32>>,
}

impl<'m> Numbering<'m> {
    pub(crate) fn module(module: &'m Module) -> Self {
        Self {
            module,
            func: None,
            symbols: module.symbols.len() as u32,
            locals: Vec::new(),
        }
    }

    /// Parameters, then local constants, then instruction results in block
    /// order. Returns the numbering and the local constants in emission order.
    fn function(module: &'m Module, func: &'m Function) -> (Self, Vec<ConstId>) {
        let symbols = module.symbols.len() as u32;
        let mut locals = vec![None; func.locals.len()];
        let mut next = symbols;
        let mut constants = Vec::new();
        for (i, local) in func.locals.iter().enumerate() {
            if let LocalValue::Param(p) = local {
                locals[i] = Some(symbols + p);
                next = next.max(symbols + p + 1);
            }
        }
        for (i, local) in func.locals.iter().enumerate() {
            if let LocalValue::Constant(c) = local {
                locals[i] = Some(next);
                constants.push(*c);
                next += 1;
            }
        }
        for (_, _, data) in func.instructions() {
            if let Some(i) = data.value.and_then(|r| func.local_index(r)) {
                locals[i as usize] = Some(next);
                next += 1;
            }
        }
        let numbering = Self {
            module,
            func: Some(func),
            symbols,
            locals,
        };
        (numbering, constants)
    }

    fn unknown(&self, r: ValueRef) -> WriteError {
        WriteError::UnknownValue {
            function: self.func.map(|f| f.name.clone()).unwrap_or_default(),
            value: r.0,
        }
    }

    /// New absolute number of `r`.
    fn absolute(&self, r: ValueRef) -> Result<u32, WriteError> {
        match self.func {
            Some(func) if r.0 >= func.local_base => func
                .local_index(r)
                .and_then(|i| self.locals.get(i as usize).copied().flatten())
                .ok_or_else(|| self.unknown(r)),
            _ if r.0 < self.symbols => Ok(r.0),
            _ => Err(self.unknown(r)),
        }
    }

    fn type_of(&self, r: ValueRef) -> Result<TypeId, WriteError> {
        self.module.value_type(self.func, r).ok_or_else(|| self.unknown(r))
    }
}

/// Operand list of one instruction record, encoded relative to the number
/// the instruction itself would get.
struct Operands<'a, 'm> {
    numbering: &'a Numbering<'m>,
    writer_types: &'a TypeOrder,
    next: u32,
    ops: Vec<u64>,
}

impl Operands<'_, '_> {
    fn push(&mut self, v: u64) {
        self.ops.push(v);
    }

    fn ty(&mut self, ty: TypeId) {
        self.ops.push(self.writer_types.index(ty));
    }

    /// A relative value whose type the reader infers from the instruction.
    fn value(&mut self, r: ValueRef) -> Result<(), WriteError> {
        let new = self.numbering.absolute(r)?;
        self.ops.push(u64::from(self.next.wrapping_sub(new)));
        Ok(())
    }

    /// A relative value followed by its type when it is a forward reference.
    fn typed(&mut self, r: ValueRef) -> Result<(), WriteError> {
        let new = self.numbering.absolute(r)?;
        self.ops.push(u64::from(self.next.wrapping_sub(new)));
        if new >= self.next {
            let ty = self.numbering.type_of(r)?;
            self.ty(ty);
        }
        Ok(())
    }

    fn absolute(&mut self, r: ValueRef) -> Result<(), WriteError> {
        let new = self.numbering.absolute(r)?;
        self.ops.push(u64::from(new));
        Ok(())
    }

    /// Phi operands are signed offsets, since incoming values may be defined
    /// later in the function.
    fn signed(&mut self, r: ValueRef) -> Result<(), WriteError> {
        let new = self.numbering.absolute(r)?;
        self.ops
            .push(encode_sign_rotated(i64::from(self.next) - i64::from(new)));
        Ok(())
    }
}

impl ModuleWriter<'_> {
    pub(super) fn constants_block(&mut self, ids: &[ConstId], numbering: &Numbering<'_>) -> Result<(), WriteError> {
        self.out.enter_block(BlockKind::Constants.id(), 4);
        let mut current: Option<TypeId> = None;
        for &id in ids {
            let Some(constant) = self.module.constant(id) else {
                continue;
            };
            if current != Some(constant.ty) {
                self.out
                    .emit_record(CST_SETTYPE, &[self.types.index(constant.ty)]);
                current = Some(constant.ty);
            }
            let (code, ops) = self.constant_record(constant, numbering)?;
            self.out.emit_record(code, &ops);
        }
        self.out.end_block();
        Ok(())
    }

    fn constant_record(&self, c: &Constant, numbering: &Numbering<'_>) -> Result<(u32, Vec<u64>), WriteError> {
        let abs = |r: ValueRef| numbering.absolute(r).map(u64::from);
        let ty_of = |r: ValueRef| numbering.type_of(r).map(|t| self.types.index(t));
        let record = match &c.kind {
            ConstantKind::Null => (CST_NULL, Vec::new()),
            ConstantKind::Undef => (CST_UNDEF, Vec::new()),
            ConstantKind::Poison => (CST_POISON, Vec::new()),
            ConstantKind::Integer(v) => (CST_INTEGER, vec![encode_sign_rotated(*v)]),
            ConstantKind::WideInteger(words) => (
                CST_WIDE_INTEGER,
                words.iter().map(|&w| encode_sign_rotated(w as i64)).collect(),
            ),
            ConstantKind::Float(bits) => (CST_FLOAT, self.float_words(c.ty, *bits)),
            ConstantKind::Aggregate(elems) => {
                (CST_AGGREGATE, elems.iter().map(|&e| abs(e)).collect::<Result<Vec<u64>, _>>()?)
            }
            ConstantKind::Data(words) => (CST_DATA, words.clone()),
            ConstantKind::String {
                bytes,
                null_terminated,
            } => (
                if *null_terminated { CST_CSTRING } else { CST_STRING },
                bytes.iter().map(|&b| u64::from(b)).collect(),
            ),
            ConstantKind::BinaryExpr { op, lhs, rhs } => (CST_CE_BINOP, vec![op.code(), abs(*lhs)?, abs(*rhs)?]),
            ConstantKind::CastExpr { op, value } => (CST_CE_CAST, vec![op.code(), ty_of(*value)?, abs(*value)?]),
            ConstantKind::CompareExpr { pred, lhs, rhs } => {
                (CST_CE_CMP, vec![ty_of(*lhs)?, abs(*lhs)?, abs(*rhs)?, pred.code()])
            }
            ConstantKind::SelectExpr {
                cond,
                then_value,
                else_value,
            } => (CST_CE_SELECT, vec![abs(*cond)?, abs(*then_value)?, abs(*else_value)?]),
            ConstantKind::GetElementPtr {
                source_ty,
                base,
                indices,
                inbounds,
            } => {
                let mut ops = vec![self.types.index(*source_ty), u64::from(*inbounds)];
                for &r in std::iter::once(base).chain(indices.iter()) {
                    ops.push(ty_of(r)?);
                    ops.push(abs(r)?);
                }
                (CST_CE_GEP, ops)
            }
            ConstantKind::BlockAddress(ba) => {
                let (function, fn_ty) = match ba.function {
                    Resolution::Pending(i) => (u64::from(i), 0),
                    Resolution::Resolved(f) => {
                        let index = self.symbol_index(Symbol::Function(f), || format!("blockaddress(block {})", ba.block))?;
                        let ty = self.module.function(f).map(|f| self.types.index(f.ty)).unwrap_or(0);
                        (index, ty)
                    }
                };
                (CST_BLOCKADDRESS, vec![fn_ty, function, u64::from(ba.block)])
            }
            // Re-emitting the bare code keeps numbering and reads back as opaque.
            ConstantKind::Opaque { code } => (*code, Vec::new()),
        };
        Ok(record)
    }

    fn float_words(&self, ty: TypeId, bits: u128) -> Vec<u64> {
        let kind = match self.module.types.ty(ty) {
            Type::Float(kind) => *kind,
            _ => FloatKind::Double,
        };
        match kind {
            FloatKind::Half | FloatKind::Float | FloatKind::Double => vec![bits as u64],
            FloatKind::X86Fp80 => {
                let significand = bits as u64;
                let exponent = ((bits >> 64) & 0xffff) as u64;
                vec![(exponent << 48) | (significand >> 16), significand & 0xffff]
            }
            FloatKind::Fp128 | FloatKind::PpcFp128 => vec![bits as u64, (bits >> 64) as u64],
        }
    }

    pub(super) fn function_block(&mut self, func: &Function) -> Result<(), WriteError> {
        let (numbering, constants) = Numbering::function(self.module, func);
        self.out.enter_block(BlockKind::Function.id(), 4);
        self.out
            .emit_record(INST_DECLAREBLOCKS, &[func.blocks.len() as u64]);
        if !constants.is_empty() {
            self.constants_block(&constants, &numbering)?;
        }
        let mut next = numbering.symbols + func.params.len() as u32 + constants.len() as u32;
        for block in &func.blocks {
            for data in &block.instrs {
                let (code, ops) = self.instruction_record(&numbering, next, data)?;
                self.out.emit_record(code, &ops);
                if data.value.is_some() {
                    next += 1;
                }
            }
        }
        self.function_symtab(func, &numbering)?;
        self.out.end_block();
        Ok(())
    }

    fn instruction_record(
        &self,
        numbering: &Numbering<'_>,
        next: u32,
        data: &InstructionData,
    ) -> Result<(u32, Vec<u64>), WriteError> {
        let mut o = Operands {
            numbering,
            writer_types: &self.types,
            next,
            ops: Vec::new(),
        };
        let code = match &data.instr {
            Instruction::Binary { op, lhs, rhs } => {
                o.typed(*lhs)?;
                o.value(*rhs)?;
                o.push(op.code());
                INST_BINOP
            }
            Instruction::FNeg { value } => {
                o.typed(*value)?;
                o.push(0);
                INST_UNOP
            }
            Instruction::Freeze { value } => {
                o.typed(*value)?;
                INST_FREEZE
            }
            Instruction::Cast { op, value, to } => {
                o.typed(*value)?;
                o.ty(*to);
                o.push(op.code());
                INST_CAST
            }
            Instruction::Compare { pred, lhs, rhs } => {
                o.typed(*lhs)?;
                o.value(*rhs)?;
                o.push(pred.code());
                INST_CMP2
            }
            Instruction::Select {
                cond,
                then_value,
                else_value,
            } => {
                o.typed(*then_value)?;
                o.value(*else_value)?;
                o.typed(*cond)?;
                INST_VSELECT
            }
            Instruction::Alloca { allocated, count, align } => {
                o.ty(*allocated);
                let count_ty = numbering.type_of(*count)?;
                o.ty(count_ty);
                o.absolute(*count)?;
                o.push(encode_alignment(*align) | ALLOCA_EXPLICIT_TYPE);
                INST_ALLOCA
            }
            Instruction::Load {
                ptr,
                align,
                volatile,
                ordering,
            } => {
                o.typed(*ptr)?;
                o.ty(data.ty);
                o.push(encode_alignment(*align));
                o.push(u64::from(*volatile));
                if *ordering == AtomicOrdering::NotAtomic {
                    INST_LOAD
                } else {
                    o.push(ordering.code());
                    o.push(SYNC_SCOPE_SYSTEM);
                    INST_LOADATOMIC
                }
            }
            Instruction::Store {
                ptr,
                value,
                align,
                volatile,
                ordering,
            } => {
                o.typed(*ptr)?;
                o.typed(*value)?;
                o.push(encode_alignment(*align));
                o.push(u64::from(*volatile));
                if *ordering == AtomicOrdering::NotAtomic {
                    INST_STORE
                } else {
                    o.push(ordering.code());
                    o.push(SYNC_SCOPE_SYSTEM);
                    INST_STOREATOMIC
                }
            }
            Instruction::GetElementPtr {
                source_ty,
                base,
                indices,
                inbounds,
            } => {
                o.push(u64::from(*inbounds));
                o.ty(*source_ty);
                o.typed(*base)?;
                for index in indices {
                    o.typed(*index)?;
                }
                INST_GEP
            }
            Instruction::ExtractElement { vector, index } => {
                o.typed(*vector)?;
                o.typed(*index)?;
                INST_EXTRACTELT
            }
            Instruction::InsertElement { vector, element, index } => {
                o.typed(*vector)?;
                o.value(*element)?;
                o.typed(*index)?;
                INST_INSERTELT
            }
            Instruction::ShuffleVector { lhs, rhs, mask } => {
                o.typed(*lhs)?;
                o.value(*rhs)?;
                o.typed(*mask)?;
                INST_SHUFFLEVEC
            }
            Instruction::ExtractValue { aggregate, indices } => {
                o.typed(*aggregate)?;
                o.ops.extend(indices.iter().map(|&i| u64::from(i)));
                INST_EXTRACTVAL
            }
            Instruction::InsertValue {
                aggregate,
                value,
                indices,
            } => {
                o.typed(*aggregate)?;
                o.typed(*value)?;
                o.ops.extend(indices.iter().map(|&i| u64::from(i)));
                INST_INSERTVAL
            }
            Instruction::Call { callee, fn_ty, args } => {
                o.push(0);
                o.push(CALL_EXPLICIT_TYPE);
                o.ty(*fn_ty);
                o.typed(*callee)?;
                let fixed = self
                    .module
                    .types
                    .signature(*fn_ty)
                    .map(|(_, params, _)| params.len())
                    .unwrap_or(args.len());
                for (i, arg) in args.iter().enumerate() {
                    if i < fixed {
                        o.value(*arg)?;
                    } else {
                        o.typed(*arg)?;
                    }
                }
                INST_CALL
            }
            Instruction::Phi { incoming } => {
                o.ty(data.ty);
                for (value, block) in incoming {
                    o.signed(*value)?;
                    o.push(u64::from(*block));
                }
                INST_PHI
            }
            Instruction::CmpXchg {
                ptr,
                expected,
                new,
                success,
                failure,
                weak,
                volatile,
            } => {
                o.typed(*ptr)?;
                o.typed(*expected)?;
                o.value(*new)?;
                o.push(u64::from(*volatile));
                o.push(success.code());
                o.push(SYNC_SCOPE_SYSTEM);
                o.push(failure.code());
                o.push(u64::from(*weak));
                INST_CMPXCHG
            }
            Instruction::AtomicRmw {
                op,
                ptr,
                value,
                ordering,
                volatile,
            } => {
                o.typed(*ptr)?;
                o.typed(*value)?;
                o.push(op.code());
                o.push(u64::from(*volatile));
                o.push(ordering.code());
                o.push(SYNC_SCOPE_SYSTEM);
                INST_ATOMICRMW
            }
            Instruction::Fence { ordering } => {
                o.push(ordering.code());
                o.push(SYNC_SCOPE_SYSTEM);
                INST_FENCE
            }
            Instruction::Ret { value } => {
                if let Some(v) = value {
                    o.typed(*v)?;
                }
                INST_RET
            }
            Instruction::Br { target } => {
                o.push(u64::from(*target));
                INST_BR
            }
            Instruction::CondBr {
                cond,
                then_block,
                else_block,
            } => {
                o.push(u64::from(*then_block));
                o.push(u64::from(*else_block));
                o.value(*cond)?;
                INST_BR
            }
            Instruction::Switch { cond, default, cases } => {
                let cond_ty = numbering.type_of(*cond)?;
                o.ty(cond_ty);
                o.value(*cond)?;
                o.push(u64::from(*default));
                for (value, block) in cases {
                    o.absolute(*value)?;
                    o.push(u64::from(*block));
                }
                INST_SWITCH
            }
            Instruction::IndirectBr { address, targets } => {
                let addr_ty = numbering.type_of(*address)?;
                o.ty(addr_ty);
                o.value(*address)?;
                o.ops.extend(targets.iter().map(|&t| u64::from(t)));
                INST_INDIRECTBR
            }
            Instruction::Unreachable => INST_UNREACHABLE,
        };
        Ok((code, o.ops))
    }

    /// Names of parameters, instruction results and blocks.
    fn function_symtab(&mut self, func: &Function, numbering: &Numbering<'_>) -> Result<(), WriteError> {
        let mut entries: Vec<(u32, Vec<u64>)> = Vec::new();
        for (i, param) in func.params.iter().enumerate() {
            if let Some(name) = &param.name {
                let mut ops = vec![u64::from(numbering.absolute(func.param_ref(i as u32))?)];
                ops.extend(chars(name));
                entries.push((VST_ENTRY, ops));
            }
        }
        for (_, _, data) in func.instructions() {
            if let (Some(name), Some(r)) = (&data.name, data.value) {
                let mut ops = vec![u64::from(numbering.absolute(r)?)];
                ops.extend(chars(name));
                entries.push((VST_ENTRY, ops));
            }
        }
        for (b, block) in func.blocks.iter().enumerate() {
            if let Some(name) = &block.name {
                let mut ops = vec![b as u64];
                ops.extend(chars(name));
                entries.push((VST_BBENTRY, ops));
            }
        }
        if entries.is_empty() {
            return Ok(());
        }
        self.out.enter_block(BlockKind::ValueSymtab.id(), 4);
        for (code, ops) in entries {
            self.out.emit_record(code, &ops);
        }
        self.out.end_block();
        Ok(())
    }
}
