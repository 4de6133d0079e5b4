//! CONSTANTS block handler, shared by module-level and function-local
//! constant pools.

use super::forward::Holder;
use super::{invalid, ModuleBuilder, Ops};
use crate::bitstream::reader::decode_sign_rotated;
use crate::bitstream::{BlockKind, Record};
use crate::error::{Error, ParseError};
use crate::ir::{
    extend_sign, BinOp, BlockAddress, CastOp, CmpPredicate, ConstId, Constant, ConstantKind,
    FloatKind, LocalValue, Resolution, Symbol, Type, TypeId, ValueRef,
};

const SETTYPE: u32 = 1;
const NULL: u32 = 2;
const UNDEF: u32 = 3;
const INTEGER: u32 = 4;
const WIDE_INTEGER: u32 = 5;
const FLOAT: u32 = 6;
const AGGREGATE: u32 = 7;
const STRING: u32 = 8;
const CSTRING: u32 = 9;
const CE_BINOP: u32 = 10;
const CE_CAST: u32 = 11;
const CE_GEP_OLD: u32 = 12;
const CE_SELECT: u32 = 13;
const CE_CMP: u32 = 17;
const CE_INBOUNDS_GEP: u32 = 20;
const BLOCKADDRESS: u32 = 21;
const DATA: u32 = 22;
const CE_GEP_WITH_INRANGE_INDEX: u32 = 24;
const CE_UNOP: u32 = 25;
const POISON: u32 = 26;
const CE_GEP: u32 = 32;

impl ModuleBuilder {
    pub(crate) fn constants_record(&mut self, record: &Record) -> Result<(), Error> {
        if record.code == SETTYPE {
            let index = Ops::new(record, "CONSTANTS").next()?;
            self.constants_type = Some(self.types.get(index)?);
            return Ok(());
        }
        let ty = self
            .constants_type
            .ok_or_else(|| invalid("CONSTANTS", record.code, "constant before SETTYPE"))?;
        let kind = match self.decode_constant(ty, record)? {
            Some(kind) => kind,
            None => {
                self.unknown_record(BlockKind::Constants, record)?;
                ConstantKind::Opaque { code: record.code }
            }
        };
        let pending = match &kind {
            ConstantKind::BlockAddress(BlockAddress {
                function: Resolution::Pending(target),
                ..
            }) => Some(*target),
            _ => None,
        };
        let id = self.module.push_constant(Constant::new(ty, kind));
        if let Some(target) = pending {
            self.forward.defer(target, Holder::Constant(id));
        }
        self.number_constant(id);
        Ok(())
    }

    /// Appends the constant to the value numbering of the enclosing scope.
    fn number_constant(&mut self, id: ConstId) {
        match self.function.as_mut() {
            Some(state) => {
                if let Some(f) = self.module.functions.get_mut(state.id.0 as usize) {
                    f.locals.push(LocalValue::Constant(id));
                }
                state.next_value += 1;
            }
            None => self.module.symbols.push(Symbol::Constant(id)),
        }
    }

    fn decode_constant(&mut self, ty: TypeId, record: &Record) -> Result<Option<ConstantKind>, ParseError> {
        let mut ops = Ops::new(record, "CONSTANTS");
        let value = |v: u64| ValueRef(v as u32);
        let kind = match record.code {
            NULL => ConstantKind::Null,
            UNDEF => ConstantKind::Undef,
            POISON => ConstantKind::Poison,
            INTEGER => {
                let raw = decode_sign_rotated(ops.next()?);
                let bits = self.module.types.int_width(ty).unwrap_or(64);
                ConstantKind::Integer(extend_sign(bits, raw as u64))
            }
            WIDE_INTEGER => {
                let words = ops.rest().iter().map(|&w| decode_sign_rotated(w) as u64).collect();
                ConstantKind::WideInteger(words)
            }
            FLOAT => ConstantKind::Float(self.decode_float_bits(ty, &mut ops)?),
            AGGREGATE => ConstantKind::Aggregate(ops.rest().iter().map(|&v| value(v)).collect()),
            STRING | CSTRING => ConstantKind::String {
                bytes: ops.rest().iter().map(|&c| c as u8).collect(),
                null_terminated: record.code == CSTRING,
            },
            DATA => ConstantKind::Data(ops.rest().to_vec()),
            CE_BINOP => {
                let opcode = ops.next()?;
                let float = self.is_float_like(ty);
                let op = BinOp::from_code(opcode, float)
                    .ok_or_else(|| invalid("CONSTANTS", record.code, format!("unknown binary opcode {}", opcode)))?;
                ConstantKind::BinaryExpr {
                    op,
                    lhs: value(ops.next()?),
                    rhs: value(ops.next()?),
                }
            }
            // Unary constant expressions only serve numbering here.
            CE_UNOP => ConstantKind::Opaque { code: record.code },
            CE_CAST => {
                let opcode = ops.next()?;
                let op = CastOp::from_code(opcode)
                    .ok_or_else(|| invalid("CONSTANTS", record.code, format!("unknown cast opcode {}", opcode)))?;
                let _operand_ty = ops.next()?;
                ConstantKind::CastExpr {
                    op,
                    value: value(ops.next()?),
                }
            }
            CE_CMP => {
                let _operand_ty = ops.next()?;
                let lhs = value(ops.next()?);
                let rhs = value(ops.next()?);
                let code = ops.next()?;
                let pred = CmpPredicate::from_code(code)
                    .ok_or_else(|| invalid("CONSTANTS", record.code, format!("unknown predicate {}", code)))?;
                ConstantKind::CompareExpr { pred, lhs, rhs }
            }
            CE_SELECT => ConstantKind::SelectExpr {
                cond: value(ops.next()?),
                then_value: value(ops.next()?),
                else_value: value(ops.next()?),
            },
            CE_GEP_OLD | CE_INBOUNDS_GEP | CE_GEP_WITH_INRANGE_INDEX | CE_GEP => {
                self.decode_gep_constant(record, &mut ops)?
            }
            BLOCKADDRESS => {
                let _fn_ty = ops.next()?;
                let function = ops.next()? as u32;
                let block = ops.next()? as u32;
                ConstantKind::BlockAddress(BlockAddress {
                    function: Resolution::Pending(function),
                    block,
                })
            }
            _ => return Ok(None),
        };
        Ok(Some(kind))
    }

    pub(crate) fn is_float_like(&self, ty: TypeId) -> bool {
        let types = &self.module.types;
        match types.ty(ty) {
            Type::Float(_) => true,
            Type::Vector { element, .. } => types.ty(*element).is_float(),
            _ => false,
        }
    }

    /// Raw bit pattern of a FLOAT record for the constant's width.
    fn decode_float_bits(&self, ty: TypeId, ops: &mut Ops<'_>) -> Result<u128, ParseError> {
        let kind = match self.module.types.ty(ty) {
            Type::Float(kind) => *kind,
            _ => FloatKind::Double,
        };
        Ok(match kind {
            FloatKind::Half => u128::from(ops.next()? & 0xffff),
            FloatKind::Float => u128::from(ops.next()? & 0xffff_ffff),
            FloatKind::Double => u128::from(ops.next()?),
            FloatKind::X86Fp80 => {
                // [exponent:16 | significand high 48, significand low 16]
                let hi = ops.next()?;
                let lo = ops.next()?;
                let significand = (lo & 0xffff) | (hi << 16);
                let exponent = hi >> 48;
                u128::from(significand) | (u128::from(exponent & 0xffff) << 64)
            }
            FloatKind::Fp128 | FloatKind::PpcFp128 => {
                let lo = ops.next()?;
                let hi = ops.next()?;
                u128::from(lo) | (u128::from(hi) << 64)
            }
        })
    }

    fn decode_gep_constant(&self, record: &Record, ops: &mut Ops<'_>) -> Result<ConstantKind, ParseError> {
        let mut inbounds = record.code == CE_INBOUNDS_GEP;
        let explicit_source = match record.code {
            CE_GEP_WITH_INRANGE_INDEX | CE_GEP => true,
            // Odd operand count means a leading source element type.
            _ => record.ops.len() % 2 == 1,
        };
        let source_index = if explicit_source { Some(ops.next()?) } else { None };
        if matches!(record.code, CE_GEP_WITH_INRANGE_INDEX | CE_GEP) {
            let flags = ops.next()?;
            inbounds = flags & 1 != 0;
        }
        let mut pairs = Vec::with_capacity(ops.remaining() / 2);
        while ops.remaining() >= 2 {
            let ty = ops.next()?;
            let v = ops.next()?;
            pairs.push((ty, ValueRef(v as u32)));
        }
        let Some(&(base_ty_index, base)) = pairs.first() else {
            return Err(invalid("CONSTANTS", record.code, "getelementptr without a base"));
        };
        let source_ty = match source_index {
            Some(index) => self.types.get(index)?,
            None => {
                let base_ty = self.types.get(base_ty_index)?;
                self.module.types.pointee(base_ty).ok_or_else(|| {
                    invalid("CONSTANTS", record.code, "getelementptr base is not a typed pointer")
                })?
            }
        };
        Ok(ConstantKind::GetElementPtr {
            source_ty,
            base,
            indices: pairs[1..].iter().map(|(_, v)| *v).collect(),
            inbounds,
        })
    }
}
