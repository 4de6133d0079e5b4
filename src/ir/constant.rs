use crate::error::ParseError;
use crate::ir::instr::{BinOp, CastOp, CmpPredicate};
use crate::ir::types::TypeId;
use crate::ir::value::{FunctionId, ReplaceOperand, Replacement, Resolution, Symbol, ValueRef};

/// A block address: function plus block index. The function reference is a
/// forward reference until module parsing completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAddress {
    pub function: Resolution<FunctionId>,
    pub block: u32,
}

impl BlockAddress {
    /// The resolved `(function, block)` pair. Fails while the function is
    /// still a placeholder.
    pub fn target(&self) -> Result<(FunctionId, u32), ParseError> {
        match self.function {
            Resolution::Resolved(f) => Ok((f, self.block)),
            Resolution::Pending(index) => Err(ParseError::ForwardReferenceUnresolved {
                index: u64::from(index),
                holder: format!("blockaddress(block {})", self.block),
            }),
        }
    }
}

/// Constant payloads. Operand references are absolute value numbers in the
/// scope that defined the constant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantKind {
    /// Integers up to 64 bits, already sign-extended to the declared width.
    Integer(i64),
    /// Wider integers, least significant word first.
    WideInteger(Vec<u64>),
    /// Raw IEEE bit pattern of the declared width (80-bit and 128-bit
    /// formats use the low 80/128 bits).
    Float(u128),
    Null,
    Undef,
    Poison,
    /// Array, struct or vector built from other values.
    Aggregate(Vec<ValueRef>),
    /// Packed array/vector of integer or float element bit patterns.
    Data(Vec<u64>),
    /// Byte string; `null_terminated` marks the implicit trailing NUL.
    String { bytes: Vec<u8>, null_terminated: bool },
    BinaryExpr {
        op: BinOp,
        lhs: ValueRef,
        rhs: ValueRef,
    },
    CastExpr {
        op: CastOp,
        value: ValueRef,
    },
    CompareExpr {
        pred: CmpPredicate,
        lhs: ValueRef,
        rhs: ValueRef,
    },
    SelectExpr {
        cond: ValueRef,
        then_value: ValueRef,
        else_value: ValueRef,
    },
    GetElementPtr {
        source_ty: TypeId,
        base: ValueRef,
        indices: Vec<ValueRef>,
        inbounds: bool,
    },
    BlockAddress(BlockAddress),
    /// A record the model keeps only to preserve value numbering.
    Opaque { code: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub ty: TypeId,
    pub kind: ConstantKind,
}

impl Constant {
    pub fn new(ty: TypeId, kind: ConstantKind) -> Self {
        Self { ty, kind }
    }

    pub fn operands(&self) -> Vec<ValueRef> {
        match &self.kind {
            ConstantKind::Aggregate(elems) => elems.clone(),
            ConstantKind::BinaryExpr { lhs, rhs, .. } | ConstantKind::CompareExpr { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            ConstantKind::CastExpr { value, .. } => vec![*value],
            ConstantKind::SelectExpr {
                cond,
                then_value,
                else_value,
            } => vec![*cond, *then_value, *else_value],
            ConstantKind::GetElementPtr { base, indices, .. } => {
                let mut out = vec![*base];
                out.extend(indices.iter().copied());
                out
            }
            _ => Vec::new(),
        }
    }
}

impl ReplaceOperand for Constant {
    fn describe(&self) -> String {
        match &self.kind {
            ConstantKind::BlockAddress(ba) => format!("blockaddress(block {})", ba.block),
            _ => "constant".to_string(),
        }
    }

    fn replace(&mut self, original: u32, replacement: Replacement) -> Result<(), ParseError> {
        let holder = self.describe();
        if let ConstantKind::BlockAddress(ba) = &mut self.kind {
            if ba.function != Resolution::Pending(original) {
                return Ok(());
            }
            match replacement.symbol {
                Symbol::Function(f) if replacement.is_definition => {
                    ba.function = Resolution::Resolved(f);
                    Ok(())
                }
                Symbol::Function(_) => Err(ParseError::ReplacementKindMismatch {
                    holder,
                    expected: "function definition",
                    found: "function declaration".to_string(),
                }),
                other => Err(ParseError::ReplacementKindMismatch {
                    holder,
                    expected: "function definition",
                    found: other.kind_name().to_string(),
                }),
            }
        } else {
            Ok(())
        }
    }

    fn pending(&self) -> Vec<u32> {
        match &self.kind {
            ConstantKind::BlockAddress(BlockAddress {
                function: Resolution::Pending(i),
                ..
            }) => vec![*i],
            _ => Vec::new(),
        }
    }
}

/// Sign-extends the low `bits` of `value` into a full `i64`.
///
/// Widths of 0, 1 and 64 are returned unchanged: single-bit constants are
/// booleans and 64-bit constants are already full width.
pub fn extend_sign(bits: u32, value: u64) -> i64 {
    if bits <= 1 || bits >= 64 {
        return value as i64;
    }
    // Ones in every position from the sign bit upward.
    let mask = (!((1i64 << bits) - 1)) >> 1;
    let v = value as i64;
    if v & mask != 0 {
        v | mask
    } else {
        v
    }
}
