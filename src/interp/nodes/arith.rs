//! Binary arithmetic: integer ops wrap at the declared width, floating ops
//! follow IEEE semantics of the operand format.

use half::f16;

use super::{unsupported, Path, Specializer};
use crate::error::InterpError;
use crate::interp::value::{sign_extend_128, width_mask, TypeTag, Value};
use crate::ir::BinOp;

pub type BinaryImpl = fn(BinOp, &Value, &Value) -> Result<Value, InterpError>;

#[derive(Debug)]
pub struct ArithNode {
    op: BinOp,
    spec: Specializer<BinaryImpl>,
}

impl ArithNode {
    pub fn new(op: BinOp) -> Self {
        Self {
            op,
            spec: Specializer::new(),
        }
    }

    pub fn op(&self) -> BinOp {
        self.op
    }

    fn opcode_name(&self) -> &'static str {
        self.op.name()
    }

    pub fn execute(&self, lhs: &Value, rhs: &Value) -> Result<Value, InterpError> {
        let key = lhs.key();
        if key != rhs.key() {
            return Err(unsupported(self.op.name(), &[lhs, rhs]));
        }
        match self.spec.dispatch(key, || select(self.op, lhs)) {
            Some(Path::Specialized(f)) => f(self.op, lhs, rhs),
            Some(Path::Generic) => binary(self.op, lhs, rhs),
            None => Err(unsupported(self.op.name(), &[lhs, rhs])),
        }
    }
}

super::impl_specializing!(ArithNode);

fn select(op: BinOp, lhs: &Value) -> Option<BinaryImpl> {
    let f: BinaryImpl = match (lhs.tag(), op.is_float()) {
        (TypeTag::I1, false) => arith_i1,
        (TypeTag::I8, false) => arith_i8,
        (TypeTag::I16, false) => arith_i16,
        (TypeTag::I32, false) => arith_i32,
        (TypeTag::I64, false) => arith_i64,
        (TypeTag::Int(_), false) => arith_wide,
        (TypeTag::Half, true) => arith_half,
        (TypeTag::Float, true) => arith_f32,
        (TypeTag::Double, true) | (TypeTag::X86Fp80, true) => arith_f64,
        (TypeTag::Vector, _) => arith_vector,
        _ => return None,
    };
    Some(f)
}

fn division_by_zero(op: BinOp) -> InterpError {
    InterpError::DivisionByZero {
        opcode: op.name().to_string(),
    }
}

macro_rules! int_arith {
    ($name:ident, $variant:ident, $s:ty, $u:ty, $bits:expr) => {
        fn $name(op: BinOp, a: &Value, b: &Value) -> Result<Value, InterpError> {
            let (Value::$variant(x), Value::$variant(y)) = (a, b) else {
                return Err(unsupported(op.name(), &[a, b]));
            };
            let (x, y) = (*x, *y);
            let r: $s = match op {
                BinOp::Add => x.wrapping_add(y),
                BinOp::Sub => x.wrapping_sub(y),
                BinOp::Mul => x.wrapping_mul(y),
                BinOp::UDiv | BinOp::SDiv | BinOp::URem | BinOp::SRem if y == 0 => {
                    return Err(division_by_zero(op))
                }
                BinOp::UDiv => ((x as $u) / (y as $u)) as $s,
                BinOp::SDiv => x.wrapping_div(y),
                BinOp::URem => ((x as $u) % (y as $u)) as $s,
                BinOp::SRem => x.wrapping_rem(y),
                BinOp::Shl => x.wrapping_shl(((y as $u) % $bits) as u32),
                BinOp::LShr => ((x as $u) >> ((y as $u) % $bits)) as $s,
                BinOp::AShr => x >> ((y as $u) % $bits),
                BinOp::And => x & y,
                BinOp::Or => x | y,
                BinOp::Xor => x ^ y,
                _ => return Err(unsupported(op.name(), &[a, b])),
            };
            Ok(Value::$variant(r))
        }
    };
}

int_arith!(arith_i8, I8, i8, u8, 8);
int_arith!(arith_i16, I16, i16, u16, 16);
int_arith!(arith_i32, I32, i32, u32, 32);
int_arith!(arith_i64, I64, i64, u64, 64);

fn arith_i1(op: BinOp, a: &Value, b: &Value) -> Result<Value, InterpError> {
    let (Value::I1(x), Value::I1(y)) = (a, b) else {
        return Err(unsupported(op.name(), &[a, b]));
    };
    let (x, y) = (*x, *y);
    let r = match op {
        BinOp::Add | BinOp::Sub | BinOp::Xor => x ^ y,
        BinOp::Mul | BinOp::And => x & y,
        BinOp::Or => x | y,
        BinOp::UDiv | BinOp::SDiv | BinOp::URem | BinOp::SRem if !y => {
            return Err(division_by_zero(op))
        }
        BinOp::UDiv | BinOp::SDiv => x,
        BinOp::URem | BinOp::SRem => false,
        // Shift amounts reduce modulo 1, i.e. to zero.
        BinOp::Shl | BinOp::LShr | BinOp::AShr => x,
        _ => return Err(unsupported(op.name(), &[a, b])),
    };
    Ok(Value::I1(r))
}

fn arith_wide(op: BinOp, a: &Value, b: &Value) -> Result<Value, InterpError> {
    let (Value::Int { bits, value: x }, Value::Int { value: y, .. }) = (a, b) else {
        return Err(unsupported(op.name(), &[a, b]));
    };
    int_arith_bits(op, *bits, *x, *y).map(|v| Value::from_bits(*bits, v))
}

/// Integer arithmetic on zero-extended `bits`-wide operands.
pub fn int_arith_bits(op: BinOp, bits: u32, x: u128, y: u128) -> Result<u128, InterpError> {
    let mask = width_mask(bits);
    let sx = sign_extend_128(bits, x);
    let sy = sign_extend_128(bits, y);
    let amount = if bits == 0 { 0 } else { (y % u128::from(bits)) as u32 };
    let r = match op {
        BinOp::Add => x.wrapping_add(y),
        BinOp::Sub => x.wrapping_sub(y),
        BinOp::Mul => x.wrapping_mul(y),
        BinOp::UDiv | BinOp::SDiv | BinOp::URem | BinOp::SRem if y & mask == 0 => {
            return Err(division_by_zero(op))
        }
        BinOp::UDiv => x / y,
        BinOp::SDiv => sx.wrapping_div(sy) as u128,
        BinOp::URem => x % y,
        BinOp::SRem => sx.wrapping_rem(sy) as u128,
        BinOp::Shl => x.wrapping_shl(amount),
        BinOp::LShr => x >> amount,
        BinOp::AShr => (sx >> amount) as u128,
        BinOp::And => x & y,
        BinOp::Or => x | y,
        BinOp::Xor => x ^ y,
        _ => {
            return Err(InterpError::UnsupportedOperandType {
                opcode: op.name().to_string(),
                types: format!("i{}, i{}", bits, bits),
            })
        }
    };
    Ok(r & mask)
}

fn float_op(op: BinOp, x: f64, y: f64) -> Option<f64> {
    Some(match op {
        BinOp::FAdd => x + y,
        BinOp::FSub => x - y,
        BinOp::FMul => x * y,
        BinOp::FDiv => x / y,
        BinOp::FRem => x % y,
        _ => return None,
    })
}

fn arith_f32(op: BinOp, a: &Value, b: &Value) -> Result<Value, InterpError> {
    let (Value::Float(x), Value::Float(y)) = (a, b) else {
        return Err(unsupported(op.name(), &[a, b]));
    };
    let r = match op {
        BinOp::FAdd => x + y,
        BinOp::FSub => x - y,
        BinOp::FMul => x * y,
        BinOp::FDiv => x / y,
        BinOp::FRem => x % y,
        _ => return Err(unsupported(op.name(), &[a, b])),
    };
    Ok(Value::Float(r))
}

fn arith_f64(op: BinOp, a: &Value, b: &Value) -> Result<Value, InterpError> {
    match (a, b) {
        (Value::Double(x), Value::Double(y)) => float_op(op, *x, *y).map(Value::Double),
        (Value::X86Fp80(x), Value::X86Fp80(y)) => float_op(op, *x, *y).map(Value::X86Fp80),
        _ => None,
    }
    .ok_or_else(|| unsupported(op.name(), &[a, b]))
}

fn arith_half(op: BinOp, a: &Value, b: &Value) -> Result<Value, InterpError> {
    let (Value::Half(x), Value::Half(y)) = (a, b) else {
        return Err(unsupported(op.name(), &[a, b]));
    };
    float_op(op, x.to_f64(), y.to_f64())
        .map(|r| Value::Half(f16::from_f64(r)))
        .ok_or_else(|| unsupported(op.name(), &[a, b]))
}

fn arith_vector(op: BinOp, a: &Value, b: &Value) -> Result<Value, InterpError> {
    let (Value::Vector(xs), Value::Vector(ys)) = (a, b) else {
        return Err(unsupported(op.name(), &[a, b]));
    };
    if xs.len() != ys.len() {
        return Err(InterpError::InvalidVectorShape {
            opcode: op.name().to_string(),
            expected: xs.len(),
            found: ys.len(),
        });
    }
    xs.iter()
        .zip(ys)
        .map(|(x, y)| binary(op, x, y))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Vector)
}

/// Generic path: a type switch over every admissible operand combination.
pub fn binary(op: BinOp, a: &Value, b: &Value) -> Result<Value, InterpError> {
    match (a.tag(), b.tag()) {
        (TypeTag::Vector, TypeTag::Vector) => arith_vector(op, a, b),
        (ta, tb) if ta == tb && ta.is_integer() && !op.is_float() => {
            let (Some((bits, x)), Some((_, y))) = (a.int_bits(), b.int_bits()) else {
                return Err(unsupported(op.name(), &[a, b]));
            };
            int_arith_bits(op, bits, x, y).map(|v| Value::from_bits(bits, v))
        }
        (TypeTag::Half, TypeTag::Half) | (TypeTag::Float, TypeTag::Float) if op.is_float() => {
            let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
                return Err(unsupported(op.name(), &[a, b]));
            };
            let r = float_op(op, x, y).ok_or_else(|| unsupported(op.name(), &[a, b]))?;
            Ok(match a {
                Value::Half(_) => Value::Half(f16::from_f64(r)),
                _ => Value::Float(r as f32),
            })
        }
        (TypeTag::Double, TypeTag::Double) | (TypeTag::X86Fp80, TypeTag::X86Fp80) => arith_f64(op, a, b),
        _ => Err(unsupported(op.name(), &[a, b])),
    }
}

/// `fneg`: flips the sign bit of every lane.
pub fn negate(v: &Value) -> Result<Value, InterpError> {
    Ok(match v {
        Value::Half(h) => Value::Half(-*h),
        Value::Float(x) => Value::Float(-x),
        Value::Double(x) => Value::Double(-x),
        Value::X86Fp80(x) => Value::X86Fp80(-x),
        Value::Vector(lanes) => Value::Vector(lanes.iter().map(negate).collect::<Result<_, _>>()?),
        other => return Err(unsupported("fneg", &[other])),
    })
}
