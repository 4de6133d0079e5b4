//! Casts. Each node converts to one fixed target type and specializes on
//! the runtime type of its operand.
//!
//! Float to integer conversion saturates: NaN becomes 0 and out-of-range
//! magnitudes clamp to the target's minimum or maximum.

use half::f16;

use super::{unsupported, Path, Specializer};
use crate::error::InterpError;
use crate::interp::value::{sign_extend_128, width_mask, TypeTag, Value};
use crate::ir::{CastOp, FloatKind, Type, TypeId, TypeTable};

/// Scalar part of a cast destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarTarget {
    Int(u32),
    Float(FloatKind),
    Pointer,
}

/// Destination of a cast; `lanes` is set for vector destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastTarget {
    pub scalar: ScalarTarget,
    pub lanes: Option<u32>,
}

impl CastTarget {
    pub fn scalar(scalar: ScalarTarget) -> Self {
        Self { scalar, lanes: None }
    }

    /// Describes `ty`, or `None` for types no cast can produce.
    pub fn from_type(types: &TypeTable, ty: TypeId) -> Option<Self> {
        let scalar = |t: &Type| match t {
            Type::Integer(bits) => Some(ScalarTarget::Int(*bits)),
            Type::Float(kind) => Some(ScalarTarget::Float(*kind)),
            Type::Pointer { .. } => Some(ScalarTarget::Pointer),
            _ => None,
        };
        match types.ty(ty) {
            Type::Vector { element, count } => Some(Self {
                scalar: scalar(types.ty(*element))?,
                lanes: Some(*count),
            }),
            other => scalar(other).map(Self::scalar),
        }
    }
}

pub type CastImpl = fn(CastOp, ScalarTarget, &Value) -> Result<Value, InterpError>;

#[derive(Debug)]
pub struct CastNode {
    op: CastOp,
    target: CastTarget,
    spec: Specializer<CastImpl>,
}

impl CastNode {
    pub fn new(op: CastOp, target: CastTarget) -> Self {
        Self {
            op,
            target,
            spec: Specializer::new(),
        }
    }

    fn opcode_name(&self) -> &'static str {
        self.op.name()
    }

    pub fn execute(&self, value: &Value) -> Result<Value, InterpError> {
        if self.target.lanes.is_some() || matches!(value, Value::Vector(_)) {
            // Vector-shaped casts specialize on the lane type; shape-changing
            // bitcasts go through the bit pattern.
            let lane = match value {
                Value::Vector(lanes) => lanes.first().map_or(TypeTag::Vector, Value::tag),
                scalar => scalar.tag(),
            };
            return match self.spec.dispatch(value.key(), || select(self.op, lane)) {
                Some(Path::Specialized(f)) => cast_with(self.op, self.target, value, f),
                Some(Path::Generic) => cast(self.op, self.target, value),
                None => Err(unsupported(self.op.name(), &[value])),
            };
        }
        match self.spec.dispatch(value.key(), || select(self.op, value.tag())) {
            Some(Path::Specialized(f)) => f(self.op, self.target.scalar, value),
            Some(Path::Generic) => cast_scalar(self.op, self.target.scalar, value),
            None => Err(unsupported(self.op.name(), &[value])),
        }
    }
}

super::impl_specializing!(CastNode);

fn select(op: CastOp, source: TypeTag) -> Option<CastImpl> {
    let f: CastImpl = match op {
        CastOp::Trunc | CastOp::ZExt | CastOp::SExt if source.is_integer() => int_resize,
        CastOp::FpToUi | CastOp::FpToSi if source.is_float() => float_to_int,
        CastOp::UiToFp | CastOp::SiToFp if source.is_integer() => int_to_float,
        CastOp::FpTrunc | CastOp::FpExt if source.is_float() => float_resize,
        CastOp::PtrToInt if source == TypeTag::Pointer => int_resize,
        CastOp::IntToPtr if source.is_integer() => int_to_pointer,
        CastOp::AddrSpaceCast if source == TypeTag::Pointer => int_to_pointer,
        CastOp::BitCast if source != TypeTag::Aggregate => reinterpret,
        _ => return None,
    };
    Some(f)
}

fn mismatch(op: CastOp, v: &Value) -> InterpError {
    unsupported(op.name(), &[v])
}

fn int_resize(op: CastOp, target: ScalarTarget, v: &Value) -> Result<Value, InterpError> {
    let (Some((bits, raw)), ScalarTarget::Int(to)) = (v.int_bits(), target) else {
        return Err(mismatch(op, v));
    };
    let widened = match op {
        CastOp::SExt => sign_extend_128(bits, raw) as u128,
        _ => raw,
    };
    Ok(Value::from_bits(to, widened & width_mask(to)))
}

fn int_to_pointer(op: CastOp, _target: ScalarTarget, v: &Value) -> Result<Value, InterpError> {
    v.as_u64().map(Value::Pointer).ok_or_else(|| mismatch(op, v))
}

/// Saturating float to integer conversion.
fn float_to_int(op: CastOp, target: ScalarTarget, v: &Value) -> Result<Value, InterpError> {
    let (Some(x), ScalarTarget::Int(bits)) = (v.as_f64(), target) else {
        return Err(mismatch(op, v));
    };
    let raw = if op == CastOp::FpToSi {
        let max = if bits >= 128 { i128::MAX } else { (1i128 << (bits - 1)) - 1 };
        let min = if bits >= 128 { i128::MIN } else { -(1i128 << (bits - 1)) };
        // `as` saturates and maps NaN to zero.
        ((x as i128).clamp(min, max)) as u128
    } else {
        (x as u128).min(width_mask(bits))
    };
    Ok(Value::from_bits(bits, raw & width_mask(bits)))
}

fn int_to_float(op: CastOp, target: ScalarTarget, v: &Value) -> Result<Value, InterpError> {
    let (Some((bits, raw)), ScalarTarget::Float(kind)) = (v.int_bits(), target) else {
        return Err(mismatch(op, v));
    };
    let signed = op == CastOp::SiToFp;
    Ok(match kind {
        // Convert in one rounding step for the narrow formats.
        FloatKind::Float if signed => Value::Float(sign_extend_128(bits, raw) as f32),
        FloatKind::Float => Value::Float(raw as f32),
        FloatKind::Half if signed => Value::Half(f16::from_f32(sign_extend_128(bits, raw) as f32)),
        FloatKind::Half => Value::Half(f16::from_f32(raw as f32)),
        _ if signed => Value::from_f64(kind, sign_extend_128(bits, raw) as f64),
        _ => Value::from_f64(kind, raw as f64),
    })
}

fn float_resize(op: CastOp, target: ScalarTarget, v: &Value) -> Result<Value, InterpError> {
    let ScalarTarget::Float(kind) = target else {
        return Err(mismatch(op, v));
    };
    Ok(match (v, kind) {
        (Value::Half(h), FloatKind::Float) => Value::Float(h.to_f32()),
        (Value::Float(x), FloatKind::Half) => Value::Half(f16::from_f32(*x)),
        (other, kind) => Value::from_f64(kind, other.as_f64().ok_or_else(|| mismatch(op, v))?),
    })
}

/// Bit pattern of a scalar or vector of scalars, least significant lane first.
pub fn bit_pattern(v: &Value) -> Option<(u32, u128)> {
    match v {
        Value::Half(h) => Some((16, u128::from(h.to_bits()))),
        Value::Float(x) => Some((32, u128::from(x.to_bits()))),
        Value::Double(x) => Some((64, u128::from(x.to_bits()))),
        Value::X86Fp80(x) => Some((80, crate::interp::value::f64_to_fp80(*x))),
        Value::Vector(lanes) => {
            let mut total = 0u32;
            let mut acc = 0u128;
            for lane in lanes {
                let (bits, raw) = bit_pattern(lane)?;
                if total + bits > 128 {
                    return None;
                }
                acc |= raw << total;
                total += bits;
            }
            Some((total, acc))
        }
        Value::Aggregate(_) => None,
        other => other.int_bits(),
    }
}

/// Rebuilds a scalar of `target` from its bit pattern.
pub fn from_bit_pattern(target: ScalarTarget, raw: u128) -> Value {
    match target {
        ScalarTarget::Int(bits) => Value::from_bits(bits, raw),
        ScalarTarget::Pointer => Value::Pointer(raw as u64),
        ScalarTarget::Float(FloatKind::Half) => Value::Half(f16::from_bits(raw as u16)),
        ScalarTarget::Float(FloatKind::Float) => Value::Float(f32::from_bits(raw as u32)),
        ScalarTarget::Float(FloatKind::X86Fp80) => {
            Value::X86Fp80(crate::interp::value::fp80_to_f64(raw))
        }
        ScalarTarget::Float(_) => Value::Double(f64::from_bits(raw as u64)),
    }
}

pub fn scalar_bits(target: ScalarTarget) -> u32 {
    match target {
        ScalarTarget::Int(bits) => bits,
        ScalarTarget::Pointer => 64,
        ScalarTarget::Float(kind) => kind.bit_width(),
    }
}

fn reinterpret(op: CastOp, target: ScalarTarget, v: &Value) -> Result<Value, InterpError> {
    let (_, raw) = bit_pattern(v).ok_or_else(|| mismatch(op, v))?;
    Ok(from_bit_pattern(target, raw))
}

/// Generic scalar path: the full switch over cast kinds.
pub fn cast_scalar(op: CastOp, target: ScalarTarget, v: &Value) -> Result<Value, InterpError> {
    match select(op, v.tag()) {
        Some(f) => f(op, target, v),
        None => Err(mismatch(op, v)),
    }
}

/// Any cast, including vector destinations and shape-changing bitcasts.
pub fn cast(op: CastOp, target: CastTarget, v: &Value) -> Result<Value, InterpError> {
    cast_with(op, target, v, cast_scalar)
}

/// [`cast`] with `lane` converting each element of a lane-wise cast.
fn cast_with(op: CastOp, target: CastTarget, v: &Value, lane: CastImpl) -> Result<Value, InterpError> {
    match (target.lanes, v) {
        (None, Value::Vector(_)) if op == CastOp::BitCast => reinterpret(op, target.scalar, v),
        (Some(lanes), Value::Vector(elems)) if op != CastOp::BitCast || elems.len() == lanes as usize => {
            if elems.len() != lanes as usize {
                return Err(InterpError::InvalidVectorShape {
                    opcode: op.name().to_string(),
                    expected: lanes as usize,
                    found: elems.len(),
                });
            }
            elems
                .iter()
                .map(|e| lane(op, target.scalar, e))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Vector)
        }
        (Some(lanes), _) if op == CastOp::BitCast => {
            let (_, raw) = bit_pattern(v).ok_or_else(|| mismatch(op, v))?;
            let width = scalar_bits(target.scalar);
            if u64::from(lanes) * u64::from(width) > 128 {
                return Err(mismatch(op, v));
            }
            let lane_mask = width_mask(width);
            Ok(Value::Vector(
                (0..lanes)
                    .map(|i| from_bit_pattern(target.scalar, (raw >> (i * width)) & lane_mask))
                    .collect(),
            ))
        }
        (None, _) => cast_scalar(op, target.scalar, v),
        _ => Err(mismatch(op, v)),
    }
}
