//! Runtime values.

use std::fmt;

use half::f16;

use crate::ir::{FloatKind, Type, TypeId, TypeTable};

/// A runtime value produced or consumed by the interpreter.
///
/// Integers of the common widths have their own variants so the specialized
/// node paths can match them directly; every other width is carried as
/// `Int` with the value held in the low `bits` bits.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I1(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Int { bits: u32, value: u128 },
    Half(f16),
    Float(f32),
    Double(f64),
    /// x86 80-bit extended precision, computed at double precision.
    X86Fp80(f64),
    Pointer(u64),
    Vector(Vec<Value>),
    Aggregate(Vec<Value>),
}

/// Concrete runtime type of a value, as seen by the specializing nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    I1,
    I8,
    I16,
    I32,
    I64,
    Int(u32),
    Half,
    Float,
    Double,
    X86Fp80,
    Pointer,
    Vector,
    Aggregate,
}

/// Key ranges: named tags below 0x100, other integer widths at
/// `INT_KEY_BASE | bits` (widths stay below 2^24), vectors at
/// `VECTOR_KEY_FLAG | lane key`.
const INT_KEY_BASE: u32 = 1 << 24;
const VECTOR_KEY_FLAG: u32 = 1 << 30;

impl TypeTag {
    /// Non-zero key used by the specialization cells.
    pub fn key(self) -> u32 {
        match self {
            TypeTag::I1 => 1,
            TypeTag::I8 => 2,
            TypeTag::I16 => 3,
            TypeTag::I32 => 4,
            TypeTag::I64 => 5,
            TypeTag::Half => 6,
            TypeTag::Float => 7,
            TypeTag::Double => 8,
            TypeTag::X86Fp80 => 9,
            TypeTag::Pointer => 10,
            TypeTag::Vector => 11,
            TypeTag::Aggregate => 12,
            TypeTag::Int(bits) => INT_KEY_BASE | (bits & (INT_KEY_BASE - 1)),
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            TypeTag::I1 | TypeTag::I8 | TypeTag::I16 | TypeTag::I32 | TypeTag::I64 | TypeTag::Int(_)
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeTag::Half | TypeTag::Float | TypeTag::Double | TypeTag::X86Fp80)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::I1 => write!(f, "i1"),
            TypeTag::I8 => write!(f, "i8"),
            TypeTag::I16 => write!(f, "i16"),
            TypeTag::I32 => write!(f, "i32"),
            TypeTag::I64 => write!(f, "i64"),
            TypeTag::Int(bits) => write!(f, "i{}", bits),
            TypeTag::Half => write!(f, "half"),
            TypeTag::Float => write!(f, "float"),
            TypeTag::Double => write!(f, "double"),
            TypeTag::X86Fp80 => write!(f, "x86_fp80"),
            TypeTag::Pointer => write!(f, "ptr"),
            TypeTag::Vector => write!(f, "vector"),
            TypeTag::Aggregate => write!(f, "aggregate"),
        }
    }
}

/// Mask of the low `bits` bits.
pub fn width_mask(bits: u32) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

/// Sign-extends the low `bits` bits of `value` to 128 bits.
pub fn sign_extend_128(bits: u32, value: u128) -> i128 {
    if bits == 0 || bits >= 128 {
        return value as i128;
    }
    let shift = 128 - bits;
    ((value << shift) as i128) >> shift
}

impl Value {
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::I1(_) => TypeTag::I1,
            Value::I8(_) => TypeTag::I8,
            Value::I16(_) => TypeTag::I16,
            Value::I32(_) => TypeTag::I32,
            Value::I64(_) => TypeTag::I64,
            Value::Int { bits, .. } => TypeTag::Int(*bits),
            Value::Half(_) => TypeTag::Half,
            Value::Float(_) => TypeTag::Float,
            Value::Double(_) => TypeTag::Double,
            Value::X86Fp80(_) => TypeTag::X86Fp80,
            Value::Pointer(_) => TypeTag::Pointer,
            Value::Vector(_) => TypeTag::Vector,
            Value::Aggregate(_) => TypeTag::Aggregate,
        }
    }

    /// Specialization key; vectors are keyed by their lane type as well.
    pub fn key(&self) -> u32 {
        match self {
            Value::Vector(lanes) => VECTOR_KEY_FLAG | lanes.first().map(|l| l.tag().key()).unwrap_or(0),
            other => other.tag().key(),
        }
    }

    /// Builds an integer of `bits` width from the low bits of `value`.
    pub fn from_bits(bits: u32, value: u128) -> Value {
        let v = value & width_mask(bits);
        match bits {
            1 => Value::I1(v != 0),
            8 => Value::I8(v as u8 as i8),
            16 => Value::I16(v as u16 as i16),
            32 => Value::I32(v as u32 as i32),
            64 => Value::I64(v as u64 as i64),
            _ => Value::Int { bits, value: v },
        }
    }

    /// `(width, zero-extended bits)` of an integer value. Pointers are
    /// treated as 64-bit integers.
    pub fn int_bits(&self) -> Option<(u32, u128)> {
        match self {
            Value::I1(b) => Some((1, u128::from(*b))),
            Value::I8(v) => Some((8, u128::from(*v as u8))),
            Value::I16(v) => Some((16, u128::from(*v as u16))),
            Value::I32(v) => Some((32, u128::from(*v as u32))),
            Value::I64(v) => Some((64, u128::from(*v as u64))),
            Value::Int { bits, value } => Some((*bits, *value)),
            Value::Pointer(p) => Some((64, u128::from(*p))),
            _ => None,
        }
    }

    /// Sign-extended integer value.
    pub fn as_signed(&self) -> Option<i128> {
        self.int_bits().map(|(bits, v)| sign_extend_128(bits, v))
    }

    /// Zero-extended integer value truncated to 64 bits.
    pub fn as_u64(&self) -> Option<u64> {
        self.int_bits().map(|(_, v)| v as u64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::I1(b) => Some(*b),
            other => other.int_bits().map(|(_, v)| v & 1 != 0),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Half(h) => Some(h.to_f64()),
            Value::Float(f) => Some(f64::from(*f)),
            Value::Double(d) | Value::X86Fp80(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<u64> {
        match self {
            Value::Pointer(p) => Some(*p),
            Value::I64(v) => Some(*v as u64),
            _ => None,
        }
    }

    /// Builds a float of `kind` from a double-precision value.
    pub fn from_f64(kind: FloatKind, v: f64) -> Value {
        match kind {
            FloatKind::Half => Value::Half(f16::from_f64(v)),
            FloatKind::Float => Value::Float(v as f32),
            FloatKind::Double | FloatKind::Fp128 | FloatKind::PpcFp128 => Value::Double(v),
            FloatKind::X86Fp80 => Value::X86Fp80(v),
        }
    }

    /// The all-zero value of `ty` (also used for `undef` and `poison`).
    pub fn zero(types: &TypeTable, ty: TypeId) -> Value {
        match types.ty(ty) {
            Type::Integer(bits) => Value::from_bits(*bits, 0),
            Type::Float(kind) => Value::from_f64(*kind, 0.0),
            Type::Pointer { .. } | Type::Function { .. } => Value::Pointer(0),
            Type::Vector { element, count } => {
                Value::Vector(vec![Value::zero(types, *element); *count as usize])
            }
            Type::Array { element, count } => {
                Value::Aggregate(vec![Value::zero(types, *element); *count as usize])
            }
            Type::Struct(st) => {
                Value::Aggregate(st.fields.iter().map(|f| Value::zero(types, *f)).collect())
            }
            Type::Void | Type::Label | Type::Metadata => Value::Aggregate(Vec::new()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I1(b) => write!(f, "{}", b),
            Value::I8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::Int { bits, value } => write!(f, "{}", sign_extend_128(*bits, *value)),
            Value::Half(h) => write!(f, "{}", h),
            Value::Float(x) => write!(f, "{}", x),
            Value::Double(x) | Value::X86Fp80(x) => write!(f, "{}", x),
            Value::Pointer(p) => write!(f, "0x{:x}", p),
            Value::Vector(lanes) => {
                write!(f, "<")?;
                for (i, v) in lanes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ">")
            }
            Value::Aggregate(elems) => {
                write!(f, "{{")?;
                for (i, v) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Decodes an x86 80-bit extended float (sign/exponent in bits 64..80,
/// explicit-integer-bit significand in bits 0..64) to the nearest double.
pub fn fp80_to_f64(bits: u128) -> f64 {
    let significand = bits as u64;
    let exp_field = ((bits >> 64) & 0x7fff) as i32;
    let negative = (bits >> 79) & 1 == 1;
    let sign = if negative { -1.0 } else { 1.0 };
    if exp_field == 0x7fff {
        return if significand << 1 == 0 { sign * f64::INFINITY } else { f64::NAN };
    }
    if significand == 0 {
        return sign * 0.0;
    }
    // value = significand * 2^(exp - 16383 - 63)
    let exp = if exp_field == 0 { 1 - 16383 } else { exp_field - 16383 };
    sign * (significand as f64) * 2f64.powi(exp - 63)
}

/// Encodes a double as an x86 80-bit extended float bit pattern.
pub fn f64_to_fp80(v: f64) -> u128 {
    let sign = u128::from(v.is_sign_negative()) << 79;
    if v.is_nan() {
        return sign | (0x7fffu128 << 64) | 0xc000_0000_0000_0000;
    }
    if v.is_infinite() {
        return sign | (0x7fffu128 << 64) | 0x8000_0000_0000_0000;
    }
    if v == 0.0 {
        return sign;
    }
    let bits = v.abs().to_bits();
    let exp_field = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & ((1u64 << 52) - 1);
    let (exp, significand) = if exp_field == 0 {
        // Subnormal double: normalize into the explicit-integer-bit form.
        let shift = fraction.leading_zeros() - 11;
        (1 - 1023 - shift as i32, (fraction << shift) << 11)
    } else {
        (exp_field - 1023, ((1u64 << 52) | fraction) << 11)
    };
    sign | (((exp + 16383) as u128) << 64) | u128::from(significand)
}
