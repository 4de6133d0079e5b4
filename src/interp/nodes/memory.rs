//! Loads, stores and the in-memory value encoding.
//!
//! Scalars are stored in `DataLayout` byte order using their store size.
//! Vector lanes are bit-packed at the lane width (so `<8 x i1>` takes one
//! byte), arrays use the element alloc size as stride and structs use the
//! layout's field offsets.

use half::f16;

use super::cast::{from_bit_pattern, ScalarTarget};
use super::{unsupported, Path, Specializer};
use crate::error::InterpError;
use crate::interp::memory::{fence_for, Memory};
use crate::interp::value::{f64_to_fp80, fp80_to_f64, width_mask, TypeTag, Value};
use crate::ir::{AtomicOrdering, DataLayout, FloatKind, Type, TypeId, TypeTable};

/// Encodes and decodes values of module types.
#[derive(Debug, Clone, Copy)]
pub struct Codec<'a> {
    pub types: &'a TypeTable,
    pub layout: &'a DataLayout,
}

fn unsupported_type(codec: &Codec<'_>, opcode: &str, ty: TypeId) -> InterpError {
    InterpError::UnsupportedOperandType {
        opcode: opcode.to_string(),
        types: codec.types.display(ty),
    }
}

fn read_uint(bytes: &[u8], little_endian: bool) -> u128 {
    let mut v = 0u128;
    if little_endian {
        for (i, b) in bytes.iter().take(16).enumerate() {
            v |= u128::from(*b) << (8 * i);
        }
    } else {
        for b in bytes.iter().take(16) {
            v = (v << 8) | u128::from(*b);
        }
    }
    v
}

fn write_uint(out: &mut [u8], value: u128, little_endian: bool) {
    let n = out.len().min(16);
    for i in 0..n {
        let byte = (value >> (8 * i)) as u8;
        if little_endian {
            out[i] = byte;
        } else {
            out[n - 1 - i] = byte;
        }
    }
}

fn get_bits(bytes: &[u8], offset: u64, width: u32) -> u128 {
    let mut v = 0u128;
    for i in 0..u64::from(width) {
        let bit = offset + i;
        let set = bytes
            .get((bit / 8) as usize)
            .map(|b| (b >> (bit % 8)) & 1 == 1)
            .unwrap_or(false);
        if set {
            v |= 1u128 << i;
        }
    }
    v
}

fn put_bits(bytes: &mut [u8], offset: u64, width: u32, value: u128) {
    for i in 0..u64::from(width) {
        let bit = offset + i;
        if let Some(b) = bytes.get_mut((bit / 8) as usize) {
            let mask = 1u8 << (bit % 8);
            if (value >> i) & 1 == 1 {
                *b |= mask;
            } else {
                *b &= !mask;
            }
        }
    }
}

impl<'a> Codec<'a> {
    pub fn new(types: &'a TypeTable, layout: &'a DataLayout) -> Self {
        Self { types, layout }
    }

    pub fn size(&self, ty: TypeId) -> u64 {
        self.layout.store_size(self.types, ty)
    }

    fn lane_target(&self, element: TypeId) -> Option<(ScalarTarget, u32)> {
        match self.types.ty(element) {
            Type::Integer(bits) if *bits <= 128 => Some((ScalarTarget::Int(*bits), *bits)),
            Type::Float(kind) if !matches!(kind, FloatKind::Fp128 | FloatKind::PpcFp128) => {
                Some((ScalarTarget::Float(*kind), kind.bit_width()))
            }
            Type::Pointer { .. } => Some((ScalarTarget::Pointer, self.layout.pointer_bits)),
            _ => None,
        }
    }

    pub fn decode(&self, ty: TypeId, bytes: &[u8]) -> Result<Value, InterpError> {
        let le = self.layout.little_endian;
        Ok(match self.types.ty(ty) {
            Type::Integer(bits) if *bits <= 128 => Value::from_bits(*bits, read_uint(bytes, le)),
            Type::Float(FloatKind::Half) => Value::Half(f16::from_bits(read_uint(bytes, le) as u16)),
            Type::Float(FloatKind::Float) => Value::Float(f32::from_bits(read_uint(bytes, le) as u32)),
            Type::Float(FloatKind::Double) => Value::Double(f64::from_bits(read_uint(bytes, le) as u64)),
            Type::Float(FloatKind::X86Fp80) => Value::X86Fp80(fp80_to_f64(read_uint(bytes, le))),
            Type::Pointer { .. } => Value::Pointer(read_uint(bytes, le) as u64),
            Type::Vector { element, count } => {
                let (target, width) = self
                    .lane_target(*element)
                    .ok_or_else(|| unsupported_type(self, "load", ty))?;
                Value::Vector(
                    (0..u64::from(*count))
                        .map(|i| from_bit_pattern(target, get_bits(bytes, i * u64::from(width), width)))
                        .collect(),
                )
            }
            Type::Array { element, count } => {
                let stride = self.layout.alloc_size(self.types, *element);
                let size = self.size(*element);
                let mut elems = Vec::with_capacity((*count).min(1 << 16) as usize);
                for i in 0..*count {
                    let start = (i * stride) as usize;
                    let slice = bytes
                        .get(start..start + size as usize)
                        .ok_or_else(|| unsupported_type(self, "load", ty))?;
                    elems.push(self.decode(*element, slice)?);
                }
                Value::Aggregate(elems)
            }
            Type::Struct(st) => {
                let (offsets, _) = self.layout.struct_layout(self.types, &st.fields, st.packed);
                let mut fields = Vec::with_capacity(st.fields.len());
                for (field, offset) in st.fields.iter().zip(offsets) {
                    let size = self.size(*field);
                    let slice = bytes
                        .get(offset as usize..(offset + size) as usize)
                        .ok_or_else(|| unsupported_type(self, "load", ty))?;
                    fields.push(self.decode(*field, slice)?);
                }
                Value::Aggregate(fields)
            }
            _ => return Err(unsupported_type(self, "load", ty)),
        })
    }

    pub fn encode(&self, ty: TypeId, value: &Value, out: &mut [u8]) -> Result<(), InterpError> {
        let le = self.layout.little_endian;
        let mismatch = || unsupported("store", &[value]);
        match (self.types.ty(ty), value) {
            (Type::Integer(_), v) | (Type::Pointer { .. }, v) if v.int_bits().is_some() => {
                let (_, raw) = v.int_bits().ok_or_else(mismatch)?;
                write_uint(out, raw, le);
            }
            (Type::Float(FloatKind::Half), Value::Half(h)) => write_uint(out, u128::from(h.to_bits()), le),
            (Type::Float(FloatKind::Float), Value::Float(x)) => write_uint(out, u128::from(x.to_bits()), le),
            (Type::Float(FloatKind::Double), Value::Double(x)) => write_uint(out, u128::from(x.to_bits()), le),
            (Type::Float(FloatKind::X86Fp80), Value::X86Fp80(x)) => write_uint(out, f64_to_fp80(*x), le),
            (Type::Vector { element, count }, Value::Vector(lanes)) => {
                if lanes.len() != *count as usize {
                    return Err(InterpError::InvalidVectorShape {
                        opcode: "store".into(),
                        expected: *count as usize,
                        found: lanes.len(),
                    });
                }
                let (_, width) = self.lane_target(*element).ok_or_else(mismatch)?;
                for (i, lane) in lanes.iter().enumerate() {
                    let (_, raw) = super::cast::bit_pattern(lane).ok_or_else(mismatch)?;
                    put_bits(out, i as u64 * u64::from(width), width, raw & width_mask(width));
                }
            }
            (Type::Array { element, .. }, Value::Aggregate(elems)) => {
                let stride = self.layout.alloc_size(self.types, *element);
                let size = self.size(*element);
                for (i, elem) in elems.iter().enumerate() {
                    let start = (i as u64 * stride) as usize;
                    let slot = out.get_mut(start..start + size as usize).ok_or_else(mismatch)?;
                    self.encode(*element, elem, slot)?;
                }
            }
            (Type::Struct(st), Value::Aggregate(fields)) => {
                let (offsets, _) = self.layout.struct_layout(self.types, &st.fields, st.packed);
                for ((field_ty, offset), field) in st.fields.iter().zip(offsets).zip(fields) {
                    let size = self.size(*field_ty);
                    let slot = out
                        .get_mut(offset as usize..(offset + size) as usize)
                        .ok_or_else(mismatch)?;
                    self.encode(*field_ty, field, slot)?;
                }
            }
            _ => return Err(mismatch()),
        }
        Ok(())
    }
}

/// Static tag of a type, used to key load specialization.
fn type_tag(types: &TypeTable, ty: TypeId) -> TypeTag {
    match types.ty(ty) {
        Type::Integer(1) => TypeTag::I1,
        Type::Integer(8) => TypeTag::I8,
        Type::Integer(16) => TypeTag::I16,
        Type::Integer(32) => TypeTag::I32,
        Type::Integer(64) => TypeTag::I64,
        Type::Integer(bits) => TypeTag::Int(*bits),
        Type::Float(FloatKind::Half) => TypeTag::Half,
        Type::Float(FloatKind::Float) => TypeTag::Float,
        Type::Float(FloatKind::Double) => TypeTag::Double,
        Type::Float(_) => TypeTag::X86Fp80,
        Type::Pointer { .. } => TypeTag::Pointer,
        Type::Vector { .. } => TypeTag::Vector,
        _ => TypeTag::Aggregate,
    }
}

pub type DecodeImpl = fn(&Codec<'_>, TypeId, &[u8]) -> Result<Value, InterpError>;
pub type EncodeImpl = fn(&Codec<'_>, TypeId, &Value, &mut [u8]) -> Result<(), InterpError>;

macro_rules! fixed_decode {
    ($name:ident, $variant:ident, $t:ty, $n:expr) => {
        fn $name(codec: &Codec<'_>, ty: TypeId, bytes: &[u8]) -> Result<Value, InterpError> {
            let Some(raw) = bytes.get(..$n).and_then(|b| <[u8; $n]>::try_from(b).ok()) else {
                return codec.decode(ty, bytes);
            };
            let v = if codec.layout.little_endian {
                <$t>::from_le_bytes(raw)
            } else {
                <$t>::from_be_bytes(raw)
            };
            Ok(Value::$variant(v))
        }
    };
}

fixed_decode!(decode_i8, I8, i8, 1);
fixed_decode!(decode_i16, I16, i16, 2);
fixed_decode!(decode_i32, I32, i32, 4);
fixed_decode!(decode_i64, I64, i64, 8);
fixed_decode!(decode_f32, Float, f32, 4);
fixed_decode!(decode_f64, Double, f64, 8);
fixed_decode!(decode_ptr, Pointer, u64, 8);

fn decode_any(codec: &Codec<'_>, ty: TypeId, bytes: &[u8]) -> Result<Value, InterpError> {
    codec.decode(ty, bytes)
}

fn encode_any(codec: &Codec<'_>, ty: TypeId, value: &Value, out: &mut [u8]) -> Result<(), InterpError> {
    codec.encode(ty, value, out)
}

fn encode_i32(codec: &Codec<'_>, ty: TypeId, value: &Value, out: &mut [u8]) -> Result<(), InterpError> {
    match (value, out.get_mut(..4)) {
        (Value::I32(v), Some(slot)) => {
            let bytes = if codec.layout.little_endian {
                v.to_le_bytes()
            } else {
                v.to_be_bytes()
            };
            slot.copy_from_slice(&bytes);
            Ok(())
        }
        _ => codec.encode(ty, value, out),
    }
}

fn encode_i64(codec: &Codec<'_>, ty: TypeId, value: &Value, out: &mut [u8]) -> Result<(), InterpError> {
    match (value, out.get_mut(..8)) {
        (Value::I64(v), Some(slot)) => {
            let bytes = if codec.layout.little_endian {
                v.to_le_bytes()
            } else {
                v.to_be_bytes()
            };
            slot.copy_from_slice(&bytes);
            Ok(())
        }
        _ => codec.encode(ty, value, out),
    }
}

fn encode_f64(codec: &Codec<'_>, ty: TypeId, value: &Value, out: &mut [u8]) -> Result<(), InterpError> {
    match (value, out.get_mut(..8)) {
        (Value::Double(v), Some(slot)) => {
            let bytes = if codec.layout.little_endian {
                v.to_le_bytes()
            } else {
                v.to_be_bytes()
            };
            slot.copy_from_slice(&bytes);
            Ok(())
        }
        _ => codec.encode(ty, value, out),
    }
}

#[derive(Debug)]
pub struct LoadNode {
    ty: TypeId,
    spec: Specializer<DecodeImpl>,
}

impl LoadNode {
    pub fn new(ty: TypeId) -> Self {
        Self {
            ty,
            spec: Specializer::new(),
        }
    }

    fn opcode_name(&self) -> &'static str {
        "load"
    }

    pub fn execute(
        &self,
        codec: &Codec<'_>,
        memory: &Memory,
        address: u64,
        ordering: AtomicOrdering,
    ) -> Result<Value, InterpError> {
        let bytes = memory.read(address, codec.size(self.ty))?;
        fence_for(ordering);
        let tag = type_tag(codec.types, self.ty);
        match self.spec.dispatch(tag.key(), || Some(select_decode(tag))) {
            Some(Path::Specialized(f)) => f(codec, self.ty, &bytes),
            _ => codec.decode(self.ty, &bytes),
        }
    }
}

super::impl_specializing!(LoadNode);

fn select_decode(tag: TypeTag) -> DecodeImpl {
    match tag {
        TypeTag::I8 => decode_i8,
        TypeTag::I16 => decode_i16,
        TypeTag::I32 => decode_i32,
        TypeTag::I64 => decode_i64,
        TypeTag::Float => decode_f32,
        TypeTag::Double => decode_f64,
        TypeTag::Pointer => decode_ptr,
        _ => decode_any,
    }
}

#[derive(Debug)]
pub struct StoreNode {
    ty: TypeId,
    spec: Specializer<EncodeImpl>,
}

impl StoreNode {
    pub fn new(ty: TypeId) -> Self {
        Self {
            ty,
            spec: Specializer::new(),
        }
    }

    fn opcode_name(&self) -> &'static str {
        "store"
    }

    pub fn execute(
        &self,
        codec: &Codec<'_>,
        memory: &Memory,
        address: u64,
        value: &Value,
        ordering: AtomicOrdering,
    ) -> Result<(), InterpError> {
        let size = codec.size(self.ty);
        let mut bytes = vec![0u8; size as usize];
        let encode = match self.spec.dispatch(value.key(), || Some(select_encode(value.tag()))) {
            Some(Path::Specialized(f)) => f,
            _ => encode_any as EncodeImpl,
        };
        encode(codec, self.ty, value, &mut bytes)?;
        fence_for(ordering);
        memory.write(address, &bytes)
    }
}

super::impl_specializing!(StoreNode);

fn select_encode(tag: TypeTag) -> EncodeImpl {
    match tag {
        TypeTag::I32 => encode_i32,
        TypeTag::I64 => encode_i64,
        TypeTag::Double => encode_f64,
        _ => encode_any,
    }
}
