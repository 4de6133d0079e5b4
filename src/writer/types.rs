//! TYPE block emission order.
//!
//! The reader only accepts forward references to named structs, so types are
//! emitted in post-order with named structs marked as visited before their
//! fields. A recursive `%node = type { i32, %node* }` then comes out as
//! `i32`, `%node*` (forward to `%node`), `%node`.

use crate::bitstream::BitWriter;
use crate::ir::{FloatKind, Type, TypeId, TypeTable};

const NUMENTRY: u32 = 1;
const VOID: u32 = 2;
const FLOAT: u32 = 3;
const DOUBLE: u32 = 4;
const LABEL: u32 = 5;
const OPAQUE: u32 = 6;
const INTEGER: u32 = 7;
const POINTER: u32 = 8;
const HALF: u32 = 10;
const ARRAY: u32 = 11;
const VECTOR: u32 = 12;
const X86_FP80: u32 = 13;
const FP128: u32 = 14;
const PPC_FP128: u32 = 15;
const METADATA: u32 = 16;
const STRUCT_ANON: u32 = 18;
const STRUCT_NAME: u32 = 19;
const STRUCT_NAMED: u32 = 20;
const FUNCTION: u32 = 21;
const OPAQUE_POINTER: u32 = 25;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Record order of every table entry and the reverse mapping.
#[derive(Debug, Default)]
pub(crate) struct TypeOrder {
    order: Vec<TypeId>,
    position: Vec<u64>,
}

impl TypeOrder {
    pub(crate) fn new(table: &TypeTable) -> Self {
        let mut marks = vec![Mark::Unvisited; table.len()];
        let mut order = Vec::with_capacity(table.len());
        for (id, _) in table.iter() {
            visit(table, id, &mut marks, &mut order);
        }
        let mut position = vec![0; table.len()];
        for (i, id) in order.iter().enumerate() {
            position[id.0 as usize] = i as u64;
        }
        Self { order, position }
    }

    /// Record index of `id` in the emitted TYPE block.
    pub(crate) fn index(&self, id: TypeId) -> u64 {
        self.position.get(id.0 as usize).copied().unwrap_or(0)
    }

    pub(crate) fn emit(&self, table: &TypeTable, out: &mut BitWriter) {
        out.emit_record(NUMENTRY, &[self.order.len() as u64]);
        for &id in &self.order {
            match table.ty(id) {
                Type::Void => out.emit_record(VOID, &[]),
                Type::Label => out.emit_record(LABEL, &[]),
                Type::Metadata => out.emit_record(METADATA, &[]),
                Type::Integer(bits) => out.emit_record(INTEGER, &[u64::from(*bits)]),
                Type::Float(kind) => {
                    let code = match kind {
                        FloatKind::Half => HALF,
                        FloatKind::Float => FLOAT,
                        FloatKind::Double => DOUBLE,
                        FloatKind::X86Fp80 => X86_FP80,
                        FloatKind::Fp128 => FP128,
                        FloatKind::PpcFp128 => PPC_FP128,
                    };
                    out.emit_record(code, &[]);
                }
                Type::Pointer {
                    pointee: Some(p),
                    address_space,
                } => out.emit_record(POINTER, &[self.index(*p), u64::from(*address_space)]),
                Type::Pointer {
                    pointee: None,
                    address_space,
                } => out.emit_record(OPAQUE_POINTER, &[u64::from(*address_space)]),
                Type::Array { element, count } => out.emit_record(ARRAY, &[*count, self.index(*element)]),
                Type::Vector { element, count } => {
                    out.emit_record(VECTOR, &[u64::from(*count), self.index(*element)])
                }
                Type::Struct(st) => {
                    let mut ops = vec![u64::from(st.packed)];
                    ops.extend(st.fields.iter().map(|f| self.index(*f)));
                    match &st.name {
                        Some(name) => {
                            out.emit_record(STRUCT_NAME, &chars(name));
                            if st.opaque {
                                out.emit_record(OPAQUE, &[0]);
                            } else {
                                out.emit_record(STRUCT_NAMED, &ops);
                            }
                        }
                        None => out.emit_record(STRUCT_ANON, &ops),
                    }
                }
                Type::Function { ret, params, vararg } => {
                    let mut ops = vec![u64::from(*vararg), self.index(*ret)];
                    ops.extend(params.iter().map(|p| self.index(*p)));
                    out.emit_record(FUNCTION, &ops);
                }
            }
        }
    }
}

fn visit(table: &TypeTable, id: TypeId, marks: &mut [Mark], order: &mut Vec<TypeId>) {
    match marks.get(id.0 as usize) {
        Some(Mark::Unvisited) => {}
        _ => return,
    }
    let ty = table.ty(id);
    // Only named structs may be referenced before their record, so only they
    // are marked while their members are visited.
    if matches!(ty, Type::Struct(st) if st.name.is_some()) {
        marks[id.0 as usize] = Mark::InProgress;
    }
    match ty {
        Type::Pointer { pointee: Some(p), .. } => visit(table, *p, marks, order),
        Type::Array { element, .. } | Type::Vector { element, .. } => visit(table, *element, marks, order),
        Type::Struct(st) => {
            for f in &st.fields {
                visit(table, *f, marks, order);
            }
        }
        Type::Function { ret, params, .. } => {
            visit(table, *ret, marks, order);
            for p in params {
                visit(table, *p, marks, order);
            }
        }
        _ => {}
    }
    // A recursive path may already have placed this type.
    if marks[id.0 as usize] == Mark::Done {
        return;
    }
    marks[id.0 as usize] = Mark::Done;
    order.push(id);
}

/// A string as one record operand per byte.
pub(crate) fn chars(s: &str) -> Vec<u64> {
    s.bytes().map(u64::from).collect()
}
