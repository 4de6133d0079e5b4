//! TYPE_BLOCK_ID_NEW handler.

use std::collections::HashMap;

use super::{invalid, ModuleBuilder, Ops};
use crate::bitstream::{BlockKind, Record};
use crate::error::{Error, ParseError};
use crate::ir::{FloatKind, StructType, Type, TypeId, TypeTable};

const NUMENTRY: u32 = 1;
const VOID: u32 = 2;
const FLOAT: u32 = 3;
const DOUBLE: u32 = 4;
const LABEL: u32 = 5;
const OPAQUE: u32 = 6;
const INTEGER: u32 = 7;
const POINTER: u32 = 8;
const FUNCTION_OLD: u32 = 9;
const HALF: u32 = 10;
const ARRAY: u32 = 11;
const VECTOR: u32 = 12;
const X86_FP80: u32 = 13;
const FP128: u32 = 14;
const PPC_FP128: u32 = 15;
const METADATA: u32 = 16;
const X86_MMX: u32 = 17;
const STRUCT_ANON: u32 = 18;
const STRUCT_NAME: u32 = 19;
const STRUCT_NAMED: u32 = 20;
const FUNCTION: u32 = 21;
const TOKEN: u32 = 22;
const OPAQUE_POINTER: u32 = 25;

/// Maps record-order type indices to table ids.
///
/// Only named structs may be referenced before their record; such
/// references get a placeholder struct that the later record fills in.
#[derive(Debug, Default)]
pub(crate) struct TypeState {
    pub(crate) ids: Vec<TypeId>,
    forward: HashMap<u64, TypeId>,
    pending_name: Option<String>,
    expected: Option<u64>,
    pub(crate) opaque_pointers: bool,
}

impl TypeState {
    pub(crate) fn begin(&mut self) {
        self.pending_name = None;
    }

    /// Resolves a type index outside of the type block.
    pub(crate) fn get(&self, index: u64) -> Result<TypeId, ParseError> {
        self.ids
            .get(index as usize)
            .copied()
            .ok_or(ParseError::UnknownType { index })
    }

    /// Resolves a type index inside the type block, allowing forward
    /// references.
    fn reference(&mut self, table: &mut TypeTable, index: u64) -> TypeId {
        if let Some(id) = self.ids.get(index as usize) {
            return *id;
        }
        *self
            .forward
            .entry(index)
            .or_insert_with(|| table.named_struct(String::new()))
    }

    fn define(&mut self, table: &mut TypeTable, ty: Type, code: u32) -> Result<TypeId, ParseError> {
        let index = self.ids.len() as u64;
        let id = match (self.forward.remove(&index), &ty) {
            (Some(placeholder), Type::Struct(StructType { name: Some(name), fields, packed, opaque })) => {
                table.set_struct_name(placeholder, name.clone());
                if !*opaque {
                    table.set_struct_body(placeholder, fields.clone(), *packed);
                }
                placeholder
            }
            (Some(_), _) => {
                return Err(invalid(
                    "TYPE",
                    code,
                    format!("type {} is referenced before its record but is not a named struct", index),
                ))
            }
            (None, _) => table.append(ty),
        };
        self.ids.push(id);
        Ok(id)
    }

    pub(crate) fn end(&mut self) -> Result<(), ParseError> {
        if let Some((&index, _)) = self.forward.iter().min_by_key(|(i, _)| **i) {
            return Err(ParseError::UnknownType { index });
        }
        if let Some(expected) = self.expected {
            if expected != self.ids.len() as u64 {
                tracing::debug!(expected, found = self.ids.len(), "type table size differs from NUMENTRY");
            }
        }
        Ok(())
    }
}

impl ModuleBuilder {
    pub(crate) fn type_record(&mut self, record: &Record) -> Result<(), Error> {
        let mut ops = Ops::new(record, "TYPE");
        let table = &mut self.module.types;
        let state = &mut self.types;
        let ty = match record.code {
            NUMENTRY => {
                state.expected = Some(ops.next()?);
                return Ok(());
            }
            STRUCT_NAME => {
                state.pending_name = Some(record.string_from(0));
                return Ok(());
            }
            VOID => Type::Void,
            FLOAT => Type::Float(FloatKind::Float),
            DOUBLE => Type::Float(FloatKind::Double),
            HALF => Type::Float(FloatKind::Half),
            X86_FP80 => Type::Float(FloatKind::X86Fp80),
            FP128 => Type::Float(FloatKind::Fp128),
            PPC_FP128 => Type::Float(FloatKind::PpcFp128),
            LABEL => Type::Label,
            METADATA => Type::Metadata,
            // Tokens carry no storable value.
            TOKEN => Type::Void,
            X86_MMX => {
                let i64_ty = table.int(64);
                Type::Vector {
                    element: i64_ty,
                    count: 1,
                }
            }
            INTEGER => {
                let bits = ops.next()?;
                if bits == 0 || bits > (1 << 23) {
                    return Err(invalid("TYPE", record.code, format!("invalid integer width {}", bits)).into());
                }
                Type::Integer(bits as u32)
            }
            POINTER => {
                let pointee = state.reference(table, ops.next()?);
                Type::Pointer {
                    pointee: Some(pointee),
                    address_space: ops.opt().unwrap_or(0) as u32,
                }
            }
            OPAQUE_POINTER => {
                state.opaque_pointers = true;
                Type::Pointer {
                    pointee: None,
                    address_space: ops.opt().unwrap_or(0) as u32,
                }
            }
            ARRAY | VECTOR => {
                let count = ops.next()?;
                let element = state.reference(table, ops.next()?);
                if record.code == ARRAY {
                    Type::Array { element, count }
                } else {
                    Type::Vector {
                        element,
                        count: count as u32,
                    }
                }
            }
            STRUCT_ANON | STRUCT_NAMED => {
                let packed = ops.next()? != 0;
                let fields = ops.rest().iter().map(|&i| state.reference(table, i)).collect();
                let name = if record.code == STRUCT_NAMED {
                    Some(state.pending_name.take().unwrap_or_default())
                } else {
                    None
                };
                Type::Struct(StructType {
                    name,
                    fields,
                    packed,
                    opaque: false,
                })
            }
            OPAQUE => Type::Struct(StructType {
                name: Some(state.pending_name.take().unwrap_or_default()),
                fields: Vec::new(),
                packed: false,
                opaque: true,
            }),
            FUNCTION | FUNCTION_OLD => {
                let vararg = ops.next()? != 0;
                if record.code == FUNCTION_OLD {
                    // Attribute id, unused.
                    ops.next()?;
                }
                let ret = state.reference(table, ops.next()?);
                let params = ops.rest().iter().map(|&i| state.reference(table, i)).collect();
                Type::Function { ret, params, vararg }
            }
            _ => {
                // Keep numbering intact for types the model does not know.
                self.unknown_record(BlockKind::Type, record)?;
                let placeholder = Type::Struct(StructType {
                    name: Some(format!("unknown.type.{}", record.code)),
                    fields: Vec::new(),
                    packed: false,
                    opaque: true,
                });
                self.types.define(&mut self.module.types, placeholder, record.code)?;
                return Ok(());
            }
        };
        state.define(table, ty, record.code)?;
        Ok(())
    }
}
