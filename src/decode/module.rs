//! MODULE block records and the IDENTIFICATION block.

use tracing::{debug, trace};

use super::forward::Holder;
use super::{ModuleBuilder, Ops};
use crate::bitstream::{BlockKind, Record};
use crate::error::{Error, ParseError};
use crate::ir::{
    AliasId, DataLayout, Function, GlobalAlias, GlobalId, GlobalVariable, Linkage, Param,
    Resolution, Symbol, Type, TypeId, Visibility,
};

const VERSION: u32 = 1;
const TRIPLE: u32 = 2;
const DATALAYOUT: u32 = 3;
const ASM: u32 = 4;
const SECTIONNAME: u32 = 5;
const DEPLIB: u32 = 6;
const GLOBALVAR: u32 = 7;
const FUNCTION: u32 = 8;
const ALIAS_OLD: u32 = 9;
const GCNAME: u32 = 11;
const COMDAT: u32 = 12;
const VSTOFFSET: u32 = 13;
const ALIAS: u32 = 14;
const METADATA_VALUES_UNUSED: u32 = 15;
const SOURCE_FILENAME: u32 = 16;
const HASH: u32 = 17;

const IDENTIFICATION_STRING: u32 = 1;
const IDENTIFICATION_EPOCH: u32 = 2;

impl ModuleBuilder {
    pub(crate) fn identification_record(&mut self, record: &Record) -> Result<(), Error> {
        match record.code {
            IDENTIFICATION_STRING => self.module.producer = Some(record.string_from(0)),
            IDENTIFICATION_EPOCH => self.module.epoch = record.get(0),
            _ => self.unknown_record(BlockKind::Identification, record)?,
        }
        Ok(())
    }

    pub(crate) fn module_record(&mut self, record: &Record) -> Result<(), Error> {
        match record.code {
            VERSION => {
                let layout = self.select_version(record.get(0));
                debug!(version = ?layout.version, "record layout selected");
            }
            TRIPLE => self.module.target_triple = Some(record.string_from(0)),
            DATALAYOUT => {
                let spec = record.string_from(0);
                self.module.data_layout = DataLayout::parse(&spec);
                self.module.data_layout_string = Some(spec);
            }
            SOURCE_FILENAME => self.module.source_filename = Some(record.string_from(0)),
            GLOBALVAR => self.global_var_record(record)?,
            FUNCTION => self.function_decl_record(record)?,
            ALIAS | ALIAS_OLD => self.alias_record(record)?,
            ASM | SECTIONNAME | DEPLIB | GCNAME | COMDAT | VSTOFFSET | METADATA_VALUES_UNUSED | HASH => {
                trace!(code = record.code, "ignoring module record");
            }
            _ => self.unknown_record(BlockKind::Module, record)?,
        }
        Ok(())
    }

    /// Pointer type for a value of type `value_ty`, matching the module's
    /// pointer flavor.
    pub(crate) fn pointer_for(&mut self, value_ty: TypeId) -> TypeId {
        if self.types.opaque_pointers {
            self.module.types.opaque_pointer()
        } else {
            self.module.types.pointer_to(value_ty)
        }
    }

    fn pointee_or_self(&self, ty: TypeId) -> TypeId {
        self.module.types.pointee(ty).unwrap_or(ty)
    }

    fn global_var_record(&mut self, record: &Record) -> Result<(), Error> {
        let layout = self.layout();
        let mut ops = Ops::new(record, "MODULE");
        let g = (layout.decode_global)(&mut ops)?;
        let declared = self.types.get(g.type_index)?;
        let (value_ty, ptr_ty) = if g.explicit_type {
            (declared, self.pointer_for(declared))
        } else {
            match self.module.types.ty(declared) {
                Type::Pointer {
                    pointee: Some(inner), ..
                } => (*inner, declared),
                _ => (declared, self.pointer_for(declared)),
            }
        };
        let id = GlobalId(self.module.globals.len() as u32);
        let initializer = if g.init == 0 {
            None
        } else {
            let target = (g.init - 1) as u32;
            self.forward.defer(target, Holder::GlobalInitializer(id));
            Some(Resolution::Pending(target))
        };
        self.module.globals.push(GlobalVariable {
            id,
            name: String::new(),
            value_ty,
            ptr_ty,
            is_constant: g.is_constant,
            initializer,
            linkage: Linkage::from_code(g.linkage),
            visibility: Visibility::from_code(g.visibility),
            align: decode_alignment(g.align),
            section: g.section,
            address_space: g.address_space,
        });
        let symbol = Symbol::Global(id);
        if let Some((offset, size)) = g.strtab_name {
            self.strtab_names.push((symbol, offset, size));
        }
        self.module.symbols.push(symbol);
        Ok(())
    }

    fn function_decl_record(&mut self, record: &Record) -> Result<(), Error> {
        let layout = self.layout();
        let mut ops = Ops::new(record, "MODULE");
        let f = (layout.decode_function)(&mut ops)?;
        let declared = self.types.get(f.type_index)?;
        // Legacy layouts store a pointer to the function type.
        let fn_ty = self.pointee_or_self(declared);
        let (ret, params, vararg) = match self.module.types.signature(fn_ty) {
            Some((ret, params, vararg)) => (ret, params.to_vec(), vararg),
            None => {
                return Err(ParseError::InvalidRecord {
                    block: "MODULE",
                    code: record.code,
                    detail: format!("function type {} is not a function", self.module.types.display(fn_ty)),
                }
                .into())
            }
        };
        let id = crate::ir::FunctionId(self.module.functions.len() as u32);
        let params = params.into_iter().map(|ty| Param { ty, name: None }).collect();
        let mut func = Function::new(id, String::new(), fn_ty, ret, params);
        func.ptr_ty = self.pointer_for(fn_ty);
        func.vararg = vararg;
        func.calling_conv = f.calling_conv;
        func.linkage = Linkage::from_code(f.linkage);
        func.visibility = Visibility::from_code(f.visibility);
        func.align = decode_alignment(f.align);
        func.is_declaration = f.is_proto;
        self.module.functions.push(func);
        if !f.is_proto {
            self.queue_body(id);
        }
        let symbol = Symbol::Function(id);
        if let Some((offset, size)) = f.strtab_name {
            self.strtab_names.push((symbol, offset, size));
        }
        self.module.symbols.push(symbol);
        Ok(())
    }

    fn alias_record(&mut self, record: &Record) -> Result<(), Error> {
        let layout = self.layout();
        let mut ops = Ops::new(record, "MODULE");
        let a = (layout.decode_alias)(&mut ops, record.code)?;
        let declared = self.types.get(a.type_index)?;
        let ty = if a.explicit_type {
            self.pointer_for(declared)
        } else {
            declared
        };
        let id = AliasId(self.module.aliases.len() as u32);
        let target = a.aliasee as u32;
        self.forward.defer(target, Holder::AliasTarget(id));
        self.module.aliases.push(GlobalAlias {
            id,
            name: String::new(),
            ty,
            aliasee: Resolution::Pending(target),
            linkage: Linkage::from_code(a.linkage),
            visibility: Visibility::from_code(a.visibility),
        });
        let symbol = Symbol::Alias(id);
        if let Some((offset, size)) = a.strtab_name {
            self.strtab_names.push((symbol, offset, size));
        }
        self.module.symbols.push(symbol);
        Ok(())
    }
}

/// Alignment fields store `log2(align) + 1`, with 0 meaning unspecified.
pub(crate) fn decode_alignment(field: u64) -> u32 {
    match field & 0x1f {
        0 => 0,
        v => 1u32 << (v - 1),
    }
}
