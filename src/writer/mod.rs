//! Module serialization: the inverse of [`decode`](crate::decode).
//!
//! ## Layout
//!
//! ```text
//! magic | IDENTIFICATION { STRING producer, EPOCH }
//!       | MODULE { VERSION 2, TYPE {..}, TRIPLE, DATALAYOUT, SOURCE_FILENAME,
//!                  GLOBALVAR / FUNCTION / ALIAS / CONSTANTS {..} in symbol order,
//!                  FUNCTION { DECLAREBLOCKS, CONSTANTS {..}, instructions, VALUE_SYMTAB }* }
//!       | STRTAB { BLOB names }
//! ```
//!
//! Records always use the `Current` layout. Module symbols keep their numbers;
//! function-local values are renumbered parameters first, then local
//! constants, then instruction results in block order, which is the order the
//! reader assigns them. Metadata is not written.

mod function;
mod types;

use tracing::debug;

use crate::bitstream::{AbbrevOp, Abbreviation, BitWriter, BlockKind};
use crate::error::WriteError;
use crate::ir::{
    ConstId, FormatVersion, GlobalAlias, GlobalVariable, Module, Resolution, Symbol, Type,
};

use self::function::Numbering;
use self::types::{chars, TypeOrder};

const MODULE_VERSION: u32 = 1;
const MODULE_TRIPLE: u32 = 2;
const MODULE_DATALAYOUT: u32 = 3;
const MODULE_GLOBALVAR: u32 = 7;
const MODULE_FUNCTION: u32 = 8;
const MODULE_ALIAS: u32 = 14;
const MODULE_SOURCE_FILENAME: u32 = 16;

const IDENTIFICATION_STRING: u32 = 1;
const IDENTIFICATION_EPOCH: u32 = 2;

const STRTAB_BLOB: u64 = 1;

const DEFAULT_PRODUCER: &str = "bcvm";

/// Serializes `module` to raw bitcode.
pub fn write_module(module: &Module) -> Result<Vec<u8>, WriteError> {
    ModuleWriter::new(module).write()
}

/// One-shot serializer for a module.
pub struct ModuleWriter<'m> {
    module: &'m Module,
    types: TypeOrder,
    out: BitWriter,
    strtab: Vec<u8>,
}

impl<'m> ModuleWriter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            types: TypeOrder::new(&module.types),
            out: BitWriter::with_magic(),
            strtab: Vec::new(),
        }
    }

    pub fn write(mut self) -> Result<Vec<u8>, WriteError> {
        let module = self.module;
        self.identification();

        self.out.enter_block(BlockKind::Module.id(), 3);
        self.out
            .emit_record(MODULE_VERSION, &[FormatVersion::Current.record_value()]);
        self.out.enter_block(BlockKind::Type.id(), 4);
        self.types.emit(&module.types, &mut self.out);
        self.out.end_block();
        if let Some(triple) = &module.target_triple {
            self.out.emit_record(MODULE_TRIPLE, &chars(triple));
        }
        if let Some(layout) = &module.data_layout_string {
            self.out.emit_record(MODULE_DATALAYOUT, &chars(layout));
        }
        if let Some(file) = &module.source_filename {
            self.out.emit_record(MODULE_SOURCE_FILENAME, &chars(file));
        }

        let mut constants: Vec<ConstId> = Vec::new();
        for symbol in &module.symbols {
            match *symbol {
                Symbol::Constant(c) => constants.push(c),
                Symbol::Global(g) => {
                    self.module_constants(&mut constants)?;
                    if let Some(g) = module.global(g) {
                        self.global_record(g)?;
                    }
                }
                Symbol::Function(f) => {
                    self.module_constants(&mut constants)?;
                    if let Some(f) = module.function(f) {
                        let (offset, size) = self.name(&f.name);
                        self.out.emit_record(
                            MODULE_FUNCTION,
                            &[
                                offset,
                                size,
                                self.types.index(f.ty),
                                f.calling_conv,
                                u64::from(f.is_declaration),
                                f.linkage.code(),
                                0,
                                encode_alignment(f.align),
                                0,
                                f.visibility.code(),
                            ],
                        );
                    }
                }
                Symbol::Alias(a) => {
                    self.module_constants(&mut constants)?;
                    if let Some(a) = module.aliases.get(a.0 as usize) {
                        self.alias_record(a)?;
                    }
                }
            }
        }
        self.module_constants(&mut constants)?;

        // Bodies follow in the order their FUNCTION records were written.
        for symbol in &module.symbols {
            let Symbol::Function(id) = *symbol else { continue };
            if let Some(func) = module.function(id).filter(|f| f.is_definition()) {
                self.function_block(func)?;
            }
        }
        self.out.end_block();

        self.strtab_block();
        let bytes = self.out.finish();
        debug!(
            bytes = bytes.len(),
            symbols = module.symbols.len(),
            "module serialized"
        );
        Ok(bytes)
    }

    fn identification(&mut self) {
        let producer = self.module.producer.as_deref().unwrap_or(DEFAULT_PRODUCER);
        self.out.enter_block(BlockKind::Identification.id(), 5);
        self.out.emit_record(IDENTIFICATION_STRING, &chars(producer));
        self.out
            .emit_record(IDENTIFICATION_EPOCH, &[self.module.epoch.unwrap_or(0)]);
        self.out.end_block();
    }

    /// Appends `name` to the string table and returns its `[offset, size]`.
    fn name(&mut self, name: &str) -> (u64, u64) {
        let offset = self.strtab.len() as u64;
        self.strtab.extend_from_slice(name.as_bytes());
        (offset, name.len() as u64)
    }

    fn symbol_index(&self, symbol: Symbol, holder: impl FnOnce() -> String) -> Result<u64, WriteError> {
        self.module
            .symbol_ref(symbol)
            .map(|r| u64::from(r.0))
            .ok_or_else(|| WriteError::UnnumberedSymbol { holder: holder() })
    }

    fn global_record(&mut self, g: &GlobalVariable) -> Result<(), WriteError> {
        let init = match g.initializer {
            None => 0,
            Some(Resolution::Pending(i)) => u64::from(i) + 1,
            Some(Resolution::Resolved(s)) => {
                self.symbol_index(s, || format!("initializer of global '{}'", g.name))? + 1
            }
        };
        // const | explicit_type << 1 | addrspace << 2
        let flags = u64::from(g.is_constant) | 2 | (u64::from(g.address_space) << 2);
        let (offset, size) = self.name(&g.name);
        self.out.emit_record(
            MODULE_GLOBALVAR,
            &[
                offset,
                size,
                self.types.index(g.value_ty),
                flags,
                init,
                g.linkage.code(),
                encode_alignment(g.align),
                g.section,
                g.visibility.code(),
            ],
        );
        Ok(())
    }

    fn alias_record(&mut self, a: &GlobalAlias) -> Result<(), WriteError> {
        let aliasee = match a.aliasee {
            Resolution::Pending(i) => u64::from(i),
            Resolution::Resolved(s) => self.symbol_index(s, || format!("aliasee of alias '{}'", a.name))?,
        };
        let types = &self.module.types;
        let (value_ty, address_space) = match types.ty(a.ty) {
            Type::Pointer {
                pointee,
                address_space,
            } => (pointee.unwrap_or(a.ty), *address_space),
            _ => (a.ty, 0),
        };
        let (offset, size) = self.name(&a.name);
        self.out.emit_record(
            MODULE_ALIAS,
            &[
                offset,
                size,
                self.types.index(value_ty),
                u64::from(address_space),
                aliasee,
                a.linkage.code(),
                a.visibility.code(),
            ],
        );
        Ok(())
    }

    /// Writes the queued module-level constants as one CONSTANTS block.
    fn module_constants(&mut self, pending: &mut Vec<ConstId>) -> Result<(), WriteError> {
        if pending.is_empty() {
            return Ok(());
        }
        let numbering = Numbering::module(self.module);
        let ids = std::mem::take(pending);
        self.constants_block(&ids, &numbering)
    }

    fn strtab_block(&mut self) {
        let blob = std::mem::take(&mut self.strtab);
        self.out.enter_block(BlockKind::Strtab.id(), 3);
        let abbrev = self
            .out
            .define_abbrev(Abbreviation::new(vec![AbbrevOp::Literal(STRTAB_BLOB), AbbrevOp::Blob]));
        self.out.emit_abbreviated(abbrev, &[STRTAB_BLOB], Some(&blob));
        self.out.end_block();
    }
}

/// Alignment fields store `log2(align) + 1`, with 0 meaning unspecified.
pub(crate) fn encode_alignment(align: u32) -> u64 {
    if align == 0 {
        0
    } else {
        u64::from(align.trailing_zeros()) + 1
    }
}
