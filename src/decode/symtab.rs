//! VALUE_SYMTAB and STRTAB handlers: attach names to symbols, locals and
//! basic blocks.

use tracing::debug;

use super::ModuleBuilder;
use crate::bitstream::{BlockKind, Record};
use crate::error::Error;
use crate::ir::{LocalValue, Symbol, ValueRef};

const VST_ENTRY: u32 = 1;
const VST_BBENTRY: u32 = 2;
const VST_FNENTRY: u32 = 3;
const VST_COMBINED_ENTRY: u32 = 5;

const STRTAB_BLOB: u32 = 1;

impl ModuleBuilder {
    pub(crate) fn symtab_record(&mut self, record: &Record) -> Result<(), Error> {
        match record.code {
            VST_ENTRY => {
                let Some(value) = record.get(0) else {
                    return Ok(());
                };
                let name = record.string_from(1);
                self.name_value(ValueRef(value as u32), name);
            }
            VST_FNENTRY => {
                let Some(value) = record.get(0) else {
                    return Ok(());
                };
                // [valueid, offset, namechar...]
                let name = record.string_from(2);
                if !name.is_empty() {
                    self.name_value(ValueRef(value as u32), name);
                }
            }
            VST_BBENTRY => {
                let (Some(block), Some(state)) = (record.get(0), self.function.as_ref()) else {
                    return Ok(());
                };
                let name = record.string_from(1);
                if let Some(b) = self
                    .module
                    .function_mut(state.id)
                    .and_then(|f| f.blocks.get_mut(block as usize))
                {
                    b.name = Some(name);
                }
            }
            VST_COMBINED_ENTRY => {}
            _ => self.unknown_record(BlockKind::ValueSymtab, record)?,
        }
        Ok(())
    }

    fn name_value(&mut self, value: ValueRef, name: String) {
        if let Some(state) = self.function.as_ref() {
            let id = state.id;
            if let Some(func) = self.module.function_mut(id) {
                match func.local(value) {
                    Some(LocalValue::Param(i)) => {
                        if let Some(p) = func.params.get_mut(i as usize) {
                            p.name = Some(name);
                        }
                        return;
                    }
                    Some(LocalValue::Instruction { block, index }) => {
                        if let Some(data) = func
                            .blocks
                            .get_mut(block as usize)
                            .and_then(|b| b.instrs.get_mut(index as usize))
                        {
                            data.name = Some(name);
                        }
                        return;
                    }
                    Some(LocalValue::Constant(_)) => return,
                    None => {}
                }
            }
        }
        match self.module.symbol(value) {
            Some(symbol) => self.set_symbol_name(symbol, name),
            None => debug!(value = value.0, "symbol table entry for unknown value"),
        }
    }

    pub(crate) fn set_symbol_name(&mut self, symbol: Symbol, name: String) {
        match symbol {
            Symbol::Global(g) => {
                if let Some(g) = self.module.globals.get_mut(g.0 as usize) {
                    g.name = name;
                }
            }
            Symbol::Function(f) => {
                if let Some(func) = self.module.functions.get_mut(f.0 as usize) {
                    func.name = name;
                }
                self.module.register_function_name(f);
            }
            Symbol::Alias(a) => {
                if let Some(a) = self.module.aliases.get_mut(a.0 as usize) {
                    a.name = name;
                }
            }
            Symbol::Constant(_) => {}
        }
    }

    pub(crate) fn strtab_record(&mut self, record: &Record) -> Result<(), Error> {
        match record.code {
            STRTAB_BLOB => self.strtab = record.blob.clone(),
            _ => self.unknown_record(BlockKind::Strtab, record)?,
        }
        Ok(())
    }

    /// Names symbols whose records carried `[offset, size]` string-table
    /// references. Runs once the STRTAB block (which follows the module
    /// block) has been read.
    pub(crate) fn apply_strtab_names(&mut self) {
        let names = std::mem::take(&mut self.strtab_names);
        let Some(strtab) = self.strtab.take() else {
            if !names.is_empty() {
                debug!(count = names.len(), "string table missing; symbols stay unnamed");
            }
            return;
        };
        for (symbol, offset, size) in names {
            let start = offset as usize;
            let Some(bytes) = strtab.get(start..start.saturating_add(size as usize)) else {
                debug!(offset, size, "string table reference out of range");
                continue;
            };
            let name = String::from_utf8_lossy(bytes).into_owned();
            self.set_symbol_name(symbol, name);
        }
    }
}
