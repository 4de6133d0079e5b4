use std::collections::HashMap;

use crate::error::ParseError;
use crate::ir::constant::{Constant, ConstantKind};
use crate::ir::function::{Function, Param};
use crate::ir::layout::DataLayout;
use crate::ir::metadata::{MetadataBlock, NamedMetadata};
use crate::ir::types::{TypeId, TypeTable};
use crate::ir::value::{
    AliasId, ConstId, FunctionId, GlobalId, Linkage, LocalValue, ReplaceOperand, Replacement,
    Resolution, Symbol, ValueRef, Visibility,
};

/// Record layout family, chosen from the module VERSION record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FormatVersion {
    /// VERSION 0: absolute value ids, pointer-typed function records.
    Legacy32,
    /// VERSION 1: relative value ids, combined global flags word.
    Legacy38,
    /// VERSION 2: as `Legacy38` with string-table names.
    #[default]
    Current,
}

impl FormatVersion {
    pub fn from_record(version: u64) -> Option<Self> {
        match version {
            0 => Some(FormatVersion::Legacy32),
            1 => Some(FormatVersion::Legacy38),
            2 => Some(FormatVersion::Current),
            _ => None,
        }
    }

    pub fn record_value(self) -> u64 {
        match self {
            FormatVersion::Legacy32 => 0,
            FormatVersion::Legacy38 => 1,
            FormatVersion::Current => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVariable {
    pub id: GlobalId,
    pub name: String,
    /// Type of the stored value.
    pub value_ty: TypeId,
    /// Type of the global used as a value (a pointer).
    pub ptr_ty: TypeId,
    pub is_constant: bool,
    pub initializer: Option<Resolution<Symbol>>,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub align: u32,
    pub section: u64,
    pub address_space: u32,
}

impl ReplaceOperand for GlobalVariable {
    fn describe(&self) -> String {
        format!("initializer of global '{}'", self.name)
    }

    fn replace(&mut self, original: u32, replacement: Replacement) -> Result<(), ParseError> {
        if self.initializer == Some(Resolution::Pending(original)) {
            self.initializer = Some(Resolution::Resolved(replacement.symbol));
        }
        Ok(())
    }

    fn pending(&self) -> Vec<u32> {
        match self.initializer {
            Some(Resolution::Pending(i)) => vec![i],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalAlias {
    pub id: AliasId,
    pub name: String,
    pub ty: TypeId,
    pub aliasee: Resolution<Symbol>,
    pub linkage: Linkage,
    pub visibility: Visibility,
}

impl ReplaceOperand for GlobalAlias {
    fn describe(&self) -> String {
        format!("aliasee of alias '{}'", self.name)
    }

    fn replace(&mut self, original: u32, replacement: Replacement) -> Result<(), ParseError> {
        if self.aliasee != Resolution::Pending(original) {
            return Ok(());
        }
        self.aliasee = Resolution::Resolved(replacement.symbol);
        Ok(())
    }

    fn pending(&self) -> Vec<u32> {
        match self.aliasee {
            Resolution::Pending(i) => vec![i],
            Resolution::Resolved(_) => Vec::new(),
        }
    }
}

/// A decoded (or programmatically built) module.
///
/// All values live in flat arenas addressed by id; `symbols` is the
/// module-level value numbering shared by every reference in the stream.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub version: FormatVersion,
    pub producer: Option<String>,
    pub epoch: Option<u64>,
    pub source_filename: Option<String>,
    pub target_triple: Option<String>,
    pub data_layout_string: Option<String>,
    pub data_layout: DataLayout,
    pub types: TypeTable,
    pub globals: Vec<GlobalVariable>,
    pub functions: Vec<Function>,
    pub aliases: Vec<GlobalAlias>,
    pub constants: Vec<Constant>,
    pub symbols: Vec<Symbol>,
    pub metadata: MetadataBlock,
    pub named_metadata: Vec<NamedMetadata>,
    pub metadata_kinds: Vec<(u64, String)>,
    pub(crate) function_names: HashMap<String, FunctionId>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn symbols_open(&self) -> Result<(), String> {
        if self.functions.iter().any(|f| f.is_definition()) {
            return Err("module-level symbols must be added before any function body".into());
        }
        Ok(())
    }

    fn push_symbol(&mut self, symbol: Symbol) -> ValueRef {
        let r = ValueRef(self.symbols.len() as u32);
        self.symbols.push(symbol);
        r
    }

    /// Adds a global variable. `initializer` must be a module symbol.
    pub fn add_global(
        &mut self,
        name: impl Into<String>,
        value_ty: TypeId,
        is_constant: bool,
        initializer: Option<ValueRef>,
    ) -> Result<(GlobalId, ValueRef), String> {
        self.symbols_open()?;
        let initializer = match initializer {
            Some(r) => Some(Resolution::Resolved(
                self.symbol(r).ok_or_else(|| format!("initializer {} is not a module symbol", r))?,
            )),
            None => None,
        };
        let ptr_ty = self.types.pointer_to(value_ty);
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(GlobalVariable {
            id,
            name: name.into(),
            value_ty,
            ptr_ty,
            is_constant,
            initializer,
            linkage: Linkage::External,
            visibility: Visibility::Default,
            align: 0,
            section: 0,
            address_space: 0,
        });
        Ok((id, self.push_symbol(Symbol::Global(id))))
    }

    /// Declares a function of function type `fn_ty`. Bodies are attached
    /// with [`FunctionBuilder`](crate::ir::builder::FunctionBuilder).
    pub fn declare_function(&mut self, name: impl Into<String>, fn_ty: TypeId) -> Result<(FunctionId, ValueRef), String> {
        self.symbols_open()?;
        let name = name.into();
        if self.function_names.contains_key(&name) {
            return Err(format!("function '{}' already declared", name));
        }
        let (ret, params, vararg) = self
            .types
            .signature(fn_ty)
            .map(|(r, p, v)| (r, p.to_vec(), v))
            .ok_or_else(|| format!("type {} is not a function type", self.types.display(fn_ty)))?;
        let params = params.into_iter().map(|ty| Param { ty, name: None }).collect();
        let id = FunctionId(self.functions.len() as u32);
        let mut func = Function::new(id, name.clone(), fn_ty, ret, params);
        func.vararg = vararg;
        func.ptr_ty = self.types.pointer_to(fn_ty);
        self.functions.push(func);
        self.function_names.insert(name, id);
        Ok((id, self.push_symbol(Symbol::Function(id))))
    }

    /// Adds a module-level constant and returns its value number.
    pub fn add_constant(&mut self, constant: Constant) -> Result<ValueRef, String> {
        self.symbols_open()?;
        let id = self.push_constant(constant);
        Ok(self.push_symbol(Symbol::Constant(id)))
    }

    pub fn add_int_constant(&mut self, ty: TypeId, value: i64) -> Result<ValueRef, String> {
        self.add_constant(Constant::new(ty, ConstantKind::Integer(value)))
    }

    /// Stores a constant in the arena without numbering it.
    pub fn push_constant(&mut self, constant: Constant) -> ConstId {
        let id = ConstId(self.constants.len() as u32);
        self.constants.push(constant);
        id
    }

    pub(crate) fn register_function_name(&mut self, id: FunctionId) {
        if let Some(f) = self.functions.get(id.0 as usize) {
            if !f.name.is_empty() {
                self.function_names.insert(f.name.clone(), id);
            }
        }
    }

    pub fn symbol(&self, r: ValueRef) -> Option<Symbol> {
        self.symbols.get(r.0 as usize).copied()
    }

    /// Value number of a module symbol.
    pub fn symbol_ref(&self, symbol: Symbol) -> Option<ValueRef> {
        self.symbols
            .iter()
            .position(|s| *s == symbol)
            .map(|i| ValueRef(i as u32))
    }

    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id.0 as usize)
    }

    pub fn function_mut(&mut self, id: FunctionId) -> Option<&mut Function> {
        self.functions.get_mut(id.0 as usize)
    }

    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.function_names
            .get(name)
            .and_then(|id| self.function(*id))
            .or_else(|| self.functions.iter().find(|f| f.name == name))
    }

    pub fn global(&self, id: GlobalId) -> Option<&GlobalVariable> {
        self.globals.get(id.0 as usize)
    }

    pub fn global_by_name(&self, name: &str) -> Option<&GlobalVariable> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn constant(&self, id: ConstId) -> Option<&Constant> {
        self.constants.get(id.0 as usize)
    }

    /// Type of a module symbol used as a value.
    pub fn symbol_type(&self, symbol: Symbol) -> Option<TypeId> {
        match symbol {
            Symbol::Global(g) => self.global(g).map(|g| g.ptr_ty),
            Symbol::Function(f) => self.function(f).map(|f| f.ptr_ty),
            Symbol::Alias(a) => self.aliases.get(a.0 as usize).map(|a| a.ty),
            Symbol::Constant(c) => self.constant(c).map(|c| c.ty),
        }
    }

    /// Type of value `r` as seen from `scope` (a function body) or from
    /// module level when `scope` is `None`.
    pub fn value_type(&self, scope: Option<&Function>, r: ValueRef) -> Option<TypeId> {
        if let Some(func) = scope {
            if let Some(local) = func.local(r) {
                return match local {
                    LocalValue::Param(i) => func.params.get(i as usize).map(|p| p.ty),
                    LocalValue::Constant(c) => self.constant(c).map(|c| c.ty),
                    LocalValue::Instruction { block, index } => {
                        func.instruction(block, index).map(|d| d.ty)
                    }
                };
            }
            if r.0 >= func.local_base {
                return None;
            }
        }
        self.symbol(r).and_then(|s| self.symbol_type(s))
    }

    /// Looks through aliases to the aliased symbol.
    pub fn resolve_alias(&self, mut symbol: Symbol) -> Option<Symbol> {
        for _ in 0..64 {
            match symbol {
                Symbol::Alias(a) => symbol = self.aliases.get(a.0 as usize)?.aliasee.get()?,
                other => return Some(other),
            }
        }
        None
    }

    pub fn defined_functions(&self) -> impl Iterator<Item = &Function> + '_ {
        self.functions.iter().filter(|f| f.is_definition())
    }
}
