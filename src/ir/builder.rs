use crate::ir::block::{BasicBlock, InstructionData};
use crate::ir::constant::{Constant, ConstantKind};
use crate::ir::instr::Instruction;
use crate::ir::module::Module;
use crate::ir::types::TypeId;
use crate::ir::value::{FunctionId, LocalValue, ValueRef};

/// Builder for attaching a body to a declared function.
///
/// Usage:
/// 1. `FunctionBuilder::new()` or `define()` - start the body
/// 2. `create_block()` - allocate blocks (the first one is the entry)
/// 3. `set_current_block()` - select where instructions go
/// 4. `push()` - emit instructions; value-producing ones return their ref
/// 5. `finish()` - seal every block
pub struct FunctionBuilder<'m> {
    module: &'m mut Module,
    func: FunctionId,
    current: Option<u32>,
}

impl<'m> FunctionBuilder<'m> {
    /// Declares `name` with the given signature and starts its body.
    pub fn new(module: &'m mut Module, name: &str, ret: TypeId, params: &[TypeId]) -> Result<Self, String> {
        let fn_ty = module.types.function(ret, params.to_vec(), false);
        let (func, _) = module.declare_function(name, fn_ty)?;
        Ok(Self::define(module, func))
    }

    /// Starts the body of an already declared function. All module-level
    /// symbols must exist at this point.
    pub fn define(module: &'m mut Module, func: FunctionId) -> Self {
        let base = module.symbols.len() as u32;
        if let Some(f) = module.function_mut(func) {
            f.is_declaration = false;
            f.local_base = base;
            f.locals = (0..f.params.len() as u32).map(LocalValue::Param).collect();
        }
        Self {
            module,
            func,
            current: None,
        }
    }

    pub fn id(&self) -> FunctionId {
        self.func
    }

    pub fn module(&mut self) -> &mut Module {
        self.module
    }

    pub fn param(&self, index: u32) -> ValueRef {
        self.module
            .function(self.func)
            .map(|f| f.param_ref(index))
            .unwrap_or(ValueRef(u32::MAX))
    }

    /// Value number of a module symbol that is a function, for calls.
    pub fn function_ref(&self, func: FunctionId) -> Option<ValueRef> {
        self.module.symbol_ref(crate::ir::value::Symbol::Function(func))
    }

    pub fn create_block(&mut self, name: Option<&str>) -> u32 {
        match self.module.function_mut(self.func) {
            Some(f) => {
                f.blocks.push(BasicBlock::new(name.map(str::to_string)));
                (f.blocks.len() - 1) as u32
            }
            None => u32::MAX,
        }
    }

    pub fn set_current_block(&mut self, block: u32) {
        self.current = Some(block);
    }

    /// Adds a function-local constant.
    pub fn constant(&mut self, constant: Constant) -> ValueRef {
        let id = self.module.push_constant(constant);
        self.push_local(LocalValue::Constant(id))
    }

    pub fn const_int(&mut self, ty: TypeId, value: i64) -> ValueRef {
        self.constant(Constant::new(ty, ConstantKind::Integer(value)))
    }

    pub fn const_float(&mut self, ty: TypeId, bits: u128) -> ValueRef {
        self.constant(Constant::new(ty, ConstantKind::Float(bits)))
    }

    fn push_local(&mut self, local: LocalValue) -> ValueRef {
        match self.module.function_mut(self.func) {
            Some(f) => {
                f.locals.push(local);
                ValueRef(f.local_base + f.locals.len() as u32 - 1)
            }
            None => ValueRef(u32::MAX),
        }
    }

    /// Appends `instr` to the current block. Returns the defined value when
    /// `ty` is not void.
    pub fn push(&mut self, instr: Instruction, ty: TypeId) -> Option<ValueRef> {
        self.push_named(instr, ty, None)
    }

    pub fn push_named(&mut self, instr: Instruction, ty: TypeId, name: Option<&str>) -> Option<ValueRef> {
        let block = self.current?;
        let defines = !self.module.types.is_void(ty);
        let f = self.module.function_mut(self.func)?;
        let index = f.blocks.get(block as usize)?.instrs.len() as u32;
        let value = if defines {
            f.locals.push(LocalValue::Instruction { block, index });
            Some(ValueRef(f.local_base + f.locals.len() as u32 - 1))
        } else {
            None
        };
        f.blocks[block as usize].instrs.push(InstructionData {
            instr,
            ty,
            value,
            name: name.map(str::to_string),
        });
        value
    }

    /// Seals every block and returns the function id.
    pub fn finish(self) -> FunctionId {
        if let Some(f) = self.module.function_mut(self.func) {
            for block in &mut f.blocks {
                block.seal();
            }
        }
        self.func
    }
}
