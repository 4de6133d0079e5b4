//! Shared interpreter state for one loaded module.
//!
//! An [`Engine`] is `Sync`: any number of threads may call into it at once.
//! Per-function preparation (frame layout, dead-slot sets, operation nodes)
//! happens on first call and is published through a `OnceLock`, so every
//! activation of a function drives the same nodes.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::{debug, info};

use super::activation::Activation;
use super::memory::{block_address, function_address, AllocKind, Memory};
use super::nodes::arith::binary;
use super::nodes::cast::{cast, from_bit_pattern, CastTarget, ScalarTarget};
use super::nodes::compare::compare;
use super::nodes::memory::Codec;
use super::nodes::vector::VectorOp;
use super::nodes::{
    ArithNode, CastNode, CompareNode, LoadNode, NodeState, Specializing, StoreNode, VectorNode,
};
use super::value::{width_mask, Value};
use crate::config::EngineConfig;
use crate::error::InterpError;
use crate::frame::{analyze, BlockNullers, FrameDescriptor};
use crate::ir::{
    ConstId, ConstantKind, FloatKind, Function, FunctionId, Instruction, LocalValue, Module,
    Resolution, Symbol, Type, TypeId, ValueRef,
};

/// Host stack reserved per level of interpreted call nesting.
const STACK_PER_CALL: usize = 64 * 1024;
/// Host stack for the engine entry points themselves.
const STACK_BASE: usize = 4 * 1024 * 1024;
/// Upper bound on the interpreter thread's stack; it also caps the
/// effective call depth.
const MAX_STACK: usize = 1 << 30;

/// A host-provided implementation of a declared function.
pub trait ExternalFunction: Send + Sync {
    fn call(&self, engine: &Engine, args: &[Value]) -> Result<Option<Value>, InterpError>;
}

impl<F> ExternalFunction for F
where
    F: Fn(&Engine, &[Value]) -> Result<Option<Value>, InterpError> + Send + Sync,
{
    fn call(&self, engine: &Engine, args: &[Value]) -> Result<Option<Value>, InterpError> {
        self(engine, args)
    }
}

/// The operation node attached to one instruction position.
#[derive(Debug)]
pub(crate) enum Node {
    None,
    Arith(ArithNode),
    Cast(CastNode),
    Compare(CompareNode),
    Load(LoadNode),
    Store(StoreNode),
    Vector(VectorNode),
}

impl Node {
    fn specializing(&self) -> Option<&dyn Specializing> {
        match self {
            Node::None => None,
            Node::Arith(n) => Some(n),
            Node::Cast(n) => Some(n),
            Node::Compare(n) => Some(n),
            Node::Load(n) => Some(n),
            Node::Store(n) => Some(n),
            Node::Vector(n) => Some(n),
        }
    }
}

/// Everything computed once per function definition before it first runs.
#[derive(Debug)]
pub(crate) struct PreparedFunction {
    pub(crate) frame: FrameDescriptor,
    pub(crate) nullers: Vec<BlockNullers>,
    /// Indexed `[block][instruction]`.
    pub(crate) nodes: Vec<Vec<Node>>,
    /// Traversal counters indexed `[block][successor index]`.
    pub(crate) edges: Vec<Vec<AtomicU64>>,
}

impl PreparedFunction {
    fn build(module: &Module, func: &Function) -> Self {
        let frame = FrameDescriptor::build(module, func);
        let nullers = analyze(func, &frame);
        let nodes = func
            .blocks
            .iter()
            .map(|block| {
                block
                    .instrs
                    .iter()
                    .map(|data| node_for(module, func, &data.instr, data.ty))
                    .collect()
            })
            .collect();
        let edges = func
            .blocks
            .iter()
            .map(|block| block.successors.iter().map(|_| AtomicU64::new(0)).collect())
            .collect();
        Self {
            frame,
            nullers,
            nodes,
            edges,
        }
    }
}

fn node_for(module: &Module, func: &Function, instr: &Instruction, ty: TypeId) -> Node {
    let types = &module.types;
    let lanes_of = |r: ValueRef| {
        module
            .value_type(Some(func), r)
            .and_then(|t| types.vector_len(t))
            .unwrap_or(0) as usize
    };
    match instr {
        Instruction::Binary { op, .. } => Node::Arith(ArithNode::new(*op)),
        Instruction::Cast { op, to, .. } => match CastTarget::from_type(types, *to) {
            Some(target) => Node::Cast(CastNode::new(*op, target)),
            None => Node::None,
        },
        Instruction::Compare { pred, .. } => Node::Compare(CompareNode::new(*pred)),
        Instruction::Load { .. } => Node::Load(LoadNode::new(ty)),
        Instruction::Store { value, .. } => match module.value_type(Some(func), *value) {
            Some(stored) => Node::Store(StoreNode::new(stored)),
            None => Node::None,
        },
        Instruction::ExtractElement { vector, .. } => {
            Node::Vector(VectorNode::new(VectorOp::Extract, lanes_of(*vector)))
        }
        Instruction::InsertElement { vector, .. } => {
            Node::Vector(VectorNode::new(VectorOp::Insert, lanes_of(*vector)))
        }
        Instruction::ShuffleVector { lhs, .. } => {
            Node::Vector(VectorNode::new(VectorOp::Shuffle, lanes_of(*lhs)))
        }
        _ => Node::None,
    }
}

/// Specialization state of one node, as reported by [`Engine::node_states`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    pub block: u32,
    pub index: u32,
    pub opcode: &'static str,
    pub state: NodeState,
    pub generic_transitions: u32,
}

impl fmt::Display for NodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bb{}[{}] {}: {}",
            self.block, self.index, self.opcode, self.state
        )
    }
}

/// Interpreter for one module.
pub struct Engine {
    module: Arc<Module>,
    config: EngineConfig,
    memory: Memory,
    prepared: Vec<OnceLock<Arc<PreparedFunction>>>,
    constants: Vec<OnceLock<Value>>,
    global_addresses: Vec<u64>,
    externals: RwLock<HashMap<String, Arc<dyn ExternalFunction>>>,
    next_jump_token: AtomicU64,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("module", &self.module.name)
            .field("config", &self.config)
            .field("globals", &self.global_addresses.len())
            .finish()
    }
}

impl Engine {
    /// Loads `module`: allocates and initializes global storage.
    pub fn new(module: impl Into<Arc<Module>>, config: EngineConfig) -> Result<Self, InterpError> {
        let module = module.into();
        let memory = Memory::new();
        let global_addresses = module
            .globals
            .iter()
            .map(|g| {
                let layout = &module.data_layout;
                let size = layout.alloc_size(&module.types, g.value_ty);
                let align = u64::from(g.align).max(layout.abi_align(&module.types, g.value_ty));
                memory.allocate(size, align, AllocKind::Global)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let engine = Self {
            prepared: (0..module.functions.len()).map(|_| OnceLock::new()).collect(),
            constants: (0..module.constants.len()).map(|_| OnceLock::new()).collect(),
            module,
            config,
            memory,
            global_addresses,
            externals: RwLock::new(HashMap::new()),
            next_jump_token: AtomicU64::new(1),
        };
        engine.initialize_globals()?;
        info!(
            module = %engine.module.name,
            functions = engine.module.functions.len(),
            globals = engine.global_addresses.len(),
            "engine ready"
        );
        Ok(engine)
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub(crate) fn codec(&self) -> Codec<'_> {
        Codec::new(&self.module.types, &self.module.data_layout)
    }

    /// Writes every global's initial value (zero when it has none).
    pub fn initialize_globals(&self) -> Result<(), InterpError> {
        let codec = self.codec();
        for (g, &address) in self.module.globals.iter().zip(&self.global_addresses) {
            let size = codec.size(g.value_ty);
            let value = match g.initializer {
                Some(Resolution::Resolved(symbol)) => self.symbol_value(symbol)?,
                Some(Resolution::Pending(index)) => {
                    return Err(InterpError::Unsupported {
                        detail: format!("initializer {} of global '{}' is unresolved", index, g.name),
                    })
                }
                None => Value::zero(&self.module.types, g.value_ty),
            };
            let mut bytes = vec![0u8; size as usize];
            codec.encode(g.value_ty, &value, &mut bytes)?;
            self.memory.write(address, &bytes)?;
        }
        debug!(count = self.global_addresses.len(), "globals initialized");
        Ok(())
    }

    /// Address of the named global variable.
    pub fn global_address(&self, name: &str) -> Option<u64> {
        let g = self.module.global_by_name(name)?;
        self.global_addresses.get(g.id.0 as usize).copied()
    }

    /// Registers a host implementation for the declared function `name`.
    pub fn register_external(&self, name: impl Into<String>, f: impl ExternalFunction + 'static) {
        self.externals.write().insert(name.into(), Arc::new(f));
    }

    pub(crate) fn external(&self, name: &str) -> Option<Arc<dyn ExternalFunction>> {
        self.externals.read().get(name).cloned()
    }

    pub(crate) fn fresh_jump_token(&self) -> u64 {
        self.next_jump_token.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn prepared(&self, id: FunctionId) -> Option<Arc<PreparedFunction>> {
        let func = self.module.function(id)?;
        let cell = self.prepared.get(id.0 as usize)?;
        Some(Arc::clone(cell.get_or_init(|| {
            debug!(function = %func.name, "preparing frame");
            Arc::new(PreparedFunction::build(&self.module, func))
        })))
    }

    /// Calls the function named `name` with `args`.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>, InterpError> {
        let func = self
            .module
            .function_by_name(name)
            .ok_or_else(|| InterpError::UnknownFunction { name: name.to_string() })?;
        self.on_interpreter_stack(|| self.invoke(func.id, args.to_vec(), 0))
    }

    /// Call nesting allowed before `StackOverflow`: the configured limit,
    /// bounded by what [`MAX_STACK`] can hold.
    pub fn call_depth_limit(&self) -> usize {
        self.config
            .max_call_depth
            .min((MAX_STACK - STACK_BASE) / STACK_PER_CALL)
    }

    /// Runs `f` on a scoped thread whose stack fits the call depth limit.
    /// Interpreted calls recurse on the host stack, which the caller's
    /// thread cannot be assumed to have.
    pub(crate) fn on_interpreter_stack<T: Send>(
        &self,
        f: impl FnOnce() -> Result<T, InterpError> + Send,
    ) -> Result<T, InterpError> {
        let stack = STACK_BASE + self.call_depth_limit() * STACK_PER_CALL;
        std::thread::scope(|scope| {
            let handle = std::thread::Builder::new()
                .name("bcvm-interp".into())
                .stack_size(stack)
                .spawn_scoped(scope, f)
                .map_err(|e| InterpError::Unsupported {
                    detail: format!("cannot start interpreter thread with {} bytes of stack: {}", stack, e),
                })?;
            match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
    }

    /// Runs function `id` at call depth `depth`.
    pub(crate) fn invoke(
        &self,
        id: FunctionId,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Option<Value>, InterpError> {
        let limit = self.call_depth_limit();
        if depth >= limit {
            return Err(InterpError::StackOverflow { limit });
        }
        let func = self
            .module
            .function(id)
            .ok_or_else(|| InterpError::UnknownFunction { name: id.to_string() })?;
        if !func.is_definition() {
            return self.call_declaration(func, &args);
        }
        let arity_ok = if func.vararg {
            args.len() >= func.params.len()
        } else {
            args.len() == func.params.len()
        };
        if !arity_ok {
            return Err(InterpError::ArityMismatch {
                function: func.name.clone(),
                expected: func.params.len(),
                found: args.len(),
            });
        }
        let prepared = self
            .prepared(id)
            .ok_or_else(|| InterpError::UnknownFunction { name: func.name.clone() })?;
        Activation::new(self, func, &prepared, depth).run(args)
    }

    fn call_declaration(&self, func: &Function, args: &[Value]) -> Result<Option<Value>, InterpError> {
        match self.external(&func.name) {
            Some(f) => f.call(self, args),
            None => Err(InterpError::UnknownFunction {
                name: func.name.clone(),
            }),
        }
    }

    /// Edge traversal counts of `function`, indexed `[block][successor index]`.
    /// `None` when the function is unknown or has not run yet.
    pub fn branch_profile(&self, function: &str) -> Option<Vec<Vec<u64>>> {
        let func = self.module.function_by_name(function)?;
        let prepared = self.prepared.get(func.id.0 as usize)?.get()?;
        Some(
            prepared
                .edges
                .iter()
                .map(|block| block.iter().map(|c| c.load(Ordering::Relaxed)).collect())
                .collect(),
        )
    }

    /// Specialization state of every operation node in `function`.
    pub fn node_states(&self, function: &str) -> Option<Vec<NodeReport>> {
        let func = self.module.function_by_name(function)?;
        let prepared = self.prepared(func.id)?;
        let mut out = Vec::new();
        for (b, block) in prepared.nodes.iter().enumerate() {
            for (i, node) in block.iter().enumerate() {
                if let Some(n) = node.specializing() {
                    out.push(NodeReport {
                        block: b as u32,
                        index: i as u32,
                        opcode: n.opcode(),
                        state: n.state(),
                        generic_transitions: n.generic_transitions(),
                    });
                }
            }
        }
        Some(out)
    }

    // -- constants -----------------------------------------------------------

    /// Value of a module symbol: an address for globals and functions.
    pub fn symbol_value(&self, symbol: Symbol) -> Result<Value, InterpError> {
        match symbol {
            Symbol::Global(g) => self
                .global_addresses
                .get(g.0 as usize)
                .map(|a| Value::Pointer(*a))
                .ok_or_else(|| InterpError::Unsupported {
                    detail: format!("unknown global #{}", g.0),
                }),
            Symbol::Function(f) => Ok(Value::Pointer(function_address(f))),
            Symbol::Alias(_) => match self.module.resolve_alias(symbol) {
                Some(target) => self.symbol_value(target),
                None => Err(InterpError::Unsupported {
                    detail: "alias chain does not end in a definition".into(),
                }),
            },
            Symbol::Constant(c) => self.constant(None, c),
        }
    }

    /// Value of an operand that is not held in a frame slot: module symbols
    /// and function-local constants.
    pub(crate) fn operand(&self, scope: Option<&Function>, r: ValueRef) -> Result<Value, InterpError> {
        if let Some(func) = scope {
            match func.local(r) {
                Some(LocalValue::Constant(c)) => return self.constant(scope, c),
                Some(_) => {
                    return Err(InterpError::Unsupported {
                        detail: format!("{} is not a constant in '{}'", r, func.name),
                    })
                }
                None => {}
            }
        }
        let symbol = self.module.symbol(r).ok_or_else(|| InterpError::Unsupported {
            detail: format!("value {} is not defined", r),
        })?;
        self.symbol_value(symbol)
    }

    fn constant(&self, scope: Option<&Function>, id: ConstId) -> Result<Value, InterpError> {
        let cell = self.constants.get(id.0 as usize).ok_or_else(|| InterpError::Unsupported {
            detail: format!("unknown constant #{}", id.0),
        })?;
        if let Some(v) = cell.get() {
            return Ok(v.clone());
        }
        let value = self.evaluate_constant(scope, id)?;
        Ok(cell.get_or_init(|| value).clone())
    }

    fn evaluate_constant(&self, scope: Option<&Function>, id: ConstId) -> Result<Value, InterpError> {
        let module = &self.module;
        let types = &module.types;
        let constant = module.constant(id).ok_or_else(|| InterpError::Unsupported {
            detail: format!("unknown constant #{}", id.0),
        })?;
        let ty = constant.ty;
        let op = |r: ValueRef| self.operand(scope, r);
        Ok(match &constant.kind {
            ConstantKind::Integer(v) => {
                let bits = types.int_width(ty).unwrap_or(64);
                Value::from_bits(bits, (*v as i128 as u128) & width_mask(bits))
            }
            ConstantKind::WideInteger(words) => {
                let bits = types.int_width(ty).unwrap_or(128);
                let low = words.first().copied().unwrap_or(0);
                let high = words.get(1).copied().unwrap_or(if (low as i64) < 0 { u64::MAX } else { 0 });
                Value::from_bits(bits, (u128::from(high) << 64) | u128::from(low))
            }
            ConstantKind::Float(raw) => match types.ty(ty) {
                Type::Float(FloatKind::Fp128) | Type::Float(FloatKind::PpcFp128) => {
                    return Err(InterpError::Unsupported {
                        detail: "128-bit float constants".into(),
                    })
                }
                Type::Float(kind) => from_bit_pattern(ScalarTarget::Float(*kind), *raw),
                _ => return Err(self.bad_constant(ty, "float")),
            },
            ConstantKind::Null | ConstantKind::Undef | ConstantKind::Poison => Value::zero(types, ty),
            ConstantKind::Aggregate(elems) => {
                let values = elems.iter().map(|e| op(*e)).collect::<Result<Vec<_>, _>>()?;
                match types.ty(ty) {
                    Type::Vector { .. } => Value::Vector(values),
                    _ => Value::Aggregate(values),
                }
            }
            ConstantKind::Data(words) => {
                let element = types.element(ty).ok_or_else(|| self.bad_constant(ty, "data"))?;
                let lane = |w: u64| match types.ty(element) {
                    Type::Integer(bits) => Ok(Value::from_bits(*bits, u128::from(w))),
                    Type::Float(kind) => Ok(from_bit_pattern(ScalarTarget::Float(*kind), u128::from(w))),
                    _ => Err(self.bad_constant(ty, "data")),
                };
                let values = words.iter().map(|w| lane(*w)).collect::<Result<Vec<_>, _>>()?;
                match types.ty(ty) {
                    Type::Vector { .. } => Value::Vector(values),
                    _ => Value::Aggregate(values),
                }
            }
            ConstantKind::String { bytes, null_terminated } => {
                let mut values: Vec<Value> = bytes.iter().map(|b| Value::I8(*b as i8)).collect();
                if *null_terminated {
                    values.push(Value::I8(0));
                }
                Value::Aggregate(values)
            }
            ConstantKind::BinaryExpr { op: bin, lhs, rhs } => binary(*bin, &op(*lhs)?, &op(*rhs)?)?,
            ConstantKind::CastExpr { op: cast_op, value } => {
                let target = CastTarget::from_type(types, ty).ok_or_else(|| self.bad_constant(ty, "cast"))?;
                cast(*cast_op, target, &op(*value)?)?
            }
            ConstantKind::CompareExpr { pred, lhs, rhs } => Value::I1(compare(*pred, &op(*lhs)?, &op(*rhs)?)?),
            ConstantKind::SelectExpr {
                cond,
                then_value,
                else_value,
            } => {
                let c = op(*cond)?.as_bool().ok_or_else(|| self.bad_constant(ty, "select"))?;
                if c {
                    op(*then_value)?
                } else {
                    op(*else_value)?
                }
            }
            ConstantKind::GetElementPtr {
                source_ty,
                base,
                indices,
                ..
            } => {
                let base = op(*base)?.as_pointer().ok_or_else(|| self.bad_constant(ty, "getelementptr"))?;
                let indices = indices.iter().map(|i| op(*i)).collect::<Result<Vec<_>, _>>()?;
                Value::Pointer(self.element_address(*source_ty, base, &indices)?)
            }
            ConstantKind::BlockAddress(ba) => {
                let (function, block) = ba.target().map_err(|e| InterpError::Unsupported {
                    detail: e.to_string(),
                })?;
                Value::Pointer(block_address(function, block))
            }
            ConstantKind::Opaque { code } => {
                return Err(InterpError::Unsupported {
                    detail: format!("constant record code {}", code),
                })
            }
        })
    }

    fn bad_constant(&self, ty: TypeId, what: &str) -> InterpError {
        InterpError::UnsupportedOperandType {
            opcode: format!("{} constant", what),
            types: self.module.types.display(ty),
        }
    }

    /// Address arithmetic of `getelementptr`: the first index steps over
    /// whole `source_ty` objects, the rest walk into aggregates.
    pub(crate) fn element_address(
        &self,
        source_ty: TypeId,
        base: u64,
        indices: &[Value],
    ) -> Result<u64, InterpError> {
        let types = &self.module.types;
        let layout = &self.module.data_layout;
        let index_of = |v: &Value| {
            v.as_signed().ok_or_else(|| InterpError::UnsupportedOperandType {
                opcode: "getelementptr".into(),
                types: v.tag().to_string(),
            })
        };
        let mut address = base;
        let mut current = source_ty;
        for (n, index) in indices.iter().enumerate() {
            let i = index_of(index)?;
            if n == 0 {
                let stride = layout.alloc_size(types, current) as i128;
                address = address.wrapping_add((i * stride) as u64);
                continue;
            }
            match types.ty(current) {
                Type::Struct(_) => {
                    let offset = layout
                        .member_offset(types, current, i as u64)
                        .ok_or_else(|| InterpError::Unsupported {
                            detail: format!("struct field {} out of range", i),
                        })?;
                    address = address.wrapping_add(offset);
                    current = types.member(current, i as u64).unwrap_or(current);
                }
                Type::Array { element, .. } | Type::Vector { element, .. } => {
                    let stride = layout.alloc_size(types, *element) as i128;
                    address = address.wrapping_add((i * stride) as u64);
                    current = *element;
                }
                _ => {
                    return Err(InterpError::UnsupportedOperandType {
                        opcode: "getelementptr".into(),
                        types: types.display(current),
                    })
                }
            }
        }
        Ok(address)
    }
}
