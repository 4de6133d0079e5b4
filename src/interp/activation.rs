//! The block dispatch loop of one function activation.
//!
//! Per block: run the non-phi instructions, pick the successor index the
//! terminator selects, clear the block's `after` slots, count the edge,
//! assign the successor's phis, clear its `before` slots, move on. The loop
//! ends when the chosen successor is [`RETURN_SUCCESSOR`].

use smallvec::SmallVec;
use tracing::trace;

use super::engine::{Engine, Node, PreparedFunction};
use super::memory::{decode_block_address, fence_for, AllocKind};
use super::nodes::arith::{binary, int_arith_bits, negate};
use super::nodes::compare::compare;
use super::nodes::unsupported;
use super::value::{sign_extend_128, width_mask, Value};
use crate::error::InterpError;
use crate::frame::SlotId;
use crate::ir::{
    AtomicRmwOp, BinOp, Function, InstructionData, Instruction, ValueRef,
    RETURN_SUCCESSOR,
};

/// State captured by `setjmp`, restored by a matching `longjmp`.
#[derive(Debug, Clone)]
pub(crate) struct SavedContext {
    pub(crate) token: u64,
    pub(crate) block: u32,
    /// Position of the `setjmp` call; execution resumes right after it.
    pub(crate) index: usize,
    pub(crate) result: Option<(ValueRef, u32)>,
    pub(crate) slots: Vec<Option<Value>>,
}

pub(crate) struct Activation<'e> {
    pub(crate) engine: &'e Engine,
    pub(crate) func: &'e Function,
    pub(crate) prepared: &'e PreparedFunction,
    pub(crate) depth: usize,
    pub(crate) slots: Vec<Option<Value>>,
    /// `alloca` allocations, freed when the activation ends.
    stack: Vec<u64>,
    pub(crate) saved: Vec<SavedContext>,
}

impl Drop for Activation<'_> {
    fn drop(&mut self) {
        for base in self.stack.drain(..) {
            self.engine.memory().free(base);
        }
    }
}

impl<'e> Activation<'e> {
    pub(crate) fn new(
        engine: &'e Engine,
        func: &'e Function,
        prepared: &'e PreparedFunction,
        depth: usize,
    ) -> Self {
        Self {
            engine,
            func,
            prepared,
            depth,
            slots: vec![None; prepared.frame.slot_count()],
            stack: Vec::new(),
            saved: Vec::new(),
        }
    }

    pub(crate) fn run(mut self, args: Vec<Value>) -> Result<Option<Value>, InterpError> {
        let prepared = self.prepared;
        let frame = &prepared.frame;
        for (i, arg) in args.into_iter().enumerate() {
            if let Some(slot) = frame.param_slot(i) {
                self.set_slot(slot, arg);
            }
        }
        self.set_slot(frame.stack_slot(), Value::Pointer(0));

        let mut block = 0u32;
        let mut start = 0usize;
        loop {
            let (chosen, next) = match self.execute_block(block, start) {
                Ok(step) => step,
                Err(InterpError::Longjmp { token, value }) => match self.resume(token, value) {
                    Some((b, i)) => {
                        block = b;
                        start = i;
                        continue;
                    }
                    None => return Err(InterpError::Longjmp { token, value }),
                },
                Err(e) => return Err(e),
            };

            if let Some(nullers) = prepared.nullers.get(block as usize) {
                self.clear(&nullers.after);
            }
            if self.engine.config().branch_profiling {
                if let Some(counter) = prepared
                    .edges
                    .get(block as usize)
                    .and_then(|e| e.get(chosen))
                {
                    counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
            trace!(function = %self.func.name, from = block, successor = chosen, to = next, "dispatch");
            if next == RETURN_SUCCESSOR {
                break;
            }
            self.assign_phis(block, next)?;
            if let Some(nullers) = prepared.nullers.get(next as usize) {
                self.clear(&nullers.before);
            }
            block = next;
            start = 0;
        }

        Ok(frame
            .return_slot()
            .and_then(|slot| self.slots.get_mut(slot.0 as usize))
            .and_then(Option::take))
    }

    /// Runs block `block` from instruction `start` (phis excluded) and
    /// returns `(successor index, successor block)`.
    fn execute_block(&mut self, block: u32, start: usize) -> Result<(usize, u32), InterpError> {
        let func = self.func;
        let bb = func
            .block(block)
            .ok_or_else(|| self.no_successor(block, "block index out of range".into()))?;
        for index in bb.first_non_phi().max(start)..bb.instrs.len() {
            let data = &bb.instrs[index];
            if data.instr.is_terminator() {
                let chosen = self.branch(block, &data.instr)?;
                let next = bb
                    .successors
                    .get(chosen)
                    .copied()
                    .ok_or_else(|| self.no_successor(block, format!("successor index {}", chosen)))?;
                return Ok((chosen, next));
            }
            let result = self.execute(block, index, data)?;
            if let (Some(r), Some(v)) = (data.value, result) {
                self.write(r, v);
            }
        }
        Err(self.no_successor(block, "block has no terminator".into()))
    }

    fn no_successor(&self, block: u32, outcome: String) -> InterpError {
        InterpError::NoMatchingSuccessor {
            function: self.func.name.clone(),
            block,
            outcome,
        }
    }

    /// Successor index selected by a terminator.
    fn branch(&mut self, block: u32, instr: &Instruction) -> Result<usize, InterpError> {
        match instr {
            Instruction::Ret { value } => {
                if let Some(r) = value {
                    let v = self.read(*r)?;
                    if let Some(slot) = self.prepared.frame.return_slot() {
                        self.set_slot(slot, v);
                    }
                }
                Ok(0)
            }
            Instruction::Br { .. } => Ok(0),
            Instruction::CondBr { cond, .. } => {
                let c = self.read(*cond)?;
                match c.as_bool() {
                    Some(true) => Ok(0),
                    Some(false) => Ok(1),
                    None => Err(self.no_successor(block, c.to_string())),
                }
            }
            Instruction::Switch { cond, cases, .. } => {
                let c = self.read(*cond)?;
                let key = c.int_bits();
                for (i, (case, _)) in cases.iter().enumerate() {
                    if self.read(*case)?.int_bits() == key {
                        return Ok(i + 1);
                    }
                }
                Ok(0)
            }
            Instruction::IndirectBr { address, targets } => {
                let a = self.read(*address)?;
                let target = a
                    .as_pointer()
                    .and_then(decode_block_address)
                    .filter(|(f, _)| *f == self.func.id)
                    .and_then(|(_, b)| targets.iter().position(|t| *t == b));
                target.ok_or_else(|| self.no_successor(block, a.to_string()))
            }
            Instruction::Unreachable => Err(InterpError::Unreachable {
                function: self.func.name.clone(),
            }),
            other => Err(InterpError::Unsupported {
                detail: format!("'{}' is not a terminator", other.opcode_name()),
            }),
        }
    }

    /// Assigns the phis of `next` for the edge from `pred`. All incoming
    /// values are read before any phi is written.
    fn assign_phis(&mut self, pred: u32, next: u32) -> Result<(), InterpError> {
        let func = self.func;
        let Some(bb) = func.block(next) else {
            return Err(self.no_successor(pred, format!("block {}", next)));
        };
        let mut pending: SmallVec<[(ValueRef, Value); 4]> = SmallVec::new();
        for data in bb.phis() {
            let (Instruction::Phi { incoming }, Some(def)) = (&data.instr, data.value) else {
                continue;
            };
            let (value, _) = incoming
                .iter()
                .find(|(_, b)| *b == pred)
                .ok_or_else(|| self.no_successor(next, format!("phi edge from block {}", pred)))?;
            pending.push((def, self.read(*value)?));
        }
        for (def, v) in pending {
            self.write(def, v);
        }
        Ok(())
    }

    fn clear(&mut self, slots: &[SlotId]) {
        for slot in slots {
            if let Some(s) = self.slots.get_mut(slot.0 as usize) {
                *s = None;
            }
        }
    }

    pub(crate) fn set_slot(&mut self, slot: SlotId, v: Value) {
        if let Some(s) = self.slots.get_mut(slot.0 as usize) {
            *s = Some(v);
        }
    }

    pub(crate) fn read(&self, r: ValueRef) -> Result<Value, InterpError> {
        match self.prepared.frame.value_slot(r) {
            Some(slot) => self
                .slots
                .get(slot.0 as usize)
                .cloned()
                .flatten()
                .ok_or_else(|| InterpError::DeadSlotRead {
                    function: self.func.name.clone(),
                    slot: slot.0,
                }),
            None => self.engine.operand(Some(self.func), r),
        }
    }

    pub(crate) fn write(&mut self, r: ValueRef, v: Value) {
        if let Some(slot) = self.prepared.frame.value_slot(r) {
            self.set_slot(slot, v);
        }
    }

    fn pointer(&self, r: ValueRef, opcode: &str) -> Result<u64, InterpError> {
        let v = self.read(r)?;
        v.as_pointer().ok_or_else(|| unsupported(opcode, &[&v]))
    }

    /// Restores the context saved for `token`, if this activation owns it.
    /// Returns where to continue.
    fn resume(&mut self, token: u64, value: i32) -> Option<(u32, usize)> {
        let ctx = self.saved.iter().find(|c| c.token == token)?.clone();
        trace!(function = %self.func.name, token, value, "longjmp resumes");
        self.slots = ctx.slots;
        if let Some((r, bits)) = ctx.result {
            let v = if value == 0 { 1 } else { value };
            self.write(r, Value::from_bits(bits, v as i128 as u128));
        }
        Some((ctx.block, ctx.index + 1))
    }

    fn execute(
        &mut self,
        block: u32,
        index: usize,
        data: &InstructionData,
    ) -> Result<Option<Value>, InterpError> {
        let engine = self.engine;
        let prepared = self.prepared;
        let module = engine.module();
        let node = prepared
            .nodes
            .get(block as usize)
            .and_then(|b| b.get(index))
            .unwrap_or(&Node::None);
        let value = match &data.instr {
            Instruction::Binary { op, lhs, rhs } => {
                let (a, b) = (self.read(*lhs)?, self.read(*rhs)?);
                match node {
                    Node::Arith(n) => n.execute(&a, &b)?,
                    _ => binary(*op, &a, &b)?,
                }
            }
            Instruction::FNeg { value } => negate(&self.read(*value)?)?,
            Instruction::Cast { op, value, .. } => {
                let v = self.read(*value)?;
                match node {
                    Node::Cast(n) => n.execute(&v)?,
                    _ => return Err(unsupported(op.name(), &[&v])),
                }
            }
            Instruction::Compare { pred, lhs, rhs } => {
                let (a, b) = (self.read(*lhs)?, self.read(*rhs)?);
                match node {
                    Node::Compare(n) => n.execute(&a, &b)?,
                    _ => Value::I1(compare(*pred, &a, &b)?),
                }
            }
            Instruction::Select {
                cond,
                then_value,
                else_value,
            } => select(
                self.read(*cond)?,
                self.read(*then_value)?,
                self.read(*else_value)?,
            )?,
            Instruction::Freeze { value } => self.read(*value)?,
            Instruction::Alloca {
                allocated,
                count,
                align,
            } => {
                let layout = &module.data_layout;
                let n = self.read(*count)?.as_u64().unwrap_or(1);
                let size = layout.alloc_size(&module.types, *allocated).saturating_mul(n);
                let align = u64::from(*align).max(layout.abi_align(&module.types, *allocated));
                let base = engine.memory().allocate(size, align, AllocKind::Stack)?;
                self.stack.push(base);
                self.set_slot(prepared.frame.stack_slot(), Value::Pointer(base));
                Value::Pointer(base)
            }
            Instruction::Load { ptr, ordering, .. } => {
                let address = self.pointer(*ptr, "load")?;
                match node {
                    Node::Load(n) => n.execute(&engine.codec(), engine.memory(), address, *ordering)?,
                    _ => return Err(InterpError::Unsupported { detail: "load without a node".into() }),
                }
            }
            Instruction::Store {
                ptr,
                value,
                ordering,
                ..
            } => {
                let address = self.pointer(*ptr, "store")?;
                let v = self.read(*value)?;
                match node {
                    Node::Store(n) => n.execute(&engine.codec(), engine.memory(), address, &v, *ordering)?,
                    _ => return Err(unsupported("store", &[&v])),
                }
                return Ok(None);
            }
            Instruction::GetElementPtr {
                source_ty,
                base,
                indices,
                ..
            } => {
                let base = self.pointer(*base, "getelementptr")?;
                let indices = indices
                    .iter()
                    .map(|i| self.read(*i))
                    .collect::<Result<Vec<_>, _>>()?;
                Value::Pointer(engine.element_address(*source_ty, base, &indices)?)
            }
            Instruction::ExtractElement { vector, index } => {
                let (v, i) = (self.read(*vector)?, self.read(*index)?);
                self.vector_op(node, &[&v, &i])?
            }
            Instruction::InsertElement {
                vector,
                element,
                index,
            } => {
                let (v, e, i) = (self.read(*vector)?, self.read(*element)?, self.read(*index)?);
                self.vector_op(node, &[&v, &e, &i])?
            }
            Instruction::ShuffleVector { lhs, rhs, mask } => {
                let (a, b, m) = (self.read(*lhs)?, self.read(*rhs)?, self.read(*mask)?);
                self.vector_op(node, &[&a, &b, &m])?
            }
            Instruction::ExtractValue { aggregate, indices } => {
                let mut v = self.read(*aggregate)?;
                for i in indices {
                    v = match v {
                        Value::Aggregate(mut elems) | Value::Vector(mut elems)
                            if (*i as usize) < elems.len() =>
                        {
                            elems.swap_remove(*i as usize)
                        }
                        other => return Err(unsupported("extractvalue", &[&other])),
                    };
                }
                v
            }
            Instruction::InsertValue {
                aggregate,
                value,
                indices,
            } => insert_value(self.read(*aggregate)?, self.read(*value)?, indices)?,
            Instruction::Call { callee, args, .. } => {
                return self.call(block, index, data, *callee, args);
            }
            Instruction::CmpXchg {
                ptr,
                expected,
                new,
                success,
                failure,
                ..
            } => {
                let address = self.pointer(*ptr, "cmpxchg")?;
                let (want, replacement) = (self.read(*expected)?, self.read(*new)?);
                let ty = module
                    .value_type(Some(self.func), *new)
                    .ok_or_else(|| unsupported("cmpxchg", &[&replacement]))?;
                let codec = engine.codec();
                let size = codec.size(ty);
                fence_for(*success);
                let (old, swapped) = engine.memory().with_bytes(address, size, |bytes| {
                    let old = codec.decode(ty, bytes)?;
                    let mut expected_bytes = vec![0u8; bytes.len()];
                    codec.encode(ty, &want, &mut expected_bytes)?;
                    if *bytes == *expected_bytes {
                        codec.encode(ty, &replacement, bytes)?;
                        Ok::<_, InterpError>((old, true))
                    } else {
                        Ok((old, false))
                    }
                })??;
                fence_for(if swapped { *success } else { failure.strongest(*success) });
                Value::Aggregate(vec![old, Value::I1(swapped)])
            }
            Instruction::AtomicRmw {
                op,
                ptr,
                value,
                ordering,
                ..
            } => {
                let address = self.pointer(*ptr, "atomicrmw")?;
                let operand = self.read(*value)?;
                let ty = module
                    .value_type(Some(self.func), *value)
                    .ok_or_else(|| unsupported("atomicrmw", &[&operand]))?;
                let codec = engine.codec();
                fence_for(*ordering);
                let old = engine.memory().with_bytes(address, codec.size(ty), |bytes| {
                    let old = codec.decode(ty, bytes)?;
                    let updated = atomic_rmw(*op, &old, &operand)?;
                    codec.encode(ty, &updated, bytes)?;
                    Ok::<_, InterpError>(old)
                })??;
                fence_for(*ordering);
                old
            }
            Instruction::Fence { ordering } => {
                fence_for(*ordering);
                return Ok(None);
            }
            Instruction::Phi { .. } => return Ok(None),
            terminator => {
                return Err(InterpError::Unsupported {
                    detail: format!("'{}' in the middle of a block", terminator.opcode_name()),
                })
            }
        };
        Ok(Some(value))
    }

    fn vector_op(&self, node: &Node, operands: &[&Value]) -> Result<Value, InterpError> {
        match node {
            Node::Vector(n) => n.execute(operands),
            _ => Err(unsupported("vector", operands)),
        }
    }
}

fn select(cond: Value, then_value: Value, else_value: Value) -> Result<Value, InterpError> {
    match (cond, then_value, else_value) {
        (Value::Vector(mask), Value::Vector(a), Value::Vector(b))
            if mask.len() == a.len() && a.len() == b.len() =>
        {
            let lanes = mask
                .iter()
                .zip(a.into_iter().zip(b))
                .map(|(m, (x, y))| match m.as_bool() {
                    Some(true) => Ok(x),
                    Some(false) => Ok(y),
                    None => Err(unsupported("select", &[m])),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Vector(lanes))
        }
        (Value::Vector(mask), Value::Vector(a), _) => Err(InterpError::InvalidVectorShape {
            opcode: "select".into(),
            expected: mask.len(),
            found: a.len(),
        }),
        (c, x, y) => match c.as_bool() {
            Some(true) => Ok(x),
            Some(false) => Ok(y),
            None => Err(unsupported("select", &[&c])),
        },
    }
}

fn insert_value(aggregate: Value, value: Value, indices: &[u32]) -> Result<Value, InterpError> {
    let Some((&first, rest)) = indices.split_first() else {
        return Ok(value);
    };
    match aggregate {
        Value::Aggregate(mut elems) if (first as usize) < elems.len() => {
            let slot = std::mem::replace(&mut elems[first as usize], Value::I1(false));
            elems[first as usize] = insert_value(slot, value, rest)?;
            Ok(Value::Aggregate(elems))
        }
        other => Err(unsupported("insertvalue", &[&other])),
    }
}

fn atomic_rmw(op: AtomicRmwOp, old: &Value, operand: &Value) -> Result<Value, InterpError> {
    if op == AtomicRmwOp::Xchg {
        return Ok(operand.clone());
    }
    let (Some((bits, a)), Some((_, b))) = (old.int_bits(), operand.int_bits()) else {
        return Err(unsupported("atomicrmw", &[old, operand]));
    };
    let signed = |x: u128| sign_extend_128(bits, x);
    let raw = match op {
        AtomicRmwOp::Add => int_arith_bits(BinOp::Add, bits, a, b)?,
        AtomicRmwOp::Sub => int_arith_bits(BinOp::Sub, bits, a, b)?,
        AtomicRmwOp::And => a & b,
        AtomicRmwOp::Nand => !(a & b) & width_mask(bits),
        AtomicRmwOp::Or => a | b,
        AtomicRmwOp::Xor => a ^ b,
        AtomicRmwOp::Max => if signed(a) >= signed(b) { a } else { b },
        AtomicRmwOp::Min => if signed(a) <= signed(b) { a } else { b },
        AtomicRmwOp::UMax => a.max(b),
        AtomicRmwOp::UMin => a.min(b),
        AtomicRmwOp::Xchg => b,
    };
    Ok(match old {
        Value::Pointer(_) => Value::Pointer(raw as u64),
        _ => Value::from_bits(bits, raw),
    })
}
