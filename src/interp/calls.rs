//! Call instructions: direct and indirect calls, LLVM intrinsics and the
//! C library entry points the interpreter handles itself.

use tracing::{debug, info};

use super::activation::{Activation, SavedContext};
use super::memory::decode_function_address;
use super::nodes::unsupported;
use super::value::Value;
use crate::error::InterpError;
use crate::ir::{Function, InstructionData, ValueRef};

/// Exit status reported for `abort()` (128 + SIGABRT).
pub const ABORT_EXIT_CODE: i32 = 134;

/// Declarations with built-in behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    MemCopy,
    MemMove,
    MemSet,
    /// Debug-info and lifetime markers.
    NoOp,
    SetJmp,
    LongJmp,
    Exit,
    Abort,
}

pub fn builtin(name: &str) -> Option<Builtin> {
    let b = match name {
        n if n.starts_with("llvm.memcpy.") => Builtin::MemCopy,
        n if n.starts_with("llvm.memmove.") => Builtin::MemMove,
        n if n.starts_with("llvm.memset.") => Builtin::MemSet,
        n if n.starts_with("llvm.dbg.") || n.starts_with("llvm.lifetime.") => Builtin::NoOp,
        "setjmp" | "_setjmp" => Builtin::SetJmp,
        "longjmp" | "_longjmp" => Builtin::LongJmp,
        "exit" | "_exit" | "_Exit" => Builtin::Exit,
        "abort" => Builtin::Abort,
        _ => return None,
    };
    Some(b)
}

fn arg<'a>(name: &str, args: &'a [Value], index: usize, expected: usize) -> Result<&'a Value, InterpError> {
    args.get(index).ok_or_else(|| InterpError::ArityMismatch {
        function: name.to_string(),
        expected,
        found: args.len(),
    })
}

fn pointer_arg(name: &str, args: &[Value], index: usize, expected: usize) -> Result<u64, InterpError> {
    let v = arg(name, args, index, expected)?;
    v.as_pointer().ok_or_else(|| unsupported(name, &[v]))
}

fn int_arg(name: &str, args: &[Value], index: usize, expected: usize) -> Result<i128, InterpError> {
    let v = arg(name, args, index, expected)?;
    v.as_signed().ok_or_else(|| unsupported(name, &[v]))
}

impl Activation<'_> {
    /// Executes a call instruction at `block[index]`.
    pub(crate) fn call(
        &mut self,
        block: u32,
        index: usize,
        data: &InstructionData,
        callee: ValueRef,
        args: &[ValueRef],
    ) -> Result<Option<Value>, InterpError> {
        let target = self.read(callee)?;
        let id = target
            .as_pointer()
            .and_then(decode_function_address)
            .ok_or_else(|| match target.as_pointer() {
                Some(address) => InterpError::InvalidAddress { address, len: 0 },
                None => unsupported("call", &[&target]),
            })?;
        let engine = self.engine;
        let func = engine
            .module()
            .function(id)
            .ok_or_else(|| InterpError::UnknownFunction { name: id.to_string() })?;
        let values = args
            .iter()
            .map(|a| self.read(*a))
            .collect::<Result<Vec<_>, _>>()?;

        if !func.is_definition() {
            if let Some(b) = builtin(&func.name) {
                return self.call_builtin(b, func, block, index, data, &values);
            }
        }
        engine.invoke(id, values, self.depth + 1)
    }

    fn call_builtin(
        &mut self,
        b: Builtin,
        func: &Function,
        block: u32,
        index: usize,
        data: &InstructionData,
        args: &[Value],
    ) -> Result<Option<Value>, InterpError> {
        let name = func.name.as_str();
        let memory = self.engine.memory();
        match b {
            Builtin::MemCopy | Builtin::MemMove => {
                let dst = pointer_arg(name, args, 0, 3)?;
                let src = pointer_arg(name, args, 1, 3)?;
                let len = int_arg(name, args, 2, 3)? as u64;
                memory.copy(dst, src, len)?;
                Ok(None)
            }
            Builtin::MemSet => {
                let dst = pointer_arg(name, args, 0, 3)?;
                let byte = int_arg(name, args, 1, 3)? as u8;
                let len = int_arg(name, args, 2, 3)? as u64;
                memory.fill(dst, byte, len)?;
                Ok(None)
            }
            Builtin::NoOp => Ok(None),
            Builtin::SetJmp => {
                let buffer = pointer_arg(name, args, 0, 1)?;
                let token = self.engine.fresh_jump_token();
                memory.write(buffer, &token.to_le_bytes())?;
                let bits = self.engine.module().types.int_width(data.ty).unwrap_or(32);
                self.saved.push(SavedContext {
                    token,
                    block,
                    index,
                    result: data.value.map(|r| (r, bits)),
                    slots: self.slots.clone(),
                });
                debug!(function = %self.func.name, token, "setjmp");
                Ok(Some(Value::from_bits(bits, 0)))
            }
            Builtin::LongJmp => {
                let buffer = pointer_arg(name, args, 0, 2)?;
                let value = int_arg(name, args, 1, 2)? as i32;
                let bytes = memory.read(buffer, 8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes);
                Err(InterpError::Longjmp {
                    token: u64::from_le_bytes(raw),
                    value,
                })
            }
            Builtin::Exit => {
                let code = int_arg(name, args, 0, 1)? as i32;
                info!(code, "exit called");
                Err(InterpError::Exit { code })
            }
            Builtin::Abort => {
                info!("abort called");
                Err(InterpError::Exit {
                    code: ABORT_EXIT_CODE,
                })
            }
        }
    }
}
