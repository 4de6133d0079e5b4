//! Structural verifier for decoded function bodies.
//!
//! Runs after forward references are resolved. It rejects anything the
//! interpreter would otherwise trip over halfway through execution.
//!
//! Checks, per defined function:
//! 1. Every block ends with exactly one terminator, as its last instruction.
//! 2. Every successor names a block of the function.
//! 3. Phis appear only at the start of a block, and each incoming edge comes
//!    from a predecessor.
//! 4. Every operand names a module symbol or a local of the function.
//! 5. `ret` carries a value exactly when the return type is not void.

use crate::error::ParseError;
use crate::ir::{Function, Instruction, Module, RETURN_SUCCESSOR};

/// Verifies every defined function of `module`.
pub fn verify_module(module: &Module) -> Result<(), ParseError> {
    for func in module.defined_functions() {
        verify_function(module, func)?;
    }
    Ok(())
}

pub fn verify_function(module: &Module, func: &Function) -> Result<(), ParseError> {
    let fail = |detail: String| ParseError::Verification {
        function: func.name.clone(),
        detail,
    };
    if func.blocks.is_empty() {
        return Err(fail("defined function has no blocks".into()));
    }
    let block_count = func.blocks.len() as u32;
    let value_limit = func.local_base + func.locals.len() as u32;
    let returns_value = !module.types.is_void(func.return_ty);
    let preds = func.predecessors();

    for (b, block) in func.blocks.iter().enumerate() {
        let Some(last) = block.instrs.last() else {
            return Err(fail(format!("block {} is empty", b)));
        };
        if !last.instr.is_terminator() {
            return Err(fail(format!("block {} does not end with a terminator", b)));
        }
        let first_non_phi = block.first_non_phi();
        for (i, data) in block.instrs.iter().enumerate() {
            let instr = &data.instr;
            if instr.is_terminator() && i + 1 != block.instrs.len() {
                return Err(fail(format!("terminator in the middle of block {}", b)));
            }
            if instr.is_phi() && i >= first_non_phi {
                return Err(fail(format!("phi after a non-phi instruction in block {}", b)));
            }
            for succ in instr.successors() {
                if succ != RETURN_SUCCESSOR && succ >= block_count {
                    return Err(fail(format!("block {} branches to missing block {}", b, succ)));
                }
            }
            for operand in instr.operands() {
                if operand.0 >= value_limit {
                    return Err(fail(format!(
                        "{} in block {} uses undefined value {}",
                        instr.opcode_name(),
                        b,
                        operand
                    )));
                }
            }
            match instr {
                Instruction::Phi { incoming } => {
                    for (_, from) in incoming {
                        if !preds[b].contains(from) {
                            return Err(fail(format!(
                                "phi in block {} names block {}, which is not a predecessor",
                                b, from
                            )));
                        }
                    }
                }
                Instruction::Ret { value } if value.is_some() != returns_value => {
                    return Err(fail(format!("return in block {} does not match the return type", b)));
                }
                _ => {}
            }
        }
    }
    Ok(())
}
