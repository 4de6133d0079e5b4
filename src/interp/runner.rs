//! Whole-program execution: static constructors, the entry point with its
//! `argc`/`argv`/`envp` arguments, static destructors and exit codes.

use std::fmt;

use tracing::{debug, info};

use super::engine::Engine;
use super::memory::{decode_function_address, AllocKind};
use super::value::Value;
use crate::error::InterpError;
use crate::ir::Function;

/// Which of `(argc, argv, envp)` the entry point takes, from its arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryArgs {
    None,
    Count,
    CountAndArgv,
    CountArgvEnv,
}

impl EntryArgs {
    pub fn for_function(func: &Function) -> Result<Self, InterpError> {
        Ok(match func.params.len() {
            0 => EntryArgs::None,
            1 => EntryArgs::Count,
            2 => EntryArgs::CountAndArgv,
            3 => EntryArgs::CountArgvEnv,
            found => {
                return Err(InterpError::ArityMismatch {
                    function: func.name.clone(),
                    expected: 3,
                    found,
                })
            }
        })
    }
}

/// How a program run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The entry point returned normally.
    Returned(Option<Value>),
    /// `exit` or `abort` was called.
    Exited(i32),
}

impl RunOutcome {
    /// Process exit status: the carried code, or the entry point's integer
    /// result truncated to 32 bits (0 for `void`).
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Exited(code) => *code,
            RunOutcome::Returned(Some(v)) => v.as_signed().map(|c| c as i32).unwrap_or(0),
            RunOutcome::Returned(None) => 0,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Returned(Some(v)) => write!(f, "returned {}", v),
            RunOutcome::Returned(None) => write!(f, "returned"),
            RunOutcome::Exited(code) => write!(f, "exited with code {}", code),
        }
    }
}

impl Engine {
    /// Runs the configured entry point as a program.
    ///
    /// The per-run arena is reset first and released afterwards whatever the
    /// outcome.
    pub fn run(&self, args: &[&str], env: &[&str]) -> Result<RunOutcome, InterpError> {
        let stale = self.memory().release_kind(AllocKind::Arena);
        if stale > 0 {
            debug!(stale, "arena reset");
        }
        let outcome = self.on_interpreter_stack(|| self.run_program(args, env));
        let freed = self.memory().release_kind(AllocKind::Arena);
        debug!(freed, "arena released");
        match outcome {
            Err(InterpError::Exit { code }) => {
                info!(code, "program exited");
                Ok(RunOutcome::Exited(code))
            }
            Err(InterpError::Longjmp { token, .. }) => Err(InterpError::LongjmpEscaped { token }),
            other => other,
        }
    }

    fn run_program(&self, args: &[&str], env: &[&str]) -> Result<RunOutcome, InterpError> {
        self.initialize_globals()?;
        self.run_structors("llvm.global_ctors")?;

        let name = &self.config().entry_point;
        let entry = self
            .module()
            .function_by_name(name)
            .ok_or_else(|| InterpError::UnknownFunction { name: name.clone() })?;
        let shape = EntryArgs::for_function(entry)?;
        let mut values = Vec::with_capacity(3);
        if shape >= EntryArgs::Count {
            let bits = entry
                .params
                .first()
                .and_then(|p| self.module().types.int_width(p.ty))
                .unwrap_or(32);
            values.push(Value::from_bits(bits, args.len() as u128));
        }
        if shape >= EntryArgs::CountAndArgv {
            values.push(Value::Pointer(self.string_block(args)?));
        }
        if shape >= EntryArgs::CountArgvEnv {
            values.push(Value::Pointer(self.string_block(env)?));
        }

        info!(entry = %entry.name, args = args.len(), "running program");
        let result = self.invoke(entry.id, values, 0)?;
        self.run_structors("llvm.global_dtors")?;
        let outcome = RunOutcome::Returned(result);
        info!(code = outcome.exit_code(), "program returned");
        Ok(outcome)
    }

    /// Copies `strings` into the arena as a NULL-terminated array of
    /// NUL-terminated strings and returns the array's address.
    fn string_block(&self, strings: &[&str]) -> Result<u64, InterpError> {
        let memory = self.memory();
        let layout = &self.module().data_layout;
        let width = layout.pointer_size().clamp(1, 8);
        let table = memory.allocate(width * (strings.len() as u64 + 1), width, AllocKind::Arena)?;
        for (i, s) in strings.iter().enumerate() {
            let mut bytes = s.as_bytes().to_vec();
            bytes.push(0);
            let address = memory.allocate(bytes.len() as u64, 1, AllocKind::Arena)?;
            memory.write(address, &bytes)?;
            let encoded = if layout.little_endian {
                address.to_le_bytes()
            } else {
                address.to_be_bytes()
            };
            let slot = &encoded[if layout.little_endian { 0 } else { 8 - width as usize }..];
            memory.write(table + width * i as u64, &slot[..width as usize])?;
        }
        Ok(table)
    }

    /// Calls the functions listed in `llvm.global_ctors`/`llvm.global_dtors`
    /// in ascending priority; equal priorities keep their listed order.
    fn run_structors(&self, list: &str) -> Result<(), InterpError> {
        let Some(global) = self.module().global_by_name(list) else {
            return Ok(());
        };
        let Some(symbol) = global.initializer.and_then(|r| r.get()) else {
            return Ok(());
        };
        let Value::Aggregate(entries) = self.symbol_value(symbol)? else {
            return Ok(());
        };
        let mut calls = Vec::with_capacity(entries.len());
        for entry in &entries {
            let Value::Aggregate(fields) = entry else { continue };
            let priority = fields.first().and_then(Value::as_signed).unwrap_or(i128::MAX);
            let target = fields
                .get(1)
                .and_then(Value::as_pointer)
                .and_then(decode_function_address);
            if let Some(id) = target {
                calls.push((priority, id));
            }
        }
        calls.sort_by_key(|(priority, _)| *priority);
        for (priority, id) in calls {
            debug!(list, priority = priority as i64, function = %id, "static structor");
            self.invoke(id, Vec::new(), 0)?;
        }
        Ok(())
    }
}
