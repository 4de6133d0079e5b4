//! Runtime configuration for decoding and execution.
//!
//! Both option sets have sensible defaults and can be overridden from the
//! process environment (`BCVM_*` variables), which is how embedders and the
//! test suite tune them without threading flags through every call.

use std::env;

/// Options that control how a bitcode module is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// Run the structural verifier over every decoded function body.
    pub verify: bool,
    /// Treat unknown record codes inside recognized blocks as errors instead
    /// of logging and skipping them.
    pub strict_records: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            verify: true,
            strict_records: false,
        }
    }
}

impl ParseOptions {
    /// Defaults overridden by `BCVM_VERIFY` and `BCVM_STRICT_RECORDS`.
    pub fn from_env() -> Self {
        let mut opts = Self::default();
        if let Some(v) = env_flag("BCVM_VERIFY") {
            opts.verify = v;
        }
        if let Some(v) = env_flag("BCVM_STRICT_RECORDS") {
            opts.strict_records = v;
        }
        opts
    }
}

/// Options that control the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Count every CFG edge traversal (profiling only, never affects results).
    pub branch_profiling: bool,
    /// Maximum nesting of interpreted calls before `StackOverflow`.
    pub max_call_depth: usize,
    /// Name of the function the runner invokes.
    pub entry_point: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            branch_profiling: true,
            max_call_depth: 512,
            entry_point: "main".to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `BCVM_BRANCH_PROFILING`, `BCVM_MAX_CALL_DEPTH`
    /// and `BCVM_ENTRY`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_flag("BCVM_BRANCH_PROFILING") {
            cfg.branch_profiling = v;
        }
        if let Some(depth) = env_count("BCVM_MAX_CALL_DEPTH") {
            cfg.max_call_depth = depth;
        }
        if let Ok(entry) = env::var("BCVM_ENTRY") {
            if !entry.trim().is_empty() {
                cfg.entry_point = entry.trim().to_string();
            }
        }
        cfg
    }

    /// Builder-style setter, handy in tests.
    pub fn with_entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry_point = name.into();
        self
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let raw = env::var(name).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            tracing::warn!(variable = name, value = other, "ignoring unrecognized boolean override");
            None
        }
    }
}

fn env_count(name: &str) -> Option<usize> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!(variable = name, value = raw.trim(), error = %e, "ignoring unparsable count override");
            None
        }
    }
}

