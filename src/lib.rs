//! bcvm: an interpreter for LLVM bitcode modules.
//!
//! Pipeline:
//!
//! ```text
//! bytes (.bc) → BlockParser → [records] → ModuleBuilder → [ir::Module]
//!   → FrameDescriptor (slots + liveness) → Engine → result / exit code
//! ```
//!
//! Stages:
//! 1. `bitstream` - bit cursor, abbreviations, block traversal and the writer
//! 2. `decode`    - per-block handlers building the program model
//! 3. `verify`    - structural checks on decoded bodies
//! 4. `frame`     - slot allocation and dead-value nulling sets
//! 5. `interp`    - block dispatch over self-specializing operation nodes
//!
//! `writer` serializes a model back to bitcode.

pub mod bitstream;
pub mod config;
pub mod decode;
pub mod error;
pub mod frame;
pub mod interp;
pub mod ir;
pub mod verify;
pub mod writer;

pub use config::{EngineConfig, ParseOptions};
pub use error::Error;
pub use interp::{Engine, RunOutcome};
pub use ir::Module;

/// Decodes a bitcode buffer (raw or wrapped) with options taken from the
/// environment.
pub fn parse_bitcode(bytes: &[u8]) -> Result<Module, Error> {
    decode::parse_module(bytes, &ParseOptions::from_env())
}

/// Decodes `bytes` and prepares an engine for it.
///
/// Returns an `Error` if decoding, verification or global allocation fails.
pub fn load(bytes: &[u8], options: &ParseOptions, config: EngineConfig) -> Result<Engine, Error> {
    let module = decode::parse_module(bytes, options)?;
    Ok(Engine::new(module, config)?)
}

/// Decodes `bytes` and runs its entry point as a program.
pub fn run_bitcode(bytes: &[u8], args: &[&str], env: &[&str]) -> Result<RunOutcome, Error> {
    let engine = load(bytes, &ParseOptions::from_env(), EngineConfig::from_env())?;
    Ok(engine.run(args, env)?)
}
