//! Self-specializing block interpreter.
//!
//! [`Engine`] loads a module and owns everything shared between calls:
//! program memory, global storage, prepared frames and the operation nodes.
//! Each call creates an activation whose slot array is private to it; the
//! block dispatch loop in [`activation`] drives the nodes in [`nodes`].

mod activation;
pub mod calls;
pub mod engine;
pub mod memory;
pub mod nodes;
pub mod runner;
pub mod value;

pub use calls::{builtin, Builtin, ABORT_EXIT_CODE};
pub use engine::{Engine, ExternalFunction, NodeReport};
pub use memory::{AllocKind, Memory};
pub use nodes::{NodeState, Specializing};
pub use runner::{EntryArgs, RunOutcome};
pub use value::{TypeTag, Value};
