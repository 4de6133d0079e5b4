//! In-memory program model.
//!
//! A [`Module`](module::Module) owns flat arenas (types, globals, functions,
//! aliases, constants) addressed by index. Values are numbered the way the
//! bitstream numbers them, so decoded references need no translation.

pub mod block;
pub mod builder;
pub mod constant;
pub mod function;
pub mod instr;
pub mod layout;
pub mod metadata;
pub mod module;
pub mod types;
pub mod value;

pub use block::{BasicBlock, InstructionData};
pub use builder::FunctionBuilder;
pub use constant::{extend_sign, BlockAddress, Constant, ConstantKind};
pub use function::{Function, Param};
pub use instr::{AtomicOrdering, AtomicRmwOp, BinOp, CastOp, CmpPredicate, Instruction, RETURN_SUCCESSOR};
pub use layout::DataLayout;
pub use metadata::{MetadataBlock, MetadataNode, MetadataRef, NamedMetadata};
pub use module::{FormatVersion, GlobalAlias, GlobalVariable, Module};
pub use types::{FloatKind, StructType, Type, TypeId, TypeTable};
pub use value::{
    AliasId, ConstId, FunctionId, GlobalId, Linkage, LocalValue, ReplaceOperand, Replacement,
    Resolution, Symbol, ValueRef, Visibility,
};
