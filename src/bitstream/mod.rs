//! Bitstream container layer: bit cursor, abbreviations, block traversal and
//! the matching writer.

pub mod abbrev;
pub mod reader;
pub mod scanner;
pub mod writer;

pub use abbrev::{AbbrevOp, Abbreviation, Record};
pub use reader::BitReader;
pub use scanner::{BlockKind, BlockListener, BlockParser};
pub use writer::BitWriter;
