use thiserror::Error;

/// Top-level error type for the decode and execution pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{}", format_error_pretty("bitstream error", &format!("{}", _0)))]
    Bitstream(#[from] BitstreamError),

    #[error("{}", format_error_pretty("format error", &format!("{}", _0)))]
    Parse(#[from] ParseError),

    #[error("{}", format_error_pretty("write error", &format!("{}", _0)))]
    Write(#[from] WriteError),

    #[error("{}", format_error_pretty("runtime error", &format!("{}", _0)))]
    Interp(#[from] InterpError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Formats a pipeline error in a human-friendly style.
fn format_error_pretty(category: &str, msg: &str) -> String {
    format!("[{}] {}", category, msg)
}

/// Utility: describes a bit offset as byte and bit position.
pub fn describe_bit_position(bit: u64) -> String {
    format!("byte {}, bit {}", bit / 8, bit % 8)
}

// ---------------------------------------------------------------------------
// Bitstream errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BitstreamError {
    #[error("truncated stream: needed {requested} bits at {} but only {remaining} remain in the enclosing scope", describe_bit_position(*position))]
    TruncatedStream {
        requested: u64,
        position: u64,
        remaining: u64,
    },

    #[error("bad magic number 0x{found:08x}: this is neither a raw bitcode file nor a bitcode wrapper")]
    BadMagic { found: u32 },

    #[error("abbreviation id {id} is not defined in block {block} at {}", describe_bit_position(*position))]
    UndefinedAbbreviation { id: u64, block: u32, position: u64 },

    #[error("invalid abbreviation operand encoding {encoding} at {}", describe_bit_position(*position))]
    InvalidAbbreviationEncoding { encoding: u64, position: u64 },

    #[error("variable-width integer does not fit in 64 bits at {}", describe_bit_position(*position))]
    VbrOverflow { position: u64 },

    #[error("END_BLOCK with no open block at {}", describe_bit_position(*position))]
    UnbalancedBlock { position: u64 },

    #[error("blob read requires byte alignment, cursor is at {}", describe_bit_position(*position))]
    UnalignedBlob { position: u64 },
}

// ---------------------------------------------------------------------------
// Format (model building) errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed {block} record (code {code}): {detail}")]
    InvalidRecord {
        block: &'static str,
        code: u32,
        detail: String,
    },

    #[error("type index {index} does not name an entry of the type table")]
    UnknownType { index: u64 },

    #[error("forward reference to symbol {index} from {holder} was never resolved; the module ended before the symbol was defined")]
    ForwardReferenceUnresolved { index: u64, holder: String },

    #[error("forward reference resolved to the wrong kind of symbol: {holder} expected {expected} but found {found}")]
    ReplacementKindMismatch {
        holder: String,
        expected: &'static str,
        found: String,
    },

    #[error("instruction record code {code} in function '{function}' is not supported")]
    UnsupportedInstruction { code: u32, function: String },

    #[error("function body block has no pending definition to attach to; the module declares {declared} bodies")]
    MissingFunctionBody { declared: usize },

    #[error("in function '{function}': {detail}")]
    Verification { function: String, detail: String },
}

// ---------------------------------------------------------------------------
// Writer errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("in function '{function}': operand %{value} is neither a module symbol nor a local value")]
    UnknownValue { function: String, value: u32 },

    #[error("{holder} refers to a symbol missing from the module symbol list")]
    UnnumberedSymbol { holder: String },
}

// ---------------------------------------------------------------------------
// Interpreter errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InterpError {
    #[error("operation '{opcode}' has no implementation for operand types ({types})")]
    UnsupportedOperandType { opcode: String, types: String },

    #[error("division by zero in '{opcode}'")]
    DivisionByZero { opcode: String },

    #[error("in function '{function}': block {block} has no successor matching branch outcome {outcome}")]
    NoMatchingSuccessor {
        function: String,
        block: u32,
        outcome: String,
    },

    #[error("vector shape mismatch in '{opcode}': expected {expected} lanes but found {found}")]
    InvalidVectorShape {
        opcode: String,
        expected: usize,
        found: usize,
    },

    #[error("in function '{function}': read of slot {slot} which holds no value")]
    DeadSlotRead { function: String, slot: u32 },

    #[error("call to '{name}', which has no body and no registered external implementation")]
    UnknownFunction { name: String },

    #[error("invalid memory access of {len} bytes at address 0x{address:x}")]
    InvalidAddress { address: u64, len: u64 },

    #[error("in function '{function}': reached an unreachable instruction")]
    Unreachable { function: String },

    #[error("call depth limit of {limit} exceeded")]
    StackOverflow { limit: usize },

    #[error("longjmp to target {token} escaped the activation that saved it")]
    LongjmpEscaped { token: u64 },

    #[error("call to '{function}' passes {found} arguments but {expected} are required")]
    ArityMismatch {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("unsupported operation: {detail}")]
    Unsupported { detail: String },

    #[error("allocation of {size} bytes exceeds the {limit}-byte limit or the data address range")]
    AllocationTooLarge { size: u64, limit: u64 },

    /// Control signal raised by `exit`/`abort`; the runner turns it into an exit code.
    #[error("program exited with code {code}")]
    Exit { code: i32 },

    /// Control signal raised by `longjmp`; unwinds to the activation owning `token`.
    #[error("longjmp to target {token} with value {value}")]
    Longjmp { token: u64, value: i32 },
}

impl InterpError {
    /// Returns `true` for the two non-local control transfer signals.
    pub fn is_control_signal(&self) -> bool {
        matches!(self, InterpError::Exit { .. } | InterpError::Longjmp { .. })
    }
}

impl Error {
    /// Returns a stable diagnostic code for this error (e.g. `"E0101"`).
    pub fn diagnostic_code(&self) -> &'static str {
        match self {
            Error::Bitstream(b) => match b {
                BitstreamError::TruncatedStream { .. } => "E0100",
                BitstreamError::BadMagic { .. } => "E0101",
                BitstreamError::UndefinedAbbreviation { .. } => "E0102",
                BitstreamError::InvalidAbbreviationEncoding { .. } => "E0103",
                BitstreamError::VbrOverflow { .. } => "E0104",
                BitstreamError::UnbalancedBlock { .. } => "E0105",
                BitstreamError::UnalignedBlob { .. } => "E0106",
            },
            Error::Parse(p) => match p {
                ParseError::InvalidRecord { .. } => "E0200",
                ParseError::UnknownType { .. } => "E0201",
                ParseError::ForwardReferenceUnresolved { .. } => "E0202",
                ParseError::ReplacementKindMismatch { .. } => "E0203",
                ParseError::UnsupportedInstruction { .. } => "E0204",
                ParseError::MissingFunctionBody { .. } => "E0205",
                ParseError::Verification { .. } => "E0206",
            },
            Error::Write(w) => match w {
                WriteError::UnknownValue { .. } => "E0300",
                WriteError::UnnumberedSymbol { .. } => "E0301",
            },
            Error::Interp(i) => match i {
                InterpError::UnsupportedOperandType { .. } => "E0400",
                InterpError::DivisionByZero { .. } => "E0401",
                InterpError::NoMatchingSuccessor { .. } => "E0402",
                InterpError::InvalidVectorShape { .. } => "E0403",
                InterpError::DeadSlotRead { .. } => "E0404",
                InterpError::UnknownFunction { .. } => "E0405",
                InterpError::InvalidAddress { .. } => "E0406",
                InterpError::Unreachable { .. } => "E0407",
                InterpError::StackOverflow { .. } => "E0408",
                InterpError::LongjmpEscaped { .. } => "E0409",
                InterpError::ArityMismatch { .. } => "E0410",
                InterpError::Unsupported { .. } => "E0411",
                InterpError::Exit { .. } => "E0412",
                InterpError::Longjmp { .. } => "E0413",
                InterpError::AllocationTooLarge { .. } => "E0414",
            },
            Error::Io(_) => "E0500",
        }
    }
}
