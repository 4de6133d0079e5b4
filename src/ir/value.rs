use std::fmt;

use crate::error::ParseError;

/// Absolute value number: module symbols first, then (inside a function)
/// parameters, function-local constants and instruction results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueRef(pub u32);

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AliasId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstId(pub u32);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// An entry of the module-level symbol list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    Global(GlobalId),
    Function(FunctionId),
    Alias(AliasId),
    Constant(ConstId),
}

impl Symbol {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Symbol::Global(_) => "global variable",
            Symbol::Function(_) => "function",
            Symbol::Alias(_) => "alias",
            Symbol::Constant(_) => "constant",
        }
    }
}

/// An entry of a function's local value list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalValue {
    Param(u32),
    Constant(ConstId),
    Instruction { block: u32, index: u32 },
}

/// What a forward reference resolves to once its symbol exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replacement {
    pub symbol: Symbol,
    /// Only meaningful for functions: `true` if the function has a body.
    pub is_definition: bool,
}

/// A reference that may still be waiting for its symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<T> {
    /// Placeholder: absolute symbol index not yet patched.
    Pending(u32),
    Resolved(T),
}

impl<T: Copy> Resolution<T> {
    pub fn get(&self) -> Option<T> {
        match self {
            Resolution::Resolved(v) => Some(*v),
            Resolution::Pending(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Resolution::Pending(_))
    }
}

/// Holders of forward references. Resolution calls `replace` once the
/// referenced symbol exists.
pub trait ReplaceOperand {
    /// Human-readable identity for diagnostics.
    fn describe(&self) -> String;

    /// Swaps the placeholder for symbol index `original` with `replacement`.
    /// Fails when the replacement is not the kind of symbol the holder needs.
    fn replace(&mut self, original: u32, replacement: Replacement) -> Result<(), ParseError>;

    /// Indices of placeholders still waiting.
    fn pending(&self) -> Vec<u32>;
}

/// Linkage as encoded in module records; only the distinctions the
/// interpreter cares about are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Linkage {
    #[default]
    External,
    Internal,
    Private,
    Weak,
    LinkOnce,
    Common,
    Appending,
    ExternalWeak,
    AvailableExternally,
}

impl Linkage {
    pub fn from_code(code: u64) -> Self {
        match code {
            0 | 5 | 6 | 15 => Linkage::External,
            2 => Linkage::Appending,
            3 => Linkage::Internal,
            9 => Linkage::Private,
            1 | 16 | 10 | 17 => Linkage::Weak,
            4 | 11 | 18 | 19 => Linkage::LinkOnce,
            7 => Linkage::ExternalWeak,
            8 => Linkage::Common,
            12 => Linkage::AvailableExternally,
            13 | 14 => Linkage::Private,
            _ => Linkage::External,
        }
    }

    pub fn code(self) -> u64 {
        match self {
            Linkage::External => 0,
            Linkage::Appending => 2,
            Linkage::Internal => 3,
            Linkage::ExternalWeak => 7,
            Linkage::Common => 8,
            Linkage::Private => 9,
            Linkage::AvailableExternally => 12,
            Linkage::Weak => 16,
            Linkage::LinkOnce => 18,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Visibility {
    #[default]
    Default,
    Hidden,
    Protected,
}

impl Visibility {
    pub fn from_code(code: u64) -> Self {
        match code {
            1 => Visibility::Hidden,
            2 => Visibility::Protected,
            _ => Visibility::Default,
        }
    }

    pub fn code(self) -> u64 {
        match self {
            Visibility::Default => 0,
            Visibility::Hidden => 1,
            Visibility::Protected => 2,
        }
    }
}
