use smallvec::SmallVec;

use crate::ir::types::TypeId;
use crate::ir::value::ValueRef;

/// Two-operand arithmetic and bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

impl BinOp {
    /// Decodes a record opcode; `float` selects the floating interpretation
    /// of the shared codes.
    pub fn from_code(code: u64, float: bool) -> Option<Self> {
        Some(match (code, float) {
            (0, false) => BinOp::Add,
            (0, true) => BinOp::FAdd,
            (1, false) => BinOp::Sub,
            (1, true) => BinOp::FSub,
            (2, false) => BinOp::Mul,
            (2, true) => BinOp::FMul,
            (3, false) => BinOp::UDiv,
            (4, false) => BinOp::SDiv,
            (4, true) => BinOp::FDiv,
            (5, false) => BinOp::URem,
            (6, false) => BinOp::SRem,
            (6, true) => BinOp::FRem,
            (7, false) => BinOp::Shl,
            (8, false) => BinOp::LShr,
            (9, false) => BinOp::AShr,
            (10, false) => BinOp::And,
            (11, false) => BinOp::Or,
            (12, false) => BinOp::Xor,
            _ => return None,
        })
    }

    pub fn code(self) -> u64 {
        match self {
            BinOp::Add | BinOp::FAdd => 0,
            BinOp::Sub | BinOp::FSub => 1,
            BinOp::Mul | BinOp::FMul => 2,
            BinOp::UDiv => 3,
            BinOp::SDiv | BinOp::FDiv => 4,
            BinOp::URem => 5,
            BinOp::SRem | BinOp::FRem => 6,
            BinOp::Shl => 7,
            BinOp::LShr => 8,
            BinOp::AShr => 9,
            BinOp::And => 10,
            BinOp::Or => 11,
            BinOp::Xor => 12,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv | BinOp::FRem
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::UDiv => "udiv",
            BinOp::SDiv => "sdiv",
            BinOp::URem => "urem",
            BinOp::SRem => "srem",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
            BinOp::FRem => "frem",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpToUi,
    FpToSi,
    UiToFp,
    SiToFp,
    FpTrunc,
    FpExt,
    PtrToInt,
    IntToPtr,
    BitCast,
    AddrSpaceCast,
}

impl CastOp {
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => CastOp::Trunc,
            1 => CastOp::ZExt,
            2 => CastOp::SExt,
            3 => CastOp::FpToUi,
            4 => CastOp::FpToSi,
            5 => CastOp::UiToFp,
            6 => CastOp::SiToFp,
            7 => CastOp::FpTrunc,
            8 => CastOp::FpExt,
            9 => CastOp::PtrToInt,
            10 => CastOp::IntToPtr,
            11 => CastOp::BitCast,
            12 => CastOp::AddrSpaceCast,
            _ => return None,
        })
    }

    pub fn code(self) -> u64 {
        self as u64
    }

    pub fn name(self) -> &'static str {
        match self {
            CastOp::Trunc => "trunc",
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::FpToUi => "fptoui",
            CastOp::FpToSi => "fptosi",
            CastOp::UiToFp => "uitofp",
            CastOp::SiToFp => "sitofp",
            CastOp::FpTrunc => "fptrunc",
            CastOp::FpExt => "fpext",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::IntToPtr => "inttoptr",
            CastOp::BitCast => "bitcast",
            CastOp::AddrSpaceCast => "addrspacecast",
        }
    }
}

/// Comparison predicates; float predicates use codes 0-15, integer 32-41.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpPredicate {
    FFalse,
    FOeq,
    FOgt,
    FOge,
    FOlt,
    FOle,
    FOne,
    FOrd,
    FUno,
    FUeq,
    FUgt,
    FUge,
    FUlt,
    FUle,
    FUne,
    FTrue,
    IEq,
    INe,
    IUgt,
    IUge,
    IUlt,
    IUle,
    ISgt,
    ISge,
    ISlt,
    ISle,
}

impl CmpPredicate {
    const FLOAT: [CmpPredicate; 16] = [
        CmpPredicate::FFalse,
        CmpPredicate::FOeq,
        CmpPredicate::FOgt,
        CmpPredicate::FOge,
        CmpPredicate::FOlt,
        CmpPredicate::FOle,
        CmpPredicate::FOne,
        CmpPredicate::FOrd,
        CmpPredicate::FUno,
        CmpPredicate::FUeq,
        CmpPredicate::FUgt,
        CmpPredicate::FUge,
        CmpPredicate::FUlt,
        CmpPredicate::FUle,
        CmpPredicate::FUne,
        CmpPredicate::FTrue,
    ];
    const INT: [CmpPredicate; 10] = [
        CmpPredicate::IEq,
        CmpPredicate::INe,
        CmpPredicate::IUgt,
        CmpPredicate::IUge,
        CmpPredicate::IUlt,
        CmpPredicate::IUle,
        CmpPredicate::ISgt,
        CmpPredicate::ISge,
        CmpPredicate::ISlt,
        CmpPredicate::ISle,
    ];

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0..=15 => Some(Self::FLOAT[code as usize]),
            32..=41 => Some(Self::INT[(code - 32) as usize]),
            _ => None,
        }
    }

    pub fn code(self) -> u64 {
        if let Some(i) = Self::FLOAT.iter().position(|&p| p == self) {
            return i as u64;
        }
        Self::INT.iter().position(|&p| p == self).map(|i| i as u64 + 32).unwrap_or(0)
    }

    pub fn is_float(self) -> bool {
        self.code() < 32
    }

    pub fn name(self) -> &'static str {
        match self {
            CmpPredicate::FFalse => "fcmp false",
            CmpPredicate::FOeq => "fcmp oeq",
            CmpPredicate::FOgt => "fcmp ogt",
            CmpPredicate::FOge => "fcmp oge",
            CmpPredicate::FOlt => "fcmp olt",
            CmpPredicate::FOle => "fcmp ole",
            CmpPredicate::FOne => "fcmp one",
            CmpPredicate::FOrd => "fcmp ord",
            CmpPredicate::FUno => "fcmp uno",
            CmpPredicate::FUeq => "fcmp ueq",
            CmpPredicate::FUgt => "fcmp ugt",
            CmpPredicate::FUge => "fcmp uge",
            CmpPredicate::FUlt => "fcmp ult",
            CmpPredicate::FUle => "fcmp ule",
            CmpPredicate::FUne => "fcmp une",
            CmpPredicate::FTrue => "fcmp true",
            CmpPredicate::IEq => "icmp eq",
            CmpPredicate::INe => "icmp ne",
            CmpPredicate::IUgt => "icmp ugt",
            CmpPredicate::IUge => "icmp uge",
            CmpPredicate::IUlt => "icmp ult",
            CmpPredicate::IUle => "icmp ule",
            CmpPredicate::ISgt => "icmp sgt",
            CmpPredicate::ISge => "icmp sge",
            CmpPredicate::ISlt => "icmp slt",
            CmpPredicate::ISle => "icmp sle",
        }
    }
}

/// Memory ordering tag of atomic instructions, in record encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AtomicOrdering {
    #[default]
    NotAtomic,
    Unordered,
    Monotonic,
    Acquire,
    Release,
    AcquireRelease,
    SequentiallyConsistent,
}

impl AtomicOrdering {
    /// Unknown encodings are treated as the strongest ordering.
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => AtomicOrdering::NotAtomic,
            1 => AtomicOrdering::Unordered,
            2 => AtomicOrdering::Monotonic,
            3 => AtomicOrdering::Acquire,
            4 => AtomicOrdering::Release,
            5 => AtomicOrdering::AcquireRelease,
            _ => AtomicOrdering::SequentiallyConsistent,
        }
    }

    pub fn code(self) -> u64 {
        self as u64
    }

    /// The stronger of two orderings, as required for a failed
    /// compare-exchange.
    pub fn strongest(self, other: AtomicOrdering) -> AtomicOrdering {
        // Acquire and Release are incomparable; their join is AcqRel.
        match (self, other) {
            (AtomicOrdering::Acquire, AtomicOrdering::Release)
            | (AtomicOrdering::Release, AtomicOrdering::Acquire) => AtomicOrdering::AcquireRelease,
            (a, b) => a.max(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicRmwOp {
    Xchg,
    Add,
    Sub,
    And,
    Nand,
    Or,
    Xor,
    Max,
    Min,
    UMax,
    UMin,
}

impl AtomicRmwOp {
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => AtomicRmwOp::Xchg,
            1 => AtomicRmwOp::Add,
            2 => AtomicRmwOp::Sub,
            3 => AtomicRmwOp::And,
            4 => AtomicRmwOp::Nand,
            5 => AtomicRmwOp::Or,
            6 => AtomicRmwOp::Xor,
            7 => AtomicRmwOp::Max,
            8 => AtomicRmwOp::Min,
            9 => AtomicRmwOp::UMax,
            10 => AtomicRmwOp::UMin,
            _ => return None,
        })
    }

    pub fn code(self) -> u64 {
        self as u64
    }
}

/// A single IR instruction. Operands are absolute value numbers; block
/// operands are indices into the owning function's block list.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Binary {
        op: BinOp,
        lhs: ValueRef,
        rhs: ValueRef,
    },
    FNeg {
        value: ValueRef,
    },
    Cast {
        op: CastOp,
        value: ValueRef,
        to: TypeId,
    },
    Compare {
        pred: CmpPredicate,
        lhs: ValueRef,
        rhs: ValueRef,
    },
    Select {
        cond: ValueRef,
        then_value: ValueRef,
        else_value: ValueRef,
    },
    Freeze {
        value: ValueRef,
    },
    Alloca {
        allocated: TypeId,
        count: ValueRef,
        align: u32,
    },
    Load {
        ptr: ValueRef,
        align: u32,
        volatile: bool,
        ordering: AtomicOrdering,
    },
    Store {
        ptr: ValueRef,
        value: ValueRef,
        align: u32,
        volatile: bool,
        ordering: AtomicOrdering,
    },
    GetElementPtr {
        source_ty: TypeId,
        base: ValueRef,
        indices: Vec<ValueRef>,
        inbounds: bool,
    },
    ExtractElement {
        vector: ValueRef,
        index: ValueRef,
    },
    InsertElement {
        vector: ValueRef,
        element: ValueRef,
        index: ValueRef,
    },
    ShuffleVector {
        lhs: ValueRef,
        rhs: ValueRef,
        mask: ValueRef,
    },
    ExtractValue {
        aggregate: ValueRef,
        indices: Vec<u32>,
    },
    InsertValue {
        aggregate: ValueRef,
        value: ValueRef,
        indices: Vec<u32>,
    },
    Call {
        callee: ValueRef,
        fn_ty: TypeId,
        args: Vec<ValueRef>,
    },
    Phi {
        incoming: Vec<(ValueRef, u32)>,
    },
    CmpXchg {
        ptr: ValueRef,
        expected: ValueRef,
        new: ValueRef,
        success: AtomicOrdering,
        failure: AtomicOrdering,
        weak: bool,
        volatile: bool,
    },
    AtomicRmw {
        op: AtomicRmwOp,
        ptr: ValueRef,
        value: ValueRef,
        ordering: AtomicOrdering,
        volatile: bool,
    },
    Fence {
        ordering: AtomicOrdering,
    },
    // -- terminators --
    Ret {
        value: Option<ValueRef>,
    },
    Br {
        target: u32,
    },
    CondBr {
        cond: ValueRef,
        then_block: u32,
        else_block: u32,
    },
    Switch {
        cond: ValueRef,
        default: u32,
        cases: Vec<(ValueRef, u32)>,
    },
    IndirectBr {
        address: ValueRef,
        targets: Vec<u32>,
    },
    Unreachable,
}

/// Successor value meaning "return from the function".
pub const RETURN_SUCCESSOR: u32 = u32::MAX;

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Ret { .. }
                | Instruction::Br { .. }
                | Instruction::CondBr { .. }
                | Instruction::Switch { .. }
                | Instruction::IndirectBr { .. }
                | Instruction::Unreachable
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Instruction::Phi { .. })
    }

    /// The explicit successor list of a terminator, in branch-outcome order:
    /// `[then, else]` for conditional branches, `[default, cases...]` for
    /// switches. A return yields the single sentinel successor.
    pub fn successors(&self) -> SmallVec<[u32; 2]> {
        match self {
            Instruction::Ret { .. } => smallvec::smallvec![RETURN_SUCCESSOR],
            Instruction::Br { target } => smallvec::smallvec![*target],
            Instruction::CondBr {
                then_block,
                else_block,
                ..
            } => smallvec::smallvec![*then_block, *else_block],
            Instruction::Switch { default, cases, .. } => {
                let mut out = SmallVec::with_capacity(cases.len() + 1);
                out.push(*default);
                out.extend(cases.iter().map(|(_, b)| *b));
                out
            }
            Instruction::IndirectBr { targets, .. } => targets.iter().copied().collect(),
            _ => SmallVec::new(),
        }
    }

    /// Every value operand, including phi incoming values and switch case
    /// constants.
    pub fn operands(&self) -> SmallVec<[ValueRef; 4]> {
        let mut out = SmallVec::new();
        match self {
            Instruction::Binary { lhs, rhs, .. } | Instruction::Compare { lhs, rhs, .. } => {
                out.push(*lhs);
                out.push(*rhs);
            }
            Instruction::FNeg { value }
            | Instruction::Cast { value, .. }
            | Instruction::Freeze { value } => out.push(*value),
            Instruction::Select {
                cond,
                then_value,
                else_value,
            } => out.extend([*cond, *then_value, *else_value]),
            Instruction::Alloca { count, .. } => out.push(*count),
            Instruction::Load { ptr, .. } => out.push(*ptr),
            Instruction::Store { ptr, value, .. } => out.extend([*ptr, *value]),
            Instruction::GetElementPtr { base, indices, .. } => {
                out.push(*base);
                out.extend(indices.iter().copied());
            }
            Instruction::ExtractElement { vector, index } => out.extend([*vector, *index]),
            Instruction::InsertElement {
                vector,
                element,
                index,
            } => out.extend([*vector, *element, *index]),
            Instruction::ShuffleVector { lhs, rhs, mask } => out.extend([*lhs, *rhs, *mask]),
            Instruction::ExtractValue { aggregate, .. } => out.push(*aggregate),
            Instruction::InsertValue {
                aggregate, value, ..
            } => out.extend([*aggregate, *value]),
            Instruction::Call { callee, args, .. } => {
                out.push(*callee);
                out.extend(args.iter().copied());
            }
            Instruction::Phi { incoming } => out.extend(incoming.iter().map(|(v, _)| *v)),
            Instruction::CmpXchg {
                ptr, expected, new, ..
            } => out.extend([*ptr, *expected, *new]),
            Instruction::AtomicRmw { ptr, value, .. } => out.extend([*ptr, *value]),
            Instruction::Ret { value } => out.extend(value.iter().copied()),
            Instruction::CondBr { cond, .. } => out.push(*cond),
            Instruction::Switch { cond, cases, .. } => {
                out.push(*cond);
                out.extend(cases.iter().map(|(v, _)| *v));
            }
            Instruction::IndirectBr { address, .. } => out.push(*address),
            Instruction::Fence { .. } | Instruction::Br { .. } | Instruction::Unreachable => {}
        }
        out
    }

    /// Short mnemonic for diagnostics.
    pub fn opcode_name(&self) -> &'static str {
        match self {
            Instruction::Binary { op, .. } => op.name(),
            Instruction::FNeg { .. } => "fneg",
            Instruction::Cast { op, .. } => op.name(),
            Instruction::Compare { pred, .. } => pred.name(),
            Instruction::Select { .. } => "select",
            Instruction::Freeze { .. } => "freeze",
            Instruction::Alloca { .. } => "alloca",
            Instruction::Load { .. } => "load",
            Instruction::Store { .. } => "store",
            Instruction::GetElementPtr { .. } => "getelementptr",
            Instruction::ExtractElement { .. } => "extractelement",
            Instruction::InsertElement { .. } => "insertelement",
            Instruction::ShuffleVector { .. } => "shufflevector",
            Instruction::ExtractValue { .. } => "extractvalue",
            Instruction::InsertValue { .. } => "insertvalue",
            Instruction::Call { .. } => "call",
            Instruction::Phi { .. } => "phi",
            Instruction::CmpXchg { .. } => "cmpxchg",
            Instruction::AtomicRmw { .. } => "atomicrmw",
            Instruction::Fence { .. } => "fence",
            Instruction::Ret { .. } => "ret",
            Instruction::Br { .. } | Instruction::CondBr { .. } => "br",
            Instruction::Switch { .. } => "switch",
            Instruction::IndirectBr { .. } => "indirectbr",
            Instruction::Unreachable => "unreachable",
        }
    }
}
