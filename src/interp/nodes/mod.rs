//! Specializing operation nodes.
//!
//! Each node owns a [`Specializer`]: on first execution it records the
//! operand type combination it saw and caches the monomorphic
//! implementation for it. Later executions with the same combination take
//! the cached implementation; the first mismatch moves the node to the
//! generic type switch for good.
//!
//! The state word is updated with a single compare-and-swap, so concurrent
//! activations agree on one outcome: the losing writer re-reads the state
//! and follows it.

pub mod arith;
pub mod cast;
pub mod compare;
pub mod memory;
pub mod vector;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use tracing::trace;

use crate::error::InterpError;

pub use arith::ArithNode;
pub use cast::CastNode;
pub use compare::CompareNode;
pub use memory::{LoadNode, StoreNode};
pub use vector::VectorNode;

use super::value::Value;

const UNINITIALIZED: u32 = 0;
const GENERIC: u32 = u32::MAX;

/// Observable specialization state of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Uninitialized,
    /// Holds the key of the cached operand type combination.
    Specialized(u32),
    Generic,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Uninitialized => write!(f, "uninitialized"),
            NodeState::Specialized(key) => write!(f, "specialized({:#x})", key),
            NodeState::Generic => write!(f, "generic"),
        }
    }
}

/// Which implementation a dispatch selected.
#[derive(Debug, Clone, Copy)]
pub enum Path<F> {
    Specialized(F),
    Generic,
}

/// Atomic tri-state cell plus the cached implementation.
#[derive(Debug)]
pub struct Specializer<F> {
    state: AtomicU32,
    transitions: AtomicU32,
    cached: OnceLock<F>,
}

impl<F: Copy> Default for Specializer<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Copy> Specializer<F> {
    pub fn new() -> Self {
        Self {
            state: AtomicU32::new(UNINITIALIZED),
            transitions: AtomicU32::new(0),
            cached: OnceLock::new(),
        }
    }

    pub fn state(&self) -> NodeState {
        match self.state.load(Ordering::Acquire) {
            UNINITIALIZED => NodeState::Uninitialized,
            GENERIC => NodeState::Generic,
            key => NodeState::Specialized(key - 1),
        }
    }

    /// How many times this node moved to the generic path (0 or 1).
    pub fn generic_transitions(&self) -> u32 {
        self.transitions.load(Ordering::Relaxed)
    }

    /// Picks the path for operand combination `key`. `select` returns the
    /// monomorphic implementation for `key`, or `None` when the combination
    /// is not admissible; that case leaves the state untouched.
    pub fn dispatch(&self, key: u32, select: impl FnOnce() -> Option<F>) -> Option<Path<F>> {
        let encoded = key + 1;
        let current = self.state.load(Ordering::Acquire);
        if current == encoded {
            if let Some(f) = self.cached.get() {
                return Some(Path::Specialized(*f));
            }
        } else if current == GENERIC {
            return Some(Path::Generic);
        }

        let implementation = select()?;
        if current == encoded {
            // Winner published the state but not the implementation yet.
            return Some(Path::Specialized(*self.cached.get_or_init(|| implementation)));
        }
        if current == UNINITIALIZED {
            match self.state.compare_exchange(
                UNINITIALIZED,
                encoded,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    trace!(key, "node specialized");
                    return Some(Path::Specialized(*self.cached.get_or_init(|| implementation)));
                }
                Err(now) if now == encoded => {
                    return Some(Path::Specialized(*self.cached.get_or_init(|| implementation)));
                }
                Err(now) => return Some(self.generalize(now)),
            }
        }
        Some(self.generalize(current))
    }

    fn generalize(&self, seen: u32) -> Path<F> {
        if seen != GENERIC
            && self
                .state
                .compare_exchange(seen, GENERIC, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.transitions.fetch_add(1, Ordering::Relaxed);
            trace!(previous = seen.wrapping_sub(1), "node went generic");
        }
        Path::Generic
    }
}

/// Error for an operand combination a node has no implementation for.
pub fn unsupported(opcode: &str, operands: &[&Value]) -> InterpError {
    InterpError::UnsupportedOperandType {
        opcode: opcode.to_string(),
        types: operands
            .iter()
            .map(|v| describe(v))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn describe(v: &Value) -> String {
    match v {
        Value::Vector(lanes) => match lanes.first() {
            Some(l) => format!("<{} x {}>", lanes.len(), l.tag()),
            None => "<0 x ?>".into(),
        },
        other => other.tag().to_string(),
    }
}

/// A node that exposes its specialization state.
pub trait Specializing {
    fn opcode(&self) -> &'static str;
    fn state(&self) -> NodeState;
    fn generic_transitions(&self) -> u32;
}

macro_rules! impl_specializing {
    ($node:ty) => {
        impl $crate::interp::nodes::Specializing for $node {
            fn opcode(&self) -> &'static str {
                self.opcode_name()
            }
            fn state(&self) -> $crate::interp::nodes::NodeState {
                self.spec.state()
            }
            fn generic_transitions(&self) -> u32 {
                self.spec.generic_transitions()
            }
        }
    };
}
pub(crate) use impl_specializing;
