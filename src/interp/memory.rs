//! Byte-addressed program memory.
//!
//! Every allocation is a separate byte vector keyed by its base address, so
//! out-of-bounds accesses are caught instead of silently touching a
//! neighbour. Function and block addresses live in tagged ranges far above
//! any data address and are never backed by bytes.

use std::collections::BTreeMap;
use std::sync::atomic::{fence, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use crate::error::InterpError;
use crate::ir::{AtomicOrdering, FunctionId};

/// First data address handed out; keeps null and small integers invalid.
pub const DATA_BASE: u64 = 0x1000;
/// Largest single allocation the interpreter will back with host memory.
pub const MAX_ALLOCATION: u64 = 1 << 30;
pub const FUNCTION_TAG: u64 = 0xF000_0000_0000_0000;
pub const BLOCK_TAG: u64 = 0xB000_0000_0000_0000;
const TAG_MASK: u64 = 0xF000_0000_0000_0000;

/// Lifetime class of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocKind {
    /// Global variable storage; lives as long as the engine.
    Global,
    /// `alloca` storage; freed when the owning activation returns.
    Stack,
    /// Host-side allocations made during one run (argv, environment).
    Arena,
}

#[derive(Debug)]
struct Allocation {
    bytes: Vec<u8>,
    kind: AllocKind,
}

#[derive(Debug)]
struct Heap {
    allocations: BTreeMap<u64, Allocation>,
    next: u64,
}

#[derive(Debug)]
pub struct Memory {
    heap: Mutex<Heap>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

pub fn function_address(id: FunctionId) -> u64 {
    FUNCTION_TAG | u64::from(id.0)
}

pub fn block_address(function: FunctionId, block: u32) -> u64 {
    BLOCK_TAG | (u64::from(function.0) << 24) | u64::from(block)
}

/// Inverse of [`function_address`].
pub fn decode_function_address(address: u64) -> Option<FunctionId> {
    (address & TAG_MASK == FUNCTION_TAG).then(|| FunctionId((address & 0xffff_ffff) as u32))
}

/// Inverse of [`block_address`].
pub fn decode_block_address(address: u64) -> Option<(FunctionId, u32)> {
    (address & TAG_MASK == BLOCK_TAG).then(|| {
        let payload = address & !TAG_MASK;
        (FunctionId((payload >> 24) as u32), (payload & 0xff_ffff) as u32)
    })
}

/// Host fence strength for an IR ordering. `None` for non-atomic accesses.
pub fn host_ordering(ordering: AtomicOrdering) -> Option<Ordering> {
    match ordering {
        AtomicOrdering::NotAtomic => None,
        AtomicOrdering::Unordered | AtomicOrdering::Monotonic => Some(Ordering::Relaxed),
        AtomicOrdering::Acquire => Some(Ordering::Acquire),
        AtomicOrdering::Release => Some(Ordering::Release),
        AtomicOrdering::AcquireRelease => Some(Ordering::AcqRel),
        AtomicOrdering::SequentiallyConsistent => Some(Ordering::SeqCst),
    }
}

/// Issues the host fence for `ordering`; relaxed and non-atomic need none.
pub fn fence_for(ordering: AtomicOrdering) {
    if let Some(o) = host_ordering(ordering).filter(|o| *o != Ordering::Relaxed) {
        fence(o);
    }
}

impl Memory {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(Heap {
                allocations: BTreeMap::new(),
                next: DATA_BASE,
            }),
        }
    }

    /// Allocates `size` zeroed bytes aligned to `align`.
    ///
    /// Sizes above [`MAX_ALLOCATION`] and address-space exhaustion fail with
    /// `AllocationTooLarge`; data addresses never reach the tagged ranges.
    pub fn allocate(&self, size: u64, align: u64, kind: AllocKind) -> Result<u64, InterpError> {
        let too_large = || InterpError::AllocationTooLarge {
            size,
            limit: MAX_ALLOCATION,
        };
        if size > MAX_ALLOCATION {
            return Err(too_large());
        }
        let mut heap = self.heap.lock();
        let base = heap
            .next
            .checked_next_multiple_of(align.max(1))
            .ok_or_else(too_large)?;
        // Keep a gap so one-past-the-end pointers never alias the next block.
        let next = base
            .checked_add(size.max(1) + 1)
            .filter(|end| *end < BLOCK_TAG.min(FUNCTION_TAG))
            .ok_or_else(too_large)?;
        heap.next = next;
        heap.allocations.insert(
            base,
            Allocation {
                bytes: vec![0; size as usize],
                kind,
            },
        );
        trace!(base, size, ?kind, "allocate");
        Ok(base)
    }

    pub fn free(&self, base: u64) {
        self.heap.lock().allocations.remove(&base);
    }

    /// Frees every allocation of `kind`; returns how many were released.
    pub fn release_kind(&self, kind: AllocKind) -> usize {
        let mut heap = self.heap.lock();
        let before = heap.allocations.len();
        heap.allocations.retain(|_, a| a.kind != kind);
        before - heap.allocations.len()
    }

    pub fn live_allocations(&self, kind: AllocKind) -> usize {
        self.heap
            .lock()
            .allocations
            .values()
            .filter(|a| a.kind == kind)
            .count()
    }

    /// Runs `f` over the bytes `[address, address + len)` under the heap
    /// lock, which makes the access atomic with respect to other accesses.
    pub fn with_bytes<R>(
        &self,
        address: u64,
        len: u64,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, InterpError> {
        let mut heap = self.heap.lock();
        let bad = InterpError::InvalidAddress { address, len };
        let (&base, alloc) = heap.allocations.range_mut(..=address).next_back().ok_or(bad.clone())?;
        let start = (address - base) as usize;
        let end = start.checked_add(len as usize).ok_or(bad.clone())?;
        let bytes = alloc.bytes.get_mut(start..end).ok_or(bad)?;
        Ok(f(bytes))
    }

    pub fn read(&self, address: u64, len: u64) -> Result<Vec<u8>, InterpError> {
        self.with_bytes(address, len, |b| b.to_vec())
    }

    pub fn write(&self, address: u64, data: &[u8]) -> Result<(), InterpError> {
        self.with_bytes(address, data.len() as u64, |b| b.copy_from_slice(data))
    }

    /// `memmove` semantics: overlapping ranges are handled.
    pub fn copy(&self, dst: u64, src: u64, len: u64) -> Result<(), InterpError> {
        if len == 0 {
            return Ok(());
        }
        let data = self.read(src, len)?;
        self.write(dst, &data)
    }

    pub fn fill(&self, dst: u64, byte: u8, len: u64) -> Result<(), InterpError> {
        if len == 0 {
            return Ok(());
        }
        self.with_bytes(dst, len, |b| b.fill(byte))
    }

    /// Reads a NUL-terminated byte string starting at `address`.
    pub fn read_c_string(&self, address: u64) -> Result<Vec<u8>, InterpError> {
        let mut out = Vec::new();
        let mut cursor = address;
        loop {
            let byte = self.read(cursor, 1)?[0];
            if byte == 0 {
                return Ok(out);
            }
            out.push(byte);
            cursor += 1;
        }
    }
}
