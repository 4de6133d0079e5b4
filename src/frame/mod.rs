//! Frame layout and per-block dead-slot sets.
//!
//! A [`FrameDescriptor`] is computed once per function definition, before
//! first execution, and never changes afterwards. Activations allocate a
//! fresh slot array from it.

mod liveness;

pub use liveness::{analyze, BlockNullers};

use crate::ir::{Function, Module, Type, TypeId, TypeTable, ValueRef};

/// Storage class of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    /// Everything else: pointers, vectors, aggregates, odd-width integers.
    Object,
}

impl SlotKind {
    pub fn for_type(types: &TypeTable, ty: TypeId) -> Self {
        match types.ty(ty) {
            Type::Integer(1) => SlotKind::Boolean,
            Type::Integer(8) => SlotKind::Int8,
            Type::Integer(16) => SlotKind::Int16,
            Type::Integer(32) => SlotKind::Int32,
            Type::Integer(64) => SlotKind::Int64,
            Type::Float(crate::ir::FloatKind::Float) => SlotKind::Float,
            Type::Float(crate::ir::FloatKind::Double) => SlotKind::Double,
            _ => SlotKind::Object,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub kind: SlotKind,
    pub ty: Option<TypeId>,
    /// Value name for diagnostics (`%x`, `ret`, `sp`).
    pub name: String,
}

/// Slot layout of one function.
///
/// Order: return slot (absent for void), stack-pointer slot, one per
/// parameter, one per value-producing instruction in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor {
    slots: Vec<SlotInfo>,
    return_slot: Option<SlotId>,
    stack_slot: SlotId,
    params: Vec<SlotId>,
    /// Indexed by local index (`ValueRef - local_base`); `None` for local constants.
    locals: Vec<Option<SlotId>>,
    local_base: u32,
}

impl FrameDescriptor {
    pub fn build(module: &Module, func: &Function) -> Self {
        let types = &module.types;
        let mut slots = Vec::new();
        let mut add = |kind: SlotKind, ty: Option<TypeId>, name: String| {
            let id = SlotId(slots.len() as u32);
            slots.push(SlotInfo { kind, ty, name });
            id
        };

        let return_slot = (!types.is_void(func.return_ty))
            .then(|| add(SlotKind::for_type(types, func.return_ty), Some(func.return_ty), "ret".into()));
        let stack_slot = add(SlotKind::Object, None, "sp".into());

        let mut locals = vec![None; func.locals.len()];
        let mut params = Vec::with_capacity(func.params.len());
        for (i, param) in func.params.iter().enumerate() {
            let name = param.name.clone().unwrap_or_else(|| format!("arg{}", i));
            let slot = add(SlotKind::for_type(types, param.ty), Some(param.ty), name);
            params.push(slot);
            if let Some(index) = func.local_index(func.param_ref(i as u32)) {
                if let Some(entry) = locals.get_mut(index as usize) {
                    *entry = Some(slot);
                }
            }
        }
        for (_, _, data) in func.instructions() {
            let Some(value) = data.value else { continue };
            let name = data.name.clone().unwrap_or_else(|| value.to_string());
            let slot = add(SlotKind::for_type(types, data.ty), Some(data.ty), name);
            if let Some(index) = func.local_index(value) {
                if let Some(entry) = locals.get_mut(index as usize) {
                    *entry = Some(slot);
                }
            }
        }

        Self {
            slots,
            return_slot,
            stack_slot,
            params,
            locals,
            local_base: func.local_base,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, id: SlotId) -> Option<&SlotInfo> {
        self.slots.get(id.0 as usize)
    }

    pub fn kind(&self, id: SlotId) -> Option<SlotKind> {
        self.slot(id).map(|s| s.kind)
    }

    pub fn return_slot(&self) -> Option<SlotId> {
        self.return_slot
    }

    pub fn stack_slot(&self) -> SlotId {
        self.stack_slot
    }

    pub fn param_slot(&self, index: usize) -> Option<SlotId> {
        self.params.get(index).copied()
    }

    pub fn param_slots(&self) -> &[SlotId] {
        &self.params
    }

    /// Slot holding a parameter or instruction result.
    pub fn value_slot(&self, r: ValueRef) -> Option<SlotId> {
        let index = r.0.checked_sub(self.local_base)?;
        self.locals.get(index as usize).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &SlotInfo)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, s)| (SlotId(i as u32), s))
    }
}
