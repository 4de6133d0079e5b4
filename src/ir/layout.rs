//! Target data layout: sizes, alignments and aggregate offsets.

use super::types::{FloatKind, Type, TypeId, TypeTable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    pub little_endian: bool,
    pub pointer_bits: u32,
    pub pointer_align: u32,
    /// `(bit width, abi alignment in bytes)`, sorted by width.
    pub int_aligns: Vec<(u32, u32)>,
    pub float_aligns: Vec<(u32, u32)>,
    pub vector_aligns: Vec<(u32, u32)>,
    pub aggregate_align: u32,
    pub stack_align: u32,
}

impl Default for DataLayout {
    /// x86-64 System V.
    fn default() -> Self {
        Self {
            little_endian: true,
            pointer_bits: 64,
            pointer_align: 8,
            int_aligns: vec![(1, 1), (8, 1), (16, 2), (32, 4), (64, 8), (128, 16)],
            float_aligns: vec![(16, 2), (32, 4), (64, 8), (80, 16), (128, 16)],
            vector_aligns: vec![(64, 8), (128, 16)],
            aggregate_align: 1,
            stack_align: 16,
        }
    }
}

fn parse_bits(s: &str) -> Option<u32> {
    s.parse().ok()
}

fn set_align(table: &mut Vec<(u32, u32)>, bits: u32, align_bytes: u32) {
    match table.iter_mut().find(|(w, _)| *w == bits) {
        Some(entry) => entry.1 = align_bytes,
        None => {
            table.push((bits, align_bytes));
            table.sort_unstable();
        }
    }
}

impl DataLayout {
    /// Parses an LLVM data layout string on top of the defaults. Unknown
    /// specifications are ignored.
    pub fn parse(spec: &str) -> Self {
        let mut dl = Self::default();
        for part in spec.split('-').filter(|p| !p.is_empty()) {
            let (kind, rest) = part.split_at(1);
            let fields: Vec<&str> = rest.split(':').collect();
            match kind {
                "e" => dl.little_endian = true,
                "E" => dl.little_endian = false,
                "S" => {
                    if let Some(bits) = parse_bits(rest) {
                        dl.stack_align = (bits / 8).max(1);
                    }
                }
                "p" => {
                    // p[n]:size:abi[:pref]; only address space 0 matters here.
                    if fields.first().map(|a| a.is_empty() || *a == "0").unwrap_or(true) {
                        if let Some(size) = fields.get(1).and_then(|s| parse_bits(s)) {
                            dl.pointer_bits = size;
                        }
                        if let Some(abi) = fields.get(2).and_then(|s| parse_bits(s)) {
                            dl.pointer_align = (abi / 8).max(1);
                        }
                    }
                }
                "i" | "f" | "v" => {
                    let (Some(bits), Some(abi)) = (
                        fields.first().and_then(|s| parse_bits(s)),
                        fields.get(1).and_then(|s| parse_bits(s)),
                    ) else {
                        continue;
                    };
                    let table = match kind {
                        "i" => &mut dl.int_aligns,
                        "f" => &mut dl.float_aligns,
                        _ => &mut dl.vector_aligns,
                    };
                    set_align(table, bits, (abi / 8).max(1));
                }
                "a" => {
                    if let Some(abi) = fields.get(1).and_then(|s| parse_bits(s)) {
                        dl.aggregate_align = (abi / 8).max(1);
                    }
                }
                _ => {}
            }
        }
        dl
    }

    pub fn pointer_size(&self) -> u64 {
        u64::from(self.pointer_bits / 8)
    }

    fn int_align(&self, bits: u32) -> u64 {
        // Smallest listed width that is >= bits, else the largest.
        let entry = self
            .int_aligns
            .iter()
            .find(|(w, _)| *w >= bits)
            .or_else(|| self.int_aligns.last());
        entry.map(|(_, a)| u64::from(*a)).unwrap_or(8)
    }

    /// Bytes occupied by a value of the type, without tail padding.
    pub fn store_size(&self, types: &TypeTable, id: TypeId) -> u64 {
        match types.ty(id) {
            Type::Integer(bits) => u64::from(bits.div_ceil(8)),
            Type::Float(FloatKind::X86Fp80) => 10,
            Type::Float(kind) => u64::from(kind.bit_width() / 8),
            Type::Pointer { .. } => self.pointer_size(),
            Type::Vector { element, count } => {
                let elem_bits = match types.ty(*element) {
                    Type::Integer(b) => u64::from(*b),
                    _ => self.store_size(types, *element) * 8,
                };
                (elem_bits * u64::from(*count)).div_ceil(8)
            }
            _ => self.alloc_size(types, id),
        }
    }

    /// Distance between consecutive elements of the type in an array.
    pub fn alloc_size(&self, types: &TypeTable, id: TypeId) -> u64 {
        match types.ty(id) {
            Type::Void | Type::Label | Type::Metadata | Type::Function { .. } => 0,
            Type::Array { element, count } => self.alloc_size(types, *element) * count,
            Type::Struct(st) => {
                let (_, size) = self.struct_layout(types, &st.fields, st.packed);
                size
            }
            _ => align_to(self.store_size(types, id), self.abi_align(types, id)),
        }
    }

    pub fn abi_align(&self, types: &TypeTable, id: TypeId) -> u64 {
        match types.ty(id) {
            Type::Integer(bits) => self.int_align(*bits),
            Type::Float(kind) => {
                let bits = kind.bit_width();
                self.float_aligns
                    .iter()
                    .find(|(w, _)| *w == bits)
                    .map(|(_, a)| u64::from(*a))
                    .unwrap_or(u64::from(bits / 8))
            }
            Type::Pointer { .. } => u64::from(self.pointer_align),
            Type::Vector { .. } => {
                let bits = self.store_size(types, id) * 8;
                self.vector_aligns
                    .iter()
                    .find(|(w, _)| u64::from(*w) == bits)
                    .map(|(_, a)| u64::from(*a))
                    .unwrap_or_else(|| (bits / 8).next_power_of_two().max(1))
            }
            Type::Array { element, .. } => self.abi_align(types, *element),
            Type::Struct(st) => {
                if st.packed {
                    1
                } else {
                    st.fields
                        .iter()
                        .map(|f| self.abi_align(types, *f))
                        .max()
                        .unwrap_or(1)
                        .max(u64::from(self.aggregate_align))
                }
            }
            Type::Void | Type::Label | Type::Metadata | Type::Function { .. } => 1,
        }
    }

    /// Field offsets and total (padded) size of a struct body.
    pub fn struct_layout(&self, types: &TypeTable, fields: &[TypeId], packed: bool) -> (Vec<u64>, u64) {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0u64;
        let mut max_align = 1u64;
        for &field in fields {
            let align = if packed { 1 } else { self.abi_align(types, field) };
            max_align = max_align.max(align);
            offset = align_to(offset, align);
            offsets.push(offset);
            offset += self.alloc_size(types, field);
        }
        (offsets, align_to(offset, max_align))
    }

    /// Byte offset of member `index` within an aggregate type.
    pub fn member_offset(&self, types: &TypeTable, id: TypeId, index: u64) -> Option<u64> {
        match types.ty(id) {
            Type::Struct(st) => {
                let (offsets, _) = self.struct_layout(types, &st.fields, st.packed);
                offsets.get(index as usize).copied()
            }
            Type::Array { element, .. } | Type::Vector { element, .. } => {
                Some(self.alloc_size(types, *element) * index)
            }
            _ => None,
        }
    }
}

pub fn align_to(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}
