use std::collections::HashMap;
use std::fmt;

/// Index into a module's [`TypeTable`]. Equal ids mean equal types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatKind {
    Half,
    Float,
    Double,
    X86Fp80,
    Fp128,
    PpcFp128,
}

impl FloatKind {
    pub fn bit_width(self) -> u32 {
        match self {
            FloatKind::Half => 16,
            FloatKind::Float => 32,
            FloatKind::Double => 64,
            FloatKind::X86Fp80 => 80,
            FloatKind::Fp128 | FloatKind::PpcFp128 => 128,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FloatKind::Half => "half",
            FloatKind::Float => "float",
            FloatKind::Double => "double",
            FloatKind::X86Fp80 => "x86_fp80",
            FloatKind::Fp128 => "fp128",
            FloatKind::PpcFp128 => "ppc_fp128",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructType {
    /// Named structs are nominal: two named structs are never interned together.
    pub name: Option<String>,
    pub fields: Vec<TypeId>,
    pub packed: bool,
    /// Declared without a body (yet).
    pub opaque: bool,
}

/// The closed set of IR types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Label,
    Metadata,
    Integer(u32),
    Float(FloatKind),
    /// `pointee` is `None` for opaque pointers.
    Pointer {
        pointee: Option<TypeId>,
        address_space: u32,
    },
    Array {
        element: TypeId,
        count: u64,
    },
    Vector {
        element: TypeId,
        count: u32,
    },
    Struct(StructType),
    Function {
        ret: TypeId,
        params: Vec<TypeId>,
        vararg: bool,
    },
}

impl Type {
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Integer(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer { .. })
    }

    /// Types that produce no storable value.
    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void | Type::Label | Type::Metadata)
    }
}

/// Interned type table.
///
/// Invariants:
/// 1. Structural types are hash-consed: interning an equal `Type` twice
///    yields the same `TypeId`.
/// 2. Named structs are appended, never interned, and are the only entries
///    whose body may change after creation (opaque -> defined).
/// 3. Composite types only reference ids that already exist.
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    types: Vec<Type>,
    interned: HashMap<Type, TypeId>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, id: TypeId) -> Option<&Type> {
        self.types.get(id.0 as usize)
    }

    /// Like [`get`](Self::get) for ids the table handed out itself.
    pub fn ty(&self, id: TypeId) -> &Type {
        static VOID: Type = Type::Void;
        self.types.get(id.0 as usize).unwrap_or(&VOID)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &Type)> + '_ {
        self.types
            .iter()
            .enumerate()
            .map(|(i, t)| (TypeId(i as u32), t))
    }

    /// Returns the id of `ty`, adding it if needed. Named structs always get a
    /// fresh entry.
    pub fn intern(&mut self, ty: Type) -> TypeId {
        if let Type::Struct(StructType { name: Some(_), .. }) = ty {
            return self.push(ty);
        }
        if let Some(&id) = self.interned.get(&ty) {
            return id;
        }
        let id = self.push(ty.clone());
        self.interned.insert(ty, id);
        id
    }

    fn push(&mut self, ty: Type) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty);
        id
    }

    /// Appends a table entry without interning it. Used when decoding, where
    /// the table index of every record must be preserved even for duplicates.
    pub fn append(&mut self, ty: Type) -> TypeId {
        let named = matches!(ty, Type::Struct(StructType { name: Some(_), .. }));
        let id = self.push(ty.clone());
        if !named {
            self.interned.entry(ty).or_insert(id);
        }
        id
    }

    pub fn named_struct(&mut self, name: impl Into<String>) -> TypeId {
        self.push(Type::Struct(StructType {
            name: Some(name.into()),
            fields: Vec::new(),
            packed: false,
            opaque: true,
        }))
    }

    /// Fills in the body of a named struct. Returns `false` if `id` is not a
    /// named struct.
    pub fn set_struct_body(&mut self, id: TypeId, fields: Vec<TypeId>, packed: bool) -> bool {
        match self.types.get_mut(id.0 as usize) {
            Some(Type::Struct(st)) if st.name.is_some() => {
                st.fields = fields;
                st.packed = packed;
                st.opaque = false;
                true
            }
            _ => false,
        }
    }

    /// Names a struct created by [`named_struct`](Self::named_struct).
    pub fn set_struct_name(&mut self, id: TypeId, name: impl Into<String>) -> bool {
        match self.types.get_mut(id.0 as usize) {
            Some(Type::Struct(st)) if st.name.is_some() => {
                st.name = Some(name.into());
                true
            }
            _ => false,
        }
    }

    // -- convenience constructors -------------------------------------------

    pub fn void(&mut self) -> TypeId {
        self.intern(Type::Void)
    }

    pub fn int(&mut self, bits: u32) -> TypeId {
        self.intern(Type::Integer(bits))
    }

    pub fn float(&mut self, kind: FloatKind) -> TypeId {
        self.intern(Type::Float(kind))
    }

    pub fn pointer_to(&mut self, pointee: TypeId) -> TypeId {
        self.intern(Type::Pointer {
            pointee: Some(pointee),
            address_space: 0,
        })
    }

    pub fn opaque_pointer(&mut self) -> TypeId {
        self.intern(Type::Pointer {
            pointee: None,
            address_space: 0,
        })
    }

    pub fn array(&mut self, element: TypeId, count: u64) -> TypeId {
        self.intern(Type::Array { element, count })
    }

    pub fn vector(&mut self, element: TypeId, count: u32) -> TypeId {
        self.intern(Type::Vector { element, count })
    }

    pub fn anon_struct(&mut self, fields: Vec<TypeId>, packed: bool) -> TypeId {
        self.intern(Type::Struct(StructType {
            name: None,
            fields,
            packed,
            opaque: false,
        }))
    }

    pub fn function(&mut self, ret: TypeId, params: Vec<TypeId>, vararg: bool) -> TypeId {
        self.intern(Type::Function { ret, params, vararg })
    }

    // -- queries -------------------------------------------------------------

    pub fn is_void(&self, id: TypeId) -> bool {
        self.ty(id).is_void()
    }

    pub fn int_width(&self, id: TypeId) -> Option<u32> {
        match self.ty(id) {
            Type::Integer(bits) => Some(*bits),
            _ => None,
        }
    }

    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.ty(id) {
            Type::Pointer { pointee, .. } => *pointee,
            _ => None,
        }
    }

    /// Element type of arrays and vectors.
    pub fn element(&self, id: TypeId) -> Option<TypeId> {
        match self.ty(id) {
            Type::Array { element, .. } | Type::Vector { element, .. } => Some(*element),
            _ => None,
        }
    }

    pub fn vector_len(&self, id: TypeId) -> Option<u32> {
        match self.ty(id) {
            Type::Vector { count, .. } => Some(*count),
            _ => None,
        }
    }

    /// Field/element type at `index` of an aggregate.
    pub fn member(&self, id: TypeId, index: u64) -> Option<TypeId> {
        match self.ty(id) {
            Type::Struct(st) => st.fields.get(index as usize).copied(),
            Type::Array { element, count } if index < *count => Some(*element),
            Type::Vector { element, count } if index < u64::from(*count) => Some(*element),
            _ => None,
        }
    }

    /// `(return, params, vararg)` of a function type, looking through one
    /// level of pointer.
    pub fn signature(&self, id: TypeId) -> Option<(TypeId, &[TypeId], bool)> {
        match self.ty(id) {
            Type::Function { ret, params, vararg } => Some((*ret, params.as_slice(), *vararg)),
            Type::Pointer {
                pointee: Some(inner),
                ..
            } => match self.ty(*inner) {
                Type::Function { ret, params, vararg } => Some((*ret, params.as_slice(), *vararg)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Renders a type in LLVM assembly notation, for diagnostics.
    pub fn display(&self, id: TypeId) -> String {
        let mut out = String::new();
        self.write_type(&mut out, id, 0);
        out
    }

    fn write_type(&self, out: &mut String, id: TypeId, depth: usize) {
        use std::fmt::Write;
        if depth > 8 {
            out.push_str("...");
            return;
        }
        match self.ty(id) {
            Type::Void => out.push_str("void"),
            Type::Label => out.push_str("label"),
            Type::Metadata => out.push_str("metadata"),
            Type::Integer(bits) => {
                let _ = write!(out, "i{}", bits);
            }
            Type::Float(kind) => out.push_str(kind.name()),
            Type::Pointer { pointee: None, .. } => out.push_str("ptr"),
            Type::Pointer {
                pointee: Some(inner),
                ..
            } => {
                self.write_type(out, *inner, depth + 1);
                out.push('*');
            }
            Type::Array { element, count } => {
                let _ = write!(out, "[{} x ", count);
                self.write_type(out, *element, depth + 1);
                out.push(']');
            }
            Type::Vector { element, count } => {
                let _ = write!(out, "<{} x ", count);
                self.write_type(out, *element, depth + 1);
                out.push('>');
            }
            Type::Struct(StructType { name: Some(name), .. }) => {
                let _ = write!(out, "%{}", name);
            }
            Type::Struct(st) => {
                out.push_str(if st.packed { "<{" } else { "{" });
                for (i, field) in st.fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_type(out, *field, depth + 1);
                }
                out.push_str(if st.packed { "}>" } else { "}" });
            }
            Type::Function { ret, params, vararg } => {
                self.write_type(out, *ret, depth + 1);
                out.push_str(" (");
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_type(out, *p, depth + 1);
                }
                if *vararg {
                    out.push_str(if params.is_empty() { "..." } else { ", ..." });
                }
                out.push(')');
            }
        }
    }
}
