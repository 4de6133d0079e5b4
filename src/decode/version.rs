//! Per-version record layouts.
//!
//! The three supported layouts differ in how module-level GLOBALVAR, FUNCTION
//! and ALIAS records order their fields and in whether instruction operands
//! use relative value ids. Each layout is a static table of decoders chosen
//! once, when the VERSION record is seen.

use super::Ops;
use crate::error::ParseError;
use crate::ir::FormatVersion;

/// Fields of a GLOBALVAR record, normalized across layouts.
#[derive(Debug, Clone, Default)]
pub(crate) struct GlobalRecord {
    pub strtab_name: Option<(u64, u64)>,
    pub type_index: u64,
    /// The type field is the value type, not a pointer to it.
    pub explicit_type: bool,
    pub is_constant: bool,
    pub address_space: u32,
    /// 0 = no initializer, else symbol index + 1.
    pub init: u64,
    pub linkage: u64,
    pub align: u64,
    pub section: u64,
    pub visibility: u64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FunctionRecord {
    pub strtab_name: Option<(u64, u64)>,
    pub type_index: u64,
    pub calling_conv: u64,
    pub is_proto: bool,
    pub linkage: u64,
    pub align: u64,
    pub section: u64,
    pub visibility: u64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct AliasRecord {
    pub strtab_name: Option<(u64, u64)>,
    pub type_index: u64,
    pub explicit_type: bool,
    pub aliasee: u64,
    pub linkage: u64,
    pub visibility: u64,
}

pub(crate) const MODULE_CODE_ALIAS_OLD: u32 = 9;

pub struct RecordLayout {
    pub version: FormatVersion,
    /// Instruction operands are encoded relative to the next value number.
    pub relative_ids: bool,
    pub(crate) decode_global: fn(&mut Ops<'_>) -> Result<GlobalRecord, ParseError>,
    pub(crate) decode_function: fn(&mut Ops<'_>) -> Result<FunctionRecord, ParseError>,
    pub(crate) decode_alias: fn(&mut Ops<'_>, u32) -> Result<AliasRecord, ParseError>,
}

pub static LEGACY_32: RecordLayout = RecordLayout {
    version: FormatVersion::Legacy32,
    relative_ids: false,
    decode_global: global_legacy32,
    decode_function: function_fields,
    decode_alias: alias_fields,
};

pub static LEGACY_38: RecordLayout = RecordLayout {
    version: FormatVersion::Legacy38,
    relative_ids: true,
    decode_global: global_flags_word,
    decode_function: function_fields,
    decode_alias: alias_fields,
};

pub static CURRENT: RecordLayout = RecordLayout {
    version: FormatVersion::Current,
    relative_ids: true,
    decode_global: global_current,
    decode_function: function_current,
    decode_alias: alias_current,
};

pub fn layout_for(version: FormatVersion) -> &'static RecordLayout {
    match version {
        FormatVersion::Legacy32 => &LEGACY_32,
        FormatVersion::Legacy38 => &LEGACY_38,
        FormatVersion::Current => &CURRENT,
    }
}

// [pointer type, isconst, initid, linkage, alignment, section, visibility?]
fn global_legacy32(ops: &mut Ops<'_>) -> Result<GlobalRecord, ParseError> {
    let has_visibility = ops.remaining() >= 7;
    Ok(GlobalRecord {
        strtab_name: None,
        type_index: ops.next()?,
        explicit_type: false,
        is_constant: ops.next()? & 1 != 0,
        address_space: 0,
        init: ops.next()?,
        linkage: ops.next()?,
        align: ops.next()?,
        section: ops.next()?,
        visibility: if has_visibility { ops.next()? } else { 0 },
    })
}

// [type, const | explicit_type << 1 | addrspace << 2, initid, linkage,
//  alignment, section, visibility, ...]
fn global_flags_word(ops: &mut Ops<'_>) -> Result<GlobalRecord, ParseError> {
    let type_index = ops.next()?;
    let flags = ops.next()?;
    let init = ops.next()?;
    let linkage = ops.next()?;
    let align = ops.next()?;
    let section = ops.next()?;
    let visibility = ops.opt().unwrap_or(0);
    Ok(GlobalRecord {
        strtab_name: None,
        type_index,
        explicit_type: flags & 2 != 0,
        is_constant: flags & 1 != 0,
        address_space: (flags >> 2) as u32,
        init,
        linkage,
        align,
        section,
        visibility,
    })
}

fn global_current(ops: &mut Ops<'_>) -> Result<GlobalRecord, ParseError> {
    let name = (ops.next()?, ops.next()?);
    let mut g = global_flags_word(ops)?;
    g.strtab_name = Some(name);
    Ok(g)
}

// [type, callingconv, isproto, linkage, paramattr, alignment, section,
//  visibility, gc, ...]
fn function_fields(ops: &mut Ops<'_>) -> Result<FunctionRecord, ParseError> {
    let type_index = ops.next()?;
    let calling_conv = ops.next()?;
    let is_proto = ops.next()? != 0;
    let linkage = ops.next()?;
    let _paramattr = ops.opt();
    let align = ops.opt().unwrap_or(0);
    let section = ops.opt().unwrap_or(0);
    let visibility = ops.opt().unwrap_or(0);
    Ok(FunctionRecord {
        strtab_name: None,
        type_index,
        calling_conv,
        is_proto,
        linkage,
        align,
        section,
        visibility,
    })
}

fn function_current(ops: &mut Ops<'_>) -> Result<FunctionRecord, ParseError> {
    let name = (ops.next()?, ops.next()?);
    let mut f = function_fields(ops)?;
    f.strtab_name = Some(name);
    Ok(f)
}

// ALIAS_OLD: [pointer type, aliasee, linkage, visibility]
// ALIAS:     [value type, addrspace, aliasee, linkage, visibility]
fn alias_fields(ops: &mut Ops<'_>, code: u32) -> Result<AliasRecord, ParseError> {
    let type_index = ops.next()?;
    let explicit_type = code != MODULE_CODE_ALIAS_OLD;
    if explicit_type {
        let _address_space = ops.next()?;
    }
    Ok(AliasRecord {
        strtab_name: None,
        type_index,
        explicit_type,
        aliasee: ops.next()?,
        linkage: ops.next()?,
        visibility: ops.opt().unwrap_or(0),
    })
}

fn alias_current(ops: &mut Ops<'_>, code: u32) -> Result<AliasRecord, ParseError> {
    let name = (ops.next()?, ops.next()?);
    let mut a = alias_fields(ops, code)?;
    a.strtab_name = Some(name);
    Ok(a)
}
