//! Model building from raw record streams: record layouts, forward
//! references, symbol tables, metadata and the structural verifier.

mod common;

use bcvm::bitstream::{AbbrevOp, Abbreviation, BitWriter, BlockKind};
use bcvm::decode::parse_module;
use bcvm::error::{Error, ParseError};
use bcvm::interp::Value;
use bcvm::ir::{
    extend_sign, BlockAddress, Constant, ConstantKind, FormatVersion, FunctionBuilder, FunctionId,
    GlobalAlias, Instruction, Linkage, MetadataNode, MetadataRef, Module, Resolution, Symbol,
    Visibility,
};
use bcvm::verify::verify_module;
use bcvm::writer::write_module;
use bcvm::ParseOptions;

const MODULE_VERSION: u32 = 1;
const MODULE_GLOBALVAR: u32 = 7;
const MODULE_FUNCTION: u32 = 8;

const TYPE_NUMENTRY: u32 = 1;
const TYPE_VOID: u32 = 2;
const TYPE_INTEGER: u32 = 7;
const TYPE_POINTER: u32 = 8;
const TYPE_STRUCT_NAME: u32 = 19;
const TYPE_STRUCT_NAMED: u32 = 20;
const TYPE_FUNCTION: u32 = 21;

const CST_SETTYPE: u32 = 1;
const CST_INTEGER: u32 = 4;

const INST_DECLAREBLOCKS: u32 = 1;
const INST_RET: u32 = 10;
const INST_INVOKE: u32 = 13;
const INST_LOAD: u32 = 20;

const VST_ENTRY: u32 = 1;

fn chars(s: &str) -> Vec<u64> {
    s.bytes().map(u64::from).collect()
}

fn strtab(w: &mut BitWriter, names: &[u8]) {
    w.enter_block(BlockKind::Strtab.id(), 3);
    let id = w.define_abbrev(Abbreviation::new(vec![AbbrevOp::Literal(1), AbbrevOp::Blob]));
    w.emit_abbreviated(id, &[1], Some(names));
    w.end_block();
}

/// Types: 0 = i32, 1 = i32 (), 2 = i32 ()*, 3 = i32*.
fn int_types(w: &mut BitWriter) {
    w.enter_block(BlockKind::Type.id(), 4);
    w.emit_record(TYPE_NUMENTRY, &[4]);
    w.emit_record(TYPE_INTEGER, &[32]);
    w.emit_record(TYPE_FUNCTION, &[0, 0]);
    w.emit_record(TYPE_POINTER, &[1, 0]);
    w.emit_record(TYPE_POINTER, &[0, 0]);
    w.end_block();
}

/// A pre-string-table module: `@g = constant i32 42` and `i32 @main()`
/// returning `load @g`. The initializer is a forward reference to a
/// constant numbered after the function.
fn legacy_module(version: FormatVersion) -> Vec<u8> {
    let mut w = BitWriter::with_magic();
    w.enter_block(BlockKind::Module.id(), 3);
    w.emit_record(MODULE_VERSION, &[version.record_value()]);
    int_types(&mut w);
    match version {
        FormatVersion::Legacy32 => {
            // [ptr type, isconst, init, linkage, align, section]
            w.emit_record(MODULE_GLOBALVAR, &[3, 1, 3, 0, 0, 0]);
            w.emit_record(MODULE_FUNCTION, &[2, 0, 0, 0]);
        }
        _ => {
            // [value type, const | explicit << 1, init, linkage, align, section]
            w.emit_record(MODULE_GLOBALVAR, &[0, 3, 3, 0, 0, 0]);
            w.emit_record(MODULE_FUNCTION, &[1, 0, 0, 0]);
        }
    }
    w.enter_block(BlockKind::Constants.id(), 4);
    w.emit_record(CST_SETTYPE, &[0]);
    w.emit_record(CST_INTEGER, &[84]);
    w.end_block();

    w.enter_block(BlockKind::Function.id(), 4);
    w.emit_record(INST_DECLAREBLOCKS, &[1]);
    match version {
        FormatVersion::Legacy32 => {
            // Absolute ids: load %0 (the global), ret %3.
            w.emit_record(INST_LOAD, &[0, 0, 0]);
            w.emit_record(INST_RET, &[3]);
        }
        _ => {
            // Relative ids with an explicit load type.
            w.emit_record(INST_LOAD, &[3, 0, 0, 0]);
            w.emit_record(INST_RET, &[1]);
        }
    }
    w.end_block();

    w.enter_block(BlockKind::ValueSymtab.id(), 4);
    let mut g = vec![0];
    g.extend(chars("g"));
    w.emit_record(VST_ENTRY, &g);
    let mut main = vec![1];
    main.extend(chars("main"));
    w.emit_record(VST_ENTRY, &main);
    w.end_block();
    w.end_block();
    w.finish()
}

#[test]
fn test_legacy32_layout() {
    common::init();
    let m = parse_module(&legacy_module(FormatVersion::Legacy32), &ParseOptions::default())
        .expect("legacy module should decode");
    assert_eq!(m.version, FormatVersion::Legacy32);
    let g = m.global_by_name("g").expect("global should be named by the symbol table");
    assert!(g.is_constant);
    assert_eq!(m.types.int_width(g.value_ty), Some(32));
    assert!(matches!(g.initializer, Some(Resolution::Resolved(Symbol::Constant(_)))));

    let engine = common::engine(m);
    assert_eq!(engine.call("main", &[]).expect("main should run"), Some(Value::I32(42)));
}

#[test]
fn test_legacy38_layout() {
    common::init();
    let m = parse_module(&legacy_module(FormatVersion::Legacy38), &ParseOptions::default())
        .expect("legacy module should decode");
    assert_eq!(m.version, FormatVersion::Legacy38);
    let engine = common::engine(m);
    assert_eq!(engine.call("main", &[]).expect("main should run"), Some(Value::I32(42)));
}

/// `i32 @main()` returning 7 from a function-local constant, with names
/// from the string table. `with_version` controls the VERSION record.
fn current_module(with_version: bool, extra: impl FnOnce(&mut BitWriter)) -> Vec<u8> {
    let mut w = BitWriter::with_magic();
    w.enter_block(BlockKind::Module.id(), 3);
    if with_version {
        w.emit_record(MODULE_VERSION, &[2]);
    }
    int_types(&mut w);
    extra(&mut w);
    // [strtab offset, size, type, cc, isproto, linkage]
    w.emit_record(MODULE_FUNCTION, &[0, 4, 1, 0, 0, 0]);
    w.enter_block(BlockKind::Function.id(), 4);
    w.emit_record(INST_DECLAREBLOCKS, &[1]);
    w.enter_block(BlockKind::Constants.id(), 4);
    w.emit_record(CST_SETTYPE, &[0]);
    w.emit_record(CST_INTEGER, &[14]);
    w.end_block();
    w.emit_record(INST_RET, &[1]);
    w.end_block();
    w.end_block();
    strtab(&mut w, b"main");
    w.finish()
}

#[test]
fn test_missing_version_assumes_current_layout() {
    common::init();
    let m = parse_module(&current_module(false, |_| {}), &ParseOptions::default())
        .expect("module without VERSION should decode");
    assert_eq!(m.version, FormatVersion::Current);
    let main = m.function_by_name("main").expect("name should come from the string table");
    assert!(main.is_definition());
    let engine = common::engine(m);
    assert_eq!(engine.call("main", &[]).expect("main should run"), Some(Value::I32(7)));
}

#[test]
fn test_unknown_records_are_skipped_unless_strict() {
    let bytes = current_module(true, |w| w.emit_record(99, &[1, 2, 3]));
    parse_module(&bytes, &ParseOptions::default()).expect("unknown record should be skipped");

    let strict = ParseOptions {
        strict_records: true,
        ..ParseOptions::default()
    };
    let err = parse_module(&bytes, &strict).expect_err("strict mode rejects unknown records");
    assert!(matches!(
        err,
        Error::Parse(ParseError::InvalidRecord {
            block: "MODULE",
            code: 99,
            ..
        })
    ));
    assert_eq!(err.diagnostic_code(), "E0200");
}

#[test]
fn test_unknown_blocks_are_skipped() {
    let bytes = current_module(true, |w| {
        w.enter_block(77, 3);
        w.emit_record(1, &[9, 9, 9]);
        w.end_block();
    });
    let m = parse_module(&bytes, &ParseOptions { strict_records: true, ..ParseOptions::default() }).expect("unknown block should be skipped");
    assert!(m.function_by_name("main").is_some());
}

#[test]
fn test_unsupported_instruction() {
    let mut w = BitWriter::with_magic();
    w.enter_block(BlockKind::Module.id(), 3);
    w.emit_record(MODULE_VERSION, &[2]);
    int_types(&mut w);
    w.emit_record(MODULE_FUNCTION, &[0, 4, 1, 0, 0, 0]);
    w.enter_block(BlockKind::Function.id(), 4);
    w.emit_record(INST_DECLAREBLOCKS, &[1]);
    w.emit_record(INST_INVOKE, &[0, 0, 1, 0, 1]);
    w.end_block();
    w.end_block();
    strtab(&mut w, b"main");

    let err = parse_module(&w.finish(), &ParseOptions::default()).expect_err("invoke is not supported");
    assert!(matches!(
        err,
        Error::Parse(ParseError::UnsupportedInstruction { code: 13, .. })
    ));
    assert_eq!(err.diagnostic_code(), "E0204");
}

#[test]
fn test_function_block_without_pending_definition() {
    let mut w = BitWriter::with_magic();
    w.enter_block(BlockKind::Module.id(), 3);
    w.emit_record(MODULE_VERSION, &[2]);
    w.enter_block(BlockKind::Type.id(), 4);
    w.emit_record(TYPE_NUMENTRY, &[2]);
    w.emit_record(TYPE_VOID, &[]);
    w.emit_record(TYPE_FUNCTION, &[0, 0]);
    w.end_block();
    // A prototype queues no body.
    w.emit_record(MODULE_FUNCTION, &[0, 4, 1, 0, 1, 0]);
    w.enter_block(BlockKind::Function.id(), 4);
    w.emit_record(INST_DECLAREBLOCKS, &[1]);
    w.emit_record(INST_RET, &[]);
    w.end_block();
    w.end_block();
    strtab(&mut w, b"decl");

    let err = parse_module(&w.finish(), &ParseOptions::default()).expect_err("no definition is pending");
    assert!(matches!(
        err,
        Error::Parse(ParseError::MissingFunctionBody { declared: 0 })
    ));
    assert_eq!(err.diagnostic_code(), "E0205");
}

#[test]
fn test_global_initializer_forward_reference() {
    common::init();
    let mut m = Module::new("forward");
    let i32t = m.types.int(32);
    let i32p = m.types.pointer_to(i32t);
    let (p, _) = m.add_global("p", i32p, false, None).expect("should add p");
    let nine = m.add_int_constant(i32t, 9).expect("should add constant");
    let (target, _) = m.add_global("target", i32t, false, Some(nine)).expect("should add target");
    // `p` is numbered before `target`, so its initializer is a forward reference.
    m.globals[p.0 as usize].initializer = Some(Resolution::Resolved(Symbol::Global(target)));

    let decoded = common::roundtrip(&m);
    let p_decl = decoded.global_by_name("p").expect("p should survive");
    assert_eq!(
        p_decl.initializer,
        Some(Resolution::Resolved(Symbol::Global(target)))
    );

    let engine = common::engine(decoded);
    let p_addr = engine.global_address("p").expect("p should have storage");
    let target_addr = engine.global_address("target").expect("target should have storage");
    let stored = engine.memory().read(p_addr, 8).expect("p should be readable");
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&stored);
    assert_eq!(u64::from_le_bytes(raw), target_addr);
    let value = engine.memory().read(target_addr, 4).expect("target should be readable");
    assert_eq!(value, 9i32.to_le_bytes().to_vec());
}

#[test]
fn test_unresolvable_forward_reference() {
    let mut m = Module::new("dangling");
    let i32t = m.types.int(32);
    let (g, _) = m.add_global("g", i32t, false, None).expect("should add g");
    m.globals[g.0 as usize].initializer = Some(Resolution::Pending(99));

    let bytes = write_module(&m).expect("pending initializers are written as numbers");
    let err = parse_module(&bytes, &ParseOptions::default()).expect_err("symbol 99 never appears");
    assert!(matches!(
        err,
        Error::Parse(ParseError::ForwardReferenceUnresolved { index: 99, .. })
    ));
    assert_eq!(err.diagnostic_code(), "E0202");
}

/// A type block whose first entry points at entry 1, defined by `second`.
fn forward_type_module(second: impl FnOnce(&mut BitWriter)) -> Vec<u8> {
    let mut w = BitWriter::with_magic();
    w.enter_block(BlockKind::Module.id(), 3);
    w.emit_record(MODULE_VERSION, &[2]);
    w.enter_block(BlockKind::Type.id(), 4);
    w.emit_record(TYPE_NUMENTRY, &[2]);
    w.emit_record(TYPE_POINTER, &[1, 0]);
    second(&mut w);
    w.end_block();
    w.end_block();
    w.finish()
}

#[test]
fn test_forward_type_reference_to_named_struct() {
    let bytes = forward_type_module(|w| {
        w.emit_record(TYPE_STRUCT_NAME, &chars("list"));
        // { list* }
        w.emit_record(TYPE_STRUCT_NAMED, &[0, 0]);
    });
    parse_module(&bytes, &ParseOptions::default()).expect("self-referential struct should decode");
}

#[test]
fn test_forward_type_reference_to_non_struct() {
    let bytes = forward_type_module(|w| w.emit_record(TYPE_INTEGER, &[32]));
    let err = parse_module(&bytes, &ParseOptions::default()).expect_err("only named structs may be forward referenced");
    assert!(matches!(
        err,
        Error::Parse(ParseError::InvalidRecord {
            block: "TYPE",
            code: TYPE_INTEGER,
            ..
        })
    ));
}

/// A module constant `blockaddress(@jump, %2)` numbered before `@jump`.
fn block_address_module(define_target: bool) -> Module {
    let mut m = Module::new("blockaddress");
    let i8t = m.types.int(8);
    let i8p = m.types.pointer_to(i8t);
    let i32t = m.types.int(32);
    let void = m.types.void();
    let fn_ty = m.types.function(i32t, vec![], false);
    let future = FunctionId(m.functions.len() as u32);
    let address = m
        .add_constant(Constant::new(
            i8p,
            ConstantKind::BlockAddress(BlockAddress {
                function: Resolution::Resolved(future),
                block: 2,
            }),
        ))
        .expect("should add blockaddress");
    let (fid, _) = m.declare_function("jump", fn_ty).expect("should declare jump");
    assert_eq!(fid, future);
    if define_target {
        let mut b = FunctionBuilder::define(&mut m, fid);
        let entry = b.create_block(Some("entry"));
        let one = b.create_block(Some("one"));
        let two = b.create_block(Some("two"));
        let k1 = b.const_int(i32t, 1);
        let k2 = b.const_int(i32t, 2);
        b.set_current_block(entry);
        b.push(
            Instruction::IndirectBr {
                address,
                targets: vec![one, two],
            },
            void,
        );
        b.set_current_block(one);
        b.push(Instruction::Ret { value: Some(k1) }, void);
        b.set_current_block(two);
        b.push(Instruction::Ret { value: Some(k2) }, void);
        b.finish();
    }
    m
}

#[test]
fn test_block_address_forward_reference() {
    common::init();
    let decoded = common::roundtrip(&block_address_module(true));
    let jump = decoded.function_by_name("jump").expect("jump should survive").id;
    let resolved = decoded.constants.iter().find_map(|c| match &c.kind {
        ConstantKind::BlockAddress(ba) => Some(*ba),
        _ => None,
    });
    let ba = resolved.expect("blockaddress constant should survive");
    assert_eq!(ba.target().expect("reference should be resolved"), (jump, 2));

    let engine = common::engine(decoded);
    assert_eq!(engine.call("jump", &[]).expect("jump should run"), Some(Value::I32(2)));
}

#[test]
fn test_block_address_of_declaration() {
    let bytes = write_module(&block_address_module(false)).expect("module should serialize");
    let err = parse_module(&bytes, &ParseOptions::default()).expect_err("declarations have no blocks");
    assert!(matches!(
        err,
        Error::Parse(ParseError::ReplacementKindMismatch { .. })
    ));
    assert_eq!(err.diagnostic_code(), "E0203");
}

#[test]
fn test_pending_block_address_target() {
    let ba = BlockAddress {
        function: Resolution::Pending(5),
        block: 1,
    };
    let err = ba.target().expect_err("target is not known yet");
    assert!(matches!(err, ParseError::ForwardReferenceUnresolved { index: 5, .. }));
}

#[test]
fn test_extend_sign() {
    assert_eq!(extend_sign(8, 0xff), -1);
    assert_eq!(extend_sign(8, 0x7f), 127);
    assert_eq!(extend_sign(16, 0x8000), -32768);
    assert_eq!(extend_sign(32, 0xffff_fffe), -2);
    assert_eq!(extend_sign(64, u64::MAX), -1);
    assert_eq!(extend_sign(1, 1), 1);
}

#[test]
fn test_alias_resolves_to_global() {
    common::init();
    let mut m = Module::new("alias");
    let i32t = m.types.int(32);
    let void = m.types.void();
    let fn_ty = m.types.function(i32t, vec![], false);
    let five = m.add_int_constant(i32t, 5).expect("should add constant");
    let (g, _) = m.add_global("g", i32t, false, Some(five)).expect("should add g");
    let ptr_ty = m.globals[g.0 as usize].ptr_ty;
    let alias = bcvm::ir::AliasId(0);
    m.aliases.push(GlobalAlias {
        id: alias,
        name: "g.alias".into(),
        ty: ptr_ty,
        aliasee: Resolution::Resolved(Symbol::Global(g)),
        linkage: Linkage::External,
        visibility: Visibility::Default,
    });
    let alias_ref = bcvm::ir::ValueRef(m.symbols.len() as u32);
    m.symbols.push(Symbol::Alias(alias));
    let (read, _) = m.declare_function("read", fn_ty).expect("should declare read");
    let mut b = FunctionBuilder::define(&mut m, read);
    let entry = b.create_block(None);
    b.set_current_block(entry);
    let v = b
        .push(
            Instruction::Load {
                ptr: alias_ref,
                align: 4,
                volatile: false,
                ordering: bcvm::ir::AtomicOrdering::NotAtomic,
            },
            i32t,
        )
        .expect("load defines a value");
    b.push(Instruction::Ret { value: Some(v) }, void);
    b.finish();

    let decoded = common::roundtrip(&m);
    assert_eq!(decoded.aliases.len(), 1);
    assert_eq!(decoded.aliases[0].name, "g.alias");
    assert_eq!(
        decoded.resolve_alias(Symbol::Alias(alias)),
        Some(Symbol::Global(g))
    );
    let engine = common::engine(decoded);
    assert_eq!(engine.call("read", &[]).expect("read should run"), Some(Value::I32(5)));
}

#[test]
fn test_metadata_strings_and_named_nodes() {
    let mut lengths = BitWriter::new();
    lengths.emit_vbr(5, 6);
    lengths.emit_vbr(1, 6);
    let mut blob = lengths.finish();
    let offset = blob.len() as u64;
    blob.extend_from_slice(b"hellox");

    let mut w = BitWriter::with_magic();
    w.enter_block(BlockKind::Module.id(), 3);
    w.emit_record(MODULE_VERSION, &[2]);
    w.enter_block(BlockKind::Metadata.id(), 3);
    let strings = w.define_abbrev(Abbreviation::new(vec![
        AbbrevOp::Literal(35),
        AbbrevOp::Vbr(6),
        AbbrevOp::Vbr(6),
        AbbrevOp::Blob,
    ]));
    w.emit_abbreviated(strings, &[35, 2, offset], Some(&blob));
    // NODE !{!0, !1}
    w.emit_record(3, &[1, 2]);
    // NAME + NAMED_NODE
    w.emit_record(4, &chars("llvm.ident"));
    w.emit_record(10, &[2]);
    w.end_block();
    w.end_block();

    let m = parse_module(&w.finish(), &ParseOptions::default()).expect("metadata should decode");
    assert_eq!(m.metadata.string(MetadataRef::Node(0)), Some("hello"));
    assert_eq!(m.metadata.string(MetadataRef::Node(1)), Some("x"));
    assert_eq!(
        m.metadata.get(MetadataRef::Node(2)),
        Some(&MetadataNode::Node {
            operands: vec![MetadataRef::Node(0), MetadataRef::Node(1)],
            distinct: false,
        })
    );
    assert_eq!(m.named_metadata.len(), 1);
    assert_eq!(m.named_metadata[0].name, "llvm.ident");
    assert_eq!(m.named_metadata[0].operands, vec![MetadataRef::Node(2)]);
}

#[test]
fn test_verifier_rejects_phi_from_non_predecessor() {
    let mut m = common::sum_module();
    let sum = m.function_by_name("sum").expect("sum exists").id;
    let exit_block = 2;
    let func = m.function_mut(sum).expect("sum exists");
    if let Instruction::Phi { incoming } = &mut func.blocks[1].instrs[0].instr {
        incoming[0].1 = exit_block;
    }
    let err = verify_module(&m).expect_err("block 2 does not branch to the loop");
    assert!(matches!(err, ParseError::Verification { ref function, .. } if function == "sum"));
}

#[test]
fn test_verifier_rejects_missing_terminator() {
    let mut m = common::branch_module();
    let pick = m.function_by_name("pick").expect("pick exists").id;
    m.function_mut(pick).expect("pick exists").blocks[1].instrs.clear();
    let err = verify_module(&m).expect_err("empty block");
    assert!(matches!(err, ParseError::Verification { .. }));
}

#[test]
fn test_verifier_accepts_builder_output() {
    verify_module(&common::branch_module()).expect("branch module is well formed");
    verify_module(&common::sum_module()).expect("sum module is well formed");
    verify_module(&common::factorial_module()).expect("factorial module is well formed");
}
