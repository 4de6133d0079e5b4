//! Serializer tests: everything written must decode to an equivalent model.

mod common;

use bcvm::error::WriteError;
use bcvm::interp::Value;
use bcvm::ir::{
    Constant, ConstantKind, FloatKind, FunctionBuilder, Instruction, Module, Type, ValueRef,
};
use bcvm::writer::write_module;

fn read_bytes(engine: &bcvm::Engine, global: &str, len: u64) -> Vec<u8> {
    let addr = engine.global_address(global).expect("global should have storage");
    engine.memory().read(addr, len).expect("global should be readable")
}

#[test]
fn test_scalar_constants_roundtrip() {
    common::init();
    let mut m = Module::new("scalars");
    let i32t = m.types.int(32);
    let f64t = m.types.float(FloatKind::Double);
    let minus7 = m.add_int_constant(i32t, -7).expect("should add int");
    let half = m
        .add_constant(Constant::new(f64t, ConstantKind::Float(u128::from(2.5f64.to_bits()))))
        .expect("should add float");
    m.add_global("n", i32t, true, Some(minus7)).expect("should add n");
    m.add_global("d", f64t, true, Some(half)).expect("should add d");

    let decoded = common::roundtrip(&m);
    let kinds: Vec<&ConstantKind> = decoded.constants.iter().map(|c| &c.kind).collect();
    assert!(kinds.contains(&&ConstantKind::Integer(-7)));
    assert!(kinds.contains(&&ConstantKind::Float(u128::from(2.5f64.to_bits()))));

    let engine = common::engine(decoded);
    assert_eq!(read_bytes(&engine, "n", 4), (-7i32).to_le_bytes().to_vec());
    assert_eq!(read_bytes(&engine, "d", 8), 2.5f64.to_le_bytes().to_vec());
}

#[test]
fn test_aggregate_initializers() {
    common::init();
    let mut m = Module::new("aggregates");
    let i32t = m.types.int(32);
    let i8t = m.types.int(8);
    let arr_ty = m.types.array(i32t, 3);
    let pair_ty = m.types.anon_struct(vec![i8t, i32t], false);
    let elems: Vec<ValueRef> = [10, 20, 30]
        .iter()
        .map(|&v| m.add_int_constant(i32t, v).expect("should add element"))
        .collect();
    let arr = m
        .add_constant(Constant::new(arr_ty, ConstantKind::Aggregate(elems)))
        .expect("should add array");
    let a = m.add_int_constant(i8t, -1).expect("should add i8");
    let b = m.add_int_constant(i32t, 0x0102_0304).expect("should add i32");
    let pair = m
        .add_constant(Constant::new(pair_ty, ConstantKind::Aggregate(vec![a, b])))
        .expect("should add struct");
    m.add_global("table", arr_ty, true, Some(arr)).expect("should add table");
    m.add_global("pair", pair_ty, false, Some(pair)).expect("should add pair");

    let engine = common::engine(common::roundtrip(&m));
    let mut expected = Vec::new();
    for v in [10i32, 20, 30] {
        expected.extend_from_slice(&v.to_le_bytes());
    }
    assert_eq!(read_bytes(&engine, "table", 12), expected);
    // { i8, i32 } puts the second field at offset 4.
    let pair_bytes = read_bytes(&engine, "pair", 8);
    assert_eq!(pair_bytes[0], 0xff);
    assert_eq!(&pair_bytes[4..8], &0x0102_0304i32.to_le_bytes());
}

#[test]
fn test_recursive_named_struct() {
    let mut m = Module::new("list");
    let i32t = m.types.int(32);
    let node = m.types.named_struct("node");
    let node_ptr = m.types.pointer_to(node);
    assert!(m.types.set_struct_body(node, vec![i32t, node_ptr], false));
    m.add_global("head", node, false, None).expect("should add head");

    let decoded = common::roundtrip(&m);
    let head = decoded.global_by_name("head").expect("head should survive");
    match decoded.types.ty(head.value_ty) {
        Type::Struct(s) => {
            assert_eq!(s.name.as_deref(), Some("node"));
            assert_eq!(s.fields.len(), 2);
            assert_eq!(decoded.types.int_width(s.fields[0]), Some(32));
            assert_eq!(decoded.types.pointee(s.fields[1]), Some(head.value_ty));
        }
        other => panic!("expected a struct, found {:?}", other),
    }
}

#[test]
fn test_module_strings_survive() {
    let mut m = common::branch_module();
    m.producer = Some("bcvm-tests 1.0".into());
    m.target_triple = Some("x86_64-unknown-linux-gnu".into());
    m.source_filename = Some("branch.c".into());
    m.data_layout_string = Some("e-m:e-i64:64-n8:16:32:64-S128".into());

    let decoded = common::roundtrip(&m);
    assert_eq!(decoded.producer.as_deref(), Some("bcvm-tests 1.0"));
    assert_eq!(decoded.target_triple.as_deref(), Some("x86_64-unknown-linux-gnu"));
    assert_eq!(decoded.source_filename.as_deref(), Some("branch.c"));
    assert_eq!(
        decoded.data_layout_string.as_deref(),
        Some("e-m:e-i64:64-n8:16:32:64-S128")
    );
}

#[test]
fn test_default_producer() {
    let decoded = common::roundtrip(&common::branch_module());
    assert_eq!(decoded.producer.as_deref(), Some("bcvm"));
}

#[test]
fn test_function_bodies_roundtrip() {
    common::init();
    let decoded = common::roundtrip(&common::sum_module());
    let sum = decoded.function_by_name("sum").expect("sum should survive");
    assert_eq!(sum.blocks.len(), 3);
    assert_eq!(sum.blocks[1].name.as_deref(), Some("loop"));
    assert_eq!(sum.blocks[1].instrs[0].name.as_deref(), Some("i"));
    assert_eq!(sum.blocks[1].instrs[1].name.as_deref(), Some("acc"));
    assert!(sum.blocks[1].instrs[0].instr.is_phi());

    let engine = common::engine(decoded);
    assert_eq!(
        engine.call("sum", &[Value::I32(10)]).expect("sum should run"),
        Some(Value::I32(55))
    );
}

#[test]
fn test_recursive_call_roundtrip() {
    let engine = common::engine(common::roundtrip(&common::factorial_module()));
    assert_eq!(
        engine.call("fact", &[Value::I32(6)]).expect("fact should run"),
        Some(Value::I32(720))
    );
}

#[test]
fn test_unknown_operand_is_rejected() {
    let mut m = Module::new("bad");
    let i32t = m.types.int(32);
    let void = m.types.void();
    let mut b = FunctionBuilder::new(&mut m, "bad", i32t, &[]).expect("should declare bad");
    let entry = b.create_block(None);
    b.set_current_block(entry);
    b.push(
        Instruction::Ret {
            value: Some(ValueRef(9999)),
        },
        void,
    );
    b.finish();

    let err = write_module(&m).expect_err("operand 9999 does not exist");
    assert_eq!(
        err,
        WriteError::UnknownValue {
            function: "bad".into(),
            value: 9999
        }
    );
    assert_eq!(bcvm::Error::from(err).diagnostic_code(), "E0300");
}
