//! Specialization state machine of the operation nodes.

mod common;

use bcvm::error::InterpError;
use bcvm::interp::nodes::cast::{CastTarget, ScalarTarget};
use bcvm::interp::nodes::vector::VectorOp;
use bcvm::interp::nodes::{ArithNode, CastNode, CompareNode, VectorNode};
use bcvm::interp::{NodeState, Specializing, TypeTag, Value};
use bcvm::ir::{BinOp, CastOp, CmpPredicate, FloatKind};

#[test]
fn test_monomorphic_node_stays_specialized() {
    let node = ArithNode::new(BinOp::Add);
    assert_eq!(node.state(), NodeState::Uninitialized);
    for i in 0..10 {
        let r = node.execute(&Value::I32(i), &Value::I32(1)).expect("i32 add");
        assert_eq!(r, Value::I32(i + 1));
    }
    assert_eq!(node.state(), NodeState::Specialized(TypeTag::I32.key()));
    assert_eq!(node.generic_transitions(), 0);
    assert_eq!(node.opcode(), "add");
}

#[test]
fn test_polymorphic_node_goes_generic_once() {
    let node = ArithNode::new(BinOp::Mul);
    assert_eq!(node.execute(&Value::I32(6), &Value::I32(7)).expect("i32 mul"), Value::I32(42));
    assert_eq!(
        node.execute(&Value::I64(1 << 40), &Value::I64(4)).expect("i64 mul"),
        Value::I64(1 << 42)
    );
    assert_eq!(node.state(), NodeState::Generic);
    // The generic path still handles every combination.
    assert_eq!(node.execute(&Value::I8(-3), &Value::I8(5)).expect("i8 mul"), Value::I8(-15));
    assert_eq!(node.execute(&Value::I32(3), &Value::I32(3)).expect("i32 mul"), Value::I32(9));
    assert_eq!(node.state(), NodeState::Generic);
    assert_eq!(node.generic_transitions(), 1);
}

#[test]
fn test_rejected_operands_leave_state_untouched() {
    let node = ArithNode::new(BinOp::Add);
    let err = node
        .execute(&Value::I32(1), &Value::I64(1))
        .expect_err("operand types differ");
    assert!(matches!(err, InterpError::UnsupportedOperandType { .. }));
    assert_eq!(node.state(), NodeState::Uninitialized);

    // A float op on integers has no implementation either.
    let fadd = ArithNode::new(BinOp::FAdd);
    fadd.execute(&Value::I32(1), &Value::I32(1))
        .expect_err("fadd needs floats");
    assert_eq!(fadd.state(), NodeState::Uninitialized);
    assert_eq!(
        fadd.execute(&Value::Double(0.5), &Value::Double(0.25)).expect("double fadd"),
        Value::Double(0.75)
    );
    assert_eq!(fadd.state(), NodeState::Specialized(TypeTag::Double.key()));
}

#[test]
fn test_compare_node() {
    let node = CompareNode::new(CmpPredicate::ISlt);
    assert_eq!(node.execute(&Value::I32(-1), &Value::I32(2)).expect("icmp"), Value::I1(true));
    assert_eq!(node.execute(&Value::I32(5), &Value::I32(2)).expect("icmp"), Value::I1(false));
    assert_eq!(node.state(), NodeState::Specialized(TypeTag::I32.key()));
    assert_eq!(node.opcode(), "icmp");

    let unsigned = CompareNode::new(CmpPredicate::IUlt);
    // -1 is the largest unsigned i32.
    assert_eq!(unsigned.execute(&Value::I32(-1), &Value::I32(2)).expect("icmp"), Value::I1(false));

    let fcmp = CompareNode::new(CmpPredicate::FOlt);
    assert_eq!(fcmp.execute(&Value::Double(1.0), &Value::Double(2.0)).expect("fcmp"), Value::I1(true));
    assert_eq!(
        fcmp.execute(&Value::Double(f64::NAN), &Value::Double(2.0)).expect("fcmp"),
        Value::I1(false)
    );
    assert_eq!(fcmp.execute(&Value::Float(1.0), &Value::Float(0.5)).expect("fcmp"), Value::I1(false));
    assert_eq!(fcmp.state(), NodeState::Generic);
    assert_eq!(fcmp.generic_transitions(), 1);
}

#[test]
fn test_cast_node() {
    let node = CastNode::new(CastOp::SExt, CastTarget::scalar(ScalarTarget::Int(64)));
    assert_eq!(node.execute(&Value::I8(-1)).expect("sext"), Value::I64(-1));
    assert_eq!(node.state(), NodeState::Specialized(TypeTag::I8.key()));
    assert_eq!(node.execute(&Value::I16(-2)).expect("sext"), Value::I64(-2));
    assert_eq!(node.state(), NodeState::Generic);

    let to_float = CastNode::new(CastOp::SiToFp, CastTarget::scalar(ScalarTarget::Float(FloatKind::Float)));
    assert_eq!(to_float.execute(&Value::I32(-3)).expect("sitofp"), Value::Float(-3.0));

    let fptosi = CastNode::new(CastOp::FpToSi, CastTarget::scalar(ScalarTarget::Int(32)));
    fptosi
        .execute(&Value::I32(1))
        .expect_err("fptosi needs a float operand");
    assert_eq!(fptosi.state(), NodeState::Uninitialized);
}

#[test]
fn test_vector_node() {
    let node = VectorNode::new(VectorOp::Extract, 2);
    let v = Value::Vector(vec![Value::I32(5), Value::I32(6)]);
    assert_eq!(node.execute(&[&v, &Value::I32(1)]).expect("extract"), Value::I32(6));
    assert!(matches!(node.state(), NodeState::Specialized(_)));

    let wide = Value::Vector(vec![Value::I32(1), Value::I32(2), Value::I32(3)]);
    let err = node
        .execute(&[&wide, &Value::I32(0)])
        .expect_err("declared lane count is 2");
    assert_eq!(
        err,
        InterpError::InvalidVectorShape {
            opcode: "extractelement".into(),
            expected: 2,
            found: 3,
        }
    );

    let insert = VectorNode::new(VectorOp::Insert, 2);
    assert_eq!(
        insert.execute(&[&v, &Value::I32(9), &Value::I32(0)]).expect("insert"),
        Value::Vector(vec![Value::I32(9), Value::I32(6)])
    );
}

#[test]
fn test_concurrent_specialization_agrees() {
    common::init();
    let node = ArithNode::new(BinOp::Add);
    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for i in 0..500 {
                    let r = node.execute(&Value::I32(i), &Value::I32(i)).expect("i32 add");
                    assert_eq!(r, Value::I32(2 * i));
                }
            });
        }
    });
    assert_eq!(node.state(), NodeState::Specialized(TypeTag::I32.key()));
    assert_eq!(node.generic_transitions(), 0);
}

#[test]
fn test_concurrent_generalization_happens_once() {
    let node = ArithNode::new(BinOp::Sub);
    std::thread::scope(|s| {
        for t in 0..8 {
            let node = &node;
            s.spawn(move || {
                for i in 0..200i64 {
                    if t % 2 == 0 {
                        let r = node.execute(&Value::I32(i as i32), &Value::I32(1)).expect("i32 sub");
                        assert_eq!(r, Value::I32(i as i32 - 1));
                    } else {
                        let r = node.execute(&Value::I64(i), &Value::I64(1)).expect("i64 sub");
                        assert_eq!(r, Value::I64(i - 1));
                    }
                }
            });
        }
    });
    assert_eq!(node.state(), NodeState::Generic);
    assert_eq!(node.generic_transitions(), 1);
}

#[test]
fn test_engine_reports_node_states() {
    let engine = common::engine(common::sum_module());
    // Nodes are built on the first call.
    assert!(engine.node_states("sum").is_none());

    engine
        .call("sum", &[bcvm::interp::Value::I32(4)])
        .expect("sum should run");
    let after = engine.node_states("sum").expect("sum exists");
    let adds: Vec<_> = after.iter().filter(|n| n.opcode == "add").collect();
    assert_eq!(adds.len(), 2);
    for n in adds {
        assert_eq!(n.state, NodeState::Specialized(TypeTag::I32.key()));
        assert_eq!(n.generic_transitions, 0);
    }
    let icmp = after
        .iter()
        .find(|n| n.opcode == "icmp")
        .expect("loop compares");
    assert_eq!(icmp.state, NodeState::Specialized(TypeTag::I32.key()));
    assert!(engine.node_states("missing").is_none());
}

#[test]
fn test_vector_and_wide_integer_keys_are_distinct() {
    let lanes = [
        Value::I1(false),
        Value::I8(0),
        Value::I32(0),
        Value::I64(0),
        Value::Double(0.0),
        Value::Pointer(0),
    ];
    let wide: Vec<u32> = [3u32, 24, 128, 3841, 3852, 1 << 23].iter().map(|&b| TypeTag::Int(b).key()).collect();
    for lane in lanes {
        let tag = lane.tag();
        let v = Value::Vector(vec![lane.clone(), lane]);
        assert!(!wide.contains(&v.key()), "<2 x {}> collides with a wide integer", tag);
        assert_ne!(v.key(), tag.key());
    }
    let mut sorted = wide.clone();
    sorted.dedup();
    assert_eq!(sorted.len(), wide.len());
}

#[test]
fn test_vector_compare_specializes_on_lane_type() {
    let node = CompareNode::new(CmpPredicate::ISlt);
    let a = Value::Vector(vec![Value::I32(1), Value::I32(5)]);
    let b = Value::Vector(vec![Value::I32(3), Value::I32(3)]);
    assert_eq!(
        node.execute(&a, &b).expect("vector icmp"),
        Value::Vector(vec![Value::I1(true), Value::I1(false)])
    );
    assert_eq!(node.state(), NodeState::Specialized(a.key()));

    let c = Value::Vector(vec![Value::I64(-1), Value::I64(7)]);
    let d = Value::Vector(vec![Value::I64(0), Value::I64(7)]);
    assert_eq!(
        node.execute(&c, &d).expect("vector icmp"),
        Value::Vector(vec![Value::I1(true), Value::I1(false)])
    );
    assert_eq!(node.state(), NodeState::Generic);
    assert_eq!(node.generic_transitions(), 1);
}

#[test]
fn test_vector_cast_specializes_on_lane_type() {
    let node = CastNode::new(
        CastOp::SExt,
        CastTarget {
            scalar: ScalarTarget::Int(64),
            lanes: Some(2),
        },
    );
    let v = Value::Vector(vec![Value::I8(-1), Value::I8(2)]);
    assert_eq!(
        node.execute(&v).expect("vector sext"),
        Value::Vector(vec![Value::I64(-1), Value::I64(2)])
    );
    assert_eq!(node.state(), NodeState::Specialized(v.key()));

    let floats = Value::Vector(vec![Value::Float(1.0), Value::Float(2.0)]);
    node.execute(&floats).expect_err("sext needs integer lanes");
    assert_eq!(node.state(), NodeState::Specialized(v.key()));

    let w = Value::Vector(vec![Value::I16(-2), Value::I16(3)]);
    assert_eq!(
        node.execute(&w).expect("vector sext"),
        Value::Vector(vec![Value::I64(-2), Value::I64(3)])
    );
    assert_eq!(node.state(), NodeState::Generic);
}
