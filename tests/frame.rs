//! Slot layout and dead-slot analysis.

mod common;

use bcvm::frame::{analyze, BlockNullers, FrameDescriptor, SlotId, SlotKind};
use bcvm::interp::Value;
use bcvm::ir::{BinOp, FunctionBuilder, FunctionId, Instruction, Module, ValueRef};

/// `i32 f(i1 c, i32 a)`:
///
/// ```text
/// b0: x = add a, 1; br c, b1, b2
/// b1: y = mul x, 2; br b3
/// b2: br b3
/// b3: p = phi [y, b1], [x, b2]; ret p
/// ```
fn diamond() -> (Module, FunctionId) {
    let mut m = Module::new("diamond");
    let i1 = m.types.int(1);
    let i32t = m.types.int(32);
    let void = m.types.void();
    let mut b = FunctionBuilder::new(&mut m, "f", i32t, &[i1, i32t]).expect("should declare f");
    let fid = b.id();
    let b0 = b.create_block(None);
    let b1 = b.create_block(None);
    let b2 = b.create_block(None);
    let b3 = b.create_block(None);
    let c = b.param(0);
    let a = b.param(1);
    let one = b.const_int(i32t, 1);
    let two = b.const_int(i32t, 2);

    b.set_current_block(b0);
    let x = b
        .push_named(Instruction::Binary { op: BinOp::Add, lhs: a, rhs: one }, i32t, Some("x"))
        .expect("add defines a value");
    b.push(
        Instruction::CondBr {
            cond: c,
            then_block: b1,
            else_block: b2,
        },
        void,
    );
    b.set_current_block(b1);
    let y = b
        .push_named(Instruction::Binary { op: BinOp::Mul, lhs: x, rhs: two }, i32t, Some("y"))
        .expect("mul defines a value");
    b.push(Instruction::Br { target: b3 }, void);
    b.set_current_block(b2);
    b.push(Instruction::Br { target: b3 }, void);
    b.set_current_block(b3);
    let p = b
        .push_named(
            Instruction::Phi {
                incoming: vec![(y, b1), (x, b2)],
            },
            i32t,
            Some("p"),
        )
        .expect("phi defines a value");
    b.push(Instruction::Ret { value: Some(p) }, void);
    b.finish();
    (m, fid)
}

fn slots(ids: &[u32]) -> Vec<SlotId> {
    ids.iter().map(|&i| SlotId(i)).collect()
}

#[test]
fn test_slot_layout() {
    let (m, fid) = diamond();
    let func = m.function(fid).expect("f exists");
    let frame = FrameDescriptor::build(&m, func);

    assert_eq!(frame.slot_count(), 7);
    assert_eq!(frame.return_slot(), Some(SlotId(0)));
    assert_eq!(frame.stack_slot(), SlotId(1));
    assert_eq!(frame.param_slots(), &[SlotId(2), SlotId(3)][..]);
    assert_eq!(frame.kind(SlotId(0)), Some(SlotKind::Int32));
    assert_eq!(frame.kind(SlotId(1)), Some(SlotKind::Object));
    assert_eq!(frame.kind(SlotId(2)), Some(SlotKind::Boolean));
    assert_eq!(frame.kind(SlotId(3)), Some(SlotKind::Int32));

    let names: Vec<&str> = frame.iter().map(|(_, s)| s.name.as_str()).collect();
    assert_eq!(names, vec!["ret", "sp", "arg0", "arg1", "x", "y", "p"]);
    assert_eq!(frame.value_slot(func.param_ref(1)), Some(SlotId(3)));
    // Local constants follow the parameters and have no slot.
    assert_eq!(frame.value_slot(ValueRef(func.local_base + 2)), None);
}

#[test]
fn test_void_function_has_no_return_slot() {
    let mut m = Module::new("void");
    let void = m.types.void();
    let i64t = m.types.int(64);
    let mut b = FunctionBuilder::new(&mut m, "noop", void, &[i64t]).expect("should declare noop");
    let entry = b.create_block(None);
    b.set_current_block(entry);
    b.push(Instruction::Ret { value: None }, void);
    let fid = b.finish();

    let func = m.function(fid).expect("noop exists");
    let frame = FrameDescriptor::build(&m, func);
    assert_eq!(frame.return_slot(), None);
    assert_eq!(frame.stack_slot(), SlotId(0));
    assert_eq!(frame.param_slot(0), Some(SlotId(1)));
    assert_eq!(frame.kind(SlotId(1)), Some(SlotKind::Int64));
    assert_eq!(frame.slot_count(), 2);
}

#[test]
fn test_diamond_nullers() {
    let (m, fid) = diamond();
    let func = m.function(fid).expect("f exists");
    let frame = FrameDescriptor::build(&m, func);
    let nullers = analyze(func, &frame);

    assert_eq!(
        nullers,
        vec![
            // c and a die in the entry block; x flows on.
            BlockNullers {
                before: vec![],
                after: slots(&[2, 3]),
            },
            // y is live into the phi edge; x is not.
            BlockNullers {
                before: vec![],
                after: slots(&[4]),
            },
            BlockNullers {
                before: vec![],
                after: vec![],
            },
            // Whichever phi input did not arrive is cleared on entry.
            BlockNullers {
                before: slots(&[4, 5]),
                after: slots(&[6]),
            },
        ]
    );
}

#[test]
fn test_loop_keeps_carried_values_alive() {
    let m = common::sum_module();
    let func = m.function_by_name("sum").expect("sum exists");
    let frame = FrameDescriptor::build(&m, func);
    let nullers = analyze(func, &frame);
    let n = frame.param_slot(0).expect("n has a slot");

    // `n` is compared on every iteration, so the loop never clears it.
    assert!(!nullers[1].after.contains(&n));
    assert!(!nullers[1].before.contains(&n));
    // The exit block returns the accumulator and then drops it.
    let acc_next = nullers[2].after.clone();
    assert_eq!(acc_next.len(), 1);
}

#[test]
fn test_nulling_does_not_change_results() {
    let (m, _) = diamond();
    let engine = common::engine(m);
    assert_eq!(
        engine
            .call("f", &[Value::I1(true), Value::I32(4)])
            .expect("f should run"),
        Some(Value::I32(10))
    );
    assert_eq!(
        engine
            .call("f", &[Value::I1(false), Value::I32(4)])
            .expect("f should run"),
        Some(Value::I32(5))
    );
}
