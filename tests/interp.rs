//! Block dispatch, phi assignment and operation semantics.

mod common;

use bcvm::error::InterpError;
use bcvm::interp::{Engine, Value};
use bcvm::ir::{
    AtomicOrdering, BinOp, CastOp, CmpPredicate, Constant, ConstantKind, FloatKind, FunctionBuilder,
    Instruction, Module, TypeId,
};
use bcvm::EngineConfig;

/// Declares `name` and fills its body starting in an `entry` block. The
/// closure receives the void type for terminators.
fn define(
    m: &mut Module,
    name: &str,
    ret: TypeId,
    params: &[TypeId],
    body: impl FnOnce(&mut FunctionBuilder<'_>, TypeId),
) {
    let void = m.types.void();
    let mut b = FunctionBuilder::new(m, name, ret, params).expect("should declare function");
    let entry = b.create_block(Some("entry"));
    b.set_current_block(entry);
    body(&mut b, void);
    b.finish();
}

fn ret(b: &mut FunctionBuilder<'_>, void: TypeId, value: bcvm::ir::ValueRef) {
    b.push(Instruction::Ret { value: Some(value) }, void);
}

/// `ret op(a, b)` over two parameters of type `ty`.
fn binary_module(op: BinOp, ty_of: impl FnOnce(&mut Module) -> TypeId) -> Module {
    let mut m = Module::new("binary");
    let ty = ty_of(&mut m);
    define(&mut m, "f", ty, &[ty, ty], |b, void| {
        let (x, y) = (b.param(0), b.param(1));
        let r = b
            .push(Instruction::Binary { op, lhs: x, rhs: y }, ty)
            .expect("binary defines a value");
        ret(b, void, r);
    });
    m
}

fn call(engine: &Engine, name: &str, args: &[Value]) -> Option<Value> {
    engine.call(name, args).expect("call should succeed")
}

#[test]
fn test_conditional_branch() {
    common::init();
    let engine = common::engine(common::branch_module());
    assert_eq!(call(&engine, "pick", &[Value::I1(true)]), Some(Value::I32(101)));
    assert_eq!(call(&engine, "pick", &[Value::I1(false)]), Some(Value::I32(102)));
}

#[test]
fn test_integer_arithmetic_wraps_at_width() {
    let engine = common::engine(binary_module(BinOp::Add, |m| m.types.int(8)));
    assert_eq!(
        call(&engine, "f", &[Value::I8(120), Value::I8(10)]),
        Some(Value::I8(-126))
    );
}

#[test]
fn test_odd_width_integers() {
    let engine = common::engine(binary_module(BinOp::Mul, |m| m.types.int(12)));
    let a = Value::Int { bits: 12, value: 100 };
    let b = Value::Int { bits: 12, value: 50 };
    // 5000 mod 4096
    assert_eq!(call(&engine, "f", &[a, b]), Some(Value::Int { bits: 12, value: 904 }));
}

#[test]
fn test_shift_amount_is_reduced_modulo_width() {
    let engine = common::engine(binary_module(BinOp::Shl, |m| m.types.int(32)));
    assert_eq!(call(&engine, "f", &[Value::I32(1), Value::I32(33)]), Some(Value::I32(2)));
}

#[test]
fn test_division_by_zero() {
    let engine = common::engine(binary_module(BinOp::SDiv, |m| m.types.int(32)));
    assert_eq!(call(&engine, "f", &[Value::I32(-9), Value::I32(2)]), Some(Value::I32(-4)));
    let err = engine
        .call("f", &[Value::I32(1), Value::I32(0)])
        .expect_err("division by zero traps");
    assert!(matches!(err, InterpError::DivisionByZero { .. }));
}

#[test]
fn test_float_arithmetic() {
    let engine = common::engine(binary_module(BinOp::FMul, |m| m.types.float(FloatKind::Double)));
    assert_eq!(
        call(&engine, "f", &[Value::Double(1.5), Value::Double(-4.0)]),
        Some(Value::Double(-6.0))
    );
}

#[test]
fn test_phi_loop() {
    common::init();
    let engine = common::engine(common::sum_module());
    assert_eq!(call(&engine, "sum", &[Value::I32(10)]), Some(Value::I32(55)));
    assert_eq!(call(&engine, "sum", &[Value::I32(1)]), Some(Value::I32(1)));
    assert_eq!(call(&engine, "sum", &[Value::I32(100)]), Some(Value::I32(5050)));
}

/// `i32 swap(i32 n)`: exchanges two phis `n` times and returns the second.
fn swap_module() -> Module {
    let mut m = Module::new("swap");
    let i1 = m.types.int(1);
    let i32t = m.types.int(32);
    let void = m.types.void();
    let mut b = FunctionBuilder::new(&mut m, "swap", i32t, &[i32t]).expect("should declare swap");
    let fid = b.id();
    let entry = b.create_block(Some("entry"));
    let body = b.create_block(Some("loop"));
    let exit = b.create_block(Some("exit"));
    let n = b.param(0);
    let zero = b.const_int(i32t, 0);
    let one = b.const_int(i32t, 1);
    let two = b.const_int(i32t, 2);

    b.set_current_block(entry);
    b.push(Instruction::Br { target: body }, void);
    b.set_current_block(body);
    let placeholder = Instruction::Phi { incoming: Vec::new() };
    let x = b.push_named(placeholder.clone(), i32t, Some("x")).expect("phi");
    let y = b.push_named(placeholder.clone(), i32t, Some("y")).expect("phi");
    let k = b.push_named(placeholder, i32t, Some("k")).expect("phi");
    let k1 = b
        .push(Instruction::Binary { op: BinOp::Add, lhs: k, rhs: one }, i32t)
        .expect("add");
    let done = b
        .push(
            Instruction::Compare {
                pred: CmpPredicate::IEq,
                lhs: k1,
                rhs: n,
            },
            i1,
        )
        .expect("icmp");
    b.push(
        Instruction::CondBr {
            cond: done,
            then_block: exit,
            else_block: body,
        },
        void,
    );
    common::patch_phi(b.module(), fid, body, 0, vec![(one, entry), (y, body)]);
    common::patch_phi(b.module(), fid, body, 1, vec![(two, entry), (x, body)]);
    common::patch_phi(b.module(), fid, body, 2, vec![(zero, entry), (k1, body)]);
    b.set_current_block(exit);
    b.push(Instruction::Ret { value: Some(y) }, void);
    b.finish();
    m
}

#[test]
fn test_phis_assign_in_parallel() {
    let engine = common::engine(swap_module());
    // One pass: (x, y) = (1, 2).
    assert_eq!(call(&engine, "swap", &[Value::I32(1)]), Some(Value::I32(2)));
    // Second pass swaps: (2, 1). Sequential assignment would give (2, 2).
    assert_eq!(call(&engine, "swap", &[Value::I32(2)]), Some(Value::I32(1)));
    assert_eq!(call(&engine, "swap", &[Value::I32(3)]), Some(Value::I32(2)));
}

#[test]
fn test_switch() {
    let mut m = Module::new("switch");
    let i32t = m.types.int(32);
    let void = m.types.void();
    let mut b = FunctionBuilder::new(&mut m, "classify", i32t, &[i32t]).expect("should declare classify");
    let entry = b.create_block(Some("entry"));
    let other = b.create_block(Some("other"));
    let one = b.create_block(Some("one"));
    let two = b.create_block(Some("two"));
    let x = b.param(0);
    let k1 = b.const_int(i32t, 1);
    let k2 = b.const_int(i32t, 2);
    let r99 = b.const_int(i32t, 99);
    let r10 = b.const_int(i32t, 10);
    let r20 = b.const_int(i32t, 20);
    b.set_current_block(entry);
    b.push(
        Instruction::Switch {
            cond: x,
            default: other,
            cases: vec![(k1, one), (k2, two)],
        },
        void,
    );
    for (block, value) in [(other, r99), (one, r10), (two, r20)] {
        b.set_current_block(block);
        b.push(Instruction::Ret { value: Some(value) }, void);
    }
    b.finish();

    let engine = common::engine(m);
    assert_eq!(call(&engine, "classify", &[Value::I32(1)]), Some(Value::I32(10)));
    assert_eq!(call(&engine, "classify", &[Value::I32(2)]), Some(Value::I32(20)));
    assert_eq!(call(&engine, "classify", &[Value::I32(-5)]), Some(Value::I32(99)));
    // Default edge is successor 0, cases follow.
    let profile = engine.branch_profile("classify").expect("classify has run");
    assert_eq!(profile[0], vec![1, 1, 1]);
}

#[test]
fn test_select() {
    let mut m = Module::new("select");
    let i1 = m.types.int(1);
    let i32t = m.types.int(32);
    define(&mut m, "max", i32t, &[i32t, i32t], |b, void| {
        let (x, y) = (b.param(0), b.param(1));
        let gt = b
            .push(
                Instruction::Compare {
                    pred: CmpPredicate::ISgt,
                    lhs: x,
                    rhs: y,
                },
                i1,
            )
            .expect("icmp");
        let r = b
            .push(
                Instruction::Select {
                    cond: gt,
                    then_value: x,
                    else_value: y,
                },
                i32t,
            )
            .expect("select");
        ret(b, void, r);
    });
    let engine = common::engine(m);
    assert_eq!(call(&engine, "max", &[Value::I32(-3), Value::I32(7)]), Some(Value::I32(7)));
    assert_eq!(call(&engine, "max", &[Value::I32(9), Value::I32(7)]), Some(Value::I32(9)));
}

#[test]
fn test_branch_profile() {
    let engine = common::engine(common::branch_module());
    assert_eq!(engine.branch_profile("pick"), None);
    for c in [true, true, false] {
        call(&engine, "pick", &[Value::I1(c)]);
    }
    assert_eq!(
        engine.branch_profile("pick"),
        Some(vec![vec![2, 1], vec![2], vec![1]])
    );
}

#[test]
fn test_branch_profiling_disabled() {
    let config = EngineConfig {
        branch_profiling: false,
        ..EngineConfig::default()
    };
    let engine = Engine::new(common::branch_module(), config).expect("engine should load");
    call(&engine, "pick", &[Value::I1(true)]);
    assert_eq!(
        engine.branch_profile("pick"),
        Some(vec![vec![0, 0], vec![0], vec![0]])
    );
}

#[test]
fn test_recursion() {
    common::init();
    let engine = common::engine(common::factorial_module());
    assert_eq!(call(&engine, "fact", &[Value::I32(10)]), Some(Value::I32(3_628_800)));
}

#[test]
fn test_call_depth_limit() {
    let config = EngineConfig {
        max_call_depth: 16,
        ..EngineConfig::default()
    };
    let engine = Engine::new(common::factorial_module(), config).expect("engine should load");
    assert_eq!(call(&engine, "fact", &[Value::I32(5)]), Some(Value::I32(120)));
    let err = engine
        .call("fact", &[Value::I32(100)])
        .expect_err("100 frames exceed the limit");
    assert_eq!(err, InterpError::StackOverflow { limit: 16 });
}

#[test]
fn test_default_call_depth_limit() {
    common::init();
    let engine = common::engine(common::factorial_module());
    assert_eq!(engine.call_depth_limit(), 512);
    // 500! has far more than 32 factors of two.
    assert_eq!(call(&engine, "fact", &[Value::I32(500)]), Some(Value::I32(0)));
    let err = engine
        .call("fact", &[Value::I32(1000)])
        .expect_err("1000 frames exceed the default limit");
    assert_eq!(err, InterpError::StackOverflow { limit: 512 });
    assert_eq!(bcvm::Error::from(err).diagnostic_code(), "E0408");
}

#[test]
fn test_arity_mismatch() {
    let engine = common::engine(common::factorial_module());
    let err = engine.call("fact", &[]).expect_err("fact takes one argument");
    assert!(matches!(
        err,
        InterpError::ArityMismatch {
            expected: 1,
            found: 0,
            ..
        }
    ));
}

fn external_module() -> Module {
    let mut m = Module::new("externals");
    let i32t = m.types.int(32);
    let twice_ty = m.types.function(i32t, vec![i32t], false);
    let (twice, twice_ref) = m.declare_function("twice", twice_ty).expect("should declare twice");
    assert!(m.function(twice).is_some());
    define(&mut m, "main", i32t, &[], |b, void| {
        let k = b.const_int(i32t, 21);
        let r = b
            .push(
                Instruction::Call {
                    callee: twice_ref,
                    fn_ty: twice_ty,
                    args: vec![k],
                },
                i32t,
            )
            .expect("call");
        ret(b, void, r);
    });
    m
}

#[test]
fn test_registered_external() {
    let engine = common::engine(external_module());
    engine.register_external("twice", |_: &Engine, args: &[Value]| -> Result<Option<Value>, InterpError> {
        let v = args.first().and_then(Value::as_signed).unwrap_or(0);
        Ok(Some(Value::I32((v * 2) as i32)))
    });
    assert_eq!(call(&engine, "main", &[]), Some(Value::I32(42)));
}

#[test]
fn test_missing_external() {
    let engine = common::engine(external_module());
    let err = engine.call("main", &[]).expect_err("twice has no body");
    assert_eq!(err, InterpError::UnknownFunction { name: "twice".into() });
}

#[test]
fn test_stack_memory() {
    let mut m = Module::new("memory");
    let i32t = m.types.int(32);
    let i64t = m.types.int(64);
    let arr_ty = m.types.array(i32t, 4);
    let arr_ptr = m.types.pointer_to(arr_ty);
    let i32p = m.types.pointer_to(i32t);
    define(&mut m, "mem", i32t, &[], |b, void| {
        let count = b.const_int(i32t, 1);
        let zero = b.const_int(i64t, 0);
        let idx1 = b.const_int(i64t, 1);
        let idx2 = b.const_int(i64t, 2);
        let seven = b.const_int(i32t, 7);
        let five = b.const_int(i32t, 5);
        let base = b
            .push(
                Instruction::Alloca {
                    allocated: arr_ty,
                    count,
                    align: 4,
                },
                arr_ptr,
            )
            .expect("alloca");
        let element = |b: &mut FunctionBuilder<'_>, index| {
            b.push(
                Instruction::GetElementPtr {
                    source_ty: arr_ty,
                    base,
                    indices: vec![zero, index],
                    inbounds: true,
                },
                i32p,
            )
            .expect("gep")
        };
        let p2 = element(b, idx2);
        let p1 = element(b, idx1);
        for (ptr, value) in [(p2, seven), (p1, five)] {
            b.push(
                Instruction::Store {
                    ptr,
                    value,
                    align: 4,
                    volatile: false,
                    ordering: AtomicOrdering::NotAtomic,
                },
                void,
            );
        }
        let loaded = b
            .push(
                Instruction::Load {
                    ptr: p2,
                    align: 4,
                    volatile: false,
                    ordering: AtomicOrdering::NotAtomic,
                },
                i32t,
            )
            .expect("load");
        ret(b, void, loaded);
    });

    let engine = common::engine(m);
    assert_eq!(call(&engine, "mem", &[]), Some(Value::I32(7)));
    // Stack allocations do not outlive the call.
    assert_eq!(
        engine.memory().live_allocations(bcvm::interp::AllocKind::Stack),
        0
    );
}

#[test]
fn test_alloca_with_oversized_count() {
    let mut m = Module::new("alloca");
    let i8t = m.types.int(8);
    let i32t = m.types.int(32);
    let i64t = m.types.int(64);
    let i8p = m.types.pointer_to(i8t);
    define(&mut m, "grab", i32t, &[i64t], |b, void| {
        let count = b.param(0);
        b.push(
            Instruction::Alloca {
                allocated: i8t,
                count,
                align: 1,
            },
            i8p,
        )
        .expect("alloca");
        let zero = b.const_int(i32t, 0);
        ret(b, void, zero);
    });

    let engine = common::engine(m);
    assert_eq!(call(&engine, "grab", &[Value::I64(1 << 20)]), Some(Value::I32(0)));
    for count in [-1, 1 << 40, i64::MAX] {
        let err = engine
            .call("grab", &[Value::I64(count)])
            .expect_err("allocation should be refused");
        assert!(matches!(err, InterpError::AllocationTooLarge { .. }), "{}", err);
        assert_eq!(bcvm::Error::from(err).diagnostic_code(), "E0414");
    }
    assert_eq!(
        engine.memory().live_allocations(bcvm::interp::AllocKind::Stack),
        0
    );
}

fn cast_module(op: CastOp, from: impl FnOnce(&mut Module) -> TypeId, to: impl FnOnce(&mut Module) -> TypeId) -> Module {
    let mut m = Module::new("cast");
    let from = from(&mut m);
    let to = to(&mut m);
    define(&mut m, "conv", to, &[from], |b, void| {
        let x = b.param(0);
        let r = b
            .push(Instruction::Cast { op, value: x, to }, to)
            .expect("cast defines a value");
        ret(b, void, r);
    });
    m
}

#[test]
fn test_float_to_int_saturates() {
    let engine = common::engine(cast_module(
        CastOp::FpToSi,
        |m| m.types.float(FloatKind::Double),
        |m| m.types.int(32),
    ));
    let conv = |x: f64| call(&engine, "conv", &[Value::Double(x)]);
    assert_eq!(conv(3.9), Some(Value::I32(3)));
    assert_eq!(conv(-3.9), Some(Value::I32(-3)));
    assert_eq!(conv(1e10), Some(Value::I32(i32::MAX)));
    assert_eq!(conv(-1e10), Some(Value::I32(i32::MIN)));
    assert_eq!(conv(f64::NAN), Some(Value::I32(0)));
}

#[test]
fn test_float_to_unsigned_saturates() {
    let engine = common::engine(cast_module(
        CastOp::FpToUi,
        |m| m.types.float(FloatKind::Float),
        |m| m.types.int(8),
    ));
    assert_eq!(call(&engine, "conv", &[Value::Float(300.0)]), Some(Value::I8(-1)));
    assert_eq!(call(&engine, "conv", &[Value::Float(-2.0)]), Some(Value::I8(0)));
    assert_eq!(call(&engine, "conv", &[Value::Float(7.5)]), Some(Value::I8(7)));
}

#[test]
fn test_sign_extension() {
    let engine = common::engine(cast_module(CastOp::SExt, |m| m.types.int(8), |m| m.types.int(64)));
    assert_eq!(call(&engine, "conv", &[Value::I8(-2)]), Some(Value::I64(-2)));
    let engine = common::engine(cast_module(CastOp::ZExt, |m| m.types.int(8), |m| m.types.int(64)));
    assert_eq!(call(&engine, "conv", &[Value::I8(-2)]), Some(Value::I64(254)));
}

#[test]
fn test_unreachable() {
    let mut m = Module::new("dead");
    let i32t = m.types.int(32);
    define(&mut m, "dead", i32t, &[], |b, void| {
        b.push(Instruction::Unreachable, void);
    });
    let engine = common::engine(m);
    let err = engine.call("dead", &[]).expect_err("unreachable traps");
    assert_eq!(err, InterpError::Unreachable { function: "dead".into() });
}

#[test]
fn test_vector_arithmetic() {
    let mut m = Module::new("vectors");
    let i32t = m.types.int(32);
    let v4 = m.types.vector(i32t, 4);
    define(&mut m, "lane", i32t, &[], |b, void| {
        let lanes = |b: &mut FunctionBuilder<'_>, values: [i64; 4]| {
            let elems = values.iter().map(|&v| b.const_int(i32t, v)).collect();
            b.constant(Constant::new(v4, ConstantKind::Aggregate(elems)))
        };
        let xs = lanes(b, [1, 2, 3, 4]);
        let ys = lanes(b, [10, 20, 30, 40]);
        let two = b.const_int(i32t, 2);
        let sum = b
            .push(Instruction::Binary { op: BinOp::Add, lhs: xs, rhs: ys }, v4)
            .expect("vector add");
        let lane = b
            .push(Instruction::ExtractElement { vector: sum, index: two }, i32t)
            .expect("extractelement");
        ret(b, void, lane);
    });
    let engine = common::engine(m);
    assert_eq!(call(&engine, "lane", &[]), Some(Value::I32(33)));
}

#[test]
fn test_concurrent_calls_share_one_engine() {
    common::init();
    let engine = common::engine(common::sum_module());
    std::thread::scope(|s| {
        let handles: Vec<_> = (1..=8)
            .map(|n| {
                let engine = &engine;
                s.spawn(move || {
                    let r = engine.call("sum", &[Value::I32(n)]).expect("sum should run");
                    (n, r)
                })
            })
            .collect();
        for h in handles {
            let (n, r) = h.join().expect("thread should not panic");
            assert_eq!(r, Some(Value::I32(n * (n + 1) / 2)));
        }
    });
    let profile = engine.branch_profile("sum").expect("sum has run");
    // Entry runs once per call.
    assert_eq!(profile[0], vec![8]);
}
