//! Program runs: entry arguments, exit paths, static structors, setjmp.

mod common;

use bcvm::error::InterpError;
use bcvm::interp::{AllocKind, RunOutcome, Value, ABORT_EXIT_CODE};
use bcvm::ir::{
    AtomicOrdering, BinOp, CastOp, CmpPredicate, Constant, ConstantKind, FunctionBuilder, FunctionId,
    Instruction, Module, TypeId, ValueRef,
};
use bcvm::writer::write_module;
use bcvm::{Engine, EngineConfig};

fn declare(m: &mut Module, name: &str, ret: TypeId, params: &[TypeId]) -> (FunctionId, ValueRef, TypeId) {
    let fn_ty = m.types.function(ret, params.to_vec(), false);
    let (id, r) = m.declare_function(name, fn_ty).expect("should declare function");
    (id, r, fn_ty)
}

/// Fills the body of a declared function, starting in an `entry` block.
fn body(m: &mut Module, id: FunctionId, fill: impl FnOnce(&mut FunctionBuilder<'_>, TypeId)) {
    let void = m.types.void();
    let mut b = FunctionBuilder::define(m, id);
    let entry = b.create_block(Some("entry"));
    b.set_current_block(entry);
    fill(&mut b, void);
    b.finish();
}

fn load(b: &mut FunctionBuilder<'_>, ptr: ValueRef, ty: TypeId, align: u32) -> ValueRef {
    b.push(
        Instruction::Load {
            ptr,
            align,
            volatile: false,
            ordering: AtomicOrdering::NotAtomic,
        },
        ty,
    )
    .expect("load defines a value")
}

fn store(b: &mut FunctionBuilder<'_>, void: TypeId, ptr: ValueRef, value: ValueRef, align: u32) {
    b.push(
        Instruction::Store {
            ptr,
            value,
            align,
            volatile: false,
            ordering: AtomicOrdering::NotAtomic,
        },
        void,
    );
}

/// `i32 main()` returning `value`.
fn constant_main(value: i64) -> Module {
    let mut m = Module::new("constant");
    let i32t = m.types.int(32);
    let (main, _, _) = declare(&mut m, "main", i32t, &[]);
    body(&mut m, main, |b, void| {
        let v = b.const_int(i32t, value);
        b.push(Instruction::Ret { value: Some(v) }, void);
    });
    m
}

/// `i32 main()` that calls the `void name(i32)` or `void name()` library
/// function and would otherwise return 0.
fn terminating_main(name: &str, with_code: Option<i64>) -> Module {
    let mut m = Module::new("terminate");
    let i32t = m.types.int(32);
    let void = m.types.void();
    let params: Vec<TypeId> = with_code.iter().map(|_| i32t).collect();
    let (_, callee, fn_ty) = declare(&mut m, name, void, &params);
    let (main, _, _) = declare(&mut m, "main", i32t, &[]);
    body(&mut m, main, |b, void| {
        let args = with_code.map(|c| vec![b.const_int(i32t, c)]).unwrap_or_default();
        b.push(Instruction::Call { callee, fn_ty, args }, void);
        let zero = b.const_int(i32t, 0);
        b.push(Instruction::Ret { value: Some(zero) }, void);
    });
    m
}

#[test]
fn test_returned_value_is_exit_code() {
    common::init();
    let engine = common::engine(constant_main(7));
    let outcome = engine.run(&[], &[]).expect("main should run");
    assert_eq!(outcome, RunOutcome::Returned(Some(Value::I32(7))));
    assert_eq!(outcome.exit_code(), 7);
}

#[test]
fn test_exit_ends_the_program() {
    let engine = common::engine(terminating_main("exit", Some(3)));
    let outcome = engine.run(&[], &[]).expect("exit is not an error");
    assert_eq!(outcome, RunOutcome::Exited(3));
    assert_eq!(outcome.exit_code(), 3);
}

#[test]
fn test_abort_reports_sigabrt_status() {
    let engine = common::engine(terminating_main("abort", None));
    let outcome = engine.run(&[], &[]).expect("abort is not an error");
    assert_eq!(outcome.exit_code(), ABORT_EXIT_CODE);
    assert_eq!(ABORT_EXIT_CODE, 134);
}

/// `i32 main(i32 argc, i8** argv)`: returns `argc + argv[1][0]`.
fn argv_module() -> Module {
    let mut m = Module::new("argv");
    let i8t = m.types.int(8);
    let i32t = m.types.int(32);
    let i64t = m.types.int(64);
    let str_ty = m.types.pointer_to(i8t);
    let argv_ty = m.types.pointer_to(str_ty);
    let (main, _, _) = declare(&mut m, "main", i32t, &[i32t, argv_ty]);
    body(&mut m, main, |b, void| {
        let (argc, argv) = (b.param(0), b.param(1));
        let one = b.const_int(i64t, 1);
        let slot = b
            .push(
                Instruction::GetElementPtr {
                    source_ty: str_ty,
                    base: argv,
                    indices: vec![one],
                    inbounds: true,
                },
                argv_ty,
            )
            .expect("gep");
        let s = load(b, slot, str_ty, 8);
        let c = load(b, s, i8t, 1);
        let wide = b
            .push(Instruction::Cast { op: CastOp::SExt, value: c, to: i32t }, i32t)
            .expect("sext");
        let r = b
            .push(Instruction::Binary { op: BinOp::Add, lhs: argc, rhs: wide }, i32t)
            .expect("add");
        b.push(Instruction::Ret { value: Some(r) }, void);
    });
    m
}

#[test]
fn test_entry_receives_arguments() {
    common::init();
    let engine = common::engine(argv_module());
    let outcome = engine.run(&["prog", "xyz"], &["HOME=/"]).expect("main should run");
    // argc = 2, 'x' = 120
    assert_eq!(outcome.exit_code(), 122);
    assert_eq!(engine.memory().live_allocations(AllocKind::Arena), 0);
}

/// Global `g` starts at 0. Constructors run `g += 2` (priority 100) and
/// `g *= 10` (priority 65535) listed in the opposite order; `main` returns
/// `g + 1`. The destructor sets `g` to 99.
fn structor_module() -> Module {
    let mut m = Module::new("structors");
    let i32t = m.types.int(32);
    let void = m.types.void();
    let ctor_ty = m.types.function(void, vec![], false);
    let ctor_ptr = m.types.pointer_to(ctor_ty);
    let i8t = m.types.int(8);
    let data_ptr = m.types.pointer_to(i8t);
    let entry_ty = m.types.anon_struct(vec![i32t, ctor_ptr, data_ptr], false);

    let zero = m.add_int_constant(i32t, 0).expect("should add zero");
    let (_, g) = m.add_global("g", i32t, false, Some(zero)).expect("should add g");
    let (scale, scale_ref) = m.declare_function("scale", ctor_ty).expect("should declare scale");
    let (bump, bump_ref) = m.declare_function("bump", ctor_ty).expect("should declare bump");
    let (reset, reset_ref) = m.declare_function("reset", ctor_ty).expect("should declare reset");
    let (main, _, _) = declare(&mut m, "main", i32t, &[]);

    let null = m
        .add_constant(Constant::new(data_ptr, ConstantKind::Null))
        .expect("should add null");
    let entry = |m: &mut Module, priority: i64, f: ValueRef| {
        let p = m.add_int_constant(i32t, priority).expect("should add priority");
        m.add_constant(Constant::new(entry_ty, ConstantKind::Aggregate(vec![p, f, null])))
            .expect("should add entry")
    };
    let late = entry(&mut m, 65535, scale_ref);
    let early = entry(&mut m, 100, bump_ref);
    let last = entry(&mut m, 65535, reset_ref);
    let ctors_ty = m.types.array(entry_ty, 2);
    let dtors_ty = m.types.array(entry_ty, 1);
    let ctors = m
        .add_constant(Constant::new(ctors_ty, ConstantKind::Aggregate(vec![late, early])))
        .expect("should add ctors");
    let dtors = m
        .add_constant(Constant::new(dtors_ty, ConstantKind::Aggregate(vec![last])))
        .expect("should add dtors");
    m.add_global("llvm.global_ctors", ctors_ty, false, Some(ctors))
        .expect("should add ctors list");
    m.add_global("llvm.global_dtors", dtors_ty, false, Some(dtors))
        .expect("should add dtors list");

    let update = |m: &mut Module, id: FunctionId, op: BinOp, by: i64| {
        body(m, id, |b, void| {
            let k = b.const_int(i32t, by);
            let v = load(b, g, i32t, 4);
            let r = b
                .push(Instruction::Binary { op, lhs: v, rhs: k }, i32t)
                .expect("binary");
            store(b, void, g, r, 4);
            b.push(Instruction::Ret { value: None }, void);
        });
    };
    update(&mut m, scale, BinOp::Mul, 10);
    update(&mut m, bump, BinOp::Add, 2);
    body(&mut m, reset, |b, void| {
        let k = b.const_int(i32t, 99);
        store(b, void, g, k, 4);
        b.push(Instruction::Ret { value: None }, void);
    });
    body(&mut m, main, |b, void| {
        let one = b.const_int(i32t, 1);
        let v = load(b, g, i32t, 4);
        let r = b
            .push(Instruction::Binary { op: BinOp::Add, lhs: v, rhs: one }, i32t)
            .expect("add");
        b.push(Instruction::Ret { value: Some(r) }, void);
    });
    m
}

#[test]
fn test_static_structors_run_in_priority_order() {
    common::init();
    let engine = common::engine(structor_module());
    let outcome = engine.run(&[], &[]).expect("program should run");
    // (0 + 2) * 10 + 1
    assert_eq!(outcome.exit_code(), 21);
    let g = engine.global_address("g").expect("g has storage");
    assert_eq!(
        engine.memory().read(g, 4).expect("g is readable"),
        99i32.to_le_bytes().to_vec()
    );

    // Globals are reinitialized for every run.
    let again = engine.run(&[], &[]).expect("program should run again");
    assert_eq!(again.exit_code(), 21);
}

/// `i32 main()`: `r = setjmp(buf); if r == 0 longjmp(buf, 42); return r`.
fn setjmp_module() -> Module {
    let mut m = Module::new("setjmp");
    let i32t = m.types.int(32);
    let i64t = m.types.int(64);
    let i1 = m.types.int(1);
    let void = m.types.void();
    let buf_ptr = m.types.pointer_to(i64t);
    let (_, setjmp, setjmp_ty) = declare(&mut m, "setjmp", i32t, &[buf_ptr]);
    let (_, longjmp, longjmp_ty) = declare(&mut m, "longjmp", void, &[buf_ptr, i32t]);
    let (main, _, _) = declare(&mut m, "main", i32t, &[]);

    let mut b = FunctionBuilder::define(&mut m, main);
    let entry = b.create_block(Some("entry"));
    let jump = b.create_block(Some("jump"));
    let done = b.create_block(Some("done"));
    let one = b.const_int(i32t, 1);
    let zero = b.const_int(i32t, 0);
    let answer = b.const_int(i32t, 42);

    b.set_current_block(entry);
    let buf = b
        .push(
            Instruction::Alloca {
                allocated: i64t,
                count: one,
                align: 8,
            },
            buf_ptr,
        )
        .expect("alloca");
    let r = b
        .push_named(
            Instruction::Call {
                callee: setjmp,
                fn_ty: setjmp_ty,
                args: vec![buf],
            },
            i32t,
            Some("r"),
        )
        .expect("setjmp returns a value");
    let first = b
        .push(
            Instruction::Compare {
                pred: CmpPredicate::IEq,
                lhs: r,
                rhs: zero,
            },
            i1,
        )
        .expect("icmp");
    b.push(
        Instruction::CondBr {
            cond: first,
            then_block: jump,
            else_block: done,
        },
        void,
    );
    b.set_current_block(jump);
    b.push(
        Instruction::Call {
            callee: longjmp,
            fn_ty: longjmp_ty,
            args: vec![buf, answer],
        },
        void,
    );
    b.push(Instruction::Unreachable, void);
    b.set_current_block(done);
    b.push(Instruction::Ret { value: Some(r) }, void);
    b.finish();
    m
}

#[test]
fn test_longjmp_resumes_after_setjmp() {
    common::init();
    let engine = common::engine(setjmp_module());
    let outcome = engine.run(&[], &[]).expect("program should run");
    assert_eq!(outcome, RunOutcome::Returned(Some(Value::I32(42))));
}

#[test]
fn test_longjmp_without_setjmp_escapes() {
    let mut m = Module::new("escape");
    let i32t = m.types.int(32);
    let i64t = m.types.int(64);
    let void = m.types.void();
    let buf_ptr = m.types.pointer_to(i64t);
    let (_, longjmp, longjmp_ty) = declare(&mut m, "longjmp", void, &[buf_ptr, i32t]);
    let (main, _, _) = declare(&mut m, "main", i32t, &[]);
    body(&mut m, main, |b, void| {
        let one = b.const_int(i32t, 1);
        let token = b.const_int(i64t, 99);
        let buf = b
            .push(
                Instruction::Alloca {
                    allocated: i64t,
                    count: one,
                    align: 8,
                },
                buf_ptr,
            )
            .expect("alloca");
        store(b, void, buf, token, 8);
        b.push(
            Instruction::Call {
                callee: longjmp,
                fn_ty: longjmp_ty,
                args: vec![buf, one],
            },
            void,
        );
        b.push(Instruction::Unreachable, void);
    });

    let engine = common::engine(m);
    let err = engine.run(&[], &[]).expect_err("nothing saved token 99");
    assert_eq!(err, InterpError::LongjmpEscaped { token: 99 });
}

#[test]
fn test_entry_with_too_many_parameters() {
    let mut m = Module::new("arity");
    let i32t = m.types.int(32);
    let (main, _, _) = declare(&mut m, "main", i32t, &[i32t, i32t, i32t, i32t]);
    body(&mut m, main, |b, void| {
        let zero = b.const_int(i32t, 0);
        b.push(Instruction::Ret { value: Some(zero) }, void);
    });
    let engine = common::engine(m);
    let err = engine.run(&[], &[]).expect_err("main takes four parameters");
    assert_eq!(
        err,
        InterpError::ArityMismatch {
            function: "main".into(),
            expected: 3,
            found: 4
        }
    );
}

#[test]
fn test_missing_entry_point() {
    let engine = common::engine(constant_main(0));
    let err = engine
        .call("start", &[])
        .expect_err("there is no start function");
    assert!(matches!(err, InterpError::UnknownFunction { .. }));

    let custom = Engine::new(
        constant_main(0),
        EngineConfig::default().with_entry_point("start"),
    )
    .expect("engine should load");
    let err = custom.run(&[], &[]).expect_err("entry point is missing");
    assert_eq!(err, InterpError::UnknownFunction { name: "start".into() });
}

#[test]
fn test_run_bitcode_end_to_end() {
    common::init();
    let bytes = write_module(&terminating_main("exit", Some(5))).expect("module should serialize");
    let outcome = bcvm::run_bitcode(&bytes, &["prog"], &[]).expect("bitcode should run");
    assert_eq!(outcome, RunOutcome::Exited(5));

    let bytes = write_module(&constant_main(9)).expect("module should serialize");
    let engine = bcvm::load(&bytes, &bcvm::ParseOptions::default(), EngineConfig::default())
        .expect("bitcode should load");
    assert_eq!(engine.run(&[], &[]).expect("main should run").exit_code(), 9);
}
