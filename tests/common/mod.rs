//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use bcvm::decode::parse_module;
use bcvm::ir::{
    CmpPredicate, FunctionBuilder, FunctionId, Instruction, Module, BinOp, ValueRef,
};
use bcvm::writer::write_module;
use bcvm::{Engine, EngineConfig, ParseOptions};
use tracing_subscriber::EnvFilter;

/// Routes `tracing` output through the test harness; honours `RUST_LOG`.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn engine(module: Module) -> Engine {
    Engine::new(module, EngineConfig::default()).expect("engine should load the module")
}

/// Serializes `module` and decodes the result.
pub fn roundtrip(module: &Module) -> Module {
    let bytes = write_module(module).expect("module should serialize");
    parse_module(&bytes, &ParseOptions::default()).expect("serialized module should decode")
}

/// Replaces the phi at `block[index]` once its incoming values exist.
pub fn patch_phi(m: &mut Module, f: FunctionId, block: u32, index: usize, incoming: Vec<(ValueRef, u32)>) {
    let func = m.function_mut(f).expect("function should exist");
    func.blocks[block as usize].instrs[index].instr = Instruction::Phi { incoming };
}

/// `i32 pick(i1 c)`: returns 101 when `c` is true and 102 otherwise.
pub fn branch_module() -> Module {
    let mut m = Module::new("branch");
    let i1 = m.types.int(1);
    let i32t = m.types.int(32);
    let void = m.types.void();
    let mut b = FunctionBuilder::new(&mut m, "pick", i32t, &[i1]).expect("should declare pick");
    let entry = b.create_block(Some("entry"));
    let yes = b.create_block(Some("yes"));
    let no = b.create_block(Some("no"));
    let c = b.param(0);
    let k101 = b.const_int(i32t, 101);
    let k102 = b.const_int(i32t, 102);

    b.set_current_block(entry);
    b.push(
        Instruction::CondBr {
            cond: c,
            then_block: yes,
            else_block: no,
        },
        void,
    );
    b.set_current_block(yes);
    b.push(Instruction::Ret { value: Some(k101) }, void);
    b.set_current_block(no);
    b.push(Instruction::Ret { value: Some(k102) }, void);
    b.finish();
    m
}

/// `i32 sum(i32 n)`: adds `1..=n` in a phi loop.
pub fn sum_module() -> Module {
    let mut m = Module::new("sum");
    let i1 = m.types.int(1);
    let i32t = m.types.int(32);
    let void = m.types.void();
    let mut b = FunctionBuilder::new(&mut m, "sum", i32t, &[i32t]).expect("should declare sum");
    let fid = b.id();
    let entry = b.create_block(Some("entry"));
    let body = b.create_block(Some("loop"));
    let exit = b.create_block(Some("exit"));
    let n = b.param(0);
    let zero = b.const_int(i32t, 0);
    let one = b.const_int(i32t, 1);

    b.set_current_block(entry);
    b.push(Instruction::Br { target: body }, void);

    b.set_current_block(body);
    let placeholder = Instruction::Phi { incoming: Vec::new() };
    let i = b.push_named(placeholder.clone(), i32t, Some("i")).expect("phi defines a value");
    let acc = b.push_named(placeholder, i32t, Some("acc")).expect("phi defines a value");
    let acc2 = b
        .push_named(Instruction::Binary { op: BinOp::Add, lhs: acc, rhs: i }, i32t, Some("acc.next"))
        .expect("add defines a value");
    let i2 = b
        .push_named(Instruction::Binary { op: BinOp::Add, lhs: i, rhs: one }, i32t, Some("i.next"))
        .expect("add defines a value");
    let done = b
        .push(
            Instruction::Compare {
                pred: CmpPredicate::ISgt,
                lhs: i2,
                rhs: n,
            },
            i1,
        )
        .expect("icmp defines a value");
    b.push(
        Instruction::CondBr {
            cond: done,
            then_block: exit,
            else_block: body,
        },
        void,
    );
    patch_phi(b.module(), fid, body, 0, vec![(one, entry), (i2, body)]);
    patch_phi(b.module(), fid, body, 1, vec![(zero, entry), (acc2, body)]);

    b.set_current_block(exit);
    b.push(Instruction::Ret { value: Some(acc2) }, void);
    b.finish();
    m
}

/// `i32 fact(i32 n)`, recursive.
pub fn factorial_module() -> Module {
    let mut m = Module::new("fact");
    let i1 = m.types.int(1);
    let i32t = m.types.int(32);
    let void = m.types.void();
    let fn_ty = m.types.function(i32t, vec![i32t], false);
    let mut b = FunctionBuilder::new(&mut m, "fact", i32t, &[i32t]).expect("should declare fact");
    let me = b.function_ref(b.id()).expect("fact is a module symbol");
    let entry = b.create_block(Some("entry"));
    let base = b.create_block(Some("base"));
    let step = b.create_block(Some("step"));
    let n = b.param(0);
    let one = b.const_int(i32t, 1);

    b.set_current_block(entry);
    let small = b
        .push(
            Instruction::Compare {
                pred: CmpPredicate::ISle,
                lhs: n,
                rhs: one,
            },
            i1,
        )
        .expect("icmp defines a value");
    b.push(
        Instruction::CondBr {
            cond: small,
            then_block: base,
            else_block: step,
        },
        void,
    );
    b.set_current_block(base);
    b.push(Instruction::Ret { value: Some(one) }, void);
    b.set_current_block(step);
    let m1 = b
        .push(Instruction::Binary { op: BinOp::Sub, lhs: n, rhs: one }, i32t)
        .expect("sub defines a value");
    let rec = b
        .push(
            Instruction::Call {
                callee: me,
                fn_ty,
                args: vec![m1],
            },
            i32t,
        )
        .expect("call defines a value");
    let prod = b
        .push(Instruction::Binary { op: BinOp::Mul, lhs: n, rhs: rec }, i32t)
        .expect("mul defines a value");
    b.push(Instruction::Ret { value: Some(prod) }, void);
    b.finish();
    m
}
