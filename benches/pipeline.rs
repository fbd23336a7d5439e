//! Throughput of each compilation stage on a synthetic program: IR
//! construction, code-offset assignment, emission, and ELF packaging.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tacjit::ast::{AstNode, Operator};
use tacjit::backend::elf::{build_elf, ElfOptions};
use tacjit::backend::link;
use tacjit::ir::builder::build_program;
use tacjit::layout::assign_code_offsets;
use tacjit::runtime::{LinuxRuntime, Runtime};
use tacjit::x86::emit_program;

/// `count` functions chained by calls, each with an arithmetic body and a
/// nested conditional.
fn synthetic_program(count: usize) -> AstNode {
    let var = AstNode::var;
    let num = AstNode::number;
    let mut functions = Vec::with_capacity(count + 1);
    functions.push(AstNode::func(
        "main",
        &[],
        vec![
            AstNode::input("n"),
            AstNode::assign("r", AstNode::call("f0", vec![var("n")])),
            AstNode::out("r"),
            AstNode::ret(var("r")),
        ],
    ));
    for i in 0..count {
        let tail = if i + 1 < count {
            AstNode::call(&format!("f{}", i + 1), vec![var("y")])
        } else {
            var("y")
        };
        functions.push(AstNode::func(
            &format!("f{}", i),
            &["x"],
            vec![
                AstNode::assign(
                    "y",
                    AstNode::op(
                        Operator::Add,
                        AstNode::op(Operator::Mul, var("x"), num(3)),
                        AstNode::op(Operator::Div, var("x"), num(2)),
                    ),
                ),
                AstNode::if_else(
                    AstNode::op(Operator::Greater, var("y"), num(100)),
                    vec![AstNode::if_then(
                        AstNode::op(Operator::Less, var("y"), num(1000)),
                        vec![AstNode::assign("y", AstNode::op(Operator::Sub, var("y"), num(100)))],
                    )],
                    vec![AstNode::assign("y", AstNode::op(Operator::Add, var("y"), num(1)))],
                ),
                AstNode::ret(tail),
            ],
        ));
    }
    AstNode::program(functions)
}

fn bench_stages(c: &mut Criterion) {
    let ast = synthetic_program(64);
    let mut program = build_program(&ast).unwrap();
    let layout = assign_code_offsets(&mut program).unwrap();
    let (_, routines) = LinuxRuntime.link(layout.code_len);

    let mut group = c.benchmark_group("stages");
    group.bench_function("build_ir", |b| {
        b.iter(|| build_program(black_box(&ast)).unwrap())
    });
    group.bench_function("layout", |b| {
        b.iter(|| {
            let mut p = program.clone();
            assign_code_offsets(black_box(&mut p)).unwrap()
        })
    });
    group.bench_function("emit", |b| {
        b.iter(|| emit_program(black_box(&program), &layout, routines, false).unwrap())
    });
    group.bench_function("emit_traced", |b| {
        b.iter(|| emit_program(black_box(&program), &layout, routines, true).unwrap())
    });
    group.bench_function("elf", |b| {
        let image = link(&program, &layout, &LinuxRuntime, false).unwrap();
        let options = ElfOptions::default();
        b.iter(|| build_elf(black_box(&image), &options).unwrap())
    });
    group.finish();
}

fn bench_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("end_to_end");
    for count in [8, 128] {
        let ast = synthetic_program(count);
        group.bench_function(format!("{}_functions", count), |b| {
            b.iter(|| {
                let compiled = tacjit::compile(black_box(&ast)).unwrap();
                compiled.executable(false).unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_stages, bench_end_to_end);
criterion_main!(benches);
