//! Microbenchmarks for the `shape_checker`.
//!
//! This module contains microbenchmarks for the following steps:
//!
//! - control flow graph construction,
//! - the shape analysis of whole programs,
//! - the shape analysis under different disjunct caps.
//!
//! The inputs are generated programs consisting of list-manipulating functions:
//! each function builds a singly linked list of nondeterministic length
//! and frees it again. The `main` function calls all of them.
//!
//! # Running the Benchmarks
//!
//! If you submit a PR that makes changes which might impact performance you are
//! encouraged to run these benchmarks. In this case, please report the relevant
//! changes between the current master and your code in the PR description.
//!
//! First run the benchmarks on the current master and save the result:
//!
//! ```
//! $ git checkout master
//! $ cargo bench --bench "benchmarks" -- --save-baseline master
//! ```
//!
//! Then switch to your branch and compare against the saved baseline:
//!
//! ```
//! $ git checkout my-branch
//! $ cargo bench --bench "benchmarks" -- --baseline master
//! ```

use std::time;

use criterion::{
    black_box, criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput,
};

use shape_checker_lib::analysis::graph;
use shape_checker_lib::intermediate_representation::builder::*;
use shape_checker_lib::intermediate_representation::*;
use shape_checker_lib::Config;

mod inputs {
    //! Generated input programs.

    use super::*;

    /// Numbers of list-manipulating functions in the generated programs.
    pub const PROGRAM_SIZES: [usize; 3] = [1, 4, 16];

    /// A function that builds a list of nondeterministic length and frees it again.
    fn list_function(name: &str) -> SubBuilder {
        let x = struct_ptr_var("x", "node");
        let t = struct_ptr_var("t", "node");
        let c = int_var("c");
        let mut sub = SubBuilder::new(name);
        sub.local(x.clone()).local(t.clone()).local(c.clone());
        sub.block("entry").assign(&x, Expression::Null).jump("loop");
        sub.block("loop")
            .call_extern("__VERIFIER_nondet_int", vec![], Some(&c), "check");
        sub.block("check").cbranch(var_expr(&c), "alloc", "free_loop");
        sub.block("alloc")
            .call_extern("malloc", vec![Expression::Const(16)], Some(&t), "alloc_check");
        sub.block("alloc_check")
            .cbranch(var_expr(&t), "link", "fail");
        sub.block("fail").call_extern("abort", vec![], None, "end");
        sub.block("link")
            .store(var_expr(&t), var_expr(&x), 8)
            .store(var_expr(&t).plus_const(8), var_expr(&c), 4)
            .assign(&x, var_expr(&t))
            .jump("loop");
        sub.block("free_loop")
            .cbranch(var_expr(&x), "free_body", "end");
        sub.block("free_body")
            .load(&t, var_expr(&x))
            .call_extern("free", vec![var_expr(&x)], None, "advance");
        sub.block("advance").assign(&x, var_expr(&t)).jump("free_loop");
        sub.block("end").ret(None);
        sub
    }

    /// A program with `size` list-manipulating functions called from `main`.
    pub fn list_program(size: usize) -> Program {
        let layout = struct_layout(
            16,
            &[
                (
                    "next",
                    0,
                    DataType::pointer_to(DataType::Struct("node".into())),
                ),
                ("data", 8, DataType::Integer(ByteSize::new(4))),
            ],
        );
        let mut builder = ProgramBuilder::new().structure("node", layout);
        let mut main = SubBuilder::new("main");
        for index in 0..size {
            let name = format!("list_{index}");
            let label = format!("call_{index}");
            let next = if index + 1 == size {
                "end".to_string()
            } else {
                format!("call_{}", index + 1)
            };
            let block = if index == 0 { "entry".to_string() } else { label };
            main.block(&block).call(&name, vec![], None, &next);
            builder = builder.sub(list_function(&name));
        }
        main.block("end").ret(None);
        builder.sub(main).entry("main").build()
    }

    /// The number of blocks of a program.
    pub fn block_count(program: &Program) -> u64 {
        program
            .subs
            .iter()
            .map(|sub| sub.term.blocks.len() as u64)
            .sum()
    }
}

mod helpers {
    //! Helpers to get configurations.

    use super::*;

    const CONFIG: &str = "../config.json";

    pub fn get_config() -> Config {
        let config_file = std::fs::read_to_string(CONFIG).expect("Could not read config file.");

        serde_json::from_str(&config_file).expect("Could not deserialize config file.")
    }
}

mod cfg {
    //! Benchmarks for the control flow graph construction.

    use super::inputs::*;
    use super::*;

    pub fn bench_graph_construction(c: &mut Criterion) {
        let mut group = c.benchmark_group("graph_construction");
        for size in PROGRAM_SIZES {
            let program = list_program(size);
            let may_longjmp = graph::functions_that_may_longjmp(&program);
            group.throughput(Throughput::Elements(block_count(&program)));
            group.bench_with_input(BenchmarkId::from_parameter(size), &program, |b, program| {
                b.iter_with_large_drop(|| {
                    program
                        .subs
                        .iter()
                        .map(|sub| graph::get_function_graph(black_box(sub), &may_longjmp))
                        .collect::<Vec<_>>()
                })
            });
        }
        group.finish();
    }
}

mod core_analyses {
    //! Benchmarks for the shape analysis.

    use super::helpers::*;
    use super::inputs::*;
    use super::*;

    pub fn bench_shape_analysis(c: &mut Criterion) {
        let config = get_config();
        let mut group = c.benchmark_group("shape_analysis");
        group
            .sampling_mode(SamplingMode::Flat)
            .measurement_time(time::Duration::new(20, 0));
        for size in PROGRAM_SIZES {
            let program = list_program(size);
            group.throughput(Throughput::Elements(block_count(&program)));
            group.bench_with_input(BenchmarkId::from_parameter(size), &program, |b, program| {
                b.iter_with_large_drop(|| shape_checker_lib::analyze(program, black_box(&config)))
            });
        }
        group.finish();
    }

    pub fn bench_disjunct_cap(c: &mut Criterion) {
        let program = list_program(4);
        let mut group = c.benchmark_group("disjunct_cap");
        group.sampling_mode(SamplingMode::Flat);
        for cap in [2, 8, 16, 64] {
            let config = Config {
                disjunct_cap: cap,
                ..get_config()
            };
            group.bench_with_input(BenchmarkId::new("cap", cap), &config, |b, config| {
                b.iter_with_large_drop(|| shape_checker_lib::analyze(&program, black_box(config)))
            });
        }
        group.finish();
    }
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .sample_size(10)
        .warm_up_time(time::Duration::new(5, 0))
        .measurement_time(time::Duration::new(10, 0));
    targets = cfg::bench_graph_construction,
        core_analyses::bench_shape_analysis,
        core_analyses::bench_disjunct_cap,
);
criterion_main!(benches);
