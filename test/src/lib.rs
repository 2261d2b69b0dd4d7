//! This crate contains acceptance tests for the *shape_checker*.
//!
//! Each test case is a small program assembled with the IR builder,
//! modelled after typical list-manipulating C code.
//! The whole analysis is run on it and the findings are compared with the expected ones.

use colored::*;
use shape_checker_lib::checkers::{FindingKind, Verdict};
use shape_checker_lib::intermediate_representation::builder::*;
use shape_checker_lib::intermediate_representation::*;
use shape_checker_lib::{analyze, Config};

/// A test case containing the necessary information to run an acceptance test.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ScenarioTestCase {
    /// The name of the scenario
    name: &'static str,
    /// The program to analyse
    program: Program,
    /// The expected kinds and locations of findings
    expected_findings: Vec<(FindingKind, Tid)>,
    /// The expected verdict of the entry function
    expected_verdict: Verdict,
}

impl ScenarioTestCase {
    /// Run the test case and print to the shell, whether the test case succeeded or not.
    /// Returns a description of the difference on failure.
    pub fn run_test(&self, config: &Config) -> Result<(), String> {
        let report = match analyze(&self.program, config) {
            Ok(report) => report,
            Err(error) => {
                println!("{} \t {}", self.name, "[FAILED]".red());
                return Err(format!("Analysis error: {error}"));
            }
        };
        let findings: Vec<(FindingKind, Tid)> = report
            .findings
            .iter()
            .map(|finding| (finding.kind, finding.location.clone()))
            .collect();
        let verdict = report.verdict(&Tid::new("main"));
        if findings == self.expected_findings && verdict == Some(self.expected_verdict) {
            println!("{} \t {}", self.name, "[OK]".green());
            Ok(())
        } else {
            println!("{} \t {}", self.name, "[FAILED]".red());
            Err(format!(
                "Expected findings: {:?}, verdict {:?}. Found: {:?}, verdict {:?}",
                self.expected_findings, self.expected_verdict, findings, verdict
            ))
        }
    }
}

/// Print the error messages of failed checks.
pub fn print_errors(error_log: Vec<(&'static str, String)>) {
    for (name, error) in error_log {
        println!("{}", format!("{name}:").yellow());
        println!("{error}");
    }
}

fn node() -> DataType {
    DataType::Struct("node".into())
}

fn program(subs: Vec<SubBuilder>) -> Program {
    let layout = struct_layout(
        16,
        &[
            ("next", 0, DataType::pointer_to(node())),
            ("data", 8, DataType::Integer(ByteSize::new(4))),
        ],
    );
    subs.into_iter()
        .fold(ProgramBuilder::new().structure("node", layout), |builder, sub| {
            builder.sub(sub)
        })
        .entry("main")
        .build()
}

/// Scenario A: a loop allocating two list nodes per nondeterministic iteration,
/// followed by a loop freeing two nodes at a time until the list is empty.
pub fn paired_allocation() -> Program {
    let x = struct_ptr_var("x", "node");
    let t = struct_ptr_var("t", "node");
    let c = int_var("c");
    let mut main = SubBuilder::new("main");
    main.local(x.clone()).local(t.clone()).local(c.clone());
    main.block("entry").assign(&x, Expression::Null).jump("loop");
    main.block("loop")
        .call_extern("__VERIFIER_nondet_int", vec![], Some(&c), "check");
    main.block("check").cbranch(var_expr(&c), "alloc1", "free_loop");
    for (label, next) in [("alloc1", "alloc2"), ("alloc2", "loop")] {
        let check = format!("{label}_check");
        let link = format!("{label}_link");
        main.block(label)
            .call_extern("malloc", vec![Expression::Const(16)], Some(&t), &check);
        main.block(&check).cbranch(var_expr(&t), &link, "fail");
        main.block(&link)
            .store(var_expr(&t), var_expr(&x), 8)
            .assign(&x, var_expr(&t))
            .jump(next);
    }
    main.block("fail").call_extern("abort", vec![], None, "end");
    main.block("free_loop")
        .cbranch(var_expr(&x), "free_first", "end");
    main.block("free_first")
        .load(&t, var_expr(&x))
        .call_extern("free", vec![var_expr(&x)], None, "free_second");
    main.block("free_second")
        .load(&x, var_expr(&t))
        .call_extern("free", vec![var_expr(&t)], None, "free_loop");
    main.block("end").ret(None);
    program(vec![main])
}

/// Scenario B: the same possibly `NULL` pointer is written through by a guarded
/// and by an unguarded function.
pub fn conditional_null_guard() -> Program {
    let p = ptr_var("p");
    let mut guarded = SubBuilder::new("write_guarded");
    guarded.param(p.clone());
    guarded
        .block("entry")
        .cbranch(var_expr(&p), "write", "exit");
    guarded
        .block("write")
        .store(var_expr(&p), Expression::Const(1), 4)
        .jump("exit");
    guarded.block("exit").ret(None);
    let mut unguarded = SubBuilder::new("write_unguarded");
    unguarded.param(p.clone());
    unguarded
        .block("entry")
        .store(var_expr(&p), Expression::Const(1), 4)
        .ret(None);
    let mut main = SubBuilder::new("main");
    main.local(p.clone());
    main.block("entry")
        .call_extern("malloc", vec![Expression::Const(4)], Some(&p), "first");
    main.block("first")
        .call("write_guarded", vec![var_expr(&p)], None, "second");
    main.block("second")
        .call("write_unguarded", vec![var_expr(&p)], None, "cleanup");
    main.block("cleanup")
        .call_extern("free", vec![var_expr(&p)], None, "end");
    main.block("end").ret(None);
    program(vec![main, guarded, unguarded])
}

/// Scenario C: `v = malloc(...); [if (v)] *v = NULL;`
pub fn unchecked_allocation(checked: bool) -> Program {
    let v = struct_ptr_var("v", "node");
    let mut main = SubBuilder::new("main");
    main.local(v.clone());
    main.block("entry")
        .call_extern("malloc", vec![Expression::Const(16)], Some(&v), "check");
    if checked {
        main.block("check").cbranch(var_expr(&v), "use", "end");
    } else {
        main.block("check").jump("use");
    }
    main.block("use")
        .store(var_expr(&v), Expression::Null, 8)
        .call_extern("free", vec![var_expr(&v)], None, "end");
    main.block("end").ret(None);
    program(vec![main])
}

/// Scenario D: a list disposal loop called with an empty list.
pub fn dispose_empty_list() -> Program {
    let x = struct_ptr_var("x", "node");
    let t = struct_ptr_var("t", "node");
    let mut dispose = SubBuilder::new("dispose");
    dispose.param(x.clone()).local(t.clone());
    dispose.block("entry").jump("loop");
    dispose
        .block("loop")
        .cbranch(var_expr(&x), "body", "exit");
    dispose
        .block("body")
        .load(&t, var_expr(&x))
        .call_extern("free", vec![var_expr(&x)], None, "advance");
    dispose
        .block("advance")
        .assign(&x, var_expr(&t))
        .jump("loop");
    dispose.block("exit").ret(None);
    let mut main = SubBuilder::new("main");
    main.block("entry")
        .call("dispose", vec![Expression::Null], None, "end");
    main.block("end").ret(None);
    program(vec![main, dispose])
}

/// Scenario E: `int buf[10]; for (i = 0; i <= 10; i++) buf[i] = 0;`
pub fn off_by_one(bound: i64) -> Program {
    let buf = Variable::new(
        "buf",
        DataType::Array(Box::new(DataType::Integer(ByteSize::new(4))), 10),
    );
    let i = int_var("i");
    let mut main = SubBuilder::new("main");
    main.local(buf.clone()).local(i.clone());
    main.block("entry")
        .assign(&i, Expression::Const(0))
        .jump("loop");
    main.block("loop").cbranch(
        Expression::bin_op(BinOpType::LessEqual, var_expr(&i), Expression::Const(bound)),
        "body",
        "end",
    );
    main.block("body")
        .store(
            Expression::AddressOf(buf).plus(Expression::bin_op(
                BinOpType::Mul,
                var_expr(&i),
                Expression::Const(4),
            )),
            Expression::Const(0),
            4,
        )
        .assign(&i, var_expr(&i).plus_const(1))
        .jump("loop");
    main.block("end").ret(None);
    program(vec![main])
}

/// Scenario F: a pointer set to `NULL` right before a `longjmp` back to a `setjmp` call
/// and dereferenced after the jump.
pub fn stale_pointer_after_longjmp() -> Program {
    let env = int_var("env");
    let p = ptr_var("p");
    let (x, r) = (int_var("x"), int_var("r"));
    let mut main = SubBuilder::new("main");
    main.local(env.clone())
        .local(p.clone())
        .local(x.clone())
        .local(r.clone());
    main.block("entry")
        .assign(&p, Expression::AddressOf(x))
        .call_extern("setjmp", vec![Expression::AddressOf(env.clone())], Some(&r), "after");
    main.block("after").cbranch(
        Expression::bin_op(BinOpType::Equal, var_expr(&r), Expression::Const(0)),
        "jump",
        "use",
    );
    main.block("jump")
        .assign(&p, Expression::Null)
        .call_extern(
            "longjmp",
            vec![Expression::AddressOf(env), Expression::Const(1)],
            None,
            "use",
        );
    main.block("use")
        .store(var_expr(&p), Expression::Const(1), 4)
        .ret(None);
    program(vec![main])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_all(cases: Vec<ScenarioTestCase>) {
        let config = Config::default();
        let mut error_log = Vec::new();
        for case in cases {
            if let Err(error) = case.run_test(&config) {
                error_log.push((case.name, error));
            }
        }
        if !error_log.is_empty() {
            print_errors(error_log);
            panic!();
        }
    }

    #[test]
    fn scenario_a_paired_allocation() {
        run_all(vec![ScenarioTestCase {
            name: "paired_allocation",
            program: paired_allocation(),
            expected_findings: vec![],
            expected_verdict: Verdict::Safe,
        }]);
    }

    #[test]
    fn scenario_b_conditional_null_guard() {
        run_all(vec![ScenarioTestCase {
            name: "conditional_null_guard",
            program: conditional_null_guard(),
            expected_findings: vec![(
                FindingKind::NullDereference,
                def_tid("write_unguarded", "entry", 0),
            )],
            expected_verdict: Verdict::Unsafe,
        }]);
    }

    #[test]
    fn scenario_c_unchecked_allocation() {
        run_all(vec![
            ScenarioTestCase {
                name: "unchecked_allocation",
                program: unchecked_allocation(false),
                expected_findings: vec![(FindingKind::NullDereference, def_tid("main", "use", 0))],
                expected_verdict: Verdict::Unsafe,
            },
            ScenarioTestCase {
                name: "checked_allocation",
                program: unchecked_allocation(true),
                expected_findings: vec![],
                expected_verdict: Verdict::Safe,
            },
        ]);
    }

    #[test]
    fn scenario_d_dispose_empty_list() {
        run_all(vec![ScenarioTestCase {
            name: "dispose_empty_list",
            program: dispose_empty_list(),
            expected_findings: vec![],
            expected_verdict: Verdict::Safe,
        }]);
    }

    #[test]
    fn scenario_e_off_by_one() {
        run_all(vec![
            ScenarioTestCase {
                name: "off_by_one",
                program: off_by_one(10),
                expected_findings: vec![(
                    FindingKind::OutOfBoundsAccess,
                    def_tid("main", "body", 0),
                )],
                expected_verdict: Verdict::Unsafe,
            },
            ScenarioTestCase {
                name: "in_bounds",
                program: off_by_one(9),
                expected_findings: vec![],
                expected_verdict: Verdict::Safe,
            },
        ]);
    }

    #[test]
    fn scenario_f_stale_pointer_after_longjmp() {
        run_all(vec![ScenarioTestCase {
            name: "stale_pointer_after_longjmp",
            program: stale_pointer_after_longjmp(),
            expected_findings: vec![(FindingKind::WildPointer, def_tid("main", "use", 0))],
            expected_verdict: Verdict::Unsafe,
        }]);
    }
}
