//! Calls to extern symbols.
//!
//! Allocation and deallocation functions, the verifier builtins for nondeterministic values,
//! assumptions and assertions, functions that end the program,
//! plot and debugging builtins, as well as `setjmp` and `longjmp` have special transfer functions.
//! All other extern functions are treated as unknown functions.

use super::*;
use crate::analysis::graph::{LONGJMP_SYMBOLS, SETJMP_SYMBOLS};
use crate::analysis::symbolic_heap::{Fill, Storage};
use crate::checkers::FindingKind;
use crate::utils::debug::ToJsonCompact;

/// Prefixes of builtins returning a nondeterministic value.
const NONDET_PREFIXES: [&str; 3] = ["__VERIFIER_nondet", "___sl_get_nondet", "nondet"];

/// Further extern functions returning an arbitrary value.
const NONDET_SYMBOLS: [&str; 1] = ["rand"];

/// Builtins that restrict the analysis to the paths where their argument holds.
const ASSUME_SYMBOLS: [&str; 1] = ["__VERIFIER_assume"];

/// Builtins that check their argument.
const ASSERT_SYMBOLS: [&str; 2] = ["assert", "__VERIFIER_assert"];

/// Builtins whose call is an error of the analysed program.
const ERROR_SYMBOLS: [&str; 4] = ["__VERIFIER_error", "___sl_error", "reach_error", "__assert_fail"];

/// Functions that end the program.
const EXIT_SYMBOLS: [&str; 3] = ["abort", "exit", "_exit"];

/// Builtins that print the current disjunct.
const PLOT_SYMBOLS: [&str; 4] = [
    "__VERIFIER_plot",
    "___sl_plot",
    "___sl_plot_by_ptr",
    "___sl_plot_stack_frame",
];

/// Builtins marking a breakpoint for debugging.
const BREAK_SYMBOLS: [&str; 1] = ["___sl_break"];

impl<'a, 'b> Context<'a, 'b> {
    /// Handle a call to an extern symbol.
    pub(super) fn call_extern(
        &self,
        mut disjunct: Disjunct,
        call: &Term<Jmp>,
        name: &str,
        args: &[Expression],
        result: Option<&Variable>,
        reports: &mut Vec<EngineReport>,
    ) -> Result<Vec<Disjunct>, Error> {
        let config = &self.analysis.config;
        disjunct.push_trace(TraceStep::Statement(call.tid.clone()));
        let successors = if config.allocation_symbols.iter().any(|symbol| symbol == name) {
            self.allocate(disjunct, call, name, args, result)?
        } else if config.deallocation_symbols.iter().any(|symbol| symbol == name) {
            let pointer = args
                .first()
                .ok_or_else(|| anyhow!("{} without argument", name))?;
            self.analysis.engine.free(disjunct, pointer, reports)?
        } else if name == "realloc" {
            self.reallocate(disjunct, call, args, result, reports)?
        } else if NONDET_SYMBOLS.contains(&name)
            || NONDET_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
        {
            self.nondet(disjunct, result)?
        } else if ASSUME_SYMBOLS.contains(&name) {
            let condition = args
                .first()
                .ok_or_else(|| anyhow!("{} without argument", name))?;
            self.analysis.engine.assume(disjunct, condition, true)?
        } else if ASSERT_SYMBOLS.contains(&name) {
            self.assert(disjunct, name, args, reports)?
        } else if ERROR_SYMBOLS.contains(&name) {
            self.analysis.engine.defect(
                &disjunct,
                FindingKind::AssertionViolation,
                format!("Error location {} reached", name),
                reports,
            );
            Vec::new()
        } else if EXIT_SYMBOLS.contains(&name) {
            Vec::new()
        } else if PLOT_SYMBOLS.contains(&name) {
            self.log_debug_message(
                format!("{}: {}", name, disjunct.to_json_compact()),
                &call.tid,
            );
            self.forget_result(disjunct, result)?
        } else if BREAK_SYMBOLS.contains(&name) {
            self.log_debug_message(format!("Breakpoint {} reached", name), &call.tid);
            self.forget_result(disjunct, result)?
        } else if SETJMP_SYMBOLS.contains(&name) {
            self.setjmp(disjunct, call, args, result, reports)?
        } else if LONGJMP_SYMBOLS.contains(&name) {
            self.longjmp(disjunct, call, reports)?;
            Vec::new()
        } else {
            return self.call_unknown(disjunct, args, result, reports);
        };
        Ok(successors
            .into_iter()
            .map(|disjunct| self.analysis.engine.finish_transfer(disjunct, reports))
            .collect())
    }

    /// `malloc`, `calloc` and `alloca`.
    /// Other configured allocation functions behave like `malloc`.
    fn allocate(
        &self,
        disjunct: Disjunct,
        call: &Term<Jmp>,
        name: &str,
        args: &[Expression],
        result: Option<&Variable>,
    ) -> Result<Vec<Disjunct>, Error> {
        let engine = &self.analysis.engine;
        let argument = |index: usize| -> Result<Value, Error> {
            let arg = args
                .get(index)
                .ok_or_else(|| anyhow!("{} with too few arguments", name))?;
            engine.eval(&disjunct, arg)
        };
        let may_fail = engine.options.allocation_may_fail;
        let (storage, size, fill, may_fail) = match name {
            "calloc" => {
                let size = match (argument(0)?, argument(1)?) {
                    (
                        Value::Scalar {
                            interval: count, ..
                        },
                        Value::Scalar { interval: size, .. },
                    ) => Value::Scalar {
                        interval: count.signed_mul(&size),
                        size: POINTER_SIZE,
                    },
                    _ => Value::unknown_scalar(POINTER_SIZE),
                };
                (Storage::Heap, size, Fill::Zeroed, may_fail)
            }
            "alloca" => (Storage::Stack, argument(0)?, Fill::Uninitialized, false),
            _ => (Storage::Heap, argument(0)?, Fill::Uninitialized, may_fail),
        };
        let mut results = Vec::new();
        for (mut disjunct, pointer) in
            engine.allocate(disjunct, storage, &size, fill, &call.tid, may_fail)
        {
            if let Some(var) = result {
                engine.write_var(&mut disjunct, var, pointer)?;
            }
            results.push(disjunct);
        }
        Ok(results)
    }

    /// `realloc(pointer, size)`
    fn reallocate(
        &self,
        disjunct: Disjunct,
        call: &Term<Jmp>,
        args: &[Expression],
        result: Option<&Variable>,
        reports: &mut Vec<EngineReport>,
    ) -> Result<Vec<Disjunct>, Error> {
        let engine = &self.analysis.engine;
        let [pointer, size] = args else {
            return Err(anyhow!("realloc with {} arguments", args.len()));
        };
        let size = engine.eval(&disjunct, size)?;
        let mut results = Vec::new();
        for (mut disjunct, new) in engine.reallocate(disjunct, pointer, &size, &call.tid, reports)? {
            if let Some(var) = result {
                engine.write_var(&mut disjunct, var, new)?;
            }
            results.push(disjunct);
        }
        Ok(results)
    }

    /// A fresh unconstrained value for the result variable.
    fn nondet(&self, disjunct: Disjunct, result: Option<&Variable>) -> Result<Vec<Disjunct>, Error> {
        let Some(var) = result else {
            return Ok(vec![disjunct]);
        };
        let mut disjunct = disjunct;
        if var.data_type.is_pointer() || var.data_type.is_aggregate() {
            self.analysis.engine.forget_var(&mut disjunct, var)?;
        } else {
            let size = self.analysis.program.size_of(var)?;
            self.analysis
                .engine
                .write_var(&mut disjunct, var, Value::unknown_scalar(size))?;
        }
        Ok(vec![disjunct])
    }

    /// Set the result variable (if any) to an unknown value.
    fn forget_result(
        &self,
        mut disjunct: Disjunct,
        result: Option<&Variable>,
    ) -> Result<Vec<Disjunct>, Error> {
        if let Some(var) = result {
            self.analysis.engine.forget_var(&mut disjunct, var)?;
        }
        Ok(vec![disjunct])
    }

    /// Check the argument of an assertion.
    ///
    /// If the argument may be false, an assertion violation is reported.
    /// The failing disjuncts are only dropped if assertions are configured to halt.
    fn assert(
        &self,
        disjunct: Disjunct,
        name: &str,
        args: &[Expression],
        reports: &mut Vec<EngineReport>,
    ) -> Result<Vec<Disjunct>, Error> {
        let engine = &self.analysis.engine;
        let condition = args
            .first()
            .ok_or_else(|| anyhow!("{} without argument", name))?;
        let failing = engine.assume(disjunct.clone(), condition, false)?;
        if let Some(failure) = failing.first() {
            engine.defect(
                failure,
                FindingKind::AssertionViolation,
                format!("Assertion {} may fail", condition),
                reports,
            );
        }
        if failing.is_empty() || !engine.options.assertion_halts {
            return Ok(vec![disjunct]);
        }
        engine.assume(disjunct, condition, true)
    }

    /// `setjmp(env)`: record a jump marker. The direct return of `setjmp` yields 0.
    fn setjmp(
        &self,
        mut disjunct: Disjunct,
        call: &Term<Jmp>,
        args: &[Expression],
        result: Option<&Variable>,
        reports: &mut Vec<EngineReport>,
    ) -> Result<Vec<Disjunct>, Error> {
        let engine = &self.analysis.engine;
        let env = args
            .first()
            .ok_or_else(|| anyhow!("setjmp without jump buffer"))?;
        if !engine.record_jump_marker(&mut disjunct, &call.tid, env)? {
            engine.notice(
                &disjunct,
                NoticeKind::UnsupportedConstruct,
                format!("setjmp with unknown jump buffer {}", env),
                reports,
            );
        }
        if let Some(var) = result {
            let size = self.analysis.program.size_of(var)?;
            engine.write_var(&mut disjunct, var, Value::scalar(0, size))?;
        }
        Ok(vec![disjunct])
    }

    /// `longjmp(env, value)`: the call never returns.
    ///
    /// Jumps to markers of callers of this function are recorded as escapes of the function.
    /// Jumps to markers of this function are handled by the `LongJmp` edges of the graph.
    fn longjmp(
        &self,
        disjunct: Disjunct,
        call: &Term<Jmp>,
        reports: &mut Vec<EngineReport>,
    ) -> Result<(), Error> {
        let engine = &self.analysis.engine;
        let (env, value) = self.longjmp_arguments(&disjunct, call)?;
        let depth = disjunct.depth();
        let Some(env) = env else {
            engine.notice(
                &disjunct,
                NoticeKind::UnsupportedConstruct,
                "longjmp with unknown jump buffer",
                reports,
            );
            return Ok(());
        };
        let matching: Vec<usize> = disjunct
            .jump_markers
            .iter()
            .filter(|marker| marker.env == env)
            .map(|marker| marker.depth)
            .collect();
        if matching.is_empty() {
            engine.defect(
                &disjunct,
                FindingKind::WildPointer,
                "longjmp to a jump buffer without active setjmp",
                reports,
            );
            return Ok(());
        }
        for marker_depth in matching {
            if marker_depth < depth {
                self.record_escape(Escape {
                    disjunct: disjunct.clone(),
                    longjmp: call.tid.clone(),
                    env: Some(env),
                    depth: marker_depth,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}
