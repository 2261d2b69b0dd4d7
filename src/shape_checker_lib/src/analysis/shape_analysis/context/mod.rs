use super::{Escape, ShapeAnalysis, Summary};
use crate::abstract_domain::ObjectId;
use crate::analysis::abstraction::StateSet;
use crate::analysis::graph::FunctionGraph;
use crate::analysis::symbolic_heap::{canonicalize, Disjunct, EngineReport, Value};
use crate::checkers::{NoticeKind, TraceStep};
use crate::intermediate_representation::*;
use crate::prelude::*;
use crate::utils::log::LogMessage;
use std::cell::RefCell;

/// Transfer functions for calls to extern symbols, including the analysis builtins.
mod builtins;
/// The implementation of the [`fixpoint::Context`](crate::analysis::fixpoint::Context) trait.
mod trait_impls;

/// Contains all context information needed for the fixpoint computation of one function.
pub struct Context<'a, 'b> {
    /// The analysis of the whole program. Used for the analysis of callees and for reporting.
    pub analysis: &'b ShapeAnalysis<'a>,
    /// The control flow graph of the analysed function.
    pub graph: &'b FunctionGraph<'a>,
    /// The `longjmp` calls leaving the function, collected during the fixpoint computation.
    escapes: RefCell<Vec<Escape>>,
}

impl<'a, 'b> Context<'a, 'b> {
    /// Create a new context for the analysis of the function of `graph`.
    pub fn new(analysis: &'b ShapeAnalysis<'a>, graph: &'b FunctionGraph<'a>) -> Context<'a, 'b> {
        Context {
            analysis,
            graph,
            escapes: RefCell::new(Vec::new()),
        }
    }

    /// Return the collected `longjmp` escapes.
    pub fn take_escapes(&self) -> Vec<Escape> {
        self.escapes.take()
    }

    fn record_escape(&self, escape: Escape) {
        let mut escapes = self.escapes.borrow_mut();
        if !escapes.contains(&escape) {
            escapes.push(escape);
        }
    }

    /// Apply `transfer` to every disjunct of `states`.
    ///
    /// Reports are attributed to `location`.
    /// A disjunct on which the transfer function fails is dropped
    /// with an [`NoticeKind::UnsupportedConstruct`] notice.
    fn for_each_disjunct(
        &self,
        states: &StateSet,
        location: &Tid,
        mut transfer: impl FnMut(Disjunct, &mut Vec<EngineReport>) -> Result<Vec<Disjunct>, Error>,
    ) -> Vec<Disjunct> {
        let mut results = Vec::new();
        for disjunct in states.iter() {
            let mut reports = Vec::new();
            match transfer(disjunct.clone(), &mut reports) {
                Ok(successors) => results.extend(successors),
                Err(err) => self.unsupported(disjunct, location, &err, &mut reports),
            }
            self.analysis.handle_reports(reports, location);
        }
        results
    }

    /// Log an error of a transfer function and add the corresponding notice.
    fn unsupported(
        &self,
        disjunct: &Disjunct,
        location: &Tid,
        error: &Error,
        reports: &mut Vec<EngineReport>,
    ) {
        self.analysis.log_debug(error, location);
        self.analysis.engine.notice(
            disjunct,
            NoticeKind::UnsupportedConstruct,
            format!("Cannot execute {}: {}", location, error),
            reports,
        );
    }

    /// Execute the statements of a block.
    ///
    /// The disjunct cap is enforced after each statement.
    fn execute_block(&self, states: &StateSet, block: &Term<Blk>) -> StateSet {
        let engine = &self.analysis.engine;
        let mut current = states.clone();
        for def in block.term.defs.iter() {
            let mut next = StateSet::new();
            let mut reports = Vec::new();
            for disjunct in current.iter() {
                for successor in engine.execute_def(disjunct.clone(), def, &mut reports) {
                    next.insert(successor);
                }
            }
            next.enforce_cap(self.analysis.config.disjunct_cap, &mut reports);
            self.analysis.handle_reports(reports, &def.tid);
            current = next;
        }
        current
    }

    /// Follow an intraprocedural jump.
    /// The branch condition of the jump (or the negated condition of `untaken`) restricts the disjuncts.
    fn take_jump(
        &self,
        states: &StateSet,
        jump: &Term<Jmp>,
        untaken: Option<&Term<Jmp>>,
    ) -> Vec<Disjunct> {
        let engine = &self.analysis.engine;
        self.for_each_disjunct(states, &jump.tid, |disjunct, reports| {
            let mut results = vec![disjunct];
            for (branch, taken) in [(Some(jump), true), (untaken, false)] {
                let Some(Term {
                    tid,
                    term: Jmp::CBranch { condition, .. },
                }) = branch
                else {
                    continue;
                };
                let mut restricted = Vec::new();
                for mut disjunct in results {
                    disjunct.push_trace(TraceStep::Branch {
                        jump: tid.clone(),
                        taken,
                    });
                    restricted.extend(engine.assume(disjunct, condition, taken)?);
                }
                results = restricted;
            }
            Ok(results
                .into_iter()
                .map(|disjunct| engine.finish_transfer(disjunct, reports))
                .collect())
        })
    }

    /// Return from the function. The frame is popped and the return value becomes pending.
    fn return_from_function(&self, states: &StateSet, jump: &Term<Jmp>) -> Vec<Disjunct> {
        let engine = &self.analysis.engine;
        let Jmp::Return(value) = &jump.term else {
            return Vec::new();
        };
        self.for_each_disjunct(states, &jump.tid, |mut disjunct, reports| {
            let value = value
                .as_ref()
                .map(|value| engine.eval(&disjunct, value))
                .transpose()?;
            disjunct.push_trace(TraceStep::Return(jump.tid.clone()));
            engine.leave_function(&mut disjunct, value, reports);
            canonicalize(&mut disjunct);
            Ok(vec![disjunct])
        })
    }

    /// Handle a call instruction.
    fn call(&self, states: &StateSet, call: &Term<Jmp>) -> Vec<Disjunct> {
        let Jmp::Call {
            target,
            args,
            result,
            ..
        } = &call.term
        else {
            return Vec::new();
        };
        self.for_each_disjunct(states, &call.tid, |disjunct, reports| match target {
            Callee::Internal(callee) => {
                self.call_internal(disjunct, call, callee, args, result.as_ref(), reports)
            }
            Callee::Extern(name) => {
                self.call_extern(disjunct, call, name, args, result.as_ref(), reports)
            }
        })
    }

    /// Compute the summary of a call of an internal function.
    ///
    /// Returns `None` if the call depth exceeds the recursion bound.
    fn callee_summary(
        &self,
        disjunct: &Disjunct,
        call: &Term<Jmp>,
        callee: &Tid,
        args: &[Expression],
    ) -> Result<Option<Summary>, Error> {
        let sub = self
            .analysis
            .program
            .get_sub(callee)
            .ok_or_else(|| anyhow!("Call to unknown function {}", callee))?;
        if disjunct.depth() >= self.analysis.config.recursion_unfold_bound {
            return Ok(None);
        }
        let mut entry = disjunct.clone();
        entry.push_trace(TraceStep::Call(call.tid.clone()));
        self.analysis
            .engine
            .enter_function(&mut entry, sub, Some(call.tid.clone()), Some(args))?;
        canonicalize(&mut entry);
        Ok(Some(self.analysis.analyze_call(sub, entry)))
    }

    /// Call an internal function.
    ///
    /// The disjuncts returned by the callee receive the return value.
    /// `longjmp` escapes of the callee that target a caller of this function are passed on.
    fn call_internal(
        &self,
        disjunct: Disjunct,
        call: &Term<Jmp>,
        callee: &Tid,
        args: &[Expression],
        result: Option<&Variable>,
        reports: &mut Vec<EngineReport>,
    ) -> Result<Vec<Disjunct>, Error> {
        let engine = &self.analysis.engine;
        let Some(summary) = self.callee_summary(&disjunct, call, callee, args)? else {
            engine.notice(
                &disjunct,
                NoticeKind::RecursionBound,
                format!(
                    "Call depth {} reached at call of {}",
                    disjunct.depth(),
                    callee
                ),
                reports,
            );
            return self.call_unknown(disjunct, args, result, reports);
        };
        let depth = disjunct.depth();
        for escape in summary.escapes {
            if escape.depth < depth {
                self.record_escape(escape);
            }
        }
        let mut results = Vec::new();
        for mut returned in summary.returns {
            let value = returned.return_value.take();
            match (result, value) {
                (Some(var), Some(value)) => engine.write_var(&mut returned, var, value)?,
                (Some(var), None) => engine.forget_var(&mut returned, var)?,
                (None, _) => (),
            }
            results.push(engine.finish_transfer(returned, reports));
        }
        Ok(results)
    }

    /// Resume at the `setjmp` call `setjmp` after the callee of `call` left through a `longjmp`.
    fn resume_after_callee_longjmp(
        &self,
        states: &StateSet,
        call: &Term<Jmp>,
        setjmp: &Term<Jmp>,
    ) -> Vec<Disjunct> {
        let engine = &self.analysis.engine;
        let Jmp::Call {
            target: Callee::Internal(callee),
            args,
            ..
        } = &call.term
        else {
            return Vec::new();
        };
        self.for_each_disjunct(states, &call.tid, |disjunct, _| {
            let Some(summary) = self.callee_summary(&disjunct, call, callee, args)? else {
                return Ok(Vec::new());
            };
            let mut results = Vec::new();
            for escape in summary.escapes {
                if escape.depth != disjunct.depth() {
                    continue;
                }
                let mut reports = Vec::new();
                let mut resumed = escape.disjunct;
                resumed.push_trace(TraceStep::LongJmp {
                    from: escape.longjmp.clone(),
                    to: setjmp.tid.clone(),
                });
                if let Some(resumed) =
                    engine.resume_at_setjmp(resumed, setjmp, escape.env, escape.value, &mut reports)?
                {
                    results.push(engine.finish_transfer(resumed, &mut reports));
                }
                self.analysis.handle_reports(reports, &escape.longjmp);
            }
            Ok(results)
        })
    }

    /// Resume at the `setjmp` call `setjmp` of this function after the `longjmp` call `longjmp`
    /// of this function.
    fn resume_after_longjmp(
        &self,
        states: &StateSet,
        longjmp: &Term<Jmp>,
        setjmp: &Term<Jmp>,
    ) -> Vec<Disjunct> {
        let engine = &self.analysis.engine;
        self.for_each_disjunct(states, &longjmp.tid, |disjunct, reports| {
            let (env, value) = self.longjmp_arguments(&disjunct, longjmp)?;
            let depth = disjunct.depth();
            let has_local_marker = disjunct.jump_markers.iter().any(|marker| {
                marker.site == setjmp.tid
                    && marker.depth == depth
                    && env.map_or(true, |env| env == marker.env)
            });
            if !has_local_marker {
                return Ok(Vec::new());
            }
            let mut resumed = disjunct;
            resumed.push_trace(TraceStep::Statement(longjmp.tid.clone()));
            resumed.push_trace(TraceStep::LongJmp {
                from: longjmp.tid.clone(),
                to: setjmp.tid.clone(),
            });
            Ok(engine
                .resume_at_setjmp(resumed, setjmp, env, value, reports)?
                .map(|resumed| engine.finish_transfer(resumed, reports))
                .into_iter()
                .collect())
        })
    }

    /// The jump buffer and the value argument of a `longjmp` call.
    /// A missing value argument counts as 1.
    fn longjmp_arguments(
        &self,
        disjunct: &Disjunct,
        longjmp: &Term<Jmp>,
    ) -> Result<(Option<ObjectId>, Value), Error> {
        let Jmp::Call { args, .. } = &longjmp.term else {
            return Err(anyhow!("{} is not a call", longjmp.tid));
        };
        let engine = &self.analysis.engine;
        let env = args
            .first()
            .ok_or_else(|| anyhow!("longjmp without jump buffer"))?;
        let env = engine.jump_buffer(disjunct, env)?;
        let value = match args.get(1) {
            Some(value) => engine.eval(disjunct, value)?,
            None => Value::scalar(1, ByteSize::new(4)),
        };
        Ok((env, value))
    }

    /// The effect of a call to a function that cannot be analysed.
    ///
    /// Memory reachable from the arguments is havoced and the result becomes unknown.
    fn call_unknown(
        &self,
        mut disjunct: Disjunct,
        args: &[Expression],
        result: Option<&Variable>,
        reports: &mut Vec<EngineReport>,
    ) -> Result<Vec<Disjunct>, Error> {
        let engine = &self.analysis.engine;
        let arguments = args
            .iter()
            .map(|arg| engine.eval(&disjunct, arg))
            .collect::<Result<Vec<_>, Error>>()?;
        engine.havoc_reachable(&mut disjunct, &arguments);
        if let Some(var) = result {
            engine.forget_var(&mut disjunct, var)?;
        }
        Ok(vec![engine.finish_transfer(disjunct, reports)])
    }

    /// Log a debug message at `location`.
    fn log_debug_message(&self, text: String, location: &Tid) {
        self.analysis
            .log(LogMessage::new_debug(text).location(location.clone()));
    }
}
