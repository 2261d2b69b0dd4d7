//! The interprocedural shape analysis.
//!
//! Each function is analysed by its own fixpoint computation over its control flow graph
//! (see [`crate::analysis::graph`]).
//! The abstract value at each node is a [`StateSet`] of disjuncts of the symbolic heap.
//!
//! Calls to internal functions are analysed on demand:
//! the callee is run with the entry disjunct built at the call site
//! and the resulting [`Summary`] is memoized per callee and entry disjunct.
//! Since the entry disjunct contains the complete call chain,
//! each call site gets its own callee analysis
//! and findings inside the callee carry the call stack that leads to them.
//! Recursion is unrolled up to the configured call depth.
//!
//! Nonlocal exits through `longjmp` are part of the summary of the callee.
//! They either resume at a `setjmp` call of the caller (through a `CallLongJmp` edge)
//! or are passed on to the caller's caller.
//!
//! Findings and log messages are sent to the log collector thread,
//! which deduplicates them (see [`crate::utils::log::LogThread`]).
//! See the [`Config`] struct for configurable analysis parameters.

use super::abstraction::StateSet;
use super::fixpoint::{Computation, WideningStrategy};
use super::graph::{functions_that_may_longjmp, get_function_graph, FunctionGraph};
use super::symbolic_heap::{
    canonicalize, Disjunct, Engine, EngineOptions, EngineReport, Fill, ReportKind, Value,
};
use crate::abstract_domain::ObjectId;
use crate::checkers::{NoticeKind, Property};
use crate::intermediate_representation::*;
use crate::prelude::*;
use crate::utils::log::{LogMessage, LogThreadMsg};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

mod context;
use context::Context;

/// The source name of all log messages of the analysis.
pub const SOURCE: &str = "ShapeAnalysis";

/// Configurable parameters for the analysis.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Number of updates of a loop head before widening replaces joining.
    pub loop_widen_threshold: usize,
    /// The maximal number of disjuncts at a program location.
    /// Surplus disjuncts are merged coarsely.
    pub disjunct_cap: usize,
    /// The maximal call depth and the maximal number of segment materializations per access.
    /// Deeper calls are treated as calls to unknown functions.
    pub recursion_unfold_bound: usize,
    /// The properties for which findings are reported.
    pub checked_properties: BTreeSet<Property>,
    /// The maximal number of visits of each node of a control flow graph.
    pub iteration_budget: u64,
    /// An optional wall-clock budget in milliseconds for the analysis of each function.
    pub time_budget_ms: Option<u64>,
    /// Continue paths after a defect instead of ending them.
    pub continue_after_error: bool,
    /// End the failing paths of an assertion.
    pub assertion_halts: bool,
    /// Names of `malloc`-like extern functions.
    /// `calloc` zero-initializes and `alloca` allocates on the stack.
    pub allocation_symbols: Vec<String>,
    /// Names of `free`-like extern functions.
    pub deallocation_symbols: Vec<String>,
    /// Whether heap allocations may fail and return `NULL`.
    pub allocation_may_fail: bool,
    /// Analyse functions not reachable from an entry point with unknown arguments.
    pub analyze_unreached_functions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            loop_widen_threshold: 3,
            disjunct_cap: 16,
            recursion_unfold_bound: 8,
            checked_properties: Property::ALL.into_iter().collect(),
            iteration_budget: 100,
            time_budget_ms: None,
            continue_after_error: false,
            assertion_halts: false,
            allocation_symbols: vec!["malloc".into(), "calloc".into(), "alloca".into()],
            deallocation_symbols: vec!["free".into()],
            allocation_may_fail: true,
            analyze_unreached_functions: true,
        }
    }
}

impl Config {
    /// The options of the transfer functions.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            allocation_may_fail: self.allocation_may_fail,
            continue_after_error: self.continue_after_error,
            assertion_halts: self.assertion_halts,
            unfold_bound: self.recursion_unfold_bound,
        }
    }
}

/// The effect of a call of a function for one entry disjunct.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    /// The disjuncts after the function returned.
    /// The frame of the function is already popped and the return value is pending.
    pub returns: Vec<Disjunct>,
    /// The `longjmp` calls leaving the function.
    pub escapes: Vec<Escape>,
}

/// A `longjmp` from a function to a `setjmp` call of one of its (transitive) callers.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Escape {
    /// The disjunct at the `longjmp` call. No frames are popped yet.
    pub disjunct: Disjunct,
    /// The `longjmp` call.
    pub longjmp: Tid,
    /// The jump buffer, if known.
    pub env: Option<ObjectId>,
    /// The depth of the frame containing the `setjmp` call.
    pub depth: usize,
    /// The value passed to `longjmp`.
    pub value: Value,
}

/// The shape analysis of a whole program.
pub struct ShapeAnalysis<'a> {
    program: &'a Program,
    config: Config,
    engine: Engine<'a>,
    graphs: BTreeMap<Tid, FunctionGraph<'a>>,
    /// The memoized call summaries per function.
    summaries: RefCell<BTreeMap<Tid, Vec<(Disjunct, Summary)>>>,
    /// The functions analysed so far.
    analysed: RefCell<BTreeSet<Tid>>,
    /// The functions whose analysis lost precision.
    imprecise: RefCell<BTreeSet<Tid>>,
    log_collector: crossbeam_channel::Sender<LogThreadMsg>,
}

impl<'a> ShapeAnalysis<'a> {
    /// Build the control flow graphs of all functions of the program.
    pub fn new(
        program: &'a Program,
        config: Config,
        log_collector: crossbeam_channel::Sender<LogThreadMsg>,
    ) -> Result<ShapeAnalysis<'a>, Error> {
        let may_longjmp = functions_that_may_longjmp(program);
        let graphs = program
            .subs
            .iter()
            .map(|sub| Ok((sub.tid.clone(), get_function_graph(sub, &may_longjmp)?)))
            .collect::<Result<BTreeMap<_, _>, Error>>()?;
        Ok(ShapeAnalysis {
            program,
            engine: Engine::new(program, config.engine_options()),
            config,
            graphs,
            summaries: RefCell::new(BTreeMap::new()),
            analysed: RefCell::new(BTreeSet::new()),
            imprecise: RefCell::new(BTreeSet::new()),
            log_collector,
        })
    }

    /// Analyse all entry points of the program.
    /// Afterwards functions that were not reached are analysed with unknown arguments,
    /// if configured.
    pub fn run(&self) {
        for entry in self.program.entry_points.iter() {
            match self.program.get_sub(entry) {
                Some(sub) => self.analyze_entry(sub, Fill::Zeroed),
                None => self.log(LogMessage::new_error(format!("Unknown entry point {entry}"))),
            }
        }
        if self.config.analyze_unreached_functions {
            for sub in self.program.subs.iter() {
                if !self.analysed.borrow().contains(&sub.tid) {
                    self.log(
                        LogMessage::new_debug(format!(
                            "Analysing unreached function {} with unknown arguments",
                            sub.term.name
                        ))
                        .location(sub.tid.clone()),
                    );
                    self.analyze_entry(sub, Fill::Unknown);
                }
            }
        }
    }

    /// Return the functions that were analysed and the functions whose analysis lost precision.
    pub fn into_function_sets(self) -> (BTreeSet<Tid>, BTreeSet<Tid>) {
        (self.analysed.into_inner(), self.imprecise.into_inner())
    }

    /// Analyse a function without a caller.
    fn analyze_entry(&self, sub: &'a Term<Sub>, globals: Fill) {
        let entry = self.engine.initial_disjunct(globals).and_then(|mut disjunct| {
            self.engine.enter_function(&mut disjunct, sub, None, None)?;
            Ok(disjunct)
        });
        match entry {
            Ok(mut disjunct) => {
                canonicalize(&mut disjunct);
                self.analyze_call(sub, disjunct);
            }
            Err(err) => {
                self.log_debug(&err, &sub.tid);
                self.imprecise.borrow_mut().insert(sub.tid.clone());
            }
        }
    }

    /// Compute the summary of a call of `sub` with the given entry disjunct.
    /// The frame of `sub` has to be pushed already.
    pub fn analyze_call(&self, sub: &'a Term<Sub>, entry: Disjunct) -> Summary {
        let cached = self.summaries.borrow().get(&sub.tid).and_then(|summaries| {
            summaries
                .iter()
                .find(|(known_entry, _)| *known_entry == entry)
                .map(|(_, summary)| summary.clone())
        });
        if let Some(summary) = cached {
            return summary;
        }
        self.analysed.borrow_mut().insert(sub.tid.clone());
        let Some(graph) = self.graphs.get(&sub.tid) else {
            return Summary::default();
        };
        let mut computation = Computation::new(Context::new(self, graph), None)
            .with_widening(WideningStrategy::Delayed(self.config.loop_widen_threshold));
        computation.set_node_value(graph.entry, StateSet::from_disjuncts([entry.clone()]));
        let deadline = self
            .config
            .time_budget_ms
            .map(|millis| Instant::now() + Duration::from_millis(millis));
        if !computation.compute_with_budget(self.config.iteration_budget, deadline) {
            let notice = EngineReport::new(
                ReportKind::Notice(NoticeKind::AnalysisTimeout),
                format!("Analysis of {} did not stabilize within its budget", sub.term.name),
                &entry,
            );
            self.handle_reports(vec![notice], &sub.tid);
        }
        let returns = computation
            .get_node_value(graph.exit)
            .map(|states| states.iter().cloned().collect())
            .unwrap_or_default();
        let escapes = computation.get_context().take_escapes();
        let summary = Summary { returns, escapes };
        self.summaries
            .borrow_mut()
            .entry(sub.tid.clone())
            .or_default()
            .push((entry, summary.clone()));
        summary
    }

    /// Turn engine reports generated at `location` into findings and log messages.
    ///
    /// Defects of unchecked properties are dropped.
    /// Notices mark all functions on the call stack as imprecise.
    fn handle_reports(&self, reports: Vec<EngineReport>, location: &Tid) {
        for report in reports {
            match report.kind {
                ReportKind::Defect(kind) => {
                    if !self.config.checked_properties.contains(&kind.property()) {
                        continue;
                    }
                    if let Some(finding) = report.to_finding(location) {
                        let _ = self.log_collector.send(LogThreadMsg::Finding(finding));
                    }
                }
                ReportKind::Notice(kind) => {
                    self.imprecise
                        .borrow_mut()
                        .extend(report.functions().cloned());
                    self.log(
                        LogMessage::new_info(format!("{}: {}", kind, report.description))
                            .location(location.clone()),
                    );
                }
            }
        }
    }

    fn log(&self, message: LogMessage) {
        let _ = self
            .log_collector
            .send(LogThreadMsg::Log(message.source(SOURCE)));
    }

    fn log_debug(&self, error: &Error, location: &Tid) {
        self.log(LogMessage::new_debug(format!("{error}")).location(location.clone()));
    }
}
