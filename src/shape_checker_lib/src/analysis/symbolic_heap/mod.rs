//! The symbolic heap engine.
//!
//! A [`Disjunct`] describes one possible state of the analysed program:
//! the stack frames of the current call chain and a graph of memory objects
//! connected by pointer values.
//! The [`Engine`] implements the transfer functions of single statements on disjuncts.
//! Whenever a transfer function detects a memory-safety defect or a loss of precision,
//! it adds an [`EngineReport`] to the report list handed to it.
//!
//! Every variable is a memory object, too.
//! Parameters and local variables are stack objects owned by a frame,
//! global variables are static objects that live for the whole analysis.
//! Thus taking the address of a variable needs no special treatment.
//!
//! After each transfer function unreachable objects are garbage collected
//! and the remaining objects are renumbered in a canonical order,
//! so that the fixpoint algorithm can compare disjuncts structurally.

use crate::abstract_domain::{IntervalDomain, ObjectId, SizedDomain};
use crate::checkers::{Finding, FindingKind, NoticeKind, TraceStep};
use crate::intermediate_representation::{ByteSize, Def, Program, POINTER_SIZE};
use crate::prelude::*;
use std::sync::Arc;

mod access;
pub use access::Target;
mod disjunct;
pub use disjunct::*;
mod eval;
mod frames;
mod gc;
pub use gc::canonicalize;
mod memory;
mod object;
pub use object::*;
mod value;
pub use value::*;

/// Options controlling the transfer functions.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct EngineOptions {
    /// If true, every heap allocation may return `NULL`.
    pub allocation_may_fail: bool,
    /// If true, paths continue after a defect was reported on them.
    /// Otherwise paths end at their first defect.
    pub continue_after_error: bool,
    /// If true, a failed assertion ends the path.
    pub assertion_halts: bool,
    /// How often the segments hit by a single access or `free` may be materialized.
    pub unfold_bound: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            allocation_may_fail: true,
            continue_after_error: false,
            assertion_halts: false,
            unfold_bound: 8,
        }
    }
}

/// The kind of an [`EngineReport`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ReportKind {
    /// A memory-safety defect or assertion violation.
    Defect(FindingKind),
    /// A loss of precision. The verdicts of all functions on the call stack become unknown.
    Notice(NoticeKind),
}

/// A report generated by a transfer function.
///
/// The report does not know the statement that caused it.
/// The caller of the transfer function is responsible for adding the location.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EngineReport {
    /// The kind of the report.
    pub kind: ReportKind,
    /// A short description for the user.
    pub description: String,
    /// The frames of the disjunct at the time of the report as `(function, call site)` pairs,
    /// outermost first.
    pub stack: Vec<(Tid, Option<Tid>)>,
    /// The witness trace of the disjunct at the time of the report.
    pub witness: Arc<Vec<TraceStep>>,
}

impl EngineReport {
    /// Create a report for the given disjunct.
    pub fn new(kind: ReportKind, description: impl ToString, disjunct: &Disjunct) -> EngineReport {
        EngineReport {
            kind,
            description: description.to_string(),
            stack: report_stack(disjunct),
            witness: disjunct.shared_trace(),
        }
    }

    /// The function in which the report was generated.
    pub fn function(&self) -> Option<&Tid> {
        self.stack.last().map(|(function, _)| function)
    }

    /// All functions on the call stack at the time of the report.
    pub fn functions(&self) -> impl Iterator<Item = &Tid> {
        self.stack.iter().map(|(function, _)| function)
    }

    /// Convert a defect report into a finding at the given location.
    /// Returns `None` for notices.
    pub fn to_finding(&self, location: &Tid) -> Option<Finding> {
        let ReportKind::Defect(kind) = self.kind else {
            return None;
        };
        let function = self.function()?.clone();
        let call_stack = self
            .stack
            .iter()
            .filter_map(|(_, call_site)| call_site.clone())
            .collect();
        Some(
            Finding::new(kind, function, location.clone(), &self.description)
                .call_stack(call_stack)
                .witness(self.witness.to_vec()),
        )
    }
}

/// The `(function, call site)` pairs of the frames of a disjunct.
fn report_stack(disjunct: &Disjunct) -> Vec<(Tid, Option<Tid>)> {
    disjunct
        .frames
        .iter()
        .map(|frame| (frame.function.clone(), frame.call_site.clone()))
        .collect()
}

/// The transfer functions of the symbolic heap.
pub struct Engine<'a> {
    /// The analysed program.
    pub program: &'a Program,
    /// Options for the transfer functions.
    pub options: EngineOptions,
}

impl<'a> Engine<'a> {
    /// Create a new engine for the given program.
    pub fn new(program: &'a Program, options: EngineOptions) -> Engine<'a> {
        Engine { program, options }
    }

    /// Report a defect on the given disjunct.
    pub fn defect(
        &self,
        disjunct: &Disjunct,
        kind: FindingKind,
        description: impl ToString,
        reports: &mut Vec<EngineReport>,
    ) {
        reports.push(EngineReport::new(
            ReportKind::Defect(kind),
            description,
            disjunct,
        ));
    }

    /// Report a loss of precision on the given disjunct.
    pub fn notice(
        &self,
        disjunct: &Disjunct,
        kind: NoticeKind,
        description: impl ToString,
        reports: &mut Vec<EngineReport>,
    ) {
        reports.push(EngineReport::new(
            ReportKind::Notice(kind),
            description,
            disjunct,
        ));
    }

    /// Create a disjunct that only contains the global variables.
    ///
    /// The content of the global variables is described by `globals`:
    /// zero-initialized for an analysis starting at a program entry point,
    /// unknown for functions analysed without a known caller.
    pub fn initial_disjunct(&self, globals: Fill) -> Result<Disjunct, Error> {
        let mut disjunct = Disjunct::new();
        for var in self.program.globals.iter() {
            let size = self.program.size_of(var)?;
            let object = HeapObject::new(Storage::Static, size.as_offset().into(), globals);
            let id = disjunct.add_object(object);
            disjunct.globals.insert(var.name.clone(), id);
        }
        Ok(disjunct)
    }

    /// Execute a statement.
    ///
    /// Returns the successor disjuncts, which are garbage collected and canonically numbered.
    /// Statements that cannot be executed at all generate an [`NoticeKind::UnsupportedConstruct`]
    /// notice and end the path.
    pub fn execute_def(
        &self,
        mut disjunct: Disjunct,
        def: &Term<Def>,
        reports: &mut Vec<EngineReport>,
    ) -> Vec<Disjunct> {
        disjunct.push_trace(TraceStep::Statement(def.tid.clone()));
        let failure_context = (report_stack(&disjunct), disjunct.shared_trace());
        let result = match &def.term {
            Def::Assign { var, value } => self.assign(disjunct, var, value).map(|d| vec![d]),
            Def::Load { var, address } => self.load(disjunct, var, address, reports),
            Def::Store {
                address,
                value,
                size,
            } => self.store(disjunct, address, value, *size, reports),
        };
        match result {
            Ok(disjuncts) => disjuncts
                .into_iter()
                .map(|disjunct| self.finish_transfer(disjunct, reports))
                .collect(),
            Err(err) => {
                let (stack, witness) = failure_context;
                reports.push(EngineReport {
                    kind: ReportKind::Notice(NoticeKind::UnsupportedConstruct),
                    description: format!("Cannot execute statement: {}", err),
                    stack,
                    witness,
                });
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests;
