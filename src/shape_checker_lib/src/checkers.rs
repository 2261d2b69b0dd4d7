//! The property checker.
//!
//! The symbolic heap engine detects defects while it executes statements.
//! This module defines the vocabulary for reporting them:
//! the [`Property`] names that can be switched on and off in the configuration,
//! the [`FindingKind`] of each reported defect,
//! the [`NoticeKind`] of precision-loss events that prevent a `safe` verdict,
//! and the per-function [`Verdict`] computed from the collected findings.
//!
//! ## How verdicts are computed
//!
//! A function is `unsafe` if a finding was reported inside it
//! or inside a callee invoked (directly or transitively) from one of its call sites.
//! Otherwise it is `unknown` if the analysis of the function lost precision
//! (budget exhausted, disjunct overflow, unknown dereference, recursion bound)
//! or if the function was never analysed.
//! Only the remaining functions are `safe`.

use crate::intermediate_representation::{Jmp, Program};
use crate::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// The memory-safety properties that the analysis can check.
///
/// Their kebab-case names are used in the `checked-properties` configuration option.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Property {
    /// Dereferences of `NULL`.
    NullDeref,
    /// Accesses to freed memory.
    UseAfterFree,
    /// Freeing memory twice or freeing something that is not the base of a heap object.
    DoubleFree,
    /// Uses of uninitialized or dangling pointers.
    WildPointer,
    /// Heap memory that becomes unreachable without being freed.
    Leak,
    /// Accesses outside the bounds of an object.
    OutOfBounds,
    /// Violated assertions and reached error functions.
    Assertion,
}

impl Property {
    /// All checkable properties.
    pub const ALL: [Property; 7] = [
        Property::NullDeref,
        Property::UseAfterFree,
        Property::DoubleFree,
        Property::WildPointer,
        Property::Leak,
        Property::OutOfBounds,
        Property::Assertion,
    ];
}

/// The kinds of defects that the analysis reports.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum FindingKind {
    /// A pointer that may be `NULL` is dereferenced.
    NullDereference,
    /// A pointer to a freed object is dereferenced.
    UseAfterFree,
    /// A freed object is freed again.
    DoubleFree,
    /// `free` is called on something that is not the start of a heap object.
    InvalidFree,
    /// An uninitialized or dangling pointer is used.
    WildPointer,
    /// A heap object becomes unreachable while still allocated.
    MemoryLeak,
    /// A memory access exceeds the bounds of the accessed object.
    OutOfBoundsAccess,
    /// An assertion may fail or an error function is reachable.
    AssertionViolation,
}

impl FindingKind {
    /// The configurable property that a finding of this kind belongs to.
    pub fn property(&self) -> Property {
        match self {
            FindingKind::NullDereference => Property::NullDeref,
            FindingKind::UseAfterFree => Property::UseAfterFree,
            FindingKind::DoubleFree | FindingKind::InvalidFree => Property::DoubleFree,
            FindingKind::WildPointer => Property::WildPointer,
            FindingKind::MemoryLeak => Property::Leak,
            FindingKind::OutOfBoundsAccess => Property::OutOfBounds,
            FindingKind::AssertionViolation => Property::Assertion,
        }
    }
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{:?}", self)
    }
}

/// Events where the analysis had to give up precision.
///
/// Each of them prevents a function from being declared `safe`,
/// unless the event was resolved soundly.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum NoticeKind {
    /// The iteration or time budget of a function was exhausted.
    AnalysisTimeout,
    /// More disjuncts reached a location than the configured cap allows
    /// and merging them may hide defects.
    DisjunctOverflow,
    /// The call depth exceeded the configured recursion bound.
    RecursionBound,
    /// A completely unknown value was dereferenced.
    UnknownValueDereference,
    /// A construct the engine cannot model was encountered.
    UnsupportedConstruct,
}

impl std::fmt::Display for NoticeKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{:?}", self)
    }
}

/// One step of a witness trace.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub enum TraceStep {
    /// A statement was executed.
    Statement(Tid),
    /// A conditional branch was decided.
    Branch {
        /// The conditional jump term.
        jump: Tid,
        /// Whether the jump was taken.
        taken: bool,
    },
    /// An internal function was entered through the given call.
    Call(Tid),
    /// The current function returned through the given return term.
    Return(Tid),
    /// A `longjmp` call resumed execution at a `setjmp` call site.
    LongJmp {
        /// The `longjmp` call.
        from: Tid,
        /// The `setjmp` call.
        to: Tid,
    },
}

impl std::fmt::Display for TraceStep {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceStep::Statement(tid) => write!(formatter, "{}", tid),
            TraceStep::Branch { jump, taken: true } => write!(formatter, "{} (taken)", jump),
            TraceStep::Branch { jump, taken: false } => write!(formatter, "{} (not taken)", jump),
            TraceStep::Call(tid) => write!(formatter, "call {}", tid),
            TraceStep::Return(tid) => write!(formatter, "return {}", tid),
            TraceStep::LongJmp { from, to } => write!(formatter, "longjmp {} -> {}", from, to),
        }
    }
}

/// A reported defect.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct Finding {
    /// The function in which the defect happens.
    pub function: Tid,
    /// The statement or jump causing the defect.
    pub location: Tid,
    /// The kind of the defect.
    pub kind: FindingKind,
    /// The call sites leading from the analysed entry function to `function`, outermost first.
    pub call_stack: Vec<Tid>,
    /// The statements and branch decisions leading to the defect.
    pub witness: Vec<TraceStep>,
    /// A short description that is presented to the user.
    pub description: String,
}

impl Finding {
    /// Create a new finding without a call stack or witness.
    pub fn new(
        kind: FindingKind,
        function: Tid,
        location: Tid,
        description: impl ToString,
    ) -> Finding {
        Finding {
            function,
            location,
            kind,
            call_stack: Vec::new(),
            witness: Vec::new(),
            description: description.to_string(),
        }
    }

    /// Set the call stack of the finding.
    pub fn call_stack(mut self, call_stack: Vec<Tid>) -> Finding {
        self.call_stack = call_stack;
        self
    }

    /// Set the witness trace of the finding.
    pub fn witness(mut self, witness: Vec<TraceStep>) -> Finding {
        self.witness = witness;
        self
    }

    /// Key used to deduplicate findings.
    /// Findings for the same defect reached through different paths only differ in their witness.
    pub fn dedup_key(&self) -> (FindingKind, Tid, Vec<Tid>) {
        (self.kind, self.location.clone(), self.call_stack.clone())
    }
}

impl std::fmt::Display for Finding {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "[{}] @ {}: {}",
            self.kind, self.location.address, self.description
        )
    }
}

/// The result of the analysis for one function.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// No defect is possible in the function.
    Safe,
    /// A defect may happen in the function or in one of its callees.
    Unsafe,
    /// The analysis could not decide.
    Unknown,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Safe => write!(formatter, "safe"),
            Verdict::Unsafe => write!(formatter, "unsafe"),
            Verdict::Unknown => write!(formatter, "unknown"),
        }
    }
}

/// Compute the verdict for every function of the program.
///
/// `imprecise` contains the functions whose analysis lost precision
/// and `analysed` the functions that were analysed at all.
pub fn compute_verdicts(
    program: &Program,
    findings: &[Finding],
    imprecise: &BTreeSet<Tid>,
    analysed: &BTreeSet<Tid>,
) -> BTreeMap<Tid, Verdict> {
    let mut call_site_owner: BTreeMap<&Tid, &Tid> = BTreeMap::new();
    for sub in program.subs.iter() {
        for block in sub.term.blocks.iter() {
            for jmp in block.term.jmps.iter() {
                if let Jmp::Call { .. } = jmp.term {
                    call_site_owner.insert(&jmp.tid, &sub.tid);
                }
            }
        }
    }
    let mut unsafe_functions: BTreeSet<&Tid> = BTreeSet::new();
    for finding in findings {
        unsafe_functions.insert(&finding.function);
        for call_site in finding.call_stack.iter() {
            if let Some(owner) = call_site_owner.get(call_site) {
                unsafe_functions.insert(owner);
            }
        }
    }
    program
        .subs
        .iter()
        .map(|sub| {
            let verdict = if unsafe_functions.contains(&sub.tid) {
                Verdict::Unsafe
            } else if imprecise.contains(&sub.tid) || !analysed.contains(&sub.tid) {
                Verdict::Unknown
            } else {
                Verdict::Safe
            };
            (sub.tid.clone(), verdict)
        })
        .collect()
}

#[cfg(test)]
mod tests;
