/*!
The main library of the shape_checker, a memory-safety analysis for C-like programs.

# What is the shape_checker

The shape_checker finds memory-safety defects in programs that build and traverse
dynamically allocated data structures like linked lists.
It executes the control flow graph of the program symbolically on an abstract heap,
where chains of list nodes are summarized by list segments of unknown length.
Thus it can decide safety for all possible lengths of the lists built by a program.

The following defects are detected:
- dereferences of `NULL`,
- uses of freed memory and double frees,
- invalid frees (of stack memory or of pointers into an object),
- dereferences of uninitialized pointers, dangling stack pointers
  and pointers clobbered by `longjmp`,
- memory leaks,
- out-of-bounds accesses,
- failing assertions of the analysed program.

For every function of the program the analysis computes a [`Verdict`](checkers::Verdict):
`unsafe` if a defect may happen in the function (or its callees),
`unknown` if the analysis had to give up precision,
and `safe` otherwise.

# Input

The analysed programs are given in the intermediate representation defined in the
[`intermediate_representation`] module.
A front end (not part of this crate) translates C source code into this representation.
Programs can be deserialized from JSON or assembled with the
[`builder`](intermediate_representation::builder) module.

# Configuration

The behaviour of the analysis can be modified through a configuration file.
Start by taking a look at the standard configuration file located at `src/config.json`
and read the documentation of the [`Config`] struct for the meaning of each field.
A user configuration file with the same name in the configuration directory of the
`shape_checker` (as determined by the `directories` crate) takes precedence,
see [`load_config`].

# Further documentation

The [`analysis`] module contains the abstract interpretation core:
the symbolic heap, the abstraction of list segments and the fixpoint algorithm.
The [`checkers`] module explains how findings are aggregated into verdicts.
*/

use std::collections::BTreeMap;

pub mod abstract_domain;
pub mod analysis;
pub mod checkers;
pub mod intermediate_representation;
pub mod utils;

pub use analysis::shape_analysis::Config;
use analysis::shape_analysis::ShapeAnalysis;
use checkers::{compute_verdicts, Finding, Verdict};
use intermediate_representation::Program;
use utils::log::{LogMessage, LogThread};

mod prelude {
    pub use serde::{Deserialize, Serialize};

    pub use crate::intermediate_representation::ByteSize;
    pub use crate::intermediate_representation::{Term, Tid};
    pub use anyhow::{anyhow, Error};
}
use prelude::*;

/// The name of the configuration file in the user configuration directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// The results of the analysis of a program.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct AnalysisReport {
    /// The detected defects, ordered by function, location and kind.
    pub findings: Vec<Finding>,
    /// The verdict for each function of the program.
    pub verdicts: BTreeMap<Tid, Verdict>,
    /// The log messages generated during the analysis.
    pub logs: Vec<LogMessage>,
}

impl AnalysisReport {
    /// Get the verdict of the function with the given TID.
    pub fn verdict(&self, function: &Tid) -> Option<Verdict> {
        self.verdicts.get(function).copied()
    }
}

/// Analyse a program.
///
/// Returns an error if the program is malformed
/// (see [`Program::validate`](intermediate_representation::Program::validate)).
/// All other problems are reported as log messages and result in `unknown` verdicts.
pub fn analyze(program: &Program, config: &Config) -> Result<AnalysisReport, Error> {
    program.validate()?;
    let logging_thread = LogThread::spawn(LogThread::collect_and_deduplicate);
    let analysis = ShapeAnalysis::new(program, config.clone(), logging_thread.get_msg_sender())?;
    analysis.run();
    let (analysed, imprecise) = analysis.into_function_sets();
    let (logs, findings) = logging_thread.collect();
    let verdicts = compute_verdicts(program, &findings, &imprecise, &analysed);
    Ok(AnalysisReport {
        findings,
        verdicts,
        logs,
    })
}

/// Get the analysis configuration.
///
/// A configuration file in the user configuration directory takes precedence
/// over the standard configuration.
/// Fields missing in the user configuration file are an error.
pub fn load_config() -> Result<Config, Error> {
    match utils::read_config_file(CONFIG_FILE_NAME) {
        Ok(json) => Ok(serde_json::from_value(json)?),
        Err(_) => Ok(serde_json::from_str(include_str!("../../config.json"))?),
    }
}
