use super::*;
use std::collections::{BTreeMap, BTreeSet};

/// The `Program` structure represents a whole program delivered by the front end.
///
/// It contains all functions, global variables and struct layouts of the program
/// together with the list of entry points of the analysis.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct Program {
    /// The known functions of the program.
    pub subs: Vec<Term<Sub>>,
    /// The global variables. They are zero-initialized at program start.
    pub globals: Vec<Variable>,
    /// Maps struct names to their memory layout.
    pub structs: BTreeMap<String, StructLayout>,
    /// The TIDs of all known entry points of the program, usually just the TID of `main`.
    pub entry_points: Vec<Tid>,
}

/// The error returned if the input program violates a structural rule of the intermediate representation.
///
/// This is the only fatal error of the analysis.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MalformedInput {
    /// The term where the violation was detected, if known.
    pub location: Option<Tid>,
    /// A description of the violation.
    pub reason: String,
}

impl std::fmt::Display for MalformedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(tid) => write!(f, "Malformed input at {}: {}", tid, self.reason),
            None => write!(f, "Malformed input: {}", self.reason),
        }
    }
}

impl std::error::Error for MalformedInput {}

impl MalformedInput {
    fn at(location: &Tid, reason: impl Into<String>) -> Error {
        MalformedInput {
            location: Some(location.clone()),
            reason: reason.into(),
        }
        .into()
    }
}

impl Program {
    /// Find a function by its term identifier.
    pub fn get_sub(&self, tid: &Tid) -> Option<&Term<Sub>> {
        self.subs.iter().find(|sub| sub.tid == *tid)
    }

    /// Compute the size of a variable.
    pub fn size_of(&self, var: &Variable) -> Result<ByteSize, Error> {
        var.data_type.size(&self.structs)
    }

    /// Check the structural rules of the intermediate representation.
    ///
    /// Returns a [`MalformedInput`] error (wrapped into an [`Error`]) on the first violation found:
    /// - Term identifiers must be unique.
    /// - Functions must contain at least one block.
    /// - Jump targets must be blocks of the same function and call targets must be known functions.
    /// - Blocks must end in one of the allowed jump shapes.
    /// - All variable types must have a known size.
    /// - Entry points must be known functions.
    pub fn validate(&self) -> Result<(), Error> {
        let mut seen_tids = BTreeSet::new();
        let sub_tids: BTreeSet<&Tid> = self.subs.iter().map(|sub| &sub.tid).collect();
        for var in self.globals.iter() {
            self.validate_variable(var, None)?;
        }
        for sub in self.subs.iter() {
            if !seen_tids.insert(&sub.tid) {
                return Err(MalformedInput::at(&sub.tid, "duplicate term identifier"));
            }
            if sub.term.blocks.is_empty() {
                return Err(MalformedInput::at(&sub.tid, "function without blocks"));
            }
            let mut names = BTreeSet::new();
            for var in sub.term.frame_variables() {
                if !names.insert(&var.name) {
                    return Err(MalformedInput::at(
                        &sub.tid,
                        format!("duplicate variable {}", var.name),
                    ));
                }
                self.validate_variable(var, Some(&sub.tid))?;
            }
            let block_tids: BTreeSet<&Tid> = sub.term.blocks.iter().map(|blk| &blk.tid).collect();
            for blk in sub.term.blocks.iter() {
                if !seen_tids.insert(&blk.tid) {
                    return Err(MalformedInput::at(&blk.tid, "duplicate term identifier"));
                }
                if !blk.term.has_valid_jump_shape() {
                    return Err(MalformedInput::at(&blk.tid, "invalid jump shape"));
                }
                for def in blk.term.defs.iter() {
                    if !seen_tids.insert(&def.tid) {
                        return Err(MalformedInput::at(&def.tid, "duplicate term identifier"));
                    }
                }
                for jmp in blk.term.jmps.iter() {
                    if !seen_tids.insert(&jmp.tid) {
                        return Err(MalformedInput::at(&jmp.tid, "duplicate term identifier"));
                    }
                    if let Some(target) = jmp.term.intraprocedural_target() {
                        if !block_tids.contains(target) {
                            return Err(MalformedInput::at(
                                &jmp.tid,
                                format!("jump to unknown block {}", target),
                            ));
                        }
                    }
                    if let Jmp::Call {
                        target: Callee::Internal(callee),
                        ..
                    } = &jmp.term
                    {
                        if !sub_tids.contains(callee) {
                            return Err(MalformedInput::at(
                                &jmp.tid,
                                format!("call to unknown function {}", callee),
                            ));
                        }
                    }
                }
            }
        }
        for entry in self.entry_points.iter() {
            if !sub_tids.contains(entry) {
                return Err(MalformedInput::at(entry, "unknown entry point"));
            }
        }
        Ok(())
    }

    fn validate_variable(&self, var: &Variable, location: Option<&Tid>) -> Result<(), Error> {
        match var.data_type.size(&self.structs) {
            Ok(size) if u64::from(size) > 0 => Ok(()),
            _ => Err(MalformedInput {
                location: location.cloned(),
                reason: format!("variable {} has no valid type", var.name),
            }
            .into()),
        }
    }
}
