use super::*;
use std::fmt;

/// A basic block is a sequence of `Def` statements followed by up to two `Jmp` statements.
///
/// The `Def` statements represent side-effectful operations that are executed in order when the block is entered.
/// `Def` statements do not affect the control flow of a program.
///
/// The `Jmp` statements represent control flow affecting operations.
/// There can only be zero, one or two `Jmp`s:
/// - Zero `Jmp`s indicate a dead end, i.e. execution does not continue after the block.
/// - If there is exactly one `Jmp`, it is required to be an unconditional jump, a call or a return.
/// - For two jumps, the first one has to be a conditional jump,
/// where the second unconditional jump is only taken if the condition of the first jump evaluates to false.
///
/// Basic blocks are *single entry, single exit*, i.e. a basic block is only entered at the beginning
/// and is only exited by the jump statements at the end of the block.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Blk {
    /// The `Def` statements of the basic block in order of execution.
    pub defs: Vec<Term<Def>>,
    /// The `Jmp` statements of the basic block
    pub jmps: Vec<Term<Jmp>>,
}

impl Blk {
    /// Check that the jumps of the block have one of the allowed shapes.
    pub fn has_valid_jump_shape(&self) -> bool {
        match &self.jmps[..] {
            [] => true,
            [single] => !matches!(single.term, Jmp::CBranch { .. }),
            [first, second] => {
                matches!(first.term, Jmp::CBranch { .. }) && matches!(second.term, Jmp::Branch(_))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Blk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for def in self.defs.iter() {
            writeln!(f, "{}: {}", def.tid, def.term)?;
        }
        for jmp in self.jmps.iter() {
            writeln!(f, "{}: {}", jmp.tid, jmp.term)?;
        }
        Ok(())
    }
}
