use super::{Blk, Variable};
use crate::prelude::*;

/// A `Sub` or subroutine represents a function with a given name and a list of basic blocks belonging to it.
///
/// Subroutines are *single-entry*,
/// i.e. calling a subroutine will execute the first block in the list of basic blocks.
/// A subroutine may have multiple exits, which are identified by `Jmp::Return` statements.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Sub {
    /// The name of the subroutine
    pub name: String,
    /// The formal parameters of the subroutine in order.
    pub params: Vec<Variable>,
    /// The local variables of the subroutine (without the parameters).
    pub locals: Vec<Variable>,
    /// The basic blocks belonging to the subroutine.
    /// The first block is also the entry point of the subroutine.
    pub blocks: Vec<Term<Blk>>,
}

impl Sub {
    /// Iterate over all parameters and local variables of the subroutine.
    pub fn frame_variables(&self) -> impl Iterator<Item = &Variable> {
        self.params.iter().chain(self.locals.iter())
    }
}
