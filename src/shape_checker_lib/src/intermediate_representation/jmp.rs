use super::{Expression, Variable};
use crate::prelude::*;
use std::fmt;

/// A `Jmp` statement affects the control flow of a program.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum Jmp {
    /// A direct intraprocedural jump to the targeted `Blk` term identifier.
    Branch(Tid),
    /// A direct intraprocedural jump that is only taken if the condition evaluates to true (i.e. not zero).
    CBranch {
        /// The term ID of the target block of the jump.
        target: Tid,
        /// The jump is only taken if this expression evaluates to `true`, (i.e. not zero).
        condition: Expression,
    },
    /// A call to an internal function or to an extern symbol (including the analysis builtins).
    Call {
        /// The called function.
        target: Callee,
        /// The argument expressions of the call.
        args: Vec<Expression>,
        /// The variable receiving the return value, if any.
        result: Option<Variable>,
        /// The term ID of the block where execution continues after the call returns.
        return_: Tid,
    },
    /// A return from the current function with an optional return value.
    Return(Option<Expression>),
}

/// The target of a call.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum Callee {
    /// A function of the analyzed program.
    Internal(Tid),
    /// An extern symbol identified by its name.
    Extern(String),
}

impl Jmp {
    /// Return the name of the extern symbol if the jump is a call to an extern symbol.
    pub fn extern_callee_name(&self) -> Option<&str> {
        match self {
            Jmp::Call {
                target: Callee::Extern(name),
                ..
            } => Some(name),
            _ => None,
        }
    }

    /// Return the intraprocedural target block of the jump.
    /// For calls this is the return target.
    pub fn intraprocedural_target(&self) -> Option<&Tid> {
        match self {
            Jmp::Branch(target) | Jmp::CBranch { target, .. } => Some(target),
            Jmp::Call { return_, .. } => Some(return_),
            Jmp::Return(_) => None,
        }
    }
}

impl fmt::Display for Jmp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Jmp::Branch(tid) => write!(f, "Jump to {}", tid),
            Jmp::CBranch { target, condition } => write!(f, "If {} jump to {}", condition, target),
            Jmp::Call {
                target, return_, ..
            } => match target {
                Callee::Internal(tid) => write!(f, "call {} ret {}", tid, return_),
                Callee::Extern(name) => write!(f, "call {} ret {}", name, return_),
            },
            Jmp::Return(Some(value)) => write!(f, "ret {}", value),
            Jmp::Return(None) => write!(f, "ret"),
        }
    }
}
