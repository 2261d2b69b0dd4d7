use super::{ByteSize, Expression, Variable};
use crate::prelude::*;
use std::fmt;

/// A side effect of a statement, i.e. an assignment to a variable or to memory.
///
/// Assignments of aggregate-typed variables (structs and arrays)
/// are executed as field-wise copies of the contained values.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum Def {
    /// Assign the value of the expression to the variable.
    Assign {
        /// The variable that is overwritten.
        var: Variable,
        /// The expression computing the assigned value.
        value: Expression,
    },
    /// Load a value from the memory location that `address` points to and assign it to `var`.
    /// The size of the memory access is the size of the type of `var`.
    Load {
        /// The variable that is overwritten.
        var: Variable,
        /// The expression computing the address of the memory access.
        address: Expression,
    },
    /// Store a value at the memory location that `address` points to.
    Store {
        /// The expression computing the address of the memory access.
        address: Expression,
        /// The expression computing the stored value.
        value: Expression,
        /// The number of bytes written.
        size: ByteSize,
    },
}

impl fmt::Display for Def {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Def::Assign { var, value } => write!(f, "{} = {}", var.name, value),
            Def::Load { var, address } => write!(f, "{} = *{}", var.name, address),
            Def::Store {
                address,
                value,
                size,
            } => write!(f, "*{} := {}:{}", address, value, size),
        }
    }
}
