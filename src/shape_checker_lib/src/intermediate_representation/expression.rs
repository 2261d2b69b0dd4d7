use super::Variable;
use crate::prelude::*;
use std::collections::BTreeSet;
use std::fmt;

/// An expression is a calculation rule
/// on how to compute a certain value given some variables as input.
///
/// The basic building blocks of expressions are variables, constants and the address-of operator.
/// Expressions do not contain memory accesses,
/// these are represented by the [`Def::Load`](super::Def::Load) and [`Def::Store`](super::Def::Store) statements.
///
/// Pointer arithmetic is byte-based,
/// i.e. the front end has to scale array indices by the element size.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum Expression {
    /// A variable representing its current value.
    Var(Variable),
    /// An integer constant.
    Const(i64),
    /// The `NULL` pointer.
    Null,
    /// The address of a variable.
    /// For array variables this is also the value of the decayed array.
    AddressOf(Variable),
    /// A binary operation.
    BinOp {
        /// The opcode/type of the operation
        op: BinOpType,
        /// The left hand side expression
        lhs: Box<Expression>,
        /// The right hand side expression
        rhs: Box<Expression>,
    },
    /// A unary operation
    UnOp {
        /// The opcode/type of the operation
        op: UnOpType,
        /// The argument expression
        arg: Box<Expression>,
    },
    /// A value that the front end could not translate.
    Unknown,
}

/// The type/mnemonic of a binary operation.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum BinOpType {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    BoolAnd,
    BoolOr,
}

/// The type/mnemonic of a unary operation
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum UnOpType {
    Neg,
    BoolNegate,
}

impl BinOpType {
    /// Returns `true` if the operation yields a boolean value.
    pub fn is_comparison(self) -> bool {
        use BinOpType::*;
        matches!(self, Equal | NotEqual | Less | LessEqual | BoolAnd | BoolOr)
    }
}

impl Expression {
    /// Shortcut for creating a binary operation expression.
    pub fn bin_op(op: BinOpType, lhs: Expression, rhs: Expression) -> Expression {
        Expression::BinOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Shortcut for creating an `Add` expression
    pub fn plus(self, rhs: Expression) -> Expression {
        Expression::bin_op(BinOpType::Add, self, rhs)
    }

    /// Shortcut for adding a constant byte offset to the expression.
    pub fn plus_const(self, offset: i64) -> Expression {
        if offset == 0 {
            self
        } else {
            self.plus(Expression::Const(offset))
        }
    }

    /// Return the logical negation of the expression.
    pub fn negated(self) -> Expression {
        Expression::UnOp {
            op: UnOpType::BoolNegate,
            arg: Box::new(self),
        }
    }

    /// Return all variables contained in the expression.
    /// Variables that only occur as arguments of an address-of operator are not contained.
    pub fn input_vars(&self) -> Vec<&Variable> {
        let mut vars = Vec::new();
        self.collect_input_vars(&mut vars);
        let mut seen = BTreeSet::new();
        vars.retain(|var| seen.insert(&var.name));
        vars
    }

    fn collect_input_vars<'a>(&'a self, vars: &mut Vec<&'a Variable>) {
        match self {
            Expression::Var(var) => vars.push(var),
            Expression::BinOp { lhs, rhs, .. } => {
                lhs.collect_input_vars(vars);
                rhs.collect_input_vars(vars);
            }
            Expression::UnOp { arg, .. } => arg.collect_input_vars(vars),
            Expression::Const(_)
            | Expression::Null
            | Expression::AddressOf(_)
            | Expression::Unknown => (),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Var(var) => write!(f, "{}", var.name),
            Expression::Const(value) => write!(f, "{}", value),
            Expression::Null => write!(f, "NULL"),
            Expression::AddressOf(var) => write!(f, "&{}", var.name),
            Expression::BinOp { op, lhs, rhs } => write!(f, "({} {:?} {})", lhs, op, rhs),
            Expression::UnOp { op, arg } => write!(f, "{:?}({})", op, arg),
            Expression::Unknown => write!(f, "?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intermediate_representation::{ByteSize, DataType};

    #[test]
    fn input_vars_are_deduplicated() {
        let x = Variable::new("x", DataType::Integer(ByteSize::new(4)));
        let y = Variable::new("y", DataType::Integer(ByteSize::new(4)));
        let expr = Expression::Var(x.clone())
            .plus(Expression::Var(y.clone()))
            .plus(Expression::Var(x.clone()))
            .plus(Expression::AddressOf(y.clone()));
        assert_eq!(expr.input_vars(), vec![&x, &y]);
        assert_eq!(Expression::Null.negated().input_vars().len(), 0);
    }

    #[test]
    fn display() {
        let p = Variable::new("p", DataType::pointer_to(DataType::Void));
        let expr = Expression::Var(p).plus_const(8);
        assert_eq!(format!("{}", expr), "(p Add 8)");
        assert_eq!(Expression::Const(3).plus_const(0), Expression::Const(3));
    }
}
