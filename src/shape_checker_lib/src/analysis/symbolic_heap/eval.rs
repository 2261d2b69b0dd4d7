//! Evaluation of expressions and refinement of disjuncts by branch conditions.

use super::*;
use crate::abstract_domain::{SpecializeByConditional, INFINITY, NEG_INFINITY};
use crate::analysis::abstraction::materialize_target;
use crate::intermediate_representation::{BinOpType, DataType, Expression, UnOpType, Variable};

/// The size of the results of comparisons and boolean operations.
const BOOL_SIZE: ByteSize = ByteSize::new(4);

/// An (in)equality relation between two sides of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
}

impl Relation {
    fn from_op(op: BinOpType) -> Option<Relation> {
        match op {
            BinOpType::Less => Some(Relation::Less),
            BinOpType::LessEqual => Some(Relation::LessEqual),
            BinOpType::Equal => Some(Relation::Equal),
            BinOpType::NotEqual => Some(Relation::NotEqual),
            _ => None,
        }
    }

    /// The relation with both sides swapped.
    fn flipped(self) -> Relation {
        match self {
            Relation::Less => Relation::Greater,
            Relation::LessEqual => Relation::GreaterEqual,
            Relation::Greater => Relation::Less,
            Relation::GreaterEqual => Relation::LessEqual,
            Relation::Equal | Relation::NotEqual => self,
        }
    }

    /// The relation that holds iff `self` does not hold.
    fn negated(self) -> Relation {
        match self {
            Relation::Less => Relation::GreaterEqual,
            Relation::LessEqual => Relation::Greater,
            Relation::Greater => Relation::LessEqual,
            Relation::GreaterEqual => Relation::Less,
            Relation::Equal => Relation::NotEqual,
            Relation::NotEqual => Relation::Equal,
        }
    }
}

impl<'a> Engine<'a> {
    /// Evaluate an expression.
    ///
    /// Evaluation never dereferences pointers, so it cannot cause defects.
    /// Errors indicate expressions that cannot be evaluated at all, like unknown variables.
    pub fn eval(&self, disjunct: &Disjunct, expression: &Expression) -> Result<Value, Error> {
        Ok(match expression {
            Expression::Var(var) => self.read_var(disjunct, var)?,
            Expression::Const(value) => Value::scalar(*value, POINTER_SIZE),
            Expression::Null => Value::null(),
            Expression::AddressOf(var) => Value::pointer(self.var_object(disjunct, var)?, 0),
            Expression::BinOp { op, lhs, rhs } => {
                let lhs = self.eval(disjunct, lhs)?;
                let rhs = self.eval(disjunct, rhs)?;
                eval_bin_op(*op, lhs, rhs)
            }
            Expression::UnOp { op, arg } => eval_un_op(*op, self.eval(disjunct, arg)?),
            Expression::Unknown => Value::Top(POINTER_SIZE),
        })
    }

    /// The memory object of a variable.
    pub fn var_object(&self, disjunct: &Disjunct, var: &Variable) -> Result<ObjectId, Error> {
        disjunct
            .var_object(&var.name)
            .ok_or_else(|| anyhow!("Unknown variable {}", var.name))
    }

    /// Read the value of a variable.
    /// Arrays decay to a pointer to their first element.
    pub fn read_var(&self, disjunct: &Disjunct, var: &Variable) -> Result<Value, Error> {
        let id = self.var_object(disjunct, var)?;
        if let DataType::Array(..) = var.data_type {
            return Ok(Value::pointer(id, 0));
        }
        let size = self.program.size_of(var)?;
        let object = disjunct
            .object(id)
            .ok_or_else(|| anyhow!("Variable {} without memory object", var.name))?;
        let value = object.read_at(0, size);
        Ok(if var.data_type.is_pointer() {
            value.into_pointer_if_zero()
        } else {
            value
        })
    }

    /// Overwrite the value of a (non-aggregate) variable.
    pub fn write_var(
        &self,
        disjunct: &mut Disjunct,
        var: &Variable,
        value: Value,
    ) -> Result<(), Error> {
        let value = self.coerce(value, &var.data_type)?;
        let id = self.var_object(disjunct, var)?;
        disjunct
            .object_mut(id)
            .ok_or_else(|| anyhow!("Variable {} without memory object", var.name))?
            .write_at(0, value);
        Ok(())
    }

    /// Convert a value to the representation used for values of the given type.
    pub fn coerce(&self, value: Value, data_type: &DataType) -> Result<Value, Error> {
        let size = data_type.size(&self.program.structs)?;
        Ok(match (data_type, value) {
            (DataType::Pointer(_), value) if value.is_null() => Value::null(),
            (_, Value::Scalar { interval, .. }) => Value::Scalar { interval, size },
            (_, pointer @ Value::Pointer { .. }) if size == POINTER_SIZE => pointer,
            (_, Value::Pointer { .. }) => Value::unknown_scalar(size),
            (_, Value::Indeterminate { cause, .. }) => Value::Indeterminate { cause, size },
            (_, Value::Top(_)) => Value::Top(size),
        })
    }

    /// Restrict a disjunct to the states where `condition` evaluates to `expected`.
    ///
    /// Segments pointed to by variables of the condition are materialized first,
    /// so that the condition can distinguish empty and non-empty segments.
    /// Returns an empty vector if the condition cannot evaluate to `expected`.
    pub fn assume(
        &self,
        disjunct: Disjunct,
        condition: &Expression,
        expected: bool,
    ) -> Result<Vec<Disjunct>, Error> {
        let mut results = Vec::new();
        for disjunct in self.materialize_condition_vars(disjunct, condition) {
            results.extend(self.refine(disjunct, condition, expected)?);
        }
        Ok(results)
    }

    fn materialize_condition_vars(
        &self,
        disjunct: Disjunct,
        condition: &Expression,
    ) -> Vec<Disjunct> {
        let vars = condition.input_vars();
        let mut pending = vec![(disjunct, 0)];
        let mut done = Vec::new();
        while let Some((disjunct, rounds)) = pending.pop() {
            let segment = vars.iter().find_map(|var| {
                let Value::Pointer { target, .. } = self.read_var(&disjunct, var).ok()? else {
                    return None;
                };
                let id = target.object()?;
                disjunct
                    .object(id)
                    .filter(|object| object.is_segment())
                    .map(|_| target)
            });
            match segment {
                Some(target) if rounds < self.options.unfold_bound => pending.extend(
                    materialize_target(disjunct, target)
                        .into_iter()
                        .map(|disjunct| (disjunct, rounds + 1)),
                ),
                _ => done.push(disjunct),
            }
        }
        done
    }

    fn refine(
        &self,
        disjunct: Disjunct,
        condition: &Expression,
        expected: bool,
    ) -> Result<Vec<Disjunct>, Error> {
        match condition {
            Expression::UnOp {
                op: UnOpType::BoolNegate,
                arg,
            } => return self.refine(disjunct, arg, !expected),
            Expression::BinOp {
                op: op @ (BinOpType::BoolAnd | BinOpType::BoolOr),
                lhs,
                rhs,
            } => {
                // `a && b` is false iff `a` is false or (`a` is true and `b` is false).
                // `a || b` is the dual.
                let short_circuit = *op == BinOpType::BoolOr;
                if expected == short_circuit {
                    let mut results = self.refine(disjunct.clone(), lhs, short_circuit)?;
                    for disjunct in self.refine(disjunct, lhs, !short_circuit)? {
                        results.extend(self.refine(disjunct, rhs, short_circuit)?);
                    }
                    return Ok(results);
                }
                let mut results = Vec::new();
                for disjunct in self.refine(disjunct, lhs, expected)? {
                    results.extend(self.refine(disjunct, rhs, expected)?);
                }
                return Ok(results);
            }
            _ => (),
        }
        match self.eval(&disjunct, condition)?.truth_value() {
            Some(truth) if truth == expected => return Ok(vec![disjunct]),
            Some(_) => return Ok(Vec::new()),
            None => (),
        }
        let zero = Expression::Const(0);
        let (lhs, relation, rhs) = match condition {
            Expression::BinOp { op, lhs, rhs } => match Relation::from_op(*op) {
                Some(relation) => (lhs.as_ref(), relation, rhs.as_ref()),
                None => return Ok(vec![disjunct]),
            },
            Expression::Var(_) => (condition, Relation::NotEqual, &zero),
            _ => return Ok(vec![disjunct]),
        };
        let relation = if expected {
            relation
        } else {
            relation.negated()
        };
        let mut disjunct = disjunct;
        if !self.refine_side(&mut disjunct, lhs, relation, rhs)?
            || !self.refine_side(&mut disjunct, rhs, relation.flipped(), lhs)?
        {
            return Ok(Vec::new());
        }
        Ok(vec![disjunct])
    }

    /// Refine the value of `side` if it is a variable, so that `side relation other` holds.
    /// Returns false if the relation cannot hold.
    fn refine_side(
        &self,
        disjunct: &mut Disjunct,
        side: &Expression,
        relation: Relation,
        other: &Expression,
    ) -> Result<bool, Error> {
        let Expression::Var(var) = side else {
            return Ok(true);
        };
        if var.data_type.is_aggregate() {
            return Ok(true);
        }
        let value = self.read_var(disjunct, var)?;
        let other = self.eval(disjunct, other)?;
        let maybe_null = matches!(
            value,
            Value::Pointer {
                target: PointerTarget::MaybeNull(_),
                ..
            }
        );
        match refine_value(value, relation, &other) {
            Some(refined) => {
                let ruled_out_object = maybe_null && refined.referenced_object().is_none();
                self.write_var(disjunct, var, refined)?;
                if ruled_out_object {
                    // Objects only reachable through the pointer do not exist if it is `NULL`.
                    disjunct.remove_unreachable_objects();
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Restrict `value` to the values satisfying `value relation other`.
/// Returns `None` if no such value exists.
fn refine_value(value: Value, relation: Relation, other: &Value) -> Option<Value> {
    match value {
        Value::Scalar { interval, size } => {
            let Some(bound) = other.as_integer() else {
                return Some(Value::Scalar { interval, size });
            };
            let refined = match relation {
                Relation::Less if bound.end() == INFINITY => Ok(interval),
                Relation::Less => interval.add_signed_less_equal_bound(bound.end().checked_sub(1)?),
                Relation::LessEqual => interval.add_signed_less_equal_bound(bound.end()),
                Relation::Greater if bound.start() == NEG_INFINITY => Ok(interval),
                Relation::Greater => {
                    interval.add_signed_greater_equal_bound(bound.start().checked_add(1)?)
                }
                Relation::GreaterEqual => interval.add_signed_greater_equal_bound(bound.start()),
                Relation::Equal => interval.intersect(bound),
                Relation::NotEqual => match bound.try_to_value() {
                    Some(bound) => interval.add_not_equal_bound(bound),
                    None => Ok(interval),
                },
            };
            refined.ok().map(|interval| Value::Scalar { interval, size })
        }
        Value::Pointer {
            target: PointerTarget::MaybeNull(id),
            offset,
        } => match relation {
            Relation::Equal if other.is_null() => offset.contains(0).then(Value::null),
            Relation::NotEqual if other.is_null() => Some(Value::Pointer {
                target: PointerTarget::Object(id),
                offset,
            }),
            _ => Some(Value::Pointer {
                target: PointerTarget::MaybeNull(id),
                offset,
            }),
        },
        pointer @ Value::Pointer { .. } => {
            let impossible = match relation {
                Relation::Equal => addresses_differ(&pointer, other),
                Relation::NotEqual => pointer.is_null() && other.is_null(),
                _ => false,
            };
            (!impossible).then_some(pointer)
        }
        Value::Top(size) => match relation {
            Relation::Equal if other.is_null() => Some(Value::null()),
            _ => Some(Value::Top(size)),
        },
        indeterminate @ Value::Indeterminate { .. } => Some(indeterminate),
    }
}

/// Evaluate a binary operation on two values.
fn eval_bin_op(op: BinOpType, lhs: Value, rhs: Value) -> Value {
    use BinOpType::*;
    if op.is_comparison() {
        return compare_values(op, &lhs, &rhs);
    }
    let size = std::cmp::max(lhs.bytesize(), rhs.bytesize());
    match (op, lhs, rhs) {
        (_, Value::Indeterminate { cause, .. }, _) | (_, _, Value::Indeterminate { cause, .. }) => {
            Value::Indeterminate { cause, size }
        }
        (_, Value::Scalar { interval: lhs, .. }, Value::Scalar { interval: rhs, .. }) => {
            let interval = match op {
                Add => lhs.add(&rhs),
                Sub => lhs.sub(&rhs),
                Mul => lhs.signed_mul(&rhs),
                Div => lhs.signed_div(&rhs),
                Rem => lhs.signed_rem(&rhs),
                Equal | NotEqual | Less | LessEqual | BoolAnd | BoolOr => return Value::Top(size),
            };
            Value::Scalar { interval, size }
        }
        (Add, Value::Pointer { target, offset }, Value::Scalar { interval, .. })
        | (Add, Value::Scalar { interval, .. }, Value::Pointer { target, offset }) => {
            Value::Pointer {
                target,
                offset: offset.add(&interval),
            }
        }
        (Sub, Value::Pointer { target, offset }, Value::Scalar { interval, .. }) => {
            Value::Pointer {
                target,
                offset: offset.sub(&interval),
            }
        }
        (
            Sub,
            Value::Pointer { target, offset },
            Value::Pointer {
                target: other_target,
                offset: other_offset,
            },
        ) if target == other_target => Value::Scalar {
            interval: offset.sub(&other_offset),
            size: POINTER_SIZE,
        },
        _ => Value::Top(size),
    }
}

/// Evaluate a comparison or boolean operation. The result is `0` or `1`.
fn compare_values(op: BinOpType, lhs: &Value, rhs: &Value) -> Value {
    let unknown = IntervalDomain::new(0, 1);
    let interval = match op {
        BinOpType::BoolAnd | BinOpType::BoolOr => {
            let as_bool = |value: &Value| match value.truth_value() {
                Some(truth) => IntervalDomain::from(truth as i64),
                None => unknown.clone(),
            };
            as_bool(lhs).compare(op, &as_bool(rhs))
        }
        _ => match (lhs, rhs) {
            _ if lhs.as_integer().is_some() && rhs.as_integer().is_some() => lhs
                .as_integer()
                .and_then(|lhs| rhs.as_integer().and_then(|rhs| lhs.compare(op, rhs))),
            (
                Value::Pointer {
                    target: lhs_target,
                    offset: lhs_offset,
                },
                Value::Pointer {
                    target: rhs_target,
                    offset: rhs_offset,
                },
            ) if lhs_target == rhs_target && lhs_target.certain_object().is_some() => {
                lhs_offset.compare(op, rhs_offset)
            }
            _ if addresses_differ(lhs, rhs) => match op {
                BinOpType::Equal => Some(IntervalDomain::from(0)),
                BinOpType::NotEqual => Some(IntervalDomain::from(1)),
                _ => None,
            },
            _ => None,
        },
    };
    Value::Scalar {
        interval: interval.unwrap_or(unknown),
        size: BOOL_SIZE,
    }
}

/// Returns true if the two values certainly hold different addresses,
/// i.e. one of them certainly points to an object that the other cannot point to.
fn addresses_differ(lhs: &Value, rhs: &Value) -> bool {
    let differs_from = |id: ObjectId, other: &Value| {
        other.is_null() || other.referenced_object().map_or(false, |other| other != id)
    };
    match (lhs.certain_object(), rhs.certain_object()) {
        (Some(id), _) => differs_from(id, rhs),
        (_, Some(id)) => differs_from(id, lhs),
        (None, None) => false,
    }
}

/// Evaluate a unary operation.
fn eval_un_op(op: UnOpType, arg: Value) -> Value {
    match (op, arg) {
        (UnOpType::Neg, Value::Scalar { interval, size }) => Value::Scalar {
            interval: interval.neg(),
            size,
        },
        (UnOpType::Neg, Value::Indeterminate { cause, size }) => {
            Value::Indeterminate { cause, size }
        }
        (UnOpType::Neg, other) => Value::Top(other.bytesize()),
        (UnOpType::BoolNegate, arg) => Value::Scalar {
            interval: match arg.truth_value() {
                Some(truth) => IntervalDomain::from(!truth as i64),
                None => IntervalDomain::new(0, 1),
            },
            size: BOOL_SIZE,
        },
    }
}
