use super::*;
use crate::intermediate_representation::BinOpType;

impl IntervalDomain {
    /// Compute the interval of possible results
    /// if one adds a value from `self` to a value from `rhs`.
    ///
    /// Adding a constant shifts the widening hints of the other operand,
    /// so that hints on loop counters survive the increment.
    pub fn add(&self, rhs: &Self) -> Self {
        let interval = self.interval.add(&rhs.interval);
        if interval.is_top() {
            return interval.into();
        }
        if let Some(constant) = rhs.try_to_value() {
            let mut result = self.clone();
            result.interval = interval;
            result.shift_widening_hints(constant);
            return result;
        }
        if let Some(constant) = self.try_to_value() {
            let mut result = rhs.clone();
            result.interval = interval;
            result.shift_widening_hints(constant);
            return result;
        }
        let new_lower_bound = match (self.widening_lower_bound, rhs.widening_lower_bound) {
            (Some(self_bound), Some(rhs_bound)) => self_bound.checked_add(rhs_bound),
            _ => None,
        };
        let new_upper_bound = match (self.widening_upper_bound, rhs.widening_upper_bound) {
            (Some(self_bound), Some(rhs_bound)) => self_bound.checked_add(rhs_bound),
            _ => None,
        };
        IntervalDomain {
            interval,
            widening_upper_bound: new_upper_bound,
            widening_lower_bound: new_lower_bound,
        }
    }

    /// Compute the interval of possible results
    /// if one subtracts a value in `rhs` from a value in `self`.
    pub fn sub(&self, rhs: &Self) -> Self {
        self.add(&rhs.neg())
    }

    /// Negate all values in the interval.
    pub fn neg(&self) -> Self {
        IntervalDomain {
            interval: self.interval.neg(),
            widening_lower_bound: self.widening_upper_bound.and_then(|bound| bound.checked_neg()),
            widening_upper_bound: self.widening_lower_bound.and_then(|bound| bound.checked_neg()),
        }
    }

    /// Compute the interval of possible results
    /// if one multiplies a value in `self` with a value in `rhs`.
    pub fn signed_mul(&self, rhs: &Self) -> Self {
        self.interval.signed_mul(&rhs.interval).into()
    }

    /// Compute the interval of possible results of a signed division.
    pub fn signed_div(&self, rhs: &Self) -> Self {
        self.interval.signed_div(&rhs.interval).into()
    }

    /// Compute the interval of possible results of the signed remainder operation.
    pub fn signed_rem(&self, rhs: &Self) -> Self {
        self.interval.signed_rem(&rhs.interval).into()
    }

    /// Evaluate a comparison or boolean operation.
    /// The result is `[1, 1]` if the comparison holds for all values,
    /// `[0, 0]` if it holds for no values and `[0, 1]` otherwise.
    ///
    /// Operands of boolean operations are interpreted as `true` if they are not zero.
    /// Returns `None` for non-boolean operations.
    pub fn compare(&self, op: BinOpType, rhs: &Self) -> Option<Self> {
        use BinOpType::*;
        let (lhs, rhs) = (&self.interval, &rhs.interval);
        let result = match op {
            Equal => match (lhs.try_to_value(), rhs.try_to_value()) {
                (Some(left), Some(right)) => Some(left == right),
                _ if lhs.signed_intersect(rhs).is_err() => Some(false),
                _ => None,
            },
            NotEqual => match (lhs.try_to_value(), rhs.try_to_value()) {
                (Some(left), Some(right)) => Some(left != right),
                _ if lhs.signed_intersect(rhs).is_err() => Some(true),
                _ => None,
            },
            Less if lhs.end < rhs.start => Some(true),
            Less if lhs.start >= rhs.end => Some(false),
            LessEqual if lhs.end <= rhs.start => Some(true),
            LessEqual if lhs.start > rhs.end => Some(false),
            Less | LessEqual => None,
            BoolAnd => match (truth_value(lhs), truth_value(rhs)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            BoolOr => match (truth_value(lhs), truth_value(rhs)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            Add | Sub | Mul | Div | Rem => return None,
        };
        Some(match result {
            Some(true) => IntervalDomain::from(1),
            Some(false) => IntervalDomain::from(0),
            None => IntervalDomain::new(0, 1),
        })
    }

    /// Return `Some(true)` if no value in the interval is zero,
    /// `Some(false)` if the interval only contains zero
    /// and `None` otherwise.
    pub fn truth_value(&self) -> Option<bool> {
        truth_value(&self.interval)
    }
}

fn truth_value(interval: &Interval) -> Option<bool> {
    if interval.try_to_value() == Some(0) {
        Some(false)
    } else if !interval.contains(0) {
        Some(true)
    } else {
        None
    }
}
