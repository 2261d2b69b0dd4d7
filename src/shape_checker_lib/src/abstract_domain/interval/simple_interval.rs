use crate::prelude::*;
use gcd::Gcd;

/// The value used as the start of intervals that are unbounded below.
pub const NEG_INFINITY: i64 = i64::MIN;
/// The value used as the end of intervals that are unbounded above.
pub const INFINITY: i64 = i64::MAX;

/// A strided interval of signed integers.
///
/// The values represented by the interval are `start, start + stride, start + 2*stride, ... , end`.
/// The bounds `i64::MIN` and `i64::MAX` are interpreted as negative and positive infinity.
/// For intervals unbounded below the residue class is determined by the (finite) end value.
///
/// The following invariants have to hold for a correct interval instance:
/// - `start <= end`
/// - `(end - start) % stride == 0` if both bounds are finite
/// - if `start == end`, then the stride is always set to zero.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Interval {
    /// The start of the interval. The bound is included in the represented interval.
    pub start: i64,
    /// The end of the interval. The bound is included in the represented interval.
    pub end: i64,
    /// The stride.
    pub stride: u64,
}

impl Interval {
    /// Construct a new interval.
    ///
    /// Both `start` and `end` of the interval are inclusive,
    /// i.e. contained in the represented interval.
    ///
    /// The function automatically rounds down `end` (if necessary)
    /// so that it is contained in the same residue class as the start value modulo the stride.
    /// If the stride is 0 then `end` will be set to `start`.
    pub fn new(start: i64, end: i64, stride: u64) -> Interval {
        debug_assert!(start <= end);
        let mut interval = Interval { start, end, stride };
        interval.adjust_end_to_value_in_stride();
        interval
    }

    /// Construct a new unconstrained interval.
    pub fn new_top() -> Interval {
        Interval {
            start: NEG_INFINITY,
            end: INFINITY,
            stride: 1,
        }
    }

    /// Construct an interval containing exactly one value.
    pub fn from_value(value: i64) -> Interval {
        Interval {
            start: value,
            end: value,
            stride: 0,
        }
    }

    /// Returns true if all integers are contained in the interval.
    pub fn is_top(&self) -> bool {
        self.start == NEG_INFINITY && self.end == INFINITY && self.stride <= 1
    }

    /// Returns `true` if both bounds are finite.
    pub fn is_bounded(&self) -> bool {
        self.start != NEG_INFINITY && self.end != INFINITY
    }

    /// If the interval contains exactly one value, return it.
    pub fn try_to_value(&self) -> Option<i64> {
        if self.start == self.end && self.is_bounded() {
            Some(self.start)
        } else {
            None
        }
    }

    /// A finite value of the interval that determines its residue class modulo the stride.
    fn anchor(&self) -> Option<i64> {
        if self.start != NEG_INFINITY {
            Some(self.start)
        } else if self.end != INFINITY {
            Some(self.end)
        } else {
            None
        }
    }

    /// Restore the invariants after the bounds or the stride were changed.
    fn normalize(mut self) -> Interval {
        if self.start == self.end {
            self.stride = 0;
        } else if self.stride == 0 || self.anchor().is_none() {
            self.stride = 1;
        }
        self
    }

    /// Returns `true` if the value is contained in the interval.
    pub fn contains(&self, value: i64) -> bool {
        if value < self.start || value > self.end {
            return false;
        }
        if self.stride <= 1 {
            return self.stride == 1 || value == self.start;
        }
        match self.anchor() {
            Some(anchor) => (value as i128 - anchor as i128).rem_euclid(self.stride as i128) == 0,
            None => true,
        }
    }

    /// Return the smallest value greater or equal to `value`
    /// that lies in the same residue class as the values of the interval.
    /// Returns `None` if no such value is representable.
    pub fn round_up_to_stride_of(&self, value: i64) -> Option<i64> {
        if value == NEG_INFINITY || value == INFINITY {
            return Some(value);
        }
        match (self.stride, self.anchor()) {
            (0, _) => (value <= self.start).then_some(self.start),
            (1, _) | (_, None) => Some(value),
            (stride, Some(anchor)) => {
                let diff = (anchor as i128 - value as i128).rem_euclid(stride as i128);
                i64::try_from(value as i128 + diff).ok()
            }
        }
    }

    /// Return the largest value less or equal to `value`
    /// that lies in the same residue class as the values of the interval.
    /// Returns `None` if no such value is representable.
    pub fn round_down_to_stride_of(&self, value: i64) -> Option<i64> {
        if value == NEG_INFINITY || value == INFINITY {
            return Some(value);
        }
        match (self.stride, self.anchor()) {
            (0, _) => (value >= self.start).then_some(self.start),
            (1, _) | (_, None) => Some(value),
            (stride, Some(anchor)) => {
                let diff = (value as i128 - anchor as i128).rem_euclid(stride as i128);
                i64::try_from(value as i128 - diff).ok()
            }
        }
    }

    /// Round down `self.end` to the nearest value such that `self.end - self.start` is again divisible by the stride.
    /// If afterwards `self.start == self.end` holds then set the stride to 0.
    pub fn adjust_end_to_value_in_stride(&mut self) {
        if self.stride == 0 {
            self.end = self.start;
            return;
        }
        if self.stride > 1 && self.start != NEG_INFINITY && self.end != INFINITY {
            let diff = (self.end as i128 - self.start as i128) % self.stride as i128;
            self.end -= diff as i64;
        }
        *self = self.normalize();
    }

    /// Merge two intervals interpreting both as intervals of signed integers.
    ///
    /// The stride of the result is the greatest common divisor of both strides
    /// and the distance between the residue classes of the two intervals.
    pub fn signed_merge(&self, other: &Interval) -> Interval {
        let start = std::cmp::min(self.start, other.start);
        let end = std::cmp::max(self.end, other.end);
        let stride = match (self.anchor(), other.anchor()) {
            (Some(anchor), Some(other_anchor)) => {
                let diff = (anchor as i128 - other_anchor as i128).unsigned_abs();
                match u64::try_from(diff) {
                    Ok(diff) => self.stride.gcd(other.stride).gcd(diff),
                    Err(_) => 1,
                }
            }
            _ => 1,
        };
        Interval { start, end, stride }.normalize()
    }

    /// Compute the intersection of two intervals as intervals of signed integers.
    /// Return an error if the intersection is empty.
    ///
    /// If the residue classes of both intervals are not compatible,
    /// the residue class of `self` is used for the result.
    pub fn signed_intersect(&self, other: &Interval) -> Result<Interval, Error> {
        let start = std::cmp::max(self.start, other.start);
        let end = std::cmp::min(self.end, other.end);
        if start > end {
            return Err(anyhow!("Empty interval"));
        }
        if self.stride == 0 {
            return if other.contains(self.start) {
                Ok(*self)
            } else {
                Err(anyhow!("Empty interval"))
            };
        }
        if other.stride == 0 {
            return if self.contains(other.start) {
                Ok(*other)
            } else {
                Err(anyhow!("Empty interval"))
            };
        }
        let class = if self.stride == 1 || self.anchor().is_none() {
            other
        } else {
            self
        };
        let start = class
            .round_up_to_stride_of(start)
            .ok_or_else(|| anyhow!("Empty interval"))?;
        let end = class
            .round_down_to_stride_of(end)
            .ok_or_else(|| anyhow!("Empty interval"))?;
        if start > end {
            return Err(anyhow!("Empty interval"));
        }
        Ok(Interval {
            start,
            end,
            stride: class.stride,
        }
        .normalize())
    }

    /// Compute the interval of possible results
    /// if one adds a value from `self` to a value from `rhs`.
    pub fn add(&self, rhs: &Interval) -> Interval {
        let start = if self.start == NEG_INFINITY || rhs.start == NEG_INFINITY {
            NEG_INFINITY
        } else {
            self.start.saturating_add(rhs.start)
        };
        let end = if self.end == INFINITY || rhs.end == INFINITY {
            INFINITY
        } else {
            self.end.saturating_add(rhs.end)
        };
        Interval {
            start,
            end,
            stride: self.stride.gcd(rhs.stride),
        }
        .normalize()
    }

    /// Compute the negation of all values in the interval.
    pub fn neg(&self) -> Interval {
        let start = if self.end == INFINITY {
            NEG_INFINITY
        } else {
            -self.end
        };
        let end = if self.start == NEG_INFINITY {
            INFINITY
        } else {
            -self.start
        };
        Interval {
            start,
            end,
            stride: self.stride,
        }
    }

    /// Compute the interval of possible results
    /// if one subtracts a value in `rhs` from a value in `self`.
    pub fn sub(&self, rhs: &Interval) -> Interval {
        self.add(&rhs.neg())
    }

    /// Multiply all values in the interval with a constant.
    pub fn scale(&self, factor: i64) -> Interval {
        if factor == 0 {
            return Interval::from_value(0);
        }
        let mul_bound = |bound: i64| -> i64 {
            if bound == NEG_INFINITY || bound == INFINITY {
                if (bound > 0) == (factor > 0) {
                    INFINITY
                } else {
                    NEG_INFINITY
                }
            } else {
                clamp_to_i64(bound as i128 * factor as i128)
            }
        };
        let (start, end) = if factor > 0 {
            (mul_bound(self.start), mul_bound(self.end))
        } else {
            (mul_bound(self.end), mul_bound(self.start))
        };
        let stride = self.stride.checked_mul(factor.unsigned_abs()).unwrap_or(1);
        Interval { start, end, stride }.normalize()
    }

    /// Compute the interval of possible results
    /// if one multiplies a value in `self` with a value in `rhs`.
    pub fn signed_mul(&self, rhs: &Interval) -> Interval {
        if let Some(factor) = rhs.try_to_value() {
            return self.scale(factor);
        }
        if let Some(factor) = self.try_to_value() {
            return rhs.scale(factor);
        }
        if !self.is_bounded() || !rhs.is_bounded() {
            return Interval::new_top();
        }
        let products = [
            self.start as i128 * rhs.start as i128,
            self.start as i128 * rhs.end as i128,
            self.end as i128 * rhs.start as i128,
            self.end as i128 * rhs.end as i128,
        ];
        let min = products.iter().copied().min().unwrap_or(0);
        let max = products.iter().copied().max().unwrap_or(0);
        Interval {
            start: clamp_to_i64(min),
            end: clamp_to_i64(max),
            stride: 1,
        }
        .normalize()
    }

    /// Compute the interval of possible results of a (truncating) signed division.
    /// Only divisions by a non-zero constant are computed exactly.
    pub fn signed_div(&self, rhs: &Interval) -> Interval {
        match rhs.try_to_value() {
            Some(divisor) if divisor > 0 => {
                let div_bound = |bound: i64| {
                    if bound == NEG_INFINITY || bound == INFINITY {
                        bound
                    } else {
                        bound / divisor
                    }
                };
                Interval {
                    start: div_bound(self.start),
                    end: div_bound(self.end),
                    stride: 1,
                }
                .normalize()
            }
            Some(divisor) if divisor < 0 && divisor != i64::MIN => self
                .neg()
                .signed_div(&Interval::from_value(-divisor)),
            _ => Interval::new_top(),
        }
    }

    /// Compute the interval of possible results of the signed remainder operation.
    pub fn signed_rem(&self, rhs: &Interval) -> Interval {
        match rhs.try_to_value() {
            Some(divisor) if divisor != 0 && divisor != i64::MIN => {
                let max = divisor.abs() - 1;
                if self.start >= 0 && self.end <= max {
                    *self
                } else if self.start >= 0 {
                    Interval::new(0, max, 1)
                } else if self.end <= 0 {
                    Interval::new(-max, 0, 1)
                } else {
                    Interval::new(-max, max, 1)
                }
            }
            _ => Interval::new_top(),
        }
    }
}

impl From<i64> for Interval {
    /// Create an interval containing only `value`.
    fn from(value: i64) -> Self {
        Interval::from_value(value)
    }
}

/// Clamp a value to the range of `i64`.
/// Values outside of the range become the infinity bounds.
fn clamp_to_i64(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests;
