use std::fmt::Display;

use crate::prelude::*;

use super::{AbstractDomain, SpecializeByConditional};

mod simple_interval;
pub use simple_interval::*;

mod bin_ops;

/// An abstract domain representing values in an interval range with strides and widening hints.
///
/// The interval bounds are signed 64-bit integers,
/// where `i64::MIN` and `i64::MAX` represent negative and positive infinity.
/// The interval has a stride,
/// i.e. all values represented by the interval are contained in the same residue class modulo the stride
/// as the interval bounds.
///
/// The domain also contains widening hints to faciliate fast and exact widening for simple loop counter variables.
/// Widening hints are collected from comparisons in branch conditions.
/// See the [`IntervalDomain::widen`] method for details on the widening strategy.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct IntervalDomain {
    /// The underlying interval.
    interval: Interval,
    /// An upper bound for widening operations.
    widening_upper_bound: Option<i64>,
    /// A lower bound for widening operations.
    widening_lower_bound: Option<i64>,
}

impl From<Interval> for IntervalDomain {
    /// Generate an interval domain without widening hints.
    fn from(interval: Interval) -> IntervalDomain {
        IntervalDomain {
            interval,
            widening_lower_bound: None,
            widening_upper_bound: None,
        }
    }
}

impl From<i64> for IntervalDomain {
    /// Generate an interval domain containing exactly one value.
    fn from(value: i64) -> IntervalDomain {
        Interval::from_value(value).into()
    }
}

impl IntervalDomain {
    /// Create a new interval domain with the given bounds.
    ///
    /// Both `start` and `end` are inclusive, i.e. contained in the interval.
    /// The widening hints are set to `None` and the stride is set to 1 if `start != end`.
    pub fn new(start: i64, end: i64) -> Self {
        Interval::new(start, end, 1).into()
    }

    /// Create a new interval domain with the given bounds and stride.
    pub fn new_with_stride(start: i64, end: i64, stride: u64) -> Self {
        Interval::new(start, end, stride).into()
    }

    /// Create a new interval domain representing all integers.
    pub fn new_top() -> Self {
        Interval::new_top().into()
    }

    /// Create the interval `[start, +infinity]`.
    pub fn at_least(start: i64) -> Self {
        IntervalDomain::new(start, INFINITY)
    }

    /// Get the underlying interval.
    pub fn interval(&self) -> &Interval {
        &self.interval
    }

    /// The lower bound of the interval. `i64::MIN` stands for negative infinity.
    pub fn start(&self) -> i64 {
        self.interval.start
    }

    /// The upper bound of the interval. `i64::MAX` stands for positive infinity.
    pub fn end(&self) -> i64 {
        self.interval.end
    }

    /// Returns `true` if the value is contained in the interval.
    pub fn contains(&self, value: i64) -> bool {
        self.interval.contains(value)
    }

    /// Returns true if the two intervals represent the same value sets.
    /// This function ignores differences in the widening hints of the two intervals.
    pub fn equal_as_value_sets(&self, other: &IntervalDomain) -> bool {
        self.interval == other.interval
    }

    /// Returns `true` if every value of `other` is also contained in `self`.
    pub fn contains_interval(&self, other: &IntervalDomain) -> bool {
        self.interval.signed_merge(&other.interval) == self.interval
    }

    /// If `bound` is more exact/restrictive than the current lower bound of `self`,
    /// set the lower bound to `bound`.
    /// Otherwise keep the old lower bound.
    pub fn update_widening_lower_bound(&mut self, bound: &Option<i64>) {
        if let Some(bound_value) = bound {
            let bound_value = match self.interval.round_up_to_stride_of(*bound_value) {
                Some(bound) => bound,
                None => return,
            };
            if bound_value < self.interval.start {
                match self.widening_lower_bound {
                    Some(previous_bound) if bound_value <= previous_bound => (),
                    _ => self.widening_lower_bound = Some(bound_value),
                }
            }
        }
    }

    /// If `bound` is more exact/restrictive than the current upper bound of `self`,
    /// set the upper bound to `bound`.
    /// Otherwise keep the old upper bound.
    pub fn update_widening_upper_bound(&mut self, bound: &Option<i64>) {
        if let Some(bound_value) = bound {
            let bound_value = match self.interval.round_down_to_stride_of(*bound_value) {
                Some(bound) => bound,
                None => return,
            };
            if bound_value > self.interval.end {
                match self.widening_upper_bound {
                    Some(previous_bound) if bound_value >= previous_bound => (),
                    _ => self.widening_upper_bound = Some(bound_value),
                }
            }
        }
    }

    /// Merge as signed intervals without performing widenings.
    pub fn signed_merge(&self, other: &IntervalDomain) -> IntervalDomain {
        let mut merged_domain: IntervalDomain = self.interval.signed_merge(&other.interval).into();
        merged_domain.update_widening_lower_bound(&self.widening_lower_bound);
        merged_domain.update_widening_lower_bound(&other.widening_lower_bound);
        merged_domain.update_widening_upper_bound(&self.widening_upper_bound);
        merged_domain.update_widening_upper_bound(&other.widening_upper_bound);
        merged_domain
    }

    /// Merge `self` (the older value) with `newer` and widen the result.
    ///
    /// ## Widening Strategy
    ///
    /// If the merged interval equals `self` as value sets, no widening is performed.
    /// Otherwise each bound that changed compared to `self` is widened:
    /// If a widening hint exists for the direction of the bound, the bound is widened up to the hint.
    /// Else the bound is widened to infinity.
    /// Bounds that did not change are kept.
    /// The residue class of `self` is preserved.
    pub fn widen(&self, newer: &IntervalDomain) -> IntervalDomain {
        let mut merged_domain = self.signed_merge(newer);
        if merged_domain.equal_as_value_sets(self) || merged_domain.is_top() {
            return merged_domain;
        }
        if merged_domain.interval.start < self.interval.start {
            let bound = merged_domain
                .widening_lower_bound
                .take()
                .and_then(|bound| merged_domain.interval.round_up_to_stride_of(bound));
            merged_domain.interval.start = bound.unwrap_or(NEG_INFINITY);
        }
        if merged_domain.interval.end > self.interval.end {
            let bound = merged_domain
                .widening_upper_bound
                .take()
                .and_then(|bound| merged_domain.interval.round_down_to_stride_of(bound));
            merged_domain.interval.end = bound.unwrap_or(INFINITY);
        }
        merged_domain.interval.adjust_end_to_value_in_stride();
        merged_domain
    }

    /// If the interval contains exactly one value, return it.
    pub fn try_to_value(&self) -> Option<i64> {
        self.interval.try_to_value()
    }

    /// Returns `true` if both bounds of the interval are finite.
    pub fn is_bounded(&self) -> bool {
        self.interval.is_bounded()
    }

    /// Shift the widening hints by `offset`. Hints that would overflow are removed.
    fn shift_widening_hints(&mut self, offset: i64) {
        self.widening_lower_bound = self
            .widening_lower_bound
            .and_then(|bound| bound.checked_add(offset));
        self.widening_upper_bound = self
            .widening_upper_bound
            .and_then(|bound| bound.checked_add(offset));
    }
}

impl SpecializeByConditional for IntervalDomain {
    fn add_signed_less_equal_bound(mut self, bound: i64) -> Result<Self, Error> {
        let bound = match self.interval.round_down_to_stride_of(bound) {
            Some(bound) => bound,
            None => return Err(anyhow!("Empty interval")),
        };
        if let Some(old_upper_bound) = self.widening_upper_bound {
            if old_upper_bound <= bound {
                return Ok(self);
            } else if self.interval.end < bound {
                self.widening_upper_bound = Some(bound);
                return Ok(self);
            } else {
                self.widening_upper_bound = None;
            }
        } else if self.interval.end < bound {
            self.widening_upper_bound = Some(bound);
            return Ok(self);
        }
        // we already know that the bound is less equal to `self.interval.end`
        if self.interval.start <= bound {
            self.interval.end = bound;
            self.interval.adjust_end_to_value_in_stride();
            Ok(self)
        } else {
            Err(anyhow!("Empty interval"))
        }
    }

    fn add_signed_greater_equal_bound(mut self, bound: i64) -> Result<Self, Error> {
        let bound = match self.interval.round_up_to_stride_of(bound) {
            Some(bound) => bound,
            None => return Err(anyhow!("Empty interval")),
        };
        if let Some(old_lower_bound) = self.widening_lower_bound {
            if old_lower_bound >= bound {
                return Ok(self);
            } else if self.interval.start > bound {
                self.widening_lower_bound = Some(bound);
                return Ok(self);
            } else {
                self.widening_lower_bound = None;
            }
        } else if self.interval.start > bound {
            self.widening_lower_bound = Some(bound);
            return Ok(self);
        }
        // we already know that the bound is greater equal to `self.interval.start`
        if self.interval.end >= bound {
            self.interval.start = bound;
            if self.interval.start == self.interval.end {
                self.interval.stride = 0;
            }
            Ok(self)
        } else {
            Err(anyhow!("Empty interval"))
        }
    }

    fn add_not_equal_bound(self, bound: i64) -> Result<Self, Error> {
        if self.interval.start == bound && self.interval.end == bound {
            return Err(anyhow!("Empty interval"));
        }
        if !self.interval.contains(bound) {
            Ok(self)
        } else if self.interval.start == bound {
            self.add_signed_greater_equal_bound(bound + 1)
        } else if self.interval.end == bound {
            self.add_signed_less_equal_bound(bound - 1)
        } else {
            Ok(self)
        }
    }

    /// Compute the intersection of two intervals.
    /// Return an error if the intersection is empty.
    fn intersect(self, other: &Self) -> Result<Self, Error> {
        let mut intersected_domain: IntervalDomain =
            self.interval.signed_intersect(&other.interval)?.into();
        intersected_domain.update_widening_lower_bound(&self.widening_lower_bound);
        intersected_domain.update_widening_lower_bound(&other.widening_lower_bound);
        intersected_domain.update_widening_upper_bound(&self.widening_upper_bound);
        intersected_domain.update_widening_upper_bound(&other.widening_upper_bound);
        Ok(intersected_domain)
    }

    fn without_widening_hints(mut self) -> Self {
        self.widening_lower_bound = None;
        self.widening_upper_bound = None;
        self
    }
}

impl AbstractDomain for IntervalDomain {
    /// Merge two interval domains without widening.
    /// Widening has to be requested explicitly through [`IntervalDomain::widen`].
    fn merge(&self, other: &IntervalDomain) -> IntervalDomain {
        self.signed_merge(other)
    }

    /// Return `true` if the interval spans all possible values.
    fn is_top(&self) -> bool {
        self.interval.is_top()
    }
}

impl Display for IntervalDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(value) = self.try_to_value() {
            return write!(f, "{}", value);
        }
        let start = match self.interval.start {
            NEG_INFINITY => "-inf".to_string(),
            start => start.to_string(),
        };
        let end = match self.interval.end {
            INFINITY => "inf".to_string(),
            end => end.to_string(),
        };
        if self.interval.stride > 1 {
            write!(f, "[{}, {}]/{}", start, end, self.interval.stride)
        } else {
            write!(f, "[{}, {}]", start, end)
        }
    }
}

#[cfg(test)]
mod tests;
