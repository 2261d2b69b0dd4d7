use super::*;
use crate::intermediate_representation::BinOpType;

impl IntervalDomain {
    /// Return a new interval domain of 8-byte integers.
    pub fn mock(start: i64, end: i64) -> IntervalDomain {
        IntervalDomain::new(start, end)
    }

    /// Return a new interval domain with the given widening hints.
    pub fn mock_with_bounds(
        lower_bound: Option<i64>,
        start: i64,
        end: i64,
        upper_bound: Option<i64>,
    ) -> IntervalDomain {
        let mut domain = IntervalDomain::mock(start, end);
        domain.update_widening_lower_bound(&lower_bound);
        domain.update_widening_upper_bound(&upper_bound);
        domain
    }
}

#[test]
fn signed_merge() {
    let a = IntervalDomain::from(2);
    let b = IntervalDomain::from(4);
    let merged = a.signed_merge(&b);
    assert_eq!(*merged.interval(), Interval::new(2, 4, 2));
    let merged = merged.signed_merge(&IntervalDomain::from(8));
    assert_eq!(*merged.interval(), Interval::new(2, 8, 2));
    assert!(!merged.contains(5));
    assert!(merged.contains(6));
    let merged = merged.signed_merge(&IntervalDomain::from(5));
    assert_eq!(merged.interval().stride, 1);

    let a = IntervalDomain::mock_with_bounds(Some(-3), -1, 1, Some(5));
    let b = IntervalDomain::mock_with_bounds(None, 2, 3, Some(4));
    let merged = a.signed_merge(&b);
    assert_eq!(merged, IntervalDomain::mock_with_bounds(Some(-3), -1, 3, Some(4)));
}

#[test]
fn widening_uses_hints() {
    let old = IntervalDomain::mock_with_bounds(None, 0, 3, Some(11));
    let new = IntervalDomain::mock_with_bounds(None, 1, 4, Some(11));
    let widened = old.widen(&new);
    assert_eq!(*widened.interval(), Interval::new(0, 11, 1));
    // widening is stable once the bound is reached
    assert_eq!(widened.widen(&IntervalDomain::mock(1, 11)), widened);
}

#[test]
fn widening_without_hints_goes_to_infinity() {
    let old = IntervalDomain::mock(0, 3);
    let widened = old.widen(&IntervalDomain::mock(0, 4));
    assert_eq!(widened.start(), 0);
    assert_eq!(widened.end(), INFINITY);
    let widened = old.widen(&IntervalDomain::mock(-1, 3));
    assert_eq!(widened.start(), NEG_INFINITY);
    assert_eq!(widened.end(), 3);
    // nothing changes if the new value is already contained
    assert_eq!(old.widen(&IntervalDomain::mock(1, 2)), old);
}

#[test]
fn widening_keeps_the_residue_class() {
    let old = IntervalDomain::new_with_stride(2, 4, 2);
    let widened = old.widen(&IntervalDomain::from(6));
    assert_eq!(widened.start(), 2);
    assert_eq!(widened.end(), INFINITY);
    assert_eq!(widened.interval().stride, 2);
    assert!(widened.contains(1_000_000));
    assert!(!widened.contains(7));
}

#[test]
fn specialize_by_conditional() {
    let interval = IntervalDomain::mock(0, 20);
    let restricted = interval.clone().add_signed_less_equal_bound(10).unwrap();
    assert_eq!(restricted, IntervalDomain::mock(0, 10));
    let restricted = interval.clone().add_signed_greater_equal_bound(30);
    assert!(restricted.is_err());
    // bounds outside the interval become widening hints
    let hinted = IntervalDomain::mock(0, 3)
        .add_signed_less_equal_bound(10)
        .unwrap();
    assert_eq!(hinted, IntervalDomain::mock_with_bounds(None, 0, 3, Some(10)));
    let not_equal = IntervalDomain::mock(0, 5).add_not_equal_bound(0).unwrap();
    assert_eq!(*not_equal.interval(), Interval::new(1, 5, 1));
    assert!(IntervalDomain::from(3).add_not_equal_bound(3).is_err());
    // the stride is respected when restricting
    let strided = IntervalDomain::new_with_stride(0, INFINITY, 2)
        .add_signed_greater_equal_bound(1)
        .unwrap();
    assert_eq!(strided.start(), 2);
}

#[test]
fn intersect() {
    let a = IntervalDomain::new_with_stride(0, 20, 4);
    let b = IntervalDomain::mock(5, 30);
    let intersection = a.intersect(&b).unwrap();
    assert_eq!(*intersection.interval(), Interval::new(8, 20, 4));
    assert!(IntervalDomain::from(3)
        .intersect(&IntervalDomain::mock(4, 9))
        .is_err());
}

#[test]
fn add_shifts_widening_hints() {
    let counter = IntervalDomain::mock_with_bounds(None, 0, 3, Some(10));
    let incremented = counter.add(&IntervalDomain::from(1));
    assert_eq!(
        incremented,
        IntervalDomain::mock_with_bounds(None, 1, 4, Some(11))
    );
    let decremented = counter.sub(&IntervalDomain::from(1));
    assert_eq!(
        decremented,
        IntervalDomain::mock_with_bounds(None, -1, 2, Some(9))
    );
    let unbounded = IntervalDomain::at_least(0).add(&IntervalDomain::mock(-5, 5));
    assert_eq!(unbounded.start(), -5);
    assert_eq!(unbounded.end(), INFINITY);
}

#[test]
fn multiplication() {
    let index = IntervalDomain::mock(0, 10);
    let offset = index.signed_mul(&IntervalDomain::from(4));
    assert_eq!(*offset.interval(), Interval::new(0, 40, 4));
    let negative = index.signed_mul(&IntervalDomain::from(-2));
    assert_eq!(*negative.interval(), Interval::new(-20, 0, 2));
    let product = IntervalDomain::mock(-2, 3).signed_mul(&IntervalDomain::mock(4, 5));
    assert_eq!(*product.interval(), Interval::new(-10, 15, 1));
    let unbounded = IntervalDomain::at_least(1).signed_mul(&IntervalDomain::from(-1));
    assert_eq!(unbounded.start(), NEG_INFINITY);
    assert_eq!(unbounded.end(), -1);
}

#[test]
fn division_and_remainder() {
    let value = IntervalDomain::mock(-7, 9);
    assert_eq!(
        *value.signed_div(&IntervalDomain::from(2)).interval(),
        Interval::new(-3, 4, 1)
    );
    assert_eq!(
        *value.signed_rem(&IntervalDomain::from(4)).interval(),
        Interval::new(-3, 3, 1)
    );
    assert!(value.signed_div(&IntervalDomain::mock(0, 1)).is_top());
}

#[test]
fn comparisons() {
    let small = IntervalDomain::mock(0, 3);
    let large = IntervalDomain::mock(5, 9);
    assert_eq!(
        small.compare(BinOpType::Less, &large),
        Some(IntervalDomain::from(1))
    );
    assert_eq!(
        large.compare(BinOpType::LessEqual, &small),
        Some(IntervalDomain::from(0))
    );
    assert_eq!(
        small.compare(BinOpType::Equal, &IntervalDomain::from(2)),
        Some(IntervalDomain::mock(0, 1))
    );
    assert_eq!(
        small.compare(BinOpType::NotEqual, &large),
        Some(IntervalDomain::from(1))
    );
    assert_eq!(small.compare(BinOpType::Add, &large), None);
    assert_eq!(IntervalDomain::mock(1, 4).truth_value(), Some(true));
    assert_eq!(IntervalDomain::from(0).truth_value(), Some(false));
    assert_eq!(small.truth_value(), None);
}

#[test]
fn display() {
    assert_eq!(format!("{}", IntervalDomain::from(3)), "3");
    assert_eq!(format!("{}", IntervalDomain::at_least(0)), "[0, inf]");
    assert_eq!(
        format!("{}", IntervalDomain::new_with_stride(0, 8, 4)),
        "[0, 8]/4"
    );
}
