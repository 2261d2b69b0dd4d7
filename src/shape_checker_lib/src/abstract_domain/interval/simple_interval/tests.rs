use super::*;

#[test]
fn construction() {
    assert_eq!(
        Interval::new(2, 9, 3),
        Interval {
            start: 2,
            end: 8,
            stride: 3
        }
    );
    assert_eq!(Interval::new(5, 5, 3).stride, 0);
    assert_eq!(Interval::new(1, 10, 0), Interval::from_value(1));
    assert!(Interval::new_top().is_top());
    assert!(!Interval::new(0, INFINITY, 1).is_bounded());
    assert_eq!(Interval::from(7).try_to_value(), Some(7));
    assert_eq!(Interval::new(0, 1, 1).try_to_value(), None);
}

#[test]
fn contains_respects_stride() {
    let interval = Interval::new(2, 8, 3);
    assert!(interval.contains(5));
    assert!(!interval.contains(6));
    assert!(!interval.contains(11));

    let unbounded_below = Interval {
        start: NEG_INFINITY,
        end: 7,
        stride: 2,
    };
    assert!(unbounded_below.contains(3));
    assert!(unbounded_below.contains(-101));
    assert!(!unbounded_below.contains(4));
}

#[test]
fn rounding_to_stride() {
    let interval = Interval::new(2, 8, 3);
    assert_eq!(interval.round_up_to_stride_of(3), Some(5));
    assert_eq!(interval.round_down_to_stride_of(7), Some(5));
    assert_eq!(interval.round_up_to_stride_of(INFINITY), Some(INFINITY));
    assert_eq!(Interval::from(4).round_up_to_stride_of(5), None);
    assert_eq!(Interval::from(4).round_down_to_stride_of(5), Some(4));
}

#[test]
fn signed_merge() {
    let merged = Interval::new(0, 4, 2).signed_merge(&Interval::from(8));
    assert_eq!(merged, Interval::new(0, 8, 2));
    let merged = merged.signed_merge(&Interval::from(3));
    assert_eq!(merged, Interval::new(0, 8, 1));
    let merged = Interval::new(0, INFINITY, 2).signed_merge(&Interval::from(-4));
    assert_eq!(merged.start, -4);
    assert_eq!(merged.end, INFINITY);
    assert_eq!(merged.stride, 2);
}

#[test]
fn signed_intersect() {
    assert_eq!(
        Interval::new(0, 20, 4)
            .signed_intersect(&Interval::new(3, 30, 1))
            .unwrap(),
        Interval::new(4, 20, 4)
    );
    assert!(Interval::new(0, 8, 4)
        .signed_intersect(&Interval::from(5))
        .is_err());
    assert_eq!(
        Interval::new(0, 8, 4)
            .signed_intersect(&Interval::from(4))
            .unwrap(),
        Interval::from(4)
    );
    assert!(Interval::new(0, 4, 1)
        .signed_intersect(&Interval::new(5, 8, 1))
        .is_err());
}

#[test]
fn add_and_sub() {
    assert_eq!(
        Interval::new(0, 8, 4).add(&Interval::new(1, 3, 2)),
        Interval::new(1, 11, 2)
    );
    assert!(Interval::new_top().add(&Interval::from(1)).is_top());
    assert_eq!(
        Interval::new(10, 20, 5).sub(&Interval::from(5)),
        Interval::new(5, 15, 5)
    );
    let unbounded = Interval::new(0, INFINITY, 1).sub(&Interval::from(1));
    assert_eq!(unbounded.start, -1);
    assert_eq!(unbounded.end, INFINITY);
}

#[test]
fn multiplication() {
    assert_eq!(Interval::new(1, 3, 1).scale(-4), Interval::new(-12, -4, 4));
    assert_eq!(Interval::new(1, 3, 1).scale(0), Interval::from(0));
    let scaled = Interval::new(0, INFINITY, 1).scale(2);
    assert_eq!((scaled.start, scaled.end, scaled.stride), (0, INFINITY, 2));
    assert_eq!(
        Interval::new(-2, 3, 1).signed_mul(&Interval::new(4, 5, 1)),
        Interval::new(-10, 15, 1)
    );
    assert!(Interval::new(0, INFINITY, 1)
        .signed_mul(&Interval::new(1, 2, 1))
        .is_top());
}

#[test]
fn division_and_remainder() {
    assert_eq!(
        Interval::new(7, 20, 1).signed_div(&Interval::from(4)),
        Interval::new(1, 5, 1)
    );
    assert_eq!(
        Interval::new(7, 20, 1).signed_div(&Interval::from(-2)),
        Interval::new(-10, -3, 1)
    );
    assert!(Interval::new(7, 20, 1)
        .signed_div(&Interval::from(0))
        .is_top());

    assert_eq!(
        Interval::new(0, 3, 1).signed_rem(&Interval::from(8)),
        Interval::new(0, 3, 1)
    );
    assert_eq!(
        Interval::new(0, 20, 1).signed_rem(&Interval::from(8)),
        Interval::new(0, 7, 1)
    );
    assert_eq!(
        Interval::new(-5, 5, 1).signed_rem(&Interval::from(4)),
        Interval::new(-3, 3, 1)
    );
}
