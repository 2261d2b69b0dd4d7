//! Materialization of the first or last member of a list segment.

use super::*;
use crate::abstract_domain::SpecializeByConditional;

/// Materialize the member of a segment that a pointer with the given target points to.
///
/// Pointers to the last member of a segment materialize its last member,
/// all other pointers its first member.
pub fn materialize_target(disjunct: Disjunct, target: PointerTarget) -> Vec<Disjunct> {
    match target {
        PointerTarget::Last(id) => materialize_last(disjunct, id),
        PointerTarget::Object(id) | PointerTarget::MaybeNull(id) => materialize(disjunct, id),
        PointerTarget::Null => vec![disjunct],
    }
}

/// Split a list segment into the cases "empty" and "concrete first member followed by the rest".
///
/// In the empty case all pointers to the segment are redirected to its successor
/// (pointers to its last member to its predecessor) and the segment is removed.
/// In the non-empty case the segment object becomes a concrete region
/// whose link field points to a new segment with the remaining members.
/// If the rest is certainly empty, the link field points directly to the successor.
///
/// Pointers into the segment keep pointing to the (now concrete) first member.
/// If `segment` is not a segment, the disjunct is returned unchanged.
pub fn materialize(disjunct: Disjunct, segment: ObjectId) -> Vec<Disjunct> {
    let Some(links) = Links::of(&disjunct, segment) else {
        return vec![disjunct];
    };
    let mut results: Vec<Disjunct> = remove_empty(&disjunct, segment, &links).into_iter().collect();
    if let Ok(length) = links.length.clone().intersect(&IntervalDomain::at_least(1)) {
        results.push(split_first_member(disjunct, segment, &links, length));
    }
    results
}

/// Split a doubly linked segment into the cases "empty"
/// and "the other members followed by a concrete last member".
///
/// The segment object becomes the concrete last member,
/// so pointers to the last member now point to a region.
/// Pointers to the first member are redirected to the new segment of the other members.
pub fn materialize_last(disjunct: Disjunct, segment: ObjectId) -> Vec<Disjunct> {
    let Some(links) = Links::of(&disjunct, segment) else {
        return vec![disjunct];
    };
    let mut results: Vec<Disjunct> = remove_empty(&disjunct, segment, &links).into_iter().collect();
    if let Ok(length) = links.length.clone().intersect(&IntervalDomain::at_least(1)) {
        results.push(split_last_member(disjunct, segment, &links, length));
    }
    results
}

/// The link fields and the length of a segment.
struct Links {
    next_offset: i64,
    prev_offset: Option<i64>,
    length: IntervalDomain,
}

impl Links {
    fn of(disjunct: &Disjunct, segment: ObjectId) -> Option<Links> {
        match &disjunct.object(segment)?.kind {
            ObjectKind::Segment {
                next_offset,
                prev_offset,
                length,
            } => Some(Links {
                next_offset: *next_offset,
                prev_offset: *prev_offset,
                length: length.clone(),
            }),
            ObjectKind::Region => None,
        }
    }
}

/// The disjunct in which the segment is empty, if the segment may be empty.
fn remove_empty(disjunct: &Disjunct, segment: ObjectId, links: &Links) -> Option<Disjunct> {
    let object = disjunct.object(segment)?;
    let successor = object.read_at(links.next_offset, POINTER_SIZE);
    let predecessor = links
        .prev_offset
        .map(|offset| object.read_at(offset, POINTER_SIZE));
    if !links.length.contains(0)
        || successor.referenced_object() == Some(segment)
        || predecessor.as_ref().and_then(Value::referenced_object) == Some(segment)
    {
        return None;
    }
    let mut empty = disjunct.clone();
    empty.objects.remove(&segment);
    empty.rewrite_values(|value| {
        let Value::Pointer { target, offset } = value else {
            return;
        };
        let replacement = match *target {
            PointerTarget::Object(id) | PointerTarget::MaybeNull(id) if id == segment => &successor,
            PointerTarget::Last(id) if id == segment => predecessor.as_ref().unwrap_or(&successor),
            _ => return,
        };
        let redirected = redirect(*target, offset, replacement);
        *value = redirected;
    });
    Some(empty)
}

/// The value of a pointer with the given target and offset
/// after its target was replaced by the given value.
fn redirect(target: PointerTarget, offset: &IntervalDomain, replacement: &Value) -> Value {
    match (target, replacement) {
        (
            PointerTarget::MaybeNull(_),
            Value::Pointer {
                target: PointerTarget::Last(_),
                ..
            },
        ) => Value::Top(POINTER_SIZE),
        (
            PointerTarget::MaybeNull(_),
            Value::Pointer {
                target: PointerTarget::Object(id),
                offset: replacement_offset,
            },
        ) => Value::Pointer {
            target: PointerTarget::MaybeNull(*id),
            offset: replacement_offset.add(offset),
        },
        (
            _,
            Value::Pointer {
                target,
                offset: replacement_offset,
            },
        ) => Value::Pointer {
            target: *target,
            offset: replacement_offset.add(offset),
        },
        (_, other) => other.clone(),
    }
}

/// Turn the segment into its concrete first member, followed by the remaining members.
fn split_first_member(
    mut disjunct: Disjunct,
    segment: ObjectId,
    links: &Links,
    length: IntervalDomain,
) -> Disjunct {
    let rest_length = length.sub(&IntervalDomain::from(1));
    let Some(object) = disjunct.object(segment).cloned() else {
        return disjunct;
    };
    let mut head = object.clone();
    head.kind = ObjectKind::Region;
    if rest_length.try_to_value() != Some(0) {
        let mut rest = object;
        rest.kind = ObjectKind::Segment {
            next_offset: links.next_offset,
            prev_offset: links.prev_offset,
            length: rest_length,
        };
        if let Some(prev_offset) = links.prev_offset {
            rest.write_at(prev_offset, Value::pointer(segment, 0));
        }
        let rest_id = disjunct.add_object(rest);
        head.write_at(links.next_offset, Value::pointer(rest_id, 0));
        if links.prev_offset.is_some() {
            disjunct.rewrite_values(|value| {
                if let Value::Pointer { target, .. } = value {
                    if *target == PointerTarget::Last(segment) {
                        *target = PointerTarget::Last(rest_id);
                    }
                }
            });
        }
    }
    disjunct.objects.insert(segment, head);
    disjunct
}

/// Turn the segment into its concrete last member, preceded by the remaining members.
fn split_last_member(
    mut disjunct: Disjunct,
    segment: ObjectId,
    links: &Links,
    length: IntervalDomain,
) -> Disjunct {
    let rest_length = length.sub(&IntervalDomain::from(1));
    let Some(object) = disjunct.object(segment).cloned() else {
        return disjunct;
    };
    let mut last = object.clone();
    last.kind = ObjectKind::Region;
    if rest_length.try_to_value() != Some(0) {
        let mut rest = object;
        rest.kind = ObjectKind::Segment {
            next_offset: links.next_offset,
            prev_offset: links.prev_offset,
            length: rest_length,
        };
        let rest_id = disjunct.add_object(rest);
        disjunct.rewrite_values(|value| {
            if let Value::Pointer { target, .. } = value {
                match *target {
                    PointerTarget::Object(id) | PointerTarget::MaybeNull(id) if id == segment => {
                        *target = target.with_object(rest_id)
                    }
                    PointerTarget::Last(id) if id == segment => {
                        *target = PointerTarget::Object(segment)
                    }
                    _ => (),
                }
            }
        });
        if let Some(rest) = disjunct.object_mut(rest_id) {
            rest.write_at(links.next_offset, Value::pointer(segment, 0));
        }
        if let Some(prev_offset) = links.prev_offset {
            last.write_at(prev_offset, Value::last_member(rest_id, 0));
        }
    }
    disjunct.objects.insert(segment, last);
    disjunct
}
