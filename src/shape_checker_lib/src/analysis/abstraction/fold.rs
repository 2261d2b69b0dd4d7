//! Folding of object chains into list segments.

use super::*;
use std::collections::BTreeSet;

/// Fold chains of structurally identical heap objects into list segments.
///
/// Two live heap objects `first -> second` linked through a pointer field of `first` are folded
/// if they have the same size, fill and layout,
/// `second` is referenced only by that field of `first`,
/// and all other pointer fields of both objects hold the same values.
///
/// If `second` points back to `first` through another field,
/// the pair is folded into a doubly linked segment.
/// Then the successor of `second` may point back to `second` through the same field
/// and afterwards points to the last member of the segment.
/// Folding is repeated until no such pair remains.
/// Returns true if something was folded. The disjunct is renumbered canonically afterwards.
pub fn fold_segments(disjunct: &mut Disjunct) -> bool {
    let mut folded = false;
    while let Some((first, second, segment)) = find_foldable_pair(disjunct) {
        disjunct.objects.remove(&second);
        disjunct.objects.insert(first, segment);
        disjunct.rewrite_values(|value| {
            if let Value::Pointer { target, .. } = value {
                if target.certain_object() == Some(second) {
                    *target = PointerTarget::Last(first);
                }
            }
        });
        folded = true;
    }
    if folded {
        canonicalize(disjunct);
    }
    folded
}

/// Find a pair of objects that can be folded and the segment replacing both.
fn find_foldable_pair(disjunct: &Disjunct) -> Option<(ObjectId, ObjectId, HeapObject)> {
    for (first_id, first) in disjunct.objects.iter() {
        if !is_list_member(first) {
            continue;
        }
        for (next_offset, value) in first.fields.iter() {
            let Value::Pointer {
                target: PointerTarget::Object(second_id),
                offset,
            } = value
            else {
                continue;
            };
            if second_id == first_id || offset.try_to_value() != Some(0) {
                continue;
            }
            let Some(second) = disjunct.object(*second_id) else {
                continue;
            };
            if !is_list_member(second) || disjunct.has_non_field_references(*second_id) {
                continue;
            }
            let prev_offset = back_link_offset(*first_id, first, second, *next_offset);
            if !has_only_list_referrers(disjunct, *first_id, *second_id, *next_offset, prev_offset)
            {
                continue;
            }
            if let Some(segment) = fold_pair(first, second, *next_offset, prev_offset) {
                return Some((*first_id, *second_id, segment));
            }
        }
    }
    None
}

/// The target of pointers from the successor of an object back to the object.
fn back_link(id: ObjectId, object: &HeapObject) -> PointerTarget {
    if object.is_segment() {
        PointerTarget::Last(id)
    } else {
        PointerTarget::Object(id)
    }
}

fn is_link_to(value: &Value, target: PointerTarget) -> bool {
    matches!(value, Value::Pointer { target: linked, offset }
        if *linked == target && offset.try_to_value() == Some(0))
}

/// The offset of the field of `second` pointing back to `first`, if there is one.
fn back_link_offset(
    first_id: ObjectId,
    first: &HeapObject,
    second: &HeapObject,
    next_offset: i64,
) -> Option<i64> {
    let target = back_link(first_id, first);
    second
        .fields
        .iter()
        .find(|(offset, value)| **offset != next_offset && is_link_to(value, target))
        .map(|(offset, _)| *offset)
}

/// Check that `second` is referenced only by the link field of `first`
/// and, in doubly linked lists, by the back link of its successor.
/// In doubly linked lists the last member of `first` must be referenced only by `second`.
fn has_only_list_referrers(
    disjunct: &Disjunct,
    first_id: ObjectId,
    second_id: ObjectId,
    next_offset: i64,
    prev_offset: Option<i64>,
) -> bool {
    let Some(second) = disjunct.object(second_id) else {
        return false;
    };
    let successor = prev_offset.and_then(|prev_offset| {
        let successor = second.read_at(next_offset, POINTER_SIZE).certain_object()?;
        let back = disjunct.object(successor)?.fields.get_unsized(prev_offset)?;
        is_link_to(back, back_link(second_id, second)).then_some(successor)
    });
    let referrers = disjunct.referrers(second_id);
    if !referrers.contains(&(first_id, 1))
        || referrers
            .iter()
            .any(|(id, count)| *count != 1 || (*id != first_id && Some(*id) != successor))
    {
        return false;
    }
    match disjunct.object(first_id) {
        Some(first) if prev_offset.is_some() && first.is_segment() => {
            count_last_member_pointers(disjunct, first_id) == 1
        }
        _ => true,
    }
}

/// The number of pointers to the last member of the given segment.
fn count_last_member_pointers(disjunct: &Disjunct, segment: ObjectId) -> usize {
    let is_last = |value: &&Value| {
        matches!(value, Value::Pointer { target: PointerTarget::Last(id), .. } if *id == segment)
    };
    let in_fields: usize = disjunct
        .objects
        .values()
        .map(|object| object.fields.values().filter(is_last).count())
        .sum();
    let in_markers: usize = disjunct
        .jump_markers
        .iter()
        .flat_map(|marker| marker.snapshot.values())
        .map(|region| region.values().filter(is_last).count())
        .sum();
    in_fields + in_markers + disjunct.return_value.iter().filter(is_last).count()
}

fn is_list_member(object: &HeapObject) -> bool {
    object.storage == Storage::Heap && object.validity == Validity::Live
}

/// Fold two objects into one segment linked through the field at `next_offset`.
///
/// The field at `next_offset` of the result holds the successor of `second`,
/// the field at `prev_offset` the predecessor of `first`.
fn fold_pair(
    first: &HeapObject,
    second: &HeapObject,
    next_offset: i64,
    prev_offset: Option<i64>,
) -> Option<HeapObject> {
    let links_through = |object: &HeapObject| match &object.kind {
        ObjectKind::Region => true,
        ObjectKind::Segment {
            next_offset: next,
            prev_offset: prev,
            ..
        } => *next == next_offset && *prev == prev_offset,
    };
    if first.size != second.size
        || first.fill != second.fill
        || !first.fields.has_same_layout(&second.fields)
        || !links_through(first)
        || !links_through(second)
    {
        return None;
    }
    let offsets: BTreeSet<i64> = first.fields.iter().map(|(offset, _)| *offset).collect();
    let mut fields = MemRegion::new();
    for offset in offsets {
        let second_value = second.fields.get_unsized(offset)?;
        if offset == next_offset {
            fields.insert_at_byte_index(second_value.clone(), offset);
            continue;
        }
        if Some(offset) == prev_offset {
            fields.insert_at_byte_index(first.fields.get_unsized(offset)?.clone(), offset);
            continue;
        }
        let merged = merge_member_values(first.fields.get_unsized(offset)?, second_value)?;
        fields.insert_at_byte_index(merged, offset);
    }
    Some(HeapObject {
        storage: first.storage,
        validity: first.validity,
        size: first.size.clone(),
        kind: ObjectKind::Segment {
            next_offset,
            prev_offset,
            length: first.length().add(&second.length()),
        },
        fields,
        fill: first.fill,
        origin: first.origin.clone(),
    })
}

/// Merge the values of a non-link field of two list members.
/// Pointers have to be equal, since a segment cannot represent pointers to different objects.
fn merge_member_values(first: &Value, second: &Value) -> Option<Value> {
    match (first, second) {
        _ if first == second => Some(first.clone()),
        (
            Value::Scalar { interval, size },
            Value::Scalar {
                interval: other,
                size: other_size,
            },
        ) if size == other_size => Some(Value::Scalar {
            interval: interval.signed_merge(other),
            size: *size,
        }),
        (Value::Top(size), Value::Scalar { size: other, .. } | Value::Top(other))
        | (Value::Scalar { size: other, .. }, Value::Top(size))
            if size == other =>
        {
            Some(Value::Top(*size))
        }
        _ => None,
    }
}
