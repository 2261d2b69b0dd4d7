//! Joining disjuncts with isomorphic heap graphs.
//!
//! Two disjuncts can be joined if there is a bijection between their objects
//! that is compatible with all roots and all pointer fields.
//! The bijection is built by a simultaneous breadth-first traversal of both heap graphs.
//! Objects of the same shape are joined field by field,
//! a single object and a list segment linked through the same fields join into a segment.
//!
//! Coarse joins only need the same roots.
//! Objects without a counterpart are kept, pointers that are `NULL` on one side only
//! become pointers to an object or `NULL`, and all other mismatches become unknown values.

use super::*;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// How precisely two disjuncts are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinMode {
    /// Join numeric values by their convex hull.
    /// Indeterminate and determinate values do not join.
    Join,
    /// Like `Join`, but numeric values of the second disjunct widen the values of the first one.
    Widen,
    /// Join any two disjuncts with the same roots.
    /// Mismatching values and object contents are replaced by unknown values.
    /// Used to enforce the disjunct cap.
    Coarse,
}

/// Join two disjuncts.
///
/// Returns `None` if the heap graphs of the disjuncts are not isomorphic
/// (or, for coarse joins, if the roots differ).
/// The result uses the object numbering and the witness trace of `old`.
/// If `new` is subsumed by `old`, the result equals `old`.
pub fn join(old: &Disjunct, new: &Disjunct, mode: JoinMode) -> Option<Disjunct> {
    join_disjuncts(old, new, mode).map(|(joined, _)| joined)
}

/// Join two disjuncts with the same roots coarsely.
///
/// The flag of the result is true if the join may hide defects,
/// i.e. objects that may leak were lost
/// or objects with different storage, validity or shape were identified.
/// The result is renumbered canonically.
pub fn join_coarsely(old: &Disjunct, new: &Disjunct) -> Option<(Disjunct, bool)> {
    let (mut joined, lossy) = join_disjuncts(old, new, JoinMode::Coarse)?;
    canonicalize(&mut joined);
    Some((joined, lossy))
}

fn join_disjuncts(old: &Disjunct, new: &Disjunct, mode: JoinMode) -> Option<(Disjunct, bool)> {
    if !have_same_roots(old, new)
        || (mode != JoinMode::Coarse && old.objects.len() != new.objects.len())
    {
        return None;
    }
    let mut joiner = Joiner {
        mode,
        old,
        new,
        pairs: BTreeMap::new(),
        reverse: BTreeMap::new(),
        old_only: BTreeSet::new(),
        new_only: BTreeMap::new(),
        queue: VecDeque::new(),
        next_id: old
            .objects
            .keys()
            .next_back()
            .map_or(ObjectId::default(), |id| id.next()),
        lossy: false,
    };
    let mut result = old.clone();
    for (name, old_id) in old.globals.iter() {
        joiner.pair(*old_id, *new.globals.get(name)?)?;
    }
    for (old_frame, new_frame) in old.frames.iter().zip(new.frames.iter()) {
        for (name, old_id) in old_frame.vars.iter() {
            joiner.pair(*old_id, *new_frame.vars.get(name)?)?;
        }
        for (old_id, new_id) in old_frame.allocas.iter().zip(new_frame.allocas.iter()) {
            joiner.pair(*old_id, *new_id)?;
        }
    }
    for (marker, (old_marker, new_marker)) in result
        .jump_markers
        .iter_mut()
        .zip(old.jump_markers.iter().zip(new.jump_markers.iter()))
    {
        joiner.pair(old_marker.env, new_marker.env)?;
        for (name, old_region) in old_marker.snapshot.iter() {
            let joined = joiner.join_regions(old_region, new_marker.snapshot.get(name)?)?;
            marker.snapshot.insert(name.clone(), joined);
        }
    }
    result.return_value = match (&old.return_value, &new.return_value) {
        (Some(old_value), Some(new_value)) => Some(joiner.join_values(old_value, new_value)?),
        (None, None) => None,
        _ => return None,
    };
    let mut objects = BTreeMap::new();
    while let Some(pending) = joiner.queue.pop_front() {
        match pending {
            Pending::Both(old_id, new_id) => {
                let joined = joiner.join_objects(old.object(old_id)?, new.object(new_id)?)?;
                objects.insert(old_id, joined);
            }
            Pending::Old(old_id) => {
                let kept = joiner.keep_one_sided(old.object(old_id)?, Side::Old);
                objects.insert(old_id, kept);
            }
            Pending::New(new_id, id) => {
                let imported = joiner.keep_one_sided(new.object(new_id)?, Side::New);
                objects.insert(id, imported);
            }
        }
    }
    if mode == JoinMode::Coarse {
        let lost_old = old
            .objects
            .iter()
            .any(|(id, object)| !objects.contains_key(id) && object.may_leak());
        let lost_new = new.objects.iter().any(|(id, object)| {
            !joiner.reverse.contains_key(id) && !joiner.new_only.contains_key(id) && object.may_leak()
        });
        joiner.lossy |= lost_old || lost_new;
    } else if objects.len() != old.objects.len() {
        return None;
    }
    result.set_objects(objects);
    result.normalize_last_pointers();
    Some((result, joiner.lossy))
}

/// Check that both disjuncts have the same variables, frames and jump markers.
fn have_same_roots(old: &Disjunct, new: &Disjunct) -> bool {
    old.globals.keys().eq(new.globals.keys())
        && old.frames.len() == new.frames.len()
        && old.frames.iter().zip(new.frames.iter()).all(|(old, new)| {
            old.function == new.function
                && old.call_site == new.call_site
                && old.vars.keys().eq(new.vars.keys())
                && old.allocas.len() == new.allocas.len()
        })
        && old.jump_markers.len() == new.jump_markers.len()
        && old
            .jump_markers
            .iter()
            .zip(new.jump_markers.iter())
            .all(|(old, new)| {
                old.site == new.site
                    && old.depth == new.depth
                    && old.snapshot.keys().eq(new.snapshot.keys())
            })
        && old.return_value.is_some() == new.return_value.is_some()
}

struct Joiner<'d> {
    mode: JoinMode,
    old: &'d Disjunct,
    new: &'d Disjunct,
    /// Maps objects of the old disjunct to objects of the new disjunct.
    pairs: BTreeMap<ObjectId, ObjectId>,
    /// The inverse of `pairs`.
    reverse: BTreeMap<ObjectId, ObjectId>,
    /// Objects of the old disjunct kept without a counterpart.
    old_only: BTreeSet<ObjectId>,
    /// Objects of the new disjunct kept without a counterpart, with their identifiers in the result.
    new_only: BTreeMap<ObjectId, ObjectId>,
    /// Objects that still have to be added to the result.
    queue: VecDeque<Pending>,
    /// The identifier of the next object imported from the new disjunct.
    next_id: ObjectId,
    /// Set if the join may hide defects.
    lossy: bool,
}

/// An object of the result that still has to be computed.
enum Pending {
    Both(ObjectId, ObjectId),
    Old(ObjectId),
    /// An object of the new disjunct and its identifier in the result.
    New(ObjectId, ObjectId),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Old,
    New,
}

impl<'d> Joiner<'d> {
    /// Add a pair of corresponding objects.
    /// Returns `None` if this contradicts an already known pair.
    fn pair(&mut self, old: ObjectId, new: ObjectId) -> Option<()> {
        match (self.pairs.get(&old), self.reverse.get(&new)) {
            (Some(paired), _) if *paired == new => Some(()),
            (None, None) if !self.old_only.contains(&old) && !self.new_only.contains_key(&new) => {
                self.pairs.insert(old, new);
                self.reverse.insert(new, old);
                self.queue.push_back(Pending::Both(old, new));
                Some(())
            }
            _ => None,
        }
    }

    /// The identifier in the result of an object referenced from one side only.
    fn one_sided(&mut self, id: ObjectId, side: Side) -> ObjectId {
        match side {
            Side::Old => {
                if !self.pairs.contains_key(&id) && self.old_only.insert(id) {
                    self.queue.push_back(Pending::Old(id));
                }
                id
            }
            Side::New => {
                if let Some(old) = self.reverse.get(&id) {
                    return *old;
                }
                if let Some(imported) = self.new_only.get(&id) {
                    return *imported;
                }
                let imported = self.next_id;
                self.next_id = imported.next();
                self.new_only.insert(id, imported);
                self.queue.push_back(Pending::New(id, imported));
                imported
            }
        }
    }

    /// Copy an object without counterpart into the result.
    fn keep_one_sided(&mut self, object: &HeapObject, side: Side) -> HeapObject {
        let mut kept = object.clone();
        for value in kept.fields.values_mut() {
            if let Value::Pointer { target, .. } = value {
                if let Some(id) = target.object() {
                    *target = target.with_object(self.one_sided(id, side));
                }
            }
        }
        kept
    }

    fn is_region(disjunct: &Disjunct, id: ObjectId) -> bool {
        disjunct.object(id).map_or(false, |object| !object.is_segment())
    }

    fn join_intervals(&self, old: &IntervalDomain, new: &IntervalDomain) -> IntervalDomain {
        match self.mode {
            JoinMode::Join | JoinMode::Coarse => old.signed_merge(new),
            JoinMode::Widen => old.widen(new),
        }
    }

    /// Join two pointer targets, pairing their objects.
    ///
    /// A pointer to the last member of a segment joins with a pointer to a single object,
    /// since a single object is its own last member.
    fn join_targets(&mut self, old: PointerTarget, new: PointerTarget) -> Option<PointerTarget> {
        use PointerTarget::*;
        let coarse = self.mode == JoinMode::Coarse;
        match (old, new) {
            (Null, Null) => Some(Null),
            (Object(old_id), Object(new_id)) => {
                self.pair(old_id, new_id)?;
                Some(Object(old_id))
            }
            (Last(old_id), Last(new_id)) => {
                self.pair(old_id, new_id)?;
                Some(Last(old_id))
            }
            (Last(old_id), Object(new_id)) if Self::is_region(self.new, new_id) => {
                self.pair(old_id, new_id)?;
                Some(Last(old_id))
            }
            (Object(old_id), Last(new_id)) if Self::is_region(self.old, old_id) => {
                self.pair(old_id, new_id)?;
                Some(Last(old_id))
            }
            (MaybeNull(old_id), MaybeNull(new_id) | Object(new_id))
            | (Object(old_id), MaybeNull(new_id)) => {
                self.pair(old_id, new_id)?;
                Some(MaybeNull(old_id))
            }
            (MaybeNull(old_id) | Object(old_id), Null) if coarse => {
                Some(MaybeNull(self.one_sided(old_id, Side::Old)))
            }
            (Null, MaybeNull(new_id) | Object(new_id)) if coarse => {
                Some(MaybeNull(self.one_sided(new_id, Side::New)))
            }
            _ => None,
        }
    }

    /// Join two values. Pointers to objects pair their targets.
    /// Coarse joins replace values that do not join by unknown values.
    fn join_values(&mut self, old: &Value, new: &Value) -> Option<Value> {
        if let Some(joined) = self.join_matching_values(old, new) {
            return Some(joined);
        }
        if self.mode == JoinMode::Coarse && old.bytesize() == new.bytesize() {
            Some(Value::Top(old.bytesize()))
        } else {
            None
        }
    }

    fn join_matching_values(&mut self, old: &Value, new: &Value) -> Option<Value> {
        use Value::*;
        Some(match (old, new) {
            (
                Scalar { interval, size },
                Scalar {
                    interval: new_interval,
                    size: new_size,
                },
            ) if size == new_size => Scalar {
                interval: self.join_intervals(interval, new_interval),
                size: *size,
            },
            (
                Pointer { target, offset },
                Pointer {
                    target: new_target,
                    offset: new_offset,
                },
            ) => Pointer {
                target: self.join_targets(*target, *new_target)?,
                offset: self.join_intervals(offset, new_offset),
            },
            (Indeterminate { .. }, Indeterminate { .. }) if old == new => old.clone(),
            (Top(size), Top(new_size)) if size == new_size => Top(*size),
            (Top(size), Scalar { size: other, .. }) | (Scalar { size: other, .. }, Top(size))
                if size == other =>
            {
                Top(*size)
            }
            (
                Top(size),
                Pointer {
                    target: PointerTarget::Null,
                    ..
                },
            )
            | (
                Pointer {
                    target: PointerTarget::Null,
                    ..
                },
                Top(size),
            ) if *size == POINTER_SIZE => Top(*size),
            _ => return None,
        })
    }

    /// Join the field values of two memory regions.
    fn join_regions(
        &mut self,
        old: &MemRegion<Value>,
        new: &MemRegion<Value>,
    ) -> Option<MemRegion<Value>> {
        if !old.has_same_layout(new) {
            return None;
        }
        let mut joined = MemRegion::new();
        for ((offset, old_value), new_value) in old.iter().zip(new.values()) {
            joined.insert_at_byte_index(self.join_values(old_value, new_value)?, *offset);
        }
        Some(joined)
    }

    /// Join two paired objects.
    ///
    /// Coarse joins keep the storage and shape of the old object
    /// and prefer a freed or wild validity over a live one.
    fn join_objects(&mut self, old: &HeapObject, new: &HeapObject) -> Option<HeapObject> {
        let coarse = self.mode == JoinMode::Coarse;
        if !coarse && (old.storage != new.storage || old.validity != new.validity) {
            return None;
        }
        if old.storage != new.storage || old.validity != new.validity {
            self.lossy = true;
        }
        let validity = match old.validity {
            Validity::Live => new.validity,
            validity => validity,
        };
        let one = IntervalDomain::from(1);
        let kind = match (&old.kind, &new.kind) {
            (ObjectKind::Region, ObjectKind::Region) => ObjectKind::Region,
            (
                ObjectKind::Segment {
                    next_offset,
                    prev_offset,
                    length,
                },
                ObjectKind::Segment {
                    next_offset: new_next_offset,
                    prev_offset: new_prev_offset,
                    length: new_length,
                },
            ) if next_offset == new_next_offset && prev_offset == new_prev_offset => {
                ObjectKind::Segment {
                    next_offset: *next_offset,
                    prev_offset: *prev_offset,
                    length: self.join_intervals(length, new_length),
                }
            }
            (
                ObjectKind::Segment {
                    next_offset,
                    prev_offset,
                    length,
                },
                ObjectKind::Region,
            ) => ObjectKind::Segment {
                next_offset: *next_offset,
                prev_offset: *prev_offset,
                length: self.join_intervals(length, &one),
            },
            (
                ObjectKind::Region,
                ObjectKind::Segment {
                    next_offset,
                    prev_offset,
                    length,
                },
            ) => ObjectKind::Segment {
                next_offset: *next_offset,
                prev_offset: *prev_offset,
                length: self.join_intervals(&one, length),
            },
            _ if coarse => {
                self.lossy = true;
                old.kind.clone()
            }
            _ => return None,
        };
        let size = match self.mode {
            _ if old.size == new.size => old.size.clone(),
            JoinMode::Join => return None,
            JoinMode::Widen => old.size.widen(&new.size),
            JoinMode::Coarse => old.size.signed_merge(&new.size),
        };
        let mut fill = match self.mode {
            _ if old.fill == new.fill => old.fill,
            JoinMode::Coarse => Fill::Unknown,
            JoinMode::Join | JoinMode::Widen => return None,
        };
        let offsets: BTreeSet<i64> = old
            .fields
            .iter()
            .chain(new.fields.iter())
            .map(|(offset, _)| *offset)
            .collect();
        let mut fields = MemRegion::new();
        for offset in offsets {
            let size = match (
                old.fields.get_unsized(offset),
                new.fields.get_unsized(offset),
            ) {
                (Some(old_value), Some(new_value)) if old_value.bytesize() != new_value.bytesize() => {
                    if !coarse {
                        return None;
                    }
                    fill = Fill::Unknown;
                    continue;
                }
                (Some(value), _) | (None, Some(value)) => value.bytesize(),
                (None, None) => continue,
            };
            let joined =
                self.join_values(&old.read_at(offset, size), &new.read_at(offset, size))?;
            fields.insert_at_byte_index(joined, offset);
        }
        Some(HeapObject {
            storage: old.storage,
            validity,
            size,
            kind,
            fields,
            fill,
            origin: old.origin.clone(),
        })
    }
}
