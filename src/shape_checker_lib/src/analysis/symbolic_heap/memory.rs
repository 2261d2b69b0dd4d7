//! Allocation and deallocation of memory objects.

use super::*;
use crate::abstract_domain::SpecializeByConditional;
use crate::analysis::abstraction::materialize_target;
use crate::checkers::{FindingKind, NoticeKind};
use crate::intermediate_representation::Expression;
use std::collections::BTreeSet;

impl<'a> Engine<'a> {
    /// Allocate a new object of the given size.
    ///
    /// Returns the successor disjuncts together with the pointer to the new object.
    /// If `may_fail` is set, an additional disjunct is generated
    /// in which the allocation returned `NULL`.
    pub fn allocate(
        &self,
        mut disjunct: Disjunct,
        storage: Storage,
        size: &Value,
        fill: Fill,
        origin: &Tid,
        may_fail: bool,
    ) -> Vec<(Disjunct, Value)> {
        let size = match size.as_integer() {
            Some(size) => size
                .clone()
                .add_signed_greater_equal_bound(0)
                .unwrap_or_else(|_| IntervalDomain::from(0))
                .without_widening_hints(),
            None => IntervalDomain::at_least(0),
        };
        let mut results = Vec::new();
        if may_fail {
            results.push((disjunct.clone(), Value::null()));
        }
        let object = HeapObject::new(storage, size, fill).with_origin(origin.clone());
        let id = disjunct.add_object(object);
        if storage == Storage::Stack {
            if let Some(frame) = disjunct.frames.last_mut() {
                frame.allocas.push(id);
            }
        }
        results.push((disjunct, Value::pointer(id, 0)));
        results
    }

    /// Free the object that `pointer` points to.
    ///
    /// Freeing `NULL` does nothing.
    /// Freeing anything but the start of a live heap object is a defect.
    pub fn free(
        &self,
        disjunct: Disjunct,
        pointer: &Expression,
        reports: &mut Vec<EngineReport>,
    ) -> Result<Vec<Disjunct>, Error> {
        let mut pending = vec![(disjunct, 0)];
        let mut results = Vec::new();
        while let Some((mut disjunct, rounds)) = pending.pop() {
            let value = self.eval(&disjunct, pointer)?;
            if value.is_null() {
                results.push(disjunct);
                continue;
            }
            let (target, id, offset) = match value {
                Value::Pointer {
                    target: target @ (PointerTarget::Object(id) | PointerTarget::Last(id)),
                    offset,
                } => (target, id, offset),
                // Freeing `NULL` does nothing, so only the object remains to be freed.
                Value::Pointer {
                    target: PointerTarget::MaybeNull(id),
                    offset,
                } => (PointerTarget::Object(id), id, offset),
                Value::Indeterminate { .. } => {
                    let description = format!("Free of indeterminate pointer {}", pointer);
                    let kind = FindingKind::WildPointer;
                    self.failed_free(disjunct, kind, description, reports, &mut results);
                    continue;
                }
                Value::Pointer { .. } => {
                    let description = format!("Free of non-heap address {}", pointer);
                    let kind = FindingKind::InvalidFree;
                    self.failed_free(disjunct, kind, description, reports, &mut results);
                    continue;
                }
                Value::Scalar { .. } | Value::Top(_) => {
                    self.notice(
                        &disjunct,
                        NoticeKind::UnknownValueDereference,
                        format!("Free of unknown value {}", pointer),
                        reports,
                    );
                    results.push(disjunct);
                    continue;
                }
            };
            let Some(object) = disjunct.object(id) else {
                self.notice(
                    &disjunct,
                    NoticeKind::UnsupportedConstruct,
                    format!("Free of dangling object reference {}", id),
                    reports,
                );
                continue;
            };
            let failure = match (object.storage, object.validity) {
                (_, Validity::Freed) => Some((
                    FindingKind::DoubleFree,
                    format!("Double free of {}", pointer),
                )),
                (_, Validity::Wild) => Some((
                    FindingKind::WildPointer,
                    format!("Free of dead stack memory {}", pointer),
                )),
                (Storage::Stack | Storage::Static, _) => Some((
                    FindingKind::InvalidFree,
                    format!("Free of non-heap memory {}", pointer),
                )),
                (Storage::Heap, Validity::Live) if offset.try_to_value() != Some(0) => Some((
                    FindingKind::InvalidFree,
                    format!("Free of {} with offset {} into the object", pointer, offset),
                )),
                (Storage::Heap, Validity::Live) => None,
            };
            let is_segment = object.is_segment();
            if let Some((kind, description)) = failure {
                self.failed_free(disjunct, kind, description, reports, &mut results);
                continue;
            }
            if is_segment {
                if rounds < self.options.unfold_bound {
                    pending.extend(
                        materialize_target(disjunct, target)
                            .into_iter()
                            .map(|disjunct| (disjunct, rounds + 1)),
                    );
                } else {
                    self.notice(
                        &disjunct,
                        NoticeKind::UnsupportedConstruct,
                        "Segment materialization limit reached",
                        reports,
                    );
                    results.push(disjunct);
                }
                continue;
            }
            if let Some(object) = disjunct.object_mut(id) {
                object.free();
            }
            results.push(disjunct);
        }
        Ok(results)
    }

    fn failed_free(
        &self,
        disjunct: Disjunct,
        kind: FindingKind,
        description: String,
        reports: &mut Vec<EngineReport>,
        results: &mut Vec<Disjunct>,
    ) {
        self.defect(&disjunct, kind, description, reports);
        if self.options.continue_after_error {
            results.push(disjunct);
        }
    }

    /// `realloc`: allocate a new object, copy the old content and free the old object.
    ///
    /// If the allocation fails, the old object stays untouched.
    pub fn reallocate(
        &self,
        disjunct: Disjunct,
        pointer: &Expression,
        size: &Value,
        origin: &Tid,
        reports: &mut Vec<EngineReport>,
    ) -> Result<Vec<(Disjunct, Value)>, Error> {
        let old = self.eval(&disjunct, pointer)?;
        let may_fail = self.options.allocation_may_fail;
        let mut results = Vec::new();
        for (mut disjunct, new) in
            self.allocate(disjunct, Storage::Heap, size, Fill::Uninitialized, origin, may_fail)
        {
            let Some(new_id) = new.referenced_object() else {
                results.push((disjunct, new));
                continue;
            };
            if old.is_null() {
                results.push((disjunct, new));
                continue;
            }
            if let Some(old_object) = old
                .referenced_object()
                .and_then(|id| disjunct.object(id))
                .filter(|object| object.validity == Validity::Live && !object.is_segment())
                .cloned()
            {
                if let Some(new_object) = disjunct.object_mut(new_id) {
                    let length = old_object.min_size().min(new_object.min_size());
                    new_object.copy_from(&old_object, 0, 0, length);
                }
            }
            for disjunct in self.free(disjunct, pointer, reports)? {
                results.push((disjunct, new.clone()));
            }
        }
        Ok(results)
    }

    /// Model the effect of an unknown function on the memory reachable from its arguments.
    ///
    /// Integer fields of all reachable live objects become unknown.
    /// Pointer fields are kept, so that the unknown function does not make objects unreachable.
    pub fn havoc_reachable(&self, disjunct: &mut Disjunct, arguments: &[Value]) {
        let mut visited = BTreeSet::new();
        let mut stack: Vec<ObjectId> = arguments
            .iter()
            .filter_map(Value::referenced_object)
            .collect();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(object) = disjunct.object_mut(id) {
                if object.validity == Validity::Live {
                    object.havoc_scalars();
                    stack.extend(object.referenced_objects());
                }
            }
        }
    }
}
