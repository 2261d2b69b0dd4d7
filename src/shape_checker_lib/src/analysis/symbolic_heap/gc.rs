//! Garbage collection and canonical renumbering of disjuncts.

use super::*;
use crate::checkers::FindingKind;
use std::collections::{BTreeMap, BTreeSet};

impl<'a> Engine<'a> {
    /// Remove all objects that are unreachable from the roots of the disjunct.
    ///
    /// Unreachable live heap objects are leaked and reported as such.
    /// Unreachable freed or wild objects are removed silently.
    pub fn collect_garbage(&self, disjunct: &mut Disjunct, reports: &mut Vec<EngineReport>) {
        let reachable: BTreeSet<ObjectId> = disjunct.reachable_objects().into_iter().collect();
        let garbage: Vec<ObjectId> = disjunct
            .objects
            .keys()
            .filter(|id| !reachable.contains(id))
            .copied()
            .collect();
        for id in garbage {
            let Some(object) = disjunct.objects.remove(&id) else {
                continue;
            };
            if object.may_leak() {
                let description = match &object.origin {
                    Some(origin) => format!("Memory allocated by {} is leaked", origin),
                    None => "Heap memory is leaked".to_string(),
                };
                self.defect(disjunct, FindingKind::MemoryLeak, description, reports);
            }
        }
    }

    /// Collect garbage and renumber the objects canonically.
    /// Applied after every transfer function.
    pub fn finish_transfer(
        &self,
        mut disjunct: Disjunct,
        reports: &mut Vec<EngineReport>,
    ) -> Disjunct {
        self.collect_garbage(&mut disjunct, reports);
        canonicalize(&mut disjunct);
        disjunct
    }
}

/// Renumber the objects of a disjunct in the order in which a breadth-first search
/// from the roots visits them.
/// Unreachable objects are dropped.
///
/// Two disjuncts describing isomorphic heaps with the same roots are equal after canonicalization.
pub fn canonicalize(disjunct: &mut Disjunct) {
    disjunct.normalize_last_pointers();
    let map: BTreeMap<ObjectId, ObjectId> = disjunct
        .reachable_objects()
        .into_iter()
        .zip(std::iter::successors(Some(ObjectId::default()), |id| {
            Some(id.next())
        }))
        .collect();
    if map.iter().all(|(old, new)| old == new) && map.len() == disjunct.objects.len() {
        return;
    }
    disjunct.rename_objects(&map);
}
