//! The abstraction layer of the shape analysis.
//!
//! The abstract state at a program location is a [`StateSet`], a bounded set of disjuncts.
//! Disjuncts whose heap graphs are isomorphic (up to the lengths of list segments)
//! are joined into one disjunct, all others are kept apart.
//! If the number of disjuncts exceeds the configured cap,
//! the newest disjuncts are merged coarsely into older ones.
//!
//! To keep the heap graphs finite in loops, chains of structurally identical objects
//! are folded into singly or doubly linked list segments (see [`fold_segments`]).
//! Accesses to a segment first materialize the member they access (see [`materialize_target`]).

use crate::abstract_domain::{IntervalDomain, MemRegion, ObjectId, SizedDomain};
use crate::analysis::symbolic_heap::{
    canonicalize, Disjunct, EngineReport, Fill, HeapObject, ObjectKind, PointerTarget,
    ReportKind, Storage, Validity, Value,
};
use crate::checkers::NoticeKind;
use crate::intermediate_representation::POINTER_SIZE;
use crate::prelude::*;

mod fold;
pub use fold::fold_segments;
mod join;
pub use join::{join, join_coarsely, JoinMode};
mod unfold;
pub use unfold::{materialize, materialize_last, materialize_target};

/// A finite set of disjuncts representing the abstract state at one program location.
///
/// The order of the disjuncts is the order in which they were first added.
/// Equal disjuncts are never stored twice.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct StateSet {
    disjuncts: Vec<Disjunct>,
}

impl StateSet {
    /// Create an empty state set.
    pub fn new() -> StateSet {
        StateSet::default()
    }

    /// Create a state set containing exactly the given disjuncts (without joining them).
    pub fn from_disjuncts(disjuncts: impl IntoIterator<Item = Disjunct>) -> StateSet {
        let mut state_set = StateSet::new();
        for disjunct in disjuncts {
            state_set.insert(disjunct);
        }
        state_set
    }

    /// Add a disjunct unless an equal disjunct is already contained.
    /// Returns true if the disjunct was added.
    pub fn insert(&mut self, disjunct: Disjunct) -> bool {
        if self.disjuncts.contains(&disjunct) {
            false
        } else {
            self.disjuncts.push(disjunct);
            true
        }
    }

    /// The disjuncts of the set.
    pub fn disjuncts(&self) -> &[Disjunct] {
        &self.disjuncts
    }

    /// Iterate over the disjuncts.
    pub fn iter(&self) -> std::slice::Iter<'_, Disjunct> {
        self.disjuncts.iter()
    }

    /// The number of disjuncts.
    pub fn len(&self) -> usize {
        self.disjuncts.len()
    }

    /// Returns true if the set contains no disjuncts, i.e. the location is unreachable.
    pub fn is_empty(&self) -> bool {
        self.disjuncts.is_empty()
    }

    /// Add a disjunct by joining it with a compatible disjunct of the set.
    ///
    /// Disjuncts that are contained in or subsumed by a disjunct of the set change nothing.
    /// Otherwise the disjunct is joined with the first compatible disjunct
    /// or, if no disjunct is compatible, added as a new element.
    pub fn add(&mut self, disjunct: Disjunct, mode: JoinMode) {
        if self.disjuncts.contains(&disjunct) {
            return;
        }
        let mut first_compatible = None;
        for (index, existing) in self.disjuncts.iter().enumerate() {
            if let Some(joined) = join(existing, &disjunct, mode) {
                if joined == *existing {
                    return;
                }
                first_compatible.get_or_insert((index, joined));
            }
        }
        match first_compatible {
            Some((index, joined)) => self.replace(index, joined),
            None => self.disjuncts.push(disjunct),
        }
    }

    /// Replace a disjunct, removing it instead if the replacement is already contained.
    fn replace(&mut self, index: usize, disjunct: Disjunct) {
        if self.disjuncts.contains(&disjunct) {
            self.disjuncts.remove(index);
        } else {
            self.disjuncts[index] = disjunct;
        }
    }

    /// Join all disjuncts of `other` into a copy of `self`.
    pub fn merge(&self, other: &StateSet, cap: usize, reports: &mut Vec<EngineReport>) -> StateSet {
        self.combine(other, JoinMode::Join, cap, reports)
    }

    /// Like [`StateSet::merge`], but the numeric parts of joined disjuncts
    /// (scalar values, offsets, segment lengths) are widened.
    /// `self` has to be the older state set.
    pub fn widen(&self, newer: &StateSet, cap: usize, reports: &mut Vec<EngineReport>) -> StateSet {
        self.combine(newer, JoinMode::Widen, cap, reports)
    }

    fn combine(
        &self,
        other: &StateSet,
        mode: JoinMode,
        cap: usize,
        reports: &mut Vec<EngineReport>,
    ) -> StateSet {
        let mut result = self.clone();
        for disjunct in other.iter() {
            result.add(disjunct.clone(), mode);
        }
        result.enforce_cap(cap, reports);
        result
    }

    /// Reduce the number of disjuncts to at most `cap`.
    ///
    /// Surplus disjuncts are merged coarsely into a disjunct with the same roots,
    /// preferably into one where the merge hides no defects.
    /// A merge that may hide defects (e.g. loses track of an object that may leak)
    /// is reported with a [`NoticeKind::DisjunctOverflow`] notice.
    /// Disjuncts that cannot be merged at all (different call stacks or jump markers)
    /// are kept, so the cap may be exceeded.
    pub fn enforce_cap(&mut self, cap: usize, reports: &mut Vec<EngineReport>) {
        let cap = cap.max(1);
        let mut unmergeable = Vec::new();
        while self.disjuncts.len() + unmergeable.len() > cap {
            let Some(surplus) = self.disjuncts.pop() else {
                break;
            };
            let mut merged: Option<(usize, Disjunct, bool)> = None;
            for (index, disjunct) in self.disjuncts.iter().enumerate() {
                let Some((joined, lossy)) = join_coarsely(disjunct, &surplus) else {
                    continue;
                };
                if merged.as_ref().map_or(true, |(_, _, merged_lossy)| *merged_lossy && !lossy) {
                    merged = Some((index, joined, lossy));
                }
                if !lossy {
                    break;
                }
            }
            match merged {
                Some((index, joined, lossy)) => {
                    if lossy {
                        reports.push(EngineReport::new(
                            ReportKind::Notice(NoticeKind::DisjunctOverflow),
                            format!("More than {} disjuncts, merging them lost heap objects", cap),
                            &surplus,
                        ));
                    }
                    self.replace(index, joined);
                }
                None => unmergeable.push(surplus),
            }
        }
        unmergeable.reverse();
        self.disjuncts.extend(unmergeable);
    }

    /// Apply a function to every disjunct and collect the results.
    pub fn flat_map(&self, mut function: impl FnMut(&Disjunct) -> Vec<Disjunct>) -> StateSet {
        StateSet::from_disjuncts(self.iter().flat_map(|disjunct| function(disjunct)))
    }
}

impl IntoIterator for StateSet {
    type Item = Disjunct;
    type IntoIter = std::vec::IntoIter<Disjunct>;

    fn into_iter(self) -> Self::IntoIter {
        self.disjuncts.into_iter()
    }
}
