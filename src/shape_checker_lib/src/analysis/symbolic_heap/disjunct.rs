use super::{HeapObject, PointerTarget, Value};
use crate::abstract_domain::{MemRegion, ObjectId};
use crate::checkers::TraceStep;
use crate::prelude::*;
use crate::utils::debug::ToJsonCompact;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Only the most recent steps of a witness trace are kept.
const MAX_TRACE_LENGTH: usize = 200;

/// The stack frame of a function call.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Frame {
    /// The called function.
    pub function: Tid,
    /// The call instruction that created the frame.
    /// `None` for the frame of the function where the analysis started.
    pub call_site: Option<Tid>,
    /// Maps the names of parameters and local variables to their memory objects.
    pub vars: BTreeMap<String, ObjectId>,
    /// Objects allocated by `alloca` in this frame.
    pub allocas: Vec<ObjectId>,
}

impl Frame {
    /// Create a frame without variables.
    pub fn new(function: Tid, call_site: Option<Tid>) -> Frame {
        Frame {
            function,
            call_site,
            vars: BTreeMap::new(),
            allocas: Vec::new(),
        }
    }
}

/// The jump context recorded by a `setjmp` call.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct JumpMarker {
    /// The `setjmp` call.
    pub site: Tid,
    /// The jump buffer passed to `setjmp`.
    pub env: ObjectId,
    /// The number of frames at the time of the `setjmp` call.
    pub depth: usize,
    /// The content of the non-volatile variables of the frame at the time of the `setjmp` call.
    pub snapshot: BTreeMap<String, MemRegion<Value>>,
}

/// One disjunct of an abstract state: a symbolic heap together with the call stack that owns it.
///
/// Objects are stored in an arena indexed by [`ObjectId`].
/// Variables are objects, too, so that taking their address needs no special handling.
/// After every transfer function the disjunct is garbage collected and canonically renumbered,
/// so that equal heaps have equal representations.
///
/// The witness trace is ignored when comparing disjuncts.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Disjunct {
    /// The memory objects.
    pub objects: BTreeMap<ObjectId, HeapObject>,
    /// The next unused object identifier.
    next_id: ObjectId,
    /// Maps the names of global variables to their memory objects.
    pub globals: BTreeMap<String, ObjectId>,
    /// The call stack, outermost frame first.
    pub frames: Vec<Frame>,
    /// The active `setjmp` markers.
    pub jump_markers: Vec<JumpMarker>,
    /// The value returned by the last function return, until the caller consumes it.
    pub return_value: Option<Value>,
    /// The most recent steps leading to this disjunct.
    trace: Arc<Vec<TraceStep>>,
}

impl PartialEq for Disjunct {
    fn eq(&self, other: &Self) -> bool {
        self.objects == other.objects
            && self.globals == other.globals
            && self.frames == other.frames
            && self.jump_markers == other.jump_markers
            && self.return_value == other.return_value
    }
}

impl Eq for Disjunct {}

impl Default for Disjunct {
    fn default() -> Self {
        Disjunct::new()
    }
}

impl Disjunct {
    /// Create an empty disjunct without objects or frames.
    pub fn new() -> Disjunct {
        Disjunct {
            objects: BTreeMap::new(),
            next_id: ObjectId::default(),
            globals: BTreeMap::new(),
            frames: Vec::new(),
            jump_markers: Vec::new(),
            return_value: None,
            trace: Arc::new(Vec::new()),
        }
    }

    /// Add an object and return its identifier.
    pub fn add_object(&mut self, object: HeapObject) -> ObjectId {
        let id = self.next_id;
        self.next_id = id.next();
        self.objects.insert(id, object);
        id
    }

    /// Replace all objects of the disjunct.
    pub fn set_objects(&mut self, objects: BTreeMap<ObjectId, HeapObject>) {
        self.next_id = objects
            .keys()
            .next_back()
            .map_or(ObjectId::default(), |id| id.next());
        self.objects = objects;
    }

    /// Get an object.
    pub fn object(&self, id: ObjectId) -> Option<&HeapObject> {
        self.objects.get(&id)
    }

    /// Get an object for modification.
    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut HeapObject> {
        self.objects.get_mut(&id)
    }

    /// The number of frames on the call stack.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The function owning the innermost frame.
    pub fn current_function(&self) -> Option<&Tid> {
        self.frames.last().map(|frame| &frame.function)
    }

    /// Look up the object of a variable.
    /// Variables of the innermost frame shadow global variables.
    pub fn var_object(&self, name: &str) -> Option<ObjectId> {
        self.frames
            .last()
            .and_then(|frame| frame.vars.get(name))
            .or_else(|| self.globals.get(name))
            .copied()
    }

    /// The call sites of all frames, outermost first.
    pub fn call_stack(&self) -> Vec<Tid> {
        self.frames
            .iter()
            .filter_map(|frame| frame.call_site.clone())
            .collect()
    }

    /// The witness trace of the disjunct.
    pub fn trace(&self) -> &[TraceStep] {
        &self.trace
    }

    /// The witness trace of the disjunct as a shared reference.
    pub fn shared_trace(&self) -> Arc<Vec<TraceStep>> {
        self.trace.clone()
    }

    /// Append a step to the witness trace.
    pub fn push_trace(&mut self, step: TraceStep) {
        let trace = Arc::make_mut(&mut self.trace);
        if trace.len() >= MAX_TRACE_LENGTH {
            trace.remove(0);
        }
        trace.push(step);
    }

    /// The roots of the heap graph in canonical order:
    /// global variables, the variables and `alloca` objects of each frame (outermost first),
    /// the objects referenced by jump markers and by the pending return value.
    pub fn roots(&self) -> Vec<ObjectId> {
        let mut roots: Vec<ObjectId> = self.globals.values().copied().collect();
        for frame in self.frames.iter() {
            roots.extend(frame.vars.values().copied());
            roots.extend(frame.allocas.iter().copied());
        }
        for marker in self.jump_markers.iter() {
            roots.push(marker.env);
            for region in marker.snapshot.values() {
                roots.extend(region.values().filter_map(Value::referenced_object));
            }
        }
        if let Some(value) = &self.return_value {
            roots.extend(value.referenced_object());
        }
        roots
    }

    /// All objects reachable from the roots in breadth-first order.
    /// Fields of an object are visited in the order of their offsets.
    pub fn reachable_objects(&self) -> Vec<ObjectId> {
        let mut visited = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<ObjectId> = self.roots().into();
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let Some(object) = self.objects.get(&id) else {
                continue;
            };
            order.push(id);
            queue.extend(object.referenced_objects());
        }
        order
    }

    /// Return all objects that point to the given object together with the number of such pointers.
    /// Variables are objects, so references from variables are included.
    pub fn referrers(&self, target: ObjectId) -> Vec<(ObjectId, usize)> {
        self.objects
            .iter()
            .filter_map(|(id, object)| {
                let count = object
                    .referenced_objects()
                    .filter(|referenced| *referenced == target)
                    .count();
                (count > 0).then_some((*id, count))
            })
            .collect()
    }

    /// Returns true if something besides object fields references the object,
    /// i.e. a jump marker or the pending return value.
    pub fn has_non_field_references(&self, target: ObjectId) -> bool {
        self.jump_markers.iter().any(|marker| {
            marker.env == target
                || marker
                    .snapshot
                    .values()
                    .flat_map(|region| region.values())
                    .any(|value| value.referenced_object() == Some(target))
        }) || self
            .return_value
            .as_ref()
            .map_or(false, |value| value.referenced_object() == Some(target))
    }

    /// Rename all objects according to the given map.
    /// Objects missing in the map are removed.
    pub fn rename_objects(&mut self, map: &BTreeMap<ObjectId, ObjectId>) {
        let lookup = |id: ObjectId| map.get(&id).copied();
        let old_objects = std::mem::take(&mut self.objects);
        for (id, mut object) in old_objects {
            if let Some(new_id) = lookup(id) {
                object.rename_objects(&lookup);
                self.objects.insert(new_id, object);
            }
        }
        for id in self.globals.values_mut() {
            *id = lookup(*id).unwrap_or(*id);
        }
        for frame in self.frames.iter_mut() {
            for id in frame.vars.values_mut() {
                *id = lookup(*id).unwrap_or(*id);
            }
            frame.allocas.retain(|id| map.contains_key(id));
            for id in frame.allocas.iter_mut() {
                *id = lookup(*id).unwrap_or(*id);
            }
        }
        for marker in self.jump_markers.iter_mut() {
            marker.env = lookup(marker.env).unwrap_or(marker.env);
            for region in marker.snapshot.values_mut() {
                for value in region.values_mut() {
                    value.rename_objects(&lookup);
                }
            }
        }
        if let Some(value) = self.return_value.as_mut() {
            value.rename_objects(&lookup);
        }
        self.next_id = self
            .objects
            .keys()
            .next_back()
            .map_or(ObjectId::default(), |id| id.next());
    }

    /// Apply a function to the values that may hold pointers:
    /// the fields of objects with pointer fields, the jump marker snapshots
    /// and the pending return value.
    pub fn rewrite_values(&mut self, rewrite: impl Fn(&mut Value)) {
        for object in self.objects.values_mut() {
            if object.referenced_objects().next().is_some() {
                object.fields.values_mut().for_each(&rewrite);
            }
        }
        for marker in self.jump_markers.iter_mut() {
            for region in marker.snapshot.values_mut() {
                region.values_mut().for_each(&rewrite);
            }
        }
        if let Some(value) = self.return_value.as_mut() {
            rewrite(value);
        }
    }

    /// Remove all objects that are unreachable from the roots without reporting them as leaks.
    ///
    /// Used when a branch condition rules out the disjunct that contained the objects.
    pub fn remove_unreachable_objects(&mut self) {
        let reachable: BTreeSet<ObjectId> = self.reachable_objects().into_iter().collect();
        self.objects.retain(|id, _| reachable.contains(id));
    }

    /// Turn pointers to the last member of an object that is not a list segment
    /// into pointers to the object.
    pub fn normalize_last_pointers(&mut self) {
        let regions: BTreeSet<ObjectId> = self
            .objects
            .iter()
            .filter(|(_, object)| !object.is_segment())
            .map(|(id, _)| *id)
            .collect();
        self.rewrite_values(|value| {
            if let Value::Pointer { target, .. } = value {
                if let PointerTarget::Last(id) = *target {
                    if regions.contains(&id) {
                        *target = PointerTarget::Object(id);
                    }
                }
            }
        });
    }
}

impl ToJsonCompact for Disjunct {
    fn to_json_compact(&self) -> serde_json::Value {
        let mut state = serde_json::Map::new();
        let vars = |vars: &BTreeMap<String, ObjectId>| {
            serde_json::Value::Object(
                vars.iter()
                    .map(|(name, id)| (name.clone(), serde_json::Value::String(id.to_string())))
                    .collect(),
            )
        };
        state.insert("globals".into(), vars(&self.globals));
        state.insert(
            "frames".into(),
            serde_json::Value::Array(
                self.frames
                    .iter()
                    .map(|frame| {
                        let mut json = serde_json::Map::new();
                        json.insert(
                            "function".into(),
                            serde_json::Value::String(frame.function.to_string()),
                        );
                        json.insert("vars".into(), vars(&frame.vars));
                        serde_json::Value::Object(json)
                    })
                    .collect(),
            ),
        );
        state.insert(
            "objects".into(),
            serde_json::Value::Object(
                self.objects
                    .iter()
                    .map(|(id, object)| (id.to_string(), object.to_json_compact()))
                    .collect(),
            ),
        );
        if !self.jump_markers.is_empty() {
            state.insert(
                "jump_markers".into(),
                serde_json::Value::Array(
                    self.jump_markers
                        .iter()
                        .map(|marker| {
                            serde_json::Value::String(format!(
                                "{} env {} depth {}",
                                marker.site, marker.env, marker.depth
                            ))
                        })
                        .collect(),
                ),
            );
        }
        if let Some(value) = &self.return_value {
            state.insert("return_value".into(), value.to_json_compact());
        }
        serde_json::Value::Object(state)
    }
}
