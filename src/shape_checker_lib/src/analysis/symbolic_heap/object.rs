//! The memory objects of the symbolic heap.

use super::Value;
use crate::abstract_domain::{IntervalDomain, MemRegion, ObjectId, SizedDomain};
use crate::intermediate_representation::ByteSize;
use crate::prelude::*;
use crate::utils::debug::ToJsonCompact;

/// Imprecise accesses touching at most this many positions are modelled as weak updates.
/// Accesses touching more positions forget the content of the touched range.
const MAX_WEAK_UPDATE_POSITIONS: i64 = 64;

/// Where a memory object lives.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum Storage {
    /// A variable or `alloca` buffer of a stack frame.
    Stack,
    /// An object allocated by `malloc` and friends.
    Heap,
    /// A global variable.
    Static,
}

/// The validity state of a memory object.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum Validity {
    /// The object may be accessed.
    Live,
    /// A freed heap object. Kept to detect later accesses.
    Freed,
    /// A stack object whose frame was torn down.
    Wild,
}

/// Whether an object is a single memory object or a list segment summarizing several of them.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum ObjectKind {
    /// A single memory object.
    Region,
    /// A chain of structurally identical objects linked through the pointer at `next_offset`.
    ///
    /// The fields of the segment describe all members of the chain except the link fields.
    /// The field at `next_offset` holds the value after the last member.
    /// In doubly linked segments the field at `prev_offset` holds the value before the first member
    /// and the member after the segment points back to it through a pointer to its last member.
    Segment {
        /// The offset of the pointer linking each member to its successor.
        next_offset: i64,
        /// The offset of the pointer linking each member to its predecessor, if any.
        prev_offset: Option<i64>,
        /// The possible numbers of members.
        length: IntervalDomain,
    },
}

/// The content of bytes of an object that were never written.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum Fill {
    /// The bytes are uninitialized.
    Uninitialized,
    /// The bytes are zero (e.g. `calloc` objects and global variables).
    Zeroed,
    /// Nothing is known about the bytes.
    Unknown,
}

impl Fill {
    /// The value read from bytes with this fill.
    pub fn value(&self, size: ByteSize) -> Value {
        match self {
            Fill::Uninitialized => Value::uninitialized(size),
            Fill::Zeroed => Value::scalar(0, size),
            Fill::Unknown => Value::Top(size),
        }
    }
}

/// A memory object (or a list segment of memory objects) of a disjunct.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct HeapObject {
    /// The storage class of the object.
    pub storage: Storage,
    /// The validity of the object.
    pub validity: Validity,
    /// The size of the object in bytes. Bounds checks use the lower bound.
    pub size: IntervalDomain,
    /// Single object or list segment.
    pub kind: ObjectKind,
    /// The known field values indexed by byte offset.
    pub fields: MemRegion<Value>,
    /// The content of bytes without a known field value.
    pub fill: Fill,
    /// The allocating statement, if the object was allocated by the program.
    pub origin: Option<Tid>,
}

impl HeapObject {
    /// Create a new live object.
    pub fn new(storage: Storage, size: IntervalDomain, fill: Fill) -> HeapObject {
        HeapObject {
            storage,
            validity: Validity::Live,
            size,
            kind: ObjectKind::Region,
            fields: MemRegion::new(),
            fill,
            origin: None,
        }
    }

    /// Set the allocation site of the object.
    pub fn with_origin(mut self, origin: Tid) -> HeapObject {
        self.origin = Some(origin);
        self
    }

    /// Returns true if the object is a list segment.
    pub fn is_segment(&self) -> bool {
        matches!(self.kind, ObjectKind::Segment { .. })
    }

    /// The number of concrete objects represented by this object.
    pub fn length(&self) -> IntervalDomain {
        match &self.kind {
            ObjectKind::Region => IntervalDomain::from(1),
            ObjectKind::Segment { length, .. } => length.clone(),
        }
    }

    /// Returns true if the object may have to be freed by the program,
    /// i.e. it is a live heap object or a live heap segment that may be non-empty.
    pub fn may_leak(&self) -> bool {
        self.storage == Storage::Heap
            && self.validity == Validity::Live
            && self.length().end() > 0
    }

    /// The smallest size of the object, used for bounds checks.
    pub fn min_size(&self) -> i64 {
        self.size.start().max(0)
    }

    /// Read the value of the given size at an exactly known offset.
    pub fn read_at(&self, offset: i64, size: ByteSize) -> Value {
        self.fields
            .get(offset, size)
            .unwrap_or_else(|| self.fill.value(size))
    }

    /// Read a value of the given size at a possibly imprecise offset.
    pub fn read(&self, offset: &IntervalDomain, size: ByteSize) -> Value {
        if let Some(offset) = offset.try_to_value() {
            return self.read_at(offset, size);
        }
        match stride_positions(offset) {
            Some(positions) => {
                let mut values = positions.map(|position| self.read_at(position, size));
                let Some(first) = values.next() else {
                    return Value::Top(size);
                };
                values.fold(first, |acc, value| acc.weak_merge(&value))
            }
            None => Value::Top(size),
        }
    }

    /// Write a value at an exactly known offset.
    pub fn write_at(&mut self, offset: i64, value: Value) {
        self.fields.insert_at_byte_index(value, offset);
    }

    /// Write a value at a possibly imprecise offset.
    ///
    /// Imprecise writes are weak updates: each possible position keeps its old value as an alternative.
    /// If there are too many positions the content of the whole touched range is forgotten.
    pub fn write(&mut self, offset: &IntervalDomain, value: Value) {
        if let Some(offset) = offset.try_to_value() {
            return self.write_at(offset, value);
        }
        let size = value.bytesize();
        match stride_positions(offset) {
            Some(positions) => {
                for position in positions {
                    let merged = self.read_at(position, size).weak_merge(&value);
                    self.fields.insert_at_byte_index(merged, position);
                }
            }
            None => {
                let start = offset.start().max(0);
                let end = offset.end().min(self.size.end().max(start));
                self.fields.mark_interval_values_as_top(start, end, size);
                self.fill = Fill::Unknown;
            }
        }
    }

    /// Copy all field values of the byte range `source_offset..source_offset + size` of `source`
    /// into `self` starting at `target_offset`.
    /// Gaps of the source are copied as their fill value.
    pub fn copy_from(
        &mut self,
        source: &HeapObject,
        source_offset: i64,
        target_offset: i64,
        size: i64,
    ) {
        self.fields.clear_interval(target_offset, size);
        if source.fill != self.fill && size > 0 {
            // The gaps of the source have to be made explicit in the target.
            let mut position = source_offset;
            for (field_offset, value) in source.fields.iter() {
                if *field_offset >= source_offset + size {
                    break;
                }
                if *field_offset > position {
                    self.write_gap(
                        source.fill,
                        target_offset + position - source_offset,
                        *field_offset - position,
                    );
                }
                position = position.max(*field_offset + value.bytesize().as_offset());
            }
            if position < source_offset + size {
                self.write_gap(
                    source.fill,
                    target_offset + position - source_offset,
                    source_offset + size - position,
                );
            }
        }
        for (field_offset, value) in source.fields.iter() {
            let end = *field_offset + value.bytesize().as_offset();
            if *field_offset >= source_offset && end <= source_offset + size {
                let position = target_offset + field_offset - source_offset;
                self.fields.insert_at_byte_index(value.clone(), position);
            }
        }
    }

    /// Mark a byte range as holding the given fill.
    fn write_gap(&mut self, fill: Fill, offset: i64, size: i64) {
        if size <= 0 {
            return;
        }
        let value = match fill {
            Fill::Uninitialized => Value::uninitialized(ByteSize::new(size as u64)),
            Fill::Zeroed if size <= 8 => Value::scalar(0, ByteSize::new(size as u64)),
            Fill::Zeroed | Fill::Unknown => Value::Top(ByteSize::new(size as u64)),
        };
        self.fields.insert_at_byte_index(value, offset);
    }

    /// Mark the object as freed. The content of a freed object is irrelevant.
    pub fn free(&mut self) {
        self.validity = Validity::Freed;
        self.fields.clear();
        self.fill = Fill::Unknown;
    }

    /// Mark the object as belonging to a dead stack frame.
    pub fn kill(&mut self) {
        self.validity = Validity::Wild;
        self.fields.clear();
        self.fill = Fill::Unknown;
    }

    /// Replace every integer field by an unknown integer.
    /// Pointer fields are kept.
    pub fn havoc_scalars(&mut self) {
        for value in self.fields.values_mut() {
            match value {
                Value::Scalar { size, .. } | Value::Indeterminate { size, .. } => {
                    *value = Value::unknown_scalar(*size)
                }
                Value::Pointer { .. } | Value::Top(_) => (),
            }
        }
        if self.fill == Fill::Uninitialized {
            self.fill = Fill::Unknown;
        }
    }

    /// The objects referenced by the fields of the object, in the order of the field offsets.
    pub fn referenced_objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.fields
            .values()
            .filter_map(|value| value.referenced_object())
    }

    /// Rename all referenced objects according to the given map.
    pub fn rename_objects(&mut self, map: &impl Fn(ObjectId) -> Option<ObjectId>) {
        if self.referenced_objects().next().is_none() {
            return;
        }
        for value in self.fields.values_mut() {
            value.rename_objects(map);
        }
    }
}

/// All positions of a strided offset interval if there are not too many of them.
fn stride_positions(offset: &IntervalDomain) -> Option<impl Iterator<Item = i64>> {
    let interval = offset.interval();
    if !interval.is_bounded() {
        return None;
    }
    let stride = interval.stride.max(1) as i64;
    let count = interval
        .end
        .checked_sub(interval.start)?
        .checked_div(stride)?
        .checked_add(1)?;
    if count > MAX_WEAK_UPDATE_POSITIONS {
        return None;
    }
    let start = interval.start;
    Some((0..count).map(move |index| start + index * stride))
}

impl ToJsonCompact for HeapObject {
    fn to_json_compact(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        object.insert(
            "storage".into(),
            serde_json::Value::String(format!("{:?}", self.storage)),
        );
        object.insert(
            "validity".into(),
            serde_json::Value::String(format!("{:?}", self.validity)),
        );
        object.insert(
            "size".into(),
            serde_json::Value::String(self.size.to_string()),
        );
        if let ObjectKind::Segment {
            next_offset,
            prev_offset,
            length,
        } = &self.kind
        {
            let links = match prev_offset {
                Some(prev_offset) => format!("next@{} prev@{}", next_offset, prev_offset),
                None => format!("next@{}", next_offset),
            };
            object.insert(
                "segment".into(),
                serde_json::Value::String(format!("{} len {}", links, length)),
            );
        }
        object.insert(
            "fill".into(),
            serde_json::Value::String(format!("{:?}", self.fill)),
        );
        object.insert("fields".into(), self.fields.to_json_compact());
        serde_json::Value::Object(object)
    }
}
