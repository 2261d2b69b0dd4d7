use crate::abstract_domain::{IntervalDomain, ObjectId, SizedDomain};
use crate::intermediate_representation::{ByteSize, POINTER_SIZE};
use crate::prelude::*;
use crate::utils::debug::ToJsonCompact;

/// The abstract value of a variable or of a field of a memory object.
///
/// Values are a tagged union over the kinds of values the engine distinguishes.
/// Each operation on values has to handle all kinds explicitly.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum Value {
    /// An integer value in the given interval.
    Scalar {
        /// The possible values.
        interval: IntervalDomain,
        /// The size of the value.
        size: ByteSize,
    },
    /// A pointer to an object (or `NULL`) with an offset relative to the start of the object.
    Pointer {
        /// The object pointed to.
        target: PointerTarget,
        /// The byte offset relative to the start of the target.
        offset: IntervalDomain,
    },
    /// A value that must not be used, e.g. an uninitialized value.
    Indeterminate {
        /// Why the value is indeterminate.
        cause: Indeterminacy,
        /// The size of the value.
        size: ByteSize,
    },
    /// A completely unknown value.
    Top(ByteSize),
}

/// The target of a pointer value.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum PointerTarget {
    /// The `NULL` pointer.
    Null,
    /// A memory object of the symbolic heap.
    /// For a list segment this is its first member.
    Object(ObjectId),
    /// The last member of a doubly linked list segment.
    /// For an object that is not a segment this is the same as `Object`.
    Last(ObjectId),
    /// Either `NULL` or the given object.
    /// Created when a `NULL` pointer and a pointer to an object are joined coarsely.
    MaybeNull(ObjectId),
}

impl PointerTarget {
    /// The object of the target, if there may be one.
    pub fn object(&self) -> Option<ObjectId> {
        match self {
            PointerTarget::Null => None,
            PointerTarget::Object(id) | PointerTarget::Last(id) | PointerTarget::MaybeNull(id) => {
                Some(*id)
            }
        }
    }

    /// The object of the target, if the target is certainly not `NULL`.
    pub fn certain_object(&self) -> Option<ObjectId> {
        match self {
            PointerTarget::Object(id) | PointerTarget::Last(id) => Some(*id),
            PointerTarget::Null | PointerTarget::MaybeNull(_) => None,
        }
    }

    /// The same kind of target for another object.
    pub fn with_object(&self, id: ObjectId) -> PointerTarget {
        match self {
            PointerTarget::Null => PointerTarget::Null,
            PointerTarget::Object(_) => PointerTarget::Object(id),
            PointerTarget::Last(_) => PointerTarget::Last(id),
            PointerTarget::MaybeNull(_) => PointerTarget::MaybeNull(id),
        }
    }
}

/// The reason why a value is indeterminate.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum Indeterminacy {
    /// The value was never initialized.
    Uninitialized,
    /// The value was clobbered by a `longjmp` back to a `setjmp` call.
    Stale,
}

impl Value {
    /// An exactly known integer.
    pub fn scalar(value: i64, size: ByteSize) -> Value {
        Value::Scalar {
            interval: value.into(),
            size,
        }
    }

    /// An integer about which nothing is known.
    pub fn unknown_scalar(size: ByteSize) -> Value {
        Value::Scalar {
            interval: IntervalDomain::new_top(),
            size,
        }
    }

    /// The `NULL` pointer.
    pub fn null() -> Value {
        Value::Pointer {
            target: PointerTarget::Null,
            offset: 0.into(),
        }
    }

    /// A pointer to the given object with an exactly known offset.
    pub fn pointer(target: ObjectId, offset: i64) -> Value {
        Value::Pointer {
            target: PointerTarget::Object(target),
            offset: offset.into(),
        }
    }

    /// An uninitialized value.
    pub fn uninitialized(size: ByteSize) -> Value {
        Value::Indeterminate {
            cause: Indeterminacy::Uninitialized,
            size,
        }
    }

    /// Returns true if the value is certainly the `NULL` pointer (or the integer zero).
    pub fn is_null(&self) -> bool {
        match self {
            Value::Pointer {
                target: PointerTarget::Null,
                offset,
            } => offset.try_to_value() == Some(0),
            Value::Scalar { interval, .. } => interval.try_to_value() == Some(0),
            _ => false,
        }
    }

    /// A pointer to the last member of the given segment with an exactly known offset.
    pub fn last_member(target: ObjectId, offset: i64) -> Value {
        Value::Pointer {
            target: PointerTarget::Last(target),
            offset: offset.into(),
        }
    }

    /// Return the object that the value points to, if it is a pointer that may point to an object.
    pub fn referenced_object(&self) -> Option<ObjectId> {
        match self {
            Value::Pointer { target, .. } => target.object(),
            _ => None,
        }
    }

    /// Return the object that the value points to, if it certainly points to an object.
    pub fn certain_object(&self) -> Option<ObjectId> {
        match self {
            Value::Pointer { target, .. } => target.certain_object(),
            _ => None,
        }
    }

    /// Replace the object that the value points to according to the given map.
    /// Pointers to objects missing in the map are kept unchanged.
    pub fn rename_objects(&mut self, map: &impl Fn(ObjectId) -> Option<ObjectId>) {
        if let Value::Pointer { target, .. } = self {
            if let Some(new_id) = target.object().and_then(map) {
                *target = target.with_object(new_id);
            }
        }
    }

    /// Convert an integer zero to the `NULL` pointer.
    /// Used when a value is loaded into a pointer-typed variable.
    pub fn into_pointer_if_zero(self) -> Value {
        match self {
            Value::Scalar { interval, size }
                if size == POINTER_SIZE && interval.try_to_value() == Some(0) =>
            {
                Value::null()
            }
            value => value,
        }
    }

    /// Return the same kind of value with a different size.
    /// Used for values read with a size that differs from the stored value.
    pub fn resized(&self, size: ByteSize) -> Value {
        match self {
            Value::Indeterminate { cause, .. } => Value::Indeterminate {
                cause: *cause,
                size,
            },
            _ if self.bytesize() == size => self.clone(),
            Value::Scalar { .. } => Value::unknown_scalar(size),
            _ => Value::Top(size),
        }
    }

    /// Interpret the value as a condition.
    /// Returns `None` if the value may be both zero and non-zero.
    pub fn truth_value(&self) -> Option<bool> {
        match self {
            Value::Scalar { interval, .. } => interval.truth_value(),
            Value::Pointer {
                target: PointerTarget::Null,
                offset,
            } => offset.truth_value(),
            Value::Pointer {
                target: PointerTarget::Object(_) | PointerTarget::Last(_),
                ..
            } => Some(true),
            Value::Pointer {
                target: PointerTarget::MaybeNull(_),
                ..
            }
            | Value::Indeterminate { .. }
            | Value::Top(_) => None,
        }
    }

    /// The integer represented by the value if it is an integer or an offset relative to `NULL`.
    pub fn as_integer(&self) -> Option<&IntervalDomain> {
        match self {
            Value::Scalar { interval, .. } => Some(interval),
            Value::Pointer {
                target: PointerTarget::Null,
                offset,
            } => Some(offset),
            _ => None,
        }
    }

    /// Merge two values that may both be stored at the same location.
    ///
    /// Used for writes and reads at imprecisely known offsets.
    /// Pointers are never merged, since that would lose track of their targets.
    pub fn weak_merge(&self, other: &Value) -> Value {
        match (self, other) {
            _ if self == other => self.clone(),
            (
                Value::Scalar { interval, size },
                Value::Scalar {
                    interval: other_interval,
                    size: other_size,
                },
            ) if size == other_size => Value::Scalar {
                interval: interval.signed_merge(other_interval),
                size: *size,
            },
            _ => Value::Top(self.bytesize()),
        }
    }
}

impl SizedDomain for Value {
    fn bytesize(&self) -> ByteSize {
        match self {
            Value::Scalar { size, .. } | Value::Indeterminate { size, .. } | Value::Top(size) => {
                *size
            }
            Value::Pointer { .. } => POINTER_SIZE,
        }
    }

    fn new_top(bytesize: ByteSize) -> Value {
        Value::Top(bytesize)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Scalar { interval, size } => write!(formatter, "{}:i{}", interval, size),
            Value::Pointer {
                target: PointerTarget::Null,
                offset,
            } => write!(formatter, "NULL+{}", offset),
            Value::Pointer {
                target: PointerTarget::Object(id),
                offset,
            } => write!(formatter, "{}+{}", id, offset),
            Value::Pointer {
                target: PointerTarget::Last(id),
                offset,
            } => write!(formatter, "last({})+{}", id, offset),
            Value::Pointer {
                target: PointerTarget::MaybeNull(id),
                offset,
            } => write!(formatter, "{}?+{}", id, offset),
            Value::Indeterminate {
                cause: Indeterminacy::Uninitialized,
                ..
            } => write!(formatter, "uninit"),
            Value::Indeterminate {
                cause: Indeterminacy::Stale,
                ..
            } => write!(formatter, "stale"),
            Value::Top(_) => write!(formatter, "Top"),
        }
    }
}

impl ToJsonCompact for Value {
    fn to_json_compact(&self) -> serde_json::Value {
        serde_json::Value::String(self.to_string())
    }
}
