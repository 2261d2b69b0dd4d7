use super::{ByteSize, POINTER_SIZE};
use crate::prelude::*;
use std::collections::BTreeMap;
use std::fmt::Display;

/// Arrays with more elements are not split into their elements by [`DataType::leaf_fields`].
const MAX_EXPANDED_ARRAY_ELEMENTS: u64 = 64;

/// A variable of the analyzed program.
///
/// Every variable (including function parameters) is addressable,
/// i.e. the analysis represents it as a stack or static memory object.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct Variable {
    /// The name of the variable. Unique inside its function (or among global variables).
    pub name: String,
    /// The declared type of the variable.
    pub data_type: DataType,
    /// Set to `true` if the variable is declared `volatile`.
    /// Only relevant for the values of local variables after a `longjmp`.
    pub is_volatile: bool,
}

impl Variable {
    /// Create a new non-volatile variable.
    pub fn new(name: impl ToString, data_type: DataType) -> Variable {
        Variable {
            name: name.to_string(),
            data_type,
            is_volatile: false,
        }
    }

    /// Mark the variable as `volatile`.
    pub fn volatile(mut self) -> Variable {
        self.is_volatile = true;
        self
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.data_type)?;
        if self.is_volatile {
            write!(f, "(volatile)")?;
        }
        Ok(())
    }
}

/// The type of a variable, a struct field or a memory access.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub enum DataType {
    /// An integer of the given size.
    Integer(ByteSize),
    /// A pointer to a value of the given type.
    Pointer(Box<DataType>),
    /// A struct with the given name. Its layout is stored in the [`Program`](super::Program).
    Struct(String),
    /// An array with elements of the given type and the given number of elements.
    Array(Box<DataType>, u64),
    /// The `void` type. Only valid as pointer target type.
    Void,
}

/// The memory layout of a struct type.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct StructLayout {
    /// The total size of the struct including padding.
    pub size: ByteSize,
    /// The fields of the struct ordered by their offsets.
    pub fields: Vec<StructField>,
}

/// A field of a struct.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct StructField {
    /// The name of the field.
    pub name: String,
    /// The byte offset of the field inside the struct.
    pub offset: ByteSize,
    /// The type of the field.
    pub data_type: DataType,
}

impl DataType {
    /// Shorthand for a pointer to the given type.
    pub fn pointer_to(target: DataType) -> DataType {
        DataType::Pointer(Box::new(target))
    }

    /// Returns `true` for pointer types.
    pub fn is_pointer(&self) -> bool {
        matches!(self, DataType::Pointer(_))
    }

    /// Returns `true` for struct and array types.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, DataType::Struct(_) | DataType::Array(..))
    }

    /// Compute the size of a value of this type.
    /// Returns an error for unknown struct names and for `void`.
    pub fn size(&self, structs: &BTreeMap<String, StructLayout>) -> Result<ByteSize, Error> {
        match self {
            DataType::Integer(size) => Ok(*size),
            DataType::Pointer(_) => Ok(POINTER_SIZE),
            DataType::Struct(name) => structs
                .get(name)
                .map(|layout| layout.size)
                .ok_or_else(|| anyhow!("Unknown struct type {}", name)),
            DataType::Array(elem, count) => Ok(elem.size(structs)? * *count),
            DataType::Void => Err(anyhow!("The void type has no size")),
        }
    }

    /// Flatten the type into its non-aggregate parts.
    /// Returns the list of `(offset, type)` pairs of all scalar and pointer components
    /// ordered by their offset.
    ///
    /// Arrays with too many elements stay in one piece,
    /// so callers have to handle array leaves as opaque byte ranges.
    pub fn leaf_fields(
        &self,
        structs: &BTreeMap<String, StructLayout>,
    ) -> Result<Vec<(i64, DataType)>, Error> {
        let mut leaves = Vec::new();
        self.collect_leaf_fields(structs, 0, &mut leaves)?;
        Ok(leaves)
    }

    fn collect_leaf_fields(
        &self,
        structs: &BTreeMap<String, StructLayout>,
        base: i64,
        leaves: &mut Vec<(i64, DataType)>,
    ) -> Result<(), Error> {
        match self {
            DataType::Integer(_) | DataType::Pointer(_) => leaves.push((base, self.clone())),
            DataType::Struct(name) => {
                let layout = structs
                    .get(name)
                    .ok_or_else(|| anyhow!("Unknown struct type {}", name))?;
                for field in layout.fields.iter() {
                    field.data_type.collect_leaf_fields(
                        structs,
                        base + field.offset.as_offset(),
                        leaves,
                    )?;
                }
            }
            DataType::Array(_, count) if *count > MAX_EXPANDED_ARRAY_ELEMENTS => {
                leaves.push((base, self.clone()))
            }
            DataType::Array(elem, count) => {
                let elem_size = elem.size(structs)?.as_offset();
                for index in 0..(*count as i64) {
                    elem.collect_leaf_fields(structs, base + index * elem_size, leaves)?;
                }
            }
            DataType::Void => return Err(anyhow!("The void type has no fields")),
        }
        Ok(())
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Integer(size) => write!(f, "i{}", u64::from(*size) * 8),
            DataType::Pointer(target) => write!(f, "{}*", target),
            DataType::Struct(name) => write!(f, "struct {}", name),
            DataType::Array(elem, count) => write!(f, "{}[{}]", elem, count),
            DataType::Void => write!(f, "void"),
        }
    }
}
