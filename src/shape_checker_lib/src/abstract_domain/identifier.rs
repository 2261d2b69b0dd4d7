use crate::prelude::*;

/// A handle identifying a memory object inside one symbolic heap.
///
/// Object identifiers are only meaningful relative to the heap that allocated them.
/// Two heaps may use the same identifier for unrelated objects;
/// comparing heaps therefore always goes through a canonical numbering of their objects.
#[derive(
    Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Default,
)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// Return the identifier following `self` in allocation order.
    pub fn next(self) -> ObjectId {
        ObjectId(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "obj_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_order() {
        let first = ObjectId::default();
        assert_eq!(first.next(), ObjectId(1));
        assert!(first < first.next());
        assert_eq!(format!("{}", ObjectId(7)), "obj_7");
    }
}
