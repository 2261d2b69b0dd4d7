use crate::prelude::*;

/// A term identifier consisting of an ID string (which is required to be unique)
/// and an address to indicate where the term is located in the source program.
///
/// Comparisons only look at the ID string, the address is informational.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Tid {
    /// The unique ID of the term.
    id: String,
    /// The source location of the term, e.g. `file.c:12`.
    pub address: String,
}

impl Tid {
    /// Generate a new term identifier with the given ID string
    /// and with unknown source location.
    pub fn new<T: ToString>(val: T) -> Tid {
        Tid {
            id: val.to_string(),
            address: "UNKNOWN".to_string(),
        }
    }

    /// Set the source location of the term identifier.
    pub fn with_address(self, address: impl ToString) -> Tid {
        Tid {
            id: self.id,
            address: address.to_string(),
        }
    }

    /// Add a suffix to the ID string and return the new `Tid`
    pub fn with_id_suffix(self, suffix: &str) -> Self {
        Tid {
            id: self.id + suffix,
            address: self.address,
        }
    }

    /// Get the ID string of the term identifier.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl PartialEq for Tid {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Tid {}

impl std::hash::Hash for Tid {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl PartialOrd for Tid {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tid {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::fmt::Display for Tid {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "{}", self.id)
    }
}

/// A term is an object inside a program with a source location and an unique ID (both contained in the `tid`).
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Term<T> {
    /// The term identifier, which also contains the source location of the term
    pub tid: Tid,
    /// The object
    pub term: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tid_suffix_and_address() {
        let tid = Tid::new("blk_1").with_address("list.c:7");
        let suffixed = tid.clone().with_id_suffix("_exit");
        assert_eq!(suffixed.id(), "blk_1_exit");
        assert_eq!(suffixed.address, "list.c:7");
        assert_eq!(format!("{}", tid), "blk_1");
        assert!(Tid::new("a") < Tid::new("b"));
        assert_eq!(tid, Tid::new("blk_1"));
    }
}
