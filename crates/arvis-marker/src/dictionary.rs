use std::fmt;
use std::str::FromStr;

use crate::error::MarkerError;

/// Predefined ArUco-style marker dictionaries.
///
/// A dictionary fixes the number of data bits per side and how many distinct
/// markers it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MarkerDictionary {
    /// 4x4 bits, 50 markers.
    Dict4X4_50,
    /// 4x4 bits, 100 markers.
    Dict4X4_100,
    /// 4x4 bits, 250 markers.
    Dict4X4_250,
    /// 4x4 bits, 1000 markers.
    Dict4X4_1000,
    /// 5x5 bits, 50 markers.
    Dict5X5_50,
    /// 5x5 bits, 100 markers.
    Dict5X5_100,
    /// 5x5 bits, 250 markers.
    Dict5X5_250,
    /// 5x5 bits, 1000 markers.
    Dict5X5_1000,
    /// 6x6 bits, 50 markers.
    Dict6X6_50,
    /// 6x6 bits, 100 markers.
    Dict6X6_100,
    /// 6x6 bits, 250 markers.
    #[default]
    Dict6X6_250,
    /// 6x6 bits, 1000 markers.
    Dict6X6_1000,
    /// 7x7 bits, 50 markers.
    Dict7X7_50,
    /// 7x7 bits, 100 markers.
    Dict7X7_100,
    /// 7x7 bits, 250 markers.
    Dict7X7_250,
    /// 7x7 bits, 1000 markers.
    Dict7X7_1000,
}

impl MarkerDictionary {
    /// Returns all predefined dictionaries.
    pub fn all() -> [Self; 16] {
        use MarkerDictionary::*;
        [
            Dict4X4_50,
            Dict4X4_100,
            Dict4X4_250,
            Dict4X4_1000,
            Dict5X5_50,
            Dict5X5_100,
            Dict5X5_250,
            Dict5X5_1000,
            Dict6X6_50,
            Dict6X6_100,
            Dict6X6_250,
            Dict6X6_1000,
            Dict7X7_50,
            Dict7X7_100,
            Dict7X7_250,
            Dict7X7_1000,
        ]
    }

    /// Data bits per marker side.
    pub fn bits(&self) -> usize {
        use MarkerDictionary::*;
        match self {
            Dict4X4_50 | Dict4X4_100 | Dict4X4_250 | Dict4X4_1000 => 4,
            Dict5X5_50 | Dict5X5_100 | Dict5X5_250 | Dict5X5_1000 => 5,
            Dict6X6_50 | Dict6X6_100 | Dict6X6_250 | Dict6X6_1000 => 6,
            Dict7X7_50 | Dict7X7_100 | Dict7X7_250 | Dict7X7_1000 => 7,
        }
    }

    /// Number of distinct markers.
    pub fn capacity(&self) -> usize {
        use MarkerDictionary::*;
        match self {
            Dict4X4_50 | Dict5X5_50 | Dict6X6_50 | Dict7X7_50 => 50,
            Dict4X4_100 | Dict5X5_100 | Dict6X6_100 | Dict7X7_100 => 100,
            Dict4X4_250 | Dict5X5_250 | Dict6X6_250 | Dict7X7_250 => 250,
            Dict4X4_1000 | Dict5X5_1000 | Dict6X6_1000 | Dict7X7_1000 => 1000,
        }
    }

    /// Blocks per marker side, the data bits plus a one block border on each side.
    pub fn blocks_per_marker(&self) -> usize {
        self.bits() + 2
    }
}

impl fmt::Display for MarkerDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DICT_{0}X{0}_{1}", self.bits(), self.capacity())
    }
}

impl FromStr for MarkerDictionary {
    type Err = MarkerError;

    /// Parse names like `DICT_6X6_250` or `6x6_250`, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("DICT_").unwrap_or(&upper);
        Self::all()
            .into_iter()
            .find(|d| d.to_string().strip_prefix("DICT_") == Some(name))
            .ok_or_else(|| MarkerError::UnknownDictionary(s.to_string()))
    }
}

/// Ordered candidate marker ids for a board.
///
/// Boards consume ids from the front of the pool in row-major cell order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPool {
    ids: Vec<u32>,
}

impl IdPool {
    /// Create a pool from explicit ids.
    pub fn new(ids: Vec<u32>) -> Self {
        Self { ids }
    }

    /// The ids `0..n`.
    pub fn sequential(n: usize) -> Self {
        Self {
            ids: (0..n as u32).collect(),
        }
    }

    /// Every id of a dictionary in ascending order.
    pub fn from_dictionary(dictionary: MarkerDictionary) -> Self {
        Self::sequential(dictionary.capacity())
    }

    /// The ids in pool order.
    pub fn as_slice(&self) -> &[u32] {
        &self.ids
    }

    /// Number of ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Check if the pool holds no id.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
