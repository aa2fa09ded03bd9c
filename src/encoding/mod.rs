pub mod format;
pub mod keycode;

use serde::{Deserialize, Serialize};

/// A single typed field of a structured index key.
///
/// Fields of different types sort by type tag: booleans before integers
/// before floats before strings before raw bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

/// A structured index key: an ordered list of typed fields.
pub type IndexKey = Vec<Datum>;

/// Sort direction for one key field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Per-field sort directions for an index. Fields beyond the configured
/// directions sort ascending.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyOrdering {
    directions: Vec<Direction>,
}

impl KeyOrdering {
    /// An ordering sorting every field ascending.
    pub fn ascending() -> Self {
        Self::default()
    }

    /// An ordering with the given per-field directions.
    pub fn of(directions: Vec<Direction>) -> Self {
        Self { directions }
    }

    /// The direction of field `index`.
    pub fn direction(&self, index: usize) -> Direction {
        self.directions.get(index).copied().unwrap_or_default()
    }
}
