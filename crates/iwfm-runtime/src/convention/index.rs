//! Location numbering
//!
//! Callers number locations from 1. Internally they are 0-based, and the
//! engine sees them shifted to its own base.

use crate::error::{IwfmError, IwfmResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Index base the engine uses for location numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBase {
    Zero,
    /// Fortran-style numbering, used by IWFM
    #[default]
    One,
}

impl IndexBase {
    pub fn offset(&self) -> i32 {
        match self {
            IndexBase::Zero => 0,
            IndexBase::One => 1,
        }
    }
}

impl FromStr for IndexBase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "zero" => Ok(IndexBase::Zero),
            "1" | "one" => Ok(IndexBase::One),
            other => Err(format!("index base must be 0 or 1, got '{}'", other)),
        }
    }
}

impl fmt::Display for IndexBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.offset())
    }
}

/// A validated location within a source of `count` locations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocationIndex {
    internal: usize,
    count: usize,
}

impl LocationIndex {
    /// From a caller-facing 1-based number
    pub fn from_external(number: i64, count: usize) -> IwfmResult<Self> {
        if number < 1 || number as u64 > count as u64 {
            return Err(IwfmError::InvalidQuery(format!(
                "location {} outside [1, {}]",
                number, count
            )));
        }
        Ok(Self {
            internal: number as usize - 1,
            count,
        })
    }

    /// From a 0-based position
    pub fn from_internal(index: usize, count: usize) -> IwfmResult<Self> {
        if index >= count {
            return Err(IwfmError::InvalidQuery(format!(
                "location index {} outside [0, {})",
                index, count
            )));
        }
        Ok(Self {
            internal: index,
            count,
        })
    }

    pub fn external(&self) -> usize {
        self.internal + 1
    }

    pub fn internal(&self) -> usize {
        self.internal
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// The last location, which the engine uses for whole-model totals
    pub fn is_aggregate(&self) -> bool {
        self.internal + 1 == self.count
    }

    /// Number written into a foreign buffer
    pub fn to_foreign(&self, base: IndexBase) -> i32 {
        // count comes from the engine as an int32, so this cannot overflow
        self.internal as i32 + base.offset()
    }
}

impl fmt::Display for LocationIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.external(), self.count)
    }
}
