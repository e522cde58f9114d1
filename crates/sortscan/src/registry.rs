//! Name-based lookup of algorithm families.
//!
//! Each family (sort, scan) is a closed enum of strategy tags. A handle resolves
//! its tag once, at construction, and keeps the bound strategy from then on.

use strum::IntoEnumIterator;

use crate::error::{Error, Result};

pub trait Algorithm: Copy + std::fmt::Debug + IntoEnumIterator + 'static {
    /// Family label used in error messages ("sort", "scan").
    const FAMILY: &'static str;

    fn name(&self) -> &'static str;

    /// Exact, case-sensitive lookup by name.
    fn resolve(name: &str) -> Result<Self> {
        Self::iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| Error::UnknownAlgorithm {
                family: Self::FAMILY,
                name: name.to_string(),
            })
    }

    fn names() -> Vec<&'static str> {
        Self::iter().map(|a| a.name()).collect()
    }
}
