use std::str::FromStr;

use crate::error::{Error, Result};

/// Bounds of the private-memory step options.
pub const MIN_PRIVATE_STEPS: u32 = 1;
pub const MAX_PRIVATE_STEPS: u32 = 4;

/// Tuning of the advanced bitonic sort.
///
/// | key      | range | default      | meaning                                        |
/// |----------|-------|--------------|------------------------------------------------|
/// | `minps`  | 1..=4 | 1            | fewest steps fused in private memory           |
/// | `maxps`  | 1..=4 | 4            | most steps fused in private memory, >= `minps` |
/// | `maxsfs` | any   | `u32::MAX`   | largest step a single launch may finish from   |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbitonicOptions {
    pub minps: u32,
    pub maxps: u32,
    pub maxsfs: u32,
}

impl Default for AbitonicOptions {
    fn default() -> Self {
        Self {
            minps: MIN_PRIVATE_STEPS,
            maxps: MAX_PRIVATE_STEPS,
            maxsfs: u32::MAX,
        }
    }
}

impl AbitonicOptions {
    pub fn validate(&self) -> Result<()> {
        for (key, v) in [("minps", self.minps), ("maxps", self.maxps)] {
            if !(MIN_PRIVATE_STEPS..=MAX_PRIVATE_STEPS).contains(&v) {
                return Err(Error::invalid(format!(
                    "option '{key}' must be between {MIN_PRIVATE_STEPS} and {MAX_PRIVATE_STEPS}, got {v}"
                )));
            }
        }
        if self.maxps < self.minps {
            return Err(Error::invalid(format!(
                "'maxps' ({}) must not be lower than 'minps' ({})",
                self.maxps, self.minps
            )));
        }
        Ok(())
    }
}

/// Parses comma-separated `key=value` pairs. Empty tokens are skipped, so
/// `""` yields the defaults.
impl FromStr for AbitonicOptions {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut opts = Self::default();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let parts: Vec<&str> = token.split('=').collect();
            let [key, value] = parts.as_slice() else {
                return Err(Error::invalid(format!("invalid option token '{token}'")));
            };
            let (key, value) = (key.trim(), value.trim());
            let parsed: u32 = value.parse().map_err(|_| {
                Error::invalid(format!("option '{key}' expects an integer, got '{value}'"))
            })?;
            match key {
                "minps" => opts.minps = parsed,
                "maxps" => opts.maxps = parsed,
                "maxsfs" => opts.maxsfs = parsed,
                other => return Err(Error::invalid(format!("unknown option '{other}'"))),
            }
        }
        opts.validate()?;
        Ok(opts)
    }
}
