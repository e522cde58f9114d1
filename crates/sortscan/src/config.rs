use serde::{Deserialize, Serialize};

/// Engine-wide settings shared by every sort and scan handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Create internal exec queues with profiling enabled.
    pub profiling: bool,
    /// Check the output of host-data entry points before returning.
    pub verify_results: bool,
    /// Maximum local size used when a call does not cap it. `None` lets the
    /// device suggest one.
    pub default_max_local_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profiling: false,
            verify_results: false,
            default_max_local_size: None,
        }
    }
}

impl EngineConfig {
    pub fn with_verification(mut self) -> Self {
        self.verify_results = true;
        self
    }

    pub fn with_max_local_size(mut self, lws: usize) -> Self {
        self.default_max_local_size = Some(lws);
        self
    }

    /// Resolves a per-call cap against the configured default; zero means "unset".
    pub(crate) fn lws_max(&self, requested: Option<usize>) -> usize {
        requested
            .or(self.default_max_local_size)
            .unwrap_or(0)
    }
}
