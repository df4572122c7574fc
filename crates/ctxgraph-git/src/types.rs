use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchOptions {
    /// Repeated events of the same kind for the same path within this
    /// window are dropped.
    pub debounce_ms: u64,
    pub ignore_dot_git: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            ignore_dot_git: true,
        }
    }
}
