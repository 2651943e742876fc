use std::sync::Arc;

use crate::hack::Injector;

/// Recommended maximum recursion depth if not otherwise specified.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Configuration for a VM.
///
/// Use `VmConfig::default()` for the process-wide injector and default
/// limits, or build a custom configuration with the builder pattern.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Maximum recursion depth (frame stack depth).
    pub max_recursion_depth: usize,
    /// Whether the VM delivers monitoring events.
    ///
    /// With-hacks need monitoring; without it entering one fails.
    pub monitoring: bool,
    /// Injector used for trace hooks, along with the monitoring switch it drives.
    pub injector: Arc<Injector>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            monitoring: true,
            injector: Injector::global(),
        }
    }
}

impl VmConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum recursion depth.
    #[must_use]
    pub fn max_recursion_depth(mut self, limit: usize) -> Self {
        self.max_recursion_depth = limit;
        self
    }

    /// Enables or disables monitoring support.
    #[must_use]
    pub fn monitoring(mut self, enabled: bool) -> Self {
        self.monitoring = enabled;
        self
    }

    /// Uses `injector` (and its monitoring switch) instead of the process-wide one.
    #[must_use]
    pub fn injector(mut self, injector: Arc<Injector>) -> Self {
        self.injector = injector;
        self
    }
}
