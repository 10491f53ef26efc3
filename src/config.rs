//! Runtime configuration.
//!
//! All knobs are fixed when the runtime is constructed. The builder methods
//! are `const` so a configured runtime can live in a `static`.

/// Default stack size for threads spawned with `stack_size == 0`.
pub const DEFAULT_STACK_SIZE: usize = 4096;

/// Default upper bound on the number of live thread control blocks.
pub const DEFAULT_MAX_THREADS: usize = 32;

/// Runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum number of live threads, including the main thread.
    pub max_threads: usize,
    /// Stack size used when a spawn request asks for `0` bytes.
    pub default_stack_size: usize,
    /// Total bytes the stack pool may hand out, `None` for no limit.
    pub stack_budget: Option<usize>,
    /// Write a canary at the low end of each stack and check it whenever the
    /// thread suspends.
    pub stack_canary: bool,
}

impl RuntimeConfig {
    pub const fn new() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            default_stack_size: DEFAULT_STACK_SIZE,
            stack_budget: None,
            stack_canary: true,
        }
    }

    pub const fn max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub const fn default_stack_size(mut self, size: usize) -> Self {
        self.default_stack_size = size;
        self
    }

    pub const fn stack_budget(mut self, bytes: usize) -> Self {
        self.stack_budget = Some(bytes);
        self
    }

    pub const fn stack_canary(mut self, enabled: bool) -> Self {
        self.stack_canary = enabled;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_is_const() {
        const CONFIG: RuntimeConfig = RuntimeConfig::new()
            .max_threads(8)
            .default_stack_size(1024)
            .stack_budget(16 * 1024);

        assert_eq!(CONFIG.max_threads, 8);
        assert_eq!(CONFIG.default_stack_size, 1024);
        assert_eq!(CONFIG.stack_budget, Some(16 * 1024));
        assert!(CONFIG.stack_canary);
    }
}
