use super::ThreadHandle;
use crate::arch::Arch;
use crate::errors::CothreadResult;
use crate::kernel::Runtime;
use alloc::boxed::Box;
use alloc::string::String;

/// Spawn options for a new thread.
#[derive(Debug, Clone, Default)]
pub struct ThreadBuilder {
    pub(crate) stack_size: usize,
    pub(crate) detached: bool,
    pub(crate) name: Option<String>,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self {
            stack_size: 0,
            detached: false,
            name: None,
        }
    }

    /// Requested stack size in bytes. `0` selects the runtime default.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Spawn `f` on `runtime`. Its return value becomes the exit code.
    pub fn spawn_on<A, F>(self, runtime: &Runtime<A>, f: F) -> CothreadResult<ThreadHandle>
    where
        A: Arch,
        F: FnOnce() -> i32 + Send + 'static,
    {
        runtime.spawn_with(self, Box::new(f))
    }
}
