//! Memory reclamation hook invoked between downloaded entries.

/// Frees memory between download steps.
///
/// Hosts have nothing to do here. Embedded integrations can trigger a
/// garbage collection or release pooled buffers.
#[cfg_attr(test, mockall::automock)]
pub trait MemoryReclaim {
    /// Reclaim whatever memory can be released right now.
    fn reclaim(&self);
}

/// Reclaim hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReclaim;

impl MemoryReclaim for NoopReclaim {
    fn reclaim(&self) {}
}
