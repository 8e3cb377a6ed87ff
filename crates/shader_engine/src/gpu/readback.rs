//! Scoped access to readback memory

use std::ops::Deref;
use std::time::Duration;

use super::MappedMemory;

/// Timing of one submitted frame or dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Time the host spent blocked on the fence
    pub gpu_wait: Duration,
}

/// Mapped view of exactly one job's output
///
/// The bytes stay valid for the guard's lifetime; dropping it unmaps the
/// readback memory. Copy out anything that must outlive the guard.
pub struct ReadbackGuard<'a> {
    mapped: MappedMemory<'a>,
    len: usize,
    stats: FrameStats,
}

impl<'a> ReadbackGuard<'a> {
    pub(crate) fn new(mapped: MappedMemory<'a>, len: usize, stats: FrameStats) -> Self {
        debug_assert!(len <= mapped.as_slice().len());
        Self { mapped, len, stats }
    }

    /// Output bytes
    pub fn bytes(&self) -> &[u8] {
        &self.mapped.as_slice()[..self.len]
    }

    /// Wait latency of the submission that produced these bytes
    pub fn stats(&self) -> FrameStats {
        self.stats
    }
}

impl Deref for ReadbackGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes()
    }
}
