//! Staging memory for CPU-to-GPU upload traffic.
//!
//! A bump allocator over a growable host-visible buffer. Allocations
//! within one frame are tightly packed; the offset resets when the
//! allocator first sees a new frame counter, not on every call. When a
//! request does not fit, the old buffer is retired (its destruction is
//! deferred by the caller) and a new one twice the combined size is
//! created. The allocator never shrinks: growth trades memory for zero
//! steady-state allocation cost.

use crate::backend::{NativeBackend, RawBuffer};
use crate::core::memory_tracker::global_tracker;
use crate::core::types::{BufferDesc, BufferUsage};
use crate::error::RenderResult;

/// Statistics for staging allocator usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingStats {
    /// Size of the current backing buffer in bytes.
    pub buffer_size: u64,
    /// Write offset within the current buffer.
    pub offset: u64,
    /// Number of regrow events since creation.
    pub grow_events: u64,
    /// Total bytes handed out since creation.
    pub bytes_allocated: u64,
}

/// One allocation carved from the staging buffer. Valid only until the
/// owning frame slot (or upload context) is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingAllocation {
    pub buffer: RawBuffer,
    pub offset: u64,
}

#[derive(Debug)]
struct BackingBuffer {
    raw: RawBuffer,
    size: u64,
}

/// Per-context bump allocator over a growable CPU-visible buffer.
#[derive(Debug, Default)]
pub struct StagingAllocator {
    buffer: Option<BackingBuffer>,
    offset: u64,
    /// Frame counter observed at the most recent reset.
    frame_mark: u64,
    label: Option<String>,
    stats: StagingStats,
}

fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

impl StagingAllocator {
    pub fn new(label: Option<String>) -> Self {
        Self {
            label,
            ..Default::default()
        }
    }

    /// Bump-allocate `size` bytes for the given frame. `on_retire`
    /// receives the old backing buffer on regrow; the caller routes it to
    /// whatever deferred-destruction mechanism owns this allocator.
    /// Memory-tracker accounting for the backing buffer is handled here.
    pub fn allocate(
        &mut self,
        backend: &dyn NativeBackend,
        frame: u64,
        size: u64,
        on_retire: impl FnOnce(RawBuffer),
    ) -> RenderResult<StagingAllocation> {
        if frame != self.frame_mark {
            self.frame_mark = frame;
            self.offset = 0;
        }

        let fits = self
            .buffer
            .as_ref()
            .map_or(false, |b| self.offset + size <= b.size);
        if !fits {
            let old_size = self.buffer.as_ref().map_or(0, |b| b.size);
            if let Some(old) = self.buffer.take() {
                global_tracker().free_buffer_allocation(old.size, true);
                on_retire(old.raw);
            }
            let new_size = align_up((old_size + size) * 2, 8);
            let raw = backend.create_buffer(&BufferDesc {
                label: self.label.clone(),
                size: new_size,
                usage: BufferUsage::COPY_SRC,
                host_visible: true,
            })?;
            global_tracker().track_buffer_allocation(new_size, true);
            log::info!(
                "Staging buffer {} grown to {} bytes",
                self.label.as_deref().unwrap_or("<unnamed>"),
                new_size
            );
            self.buffer = Some(BackingBuffer {
                raw,
                size: new_size,
            });
            self.offset = 0;
            self.stats.grow_events += 1;
        }

        let backing = self.buffer.as_ref().unwrap();
        let allocation = StagingAllocation {
            buffer: backing.raw,
            offset: self.offset,
        };
        self.offset += size;
        self.stats.bytes_allocated += size;
        Ok(allocation)
    }

    /// Current backing buffer size (0 before the first allocation).
    pub fn buffer_size(&self) -> u64 {
        self.buffer.as_ref().map_or(0, |b| b.size)
    }

    pub fn stats(&self) -> StagingStats {
        StagingStats {
            buffer_size: self.buffer_size(),
            offset: self.offset,
            ..self.stats
        }
    }

    /// Tear down the backing buffer immediately. Only valid once all work
    /// referencing it has completed (shutdown path).
    pub fn destroy(&mut self, backend: &dyn NativeBackend) {
        if let Some(backing) = self.buffer.take() {
            backend.destroy_buffer(backing.raw);
            global_tracker().free_buffer_allocation(backing.size, true);
            self.offset = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;

    fn no_retire(_raw: RawBuffer) {
        panic!("unexpected retire");
    }

    #[test]
    fn test_offsets_strictly_increase_within_frame() {
        let backend = NullBackend::new();
        let mut staging = StagingAllocator::new(None);

        let a = staging.allocate(&backend, 1, 64, |_| {}).unwrap();
        let b = staging.allocate(&backend, 1, 32, no_retire).unwrap();
        let c = staging.allocate(&backend, 1, 16, no_retire).unwrap();

        assert_eq!(a.buffer, b.buffer);
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 64);
        assert_eq!(c.offset, 96);
        staging.destroy(&backend);
    }

    #[test]
    fn test_new_frame_resets_offset() {
        let backend = NullBackend::new();
        let mut staging = StagingAllocator::new(None);

        staging.allocate(&backend, 1, 64, |_| {}).unwrap();
        let next = staging.allocate(&backend, 2, 8, no_retire).unwrap();
        assert_eq!(next.offset, 0);
        staging.destroy(&backend);
    }

    #[test]
    fn test_regrow_retires_old_buffer_and_doubles() {
        let backend = NullBackend::new();
        let mut staging = StagingAllocator::new(Some("test".into()));

        // First allocation creates a (0 + 24) * 2 = 48 byte buffer.
        let first = staging.allocate(&backend, 1, 24, no_retire).unwrap();
        assert_eq!(staging.buffer_size(), 48);

        let mut retired = None;
        let second = staging
            .allocate(&backend, 1, 64, |raw| retired = Some(raw))
            .unwrap();

        assert_eq!(retired, Some(first.buffer));
        assert_ne!(second.buffer, first.buffer);
        // (48 + 64) * 2 = 224, already 8-aligned.
        assert_eq!(staging.buffer_size(), 224);
        assert_eq!(second.offset, 0);
        assert_eq!(staging.stats().grow_events, 2);
        staging.destroy(&backend);
    }

    #[test]
    fn test_growth_is_eight_byte_aligned() {
        let backend = NullBackend::new();
        let mut staging = StagingAllocator::new(None);
        staging.allocate(&backend, 1, 3, no_retire).unwrap();
        // (0 + 3) * 2 = 6, rounded up to 8.
        assert_eq!(staging.buffer_size(), 8);
        staging.destroy(&backend);
    }
}
