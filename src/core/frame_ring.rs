//! Frame ring: the fixed set of frame slots cycled every `buffering_depth`
//! frames.
//!
//! Each slot owns the native recording state for the streams of one
//! in-flight frame: command pools and buffers (lazily created per queue
//! kind so a stream index maps to the same native buffer every time its
//! slot comes around), one descriptor arena and one staging allocator per
//! stream, per-queue completion fences, and per-stream semaphores for
//! declared waits. Slots are created once at device init and only torn
//! down at shutdown.

use crate::backend::{
    NativeBackend, RawCommandBuffer, RawCommandPool, RawFence, RawSemaphore,
};
use crate::core::binding::DescriptorArena;
use crate::core::config::DeviceConfig;
use crate::core::staging::StagingAllocator;
use crate::core::types::{QueueKind, QUEUE_KIND_COUNT};
use crate::error::RenderResult;

/// Per-(slot, stream index) native recording state.
#[derive(Debug)]
pub struct StreamSlot {
    pools: [Option<RawCommandPool>; QUEUE_KIND_COUNT],
    buffers: [Option<RawCommandBuffer>; QUEUE_KIND_COUNT],
    pub arena: DescriptorArena,
    pub staging: StagingAllocator,
}

impl StreamSlot {
    fn new(
        backend: &dyn NativeBackend,
        config: &DeviceConfig,
        slot: usize,
        stream: usize,
    ) -> RenderResult<Self> {
        Ok(Self {
            pools: [None; QUEUE_KIND_COUNT],
            buffers: [None; QUEUE_KIND_COUNT],
            arena: DescriptorArena::new(backend, config.descriptor_arena_capacity)?,
            staging: StagingAllocator::new(Some(format!("staging_s{}_c{}", slot, stream))),
        })
    }

    /// Command pool + buffer for the given queue kind, created on first
    /// use. The same (slot, stream, queue) triple always yields the same
    /// native buffer.
    pub fn recording_state(
        &mut self,
        backend: &dyn NativeBackend,
        queue: QueueKind,
    ) -> RenderResult<(RawCommandPool, RawCommandBuffer)> {
        let qi = queue.index();
        if self.pools[qi].is_none() {
            let pool = backend.create_command_pool(queue)?;
            let buffer = backend.allocate_command_buffer(pool)?;
            self.pools[qi] = Some(pool);
            self.buffers[qi] = Some(buffer);
        }
        Ok((self.pools[qi].unwrap(), self.buffers[qi].unwrap()))
    }

    fn destroy(&mut self, backend: &dyn NativeBackend) {
        for pool in self.pools.iter_mut().filter_map(Option::take) {
            backend.destroy_command_pool(pool);
        }
        self.buffers = [None; QUEUE_KIND_COUNT];
        self.arena.destroy(backend);
        self.staging.destroy(backend);
    }
}

/// One ring position.
#[derive(Debug)]
pub struct FrameSlot {
    fences: [RawFence; QUEUE_KIND_COUNT],
    /// Queues whose fence was signaled by this slot's submission and not
    /// yet waited on.
    fence_pending: [bool; QUEUE_KIND_COUNT],
    /// Lazily created per-stream semaphores for declared waits.
    semaphores: Vec<Option<RawSemaphore>>,
    pub streams: Vec<StreamSlot>,
}

impl FrameSlot {
    pub fn fence(&self, queue: QueueKind) -> RawFence {
        self.fences[queue.index()]
    }

    pub fn mark_submitted(&mut self, queue: QueueKind) {
        self.fence_pending[queue.index()] = true;
    }

    /// Semaphore identifying `stream` as a wait producer, created on first
    /// use.
    pub fn stream_semaphore(
        &mut self,
        backend: &dyn NativeBackend,
        stream: usize,
    ) -> RenderResult<RawSemaphore> {
        if self.semaphores[stream].is_none() {
            self.semaphores[stream] = Some(backend.create_semaphore()?);
        }
        Ok(self.semaphores[stream].unwrap())
    }
}

/// The ring of frame slots plus the monotonic frame counter every
/// component agrees on.
#[derive(Debug)]
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    frame_count: u64,
    depth: u64,
}

impl FrameRing {
    pub fn new(backend: &dyn NativeBackend, config: &DeviceConfig) -> RenderResult<Self> {
        let depth = config.buffering_depth as usize;
        let mut slots = Vec::with_capacity(depth);
        for slot_index in 0..depth {
            let fences = [
                backend.create_fence()?,
                backend.create_fence()?,
                backend.create_fence()?,
            ];
            let mut streams = Vec::with_capacity(config.max_command_streams as usize);
            for stream_index in 0..config.max_command_streams as usize {
                streams.push(StreamSlot::new(backend, config, slot_index, stream_index)?);
            }
            slots.push(FrameSlot {
                fences,
                fence_pending: [false; QUEUE_KIND_COUNT],
                semaphores: vec![None; config.max_command_streams as usize],
                streams,
            });
        }
        log::info!(
            "Frame ring initialized: {} slots, {} streams each",
            depth,
            config.max_command_streams
        );
        Ok(Self {
            slots,
            frame_count: 0,
            depth: depth as u64,
        })
    }

    /// The process-wide "now" passed explicitly into reclamation and
    /// staging.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    pub fn slot_index(&self) -> usize {
        (self.frame_count % self.depth) as usize
    }

    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.slot_index()]
    }

    pub fn current_slot_mut(&mut self) -> &mut FrameSlot {
        let index = self.slot_index();
        &mut self.slots[index]
    }

    /// Advance to the next frame. When the ring wraps onto a slot whose
    /// work is still in flight, block on that slot's completion fences —
    /// the single intentional stall point, bounding CPU-ahead-of-GPU skew
    /// to `buffering_depth` frames.
    pub fn advance(&mut self, backend: &dyn NativeBackend) -> RenderResult<u64> {
        self.frame_count += 1;
        let index = self.slot_index();
        let slot = &mut self.slots[index];
        for queue in QueueKind::ALL {
            let qi = queue.index();
            if slot.fence_pending[qi] {
                backend.wait_fence(slot.fences[qi])?;
                backend.reset_fence(slot.fences[qi])?;
                slot.fence_pending[qi] = false;
            }
        }
        Ok(self.frame_count)
    }

    /// Block until every slot's outstanding work has completed.
    pub fn wait_idle(&mut self, backend: &dyn NativeBackend) -> RenderResult<()> {
        for slot in &mut self.slots {
            for queue in QueueKind::ALL {
                let qi = queue.index();
                if slot.fence_pending[qi] {
                    backend.wait_fence(slot.fences[qi])?;
                    backend.reset_fence(slot.fences[qi])?;
                    slot.fence_pending[qi] = false;
                }
            }
        }
        Ok(())
    }

    /// Tear down all slot-owned native objects (shutdown path; callers
    /// must have waited for idle first).
    pub fn destroy(&mut self, backend: &dyn NativeBackend) {
        for slot in &mut self.slots {
            for stream in &mut slot.streams {
                stream.destroy(backend);
            }
            for semaphore in slot.semaphores.iter_mut().filter_map(Option::take) {
                backend.destroy_semaphore(semaphore);
            }
            for fence in slot.fences {
                backend.destroy_fence(fence);
            }
        }
        self.slots.clear();
    }
}
