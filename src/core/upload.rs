//! Asynchronous copy-queue uploads, decoupled from the frame cadence.
//!
//! The manager keeps its own pool of recording contexts (each with its own
//! staging allocator) and a single timeline counter shared by the whole
//! subsystem. Submission assigns every in-flight context a strictly
//! increasing target value; recycling polls the counter's completed value
//! and never blocks opportunistically. The one blocking wait happens at
//! shutdown.

use crate::backend::{
    NativeBackend, RawBuffer, RawCommandBuffer, RawCommandPool, RawTexture, RawTimeline,
    SubmitBatch,
};
use crate::core::staging::{StagingAllocation, StagingAllocator};
use crate::core::types::QueueKind;
use crate::error::{RenderError, RenderResult};

/// Handle to a recording upload context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadContextId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadState {
    Free,
    Recording,
    InFlight(u64),
}

#[derive(Debug)]
struct UploadContext {
    pool: RawCommandPool,
    cmd: RawCommandBuffer,
    staging: StagingAllocator,
    state: UploadState,
    /// Bumped per recording session so the staging offset resets each
    /// time the context is reused.
    generation: u64,
}

/// Statistics for upload subsystem usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    /// Contexts created since device init (the pool never shrinks).
    pub contexts_created: usize,
    /// Batches handed to the copy queue.
    pub batches_submitted: u64,
    /// Contexts returned to the free list by polling.
    pub contexts_recycled: u64,
    /// Contexts currently in flight.
    pub in_flight: usize,
}

/// Copy-queue context pool and its shared completion timeline.
#[derive(Debug)]
pub struct UploadManager {
    contexts: Vec<UploadContext>,
    timeline: RawTimeline,
    /// Next target value to assign at submission.
    next_target: u64,
    /// Highest value any submission will signal.
    last_signaled: u64,
    /// Timeline value the next frame submission must wait on, if any.
    pending_sync: Option<u64>,
    /// Staging buffers retired during recording, released once the copy
    /// work that may reference them completes.
    retired_pending: Vec<RawBuffer>,
    retired: Vec<(RawBuffer, u64)>,
    stats: UploadStats,
}

impl UploadManager {
    pub fn new(backend: &dyn NativeBackend) -> RenderResult<Self> {
        Ok(Self {
            contexts: Vec::new(),
            timeline: backend.create_timeline()?,
            next_target: 1,
            last_signaled: 0,
            pending_sync: None,
            retired_pending: Vec::new(),
            retired: Vec::new(),
            stats: UploadStats::default(),
        })
    }

    /// The shared completion counter.
    pub fn timeline(&self) -> RawTimeline {
        self.timeline
    }

    /// Pop a free context (recycling completed ones first) or create one
    /// lazily, reset it and begin recording.
    pub fn allocate(&mut self, backend: &dyn NativeBackend) -> RenderResult<UploadContextId> {
        self.recycle(backend);

        let index = match self
            .contexts
            .iter()
            .position(|c| c.state == UploadState::Free)
        {
            Some(index) => index,
            None => {
                let pool = backend.create_command_pool(QueueKind::Copy)?;
                let cmd = backend.allocate_command_buffer(pool)?;
                let index = self.contexts.len();
                self.contexts.push(UploadContext {
                    pool,
                    cmd,
                    staging: StagingAllocator::new(Some(format!("upload_ctx{}", index))),
                    state: UploadState::Free,
                    generation: 0,
                });
                self.stats.contexts_created += 1;
                log::debug!("Upload context {} created", index);
                index
            }
        };

        let context = &mut self.contexts[index];
        backend.reset_command_pool(context.pool)?;
        backend.begin_commands(context.cmd)?;
        context.state = UploadState::Recording;
        context.generation += 1;
        Ok(UploadContextId(index as u32))
    }

    fn recording_context(&mut self, id: UploadContextId) -> RenderResult<usize> {
        let index = id.0 as usize;
        match self.contexts.get(index) {
            Some(c) if c.state == UploadState::Recording => Ok(index),
            Some(_) => Err(RenderError::upload(format!(
                "Upload context {} is not recording",
                id.0
            ))),
            None => Err(RenderError::upload(format!("Unknown upload context {}", id.0))),
        }
    }

    /// Stage `data` and record a copy of it into `dst` on the context's
    /// command buffer.
    pub fn write_buffer(
        &mut self,
        backend: &dyn NativeBackend,
        id: UploadContextId,
        dst: RawBuffer,
        dst_offset: u64,
        data: &[u8],
    ) -> RenderResult<()> {
        let index = self.recording_context(id)?;
        let allocation = self.stage(backend, index, data)?;
        let cmd = self.contexts[index].cmd;
        backend.cmd_copy_buffer(
            cmd,
            allocation.buffer,
            allocation.offset,
            dst,
            dst_offset,
            data.len() as u64,
        );
        Ok(())
    }

    /// Stage `data` and record a copy of it into `dst` on the context's
    /// command buffer.
    pub fn write_texture(
        &mut self,
        backend: &dyn NativeBackend,
        id: UploadContextId,
        dst: RawTexture,
        data: &[u8],
    ) -> RenderResult<()> {
        let index = self.recording_context(id)?;
        let allocation = self.stage(backend, index, data)?;
        let cmd = self.contexts[index].cmd;
        backend.cmd_copy_buffer_to_texture(cmd, allocation.buffer, allocation.offset, dst);
        Ok(())
    }

    fn stage(
        &mut self,
        backend: &dyn NativeBackend,
        index: usize,
        data: &[u8],
    ) -> RenderResult<StagingAllocation> {
        let context = &mut self.contexts[index];
        let retired_pending = &mut self.retired_pending;
        let generation = context.generation;
        let allocation = context.staging.allocate(backend, generation, data.len() as u64, |raw| {
            retired_pending.push(raw)
        })?;
        backend.write_buffer(allocation.buffer, allocation.offset, data);
        Ok(allocation)
    }

    pub fn context_cmd(&mut self, id: UploadContextId) -> RenderResult<RawCommandBuffer> {
        let index = self.recording_context(id)?;
        Ok(self.contexts[index].cmd)
    }

    /// Close every recording context and submit them as one batch to the
    /// copy queue. Each context gets a strictly increasing target on the
    /// shared counter; the batch signals the highest.
    pub fn submit(&mut self, backend: &dyn NativeBackend) -> RenderResult<()> {
        let mut command_buffers = Vec::new();
        let mut highest = 0u64;
        for context in &mut self.contexts {
            if context.state != UploadState::Recording {
                continue;
            }
            backend.end_commands(context.cmd)?;
            let target = self.next_target;
            self.next_target += 1;
            context.state = UploadState::InFlight(target);
            command_buffers.push(context.cmd);
            highest = target;
        }
        if command_buffers.is_empty() {
            return Ok(());
        }

        backend.submit(
            QueueKind::Copy,
            &SubmitBatch {
                command_buffers,
                signal_timeline: Some((self.timeline, highest)),
                ..Default::default()
            },
        )?;
        self.last_signaled = highest;
        self.pending_sync = Some(highest);
        for raw in self.retired_pending.drain(..) {
            self.retired.push((raw, highest));
        }
        self.stats.batches_submitted += 1;
        Ok(())
    }

    /// Return completed contexts to the free list and release retired
    /// staging buffers. Non-blocking.
    pub fn recycle(&mut self, backend: &dyn NativeBackend) {
        let completed = backend.timeline_value(self.timeline);
        let mut recycled = 0u64;
        for context in &mut self.contexts {
            if let UploadState::InFlight(target) = context.state {
                if target <= completed {
                    context.state = UploadState::Free;
                    recycled += 1;
                }
            }
        }
        if recycled > 0 {
            self.stats.contexts_recycled += recycled;
            log::debug!("Recycled {} upload contexts (completed {})", recycled, completed);
        }
        self.retired.retain(|&(raw, target)| {
            if target <= completed {
                backend.destroy_buffer(raw);
                false
            } else {
                true
            }
        });
    }

    /// Timeline value the next frame submission must wait on. Cleared by
    /// the take, so the dependency is inserted exactly once.
    pub fn take_pending_sync(&mut self) -> Option<(RawTimeline, u64)> {
        self.pending_sync.take().map(|value| (self.timeline, value))
    }

    pub fn stats(&self) -> UploadStats {
        UploadStats {
            in_flight: self
                .contexts
                .iter()
                .filter(|c| matches!(c.state, UploadState::InFlight(_)))
                .count(),
            ..self.stats
        }
    }

    /// Block until every submitted copy has completed, then tear down all
    /// contexts and the timeline. The only unbounded blocking call in the
    /// subsystem, and it runs off the steady-state path.
    pub fn shutdown(&mut self, backend: &dyn NativeBackend) -> RenderResult<()> {
        if self.last_signaled > 0 {
            backend.wait_timeline(self.timeline, self.last_signaled)?;
        }
        self.recycle(backend);
        for (raw, _) in self.retired.drain(..) {
            backend.destroy_buffer(raw);
        }
        for raw in self.retired_pending.drain(..) {
            backend.destroy_buffer(raw);
        }
        for context in &mut self.contexts {
            context.staging.destroy(backend);
            backend.destroy_command_pool(context.pool);
        }
        self.contexts.clear();
        backend.destroy_timeline(self.timeline);
        Ok(())
    }
}
