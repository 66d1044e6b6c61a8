//! Deferred destruction of GPU objects.
//!
//! Destroy requests never touch the native API synchronously. Each request
//! is tagged with the frame counter at the time it was made and queued per
//! resource kind; the queue is drained once per frame advance, releasing
//! only entries whose frame has receded past the buffering depth. Queues
//! are FIFO and monotonically increasing in frame tag, so a prefix scan is
//! sufficient.

use std::collections::VecDeque;

use crate::backend::{
    NativeBackend, RawBuffer, RawDescriptorPool, RawPipeline, RawSampler, RawShader, RawTexture,
};
use crate::core::types::ResourceKind;

#[derive(Debug, Clone, Copy)]
struct ReclaimEntry {
    raw: u64,
    frame: u64,
}

/// Snapshot of reclamation activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Entries waiting for their safety window to pass.
    pub pending: usize,
    /// Native handles released since device creation.
    pub released: u64,
}

/// Per-kind FIFO queues of deferred destroys.
#[derive(Debug, Default)]
pub struct ReclaimQueues {
    queues: [VecDeque<ReclaimEntry>; ResourceKind::COUNT],
    released: u64,
}

impl ReclaimQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a native handle for destruction, tagged with the current
    /// frame count.
    pub fn enqueue(&mut self, kind: ResourceKind, raw: u64, frame: u64) {
        let queue = &mut self.queues[kind.index()];
        debug_assert!(
            queue.back().map_or(true, |e| e.frame <= frame),
            "reclaim queue frame tags must be monotonic"
        );
        queue.push_back(ReclaimEntry { raw, frame });
    }

    /// Release every entry whose frame tag has receded past the buffering
    /// depth: `entry.frame + depth <= current_frame`.
    pub fn drain(&mut self, backend: &dyn NativeBackend, current_frame: u64, depth: u64) {
        let mut released = 0u64;
        for kind in [
            ResourceKind::Buffer,
            ResourceKind::Texture,
            ResourceKind::Sampler,
            ResourceKind::Shader,
            ResourceKind::Pipeline,
            ResourceKind::DescriptorPool,
        ] {
            let queue = &mut self.queues[kind.index()];
            while let Some(entry) = queue.front() {
                if entry.frame + depth > current_frame {
                    break;
                }
                let entry = queue.pop_front().unwrap();
                Self::release(backend, kind, entry.raw);
                released += 1;
            }
        }
        if released > 0 {
            self.released += released;
            log::debug!(
                "Reclaimed {} native handles at frame {} (depth {})",
                released,
                current_frame,
                depth
            );
        }
    }

    /// Release everything regardless of frame tags. Only valid once the
    /// device has waited for all in-flight work (shutdown path).
    pub fn flush_all(&mut self, backend: &dyn NativeBackend) {
        for kind in [
            ResourceKind::Buffer,
            ResourceKind::Texture,
            ResourceKind::Sampler,
            ResourceKind::Shader,
            ResourceKind::Pipeline,
            ResourceKind::DescriptorPool,
        ] {
            let queue = &mut self.queues[kind.index()];
            while let Some(entry) = queue.pop_front() {
                Self::release(backend, kind, entry.raw);
                self.released += 1;
            }
        }
    }

    fn release(backend: &dyn NativeBackend, kind: ResourceKind, raw: u64) {
        match kind {
            ResourceKind::Buffer => backend.destroy_buffer(RawBuffer(raw)),
            ResourceKind::Texture => backend.destroy_texture(RawTexture(raw)),
            ResourceKind::Sampler => backend.destroy_sampler(RawSampler(raw)),
            ResourceKind::Shader => backend.destroy_shader(RawShader(raw)),
            ResourceKind::Pipeline => backend.destroy_pipeline(RawPipeline(raw)),
            ResourceKind::DescriptorPool => backend.destroy_descriptor_pool(RawDescriptorPool(raw)),
        }
    }

    pub fn stats(&self) -> ReclaimStats {
        ReclaimStats {
            pending: self.queues.iter().map(|q| q.len()).sum(),
            released: self.released,
        }
    }
}
