//! Native graphics API abstraction.
//!
//! The lifecycle core treats "create/destroy GPU object", "submit command
//! batch" and "signal/wait on a counter" as externally provided primitives.
//! [`NativeBackend`] is the capability interface a concrete driver wrapper
//! implements; every handle it hands back is an opaque u64 newtype the core
//! never interprets.
//!
//! [`null::NullBackend`] is a hermetic implementation that records every
//! call, so lifecycle ordering is testable without a live device.

pub mod null;

use crate::core::types::{
    BufferDesc, PipelineDesc, QueueKind, ResourceState, SamplerDesc, ShaderDesc, StageMask,
    TextureDesc,
};
use crate::error::RenderResult;

macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

raw_handle!(
    /// Native buffer handle.
    RawBuffer
);
raw_handle!(
    /// Native texture handle.
    RawTexture
);
raw_handle!(
    /// Native sampler handle.
    RawSampler
);
raw_handle!(
    /// Native shader handle.
    RawShader
);
raw_handle!(
    /// Native pipeline handle.
    RawPipeline
);
raw_handle!(
    /// Native command pool handle.
    RawCommandPool
);
raw_handle!(
    /// Native command buffer handle.
    RawCommandBuffer
);
raw_handle!(
    /// Native descriptor pool handle.
    RawDescriptorPool
);
raw_handle!(
    /// Native descriptor set handle.
    RawDescriptorSet
);
raw_handle!(
    /// Native fence handle (binary, signaled by a submission).
    RawFence
);
raw_handle!(
    /// Native semaphore handle (links two queue batches).
    RawSemaphore
);
raw_handle!(
    /// Native timeline counter handle (monotonically increasing value).
    RawTimeline
);

/// A buffer or texture referenced by native handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawResource {
    Buffer(RawBuffer),
    Texture(RawTexture),
}

/// One state transition inside a batched barrier call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeBarrier {
    pub resource: RawResource,
    pub src: ResourceState,
    pub dst: ResourceState,
}

/// Payload of one descriptor write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    Buffer {
        buffer: RawBuffer,
        offset: u64,
        size: u64,
    },
    Texture {
        texture: RawTexture,
        subresource: Option<u32>,
    },
    Sampler(RawSampler),
}

/// One slot update applied to a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub slot: u32,
    pub resource: DescriptorResource,
}

/// One batch handed to a hardware queue: command buffers plus the
/// synchronization operations that link it to other batches.
#[derive(Debug, Clone, Default)]
pub struct SubmitBatch {
    pub command_buffers: Vec<RawCommandBuffer>,
    /// Semaphores the queue must observe before executing, with the stage
    /// mask the wait applies to.
    pub wait_semaphores: Vec<(RawSemaphore, StageMask)>,
    /// Semaphores signaled once the batch completes.
    pub signal_semaphores: Vec<RawSemaphore>,
    /// Timeline values the queue must observe before executing.
    pub wait_timelines: Vec<(RawTimeline, u64)>,
    /// Timeline value signaled once the batch completes.
    pub signal_timeline: Option<(RawTimeline, u64)>,
    /// Fence signaled once the batch completes.
    pub signal_fence: Option<RawFence>,
}

/// Capability interface over the native graphics API.
///
/// All operations are non-blocking except [`wait_fence`](Self::wait_fence)
/// and [`wait_timeline`](Self::wait_timeline). Creation failures surface as
/// errors and are never retried by the core.
pub trait NativeBackend: Send + Sync {
    // Object lifetime. Destruction is assumed infallible; the core only
    // calls it once the deferred-release window has passed.
    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<RawBuffer>;
    fn destroy_buffer(&self, buffer: RawBuffer);
    fn create_texture(&self, desc: &TextureDesc) -> RenderResult<RawTexture>;
    fn destroy_texture(&self, texture: RawTexture);
    fn create_sampler(&self, desc: &SamplerDesc) -> RenderResult<RawSampler>;
    fn destroy_sampler(&self, sampler: RawSampler);
    fn create_shader(&self, desc: &ShaderDesc) -> RenderResult<RawShader>;
    fn destroy_shader(&self, shader: RawShader);
    fn create_pipeline(&self, desc: &PipelineDesc, shaders: &[RawShader])
        -> RenderResult<RawPipeline>;
    fn destroy_pipeline(&self, pipeline: RawPipeline);

    /// Write CPU data into a host-visible buffer at the given offset.
    fn write_buffer(&self, buffer: RawBuffer, offset: u64, data: &[u8]);

    // Command recording.
    fn create_command_pool(&self, queue: QueueKind) -> RenderResult<RawCommandPool>;
    fn destroy_command_pool(&self, pool: RawCommandPool);
    fn reset_command_pool(&self, pool: RawCommandPool) -> RenderResult<()>;
    fn allocate_command_buffer(&self, pool: RawCommandPool) -> RenderResult<RawCommandBuffer>;
    fn begin_commands(&self, cmd: RawCommandBuffer) -> RenderResult<()>;
    fn end_commands(&self, cmd: RawCommandBuffer) -> RenderResult<()>;

    fn cmd_bind_pipeline(&self, cmd: RawCommandBuffer, pipeline: RawPipeline);
    fn cmd_bind_descriptor_set(&self, cmd: RawCommandBuffer, set: RawDescriptorSet);
    fn cmd_push_constants(&self, cmd: RawCommandBuffer, data: &[u8]);
    fn cmd_barriers(&self, cmd: RawCommandBuffer, barriers: &[NativeBarrier]);
    fn cmd_draw(&self, cmd: RawCommandBuffer, vertex_count: u32, instance_count: u32);
    fn cmd_draw_indexed(&self, cmd: RawCommandBuffer, index_count: u32, instance_count: u32);
    fn cmd_dispatch(&self, cmd: RawCommandBuffer, x: u32, y: u32, z: u32);
    fn cmd_copy_buffer(
        &self,
        cmd: RawCommandBuffer,
        src: RawBuffer,
        src_offset: u64,
        dst: RawBuffer,
        dst_offset: u64,
        size: u64,
    );
    fn cmd_copy_buffer_to_texture(
        &self,
        cmd: RawCommandBuffer,
        src: RawBuffer,
        src_offset: u64,
        dst: RawTexture,
    );

    // Descriptor allocation. Capacity accounting lives in the core's
    // arenas; the backend only materializes sets and writes.
    fn create_descriptor_pool(&self, capacity: u32) -> RenderResult<RawDescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: RawDescriptorPool);
    fn reset_descriptor_pool(&self, pool: RawDescriptorPool);
    fn allocate_descriptor_set(&self, pool: RawDescriptorPool) -> RenderResult<RawDescriptorSet>;
    fn write_descriptors(&self, set: RawDescriptorSet, writes: &[DescriptorWrite]);

    // Synchronization primitives.
    fn create_fence(&self) -> RenderResult<RawFence>;
    fn destroy_fence(&self, fence: RawFence);
    /// Block until the fence is signaled.
    fn wait_fence(&self, fence: RawFence) -> RenderResult<()>;
    fn reset_fence(&self, fence: RawFence) -> RenderResult<()>;
    fn create_semaphore(&self) -> RenderResult<RawSemaphore>;
    fn destroy_semaphore(&self, semaphore: RawSemaphore);
    fn create_timeline(&self) -> RenderResult<RawTimeline>;
    fn destroy_timeline(&self, timeline: RawTimeline);
    /// Latest value the hardware has completed on the timeline.
    fn timeline_value(&self, timeline: RawTimeline) -> u64;
    /// Block until the timeline reaches `value`.
    fn wait_timeline(&self, timeline: RawTimeline, value: u64) -> RenderResult<()>;

    /// Hand one batch to a hardware queue.
    fn submit(&self, queue: QueueKind, batch: &SubmitBatch) -> RenderResult<()>;
}
