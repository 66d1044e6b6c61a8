//! Recording backend for hermetic tests.
//!
//! Hands out monotonically increasing handles and records every native
//! call, so tests can assert lifecycle ordering (destroys, submits,
//! barriers, descriptor writes) without a live device. Fences signal when
//! a batch referencing them is submitted; timelines complete immediately
//! unless manual completion is enabled.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{
    DescriptorWrite, NativeBarrier, NativeBackend, RawBuffer, RawCommandBuffer, RawCommandPool,
    RawDescriptorPool, RawDescriptorSet, RawFence, RawPipeline, RawSampler, RawSemaphore,
    RawShader, RawTexture, RawTimeline, SubmitBatch,
};
use crate::core::types::{
    BufferDesc, PipelineDesc, QueueKind, SamplerDesc, ShaderDesc, StageMask, TextureDesc,
};
use crate::error::{RenderError, RenderResult};

/// One recorded native call.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCall {
    CreateBuffer { id: u64, size: u64, host_visible: bool },
    DestroyBuffer { id: u64 },
    CreateTexture { id: u64 },
    DestroyTexture { id: u64 },
    CreateSampler { id: u64 },
    DestroySampler { id: u64 },
    CreateShader { id: u64 },
    DestroyShader { id: u64 },
    CreatePipeline { id: u64 },
    DestroyPipeline { id: u64 },
    WriteBuffer { id: u64, offset: u64, len: usize },
    CreateCommandPool { id: u64, queue: QueueKind },
    DestroyCommandPool { id: u64 },
    ResetCommandPool { id: u64 },
    AllocateCommandBuffer { pool: u64, id: u64 },
    BeginCommands { cmd: u64 },
    EndCommands { cmd: u64 },
    BindPipeline { cmd: u64, pipeline: u64 },
    BindDescriptorSet { cmd: u64, set: u64 },
    PushConstants { cmd: u64, data: Vec<u8> },
    Barriers { cmd: u64, barriers: Vec<NativeBarrier> },
    Draw { cmd: u64, vertex_count: u32, instance_count: u32 },
    DrawIndexed { cmd: u64, index_count: u32, instance_count: u32 },
    Dispatch { cmd: u64, x: u32, y: u32, z: u32 },
    CopyBuffer { cmd: u64, src: u64, src_offset: u64, dst: u64, dst_offset: u64, size: u64 },
    CopyBufferToTexture { cmd: u64, src: u64, src_offset: u64, dst: u64 },
    CreateDescriptorPool { id: u64, capacity: u32 },
    DestroyDescriptorPool { id: u64 },
    ResetDescriptorPool { id: u64 },
    AllocateDescriptorSet { pool: u64, id: u64 },
    WriteDescriptors { set: u64, writes: Vec<DescriptorWrite> },
    CreateFence { id: u64 },
    DestroyFence { id: u64 },
    WaitFence { id: u64 },
    ResetFence { id: u64 },
    CreateSemaphore { id: u64 },
    DestroySemaphore { id: u64 },
    CreateTimeline { id: u64 },
    DestroyTimeline { id: u64 },
    WaitTimeline { id: u64, value: u64 },
    Submit {
        queue: QueueKind,
        command_buffers: Vec<u64>,
        wait_semaphores: Vec<(u64, StageMask)>,
        signal_semaphores: Vec<u64>,
        wait_timelines: Vec<(u64, u64)>,
        signal_timeline: Option<(u64, u64)>,
        signal_fence: Option<u64>,
    },
}

#[derive(Debug, Default)]
struct TimelineState {
    signaled: u64,
    completed: u64,
}

#[derive(Debug, Default)]
struct NullState {
    next_id: u64,
    calls: Vec<NativeCall>,
    fences: HashMap<u64, bool>,
    timelines: HashMap<u64, TimelineState>,
    /// When true (default), a signaled timeline value is immediately
    /// reported as completed. Disable to simulate in-flight copy work.
    auto_complete: bool,
}

/// Hermetic [`NativeBackend`] that records every call.
#[derive(Debug)]
pub struct NullBackend {
    state: Mutex<NullState>,
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NullBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NullState {
                next_id: 1,
                auto_complete: true,
                ..Default::default()
            }),
        }
    }

    fn next_id(state: &mut NullState) -> u64 {
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    fn record(&self, call: NativeCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    /// Snapshot of every call recorded so far, in issue order.
    pub fn calls(&self) -> Vec<NativeCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Drop the recorded call log (handles and sync state are kept).
    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Number of recorded destroys of the given buffer handle.
    pub fn buffer_destroy_count(&self, buffer: RawBuffer) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| matches!(c, NativeCall::DestroyBuffer { id } if *id == buffer.0))
            .count()
    }

    /// All queue submissions recorded so far, in issue order.
    pub fn submissions(&self) -> Vec<NativeCall> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| matches!(c, NativeCall::Submit { .. }))
            .cloned()
            .collect()
    }

    /// Switch timelines to manual completion (see
    /// [`complete_timeline_to`](Self::complete_timeline_to)).
    pub fn set_auto_complete(&self, auto: bool) {
        self.state.lock().unwrap().auto_complete = auto;
    }

    /// Manually advance a timeline's completed value.
    pub fn complete_timeline_to(&self, timeline: RawTimeline, value: u64) {
        let mut state = self.state.lock().unwrap();
        let entry = state.timelines.entry(timeline.0).or_default();
        entry.completed = entry.completed.max(value);
    }
}

impl NativeBackend for NullBackend {
    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<RawBuffer> {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state.calls.push(NativeCall::CreateBuffer {
            id,
            size: desc.size,
            host_visible: desc.host_visible,
        });
        Ok(RawBuffer(id))
    }

    fn destroy_buffer(&self, buffer: RawBuffer) {
        self.record(NativeCall::DestroyBuffer { id: buffer.0 });
    }

    fn create_texture(&self, _desc: &TextureDesc) -> RenderResult<RawTexture> {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state.calls.push(NativeCall::CreateTexture { id });
        Ok(RawTexture(id))
    }

    fn destroy_texture(&self, texture: RawTexture) {
        self.record(NativeCall::DestroyTexture { id: texture.0 });
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> RenderResult<RawSampler> {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state.calls.push(NativeCall::CreateSampler { id });
        Ok(RawSampler(id))
    }

    fn destroy_sampler(&self, sampler: RawSampler) {
        self.record(NativeCall::DestroySampler { id: sampler.0 });
    }

    fn create_shader(&self, _desc: &ShaderDesc) -> RenderResult<RawShader> {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state.calls.push(NativeCall::CreateShader { id });
        Ok(RawShader(id))
    }

    fn destroy_shader(&self, shader: RawShader) {
        self.record(NativeCall::DestroyShader { id: shader.0 });
    }

    fn create_pipeline(
        &self,
        _desc: &PipelineDesc,
        _shaders: &[RawShader],
    ) -> RenderResult<RawPipeline> {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state.calls.push(NativeCall::CreatePipeline { id });
        Ok(RawPipeline(id))
    }

    fn destroy_pipeline(&self, pipeline: RawPipeline) {
        self.record(NativeCall::DestroyPipeline { id: pipeline.0 });
    }

    fn write_buffer(&self, buffer: RawBuffer, offset: u64, data: &[u8]) {
        self.record(NativeCall::WriteBuffer {
            id: buffer.0,
            offset,
            len: data.len(),
        });
    }

    fn create_command_pool(&self, queue: QueueKind) -> RenderResult<RawCommandPool> {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state.calls.push(NativeCall::CreateCommandPool { id, queue });
        Ok(RawCommandPool(id))
    }

    fn destroy_command_pool(&self, pool: RawCommandPool) {
        self.record(NativeCall::DestroyCommandPool { id: pool.0 });
    }

    fn reset_command_pool(&self, pool: RawCommandPool) -> RenderResult<()> {
        self.record(NativeCall::ResetCommandPool { id: pool.0 });
        Ok(())
    }

    fn allocate_command_buffer(&self, pool: RawCommandPool) -> RenderResult<RawCommandBuffer> {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state
            .calls
            .push(NativeCall::AllocateCommandBuffer { pool: pool.0, id });
        Ok(RawCommandBuffer(id))
    }

    fn begin_commands(&self, cmd: RawCommandBuffer) -> RenderResult<()> {
        self.record(NativeCall::BeginCommands { cmd: cmd.0 });
        Ok(())
    }

    fn end_commands(&self, cmd: RawCommandBuffer) -> RenderResult<()> {
        self.record(NativeCall::EndCommands { cmd: cmd.0 });
        Ok(())
    }

    fn cmd_bind_pipeline(&self, cmd: RawCommandBuffer, pipeline: RawPipeline) {
        self.record(NativeCall::BindPipeline {
            cmd: cmd.0,
            pipeline: pipeline.0,
        });
    }

    fn cmd_bind_descriptor_set(&self, cmd: RawCommandBuffer, set: RawDescriptorSet) {
        self.record(NativeCall::BindDescriptorSet {
            cmd: cmd.0,
            set: set.0,
        });
    }

    fn cmd_push_constants(&self, cmd: RawCommandBuffer, data: &[u8]) {
        self.record(NativeCall::PushConstants {
            cmd: cmd.0,
            data: data.to_vec(),
        });
    }

    fn cmd_barriers(&self, cmd: RawCommandBuffer, barriers: &[NativeBarrier]) {
        self.record(NativeCall::Barriers {
            cmd: cmd.0,
            barriers: barriers.to_vec(),
        });
    }

    fn cmd_draw(&self, cmd: RawCommandBuffer, vertex_count: u32, instance_count: u32) {
        self.record(NativeCall::Draw {
            cmd: cmd.0,
            vertex_count,
            instance_count,
        });
    }

    fn cmd_draw_indexed(&self, cmd: RawCommandBuffer, index_count: u32, instance_count: u32) {
        self.record(NativeCall::DrawIndexed {
            cmd: cmd.0,
            index_count,
            instance_count,
        });
    }

    fn cmd_dispatch(&self, cmd: RawCommandBuffer, x: u32, y: u32, z: u32) {
        self.record(NativeCall::Dispatch { cmd: cmd.0, x, y, z });
    }

    fn cmd_copy_buffer(
        &self,
        cmd: RawCommandBuffer,
        src: RawBuffer,
        src_offset: u64,
        dst: RawBuffer,
        dst_offset: u64,
        size: u64,
    ) {
        self.record(NativeCall::CopyBuffer {
            cmd: cmd.0,
            src: src.0,
            src_offset,
            dst: dst.0,
            dst_offset,
            size,
        });
    }

    fn cmd_copy_buffer_to_texture(
        &self,
        cmd: RawCommandBuffer,
        src: RawBuffer,
        src_offset: u64,
        dst: RawTexture,
    ) {
        self.record(NativeCall::CopyBufferToTexture {
            cmd: cmd.0,
            src: src.0,
            src_offset,
            dst: dst.0,
        });
    }

    fn create_descriptor_pool(&self, capacity: u32) -> RenderResult<RawDescriptorPool> {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state
            .calls
            .push(NativeCall::CreateDescriptorPool { id, capacity });
        Ok(RawDescriptorPool(id))
    }

    fn destroy_descriptor_pool(&self, pool: RawDescriptorPool) {
        self.record(NativeCall::DestroyDescriptorPool { id: pool.0 });
    }

    fn reset_descriptor_pool(&self, pool: RawDescriptorPool) {
        self.record(NativeCall::ResetDescriptorPool { id: pool.0 });
    }

    fn allocate_descriptor_set(&self, pool: RawDescriptorPool) -> RenderResult<RawDescriptorSet> {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state
            .calls
            .push(NativeCall::AllocateDescriptorSet { pool: pool.0, id });
        Ok(RawDescriptorSet(id))
    }

    fn write_descriptors(&self, set: RawDescriptorSet, writes: &[DescriptorWrite]) {
        self.record(NativeCall::WriteDescriptors {
            set: set.0,
            writes: writes.to_vec(),
        });
    }

    fn create_fence(&self) -> RenderResult<RawFence> {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state.fences.insert(id, false);
        state.calls.push(NativeCall::CreateFence { id });
        Ok(RawFence(id))
    }

    fn destroy_fence(&self, fence: RawFence) {
        let mut state = self.state.lock().unwrap();
        state.fences.remove(&fence.0);
        state.calls.push(NativeCall::DestroyFence { id: fence.0 });
    }

    fn wait_fence(&self, fence: RawFence) -> RenderResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(NativeCall::WaitFence { id: fence.0 });
        match state.fences.get(&fence.0) {
            Some(true) => Ok(()),
            Some(false) => Err(RenderError::device(format!(
                "Wait on fence {} that no submission will signal",
                fence.0
            ))),
            None => Err(RenderError::device(format!("Unknown fence {}", fence.0))),
        }
    }

    fn reset_fence(&self, fence: RawFence) -> RenderResult<()> {
        let mut state = self.state.lock().unwrap();
        state.fences.insert(fence.0, false);
        state.calls.push(NativeCall::ResetFence { id: fence.0 });
        Ok(())
    }

    fn create_semaphore(&self) -> RenderResult<RawSemaphore> {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state.calls.push(NativeCall::CreateSemaphore { id });
        Ok(RawSemaphore(id))
    }

    fn destroy_semaphore(&self, semaphore: RawSemaphore) {
        self.record(NativeCall::DestroySemaphore { id: semaphore.0 });
    }

    fn create_timeline(&self) -> RenderResult<RawTimeline> {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state.timelines.insert(id, TimelineState::default());
        state.calls.push(NativeCall::CreateTimeline { id });
        Ok(RawTimeline(id))
    }

    fn destroy_timeline(&self, timeline: RawTimeline) {
        let mut state = self.state.lock().unwrap();
        state.timelines.remove(&timeline.0);
        state.calls.push(NativeCall::DestroyTimeline { id: timeline.0 });
    }

    fn timeline_value(&self, timeline: RawTimeline) -> u64 {
        self.state
            .lock()
            .unwrap()
            .timelines
            .get(&timeline.0)
            .map(|t| t.completed)
            .unwrap_or(0)
    }

    fn wait_timeline(&self, timeline: RawTimeline, value: u64) -> RenderResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(NativeCall::WaitTimeline {
            id: timeline.0,
            value,
        });
        let entry = state
            .timelines
            .get_mut(&timeline.0)
            .ok_or_else(|| RenderError::device(format!("Unknown timeline {}", timeline.0)))?;
        if entry.signaled < value {
            return Err(RenderError::device(format!(
                "Wait on timeline {} value {} that no submission will signal (last {})",
                timeline.0, value, entry.signaled
            )));
        }
        // A blocking wait rides out the in-flight work.
        entry.completed = entry.completed.max(value);
        Ok(())
    }

    fn submit(&self, queue: QueueKind, batch: &SubmitBatch) -> RenderResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(fence) = batch.signal_fence {
            state.fences.insert(fence.0, true);
        }
        if let Some((timeline, value)) = batch.signal_timeline {
            let auto = state.auto_complete;
            let entry = state.timelines.entry(timeline.0).or_default();
            entry.signaled = entry.signaled.max(value);
            if auto {
                entry.completed = entry.completed.max(value);
            }
        }
        state.calls.push(NativeCall::Submit {
            queue,
            command_buffers: batch.command_buffers.iter().map(|c| c.0).collect(),
            wait_semaphores: batch
                .wait_semaphores
                .iter()
                .map(|(s, m)| (s.0, *m))
                .collect(),
            signal_semaphores: batch.signal_semaphores.iter().map(|s| s.0).collect(),
            wait_timelines: batch.wait_timelines.iter().map(|(t, v)| (t.0, *v)).collect(),
            signal_timeline: batch.signal_timeline.map(|(t, v)| (t.0, v)),
            signal_fence: batch.signal_fence.map(|f| f.0),
        });
        Ok(())
    }
}
