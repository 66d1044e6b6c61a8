//! Public device facade.
//!
//! Owns the frame ring, the command stream allocator, the upload subsystem
//! and the object registries, and exposes the API surface collaborators
//! record against: create/destroy per object kind (destruction is always
//! deferred), stream request and recording, binding, transitions, wait
//! declarations, and the end-of-frame submission entry point.
//!
//! A single submitting thread drives this type. Recording of distinct
//! streams may happen from worker threads as long as each stream is
//! touched by exactly one thread at a time; the manager itself performs no
//! internal threading.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::backend::{
    DescriptorResource, DescriptorWrite, NativeBackend, RawBuffer, RawCommandBuffer, RawPipeline,
    RawResource, RawSampler, RawShader, RawTexture, SubmitBatch,
};
use crate::core::binding::BindingTable;
use crate::core::config::DeviceConfig;
use crate::core::frame_ring::FrameRing;
use crate::core::memory_tracker::{global_tracker, MemoryMetrics};
use crate::core::reclaim::{ReclaimQueues, ReclaimStats};
use crate::core::staging::StagingStats;
use crate::core::streams::{CommandStreamHandle, StreamAllocator, StreamState};
use crate::core::submit::{merge_transition, native_barriers, plan_batches, SubmitStats};
use crate::core::types::{
    BindingKind, BindingLayout, BufferDesc, BufferId, GpuResource, PipelineDesc, PipelineId,
    PipelineKind, QueueKind, ResourceKind, ResourceState, SamplerDesc, SamplerId, ShaderDesc,
    ShaderId, TextureDesc, TextureId, MAX_PUSH_CONSTANT_BYTES, QUEUE_KIND_COUNT,
};
use crate::core::upload::{UploadContextId, UploadManager, UploadStats};
use crate::error::{RenderError, RenderResult};

#[derive(Debug)]
struct BufferEntry {
    raw: RawBuffer,
    desc: BufferDesc,
    state: ResourceState,
}

#[derive(Debug)]
struct TextureEntry {
    raw: RawTexture,
    desc: TextureDesc,
    state: ResourceState,
}

#[derive(Debug)]
struct SamplerEntry {
    raw: RawSampler,
}

#[derive(Debug)]
struct ShaderEntry {
    raw: RawShader,
}

#[derive(Debug)]
struct PipelineEntry {
    raw: RawPipeline,
    kind: PipelineKind,
    layout: BindingLayout,
    /// Content hash over the identity-relevant descriptor fields, used to
    /// skip redundant native pipeline binds.
    hash: [u8; 32],
}

fn pipeline_hash(desc: &PipelineDesc) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([match desc.kind {
        PipelineKind::Graphics => 0u8,
        PipelineKind::Compute => 1u8,
    }]);
    for shader in &desc.shaders {
        hasher.update(shader.0.to_le_bytes());
    }
    hasher.update((desc.layout.entries.len() as u32).to_le_bytes());
    for entry in &desc.layout.entries {
        hasher.update(entry.slot.to_le_bytes());
        hasher.update([
            match entry.kind {
                BindingKind::ConstantBuffer => 0u8,
                BindingKind::ShaderResource => 1u8,
                BindingKind::UnorderedAccess => 2u8,
                BindingKind::Sampler => 3u8,
            },
            entry.immutable_sampler as u8,
        ]);
    }
    hasher.update(desc.layout.push_constant_size.to_le_bytes());
    hasher.finalize().into()
}

/// Frame-pipelined GPU command and resource lifecycle manager.
pub struct Device {
    backend: Arc<dyn NativeBackend>,
    config: DeviceConfig,
    ring: FrameRing,
    reclaim: ReclaimQueues,
    streams: StreamAllocator,
    upload: UploadManager,

    buffers: HashMap<BufferId, BufferEntry>,
    textures: HashMap<TextureId, TextureEntry>,
    samplers: HashMap<SamplerId, SamplerEntry>,
    shaders: HashMap<ShaderId, ShaderEntry>,
    pipelines: HashMap<PipelineId, PipelineEntry>,
    next_id: u64,

    submit_stats: SubmitStats,
    shut_down: bool,
}

impl Device {
    pub fn new(backend: Arc<dyn NativeBackend>, config: DeviceConfig) -> RenderResult<Self> {
        config.validate()?;
        if config.memory_budget_bytes > 0 {
            global_tracker().set_budget_limit(config.memory_budget_bytes);
        }
        let ring = FrameRing::new(&*backend, &config)?;
        let upload = UploadManager::new(&*backend)?;
        let streams = StreamAllocator::new(config.max_command_streams);
        log::info!(
            "Device initialized (depth {}, {} streams)",
            config.buffering_depth,
            config.max_command_streams
        );
        Ok(Self {
            backend,
            config,
            ring,
            reclaim: ReclaimQueues::new(),
            streams,
            upload,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            shaders: HashMap::new(),
            pipelines: HashMap::new(),
            next_id: 1,
            submit_stats: SubmitStats::default(),
            shut_down: false,
        })
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Monotonic frame counter every subsystem agrees on.
    pub fn frame_count(&self) -> u64 {
        self.ring.frame_count()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    // ---------- object creation / deferred destruction ----------

    pub fn create_buffer(&mut self, desc: BufferDesc) -> RenderResult<BufferId> {
        global_tracker()
            .check_budget(desc.size)
            .map_err(|e| RenderError::config(e.to_string()))?;
        let raw = self.backend.create_buffer(&desc)?;
        global_tracker().track_buffer_allocation(desc.size, desc.host_visible);
        let id = BufferId(self.next_id());
        self.buffers.insert(
            id,
            BufferEntry {
                raw,
                desc,
                state: ResourceState::UNDEFINED,
            },
        );
        Ok(id)
    }

    pub fn destroy_buffer(&mut self, id: BufferId) {
        let frame = self.ring.frame_count();
        match self.buffers.remove(&id) {
            Some(entry) => {
                global_tracker().free_buffer_allocation(entry.desc.size, entry.desc.host_visible);
                self.reclaim
                    .enqueue(ResourceKind::Buffer, entry.raw.0, frame);
            }
            None => {
                debug_assert!(false, "double destroy of buffer {:?}", id);
                log::warn!("Destroy of unknown buffer {:?} ignored", id);
            }
        }
    }

    pub fn create_texture(&mut self, desc: TextureDesc) -> RenderResult<TextureId> {
        global_tracker()
            .check_budget(desc.byte_size())
            .map_err(|e| RenderError::config(e.to_string()))?;
        let raw = self.backend.create_texture(&desc)?;
        global_tracker().track_texture_allocation(desc.byte_size());
        let id = TextureId(self.next_id());
        self.textures.insert(
            id,
            TextureEntry {
                raw,
                desc,
                state: ResourceState::UNDEFINED,
            },
        );
        Ok(id)
    }

    pub fn destroy_texture(&mut self, id: TextureId) {
        let frame = self.ring.frame_count();
        match self.textures.remove(&id) {
            Some(entry) => {
                global_tracker().free_texture_allocation(entry.desc.byte_size());
                self.reclaim
                    .enqueue(ResourceKind::Texture, entry.raw.0, frame);
            }
            None => {
                debug_assert!(false, "double destroy of texture {:?}", id);
                log::warn!("Destroy of unknown texture {:?} ignored", id);
            }
        }
    }

    pub fn create_sampler(&mut self, desc: SamplerDesc) -> RenderResult<SamplerId> {
        let raw = self.backend.create_sampler(&desc)?;
        let id = SamplerId(self.next_id());
        self.samplers.insert(id, SamplerEntry { raw });
        Ok(id)
    }

    pub fn destroy_sampler(&mut self, id: SamplerId) {
        let frame = self.ring.frame_count();
        match self.samplers.remove(&id) {
            Some(entry) => self
                .reclaim
                .enqueue(ResourceKind::Sampler, entry.raw.0, frame),
            None => {
                debug_assert!(false, "double destroy of sampler {:?}", id);
                log::warn!("Destroy of unknown sampler {:?} ignored", id);
            }
        }
    }

    pub fn create_shader(&mut self, desc: ShaderDesc) -> RenderResult<ShaderId> {
        let raw = self.backend.create_shader(&desc)?;
        let id = ShaderId(self.next_id());
        self.shaders.insert(id, ShaderEntry { raw });
        Ok(id)
    }

    pub fn destroy_shader(&mut self, id: ShaderId) {
        let frame = self.ring.frame_count();
        match self.shaders.remove(&id) {
            Some(entry) => self
                .reclaim
                .enqueue(ResourceKind::Shader, entry.raw.0, frame),
            None => {
                debug_assert!(false, "double destroy of shader {:?}", id);
                log::warn!("Destroy of unknown shader {:?} ignored", id);
            }
        }
    }

    pub fn create_pipeline(&mut self, desc: PipelineDesc) -> RenderResult<PipelineId> {
        let mut raw_shaders = Vec::with_capacity(desc.shaders.len());
        for shader in &desc.shaders {
            let entry = self.shaders.get(shader).ok_or_else(|| {
                RenderError::config(format!("Pipeline references unknown shader {:?}", shader))
            })?;
            raw_shaders.push(entry.raw);
        }
        let hash = pipeline_hash(&desc);
        let raw = self.backend.create_pipeline(&desc, &raw_shaders)?;
        let id = PipelineId(self.next_id());
        self.pipelines.insert(
            id,
            PipelineEntry {
                raw,
                kind: desc.kind,
                layout: desc.layout,
                hash,
            },
        );
        Ok(id)
    }

    pub fn destroy_pipeline(&mut self, id: PipelineId) {
        let frame = self.ring.frame_count();
        match self.pipelines.remove(&id) {
            Some(entry) => self
                .reclaim
                .enqueue(ResourceKind::Pipeline, entry.raw.0, frame),
            None => {
                debug_assert!(false, "double destroy of pipeline {:?}", id);
                log::warn!("Destroy of unknown pipeline {:?} ignored", id);
            }
        }
    }

    /// Native handle of a live buffer, for collaborators that interface
    /// with the native API directly (swapchain plumbing, debug tooling).
    pub fn buffer_raw(&self, id: BufferId) -> RenderResult<RawBuffer> {
        self.buffers
            .get(&id)
            .map(|e| e.raw)
            .ok_or_else(|| RenderError::config(format!("Unknown buffer {:?}", id)))
    }

    /// Last state the resource was transitioned to.
    pub fn resource_state(&self, resource: GpuResource) -> RenderResult<ResourceState> {
        match resource {
            GpuResource::Buffer(id) => self
                .buffers
                .get(&id)
                .map(|e| e.state)
                .ok_or_else(|| RenderError::config(format!("Unknown buffer {:?}", id))),
            GpuResource::Texture(id) => self
                .textures
                .get(&id)
                .map(|e| e.state)
                .ok_or_else(|| RenderError::config(format!("Unknown texture {:?}", id))),
        }
    }

    // ---------- command streams ----------

    /// Claim a command stream for the given queue kind and begin
    /// recording. The index is stable: it maps to the same underlying
    /// native command buffer every time its frame slot comes around.
    pub fn request_command_stream(
        &mut self,
        queue: QueueKind,
    ) -> RenderResult<CommandStreamHandle> {
        let index = self.streams.claim()?;
        let slot = self.ring.current_slot_mut();
        let stream_slot = &mut slot.streams[index as usize];
        let (pool, cmd) = stream_slot.recording_state(&*self.backend, queue)?;
        self.backend.reset_command_pool(pool)?;
        stream_slot.arena.reset(&*self.backend);
        self.backend.begin_commands(cmd)?;
        self.streams.stream_mut(index).begin(queue, cmd);
        Ok(CommandStreamHandle(index))
    }

    pub fn bind_pipeline(
        &mut self,
        stream: CommandStreamHandle,
        pipeline: PipelineId,
    ) -> RenderResult<()> {
        let entry = self.pipelines.get(&pipeline).ok_or_else(|| {
            RenderError::config(format!("Bind of unknown pipeline {:?}", pipeline))
        })?;
        let (raw, hash) = (entry.raw, entry.hash);
        let s = self.streams.get_recording_mut(stream)?;
        if s.pipeline.map_or(false, |(_, bound)| bound == hash) {
            self.submit_stats.redundant_pipeline_binds += 1;
            return Ok(());
        }
        s.pipeline = Some((pipeline, hash));
        // A layout change invalidates the materialized descriptor set.
        s.table.mark_dirty();
        self.backend.cmd_bind_pipeline(s.cmd, raw);
        Ok(())
    }

    pub fn bind_constant_buffer(
        &mut self,
        stream: CommandStreamHandle,
        slot: u32,
        buffer: BufferId,
        offset: u64,
        size: u64,
    ) -> RenderResult<()> {
        if !self.buffers.contains_key(&buffer) {
            return Err(RenderError::config(format!(
                "Bind of unknown buffer {:?}",
                buffer
            )));
        }
        self.streams
            .get_recording_mut(stream)?
            .table
            .bind_constant_buffer(slot, buffer, offset, size)
    }

    pub fn bind_resource(
        &mut self,
        stream: CommandStreamHandle,
        slot: u32,
        resource: GpuResource,
        subresource: Option<u32>,
    ) -> RenderResult<()> {
        self.check_resource_live(resource)?;
        self.streams
            .get_recording_mut(stream)?
            .table
            .bind_resource(slot, resource, subresource)
    }

    pub fn bind_uav(
        &mut self,
        stream: CommandStreamHandle,
        slot: u32,
        resource: GpuResource,
        subresource: Option<u32>,
    ) -> RenderResult<()> {
        self.check_resource_live(resource)?;
        self.streams
            .get_recording_mut(stream)?
            .table
            .bind_uav(slot, resource, subresource)
    }

    pub fn bind_sampler(
        &mut self,
        stream: CommandStreamHandle,
        slot: u32,
        sampler: SamplerId,
    ) -> RenderResult<()> {
        if !self.samplers.contains_key(&sampler) {
            return Err(RenderError::config(format!(
                "Bind of unknown sampler {:?}",
                sampler
            )));
        }
        self.streams
            .get_recording_mut(stream)?
            .table
            .bind_sampler(slot, sampler)
    }

    fn check_resource_live(&self, resource: GpuResource) -> RenderResult<()> {
        let live = match resource {
            GpuResource::Buffer(id) => self.buffers.contains_key(&id),
            GpuResource::Texture(id) => self.textures.contains_key(&id),
        };
        if live {
            Ok(())
        } else {
            Err(RenderError::config(format!(
                "Bind of destroyed resource {:?}",
                resource
            )))
        }
    }

    /// Buffer push-constant bytes; written to the native stream at the
    /// next draw/dispatch, scoped to the active pipeline's declared range.
    pub fn set_push_constants(
        &mut self,
        stream: CommandStreamHandle,
        data: &[u8],
    ) -> RenderResult<()> {
        if data.len() > MAX_PUSH_CONSTANT_BYTES {
            return Err(RenderError::config(format!(
                "Push constant payload of {} bytes exceeds capacity {}",
                data.len(),
                MAX_PUSH_CONSTANT_BYTES
            )));
        }
        let s = self.streams.get_recording_mut(stream)?;
        s.push_constants[..data.len()].copy_from_slice(data);
        s.push_len = data.len() as u32;
        s.push_dirty = true;
        Ok(())
    }

    /// Typed push-constant helper.
    pub fn push_constants<T: bytemuck::Pod>(
        &mut self,
        stream: CommandStreamHandle,
        value: &T,
    ) -> RenderResult<()> {
        self.set_push_constants(stream, bytemuck::bytes_of(value))
    }

    /// Stage `data` through the stream's staging allocator and record a
    /// copy into `dst`.
    pub fn write_buffer(
        &mut self,
        stream: CommandStreamHandle,
        dst: BufferId,
        dst_offset: u64,
        data: &[u8],
    ) -> RenderResult<()> {
        let dst_raw = self.buffer_raw(dst)?;
        let cmd = self.streams.get_recording(stream)?.cmd;
        let frame = self.ring.frame_count();
        let reclaim = &mut self.reclaim;
        let slot = self.ring.current_slot_mut();
        let staging = &mut slot.streams[stream.0 as usize].staging;
        let allocation = staging.allocate(&*self.backend, frame, data.len() as u64, |raw| {
            reclaim.enqueue(ResourceKind::Buffer, raw.0, frame)
        })?;
        self.backend
            .write_buffer(allocation.buffer, allocation.offset, data);
        self.backend.cmd_copy_buffer(
            cmd,
            allocation.buffer,
            allocation.offset,
            dst_raw,
            dst_offset,
            data.len() as u64,
        );
        Ok(())
    }

    /// Record a buffer-to-buffer copy on the stream.
    pub fn copy_buffer(
        &mut self,
        stream: CommandStreamHandle,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> RenderResult<()> {
        let src_raw = self.buffer_raw(src)?;
        let dst_raw = self.buffer_raw(dst)?;
        let cmd = self.streams.get_recording(stream)?.cmd;
        self.flush_barriers(stream)?;
        self.backend
            .cmd_copy_buffer(cmd, src_raw, src_offset, dst_raw, dst_offset, size);
        Ok(())
    }

    // ---------- transitions and waits ----------

    /// Record that `resource` must be in `new_state` for this stream's
    /// subsequent commands. Same-state and read-after-read requests emit
    /// nothing; everything else accumulates into one batched barrier call.
    pub fn request_transition(
        &mut self,
        stream: CommandStreamHandle,
        resource: GpuResource,
        new_state: ResourceState,
    ) -> RenderResult<()> {
        self.streams.get_recording(stream)?;
        let (raw, old) = match resource {
            GpuResource::Buffer(id) => {
                let entry = self
                    .buffers
                    .get_mut(&id)
                    .ok_or_else(|| RenderError::config(format!("Unknown buffer {:?}", id)))?;
                let old = entry.state;
                entry.state = new_state;
                (RawResource::Buffer(entry.raw), old)
            }
            GpuResource::Texture(id) => {
                let entry = self
                    .textures
                    .get_mut(&id)
                    .ok_or_else(|| RenderError::config(format!("Unknown texture {:?}", id)))?;
                let old = entry.state;
                entry.state = new_state;
                (RawResource::Texture(entry.raw), old)
            }
        };
        if old == new_state || (old.is_read_only() && new_state.is_read_only()) {
            self.submit_stats.transitions_skipped += 1;
            return Ok(());
        }
        let s = self.streams.get_recording_mut(stream)?;
        merge_transition(&mut s.pending_barriers, resource, raw, old, new_state);
        Ok(())
    }

    /// Batched transition convenience.
    pub fn set_barriers(
        &mut self,
        stream: CommandStreamHandle,
        transitions: &[(GpuResource, ResourceState)],
    ) -> RenderResult<()> {
        for &(resource, state) in transitions {
            self.request_transition(stream, resource, state)?;
        }
        Ok(())
    }

    /// Declare that `stream` may not begin executing until `waits_for`
    /// has signaled. Both streams must belong to the current in-flight
    /// frame; cross-frame waits are not supported at this layer.
    pub fn declare_wait(
        &mut self,
        stream: CommandStreamHandle,
        waits_for: CommandStreamHandle,
    ) -> RenderResult<()> {
        if stream == waits_for {
            return Err(RenderError::config(format!(
                "Stream {} cannot wait on itself",
                stream.0
            )));
        }
        self.streams.get_recording(waits_for)?;
        let s = self.streams.get_recording_mut(stream)?;
        if !s.waits.contains(&waits_for.0) {
            s.waits.push(waits_for.0);
        }
        Ok(())
    }

    // ---------- draws and dispatches ----------

    pub fn draw(
        &mut self,
        stream: CommandStreamHandle,
        vertex_count: u32,
        instance_count: u32,
    ) -> RenderResult<()> {
        let cmd = self.prepare_execution(stream, PipelineKind::Graphics)?;
        self.backend.cmd_draw(cmd, vertex_count, instance_count);
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        stream: CommandStreamHandle,
        index_count: u32,
        instance_count: u32,
    ) -> RenderResult<()> {
        let cmd = self.prepare_execution(stream, PipelineKind::Graphics)?;
        self.backend.cmd_draw_indexed(cmd, index_count, instance_count);
        Ok(())
    }

    pub fn dispatch(
        &mut self,
        stream: CommandStreamHandle,
        x: u32,
        y: u32,
        z: u32,
    ) -> RenderResult<()> {
        let cmd = self.prepare_execution(stream, PipelineKind::Compute)?;
        self.backend.cmd_dispatch(cmd, x, y, z);
        Ok(())
    }

    /// Flush accumulated transitions as one batched barrier call.
    fn flush_barriers(&mut self, stream: CommandStreamHandle) -> RenderResult<()> {
        let s = self.streams.get_recording_mut(stream)?;
        if s.pending_barriers.is_empty() {
            return Ok(());
        }
        let cmd = s.cmd;
        let pending = std::mem::take(&mut s.pending_barriers);
        let barriers = native_barriers(&pending);
        self.backend.cmd_barriers(cmd, &barriers);
        self.submit_stats.barriers_emitted += barriers.len() as u64;
        Ok(())
    }

    /// The implicit pre-draw flush: barriers, then descriptors (if the
    /// table is dirty), then buffered push constants. Afterwards the
    /// native bind state exactly reflects the logical table as of the
    /// most recent bind calls.
    fn prepare_execution(
        &mut self,
        stream: CommandStreamHandle,
        require: PipelineKind,
    ) -> RenderResult<RawCommandBuffer> {
        let (cmd, queue, bound) = {
            let s = self.streams.get_recording(stream)?;
            (s.cmd, s.queue, s.pipeline)
        };
        let (pipeline_id, _) = bound.ok_or_else(|| {
            RenderError::config(format!("Stream {} has no pipeline bound", stream.0))
        })?;
        let entry = self.pipelines.get(&pipeline_id).ok_or_else(|| {
            RenderError::config(format!("Active pipeline {:?} was destroyed", pipeline_id))
        })?;
        if entry.kind != require {
            return Err(RenderError::config(format!(
                "Pipeline {:?} kind mismatch on stream {}",
                pipeline_id, stream.0
            )));
        }
        match require {
            PipelineKind::Graphics => {
                if queue != QueueKind::Graphics {
                    return Err(RenderError::config(format!(
                        "Draw on non-graphics stream {}",
                        stream.0
                    )));
                }
            }
            PipelineKind::Compute => {
                if queue == QueueKind::Copy {
                    return Err(RenderError::config(format!(
                        "Dispatch on copy-queue stream {}",
                        stream.0
                    )));
                }
            }
        }
        let push_size = entry.layout.push_constant_size;

        self.flush_barriers(stream)?;

        if self.streams.get(stream)?.table.dirty() {
            let writes = {
                let s = self.streams.get(stream)?;
                let entry = &self.pipelines[&pipeline_id];
                self.build_writes(&s.table, &entry.layout)?
            };
            if !writes.is_empty() {
                let frame = self.ring.frame_count();
                let reclaim = &mut self.reclaim;
                let slot = self.ring.current_slot_mut();
                let arena = &mut slot.streams[stream.0 as usize].arena;
                let set = arena.allocate(&*self.backend, writes.len() as u32, |old| {
                    reclaim.enqueue(ResourceKind::DescriptorPool, old.0, frame)
                })?;
                self.backend.write_descriptors(set, &writes);
                self.backend.cmd_bind_descriptor_set(cmd, set);
            }
            self.streams.get_mut(stream)?.table.clear_dirty();
            self.submit_stats.descriptor_flushes += 1;
        }

        let s = self.streams.get_mut(stream)?;
        if s.push_dirty && push_size > 0 {
            let len = (s.push_len as usize).min(push_size as usize);
            self.backend.cmd_push_constants(cmd, &s.push_constants[..len]);
            s.push_dirty = false;
        }
        Ok(cmd)
    }

    /// Resolve the bound slots the active layout declares into descriptor
    /// writes, skipping immutable samplers and unbound slots.
    fn build_writes(
        &self,
        table: &BindingTable,
        layout: &BindingLayout,
    ) -> RenderResult<Vec<DescriptorWrite>> {
        let mut writes = Vec::with_capacity(layout.entries.len());
        for entry in &layout.entries {
            match entry.kind {
                BindingKind::ConstantBuffer => {
                    if let Some(binding) = table.constant_buffer(entry.slot) {
                        let raw = self.buffer_raw(binding.buffer)?;
                        writes.push(DescriptorWrite {
                            slot: entry.slot,
                            resource: DescriptorResource::Buffer {
                                buffer: raw,
                                offset: binding.offset,
                                size: binding.size,
                            },
                        });
                    }
                }
                BindingKind::ShaderResource => {
                    if let Some(binding) = table.resource(entry.slot) {
                        writes.push(DescriptorWrite {
                            slot: entry.slot,
                            resource: self.resolve_resource(binding.resource, binding.subresource)?,
                        });
                    }
                }
                BindingKind::UnorderedAccess => {
                    if let Some(binding) = table.uav(entry.slot) {
                        writes.push(DescriptorWrite {
                            slot: entry.slot,
                            resource: self.resolve_resource(binding.resource, binding.subresource)?,
                        });
                    }
                }
                BindingKind::Sampler => {
                    if entry.immutable_sampler {
                        continue;
                    }
                    if let Some(sampler) = table.sampler(entry.slot) {
                        let raw = self
                            .samplers
                            .get(&sampler)
                            .ok_or_else(|| {
                                RenderError::config(format!(
                                    "Bound sampler {:?} was destroyed",
                                    sampler
                                ))
                            })?
                            .raw;
                        writes.push(DescriptorWrite {
                            slot: entry.slot,
                            resource: DescriptorResource::Sampler(raw),
                        });
                    }
                }
            }
        }
        Ok(writes)
    }

    fn resolve_resource(
        &self,
        resource: GpuResource,
        subresource: Option<u32>,
    ) -> RenderResult<DescriptorResource> {
        match resource {
            GpuResource::Buffer(id) => {
                let entry = self
                    .buffers
                    .get(&id)
                    .ok_or_else(|| RenderError::config(format!("Bound buffer {:?} was destroyed", id)))?;
                Ok(DescriptorResource::Buffer {
                    buffer: entry.raw,
                    offset: 0,
                    size: entry.desc.size,
                })
            }
            GpuResource::Texture(id) => {
                let entry = self
                    .textures
                    .get(&id)
                    .ok_or_else(|| RenderError::config(format!("Bound texture {:?} was destroyed", id)))?;
                Ok(DescriptorResource::Texture {
                    texture: entry.raw,
                    subresource,
                })
            }
        }
    }

    // ---------- uploads ----------

    /// Begin recording an upload context on the copy queue, independent of
    /// the frame cadence.
    pub fn begin_upload(&mut self) -> RenderResult<UploadContextId> {
        self.upload.allocate(&*self.backend)
    }

    /// Stage `data` and copy it into `dst` through the upload context.
    pub fn upload_buffer(
        &mut self,
        context: UploadContextId,
        dst: BufferId,
        dst_offset: u64,
        data: &[u8],
    ) -> RenderResult<()> {
        let raw = self.buffer_raw(dst)?;
        self.upload
            .write_buffer(&*self.backend, context, raw, dst_offset, data)
    }

    /// Typed upload convenience.
    pub fn upload_buffer_typed<T: bytemuck::Pod>(
        &mut self,
        context: UploadContextId,
        dst: BufferId,
        dst_offset: u64,
        data: &[T],
    ) -> RenderResult<()> {
        self.upload_buffer(context, dst, dst_offset, bytemuck::cast_slice(data))
    }

    pub fn upload_texture(
        &mut self,
        context: UploadContextId,
        dst: TextureId,
        data: &[u8],
    ) -> RenderResult<()> {
        let raw = self
            .textures
            .get(&dst)
            .map(|e| e.raw)
            .ok_or_else(|| RenderError::config(format!("Unknown texture {:?}", dst)))?;
        self.upload.write_texture(&*self.backend, context, raw, data)
    }

    /// Submit all recording upload contexts as one copy-queue batch.
    pub fn submit_uploads(&mut self) -> RenderResult<()> {
        self.upload.submit(&*self.backend)
    }

    // ---------- end of frame ----------

    /// End-of-frame entry point: close every requested stream, resolve the
    /// submission graph, hand batches to the queues, then advance the ring
    /// and drain reclamation. A planning failure aborts before anything is
    /// handed to the hardware, so no partial batch is ever submitted.
    pub fn submit_all(&mut self) -> RenderResult<()> {
        self.upload.recycle(&*self.backend);

        let active: Vec<u32> = self.streams.active().to_vec();
        for &index in &active {
            let s = self.streams.stream_mut(index);
            debug_assert!(s.state == StreamState::Recording);
            let cmd = s.cmd;
            let pending = std::mem::take(&mut s.pending_barriers);
            if !pending.is_empty() {
                let barriers = native_barriers(&pending);
                self.backend.cmd_barriers(cmd, &barriers);
                self.submit_stats.barriers_emitted += barriers.len() as u64;
            }
            self.backend.end_commands(cmd)?;
            self.streams.stream_mut(index).state = StreamState::Pending;
        }

        let plans = {
            let slot = self.ring.current_slot_mut();
            plan_batches(&self.streams, slot, &*self.backend)?
        };

        // An empty frame keeps the copy dependency pending for the next
        // frame that actually submits.
        let upload_wait = if plans.is_empty() {
            None
        } else {
            self.upload.take_pending_sync()
        };
        let mut upload_wait_inserted = [false; QUEUE_KIND_COUNT];

        let mut last_per_queue: [Option<usize>; QUEUE_KIND_COUNT] = [None; QUEUE_KIND_COUNT];
        for (i, plan) in plans.iter().enumerate() {
            last_per_queue[plan.queue.index()] = Some(i);
        }

        for (i, plan) in plans.iter().enumerate() {
            let mut batch = SubmitBatch {
                command_buffers: plan
                    .streams
                    .iter()
                    .map(|&s| self.streams.stream(s).cmd)
                    .collect(),
                wait_semaphores: plan.waits.to_vec(),
                signal_semaphores: plan.signals.to_vec(),
                ..Default::default()
            };
            if let Some((timeline, value)) = upload_wait {
                if !upload_wait_inserted[plan.queue.index()] {
                    batch.wait_timelines.push((timeline, value));
                    upload_wait_inserted[plan.queue.index()] = true;
                }
            }
            if last_per_queue[plan.queue.index()] == Some(i) {
                let slot = self.ring.current_slot_mut();
                batch.signal_fence = Some(slot.fence(plan.queue));
                slot.mark_submitted(plan.queue);
            }
            self.backend.submit(plan.queue, &batch)?;
            self.submit_stats.batches_submitted += 1;
        }

        self.submit_stats.frames_submitted += 1;
        self.streams.recycle();

        let frame = self.ring.advance(&*self.backend)?;
        self.reclaim.drain(&*self.backend, frame, self.ring.depth());
        Ok(())
    }

    // ---------- diagnostics ----------

    pub fn submit_stats(&self) -> SubmitStats {
        self.submit_stats
    }

    pub fn upload_stats(&self) -> UploadStats {
        self.upload.stats()
    }

    pub fn reclaim_stats(&self) -> ReclaimStats {
        self.reclaim.stats()
    }

    /// Staging stats of one stream's allocator in the current frame slot.
    pub fn staging_stats(&self, stream: CommandStreamHandle) -> RenderResult<StagingStats> {
        let slot = self.ring.current_slot();
        slot.streams
            .get(stream.0 as usize)
            .map(|s| s.staging.stats())
            .ok_or_else(|| RenderError::config(format!("Unknown command stream {}", stream.0)))
    }

    pub fn memory_metrics(&self) -> MemoryMetrics {
        global_tracker().get_metrics()
    }

    // ---------- shutdown ----------

    /// Wait for all in-flight work (the upload wait is the one unbounded
    /// block), release every queued and still-live object, and tear down
    /// the frame slots. Idempotent.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.ring.wait_idle(&*self.backend)?;
        self.upload.shutdown(&*self.backend)?;

        let leftovers = self.buffers.len()
            + self.textures.len()
            + self.samplers.len()
            + self.shaders.len()
            + self.pipelines.len();
        if leftovers > 0 {
            log::warn!("{} objects still live at shutdown", leftovers);
        }
        let frame = self.ring.frame_count();
        for (_, entry) in self.buffers.drain() {
            global_tracker().free_buffer_allocation(entry.desc.size, entry.desc.host_visible);
            self.reclaim.enqueue(ResourceKind::Buffer, entry.raw.0, frame);
        }
        for (_, entry) in self.textures.drain() {
            global_tracker().free_texture_allocation(entry.desc.byte_size());
            self.reclaim.enqueue(ResourceKind::Texture, entry.raw.0, frame);
        }
        for (_, entry) in self.samplers.drain() {
            self.reclaim.enqueue(ResourceKind::Sampler, entry.raw.0, frame);
        }
        for (_, entry) in self.shaders.drain() {
            self.reclaim.enqueue(ResourceKind::Shader, entry.raw.0, frame);
        }
        for (_, entry) in self.pipelines.drain() {
            self.reclaim.enqueue(ResourceKind::Pipeline, entry.raw.0, frame);
        }
        self.reclaim.flush_all(&*self.backend);
        self.ring.destroy(&*self.backend);
        self.shut_down = true;
        log::info!("Device shut down");
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if !self.shut_down {
            if let Err(err) = self.shutdown() {
                log::error!("Device shutdown during drop failed: {}", err);
            }
        }
    }
}
