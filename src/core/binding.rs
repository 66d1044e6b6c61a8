//! Logical binding table and descriptor materialization.
//!
//! Binding calls mutate fixed-capacity slot arrays and only mark the owning
//! command stream dirty on an actual value change, so redundant rebinds of
//! the same resource (shared materials iterated across draw calls) cost
//! nothing. Nothing native is created until the flush that runs right
//! before a draw or dispatch.

use crate::backend::{NativeBackend, RawDescriptorPool, RawDescriptorSet};
use crate::core::types::{
    BufferId, GpuResource, SamplerId, CONSTANT_BUFFER_SLOTS, SAMPLER_SLOTS, SHADER_RESOURCE_SLOTS,
    UNORDERED_ACCESS_SLOTS,
};
use crate::error::{RenderError, RenderResult};

/// A constant buffer bound with an offset/size window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBufferBinding {
    pub buffer: BufferId,
    pub offset: u64,
    pub size: u64,
}

/// A shader-resource or unordered-access binding, optionally narrowed to a
/// single subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBinding {
    pub resource: GpuResource,
    pub subresource: Option<u32>,
}

/// The set of resources bound to shader-visible slots for one command
/// stream.
#[derive(Debug)]
pub struct BindingTable {
    constant_buffers: [Option<ConstantBufferBinding>; CONSTANT_BUFFER_SLOTS],
    resources: [Option<ResourceBinding>; SHADER_RESOURCE_SLOTS],
    unordered: [Option<ResourceBinding>; UNORDERED_ACCESS_SLOTS],
    samplers: [Option<SamplerId>; SAMPLER_SLOTS],
    dirty: bool,
}

impl Default for BindingTable {
    fn default() -> Self {
        Self {
            constant_buffers: [None; CONSTANT_BUFFER_SLOTS],
            resources: [None; SHADER_RESOURCE_SLOTS],
            unordered: [None; UNORDERED_ACCESS_SLOTS],
            samplers: [None; SAMPLER_SLOTS],
            dirty: false,
        }
    }
}

fn check_slot(slot: u32, capacity: usize, what: &str) -> RenderResult<usize> {
    let index = slot as usize;
    if index >= capacity {
        return Err(RenderError::config(format!(
            "{} slot {} out of range (capacity {})",
            what, slot, capacity
        )));
    }
    Ok(index)
}

impl BindingTable {
    /// Clear every slot and the dirty flag (stream reuse).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Force a flush before the next draw (pipeline/layout change).
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn bind_constant_buffer(
        &mut self,
        slot: u32,
        buffer: BufferId,
        offset: u64,
        size: u64,
    ) -> RenderResult<()> {
        let index = check_slot(slot, CONSTANT_BUFFER_SLOTS, "Constant buffer")?;
        let binding = Some(ConstantBufferBinding {
            buffer,
            offset,
            size,
        });
        if self.constant_buffers[index] != binding {
            self.constant_buffers[index] = binding;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn bind_resource(
        &mut self,
        slot: u32,
        resource: GpuResource,
        subresource: Option<u32>,
    ) -> RenderResult<()> {
        let index = check_slot(slot, SHADER_RESOURCE_SLOTS, "Shader resource")?;
        let binding = Some(ResourceBinding {
            resource,
            subresource,
        });
        if self.resources[index] != binding {
            self.resources[index] = binding;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn bind_uav(
        &mut self,
        slot: u32,
        resource: GpuResource,
        subresource: Option<u32>,
    ) -> RenderResult<()> {
        let index = check_slot(slot, UNORDERED_ACCESS_SLOTS, "Unordered access")?;
        let binding = Some(ResourceBinding {
            resource,
            subresource,
        });
        if self.unordered[index] != binding {
            self.unordered[index] = binding;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn bind_sampler(&mut self, slot: u32, sampler: SamplerId) -> RenderResult<()> {
        let index = check_slot(slot, SAMPLER_SLOTS, "Sampler")?;
        if self.samplers[index] != Some(sampler) {
            self.samplers[index] = Some(sampler);
            self.dirty = true;
        }
        Ok(())
    }

    pub fn constant_buffer(&self, slot: u32) -> Option<ConstantBufferBinding> {
        self.constant_buffers.get(slot as usize).copied().flatten()
    }

    pub fn resource(&self, slot: u32) -> Option<ResourceBinding> {
        self.resources.get(slot as usize).copied().flatten()
    }

    pub fn uav(&self, slot: u32) -> Option<ResourceBinding> {
        self.unordered.get(slot as usize).copied().flatten()
    }

    pub fn sampler(&self, slot: u32) -> Option<SamplerId> {
        self.samplers.get(slot as usize).copied().flatten()
    }
}

/// Per-stream descriptor allocation pool for one frame slot.
///
/// Capacity is denominated in descriptor writes. Exhaustion is recovered
/// locally: the pool doubles, the old native pool is retired through the
/// deferred-destruction path (live sets may still be referenced by
/// in-flight frames), and the allocation is retried once. Failure after
/// growth is promoted to a configuration error.
#[derive(Debug)]
pub struct DescriptorArena {
    raw: RawDescriptorPool,
    capacity: u32,
    used: u32,
    grow_events: u64,
}

impl DescriptorArena {
    pub fn new(backend: &dyn NativeBackend, capacity: u32) -> RenderResult<Self> {
        let raw = backend.create_descriptor_pool(capacity)?;
        Ok(Self {
            raw,
            capacity,
            used: 0,
            grow_events: 0,
        })
    }

    /// Reset for a new frame. The pool's sets from `buffering_depth`
    /// frames ago are no longer referenced by construction of the ring
    /// advance.
    pub fn reset(&mut self, backend: &dyn NativeBackend) {
        backend.reset_descriptor_pool(self.raw);
        self.used = 0;
    }

    /// Allocate one descriptor set covering `writes` descriptor writes.
    pub fn allocate(
        &mut self,
        backend: &dyn NativeBackend,
        writes: u32,
        on_retire: impl FnOnce(RawDescriptorPool),
    ) -> RenderResult<RawDescriptorSet> {
        if self.used + writes > self.capacity {
            let grown = self.capacity * 2;
            if writes > grown {
                return Err(RenderError::config(format!(
                    "Descriptor arena exhausted: {} writes requested, capacity {} even after growth to {}",
                    writes, self.capacity, grown
                )));
            }
            on_retire(self.raw);
            self.raw = backend.create_descriptor_pool(grown)?;
            log::info!(
                "Descriptor arena grown from {} to {} writes",
                self.capacity,
                grown
            );
            self.capacity = grown;
            self.used = 0;
            self.grow_events += 1;
        }
        let set = backend.allocate_descriptor_set(self.raw)?;
        self.used += writes;
        Ok(set)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn grow_events(&self) -> u64 {
        self.grow_events
    }

    /// Destroy the native pool (shutdown path).
    pub fn destroy(&mut self, backend: &dyn NativeBackend) {
        backend.destroy_descriptor_pool(self.raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;

    #[test]
    fn test_rebinding_same_resource_stays_clean() {
        let mut table = BindingTable::default();
        let buffer = BufferId(1);

        table.bind_constant_buffer(0, buffer, 0, 256).unwrap();
        assert!(table.dirty());

        table.clear_dirty();
        table.bind_constant_buffer(0, buffer, 0, 256).unwrap();
        assert!(!table.dirty());

        // A different window on the same buffer is a real change.
        table.bind_constant_buffer(0, buffer, 256, 256).unwrap();
        assert!(table.dirty());
    }

    #[test]
    fn test_out_of_range_slot_is_config_error() {
        let mut table = BindingTable::default();
        let err = table
            .bind_sampler(SAMPLER_SLOTS as u32, SamplerId(1))
            .unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
    }

    #[test]
    fn test_arena_grows_once_and_retries() {
        let backend = NullBackend::new();
        let mut arena = DescriptorArena::new(&backend, 16).unwrap();

        let mut retired = None;
        let set = arena
            .allocate(&backend, 17, |old| retired = Some(old))
            .unwrap();
        assert!(retired.is_some());
        assert_eq!(arena.capacity(), 32);
        assert_eq!(arena.grow_events(), 1);
        assert!(set.0 != 0);
    }

    #[test]
    fn test_arena_promotes_second_failure() {
        let backend = NullBackend::new();
        let mut arena = DescriptorArena::new(&backend, 16).unwrap();
        let err = arena.allocate(&backend, 64, |_| {}).unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
    }
}
