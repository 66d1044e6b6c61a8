//! Frame-pipelined GPU command submission and resource lifecycle core.
//!
//! Sits between application rendering code and a native graphics driver
//! API and solves the three coupled problems of multi-frame-in-flight
//! rendering:
//!
//! - reclaiming GPU resources only after the hardware has finished
//!   referencing them (frame ring + tagged reclamation queues),
//! - allocating and recycling per-frame command recording contexts across
//!   graphics, compute and copy queues,
//! - re-binding shader-visible resource tables without redundant driver
//!   calls (value-compared binding table + lazy descriptor flush).
//!
//! The native API is abstracted behind [`backend::NativeBackend`];
//! [`backend::null::NullBackend`] records every call so the whole
//! lifecycle is testable without a live device.

pub mod backend;
pub mod core;
pub mod device;
pub mod error;

pub use crate::core::config::DeviceConfig;
pub use crate::core::memory_tracker::MemoryMetrics;
pub use crate::core::reclaim::ReclaimStats;
pub use crate::core::staging::{StagingAllocation, StagingStats};
pub use crate::core::streams::CommandStreamHandle;
pub use crate::core::submit::SubmitStats;
pub use crate::core::types::{
    AddressMode, BindingKind, BindingLayout, BindingLayoutEntry, BufferDesc, BufferId, BufferUsage,
    FilterMode, GpuResource, PipelineDesc, PipelineId, PipelineKind, QueueKind, ResourceState,
    SamplerDesc, SamplerId, ShaderDesc, ShaderId, ShaderStage, StageMask, TextureDesc,
    TextureFormat, TextureId, TextureUsage,
};
pub use crate::core::upload::{UploadContextId, UploadStats};
pub use crate::device::Device;
pub use crate::error::{RenderError, RenderResult};
