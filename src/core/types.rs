//! Foundational types shared across the lifecycle core.
//!
//! Queue kinds, typed object handles, resource state and stage masks, and
//! the descriptor structs consumed from collaborators. Everything here is
//! backend-agnostic; native handles live in the `backend` module.

/// Number of hardware queue kinds the core schedules across.
pub const QUEUE_KIND_COUNT: usize = 3;

/// Binding table slot counts. Fixed-capacity arrays keep binding and flush
/// O(bound slots) with no per-frame allocation.
pub const CONSTANT_BUFFER_SLOTS: usize = 8;
pub const SHADER_RESOURCE_SLOTS: usize = 16;
pub const UNORDERED_ACCESS_SLOTS: usize = 8;
pub const SAMPLER_SLOTS: usize = 8;

/// Push-constant scratch capacity per command stream, in bytes.
pub const MAX_PUSH_CONSTANT_BYTES: usize = 128;

/// Hardware queue kind a command stream records for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
    Copy,
}

impl QueueKind {
    pub const ALL: [QueueKind; QUEUE_KIND_COUNT] =
        [QueueKind::Graphics, QueueKind::Compute, QueueKind::Copy];

    /// Dense index for per-queue arrays.
    pub fn index(self) -> usize {
        match self {
            QueueKind::Graphics => 0,
            QueueKind::Compute => 1,
            QueueKind::Copy => 2,
        }
    }

    /// Pipeline stage mask a consumer on this queue waits at. Never empty.
    pub fn default_stage_mask(self) -> StageMask {
        match self {
            QueueKind::Graphics => StageMask::ALL_GRAPHICS,
            QueueKind::Compute => StageMask::COMPUTE,
            QueueKind::Copy => StageMask::TRANSFER,
        }
    }
}

/// GPU object kind, used to key the per-kind reclamation queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Sampler,
    Shader,
    Pipeline,
    DescriptorPool,
}

impl ResourceKind {
    pub const COUNT: usize = 6;

    pub fn index(self) -> usize {
        match self {
            ResourceKind::Buffer => 0,
            ResourceKind::Texture => 1,
            ResourceKind::Sampler => 2,
            ResourceKind::Shader => 3,
            ResourceKind::Pipeline => 4,
            ResourceKind::DescriptorPool => 5,
        }
    }
}

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Opaque identity of the object, stable for its lifetime.
            pub fn value(self) -> u64 {
                self.0
            }
        }
    };
}

object_id!(
    /// Handle to a buffer object.
    BufferId
);
object_id!(
    /// Handle to a texture object.
    TextureId
);
object_id!(
    /// Handle to a sampler object.
    SamplerId
);
object_id!(
    /// Handle to a shader object.
    ShaderId
);
object_id!(
    /// Handle to a pipeline object.
    PipelineId
);

/// A buffer or texture referenced from a binding slot or a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuResource {
    Buffer(BufferId),
    Texture(TextureId),
}

bitflags::bitflags! {
    /// Hardware-visible access state of a buffer or texture. Transition
    /// requests compare against the last known state; read-to-read changes
    /// never emit a barrier.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        const UNDEFINED        = 0;
        const VERTEX_BUFFER    = 1 << 0;
        const INDEX_BUFFER     = 1 << 1;
        const CONSTANT_BUFFER  = 1 << 2;
        const SHADER_RESOURCE  = 1 << 3;
        const UNORDERED_ACCESS = 1 << 4;
        const RENDER_TARGET    = 1 << 5;
        const DEPTH_READ       = 1 << 6;
        const DEPTH_WRITE      = 1 << 7;
        const INDIRECT_ARG     = 1 << 8;
        const COPY_SRC         = 1 << 9;
        const COPY_DST         = 1 << 10;
    }
}

impl ResourceState {
    const READ_ONLY: ResourceState = ResourceState::VERTEX_BUFFER
        .union(ResourceState::INDEX_BUFFER)
        .union(ResourceState::CONSTANT_BUFFER)
        .union(ResourceState::SHADER_RESOURCE)
        .union(ResourceState::DEPTH_READ)
        .union(ResourceState::INDIRECT_ARG)
        .union(ResourceState::COPY_SRC);

    /// True when every set access in the mask is a read. A transition
    /// between two read-only states requires no hardware ordering.
    pub fn is_read_only(self) -> bool {
        !self.is_empty() && ResourceState::READ_ONLY.contains(self)
    }
}

bitflags::bitflags! {
    /// Pipeline stages referenced by cross-queue waits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StageMask: u32 {
        const VERTEX       = 1 << 0;
        const FRAGMENT     = 1 << 1;
        const COMPUTE      = 1 << 2;
        const TRANSFER     = 1 << 3;
        const ALL_GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

bitflags::bitflags! {
    /// Declared usage of a buffer at creation time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX   = 1 << 0;
        const INDEX    = 1 << 1;
        const CONSTANT = 1 << 2;
        const STORAGE  = 1 << 3;
        const INDIRECT = 1 << 4;
        const COPY_SRC = 1 << 5;
        const COPY_DST = 1 << 6;
    }
}

bitflags::bitflags! {
    /// Declared usage of a texture at creation time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED       = 1 << 0;
        const STORAGE       = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DEPTH_STENCIL = 1 << 3;
        const COPY_SRC      = 1 << 4;
        const COPY_DST      = 1 << 5;
    }
}

/// Texel formats the core needs to size allocations for. Collaborator
/// translation tables map these onto the native API's full format set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Rgba16Float,
    R32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    /// Bytes per texel, used for memory accounting.
    pub fn bytes_per_texel(self) -> u64 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::R32Float
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8 => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

/// Shader pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// Description of a buffer to create.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    /// CPU-visible memory; counted against the host-visible budget.
    pub host_visible: bool,
}

/// Description of a texture to create.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub depth_or_layers: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl TextureDesc {
    /// Approximate allocation size including a full mip chain.
    pub fn byte_size(&self) -> u64 {
        let base = self.width as u64 * self.height as u64 * self.depth_or_layers as u64;
        let mut total = 0u64;
        let mut level = base;
        for _ in 0..self.mip_levels.max(1) {
            total += level;
            level = (level / 4).max(1);
        }
        total * self.format.bytes_per_texel()
    }
}

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Texture addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Repeat,
    ClampToEdge,
    MirrorRepeat,
}

/// Description of a sampler to create.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDesc {
    pub label: Option<String>,
    pub filter: FilterMode,
    pub address: AddressMode,
    pub anisotropy: u8,
}

/// Description of a shader to create. Bytecode arrives pre-compiled from
/// the collaborating shader pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderDesc {
    pub label: Option<String>,
    pub stage: ShaderStage,
    pub bytecode: Vec<u8>,
}

/// Kind of binding a pipeline layout slot declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    Sampler,
}

/// One slot declared by a pipeline's binding layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingLayoutEntry {
    pub slot: u32,
    pub kind: BindingKind,
    /// Compile-time sampler baked into the pipeline; the flush never
    /// writes a descriptor for it.
    pub immutable_sampler: bool,
}

/// The set of shader-visible slots a pipeline declares, plus its
/// push-constant range.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BindingLayout {
    pub entries: Vec<BindingLayoutEntry>,
    pub push_constant_size: u32,
}

/// Whether a pipeline drives draws or dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

/// Description of a pipeline to create. Fixed-function state beyond what
/// the lifecycle core needs (layout, shaders, kind) is opaque to it.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDesc {
    pub label: Option<String>,
    pub kind: PipelineKind,
    pub shaders: Vec<ShaderId>,
    pub layout: BindingLayout,
}
