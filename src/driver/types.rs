use bitflags::bitflags;
#[cfg(feature = "veneer-serde")]
use serde::{Deserialize, Serialize};

pub use crate::utils::handle::Handle;

//===----------------------------------------------------------------------===//
// Handle markers
//===----------------------------------------------------------------------===//

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Resource;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ResourceView;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Sampler;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Pipeline;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PipelineLayout;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct QueryPool;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorSet;

//===----------------------------------------------------------------------===//
// Formats and usage
//===----------------------------------------------------------------------===//

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Format {
    #[default]
    Unknown,
    R8Unorm,
    R32Uint,
    R32Float,
    RGBA8Unorm,
    RGBA8UnormSrgb,
    BGRA8Unorm,
    RGBA16Float,
    RGBA32Float,
    D16Unorm,
    D24UnormS8Uint,
    D32Float,
}

impl Format {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::R8Unorm => 1,
            Format::D16Unorm => 2,
            Format::R32Uint
            | Format::R32Float
            | Format::RGBA8Unorm
            | Format::RGBA8UnormSrgb
            | Format::BGRA8Unorm
            | Format::D24UnormS8Uint
            | Format::D32Float => 4,
            Format::RGBA16Float => 8,
            Format::RGBA32Float => 16,
        }
    }

    pub fn is_depth_stencil(&self) -> bool {
        matches!(self, Format::D16Unorm | Format::D24UnormS8Uint | Format::D32Float)
    }

    /// Typed storage views cannot use sRGB formats.
    pub fn to_linear(self) -> Self {
        match self {
            Format::RGBA8UnormSrgb => Format::RGBA8Unorm,
            other => other,
        }
    }
}

bitflags! {
    /// How a resource is being used. Values line up with the native resource
    /// state bits so most usages translate one to one.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceUsage: u32 {
        const VERTEX_BUFFER             = 0x1;
        const INDEX_BUFFER              = 0x2;
        const RENDER_TARGET             = 0x4;
        const UNORDERED_ACCESS          = 0x8;
        const DEPTH_STENCIL_WRITE       = 0x10;
        const DEPTH_STENCIL_READ        = 0x20;
        const DEPTH_STENCIL             = 0x30;
        const SHADER_RESOURCE_NON_PIXEL = 0x40;
        const SHADER_RESOURCE_PIXEL     = 0x80;
        const SHADER_RESOURCE           = 0xC0;
        const STREAM_OUTPUT             = 0x100;
        const INDIRECT_ARGUMENT         = 0x200;
        const COPY_DEST                 = 0x400;
        const COPY_SOURCE               = 0x800;
        const RESOLVE_DEST              = 0x1000;
        const RESOLVE_SOURCE            = 0x2000;
        const CONSTANT_BUFFER           = 0x8000;
        const CPU_ACCESS                = 0x40000;
        const GENERAL                   = 0x8000_0000;
        const PRESENT                   = 0x8000_0804;
    }
}

impl ResourceUsage {
    pub const UNDEFINED: Self = Self::empty();
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStage: u32 {
        const VERTEX       = 0x1;
        const HULL         = 0x2;
        const DOMAIN       = 0x4;
        const GEOMETRY     = 0x8;
        const PIXEL        = 0x10;
        const COMPUTE      = 0x20;
        const ALL_GRAPHICS = 0x1F;
        const ALL          = 0x3F;
    }
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStage: u32 {
        const VERTEX_SHADER   = 0x8;
        const HULL_SHADER     = 0x10;
        const DOMAIN_SHADER   = 0x20;
        const GEOMETRY_SHADER = 0x40;
        const PIXEL_SHADER    = 0x80;
        const COMPUTE_SHADER  = 0x800;
        const ALL_GRAPHICS    = 0x8000;
        const ALL_COMPUTE     = 0x800 | 0x8000_0000;
        const ALL             = 0x7FFF_FFFF;
    }
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueKind: u32 {
        const GRAPHICS = 0x1;
        const COMPUTE  = 0x2;
        const COPY     = 0x4;
    }
}

//===----------------------------------------------------------------------===//
// Object descriptions
//===----------------------------------------------------------------------===//

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum MemoryHeap {
    #[default]
    GpuOnly,
    CpuToGpu,
    GpuToCpu,
}

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    #[default]
    Buffer,
    Texture1D,
    Texture2D,
    Texture3D,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ResourceDesc {
    pub kind: ResourceKind,
    /// Size in bytes for buffers, width in texels for textures.
    pub width: u64,
    pub height: u32,
    pub depth_or_layers: u16,
    pub levels: u16,
    pub format: Format,
    pub samples: u16,
    pub heap: MemoryHeap,
    pub usage: ResourceUsage,
}

impl Default for ResourceDesc {
    fn default() -> Self {
        Self {
            kind: ResourceKind::Buffer,
            width: 0,
            height: 1,
            depth_or_layers: 1,
            levels: 1,
            format: Format::Unknown,
            samples: 1,
            heap: MemoryHeap::GpuOnly,
            usage: ResourceUsage::empty(),
        }
    }
}

impl ResourceDesc {
    pub fn buffer(size: u64, heap: MemoryHeap, usage: ResourceUsage) -> Self {
        Self {
            width: size,
            heap,
            usage,
            ..Default::default()
        }
    }

    pub fn texture_2d(
        width: u32,
        height: u32,
        levels: u16,
        format: Format,
        usage: ResourceUsage,
    ) -> Self {
        Self {
            kind: ResourceKind::Texture2D,
            width: width as u64,
            height,
            levels,
            format,
            usage,
            ..Default::default()
        }
    }
}

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum ResourceViewKind {
    #[default]
    Unknown,
    Buffer,
    Texture1D,
    Texture2D,
    Texture2DArray,
    Texture2DMultisample,
    Texture3D,
    TextureCube,
}

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ResourceViewDesc {
    pub kind: ResourceViewKind,
    pub format: Format,
    pub first_level: u32,
    pub levels: u32,
    pub first_layer: u32,
    pub layers: u32,
    pub buffer_offset: u64,
    pub buffer_size: u64,
}

impl Default for ResourceViewDesc {
    fn default() -> Self {
        Self {
            kind: ResourceViewKind::Unknown,
            format: Format::Unknown,
            first_level: 0,
            levels: u32::MAX,
            first_layer: 0,
            layers: u32::MAX,
            buffer_offset: 0,
            buffer_size: u64::MAX,
        }
    }
}

impl ResourceViewDesc {
    pub fn texture_2d(format: Format, first_level: u32, levels: u32) -> Self {
        Self {
            kind: ResourceViewKind::Texture2D,
            format,
            first_level,
            levels,
            layers: 1,
            ..Default::default()
        }
    }
}

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Filter {
    MinMagMipPoint,
    #[default]
    MinMagMipLinear,
    Anisotropic,
}

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Wrap,
    Mirror,
    #[default]
    Clamp,
    Border,
}

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SamplerDesc {
    pub filter: Filter,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: Filter::default(),
            address_u: AddressMode::default(),
            address_v: AddressMode::default(),
            address_w: AddressMode::default(),
            mip_lod_bias: 0.0,
            max_anisotropy: 1,
            min_lod: f32::MIN,
            max_lod: f32::MAX,
        }
    }
}

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    #[default]
    Undefined = 0,
    PointList = 1,
    LineList = 2,
    LineStrip = 3,
    TriangleList = 4,
    TriangleStrip = 5,
}

impl PrimitiveTopology {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::PointList,
            2 => Self::LineList,
            3 => Self::LineStrip,
            4 => Self::TriangleList,
            5 => Self::TriangleStrip,
            _ => Self::Undefined,
        }
    }
}

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DynamicState {
    BlendConstant,
    StencilReferenceValue,
    PrimitiveTopology,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineDesc<'a> {
    pub compute: Option<&'a [u8]>,
    pub vertex: Option<&'a [u8]>,
    pub pixel: Option<&'a [u8]>,
    pub topology: PrimitiveTopology,
    pub blend_constant: [f32; 4],
    pub render_target_formats: &'a [Format],
    pub depth_stencil_format: Format,
    pub debug_name: &'a str,
}

impl<'a> PipelineDesc<'a> {
    pub fn is_compute(&self) -> bool {
        self.compute.is_some()
    }
}

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    Sampler,
    ShaderResourceView,
    UnorderedAccessView,
    ConstantBuffer,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PipelineLayoutParam {
    PushConstants {
        stages: ShaderStage,
        count: u32,
    },
    PushDescriptors {
        stages: ShaderStage,
        ty: DescriptorType,
        count: u32,
    },
    DescriptorTable {
        stages: ShaderStage,
        ty: DescriptorType,
        count: u32,
    },
}

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum QueryType {
    Occlusion,
    BinaryOcclusion,
    Timestamp,
    PipelineStatistics,
    StreamOutputStatistics0,
    StreamOutputStatistics1,
    StreamOutputStatistics2,
    StreamOutputStatistics3,
}

//===----------------------------------------------------------------------===//
// Command arguments
//===----------------------------------------------------------------------===//

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct SubresourceBox {
    pub left: u32,
    pub top: u32,
    pub front: u32,
    pub right: u32,
    pub bottom: u32,
    pub back: u32,
}

impl SubresourceBox {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    pub fn depth(&self) -> u32 {
        self.back - self.front
    }
}

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum LoadOp {
    #[default]
    Load,
    Clear,
    Discard,
    NoAccess,
}

#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum StoreOp {
    #[default]
    Store,
    Discard,
    NoAccess,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ResourceBarrier {
    pub resource: Handle<Resource>,
    pub old_state: ResourceUsage,
    pub new_state: ResourceUsage,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RenderPassRenderTargetDesc {
    pub view: Handle<ResourceView>,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_color: [f32; 4],
}

impl Default for RenderPassRenderTargetDesc {
    fn default() -> Self {
        Self {
            view: Handle::NULL,
            load_op: LoadOp::Load,
            store_op: StoreOp::Store,
            clear_color: [0.0; 4],
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RenderPassDepthStencilDesc {
    pub view: Handle<ResourceView>,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub stencil_load_op: LoadOp,
    pub stencil_store_op: StoreOp,
    pub clear_depth: f32,
    pub clear_stencil: u8,
}

impl Default for RenderPassDepthStencilDesc {
    fn default() -> Self {
        Self {
            view: Handle::NULL,
            depth_load_op: LoadOp::Load,
            depth_store_op: StoreOp::Store,
            stencil_load_op: LoadOp::Load,
            stencil_store_op: StoreOp::Store,
            clear_depth: 1.0,
            clear_stencil: 0,
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct BufferRange {
    pub buffer: Handle<Resource>,
    pub offset: u64,
    /// `u64::MAX` covers the rest of the buffer.
    pub size: u64,
}

/// Descriptor payload of one update, typed by descriptor kind.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Descriptors<'a> {
    Samplers(&'a [Handle<Sampler>]),
    ShaderResourceViews(&'a [Handle<ResourceView>]),
    UnorderedAccessViews(&'a [Handle<ResourceView>]),
    ConstantBuffers(&'a [BufferRange]),
}

impl<'a> Descriptors<'a> {
    pub fn descriptor_type(&self) -> DescriptorType {
        match self {
            Descriptors::Samplers(_) => DescriptorType::Sampler,
            Descriptors::ShaderResourceViews(_) => DescriptorType::ShaderResourceView,
            Descriptors::UnorderedAccessViews(_) => DescriptorType::UnorderedAccessView,
            Descriptors::ConstantBuffers(_) => DescriptorType::ConstantBuffer,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Descriptors::Samplers(s) => s.len(),
            Descriptors::ShaderResourceViews(v) | Descriptors::UnorderedAccessViews(v) => v.len(),
            Descriptors::ConstantBuffers(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DescriptorSetUpdate<'a> {
    /// Ignored by `push_descriptors`.
    pub set: Handle<DescriptorSet>,
    pub binding: u32,
    pub array_offset: u32,
    pub descriptors: Descriptors<'a>,
}

impl<'a> DescriptorSetUpdate<'a> {
    pub fn count(&self) -> u32 {
        self.descriptors.len() as u32
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct DescriptorSetCopy {
    pub source_set: Handle<DescriptorSet>,
    pub source_binding: u32,
    pub source_array_offset: u32,
    pub dest_set: Handle<DescriptorSet>,
    pub dest_binding: u32,
    pub dest_array_offset: u32,
    pub count: u32,
}
