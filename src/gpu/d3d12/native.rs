//! The subset of the native Direct3D 12 API driven by this layer.
//!
//! Everything is expressed in terms of raw pointer-sized values so the same
//! translation code runs against the real API and against the null backend.

use bitflags::bitflags;

use crate::api::object::NativeObject;
use crate::driver::types::{
    Format, PipelineDesc, PipelineLayoutParam, QueryType, QueueKind, Rect, ResourceDesc,
    ResourceViewDesc, SamplerDesc, SubresourceBox, Viewport,
};
use crate::gpu::Backend;

pub const ALL_SUBRESOURCES: u32 = 0xFFFF_FFFF;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuDescriptorHandle(pub u64);

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct GpuDescriptorHandle(pub u64);

impl CpuDescriptorHandle {
    pub fn offset(self, index: u32, increment: u32) -> Self {
        Self(self.0 + index as u64 * increment as u64)
    }
}

impl GpuDescriptorHandle {
    pub fn offset(self, index: u32, increment: u32) -> Self {
        Self(self.0 + index as u64 * increment as u64)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceStates: u32 {
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        const INDEX_BUFFER               = 0x2;
        const RENDER_TARGET              = 0x4;
        const UNORDERED_ACCESS           = 0x8;
        const DEPTH_WRITE                = 0x10;
        const DEPTH_READ                 = 0x20;
        const NON_PIXEL_SHADER_RESOURCE  = 0x40;
        const PIXEL_SHADER_RESOURCE      = 0x80;
        const STREAM_OUT                 = 0x100;
        const INDIRECT_ARGUMENT          = 0x200;
        const COPY_DEST                  = 0x400;
        const COPY_SOURCE                = 0x800;
        const RESOLVE_DEST               = 0x1000;
        const RESOLVE_SOURCE             = 0x2000;
        const GENERIC_READ               = 0xAC3;
    }
}

impl ResourceStates {
    pub const COMMON: Self = Self::empty();
    pub const PRESENT: Self = Self::empty();
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u32 {
        const DEPTH   = 0x1;
        const STENCIL = 0x2;
    }
}

/// Root signature slot a binding targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BindPoint {
    Graphics = 0,
    Compute = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NativeBarrier {
    /// Orders unordered-access writes without a state change.
    Uav { resource: u64 },
    /// `before` of 0 means "any placed resource".
    Aliasing { before: u64, after: u64 },
    Transition {
        resource: u64,
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BeginningAccess {
    Discard,
    Preserve,
    Clear,
    NoAccess,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EndingAccess {
    Discard,
    Preserve,
    NoAccess,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RenderPassRenderTarget {
    pub descriptor: CpuDescriptorHandle,
    pub beginning: BeginningAccess,
    pub ending: EndingAccess,
    pub clear_format: Format,
    pub clear_color: [f32; 4],
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RenderPassDepthStencil {
    pub descriptor: CpuDescriptorHandle,
    pub depth_beginning: BeginningAccess,
    pub stencil_beginning: BeginningAccess,
    pub depth_ending: EndingAccess,
    pub stencil_ending: EndingAccess,
    pub clear_format: Format,
    pub clear_depth: f32,
    pub clear_stencil: u8,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct IndexBufferView {
    pub location: u64,
    pub size: u32,
    pub format: IndexFormat,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    #[default]
    Uint16,
    Uint32,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct VertexBufferView {
    pub location: u64,
    pub size: u32,
    pub stride: u32,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct PlacedFootprint {
    pub offset: u64,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub row_pitch: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextureCopyLocation {
    Subresource { resource: u64, index: u32 },
    Footprint { resource: u64, footprint: PlacedFootprint },
}

/// Shader-visible or CPU-only descriptor heap.
pub trait NativeDescriptorHeap: NativeObject {
    fn cpu_start(&self) -> CpuDescriptorHandle;
    /// Zero for heaps that are not shader visible.
    fn gpu_start(&self) -> GpuDescriptorHandle;
}

/// Blocking OS event a fence can signal.
pub trait WaitEvent: Send + Sync {
    /// Blocks until the event is signaled, then resets it.
    fn wait(&self);
}

pub trait NativeFence: NativeObject {
    type Event: WaitEvent;

    fn create_event(&self) -> Option<Self::Event>;
    fn completed_value(&self) -> u64;
    fn set_event_on_completion(&self, value: u64, event: &Self::Event) -> bool;
}

pub trait NativeQueue: NativeObject {
    type Fence: NativeFence;

    fn kind(&self) -> QueueKind;
    fn execute_command_lists(&self, lists: &[u64]);
    fn signal(&self, fence: &Self::Fence, value: u64) -> bool;
    fn begin_event(&self, blob: &[u64; 64]);
    fn end_event(&self);
    fn set_marker(&self, blob: &[u64; 64]);
}

/// First-class render pass support, exposed only by newer command lists.
pub trait NativeRenderPass {
    fn begin_render_pass(
        &mut self,
        render_targets: &[RenderPassRenderTarget],
        depth_stencil: Option<&RenderPassDepthStencil>,
    );
    fn end_render_pass(&mut self);
}

pub trait NativeCommandList: NativeObject {
    /// `None` when the list predates native render passes.
    fn render_pass(&mut self) -> Option<&mut dyn NativeRenderPass>;

    /// Fills every level below the most detailed one of the view's resource.
    /// Lists without an automatic mip facility return `false` and leave the
    /// work to the translation layer.
    fn generate_mips(&mut self, _srv: CpuDescriptorHandle) -> bool {
        false
    }

    fn close(&mut self) -> bool;
    fn reset(&mut self, allocator_index: usize) -> bool;

    fn resource_barrier(&mut self, barriers: &[NativeBarrier]);

    fn clear_render_target_view(&mut self, rtv: CpuDescriptorHandle, color: &[f32; 4], rects: &[Rect]);
    fn clear_depth_stencil_view(
        &mut self,
        dsv: CpuDescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
        rects: &[Rect],
    );
    fn clear_unordered_access_view_uint(
        &mut self,
        gpu: GpuDescriptorHandle,
        cpu: CpuDescriptorHandle,
        resource: u64,
        values: &[u32; 4],
        rects: &[Rect],
    );
    fn clear_unordered_access_view_float(
        &mut self,
        gpu: GpuDescriptorHandle,
        cpu: CpuDescriptorHandle,
        resource: u64,
        values: &[f32; 4],
        rects: &[Rect],
    );

    fn om_set_render_targets(&mut self, rtvs: &[CpuDescriptorHandle], dsv: Option<CpuDescriptorHandle>);
    fn om_set_blend_factor(&mut self, factor: &[f32; 4]);
    fn om_set_stencil_ref(&mut self, value: u32);
    fn ia_set_primitive_topology(&mut self, topology: u32);
    fn ia_set_index_buffer(&mut self, view: Option<&IndexBufferView>);
    fn ia_set_vertex_buffers(&mut self, first: u32, views: &[VertexBufferView]);
    fn rs_set_viewports(&mut self, viewports: &[Viewport]);
    fn rs_set_scissor_rects(&mut self, rects: &[Rect]);

    fn set_pipeline_state(&mut self, pipeline: u64);
    fn set_root_signature(&mut self, bind: BindPoint, signature: u64);
    fn set_descriptor_heaps(&mut self, heaps: &[u64]);
    fn set_root_descriptor_table(&mut self, bind: BindPoint, param: u32, base: GpuDescriptorHandle);
    fn set_root_32bit_constants(&mut self, bind: BindPoint, param: u32, values: &[u32], first: u32);

    fn draw_instanced(&mut self, vertices: u32, instances: u32, first_vertex: u32, first_instance: u32);
    fn draw_indexed_instanced(
        &mut self,
        indices: u32,
        instances: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    fn copy_resource(&mut self, dst: u64, src: u64);
    fn copy_buffer_region(&mut self, dst: u64, dst_offset: u64, src: u64, src_offset: u64, size: u64);
    fn copy_texture_region(
        &mut self,
        dst: &TextureCopyLocation,
        dst_x: u32,
        dst_y: u32,
        dst_z: u32,
        src: &TextureCopyLocation,
        src_box: Option<&SubresourceBox>,
    );
    fn resolve_subresource(&mut self, dst: u64, dst_subresource: u32, src: u64, src_subresource: u32, format: Format);

    fn begin_query(&mut self, heap: u64, ty: QueryType, index: u32);
    fn end_query(&mut self, heap: u64, ty: QueryType, index: u32);
    fn resolve_query_data(&mut self, heap: u64, ty: QueryType, first: u32, count: u32, dst: u64, dst_offset: u64);

    fn begin_event(&mut self, blob: &[u64; 64]);
    fn end_event(&mut self);
    fn set_marker(&mut self, blob: &[u64; 64]);
}

/// The native device. Creation entry points return `None` on failure.
pub trait NativeDevice<B: Backend>: Send + Sync + 'static {
    fn descriptor_increment(&self, ty: DescriptorHeapType) -> u32;
    fn create_descriptor_heap(
        &self,
        ty: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
    ) -> Option<B::DescriptorHeap>;

    fn create_resource(&self, desc: &ResourceDesc, initial: ResourceStates) -> Option<B::Resource>;
    fn resource_desc(&self, resource: u64) -> ResourceDesc;
    fn gpu_virtual_address(&self, resource: u64) -> u64;
    /// Layout of `subresource` of a resource described by `desc` when placed
    /// in a buffer at `offset`.
    fn copyable_footprint(&self, desc: &ResourceDesc, subresource: u32, offset: u64) -> PlacedFootprint;
    fn read_buffer(&self, resource: u64, offset: u64, data: &mut [u8]) -> bool;
    fn set_name(&self, resource: u64, name: &str);

    fn create_shader_resource_view(&self, resource: u64, desc: &ResourceViewDesc, dst: CpuDescriptorHandle);
    fn create_unordered_access_view(&self, resource: u64, desc: &ResourceViewDesc, dst: CpuDescriptorHandle);
    fn create_render_target_view(&self, resource: u64, desc: &ResourceViewDesc, dst: CpuDescriptorHandle);
    fn create_depth_stencil_view(&self, resource: u64, desc: &ResourceViewDesc, dst: CpuDescriptorHandle);
    fn create_constant_buffer_view(&self, location: u64, size: u32, dst: CpuDescriptorHandle);
    fn create_sampler(&self, desc: &SamplerDesc, dst: CpuDescriptorHandle);
    fn copy_descriptors(&self, count: u32, dst: CpuDescriptorHandle, src: CpuDescriptorHandle, ty: DescriptorHeapType);

    fn create_root_signature(&self, params: &[PipelineLayoutParam]) -> Option<B::PipelineLayout>;
    fn create_pipeline(&self, layout: u64, desc: &PipelineDesc<'_>) -> Option<B::Pipeline>;
    /// Root signature and compute pipeline used to downsample mip chains.
    fn create_mipmap_pipeline(&self) -> Option<(B::PipelineLayout, B::Pipeline)>;
    fn create_query_heap(&self, ty: QueryType, count: u32) -> Option<B::QueryPool>;

    fn create_command_list(&self, kind: QueueKind) -> Option<B::CommandList>;
    fn create_fence(&self, initial: u64) -> Option<B::Fence>;
}
