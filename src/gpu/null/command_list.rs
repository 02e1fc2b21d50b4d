use crate::api::object::NativeObject;
use crate::driver::types::{Format, QueryType, QueueKind, Rect, SubresourceBox, Viewport};
use crate::gpu::d3d12::native::{
    BindPoint, ClearFlags, CpuDescriptorHandle, GpuDescriptorHandle, IndexBufferView, NativeBarrier,
    NativeCommandList, NativeRenderPass, RenderPassDepthStencil, RenderPassRenderTarget,
    TextureCopyLocation, VertexBufferView,
};

use super::NullObject;

/// One call received by a [`NullCommandList`].
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCall {
    Close,
    Reset(usize),
    ResourceBarrier(Vec<NativeBarrier>),
    BeginRenderPass {
        render_targets: Vec<RenderPassRenderTarget>,
        depth_stencil: Option<RenderPassDepthStencil>,
    },
    EndRenderPass,
    GenerateMips(CpuDescriptorHandle),
    ClearRenderTargetView {
        rtv: CpuDescriptorHandle,
        color: [f32; 4],
        rects: Vec<Rect>,
    },
    ClearDepthStencilView {
        dsv: CpuDescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
        rects: Vec<Rect>,
    },
    ClearUnorderedAccessViewUint {
        gpu: GpuDescriptorHandle,
        cpu: CpuDescriptorHandle,
        resource: u64,
        values: [u32; 4],
    },
    ClearUnorderedAccessViewFloat {
        gpu: GpuDescriptorHandle,
        cpu: CpuDescriptorHandle,
        resource: u64,
        values: [f32; 4],
    },
    SetRenderTargets {
        rtvs: Vec<CpuDescriptorHandle>,
        dsv: Option<CpuDescriptorHandle>,
    },
    SetBlendFactor([f32; 4]),
    SetStencilRef(u32),
    SetPrimitiveTopology(u32),
    SetIndexBuffer(Option<IndexBufferView>),
    SetVertexBuffers {
        first: u32,
        views: Vec<VertexBufferView>,
    },
    SetViewports(Vec<Viewport>),
    SetScissorRects(Vec<Rect>),
    SetPipelineState(u64),
    SetRootSignature(BindPoint, u64),
    SetDescriptorHeaps(Vec<u64>),
    SetRootDescriptorTable {
        bind: BindPoint,
        param: u32,
        base: GpuDescriptorHandle,
    },
    SetRoot32BitConstants {
        bind: BindPoint,
        param: u32,
        values: Vec<u32>,
        first: u32,
    },
    DrawInstanced(u32, u32, u32, u32),
    DrawIndexedInstanced(u32, u32, u32, i32, u32),
    Dispatch(u32, u32, u32),
    CopyResource {
        dst: u64,
        src: u64,
    },
    CopyBufferRegion {
        dst: u64,
        dst_offset: u64,
        src: u64,
        src_offset: u64,
        size: u64,
    },
    CopyTextureRegion {
        dst: TextureCopyLocation,
        dst_xyz: [u32; 3],
        src: TextureCopyLocation,
        src_box: Option<SubresourceBox>,
    },
    ResolveSubresource {
        dst: u64,
        dst_subresource: u32,
        src: u64,
        src_subresource: u32,
        format: Format,
    },
    BeginQuery {
        heap: u64,
        ty: QueryType,
        index: u32,
    },
    EndQuery {
        heap: u64,
        ty: QueryType,
        index: u32,
    },
    ResolveQueryData {
        heap: u64,
        ty: QueryType,
        first: u32,
        count: u32,
        dst: u64,
        dst_offset: u64,
    },
    BeginEvent(Box<[u64; 64]>),
    EndEvent,
    SetMarker(Box<[u64; 64]>),
}

/// Command list that keeps every call it receives.
pub struct NullCommandList {
    object: NullObject,
    kind: QueueKind,
    render_passes: bool,
    native_mips: bool,
    closed: bool,
    calls: Vec<NativeCall>,
}

impl NullCommandList {
    pub fn new(kind: QueueKind, render_passes: bool) -> Self {
        Self {
            object: NullObject::new(),
            kind,
            render_passes,
            native_mips: false,
            closed: false,
            calls: Vec::new(),
        }
    }

    pub fn with_native_mips(mut self, enabled: bool) -> Self {
        self.native_mips = enabled;
        self
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn calls(&self) -> &[NativeCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<NativeCall> {
        std::mem::take(&mut self.calls)
    }

    fn push(&mut self, call: NativeCall) {
        debug_assert!(!self.closed || matches!(call, NativeCall::Reset(_)), "recording into a closed list");
        self.calls.push(call);
    }
}

impl NativeObject for NullCommandList {
    fn raw(&self) -> u64 {
        self.object.raw()
    }

    fn add_ref(&self) -> u32 {
        self.object.add_ref()
    }

    fn release(&self) -> u32 {
        self.object.release()
    }
}

impl NativeRenderPass for NullCommandList {
    fn begin_render_pass(
        &mut self,
        render_targets: &[RenderPassRenderTarget],
        depth_stencil: Option<&RenderPassDepthStencil>,
    ) {
        self.push(NativeCall::BeginRenderPass {
            render_targets: render_targets.to_vec(),
            depth_stencil: depth_stencil.copied(),
        });
    }

    fn end_render_pass(&mut self) {
        self.push(NativeCall::EndRenderPass);
    }
}

impl NativeCommandList for NullCommandList {
    fn render_pass(&mut self) -> Option<&mut dyn NativeRenderPass> {
        if self.render_passes {
            Some(self as &mut dyn NativeRenderPass)
        } else {
            None
        }
    }

    fn generate_mips(&mut self, srv: CpuDescriptorHandle) -> bool {
        if !self.native_mips {
            return false;
        }
        self.push(NativeCall::GenerateMips(srv));
        true
    }

    fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.calls.push(NativeCall::Close);
        self.closed = true;
        true
    }

    fn reset(&mut self, allocator_index: usize) -> bool {
        self.closed = false;
        self.calls.push(NativeCall::Reset(allocator_index));
        true
    }

    fn resource_barrier(&mut self, barriers: &[NativeBarrier]) {
        self.push(NativeCall::ResourceBarrier(barriers.to_vec()));
    }

    fn clear_render_target_view(&mut self, rtv: CpuDescriptorHandle, color: &[f32; 4], rects: &[Rect]) {
        self.push(NativeCall::ClearRenderTargetView {
            rtv,
            color: *color,
            rects: rects.to_vec(),
        });
    }

    fn clear_depth_stencil_view(
        &mut self,
        dsv: CpuDescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
        rects: &[Rect],
    ) {
        self.push(NativeCall::ClearDepthStencilView {
            dsv,
            flags,
            depth,
            stencil,
            rects: rects.to_vec(),
        });
    }

    fn clear_unordered_access_view_uint(
        &mut self,
        gpu: GpuDescriptorHandle,
        cpu: CpuDescriptorHandle,
        resource: u64,
        values: &[u32; 4],
        _rects: &[Rect],
    ) {
        self.push(NativeCall::ClearUnorderedAccessViewUint {
            gpu,
            cpu,
            resource,
            values: *values,
        });
    }

    fn clear_unordered_access_view_float(
        &mut self,
        gpu: GpuDescriptorHandle,
        cpu: CpuDescriptorHandle,
        resource: u64,
        values: &[f32; 4],
        _rects: &[Rect],
    ) {
        self.push(NativeCall::ClearUnorderedAccessViewFloat {
            gpu,
            cpu,
            resource,
            values: *values,
        });
    }

    fn om_set_render_targets(&mut self, rtvs: &[CpuDescriptorHandle], dsv: Option<CpuDescriptorHandle>) {
        self.push(NativeCall::SetRenderTargets {
            rtvs: rtvs.to_vec(),
            dsv,
        });
    }

    fn om_set_blend_factor(&mut self, factor: &[f32; 4]) {
        self.push(NativeCall::SetBlendFactor(*factor));
    }

    fn om_set_stencil_ref(&mut self, value: u32) {
        self.push(NativeCall::SetStencilRef(value));
    }

    fn ia_set_primitive_topology(&mut self, topology: u32) {
        self.push(NativeCall::SetPrimitiveTopology(topology));
    }

    fn ia_set_index_buffer(&mut self, view: Option<&IndexBufferView>) {
        self.push(NativeCall::SetIndexBuffer(view.copied()));
    }

    fn ia_set_vertex_buffers(&mut self, first: u32, views: &[VertexBufferView]) {
        self.push(NativeCall::SetVertexBuffers {
            first,
            views: views.to_vec(),
        });
    }

    fn rs_set_viewports(&mut self, viewports: &[Viewport]) {
        self.push(NativeCall::SetViewports(viewports.to_vec()));
    }

    fn rs_set_scissor_rects(&mut self, rects: &[Rect]) {
        self.push(NativeCall::SetScissorRects(rects.to_vec()));
    }

    fn set_pipeline_state(&mut self, pipeline: u64) {
        self.push(NativeCall::SetPipelineState(pipeline));
    }

    fn set_root_signature(&mut self, bind: BindPoint, signature: u64) {
        self.push(NativeCall::SetRootSignature(bind, signature));
    }

    fn set_descriptor_heaps(&mut self, heaps: &[u64]) {
        self.push(NativeCall::SetDescriptorHeaps(heaps.to_vec()));
    }

    fn set_root_descriptor_table(&mut self, bind: BindPoint, param: u32, base: GpuDescriptorHandle) {
        self.push(NativeCall::SetRootDescriptorTable { bind, param, base });
    }

    fn set_root_32bit_constants(&mut self, bind: BindPoint, param: u32, values: &[u32], first: u32) {
        self.push(NativeCall::SetRoot32BitConstants {
            bind,
            param,
            values: values.to_vec(),
            first,
        });
    }

    fn draw_instanced(&mut self, vertices: u32, instances: u32, first_vertex: u32, first_instance: u32) {
        self.push(NativeCall::DrawInstanced(vertices, instances, first_vertex, first_instance));
    }

    fn draw_indexed_instanced(
        &mut self,
        indices: u32,
        instances: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.push(NativeCall::DrawIndexedInstanced(
            indices,
            instances,
            first_index,
            vertex_offset,
            first_instance,
        ));
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.push(NativeCall::Dispatch(x, y, z));
    }

    fn copy_resource(&mut self, dst: u64, src: u64) {
        self.push(NativeCall::CopyResource { dst, src });
    }

    fn copy_buffer_region(&mut self, dst: u64, dst_offset: u64, src: u64, src_offset: u64, size: u64) {
        self.push(NativeCall::CopyBufferRegion {
            dst,
            dst_offset,
            src,
            src_offset,
            size,
        });
    }

    fn copy_texture_region(
        &mut self,
        dst: &TextureCopyLocation,
        dst_x: u32,
        dst_y: u32,
        dst_z: u32,
        src: &TextureCopyLocation,
        src_box: Option<&SubresourceBox>,
    ) {
        self.push(NativeCall::CopyTextureRegion {
            dst: *dst,
            dst_xyz: [dst_x, dst_y, dst_z],
            src: *src,
            src_box: src_box.copied(),
        });
    }

    fn resolve_subresource(&mut self, dst: u64, dst_subresource: u32, src: u64, src_subresource: u32, format: Format) {
        self.push(NativeCall::ResolveSubresource {
            dst,
            dst_subresource,
            src,
            src_subresource,
            format,
        });
    }

    fn begin_query(&mut self, heap: u64, ty: QueryType, index: u32) {
        self.push(NativeCall::BeginQuery { heap, ty, index });
    }

    fn end_query(&mut self, heap: u64, ty: QueryType, index: u32) {
        self.push(NativeCall::EndQuery { heap, ty, index });
    }

    fn resolve_query_data(&mut self, heap: u64, ty: QueryType, first: u32, count: u32, dst: u64, dst_offset: u64) {
        self.push(NativeCall::ResolveQueryData {
            heap,
            ty,
            first,
            count,
            dst,
            dst_offset,
        });
    }

    fn begin_event(&mut self, blob: &[u64; 64]) {
        self.push(NativeCall::BeginEvent(Box::new(*blob)));
    }

    fn end_event(&mut self) {
        self.push(NativeCall::EndEvent);
    }

    fn set_marker(&mut self, blob: &[u64; 64]) {
        self.push(NativeCall::SetMarker(Box::new(*blob)));
    }
}
