use std::sync::Arc;

use smallvec::SmallVec;

use crate::api::object::{Guid, NativeObject, PrivateDataMap};
use crate::driver::command::CommandSink;
use crate::driver::types::{
    DescriptorSet, DescriptorSetUpdate, DescriptorType, DynamicState, Format, Handle, LoadOp, Pipeline,
    PipelineLayout, PipelineStage, QueryPool, QueryType, Rect, RenderPassDepthStencilDesc,
    RenderPassRenderTargetDesc, Resource, ResourceBarrier, ResourceKind, ResourceView, ResourceViewDesc,
    ResourceViewKind, ShaderStage, SubresourceBox, Viewport,
};
use crate::gpu::Backend;

use super::convert::{
    convert_barrier, convert_render_pass_load_op, convert_render_pass_store_op, encode_pix3blob,
    unpack_blend_constant,
};
use super::device::DeviceImpl;
use super::native::{
    BindPoint, ClearFlags, CpuDescriptorHandle, DescriptorHeapType, IndexBufferView, IndexFormat, NativeBarrier,
    NativeCommandList, NativeDevice, RenderPassDepthStencil, RenderPassRenderTarget, ResourceStates,
    TextureCopyLocation, VertexBufferView, ALL_SUBRESOURCES,
};

/// Maximum number of simultaneously bound render targets.
pub const MAX_RENDER_TARGETS: usize = 8;

const SHADER_RESOURCE_STATES: ResourceStates =
    ResourceStates::NON_PIXEL_SHADER_RESOURCE.union(ResourceStates::PIXEL_SHADER_RESOURCE);

enum UavClearValue<'a> {
    Uint(&'a [u32; 4]),
    Float(&'a [f32; 4]),
}

/// Translates generic commands into calls on one native command list.
///
/// The root signature bound to each bind point and the pair of descriptor
/// heaps (`[sampler, view]`) are cached so redundant native binds are
/// skipped. A zero entry means nothing is bound there.
pub struct CommandListImpl<B: Backend> {
    device: Arc<DeviceImpl<B>>,
    native: B::CommandList,
    current_root_signature: [u64; 2],
    current_descriptor_heaps: [u64; 2],
    has_commands: bool,
    private_data: PrivateDataMap,
}

impl<B: Backend> CommandListImpl<B> {
    /// Takes over one reference of `native`, which must be recording.
    pub fn new(device: Arc<DeviceImpl<B>>, native: B::CommandList) -> Self {
        Self {
            device,
            native,
            current_root_signature: [0; 2],
            current_descriptor_heaps: [0; 2],
            has_commands: false,
            private_data: PrivateDataMap::new(),
        }
    }

    pub fn device(&self) -> &Arc<DeviceImpl<B>> {
        &self.device
    }

    pub fn get_native(&self) -> u64 {
        self.native.raw()
    }

    pub fn native(&self) -> &B::CommandList {
        &self.native
    }

    pub fn native_mut(&mut self) -> &mut B::CommandList {
        &mut self.native
    }

    /// `true` once anything was recorded since the last reset.
    pub fn has_commands(&self) -> bool {
        self.has_commands
    }

    /// Ends recording. The list can then be submitted.
    pub fn close(&mut self) -> bool {
        self.native.close()
    }

    /// Reopens the list on command allocator `allocator` and drops cached state.
    pub fn reset(&mut self, allocator: usize) -> bool {
        let reset = self.native.reset(allocator);
        self.reset_state();
        reset
    }

    /// Forgets cached binding state after the native list was reset.
    pub fn reset_state(&mut self) {
        self.current_root_signature = [0; 2];
        self.current_descriptor_heaps = [0; 2];
        self.has_commands = false;
    }

    pub fn get_private_data(&mut self, key: &Guid) -> u64 {
        self.private_data.get_mut(key)
    }

    pub fn set_private_data(&mut self, key: Guid, value: u64) {
        self.private_data.set_mut(key, value)
    }

    fn bind_root_signature(&mut self, bind: BindPoint, signature: u64) {
        let slot = &mut self.current_root_signature[bind as usize];
        if *slot != signature {
            *slot = signature;
            self.native.set_root_signature(bind, signature);
        }
    }

    fn bind_descriptor_heaps(&mut self, heaps: [u64; 2]) {
        if self.current_descriptor_heaps == heaps {
            return;
        }
        self.current_descriptor_heaps = heaps;
        let bound: SmallVec<[u64; 2]> = heaps.into_iter().filter(|h| *h != 0).collect();
        self.native.set_descriptor_heaps(&bound);
    }

    /// Makes sure the view heap is bound, returning the heaps to restore.
    fn push_view_heap(&mut self) -> Option<[u64; 2]> {
        let view_heap = self.device.view_heap().get_native();
        let previous = self.current_descriptor_heaps;
        if previous.contains(&view_heap) {
            return None;
        }
        self.bind_descriptor_heaps([0, view_heap]);
        Some(previous)
    }

    fn pop_view_heap(&mut self, previous: Option<[u64; 2]>) {
        match previous {
            Some(heaps) if heaps != [0, 0] => self.bind_descriptor_heaps(heaps),
            _ => {}
        }
    }

    /// Stages that select the compute and graphics bind points.
    fn bind_points(stages: ShaderStage) -> SmallVec<[BindPoint; 2]> {
        let mut points = SmallVec::new();
        if stages.contains(ShaderStage::COMPUTE) {
            points.push(BindPoint::Compute);
        }
        if stages.intersects(ShaderStage::ALL_GRAPHICS) {
            points.push(BindPoint::Graphics);
        }
        points
    }

    fn view_descriptor(&self, view: Handle<ResourceView>) -> CpuDescriptorHandle {
        self.device
            .view_object(view)
            .map(|v| v.descriptor)
            .unwrap_or_default()
    }

    fn clear_unordered_access_view(&mut self, uav: Handle<ResourceView>, value: UavClearValue<'_>, rects: &[Rect]) {
        self.has_commands = true;

        let Some(view) = self.device.view_object(uav) else {
            log::warn!("skipping clear of unknown view {:?}", uav);
            return;
        };
        let Some(table) = self.device.view_heap().allocate_transient(1) else {
            log::warn!("transient view heap exhausted, skipping unordered access view clear");
            return;
        };

        let previous = self.push_view_heap();

        self.device
            .native()
            .create_unordered_access_view(view.native_resource, &view.desc, table.cpu);
        match value {
            UavClearValue::Uint(values) => self.native.clear_unordered_access_view_uint(
                table.gpu,
                view.descriptor,
                view.native_resource,
                values,
                rects,
            ),
            UavClearValue::Float(values) => self.native.clear_unordered_access_view_float(
                table.gpu,
                view.descriptor,
                view.native_resource,
                values,
                rects,
            ),
        }

        self.pop_view_heap(previous);
    }
}

impl<B: Backend> Drop for CommandListImpl<B> {
    fn drop(&mut self) {
        self.native.release();
    }
}

impl<B: Backend> CommandSink for CommandListImpl<B> {
    fn barrier(&mut self, barriers: &[ResourceBarrier]) {
        self.has_commands = true;

        let mut batch: SmallVec<[NativeBarrier; 8]> = SmallVec::with_capacity(barriers.len());
        for barrier in barriers {
            let resource = self.device.get_native_resource(barrier.resource);
            if resource == 0 {
                log::warn!("skipping barrier on null resource");
                continue;
            }
            batch.push(convert_barrier(resource, barrier.old_state, barrier.new_state));
        }
        if !batch.is_empty() {
            self.native.resource_barrier(&batch);
        }
    }

    fn begin_render_pass(
        &mut self,
        render_targets: &[RenderPassRenderTargetDesc],
        depth_stencil: Option<&RenderPassDepthStencilDesc>,
    ) {
        assert!(
            render_targets.len() <= MAX_RENDER_TARGETS,
            "at most {} render targets can be bound",
            MAX_RENDER_TARGETS
        );
        self.has_commands = true;

        let device = &self.device;
        let targets: SmallVec<[RenderPassRenderTarget; MAX_RENDER_TARGETS]> = render_targets
            .iter()
            .map(|rt| {
                let view = device.view_object(rt.view);
                RenderPassRenderTarget {
                    descriptor: view.map(|v| v.descriptor).unwrap_or_default(),
                    beginning: convert_render_pass_load_op(rt.load_op),
                    ending: convert_render_pass_store_op(rt.store_op),
                    clear_format: match (rt.load_op, view) {
                        (LoadOp::Clear, Some(v)) => v.desc.format,
                        _ => Format::Unknown,
                    },
                    clear_color: rt.clear_color,
                }
            })
            .collect();
        let depth = depth_stencil.and_then(|ds| {
            let view = device.view_object(ds.view)?;
            Some(RenderPassDepthStencil {
                descriptor: view.descriptor,
                depth_beginning: convert_render_pass_load_op(ds.depth_load_op),
                stencil_beginning: convert_render_pass_load_op(ds.stencil_load_op),
                depth_ending: convert_render_pass_store_op(ds.depth_store_op),
                stencil_ending: convert_render_pass_store_op(ds.stencil_store_op),
                clear_format: view.desc.format,
                clear_depth: ds.clear_depth,
                clear_stencil: ds.clear_stencil,
            })
        });

        if let Some(pass) = self.native.render_pass() {
            pass.begin_render_pass(&targets, depth.as_ref());
            return;
        }

        // No native render passes: clear explicitly, then bind the targets.
        for (rt, target) in render_targets.iter().zip(&targets) {
            if rt.load_op == LoadOp::Clear && target.descriptor.0 != 0 {
                self.native
                    .clear_render_target_view(target.descriptor, &rt.clear_color, &[]);
            }
        }
        if let (Some(ds), Some(depth)) = (depth_stencil, depth.as_ref()) {
            let mut flags = ClearFlags::empty();
            if ds.depth_load_op == LoadOp::Clear {
                flags |= ClearFlags::DEPTH;
            }
            if ds.stencil_load_op == LoadOp::Clear {
                flags |= ClearFlags::STENCIL;
            }
            if !flags.is_empty() {
                self.native
                    .clear_depth_stencil_view(depth.descriptor, flags, ds.clear_depth, ds.clear_stencil, &[]);
            }
        }

        let rtvs: SmallVec<[CpuDescriptorHandle; MAX_RENDER_TARGETS]> =
            targets.iter().map(|t| t.descriptor).collect();
        self.native
            .om_set_render_targets(&rtvs, depth.map(|d| d.descriptor));
    }

    fn end_render_pass(&mut self) {
        if let Some(pass) = self.native.render_pass() {
            pass.end_render_pass();
        }
    }

    fn bind_render_targets_and_depth_stencil(
        &mut self,
        rtvs: &[Handle<ResourceView>],
        dsv: Handle<ResourceView>,
    ) {
        assert!(
            rtvs.len() <= MAX_RENDER_TARGETS,
            "at most {} render targets can be bound",
            MAX_RENDER_TARGETS
        );
        self.has_commands = true;

        let handles: SmallVec<[CpuDescriptorHandle; MAX_RENDER_TARGETS]> =
            rtvs.iter().map(|rtv| self.view_descriptor(*rtv)).collect();
        let depth = (!dsv.is_null()).then(|| self.view_descriptor(dsv));
        self.native.om_set_render_targets(&handles, depth);
    }

    fn bind_pipeline(&mut self, stages: PipelineStage, pipeline: Handle<Pipeline>) {
        let native = self.device.get_native_pipeline(pipeline);
        debug_assert!(native != 0, "binding a null pipeline");
        if native == 0 {
            return;
        }
        self.has_commands = true;

        self.native.set_pipeline_state(native);
        if stages == PipelineStage::ALL_GRAPHICS {
            if let Some((topology, blend_constant)) = self.device.pipeline_extra(pipeline) {
                self.native.ia_set_primitive_topology(topology as u32);
                self.native.om_set_blend_factor(&blend_constant);
            }
        }
    }

    fn bind_pipeline_states(&mut self, states: &[(DynamicState, u32)]) {
        self.has_commands = true;

        for &(state, value) in states {
            match state {
                DynamicState::BlendConstant => self.native.om_set_blend_factor(&unpack_blend_constant(value)),
                DynamicState::StencilReferenceValue => self.native.om_set_stencil_ref(value),
                DynamicState::PrimitiveTopology => self.native.ia_set_primitive_topology(value),
            }
        }
    }

    fn bind_viewports(&mut self, first: u32, viewports: &[Viewport]) {
        if first != 0 {
            log::warn!("viewports can only be bound starting at slot 0");
            return;
        }
        self.has_commands = true;
        self.native.rs_set_viewports(viewports);
    }

    fn bind_scissor_rects(&mut self, first: u32, rects: &[Rect]) {
        if first != 0 {
            log::warn!("scissor rectangles can only be bound starting at slot 0");
            return;
        }
        self.has_commands = true;
        self.native.rs_set_scissor_rects(rects);
    }

    fn push_constants(
        &mut self,
        stages: ShaderStage,
        layout: Handle<PipelineLayout>,
        param: u32,
        first: u32,
        values: &[u32],
    ) {
        self.has_commands = true;

        let signature = self.device.get_native_pipeline_layout(layout);
        for bind in Self::bind_points(stages) {
            self.bind_root_signature(bind, signature);
            self.native.set_root_32bit_constants(bind, param, values, first);
        }
    }

    fn push_descriptors(
        &mut self,
        stages: ShaderStage,
        layout: Handle<PipelineLayout>,
        param: u32,
        update: &DescriptorSetUpdate<'_>,
    ) {
        self.has_commands = true;

        let device = self.device.clone();
        let heap = match update.descriptors.descriptor_type() {
            DescriptorType::Sampler => device.sampler_heap(),
            _ => device.view_heap(),
        };
        let offset = update.binding + update.array_offset;
        let Some(table) = heap.allocate_transient(offset + update.count()) else {
            log::warn!(
                "transient {:?} heap exhausted, skipping push of {} descriptors",
                heap.heap_type(),
                update.count()
            );
            return;
        };
        device.write_descriptors(heap, heap.offset_cpu(table.cpu, offset), &update.descriptors);

        self.bind_descriptor_heaps([device.sampler_heap().get_native(), device.view_heap().get_native()]);

        let signature = device.get_native_pipeline_layout(layout);
        for bind in Self::bind_points(stages) {
            self.bind_root_signature(bind, signature);
            self.native.set_root_descriptor_table(bind, param, table.gpu);
        }
    }

    fn bind_descriptor_sets(
        &mut self,
        stages: ShaderStage,
        layout: Handle<PipelineLayout>,
        first: u32,
        sets: &[Handle<DescriptorSet>],
    ) {
        self.has_commands = true;

        let device = self.device.clone();
        let tables: SmallVec<[_; 8]> = sets.iter().map(|set| device.descriptor_table(*set)).collect();

        // Sets live in the device heaps, which must be the ones bound.
        let mut heaps = self.current_descriptor_heaps;
        for table in tables.iter().flatten() {
            match table.heap_type() {
                DescriptorHeapType::Sampler => heaps[0] = device.sampler_heap().get_native(),
                _ => heaps[1] = device.view_heap().get_native(),
            }
        }
        self.bind_descriptor_heaps(heaps);

        let signature = device.get_native_pipeline_layout(layout);
        for bind in Self::bind_points(stages) {
            self.bind_root_signature(bind, signature);
            for (i, table) in tables.iter().enumerate() {
                if let Some(table) = table {
                    self.native
                        .set_root_descriptor_table(bind, first + i as u32, table.range.gpu);
                }
            }
        }
    }

    fn bind_index_buffer(&mut self, buffer: Handle<Resource>, offset: u64, index_size: u32) {
        self.has_commands = true;

        let resource = self.device.get_native_resource(buffer);
        if resource == 0 {
            self.native.ia_set_index_buffer(None);
            return;
        }
        let format = match index_size {
            2 => IndexFormat::Uint16,
            4 => IndexFormat::Uint32,
            _ => panic!("index size must be 2 or 4, got {}", index_size),
        };
        let native = self.device.native();
        let width = native.resource_desc(resource).width;
        debug_assert!(offset <= width);
        let view = IndexBufferView {
            location: native.gpu_virtual_address(resource) + offset,
            size: width.saturating_sub(offset) as u32,
            format,
        };
        self.native.ia_set_index_buffer(Some(&view));
    }

    fn bind_vertex_buffers(
        &mut self,
        first: u32,
        buffers: &[Handle<Resource>],
        offsets: &[u64],
        strides: &[u32],
    ) {
        debug_assert!(offsets.len() >= buffers.len() && strides.len() >= buffers.len());
        self.has_commands = true;

        let native = self.device.native();
        let views: SmallVec<[VertexBufferView; 8]> = buffers
            .iter()
            .zip(offsets)
            .zip(strides)
            .map(|((buffer, &offset), &stride)| {
                let resource = self.device.get_native_resource(*buffer);
                if resource == 0 {
                    return VertexBufferView::default();
                }
                let width = native.resource_desc(resource).width;
                VertexBufferView {
                    location: native.gpu_virtual_address(resource) + offset,
                    size: width.saturating_sub(offset) as u32,
                    stride,
                }
            })
            .collect();
        self.native.ia_set_vertex_buffers(first, &views);
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.has_commands = true;
        self.native
            .draw_instanced(vertex_count, instance_count, first_vertex, first_instance);
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.has_commands = true;
        self.native
            .draw_indexed_instanced(index_count, instance_count, first_index, vertex_offset, first_instance);
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.has_commands = true;
        self.native.dispatch(x, y, z);
    }

    fn copy_resource(&mut self, src: Handle<Resource>, dst: Handle<Resource>) {
        self.has_commands = true;
        let src = self.device.get_native_resource(src);
        let dst = self.device.get_native_resource(dst);
        self.native.copy_resource(dst, src);
    }

    fn copy_buffer_region(
        &mut self,
        src: Handle<Resource>,
        src_offset: u64,
        dst: Handle<Resource>,
        dst_offset: u64,
        size: u64,
    ) {
        self.has_commands = true;
        let src = self.device.get_native_resource(src);
        let dst = self.device.get_native_resource(dst);
        let size = if size == u64::MAX {
            self.device.native().resource_desc(src).width
        } else {
            size
        };
        self.native
            .copy_buffer_region(dst, dst_offset, src, src_offset, size);
    }

    fn copy_buffer_to_texture(
        &mut self,
        src: Handle<Resource>,
        src_offset: u64,
        row_length: u32,
        slice_height: u32,
        dst: Handle<Resource>,
        dst_subresource: u32,
        dst_box: Option<&SubresourceBox>,
    ) {
        self.has_commands = true;

        let src = self.device.get_native_resource(src);
        let dst = self.device.get_native_resource(dst);
        let native = self.device.native();
        let desc = native.resource_desc(dst);

        let mut layout_desc = desc;
        if row_length != 0 {
            layout_desc.width = row_length as u64;
        }
        if slice_height != 0 {
            layout_desc.height = slice_height;
        }
        let footprint = native.copyable_footprint(&layout_desc, dst_subresource, src_offset);

        let src_box = match dst_box {
            Some(b) => SubresourceBox {
                right: b.width(),
                bottom: b.height(),
                back: b.depth(),
                ..Default::default()
            },
            None => {
                let level = dst_subresource % desc.levels.max(1) as u32;
                let depth = if desc.kind == ResourceKind::Texture3D {
                    ((desc.depth_or_layers as u32) >> level).max(1)
                } else {
                    1
                };
                SubresourceBox {
                    right: ((desc.width as u32) >> level).max(1),
                    bottom: (desc.height >> level).max(1),
                    back: depth,
                    ..Default::default()
                }
            }
        };
        let (x, y, z) = dst_box.map(|b| (b.left, b.top, b.front)).unwrap_or_default();

        self.native.copy_texture_region(
            &TextureCopyLocation::Subresource {
                resource: dst,
                index: dst_subresource,
            },
            x,
            y,
            z,
            &TextureCopyLocation::Footprint {
                resource: src,
                footprint,
            },
            Some(&src_box),
        );
    }

    fn copy_texture_region(
        &mut self,
        src: Handle<Resource>,
        src_subresource: u32,
        src_box: Option<&SubresourceBox>,
        dst: Handle<Resource>,
        dst_subresource: u32,
        dst_box: Option<&SubresourceBox>,
    ) {
        if let (Some(s), Some(d)) = (src_box, dst_box) {
            if s.width() != d.width() || s.height() != d.height() || s.depth() != d.depth() {
                log::warn!("scaled texture copies are not supported, skipping");
                return;
            }
        }
        self.has_commands = true;

        let src = self.device.get_native_resource(src);
        let dst = self.device.get_native_resource(dst);
        let (x, y, z) = dst_box.map(|b| (b.left, b.top, b.front)).unwrap_or_default();
        self.native.copy_texture_region(
            &TextureCopyLocation::Subresource {
                resource: dst,
                index: dst_subresource,
            },
            x,
            y,
            z,
            &TextureCopyLocation::Subresource {
                resource: src,
                index: src_subresource,
            },
            src_box,
        );
    }

    fn copy_texture_to_buffer(
        &mut self,
        src: Handle<Resource>,
        src_subresource: u32,
        src_box: Option<&SubresourceBox>,
        dst: Handle<Resource>,
        dst_offset: u64,
        row_length: u32,
        slice_height: u32,
    ) {
        self.has_commands = true;

        let src = self.device.get_native_resource(src);
        let dst = self.device.get_native_resource(dst);
        let native = self.device.native();
        let mut layout_desc = native.resource_desc(src);
        if row_length != 0 {
            layout_desc.width = row_length as u64;
        }
        if slice_height != 0 {
            layout_desc.height = slice_height;
        }
        let footprint = native.copyable_footprint(&layout_desc, src_subresource, dst_offset);

        self.native.copy_texture_region(
            &TextureCopyLocation::Footprint {
                resource: dst,
                footprint,
            },
            0,
            0,
            0,
            &TextureCopyLocation::Subresource {
                resource: src,
                index: src_subresource,
            },
            src_box,
        );
    }

    fn resolve_texture_region(
        &mut self,
        src: Handle<Resource>,
        src_subresource: u32,
        src_box: Option<&SubresourceBox>,
        dst: Handle<Resource>,
        dst_subresource: u32,
        dst_offset: [u32; 3],
        format: Format,
    ) {
        if src_box.is_some() || dst_offset != [0; 3] {
            log::warn!("resolving a texture region is not supported, skipping");
            return;
        }
        self.has_commands = true;

        let src = self.device.get_native_resource(src);
        let dst = self.device.get_native_resource(dst);
        let format = if format == Format::Unknown {
            self.device.native().resource_desc(src).format
        } else {
            format
        };
        self.native
            .resolve_subresource(dst, dst_subresource, src, src_subresource, format);
    }

    fn clear_depth_stencil_view(
        &mut self,
        dsv: Handle<ResourceView>,
        depth: Option<f32>,
        stencil: Option<u8>,
        rects: &[Rect],
    ) {
        let mut flags = ClearFlags::empty();
        if depth.is_some() {
            flags |= ClearFlags::DEPTH;
        }
        if stencil.is_some() {
            flags |= ClearFlags::STENCIL;
        }
        if flags.is_empty() {
            return;
        }
        self.has_commands = true;

        let descriptor = self.view_descriptor(dsv);
        self.native.clear_depth_stencil_view(
            descriptor,
            flags,
            depth.unwrap_or(0.0),
            stencil.unwrap_or(0),
            rects,
        );
    }

    fn clear_render_target_view(&mut self, rtv: Handle<ResourceView>, color: &[f32; 4], rects: &[Rect]) {
        self.has_commands = true;
        let descriptor = self.view_descriptor(rtv);
        self.native.clear_render_target_view(descriptor, color, rects);
    }

    fn clear_unordered_access_view_uint(&mut self, uav: Handle<ResourceView>, values: &[u32; 4], rects: &[Rect]) {
        self.clear_unordered_access_view(uav, UavClearValue::Uint(values), rects);
    }

    fn clear_unordered_access_view_float(&mut self, uav: Handle<ResourceView>, values: &[f32; 4], rects: &[Rect]) {
        self.clear_unordered_access_view(uav, UavClearValue::Float(values), rects);
    }

    fn generate_mipmaps(&mut self, srv: Handle<ResourceView>) {
        let device = self.device.clone();
        let Some(view) = device.view_object(srv) else {
            log::warn!("skipping mipmap generation for unknown view {:?}", srv);
            return;
        };
        if self.native.generate_mips(view.descriptor) {
            self.has_commands = true;
            return;
        }
        let Some((signature, pipeline)) = device.mipmap_pipeline() else {
            log::warn!("no mipmap generation pipeline, skipping generate_mipmaps");
            return;
        };
        let resource = view.native_resource;
        let desc = device.native().resource_desc(resource);
        let levels = desc.levels as u32;
        if levels < 2 {
            return;
        }

        let heap = device.view_heap();
        let Some(table) = heap.allocate_transient(levels * 2) else {
            log::warn!("transient view heap exhausted, skipping mipmap generation");
            return;
        };
        self.has_commands = true;

        // Sources at [0, levels), destinations for levels 1.. at [levels, 2 * levels - 1).
        let format = desc.format.to_linear();
        for level in 0..levels {
            let srv_desc = ResourceViewDesc {
                kind: ResourceViewKind::Texture2D,
                format,
                first_level: level,
                levels: 1,
                layers: 1,
                ..Default::default()
            };
            device
                .native()
                .create_shader_resource_view(resource, &srv_desc, heap.offset_cpu(table.cpu, level));
        }
        for level in 1..levels {
            let uav_desc = ResourceViewDesc {
                kind: ResourceViewKind::Texture2D,
                format,
                first_level: level,
                levels: 1,
                layers: 1,
                ..Default::default()
            };
            device.native().create_unordered_access_view(
                resource,
                &uav_desc,
                heap.offset_cpu(table.cpu, levels + level - 1),
            );
        }

        let previous = self.push_view_heap();
        self.bind_root_signature(BindPoint::Compute, signature);
        self.native.set_pipeline_state(pipeline);

        self.native.resource_barrier(&[NativeBarrier::Transition {
            resource,
            subresource: ALL_SUBRESOURCES,
            before: SHADER_RESOURCE_STATES,
            after: ResourceStates::UNORDERED_ACCESS,
        }]);

        for level in 1..levels {
            let width = ((desc.width as u32) >> level).max(1);
            let height = (desc.height >> level).max(1);
            let texel_size = [(1.0 / width as f32).to_bits(), (1.0 / height as f32).to_bits()];

            self.native
                .set_root_32bit_constants(BindPoint::Compute, 0, &texel_size, 0);
            self.native
                .set_root_descriptor_table(BindPoint::Compute, 1, heap.offset_gpu(table.gpu, level - 1));
            self.native.set_root_descriptor_table(
                BindPoint::Compute,
                2,
                heap.offset_gpu(table.gpu, levels + level - 1),
            );
            self.native
                .dispatch(((width + 7) / 8).max(1), ((height + 7) / 8).max(1), 1);
            self.native
                .resource_barrier(&[NativeBarrier::Uav { resource }]);
        }

        self.native.resource_barrier(&[NativeBarrier::Transition {
            resource,
            subresource: ALL_SUBRESOURCES,
            before: ResourceStates::UNORDERED_ACCESS,
            after: SHADER_RESOURCE_STATES,
        }]);

        self.pop_view_heap(previous);
    }

    fn begin_query(&mut self, pool: Handle<QueryPool>, ty: QueryType, index: u32) {
        self.has_commands = true;
        let heap = self.device.get_native_query_pool(pool);
        self.native.begin_query(heap, ty, index);
    }

    fn end_query(&mut self, pool: Handle<QueryPool>, ty: QueryType, index: u32) {
        self.has_commands = true;
        let heap = self.device.get_native_query_pool(pool);
        self.native.end_query(heap, ty, index);

        let readback = self
            .device
            .get_native_resource(self.device.get_query_pool_readback(pool));
        if readback != 0 {
            self.native
                .resolve_query_data(heap, ty, index, 1, readback, index as u64 * 8);
        }
    }

    fn copy_query_pool_results(
        &mut self,
        pool: Handle<QueryPool>,
        ty: QueryType,
        first: u32,
        count: u32,
        dst: Handle<Resource>,
        dst_offset: u64,
        stride: u32,
    ) {
        assert_eq!(stride, 8, "query results are copied as tightly packed 64-bit values");
        self.has_commands = true;

        let heap = self.device.get_native_query_pool(pool);
        let dst = self.device.get_native_resource(dst);
        self.native
            .resolve_query_data(heap, ty, first, count, dst, dst_offset);
    }

    fn begin_debug_event(&mut self, label: &str, color: Option<&[f32; 4]>) {
        self.native.begin_event(&encode_pix3blob(label, color));
    }

    fn end_debug_event(&mut self) {
        self.native.end_event();
    }

    fn insert_debug_marker(&mut self, label: &str, color: Option<&[f32; 4]>) {
        self.native.set_marker(&encode_pix3blob(label, color));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::types::{
        BufferRange, Descriptors, MemoryHeap, PipelineLayoutParam, QueueKind, ResourceDesc, ResourceUsage,
    };
    use crate::gpu::d3d12::native::BeginningAccess;
    use crate::gpu::null::{DescriptorWrite, NativeCall, NullBackend, NullDevice};
    use crate::gpu::DeviceInfo;

    fn info() -> DeviceInfo {
        DeviceInfo {
            view_heap_static_size: 16,
            view_heap_transient_size: 16,
            sampler_heap_static_size: 8,
            sampler_heap_transient_size: 8,
            cpu_descriptor_pool_size: 8,
            mipmap_generation: true,
        }
    }

    fn list(native: NullDevice) -> CommandListImpl<NullBackend> {
        let device = DeviceImpl::new(native, &info()).unwrap();
        device.create_command_list(QueueKind::GRAPHICS).unwrap()
    }

    fn count(list: &CommandListImpl<NullBackend>, pred: impl Fn(&NativeCall) -> bool) -> usize {
        list.native().calls().iter().filter(|c| pred(c)).count()
    }

    fn render_target(list: &CommandListImpl<NullBackend>) -> (Handle<Resource>, Handle<ResourceView>) {
        let device = list.device();
        let tex = device
            .create_resource(
                &ResourceDesc::texture_2d(32, 32, 1, Format::RGBA8Unorm, ResourceUsage::RENDER_TARGET),
                ResourceUsage::RENDER_TARGET,
            )
            .unwrap();
        let rtv = device
            .create_resource_view(
                tex,
                ResourceUsage::RENDER_TARGET,
                &ResourceViewDesc::texture_2d(Format::RGBA8Unorm, 0, 1),
            )
            .unwrap();
        (tex, rtv)
    }

    #[test]
    fn null_barriers_are_dropped() {
        let mut list = list(NullDevice::new());
        let buffer = list
            .device()
            .create_resource(
                &ResourceDesc::buffer(64, MemoryHeap::GpuOnly, ResourceUsage::COPY_DEST),
                ResourceUsage::COPY_DEST,
            )
            .unwrap();

        list.barrier(&[ResourceBarrier {
            resource: Handle::NULL,
            old_state: ResourceUsage::COPY_DEST,
            new_state: ResourceUsage::SHADER_RESOURCE,
        }]);
        assert!(list.native().calls().is_empty());

        list.barrier(&[
            ResourceBarrier {
                resource: Handle::NULL,
                old_state: ResourceUsage::COPY_DEST,
                new_state: ResourceUsage::SHADER_RESOURCE,
            },
            ResourceBarrier {
                resource: buffer,
                old_state: ResourceUsage::COPY_DEST,
                new_state: ResourceUsage::SHADER_RESOURCE,
            },
        ]);
        match list.native().calls() {
            [NativeCall::ResourceBarrier(batch)] => assert_eq!(batch.len(), 1),
            calls => panic!("unexpected calls {:?}", calls),
        }
        assert!(list.has_commands());
        list.device().destroy_resource(buffer);
    }

    #[test]
    fn render_pass_falls_back_to_clears() {
        let mut list = list(NullDevice::new().with_render_pass_support(false));
        let (tex, rtv) = render_target(&list);
        let descriptor = list.device().view_object(rtv).unwrap().descriptor;

        list.begin_render_pass(
            &[RenderPassRenderTargetDesc {
                view: rtv,
                load_op: LoadOp::Clear,
                clear_color: [0.0, 0.5, 1.0, 1.0],
                ..Default::default()
            }],
            None,
        );
        list.end_render_pass();

        assert_eq!(
            list.native().calls(),
            &[
                NativeCall::ClearRenderTargetView {
                    rtv: descriptor,
                    color: [0.0, 0.5, 1.0, 1.0],
                    rects: Vec::new(),
                },
                NativeCall::SetRenderTargets {
                    rtvs: vec![descriptor],
                    dsv: None,
                },
            ]
        );
        list.device().destroy_resource_view(rtv);
        list.device().destroy_resource(tex);
    }

    #[test]
    fn native_render_pass_carries_clear_format() {
        let mut list = list(NullDevice::new());
        let (tex, rtv) = render_target(&list);

        list.begin_render_pass(
            &[RenderPassRenderTargetDesc {
                view: rtv,
                load_op: LoadOp::Clear,
                ..Default::default()
            }],
            None,
        );
        list.end_render_pass();

        match list.native().calls() {
            [NativeCall::BeginRenderPass {
                render_targets,
                depth_stencil: None,
            }, NativeCall::EndRenderPass] => {
                assert_eq!(render_targets[0].clear_format, Format::RGBA8Unorm);
                assert_eq!(render_targets[0].beginning, BeginningAccess::Clear);
            }
            calls => panic!("unexpected calls {:?}", calls),
        }
        list.device().destroy_resource_view(rtv);
        list.device().destroy_resource(tex);
    }

    #[test]
    fn pushed_descriptors_bind_heaps_once() {
        let mut list = list(NullDevice::new());
        let device = list.device().clone();
        let layout = device
            .create_pipeline_layout(&[PipelineLayoutParam::PushDescriptors {
                stages: ShaderStage::ALL,
                ty: DescriptorType::ConstantBuffer,
                count: 1,
            }])
            .unwrap();
        let buffer = device
            .create_resource(
                &ResourceDesc::buffer(256, MemoryHeap::CpuToGpu, ResourceUsage::CONSTANT_BUFFER),
                ResourceUsage::CONSTANT_BUFFER,
            )
            .unwrap();
        let ranges = [BufferRange {
            buffer,
            offset: 0,
            size: u64::MAX,
        }];
        let update = DescriptorSetUpdate {
            set: Handle::NULL,
            binding: 0,
            array_offset: 0,
            descriptors: Descriptors::ConstantBuffers(&ranges),
        };

        list.push_descriptors(ShaderStage::PIXEL, layout, 0, &update);
        list.push_descriptors(ShaderStage::PIXEL, layout, 0, &update);

        assert_eq!(count(&list, |c| matches!(c, NativeCall::SetDescriptorHeaps(_))), 1);
        assert_eq!(count(&list, |c| matches!(c, NativeCall::SetRootSignature(..))), 1);
        let tables: Vec<_> = list
            .native()
            .calls()
            .iter()
            .filter_map(|c| match c {
                NativeCall::SetRootDescriptorTable { bind, base, .. } => Some((*bind, *base)),
                _ => None,
            })
            .collect();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].0, BindPoint::Graphics);
        assert_ne!(tables[0].1, tables[1].1);

        let cbv_size = device.native().descriptor_writes().iter().find_map(|w| match w {
            DescriptorWrite::ConstantBufferView { size, .. } => Some(*size),
            _ => None,
        });
        assert_eq!(cbv_size, Some(256));

        device.destroy_resource(buffer);
        device.destroy_pipeline_layout(layout);
    }

    #[test]
    fn index_buffer_view_covers_the_tail() {
        let mut list = list(NullDevice::new());
        let device = list.device().clone();
        let buffer = device
            .create_resource(
                &ResourceDesc::buffer(256, MemoryHeap::GpuOnly, ResourceUsage::INDEX_BUFFER),
                ResourceUsage::INDEX_BUFFER,
            )
            .unwrap();
        let va = device.native().gpu_virtual_address(device.get_native_resource(buffer));

        list.bind_index_buffer(buffer, 64, 4);
        list.bind_index_buffer(Handle::NULL, 0, 2);

        assert_eq!(
            list.native().calls(),
            &[
                NativeCall::SetIndexBuffer(Some(IndexBufferView {
                    location: va + 64,
                    size: 192,
                    format: IndexFormat::Uint32,
                })),
                NativeCall::SetIndexBuffer(None),
            ]
        );
        device.destroy_resource(buffer);
    }

    #[test]
    fn uav_clear_binds_the_view_heap() {
        let mut list = list(NullDevice::new());
        let device = list.device().clone();
        let tex = device
            .create_resource(
                &ResourceDesc::texture_2d(16, 16, 1, Format::R32Uint, ResourceUsage::UNORDERED_ACCESS),
                ResourceUsage::UNORDERED_ACCESS,
            )
            .unwrap();
        let uav = device
            .create_resource_view(
                tex,
                ResourceUsage::UNORDERED_ACCESS,
                &ResourceViewDesc::texture_2d(Format::R32Uint, 0, 1),
            )
            .unwrap();

        list.clear_unordered_access_view_uint(uav, &[1, 2, 3, 4], &[]);
        list.clear_unordered_access_view_uint(uav, &[5, 6, 7, 8], &[]);

        let view_heap = device.view_heap().get_native();
        assert_eq!(
            count(&list, |c| c == &NativeCall::SetDescriptorHeaps(vec![view_heap])),
            1
        );
        assert_eq!(
            count(&list, |c| matches!(c, NativeCall::ClearUnorderedAccessViewUint { .. })),
            2
        );

        device.destroy_resource_view(uav);
        device.destroy_resource(tex);
    }

    #[test]
    fn mipmaps_dispatch_per_level() {
        let mut list = list(NullDevice::new());
        let device = list.device().clone();
        let tex = device
            .create_resource(
                &ResourceDesc::texture_2d(
                    64,
                    64,
                    4,
                    Format::RGBA8UnormSrgb,
                    ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS,
                ),
                ResourceUsage::SHADER_RESOURCE,
            )
            .unwrap();
        let srv = device
            .create_resource_view(
                tex,
                ResourceUsage::SHADER_RESOURCE,
                &ResourceViewDesc::texture_2d(Format::RGBA8UnormSrgb, 0, 4),
            )
            .unwrap();
        device.native().clear_descriptor_writes();

        list.generate_mipmaps(srv);

        let dispatches: Vec<_> = list
            .native()
            .calls()
            .iter()
            .filter_map(|c| match c {
                NativeCall::Dispatch(x, y, z) => Some((*x, *y, *z)),
                _ => None,
            })
            .collect();
        assert_eq!(dispatches, vec![(4, 4, 1), (2, 2, 1), (1, 1, 1)]);
        assert_eq!(
            count(&list, |c| matches!(c, NativeCall::ResourceBarrier(b) if matches!(b[0], NativeBarrier::Uav { .. }))),
            3
        );

        let writes = device.native().descriptor_writes();
        assert_eq!(writes.len(), 7);
        assert!(writes.iter().all(|w| match w {
            DescriptorWrite::ShaderResourceView { desc, .. } | DescriptorWrite::UnorderedAccessView { desc, .. } =>
                desc.format == Format::RGBA8Unorm,
            _ => false,
        }));

        device.destroy_resource_view(srv);
        device.destroy_resource(tex);
    }

    #[test]
    fn mipmaps_skipped_without_pipeline() {
        let mut list = list(NullDevice::new().without_mipmap_pipeline());
        list.generate_mipmaps(Handle::NULL);
        assert!(list.native().calls().is_empty());
        assert!(!list.has_commands());
    }

    #[test]
    fn end_query_resolves_into_readback() {
        let mut list = list(NullDevice::new());
        let device = list.device().clone();
        let pool = device.create_query_pool(QueryType::Occlusion, 4).unwrap();
        let heap = device.get_native_query_pool(pool);
        let readback = device.get_native_resource(device.get_query_pool_readback(pool));

        list.begin_query(pool, QueryType::Occlusion, 2);
        list.end_query(pool, QueryType::Occlusion, 2);

        assert_eq!(
            list.native().calls().last(),
            Some(&NativeCall::ResolveQueryData {
                heap,
                ty: QueryType::Occlusion,
                first: 2,
                count: 1,
                dst: readback,
                dst_offset: 16,
            })
        );
        device.destroy_query_pool(pool);
    }
}
