//! Generation-agnostic command stream.
//!
//! Every recording context implements [`CommandSink`]. [`CommandEncoder`] is
//! the sink that only records: it keeps an owned copy of each call so the
//! stream can be inspected, stored and later replayed onto another sink.

use super::types::{
    BufferRange, DescriptorSet, DescriptorSetUpdate, Descriptors, DynamicState, Format, Handle,
    Pipeline, PipelineLayout, PipelineStage, QueryPool, QueryType, Rect, RenderPassDepthStencilDesc,
    RenderPassRenderTargetDesc, Resource, ResourceBarrier, ResourceView, Sampler, ShaderStage,
    SubresourceBox, Viewport,
};

//===----------------------------------------------------------------------===//
// Sink
//===----------------------------------------------------------------------===//

/// Receiver of generic commands.
pub trait CommandSink {
    fn barrier(&mut self, barriers: &[ResourceBarrier]);

    fn begin_render_pass(
        &mut self,
        render_targets: &[RenderPassRenderTargetDesc],
        depth_stencil: Option<&RenderPassDepthStencilDesc>,
    );
    fn end_render_pass(&mut self);
    fn bind_render_targets_and_depth_stencil(
        &mut self,
        rtvs: &[Handle<ResourceView>],
        dsv: Handle<ResourceView>,
    );

    fn bind_pipeline(&mut self, stages: PipelineStage, pipeline: Handle<Pipeline>);
    fn bind_pipeline_states(&mut self, states: &[(DynamicState, u32)]);
    fn bind_viewports(&mut self, first: u32, viewports: &[Viewport]);
    fn bind_scissor_rects(&mut self, first: u32, rects: &[Rect]);

    fn push_constants(
        &mut self,
        stages: ShaderStage,
        layout: Handle<PipelineLayout>,
        param: u32,
        first: u32,
        values: &[u32],
    );
    fn push_descriptors(
        &mut self,
        stages: ShaderStage,
        layout: Handle<PipelineLayout>,
        param: u32,
        update: &DescriptorSetUpdate<'_>,
    );
    fn bind_descriptor_sets(
        &mut self,
        stages: ShaderStage,
        layout: Handle<PipelineLayout>,
        first: u32,
        sets: &[Handle<DescriptorSet>],
    );

    fn bind_index_buffer(&mut self, buffer: Handle<Resource>, offset: u64, index_size: u32);
    fn bind_vertex_buffers(
        &mut self,
        first: u32,
        buffers: &[Handle<Resource>],
        offsets: &[u64],
        strides: &[u32],
    );

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    fn copy_resource(&mut self, src: Handle<Resource>, dst: Handle<Resource>);
    /// A `size` of `u64::MAX` copies the whole source buffer.
    fn copy_buffer_region(
        &mut self,
        src: Handle<Resource>,
        src_offset: u64,
        dst: Handle<Resource>,
        dst_offset: u64,
        size: u64,
    );
    /// A `row_length` or `slice_height` of 0 means tightly packed.
    #[allow(clippy::too_many_arguments)]
    fn copy_buffer_to_texture(
        &mut self,
        src: Handle<Resource>,
        src_offset: u64,
        row_length: u32,
        slice_height: u32,
        dst: Handle<Resource>,
        dst_subresource: u32,
        dst_box: Option<&SubresourceBox>,
    );
    fn copy_texture_region(
        &mut self,
        src: Handle<Resource>,
        src_subresource: u32,
        src_box: Option<&SubresourceBox>,
        dst: Handle<Resource>,
        dst_subresource: u32,
        dst_box: Option<&SubresourceBox>,
    );
    #[allow(clippy::too_many_arguments)]
    fn copy_texture_to_buffer(
        &mut self,
        src: Handle<Resource>,
        src_subresource: u32,
        src_box: Option<&SubresourceBox>,
        dst: Handle<Resource>,
        dst_offset: u64,
        row_length: u32,
        slice_height: u32,
    );
    #[allow(clippy::too_many_arguments)]
    fn resolve_texture_region(
        &mut self,
        src: Handle<Resource>,
        src_subresource: u32,
        src_box: Option<&SubresourceBox>,
        dst: Handle<Resource>,
        dst_subresource: u32,
        dst_offset: [u32; 3],
        format: Format,
    );

    fn clear_depth_stencil_view(
        &mut self,
        dsv: Handle<ResourceView>,
        depth: Option<f32>,
        stencil: Option<u8>,
        rects: &[Rect],
    );
    fn clear_render_target_view(&mut self, rtv: Handle<ResourceView>, color: &[f32; 4], rects: &[Rect]);
    fn clear_unordered_access_view_uint(&mut self, uav: Handle<ResourceView>, values: &[u32; 4], rects: &[Rect]);
    fn clear_unordered_access_view_float(&mut self, uav: Handle<ResourceView>, values: &[f32; 4], rects: &[Rect]);

    fn generate_mipmaps(&mut self, srv: Handle<ResourceView>);

    fn begin_query(&mut self, pool: Handle<QueryPool>, ty: QueryType, index: u32);
    fn end_query(&mut self, pool: Handle<QueryPool>, ty: QueryType, index: u32);
    #[allow(clippy::too_many_arguments)]
    fn copy_query_pool_results(
        &mut self,
        pool: Handle<QueryPool>,
        ty: QueryType,
        first: u32,
        count: u32,
        dst: Handle<Resource>,
        dst_offset: u64,
        stride: u32,
    );

    fn begin_debug_event(&mut self, label: &str, color: Option<&[f32; 4]>);
    fn end_debug_event(&mut self);
    fn insert_debug_marker(&mut self, label: &str, color: Option<&[f32; 4]>);
}

//===----------------------------------------------------------------------===//
// Command definitions
//===----------------------------------------------------------------------===//

#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    Barrier = 0,
    BeginRenderPass = 1,
    EndRenderPass = 2,
    BindRenderTargets = 3,
    BindPipeline = 4,
    BindPipelineStates = 5,
    BindViewports = 6,
    BindScissorRects = 7,
    PushConstants = 8,
    PushDescriptors = 9,
    BindDescriptorSets = 10,
    BindIndexBuffer = 11,
    BindVertexBuffers = 12,
    Draw = 13,
    DrawIndexed = 14,
    Dispatch = 15,
    CopyResource = 16,
    CopyBufferRegion = 17,
    CopyBufferToTexture = 18,
    CopyTextureRegion = 19,
    CopyTextureToBuffer = 20,
    ResolveTextureRegion = 21,
    ClearDepthStencil = 22,
    ClearRenderTarget = 23,
    ClearUnorderedAccessUint = 24,
    ClearUnorderedAccessFloat = 25,
    GenerateMipmaps = 26,
    BeginQuery = 27,
    EndQuery = 28,
    CopyQueryPoolResults = 29,
    DebugEventBegin = 30,
    DebugEventEnd = 31,
    DebugMarker = 32,
}

/// Owned counterpart of [`Descriptors`].
#[derive(Debug, Clone, PartialEq)]
pub enum OwnedDescriptors {
    Samplers(Vec<Handle<Sampler>>),
    ShaderResourceViews(Vec<Handle<ResourceView>>),
    UnorderedAccessViews(Vec<Handle<ResourceView>>),
    ConstantBuffers(Vec<BufferRange>),
}

impl OwnedDescriptors {
    pub fn as_descriptors(&self) -> Descriptors<'_> {
        match self {
            OwnedDescriptors::Samplers(s) => Descriptors::Samplers(s),
            OwnedDescriptors::ShaderResourceViews(v) => Descriptors::ShaderResourceViews(v),
            OwnedDescriptors::UnorderedAccessViews(v) => Descriptors::UnorderedAccessViews(v),
            OwnedDescriptors::ConstantBuffers(b) => Descriptors::ConstantBuffers(b),
        }
    }
}

impl From<Descriptors<'_>> for OwnedDescriptors {
    fn from(d: Descriptors<'_>) -> Self {
        match d {
            Descriptors::Samplers(s) => OwnedDescriptors::Samplers(s.to_vec()),
            Descriptors::ShaderResourceViews(v) => OwnedDescriptors::ShaderResourceViews(v.to_vec()),
            Descriptors::UnorderedAccessViews(v) => OwnedDescriptors::UnorderedAccessViews(v.to_vec()),
            Descriptors::ConstantBuffers(b) => OwnedDescriptors::ConstantBuffers(b.to_vec()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barrier(Vec<ResourceBarrier>),
    BeginRenderPass {
        render_targets: Vec<RenderPassRenderTargetDesc>,
        depth_stencil: Option<RenderPassDepthStencilDesc>,
    },
    EndRenderPass,
    BindRenderTargets {
        rtvs: Vec<Handle<ResourceView>>,
        dsv: Handle<ResourceView>,
    },
    BindPipeline {
        stages: PipelineStage,
        pipeline: Handle<Pipeline>,
    },
    BindPipelineStates(Vec<(DynamicState, u32)>),
    BindViewports {
        first: u32,
        viewports: Vec<Viewport>,
    },
    BindScissorRects {
        first: u32,
        rects: Vec<Rect>,
    },
    PushConstants {
        stages: ShaderStage,
        layout: Handle<PipelineLayout>,
        param: u32,
        first: u32,
        values: Vec<u32>,
    },
    PushDescriptors {
        stages: ShaderStage,
        layout: Handle<PipelineLayout>,
        param: u32,
        set: Handle<DescriptorSet>,
        binding: u32,
        array_offset: u32,
        descriptors: OwnedDescriptors,
    },
    BindDescriptorSets {
        stages: ShaderStage,
        layout: Handle<PipelineLayout>,
        first: u32,
        sets: Vec<Handle<DescriptorSet>>,
    },
    BindIndexBuffer {
        buffer: Handle<Resource>,
        offset: u64,
        index_size: u32,
    },
    BindVertexBuffers {
        first: u32,
        buffers: Vec<Handle<Resource>>,
        offsets: Vec<u64>,
        strides: Vec<u32>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyResource {
        src: Handle<Resource>,
        dst: Handle<Resource>,
    },
    CopyBufferRegion {
        src: Handle<Resource>,
        src_offset: u64,
        dst: Handle<Resource>,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        src: Handle<Resource>,
        src_offset: u64,
        row_length: u32,
        slice_height: u32,
        dst: Handle<Resource>,
        dst_subresource: u32,
        dst_box: Option<SubresourceBox>,
    },
    CopyTextureRegion {
        src: Handle<Resource>,
        src_subresource: u32,
        src_box: Option<SubresourceBox>,
        dst: Handle<Resource>,
        dst_subresource: u32,
        dst_box: Option<SubresourceBox>,
    },
    CopyTextureToBuffer {
        src: Handle<Resource>,
        src_subresource: u32,
        src_box: Option<SubresourceBox>,
        dst: Handle<Resource>,
        dst_offset: u64,
        row_length: u32,
        slice_height: u32,
    },
    ResolveTextureRegion {
        src: Handle<Resource>,
        src_subresource: u32,
        src_box: Option<SubresourceBox>,
        dst: Handle<Resource>,
        dst_subresource: u32,
        dst_offset: [u32; 3],
        format: Format,
    },
    ClearDepthStencil {
        dsv: Handle<ResourceView>,
        depth: Option<f32>,
        stencil: Option<u8>,
        rects: Vec<Rect>,
    },
    ClearRenderTarget {
        rtv: Handle<ResourceView>,
        color: [f32; 4],
        rects: Vec<Rect>,
    },
    ClearUnorderedAccessUint {
        uav: Handle<ResourceView>,
        values: [u32; 4],
        rects: Vec<Rect>,
    },
    ClearUnorderedAccessFloat {
        uav: Handle<ResourceView>,
        values: [f32; 4],
        rects: Vec<Rect>,
    },
    GenerateMipmaps(Handle<ResourceView>),
    BeginQuery {
        pool: Handle<QueryPool>,
        ty: QueryType,
        index: u32,
    },
    EndQuery {
        pool: Handle<QueryPool>,
        ty: QueryType,
        index: u32,
    },
    CopyQueryPoolResults {
        pool: Handle<QueryPool>,
        ty: QueryType,
        first: u32,
        count: u32,
        dst: Handle<Resource>,
        dst_offset: u64,
        stride: u32,
    },
    DebugEventBegin {
        label: String,
        color: Option<[f32; 4]>,
    },
    DebugEventEnd,
    DebugMarker {
        label: String,
        color: Option<[f32; 4]>,
    },
}

impl Command {
    pub fn op(&self) -> Op {
        match self {
            Command::Barrier(_) => Op::Barrier,
            Command::BeginRenderPass { .. } => Op::BeginRenderPass,
            Command::EndRenderPass => Op::EndRenderPass,
            Command::BindRenderTargets { .. } => Op::BindRenderTargets,
            Command::BindPipeline { .. } => Op::BindPipeline,
            Command::BindPipelineStates(_) => Op::BindPipelineStates,
            Command::BindViewports { .. } => Op::BindViewports,
            Command::BindScissorRects { .. } => Op::BindScissorRects,
            Command::PushConstants { .. } => Op::PushConstants,
            Command::PushDescriptors { .. } => Op::PushDescriptors,
            Command::BindDescriptorSets { .. } => Op::BindDescriptorSets,
            Command::BindIndexBuffer { .. } => Op::BindIndexBuffer,
            Command::BindVertexBuffers { .. } => Op::BindVertexBuffers,
            Command::Draw { .. } => Op::Draw,
            Command::DrawIndexed { .. } => Op::DrawIndexed,
            Command::Dispatch { .. } => Op::Dispatch,
            Command::CopyResource { .. } => Op::CopyResource,
            Command::CopyBufferRegion { .. } => Op::CopyBufferRegion,
            Command::CopyBufferToTexture { .. } => Op::CopyBufferToTexture,
            Command::CopyTextureRegion { .. } => Op::CopyTextureRegion,
            Command::CopyTextureToBuffer { .. } => Op::CopyTextureToBuffer,
            Command::ResolveTextureRegion { .. } => Op::ResolveTextureRegion,
            Command::ClearDepthStencil { .. } => Op::ClearDepthStencil,
            Command::ClearRenderTarget { .. } => Op::ClearRenderTarget,
            Command::ClearUnorderedAccessUint { .. } => Op::ClearUnorderedAccessUint,
            Command::ClearUnorderedAccessFloat { .. } => Op::ClearUnorderedAccessFloat,
            Command::GenerateMipmaps(_) => Op::GenerateMipmaps,
            Command::BeginQuery { .. } => Op::BeginQuery,
            Command::EndQuery { .. } => Op::EndQuery,
            Command::CopyQueryPoolResults { .. } => Op::CopyQueryPoolResults,
            Command::DebugEventBegin { .. } => Op::DebugEventBegin,
            Command::DebugEventEnd => Op::DebugEventEnd,
            Command::DebugMarker { .. } => Op::DebugMarker,
        }
    }

    /// Forwards this command to `sink`.
    pub fn replay<S: CommandSink + ?Sized>(&self, sink: &mut S) {
        match self {
            Command::Barrier(barriers) => sink.barrier(barriers),
            Command::BeginRenderPass {
                render_targets,
                depth_stencil,
            } => sink.begin_render_pass(render_targets, depth_stencil.as_ref()),
            Command::EndRenderPass => sink.end_render_pass(),
            Command::BindRenderTargets { rtvs, dsv } => {
                sink.bind_render_targets_and_depth_stencil(rtvs, *dsv)
            }
            Command::BindPipeline { stages, pipeline } => sink.bind_pipeline(*stages, *pipeline),
            Command::BindPipelineStates(states) => sink.bind_pipeline_states(states),
            Command::BindViewports { first, viewports } => sink.bind_viewports(*first, viewports),
            Command::BindScissorRects { first, rects } => sink.bind_scissor_rects(*first, rects),
            Command::PushConstants {
                stages,
                layout,
                param,
                first,
                values,
            } => sink.push_constants(*stages, *layout, *param, *first, values),
            Command::PushDescriptors {
                stages,
                layout,
                param,
                set,
                binding,
                array_offset,
                descriptors,
            } => {
                let update = DescriptorSetUpdate {
                    set: *set,
                    binding: *binding,
                    array_offset: *array_offset,
                    descriptors: descriptors.as_descriptors(),
                };
                sink.push_descriptors(*stages, *layout, *param, &update)
            }
            Command::BindDescriptorSets {
                stages,
                layout,
                first,
                sets,
            } => sink.bind_descriptor_sets(*stages, *layout, *first, sets),
            Command::BindIndexBuffer {
                buffer,
                offset,
                index_size,
            } => sink.bind_index_buffer(*buffer, *offset, *index_size),
            Command::BindVertexBuffers {
                first,
                buffers,
                offsets,
                strides,
            } => sink.bind_vertex_buffers(*first, buffers, offsets, strides),
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => sink.draw(*vertex_count, *instance_count, *first_vertex, *first_instance),
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => sink.draw_indexed(
                *index_count,
                *instance_count,
                *first_index,
                *vertex_offset,
                *first_instance,
            ),
            Command::Dispatch { x, y, z } => sink.dispatch(*x, *y, *z),
            Command::CopyResource { src, dst } => sink.copy_resource(*src, *dst),
            Command::CopyBufferRegion {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => sink.copy_buffer_region(*src, *src_offset, *dst, *dst_offset, *size),
            Command::CopyBufferToTexture {
                src,
                src_offset,
                row_length,
                slice_height,
                dst,
                dst_subresource,
                dst_box,
            } => sink.copy_buffer_to_texture(
                *src,
                *src_offset,
                *row_length,
                *slice_height,
                *dst,
                *dst_subresource,
                dst_box.as_ref(),
            ),
            Command::CopyTextureRegion {
                src,
                src_subresource,
                src_box,
                dst,
                dst_subresource,
                dst_box,
            } => sink.copy_texture_region(
                *src,
                *src_subresource,
                src_box.as_ref(),
                *dst,
                *dst_subresource,
                dst_box.as_ref(),
            ),
            Command::CopyTextureToBuffer {
                src,
                src_subresource,
                src_box,
                dst,
                dst_offset,
                row_length,
                slice_height,
            } => sink.copy_texture_to_buffer(
                *src,
                *src_subresource,
                src_box.as_ref(),
                *dst,
                *dst_offset,
                *row_length,
                *slice_height,
            ),
            Command::ResolveTextureRegion {
                src,
                src_subresource,
                src_box,
                dst,
                dst_subresource,
                dst_offset,
                format,
            } => sink.resolve_texture_region(
                *src,
                *src_subresource,
                src_box.as_ref(),
                *dst,
                *dst_subresource,
                *dst_offset,
                *format,
            ),
            Command::ClearDepthStencil {
                dsv,
                depth,
                stencil,
                rects,
            } => sink.clear_depth_stencil_view(*dsv, *depth, *stencil, rects),
            Command::ClearRenderTarget { rtv, color, rects } => {
                sink.clear_render_target_view(*rtv, color, rects)
            }
            Command::ClearUnorderedAccessUint { uav, values, rects } => {
                sink.clear_unordered_access_view_uint(*uav, values, rects)
            }
            Command::ClearUnorderedAccessFloat { uav, values, rects } => {
                sink.clear_unordered_access_view_float(*uav, values, rects)
            }
            Command::GenerateMipmaps(srv) => sink.generate_mipmaps(*srv),
            Command::BeginQuery { pool, ty, index } => sink.begin_query(*pool, *ty, *index),
            Command::EndQuery { pool, ty, index } => sink.end_query(*pool, *ty, *index),
            Command::CopyQueryPoolResults {
                pool,
                ty,
                first,
                count,
                dst,
                dst_offset,
                stride,
            } => sink.copy_query_pool_results(*pool, *ty, *first, *count, *dst, *dst_offset, *stride),
            Command::DebugEventBegin { label, color } => sink.begin_debug_event(label, color.as_ref()),
            Command::DebugEventEnd => sink.end_debug_event(),
            Command::DebugMarker { label, color } => sink.insert_debug_marker(label, color.as_ref()),
        }
    }
}

//===----------------------------------------------------------------------===//
// Encoder
//===----------------------------------------------------------------------===//

/// Records commands for later replay.
#[derive(Debug, Clone, Default)]
pub struct CommandEncoder {
    commands: Vec<Command>,
}

impl CommandEncoder {
    pub fn new() -> Self {
        Self {
            commands: Vec::with_capacity(64),
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Iterate over recorded commands.
    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    /// Replays the recorded commands, in order, onto `sink`.
    pub fn submit<S: CommandSink + ?Sized>(&self, sink: &mut S) {
        for cmd in &self.commands {
            cmd.replay(sink);
        }
    }

    fn push(&mut self, cmd: Command) {
        self.commands.push(cmd);
    }
}

impl<'a> IntoIterator for &'a CommandEncoder {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl CommandSink for CommandEncoder {
    fn barrier(&mut self, barriers: &[ResourceBarrier]) {
        self.push(Command::Barrier(barriers.to_vec()));
    }

    fn begin_render_pass(
        &mut self,
        render_targets: &[RenderPassRenderTargetDesc],
        depth_stencil: Option<&RenderPassDepthStencilDesc>,
    ) {
        self.push(Command::BeginRenderPass {
            render_targets: render_targets.to_vec(),
            depth_stencil: depth_stencil.copied(),
        });
    }

    fn end_render_pass(&mut self) {
        self.push(Command::EndRenderPass);
    }

    fn bind_render_targets_and_depth_stencil(
        &mut self,
        rtvs: &[Handle<ResourceView>],
        dsv: Handle<ResourceView>,
    ) {
        self.push(Command::BindRenderTargets {
            rtvs: rtvs.to_vec(),
            dsv,
        });
    }

    fn bind_pipeline(&mut self, stages: PipelineStage, pipeline: Handle<Pipeline>) {
        self.push(Command::BindPipeline { stages, pipeline });
    }

    fn bind_pipeline_states(&mut self, states: &[(DynamicState, u32)]) {
        self.push(Command::BindPipelineStates(states.to_vec()));
    }

    fn bind_viewports(&mut self, first: u32, viewports: &[Viewport]) {
        self.push(Command::BindViewports {
            first,
            viewports: viewports.to_vec(),
        });
    }

    fn bind_scissor_rects(&mut self, first: u32, rects: &[Rect]) {
        self.push(Command::BindScissorRects {
            first,
            rects: rects.to_vec(),
        });
    }

    fn push_constants(
        &mut self,
        stages: ShaderStage,
        layout: Handle<PipelineLayout>,
        param: u32,
        first: u32,
        values: &[u32],
    ) {
        self.push(Command::PushConstants {
            stages,
            layout,
            param,
            first,
            values: values.to_vec(),
        });
    }

    fn push_descriptors(
        &mut self,
        stages: ShaderStage,
        layout: Handle<PipelineLayout>,
        param: u32,
        update: &DescriptorSetUpdate<'_>,
    ) {
        self.push(Command::PushDescriptors {
            stages,
            layout,
            param,
            set: update.set,
            binding: update.binding,
            array_offset: update.array_offset,
            descriptors: update.descriptors.into(),
        });
    }

    fn bind_descriptor_sets(
        &mut self,
        stages: ShaderStage,
        layout: Handle<PipelineLayout>,
        first: u32,
        sets: &[Handle<DescriptorSet>],
    ) {
        self.push(Command::BindDescriptorSets {
            stages,
            layout,
            first,
            sets: sets.to_vec(),
        });
    }

    fn bind_index_buffer(&mut self, buffer: Handle<Resource>, offset: u64, index_size: u32) {
        self.push(Command::BindIndexBuffer {
            buffer,
            offset,
            index_size,
        });
    }

    fn bind_vertex_buffers(
        &mut self,
        first: u32,
        buffers: &[Handle<Resource>],
        offsets: &[u64],
        strides: &[u32],
    ) {
        self.push(Command::BindVertexBuffers {
            first,
            buffers: buffers.to_vec(),
            offsets: offsets.to_vec(),
            strides: strides.to_vec(),
        });
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.push(Command::Dispatch { x, y, z });
    }

    fn copy_resource(&mut self, src: Handle<Resource>, dst: Handle<Resource>) {
        self.push(Command::CopyResource { src, dst });
    }

    fn copy_buffer_region(
        &mut self,
        src: Handle<Resource>,
        src_offset: u64,
        dst: Handle<Resource>,
        dst_offset: u64,
        size: u64,
    ) {
        self.push(Command::CopyBufferRegion {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
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
        self.push(Command::CopyBufferToTexture {
            src,
            src_offset,
            row_length,
            slice_height,
            dst,
            dst_subresource,
            dst_box: dst_box.copied(),
        });
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
        self.push(Command::CopyTextureRegion {
            src,
            src_subresource,
            src_box: src_box.copied(),
            dst,
            dst_subresource,
            dst_box: dst_box.copied(),
        });
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
        self.push(Command::CopyTextureToBuffer {
            src,
            src_subresource,
            src_box: src_box.copied(),
            dst,
            dst_offset,
            row_length,
            slice_height,
        });
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
        self.push(Command::ResolveTextureRegion {
            src,
            src_subresource,
            src_box: src_box.copied(),
            dst,
            dst_subresource,
            dst_offset,
            format,
        });
    }

    fn clear_depth_stencil_view(
        &mut self,
        dsv: Handle<ResourceView>,
        depth: Option<f32>,
        stencil: Option<u8>,
        rects: &[Rect],
    ) {
        self.push(Command::ClearDepthStencil {
            dsv,
            depth,
            stencil,
            rects: rects.to_vec(),
        });
    }

    fn clear_render_target_view(&mut self, rtv: Handle<ResourceView>, color: &[f32; 4], rects: &[Rect]) {
        self.push(Command::ClearRenderTarget {
            rtv,
            color: *color,
            rects: rects.to_vec(),
        });
    }

    fn clear_unordered_access_view_uint(&mut self, uav: Handle<ResourceView>, values: &[u32; 4], rects: &[Rect]) {
        self.push(Command::ClearUnorderedAccessUint {
            uav,
            values: *values,
            rects: rects.to_vec(),
        });
    }

    fn clear_unordered_access_view_float(&mut self, uav: Handle<ResourceView>, values: &[f32; 4], rects: &[Rect]) {
        self.push(Command::ClearUnorderedAccessFloat {
            uav,
            values: *values,
            rects: rects.to_vec(),
        });
    }

    fn generate_mipmaps(&mut self, srv: Handle<ResourceView>) {
        self.push(Command::GenerateMipmaps(srv));
    }

    fn begin_query(&mut self, pool: Handle<QueryPool>, ty: QueryType, index: u32) {
        self.push(Command::BeginQuery { pool, ty, index });
    }

    fn end_query(&mut self, pool: Handle<QueryPool>, ty: QueryType, index: u32) {
        self.push(Command::EndQuery { pool, ty, index });
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
        self.push(Command::CopyQueryPoolResults {
            pool,
            ty,
            first,
            count,
            dst,
            dst_offset,
            stride,
        });
    }

    fn begin_debug_event(&mut self, label: &str, color: Option<&[f32; 4]>) {
        self.push(Command::DebugEventBegin {
            label: label.to_string(),
            color: color.copied(),
        });
    }

    fn end_debug_event(&mut self) {
        self.push(Command::DebugEventEnd);
    }

    fn insert_debug_marker(&mut self, label: &str, color: Option<&[f32; 4]>) {
        self.push(Command::DebugMarker {
            label: label.to_string(),
            color: color.copied(),
        });
    }
}

//===----------------------------------------------------------------------===//
// Tests
//===----------------------------------------------------------------------===//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::types::{LoadOp, ResourceUsage};

    #[test]
    fn records_in_order() {
        let mut enc = CommandEncoder::new();
        let tex = Handle::<Resource>::from_raw(0x40);
        enc.barrier(&[ResourceBarrier {
            resource: tex,
            old_state: ResourceUsage::COPY_DEST,
            new_state: ResourceUsage::RENDER_TARGET,
        }]);
        enc.begin_render_pass(
            &[RenderPassRenderTargetDesc {
                view: Handle::from_raw(0x80),
                load_op: LoadOp::Clear,
                ..Default::default()
            }],
            None,
        );
        enc.draw(3, 1, 0, 0);
        enc.end_render_pass();

        let ops: Vec<_> = enc.iter().map(Command::op).collect();
        assert_eq!(ops, vec![Op::Barrier, Op::BeginRenderPass, Op::Draw, Op::EndRenderPass]);
        assert_eq!(
            enc.iter().nth(2),
            Some(&Command::Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0
            })
        );
    }

    #[test]
    fn replay_reproduces_stream() {
        let mut enc = CommandEncoder::new();
        let srv = [Handle::<ResourceView>::from_raw(0x100), Handle::from_raw(0x140)];
        enc.push_descriptors(
            ShaderStage::PIXEL,
            Handle::from_raw(0x10),
            1,
            &DescriptorSetUpdate {
                set: Handle::NULL,
                binding: 2,
                array_offset: 0,
                descriptors: Descriptors::ShaderResourceViews(&srv),
            },
        );
        enc.begin_debug_event("shadow pass", Some(&[1.0, 0.0, 0.0, 1.0]));
        enc.dispatch(4, 4, 1);
        enc.end_debug_event();

        let mut copy = CommandEncoder::new();
        enc.submit(&mut copy);
        assert_eq!(copy.len(), enc.len());
        assert!(copy.iter().eq(enc.iter()));

        match copy.iter().next() {
            Some(Command::PushDescriptors { binding, descriptors, .. }) => {
                assert_eq!(*binding, 2);
                assert_eq!(descriptors.as_descriptors().len(), 2);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn clear_empties_stream() {
        let mut enc = CommandEncoder::new();
        enc.dispatch(1, 1, 1);
        assert!(!enc.is_empty());
        enc.clear();
        assert!(enc.is_empty());
        assert_eq!(enc.iter().count(), 0);
    }
}
