use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use crate::api::object::{ApiObject, Capability, Guid, NativeObject};
use crate::api::registry::ObjectRegistry;
use crate::driver::types::{
    DescriptorSet, DescriptorSetCopy, DescriptorSetUpdate, Descriptors, Handle, MemoryHeap,
    Pipeline, PipelineDesc, PipelineLayout, PipelineLayoutParam, PrimitiveTopology, QueryPool,
    QueryType, QueueKind, Resource, ResourceDesc, ResourceUsage, ResourceView, ResourceViewDesc, Sampler,
    SamplerDesc,
};
use crate::gpu::{Backend, DeviceInfo, GPUError, Result};

use super::command_list::CommandListImpl;
use super::convert::{
    convert_descriptor_type_to_heap_type, convert_resource_usage_to_states, pack_blend_constant,
    unpack_blend_constant,
};
use super::descriptor_heap::{CpuDescriptorPool, GpuDescriptorHeap};
use super::native::{CpuDescriptorHandle, DescriptorHeapType, NativeDevice, ResourceStates};
use super::objects::{DescriptorTableObject, LayoutObject, QueryPoolObject, SamplerObject, ViewObject};

pub const IID_RESOURCE: Guid = Guid::from_fields(
    0x696442be,
    0xa72e,
    0x4059,
    [0xbc, 0x79, 0x5b, 0x5c, 0x98, 0x04, 0x0f, 0xad],
);
pub const IID_RESOURCE1: Guid = Guid::from_fields(
    0x9d5e227a,
    0x4430,
    0x4161,
    [0x88, 0xb3, 0x3e, 0xca, 0x6b, 0xb1, 0x6e, 0x19],
);

const RESOURCE_CAPABILITIES: [Capability; 2] = [
    Capability::new(IID_RESOURCE, 0),
    Capability::new(IID_RESOURCE1, 1),
];

/// Topology and blend constant of a graphics pipeline, applied when it is bound.
const PIPELINE_EXTRA_KEY: Guid = Guid::from_fields(
    0xb2257a30,
    0x4014,
    0x46ea,
    [0xbd, 0x88, 0xde, 0xc2, 0x1d, 0xb6, 0xa0, 0x2b],
);

const PIPELINE_EXTRA_PRESENT: u64 = 1 << 63;

fn handle_of<N: NativeObject, T>(ptr: NonNull<ApiObject<N>>) -> Handle<T> {
    // SAFETY: freshly created wrappers are live.
    unsafe { ptr.as_ref() }.handle()
}

/// Drops the reference the handle owner holds.
///
/// # Safety
/// `object` must have been resolved from a live handle that is not used
/// again afterwards.
unsafe fn release<N: NativeObject>(object: &ApiObject<N>) -> u32 {
    ApiObject::release(NonNull::from(object))
}

/// Device-level state shared by every command list and queue created from it.
pub struct DeviceImpl<B: Backend> {
    native: B::Device,
    info: DeviceInfo,
    objects: ObjectRegistry<B>,
    view_heap: GpuDescriptorHeap<B>,
    sampler_heap: GpuDescriptorHeap<B>,
    rtv_pool: CpuDescriptorPool<B>,
    dsv_pool: CpuDescriptorPool<B>,
    view_pool: CpuDescriptorPool<B>,
    sampler_pool: CpuDescriptorPool<B>,
    mipmap: Option<(B::PipelineLayout, B::Pipeline)>,
    queues: Mutex<Vec<u64>>,
}

impl<B: Backend> DeviceImpl<B> {
    pub fn new(native: B::Device, info: &DeviceInfo) -> Result<Arc<Self>> {
        let view_heap = GpuDescriptorHeap::<B>::new(
            &native,
            DescriptorHeapType::CbvSrvUav,
            info.view_heap_static_size,
            info.view_heap_transient_size,
        )?;
        let sampler_heap = GpuDescriptorHeap::<B>::new(
            &native,
            DescriptorHeapType::Sampler,
            info.sampler_heap_static_size,
            info.sampler_heap_transient_size,
        )?;
        let pool = |ty| CpuDescriptorPool::<B>::new(&native, ty, info.cpu_descriptor_pool_size);
        let rtv_pool = pool(DescriptorHeapType::Rtv)?;
        let dsv_pool = pool(DescriptorHeapType::Dsv)?;
        let view_pool = pool(DescriptorHeapType::CbvSrvUav)?;
        let sampler_pool = pool(DescriptorHeapType::Sampler)?;

        let mipmap = if info.mipmap_generation {
            let pipeline = native.create_mipmap_pipeline();
            if pipeline.is_none() {
                log::warn!("failed to create mipmap generation pipeline, generate_mipmaps is disabled");
            }
            pipeline
        } else {
            None
        };

        log::debug!(
            "created device (view heap {}+{}, sampler heap {}+{})",
            info.view_heap_static_size,
            info.view_heap_transient_size,
            info.sampler_heap_static_size,
            info.sampler_heap_transient_size
        );

        Ok(Arc::new(Self {
            native,
            info: *info,
            objects: ObjectRegistry::new(),
            view_heap,
            sampler_heap,
            rtv_pool,
            dsv_pool,
            view_pool,
            sampler_pool,
            mipmap,
            queues: Mutex::new(Vec::new()),
        }))
    }

    pub fn native(&self) -> &B::Device {
        &self.native
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn objects(&self) -> &ObjectRegistry<B> {
        &self.objects
    }

    pub fn view_heap(&self) -> &GpuDescriptorHeap<B> {
        &self.view_heap
    }

    pub fn sampler_heap(&self) -> &GpuDescriptorHeap<B> {
        &self.sampler_heap
    }

    /// Creates a recording context on this device.
    pub fn create_command_list(self: &Arc<Self>, kind: QueueKind) -> Result<CommandListImpl<B>> {
        let native = self
            .native
            .create_command_list(kind)
            .ok_or(GPUError::NativeCallFailed("create_command_list"))?;
        Ok(CommandListImpl::new(self.clone(), native))
    }

    //===------------------------------------------------------------------===//
    // Resources
    //===------------------------------------------------------------------===//

    pub fn create_resource(&self, desc: &ResourceDesc, initial_usage: ResourceUsage) -> Result<Handle<Resource>> {
        // Readback and upload heaps are pinned to a single state.
        let states = match desc.heap {
            MemoryHeap::GpuToCpu => ResourceStates::COPY_DEST,
            MemoryHeap::CpuToGpu => ResourceStates::GENERIC_READ,
            MemoryHeap::GpuOnly => convert_resource_usage_to_states(initial_usage),
        };
        let native = self
            .native
            .create_resource(desc, states)
            .ok_or(GPUError::NativeCallFailed("create_resource"))?;
        let object = ApiObject::create(&self.objects.resources, native, &RESOURCE_CAPABILITIES, 0)?;
        Ok(handle_of(object))
    }

    pub fn destroy_resource(&self, resource: Handle<Resource>) {
        if let Some(object) = self.resource_object(resource) {
            // SAFETY: the handle is consumed here.
            unsafe { release(object) };
        }
    }

    pub fn get_resource_desc(&self, resource: Handle<Resource>) -> ResourceDesc {
        match self.resource_object(resource) {
            Some(object) => self.native.resource_desc(object.get_native()),
            None => ResourceDesc::default(),
        }
    }

    pub fn set_resource_name(&self, resource: Handle<Resource>, name: &str) {
        if let Some(object) = self.resource_object(resource) {
            self.native.set_name(object.get_native(), name);
        }
    }

    /// `true` when the resource exposes interface `iid`, upgrading the
    /// wrapper when a newer interface turns out to be available.
    pub fn check_resource_interface(&self, resource: Handle<Resource>, iid: &Guid) -> bool {
        self.resource_object(resource)
            .map(|object| object.check_and_upgrade_interface(iid))
            .unwrap_or(false)
    }

    /// Native resource behind `resource`, or 0 for null and foreign handles.
    pub fn get_native_resource(&self, resource: Handle<Resource>) -> u64 {
        self.resource_object(resource)
            .map(|object| object.get_native())
            .unwrap_or(0)
    }

    pub(crate) fn resource_object(&self, resource: Handle<Resource>) -> Option<&ApiObject<B::Resource>> {
        ApiObject::resolve(&*self.objects.resources, resource)
    }

    //===------------------------------------------------------------------===//
    // Views and samplers
    //===------------------------------------------------------------------===//

    fn cpu_pool(&self, ty: DescriptorHeapType) -> &CpuDescriptorPool<B> {
        match ty {
            DescriptorHeapType::CbvSrvUav => &self.view_pool,
            DescriptorHeapType::Sampler => &self.sampler_pool,
            DescriptorHeapType::Rtv => &self.rtv_pool,
            DescriptorHeapType::Dsv => &self.dsv_pool,
        }
    }

    /// Creates a view of `resource` for the usage named by `usage_type`.
    pub fn create_resource_view(
        &self,
        resource: Handle<Resource>,
        usage_type: ResourceUsage,
        desc: &ResourceViewDesc,
    ) -> Result<Handle<ResourceView>> {
        let native_resource = match self.resource_object(resource) {
            Some(object) => object.get_native(),
            None if resource.is_null() => 0,
            None => return Err(GPUError::InvalidHandle("create_resource_view")),
        };

        let heap = if usage_type.intersects(ResourceUsage::RENDER_TARGET) {
            DescriptorHeapType::Rtv
        } else if usage_type.intersects(ResourceUsage::DEPTH_STENCIL) {
            DescriptorHeapType::Dsv
        } else if usage_type.intersects(ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS) {
            DescriptorHeapType::CbvSrvUav
        } else {
            return Err(GPUError::Unsupported("view usage"));
        };

        let descriptor = self.cpu_pool(heap).allocate()?;
        match heap {
            DescriptorHeapType::Rtv => self.native.create_render_target_view(native_resource, desc, descriptor),
            DescriptorHeapType::Dsv => self.native.create_depth_stencil_view(native_resource, desc, descriptor),
            _ if usage_type.intersects(ResourceUsage::UNORDERED_ACCESS) => {
                self.native.create_unordered_access_view(native_resource, desc, descriptor)
            }
            _ => self.native.create_shader_resource_view(native_resource, desc, descriptor),
        }

        let view = ViewObject {
            descriptor,
            heap,
            resource,
            native_resource,
            usage: usage_type,
            desc: *desc,
        };
        match ApiObject::create(&self.objects.views, view, &[], 0) {
            Ok(object) => Ok(handle_of(object)),
            Err(err) => {
                self.cpu_pool(heap).free(descriptor);
                Err(err)
            }
        }
    }

    pub fn destroy_resource_view(&self, view: Handle<ResourceView>) {
        let Some(object) = ApiObject::resolve(&*self.objects.views, view) else {
            return;
        };
        let ViewObject { heap, descriptor, .. } = *object.native();
        // SAFETY: the handle is consumed here.
        unsafe { release(object) };
        self.cpu_pool(heap).free(descriptor);
    }

    pub fn get_resource_from_view(&self, view: Handle<ResourceView>) -> Handle<Resource> {
        self.view_object(view).map(|v| v.resource).unwrap_or_default()
    }

    pub fn get_resource_view_desc(&self, view: Handle<ResourceView>) -> ResourceViewDesc {
        self.view_object(view).map(|v| v.desc).unwrap_or_default()
    }

    pub(crate) fn view_object(&self, view: Handle<ResourceView>) -> Option<ViewObject> {
        ApiObject::resolve(&*self.objects.views, view).map(|object| *object.native())
    }

    pub fn create_sampler(&self, desc: &SamplerDesc) -> Result<Handle<Sampler>> {
        let descriptor = self.sampler_pool.allocate()?;
        self.native.create_sampler(desc, descriptor);
        match ApiObject::create(&self.objects.samplers, SamplerObject { descriptor, desc: *desc }, &[], 0) {
            Ok(object) => Ok(handle_of(object)),
            Err(err) => {
                self.sampler_pool.free(descriptor);
                Err(err)
            }
        }
    }

    pub fn destroy_sampler(&self, sampler: Handle<Sampler>) {
        let Some(object) = ApiObject::resolve(&*self.objects.samplers, sampler) else {
            return;
        };
        let descriptor = object.native().descriptor;
        // SAFETY: the handle is consumed here.
        unsafe { release(object) };
        self.sampler_pool.free(descriptor);
    }

    pub(crate) fn sampler_object(&self, sampler: Handle<Sampler>) -> Option<SamplerObject> {
        ApiObject::resolve(&*self.objects.samplers, sampler).map(|object| *object.native())
    }

    //===------------------------------------------------------------------===//
    // Pipelines
    //===------------------------------------------------------------------===//

    pub fn create_pipeline(&self, layout: Handle<PipelineLayout>, desc: &PipelineDesc<'_>) -> Result<Handle<Pipeline>> {
        let native = self
            .native
            .create_pipeline(self.get_native_pipeline_layout(layout), desc)
            .ok_or(GPUError::NativeCallFailed("create_pipeline"))?;
        let object = ApiObject::create(&self.objects.pipelines, native, &[], 0)?;
        if !desc.is_compute() {
            let extra = PIPELINE_EXTRA_PRESENT
                | (desc.topology as u64) << 32
                | pack_blend_constant(&desc.blend_constant) as u64;
            // SAFETY: the wrapper is not shared yet.
            unsafe { object.as_ref().set_private_data(PIPELINE_EXTRA_KEY, extra) };
        }
        if !desc.debug_name.is_empty() {
            log::debug!("created pipeline '{}'", desc.debug_name);
        }
        Ok(handle_of(object))
    }

    pub fn destroy_pipeline(&self, pipeline: Handle<Pipeline>) {
        let Some(object) = ApiObject::resolve(&*self.objects.pipelines, pipeline) else {
            return;
        };
        // SAFETY: destruction requires exclusive ownership of the handle.
        unsafe {
            object.set_private_data(PIPELINE_EXTRA_KEY, 0);
            release(object);
        }
    }

    pub fn get_native_pipeline(&self, pipeline: Handle<Pipeline>) -> u64 {
        ApiObject::resolve(&*self.objects.pipelines, pipeline)
            .map(|object| object.get_native())
            .unwrap_or(0)
    }

    /// Primitive topology and blend constant stored for a graphics pipeline.
    pub(crate) fn pipeline_extra(&self, pipeline: Handle<Pipeline>) -> Option<(PrimitiveTopology, [f32; 4])> {
        let object = ApiObject::resolve(&*self.objects.pipelines, pipeline)?;
        // SAFETY: pipeline metadata is only written at creation and destruction.
        let extra = unsafe { object.get_private_data(&PIPELINE_EXTRA_KEY) };
        if extra & PIPELINE_EXTRA_PRESENT == 0 {
            return None;
        }
        let topology = PrimitiveTopology::from_raw((extra >> 32) as u32 & 0xFF);
        Some((topology, unpack_blend_constant(extra as u32)))
    }

    pub fn create_pipeline_layout(&self, params: &[PipelineLayoutParam]) -> Result<Handle<PipelineLayout>> {
        let native = self
            .native
            .create_root_signature(params)
            .ok_or(GPUError::NativeCallFailed("create_root_signature"))?;
        let layout = LayoutObject {
            native,
            params: params.to_vec(),
        };
        let object = ApiObject::create(&self.objects.pipeline_layouts, layout, &[], 0)?;
        Ok(handle_of(object))
    }

    pub fn destroy_pipeline_layout(&self, layout: Handle<PipelineLayout>) {
        if let Some(object) = ApiObject::resolve(&*self.objects.pipeline_layouts, layout) {
            // SAFETY: the handle is consumed here.
            unsafe { release(object) };
        }
    }

    pub fn get_native_pipeline_layout(&self, layout: Handle<PipelineLayout>) -> u64 {
        ApiObject::resolve(&*self.objects.pipeline_layouts, layout)
            .map(|object| object.get_native())
            .unwrap_or(0)
    }

    pub fn get_pipeline_layout_param(&self, layout: Handle<PipelineLayout>, index: u32) -> Option<PipelineLayoutParam> {
        let object = ApiObject::resolve(&*self.objects.pipeline_layouts, layout)?;
        object.native().params.get(index as usize).copied()
    }

    /// Root signature and pipeline used by `generate_mipmaps`.
    pub(crate) fn mipmap_pipeline(&self) -> Option<(u64, u64)> {
        self.mipmap
            .as_ref()
            .map(|(layout, pipeline)| (layout.raw(), pipeline.raw()))
    }

    //===------------------------------------------------------------------===//
    // Queries
    //===------------------------------------------------------------------===//

    /// Creates a query heap plus a readback buffer that every `end_query`
    /// resolves into.
    pub fn create_query_pool(&self, ty: QueryType, count: u32) -> Result<Handle<QueryPool>> {
        let native = self
            .native
            .create_query_heap(ty, count)
            .ok_or(GPUError::NativeCallFailed("create_query_heap"))?;

        let readback_desc = ResourceDesc::buffer(count as u64 * 8, MemoryHeap::GpuToCpu, ResourceUsage::COPY_DEST);
        let readback = match self.create_resource(&readback_desc, ResourceUsage::COPY_DEST) {
            Ok(readback) => readback,
            Err(err) => {
                log::warn!("query pool created without readback buffer: {}", err);
                Handle::NULL
            }
        };
        match ApiObject::create(&self.objects.query_pools, QueryPoolObject { native, readback }, &[], 0) {
            Ok(object) => Ok(handle_of(object)),
            Err(err) => {
                self.destroy_resource(readback);
                Err(err)
            }
        }
    }

    pub fn destroy_query_pool(&self, pool: Handle<QueryPool>) {
        let Some(object) = ApiObject::resolve(&*self.objects.query_pools, pool) else {
            return;
        };
        let readback = object.native().readback;
        // SAFETY: the handle is consumed here.
        unsafe { release(object) };
        self.destroy_resource(readback);
    }

    pub fn get_native_query_pool(&self, pool: Handle<QueryPool>) -> u64 {
        ApiObject::resolve(&*self.objects.query_pools, pool)
            .map(|object| object.get_native())
            .unwrap_or(0)
    }

    /// Readback buffer attached to `pool`, or the null handle.
    pub fn get_query_pool_readback(&self, pool: Handle<QueryPool>) -> Handle<Resource> {
        ApiObject::resolve(&*self.objects.query_pools, pool)
            .map(|object| object.native().readback)
            .unwrap_or_default()
    }

    /// Reads `results.len()` resolved 64-bit values starting at query `first`.
    pub fn get_query_pool_results(&self, pool: Handle<QueryPool>, first: u32, results: &mut [u64]) -> bool {
        let readback = self.get_native_resource(self.get_query_pool_readback(pool));
        if readback == 0 {
            return false;
        }
        self.native
            .read_buffer(readback, first as u64 * 8, bytemuck::cast_slice_mut(results))
    }

    //===------------------------------------------------------------------===//
    // Descriptor sets
    //===------------------------------------------------------------------===//

    fn gpu_heap(&self, ty: DescriptorHeapType) -> &GpuDescriptorHeap<B> {
        match ty {
            DescriptorHeapType::Sampler => &self.sampler_heap,
            _ => &self.view_heap,
        }
    }

    /// Allocates `count` sets shaped like descriptor table `param` of `layout`.
    pub fn allocate_descriptor_sets(
        &self,
        layout: Handle<PipelineLayout>,
        param: u32,
        count: u32,
    ) -> Result<Vec<Handle<DescriptorSet>>> {
        let Some(PipelineLayoutParam::DescriptorTable { ty, count: size, .. }) =
            self.get_pipeline_layout_param(layout, param)
        else {
            return Err(GPUError::InvalidHandle("allocate_descriptor_sets"));
        };
        let heap = self.gpu_heap(convert_descriptor_type_to_heap_type(ty));

        let mut sets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let allocated = heap
                .allocate_static(size)
                .ok_or(GPUError::DescriptorHeapExhausted(heap.heap_type()))
                .and_then(|range| {
                    ApiObject::create(&self.objects.descriptor_sets, DescriptorTableObject { ty, range }, &[], 0)
                        .map_err(|err| {
                            heap.free_static(&range);
                            err
                        })
                });
            match allocated {
                Ok(object) => sets.push(handle_of(object)),
                Err(err) => {
                    log::warn!("descriptor set allocation failed: {}", err);
                    self.free_descriptor_sets(&sets);
                    return Err(err);
                }
            }
        }
        Ok(sets)
    }

    pub fn free_descriptor_sets(&self, sets: &[Handle<DescriptorSet>]) {
        for set in sets {
            let Some(object) = ApiObject::resolve(&*self.objects.descriptor_sets, *set) else {
                continue;
            };
            let table = *object.native();
            // SAFETY: the handle is consumed here.
            unsafe { release(object) };
            self.gpu_heap(table.heap_type()).free_static(&table.range);
        }
    }

    pub(crate) fn descriptor_table(&self, set: Handle<DescriptorSet>) -> Option<DescriptorTableObject> {
        ApiObject::resolve(&*self.objects.descriptor_sets, set).map(|object| *object.native())
    }

    /// Shader-visible heap that owns `set`.
    pub fn get_descriptor_heap_from_set(&self, set: Handle<DescriptorSet>) -> Option<&GpuDescriptorHeap<B>> {
        let table = self.descriptor_table(set)?;
        [&self.sampler_heap, &self.view_heap]
            .into_iter()
            .find(|heap| heap.contains_gpu(table.range.gpu))
    }

    pub fn update_descriptor_sets(&self, updates: &[DescriptorSetUpdate<'_>]) {
        for update in updates {
            let Some(table) = self.descriptor_table(update.set) else {
                log::warn!("skipping update of unknown descriptor set {:?}", update.set);
                continue;
            };
            let start = update.binding + update.array_offset;
            if start + update.count() > table.range.count {
                log::warn!(
                    "descriptor update [{}, {}) exceeds set of {} descriptors",
                    start,
                    start + update.count(),
                    table.range.count
                );
                continue;
            }
            let heap = self.gpu_heap(table.heap_type());
            self.write_descriptors(heap, heap.offset_cpu(table.range.cpu, start), &update.descriptors);
        }
    }

    pub fn copy_descriptor_sets(&self, copies: &[DescriptorSetCopy]) {
        for copy in copies {
            let (Some(src), Some(dst)) = (self.descriptor_table(copy.source_set), self.descriptor_table(copy.dest_set)) else {
                log::warn!("skipping descriptor copy between unknown sets");
                continue;
            };
            debug_assert_eq!(src.heap_type(), dst.heap_type());
            let heap = self.gpu_heap(dst.heap_type());
            self.native.copy_descriptors(
                copy.count,
                heap.offset_cpu(dst.range.cpu, copy.dest_binding + copy.dest_array_offset),
                heap.offset_cpu(src.range.cpu, copy.source_binding + copy.source_array_offset),
                heap.heap_type(),
            );
        }
    }

    /// Writes `descriptors` to consecutive slots of `heap` starting at `dst`.
    pub(crate) fn write_descriptors(
        &self,
        heap: &GpuDescriptorHeap<B>,
        dst: CpuDescriptorHandle,
        descriptors: &Descriptors<'_>,
    ) {
        let ty = heap.heap_type();
        match descriptors {
            Descriptors::Samplers(samplers) => {
                for (i, sampler) in samplers.iter().enumerate() {
                    let Some(object) = self.sampler_object(*sampler) else {
                        continue;
                    };
                    self.native
                        .copy_descriptors(1, heap.offset_cpu(dst, i as u32), object.descriptor, ty);
                }
            }
            Descriptors::ShaderResourceViews(views) | Descriptors::UnorderedAccessViews(views) => {
                for (i, view) in views.iter().enumerate() {
                    let Some(object) = self.view_object(*view) else {
                        continue;
                    };
                    self.native
                        .copy_descriptors(1, heap.offset_cpu(dst, i as u32), object.descriptor, ty);
                }
            }
            Descriptors::ConstantBuffers(ranges) => {
                for (i, range) in ranges.iter().enumerate() {
                    let buffer = self.get_native_resource(range.buffer);
                    let (location, size) = if buffer == 0 {
                        (0, 0)
                    } else {
                        let size = if range.size == u64::MAX {
                            self.native.resource_desc(buffer).width.saturating_sub(range.offset)
                        } else {
                            range.size
                        };
                        (self.native.gpu_virtual_address(buffer) + range.offset, size as u32)
                    };
                    self.native
                        .create_constant_buffer_view(location, size, heap.offset_cpu(dst, i as u32));
                }
            }
        }
    }

    //===------------------------------------------------------------------===//
    // Queues
    //===------------------------------------------------------------------===//

    pub(crate) fn register_queue(&self, queue: u64) {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(queue);
    }

    pub(crate) fn unregister_queue(&self, queue: u64) {
        let mut queues = self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(i) = queues.iter().position(|q| *q == queue) {
            queues.swap_remove(i);
        }
    }

    /// Native handles of the queues currently alive on this device.
    pub fn queues(&self) -> Vec<u64> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl<B: Backend> Drop for DeviceImpl<B> {
    fn drop(&mut self) {
        if let Some((layout, pipeline)) = self.mipmap.take() {
            pipeline.release();
            layout.release();
        }
        log::debug!("destroyed device");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::types::{DescriptorType, Format, ShaderStage};
    use crate::gpu::null::{DescriptorWrite, NullBackend, NullDevice};

    fn device() -> Arc<DeviceImpl<NullBackend>> {
        let info = DeviceInfo {
            view_heap_static_size: 16,
            view_heap_transient_size: 16,
            sampler_heap_static_size: 8,
            sampler_heap_transient_size: 8,
            cpu_descriptor_pool_size: 8,
            mipmap_generation: true,
        };
        DeviceImpl::new(NullDevice::new(), &info).unwrap()
    }

    #[test]
    fn readback_heaps_start_in_copy_dest() {
        let device = device();
        let desc = ResourceDesc::buffer(64, MemoryHeap::GpuToCpu, ResourceUsage::COPY_DEST);
        let buffer = device.create_resource(&desc, ResourceUsage::SHADER_RESOURCE).unwrap();
        let native = device.get_native_resource(buffer);
        assert_eq!(device.native().initial_state(native), Some(ResourceStates::COPY_DEST));
        assert_eq!(device.get_resource_desc(buffer).width, 64);
        device.destroy_resource(buffer);
        assert_eq!(device.get_native_resource(Handle::NULL), 0);
    }

    #[test]
    fn views_pick_their_descriptor_pool() {
        let device = device();
        let tex = device
            .create_resource(
                &ResourceDesc::texture_2d(64, 64, 1, Format::RGBA8Unorm, ResourceUsage::RENDER_TARGET),
                ResourceUsage::RENDER_TARGET,
            )
            .unwrap();
        let desc = ResourceViewDesc::texture_2d(Format::RGBA8Unorm, 0, 1);
        let rtv = device.create_resource_view(tex, ResourceUsage::RENDER_TARGET, &desc).unwrap();
        let uav = device.create_resource_view(tex, ResourceUsage::UNORDERED_ACCESS, &desc).unwrap();
        assert_eq!(device.get_resource_from_view(rtv), tex);
        assert_eq!(device.get_resource_view_desc(uav), desc);

        let writes = device.native().descriptor_writes();
        assert!(matches!(writes[0], DescriptorWrite::RenderTargetView { .. }));
        assert!(matches!(writes[1], DescriptorWrite::UnorderedAccessView { .. }));

        assert!(device
            .create_resource_view(tex, ResourceUsage::COPY_SOURCE, &desc)
            .is_err());
        device.destroy_resource_view(rtv);
        device.destroy_resource_view(uav);
        device.destroy_resource(tex);
    }

    #[test]
    fn descriptor_sets_come_from_the_static_region() {
        let device = device();
        let layout = device
            .create_pipeline_layout(&[PipelineLayoutParam::DescriptorTable {
                stages: ShaderStage::ALL,
                ty: DescriptorType::ShaderResourceView,
                count: 4,
            }])
            .unwrap();
        let sets = device.allocate_descriptor_sets(layout, 0, 4).unwrap();
        assert_eq!(sets.len(), 4);
        assert!(device.allocate_descriptor_sets(layout, 0, 1).is_err());
        assert!(device.allocate_descriptor_sets(layout, 1, 1).is_err());

        let heap = device.get_descriptor_heap_from_set(sets[0]).unwrap();
        assert_eq!(heap.heap_type(), DescriptorHeapType::CbvSrvUav);

        device.free_descriptor_sets(&sets[..1]);
        let again = device.allocate_descriptor_sets(layout, 0, 1).unwrap();
        assert_eq!(device.descriptor_table(again[0]).unwrap().range.first, 0);

        device.free_descriptor_sets(&again);
        device.free_descriptor_sets(&sets[1..]);
        device.destroy_pipeline_layout(layout);
    }

    #[test]
    fn pipeline_extra_round_trips_through_metadata() {
        let device = device();
        let desc = PipelineDesc {
            vertex: Some(&[0u8; 4][..]),
            topology: PrimitiveTopology::TriangleStrip,
            blend_constant: [1.0, 0.0, 1.0, 0.0],
            ..Default::default()
        };
        let pipeline = device.create_pipeline(Handle::NULL, &desc).unwrap();
        assert_eq!(
            device.pipeline_extra(pipeline),
            Some((PrimitiveTopology::TriangleStrip, [1.0, 0.0, 1.0, 0.0]))
        );
        device.destroy_pipeline(pipeline);

        let compute = PipelineDesc {
            compute: Some(&[0u8; 4][..]),
            ..Default::default()
        };
        let pipeline = device.create_pipeline(Handle::NULL, &compute).unwrap();
        assert_eq!(device.pipeline_extra(pipeline), None);
        device.destroy_pipeline(pipeline);
    }

    #[test]
    fn query_results_come_from_readback() {
        let device = device();
        let pool = device.create_query_pool(QueryType::Timestamp, 4).unwrap();
        let readback = device.get_native_resource(device.get_query_pool_readback(pool));
        assert_ne!(readback, 0);
        assert!(device.native().write_buffer(readback, 8, bytemuck::bytes_of(&42u64)));

        let mut results = [0u64; 2];
        assert!(device.get_query_pool_results(pool, 1, &mut results));
        assert_eq!(results, [42, 0]);

        let readback = device.get_query_pool_readback(pool);
        device.destroy_query_pool(pool);
        assert_eq!(device.get_native_resource(readback), 0);
        assert!(device.get_query_pool_readback(pool).is_null());
    }

    #[test]
    fn stale_resource_handle_does_not_reach_its_successor() {
        let device = device();
        let desc = ResourceDesc::buffer(256, MemoryHeap::GpuOnly, ResourceUsage::VERTEX_BUFFER);
        let a = device.create_resource(&desc, ResourceUsage::VERTEX_BUFFER).unwrap();
        device.destroy_resource(a);

        let b = device.create_resource(&desc, ResourceUsage::VERTEX_BUFFER).unwrap();
        assert_eq!(a.raw(), b.raw());
        assert_ne!(a, b);
        let b_native = device.get_native_resource(b);
        assert_ne!(b_native, 0);

        assert_eq!(device.get_native_resource(a), 0);
        assert_eq!(device.get_resource_desc(a).width, 0);
        device.destroy_resource(a);
        assert_eq!(device.get_native_resource(b), b_native);
        device.destroy_resource(b);
        assert_eq!(device.get_native_resource(b), 0);
    }
}
