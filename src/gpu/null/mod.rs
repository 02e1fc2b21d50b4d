//! Headless backend that records native calls instead of executing them.
//!
//! Useful for tests and for running the translation layer without a GPU.
//! Objects carry real reference counts, queues run a software timeline and
//! command lists keep every call they receive in order.

mod command_list;
mod queue;

pub use command_list::{NativeCall, NullCommandList};
pub use queue::{NullFence, NullQueue, QueueMarker};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::api::object::{Guid, NativeObject};
use crate::driver::types::{
    PipelineDesc, PipelineLayoutParam, QueryType, QueueKind, ResourceDesc, ResourceKind,
    ResourceViewDesc, SamplerDesc,
};
use crate::gpu::d3d12::native::{
    CpuDescriptorHandle, DescriptorHeapType, GpuDescriptorHandle, NativeDescriptorHeap, NativeDevice,
    PlacedFootprint, ResourceStates,
};
use crate::gpu::Backend;

static NEXT_ID: AtomicU64 = AtomicU64::new(0x1000);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(0x10, Ordering::Relaxed)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//===----------------------------------------------------------------------===//
// Objects
//===----------------------------------------------------------------------===//

struct NullObjectInner {
    raw: u64,
    refs: AtomicU32,
    interfaces: Vec<Guid>,
}

/// Reference-counted stand-in for a native COM object. Clones observe the
/// same count.
#[derive(Clone)]
pub struct NullObject {
    inner: Arc<NullObjectInner>,
}

impl NullObject {
    pub fn new() -> Self {
        Self::with_interfaces(&[])
    }

    /// An object that answers `query_interface` for `interfaces`.
    pub fn with_interfaces(interfaces: &[Guid]) -> Self {
        Self {
            inner: Arc::new(NullObjectInner {
                raw: next_id(),
                refs: AtomicU32::new(1),
                interfaces: interfaces.to_vec(),
            }),
        }
    }

    pub fn native_ref_count(&self) -> u32 {
        self.inner.refs.load(Ordering::Acquire)
    }
}

impl Default for NullObject {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeObject for NullObject {
    fn raw(&self) -> u64 {
        self.inner.raw
    }

    fn add_ref(&self) -> u32 {
        self.inner.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn release(&self) -> u32 {
        let previous = self.inner.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "native object over-released");
        previous.saturating_sub(1)
    }

    fn query_interface(&self, iid: &Guid) -> bool {
        self.inner.interfaces.contains(iid)
    }
}

pub struct NullDescriptorHeap {
    object: NullObject,
    cpu_start: CpuDescriptorHandle,
    gpu_start: GpuDescriptorHandle,
}

impl NativeObject for NullDescriptorHeap {
    fn raw(&self) -> u64 {
        self.object.raw()
    }
}

impl NativeDescriptorHeap for NullDescriptorHeap {
    fn cpu_start(&self) -> CpuDescriptorHandle {
        self.cpu_start
    }

    fn gpu_start(&self) -> GpuDescriptorHandle {
        self.gpu_start
    }
}

//===----------------------------------------------------------------------===//
// Device
//===----------------------------------------------------------------------===//

/// Descriptor writes issued through the null device.
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorWrite {
    ShaderResourceView { resource: u64, desc: ResourceViewDesc, dst: CpuDescriptorHandle },
    UnorderedAccessView { resource: u64, desc: ResourceViewDesc, dst: CpuDescriptorHandle },
    RenderTargetView { resource: u64, desc: ResourceViewDesc, dst: CpuDescriptorHandle },
    DepthStencilView { resource: u64, desc: ResourceViewDesc, dst: CpuDescriptorHandle },
    ConstantBufferView { location: u64, size: u32, dst: CpuDescriptorHandle },
    Sampler { dst: CpuDescriptorHandle },
    Copy { count: u32, dst: CpuDescriptorHandle, src: CpuDescriptorHandle, ty: DescriptorHeapType },
}

#[derive(Default)]
struct NullResource {
    desc: ResourceDesc,
    initial: ResourceStates,
    contents: Vec<u8>,
    name: String,
}

pub struct NullDevice {
    render_passes: AtomicBool,
    native_mips: AtomicBool,
    mipmap_pipeline: AtomicBool,
    heaps_created: AtomicU64,
    resources: Mutex<HashMap<u64, NullResource>>,
    writes: Mutex<Vec<DescriptorWrite>>,
}

/// Placeholder base address of resource memory.
const GPU_VA_BASE: u64 = 0x1_0000_0000;

impl NullDevice {
    pub fn new() -> Self {
        Self {
            render_passes: AtomicBool::new(true),
            native_mips: AtomicBool::new(false),
            mipmap_pipeline: AtomicBool::new(true),
            heaps_created: AtomicU64::new(0),
            resources: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Command lists created afterwards expose native render passes only
    /// when `enabled`.
    pub fn with_render_pass_support(self, enabled: bool) -> Self {
        self.render_passes.store(enabled, Ordering::Release);
        self
    }

    /// Command lists created afterwards generate mip chains themselves,
    /// the way an immediate context does.
    pub fn with_native_mipmaps(self, enabled: bool) -> Self {
        self.native_mips.store(enabled, Ordering::Release);
        self
    }

    pub fn without_mipmap_pipeline(self) -> Self {
        self.mipmap_pipeline.store(false, Ordering::Release);
        self
    }

    pub fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        lock(&self.writes).clone()
    }

    pub fn clear_descriptor_writes(&self) {
        lock(&self.writes).clear();
    }

    pub fn resource_count(&self) -> usize {
        lock(&self.resources).len()
    }

    pub fn initial_state(&self, resource: u64) -> Option<ResourceStates> {
        lock(&self.resources).get(&resource).map(|r| r.initial)
    }

    pub fn resource_name(&self, resource: u64) -> Option<String> {
        lock(&self.resources).get(&resource).map(|r| r.name.clone())
    }

    /// Writes into a buffer's backing store, as the GPU would.
    pub fn write_buffer(&self, resource: u64, offset: u64, data: &[u8]) -> bool {
        let mut resources = lock(&self.resources);
        let Some(r) = resources.get_mut(&resource) else {
            return false;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > r.contents.len() {
            return false;
        }
        r.contents[start..end].copy_from_slice(data);
        true
    }

    fn record(&self, write: DescriptorWrite) {
        lock(&self.writes).push(write);
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn align_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) / alignment * alignment
}

impl NativeDevice<NullBackend> for NullDevice {
    fn descriptor_increment(&self, ty: DescriptorHeapType) -> u32 {
        match ty {
            DescriptorHeapType::CbvSrvUav => 32,
            DescriptorHeapType::Sampler => 16,
            DescriptorHeapType::Rtv => 32,
            DescriptorHeapType::Dsv => 8,
        }
    }

    fn create_descriptor_heap(
        &self,
        _ty: DescriptorHeapType,
        _capacity: u32,
        shader_visible: bool,
    ) -> Option<NullDescriptorHeap> {
        let n = self.heaps_created.fetch_add(1, Ordering::AcqRel) + 1;
        Some(NullDescriptorHeap {
            object: NullObject::new(),
            cpu_start: CpuDescriptorHandle(n << 36),
            gpu_start: GpuDescriptorHandle(if shader_visible { (n << 36) | 1 << 60 } else { 0 }),
        })
    }

    fn create_resource(&self, desc: &ResourceDesc, initial: ResourceStates) -> Option<NullObject> {
        let object = NullObject::new();
        let contents = if desc.kind == ResourceKind::Buffer {
            vec![0; desc.width as usize]
        } else {
            Vec::new()
        };
        lock(&self.resources).insert(
            object.raw(),
            NullResource {
                desc: *desc,
                initial,
                contents,
                name: String::new(),
            },
        );
        Some(object)
    }

    fn resource_desc(&self, resource: u64) -> ResourceDesc {
        lock(&self.resources)
            .get(&resource)
            .map(|r| r.desc)
            .unwrap_or_default()
    }

    fn gpu_virtual_address(&self, resource: u64) -> u64 {
        GPU_VA_BASE + (resource << 16)
    }

    fn copyable_footprint(&self, desc: &ResourceDesc, subresource: u32, offset: u64) -> PlacedFootprint {
        let level = subresource % (desc.levels.max(1) as u32);
        let width = ((desc.width as u32) >> level).max(1);
        let height = (desc.height >> level).max(1);
        let depth = if desc.kind == ResourceKind::Texture3D {
            ((desc.depth_or_layers as u32) >> level).max(1)
        } else {
            1
        };
        PlacedFootprint {
            offset,
            format: desc.format,
            width,
            height,
            depth,
            row_pitch: align_up(width * desc.format.bytes_per_pixel().max(1), 256),
        }
    }

    fn read_buffer(&self, resource: u64, offset: u64, data: &mut [u8]) -> bool {
        let resources = lock(&self.resources);
        let Some(r) = resources.get(&resource) else {
            return false;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > r.contents.len() {
            return false;
        }
        data.copy_from_slice(&r.contents[start..end]);
        true
    }

    fn set_name(&self, resource: u64, name: &str) {
        if let Some(r) = lock(&self.resources).get_mut(&resource) {
            r.name = name.to_string();
        }
    }

    fn create_shader_resource_view(&self, resource: u64, desc: &ResourceViewDesc, dst: CpuDescriptorHandle) {
        self.record(DescriptorWrite::ShaderResourceView { resource, desc: *desc, dst });
    }

    fn create_unordered_access_view(&self, resource: u64, desc: &ResourceViewDesc, dst: CpuDescriptorHandle) {
        self.record(DescriptorWrite::UnorderedAccessView { resource, desc: *desc, dst });
    }

    fn create_render_target_view(&self, resource: u64, desc: &ResourceViewDesc, dst: CpuDescriptorHandle) {
        self.record(DescriptorWrite::RenderTargetView { resource, desc: *desc, dst });
    }

    fn create_depth_stencil_view(&self, resource: u64, desc: &ResourceViewDesc, dst: CpuDescriptorHandle) {
        self.record(DescriptorWrite::DepthStencilView { resource, desc: *desc, dst });
    }

    fn create_constant_buffer_view(&self, location: u64, size: u32, dst: CpuDescriptorHandle) {
        self.record(DescriptorWrite::ConstantBufferView { location, size, dst });
    }

    fn create_sampler(&self, _desc: &SamplerDesc, dst: CpuDescriptorHandle) {
        self.record(DescriptorWrite::Sampler { dst });
    }

    fn copy_descriptors(&self, count: u32, dst: CpuDescriptorHandle, src: CpuDescriptorHandle, ty: DescriptorHeapType) {
        self.record(DescriptorWrite::Copy { count, dst, src, ty });
    }

    fn create_root_signature(&self, _params: &[PipelineLayoutParam]) -> Option<NullObject> {
        Some(NullObject::new())
    }

    fn create_pipeline(&self, _layout: u64, _desc: &PipelineDesc<'_>) -> Option<NullObject> {
        Some(NullObject::new())
    }

    fn create_mipmap_pipeline(&self) -> Option<(NullObject, NullObject)> {
        self.mipmap_pipeline
            .load(Ordering::Acquire)
            .then(|| (NullObject::new(), NullObject::new()))
    }

    fn create_query_heap(&self, _ty: QueryType, _count: u32) -> Option<NullObject> {
        Some(NullObject::new())
    }

    fn create_command_list(&self, kind: QueueKind) -> Option<NullCommandList> {
        Some(
            NullCommandList::new(kind, self.render_passes.load(Ordering::Acquire))
                .with_native_mips(self.native_mips.load(Ordering::Acquire)),
        )
    }

    fn create_fence(&self, initial: u64) -> Option<NullFence> {
        Some(NullFence::new(initial))
    }
}

/// Marker tying the null object types together.
pub struct NullBackend;

impl Backend for NullBackend {
    type Device = NullDevice;
    type DescriptorHeap = NullDescriptorHeap;
    type Resource = NullObject;
    type Pipeline = NullObject;
    type PipelineLayout = NullObject;
    type QueryPool = NullObject;
    type CommandList = NullCommandList;
    type Fence = NullFence;
    type Queue = NullQueue;
}
