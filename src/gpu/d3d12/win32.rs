//! Direct3D 12 backend on top of the `windows` crate.
//!
//! Wrappers hold interface pointers without letting `windows` manage their
//! lifetime: the translation layer adds and drops references explicitly
//! through [`NativeObject`], so none of the object wrappers here implement
//! `Drop`.
//!
//! Root parameter `i` of a pipeline layout binds registers starting at 0 in
//! register space `i`.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;

use windows::core::{Interface, GUID, HSTRING, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, RECT};
use windows::Win32::Graphics::Direct3D::{ID3DBlob, D3D_PRIMITIVE_TOPOLOGY};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};

use crate::api::object::{Guid, NativeObject};
use crate::driver::types::{
    AddressMode, DescriptorType, Filter, Format, MemoryHeap, PipelineDesc, PipelineLayoutParam,
    PrimitiveTopology, QueryType, QueueKind, Rect, ResourceDesc, ResourceKind, ResourceUsage,
    ResourceViewDesc, ResourceViewKind, SamplerDesc, ShaderStage, SubresourceBox, Viewport,
};
use crate::gpu::Backend;

use super::native::{
    BeginningAccess, BindPoint, ClearFlags, CpuDescriptorHandle, DescriptorHeapType, EndingAccess,
    GpuDescriptorHandle, IndexBufferView, IndexFormat, NativeBarrier, NativeCommandList,
    NativeDescriptorHeap, NativeDevice, NativeFence, NativeQueue, NativeRenderPass, PlacedFootprint,
    RenderPassDepthStencil, RenderPassRenderTarget, ResourceStates, TextureCopyLocation,
    VertexBufferView, WaitEvent,
};
use super::immediate::NUM_ALLOCATORS;

//===----------------------------------------------------------------------===//
// Interface pointers
//===----------------------------------------------------------------------===//

/// Interface pointer whose references are managed by hand.
pub struct Com<T: Interface> {
    raw: *mut c_void,
    phantom: PhantomData<T>,
}

// D3D12 interfaces are free threaded.
unsafe impl<T: Interface> Send for Com<T> {}
unsafe impl<T: Interface> Sync for Com<T> {}

impl<T: Interface> Com<T> {
    /// Adopts the reference held by `object`.
    pub fn new(object: T) -> Self {
        Self {
            raw: object.into_raw(),
            phantom: PhantomData,
        }
    }

    pub fn get(&self) -> &T {
        // SAFETY: `raw` came from `into_raw` and this wrapper still holds a reference.
        unsafe { T::from_raw_borrowed(&self.raw) }.unwrap_or_else(|| unreachable!("null interface pointer"))
    }

    fn unknown(&self) -> &windows::core::IUnknown_Vtbl {
        // SAFETY: every COM vtable starts with the IUnknown entries.
        unsafe { &**(self.raw as *const *const windows::core::IUnknown_Vtbl) }
    }
}

impl<T: Interface> NativeObject for Com<T> {
    fn raw(&self) -> u64 {
        self.raw as usize as u64
    }

    fn add_ref(&self) -> u32 {
        // SAFETY: the pointer is live while any reference is held.
        unsafe { (self.unknown().AddRef)(self.raw) }
    }

    fn release(&self) -> u32 {
        // SAFETY: as above; the caller gives up one reference.
        unsafe { (self.unknown().Release)(self.raw) }
    }

    fn query_interface(&self, iid: &Guid) -> bool {
        let guid = GUID::from_u128(iid.0);
        let mut out = std::ptr::null_mut();
        // SAFETY: a successful query hands out a reference that is dropped right away.
        let found = unsafe { (self.unknown().QueryInterface)(self.raw, &guid, &mut out) }.is_ok();
        if found && !out.is_null() {
            // SAFETY: `out` holds the reference taken by the query.
            drop(unsafe { windows::core::IUnknown::from_raw(out) });
        }
        found
    }
}

/// Borrows the interface behind a raw value handed across the native traits.
fn borrow<T: Interface>(raw: &u64) -> Option<&T> {
    if *raw == 0 {
        return None;
    }
    // SAFETY: raw values are interface pointers of the named type, and
    // `u64` and pointers share a layout on the 64-bit targets D3D12 runs on.
    unsafe { T::from_raw_borrowed(&*(raw as *const u64 as *const *mut c_void)) }
}

/// Interface field of a native struct that does not own a reference.
fn weak<T: Interface>(raw: u64) -> ManuallyDrop<Option<T>> {
    // SAFETY: `ManuallyDrop<Option<T>>` is a nullable pointer and is never dropped.
    unsafe { std::mem::transmute_copy(&(raw as usize as *mut c_void)) }
}

//===----------------------------------------------------------------------===//
// Conversions
//===----------------------------------------------------------------------===//

fn dxgi_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Unknown => DXGI_FORMAT_UNKNOWN,
        Format::R8Unorm => DXGI_FORMAT_R8_UNORM,
        Format::R32Uint => DXGI_FORMAT_R32_UINT,
        Format::R32Float => DXGI_FORMAT_R32_FLOAT,
        Format::RGBA8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::RGBA8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Format::BGRA8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::RGBA16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Format::RGBA32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::D16Unorm => DXGI_FORMAT_D16_UNORM,
        Format::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
        Format::D32Float => DXGI_FORMAT_D32_FLOAT,
    }
}

fn from_dxgi_format(format: DXGI_FORMAT) -> Format {
    match format {
        DXGI_FORMAT_R8_UNORM => Format::R8Unorm,
        DXGI_FORMAT_R32_UINT => Format::R32Uint,
        DXGI_FORMAT_R32_FLOAT => Format::R32Float,
        DXGI_FORMAT_R8G8B8A8_UNORM => Format::RGBA8Unorm,
        DXGI_FORMAT_R8G8B8A8_UNORM_SRGB => Format::RGBA8UnormSrgb,
        DXGI_FORMAT_B8G8R8A8_UNORM => Format::BGRA8Unorm,
        DXGI_FORMAT_R16G16B16A16_FLOAT => Format::RGBA16Float,
        DXGI_FORMAT_R32G32B32A32_FLOAT => Format::RGBA32Float,
        DXGI_FORMAT_D16_UNORM => Format::D16Unorm,
        DXGI_FORMAT_D24_UNORM_S8_UINT => Format::D24UnormS8Uint,
        DXGI_FORMAT_D32_FLOAT => Format::D32Float,
        _ => Format::Unknown,
    }
}

fn heap_type(ty: DescriptorHeapType) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match ty {
        DescriptorHeapType::CbvSrvUav => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapType::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
        DescriptorHeapType::Rtv => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapType::Dsv => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
    }
}

fn states(states: ResourceStates) -> D3D12_RESOURCE_STATES {
    D3D12_RESOURCE_STATES(states.bits() as i32)
}

fn cpu(handle: CpuDescriptorHandle) -> D3D12_CPU_DESCRIPTOR_HANDLE {
    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.0 as usize }
}

fn gpu(handle: GpuDescriptorHandle) -> D3D12_GPU_DESCRIPTOR_HANDLE {
    D3D12_GPU_DESCRIPTOR_HANDLE { ptr: handle.0 }
}

fn rects(rects: &[Rect]) -> Vec<RECT> {
    rects
        .iter()
        .map(|r| RECT {
            left: r.left,
            top: r.top,
            right: r.right,
            bottom: r.bottom,
        })
        .collect()
}

fn command_list_type(kind: QueueKind) -> D3D12_COMMAND_LIST_TYPE {
    if kind.contains(QueueKind::GRAPHICS) {
        D3D12_COMMAND_LIST_TYPE_DIRECT
    } else if kind.contains(QueueKind::COMPUTE) {
        D3D12_COMMAND_LIST_TYPE_COMPUTE
    } else {
        D3D12_COMMAND_LIST_TYPE_COPY
    }
}

fn query_type(ty: QueryType) -> D3D12_QUERY_TYPE {
    match ty {
        QueryType::Occlusion => D3D12_QUERY_TYPE_OCCLUSION,
        QueryType::BinaryOcclusion => D3D12_QUERY_TYPE_BINARY_OCCLUSION,
        QueryType::Timestamp => D3D12_QUERY_TYPE_TIMESTAMP,
        QueryType::PipelineStatistics => D3D12_QUERY_TYPE_PIPELINE_STATISTICS,
        QueryType::StreamOutputStatistics0 => D3D12_QUERY_TYPE_SO_STATISTICS_STREAM0,
        QueryType::StreamOutputStatistics1 => D3D12_QUERY_TYPE_SO_STATISTICS_STREAM1,
        QueryType::StreamOutputStatistics2 => D3D12_QUERY_TYPE_SO_STATISTICS_STREAM2,
        QueryType::StreamOutputStatistics3 => D3D12_QUERY_TYPE_SO_STATISTICS_STREAM3,
    }
}

fn query_heap_type(ty: QueryType) -> D3D12_QUERY_HEAP_TYPE {
    match ty {
        QueryType::Occlusion | QueryType::BinaryOcclusion => D3D12_QUERY_HEAP_TYPE_OCCLUSION,
        QueryType::Timestamp => D3D12_QUERY_HEAP_TYPE_TIMESTAMP,
        QueryType::PipelineStatistics => D3D12_QUERY_HEAP_TYPE_PIPELINE_STATISTICS,
        _ => D3D12_QUERY_HEAP_TYPE_SO_STATISTICS,
    }
}

fn resource_desc(desc: &ResourceDesc) -> D3D12_RESOURCE_DESC {
    let mut flags = D3D12_RESOURCE_FLAG_NONE;
    if desc.usage.intersects(ResourceUsage::RENDER_TARGET) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
    }
    if desc.usage.intersects(ResourceUsage::DEPTH_STENCIL) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
    }
    if desc.usage.intersects(ResourceUsage::UNORDERED_ACCESS) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
    }
    let buffer = desc.kind == ResourceKind::Buffer;
    D3D12_RESOURCE_DESC {
        Dimension: match desc.kind {
            ResourceKind::Buffer => D3D12_RESOURCE_DIMENSION_BUFFER,
            ResourceKind::Texture1D => D3D12_RESOURCE_DIMENSION_TEXTURE1D,
            ResourceKind::Texture2D => D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            ResourceKind::Texture3D => D3D12_RESOURCE_DIMENSION_TEXTURE3D,
        },
        Alignment: 0,
        Width: desc.width,
        Height: if buffer { 1 } else { desc.height },
        DepthOrArraySize: if buffer { 1 } else { desc.depth_or_layers },
        MipLevels: if buffer { 1 } else { desc.levels },
        Format: if buffer { DXGI_FORMAT_UNKNOWN } else { dxgi_format(desc.format) },
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: desc.samples.max(1) as u32,
            Quality: 0,
        },
        Layout: if buffer {
            D3D12_TEXTURE_LAYOUT_ROW_MAJOR
        } else {
            D3D12_TEXTURE_LAYOUT_UNKNOWN
        },
        Flags: flags,
    }
}

fn from_resource_desc(desc: &D3D12_RESOURCE_DESC, heap: MemoryHeap) -> ResourceDesc {
    let mut usage = ResourceUsage::empty();
    if desc.Flags.contains(D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET) {
        usage |= ResourceUsage::RENDER_TARGET;
    }
    if desc.Flags.contains(D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL) {
        usage |= ResourceUsage::DEPTH_STENCIL;
    }
    if desc.Flags.contains(D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS) {
        usage |= ResourceUsage::UNORDERED_ACCESS;
    }
    if !desc.Flags.contains(D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE) {
        usage |= ResourceUsage::SHADER_RESOURCE;
    }
    ResourceDesc {
        kind: match desc.Dimension {
            D3D12_RESOURCE_DIMENSION_TEXTURE1D => ResourceKind::Texture1D,
            D3D12_RESOURCE_DIMENSION_TEXTURE2D => ResourceKind::Texture2D,
            D3D12_RESOURCE_DIMENSION_TEXTURE3D => ResourceKind::Texture3D,
            _ => ResourceKind::Buffer,
        },
        width: desc.Width,
        height: desc.Height,
        depth_or_layers: desc.DepthOrArraySize,
        levels: desc.MipLevels,
        format: from_dxgi_format(desc.Format),
        samples: desc.SampleDesc.Count as u16,
        heap,
        usage,
    }
}

fn sampler_desc(desc: &SamplerDesc) -> D3D12_SAMPLER_DESC {
    let address = |mode: AddressMode| match mode {
        AddressMode::Wrap => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressMode::Mirror => D3D12_TEXTURE_ADDRESS_MODE_MIRROR,
        AddressMode::Clamp => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressMode::Border => D3D12_TEXTURE_ADDRESS_MODE_BORDER,
    };
    D3D12_SAMPLER_DESC {
        Filter: match desc.filter {
            Filter::MinMagMipPoint => D3D12_FILTER_MIN_MAG_MIP_POINT,
            Filter::MinMagMipLinear => D3D12_FILTER_MIN_MAG_MIP_LINEAR,
            Filter::Anisotropic => D3D12_FILTER_ANISOTROPIC,
        },
        AddressU: address(desc.address_u),
        AddressV: address(desc.address_v),
        AddressW: address(desc.address_w),
        MipLODBias: desc.mip_lod_bias,
        MaxAnisotropy: desc.max_anisotropy,
        ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
        BorderColor: [0.0; 4],
        MinLOD: desc.min_lod,
        MaxLOD: desc.max_lod,
    }
}

fn shader_visibility(stages: ShaderStage) -> D3D12_SHADER_VISIBILITY {
    if stages == ShaderStage::VERTEX {
        D3D12_SHADER_VISIBILITY_VERTEX
    } else if stages == ShaderStage::HULL {
        D3D12_SHADER_VISIBILITY_HULL
    } else if stages == ShaderStage::DOMAIN {
        D3D12_SHADER_VISIBILITY_DOMAIN
    } else if stages == ShaderStage::GEOMETRY {
        D3D12_SHADER_VISIBILITY_GEOMETRY
    } else if stages == ShaderStage::PIXEL {
        D3D12_SHADER_VISIBILITY_PIXEL
    } else {
        D3D12_SHADER_VISIBILITY_ALL
    }
}

fn range_type(ty: DescriptorType) -> D3D12_DESCRIPTOR_RANGE_TYPE {
    match ty {
        DescriptorType::Sampler => D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER,
        DescriptorType::ShaderResourceView => D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        DescriptorType::UnorderedAccessView => D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
        DescriptorType::ConstantBuffer => D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
    }
}

fn topology_type(topology: PrimitiveTopology) -> D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    match topology {
        PrimitiveTopology::PointList => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        PrimitiveTopology::LineList | PrimitiveTopology::LineStrip => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        PrimitiveTopology::Undefined => D3D12_PRIMITIVE_TOPOLOGY_TYPE_UNDEFINED,
        _ => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
    }
}

fn bytecode(code: Option<&[u8]>) -> D3D12_SHADER_BYTECODE {
    match code {
        Some(code) => D3D12_SHADER_BYTECODE {
            pShaderBytecode: code.as_ptr() as *const c_void,
            BytecodeLength: code.len(),
        },
        None => D3D12_SHADER_BYTECODE::default(),
    }
}

fn beginning_access(access: BeginningAccess, format: Format, clear: D3D12_CLEAR_VALUE_0) -> D3D12_RENDER_PASS_BEGINNING_ACCESS {
    let ty = match access {
        BeginningAccess::Discard => D3D12_RENDER_PASS_BEGINNING_ACCESS_TYPE_DISCARD,
        BeginningAccess::Preserve => D3D12_RENDER_PASS_BEGINNING_ACCESS_TYPE_PRESERVE,
        BeginningAccess::Clear => D3D12_RENDER_PASS_BEGINNING_ACCESS_TYPE_CLEAR,
        BeginningAccess::NoAccess => D3D12_RENDER_PASS_BEGINNING_ACCESS_TYPE_NO_ACCESS,
    };
    D3D12_RENDER_PASS_BEGINNING_ACCESS {
        Type: ty,
        Anonymous: D3D12_RENDER_PASS_BEGINNING_ACCESS_0 {
            Clear: D3D12_RENDER_PASS_BEGINNING_ACCESS_CLEAR_PARAMETERS {
                ClearValue: D3D12_CLEAR_VALUE {
                    Format: dxgi_format(format),
                    Anonymous: clear,
                },
            },
        },
    }
}

fn ending_access(access: EndingAccess) -> D3D12_RENDER_PASS_ENDING_ACCESS {
    D3D12_RENDER_PASS_ENDING_ACCESS {
        Type: match access {
            EndingAccess::Discard => D3D12_RENDER_PASS_ENDING_ACCESS_TYPE_DISCARD,
            EndingAccess::Preserve => D3D12_RENDER_PASS_ENDING_ACCESS_TYPE_PRESERVE,
            EndingAccess::NoAccess => D3D12_RENDER_PASS_ENDING_ACCESS_TYPE_NO_ACCESS,
        },
        ..Default::default()
    }
}

fn copy_location(location: &TextureCopyLocation) -> D3D12_TEXTURE_COPY_LOCATION {
    match *location {
        TextureCopyLocation::Subresource { resource, index } => D3D12_TEXTURE_COPY_LOCATION {
            pResource: weak(resource),
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: index },
        },
        TextureCopyLocation::Footprint { resource, footprint } => D3D12_TEXTURE_COPY_LOCATION {
            pResource: weak(resource),
            Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                    Offset: footprint.offset,
                    Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                        Format: dxgi_format(footprint.format),
                        Width: footprint.width,
                        Height: footprint.height,
                        Depth: footprint.depth,
                        RowPitch: footprint.row_pitch,
                    },
                },
            },
        },
    }
}

fn native_barrier(barrier: &NativeBarrier) -> D3D12_RESOURCE_BARRIER {
    match *barrier {
        NativeBarrier::Uav { resource } => D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                UAV: ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER { pResource: weak(resource) }),
            },
        },
        NativeBarrier::Aliasing { before, after } => D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_ALIASING,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Aliasing: ManuallyDrop::new(D3D12_RESOURCE_ALIASING_BARRIER {
                    pResourceBefore: weak(before),
                    pResourceAfter: weak(after),
                }),
            },
        },
        NativeBarrier::Transition {
            resource,
            subresource,
            before,
            after,
        } => D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                    pResource: weak(resource),
                    Subresource: subresource,
                    StateBefore: states(before),
                    StateAfter: states(after),
                }),
            },
        },
    }
}

//===----------------------------------------------------------------------===//
// Descriptor heaps
//===----------------------------------------------------------------------===//

pub struct Win32DescriptorHeap {
    heap: Com<ID3D12DescriptorHeap>,
    cpu_start: CpuDescriptorHandle,
    gpu_start: GpuDescriptorHandle,
}

impl NativeObject for Win32DescriptorHeap {
    fn raw(&self) -> u64 {
        self.heap.raw()
    }

    fn add_ref(&self) -> u32 {
        self.heap.add_ref()
    }

    fn release(&self) -> u32 {
        self.heap.release()
    }
}

impl NativeDescriptorHeap for Win32DescriptorHeap {
    fn cpu_start(&self) -> CpuDescriptorHandle {
        self.cpu_start
    }

    fn gpu_start(&self) -> GpuDescriptorHandle {
        self.gpu_start
    }
}

//===----------------------------------------------------------------------===//
// Fences and queues
//===----------------------------------------------------------------------===//

/// Auto-reset Win32 event.
pub struct Win32Event(HANDLE);

unsafe impl Send for Win32Event {}
unsafe impl Sync for Win32Event {}

impl WaitEvent for Win32Event {
    fn wait(&self) {
        // SAFETY: the handle stays open until the event is dropped.
        unsafe { WaitForSingleObject(self.0, INFINITE) };
    }
}

impl Drop for Win32Event {
    fn drop(&mut self) {
        // SAFETY: the handle was created by `CreateEventW` and is closed once.
        if let Err(err) = unsafe { CloseHandle(self.0) } {
            log::warn!("failed to close fence event: {}", err);
        }
    }
}

pub type Win32Fence = Com<ID3D12Fence>;

impl NativeFence for Com<ID3D12Fence> {
    type Event = Win32Event;

    fn create_event(&self) -> Option<Win32Event> {
        // SAFETY: plain event creation without security attributes or name.
        unsafe { CreateEventW(None, false, false, PCWSTR::null()) }
            .map(Win32Event)
            .map_err(|err| log::error!("failed to create fence event: {}", err))
            .ok()
    }

    fn completed_value(&self) -> u64 {
        unsafe { self.get().GetCompletedValue() }
    }

    fn set_event_on_completion(&self, value: u64, event: &Win32Event) -> bool {
        unsafe { self.get().SetEventOnCompletion(value, event.0) }.is_ok()
    }
}

pub struct Win32Queue {
    queue: Com<ID3D12CommandQueue>,
    kind: QueueKind,
}

impl Win32Queue {
    /// Adopts the reference held by `queue`.
    pub fn new(queue: ID3D12CommandQueue) -> Self {
        let kind = match unsafe { queue.GetDesc() }.Type {
            D3D12_COMMAND_LIST_TYPE_DIRECT => QueueKind::GRAPHICS,
            D3D12_COMMAND_LIST_TYPE_COMPUTE => QueueKind::COMPUTE,
            D3D12_COMMAND_LIST_TYPE_COPY => QueueKind::COPY,
            _ => QueueKind::empty(),
        };
        Self {
            queue: Com::new(queue),
            kind,
        }
    }
}

impl NativeObject for Win32Queue {
    fn raw(&self) -> u64 {
        self.queue.raw()
    }

    fn add_ref(&self) -> u32 {
        self.queue.add_ref()
    }

    fn release(&self) -> u32 {
        self.queue.release()
    }

    fn query_interface(&self, iid: &Guid) -> bool {
        self.queue.query_interface(iid)
    }
}

impl NativeQueue for Win32Queue {
    type Fence = Win32Fence;

    fn kind(&self) -> QueueKind {
        self.kind
    }

    fn execute_command_lists(&self, lists: &[u64]) {
        let lists: Vec<Option<ID3D12CommandList>> = lists
            .iter()
            .map(|raw| borrow::<ID3D12CommandList>(raw).cloned())
            .collect();
        unsafe { self.queue.get().ExecuteCommandLists(&lists) };
    }

    fn signal(&self, fence: &Win32Fence, value: u64) -> bool {
        unsafe { self.queue.get().Signal(fence.get(), value) }.is_ok()
    }

    fn begin_event(&self, blob: &[u64; 64]) {
        unsafe {
            self.queue
                .get()
                .BeginEvent(super::convert::PIX3BLOB_METADATA, Some(blob.as_ptr() as *const c_void), 512)
        };
    }

    fn end_event(&self) {
        unsafe { self.queue.get().EndEvent() };
    }

    fn set_marker(&self, blob: &[u64; 64]) {
        unsafe {
            self.queue
                .get()
                .SetMarker(super::convert::PIX3BLOB_METADATA, Some(blob.as_ptr() as *const c_void), 512)
        };
    }
}

//===----------------------------------------------------------------------===//
// Command lists
//===----------------------------------------------------------------------===//

pub struct Win32CommandList {
    list: Com<ID3D12GraphicsCommandList>,
    /// Present when the runtime supports native render passes.
    list4: Option<ID3D12GraphicsCommandList4>,
    allocators: Vec<ID3D12CommandAllocator>,
}

// Recording is externally synchronized by the owning command list.
unsafe impl Send for Win32CommandList {}
unsafe impl Sync for Win32CommandList {}

impl Win32CommandList {
    fn get(&self) -> &ID3D12GraphicsCommandList {
        self.list.get()
    }
}

impl NativeObject for Win32CommandList {
    fn raw(&self) -> u64 {
        self.list.raw()
    }

    fn add_ref(&self) -> u32 {
        self.list.add_ref()
    }

    fn release(&self) -> u32 {
        self.list.release()
    }

    fn query_interface(&self, iid: &Guid) -> bool {
        self.list.query_interface(iid)
    }
}

impl NativeRenderPass for Win32CommandList {
    fn begin_render_pass(
        &mut self,
        render_targets: &[RenderPassRenderTarget],
        depth_stencil: Option<&RenderPassDepthStencil>,
    ) {
        let Some(list4) = &self.list4 else {
            return;
        };
        let targets: Vec<D3D12_RENDER_PASS_RENDER_TARGET_DESC> = render_targets
            .iter()
            .map(|rt| D3D12_RENDER_PASS_RENDER_TARGET_DESC {
                cpuDescriptor: cpu(rt.descriptor),
                BeginningAccess: beginning_access(
                    rt.beginning,
                    rt.clear_format,
                    D3D12_CLEAR_VALUE_0 { Color: rt.clear_color },
                ),
                EndingAccess: ending_access(rt.ending),
            })
            .collect();
        let depth = depth_stencil.map(|ds| {
            let clear = D3D12_CLEAR_VALUE_0 {
                DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                    Depth: ds.clear_depth,
                    Stencil: ds.clear_stencil,
                },
            };
            D3D12_RENDER_PASS_DEPTH_STENCIL_DESC {
                cpuDescriptor: cpu(ds.descriptor),
                DepthBeginningAccess: beginning_access(ds.depth_beginning, ds.clear_format, clear),
                StencilBeginningAccess: beginning_access(ds.stencil_beginning, ds.clear_format, clear),
                DepthEndingAccess: ending_access(ds.depth_ending),
                StencilEndingAccess: ending_access(ds.stencil_ending),
            }
        });
        unsafe {
            list4.BeginRenderPass(
                Some(&targets),
                depth.as_ref().map(|d| d as *const _),
                D3D12_RENDER_PASS_FLAG_NONE,
            )
        };
    }

    fn end_render_pass(&mut self) {
        if let Some(list4) = &self.list4 {
            unsafe { list4.EndRenderPass() };
        }
    }
}

impl NativeCommandList for Win32CommandList {
    fn render_pass(&mut self) -> Option<&mut dyn NativeRenderPass> {
        if self.list4.is_some() {
            Some(self as &mut dyn NativeRenderPass)
        } else {
            None
        }
    }

    fn close(&mut self) -> bool {
        unsafe { self.get().Close() }.is_ok()
    }

    fn reset(&mut self, allocator_index: usize) -> bool {
        let Some(allocator) = self.allocators.get(allocator_index) else {
            return false;
        };
        unsafe { allocator.Reset() }.is_ok() && unsafe { self.get().Reset(allocator, None) }.is_ok()
    }

    fn resource_barrier(&mut self, barriers: &[NativeBarrier]) {
        let barriers: Vec<D3D12_RESOURCE_BARRIER> = barriers.iter().map(native_barrier).collect();
        unsafe { self.get().ResourceBarrier(&barriers) };
    }

    fn clear_render_target_view(&mut self, rtv: CpuDescriptorHandle, color: &[f32; 4], r: &[Rect]) {
        unsafe { self.get().ClearRenderTargetView(cpu(rtv), color.as_ptr(), &rects(r)) };
    }

    fn clear_depth_stencil_view(
        &mut self,
        dsv: CpuDescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
        r: &[Rect],
    ) {
        unsafe {
            self.get().ClearDepthStencilView(
                cpu(dsv),
                D3D12_CLEAR_FLAGS(flags.bits() as i32),
                depth,
                stencil,
                &rects(r),
            )
        };
    }

    fn clear_unordered_access_view_uint(
        &mut self,
        gpu_handle: GpuDescriptorHandle,
        cpu_handle: CpuDescriptorHandle,
        resource: u64,
        values: &[u32; 4],
        r: &[Rect],
    ) {
        unsafe {
            self.get().ClearUnorderedAccessViewUint(
                gpu(gpu_handle),
                cpu(cpu_handle),
                borrow::<ID3D12Resource>(&resource),
                values.as_ptr(),
                &rects(r),
            )
        };
    }

    fn clear_unordered_access_view_float(
        &mut self,
        gpu_handle: GpuDescriptorHandle,
        cpu_handle: CpuDescriptorHandle,
        resource: u64,
        values: &[f32; 4],
        r: &[Rect],
    ) {
        unsafe {
            self.get().ClearUnorderedAccessViewFloat(
                gpu(gpu_handle),
                cpu(cpu_handle),
                borrow::<ID3D12Resource>(&resource),
                values.as_ptr(),
                &rects(r),
            )
        };
    }

    fn om_set_render_targets(&mut self, rtvs: &[CpuDescriptorHandle], dsv: Option<CpuDescriptorHandle>) {
        let rtvs: Vec<D3D12_CPU_DESCRIPTOR_HANDLE> = rtvs.iter().copied().map(cpu).collect();
        let dsv = dsv.map(cpu);
        unsafe {
            self.get().OMSetRenderTargets(
                rtvs.len() as u32,
                (!rtvs.is_empty()).then(|| rtvs.as_ptr()),
                false,
                dsv.as_ref().map(|d| d as *const _),
            )
        };
    }

    fn om_set_blend_factor(&mut self, factor: &[f32; 4]) {
        unsafe { self.get().OMSetBlendFactor(Some(factor.as_ptr())) };
    }

    fn om_set_stencil_ref(&mut self, value: u32) {
        unsafe { self.get().OMSetStencilRef(value) };
    }

    fn ia_set_primitive_topology(&mut self, topology: u32) {
        unsafe { self.get().IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY(topology as i32)) };
    }

    fn ia_set_index_buffer(&mut self, view: Option<&IndexBufferView>) {
        let view = view.map(|v| D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: v.location,
            SizeInBytes: v.size,
            Format: match v.format {
                IndexFormat::Uint16 => DXGI_FORMAT_R16_UINT,
                IndexFormat::Uint32 => DXGI_FORMAT_R32_UINT,
            },
        });
        unsafe { self.get().IASetIndexBuffer(view.as_ref().map(|v| v as *const _)) };
    }

    fn ia_set_vertex_buffers(&mut self, first: u32, views: &[VertexBufferView]) {
        let views: Vec<D3D12_VERTEX_BUFFER_VIEW> = views
            .iter()
            .map(|v| D3D12_VERTEX_BUFFER_VIEW {
                BufferLocation: v.location,
                SizeInBytes: v.size,
                StrideInBytes: v.stride,
            })
            .collect();
        unsafe { self.get().IASetVertexBuffers(first, Some(&views)) };
    }

    fn rs_set_viewports(&mut self, viewports: &[Viewport]) {
        let viewports: Vec<D3D12_VIEWPORT> = viewports
            .iter()
            .map(|v| D3D12_VIEWPORT {
                TopLeftX: v.x,
                TopLeftY: v.y,
                Width: v.width,
                Height: v.height,
                MinDepth: v.min_depth,
                MaxDepth: v.max_depth,
            })
            .collect();
        unsafe { self.get().RSSetViewports(&viewports) };
    }

    fn rs_set_scissor_rects(&mut self, r: &[Rect]) {
        unsafe { self.get().RSSetScissorRects(&rects(r)) };
    }

    fn set_pipeline_state(&mut self, pipeline: u64) {
        unsafe { self.get().SetPipelineState(borrow::<ID3D12PipelineState>(&pipeline)) };
    }

    fn set_root_signature(&mut self, bind: BindPoint, signature: u64) {
        let signature = borrow::<ID3D12RootSignature>(&signature);
        match bind {
            BindPoint::Graphics => unsafe { self.get().SetGraphicsRootSignature(signature) },
            BindPoint::Compute => unsafe { self.get().SetComputeRootSignature(signature) },
        }
    }

    fn set_descriptor_heaps(&mut self, heaps: &[u64]) {
        let heaps: Vec<Option<ID3D12DescriptorHeap>> = heaps
            .iter()
            .map(|raw| borrow::<ID3D12DescriptorHeap>(raw).cloned())
            .collect();
        unsafe { self.get().SetDescriptorHeaps(&heaps) };
    }

    fn set_root_descriptor_table(&mut self, bind: BindPoint, param: u32, base: GpuDescriptorHandle) {
        match bind {
            BindPoint::Graphics => unsafe { self.get().SetGraphicsRootDescriptorTable(param, gpu(base)) },
            BindPoint::Compute => unsafe { self.get().SetComputeRootDescriptorTable(param, gpu(base)) },
        }
    }

    fn set_root_32bit_constants(&mut self, bind: BindPoint, param: u32, values: &[u32], first: u32) {
        let data = values.as_ptr() as *const c_void;
        let count = values.len() as u32;
        match bind {
            BindPoint::Graphics => unsafe { self.get().SetGraphicsRoot32BitConstants(param, count, data, first) },
            BindPoint::Compute => unsafe { self.get().SetComputeRoot32BitConstants(param, count, data, first) },
        }
    }

    fn draw_instanced(&mut self, vertices: u32, instances: u32, first_vertex: u32, first_instance: u32) {
        unsafe { self.get().DrawInstanced(vertices, instances, first_vertex, first_instance) };
    }

    fn draw_indexed_instanced(
        &mut self,
        indices: u32,
        instances: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.get()
                .DrawIndexedInstanced(indices, instances, first_index, vertex_offset, first_instance)
        };
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        unsafe { self.get().Dispatch(x, y, z) };
    }

    fn copy_resource(&mut self, dst: u64, src: u64) {
        unsafe {
            self.get()
                .CopyResource(borrow::<ID3D12Resource>(&dst), borrow::<ID3D12Resource>(&src))
        };
    }

    fn copy_buffer_region(&mut self, dst: u64, dst_offset: u64, src: u64, src_offset: u64, size: u64) {
        unsafe {
            self.get().CopyBufferRegion(
                borrow::<ID3D12Resource>(&dst),
                dst_offset,
                borrow::<ID3D12Resource>(&src),
                src_offset,
                size,
            )
        };
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
        let dst = copy_location(dst);
        let src = copy_location(src);
        let src_box = src_box.map(|b| D3D12_BOX {
            left: b.left,
            top: b.top,
            front: b.front,
            right: b.right,
            bottom: b.bottom,
            back: b.back,
        });
        unsafe {
            self.get().CopyTextureRegion(
                &dst,
                dst_x,
                dst_y,
                dst_z,
                &src,
                src_box.as_ref().map(|b| b as *const _),
            )
        };
    }

    fn resolve_subresource(&mut self, dst: u64, dst_subresource: u32, src: u64, src_subresource: u32, format: Format) {
        unsafe {
            self.get().ResolveSubresource(
                borrow::<ID3D12Resource>(&dst),
                dst_subresource,
                borrow::<ID3D12Resource>(&src),
                src_subresource,
                dxgi_format(format),
            )
        };
    }

    fn begin_query(&mut self, heap: u64, ty: QueryType, index: u32) {
        unsafe {
            self.get()
                .BeginQuery(borrow::<ID3D12QueryHeap>(&heap), query_type(ty), index)
        };
    }

    fn end_query(&mut self, heap: u64, ty: QueryType, index: u32) {
        unsafe {
            self.get()
                .EndQuery(borrow::<ID3D12QueryHeap>(&heap), query_type(ty), index)
        };
    }

    fn resolve_query_data(&mut self, heap: u64, ty: QueryType, first: u32, count: u32, dst: u64, dst_offset: u64) {
        unsafe {
            self.get().ResolveQueryData(
                borrow::<ID3D12QueryHeap>(&heap),
                query_type(ty),
                first,
                count,
                borrow::<ID3D12Resource>(&dst),
                dst_offset,
            )
        };
    }

    fn begin_event(&mut self, blob: &[u64; 64]) {
        unsafe {
            self.get()
                .BeginEvent(super::convert::PIX3BLOB_METADATA, Some(blob.as_ptr() as *const c_void), 512)
        };
    }

    fn end_event(&mut self) {
        unsafe { self.get().EndEvent() };
    }

    fn set_marker(&mut self, blob: &[u64; 64]) {
        unsafe {
            self.get()
                .SetMarker(super::convert::PIX3BLOB_METADATA, Some(blob.as_ptr() as *const c_void), 512)
        };
    }
}

//===----------------------------------------------------------------------===//
// Device
//===----------------------------------------------------------------------===//

pub struct Win32Device {
    device: ID3D12Device,
    mipmap_shader: Option<Vec<u8>>,
}

// D3D12 devices are free threaded.
unsafe impl Send for Win32Device {}
unsafe impl Sync for Win32Device {}

impl Win32Device {
    pub fn new(device: ID3D12Device) -> Self {
        Self {
            device,
            mipmap_shader: None,
        }
    }

    /// Compiled compute shader used by `generate_mipmaps`.
    ///
    /// It reads `float2 texel_size : register(b0, space0)`,
    /// `Texture2D src : register(t0, space1)` through
    /// `SamplerState linear_clamp : register(s0)` and writes
    /// `RWTexture2D dst : register(u0, space2)` in 8x8 groups.
    pub fn with_mipmap_shader(mut self, dxbc: Vec<u8>) -> Self {
        self.mipmap_shader = Some(dxbc);
        self
    }

    pub fn device(&self) -> &ID3D12Device {
        &self.device
    }

    fn resource_desc_of(&self, resource: u64) -> Option<D3D12_RESOURCE_DESC> {
        borrow::<ID3D12Resource>(&resource).map(|r| unsafe { r.GetDesc() })
    }

    fn serialize_root_signature(
        &self,
        params: &[PipelineLayoutParam],
        static_samplers: &[D3D12_STATIC_SAMPLER_DESC],
    ) -> Option<ID3D12RootSignature> {
        let ranges: Vec<D3D12_DESCRIPTOR_RANGE> = params
            .iter()
            .enumerate()
            .map(|(space, param)| match *param {
                PipelineLayoutParam::PushDescriptors { ty, count, .. }
                | PipelineLayoutParam::DescriptorTable { ty, count, .. } => D3D12_DESCRIPTOR_RANGE {
                    RangeType: range_type(ty),
                    NumDescriptors: count,
                    BaseShaderRegister: 0,
                    RegisterSpace: space as u32,
                    OffsetInDescriptorsFromTableStart: 0,
                },
                PipelineLayoutParam::PushConstants { .. } => D3D12_DESCRIPTOR_RANGE::default(),
            })
            .collect();

        let root_params: Vec<D3D12_ROOT_PARAMETER> = params
            .iter()
            .enumerate()
            .map(|(space, param)| match *param {
                PipelineLayoutParam::PushConstants { stages, count } => D3D12_ROOT_PARAMETER {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
                    Anonymous: D3D12_ROOT_PARAMETER_0 {
                        Constants: D3D12_ROOT_CONSTANTS {
                            ShaderRegister: 0,
                            RegisterSpace: space as u32,
                            Num32BitValues: count,
                        },
                    },
                    ShaderVisibility: shader_visibility(stages),
                },
                PipelineLayoutParam::PushDescriptors { stages, .. }
                | PipelineLayoutParam::DescriptorTable { stages, .. } => D3D12_ROOT_PARAMETER {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                    Anonymous: D3D12_ROOT_PARAMETER_0 {
                        DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                            NumDescriptorRanges: 1,
                            pDescriptorRanges: &ranges[space],
                        },
                    },
                    ShaderVisibility: shader_visibility(stages),
                },
            })
            .collect();

        let desc = D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: root_params.len() as u32,
            pParameters: root_params.as_ptr(),
            NumStaticSamplers: static_samplers.len() as u32,
            pStaticSamplers: static_samplers.as_ptr(),
            Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
        };

        let mut blob: Option<ID3DBlob> = None;
        let mut error: Option<ID3DBlob> = None;
        if let Err(err) =
            unsafe { D3D12SerializeRootSignature(&desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut blob, Some(&mut error)) }
        {
            log::error!("failed to serialize root signature: {}", err);
            return None;
        }
        let blob = blob?;
        // SAFETY: the blob owns `GetBufferSize` bytes at `GetBufferPointer`.
        let bytes = unsafe {
            std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
        };
        unsafe { self.device.CreateRootSignature(0, bytes) }
            .map_err(|err| log::error!("failed to create root signature: {}", err))
            .ok()
    }

    fn view_buffer_range(&self, resource: u64, desc: &ResourceViewDesc) -> (u64, u32) {
        let width = self.resource_desc_of(resource).map(|d| d.Width).unwrap_or(0);
        let size = if desc.buffer_size == u64::MAX {
            width.saturating_sub(desc.buffer_offset)
        } else {
            desc.buffer_size
        };
        (desc.buffer_offset / 4, (size / 4) as u32)
    }
}

impl NativeDevice<Win32Backend> for Win32Device {
    fn descriptor_increment(&self, ty: DescriptorHeapType) -> u32 {
        unsafe { self.device.GetDescriptorHandleIncrementSize(heap_type(ty)) }
    }

    fn create_descriptor_heap(
        &self,
        ty: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
    ) -> Option<Win32DescriptorHeap> {
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: heap_type(ty),
            NumDescriptors: capacity,
            Flags: if shader_visible {
                D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
            } else {
                D3D12_DESCRIPTOR_HEAP_FLAG_NONE
            },
            NodeMask: 0,
        };
        let heap: ID3D12DescriptorHeap = unsafe { self.device.CreateDescriptorHeap(&desc) }
            .map_err(|err| log::error!("failed to create {:?} descriptor heap: {}", ty, err))
            .ok()?;
        let cpu_start = CpuDescriptorHandle(unsafe { heap.GetCPUDescriptorHandleForHeapStart() }.ptr as u64);
        let gpu_start = if shader_visible {
            GpuDescriptorHandle(unsafe { heap.GetGPUDescriptorHandleForHeapStart() }.ptr)
        } else {
            GpuDescriptorHandle(0)
        };
        Some(Win32DescriptorHeap {
            heap: Com::new(heap),
            cpu_start,
            gpu_start,
        })
    }

    fn create_resource(&self, desc: &ResourceDesc, initial: ResourceStates) -> Option<Com<ID3D12Resource>> {
        let heap = D3D12_HEAP_PROPERTIES {
            Type: match desc.heap {
                MemoryHeap::GpuOnly => D3D12_HEAP_TYPE_DEFAULT,
                MemoryHeap::CpuToGpu => D3D12_HEAP_TYPE_UPLOAD,
                MemoryHeap::GpuToCpu => D3D12_HEAP_TYPE_READBACK,
            },
            ..Default::default()
        };
        let native_desc = resource_desc(desc);
        let mut resource: Option<ID3D12Resource> = None;
        if let Err(err) = unsafe {
            self.device.CreateCommittedResource(
                &heap,
                D3D12_HEAP_FLAG_NONE,
                &native_desc,
                states(initial),
                None,
                &mut resource,
            )
        } {
            log::error!("failed to create resource: {}", err);
            return None;
        }
        resource.map(Com::new)
    }

    fn resource_desc(&self, resource: u64) -> ResourceDesc {
        let Some(object) = borrow::<ID3D12Resource>(&resource) else {
            return ResourceDesc::default();
        };
        let desc = unsafe { object.GetDesc() };
        let mut props = D3D12_HEAP_PROPERTIES::default();
        let heap = match unsafe { object.GetHeapProperties(Some(&mut props), None) } {
            Ok(()) if props.Type == D3D12_HEAP_TYPE_UPLOAD => MemoryHeap::CpuToGpu,
            Ok(()) if props.Type == D3D12_HEAP_TYPE_READBACK => MemoryHeap::GpuToCpu,
            _ => MemoryHeap::GpuOnly,
        };
        from_resource_desc(&desc, heap)
    }

    fn gpu_virtual_address(&self, resource: u64) -> u64 {
        borrow::<ID3D12Resource>(&resource)
            .map(|r| unsafe { r.GetGPUVirtualAddress() })
            .unwrap_or(0)
    }

    fn copyable_footprint(&self, desc: &ResourceDesc, subresource: u32, offset: u64) -> PlacedFootprint {
        let native_desc = resource_desc(desc);
        let mut layout = D3D12_PLACED_SUBRESOURCE_FOOTPRINT::default();
        unsafe {
            self.device
                .GetCopyableFootprints(&native_desc, subresource, 1, offset, Some(&mut layout), None, None, None)
        };
        PlacedFootprint {
            offset: layout.Offset,
            format: from_dxgi_format(layout.Footprint.Format),
            width: layout.Footprint.Width,
            height: layout.Footprint.Height,
            depth: layout.Footprint.Depth,
            row_pitch: layout.Footprint.RowPitch,
        }
    }

    fn read_buffer(&self, resource: u64, offset: u64, data: &mut [u8]) -> bool {
        let Some(object) = borrow::<ID3D12Resource>(&resource) else {
            return false;
        };
        let range = D3D12_RANGE {
            Begin: offset as usize,
            End: offset as usize + data.len(),
        };
        let mut mapped = std::ptr::null_mut();
        if unsafe { object.Map(0, Some(&range), Some(&mut mapped)) }.is_err() {
            return false;
        }
        // SAFETY: the mapping covers `range`.
        unsafe {
            std::ptr::copy_nonoverlapping((mapped as *const u8).add(offset as usize), data.as_mut_ptr(), data.len());
            object.Unmap(0, Some(&D3D12_RANGE::default()));
        }
        true
    }

    fn set_name(&self, resource: u64, name: &str) {
        if let Some(object) = borrow::<ID3D12Resource>(&resource) {
            if let Err(err) = unsafe { object.SetName(&HSTRING::from(name)) } {
                log::warn!("failed to name resource: {}", err);
            }
        }
    }

    fn create_shader_resource_view(&self, resource: u64, desc: &ResourceViewDesc, dst: CpuDescriptorHandle) {
        let format = dxgi_format(desc.format);
        let mut view = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: format,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            ..Default::default()
        };
        match desc.kind {
            ResourceViewKind::Buffer => {
                let (first, count) = self.view_buffer_range(resource, desc);
                view.Format = DXGI_FORMAT_R32_TYPELESS;
                view.ViewDimension = D3D12_SRV_DIMENSION_BUFFER;
                view.Anonymous.Buffer = D3D12_BUFFER_SRV {
                    FirstElement: first,
                    NumElements: count,
                    StructureByteStride: 0,
                    Flags: D3D12_BUFFER_SRV_FLAG_RAW,
                };
            }
            ResourceViewKind::Texture1D => {
                view.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE1D;
                view.Anonymous.Texture1D = D3D12_TEX1D_SRV {
                    MostDetailedMip: desc.first_level,
                    MipLevels: desc.levels,
                    ResourceMinLODClamp: 0.0,
                };
            }
            ResourceViewKind::Texture2D => {
                view.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE2D;
                view.Anonymous.Texture2D = D3D12_TEX2D_SRV {
                    MostDetailedMip: desc.first_level,
                    MipLevels: desc.levels,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                };
            }
            ResourceViewKind::Texture2DArray => {
                view.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE2DARRAY;
                view.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_SRV {
                    MostDetailedMip: desc.first_level,
                    MipLevels: desc.levels,
                    FirstArraySlice: desc.first_layer,
                    ArraySize: desc.layers,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                };
            }
            ResourceViewKind::Texture2DMultisample => {
                view.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE2DMS;
            }
            ResourceViewKind::Texture3D => {
                view.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE3D;
                view.Anonymous.Texture3D = D3D12_TEX3D_SRV {
                    MostDetailedMip: desc.first_level,
                    MipLevels: desc.levels,
                    ResourceMinLODClamp: 0.0,
                };
            }
            ResourceViewKind::TextureCube => {
                view.ViewDimension = D3D12_SRV_DIMENSION_TEXTURECUBE;
                view.Anonymous.TextureCube = D3D12_TEXCUBE_SRV {
                    MostDetailedMip: desc.first_level,
                    MipLevels: desc.levels,
                    ResourceMinLODClamp: 0.0,
                };
            }
            ResourceViewKind::Unknown => {
                unsafe {
                    self.device
                        .CreateShaderResourceView(borrow::<ID3D12Resource>(&resource), None, cpu(dst))
                };
                return;
            }
        }
        unsafe {
            self.device
                .CreateShaderResourceView(borrow::<ID3D12Resource>(&resource), Some(&view), cpu(dst))
        };
    }

    fn create_unordered_access_view(&self, resource: u64, desc: &ResourceViewDesc, dst: CpuDescriptorHandle) {
        let mut view = D3D12_UNORDERED_ACCESS_VIEW_DESC {
            Format: dxgi_format(desc.format),
            ..Default::default()
        };
        match desc.kind {
            ResourceViewKind::Buffer => {
                let (first, count) = self.view_buffer_range(resource, desc);
                view.Format = DXGI_FORMAT_R32_TYPELESS;
                view.ViewDimension = D3D12_UAV_DIMENSION_BUFFER;
                view.Anonymous.Buffer = D3D12_BUFFER_UAV {
                    FirstElement: first,
                    NumElements: count,
                    StructureByteStride: 0,
                    CounterOffsetInBytes: 0,
                    Flags: D3D12_BUFFER_UAV_FLAG_RAW,
                };
            }
            ResourceViewKind::Texture1D => {
                view.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE1D;
                view.Anonymous.Texture1D = D3D12_TEX1D_UAV { MipSlice: desc.first_level };
            }
            ResourceViewKind::Texture2D => {
                view.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE2D;
                view.Anonymous.Texture2D = D3D12_TEX2D_UAV {
                    MipSlice: desc.first_level,
                    PlaneSlice: 0,
                };
            }
            ResourceViewKind::Texture2DArray => {
                view.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE2DARRAY;
                view.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_UAV {
                    MipSlice: desc.first_level,
                    FirstArraySlice: desc.first_layer,
                    ArraySize: desc.layers,
                    PlaneSlice: 0,
                };
            }
            ResourceViewKind::Texture3D => {
                view.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE3D;
                view.Anonymous.Texture3D = D3D12_TEX3D_UAV {
                    MipSlice: desc.first_level,
                    FirstWSlice: desc.first_layer,
                    WSize: desc.layers,
                };
            }
            _ => {
                unsafe {
                    self.device.CreateUnorderedAccessView(
                        borrow::<ID3D12Resource>(&resource),
                        None::<&ID3D12Resource>,
                        None,
                        cpu(dst),
                    )
                };
                return;
            }
        }
        unsafe {
            self.device.CreateUnorderedAccessView(
                borrow::<ID3D12Resource>(&resource),
                None::<&ID3D12Resource>,
                Some(&view),
                cpu(dst),
            )
        };
    }

    fn create_render_target_view(&self, resource: u64, desc: &ResourceViewDesc, dst: CpuDescriptorHandle) {
        let mut view = D3D12_RENDER_TARGET_VIEW_DESC {
            Format: dxgi_format(desc.format),
            ..Default::default()
        };
        match desc.kind {
            ResourceViewKind::Texture2D => {
                view.ViewDimension = D3D12_RTV_DIMENSION_TEXTURE2D;
                view.Anonymous.Texture2D = D3D12_TEX2D_RTV {
                    MipSlice: desc.first_level,
                    PlaneSlice: 0,
                };
            }
            ResourceViewKind::Texture2DArray => {
                view.ViewDimension = D3D12_RTV_DIMENSION_TEXTURE2DARRAY;
                view.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_RTV {
                    MipSlice: desc.first_level,
                    FirstArraySlice: desc.first_layer,
                    ArraySize: desc.layers,
                    PlaneSlice: 0,
                };
            }
            ResourceViewKind::Texture2DMultisample => {
                view.ViewDimension = D3D12_RTV_DIMENSION_TEXTURE2DMS;
            }
            _ => {
                unsafe {
                    self.device
                        .CreateRenderTargetView(borrow::<ID3D12Resource>(&resource), None, cpu(dst))
                };
                return;
            }
        }
        unsafe {
            self.device
                .CreateRenderTargetView(borrow::<ID3D12Resource>(&resource), Some(&view), cpu(dst))
        };
    }

    fn create_depth_stencil_view(&self, resource: u64, desc: &ResourceViewDesc, dst: CpuDescriptorHandle) {
        let mut view = D3D12_DEPTH_STENCIL_VIEW_DESC {
            Format: dxgi_format(desc.format),
            ..Default::default()
        };
        match desc.kind {
            ResourceViewKind::Texture2D => {
                view.ViewDimension = D3D12_DSV_DIMENSION_TEXTURE2D;
                view.Anonymous.Texture2D = D3D12_TEX2D_DSV { MipSlice: desc.first_level };
            }
            ResourceViewKind::Texture2DArray => {
                view.ViewDimension = D3D12_DSV_DIMENSION_TEXTURE2DARRAY;
                view.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_DSV {
                    MipSlice: desc.first_level,
                    FirstArraySlice: desc.first_layer,
                    ArraySize: desc.layers,
                };
            }
            ResourceViewKind::Texture2DMultisample => {
                view.ViewDimension = D3D12_DSV_DIMENSION_TEXTURE2DMS;
            }
            _ => {
                unsafe {
                    self.device
                        .CreateDepthStencilView(borrow::<ID3D12Resource>(&resource), None, cpu(dst))
                };
                return;
            }
        }
        unsafe {
            self.device
                .CreateDepthStencilView(borrow::<ID3D12Resource>(&resource), Some(&view), cpu(dst))
        };
    }

    fn create_constant_buffer_view(&self, location: u64, size: u32, dst: CpuDescriptorHandle) {
        let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
            BufferLocation: location,
            // Constant buffer views are sized in 256 byte units.
            SizeInBytes: (size + 255) & !255,
        };
        unsafe { self.device.CreateConstantBufferView(Some(&desc), cpu(dst)) };
    }

    fn create_sampler(&self, desc: &SamplerDesc, dst: CpuDescriptorHandle) {
        unsafe { self.device.CreateSampler(&sampler_desc(desc), cpu(dst)) };
    }

    fn copy_descriptors(&self, count: u32, dst: CpuDescriptorHandle, src: CpuDescriptorHandle, ty: DescriptorHeapType) {
        unsafe {
            self.device
                .CopyDescriptorsSimple(count, cpu(dst), cpu(src), heap_type(ty))
        };
    }

    fn create_root_signature(&self, params: &[PipelineLayoutParam]) -> Option<Com<ID3D12RootSignature>> {
        self.serialize_root_signature(params, &[]).map(Com::new)
    }

    fn create_pipeline(&self, layout: u64, desc: &PipelineDesc<'_>) -> Option<Com<ID3D12PipelineState>> {
        let root_signature = weak::<ID3D12RootSignature>(layout);
        let result = if desc.is_compute() {
            let native = D3D12_COMPUTE_PIPELINE_STATE_DESC {
                pRootSignature: root_signature,
                CS: bytecode(desc.compute),
                ..Default::default()
            };
            unsafe { self.device.CreateComputePipelineState::<ID3D12PipelineState>(&native) }
        } else {
            let mut blend = D3D12_BLEND_DESC::default();
            for target in blend.RenderTarget.iter_mut() {
                target.SrcBlend = D3D12_BLEND_ONE;
                target.DestBlend = D3D12_BLEND_ZERO;
                target.BlendOp = D3D12_BLEND_OP_ADD;
                target.SrcBlendAlpha = D3D12_BLEND_ONE;
                target.DestBlendAlpha = D3D12_BLEND_ZERO;
                target.BlendOpAlpha = D3D12_BLEND_OP_ADD;
                target.LogicOp = D3D12_LOGIC_OP_NOOP;
                target.RenderTargetWriteMask = D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8;
            }
            let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
            for (slot, format) in rtv_formats.iter_mut().zip(desc.render_target_formats) {
                *slot = dxgi_format(*format);
            }
            let depth = desc.depth_stencil_format != Format::Unknown;
            let native = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
                pRootSignature: root_signature,
                VS: bytecode(desc.vertex),
                PS: bytecode(desc.pixel),
                BlendState: blend,
                SampleMask: u32::MAX,
                RasterizerState: D3D12_RASTERIZER_DESC {
                    FillMode: D3D12_FILL_MODE_SOLID,
                    CullMode: D3D12_CULL_MODE_NONE,
                    DepthClipEnable: true.into(),
                    ..Default::default()
                },
                DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                    DepthEnable: depth.into(),
                    DepthWriteMask: D3D12_DEPTH_WRITE_MASK_ALL,
                    DepthFunc: D3D12_COMPARISON_FUNC_LESS,
                    ..Default::default()
                },
                PrimitiveTopologyType: topology_type(desc.topology),
                NumRenderTargets: desc.render_target_formats.len().min(8) as u32,
                RTVFormats: rtv_formats,
                DSVFormat: dxgi_format(desc.depth_stencil_format),
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                ..Default::default()
            };
            unsafe { self.device.CreateGraphicsPipelineState::<ID3D12PipelineState>(&native) }
        };
        result
            .map_err(|err| log::error!("failed to create pipeline {:?}: {}", desc.debug_name, err))
            .ok()
            .map(Com::new)
    }

    fn create_mipmap_pipeline(&self) -> Option<(Com<ID3D12RootSignature>, Com<ID3D12PipelineState>)> {
        let shader = self.mipmap_shader.as_deref()?;
        let sampler = D3D12_STATIC_SAMPLER_DESC {
            Filter: D3D12_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
            AddressV: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
            AddressW: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
            MaxLOD: f32::MAX,
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
            ..Default::default()
        };
        let params = [
            PipelineLayoutParam::PushConstants {
                stages: ShaderStage::COMPUTE,
                count: 2,
            },
            PipelineLayoutParam::DescriptorTable {
                stages: ShaderStage::COMPUTE,
                ty: DescriptorType::ShaderResourceView,
                count: 1,
            },
            PipelineLayoutParam::DescriptorTable {
                stages: ShaderStage::COMPUTE,
                ty: DescriptorType::UnorderedAccessView,
                count: 1,
            },
        ];
        let layout = Com::new(self.serialize_root_signature(&params, &[sampler])?);
        let desc = PipelineDesc {
            compute: Some(shader),
            debug_name: "mipmap generation",
            ..Default::default()
        };
        match self.create_pipeline(layout.raw(), &desc) {
            Some(pipeline) => Some((layout, pipeline)),
            None => {
                layout.release();
                None
            }
        }
    }

    fn create_query_heap(&self, ty: QueryType, count: u32) -> Option<Com<ID3D12QueryHeap>> {
        let desc = D3D12_QUERY_HEAP_DESC {
            Type: query_heap_type(ty),
            Count: count,
            NodeMask: 0,
        };
        let mut heap: Option<ID3D12QueryHeap> = None;
        if let Err(err) = unsafe { self.device.CreateQueryHeap(&desc, &mut heap) } {
            log::error!("failed to create query heap: {}", err);
            return None;
        }
        heap.map(Com::new)
    }

    fn create_command_list(&self, kind: QueueKind) -> Option<Win32CommandList> {
        let ty = command_list_type(kind);
        let allocators = (0..NUM_ALLOCATORS)
            .map(|_| unsafe { self.device.CreateCommandAllocator::<ID3D12CommandAllocator>(ty) })
            .collect::<windows::core::Result<Vec<_>>>()
            .map_err(|err| log::error!("failed to create command allocators: {}", err))
            .ok()?;
        let list: ID3D12GraphicsCommandList = unsafe {
            self.device
                .CreateCommandList(0, ty, &allocators[0], None::<&ID3D12PipelineState>)
        }
        .map_err(|err| log::error!("failed to create command list: {}", err))
        .ok()?;
        let list4 = list.cast::<ID3D12GraphicsCommandList4>().ok();
        Some(Win32CommandList {
            list: Com::new(list),
            list4,
            allocators,
        })
    }

    fn create_fence(&self, initial: u64) -> Option<Win32Fence> {
        unsafe { self.device.CreateFence::<ID3D12Fence>(initial, D3D12_FENCE_FLAG_NONE) }
            .map_err(|err| log::error!("failed to create fence: {}", err))
            .ok()
            .map(Com::new)
    }
}

/// Marker tying the Direct3D 12 object types together.
pub struct Win32Backend;

impl Backend for Win32Backend {
    type Device = Win32Device;
    type DescriptorHeap = Win32DescriptorHeap;
    type Resource = Com<ID3D12Resource>;
    type Pipeline = Com<ID3D12PipelineState>;
    type PipelineLayout = Com<ID3D12RootSignature>;
    type QueryPool = Com<ID3D12QueryHeap>;
    type CommandList = Win32CommandList;
    type Fence = Win32Fence;
    type Queue = Win32Queue;
}
