//! Native-side payloads of wrapper kinds that have no reference-counted
//! native object of their own.

use crate::api::object::{Guid, NativeObject};
use crate::driver::types::{
    DescriptorType, Handle, PipelineLayoutParam, Resource, ResourceUsage, ResourceViewDesc,
    SamplerDesc,
};

use super::descriptor_heap::DescriptorRange;
use super::native::{CpuDescriptorHandle, DescriptorHeapType};

/// A view is a CPU descriptor plus what it was created from.
#[derive(Debug, Clone, Copy)]
pub struct ViewObject {
    pub descriptor: CpuDescriptorHandle,
    pub heap: DescriptorHeapType,
    pub resource: Handle<Resource>,
    pub native_resource: u64,
    pub usage: ResourceUsage,
    pub desc: ResourceViewDesc,
}

impl NativeObject for ViewObject {
    fn raw(&self) -> u64 {
        self.descriptor.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerObject {
    pub descriptor: CpuDescriptorHandle,
    pub desc: SamplerDesc,
}

impl NativeObject for SamplerObject {
    fn raw(&self) -> u64 {
        self.descriptor.0
    }
}

/// Root signature together with the parameter list it was built from.
pub struct LayoutObject<L> {
    pub native: L,
    pub params: Vec<PipelineLayoutParam>,
}

impl<L: NativeObject> NativeObject for LayoutObject<L> {
    fn raw(&self) -> u64 {
        self.native.raw()
    }

    fn add_ref(&self) -> u32 {
        self.native.add_ref()
    }

    fn release(&self) -> u32 {
        self.native.release()
    }

    fn query_interface(&self, iid: &Guid) -> bool {
        self.native.query_interface(iid)
    }
}

/// Query heap plus the readback buffer every `end_query` resolves into.
pub struct QueryPoolObject<Q> {
    pub native: Q,
    pub readback: Handle<Resource>,
}

impl<Q: NativeObject> NativeObject for QueryPoolObject<Q> {
    fn raw(&self) -> u64 {
        self.native.raw()
    }

    fn add_ref(&self) -> u32 {
        self.native.add_ref()
    }

    fn release(&self) -> u32 {
        self.native.release()
    }
}

/// A descriptor set lives in the static region of one of the GPU heaps.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorTableObject {
    pub ty: DescriptorType,
    pub range: DescriptorRange,
}

impl DescriptorTableObject {
    pub fn heap_type(&self) -> DescriptorHeapType {
        match self.ty {
            DescriptorType::Sampler => DescriptorHeapType::Sampler,
            _ => DescriptorHeapType::CbvSrvUav,
        }
    }
}

impl NativeObject for DescriptorTableObject {
    fn raw(&self) -> u64 {
        self.range.gpu.0
    }
}
