use std::sync::Arc;

use crate::api::object::{ApiObject, NativeObject, ObjectAllocator};
use crate::gpu::d3d12::objects::{DescriptorTableObject, LayoutObject, QueryPoolObject, SamplerObject, ViewObject};
use crate::gpu::Backend;
use crate::utils::BlockAllocator;

fn allocator<N: NativeObject, const BLOCK: usize>() -> Arc<ObjectAllocator<N>> {
    Arc::new(BlockAllocator::<ApiObject<N>, BLOCK>::new())
}

/// Per-kind wrapper allocators of one device.
///
/// Built in field order when the device is created and dropped in the same
/// order when it goes away; nothing here is process global.
pub struct ObjectRegistry<B: Backend> {
    pub resources: Arc<ObjectAllocator<B::Resource>>,
    pub views: Arc<ObjectAllocator<ViewObject>>,
    pub samplers: Arc<ObjectAllocator<SamplerObject>>,
    pub pipelines: Arc<ObjectAllocator<B::Pipeline>>,
    pub pipeline_layouts: Arc<ObjectAllocator<LayoutObject<B::PipelineLayout>>>,
    pub query_pools: Arc<ObjectAllocator<QueryPoolObject<B::QueryPool>>>,
    pub descriptor_sets: Arc<ObjectAllocator<DescriptorTableObject>>,
}

impl<B: Backend> ObjectRegistry<B> {
    pub fn new() -> Self {
        Self {
            resources: allocator::<B::Resource, 256>(),
            views: allocator::<ViewObject, 4096>(),
            samplers: allocator::<SamplerObject, 256>(),
            pipelines: allocator::<B::Pipeline, 256>(),
            pipeline_layouts: allocator::<LayoutObject<B::PipelineLayout>, 64>(),
            query_pools: allocator::<QueryPoolObject<B::QueryPool>, 64>(),
            descriptor_sets: allocator::<DescriptorTableObject, 1024>(),
        }
    }
}

impl<B: Backend> Default for ObjectRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}
