mod common;

use veneer::driver::{CommandEncoder, CommandSink};
use veneer::gpu::d3d12::native::{NativeBarrier, NativeDevice, ResourceStates};
use veneer::gpu::null::{DescriptorWrite, NativeCall, NullBackend, NullDevice};
use veneer::gpu::d3d12::CommandListImpl;
use veneer::*;

fn calls_matching(list: &CommandListImpl<NullBackend>, pred: impl Fn(&NativeCall) -> bool) -> usize {
    list.native().calls().iter().filter(|c| pred(c)).count()
}

fn texture(device: &common::Device, levels: u16, usage: ResourceUsage) -> Handle<Resource> {
    device
        .create_resource(
            &ResourceDesc::texture_2d(128, 128, levels, Format::RGBA8Unorm, usage),
            usage,
        )
        .unwrap()
}

#[test]
fn transitions_skip_null_resources() {
    let device = common::device();
    let mut list = common::graphics_list(&device);
    let a = texture(&device, 1, ResourceUsage::SHADER_RESOURCE | ResourceUsage::RENDER_TARGET);
    let b = texture(&device, 1, ResourceUsage::SHADER_RESOURCE | ResourceUsage::RENDER_TARGET);

    list.barrier(&[
        ResourceBarrier {
            resource: a,
            old_state: ResourceUsage::RENDER_TARGET,
            new_state: ResourceUsage::SHADER_RESOURCE,
        },
        ResourceBarrier {
            resource: Handle::NULL,
            old_state: ResourceUsage::RENDER_TARGET,
            new_state: ResourceUsage::SHADER_RESOURCE,
        },
        ResourceBarrier {
            resource: b,
            old_state: ResourceUsage::SHADER_RESOURCE,
            new_state: ResourceUsage::RENDER_TARGET,
        },
    ]);

    let batches: Vec<Vec<NativeBarrier>> = list
        .native()
        .calls()
        .iter()
        .filter_map(|c| match c {
            NativeCall::ResourceBarrier(b) => Some(b.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    match batches[0][0] {
        NativeBarrier::Transition { resource, before, after, .. } => {
            assert_eq!(resource, device.get_native_resource(a));
            assert_eq!(before, ResourceStates::RENDER_TARGET);
            assert_eq!(after, ResourceStates::PIXEL_SHADER_RESOURCE | ResourceStates::NON_PIXEL_SHADER_RESOURCE);
        }
        ref other => panic!("expected a transition, got {:?}", other),
    }

    device.destroy_resource(a);
    device.destroy_resource(b);
}

#[test]
fn root_signature_is_bound_once_until_reset() {
    let device = common::device();
    let mut list = common::graphics_list(&device);
    let layout = device
        .create_pipeline_layout(&[PipelineLayoutParam::PushConstants {
            stages: ShaderStage::COMPUTE,
            count: 4,
        }])
        .unwrap();

    list.push_constants(ShaderStage::COMPUTE, layout, 0, 0, &[1, 2, 3, 4]);
    list.push_constants(ShaderStage::COMPUTE, layout, 0, 2, &[5, 6]);
    assert_eq!(calls_matching(&list, |c| matches!(c, NativeCall::SetRootSignature(..))), 1);
    assert_eq!(calls_matching(&list, |c| matches!(c, NativeCall::SetRoot32BitConstants { .. })), 2);

    assert!(list.close());
    assert!(list.reset(0));
    list.native_mut().take_calls();

    list.push_constants(ShaderStage::COMPUTE, layout, 0, 0, &[7]);
    assert_eq!(
        list.native().calls()[0],
        NativeCall::SetRootSignature(
            veneer::gpu::d3d12::native::BindPoint::Compute,
            device.get_native_pipeline_layout(layout)
        )
    );

    device.destroy_pipeline_layout(layout);
}

#[test]
fn descriptor_sets_bind_the_device_heaps() {
    let device = common::device();
    let mut list = common::graphics_list(&device);
    let layout = device
        .create_pipeline_layout(&[
            PipelineLayoutParam::DescriptorTable {
                stages: ShaderStage::ALL_GRAPHICS,
                ty: DescriptorType::ShaderResourceView,
                count: 4,
            },
            PipelineLayoutParam::DescriptorTable {
                stages: ShaderStage::ALL_GRAPHICS,
                ty: DescriptorType::Sampler,
                count: 2,
            },
        ])
        .unwrap();
    let views = device.allocate_descriptor_sets(layout, 0, 1).unwrap();
    let samplers = device.allocate_descriptor_sets(layout, 1, 1).unwrap();

    list.bind_descriptor_sets(ShaderStage::PIXEL, layout, 0, &[views[0], samplers[0]]);
    list.bind_descriptor_sets(ShaderStage::PIXEL, layout, 0, &[views[0], samplers[0]]);

    let heaps = vec![device.sampler_heap().get_native(), device.view_heap().get_native()];
    assert_eq!(calls_matching(&list, |c| c == &NativeCall::SetDescriptorHeaps(heaps.clone())), 1);
    assert_eq!(calls_matching(&list, |c| matches!(c, NativeCall::SetRootDescriptorTable { .. })), 4);

    device.free_descriptor_sets(&views);
    device.free_descriptor_sets(&samplers);
    device.destroy_pipeline_layout(layout);
}

#[test]
fn descriptor_set_updates_write_in_place() {
    let device = common::device();
    let layout = device
        .create_pipeline_layout(&[PipelineLayoutParam::DescriptorTable {
            stages: ShaderStage::ALL,
            ty: DescriptorType::Sampler,
            count: 2,
        }])
        .unwrap();
    let sets = device.allocate_descriptor_sets(layout, 0, 1).unwrap();
    let sampler = device.create_sampler(&SamplerDesc::default()).unwrap();
    device.native().clear_descriptor_writes();

    let samplers = [sampler];
    device.update_descriptor_sets(&[DescriptorSetUpdate {
        set: sets[0],
        binding: 1,
        array_offset: 0,
        descriptors: Descriptors::Samplers(&samplers),
    }]);
    // Past the end of the set.
    device.update_descriptor_sets(&[DescriptorSetUpdate {
        set: sets[0],
        binding: 2,
        array_offset: 0,
        descriptors: Descriptors::Samplers(&samplers),
    }]);

    let writes = device.native().descriptor_writes();
    assert_eq!(writes.len(), 1);
    assert!(matches!(writes[0], DescriptorWrite::Copy { count: 1, .. }));

    device.destroy_sampler(sampler);
    device.free_descriptor_sets(&sets);
    device.destroy_pipeline_layout(layout);
}

#[test]
fn render_pass_without_native_support_clears_depth() {
    let device = common::device_with(NullDevice::new().with_render_pass_support(false));
    let mut list = common::graphics_list(&device);
    let depth = device
        .create_resource(
            &ResourceDesc::texture_2d(64, 64, 1, Format::D24UnormS8Uint, ResourceUsage::DEPTH_STENCIL),
            ResourceUsage::DEPTH_STENCIL_WRITE,
        )
        .unwrap();
    let dsv = device
        .create_resource_view(
            depth,
            ResourceUsage::DEPTH_STENCIL,
            &ResourceViewDesc::texture_2d(Format::D24UnormS8Uint, 0, 1),
        )
        .unwrap();

    list.begin_render_pass(
        &[],
        Some(&RenderPassDepthStencilDesc {
            view: dsv,
            depth_load_op: LoadOp::Clear,
            stencil_load_op: LoadOp::Load,
            clear_depth: 1.0,
            clear_stencil: 0,
            ..Default::default()
        }),
    );
    list.end_render_pass();

    let clears: Vec<_> = list
        .native()
        .calls()
        .iter()
        .filter_map(|c| match c {
            NativeCall::ClearDepthStencilView { depth, .. } => Some(*depth),
            _ => None,
        })
        .collect();
    assert_eq!(clears, vec![1.0]);
    assert_eq!(calls_matching(&list, |c| matches!(c, NativeCall::BeginRenderPass { .. })), 0);
    assert_eq!(
        calls_matching(&list, |c| matches!(c, NativeCall::SetRenderTargets { dsv: Some(_), .. })),
        1
    );

    device.destroy_resource_view(dsv);
    device.destroy_resource(depth);
}

#[test]
fn whole_buffer_copy_uses_the_source_size() {
    let device = common::device();
    let mut list = common::graphics_list(&device);
    let src = device
        .create_resource(
            &ResourceDesc::buffer(1024, MemoryHeap::CpuToGpu, ResourceUsage::COPY_SOURCE),
            ResourceUsage::COPY_SOURCE,
        )
        .unwrap();
    let dst = device
        .create_resource(
            &ResourceDesc::buffer(4096, MemoryHeap::GpuOnly, ResourceUsage::COPY_DEST),
            ResourceUsage::COPY_DEST,
        )
        .unwrap();

    list.copy_buffer_region(src, 0, dst, 512, u64::MAX);

    assert_eq!(
        list.native().calls(),
        &[NativeCall::CopyBufferRegion {
            dst: device.get_native_resource(dst),
            dst_offset: 512,
            src: device.get_native_resource(src),
            src_offset: 0,
            size: 1024,
        }]
    );

    device.destroy_resource(src);
    device.destroy_resource(dst);
}

#[test]
fn full_chain_mipmaps_dispatch_each_level() {
    let device = common::device();
    let mut list = common::graphics_list(&device);
    let tex = texture(
        &device,
        8,
        ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS,
    );
    let srv = device
        .create_resource_view(
            tex,
            ResourceUsage::SHADER_RESOURCE,
            &ResourceViewDesc::texture_2d(Format::RGBA8Unorm, 0, 8),
        )
        .unwrap();

    list.generate_mipmaps(srv);

    assert_eq!(calls_matching(&list, |c| matches!(c, NativeCall::Dispatch(..))), 7);
    assert_eq!(
        list.native()
            .calls()
            .iter()
            .filter(|c| matches!(c, NativeCall::Dispatch(..)))
            .last(),
        Some(&NativeCall::Dispatch(1, 1, 1))
    );

    device.destroy_resource_view(srv);
    device.destroy_resource(tex);
}

#[test]
fn query_results_read_back_at_the_query_index() {
    let device = common::device();
    let mut list = common::graphics_list(&device);
    let pool = device.create_query_pool(QueryType::Timestamp, 8).unwrap();
    let readback = device.get_native_resource(device.get_query_pool_readback(pool));

    list.end_query(pool, QueryType::Timestamp, 5);
    match list.native().calls().last() {
        Some(NativeCall::ResolveQueryData { first, count, dst, dst_offset, .. }) => {
            assert_eq!((*first, *count), (5, 1));
            assert_eq!(*dst, readback);
            assert_eq!(*dst_offset, 40);
        }
        other => panic!("expected a resolve, got {:?}", other),
    }

    assert!(device.native().write_buffer(readback, 40, &1234u64.to_ne_bytes()));
    let mut results = [0u64; 1];
    assert!(device.get_query_pool_results(pool, 5, &mut results));
    assert_eq!(results, [1234]);

    device.destroy_query_pool(pool);
}

#[test]
fn encoded_stream_replays_onto_a_command_list() {
    let device = common::device();
    let mut list = common::graphics_list(&device);
    let pipeline_layout = device.create_pipeline_layout(&[]).unwrap();
    let shader = [0u8; 16];
    let pipeline = device
        .create_pipeline(
            pipeline_layout,
            &PipelineDesc {
                compute: Some(&shader[..]),
                debug_name: "replay",
                ..Default::default()
            },
        )
        .unwrap();

    let mut encoder = CommandEncoder::new();
    encoder.begin_debug_event("frame", None);
    encoder.bind_pipeline(PipelineStage::COMPUTE_SHADER, pipeline);
    encoder.dispatch(8, 4, 1);
    encoder.end_debug_event();
    assert_eq!(encoder.len(), 4);

    encoder.submit(&mut list);

    let calls = list.native().calls();
    assert_eq!(calls.len(), 4);
    assert!(matches!(calls[0], NativeCall::BeginEvent(_)));
    assert_eq!(calls[1], NativeCall::SetPipelineState(device.get_native_pipeline(pipeline)));
    assert_eq!(calls[2], NativeCall::Dispatch(8, 4, 1));
    assert_eq!(calls[3], NativeCall::EndEvent);
    assert!(list.has_commands());

    device.destroy_pipeline(pipeline);
    device.destroy_pipeline_layout(pipeline_layout);
}

#[test]
fn resources_carry_their_names_and_descs() {
    let device = common::device();
    let desc = ResourceDesc::buffer(300, MemoryHeap::GpuToCpu, ResourceUsage::COPY_DEST);
    let buffer = device.create_resource(&desc, ResourceUsage::COPY_DEST).unwrap();
    device.set_resource_name(buffer, "readback");

    let native = device.get_native_resource(buffer);
    assert_eq!(device.native().resource_name(native).as_deref(), Some("readback"));
    assert_eq!(device.get_resource_desc(buffer).width, 300);
    assert_eq!(device.native().initial_state(native), Some(ResourceStates::COPY_DEST));
    assert_ne!(device.native().gpu_virtual_address(native), 0);

    device.destroy_resource(buffer);
}

fn mip_source_view(device: &common::Device, levels: u16) -> (Handle<Resource>, Handle<ResourceView>) {
    let tex = texture(
        device,
        levels,
        ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS,
    );
    let srv = device
        .create_resource_view(
            tex,
            ResourceUsage::SHADER_RESOURCE,
            &ResourceViewDesc::texture_2d(Format::RGBA8Unorm, 0, levels as u32),
        )
        .unwrap();
    (tex, srv)
}

#[test]
fn mip_levels_are_bracketed_and_separated_by_uav_barriers() {
    use veneer::gpu::d3d12::native::{BindPoint, GpuDescriptorHandle, ALL_SUBRESOURCES};

    let device = common::device();
    let mut list = common::graphics_list(&device);
    let (tex, srv) = mip_source_view(&device, 8);
    let resource = device.get_native_resource(tex);
    let inc = device.view_heap().increment() as u64;
    let shader_states = ResourceStates::PIXEL_SHADER_RESOURCE | ResourceStates::NON_PIXEL_SHADER_RESOURCE;

    list.generate_mipmaps(srv);

    let calls = list.native().calls();
    let open = calls
        .iter()
        .position(|c| matches!(c, NativeCall::ResourceBarrier(_)))
        .expect("mip chain should open with a transition");
    assert_eq!(
        calls[open],
        NativeCall::ResourceBarrier(vec![NativeBarrier::Transition {
            resource,
            subresource: ALL_SUBRESOURCES,
            before: shader_states,
            after: ResourceStates::UNORDERED_ACCESS,
        }])
    );

    let base = match &calls[open + 2] {
        NativeCall::SetRootDescriptorTable { bind: BindPoint::Compute, param: 1, base } => base.0,
        other => panic!("expected the level 0 source table, got {:?}", other),
    };

    // Constants, source table, destination table, dispatch, UAV barrier.
    let levels = 8u64;
    let mut rest = &calls[open + 1..];
    for level in 1..levels {
        let size = (128u32 >> level).max(1);
        match rest {
            [NativeCall::SetRoot32BitConstants { bind: BindPoint::Compute, param: 0, .. }, source, dest, NativeCall::Dispatch(x, y, 1), NativeCall::ResourceBarrier(uav), tail @ ..] =>
            {
                assert_eq!(
                    source,
                    &NativeCall::SetRootDescriptorTable {
                        bind: BindPoint::Compute,
                        param: 1,
                        base: GpuDescriptorHandle(base + (level - 1) * inc),
                    }
                );
                assert_eq!(
                    dest,
                    &NativeCall::SetRootDescriptorTable {
                        bind: BindPoint::Compute,
                        param: 2,
                        base: GpuDescriptorHandle(base + (levels + level - 1) * inc),
                    }
                );
                assert_eq!((*x, *y), (((size + 7) / 8).max(1), ((size + 7) / 8).max(1)));
                assert_eq!(uav, &vec![NativeBarrier::Uav { resource }]);
                rest = tail;
            }
            other => panic!("unexpected calls for level {}: {:?}", level, other),
        }
    }
    assert_eq!(
        rest,
        &[NativeCall::ResourceBarrier(vec![NativeBarrier::Transition {
            resource,
            subresource: ALL_SUBRESOURCES,
            before: ResourceStates::UNORDERED_ACCESS,
            after: shader_states,
        }])]
    );

    device.destroy_resource_view(srv);
    device.destroy_resource(tex);
}

#[test]
fn native_mip_generation_replaces_the_compute_pass() {
    let device = common::device_with(NullDevice::new().with_native_mipmaps(true));
    let mut list = common::graphics_list(&device);
    let (tex, srv) = mip_source_view(&device, 8);

    list.generate_mipmaps(srv);

    assert_eq!(list.native().calls().len(), 1);
    assert!(matches!(list.native().calls()[0], NativeCall::GenerateMips(_)));
    assert!(list.has_commands());
    assert_eq!(calls_matching(&list, |c| matches!(c, NativeCall::Dispatch(..))), 0);

    device.destroy_resource_view(srv);
    device.destroy_resource(tex);
}

#[test]
fn native_mip_generation_works_without_a_compute_pipeline() {
    let device = common::device_with(NullDevice::new().with_native_mipmaps(true).without_mipmap_pipeline());
    let mut list = common::graphics_list(&device);
    let (tex, srv) = mip_source_view(&device, 4);

    list.generate_mipmaps(srv);
    assert!(matches!(list.native().calls(), [NativeCall::GenerateMips(_)]));

    device.destroy_resource_view(srv);
    device.destroy_resource(tex);
}
