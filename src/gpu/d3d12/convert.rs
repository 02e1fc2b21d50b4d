use crate::driver::types::{DescriptorType, LoadOp, ResourceUsage, StoreOp};

use super::native::{BeginningAccess, DescriptorHeapType, EndingAccess, NativeBarrier, ResourceStates, ALL_SUBRESOURCES};

/// Native state bits shared one to one with [`ResourceUsage`].
const STATE_BITS: u32 = 0x3FFF;

pub fn convert_resource_usage_to_states(usage: ResourceUsage) -> ResourceStates {
    if usage == ResourceUsage::GENERAL {
        return ResourceStates::COMMON;
    }
    if usage == ResourceUsage::PRESENT {
        return ResourceStates::PRESENT;
    }
    if usage.contains(ResourceUsage::CPU_ACCESS) {
        return ResourceStates::GENERIC_READ;
    }
    let mut states = ResourceStates::from_bits_truncate(usage.bits() & STATE_BITS);
    if usage.contains(ResourceUsage::CONSTANT_BUFFER) {
        states |= ResourceStates::VERTEX_AND_CONSTANT_BUFFER;
    }
    states
}

/// Picks the single native barrier expressing `old -> new` on `resource`.
pub fn convert_barrier(resource: u64, old: ResourceUsage, new: ResourceUsage) -> NativeBarrier {
    if old == ResourceUsage::UNORDERED_ACCESS && new == ResourceUsage::UNORDERED_ACCESS {
        NativeBarrier::Uav { resource }
    } else if old == ResourceUsage::UNDEFINED && new == ResourceUsage::GENERAL {
        NativeBarrier::Aliasing {
            before: 0,
            after: resource,
        }
    } else {
        NativeBarrier::Transition {
            resource,
            subresource: ALL_SUBRESOURCES,
            before: convert_resource_usage_to_states(old),
            after: convert_resource_usage_to_states(new),
        }
    }
}

pub fn convert_render_pass_load_op(op: LoadOp) -> BeginningAccess {
    match op {
        LoadOp::Load => BeginningAccess::Preserve,
        LoadOp::Clear => BeginningAccess::Clear,
        LoadOp::Discard => BeginningAccess::Discard,
        LoadOp::NoAccess => BeginningAccess::NoAccess,
    }
}

pub fn convert_render_pass_store_op(op: StoreOp) -> EndingAccess {
    match op {
        StoreOp::Store => EndingAccess::Preserve,
        StoreOp::Discard => EndingAccess::Discard,
        StoreOp::NoAccess => EndingAccess::NoAccess,
    }
}

pub fn convert_descriptor_type_to_heap_type(ty: DescriptorType) -> DescriptorHeapType {
    match ty {
        DescriptorType::Sampler => DescriptorHeapType::Sampler,
        DescriptorType::ShaderResourceView
        | DescriptorType::UnorderedAccessView
        | DescriptorType::ConstantBuffer => DescriptorHeapType::CbvSrvUav,
    }
}

/// Packs a blend constant the way dynamic state carries it: 8 bits per
/// channel, red in the low byte.
pub fn pack_blend_constant(color: &[f32; 4]) -> u32 {
    color
        .iter()
        .enumerate()
        .map(|(i, c)| ((c.clamp(0.0, 1.0) * 255.0) as u32 & 0xFF) << (i * 8))
        .fold(0, |acc, v| acc | v)
}

pub fn unpack_blend_constant(value: u32) -> [f32; 4] {
    let mut out = [0.0; 4];
    for (i, c) in out.iter_mut().enumerate() {
        *c = ((value >> (i * 8)) & 0xFF) as f32 / 255.0;
    }
    out
}

//===----------------------------------------------------------------------===//
// PIX event blobs
//===----------------------------------------------------------------------===//

/// `BeginEvent`/`SetMarker` metadata value for a PIX3 blob payload.
pub const PIX3BLOB_METADATA: u32 = 2;

const PIX_EVENT_BEGIN_NO_ARGS: u64 = 0x2;
const PIX_COPY_CHUNK_SIZE: u64 = 8;
const PIX_IS_ANSI: u64 = 1;
/// Bytes available to the label: words 3..63, minus the trailing NUL word.
const PIX_LABEL_BYTES: usize = (64 - 4) * 8;

/// Encodes a debug label and optional RGBA colour as a PIX3 event blob.
pub fn encode_pix3blob(label: &str, color: Option<&[f32; 4]>) -> [u64; 64] {
    let mut blob = [0u64; 64];
    blob[0] = PIX_EVENT_BEGIN_NO_ARGS << 10;
    blob[1] = 0xFF00_0000;
    if let Some(c) = color {
        let channel = |v: f32| (v * 255.0) as u32 as u64 & 0xFF;
        blob[1] |= channel(c[0]) << 16 | channel(c[1]) << 8 | channel(c[2]);
    }
    blob[2] = PIX_COPY_CHUNK_SIZE << 55 | PIX_IS_ANSI << 54;

    let bytes = label.as_bytes();
    let len = bytes.len().min(PIX_LABEL_BYTES);
    let text: &mut [u8] = bytemuck::cast_slice_mut(&mut blob[3..63]);
    text[..len].copy_from_slice(&bytes[..len]);
    blob[63] = 0;
    blob
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barrier_kinds() {
        assert_eq!(
            convert_barrier(7, ResourceUsage::UNORDERED_ACCESS, ResourceUsage::UNORDERED_ACCESS),
            NativeBarrier::Uav { resource: 7 }
        );
        assert_eq!(
            convert_barrier(7, ResourceUsage::UNDEFINED, ResourceUsage::GENERAL),
            NativeBarrier::Aliasing { before: 0, after: 7 }
        );
        assert_eq!(
            convert_barrier(7, ResourceUsage::COPY_DEST, ResourceUsage::SHADER_RESOURCE),
            NativeBarrier::Transition {
                resource: 7,
                subresource: ALL_SUBRESOURCES,
                before: ResourceStates::COPY_DEST,
                after: ResourceStates::NON_PIXEL_SHADER_RESOURCE | ResourceStates::PIXEL_SHADER_RESOURCE,
            }
        );
    }

    #[test]
    fn usage_to_states() {
        assert_eq!(convert_resource_usage_to_states(ResourceUsage::GENERAL), ResourceStates::COMMON);
        assert_eq!(convert_resource_usage_to_states(ResourceUsage::PRESENT), ResourceStates::PRESENT);
        assert_eq!(
            convert_resource_usage_to_states(ResourceUsage::CPU_ACCESS | ResourceUsage::COPY_DEST),
            ResourceStates::GENERIC_READ
        );
        assert_eq!(
            convert_resource_usage_to_states(ResourceUsage::CONSTANT_BUFFER),
            ResourceStates::VERTEX_AND_CONSTANT_BUFFER
        );
        assert_eq!(
            convert_resource_usage_to_states(ResourceUsage::DEPTH_STENCIL),
            ResourceStates::DEPTH_WRITE | ResourceStates::DEPTH_READ
        );
    }

    #[test]
    fn pix_blob_layout() {
        let blob = encode_pix3blob("frame", Some(&[1.0, 0.0, 0.5, 1.0]));
        assert_eq!(blob[0], 0x2 << 10);
        assert_eq!(blob[1], 0xFF00_0000 | 0xFF << 16 | 127);
        assert_eq!(blob[2], 8 << 55 | 1 << 54);
        let text: &[u8] = bytemuck::cast_slice(&blob[3..5]);
        assert_eq!(&text[..6], b"frame\0");
        assert_eq!(blob[63], 0);

        let plain = encode_pix3blob("x", None);
        assert_eq!(plain[1], 0xFF00_0000);
    }

    #[test]
    fn pix_blob_truncates_long_labels() {
        let label = "a".repeat(1000);
        let blob = encode_pix3blob(&label, None);
        let text: &[u8] = bytemuck::cast_slice(&blob[3..63]);
        assert!(text.iter().all(|&b| b == b'a'));
        assert_eq!(blob[63], 0);
    }

    #[test]
    fn blend_constant_packing() {
        let packed = pack_blend_constant(&[1.0, 0.0, 1.0, 0.0]);
        assert_eq!(packed, 0x00FF_00FF);
        assert_eq!(unpack_blend_constant(packed), [1.0, 0.0, 1.0, 0.0]);
    }
}
