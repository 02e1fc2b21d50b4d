#[cfg(feature = "veneer-serde")]
use serde::{Deserialize, Serialize};

/// Creation parameters for a [`DeviceImpl`](crate::gpu::d3d12::DeviceImpl).
///
/// Heap sizes are in descriptors. Each shader-visible heap holds a static
/// region for descriptor sets followed by the transient ring.
#[cfg_attr(feature = "veneer-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub view_heap_static_size: u32,
    pub view_heap_transient_size: u32,
    pub sampler_heap_static_size: u32,
    pub sampler_heap_transient_size: u32,
    /// Capacity of each CPU-only descriptor pool (RTV, DSV, view staging, sampler).
    pub cpu_descriptor_pool_size: u32,
    /// Build the compute pipeline used by `generate_mipmaps`.
    pub mipmap_generation: bool,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            view_heap_static_size: 8192,
            view_heap_transient_size: 8192,
            sampler_heap_static_size: 1024,
            sampler_heap_transient_size: 1024,
            cpu_descriptor_pool_size: 4096,
            mipmap_generation: true,
        }
    }
}

fn env_u32(name: &str, fallback: u32) -> u32 {
    match std::env::var(name) {
        Ok(value) => match value.trim().parse::<u32>() {
            Ok(parsed) => parsed,
            Err(_) => {
                log::warn!("ignoring {}={:?}, expected an unsigned integer", name, value);
                fallback
            }
        },
        Err(_) => fallback,
    }
}

impl DeviceInfo {
    /// Defaults overridden by `VENEER_*` environment variables.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `VENEER_VIEW_HEAP_STATIC` | `view_heap_static_size` |
    /// | `VENEER_VIEW_HEAP_TRANSIENT` | `view_heap_transient_size` |
    /// | `VENEER_SAMPLER_HEAP_STATIC` | `sampler_heap_static_size` |
    /// | `VENEER_SAMPLER_HEAP_TRANSIENT` | `sampler_heap_transient_size` |
    /// | `VENEER_CPU_DESCRIPTOR_POOL` | `cpu_descriptor_pool_size` |
    /// | `VENEER_NO_MIPMAP_PIPELINE` | disables `mipmap_generation` when set |
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            view_heap_static_size: env_u32("VENEER_VIEW_HEAP_STATIC", d.view_heap_static_size),
            view_heap_transient_size: env_u32(
                "VENEER_VIEW_HEAP_TRANSIENT",
                d.view_heap_transient_size,
            ),
            sampler_heap_static_size: env_u32(
                "VENEER_SAMPLER_HEAP_STATIC",
                d.sampler_heap_static_size,
            ),
            sampler_heap_transient_size: env_u32(
                "VENEER_SAMPLER_HEAP_TRANSIENT",
                d.sampler_heap_transient_size,
            ),
            cpu_descriptor_pool_size: env_u32(
                "VENEER_CPU_DESCRIPTOR_POOL",
                d.cpu_descriptor_pool_size,
            ),
            mipmap_generation: std::env::var_os("VENEER_NO_MIPMAP_PIPELINE").is_none(),
        }
    }
}
