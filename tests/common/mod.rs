#![allow(dead_code)]

use std::sync::Arc;

use veneer::gpu::d3d12::{CommandListImpl, CommandQueueImpl, DeviceImpl};
use veneer::gpu::null::{NullBackend, NullDevice, NullQueue};
use veneer::{DeviceInfo, QueueKind};

pub type Device = Arc<DeviceImpl<NullBackend>>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small heaps so exhaustion paths are reachable from tests.
pub fn small_info() -> DeviceInfo {
    DeviceInfo {
        view_heap_static_size: 32,
        view_heap_transient_size: 32,
        sampler_heap_static_size: 8,
        sampler_heap_transient_size: 8,
        cpu_descriptor_pool_size: 16,
        mipmap_generation: true,
    }
}

pub fn device_with(native: NullDevice) -> Device {
    init_logging();
    DeviceImpl::new(native, &small_info()).expect("null device should initialize")
}

pub fn device() -> Device {
    device_with(NullDevice::new())
}

pub fn graphics_list(device: &Device) -> CommandListImpl<NullBackend> {
    device
        .create_command_list(QueueKind::GRAPHICS)
        .expect("null command list should be created")
}

pub fn queue(device: &Device, native: NullQueue) -> CommandQueueImpl<NullBackend> {
    CommandQueueImpl::new(device.clone(), native)
}

/// Sets environment variables for the lifetime of the guard and restores
/// the previous values on drop.
pub struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    pub fn set(vars: &[(&str, &str)]) -> Self {
        let saved = vars
            .iter()
            .map(|(name, value)| {
                let previous = std::env::var(name).ok();
                std::env::set_var(name, value);
                (name.to_string(), previous)
            })
            .collect();
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (name, previous) in self.saved.drain(..) {
            match previous {
                Some(value) => std::env::set_var(&name, value),
                None => std::env::remove_var(&name),
            }
        }
    }
}
