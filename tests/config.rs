mod common;

use serial_test::serial;
use veneer::gpu::d3d12::DeviceImpl;
use veneer::gpu::null::{NullBackend, NullDevice};
use veneer::{DeviceInfo, GPUError, QueueKind};

const VARS: [&str; 6] = [
    "VENEER_VIEW_HEAP_STATIC",
    "VENEER_VIEW_HEAP_TRANSIENT",
    "VENEER_SAMPLER_HEAP_STATIC",
    "VENEER_SAMPLER_HEAP_TRANSIENT",
    "VENEER_CPU_DESCRIPTOR_POOL",
    "VENEER_NO_MIPMAP_PIPELINE",
];

fn clear_vars() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn from_env_without_overrides_is_default() {
    clear_vars();
    assert_eq!(DeviceInfo::from_env(), DeviceInfo::default());
}

#[test]
#[serial]
fn from_env_reads_overrides() {
    clear_vars();
    let _env = common::EnvGuard::set(&[
        ("VENEER_VIEW_HEAP_STATIC", "64"),
        ("VENEER_SAMPLER_HEAP_TRANSIENT", " 12 "),
        ("VENEER_NO_MIPMAP_PIPELINE", "1"),
    ]);

    let info = DeviceInfo::from_env();
    assert_eq!(info.view_heap_static_size, 64);
    assert_eq!(info.sampler_heap_transient_size, 12);
    assert_eq!(info.view_heap_transient_size, DeviceInfo::default().view_heap_transient_size);
    assert!(!info.mipmap_generation);
}

#[test]
#[serial]
fn malformed_values_fall_back() {
    clear_vars();
    common::init_logging();
    let _env = common::EnvGuard::set(&[("VENEER_CPU_DESCRIPTOR_POOL", "lots")]);
    assert_eq!(
        DeviceInfo::from_env().cpu_descriptor_pool_size,
        DeviceInfo::default().cpu_descriptor_pool_size
    );
}

#[test]
#[serial]
fn tiny_cpu_pool_runs_out_of_descriptors() {
    clear_vars();
    let _env = common::EnvGuard::set(&[("VENEER_CPU_DESCRIPTOR_POOL", "1")]);
    let device = DeviceImpl::<NullBackend>::new(NullDevice::new(), &DeviceInfo::from_env()).unwrap();

    let first = device.create_sampler(&Default::default()).unwrap();
    match device.create_sampler(&Default::default()) {
        Err(GPUError::DescriptorHeapExhausted(_)) => {}
        other => panic!("expected exhaustion, got {:?}", other),
    }

    device.destroy_sampler(first);
    let again = device.create_sampler(&Default::default()).unwrap();
    device.destroy_sampler(again);

    // Command lists do not draw from the CPU pools.
    assert!(device.create_command_list(QueueKind::COPY).is_ok());
}

#[test]
#[serial]
fn oversized_heap_overrides_are_rejected() {
    clear_vars();
    common::init_logging();
    let _env = common::EnvGuard::set(&[
        ("VENEER_SAMPLER_HEAP_STATIC", "4294967295"),
        ("VENEER_SAMPLER_HEAP_TRANSIENT", "1"),
    ]);
    match DeviceImpl::<NullBackend>::new(NullDevice::new(), &DeviceInfo::from_env()) {
        Err(GPUError::Unsupported(_)) => {}
        Err(other) => panic!("expected an unsupported size, got {:?}", other),
        Ok(_) => panic!("expected an unsupported size"),
    }
}
