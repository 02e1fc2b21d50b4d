//! Uniform object and command model over native D3D12-style GPU APIs.
//!
//! Native objects are wrapped in reference-counted [`api::ApiObject`]s that
//! live in lock-free block allocators and are addressed by typed
//! [`Handle`]s. Generic commands issued against a [`driver::CommandSink`]
//! are translated into native command list calls by
//! [`gpu::d3d12::CommandListImpl`], and [`gpu::d3d12::CommandQueueImpl`]
//! submits the result and waits for it.
//!
//! The translation layer is generic over [`gpu::Backend`]. The
//! [`gpu::null`] backend records every native call and runs queues on a
//! software timeline, so everything can be exercised without a GPU.

pub mod api;
pub mod driver;
pub mod gpu;
pub mod sync;
pub mod utils;

pub use driver::types::*;
pub use gpu::{Backend, DeviceInfo, GPUError, Result};
