//! Translation of generic commands and objects onto Direct3D 12.
//!
//! [`DeviceImpl`] owns the wrapper allocators and descriptor heaps,
//! [`CommandListImpl`] translates a command stream into one native command
//! list and [`CommandQueueImpl`] submits them and waits on their completion.

pub mod command_list;
pub mod command_queue;
pub mod convert;
pub mod descriptor_heap;
pub mod device;
pub mod immediate;
pub mod native;
pub mod objects;

#[cfg(all(windows, feature = "veneer-dx12"))]
pub mod win32;

pub use command_list::{CommandListImpl, MAX_RENDER_TARGETS};
pub use command_queue::{CommandQueueImpl, QueueState};
pub use descriptor_heap::{CpuDescriptorPool, DescriptorRange, GpuDescriptorHeap};
pub use device::{DeviceImpl, IID_RESOURCE, IID_RESOURCE1};
pub use immediate::{ImmediateCommandList, NUM_ALLOCATORS};
