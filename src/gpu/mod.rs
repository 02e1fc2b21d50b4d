//! Backends and the translation layer that drives them.

use crate::api::object::NativeObject;

pub mod d3d12;
pub mod error;
pub mod info;
pub mod null;

pub use error::{GPUError, Result};
pub use info::DeviceInfo;

use d3d12::native::{NativeCommandList, NativeDescriptorHeap, NativeDevice, NativeFence, NativeQueue};

/// Defines the native object types a rendering backend provides.
///
/// The translation layer is generic over this trait, so the same code drives
/// the real Direct3D 12 API and the recording [`null`] backend.
///
/// # Examples
/// ```ignore
/// use veneer::gpu::{Backend, d3d12::DeviceImpl};
/// fn init<B: Backend>(native: B::Device) {
///     let device = DeviceImpl::<B>::new(native, &Default::default());
/// }
/// ```
pub trait Backend: Sized + Send + Sync + 'static {
    type Device: NativeDevice<Self>;
    type DescriptorHeap: NativeDescriptorHeap;
    type Resource: NativeObject;
    type Pipeline: NativeObject;
    type PipelineLayout: NativeObject;
    type QueryPool: NativeObject;
    type CommandList: NativeCommandList;
    type Fence: NativeFence;
    type Queue: NativeQueue<Fence = Self::Fence>;
}
