use thiserror::Error;

use crate::gpu::d3d12::native::DescriptorHeapType;

#[derive(Debug, Error)]
pub enum GPUError {
    /// Host allocation for wrapper storage failed. Never recovered from.
    #[error("out of host memory while allocating {0}")]
    OutOfHostMemory(&'static str),
    /// A native API call reported failure.
    #[error("native call failed: {0}")]
    NativeCallFailed(&'static str),
    #[error("{0:?} descriptor heap exhausted")]
    DescriptorHeapExhausted(DescriptorHeapType),
    #[error("invalid handle passed to {0}")]
    InvalidHandle(&'static str),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

pub type Result<T, E = GPUError> = std::result::Result<T, E>;
