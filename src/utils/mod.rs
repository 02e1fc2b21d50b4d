pub mod block_alloc;
pub mod handle;

pub use block_alloc::{BlockAllocator, SlotAllocator};
pub use handle::Handle;
