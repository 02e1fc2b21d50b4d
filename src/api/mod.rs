//! Identity and metadata for native objects.

pub mod object;
pub mod registry;

pub use object::{ApiObject, Capability, Guid, NativeObject, PrivateDataMap};
pub use registry::ObjectRegistry;
