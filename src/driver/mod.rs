//! Generation-agnostic object and command model.

pub mod command;
pub mod types;

pub use command::{Command, CommandEncoder, CommandSink, Op, OwnedDescriptors};
