use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::api::object::NativeObject;
use crate::driver::types::QueueKind;
use crate::gpu::{Backend, GPUError, Result};

use super::command_list::CommandListImpl;
use super::device::DeviceImpl;
use super::native::{NativeDevice, NativeFence, NativeQueue, WaitEvent};

/// Number of command allocators the immediate list cycles through.
pub const NUM_ALLOCATORS: usize = 4;

type FenceEvent<B> = <<B as Backend>::Fence as NativeFence>::Event;

/// Recording context owned by a queue for work issued outside of any
/// application command list.
///
/// Each flush submits the recorded commands and moves on to the next of
/// [`NUM_ALLOCATORS`] allocators. The CPU only blocks when the allocator it
/// is about to reuse still has work in flight.
pub struct ImmediateCommandList<B: Backend> {
    list: CommandListImpl<B>,
    fence: B::Fence,
    event: FenceEvent<B>,
    fence_value: u64,
    fence_values: [u64; NUM_ALLOCATORS],
    cmd_index: usize,
}

impl<B: Backend> ImmediateCommandList<B> {
    pub fn new(device: &Arc<DeviceImpl<B>>, kind: QueueKind) -> Result<Self> {
        let list = device.create_command_list(kind)?;
        let fence = device
            .native()
            .create_fence(0)
            .ok_or(GPUError::NativeCallFailed("create_fence"))?;
        let Some(event) = fence.create_event() else {
            fence.release();
            return Err(GPUError::NativeCallFailed("create_event"));
        };
        Ok(Self {
            list,
            fence,
            event,
            fence_value: 0,
            fence_values: [0; NUM_ALLOCATORS],
            cmd_index: 0,
        })
    }

    /// Value signaled by the most recent flush.
    pub fn last_fence_value(&self) -> u64 {
        self.fence_value
    }

    fn reset(&mut self) {
        if !self.list.reset(self.cmd_index) {
            log::error!("failed to reset immediate command list {:#x}", self.list.get_native());
        }
    }

    /// Submits everything recorded since the last flush to `queue`.
    ///
    /// Returns `true` when there was nothing to submit.
    pub fn flush(&mut self, queue: &B::Queue) -> bool {
        if !self.list.has_commands() {
            return true;
        }

        if !self.list.close() {
            log::error!(
                "failed to close immediate command list {:#x}, dropping its commands",
                self.list.get_native()
            );
            self.reset();
            return false;
        }

        queue.execute_command_lists(&[self.list.get_native()]);

        // An allocator whose signal never got queued has nothing to wait for.
        if queue.signal(&self.fence, self.fence_value + 1) {
            self.fence_value += 1;
            self.fence_values[self.cmd_index] = self.fence_value;
        } else {
            log::error!("failed to signal immediate command list fence");
            self.fence_values[self.cmd_index] = 0;
        }

        self.cmd_index = (self.cmd_index + 1) % NUM_ALLOCATORS;
        let in_flight = self.fence_values[self.cmd_index];
        if self.fence.completed_value() < in_flight && self.fence.set_event_on_completion(in_flight, &self.event) {
            self.event.wait();
        }

        self.reset();
        true
    }

    /// Flushes, then blocks until the submitted work has completed.
    pub fn flush_and_wait(&mut self, queue: &B::Queue) -> bool {
        if !self.flush(queue) {
            return false;
        }
        let value = self.fence_value;
        if self.fence.completed_value() < value && self.fence.set_event_on_completion(value, &self.event) {
            self.event.wait();
        }
        true
    }
}

impl<B: Backend> Deref for ImmediateCommandList<B> {
    type Target = CommandListImpl<B>;

    fn deref(&self) -> &Self::Target {
        &self.list
    }
}

impl<B: Backend> DerefMut for ImmediateCommandList<B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.list
    }
}

impl<B: Backend> Drop for ImmediateCommandList<B> {
    fn drop(&mut self) {
        self.fence.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::command::CommandSink;
    use crate::gpu::null::{NativeCall, NullBackend, NullDevice, NullQueue};
    use crate::gpu::DeviceInfo;

    fn immediate() -> ImmediateCommandList<NullBackend> {
        let device = DeviceImpl::new(NullDevice::new(), &DeviceInfo::default()).unwrap();
        ImmediateCommandList::new(&device, QueueKind::GRAPHICS).unwrap()
    }

    #[test]
    fn empty_flush_submits_nothing() {
        let mut list = immediate();
        let queue = NullQueue::new(QueueKind::GRAPHICS);
        assert!(list.flush(&queue));
        assert!(queue.submitted_lists().is_empty());
        assert_eq!(list.last_fence_value(), 0);
    }

    #[test]
    fn flush_cycles_allocators() {
        let mut list = immediate();
        let queue = NullQueue::new(QueueKind::GRAPHICS);
        for _ in 0..NUM_ALLOCATORS + 1 {
            list.dispatch(1, 1, 1);
            assert!(list.flush(&queue));
            assert!(!list.has_commands());
        }

        assert_eq!(queue.submitted_lists().len(), NUM_ALLOCATORS + 1);
        assert_eq!(list.last_fence_value(), NUM_ALLOCATORS as u64 + 1);
        let resets: Vec<usize> = list
            .native()
            .calls()
            .iter()
            .filter_map(|c| match c {
                NativeCall::Reset(index) => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(resets, vec![1, 2, 3, 0, 1]);
    }

    #[test]
    fn failed_signals_do_not_stall_allocator_reuse() {
        let mut list = immediate();
        let queue = NullQueue::deferred(QueueKind::GRAPHICS);
        queue.fail_signals(true);
        for _ in 0..NUM_ALLOCATORS + 2 {
            list.dispatch(1, 1, 1);
            assert!(list.flush(&queue));
        }
        assert_eq!(list.last_fence_value(), 0);
        assert_eq!(queue.pending_batches(), NUM_ALLOCATORS + 2);

        // Values stay contiguous once signaling works again.
        queue.fail_signals(false);
        list.dispatch(1, 1, 1);
        assert!(list.flush(&queue));
        assert_eq!(list.last_fence_value(), 1);
    }

    #[test]
    fn flush_and_wait_blocks_until_retired() {
        let mut list = immediate();
        let queue = NullQueue::deferred(QueueKind::GRAPHICS);
        let remote = queue.clone();
        let retire = std::thread::spawn(move || {
            while remote.pending_batches() == 0 {
                std::thread::yield_now();
            }
            remote.retire_next();
        });

        list.dispatch(2, 2, 1);
        assert!(list.flush_and_wait(&queue));
        retire.join().unwrap();
        assert_eq!(queue.retired_batches(), 1);
    }
}
