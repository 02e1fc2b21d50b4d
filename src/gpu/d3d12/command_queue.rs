use std::sync::{Arc, Mutex, MutexGuard};

use smallvec::SmallVec;

use crate::api::object::{Guid, NativeObject, PrivateDataMap};
use crate::driver::types::QueueKind;
use crate::gpu::Backend;

use super::command_list::CommandListImpl;
use super::convert::encode_pix3blob;
use super::device::DeviceImpl;
use super::immediate::ImmediateCommandList;
use super::native::{NativeDevice, NativeFence, NativeQueue, WaitEvent};

type FenceEvent<B> = <<B as Backend>::Fence as NativeFence>::Event;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum QueueState {
    /// Every submission has completed.
    Idle,
    Busy,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Wraps a native queue.
///
/// Every submission signals the queue's timeline fence with the next value,
/// so the queue is idle once the fence has caught up with the last value.
pub struct CommandQueueImpl<B: Backend> {
    device: Arc<DeviceImpl<B>>,
    native: B::Queue,
    immediate: Option<Mutex<ImmediateCommandList<B>>>,
    timeline: Option<(B::Fence, FenceEvent<B>)>,
    last_value: Mutex<u64>,
    // Held by `wait_idle` while it owns the timeline event.
    idle_wait: Mutex<()>,
    private_data: PrivateDataMap,
}

impl<B: Backend> CommandQueueImpl<B> {
    /// Takes over one reference of `native`.
    pub fn new(device: Arc<DeviceImpl<B>>, native: B::Queue) -> Self {
        device.register_queue(native.raw());

        // The immediate list records graphics commands, so only direct queues get one.
        let immediate = if native.kind().contains(QueueKind::GRAPHICS) {
            match ImmediateCommandList::new(&device, native.kind()) {
                Ok(list) => Some(Mutex::new(list)),
                Err(err) => {
                    log::error!("failed to create immediate command list for queue {:#x}: {}", native.raw(), err);
                    None
                }
            }
        } else {
            None
        };

        let timeline = device.native().create_fence(0).and_then(|fence| match fence.create_event() {
            Some(event) => Some((fence, event)),
            None => {
                fence.release();
                None
            }
        });
        if timeline.is_none() {
            log::error!("failed to create wait for idle resources for queue {:#x}", native.raw());
        }

        log::debug!("created {:?} queue {:#x}", native.kind(), native.raw());

        Self {
            device,
            native,
            immediate,
            timeline,
            last_value: Mutex::new(0),
            idle_wait: Mutex::new(()),
            private_data: PrivateDataMap::new(),
        }
    }

    pub fn device(&self) -> &Arc<DeviceImpl<B>> {
        &self.device
    }

    pub fn get_native(&self) -> u64 {
        self.native.raw()
    }

    pub fn native(&self) -> &B::Queue {
        &self.native
    }

    /// Kinds of work the queue accepts. Direct queues take everything.
    pub fn get_type(&self) -> QueueKind {
        let kind = self.native.kind();
        if kind.contains(QueueKind::GRAPHICS) {
            QueueKind::GRAPHICS | QueueKind::COMPUTE | QueueKind::COPY
        } else {
            kind
        }
    }

    pub fn state(&self) -> QueueState {
        let last = *lock(&self.last_value);
        match &self.timeline {
            Some((fence, _)) if fence.completed_value() < last => QueueState::Busy,
            _ => QueueState::Idle,
        }
    }

    /// Signals the timeline past its last value and returns the new value,
    /// or `None` if the signal could not be queued.
    fn advance(&self, fence: &B::Fence) -> Option<u64> {
        let mut last = lock(&self.last_value);
        let value = *last + 1;
        if !self.native.signal(fence, value) {
            return None;
        }
        *last = value;
        Some(value)
    }

    /// Submits `lists` in order. They must have been closed.
    pub fn execute_command_lists(&self, lists: &[&CommandListImpl<B>]) {
        let natives: SmallVec<[u64; 8]> = lists.iter().map(|list| list.get_native()).collect();
        self.native.execute_command_lists(&natives);

        if let Some((fence, _)) = &self.timeline {
            if self.advance(fence).is_none() {
                log::warn!("failed to signal queue {:#x} after submission", self.native.raw());
            }
        }
    }

    /// Blocks until all work submitted to this queue so far has completed.
    ///
    /// There is no timeout. Do not call this from a thread that has to stay
    /// responsive. Concurrent callers take turns on the timeline event.
    pub fn wait_idle(&self) {
        self.flush_immediate_command_list();

        let Some((fence, event)) = &self.timeline else {
            log::error!("queue {:#x} has no wait for idle fence", self.native.raw());
            return;
        };
        let _turn = lock(&self.idle_wait);
        let Some(value) = self.advance(fence) else {
            return;
        };
        // A wakeup left over from an earlier target can end a wait early.
        while fence.completed_value() < value {
            if !fence.set_event_on_completion(value, event) {
                log::error!("failed to wait for queue {:#x} to go idle", self.native.raw());
                return;
            }
            event.wait();
        }
    }

    pub fn get_immediate_command_list(&self) -> Option<MutexGuard<'_, ImmediateCommandList<B>>> {
        self.immediate.as_ref().map(lock)
    }

    pub fn flush_immediate_command_list(&self) -> bool {
        match &self.immediate {
            Some(list) => lock(list).flush(&self.native),
            None => true,
        }
    }

    pub fn begin_debug_event(&self, label: &str, color: Option<&[f32; 4]>) {
        self.native.begin_event(&encode_pix3blob(label, color));
    }

    pub fn end_debug_event(&self) {
        self.native.end_event();
    }

    pub fn insert_debug_marker(&self, label: &str, color: Option<&[f32; 4]>) {
        self.native.set_marker(&encode_pix3blob(label, color));
    }

    /// # Safety
    /// Metadata access on this queue must be serialized by the caller.
    pub unsafe fn get_private_data(&self, key: &Guid) -> u64 {
        self.private_data.get(key)
    }

    /// # Safety
    /// Metadata access on this queue must be serialized by the caller.
    pub unsafe fn set_private_data(&self, key: Guid, value: u64) {
        self.private_data.set(key, value)
    }
}

impl<B: Backend> Drop for CommandQueueImpl<B> {
    fn drop(&mut self) {
        self.immediate = None;
        if let Some((fence, _)) = self.timeline.take() {
            fence.release();
        }
        self.device.unregister_queue(self.native.raw());
        log::debug!("destroyed queue {:#x}", self.native.raw());
        self.native.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::command::CommandSink;
    use crate::gpu::null::{NullBackend, NullDevice, NullQueue, QueueMarker};
    use crate::gpu::DeviceInfo;

    fn device() -> Arc<DeviceImpl<NullBackend>> {
        DeviceImpl::new(NullDevice::new(), &DeviceInfo::default()).unwrap()
    }

    #[test]
    fn only_graphics_queues_get_an_immediate_list() {
        let device = device();
        let direct = CommandQueueImpl::new(device.clone(), NullQueue::new(QueueKind::GRAPHICS));
        let copy = CommandQueueImpl::new(device.clone(), NullQueue::new(QueueKind::COPY));

        assert!(direct.get_immediate_command_list().is_some());
        assert!(copy.get_immediate_command_list().is_none());
        assert_eq!(direct.get_type(), QueueKind::all());
        assert_eq!(copy.get_type(), QueueKind::COPY);
        assert_eq!(device.queues().len(), 2);

        drop(copy);
        assert_eq!(device.queues(), vec![direct.get_native()]);
    }

    #[test]
    fn submissions_keep_their_order() {
        let device = device();
        let queue = CommandQueueImpl::new(device.clone(), NullQueue::new(QueueKind::COMPUTE));
        let mut a = device.create_command_list(QueueKind::COMPUTE).unwrap();
        let mut b = device.create_command_list(QueueKind::COMPUTE).unwrap();
        a.dispatch(1, 1, 1);
        b.dispatch(2, 1, 1);
        assert!(a.close() && b.close());

        queue.execute_command_lists(&[&a, &b]);
        assert_eq!(queue.native().submitted_lists(), vec![a.get_native(), b.get_native()]);
        assert_eq!(queue.state(), QueueState::Idle);
    }

    #[test]
    fn deferred_work_keeps_the_queue_busy() {
        let device = device();
        let queue = CommandQueueImpl::new(device.clone(), NullQueue::deferred(QueueKind::COMPUTE));
        let mut list = device.create_command_list(QueueKind::COMPUTE).unwrap();
        list.dispatch(1, 1, 1);
        assert!(list.close());

        queue.execute_command_lists(&[&list]);
        assert_eq!(queue.state(), QueueState::Busy);
        assert!(queue.native().retire_next());
        assert_eq!(queue.state(), QueueState::Idle);
    }

    #[test]
    fn wait_idle_gives_up_when_signal_fails() {
        let device = device();
        let native = NullQueue::deferred(QueueKind::COMPUTE);
        let queue = CommandQueueImpl::new(device, native.clone());
        native.fail_signals(true);
        queue.wait_idle();
        assert_eq!(queue.state(), QueueState::Idle);
    }

    #[test]
    fn concurrent_wait_idle_callers_all_return() {
        let device = device();
        for _ in 0..20 {
            let native = NullQueue::deferred(QueueKind::COMPUTE);
            let queue = Arc::new(CommandQueueImpl::new(device.clone(), native.clone()));
            let mut list = device.create_command_list(QueueKind::COMPUTE).unwrap();
            list.dispatch(1, 1, 1);
            assert!(list.close());
            queue.execute_command_lists(&[&list]);

            let waiters: Vec<_> = (0..2)
                .map(|_| {
                    let queue = queue.clone();
                    let (tx, rx) = std::sync::mpsc::channel();
                    std::thread::spawn(move || {
                        queue.wait_idle();
                        tx.send(queue.state()).unwrap();
                    });
                    rx
                })
                .collect();

            std::thread::sleep(std::time::Duration::from_millis(2));
            for rx in &waiters {
                assert!(rx.try_recv().is_err());
            }
            assert!(native.retire_next());
            for rx in waiters {
                let state = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
                assert_eq!(state, QueueState::Idle);
            }
        }
    }

    #[test]
    fn queue_events_are_pix_blobs() {
        let device = device();
        let queue = CommandQueueImpl::new(device, NullQueue::new(QueueKind::COPY));
        queue.begin_debug_event("upload", None);
        queue.insert_debug_marker("mark", Some(&[1.0, 0.0, 0.0, 1.0]));
        queue.end_debug_event();

        let markers = queue.native().markers();
        assert_eq!(markers.len(), 3);
        assert_eq!(markers[0], QueueMarker::Begin(Box::new(encode_pix3blob("upload", None))));
        assert_eq!(markers[2], QueueMarker::End);
    }
}
