use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::api::object::NativeObject;
use crate::driver::types::QueueKind;
use crate::gpu::d3d12::native::{NativeFence, NativeQueue};
use crate::sync::Event;

use super::{lock, NullObject};

//===----------------------------------------------------------------------===//
// Fence
//===----------------------------------------------------------------------===//

struct FenceState {
    completed: u64,
    waiters: Vec<(u64, Event)>,
}

/// Software fence. Clones share the same counter.
#[derive(Clone)]
pub struct NullFence {
    object: NullObject,
    state: Arc<Mutex<FenceState>>,
}

impl NullFence {
    pub fn new(initial: u64) -> Self {
        Self {
            object: NullObject::new(),
            state: Arc::new(Mutex::new(FenceState {
                completed: initial,
                waiters: Vec::new(),
            })),
        }
    }

    /// Advances the completed value and fires every event whose target has
    /// been reached.
    pub fn complete(&self, value: u64) {
        let mut state = lock(&self.state);
        state.completed = state.completed.max(value);
        let completed = state.completed;
        state.waiters.retain(|(target, event)| {
            if *target <= completed {
                event.set();
                false
            } else {
                true
            }
        });
    }
}

impl NativeObject for NullFence {
    fn raw(&self) -> u64 {
        self.object.raw()
    }
}

impl NativeFence for NullFence {
    type Event = Event;

    fn create_event(&self) -> Option<Event> {
        Some(Event::new())
    }

    fn completed_value(&self) -> u64 {
        lock(&self.state).completed
    }

    fn set_event_on_completion(&self, value: u64, event: &Event) -> bool {
        let mut state = lock(&self.state);
        if state.completed >= value {
            event.set();
        } else {
            state.waiters.push((value, event.clone()));
        }
        true
    }
}

//===----------------------------------------------------------------------===//
// Queue
//===----------------------------------------------------------------------===//

enum Work {
    Batch(Vec<u64>),
    Signal(NullFence, u64),
}

#[derive(Default)]
struct Timeline {
    pending: VecDeque<Work>,
    submitted: Vec<u64>,
    retired: u64,
    markers: Vec<QueueMarker>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueMarker {
    Begin(Box<[u64; 64]>),
    End,
    Marker(Box<[u64; 64]>),
}

/// Queue backed by a software timeline.
///
/// Submitted batches stay pending until retired. An automatic queue retires
/// every batch as soon as it is submitted; a deferred queue waits for
/// [`NullQueue::retire_next`], typically called from another thread.
/// Signals complete once every batch submitted before them has retired.
#[derive(Clone)]
pub struct NullQueue {
    object: NullObject,
    kind: QueueKind,
    auto_retire: bool,
    timeline: Arc<Mutex<Timeline>>,
    fail_signals: Arc<AtomicBool>,
}

impl NullQueue {
    pub fn new(kind: QueueKind) -> Self {
        Self::build(kind, true)
    }

    pub fn deferred(kind: QueueKind) -> Self {
        Self::build(kind, false)
    }

    fn build(kind: QueueKind, auto_retire: bool) -> Self {
        Self {
            object: NullObject::new(),
            kind,
            auto_retire,
            timeline: Arc::new(Mutex::new(Timeline::default())),
            fail_signals: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes every later `signal` report failure.
    pub fn fail_signals(&self, fail: bool) {
        self.fail_signals.store(fail, Ordering::Release);
    }

    /// Retires the oldest pending batch together with the signals queued
    /// behind it. Returns `false` when nothing was pending.
    pub fn retire_next(&self) -> bool {
        let mut timeline = lock(&self.timeline);
        let mut retired = false;
        while let Some(work) = timeline.pending.pop_front() {
            match work {
                Work::Batch(lists) => {
                    if retired {
                        timeline.pending.push_front(Work::Batch(lists));
                        break;
                    }
                    timeline.retired += 1;
                    retired = true;
                }
                Work::Signal(fence, value) => fence.complete(value),
            }
        }
        retired
    }

    pub fn pending_batches(&self) -> usize {
        lock(&self.timeline)
            .pending
            .iter()
            .filter(|w| matches!(w, Work::Batch(_)))
            .count()
    }

    pub fn retired_batches(&self) -> u64 {
        lock(&self.timeline).retired
    }

    /// Every command list handle submitted so far, in order.
    pub fn submitted_lists(&self) -> Vec<u64> {
        lock(&self.timeline).submitted.clone()
    }

    pub fn markers(&self) -> Vec<QueueMarker> {
        lock(&self.timeline).markers.clone()
    }
}

impl NativeObject for NullQueue {
    fn raw(&self) -> u64 {
        self.object.raw()
    }

    fn add_ref(&self) -> u32 {
        self.object.add_ref()
    }

    fn release(&self) -> u32 {
        self.object.release()
    }
}

impl NativeQueue for NullQueue {
    type Fence = NullFence;

    fn kind(&self) -> QueueKind {
        self.kind
    }

    fn execute_command_lists(&self, lists: &[u64]) {
        {
            let mut timeline = lock(&self.timeline);
            timeline.submitted.extend_from_slice(lists);
            timeline.pending.push_back(Work::Batch(lists.to_vec()));
        }
        if self.auto_retire {
            while self.retire_next() {}
        }
    }

    fn signal(&self, fence: &NullFence, value: u64) -> bool {
        if self.fail_signals.load(Ordering::Acquire) {
            return false;
        }
        let mut timeline = lock(&self.timeline);
        if timeline.pending.is_empty() {
            drop(timeline);
            fence.complete(value);
        } else {
            timeline.pending.push_back(Work::Signal(fence.clone(), value));
        }
        true
    }

    fn begin_event(&self, blob: &[u64; 64]) {
        lock(&self.timeline).markers.push(QueueMarker::Begin(Box::new(*blob)));
    }

    fn end_event(&self) {
        lock(&self.timeline).markers.push(QueueMarker::End);
    }

    fn set_marker(&self, blob: &[u64; 64]) {
        lock(&self.timeline).markers.push(QueueMarker::Marker(Box::new(*blob)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_waits_for_prior_batches() {
        let queue = NullQueue::deferred(QueueKind::GRAPHICS);
        let fence = NullFence::new(0);
        queue.execute_command_lists(&[1]);
        queue.execute_command_lists(&[2]);
        assert!(queue.signal(&fence, 5));
        assert_eq!(fence.completed_value(), 0);
        assert!(queue.retire_next());
        assert_eq!(fence.completed_value(), 0);
        assert!(queue.retire_next());
        assert_eq!(fence.completed_value(), 5);
        assert!(!queue.retire_next());
        assert_eq!(queue.submitted_lists(), vec![1, 2]);
    }

    #[test]
    fn idle_signal_completes_immediately() {
        let queue = NullQueue::deferred(QueueKind::COPY);
        let fence = NullFence::new(0);
        let event = fence.create_event().unwrap();
        assert!(queue.signal(&fence, 1));
        assert!(fence.set_event_on_completion(1, &event));
        assert!(event.is_set());
    }
}
