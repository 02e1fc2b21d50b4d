mod common;

use std::thread;
use std::time::Duration;

use veneer::driver::CommandSink;
use veneer::gpu::d3d12::QueueState;
use veneer::gpu::null::{NativeCall, NullQueue};
use veneer::QueueKind;

#[test]
fn idle_queue_returns_from_wait_idle() {
    let device = common::device();
    let queue = common::queue(&device, NullQueue::new(QueueKind::GRAPHICS));
    assert_eq!(queue.state(), QueueState::Idle);
    queue.wait_idle();
    assert_eq!(queue.state(), QueueState::Idle);
}

#[test]
fn wait_idle_blocks_until_every_batch_retires() {
    let device = common::device();
    let native = NullQueue::deferred(QueueKind::COMPUTE);
    let queue = common::queue(&device, native.clone());

    let mut lists = Vec::new();
    for i in 0..3 {
        let mut list = device.create_command_list(QueueKind::COMPUTE).unwrap();
        list.dispatch(i + 1, 1, 1);
        assert!(list.close());
        lists.push(list);
    }
    for list in &lists {
        queue.execute_command_lists(&[list]);
    }
    assert_eq!(queue.state(), QueueState::Busy);

    let gpu = {
        let native = native.clone();
        thread::spawn(move || {
            let mut retired = 0;
            while retired < 3 {
                if native.retire_next() {
                    retired += 1;
                } else {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        })
    };

    // The wait_idle signal lands behind the last batch, so returning early
    // would leave batches pending.
    queue.wait_idle();
    assert_eq!(native.pending_batches(), 0);
    gpu.join().unwrap();

    assert_eq!(native.retired_batches(), 3);
    assert_eq!(queue.state(), QueueState::Idle);
}

#[test]
fn batches_submit_every_list_in_order() {
    let device = common::device();
    let queue = common::queue(&device, NullQueue::new(QueueKind::GRAPHICS));
    let mut lists: Vec<_> = (0..4)
        .map(|_| device.create_command_list(QueueKind::GRAPHICS).unwrap())
        .collect();
    for list in &mut lists {
        list.draw(3, 1, 0, 0);
        assert!(list.close());
    }

    let batch: Vec<_> = lists.iter().collect();
    queue.execute_command_lists(&batch);

    let expected: Vec<u64> = lists.iter().map(|l| l.get_native()).collect();
    assert_eq!(queue.native().submitted_lists(), expected);
}

#[test]
fn wait_idle_flushes_the_immediate_list() {
    let device = common::device();
    let queue = common::queue(&device, NullQueue::new(QueueKind::GRAPHICS));
    {
        let mut immediate = queue.get_immediate_command_list().unwrap();
        immediate.dispatch(1, 1, 1);
        assert!(immediate.has_commands());
    }

    queue.wait_idle();

    let immediate = queue.get_immediate_command_list().unwrap();
    assert!(!immediate.has_commands());
    assert_eq!(queue.native().submitted_lists(), vec![immediate.get_native()]);
    assert!(immediate
        .native()
        .calls()
        .iter()
        .any(|c| matches!(c, NativeCall::Reset(1))));
}

#[test]
fn dropping_queues_unregisters_them() {
    let device = common::device();
    let graphics = common::queue(&device, NullQueue::new(QueueKind::GRAPHICS));
    let copy = common::queue(&device, NullQueue::new(QueueKind::COPY));
    assert_eq!(device.queues().len(), 2);

    drop(graphics);
    assert_eq!(device.queues(), vec![copy.get_native()]);
    drop(copy);
    assert!(device.queues().is_empty());
}
