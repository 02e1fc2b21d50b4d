use std::alloc::{alloc, dealloc, Layout};
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::{GPUError, Result};

/// Maximum number of blocks a single allocator will ever link.
pub const MAX_BLOCKS: usize = 4096;

/// Object-safe view of a slot allocator. Wrapper objects keep one of these to
/// hand their slot back when their last reference goes away.
pub trait SlotAllocator<T>: Send + Sync {
    fn allocate(&self) -> Result<NonNull<T>>;

    /// # Safety
    /// `ptr` must have come from `allocate` on this allocator, must not be
    /// freed twice, and whatever value lived in the slot must already be
    /// dropped.
    unsafe fn free(&self, ptr: NonNull<T>);

    fn contains(&self, ptr: *const T) -> bool;

    /// Current generation of the slot at `ptr`, or `None` for foreign
    /// addresses. Odd while the slot is allocated, even while it is free.
    fn generation(&self, ptr: *const T) -> Option<u32>;
}

#[repr(C)]
struct Slot<T> {
    // Global slot index, written once when the block is linked.
    index: u32,
    // Free-list link as `index + 1`; 0 terminates the list.
    next: AtomicU32,
    // Bumped on every allocate and free.
    generation: AtomicU32,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Lock-free fixed-size slot allocator.
///
/// Slots are carved out of blocks of `BLOCK_SIZE` entries. Blocks are linked
/// into a directory and never unlinked until the allocator is dropped, so
/// [`BlockAllocator::contains`] can walk them without hazard pointers.
///
/// The free list head packs a 32-bit generation tag with a 32-bit slot index,
/// every successful push or pop bumps the tag.
pub struct BlockAllocator<T, const BLOCK_SIZE: usize = 64> {
    free_head: AtomicU64,
    blocks: Box<[AtomicPtr<Slot<T>>]>,
    block_count: AtomicUsize,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send, const B: usize> Send for BlockAllocator<T, B> {}
unsafe impl<T: Send, const B: usize> Sync for BlockAllocator<T, B> {}

#[inline]
fn pack(tag: u32, link: u32) -> u64 {
    ((tag as u64) << 32) | link as u64
}

#[inline]
fn unpack(head: u64) -> (u32, u32) {
    ((head >> 32) as u32, head as u32)
}

impl<T, const BLOCK_SIZE: usize> BlockAllocator<T, BLOCK_SIZE> {
    pub fn new() -> Self {
        assert!(BLOCK_SIZE > 0, "block size must be non-zero");
        assert!(
            (BLOCK_SIZE * MAX_BLOCKS) < u32::MAX as usize,
            "block size too large for 32-bit slot indices"
        );
        let blocks = (0..MAX_BLOCKS)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            free_head: AtomicU64::new(0),
            blocks,
            block_count: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }

    /// Size in bytes of a single slot, including its bookkeeping.
    pub const fn slot_size() -> usize {
        std::mem::size_of::<Slot<T>>()
    }

    fn value_offset() -> usize {
        let slot = MaybeUninit::<Slot<T>>::uninit();
        let base = slot.as_ptr();
        // SAFETY: only the field address is computed, nothing is read.
        let value = unsafe { ptr::addr_of!((*base).value) };
        value as usize - base as usize
    }

    fn block_layout() -> Layout {
        // BLOCK_SIZE is bounded by the constructor assertion.
        Layout::array::<Slot<T>>(BLOCK_SIZE).unwrap_or_else(|_| Layout::new::<Slot<T>>())
    }

    /// Number of blocks linked so far.
    pub fn block_count(&self) -> usize {
        self.block_count.load(Ordering::Acquire).min(MAX_BLOCKS)
    }

    /// Total slots currently backed by memory.
    pub fn capacity(&self) -> usize {
        self.block_count() * BLOCK_SIZE
    }

    fn slot(&self, index: u32) -> *mut Slot<T> {
        let block = index as usize / BLOCK_SIZE;
        let base = self.blocks[block].load(Ordering::Acquire);
        debug_assert!(!base.is_null());
        // SAFETY: the index was published after its block pointer was stored.
        unsafe { base.add(index as usize % BLOCK_SIZE) }
    }

    fn pop(&self) -> Option<u32> {
        let mut head = self.free_head.load(Ordering::Acquire);
        loop {
            let (tag, link) = unpack(head);
            if link == 0 {
                return None;
            }
            // SAFETY: links in the free list always name a linked slot.
            let next = unsafe { (*self.slot(link - 1)).next.load(Ordering::Acquire) };
            match self.free_head.compare_exchange_weak(
                head,
                pack(tag.wrapping_add(1), next),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(link - 1),
                Err(actual) => head = actual,
            }
        }
    }

    /// Pushes the chain `first..=last` (already linked through `next`).
    fn push_chain(&self, first: u32, last: *mut Slot<T>) {
        let mut head = self.free_head.load(Ordering::Acquire);
        loop {
            let (tag, link) = unpack(head);
            // SAFETY: `last` is a slot owned by the caller until the CAS wins.
            unsafe { (*last).next.store(link, Ordering::Release) };
            match self.free_head.compare_exchange_weak(
                head,
                pack(tag.wrapping_add(1), first + 1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    /// Links a fresh block, keeps its first slot and publishes the rest.
    fn grow(&self) -> Result<u32> {
        let block = self.block_count.fetch_add(1, Ordering::AcqRel);
        if block >= MAX_BLOCKS {
            log::error!(
                "block allocator for {} exhausted its {} block directory",
                std::any::type_name::<T>(),
                MAX_BLOCKS
            );
            return Err(GPUError::OutOfHostMemory(std::any::type_name::<T>()));
        }

        let layout = Self::block_layout();
        // SAFETY: layout has non-zero size since Slot<T> carries two u32s.
        let base = unsafe { alloc(layout) } as *mut Slot<T>;
        if base.is_null() {
            log::error!(
                "failed to allocate a {} byte block for {}",
                layout.size(),
                std::any::type_name::<T>()
            );
            return Err(GPUError::OutOfHostMemory(std::any::type_name::<T>()));
        }

        let first = (block * BLOCK_SIZE) as u32;
        for i in 0..BLOCK_SIZE {
            let index = first + i as u32;
            let next = if i + 1 < BLOCK_SIZE { index + 2 } else { 0 };
            // SAFETY: i < BLOCK_SIZE and the block is freshly allocated.
            unsafe {
                ptr::write(
                    base.add(i),
                    Slot {
                        index,
                        next: AtomicU32::new(next),
                        generation: AtomicU32::new(0),
                        value: UnsafeCell::new(MaybeUninit::uninit()),
                    },
                );
            }
        }
        self.blocks[block].store(base, Ordering::Release);

        if BLOCK_SIZE > 1 {
            // SAFETY: BLOCK_SIZE - 1 is in bounds.
            let last = unsafe { base.add(BLOCK_SIZE - 1) };
            self.push_chain(first + 1, last);
        }
        Ok(first)
    }

    /// Returns uninitialised storage for one `T`.
    pub fn allocate(&self) -> Result<NonNull<T>> {
        let index = match self.pop() {
            Some(index) => index,
            None => self.grow()?,
        };
        let slot = self.slot(index);
        // SAFETY: the slot is ours until it is freed again.
        let value = unsafe {
            (*slot).generation.fetch_add(1, Ordering::AcqRel);
            (*slot).value.get()
        } as *mut T;
        Ok(unsafe { NonNull::new_unchecked(value) })
    }

    fn slot_of(ptr: *const T) -> *mut Slot<T> {
        (ptr as *mut u8).wrapping_sub(Self::value_offset()) as *mut Slot<T>
    }

    /// Returns a slot to the free list.
    ///
    /// # Safety
    /// See [`SlotAllocator::free`].
    pub unsafe fn free(&self, ptr: NonNull<T>) {
        debug_assert!(self.contains(ptr.as_ptr()), "freeing a foreign pointer");
        let slot = Self::slot_of(ptr.as_ptr());
        (*slot).generation.fetch_add(1, Ordering::AcqRel);
        let index = (*slot).index;
        self.push_chain(index, slot);
    }

    /// `true` when `ptr` addresses the value storage of one of this
    /// allocator's slots.
    pub fn contains(&self, ptr: *const T) -> bool {
        let addr = ptr as usize;
        let span = BLOCK_SIZE * Self::slot_size();
        let offset = Self::value_offset();
        for block in self.blocks[..self.block_count()].iter() {
            let base = block.load(Ordering::Acquire) as usize;
            if base == 0 || addr < base || addr >= base + span {
                continue;
            }
            return (addr - base) % Self::slot_size() == offset;
        }
        false
    }
}

impl<T, const BLOCK_SIZE: usize> BlockAllocator<T, BLOCK_SIZE> {
    /// See [`SlotAllocator::generation`].
    pub fn generation(&self, ptr: *const T) -> Option<u32> {
        if !self.contains(ptr) {
            return None;
        }
        // SAFETY: `contains` confirmed the slot header lives in a linked block.
        Some(unsafe { (*Self::slot_of(ptr)).generation.load(Ordering::Acquire) })
    }
}

impl<T, const BLOCK_SIZE: usize> Default for BlockAllocator<T, BLOCK_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send, const BLOCK_SIZE: usize> SlotAllocator<T> for BlockAllocator<T, BLOCK_SIZE> {
    fn allocate(&self) -> Result<NonNull<T>> {
        BlockAllocator::allocate(self)
    }

    unsafe fn free(&self, ptr: NonNull<T>) {
        BlockAllocator::free(self, ptr)
    }

    fn contains(&self, ptr: *const T) -> bool {
        BlockAllocator::contains(self, ptr)
    }

    fn generation(&self, ptr: *const T) -> Option<u32> {
        BlockAllocator::generation(self, ptr)
    }
}

impl<T, const BLOCK_SIZE: usize> Drop for BlockAllocator<T, BLOCK_SIZE> {
    fn drop(&mut self) {
        let layout = Self::block_layout();
        for block in self.blocks[..self.block_count()].iter() {
            let base = block.swap(ptr::null_mut(), Ordering::AcqRel);
            if !base.is_null() {
                // SAFETY: every linked block was allocated with this layout.
                unsafe { dealloc(base as *mut u8, layout) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier, Mutex};

    #[test]
    fn allocate_grows_in_blocks() {
        let a = BlockAllocator::<u64, 4>::new();
        assert_eq!(a.capacity(), 0);
        let p = a.allocate().unwrap();
        assert_eq!(a.block_count(), 1);
        let mut rest = Vec::new();
        for _ in 0..3 {
            rest.push(a.allocate().unwrap());
        }
        assert_eq!(a.block_count(), 1);
        rest.push(a.allocate().unwrap());
        assert_eq!(a.block_count(), 2);
        unsafe {
            a.free(p);
            for r in rest {
                a.free(r);
            }
        }
    }

    #[test]
    fn freed_slot_is_reused() {
        let a = BlockAllocator::<[u8; 24], 8>::new();
        let p = a.allocate().unwrap();
        unsafe { a.free(p) };
        let q = a.allocate().unwrap();
        assert_eq!(p, q);
        unsafe { a.free(q) };
    }

    #[test]
    fn generation_tracks_reuse() {
        let a = BlockAllocator::<u64, 4>::new();
        let p = a.allocate().unwrap();
        assert_eq!(a.generation(p.as_ptr()), Some(1));
        unsafe { a.free(p) };
        assert_eq!(a.generation(p.as_ptr()), Some(2));
        let q = a.allocate().unwrap();
        assert_eq!(p, q);
        assert_eq!(a.generation(q.as_ptr()), Some(3));
        let local = 0u64;
        assert_eq!(a.generation(&local), None);
        unsafe { a.free(q) };
    }

    #[test]
    fn contains_only_slot_addresses() {
        let a = BlockAllocator::<u32, 16>::new();
        let b = BlockAllocator::<u32, 16>::new();
        let p = a.allocate().unwrap();
        let q = b.allocate().unwrap();
        assert!(a.contains(p.as_ptr()));
        assert!(!a.contains(q.as_ptr()));
        assert!(!b.contains(p.as_ptr()));
        let misaligned = (p.as_ptr() as *const u8).wrapping_add(1) as *const u32;
        assert!(!a.contains(misaligned));
        let local = 5u32;
        assert!(!a.contains(&local));
        assert!(!a.contains(ptr::null()));
        unsafe {
            a.free(p);
            b.free(q);
        }
    }

    #[test]
    fn concurrent_slots_are_unique() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 2000;
        let a = Arc::new(BlockAllocator::<usize, 32>::new());
        let live = Arc::new(Mutex::new(HashSet::new()));
        let start = Arc::new(Barrier::new(THREADS));

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let a = a.clone();
                let live = live.clone();
                let start = start.clone();
                std::thread::spawn(move || {
                    start.wait();
                    let mut mine = Vec::new();
                    for i in 0..ROUNDS {
                        let p = a.allocate().unwrap();
                        unsafe { p.as_ptr().write(t * ROUNDS + i) };
                        assert!(live.lock().unwrap().insert(p.as_ptr() as usize));
                        mine.push(p);
                        if i % 3 == 0 {
                            let p = mine.swap_remove(0);
                            assert!(live.lock().unwrap().remove(&(p.as_ptr() as usize)));
                            unsafe { a.free(p) };
                        }
                    }
                    for p in mine {
                        assert!(live.lock().unwrap().remove(&(p.as_ptr() as usize)));
                        unsafe { a.free(p) };
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        // Every slot ever linked must be reachable from the free list again.
        let capacity = a.capacity();
        let mut seen = HashSet::new();
        for _ in 0..capacity {
            let p = a.allocate().unwrap();
            assert!(seen.insert(p.as_ptr() as usize));
        }
        assert_eq!(a.capacity(), capacity);
    }
}
