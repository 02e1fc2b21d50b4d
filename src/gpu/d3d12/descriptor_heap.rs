use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::api::object::NativeObject;
use crate::gpu::{Backend, GPUError, Result};

use super::native::{
    CpuDescriptorHandle, DescriptorHeapType, GpuDescriptorHandle, NativeDescriptorHeap, NativeDevice,
};

/// Contiguous run of descriptors inside a heap.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    /// Index of the first descriptor within the heap.
    pub first: u32,
    pub count: u32,
    pub cpu: CpuDescriptorHandle,
    pub gpu: GpuDescriptorHandle,
}

/// Shader-visible heap split into a static region for descriptor sets and a
/// transient ring for per-call tables.
///
/// Transient ranges have no explicit free. The cursor wraps when a request
/// would run past the end of the ring; by then the work referencing the
/// oldest ranges is assumed to have completed.
pub struct GpuDescriptorHeap<B: Backend> {
    heap: B::DescriptorHeap,
    ty: DescriptorHeapType,
    increment: u32,
    static_size: u32,
    transient_size: u32,
    transient_cursor: AtomicU64,
    static_free: Mutex<Vec<(u32, u32)>>,
}

impl<B: Backend> GpuDescriptorHeap<B> {
    pub(crate) fn new(
        device: &B::Device,
        ty: DescriptorHeapType,
        static_size: u32,
        transient_size: u32,
    ) -> Result<Self> {
        let Some(capacity) = static_size.checked_add(transient_size) else {
            log::error!(
                "{:?} heap of {}+{} descriptors does not fit in 32 bits",
                ty,
                static_size,
                transient_size
            );
            return Err(GPUError::Unsupported("descriptor heap size"));
        };
        let heap = device
            .create_descriptor_heap(ty, capacity, true)
            .ok_or(GPUError::NativeCallFailed("create_descriptor_heap"))?;
        let static_free = if static_size > 0 {
            vec![(0, static_size)]
        } else {
            Vec::new()
        };
        Ok(Self {
            heap,
            ty,
            increment: device.descriptor_increment(ty),
            static_size,
            transient_size,
            transient_cursor: AtomicU64::new(0),
            static_free: Mutex::new(static_free),
        })
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.ty
    }

    /// Native heap handle, as bound with `SetDescriptorHeaps`.
    pub fn get_native(&self) -> u64 {
        self.heap.raw()
    }

    pub fn increment(&self) -> u32 {
        self.increment
    }

    pub fn transient_capacity(&self) -> u32 {
        self.transient_size
    }

    fn range(&self, first: u32, count: u32) -> DescriptorRange {
        DescriptorRange {
            first,
            count,
            cpu: self.heap.cpu_start().offset(first, self.increment),
            gpu: self.heap.gpu_start().offset(first, self.increment),
        }
    }

    /// Hands out `count` contiguous descriptors from the transient ring, or
    /// `None` when `count` exceeds the ring.
    pub fn allocate_transient(&self, count: u32) -> Option<DescriptorRange> {
        if count == 0 || count > self.transient_size {
            return None;
        }
        let size = self.transient_size as u64;
        let count = count as u64;
        let mut cursor = self.transient_cursor.load(Ordering::Relaxed);
        loop {
            let start = cursor % size;
            let (offset, next) = if start + count > size {
                // Restart at the beginning of the next lap.
                (0, cursor - start + size + count)
            } else {
                (start, cursor + count)
            };
            match self.transient_cursor.compare_exchange_weak(
                cursor,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(self.range(self.static_size + offset as u32, count as u32)),
                Err(actual) => cursor = actual,
            }
        }
    }

    /// First-fit allocation from the static region.
    pub fn allocate_static(&self, count: u32) -> Option<DescriptorRange> {
        if count == 0 {
            return None;
        }
        let mut free = self.static_free.lock().ok()?;
        let slot = free.iter().position(|&(_, len)| len >= count)?;
        let (first, len) = free[slot];
        if len == count {
            free.remove(slot);
        } else {
            free[slot] = (first + count, len - count);
        }
        Some(self.range(first, count))
    }

    pub fn free_static(&self, range: &DescriptorRange) {
        debug_assert!(range.first + range.count <= self.static_size);
        let Ok(mut free) = self.static_free.lock() else {
            return;
        };
        let at = free.partition_point(|&(first, _)| first < range.first);
        free.insert(at, (range.first, range.count));
        // Merge with neighbours.
        if at + 1 < free.len() && free[at].0 + free[at].1 == free[at + 1].0 {
            free[at].1 += free[at + 1].1;
            free.remove(at + 1);
        }
        if at > 0 && free[at - 1].0 + free[at - 1].1 == free[at].0 {
            free[at - 1].1 += free[at].1;
            free.remove(at);
        }
    }

    /// `true` when `handle` points into this heap.
    pub fn contains_gpu(&self, handle: GpuDescriptorHandle) -> bool {
        let start = self.heap.gpu_start().0;
        let end = start + (self.static_size + self.transient_size) as u64 * self.increment as u64;
        handle.0 >= start && handle.0 < end
    }

    pub fn offset_cpu(&self, handle: CpuDescriptorHandle, index: u32) -> CpuDescriptorHandle {
        handle.offset(index, self.increment)
    }

    pub fn offset_gpu(&self, handle: GpuDescriptorHandle, index: u32) -> GpuDescriptorHandle {
        handle.offset(index, self.increment)
    }
}

impl<B: Backend> Drop for GpuDescriptorHeap<B> {
    fn drop(&mut self) {
        self.heap.release();
    }
}

/// CPU-only pool of single descriptors used for view and sampler creation.
pub struct CpuDescriptorPool<B: Backend> {
    heap: B::DescriptorHeap,
    ty: DescriptorHeapType,
    increment: u32,
    capacity: u32,
    state: Mutex<CpuPoolState>,
}

#[derive(Default)]
struct CpuPoolState {
    next: u32,
    free: Vec<u32>,
}

impl<B: Backend> CpuDescriptorPool<B> {
    pub(crate) fn new(device: &B::Device, ty: DescriptorHeapType, capacity: u32) -> Result<Self> {
        let heap = device
            .create_descriptor_heap(ty, capacity, false)
            .ok_or(GPUError::NativeCallFailed("create_descriptor_heap"))?;
        Ok(Self {
            heap,
            ty,
            increment: device.descriptor_increment(ty),
            capacity,
            state: Mutex::new(CpuPoolState::default()),
        })
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.ty
    }

    pub fn allocate(&self) -> Result<CpuDescriptorHandle> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| GPUError::DescriptorHeapExhausted(self.ty))?;
        let index = match state.free.pop() {
            Some(index) => index,
            None if state.next < self.capacity => {
                state.next += 1;
                state.next - 1
            }
            None => return Err(GPUError::DescriptorHeapExhausted(self.ty)),
        };
        Ok(self.heap.cpu_start().offset(index, self.increment))
    }

    pub fn free(&self, handle: CpuDescriptorHandle) {
        let start = self.heap.cpu_start().0;
        debug_assert!(handle.0 >= start && (handle.0 - start) % self.increment as u64 == 0);
        let index = ((handle.0 - start) / self.increment as u64) as u32;
        if let Ok(mut state) = self.state.lock() {
            debug_assert!(!state.free.contains(&index), "descriptor freed twice");
            state.free.push(index);
        }
    }
}

impl<B: Backend> Drop for CpuDescriptorPool<B> {
    fn drop(&mut self) {
        self.heap.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::null::{NullBackend, NullDevice};

    fn heap(static_size: u32, transient_size: u32) -> GpuDescriptorHeap<NullBackend> {
        let device = NullDevice::new();
        GpuDescriptorHeap::new(&device, DescriptorHeapType::CbvSrvUav, static_size, transient_size).unwrap()
    }

    #[test]
    fn oversized_heap_is_rejected() {
        let device = NullDevice::new();
        let heap = GpuDescriptorHeap::<NullBackend>::new(&device, DescriptorHeapType::Sampler, u32::MAX, 1);
        assert!(matches!(heap, Err(GPUError::Unsupported(_))));
    }

    #[test]
    fn transient_ranges_do_not_overlap_until_wrap() {
        let h = heap(0, 16);
        let a = h.allocate_transient(5).unwrap();
        let b = h.allocate_transient(5).unwrap();
        let c = h.allocate_transient(6).unwrap();
        assert_eq!((a.first, b.first, c.first), (0, 5, 10));
        assert_eq!(b.cpu.0 - a.cpu.0, 5 * h.increment() as u64);
        assert_eq!(b.gpu.0 - a.gpu.0, 5 * h.increment() as u64);
        // Capacity exhausted, the next range reuses the oldest slots.
        let d = h.allocate_transient(3).unwrap();
        assert_eq!(d.first, a.first);
    }

    #[test]
    fn transient_range_never_straddles_the_end() {
        let h = heap(4, 10);
        let a = h.allocate_transient(7).unwrap();
        assert_eq!(a.first, 4);
        let b = h.allocate_transient(4).unwrap();
        assert_eq!(b.first, 4);
        let c = h.allocate_transient(6).unwrap();
        assert_eq!(c.first, 8);
    }

    #[test]
    fn transient_rejects_oversized_requests() {
        let h = heap(0, 8);
        assert!(h.allocate_transient(9).is_none());
        assert!(h.allocate_transient(0).is_none());
        assert!(h.allocate_transient(8).is_some());
    }

    #[test]
    fn static_region_first_fit_and_merge() {
        let h = heap(8, 8);
        let a = h.allocate_static(3).unwrap();
        let b = h.allocate_static(3).unwrap();
        let c = h.allocate_static(2).unwrap();
        assert_eq!((a.first, b.first, c.first), (0, 3, 6));
        assert!(h.allocate_static(1).is_none());
        h.free_static(&a);
        h.free_static(&b);
        let d = h.allocate_static(6).unwrap();
        assert_eq!(d.first, 0);
        assert!(h.contains_gpu(d.gpu));
    }

    #[test]
    fn cpu_pool_recycles() {
        let device = NullDevice::new();
        let pool = CpuDescriptorPool::<NullBackend>::new(&device, DescriptorHeapType::Rtv, 2).unwrap();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_ne!(a, b);
        assert!(pool.allocate().is_err());
        pool.free(a);
        assert_eq!(pool.allocate().unwrap(), a);
    }
}
