use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::utils::{Handle, SlotAllocator};
use crate::Result;

//===----------------------------------------------------------------------===//
// Identifiers
//===----------------------------------------------------------------------===//

/// 128-bit identifier used for interface ids and metadata keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid(pub u128);

impl Guid {
    /// Builds a GUID from its canonical `{d1-d2-d3-d4}` fields.
    pub const fn from_fields(d1: u32, d2: u16, d3: u16, d4: [u8; 8]) -> Self {
        let mut value = (d1 as u128) << 96 | (d2 as u128) << 80 | (d3 as u128) << 64;
        let mut i = 0;
        while i < 8 {
            value |= (d4[i] as u128) << (56 - i * 8);
            i += 1;
        }
        Self(value)
    }

    pub const fn data1(&self) -> u32 {
        (self.0 >> 96) as u32
    }
}

//===----------------------------------------------------------------------===//
// Metadata
//===----------------------------------------------------------------------===//

/// Key/value store attached to every wrapper object.
///
/// Not internally synchronized: the accessors are `unsafe` and callers must
/// serialize access to the same map.
#[derive(Default)]
pub struct PrivateDataMap {
    entries: UnsafeCell<Vec<(Guid, u64)>>,
}

// Access goes through the unsafe accessors below.
unsafe impl Sync for PrivateDataMap {}

impl PrivateDataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored for `key`, or 0 when absent.
    ///
    /// # Safety
    /// No other thread may call [`PrivateDataMap::set`] on this map
    /// concurrently.
    pub unsafe fn get(&self, key: &Guid) -> u64 {
        (*self.entries.get())
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
            .unwrap_or(0)
    }

    /// Inserts or updates `key`. A value of 0 removes it.
    ///
    /// # Safety
    /// No other thread may access this map concurrently.
    pub unsafe fn set(&self, key: Guid, value: u64) {
        let entries = &mut *self.entries.get();
        let existing = entries.iter().position(|(k, _)| *k == key);
        match (existing, value) {
            (Some(i), 0) => {
                entries.swap_remove(i);
            }
            (Some(i), v) => entries[i].1 = v,
            (None, 0) => {}
            (None, v) => entries.push((key, v)),
        }
    }

    /// # Safety
    /// No other thread may call [`PrivateDataMap::set`] concurrently.
    pub unsafe fn len(&self) -> usize {
        (*self.entries.get()).len()
    }

    pub fn is_empty_mut(&mut self) -> bool {
        self.entries.get_mut().is_empty()
    }

    pub fn get_mut(&mut self, key: &Guid) -> u64 {
        // SAFETY: exclusive access through `&mut self`.
        unsafe { self.get(key) }
    }

    pub fn set_mut(&mut self, key: Guid, value: u64) {
        // SAFETY: exclusive access through `&mut self`.
        unsafe { self.set(key, value) }
    }
}

//===----------------------------------------------------------------------===//
// Native objects
//===----------------------------------------------------------------------===//

/// A native API object as seen by its wrapper.
///
/// Implementations for objects without native reference counting (descriptor
/// handles, CPU-side tables) keep the default `add_ref`/`release`.
pub trait NativeObject: Send + Sync + 'static {
    /// Pointer-sized value passed to native calls.
    fn raw(&self) -> u64;

    /// Returns the new native count.
    fn add_ref(&self) -> u32 {
        1
    }

    /// Returns the remaining native count.
    fn release(&self) -> u32 {
        1
    }

    /// Probes whether the native object implements interface `iid`.
    fn query_interface(&self, _iid: &Guid) -> bool {
        false
    }
}

/// One interface a wrapper may expose, with its position in its family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capability {
    pub iid: Guid,
    pub version: u32,
}

impl Capability {
    pub const fn new(iid: Guid, version: u32) -> Self {
        Self { iid, version }
    }
}

//===----------------------------------------------------------------------===//
// Wrapper
//===----------------------------------------------------------------------===//

pub type ObjectAllocator<N> = dyn SlotAllocator<ApiObject<N>>;

/// Addressable, annotatable proxy around exactly one native object.
///
/// Lives in a slot of its kind's [`BlockAllocator`](crate::utils::BlockAllocator)
/// and is destroyed explicitly through [`ApiObject::release`].
pub struct ApiObject<N: NativeObject> {
    native: N,
    ref_count: AtomicU32,
    interface_version: AtomicU32,
    capabilities: SmallVec<[Capability; 4]>,
    private_data: PrivateDataMap,
    allocator: Arc<ObjectAllocator<N>>,
}

impl<N: NativeObject> ApiObject<N> {
    /// Wraps `native`, taking over one of its references.
    ///
    /// On failure the adopted native reference is released again.
    pub fn create(
        allocator: &Arc<ObjectAllocator<N>>,
        native: N,
        capabilities: &[Capability],
        interface_version: u32,
    ) -> Result<NonNull<Self>> {
        let slot = match allocator.allocate() {
            Ok(slot) => slot,
            Err(err) => {
                native.release();
                return Err(err);
            }
        };
        // SAFETY: the slot is freshly allocated and sized for Self.
        unsafe {
            slot.as_ptr().write(Self {
                native,
                ref_count: AtomicU32::new(1),
                interface_version: AtomicU32::new(interface_version),
                capabilities: capabilities.iter().copied().collect(),
                private_data: PrivateDataMap::new(),
                allocator: allocator.clone(),
            });
        }
        Ok(slot)
    }

    /// Looks up the wrapper `handle` points at.
    ///
    /// Returns `None` for null handles, for addresses that are not slots of
    /// `allocator` and for handles whose object has been destroyed since,
    /// even when the slot now holds a newer object. Destroying an object
    /// while another thread still uses its handle remains a caller error.
    pub fn resolve<T>(allocator: &ObjectAllocator<N>, handle: Handle<T>) -> Option<&Self> {
        let ptr = handle.raw() as usize as *const Self;
        if handle.is_null() || handle.generation() & 1 == 0 {
            return None;
        }
        if allocator.generation(ptr) != Some(handle.generation()) {
            return None;
        }
        // SAFETY: the slot is ours and still holds the object the handle was
        // issued for.
        Some(unsafe { &*ptr })
    }

    /// Raw native value, the only thing native calls should receive.
    pub fn get_native(&self) -> u64 {
        self.native.raw()
    }

    pub fn native(&self) -> &N {
        &self.native
    }

    pub fn handle<T>(&self) -> Handle<T> {
        let ptr = self as *const Self;
        let generation = self.allocator.generation(ptr).unwrap_or(0);
        Handle::new(ptr as usize as u64, generation)
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn interface_version(&self) -> u32 {
        self.interface_version.load(Ordering::Acquire)
    }

    pub fn add_ref(&self) -> u32 {
        self.native.add_ref();
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops one reference. The native object is released first; once the
    /// local count reaches zero the wrapper is destroyed and its slot freed.
    ///
    /// # Safety
    /// `this` must point at a live wrapper. When this returns 0 the pointer
    /// dangles.
    pub unsafe fn release(this: NonNull<Self>) -> u32 {
        let obj = this.as_ref();
        obj.native.release();
        let remaining = obj.ref_count.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            let allocator = obj.allocator.clone();
            ptr::drop_in_place(this.as_ptr());
            allocator.free(this);
        }
        remaining
    }

    /// `true` when `iid` is one of this object's capabilities. A capability
    /// newer than the current interface version is probed on the native
    /// object and, when supported, the version is raised in place.
    pub fn check_and_upgrade_interface(&self, iid: &Guid) -> bool {
        let Some(capability) = self.capabilities.iter().find(|c| c.iid == *iid) else {
            return false;
        };
        if capability.version <= self.interface_version() {
            return true;
        }
        if !self.native.query_interface(iid) {
            return false;
        }
        let previous = self
            .interface_version
            .fetch_max(capability.version, Ordering::AcqRel);
        if previous < capability.version {
            log::debug!(
                "upgraded {:#x} from interface version {} to {}",
                self.get_native(),
                previous,
                capability.version
            );
        }
        true
    }

    /// # Safety
    /// See [`PrivateDataMap::get`].
    pub unsafe fn get_private_data(&self, key: &Guid) -> u64 {
        self.private_data.get(key)
    }

    /// # Safety
    /// See [`PrivateDataMap::set`].
    pub unsafe fn set_private_data(&self, key: Guid, value: u64) {
        self.private_data.set(key, value)
    }

    /// # Safety
    /// See [`PrivateDataMap::len`].
    pub unsafe fn private_data_len(&self) -> usize {
        self.private_data.len()
    }
}

impl<N: NativeObject> Drop for ApiObject<N> {
    fn drop(&mut self) {
        if !self.private_data.is_empty_mut() {
            log::error!(
                "object {:#x} destroyed with metadata still attached",
                self.native.raw()
            );
            debug_assert!(false, "metadata map must be empty at destruction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::BlockAllocator;
    use std::sync::atomic::AtomicBool;

    struct Counted {
        refs: Arc<AtomicU32>,
        upgradable: Arc<AtomicBool>,
    }

    const IID_V0: Guid = Guid::from_fields(0xdb6f6ddb, 0xac77, 0x4e88, [0x82, 0x53, 0x81, 0x9d, 0xf9, 0xbb, 0xf1, 0x40]);
    const IID_V1: Guid = Guid::from_fields(0xa04bfb29, 0x08ef, 0x43d6, [0xa4, 0x9c, 0xa9, 0xbd, 0xbd, 0xcb, 0xe6, 0x86]);

    impl NativeObject for Counted {
        fn raw(&self) -> u64 {
            0xd3d
        }
        fn add_ref(&self) -> u32 {
            self.refs.fetch_add(1, Ordering::AcqRel) + 1
        }
        fn release(&self) -> u32 {
            self.refs.fetch_sub(1, Ordering::AcqRel) - 1
        }
        fn query_interface(&self, iid: &Guid) -> bool {
            *iid == IID_V1 && self.upgradable.load(Ordering::Acquire)
        }
    }

    fn allocator() -> Arc<ObjectAllocator<Counted>> {
        Arc::new(BlockAllocator::<ApiObject<Counted>, 8>::new())
    }

    fn counted(upgradable: bool) -> (Counted, Arc<AtomicU32>) {
        let refs = Arc::new(AtomicU32::new(1));
        (
            Counted {
                refs: refs.clone(),
                upgradable: Arc::new(AtomicBool::new(upgradable)),
            },
            refs,
        )
    }

    #[test]
    fn refcount_forwards_to_native() {
        let alloc = allocator();
        let (native, refs) = counted(false);
        let obj = ApiObject::create(&alloc, native, &[], 0).unwrap();
        let o = unsafe { obj.as_ref() };
        assert_eq!(o.add_ref(), 2);
        assert_eq!(refs.load(Ordering::Acquire), 2);
        assert_eq!(unsafe { ApiObject::release(obj) }, 1);
        assert_eq!(refs.load(Ordering::Acquire), 1);
        assert!(alloc.contains(obj.as_ptr()));
        assert_eq!(unsafe { ApiObject::release(obj) }, 0);
        assert_eq!(refs.load(Ordering::Acquire), 0);
        // The slot is handed out again.
        let (native, _) = counted(false);
        let again = ApiObject::create(&alloc, native, &[], 0).unwrap();
        assert_eq!(again, obj);
        unsafe { ApiObject::release(again) };
    }

    #[test]
    fn metadata_zero_removes() {
        let alloc = allocator();
        let (native, _) = counted(false);
        let obj = ApiObject::create(&alloc, native, &[], 0).unwrap();
        let o = unsafe { obj.as_ref() };
        let key = Guid(0x1234_5678_9abc_def0_0fed_cba9_8765_4321);
        let other = Guid(key.0 ^ 1);
        unsafe {
            assert_eq!(o.get_private_data(&key), 0);
            o.set_private_data(key, 7);
            o.set_private_data(other, 9);
            o.set_private_data(key, 8);
            assert_eq!(o.get_private_data(&key), 8);
            assert_eq!(o.private_data_len(), 2);
            o.set_private_data(key, 0);
            assert_eq!(o.get_private_data(&key), 0);
            assert_eq!(o.get_private_data(&other), 9);
            assert_eq!(o.private_data_len(), 1);
            o.set_private_data(other, 0);
            ApiObject::release(obj);
        }
    }

    #[test]
    fn interface_upgrade_queries_native() {
        let alloc = allocator();
        let caps = [Capability::new(IID_V0, 0), Capability::new(IID_V1, 1)];

        let (native, _) = counted(false);
        let old = ApiObject::create(&alloc, native, &caps, 0).unwrap();
        let o = unsafe { old.as_ref() };
        assert!(o.check_and_upgrade_interface(&IID_V0));
        assert!(!o.check_and_upgrade_interface(&IID_V1));
        assert_eq!(o.interface_version(), 0);
        assert!(!o.check_and_upgrade_interface(&Guid(42)));

        let (native, _) = counted(true);
        let new = ApiObject::create(&alloc, native, &caps, 0).unwrap();
        let n = unsafe { new.as_ref() };
        assert!(n.check_and_upgrade_interface(&IID_V1));
        assert_eq!(n.interface_version(), 1);
        assert!(n.check_and_upgrade_interface(&IID_V0));

        unsafe {
            ApiObject::release(old);
            ApiObject::release(new);
        }
    }

    struct Marker;

    #[test]
    fn resolve_checks_ownership() {
        let alloc = allocator();
        let (native, _) = counted(false);
        let obj = ApiObject::create(&alloc, native, &[], 0).unwrap();
        let handle = unsafe { obj.as_ref() }.handle::<Marker>();
        let found = ApiObject::resolve(&*alloc, handle).unwrap();
        assert_eq!(found.get_native(), 0xd3d);
        assert!(ApiObject::resolve(&*alloc, Handle::<Marker>::NULL).is_none());
        let shifted = Handle::<Marker>::new(handle.raw() + 1, handle.generation());
        assert!(ApiObject::resolve(&*alloc, shifted).is_none());
        // Without the generation the address alone is not enough.
        assert!(ApiObject::resolve(&*alloc, Handle::<Marker>::from_raw(handle.raw())).is_none());
        unsafe { ApiObject::release(obj) };
    }

    #[test]
    fn stale_handle_does_not_reach_reused_slot() {
        let alloc = allocator();
        let (native, _) = counted(false);
        let first = ApiObject::create(&alloc, native, &[], 0).unwrap();
        let stale = unsafe { first.as_ref() }.handle::<Marker>();
        unsafe { ApiObject::release(first) };
        assert!(ApiObject::resolve(&*alloc, stale).is_none());

        let (native, _) = counted(false);
        let second = ApiObject::create(&alloc, native, &[], 0).unwrap();
        assert_eq!(second, first);
        let fresh = unsafe { second.as_ref() }.handle::<Marker>();
        assert_ne!(fresh, stale);
        assert!(ApiObject::resolve(&*alloc, stale).is_none());
        assert!(ApiObject::resolve(&*alloc, fresh).is_some());
        unsafe { ApiObject::release(second) };
    }
}
