use std::hash::Hash;
use std::marker::PhantomData;

/// Typed, copyable reference to a wrapper object.
///
/// The raw value is the address of the wrapper inside its allocator slot. It
/// is only dereferenced after the owning allocator confirms it with
/// `contains` and the slot still carries `generation`, so a handle outlived
/// by its object resolves to nothing. A raw value of zero is the null handle.
pub struct Handle<T> {
    raw: u64,
    generation: u32,
    phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub const NULL: Self = Self::from_raw(0);

    pub const fn new(raw: u64, generation: u32) -> Self {
        Self {
            raw,
            generation,
            phantom: PhantomData,
        }
    }

    /// Handle without a generation. It never resolves to a wrapper, so this
    /// is only useful for null handles and opaque recording.
    pub const fn from_raw(raw: u64) -> Self {
        Self::new(raw, 0)
    }

    pub const fn raw(&self) -> u64 {
        self.raw
    }

    pub const fn generation(&self) -> u32 {
        self.generation
    }

    pub const fn is_null(&self) -> bool {
        self.raw == 0
    }

    pub fn valid(&self) -> bool {
        !self.is_null()
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = std::any::type_name::<T>();
        let short = name.rsplit("::").next().unwrap_or(name);
        write!(f, "Handle<{}>({:#x}#{})", short, self.raw, self.generation)
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::NULL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;

    #[test]
    fn null_handle() {
        let h = Handle::<Marker>::default();
        assert!(h.is_null());
        assert!(!h.valid());
        assert_eq!(h, Handle::NULL);
    }

    #[test]
    fn raw_round_trip() {
        let h = Handle::<Marker>::from_raw(0x1234);
        let copy = h;
        assert_eq!(copy.raw(), 0x1234);
        assert_eq!(format!("{:?}", h), "Handle<Marker>(0x1234#0)");
    }

    #[test]
    fn generation_is_part_of_identity() {
        let a = Handle::<Marker>::new(0x40, 1);
        let b = Handle::<Marker>::new(0x40, 3);
        assert_ne!(a, b);
        assert_eq!(a.raw(), b.raw());
        assert_eq!(b.generation(), 3);
    }
}
