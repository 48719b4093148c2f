use crate::memory::{ ref_count::{ OwnerKey, RefCountBase }, shared_ptr::SharedPtr };
use std::{
    fmt::Debug,
    marker::PhantomData,
    mem,
    ptr::NonNull
};

// std::weak_ptr
/// A non-owning observer of a `SharedPtr`'s resource.
///
/// Keeps the control block alive but not the resource. Use `lock` to get a `SharedPtr` back
/// while the resource still exists.
pub struct WeakPtr<T: ?Sized> {
    _ptr: Option<NonNull<T>>,
    // Some exactly when _ptr is Some
    _rep: Option<NonNull<RefCountBase>>,
    _marker: PhantomData<T>
}

unsafe impl<T: ?Sized + Send + Sync> Send for WeakPtr<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for WeakPtr<T> {}

impl<T: ?Sized> WeakPtr<T> {
    /// An empty handle that never locks.
    pub const fn new() -> Self {
        Self { _ptr: None, _rep: None, _marker: PhantomData }
    }

    // caller hands over one weak reference on rep
    pub(crate) unsafe fn from_inner(ptr: NonNull<T>, rep: NonNull<RefCountBase>) -> Self {
        Self { _ptr: Some(ptr), _rep: Some(rep), _marker: PhantomData }
    }

    fn get_rep(&self) -> Option<&RefCountBase> {
        self._rep.map(|r| unsafe { &*r.as_ptr() })
    }

    /// Get a new `SharedPtr` if the resource is still alive, otherwise `None`.
    pub fn lock(&self) -> Option<SharedPtr<T>> {
        match (self._ptr, self._rep) {
            (Some(ptr), Some(rep)) if unsafe { rep.as_ref() }.try_upgrade() => {
                Some(unsafe { SharedPtr::from_inner(ptr, rep) })
            },
            _ => None
        }
    }

    pub fn expired(&self) -> bool { self.strong_count() == 0 }

    pub fn is_empty(&self) -> bool { self._rep.is_none() }

    pub fn strong_count(&self) -> usize { self.get_rep().map_or(0, |r| r.strong_count()) }
    pub fn weak_count(&self) -> usize { self.get_rep().map_or(0, |r| r.weak_count()) }

    /// Copy-assignment, incrementing the new block before releasing the old one.
    pub fn assign(&mut self, rhs: &Self) {
        if let Some(rep) = rhs.get_rep() {
            rep.inc_weak();
        }
        let old = mem::replace(self, Self { _ptr: rhs._ptr, _rep: rhs._rep, _marker: PhantomData });
        drop(old);
    }

    pub fn reset(&mut self) { drop(mem::replace(self, Self::new())) }

    /// True if `other` (a `SharedPtr` or a `WeakPtr`) refers to the same control block. Still
    /// answers after the resource has expired.
    pub fn owner_eq<O: OwnerKey + ?Sized>(&self, other: &O) -> bool { self._rep == other.owner_key() }

    /// Ordering by control block, see `SharedPtr::owner_before`.
    pub fn owner_before<O: OwnerKey + ?Sized>(&self, other: &O) -> bool { self._rep < other.owner_key() }
}

impl<T: ?Sized> OwnerKey for WeakPtr<T> {
    fn owner_key(&self) -> Option<NonNull<RefCountBase>> { self._rep }
}

impl<T: ?Sized> Clone for WeakPtr<T> {
    fn clone(&self) -> Self {
        if let Some(rep) = self.get_rep() {
            rep.inc_weak();
        }
        Self { _ptr: self._ptr, _rep: self._rep, _marker: PhantomData }
    }

    fn clone_from(&mut self, source: &Self) { self.assign(source) }
}

impl<T: ?Sized> Drop for WeakPtr<T> {
    fn drop(&mut self) {
        if let Some(rep) = self._rep {
            unsafe { RefCountBase::release_weak(rep) }
        }
    }
}

impl<T: ?Sized> Default for WeakPtr<T> {
    fn default() -> Self { Self::new() }
}

impl<T: ?Sized> From<&SharedPtr<T>> for WeakPtr<T> {
    fn from(value: &SharedPtr<T>) -> Self { value.downgrade() }
}

impl<T: ?Sized> Debug for WeakPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WeakPtr {{ expired: {}, strong: {}, weak: {} }}",
            self.expired(), self.strong_count(), self.weak_count())
    }
}
