use crate::{
    error::AllocationError,
    memory::{
        deleter::{ DefaultDelete, DefaultDeleteArray, Deleter },
        ref_count::{ OwnerKey, RefCountBase, RefCountObject, RefCountResource },
        unique_ptr::UniquePtr,
        weak_ptr::WeakPtr
    }
};
use allocator_api2::alloc::{ Allocator, Global };
use std::{
    alloc::handle_alloc_error,
    fmt::{ Debug, Display },
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::NonNull
};

// std::shared_ptr
/// A shared owning handle to a resource tracked by a control block.
///
/// Cloning adds a strong reference; dropping removes one. The resource is released by the
/// block's deleter exactly once, when the last `SharedPtr` goes away, and the block is freed
/// once no `WeakPtr` refers to it either. A `SharedPtr` may be empty, in which case it owns
/// nothing.
pub struct SharedPtr<T: ?Sized> {
    _ptr: Option<NonNull<T>>,
    // Some exactly when _ptr is Some
    _rep: Option<NonNull<RefCountBase>>,
    _marker: PhantomData<T>
}

unsafe impl<T: ?Sized + Send + Sync> Send for SharedPtr<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for SharedPtr<T> {}

impl<T> SharedPtr<T> {
    /// Move `value` into a new control block, allocated together with the value. The
    /// equivalent of `std::make_shared`.
    pub fn new(value: T) -> Self {
        match Self::try_new_in(value, Global) {
            Ok(p) => p,
            Err(e) => handle_alloc_error(e.layout())
        }
    }

    pub fn try_new(value: T) -> Result<Self, AllocationError> { Self::try_new_in(value, Global) }

    /// `std::allocate_shared`: like `try_new`, but the control block comes from `alloc`.
    pub fn try_new_in<A>(value: T, alloc: A) -> Result<Self, AllocationError>
    where A: Allocator + Send + 'static
    {
        let (rep, ptr) = RefCountObject::allocate(value, alloc)?;
        Ok(unsafe { Self::from_inner(ptr, rep) })
    }
}

// the block stores its deleter type-erased, so DefaultDelete<T> has to be 'static
impl<T: 'static> SharedPtr<T> {
    /// Take ownership of a boxed value. The box is released with `DefaultDelete`.
    pub fn from_box(value: Box<T>) -> Result<Self, AllocationError> {
        let ptr = NonNull::from(Box::leak(value));
        unsafe { Self::from_raw_with(ptr, DefaultDelete::new()) }
    }

    /// Take ownership of a single value that was allocated with `Box`.
    ///
    /// # Safety
    /// `ptr` must come from `Box::into_raw` (or equivalent) and must not be owned by anything
    /// else. In particular two `SharedPtr`s must never be built from the same pointer: each
    /// would get its own control block and the value would be released twice. Pointers to
    /// arrays need `SharedPtr::from_raw_slice` instead.
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Result<Self, AllocationError> {
        Self::from_raw_with(ptr, DefaultDelete::new())
    }
}

impl<T: 'static> SharedPtr<[T]> {
    /// Take ownership of a boxed slice. Every element is dropped on release.
    pub fn from_boxed_slice(value: Box<[T]>) -> Result<Self, AllocationError> {
        let ptr = NonNull::from(Box::leak(value));
        unsafe { Self::from_raw_with(ptr, DefaultDeleteArray::new()) }
    }

    /// Take ownership of an array that was allocated as a `Box<[T]>`.
    ///
    /// # Safety
    /// Same as `SharedPtr::from_raw`, for a pointer obtained from a boxed slice.
    pub unsafe fn from_raw_slice(ptr: NonNull<[T]>) -> Result<Self, AllocationError> {
        Self::from_raw_with(ptr, DefaultDeleteArray::new())
    }
}

impl<T: ?Sized> SharedPtr<T> {
    /// An empty handle, owning nothing.
    pub const fn empty() -> Self {
        Self { _ptr: None, _rep: None, _marker: PhantomData }
    }

    /// Take ownership of `ptr`, to be released by `deleter`. If the control block can't be
    /// allocated, `deleter` runs before the error is returned.
    ///
    /// # Safety
    /// `deleter` must be a correct way of releasing `ptr` and nothing else may own `ptr`. Two
    /// independent `SharedPtr`s over one resource lead to a double release.
    pub unsafe fn from_raw_with<D>(ptr: NonNull<T>, deleter: D) -> Result<Self, AllocationError>
    where D: Deleter<T> + Send + 'static
    {
        Self::from_raw_with_in(ptr, deleter, Global)
    }

    /// # Safety
    /// See `SharedPtr::from_raw_with`.
    pub unsafe fn from_raw_with_in<D, A>(ptr: NonNull<T>, deleter: D, alloc: A) -> Result<Self, AllocationError>
    where D: Deleter<T> + Send + 'static,
          A: Allocator + Send + 'static
    {
        let rep = RefCountResource::allocate(ptr, deleter, alloc)?;
        Ok(Self::from_inner(ptr, rep))
    }

    /// Move ownership out of a `UniquePtr`, keeping its deleter. An empty `UniquePtr` gives an
    /// empty `SharedPtr`.
    pub fn from_unique<D>(unique: UniquePtr<T, D>) -> Result<Self, AllocationError>
    where D: Deleter<T> + Send + 'static
    {
        match unique.into_raw_parts() {
            Some((ptr, deleter)) => unsafe { Self::from_raw_with(ptr, deleter) },
            None => Ok(Self::empty())
        }
    }

    // caller hands over one strong reference on rep
    pub(crate) unsafe fn from_inner(ptr: NonNull<T>, rep: NonNull<RefCountBase>) -> Self {
        Self { _ptr: Some(ptr), _rep: Some(rep), _marker: PhantomData }
    }

    pub(crate) fn get_rep(&self) -> Option<&RefCountBase> {
        self._rep.map(|r| unsafe { &*r.as_ptr() })
    }

    pub fn get(&self) -> Option<&T> { self._ptr.map(|p| unsafe { &*p.as_ptr() }) }

    /// Mutable access, only while this is the sole owner and no `WeakPtr` could upgrade.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        match (self._ptr, self.get_rep()) {
            (Some(p), Some(rep)) if rep.is_exclusive() => Some(unsafe { &mut *p.as_ptr() }),
            _ => None
        }
    }

    /// The managed pointer, without taking ownership. Valid for as long as some `SharedPtr` to
    /// the same block is alive.
    pub fn as_ptr(&self) -> Option<NonNull<T>> { self._ptr }

    pub fn is_empty(&self) -> bool { self._rep.is_none() }

    pub fn strong_count(&self) -> usize { self.get_rep().map_or(0, |r| r.strong_count()) }
    pub fn weak_count(&self) -> usize { self.get_rep().map_or(0, |r| r.weak_count()) }

    pub fn unique(&self) -> bool { self.strong_count() == 1 }

    pub fn downgrade(&self) -> WeakPtr<T> {
        match (self._ptr, self._rep) {
            (Some(ptr), Some(rep)) => unsafe {
                rep.as_ref().inc_weak();
                WeakPtr::from_inner(ptr, rep)
            },
            _ => WeakPtr::new()
        }
    }

    /// Copy-assignment. The new block gains its reference before the old one loses ours, so
    /// assigning from a handle that shares this block never lets its count touch zero.
    pub fn assign(&mut self, rhs: &Self) {
        if let Some(rep) = rhs.get_rep() {
            rep.inc_strong();
        }
        let old = mem::replace(self, Self { _ptr: rhs._ptr, _rep: rhs._rep, _marker: PhantomData });
        drop(old);
    }

    /// Drop our reference and become empty.
    pub fn reset(&mut self) { drop(mem::replace(self, Self::empty())) }

    pub fn swap(&mut self, other: &mut Self) { mem::swap(self, other) }

    /// True if `other` (a `SharedPtr` or a `WeakPtr`) shares this control block, or if both
    /// are empty.
    pub fn owner_eq<O: OwnerKey + ?Sized>(&self, other: &O) -> bool { self._rep == other.owner_key() }

    /// Ordering by control block, the equivalent of `owner_before`. Consistent with
    /// `owner_eq` and stable for as long as the blocks are alive.
    pub fn owner_before<O: OwnerKey + ?Sized>(&self, other: &O) -> bool { self._rep < other.owner_key() }

    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this._ptr.map(|p| p.as_ptr() as *const ()) == other._ptr.map(|p| p.as_ptr() as *const ())
    }
}

impl<T: ?Sized> OwnerKey for SharedPtr<T> {
    fn owner_key(&self) -> Option<NonNull<RefCountBase>> { self._rep }
}

impl<T: ?Sized> Clone for SharedPtr<T> {
    fn clone(&self) -> Self {
        if let Some(rep) = self.get_rep() {
            rep.inc_strong();
        }
        Self { _ptr: self._ptr, _rep: self._rep, _marker: PhantomData }
    }

    fn clone_from(&mut self, source: &Self) { self.assign(source) }
}

impl<T: ?Sized> Drop for SharedPtr<T> {
    fn drop(&mut self) {
        if let Some(rep) = self._rep {
            unsafe { RefCountBase::release_strong(rep) }
        }
    }
}

impl<T: ?Sized> Default for SharedPtr<T> {
    fn default() -> Self { Self::empty() }
}

impl<T: ?Sized> Deref for SharedPtr<T> {
    type Target = T;

    /// # Panics
    /// If the handle is empty.
    fn deref(&self) -> &Self::Target {
        match self.get() {
            Some(v) => v,
            None => panic!("Dereferenced an empty SharedPtr<{}>", std::any::type_name::<T>())
        }
    }
}

impl<T: 'static> From<Box<T>> for SharedPtr<T> {
    fn from(value: Box<T>) -> Self {
        match Self::from_box(value) {
            Ok(p) => p,
            Err(e) => handle_alloc_error(e.layout())
        }
    }
}

impl<T> Debug for SharedPtr<T>
where T: Debug + ?Sized
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedPtr {{ data: {:?}, strong: {}, weak: {} }}",
            self.get(), self.strong_count(), self.weak_count())
    }
}

impl<T> Display for SharedPtr<T>
where T: Display + ?Sized
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(v) => write!(f, "{}", v),
            None => write!(f, "None")
        }
    }
}
