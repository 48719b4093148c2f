// https://en.cppreference.com/w/cpp/memory/unique_ptr

use crate::memory::deleter::{ DefaultDelete, DefaultDeleteArray, Deleter };
use std::{
    fmt::{ Debug, Display },
    marker::PhantomData,
    mem,
    ops::{ Deref, DerefMut },
    ptr::NonNull
};

// std::unique_ptr
/// Sole owner of a resource, released by `D` when dropped.
///
/// There is no control block and no count. `UniquePtr` can't be cloned; ownership only moves.
/// An empty `UniquePtr` holds neither a pointer nor a deleter.
pub struct UniquePtr<T, D = DefaultDelete<T>>
where T: ?Sized,
      D: Deleter<T>
{
    // std::_Compressed_pair
    _pair: Option<(NonNull<T>, D)>,
    _marker: PhantomData<T>
}

/// `std::unique_ptr<T[]>`
pub type UniqueArray<T> = UniquePtr<[T], DefaultDeleteArray<T>>;

unsafe impl<T: ?Sized + Send, D: Deleter<T> + Send> Send for UniquePtr<T, D> {}
unsafe impl<T: ?Sized + Sync, D: Deleter<T> + Sync> Sync for UniquePtr<T, D> {}

impl<T> UniquePtr<T> {
    /// `std::make_unique`
    pub fn new(value: T) -> Self { Self::from_box(Box::new(value)) }

    pub fn from_box(value: Box<T>) -> Self {
        unsafe { Self::from_raw(NonNull::from(Box::leak(value)), DefaultDelete::new()) }
    }
}

impl<T> UniqueArray<T> {
    pub fn from_boxed_slice(value: Box<[T]>) -> Self {
        unsafe { Self::from_raw(NonNull::from(Box::leak(value)), DefaultDeleteArray::new()) }
    }
}

impl<T, D> UniquePtr<T, D>
where T: ?Sized,
      D: Deleter<T>
{
    pub const fn empty() -> Self {
        Self { _pair: None, _marker: PhantomData }
    }

    /// Take ownership of `ptr`, to be released by `deleter`.
    ///
    /// # Safety
    /// `deleter` must be a correct way of releasing `ptr` and nothing else may own `ptr`.
    pub unsafe fn from_raw(ptr: NonNull<T>, deleter: D) -> Self {
        Self { _pair: Some((ptr, deleter)), _marker: PhantomData }
    }

    pub fn get(&self) -> Option<&T> {
        self._pair.as_ref().map(|(p, _)| unsafe { &*p.as_ptr() })
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self._pair.as_mut().map(|(p, _)| unsafe { &mut *p.as_ptr() })
    }

    pub fn as_ptr(&self) -> Option<NonNull<T>> { self._pair.as_ref().map(|(p, _)| *p) }

    pub fn deleter(&self) -> Option<&D> { self._pair.as_ref().map(|(_, d)| d) }

    pub fn is_empty(&self) -> bool { self._pair.is_none() }

    /// Give up ownership without running the deleter. The caller becomes responsible for the
    /// returned resource; the deleter is dropped unused.
    pub fn release(&mut self) -> Option<NonNull<T>> {
        self._pair.take().map(|(p, _)| p)
    }

    /// Give up ownership, handing back both the resource and its deleter.
    pub fn into_raw_parts(mut self) -> Option<(NonNull<T>, D)> { self._pair.take() }

    /// Release the current resource, if any, and become empty.
    pub fn reset(&mut self) { drop(self.take()) }

    /// Move-assignment source: moves the contents out and leaves this handle empty.
    pub fn take(&mut self) -> Self { mem::replace(self, Self::empty()) }

    pub fn swap(&mut self, other: &mut Self) { mem::swap(self, other) }
}

impl<T, D> Drop for UniquePtr<T, D>
where T: ?Sized,
      D: Deleter<T>
{
    fn drop(&mut self) {
        if let Some((ptr, deleter)) = self._pair.take() {
            unsafe { deleter.delete(ptr) }
        }
    }
}

impl<T, D> Default for UniquePtr<T, D>
where T: ?Sized,
      D: Deleter<T>
{
    fn default() -> Self { Self::empty() }
}

impl<T, D> Deref for UniquePtr<T, D>
where T: ?Sized,
      D: Deleter<T>
{
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self.get() {
            Some(v) => v,
            None => panic!("Dereferenced an empty UniquePtr<{}>", std::any::type_name::<T>())
        }
    }
}

impl<T, D> DerefMut for UniquePtr<T, D>
where T: ?Sized,
      D: Deleter<T>
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.get_mut() {
            Some(v) => v,
            None => panic!("Dereferenced an empty UniquePtr<{}>", std::any::type_name::<T>())
        }
    }
}

impl<T> From<Box<T>> for UniquePtr<T> {
    fn from(value: Box<T>) -> Self { Self::from_box(value) }
}

impl<T, D> Debug for UniquePtr<T, D>
where T: Debug + ?Sized,
      D: Deleter<T>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UniquePtr {{ data: {:?} }}", self.get())
    }
}

impl<T, D> Display for UniquePtr<T, D>
where T: Display + ?Sized,
      D: Deleter<T>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(v) => write!(f, "{}", v),
            None => write!(f, "None")
        }
    }
}
