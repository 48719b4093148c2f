// https://en.cppreference.com/w/cpp/memory/default_delete
// Release operations stored by control blocks and UniquePtr

use std::{
    fmt::Debug,
    marker::PhantomData,
    ptr::NonNull
};

/// A release operation for a resource of type `T`.
///
/// Taken by value, so a deleter can run at most once. Any `FnOnce(NonNull<T>)` closure is a
/// deleter.
pub trait Deleter<T: ?Sized> {
    /// Reclaim the resource behind `ptr`.
    ///
    /// # Safety
    /// `ptr` must be the resource this deleter was paired with when ownership was taken, and it
    /// must not be used again afterwards.
    unsafe fn delete(self, ptr: NonNull<T>);
}

impl<T, F> Deleter<T> for F
where T: ?Sized,
      F: FnOnce(NonNull<T>)
{
    unsafe fn delete(self, ptr: NonNull<T>) { self(ptr) }
}

// std::default_delete<T>
/// Reclaims a single value that was allocated as a `Box<T>`.
pub struct DefaultDelete<T: ?Sized>(PhantomData<fn(NonNull<T>)>);

impl<T: ?Sized> DefaultDelete<T> {
    pub const fn new() -> Self { Self(PhantomData) }
}

impl<T> Deleter<T> for DefaultDelete<T> {
    unsafe fn delete(self, ptr: NonNull<T>) {
        drop(Box::from_raw(ptr.as_ptr()))
    }
}

// std::default_delete<T[]>
/// Reclaims an array that was allocated as a `Box<[T]>`, dropping every element.
pub struct DefaultDeleteArray<T>(PhantomData<fn(NonNull<[T]>)>);

impl<T> DefaultDeleteArray<T> {
    pub const fn new() -> Self { Self(PhantomData) }
}

impl<T> Deleter<[T]> for DefaultDeleteArray<T> {
    unsafe fn delete(self, ptr: NonNull<[T]>) {
        drop(Box::from_raw(ptr.as_ptr()))
    }
}

// the fn pointer PhantomData keeps these Send + Sync + Copy regardless of T, so the derives
// would add bounds we don't want
macro_rules! impl_marker_traits {
    ($($name:ident<T $(: ?$unsized:ident)?>),*) => {$(
        impl<T $(: ?$unsized)?> Clone for $name<T> {
            fn clone(&self) -> Self { *self }
        }
        impl<T $(: ?$unsized)?> Copy for $name<T> {}
        impl<T $(: ?$unsized)?> Default for $name<T> {
            fn default() -> Self { Self::new() }
        }
        impl<T $(: ?$unsized)?> Debug for $name<T> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}<{}>", stringify!($name), std::any::type_name::<T>())
            }
        }
    )*};
}

impl_marker_traits!(DefaultDelete<T: ?Sized>, DefaultDeleteArray<T>);

#[cfg(test)]
pub mod tests {
    use super::{ DefaultDelete, DefaultDeleteArray, Deleter };
    use crate::testing::DropTracker;
    use std::{
        cell::Cell,
        error::Error,
        ptr::NonNull,
        rc::Rc
    };
    type TestReturn = Result<(), Box<dyn Error>>;

    #[test]
    fn default_delete_drops_single_value() -> TestReturn {
        let tracker = DropTracker::new();
        let raw = NonNull::from(Box::leak(Box::new(tracker.item(1))));
        unsafe { DefaultDelete::new().delete(raw) };
        assert!(tracker.dropped() == vec![1], "Value should be dropped once, got {:?}", tracker.dropped());
        Ok(())
    }

    #[test]
    fn default_delete_array_drops_every_element() -> TestReturn {
        let tracker = DropTracker::new();
        let items: Box<[_]> = (0..4).map(|i| tracker.item(i)).collect();
        let raw = NonNull::from(Box::leak(items));
        unsafe { DefaultDeleteArray::new().delete(raw) };
        let mut dropped = tracker.dropped();
        dropped.sort();
        assert!(dropped == vec![0, 1, 2, 3], "All elements should be dropped once, got {:?}", dropped);
        Ok(())
    }

    #[test]
    fn closure_is_a_deleter() -> TestReturn {
        let seen = Rc::new(Cell::new(0usize));
        let mut value = 5u32;
        let raw = NonNull::from(&mut value);
        let seen_in = seen.clone();
        unsafe { (move |p: NonNull<u32>| seen_in.set(p.as_ptr() as usize)).delete(raw) };
        assert!(seen.get() == raw.as_ptr() as usize, "Closure should receive the wrapped pointer");
        Ok(())
    }
}
