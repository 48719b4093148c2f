// https://en.cppreference.com/w/cpp/memory/enable_shared_from_this

use crate::{
    error::AllocationError,
    memory::{ deleter::Deleter, shared_ptr::SharedPtr, unique_ptr::UniquePtr, weak_ptr::WeakPtr }
};
use allocator_api2::alloc::Allocator;
use log::trace;
use std::{
    fmt::Debug,
    ptr::NonNull,
    sync::OnceLock
};

/// Back-reference from a managed object to its own control block.
///
/// Embedded in the object and filled in by the `*_enabled` constructors of `SharedPtr`. It is a
/// `WeakPtr`, so it never keeps the object alive by itself.
pub struct WeakThis<T: ?Sized> {
    weak: OnceLock<WeakPtr<T>>
}

impl<T: ?Sized> WeakThis<T> {
    pub const fn new() -> Self { Self { weak: OnceLock::new() } }

    pub fn is_installed(&self) -> bool { self.weak.get().is_some() }

    // first SharedPtr to claim the object wins
    fn install(&self, owner: &SharedPtr<T>) {
        if self.weak.set(owner.downgrade()).is_ok() {
            trace!("Installed weak this for {}", std::any::type_name::<T>());
        }
    }
}

impl<T: ?Sized> Default for WeakThis<T> {
    fn default() -> Self { Self::new() }
}

// a copied object is not owned by anything yet
impl<T: ?Sized> Clone for WeakThis<T> {
    fn clone(&self) -> Self { Self::new() }
}

impl<T: ?Sized> Debug for WeakThis<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.weak.get() {
            Some(w) => write!(f, "WeakThis({:?})", w),
            None => write!(f, "WeakThis(None)")
        }
    }
}

// std::enable_shared_from_this
/// Lets an object owned by a `SharedPtr` hand out new `SharedPtr`s to itself.
///
/// ```
/// use cpp_smart_ptr::{ EnableSharedFromThis, SharedPtr, WeakThis };
///
/// struct Node { this: WeakThis<Node> }
/// impl EnableSharedFromThis for Node {
///     fn weak_this(&self) -> &WeakThis<Self> { &self.this }
/// }
///
/// let node = SharedPtr::new_enabled(Node { this: WeakThis::new() });
/// let again = node.shared_from_this();
/// assert!(again.owner_eq(&node));
/// ```
pub trait EnableSharedFromThis {
    fn weak_this(&self) -> &WeakThis<Self>;

    /// A new `SharedPtr` sharing the control block that currently owns `self`.
    ///
    /// # Panics
    /// If `self` was never placed in a `SharedPtr` through one of the `*_enabled` constructors.
    /// Calling this without an owning `SharedPtr` is a programming error.
    fn shared_from_this(&self) -> SharedPtr<Self> {
        match self.weak_this().weak.get().and_then(|w| w.lock()) {
            Some(p) => p,
            None => panic!("shared_from_this called on a {} not owned by a SharedPtr",
                std::any::type_name::<Self>())
        }
    }

    /// Like `shared_from_this`, but returns an empty `WeakPtr` rather than panicking.
    fn weak_from_this(&self) -> WeakPtr<Self> {
        self.weak_this().weak.get().cloned().unwrap_or_default()
    }
}

impl<T: EnableSharedFromThis> SharedPtr<T> {
    pub fn new_enabled(value: T) -> Self {
        let this = Self::new(value);
        Self::enable_shared_from_this(&this);
        this
    }

    pub fn try_new_enabled_in<A>(value: T, alloc: A) -> Result<Self, AllocationError>
    where A: Allocator + Send + 'static
    {
        let this = Self::try_new_in(value, alloc)?;
        Self::enable_shared_from_this(&this);
        Ok(this)
    }

    /// `SharedPtr::from_raw_with` for an object that can observe itself.
    ///
    /// # Safety
    /// See `SharedPtr::from_raw_with`.
    pub unsafe fn from_raw_with_enabled<D>(ptr: NonNull<T>, deleter: D) -> Result<Self, AllocationError>
    where D: Deleter<T> + Send + 'static
    {
        let this = Self::from_raw_with(ptr, deleter)?;
        Self::enable_shared_from_this(&this);
        Ok(this)
    }

    /// # Safety
    /// See `SharedPtr::from_raw_with`.
    pub unsafe fn from_raw_with_in_enabled<D, A>(ptr: NonNull<T>, deleter: D, alloc: A)
        -> Result<Self, AllocationError>
    where D: Deleter<T> + Send + 'static,
          A: Allocator + Send + 'static
    {
        let this = Self::from_raw_with_in(ptr, deleter, alloc)?;
        Self::enable_shared_from_this(&this);
        Ok(this)
    }

    pub fn from_unique_enabled<D>(unique: UniquePtr<T, D>) -> Result<Self, AllocationError>
    where D: Deleter<T> + Send + 'static
    {
        let this = Self::from_unique(unique)?;
        Self::enable_shared_from_this(&this);
        Ok(this)
    }

    /// Point the object's `WeakThis` at `this`, for handles built some other way than the
    /// `*_enabled` constructors. Does nothing if `this` is empty or the object already has an
    /// owner.
    pub fn enable_shared_from_this(this: &Self) {
        if let Some(value) = this.get() {
            value.weak_this().install(this);
        }
    }
}

impl<T: EnableSharedFromThis + 'static> SharedPtr<T> {
    pub fn from_box_enabled(value: Box<T>) -> Result<Self, AllocationError> {
        let this = Self::from_box(value)?;
        Self::enable_shared_from_this(&this);
        Ok(this)
    }
}
