// https://en.cppreference.com/w/cpp/memory/shared_ptr
// Control blocks shared by SharedPtr and WeakPtr

use crate::{ error::AllocationError, memory::deleter::Deleter };
use allocator_api2::alloc::Allocator;
use log::{ trace, warn };
use std::{
    alloc::Layout,
    any::type_name,
    mem::ManuallyDrop,
    ptr::{ self, NonNull },
    sync::atomic::{ fence, AtomicBool, AtomicU32, Ordering }
};

// Counts past this abort the process instead of wrapping around to zero
const MAX_REFCOUNT: u32 = i32::MAX as u32;

// Type-erased operations of a concrete control block, the equivalent of the virtual functions
// on std::_Ref_count_base
pub(crate) struct RefCountVtable {
    // release the resource. runs once, when uses reaches 0
    destroy: unsafe fn(NonNull<RefCountBase>),
    // free the control block itself. runs once, when weaks reaches 0
    delete_this: unsafe fn(NonNull<RefCountBase>)
}

// std::_Ref_count_base
/// Counter header shared by every control block.
///
/// `uses` is the number of live `SharedPtr`s. `weaks` is the number of live `WeakPtr`s plus
/// one extra unit that all of the `SharedPtr`s hold together; it is given up right after the
/// resource is released. That keeps the block alive while the resource's own destructor
/// runs, even if that destructor drops the last `WeakPtr`.
#[repr(C)]
pub struct RefCountBase {
    vtable: &'static RefCountVtable,
    uses: AtomicU32,
    weaks: AtomicU32,
    // set while destroy runs, when uses is 0 but the implicit weak unit is still held
    releasing: AtomicBool
}

impl RefCountBase {
    const fn new(vtable: &'static RefCountVtable) -> Self {
        Self {
            vtable,
            uses: AtomicU32::new(1),
            weaks: AtomicU32::new(1),
            releasing: AtomicBool::new(false)
        }
    }

    pub fn inc_strong(&self) {
        if self.uses.fetch_add(1, Ordering::Relaxed) > MAX_REFCOUNT {
            std::process::abort();
        }
    }

    pub fn inc_weak(&self) {
        if self.weaks.fetch_add(1, Ordering::Relaxed) > MAX_REFCOUNT {
            std::process::abort();
        }
    }

    /// Returns true if this was the last strong reference. The caller must then release the
    /// resource exactly once and never touch it again.
    pub fn dec_strong(&self) -> bool {
        if self.uses.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    /// Returns true if the block is no longer referenced by anything and can be freed.
    pub fn dec_weak(&self) -> bool {
        if self.weaks.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    /// Take a new strong reference, unless the count has already reached zero.
    pub fn try_upgrade(&self) -> bool {
        let mut n = self.uses.load(Ordering::Relaxed);
        loop {
            if n == 0 {
                return false;
            }
            if n > MAX_REFCOUNT {
                std::process::abort();
            }
            match self.uses.compare_exchange_weak(n, n + 1, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return true,
                Err(e) => n = e
            }
        }
    }

    pub fn strong_count(&self) -> usize { self.uses.load(Ordering::Acquire) as usize }

    /// Number of live `WeakPtr`s, never counting the unit held on behalf of the `SharedPtr`s.
    /// That includes the window where the resource is being released and its destructor looks
    /// at its own weak references.
    // Racy by nature: the value may have changed by the time the caller looks at it
    pub fn weak_count(&self) -> usize {
        let weaks = self.weaks.load(Ordering::Acquire);
        let implicit = self.uses.load(Ordering::Acquire) != 0 || self.releasing.load(Ordering::Acquire);
        match implicit {
            true => weaks.saturating_sub(1) as usize,
            false => weaks as usize
        }
    }

    // true if the caller holds the only SharedPtr and no WeakPtr exists. weaks is read first
    // so a WeakPtr that upgraded and then went away is seen through its strong reference
    pub(crate) fn is_exclusive(&self) -> bool {
        self.weaks.load(Ordering::Acquire) == 1 && self.uses.load(Ordering::Acquire) == 1
    }

    /// Give up one strong reference, releasing the resource and then the block as the counts
    /// reach zero.
    ///
    /// If the deleter or the inline value's `Drop` panics, the implicit weak unit is still
    /// given up while unwinding, so the block is freed once the last `WeakPtr` goes away.
    ///
    /// # Safety
    /// `this` must point to a live block on which the caller owns a strong reference.
    pub(crate) unsafe fn release_strong(this: NonNull<Self>) {
        if this.as_ref().dec_strong() {
            this.as_ref().releasing.store(true, Ordering::Release);
            let _implicit = ImplicitWeak(this);
            (this.as_ref().vtable.destroy)(this);
        }
    }

    /// Give up one weak reference, freeing the block if it was the last one.
    ///
    /// # Safety
    /// `this` must point to a live block on which the caller owns a weak reference.
    pub(crate) unsafe fn release_weak(this: NonNull<Self>) {
        if this.as_ref().dec_weak() {
            (this.as_ref().vtable.delete_this)(this);
        }
    }
}

// The unit of weaks held by the strong side, handed back once destroy returns or unwinds
struct ImplicitWeak(NonNull<RefCountBase>);

impl Drop for ImplicitWeak {
    fn drop(&mut self) {
        unsafe {
            self.0.as_ref().releasing.store(false, Ordering::Release);
            RefCountBase::release_weak(self.0);
        }
    }
}

/// Identity of the control block behind a handle, for owner-based comparison.
///
/// Two handles have the same owner when they share a control block, whatever they point at.
/// Empty handles have no owner.
pub trait OwnerKey {
    fn owner_key(&self) -> Option<NonNull<RefCountBase>>;
}

// std::_Ref_count_resource_alloc
/// Control block for a resource that was allocated elsewhere and is released by a deleter.
#[repr(C)]
pub struct RefCountResource<T, D, A>
where T: ?Sized,
      D: Deleter<T>,
      A: Allocator
{
    base: RefCountBase,
    ptr: NonNull<T>,
    // taken by destroy
    deleter: ManuallyDrop<D>,
    // taken by delete_this
    alloc: ManuallyDrop<A>
}

impl<T, D, A> RefCountResource<T, D, A>
where T: ?Sized,
      D: Deleter<T> + Send + 'static,
      A: Allocator + Send + 'static
{
    const VTABLE: &'static RefCountVtable = &RefCountVtable {
        destroy: Self::destroy,
        delete_this: Self::delete_this
    };

    fn get_layout() -> Layout { Layout::new::<Self>() }

    /// Allocate a block owning `ptr` with `uses == 1` and no weak references.
    ///
    /// If the allocator fails, `deleter` is run on `ptr` before the error is returned.
    ///
    /// # Safety
    /// `deleter` must be a valid way of releasing `ptr`, and nothing else may own `ptr`.
    pub(crate) unsafe fn allocate(ptr: NonNull<T>, deleter: D, alloc: A)
        -> Result<NonNull<RefCountBase>, AllocationError>
    {
        let layout = Self::get_layout();
        let mem = match alloc.allocate(layout) {
            Ok(mem) => mem,
            Err(e) => {
                warn!("Couldn't allocate control block for {}, releasing resource", type_name::<T>());
                deleter.delete(ptr);
                return Err(AllocationError::from_alloc_error(e, layout));
            }
        };
        let block = mem.cast::<Self>();
        ptr::write(block.as_ptr(), Self {
            base: RefCountBase::new(Self::VTABLE),
            ptr,
            deleter: ManuallyDrop::new(deleter),
            alloc: ManuallyDrop::new(alloc)
        });
        trace!("Allocated control block {:p} for {}", block, type_name::<T>());
        Ok(block.cast())
    }

    unsafe fn destroy(this: NonNull<RefCountBase>) {
        let block = this.cast::<Self>().as_ptr();
        let deleter = ManuallyDrop::take(&mut (*block).deleter);
        trace!("Releasing resource of control block {:p}", block);
        deleter.delete((*block).ptr);
    }

    unsafe fn delete_this(this: NonNull<RefCountBase>) {
        let block = this.cast::<Self>();
        let alloc = ManuallyDrop::take(&mut (*block.as_ptr()).alloc);
        trace!("Freeing control block {:p}", block);
        alloc.deallocate(block.cast(), Self::get_layout());
    }
}

// std::_Ref_count_obj_alloc
/// Control block with the managed value stored inline, as made by `SharedPtr::new`.
#[repr(C)]
pub struct RefCountObject<T, A>
where A: Allocator
{
    base: RefCountBase,
    // dropped in place by destroy
    value: ManuallyDrop<T>,
    // taken by delete_this
    alloc: ManuallyDrop<A>
}

impl<T, A> RefCountObject<T, A>
where A: Allocator + Send + 'static
{
    const VTABLE: &'static RefCountVtable = &RefCountVtable {
        destroy: Self::destroy,
        delete_this: Self::delete_this
    };

    fn get_layout() -> Layout { Layout::new::<Self>() }

    /// Move `value` into a fresh block. On failure the value is dropped.
    pub(crate) fn allocate(value: T, alloc: A)
        -> Result<(NonNull<RefCountBase>, NonNull<T>), AllocationError>
    {
        let layout = Self::get_layout();
        let mem = match alloc.allocate(layout) {
            Ok(mem) => mem,
            Err(e) => {
                warn!("Couldn't allocate control block for {}, dropping value", type_name::<T>());
                drop(value);
                return Err(AllocationError::from_alloc_error(e, layout));
            }
        };
        let block = mem.cast::<Self>();
        unsafe {
            ptr::write(block.as_ptr(), Self {
                base: RefCountBase::new(Self::VTABLE),
                value: ManuallyDrop::new(value),
                alloc: ManuallyDrop::new(alloc)
            });
        }
        trace!("Allocated control block {:p} with inline {}", block, type_name::<T>());
        // ManuallyDrop<T> is repr(transparent)
        let data = unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*block.as_ptr()).value) as *mut T) };
        Ok((block.cast(), data))
    }

    unsafe fn destroy(this: NonNull<RefCountBase>) {
        let block = this.cast::<Self>().as_ptr();
        trace!("Dropping inline value of control block {:p}", block);
        ManuallyDrop::drop(&mut (*block).value);
    }

    unsafe fn delete_this(this: NonNull<RefCountBase>) {
        let block = this.cast::<Self>();
        let alloc = ManuallyDrop::take(&mut (*block.as_ptr()).alloc);
        trace!("Freeing control block {:p}", block);
        alloc.deallocate(block.cast(), Self::get_layout());
    }
}

#[cfg(test)]
pub mod tests {
    use super::{ RefCountBase, RefCountObject, RefCountResource };
    use crate::{
        memory::deleter::DefaultDelete,
        testing::{ init_logger, CountingAlloc, DropTracker, FailingAlloc }
    };
    use allocator_api2::alloc::Global;
    use std::{
        error::Error,
        panic::{ self, AssertUnwindSafe },
        ptr::NonNull,
        sync::{
            atomic::{ AtomicUsize, Ordering },
            Arc
        }
    };
    type TestReturn = Result<(), Box<dyn Error>>;

    fn leak<T>(value: T) -> NonNull<T> { NonNull::from(Box::leak(Box::new(value))) }

    #[test]
    fn create_for_starts_with_single_owner() -> TestReturn {
        init_logger();
        let rep = unsafe { RefCountResource::allocate(leak(7u32), DefaultDelete::new(), Global)? };
        let base = unsafe { rep.as_ref() };
        assert!(base.strong_count() == 1, "Strong count for new block should be 1 instead of {}", base.strong_count());
        assert!(base.weak_count() == 0, "Weak count for new block should be 0 instead of {}", base.weak_count());
        unsafe { RefCountBase::release_strong(rep) };
        Ok(())
    }

    #[test]
    fn counters_track_increments() -> TestReturn {
        let rep = unsafe { RefCountResource::allocate(leak(7u32), DefaultDelete::new(), Global)? };
        let base = unsafe { rep.as_ref() };
        base.inc_strong();
        base.inc_weak();
        base.inc_weak();
        assert!(base.strong_count() == 2, "Strong count should be 2");
        assert!(base.weak_count() == 2, "Weak count should be 2");
        assert!(!base.dec_strong(), "Dropping one of two strong references shouldn't reach zero");
        assert!(!base.dec_weak(), "Weak references are still held");
        unsafe {
            RefCountBase::release_weak(rep);
            RefCountBase::release_strong(rep);
        }
        Ok(())
    }

    #[test]
    fn try_upgrade_follows_strong_count() -> TestReturn {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let deleter = move |p: NonNull<u32>| {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(unsafe { Box::from_raw(p.as_ptr()) });
        };
        let rep = unsafe { RefCountResource::allocate(leak(1u32), deleter, Global)? };
        let base = unsafe { rep.as_ref() };
        base.inc_weak();
        assert!(base.try_upgrade(), "Upgrade should succeed while the resource is alive");
        assert!(base.strong_count() == 2, "Upgrade should add a strong reference");
        unsafe {
            RefCountBase::release_strong(rep);
            RefCountBase::release_strong(rep);
        }
        assert!(released.load(Ordering::SeqCst) == 1, "Resource should be released once");
        // the weak reference we still hold keeps the block readable
        let base = unsafe { rep.as_ref() };
        assert!(!base.try_upgrade(), "Upgrade must fail once strong count reached zero");
        assert!(base.strong_count() == 0, "Failed upgrade must not touch the count");
        unsafe { RefCountBase::release_weak(rep) };
        Ok(())
    }

    #[test]
    fn allocation_failure_releases_resource() -> TestReturn {
        init_logger();
        let tracker = DropTracker::new();
        let res = unsafe { RefCountResource::allocate(leak(tracker.item(3)), DefaultDelete::new(), FailingAlloc) };
        assert!(res.is_err(), "Allocation with FailingAlloc should fail");
        assert!(tracker.dropped() == vec![3], "Resource should be released on allocation failure");
        let res = RefCountObject::allocate(tracker.item(4), FailingAlloc);
        assert!(res.is_err(), "Inline allocation with FailingAlloc should fail");
        assert!(tracker.dropped() == vec![3, 4], "Inline value should be dropped on allocation failure");
        Ok(())
    }

    #[test]
    fn block_outlives_resource_while_weak_held() -> TestReturn {
        let tracker = DropTracker::new();
        let alloc = CountingAlloc::new();
        let (rep, _) = RefCountObject::allocate(tracker.item(9), alloc.clone())?;
        unsafe { rep.as_ref().inc_weak() };
        unsafe { RefCountBase::release_strong(rep) };
        assert!(tracker.count() == 1, "Inline value should be dropped when strong count reaches zero");
        assert!(alloc.live() == 1, "Block should stay allocated while a weak reference exists");
        unsafe { RefCountBase::release_weak(rep) };
        assert!(alloc.live() == 0, "Block should be freed after the last weak reference");
        assert!(alloc.allocs() == 1, "Exactly one block allocation expected, got {}", alloc.allocs());
        Ok(())
    }

    #[test]
    fn panicking_release_still_frees_block() -> TestReturn {
        init_logger();
        let alloc = CountingAlloc::new();
        let failing_delete = |p: NonNull<u32>| {
            drop(unsafe { Box::from_raw(p.as_ptr()) });
            panic!("release failed");
        };

        // a weak reference outlives the failed release
        let rep = unsafe { RefCountResource::allocate(leak(4u32), failing_delete, alloc.clone())? };
        unsafe { rep.as_ref().inc_weak() };
        let unwound = panic::catch_unwind(AssertUnwindSafe(|| unsafe { RefCountBase::release_strong(rep) }));
        assert!(unwound.is_err(), "Panic from the deleter should reach the caller");
        let base = unsafe { rep.as_ref() };
        assert!(base.strong_count() == 0, "Resource counts as released after the panic");
        assert!(base.weak_count() == 1, "Only the outside weak reference should remain, got {}", base.weak_count());
        assert!(alloc.live() == 1, "Block must survive while the weak reference exists");
        unsafe { RefCountBase::release_weak(rep) };
        assert!(alloc.live() == 0, "Block should be freed with the last weak reference");

        // nothing else holds the block
        let rep = unsafe { RefCountResource::allocate(leak(5u32), failing_delete, alloc.clone())? };
        let unwound = panic::catch_unwind(AssertUnwindSafe(|| unsafe { RefCountBase::release_strong(rep) }));
        assert!(unwound.is_err(), "Panic from the deleter should reach the caller");
        assert!(alloc.live() == 0, "Block should be freed while unwinding, {} still live", alloc.live());
        assert!(alloc.allocs() == 2, "Two blocks expected, got {}", alloc.allocs());
        Ok(())
    }

    #[test]
    fn weak_count_excludes_implicit_unit_during_release() -> TestReturn {
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let block_addr = Arc::new(AtomicUsize::new(0));
        let rep_addr = block_addr.clone();
        let seen_in = seen.clone();
        let deleter = move |p: NonNull<u32>| {
            let base = unsafe { &*(rep_addr.load(Ordering::SeqCst) as *const RefCountBase) };
            seen_in.store(base.weak_count(), Ordering::SeqCst);
            drop(unsafe { Box::from_raw(p.as_ptr()) });
        };
        let rep = unsafe { RefCountResource::allocate(leak(6u32), deleter, Global)? };
        block_addr.store(rep.as_ptr() as usize, Ordering::SeqCst);
        unsafe { rep.as_ref().inc_weak() };
        unsafe { RefCountBase::release_strong(rep) };
        let seen = seen.load(Ordering::SeqCst);
        assert!(seen == 1, "Weak count inside the release should be 1 instead of {}", seen);
        let base = unsafe { rep.as_ref() };
        assert!(base.weak_count() == 1, "Weak count after the release should be 1 instead of {}", base.weak_count());
        unsafe { RefCountBase::release_weak(rep) };
        Ok(())
    }
}
