use allocator_api2::alloc::AllocError;
use std::alloc::Layout;
use thiserror::Error;

/// Storage for a control block could not be obtained.
///
/// By the time this is returned, the resource that was being wrapped has already been
/// handed to its deleter, so nothing leaks on this path.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("failed to allocate control block ({} bytes, align {})", .layout.size(), .layout.align())]
pub struct AllocationError {
    layout: Layout,
}

impl AllocationError {
    #[cold]
    pub fn new(layout: Layout) -> Self { Self { layout } }

    pub fn layout(&self) -> Layout { self.layout }

    #[cold]
    pub(crate) fn from_alloc_error(_: AllocError, layout: Layout) -> Self { Self::new(layout) }
}
