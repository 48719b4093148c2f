//! Reference counted ownership modelled on the C++ `<memory>` header: `SharedPtr`,
//! `WeakPtr`, `EnableSharedFromThis` and `UniquePtr`, all backed by an atomic control block.

pub mod error;
pub mod memory {
    pub mod deleter;
    pub mod enable_shared;
    pub mod ref_count;
    pub mod shared_ptr;
    pub mod unique_ptr;
    pub mod weak_ptr;
}
#[cfg(test)]
pub(crate) mod testing;

pub use error::AllocationError;
pub use memory::{
    deleter::{ DefaultDelete, DefaultDeleteArray, Deleter },
    enable_shared::{ EnableSharedFromThis, WeakThis },
    ref_count::OwnerKey,
    shared_ptr::SharedPtr,
    unique_ptr::{ UniqueArray, UniquePtr },
    weak_ptr::WeakPtr
};
