//! # Kernel Virtual Range Allocator
//!
//! Hands out non-overlapping, aligned ranges of kernel virtual address space
//! for the vmalloc area, loadable modules and per-CPU areas, and answers
//! "which range contains this address" without taking a lock.
//!
//! ## Architecture
//!
//! ```text
//!  allocate / allocate_batch / reserve        lookup (lock-free)
//!              │                                    │
//! ┌────────────▼─────────────┐          ┌───────────▼──────────┐
//! │ RangeAllocator           │ publish  │ PublishedTree         │
//! │  SpinLock<AllocState>    ├─────────►│  AVL snapshot,        │
//! │   • IntervalStore        │          │  GracePeriod readers  │
//! │   • PlacementCache       │          └──────────────────────┘
//! │   • PendingQueue         │
//! └────────────┬─────────────┘
//!              │ purge: one TlbShootdown per batch of lazily freed ranges
//!              ▼
//!        retired snapshots dropped after GracePeriod::synchronize
//! ```
//!
//! - Placement is first fit from the low end of the requested bounds. A
//!   placement cache lets repeated requests with the same constraints resume
//!   where the previous one ended; it never changes the result.
//! - [`RangeAllocator::free`] is lazy. Freed ranges keep their address space
//!   until a purge flushes translations for all of them at once. An
//!   allocation that finds no space purges once and retries.
//! - [`RangeAllocator::allocate_batch`] places several ranges at fixed
//!   offsets from one common base and publishes them together.
//! - [`Vmalloc`] adds frame backing and page-table mapping on top.
//!
//! ## Example
//! ```
//! use kernel_vmap::{RangeAllocator, VirtualAddress, VirtualRange, VmapConfig};
//!
//! let space = VirtualRange::new(VirtualAddress::new(0x10_0000), VirtualAddress::new(0x20_0000));
//! let vmap = RangeAllocator::new(VmapConfig::new(space), |_: VirtualRange| {}).unwrap();
//!
//! let a = vmap.allocate(0x2000, 0x1000, space).unwrap();
//! assert_eq!(a.start(), VirtualAddress::new(0x10_0000));
//! assert!(vmap.lookup(VirtualAddress::new(0x10_1fff)).is_some_and(|h| h.ptr_eq(&a)));
//!
//! vmap.free(a);
//! assert!(vmap.lookup(VirtualAddress::new(0x10_0000)).is_none());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod addresses;
mod allocator;
mod batch;
mod cache;
mod collab;
mod config;
mod error;
mod purge;
mod range;
mod store;
mod tree;
mod vmalloc;

pub use addresses::{PhysicalAddress, VirtualAddress, VirtualRange, align_up};
pub use allocator::{RangeAllocator, VmapStats};
pub use batch::{BatchAllocation, BatchRequest};
pub use collab::{FrameProvider, MapAttributes, PageMapper, TlbShootdown};
pub use config::VmapConfig;
pub use error::{MapError, VmallocError, VmapError};
pub use range::{RangeDescriptor, RangeFlags, RangeHandle, RangeInfo};
pub use vmalloc::{VmArea, Vmalloc};
