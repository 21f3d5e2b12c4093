//! # Kernel synchronization primitives
//!
//! - [`SpinLock`]: short mutual-exclusion sections.
//! - [`GracePeriod`]: lock-free read-side sections with deferred reclamation.
//! - [`RateLimit`]: bounded diagnostics under sustained pressure.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod grace;
mod ratelimit;
mod spin_lock;

pub use grace::{GracePeriod, ReadGuard};
pub use ratelimit::RateLimit;
pub use spin_lock::{SpinLock, SpinLockGuard};
