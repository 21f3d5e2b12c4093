//! # Memory Layout

/// End of userspace VA range after which Kernel space begins.
pub const LAST_USERSPACE_ADDRESS: u64 = 0xffff_0000_0000_0000;

/// A simple Higher Half Direct Map (HHDM) base.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Base granularity of every virtual range handed out by the range allocator.
pub const PAGE_SIZE: u64 = 4096;

/// First address of the general-purpose vmalloc window.
pub const VMALLOC_START: u64 = 0xffff_c900_0000_0000;

/// End (exclusive) of the general-purpose vmalloc window.
pub const VMALLOC_END: u64 = 0xffff_e900_0000_0000;

/// Where the kernel executes (VMA).
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// First address of the loadable-module window.
///
/// Modules are placed within ±2 GiB of the kernel image so that
/// `RIP`-relative relocations against kernel symbols stay in range.
pub const MODULES_VADDR: u64 = 0xffff_ffff_a000_0000;

/// End (exclusive) of the loadable-module window.
pub const MODULES_END: u64 = 0xffff_ffff_ff00_0000;

/// Lazily freed bytes tolerated before an opportunistic purge is attempted.
///
/// Purging flushes translations on every CPU, so it is batched: 32 MiB of
/// stale ranges is roughly what a 16-CPU system amortizes well.
pub const LAZY_MAX_BYTES: u64 = 32 * 1024 * 1024;

/// Number of retired lookup snapshots kept before a grace period is forced.
pub const RETIRE_BATCH: usize = 64;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(HHDM_BASE >= LAST_USERSPACE_ADDRESS);
    assert!(VMALLOC_START > HHDM_BASE);
    assert!(VMALLOC_START < VMALLOC_END);
    assert!(VMALLOC_END <= KERNEL_BASE);
    assert!(MODULES_VADDR > KERNEL_BASE);
    assert!(MODULES_VADDR < MODULES_END);
    assert!(VMALLOC_START.is_multiple_of(PAGE_SIZE));
    assert!(VMALLOC_END.is_multiple_of(PAGE_SIZE));
    assert!(MODULES_VADDR.is_multiple_of(PAGE_SIZE));
    assert!(MODULES_END.is_multiple_of(PAGE_SIZE));
    assert!(LAZY_MAX_BYTES.is_multiple_of(PAGE_SIZE));
};
