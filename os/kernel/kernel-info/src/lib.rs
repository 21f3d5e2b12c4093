//! # Kernel Memory Layout Configuration
//!
//! This crate defines the virtual memory layout constants shared by the
//! kernel's memory subsystems. It is the single source of truth for where
//! the dynamically mapped kernel areas live, so the range allocator, the
//! module loader and the page-table code agree on the same windows.
//!
//! ## Virtual Memory Architecture
//!
//! ```text
//! Virtual Address Space Layout (64-bit):
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │         User Space              │
//! LAST_USERSPACE_ADDRESS├─────────────────────────────────┤
//!                       │        Guard Region             │
//! HHDM_BASE             ├─────────────────────────────────┤ 0xffff_8880_0000_0000
//!                       │   Higher Half Direct Mapping    │
//! VMALLOC_START         ├─────────────────────────────────┤ 0xffff_c900_0000_0000
//!                       │   vmalloc / vmap ranges         │
//! VMALLOC_END           ├─────────────────────────────────┤ 0xffff_e900_0000_0000
//!                       │        Guard Region             │
//! KERNEL_BASE           ├─────────────────────────────────┤ 0xffff_ffff_8000_0000
//!                       │       Kernel Text & Data        │
//! MODULES_VADDR         ├─────────────────────────────────┤ 0xffff_ffff_a000_0000
//!                       │   Loadable module text/data     │
//! MODULES_END           ├─────────────────────────────────┤ 0xffff_ffff_ff00_0000
//!                       │   Fixmap                        │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! All windows are half-open (`[start, end)`) and page aligned; the
//! compile-time assertions in [`memory`] reject layouts that overlap.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
