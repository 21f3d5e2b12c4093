//! Collaborators the allocator drives but does not implement: translation
//! flushing, physical frames and page-table updates.

use crate::addresses::{PhysicalAddress, VirtualAddress, VirtualRange};
use crate::error::MapError;
use bitfield_struct::bitfield;

/// Invalidates cached translations for a kernel range on every CPU.
///
/// Called once per purge with the union of the purged ranges, never with the
/// allocator lock held.
pub trait TlbShootdown: Send + Sync {
    fn flush_kernel_range(&self, range: VirtualRange);
}

impl<F> TlbShootdown for F
where
    F: Fn(VirtualRange) + Send + Sync,
{
    fn flush_kernel_range(&self, range: VirtualRange) {
        self(range);
    }
}

/// Source of physical page frames for vmalloc backing.
///
/// Returned frames must be page aligned. `None` means out of memory.
pub trait FrameProvider {
    fn alloc_frame(&self) -> Option<PhysicalAddress>;
    fn free_frame(&self, frame: PhysicalAddress);
}

/// Installs and removes kernel page-table entries.
pub trait PageMapper {
    /// Map one page at `va` to `frame`.
    ///
    /// # Errors
    /// If the page is already mapped or page tables cannot be allocated.
    fn map_page(
        &self,
        va: VirtualAddress,
        frame: PhysicalAddress,
        attrs: MapAttributes,
    ) -> Result<(), MapError>;

    /// Remove every mapping in `range` without flushing translations.
    fn unmap_range(&self, range: VirtualRange);
}

/// Protection requested for a vmalloc mapping.
#[bitfield(u8)]
#[derive(Eq, PartialEq)]
pub struct MapAttributes {
    pub writable: bool,
    pub executable: bool,
    /// Shared by all address spaces.
    pub global: bool,
    pub uncached: bool,
    #[bits(4)]
    __: u8,
}

impl MapAttributes {
    /// Ordinary kernel data: writable, global, never executable.
    #[must_use]
    pub const fn kernel_data() -> Self {
        Self::new().with_writable(true).with_global(true)
    }

    /// Loadable module text and data.
    #[must_use]
    pub const fn module() -> Self {
        Self::kernel_data().with_executable(true)
    }
}
