//! Persistent AVL tree for lock-free address lookups.
//!
//! Writers (under the allocator lock) derive a new tree from the current one
//! by path copying: every update allocates `O(log n)` fresh nodes and shares
//! the rest with the previous version. The newest root is published through
//! [`PublishedTree`]; readers load it inside a grace-period read section and
//! walk it without any locking. A replaced root is retired and dropped only
//! after a grace period, which frees exactly the nodes no newer version
//! shares.

use crate::addresses::VirtualAddress;
use crate::range::RangeHandle;
use alloc::sync::Arc;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};
use kernel_sync::ReadGuard;

pub(crate) type Link = Option<Arc<Node>>;

pub(crate) struct Node {
    start: u64,
    height: u8,
    handle: RangeHandle,
    left: Link,
    right: Link,
}

#[inline]
fn height(link: &Link) -> u8 {
    link.as_ref().map_or(0, |n| n.height)
}

fn make(handle: RangeHandle, left: Link, right: Link) -> Arc<Node> {
    Arc::new(Node {
        start: handle.start().as_u64(),
        height: 1 + height(&left).max(height(&right)),
        handle,
        left,
        right,
    })
}

/// Build a node from `handle` and two subtrees whose heights differ by at
/// most two, rotating as needed to restore the AVL balance.
fn balance(handle: RangeHandle, left: Link, right: Link) -> Arc<Node> {
    let (hl, hr) = (height(&left), height(&right));
    if hl > hr + 1 {
        let Some(l) = left else { unreachable!() };
        if height(&l.left) >= height(&l.right) {
            make(
                l.handle.clone(),
                l.left.clone(),
                Some(make(handle, l.right.clone(), right)),
            )
        } else {
            let Some(lr) = &l.right else { unreachable!() };
            make(
                lr.handle.clone(),
                Some(make(l.handle.clone(), l.left.clone(), lr.left.clone())),
                Some(make(handle, lr.right.clone(), right)),
            )
        }
    } else if hr > hl + 1 {
        let Some(r) = right else { unreachable!() };
        if height(&r.right) >= height(&r.left) {
            make(
                r.handle.clone(),
                Some(make(handle, left, r.left.clone())),
                r.right.clone(),
            )
        } else {
            let Some(rl) = &r.left else { unreachable!() };
            make(
                rl.handle.clone(),
                Some(make(handle, left, rl.left.clone())),
                Some(make(r.handle.clone(), rl.right.clone(), r.right.clone())),
            )
        }
    } else {
        make(handle, left, right)
    }
}

/// New version of `link` with `handle` added.
///
/// # Panics
/// If a range with the same start is already present.
pub(crate) fn insert(link: &Link, handle: RangeHandle) -> Arc<Node> {
    let Some(n) = link else {
        return make(handle, None, None);
    };
    let key = handle.start().as_u64();
    match key.cmp(&n.start) {
        core::cmp::Ordering::Less => balance(
            n.handle.clone(),
            Some(insert(&n.left, handle)),
            n.right.clone(),
        ),
        core::cmp::Ordering::Greater => balance(
            n.handle.clone(),
            n.left.clone(),
            Some(insert(&n.right, handle)),
        ),
        core::cmp::Ordering::Equal => panic!("duplicate range start {:#x}", key),
    }
}

/// New version of `link` without the range starting at `start`, or `None`
/// if there is no such range.
pub(crate) fn remove(link: &Link, start: u64) -> Option<Link> {
    let n = link.as_ref()?;
    match start.cmp(&n.start) {
        core::cmp::Ordering::Less => {
            let left = remove(&n.left, start)?;
            Some(Some(balance(n.handle.clone(), left, n.right.clone())))
        }
        core::cmp::Ordering::Greater => {
            let right = remove(&n.right, start)?;
            Some(Some(balance(n.handle.clone(), n.left.clone(), right)))
        }
        core::cmp::Ordering::Equal => Some(match (&n.left, &n.right) {
            (None, right) => right.clone(),
            (left, None) => left.clone(),
            (left, Some(right)) => {
                let (min, rest) = remove_min(right);
                Some(balance(min, left.clone(), rest))
            }
        }),
    }
}

fn remove_min(n: &Arc<Node>) -> (RangeHandle, Link) {
    match &n.left {
        None => (n.handle.clone(), n.right.clone()),
        Some(left) => {
            let (min, rest) = remove_min(left);
            (min, Some(balance(n.handle.clone(), rest, n.right.clone())))
        }
    }
}

/// The range containing `va`, if any.
pub(crate) fn find(root: &Node, va: VirtualAddress) -> Option<&RangeHandle> {
    let va = va.as_u64();
    let mut cur = Some(root);
    while let Some(n) = cur {
        if va < n.start {
            cur = n.left.as_deref();
        } else if va < n.handle.end().as_u64() {
            return Some(&n.handle);
        } else {
            cur = n.right.as_deref();
        }
    }
    None
}

/// Root pointer shared with lock-free readers.
///
/// Holds one strong count on the published root.
pub(crate) struct PublishedTree {
    root: AtomicPtr<Node>,
}

impl PublishedTree {
    pub(crate) const fn new() -> Self {
        Self {
            root: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Make `root` visible to readers and hand back the previous version,
    /// which the caller must keep alive until a grace period has elapsed.
    ///
    /// Publishing is serialized by the allocator lock.
    pub(crate) fn publish(&self, root: &Link) -> Link {
        let new = root
            .as_ref()
            .map_or(ptr::null_mut(), |r| Arc::into_raw(Arc::clone(r)).cast_mut());
        let old = self.root.swap(new, Ordering::SeqCst);
        // SAFETY: non-null values stored here always come from `Arc::into_raw`
        // and own one strong count, which is transferred back to the caller.
        (!old.is_null()).then(|| unsafe { Arc::from_raw(old) })
    }

    /// Current root, valid for as long as the read section lasts.
    pub(crate) fn load<'g>(&'g self, _guard: &'g ReadGuard<'_>) -> Option<&'g Node> {
        let p = self.root.load(Ordering::SeqCst);
        // SAFETY: a root replaced by `publish` is dropped only after a grace
        // period, which cannot complete while `_guard` is alive.
        unsafe { p.as_ref() }
    }
}

impl Drop for PublishedTree {
    fn drop(&mut self) {
        let p = *self.root.get_mut();
        if !p.is_null() {
            // SAFETY: see `publish`; `&mut self` excludes readers.
            drop(unsafe { Arc::from_raw(p) });
        }
    }
}
