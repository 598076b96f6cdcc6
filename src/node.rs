use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};
use std::thread;

use crate::gate::Gate;
use crate::node_allocator::NodeAllocator;

/// A skiplist node. The tower of forward pointers, `next[0..=top_layer]`,
/// trails the header in the same allocation (see [`NodeAllocator`]).
#[repr(C)]
pub(crate) struct Node<K> {
    // Guards consistent reads and writes of the tower
    pub(crate) gate: Gate,
    // Outstanding traversers, handles and cursors pointing here
    pub(crate) ref_count: AtomicU32,
    // Wired at every layer and therefore visible
    pub(crate) is_fully_linked: AtomicBool,
    // Single-writer guard for structural changes around this node
    pub(crate) being_modified: AtomicBool,
    // Claimed by an eraser
    pub(crate) removed: AtomicBool,
    pub(crate) top_layer: u8,
    // Head and tail carry no key
    pub(crate) sentinel: bool,
    pub(crate) key: MaybeUninit<K>,
}

impl<K> Node<K> {
    /// Slot `layer` of the tower of `node`.
    ///
    /// # Safety
    /// `node` is alive for `'a` and `layer <= top_layer`.
    #[inline]
    pub(crate) unsafe fn next<'a>(node: *mut Self, layer: usize) -> &'a AtomicPtr<Node<K>> {
        unsafe {
            debug_assert!(layer <= (*node).top_layer as usize);
            &*NodeAllocator::forward_ptr(node, layer)
        }
    }

    /// # Safety
    /// Must not be called on a sentinel.
    #[inline]
    pub(crate) unsafe fn key(&self) -> &K {
        debug_assert!(!self.sentinel);
        unsafe { self.key.assume_init_ref() }
    }

    #[inline]
    pub(crate) fn is_valid(&self) -> bool {
        self.is_fully_linked.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    /// Fully linked and not claimed by an eraser.
    #[inline]
    pub(crate) fn is_visible(&self) -> bool {
        self.is_valid() && !self.is_removed()
    }

    #[inline]
    pub(crate) fn grab(&self) {
        self.ref_count.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn release(&self) {
        let prev = self.ref_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev != 0, "release of an unreferenced node");
    }

    /// Take the structural guard. Fails if another operation holds it.
    #[inline]
    pub(crate) fn try_claim(&self) -> bool {
        self.being_modified
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    #[inline]
    pub(crate) fn unclaim(&self) {
        if self
            .being_modified
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug_assert!(false, "guard released twice");
            tracing::error!("released a structural guard that was not held");
        }
    }

    /// Reclamation gate: nothing can reach or touch this node any more.
    pub(crate) fn is_safe_to_free(&self) -> bool {
        self.gate.is_idle()
            && !self.being_modified.load(Ordering::SeqCst)
            && self.is_removed()
            && self.ref_count.load(Ordering::SeqCst) == 0
    }

    /// Spin until [`is_safe_to_free`](Self::is_safe_to_free) holds.
    pub(crate) fn wait_for_free(&self) {
        while !self.is_safe_to_free() {
            thread::yield_now();
        }
    }
}
