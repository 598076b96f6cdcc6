use std::cell::RefCell;

use thread_local::ThreadLocal;

use crate::node::Node;
use crate::node_allocator::NodeAllocator;

// A thread's retire list is swept after this many retirements.
const SWEEP_INTERVAL: usize = 32;

// Unlinked nodes waiting for their last reference to go away
pub(crate) struct RetireList<K> {
    nodes: Vec<*mut Node<K>>,
    retired_since_sweep: usize,
}

// A list only changes threads together with its SkipList, which is Send only for K: Send.
unsafe impl<K> Send for RetireList<K> {}

impl<K> RetireList<K> {
    fn new() -> Self {
        RetireList {
            nodes: Vec::new(),
            retired_since_sweep: 0,
        }
    }
}

/// Owns node memory: allocates nodes, keeps unlinked ones on per-thread
/// retire lists, and frees each once [`Node::is_safe_to_free`] holds.
pub(crate) struct Reclaimer<K> {
    allocator: NodeAllocator,
    garbage: ThreadLocal<RefCell<RetireList<K>>>,
}

impl<K> Reclaimer<K> {
    pub(crate) fn new() -> Self {
        Reclaimer {
            allocator: NodeAllocator::new(),
            garbage: ThreadLocal::new(),
        }
    }

    // Wrapper for allocate
    pub(crate) fn allocate_node(&self, key: K, top_layer: usize) -> *mut Node<K> {
        self.allocator.allocate(key, top_layer)
    }

    pub(crate) fn allocate_sentinel(&self, top_layer: usize) -> *mut Node<K> {
        self.allocator.allocate_sentinel(top_layer)
    }

    /// Free a node immediately, bypassing the retire lists.
    ///
    /// # Safety
    /// No other thread can reach or reference `node`: it was never published,
    /// or the caller has exclusive access to the whole list.
    pub(crate) unsafe fn free(&self, node: *mut Node<K>) {
        unsafe { self.allocator.deallocate(node) }
    }

    /// Hand an unlinked node over for deferred freeing.
    pub(crate) fn retire(&self, node: *mut Node<K>) {
        let garbage = self.garbage.get_or(|| RefCell::new(RetireList::new()));
        let mut garbage = garbage.borrow_mut();
        garbage.nodes.push(node);
        garbage.retired_since_sweep += 1;

        // Counting retirements, not list length, keeps still-pinned nodes from
        // turning every later retirement into a full scan.
        if garbage.retired_since_sweep >= SWEEP_INTERVAL {
            collect(&self.allocator, &mut garbage);
        }
    }

    /// Sweep the calling thread's retire list only.
    pub(crate) fn collect_local(&self) -> usize {
        match self.garbage.get() {
            Some(list) => collect(&self.allocator, &mut list.borrow_mut()),
            None => 0,
        }
    }

    /// Wait until nothing references the unlinked `node`, then free it and
    /// return its key.
    ///
    /// # Safety
    /// `node` is unlinked, marked removed, never retired, and the caller holds
    /// no reference to it.
    pub(crate) unsafe fn take_key(&self, node: *mut Node<K>) -> K {
        unsafe {
            (*node).wait_for_free();
            self.allocator.into_key(node)
        }
    }

    /// Sweep every thread's retire list. Exclusive access keeps other threads out.
    pub(crate) fn collect_all(&mut self) -> usize {
        let allocator = &self.allocator;
        self.garbage
            .iter_mut()
            .map(|list| collect(allocator, list.get_mut()))
            .sum()
    }

    /// Nodes retired by the calling thread that are still waiting.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.garbage
            .get()
            .map(|list| list.borrow().nodes.len())
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn live_nodes(&self) -> usize {
        self.allocator.live()
    }
}

// Free every node of `list` that passes the reclamation gate
fn collect<K>(allocator: &NodeAllocator, list: &mut RetireList<K>) -> usize {
    list.retired_since_sweep = 0;
    let before = list.nodes.len();
    list.nodes.retain(|&node| {
        let safe = unsafe { (*node).is_safe_to_free() };
        if safe {
            unsafe { allocator.deallocate(node) };
        }
        !safe
    });

    let freed = before - list.nodes.len();
    tracing::debug!(freed, pending = list.nodes.len(), "collected retired nodes");
    freed
}

impl<K> Drop for Reclaimer<K> {
    fn drop(&mut self) {
        let freed = self.collect_all();

        // Only a forgotten handle can keep a node pinned this late; leak it.
        let leaked = self.allocator.live();
        tracing::debug!(freed, leaked, "dropped reclaimer");
        if leaked > 0 {
            tracing::warn!(leaked, "nodes still referenced at drop");
        }
    }
}
