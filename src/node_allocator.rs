use std::{
    alloc::{Layout, alloc, dealloc, handle_alloc_error},
    mem::{self, MaybeUninit},
    ptr,
    sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicUsize, Ordering},
};

use crate::{CACHE_LINE_SIZE, gate::Gate, node::Node};

/// Memory manager for [`Node`] allocation.
///
/// A node and its tower of forward pointers share one cache-line aligned
/// block: the header first, then `top_layer + 1` slots.
#[derive(Debug, Default)]
pub(crate) struct NodeAllocator {
    live: AtomicUsize,
}

impl NodeAllocator {
    pub(crate) fn new() -> Self {
        NodeAllocator {
            live: AtomicUsize::new(0),
        }
    }

    /// Byte offset of `next[0]` from the start of the node.
    #[inline]
    pub(crate) fn tower_offset<K>() -> usize {
        mem::size_of::<Node<K>>().next_multiple_of(mem::align_of::<AtomicPtr<Node<K>>>())
    }

    fn layout<K>(top_layer: usize) -> Layout {
        let forward_ptr_size = mem::size_of::<AtomicPtr<Node<K>>>();

        // Calculate total size needed for the node
        let node_size = Self::tower_offset::<K>() + (top_layer + 1) * forward_ptr_size;

        let align = (*CACHE_LINE_SIZE).max(mem::align_of::<Node<K>>());

        // Round up to cache line size
        let aligned_size = (node_size + align - 1) & !(align - 1);

        Layout::from_size_align(aligned_size, align).expect("node layout is bounded by MAX_LAYER")
    }

    /// Allocate a detached node owning `key` with slots for layers `0..=top_layer`.
    pub(crate) fn allocate<K>(&self, key: K, top_layer: usize) -> *mut Node<K> {
        self.allocate_raw(MaybeUninit::new(key), false, top_layer)
    }

    /// Allocate a keyless boundary node.
    pub(crate) fn allocate_sentinel<K>(&self, top_layer: usize) -> *mut Node<K> {
        self.allocate_raw(MaybeUninit::uninit(), true, top_layer)
    }

    fn allocate_raw<K>(&self, key: MaybeUninit<K>, sentinel: bool, top_layer: usize) -> *mut Node<K> {
        debug_assert!(top_layer <= u8::MAX as usize);
        let layout = Self::layout::<K>(top_layer);

        let ptr = unsafe { alloc(layout) as *mut Node<K> };
        if ptr.is_null() {
            handle_alloc_error(layout);
        }

        // Initialize the node
        unsafe {
            ptr.write(Node {
                gate: Gate::new(),
                ref_count: AtomicU32::new(0),
                is_fully_linked: AtomicBool::new(false),
                being_modified: AtomicBool::new(false),
                removed: AtomicBool::new(false),
                top_layer: top_layer as u8,
                sentinel,
                key,
            });

            // Initialize all forward pointers
            for layer in 0..=top_layer {
                Self::forward_ptr(ptr, layer).write(AtomicPtr::new(ptr::null_mut()));
            }
        }

        self.live.fetch_add(1, Ordering::Relaxed);
        ptr
    }

    #[inline]
    pub(crate) fn forward_ptr<K>(node: *mut Node<K>, layer: usize) -> *mut AtomicPtr<Node<K>> {
        unsafe {
            // Forward pointers start after the Node header
            let forward_base = (node as *mut u8).add(Self::tower_offset::<K>()) as *mut AtomicPtr<Node<K>>;
            forward_base.add(layer)
        }
    }

    /// Drop the key (unless `node` is a sentinel) and release the block.
    ///
    /// # Safety
    /// `node` came from this allocator, is unreachable from the list and no
    /// thread holds a reference to it.
    pub(crate) unsafe fn deallocate<K>(&self, node: *mut Node<K>) {
        unsafe {
            if !(*node).sentinel {
                (*node).key.assume_init_drop();
            }
            self.release_block(node);
        }
    }

    /// Move the key out and release the block.
    ///
    /// # Safety
    /// As for [`deallocate`](Self::deallocate); `node` is not a sentinel.
    pub(crate) unsafe fn into_key<K>(&self, node: *mut Node<K>) -> K {
        unsafe {
            debug_assert!(!(*node).sentinel);
            let key = (*node).key.assume_init_read();
            self.release_block(node);
            key
        }
    }

    unsafe fn release_block<K>(&self, node: *mut Node<K>) {
        let layout = unsafe {
            debug_assert_eq!(
                (*node).ref_count.load(Ordering::SeqCst),
                0,
                "freeing a referenced node"
            );
            Self::layout::<K>((*node).top_layer as usize)
        };

        unsafe { dealloc(node as *mut u8, layout) }
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    /// Nodes allocated and not yet released, sentinels included.
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}
