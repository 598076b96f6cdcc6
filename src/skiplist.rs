use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::comparator::{Ascend, Comparator};
use crate::error::{EraseError, Error};
use crate::iter::{Cursor, Entry, Iter};
use crate::level::LevelGenerator;
use crate::node::Node;
use crate::options::{MAX_LAYER, Options};
use crate::reclaim::Reclaimer;

/// What a lookup is compared against. `Start` and `End` sit on the sentinels.
pub(crate) enum Target<'k, K> {
    Start,
    Key(&'k K),
    End,
}

impl<K> Clone for Target<'_, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Target<'_, K> {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FindMode {
    Smaller,
    SmallerOrEqual,
    Equal,
    GreaterOrEqual,
    Greater,
}

impl FindMode {
    #[inline]
    fn is_smaller(self) -> bool {
        matches!(self, FindMode::Smaller | FindMode::SmallerOrEqual)
    }
}

type Tower<K> = [*mut Node<K>; MAX_LAYER];

/// A concurrent ordered index.
///
/// Every operation takes `&self`; share the list between threads with an
/// `Arc` or scoped threads. Structural changes lock only the nodes around the
/// change, readers never block each other, and unlinked nodes are reclaimed
/// once the last handle or traverser lets go of them.
///
/// Iteration is weakly consistent: entries inserted or erased elsewhere while a
/// cursor is alive may or may not be observed.
pub struct SkipList<K, C = Ascend> {
    head: *mut Node<K>,
    tail: *mut Node<K>,
    cmp: C,
    options: Options,
    num_entries: AtomicUsize,
    layer_entries: Box<[AtomicUsize]>,
    top_layer: AtomicUsize,
    levels: LevelGenerator,
    reclaimer: Reclaimer<K>,
}

unsafe impl<K: Send + Sync, C: Send + Sync> Send for SkipList<K, C> {}
unsafe impl<K: Send + Sync, C: Send + Sync> Sync for SkipList<K, C> {}

impl<K: Ord> Default for SkipList<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord> SkipList<K> {
    /// An empty list ordered by `K: Ord` with default [`Options`].
    pub fn new() -> Self {
        Self::with_comparator(Ascend)
    }
}

impl<K, C> SkipList<K, C> {
    pub fn with_comparator(cmp: C) -> Self {
        Self::build(Options::default(), cmp)
    }

    pub fn with_options(options: Options, cmp: C) -> Result<Self, Error> {
        options.validate()?;
        Ok(Self::build(options, cmp))
    }

    fn build(options: Options, cmp: C) -> Self {
        let max_layer = options.max_layer();
        let reclaimer = Reclaimer::new();

        let head = reclaimer.allocate_sentinel(max_layer - 1);
        let tail = reclaimer.allocate_sentinel(max_layer - 1);
        unsafe {
            for layer in 0..max_layer {
                Node::next(head, layer).store(tail, Ordering::Relaxed);
            }
            (*head).is_fully_linked.store(true, Ordering::SeqCst);
            (*tail).is_fully_linked.store(true, Ordering::SeqCst);
        }

        tracing::debug!(
            fanout = options.fanout(),
            max_layer,
            "created skiplist"
        );

        SkipList {
            head,
            tail,
            cmp,
            options,
            num_entries: AtomicUsize::new(0),
            layer_entries: (0..max_layer).map(|_| AtomicUsize::new(0)).collect(),
            top_layer: AtomicUsize::new(0),
            levels: LevelGenerator::new(options.fanout(), max_layer),
            reclaimer,
        }
    }

    /// Number of live entries. A snapshot; concurrent writers may change it right away.
    pub fn len(&self) -> usize {
        self.num_entries.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn options(&self) -> Options {
        self.options
    }

    /// Free every erased node that nobody references any more, on all threads'
    /// retire lists. Returns how many were freed.
    pub fn reclaim(&mut self) -> usize {
        self.reclaimer.collect_all()
    }

    #[cfg(test)]
    pub(crate) fn live_nodes(&self) -> usize {
        self.reclaimer.live_nodes()
    }

    // Highest populated layer, recomputed after every change of the counters
    fn refresh_top_layer(&self) {
        let top = (0..self.options.max_layer())
            .rev()
            .find(|&layer| self.layer_entries[layer].load(Ordering::SeqCst) > 0)
            .unwrap_or(0);
        self.top_layer.store(top, Ordering::SeqCst);
    }
}

impl<K, C: Comparator<K>> SkipList<K, C> {
    /// Insert `key` unless an equal key is already present.
    pub fn insert(&self, key: K) -> Result<(), Error> {
        self.insert_with(key, true)
    }

    /// Insert `key` even if equal keys are present. Equal keys keep no particular order.
    pub fn insert_multi(&self, key: K) {
        // Cannot be rejected without the duplicate check
        let _ = self.insert_with(key, false);
    }

    /// Erase the entry [`find`](Self::find) would return for `key`.
    pub fn erase(&self, key: &K) -> Result<(), Error> {
        let node = self.unlink_key(key)?;
        self.reclaimer.retire(node);
        Ok(())
    }

    /// Erase the entry [`find`](Self::find) would return for `key` and hand
    /// its key back.
    ///
    /// Blocks until every handle and cursor on that entry is dropped, so it
    /// never returns if the calling thread still holds one.
    pub fn take(&self, key: &K) -> Result<K, Error> {
        let node = self.unlink_key(key)?;
        Ok(unsafe { self.reclaimer.take_key(node) })
    }

    /// Sweep the calling thread's retire list, freeing erased entries nobody
    /// references any more. Returns how many were freed.
    pub fn reclaim_local(&self) -> usize {
        self.reclaimer.collect_local()
    }

    // Unlink a visible node equal to `key`; the caller decides how it is freed.
    fn unlink_key(&self, key: &K) -> Result<*mut Node<K>, Error> {
        loop {
            let node = match unsafe { self.find_visible(Target::Key(key), FindMode::Equal) } {
                Some(node) => node,
                None => return Err(Error::NotFound),
            };

            let result = unsafe { self.remove_pinned(node) };
            unsafe { (*node).release() };
            match result {
                Ok(()) => return Ok(node),
                // Someone else took it first; look again
                Err(_) => thread::yield_now(),
            }
        }
    }

    /// Erase exactly the node `entry` refers to.
    pub fn erase_entry(&self, entry: Entry<'_, K, C>) -> Result<(), Error> {
        if !ptr::eq(entry.list(), self) {
            return Err(Error::NotFound);
        }

        let node = entry.into_raw();
        let result = unsafe { self.remove_pinned(node) };
        unsafe { (*node).release() };
        match result {
            Ok(()) => {
                self.reclaimer.retire(node);
                Ok(())
            }
            Err(_) => Err(Error::NotFound),
        }
    }

    pub fn find(&self, key: &K) -> Option<Entry<'_, K, C>> {
        self.lookup(Target::Key(key), FindMode::Equal)
    }

    /// Greatest entry strictly less than `key`.
    pub fn find_smaller(&self, key: &K) -> Option<Entry<'_, K, C>> {
        self.lookup(Target::Key(key), FindMode::Smaller)
    }

    pub fn find_smaller_or_equal(&self, key: &K) -> Option<Entry<'_, K, C>> {
        self.lookup(Target::Key(key), FindMode::SmallerOrEqual)
    }

    /// Smallest entry strictly greater than `key`.
    pub fn find_greater(&self, key: &K) -> Option<Entry<'_, K, C>> {
        self.lookup(Target::Key(key), FindMode::Greater)
    }

    pub fn find_greater_or_equal(&self, key: &K) -> Option<Entry<'_, K, C>> {
        self.lookup(Target::Key(key), FindMode::GreaterOrEqual)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    pub fn first(&self) -> Option<Entry<'_, K, C>> {
        unsafe { self.successor(self.head) }.map(|node| Entry::new(self, node))
    }

    pub fn last(&self) -> Option<Entry<'_, K, C>> {
        unsafe { self.predecessor(ptr::null_mut()) }.map(|node| Entry::new(self, node))
    }

    /// Cursor on the first entry, or [`end`](Self::end) if the list is empty.
    pub fn begin(&self) -> Cursor<'_, K, C> {
        Cursor::new(self, unsafe { self.successor(self.head) })
    }

    pub fn end(&self) -> Cursor<'_, K, C> {
        Cursor::new(self, None)
    }

    pub fn iter(&self) -> Iter<'_, K, C> {
        Iter::new(self.begin())
    }

    fn lookup(&self, target: Target<'_, K>, mode: FindMode) -> Option<Entry<'_, K, C>> {
        unsafe { self.find_visible(target, mode) }.map(|node| Entry::new(self, node))
    }

    /// Where `target` falls relative to `node`. Sentinels compare by identity.
    fn compare(&self, target: Target<'_, K>, node: *mut Node<K>) -> CmpOrdering {
        if node == self.head {
            return match target {
                Target::Start => CmpOrdering::Equal,
                _ => CmpOrdering::Greater,
            };
        }
        if node == self.tail {
            return match target {
                Target::End => CmpOrdering::Equal,
                _ => CmpOrdering::Less,
            };
        }
        match target {
            Target::Start => CmpOrdering::Less,
            Target::End => CmpOrdering::Greater,
            Target::Key(key) => self.cmp.compare(key, unsafe { (*node).key() }),
        }
    }

    /// Step from `cur` to its successor on `layer`.
    ///
    /// The caller holds a reference on `cur`; the returned node carries a fresh
    /// reference the caller must release. `to_find` is stepped over (setting
    /// `found`) instead of being returned. `None` means `cur` or its successor
    /// is not fully linked and the caller has to start over.
    unsafe fn advance(
        &self,
        cur: *mut Node<K>,
        layer: usize,
        to_find: *mut Node<K>,
        found: &mut bool,
    ) -> Option<*mut Node<K>> {
        unsafe {
            // While the read lock is held `cur.next` stays consistent.
            let gate = &(*cur).gate;
            gate.read_lock();
            if !(*cur).is_valid() {
                gate.read_unlock();
                return None;
            }
            let mut next = Node::next(cur, layer).load(Ordering::Acquire);
            if next.is_null() {
                gate.read_unlock();
                return broken_tower(layer);
            }
            // Pinned before the gate opens: nobody can free it now.
            (*next).grab();
            gate.read_unlock();

            let mut skipped: *mut Node<K> = ptr::null_mut();
            while next == to_find || !(*next).is_valid() {
                let temp = next;
                (*temp).gate.read_lock();
                if !(*temp).is_valid() {
                    (*temp).gate.read_unlock();
                    (*temp).release();
                    if !skipped.is_null() {
                        (*skipped).release();
                    }
                    return None;
                }
                if temp != to_find {
                    // Finished linking while we waited for its gate
                    (*temp).gate.read_unlock();
                    break;
                }

                *found = true;
                next = Node::next(temp, layer).load(Ordering::Acquire);
                if next.is_null() {
                    (*temp).gate.read_unlock();
                    (*temp).release();
                    if !skipped.is_null() {
                        (*skipped).release();
                    }
                    return broken_tower(layer);
                }
                (*next).grab();
                (*temp).gate.read_unlock();

                if !skipped.is_null() {
                    (*skipped).release();
                }
                skipped = temp;
            }

            if !skipped.is_null() {
                (*skipped).release();
            }
            Some(next)
        }
    }

    /// Top-down search. Returns a referenced node, possibly one that an
    /// eraser has already claimed: the last node below `target` in the smaller
    /// modes, otherwise the first node at or above it (above it for `Greater`).
    unsafe fn find_raw(&self, target: Target<'_, K>, mode: FindMode) -> Option<*mut Node<K>> {
        'retry: loop {
            unsafe {
                let mut cur = self.head;
                (*cur).grab();

                let sl_top_layer = self.top_layer.load(Ordering::SeqCst);
                for layer in (0..=sl_top_layer).rev() {
                    loop {
                        let Some(next) = self.advance(cur, layer, ptr::null_mut(), &mut false) else {
                            (*cur).release();
                            tracing::trace!(layer, "find: tower changed under us, restarting");
                            thread::yield_now();
                            continue 'retry;
                        };

                        let cmp = self.compare(target, next);
                        let step = match mode {
                            FindMode::Greater => cmp != CmpOrdering::Less,
                            _ => cmp == CmpOrdering::Greater,
                        };
                        if step {
                            // cur < next < target: move right
                            (*cur).release();
                            cur = next;
                            continue;
                        }

                        // cur < target <= next. Equal keys do not end the
                        // descent: only layer 0 knows the first of them.
                        if layer != 0 {
                            (*next).release();
                            break;
                        }

                        if mode.is_smaller() && cur != self.head {
                            (*next).release();
                            return Some(cur);
                        }
                        if !mode.is_smaller() && next != self.tail {
                            (*cur).release();
                            return Some(next);
                        }

                        (*cur).release();
                        (*next).release();
                        return None;
                    }
                }

                unreachable!("descent always ends on layer 0");
            }
        }
    }

    /// [`find_raw`](Self::find_raw) restricted to visible nodes.
    unsafe fn find_visible(&self, target: Target<'_, K>, mode: FindMode) -> Option<*mut Node<K>> {
        unsafe {
            match mode {
                FindMode::Smaller => self.backward_visible(target, ptr::null_mut()),
                FindMode::SmallerOrEqual => self
                    .find_visible(target, FindMode::Equal)
                    .or_else(|| self.backward_visible(target, ptr::null_mut())),
                FindMode::Equal | FindMode::GreaterOrEqual | FindMode::Greater => {
                    let node = self.find_raw(target, mode)?;
                    let node = self.forward_visible(node, target, mode, ptr::null_mut())?;
                    if mode == FindMode::Equal && self.compare(target, node) != CmpOrdering::Equal {
                        (*node).release();
                        return None;
                    }
                    Some(node)
                }
            }
        }
    }

    // Walk layer 0 rightwards from `node` (referenced) to the first visible
    // node other than `skip`
    unsafe fn forward_visible(
        &self,
        mut node: *mut Node<K>,
        target: Target<'_, K>,
        mode: FindMode,
        skip: *mut Node<K>,
    ) -> Option<*mut Node<K>> {
        unsafe {
            loop {
                if node == self.tail {
                    (*node).release();
                    return None;
                }
                if node != skip && (*node).is_visible() {
                    return Some(node);
                }

                match self.advance(node, 0, ptr::null_mut(), &mut false) {
                    Some(next) => {
                        (*node).release();
                        node = next;
                    }
                    None => {
                        // Unlinked meanwhile; search again from the top
                        (*node).release();
                        node = self.find_raw(target, mode)?;
                    }
                }
            }
        }
    }

    /// Last visible node before `target`, found by scanning layer 0 up from
    /// the last node below it. With `until` set the scan stops at that node
    /// instead, so equal keys linked ahead of it still count.
    unsafe fn backward_visible(&self, target: Target<'_, K>, until: *mut Node<K>) -> Option<*mut Node<K>> {
        unsafe {
            // Removed node whose key bounds the next, further-left scan
            let mut pivot: *mut Node<K> = ptr::null_mut();
            'retry: loop {
                let upper = if pivot.is_null() {
                    target
                } else {
                    Target::Key((*pivot).key())
                };
                let start = self.find_raw(upper, FindMode::Smaller);

                // `start` keeps its own reference; the scan takes another.
                let mut cur = start.unwrap_or(self.head);
                (*cur).grab();
                let mut best: *mut Node<K> = ptr::null_mut();
                if cur != self.head && (*cur).is_visible() {
                    (*cur).grab();
                    best = cur;
                }

                loop {
                    let Some(next) = self.advance(cur, 0, ptr::null_mut(), &mut false) else {
                        (*cur).release();
                        if !best.is_null() {
                            (*best).release();
                        }
                        if let Some(start) = start {
                            (*start).release();
                        }
                        tracing::trace!("find: scan start went away, restarting");
                        thread::yield_now();
                        continue 'retry;
                    };

                    // Past `pivot` lies what the previous scan already saw
                    if next == pivot || self.scan_ends_at(target, until, next) {
                        (*next).release();
                        break;
                    }
                    if (*next).is_visible() {
                        if !best.is_null() {
                            (*best).release();
                        }
                        (*next).grab();
                        best = next;
                    }
                    (*cur).release();
                    cur = next;
                }
                (*cur).release();

                if !pivot.is_null() {
                    (*pivot).release();
                }
                if !best.is_null() {
                    if let Some(start) = start {
                        (*start).release();
                    }
                    return Some(best);
                }

                // Everything between `start` and `target` is removed
                match start {
                    Some(start) => pivot = start,
                    None => return None,
                }
            }
        }
    }

    fn scan_ends_at(&self, target: Target<'_, K>, until: *mut Node<K>, next: *mut Node<K>) -> bool {
        if next == self.tail || next == until {
            return true;
        }
        let cmp = self.compare(target, next);
        if until.is_null() {
            cmp != CmpOrdering::Greater
        } else {
            cmp == CmpOrdering::Less
        }
    }

    /// Next visible node after `node` (referenced by the caller, or the head).
    pub(crate) unsafe fn successor(&self, node: *mut Node<K>) -> Option<*mut Node<K>> {
        unsafe {
            // If `node` is unlinked meanwhile, resume at the first key not below
            // its own: equal keys after it must not be lost.
            let target = if node == self.head {
                Target::Start
            } else {
                Target::Key((*node).key())
            };
            let mode = FindMode::GreaterOrEqual;

            let next = match self.advance(node, 0, ptr::null_mut(), &mut false) {
                Some(next) => next,
                None => self.find_raw(target, mode)?,
            };
            self.forward_visible(next, target, mode, node)
        }
    }

    /// Last visible node before `node` (referenced by the caller), or the
    /// last one overall when `node` is null.
    pub(crate) unsafe fn predecessor(&self, node: *mut Node<K>) -> Option<*mut Node<K>> {
        unsafe {
            if node.is_null() {
                self.backward_visible(Target::End, ptr::null_mut())
            } else {
                self.backward_visible(Target::Key((*node).key()), node)
            }
        }
    }

    /// Claim and validate `cur` as the predecessor on `layer`. On failure,
    /// returns the lowest layer whose guard is held.
    unsafe fn guard_layer(
        &self,
        prevs: &mut Tower<K>,
        nexts: &mut Tower<K>,
        layer: usize,
        top_layer: usize,
        cur: *mut Node<K>,
        next: *mut Node<K>,
    ) -> Result<(), usize> {
        unsafe {
            prevs[layer] = cur;
            nexts[layer] = next;

            let mut locked_layer = layer + 1;
            // Layers often share a predecessor: claimed once, at the highest of them.
            if !(layer < top_layer && prevs[layer] == prevs[layer + 1]) {
                if !(*cur).try_claim() {
                    return Err(locked_layer);
                }
                locked_layer = layer;
            }

            if !((*cur).is_valid() && (*next).is_valid()) {
                return Err(locked_layer);
            }
            Ok(())
        }
    }

    // `cur` still points at `expected` on `layer`
    unsafe fn still_links(
        &self,
        cur: *mut Node<K>,
        layer: usize,
        to_find: *mut Node<K>,
        expected: *mut Node<K>,
    ) -> bool {
        unsafe {
            match self.advance(cur, layer, to_find, &mut false) {
                Some(again) => {
                    (*again).release();
                    again == expected
                }
                None => false,
            }
        }
    }

    /// Release the guards taken on `prevs[start..=top_layer]`.
    unsafe fn clear_guards(&self, prevs: &Tower<K>, start: usize, top_layer: usize) {
        for layer in start..=top_layer {
            if layer == top_layer || prevs[layer] != prevs[layer + 1] {
                unsafe { (*prevs[layer]).unclaim() };
            }
        }
    }

    // Redirect `prev.next[layer]` from `expected` to `new` under prev's write lock
    unsafe fn swing(
        &self,
        prev: *mut Node<K>,
        layer: usize,
        expected: *mut Node<K>,
        new: *mut Node<K>,
    ) {
        unsafe {
            (*prev).gate.write_lock();
            if Node::next(prev, layer)
                .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                debug_assert!(false, "predecessor changed while guarded");
                tracing::error!(layer, "predecessor changed while guarded");
            }
            (*prev).gate.write_unlock();
        }
    }

    fn insert_with(&self, key: K, no_dup: bool) -> Result<(), Error> {
        let top_layer = self.levels.top_layer();
        let x = self.reclaimer.allocate_node(key, top_layer);

        let mut prevs: Tower<K> = [ptr::null_mut(); MAX_LAYER];
        let mut nexts: Tower<K> = [ptr::null_mut(); MAX_LAYER];

        unsafe {
            // Readers reaching `x` before it is fully linked wait on this.
            (*x).gate.write_lock();
            let key = (*x).key();

            'retry: loop {
                let mut cur = self.head;
                (*cur).grab();

                let sl_top_layer = self.top_layer.load(Ordering::SeqCst).max(top_layer);
                for layer in (0..=sl_top_layer).rev() {
                    loop {
                        let Some(next) = self.advance(cur, layer, ptr::null_mut(), &mut false) else {
                            self.clear_guards(&prevs, layer + 1, top_layer);
                            (*cur).release();
                            tracing::trace!(layer, "insert: tower changed under us, restarting");
                            thread::yield_now();
                            continue 'retry;
                        };

                        let cmp = self.compare(Target::Key(key), next);
                        if cmp == CmpOrdering::Greater {
                            // cur < next < key: move right
                            (*cur).release();
                            cur = next;
                            continue;
                        }
                        // cur < key <= next
                        (*next).release();

                        if no_dup && cmp == CmpOrdering::Equal {
                            self.clear_guards(&prevs, layer + 1, top_layer);
                            (*cur).release();
                            (*x).gate.write_unlock();
                            self.reclaimer.free(x);
                            return Err(Error::Duplicated);
                        }

                        if layer <= top_layer {
                            if let Err(locked_layer) =
                                self.guard_layer(&mut prevs, &mut nexts, layer, top_layer, cur, next)
                            {
                                self.clear_guards(&prevs, locked_layer, top_layer);
                                (*cur).release();
                                tracing::trace!(layer, "insert: predecessor busy or invalid, restarting");
                                thread::yield_now();
                                continue 'retry;
                            }

                            Node::next(x, layer).store(next, Ordering::Release);

                            if !self.still_links(cur, layer, ptr::null_mut(), next) {
                                self.clear_guards(&prevs, layer, top_layer);
                                (*cur).release();
                                tracing::trace!(layer, "insert: lost a race on the predecessor, restarting");
                                thread::yield_now();
                                continue 'retry;
                            }
                        }

                        // Go down
                        break;
                    }
                }

                // Every predecessor is claimed and validated: link bottom-up.
                for layer in 0..=top_layer {
                    self.swing(prevs[layer], layer, nexts[layer], x);
                }

                // Linearization point
                (*x).is_fully_linked.store(true, Ordering::SeqCst);
                (*x).gate.write_unlock();

                self.num_entries.fetch_add(1, Ordering::SeqCst);
                self.layer_entries[top_layer].fetch_add(1, Ordering::SeqCst);
                self.refresh_top_layer();

                self.clear_guards(&prevs, 0, top_layer);
                (*cur).release();
                return Ok(());
            }
        }
    }

    // Retry `erase_node` while another operation holds the node's guard
    unsafe fn remove_pinned(&self, node: *mut Node<K>) -> Result<(), EraseError> {
        loop {
            match unsafe { self.erase_node(node) } {
                Err(EraseError::Busy) => thread::yield_now(),
                other => return other,
            }
        }
    }

    /// Unlink `x`, which the caller holds a reference on, from every layer.
    unsafe fn erase_node(&self, x: *mut Node<K>) -> Result<(), EraseError> {
        unsafe {
            let top_layer = (*x).top_layer as usize;

            if (*x).is_removed() {
                return Err(EraseError::AlreadyRemoved);
            }
            if !(*x).try_claim() {
                return Err(EraseError::Busy);
            }
            // Hidden from lookups from here on, even while still linked.
            if (*x).removed.swap(true, Ordering::SeqCst) {
                (*x).unclaim();
                return Err(EraseError::AlreadyRemoved);
            }

            let key = (*x).key();
            let mut prevs: Tower<K> = [ptr::null_mut(); MAX_LAYER];
            let mut nexts: Tower<K> = [ptr::null_mut(); MAX_LAYER];

            'retry: loop {
                if !(*x).is_valid() {
                    // Never linked, nothing to undo but the claim
                    (*x).removed.store(false, Ordering::SeqCst);
                    (*x).unclaim();
                    return Err(EraseError::Unlinked);
                }

                let mut cur = self.head;
                (*cur).grab();

                let sl_top_layer = self.top_layer.load(Ordering::SeqCst).max(top_layer);
                for layer in (0..=sl_top_layer).rev() {
                    loop {
                        let mut found = false;
                        let Some(next) = self.advance(cur, layer, x, &mut found) else {
                            self.clear_guards(&prevs, layer + 1, top_layer);
                            (*cur).release();
                            tracing::trace!(layer, "erase: tower changed under us, restarting");
                            thread::yield_now();
                            continue 'retry;
                        };

                        // Unlike insert, stop only right behind `x` itself.
                        let cmp = self.compare(Target::Key(key), next);
                        if cmp == CmpOrdering::Greater || (layer <= top_layer && !found) {
                            debug_assert!(next != self.tail, "node missing from its own layer");
                            (*cur).release();
                            cur = next;
                            continue;
                        }
                        (*next).release();

                        if layer <= top_layer {
                            if let Err(locked_layer) =
                                self.guard_layer(&mut prevs, &mut nexts, layer, top_layer, cur, next)
                            {
                                self.clear_guards(&prevs, locked_layer, top_layer);
                                (*cur).release();
                                tracing::trace!(layer, "erase: predecessor busy or invalid, restarting");
                                thread::yield_now();
                                continue 'retry;
                            }

                            if !self.still_links(cur, layer, x, next) {
                                self.clear_guards(&prevs, layer, top_layer);
                                (*cur).release();
                                tracing::trace!(layer, "erase: lost a race on the predecessor, restarting");
                                thread::yield_now();
                                continue 'retry;
                            }
                        }

                        break;
                    }
                }

                // Linearization point
                (*x).gate.write_lock();
                (*x).is_fully_linked.store(false, Ordering::SeqCst);
                (*x).gate.write_unlock();

                for layer in 0..=top_layer {
                    self.swing(prevs[layer], layer, x, nexts[layer]);
                }

                self.num_entries.fetch_sub(1, Ordering::SeqCst);
                self.layer_entries[top_layer].fetch_sub(1, Ordering::SeqCst);
                self.refresh_top_layer();

                self.clear_guards(&prevs, 0, top_layer);
                (*cur).release();
                (*x).unclaim();
                return Ok(());
            }
        }
    }
}

// A tower slot below the tail is never null
#[cold]
fn broken_tower<T>(layer: usize) -> Option<T> {
    debug_assert!(false, "null forward pointer on layer {layer}");
    tracing::error!(layer, "null forward pointer");
    None
}

impl<'a, K, C: Comparator<K>> IntoIterator for &'a SkipList<K, C> {
    type Item = Entry<'a, K, C>;
    type IntoIter = Iter<'a, K, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: Ord> FromIterator<K> for SkipList<K> {
    /// Duplicates after the first are dropped.
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut list = SkipList::new();
        list.extend(iter);
        list
    }
}

impl<K, C: Comparator<K>> Extend<K> for SkipList<K, C> {
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        let mut list = &*self;
        list.extend(iter);
    }
}

impl<K, C: Comparator<K>> Extend<K> for &SkipList<K, C> {
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        for key in iter {
            let _ = self.insert(key);
        }
    }
}

impl<K: fmt::Debug, C: Comparator<K>> fmt::Debug for SkipList<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<K, C> Drop for SkipList<K, C> {
    fn drop(&mut self) {
        // Exclusive access: only a forgotten handle or cursor can still pin a node.
        let mut leaked = 0usize;
        unsafe {
            let mut node = Node::next(self.head, 0).load(Ordering::Acquire);
            while !node.is_null() && node != self.tail {
                let next = Node::next(node, 0).load(Ordering::Acquire);
                if (*node).ref_count.load(Ordering::SeqCst) == 0 {
                    self.reclaimer.free(node);
                } else {
                    leaked += 1;
                }
                node = next;
            }
            self.reclaimer.free(self.head);
            self.reclaimer.free(self.tail);
        }
        if leaked > 0 {
            tracing::warn!(leaked, "entries still referenced at drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rand::Rng;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    fn keys<C: Comparator<u64>>(list: &SkipList<u64, C>) -> Vec<u64> {
        list.iter().map(|entry| *entry).collect()
    }

    fn value<C>(entry: Option<Entry<'_, u64, C>>) -> Option<u64> {
        entry.map(|entry| *entry)
    }

    #[test]
    fn skiplist_basic_operations() {
        let list = SkipList::new();

        assert!(list.insert(100u64).is_ok());
        assert!(list.insert(200).is_ok());
        assert!(list.insert(150).is_ok());
        assert_eq!(list.len(), 3);

        assert_eq!(list.insert(100), Err(Error::Duplicated));
        assert_eq!(list.len(), 3);

        assert!(list.contains(&100));
        assert!(list.contains(&150));
        assert!(list.contains(&200));
        assert!(!list.contains(&300));

        assert!(list.erase(&150).is_ok());
        assert!(!list.contains(&150));
        assert_eq!(list.len(), 2);

        assert_eq!(list.erase(&999), Err(Error::NotFound));
        assert_eq!(list.erase(&150), Err(Error::NotFound));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn skiplist_ordering() {
        let list = SkipList::new();
        for value in [5u64, 3, 8, 1] {
            list.insert(value).unwrap();
        }
        assert_eq!(keys(&list), vec![1, 3, 5, 8]);

        let list = SkipList::new();
        let values = [50u64, 30, 70, 20, 40, 60, 80];
        for &value in &values {
            list.insert(value).unwrap();
        }
        assert_eq!(keys(&list), vec![20, 30, 40, 50, 60, 70, 80]);
    }

    #[test]
    fn size_tracks_inserts_and_erases() {
        let list = SkipList::new();
        let mut model = BTreeSet::new();
        let mut rng = rand::rng();

        for _ in 0..2_000 {
            let key = rng.random_range(0..300u64);
            if rng.random_bool(0.6) {
                assert_eq!(list.insert(key).is_ok(), model.insert(key));
            } else {
                assert_eq!(list.erase(&key).is_ok(), model.remove(&key));
            }
            assert_eq!(list.len(), model.len());
        }

        assert_eq!(keys(&list), model.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn relational_lookups() {
        let list = SkipList::new();
        for key in [10u64, 20, 30, 40] {
            list.insert(key).unwrap();
        }

        assert_eq!(value(list.find(&20)), Some(20));
        assert_eq!(value(list.find(&25)), None);

        assert_eq!(value(list.find_greater_or_equal(&20)), Some(20));
        assert_eq!(value(list.find_greater_or_equal(&21)), Some(30));
        assert_eq!(value(list.find_greater_or_equal(&41)), None);
        assert_eq!(value(list.find_greater_or_equal(&0)), Some(10));

        assert_eq!(value(list.find_greater(&20)), Some(30));
        assert_eq!(value(list.find_greater(&40)), None);
        assert_eq!(value(list.find_greater(&5)), Some(10));

        assert_eq!(value(list.find_smaller(&20)), Some(10));
        assert_eq!(value(list.find_smaller(&10)), None);
        assert_eq!(value(list.find_smaller(&100)), Some(40));

        assert_eq!(value(list.find_smaller_or_equal(&20)), Some(20));
        assert_eq!(value(list.find_smaller_or_equal(&25)), Some(20));
        assert_eq!(value(list.find_smaller_or_equal(&9)), None);

        assert_eq!(value(list.first()), Some(10));
        assert_eq!(value(list.last()), Some(40));
    }

    #[test]
    fn lookups_on_empty_list() {
        let list = SkipList::<u64>::new();
        assert!(list.is_empty());
        assert!(list.find(&1).is_none());
        assert!(list.find_smaller(&1).is_none());
        assert!(list.find_greater(&1).is_none());
        assert!(list.first().is_none());
        assert!(list.last().is_none());
        assert!(list.begin() == list.end());
        assert_eq!(list.iter().count(), 0);
    }

    #[test]
    fn lookups_skip_removed_nodes() {
        let list = SkipList::new();
        for key in [1u64, 2, 3, 4, 5] {
            list.insert(key).unwrap();
        }

        // Claimed by an eraser but still linked
        let three = list.find(&3).unwrap();
        three.node_ref().removed.store(true, Ordering::SeqCst);

        assert_eq!(value(list.find(&3)), None);
        assert_eq!(value(list.find_greater_or_equal(&3)), Some(4));
        assert_eq!(value(list.find_greater(&2)), Some(4));
        assert_eq!(value(list.find_smaller(&4)), Some(2));
        assert_eq!(value(list.find_smaller_or_equal(&3)), Some(2));
        assert_eq!(keys(&list), vec![1, 2, 4, 5]);

        three.node_ref().removed.store(false, Ordering::SeqCst);
        assert_eq!(value(list.find(&3)), Some(3));
    }

    #[test]
    fn removed_duplicates_do_not_hide_equal_neighbours() {
        let list = SkipList::new();
        list.insert(3u64).unwrap();
        list.insert_multi(5);
        list.insert_multi(5);

        // The later of the two fives is claimed but still linked
        let later = list.iter().nth(2).unwrap();
        later.node_ref().removed.store(true, Ordering::SeqCst);

        assert_eq!(value(list.find_smaller(&6)), Some(5));
        assert_eq!(value(list.find_smaller_or_equal(&6)), Some(5));
        assert_eq!(value(list.find(&5)), Some(5));
        assert_eq!(value(list.last()), Some(5));
        assert_eq!(keys(&list), vec![3, 5]);

        later.node_ref().removed.store(false, Ordering::SeqCst);
        assert_eq!(keys(&list), vec![3, 5, 5]);
    }

    #[test]
    fn cursor_keeps_equal_keys_after_erasing_its_entry() {
        let list = SkipList::new();
        for key in [5u64, 5, 5, 9] {
            list.insert_multi(key);
        }

        let mut cursor = list.begin();
        list.erase_entry(cursor.entry().unwrap()).unwrap();
        cursor.move_next();

        let mut seen = Vec::new();
        while !cursor.is_end() {
            seen.push(*cursor.get().unwrap());
            cursor.move_next();
        }
        assert_eq!(seen, vec![5, 5, 9]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn take_hands_back_the_key() {
        let list = SkipList::new();
        for key in ["a", "b", "c"] {
            list.insert(key.to_string()).unwrap();
        }

        assert_eq!(list.take(&"b".to_string()), Ok("b".to_string()));
        assert_eq!(list.take(&"b".to_string()), Err(Error::NotFound));
        assert_eq!(list.len(), 2);
        // Nothing is left behind for the reclaimer
        assert_eq!(list.live_nodes(), 2 + 2);
    }

    #[test]
    fn take_waits_for_handles_on_other_threads() {
        let list = SkipList::new();
        list.insert(7u64).unwrap();
        list.insert(8).unwrap();

        let barrier = Barrier::new(2);
        let released = AtomicBool::new(false);
        thread::scope(|s| {
            s.spawn(|| {
                let entry = list.find(&7).unwrap();
                barrier.wait();
                thread::sleep(Duration::from_millis(20));
                released.store(true, Ordering::SeqCst);
                drop(entry);
            });

            barrier.wait();
            assert_eq!(list.take(&7), Ok(7));
            assert!(released.load(Ordering::SeqCst));
        });
        assert_eq!(keys(&list), vec![8]);
    }

    #[test]
    fn reclaim_local_frees_this_threads_erasures() {
        let list = SkipList::new();
        for key in 0..10u64 {
            list.insert(key).unwrap();
        }
        for key in 0..5u64 {
            list.erase(&key).unwrap();
        }

        let pinned = list.find(&7).unwrap();
        list.erase(&7).unwrap();
        assert_eq!(list.live_nodes(), 10 + 2);

        assert_eq!(list.reclaim_local(), 5);
        assert_eq!(list.live_nodes(), 5 + 2);

        drop(pinned);
        assert_eq!(list.reclaim_local(), 1);
        assert_eq!(list.live_nodes(), 4 + 2);
    }

    #[test]
    fn drop_leaks_entries_behind_forgotten_handles() {
        let payload = Arc::new(());
        {
            let list = SkipList::with_comparator(|a: &(u64, Arc<()>), b: &(u64, Arc<()>)| a.0.cmp(&b.0));
            for key in 0..3 {
                list.insert((key, Arc::clone(&payload))).unwrap();
            }

            let lookup = (1, Arc::clone(&payload));
            std::mem::forget(list.find(&lookup).unwrap());
            drop(lookup);
            assert_eq!(Arc::strong_count(&payload), 4);
        }
        // Keys 0 and 2 are dropped, key 1 stays pinned forever
        assert_eq!(Arc::strong_count(&payload), 2);
    }

    #[test]
    fn handles_outlive_erase() {
        let mut list = SkipList::new();
        for key in 0..10u64 {
            list.insert(key).unwrap();
        }

        {
            let five = list.find(&5).unwrap();
            list.erase(&5).unwrap();
            assert!(five.is_removed());
            // Still readable while pinned
            assert_eq!(*five, 5);
            assert!(list.find(&5).is_none());
        }

        list.reclaim();
        assert_eq!(list.live_nodes(), list.len() + 2);
    }

    #[test]
    fn erase_entry_removes_that_node() {
        let list = SkipList::new();
        list.insert_multi(7u64);
        list.insert_multi(7);
        list.insert_multi(7);
        list.insert(8).unwrap();
        assert_eq!(list.len(), 4);
        assert_eq!(keys(&list), vec![7, 7, 7, 8]);

        let entry = list.find(&7).unwrap();
        assert!(list.erase_entry(entry).is_ok());
        assert_eq!(list.len(), 3);

        assert!(list.erase(&7).is_ok());
        assert!(list.erase(&7).is_ok());
        assert_eq!(list.erase(&7), Err(Error::NotFound));
        assert_eq!(keys(&list), vec![8]);

        // A handle that was already erased
        let eight = list.find(&8).unwrap();
        let again = eight.clone();
        assert!(list.erase_entry(eight).is_ok());
        assert_eq!(list.erase_entry(again), Err(Error::NotFound));
    }

    #[test]
    fn erase_entry_rejects_foreign_handles() {
        let a = SkipList::new();
        let b = SkipList::new();
        a.insert(1u64).unwrap();
        b.insert(1u64).unwrap();

        let entry = a.find(&1).unwrap();
        assert_eq!(b.erase_entry(entry), Err(Error::NotFound));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn custom_comparator_and_options() {
        let options = Options::new().with_fanout(2).with_max_layer(6);
        let list = SkipList::with_options(options, crate::Descend).unwrap();
        for key in [3u64, 1, 4, 5, 9, 2, 6] {
            list.insert(key).unwrap();
        }
        assert_eq!(keys(&list), vec![9, 6, 5, 4, 3, 2, 1]);
        assert_eq!(list.options(), options);

        let by_len = SkipList::with_comparator(|a: &String, b: &String| {
            a.len().cmp(&b.len()).then_with(|| a.cmp(b))
        });
        for word in ["pear", "fig", "banana", "kiwi"] {
            by_len.insert(word.to_string()).unwrap();
        }
        let words: Vec<String> = by_len.iter().map(|entry| entry.key().clone()).collect();
        assert_eq!(words, vec!["fig", "kiwi", "pear", "banana"]);

        assert!(matches!(
            SkipList::<u64>::with_options(Options::new().with_fanout(0), Ascend),
            Err(Error::InvalidOptions(_))
        ));
    }

    #[test]
    fn layer_counters_and_watermark() {
        let options = Options::new().with_fanout(2).with_max_layer(8);
        let list = SkipList::with_options(options, Ascend).unwrap();
        for key in 0..500u64 {
            list.insert(key).unwrap();
        }

        let counted: usize = list
            .layer_entries
            .iter()
            .map(|count| count.load(Ordering::SeqCst))
            .sum();
        assert_eq!(counted, 500);
        let top = list.top_layer.load(Ordering::SeqCst);
        assert!(top > 0 && top < 8);
        assert!(list.layer_entries[top].load(Ordering::SeqCst) > 0);

        for key in 0..500u64 {
            list.erase(&key).unwrap();
        }
        assert!(list.is_empty());
        assert_eq!(list.top_layer.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn keys_are_dropped_exactly_once() {
        struct Counted(u64, Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.1.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let list = SkipList::with_comparator(|a: &Counted, b: &Counted| a.0.cmp(&b.0));
            for key in 0..100 {
                list.insert(Counted(key, Arc::clone(&drops))).unwrap();
            }
            // Rejected duplicates are dropped straight away
            assert!(list.insert(Counted(5, Arc::clone(&drops))).is_err());
            assert_eq!(drops.load(Ordering::SeqCst), 1);

            for key in 0..50 {
                let lookup = Counted(key, Arc::clone(&drops));
                list.erase(&lookup).unwrap();
            }
        }
        // 100 stored, 1 rejected, 50 lookup keys
        assert_eq!(drops.load(Ordering::SeqCst), 151);
    }

    #[test]
    fn concurrent_insert_and_erase_scenario() {
        for _ in 0..50 {
            let list = Arc::new(SkipList::new());
            for key in [1u64, 3, 5, 8] {
                list.insert(key).unwrap();
            }

            let barrier = Arc::new(Barrier::new(2));
            let inserter = {
                let list = Arc::clone(&list);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    list.insert(10).unwrap();
                })
            };
            let eraser = {
                let list = Arc::clone(&list);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    list.erase(&5).unwrap();
                })
            };
            inserter.join().unwrap();
            eraser.join().unwrap();

            assert_eq!(keys(&list), vec![1, 3, 8, 10]);
            assert_eq!(list.len(), 4);
        }
    }

    #[test]
    fn concurrent_disjoint_inserts() {
        let num_threads = 8;
        let per_thread = 500u64;
        let list = Arc::new(SkipList::new());
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles: Vec<_> = (0..num_threads as u64)
            .map(|thread_id| {
                let list = Arc::clone(&list);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    // Interleaved keys so neighbours belong to other threads
                    for i in 0..per_thread {
                        list.insert(i * num_threads as u64 + thread_id).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let total = num_threads as u64 * per_thread;
        assert_eq!(list.len(), total as usize);
        assert_eq!(keys(&list), (0..total).collect::<Vec<_>>());
    }

    #[test]
    fn concurrent_duplicate_inserts_admit_one() {
        let num_threads = 8;
        let list = Arc::new(SkipList::new());
        let barrier = Arc::new(Barrier::new(num_threads));
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..num_threads)
            .map(|_| {
                let list = Arc::clone(&list);
                let barrier = Arc::clone(&barrier);
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    barrier.wait();
                    for key in 0..200u64 {
                        if list.insert(key).is_ok() {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 200);
        assert_eq!(list.len(), 200);
        assert_eq!(keys(&list), (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn stress_test() {
        let num_threads = 8;
        let ops_per_thread = 5_000;
        let universe = 256u64;

        let list = Arc::new(SkipList::new());
        let barrier = Arc::new(Barrier::new(num_threads));
        let net = Arc::new(std::sync::atomic::AtomicIsize::new(0));

        let handles: Vec<_> = (0..num_threads)
            .map(|_| {
                let list = Arc::clone(&list);
                let barrier = Arc::clone(&barrier);
                let net = Arc::clone(&net);
                thread::spawn(move || {
                    let mut rng = rand::rng();
                    barrier.wait();

                    for _ in 0..ops_per_thread {
                        let key = rng.random_range(0..universe);
                        match rng.random_range(0..100) {
                            0..40 => {
                                if list.insert(key).is_ok() {
                                    net.fetch_add(1, Ordering::SeqCst);
                                }
                            }
                            40..70 => {
                                if list.erase(&key).is_ok() {
                                    net.fetch_sub(1, Ordering::SeqCst);
                                }
                            }
                            70..85 => {
                                if let Some(entry) = list.find_greater_or_equal(&key) {
                                    assert!(*entry >= key);
                                }
                            }
                            _ => {
                                // Weakly consistent, but always ascending
                                let mut prev = None;
                                for entry in list.iter().take(32) {
                                    if let Some(prev) = prev {
                                        assert!(*entry > prev);
                                    }
                                    prev = Some(*entry);
                                }
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut list = Arc::into_inner(list).unwrap();
        let final_keys = keys(&list);
        assert_eq!(list.len() as isize, net.load(Ordering::SeqCst));
        assert_eq!(final_keys.len(), list.len());
        assert!(final_keys.windows(2).all(|pair| pair[0] < pair[1]));

        // Only linked nodes and the sentinels survive a full sweep
        list.reclaim();
        assert_eq!(list.live_nodes(), list.len() + 2);
    }

    #[test]
    fn partitioned_mix_matches_model() {
        let num_threads = 4u64;
        let list = Arc::new(SkipList::new());
        let model = Arc::new(Mutex::new(BTreeSet::new()));
        let barrier = Arc::new(Barrier::new(num_threads as usize));

        let handles: Vec<_> = (0..num_threads)
            .map(|thread_id| {
                let list = Arc::clone(&list);
                let model = Arc::clone(&model);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut rng = rand::rng();
                    barrier.wait();

                    // Each thread owns the keys congruent to its id, so the model is exact
                    for _ in 0..3_000 {
                        let key = rng.random_range(0..128u64) * num_threads + thread_id;
                        if rng.random_bool(0.5) {
                            let inserted = list.insert(key).is_ok();
                            assert_eq!(inserted, model.lock().insert(key));
                        } else {
                            let erased = list.erase(&key).is_ok();
                            assert_eq!(erased, model.lock().remove(&key));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let model = model.lock();
        assert_eq!(list.len(), model.len());
        assert_eq!(keys(&list), model.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn iteration_during_mutation_never_sees_freed_nodes() {
        let list = Arc::new(SkipList::new());
        for key in 0..1_000u64 {
            list.insert(key).unwrap();
        }

        let barrier = Arc::new(Barrier::new(3));
        let eraser = {
            let list = Arc::clone(&list);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for key in (0..1_000u64).filter(|key| key % 2 == 1) {
                    list.erase(&key).unwrap();
                }
            })
        };
        let inserter = {
            let list = Arc::clone(&list);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for key in 1_000..1_500u64 {
                    list.insert(key).unwrap();
                }
            })
        };

        barrier.wait();
        for _ in 0..20 {
            let mut cursor = list.begin();
            let mut prev: Option<u64> = None;
            while let Ok(&key) = cursor.get() {
                if let Some(prev) = prev {
                    assert!(key > prev);
                }
                prev = Some(key);
                cursor.move_next();
            }
        }

        eraser.join().unwrap();
        inserter.join().unwrap();

        assert_eq!(list.len(), 500 + 500);
        let remaining = keys(&list);
        assert!(remaining.iter().all(|key| *key >= 1_000 || key % 2 == 0));
    }
}
