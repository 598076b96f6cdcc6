use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;

use crate::comparator::{Ascend, Comparator};
use crate::error::Error;
use crate::node::Node;
use crate::skiplist::SkipList;

/// A handle on one entry of a [`SkipList`].
///
/// The handle keeps the node alive: an entry erased while a handle exists is
/// unlinked at once but freed only after the last handle is dropped.
pub struct Entry<'a, K, C = Ascend> {
    list: &'a SkipList<K, C>,
    node: *mut Node<K>,
}

impl<'a, K, C> Entry<'a, K, C> {
    // Takes over a reference the caller already holds on `node`
    pub(crate) fn new(list: &'a SkipList<K, C>, node: *mut Node<K>) -> Self {
        Entry { list, node }
    }

    pub fn key(&self) -> &K {
        unsafe { (*self.node).key() }
    }

    /// The entry was erased after this handle was taken.
    pub fn is_removed(&self) -> bool {
        unsafe { (*self.node).is_removed() }
    }

    pub(crate) fn list(&self) -> &'a SkipList<K, C> {
        self.list
    }

    // Hands the reference back to the caller
    pub(crate) fn into_raw(self) -> *mut Node<K> {
        ManuallyDrop::new(self).node
    }

    #[cfg(test)]
    pub(crate) fn node_ref(&self) -> &Node<K> {
        unsafe { &*self.node }
    }
}

impl<K, C> Deref for Entry<'_, K, C> {
    type Target = K;

    fn deref(&self) -> &K {
        self.key()
    }
}

impl<K, C> Clone for Entry<'_, K, C> {
    fn clone(&self) -> Self {
        unsafe { (*self.node).grab() };
        Entry {
            list: self.list,
            node: self.node,
        }
    }
}

impl<K, C> Drop for Entry<'_, K, C> {
    fn drop(&mut self) {
        unsafe { (*self.node).release() };
    }
}

impl<K: fmt::Debug, C> fmt::Debug for Entry<'_, K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key().fmt(f)
    }
}

/// A position in a [`SkipList`], or the end.
///
/// The cursor pins the node it rests on, so it stays usable even if that entry
/// is erased; [`move_next`](Cursor::move_next) and
/// [`move_prev`](Cursor::move_prev) then resume from its key.
pub struct Cursor<'a, K, C = Ascend> {
    list: &'a SkipList<K, C>,
    // Null at the end
    node: *mut Node<K>,
}

impl<'a, K, C> Cursor<'a, K, C> {
    pub(crate) fn new(list: &'a SkipList<K, C>, node: Option<*mut Node<K>>) -> Self {
        Cursor {
            list,
            node: node.unwrap_or(std::ptr::null_mut()),
        }
    }

    pub fn is_end(&self) -> bool {
        self.node.is_null()
    }

    pub fn get(&self) -> Result<&K, Error> {
        if self.node.is_null() {
            return Err(Error::InvalidIterator);
        }
        Ok(unsafe { (*self.node).key() })
    }

    /// A handle on the current entry, `None` at the end.
    pub fn entry(&self) -> Option<Entry<'a, K, C>> {
        if self.node.is_null() {
            return None;
        }
        unsafe { (*self.node).grab() };
        Some(Entry::new(self.list, self.node))
    }
}

impl<K, C: Comparator<K>> Cursor<'_, K, C> {
    /// Step to the next entry. Stays put at the end.
    pub fn move_next(&mut self) {
        if self.node.is_null() {
            return;
        }

        let next = unsafe { self.list.successor(self.node) };
        unsafe { (*self.node).release() };
        self.node = next.unwrap_or(std::ptr::null_mut());
    }

    /// Step to the previous entry. From the end this is the last entry; from
    /// the first entry it is the end.
    pub fn move_prev(&mut self) {
        let prev = unsafe { self.list.predecessor(self.node) };
        if !self.node.is_null() {
            unsafe { (*self.node).release() };
        }
        self.node = prev.unwrap_or(std::ptr::null_mut());
    }
}

impl<K, C> Clone for Cursor<'_, K, C> {
    fn clone(&self) -> Self {
        if !self.node.is_null() {
            unsafe { (*self.node).grab() };
        }
        Cursor {
            list: self.list,
            node: self.node,
        }
    }
}

impl<K, C> PartialEq for Cursor<'_, K, C> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.list, other.list) && self.node == other.node
    }
}

impl<K, C> Eq for Cursor<'_, K, C> {}

impl<K, C> Drop for Cursor<'_, K, C> {
    fn drop(&mut self) {
        if !self.node.is_null() {
            unsafe { (*self.node).release() };
        }
    }
}

/// Ascending iterator over the entries of a [`SkipList`].
pub struct Iter<'a, K, C = Ascend> {
    cursor: Cursor<'a, K, C>,
}

impl<'a, K, C> Iter<'a, K, C> {
    pub(crate) fn new(cursor: Cursor<'a, K, C>) -> Self {
        Iter { cursor }
    }
}

impl<'a, K, C: Comparator<K>> Iterator for Iter<'a, K, C> {
    type Item = Entry<'a, K, C>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.cursor.entry()?;
        self.cursor.move_next();
        Some(entry)
    }
}
