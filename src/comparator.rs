use std::cmp::Ordering;

/// Total order over the keys stored in a [`SkipList`](crate::SkipList).
///
/// Any auxiliary context the ordering needs lives in the comparator value itself.
/// Sentinels never reach the comparator.
pub trait Comparator<K: ?Sized> {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Orders keys by their [`Ord`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ascend;

impl<K: Ord + ?Sized> Comparator<K> for Ascend {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Reverse of [`Ascend`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Descend;

impl<K: Ord + ?Sized> Comparator<K> for Descend {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        b.cmp(a)
    }
}

impl<K: ?Sized, F> Comparator<K> for F
where
    F: Fn(&K, &K) -> Ordering,
{
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        self(a, b)
    }
}
