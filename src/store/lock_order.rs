//! Lock ordering policy
//!
//! Every multi-row lock request goes through a [`LockSet`]: ids sorted
//! ascending and de-duplicated. Two callers that need the same rows always
//! request them in the same order, whichever one is "source" or
//! "destination", so no cycle of waiters can form.

/// Ordered, de-duplicated set of row keys to lock in a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSet<K> {
    keys: Vec<K>,
}

impl<K: Ord + Copy> LockSet<K> {
    /// Apply the ascending-key policy to caller-supplied ids.
    pub fn order<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = K>,
    {
        let mut keys: Vec<K> = ids.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        Self { keys }
    }

    /// Keys in acquisition order
    #[inline]
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
