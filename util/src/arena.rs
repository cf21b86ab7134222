use std::marker::PhantomData;

/// Vec-backed storage that hands out typed ids.
///
/// Removing a value leaves an empty slot behind; slots are never reused,
/// so an id that outlives its value resolves to `None` instead of aliasing
/// a newer entry.
#[derive(Debug, Hash, PartialEq, Eq, Clone)]
pub struct Arena<K, V> {
    slots: Vec<Option<V>>,
    live: usize,
    _phantom: PhantomData<K>,
}

impl<K, V> Default for Arena<K, V> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<K, V> Arena<K, V> {
    /// Create a new `Arena` with the given capacity.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            slots: Vec::with_capacity(cap),
            live: 0,
            _phantom: PhantomData,
        }
    }

    /// Number of live values
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// True if there are no live values
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl<K: From<usize>, V> Arena<K, V> {
    /// Store `v`, and return an id that can be used to retrieve it later.
    #[inline]
    pub fn push(&mut self, v: V) -> K {
        let id = self.slots.len().into();
        self.slots.push(Some(v));
        self.live += 1;
        id
    }
}

impl<K: Into<usize>, V> Arena<K, V> {
    /// Get the value with id `k`, if it is still live.
    #[inline]
    pub fn get(&self, k: K) -> Option<&V> {
        self.slots.get(k.into()).and_then(Option::as_ref)
    }

    /// Get a mutable reference to the value with id `k`, if it is still live.
    #[inline]
    pub fn get_mut(&mut self, k: K) -> Option<&mut V> {
        self.slots.get_mut(k.into()).and_then(Option::as_mut)
    }

    /// Remove the value with id `k` and return it.
    pub fn remove(&mut self, k: K) -> Option<V> {
        let v = self.slots.get_mut(k.into()).and_then(Option::take);
        if v.is_some() {
            self.live -= 1;
        }
        v
    }
}
