//! A runtime-capacity ordered container, adapted from the teacher's
//! `replication::shift_array::ShiftArray<T, const A: usize>`. The teacher
//! fixes its capacity at compile time via a const generic because its use
//! case (a persistent-memory LRU node) has a hard-coded byte budget; our
//! fan-out caps (`F_mem_max`, `F_io_max`) are `Config` fields chosen at
//! index-build time, so capacity here is a runtime value and storage is a
//! `Vec` rather than an inline `[Option<T>; A]`. The shift/insert/remove
//! shape stays the same.

#[derive(Debug, Clone)]
pub struct BoundedVec<T> {
    cap: usize,
    items: Vec<T>,
}

impl<T> BoundedVec<T> {
    pub fn new(cap: usize) -> Self {
        BoundedVec {
            cap,
            items: Vec::new(),
        }
    }

    pub fn with_items(cap: usize, items: Vec<T>) -> Self {
        debug_assert!(items.len() <= cap);
        BoundedVec { cap, items }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.cap
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.items.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.items.get_mut(idx)
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    /// Find the index of the first element not ordered strictly before `key`
    /// under `key_of`, mirroring `ShiftArray::find`'s linear ordered scan.
    pub fn find_by<K: PartialOrd>(&self, key: &K, key_of: impl Fn(&T) -> K) -> usize {
        for (idx, item) in self.items.iter().enumerate() {
            if key_of(item) >= *key {
                return idx;
            }
        }
        self.items.len()
    }

    pub fn push_back(&mut self, val: T) {
        assert!(!self.is_full(), "BoundedVec at capacity {}", self.cap);
        self.items.push(val);
    }

    pub fn insert(&mut self, idx: usize, val: T) {
        assert!(!self.is_full(), "BoundedVec at capacity {}", self.cap);
        self.items.insert(idx, val);
    }

    pub fn remove(&mut self, idx: usize) -> T {
        self.items.remove(idx)
    }

    /// Splits off everything after `idx` (inclusive of `idx` stays in
    /// `self`) into a new `BoundedVec` with the same capacity.
    pub fn split_after(&mut self, idx: usize) -> BoundedVec<T> {
        assert!(idx < self.items.len());
        let rest = self.items.split_off(idx + 1);
        BoundedVec {
            cap: self.cap,
            items: rest,
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_by_scans_ascending() {
        let bv = BoundedVec::with_items(4, vec![1, 3, 5, 7]);
        assert_eq!(bv.find_by(&4, |x| *x), 2);
        assert_eq!(bv.find_by(&0, |x| *x), 0);
        assert_eq!(bv.find_by(&8, |x| *x), 4);
    }

    #[test]
    fn split_after_keeps_prefix() {
        let mut bv = BoundedVec::with_items(4, vec![1, 2, 3, 4]);
        let tail = bv.split_after(1);
        assert_eq!(bv.as_slice(), &[1, 2]);
        assert_eq!(tail.as_slice(), &[3, 4]);
    }

    #[test]
    #[should_panic]
    fn push_past_capacity_panics() {
        let mut bv = BoundedVec::with_items(2, vec![1, 2]);
        bv.push_back(3);
    }
}
