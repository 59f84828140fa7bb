//! Fixed-capacity slot table keyed by small integers. Backs the per-thread
//! open-file table and the process table.

pub struct Table<T> {
    slots: Vec<Option<T>>,
}

impl<T> Table<T> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim the first free slot; `None` when the table is full.
    pub fn add(&mut self, value: T) -> Option<usize> {
        let key = self.slots.iter().position(|s| s.is_none())?;
        self.slots[key] = Some(value);
        Some(key)
    }

    pub fn has_key(&self, key: usize) -> bool {
        self.slots.get(key).is_some_and(|s| s.is_some())
    }

    pub fn get(&self, key: usize) -> Option<&T> {
        self.slots.get(key)?.as_ref()
    }

    pub fn remove(&mut self, key: usize) -> Option<T> {
        self.slots.get_mut(key)?.take()
    }

    pub fn drain(&mut self) -> Vec<T> {
        self.slots.iter_mut().filter_map(|s| s.take()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(k, s)| s.as_ref().map(|v| (k, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_reused_after_removal() {
        let mut table = Table::new(2);
        assert_eq!(table.add('a'), Some(0));
        assert_eq!(table.add('b'), Some(1));
        assert_eq!(table.add('c'), None);
        assert_eq!(table.remove(0), Some('a'));
        assert!(!table.has_key(0));
        assert_eq!(table.add('c'), Some(0));
        assert_eq!(table.get(0), Some(&'c'));
    }
}
