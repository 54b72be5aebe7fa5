//! Open-addressed hash map from interned string keys to values.
//!
//! Linear probing with tombstones: a deleted slot is marked rather than
//! emptied so probe sequences that passed through it stay intact. Keys are
//! heap handles of interned strings, so key equality is handle equality;
//! each entry also stores the key's hash so growth can rehash without
//! touching the heap.

use std::mem;

use super::value::Value;
use super::Handle;

/// FNV-1a, the same hash the reference runtime uses for strings.
pub fn hash_str(text: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in text.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

#[derive(Debug, Clone, Copy)]
enum Entry {
    Empty,
    Tombstone,
    Occupied {
        key: Handle,
        hash: u32,
        value: Value,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: Vec<Entry>,
    /// Occupied + tombstone slots; what the load factor is measured on.
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Approximate allocation size, for GC byte accounting.
    pub fn byte_size(&self) -> usize {
        self.entries.capacity() * mem::size_of::<Entry>()
    }

    pub fn get(&self, key: Handle, hash: u32) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        match self.entries[self.find_slot(key, hash)] {
            Entry::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Insert or update. Returns true when the key was not present before.
    pub fn set(&mut self, key: Handle, hash: u32, value: Value) -> bool {
        if (self.count + 1) * 4 > self.entries.len() * 3 {
            self.grow();
        }
        let slot = self.find_slot(key, hash);
        let is_new = !matches!(self.entries[slot], Entry::Occupied { .. });
        // Only a truly empty slot raises the load; tombstones were already
        // counted.
        if matches!(self.entries[slot], Entry::Empty) {
            self.count += 1;
        }
        self.entries[slot] = Entry::Occupied { key, hash, value };
        is_new
    }

    /// Remove a key, leaving a tombstone. Returns true if it was present.
    pub fn delete(&mut self, key: Handle, hash: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let slot = self.find_slot(key, hash);
        if matches!(self.entries[slot], Entry::Occupied { .. }) {
            self.entries[slot] = Entry::Tombstone;
            true
        } else {
            false
        }
    }

    /// Iterate live entries.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, Value)> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Occupied { key, value, .. } => Some((*key, *value)),
            _ => None,
        })
    }

    /// Look up a key by hash plus a caller-supplied equality check on the
    /// key handle. This is how the intern set finds a string by content
    /// before one exists for it.
    pub(crate) fn find_key(&self, hash: u32, mut eq: impl FnMut(Handle) -> bool) -> Option<Handle> {
        if self.entries.is_empty() {
            return None;
        }
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            match self.entries[index] {
                Entry::Empty => return None,
                Entry::Tombstone => {}
                Entry::Occupied {
                    key, hash: stored, ..
                } => {
                    if stored == hash && eq(key) {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// Tombstone every entry whose key fails the predicate. The GC uses
    /// this to drop intern entries for strings about to be swept.
    pub(crate) fn retain_keys(&mut self, keep: impl Fn(Handle) -> bool) {
        for entry in &mut self.entries {
            if let Entry::Occupied { key, .. } = entry {
                if !keep(*key) {
                    *entry = Entry::Tombstone;
                }
            }
        }
    }

    /// Slot for `key`: its occupied slot if present, else the first
    /// tombstone passed (reusable), else the terminating empty slot.
    fn find_slot(&self, key: Handle, hash: u32) -> usize {
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        let mut tombstone = None;
        loop {
            match self.entries[index] {
                Entry::Empty => return tombstone.unwrap_or(index),
                Entry::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Entry::Occupied { key: existing, .. } => {
                    if existing == key {
                        return index;
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// Double the capacity and rehash. Tombstones are not carried over, so
    /// the load factor afterwards reflects true occupancy.
    fn grow(&mut self) {
        let new_cap = (self.entries.len() * 2).max(8);
        let old = mem::replace(&mut self.entries, vec![Entry::Empty; new_cap]);
        self.count = 0;
        for entry in old {
            if let Entry::Occupied { key, hash, value } = entry {
                let slot = self.find_slot(key, hash);
                self.entries[slot] = Entry::Occupied { key, hash, value };
                self.count += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    fn key(heap: &mut Heap, text: &str) -> (Handle, u32) {
        let handle = heap.intern(text);
        (handle, hash_str(text))
    }

    #[test]
    fn test_set_get_update() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let (a, ha) = key(&mut heap, "a");

        assert!(table.set(a, ha, Value::Number(1.0)));
        assert_eq!(table.get(a, ha), Some(Value::Number(1.0)));

        assert!(!table.set(a, ha, Value::Number(2.0)));
        assert_eq!(table.get(a, ha), Some(Value::Number(2.0)));
    }

    #[test]
    fn test_missing_key() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let (a, ha) = key(&mut heap, "a");
        let (b, hb) = key(&mut heap, "b");

        assert_eq!(table.get(a, ha), None);
        table.set(a, ha, Value::Nil);
        assert_eq!(table.get(b, hb), None);
    }

    #[test]
    fn test_delete_leaves_probe_sequences_intact() {
        let mut heap = Heap::new();
        let mut table = Table::new();

        // Enough keys that some collide and probe past each other.
        let keys: Vec<(Handle, u32)> = (0..32)
            .map(|i| key(&mut heap, &format!("key-{}", i)))
            .collect();
        for (i, (k, h)) in keys.iter().enumerate() {
            table.set(*k, *h, Value::Number(i as f64));
        }

        // Delete every other key, then every survivor must still resolve.
        for (k, h) in keys.iter().step_by(2) {
            assert!(table.delete(*k, *h));
        }
        for (i, (k, h)) in keys.iter().enumerate() {
            let expected = if i % 2 == 0 {
                None
            } else {
                Some(Value::Number(i as f64))
            };
            assert_eq!(table.get(*k, *h), expected, "key-{}", i);
        }
    }

    #[test]
    fn test_tombstone_slot_is_reused() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let (a, ha) = key(&mut heap, "a");

        table.set(a, ha, Value::Number(1.0));
        table.delete(a, ha);
        let cap = table.capacity();
        table.set(a, ha, Value::Number(2.0));
        assert_eq!(table.capacity(), cap);
        assert_eq!(table.get(a, ha), Some(Value::Number(2.0)));
    }

    #[test]
    fn test_growth_rehashes_and_drops_tombstones() {
        let mut heap = Heap::new();
        let mut table = Table::new();

        let keys: Vec<(Handle, u32)> = (0..100)
            .map(|i| key(&mut heap, &format!("k{}", i)))
            .collect();
        for (i, (k, h)) in keys.iter().enumerate() {
            table.set(*k, *h, Value::Number(i as f64));
            if i % 3 == 0 {
                table.delete(*k, *h);
            }
        }
        for (i, (k, h)) in keys.iter().enumerate() {
            let expected = if i % 3 == 0 {
                None
            } else {
                Some(Value::Number(i as f64))
            };
            assert_eq!(table.get(*k, *h), expected);
        }
        assert!(table.capacity().is_power_of_two());
    }

    #[test]
    fn test_iter_sees_only_live_entries() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let (a, ha) = key(&mut heap, "a");
        let (b, hb) = key(&mut heap, "b");

        table.set(a, ha, Value::Number(1.0));
        table.set(b, hb, Value::Number(2.0));
        table.delete(a, ha);

        let entries: Vec<_> = table.iter().collect();
        assert_eq!(entries, vec![(b, Value::Number(2.0))]);
    }
}
