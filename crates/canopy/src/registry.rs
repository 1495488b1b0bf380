//! Keyed service registry
//!
//! A bucketed hash table from [`TypeKey`] to a value, used for frozen
//! component entries and for per-graph bound-service caches. It exists instead
//! of a std map so lookups can be answered from key components (type ids and
//! qualifier) without constructing a key, and so `put` can report the replaced
//! value which is the override mechanism of declaration builders.

use std::any::TypeId;

use crate::key::{hash_parts, Qualifier, TypeKey};

struct Node<V> {
    key: TypeKey,
    value: V,
    next: Option<Box<Node<V>>>,
}

/// Hash table keyed by [`TypeKey`] with per-bucket chaining.
pub struct KeyedRegistry<V> {
    table: Box<[Option<Box<Node<V>>>]>,
    mask: u64,
    len: usize,
}

impl<V> KeyedRegistry<V> {
    /// Create a registry sized for the given number of entries.
    ///
    /// The table size is the next power of two at or above twice the
    /// requested capacity, so buckets stay short at the declared load.
    pub fn with_capacity(capacity: usize) -> Self {
        let size = (capacity.max(1) * 2).next_power_of_two();
        let mut table = Vec::with_capacity(size);
        table.resize_with(size, || None);
        Self {
            table: table.into_boxed_slice(),
            mask: (size - 1) as u64,
            len: 0,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket(&self, hash: u64) -> usize {
        (hash & self.mask) as usize
    }

    /// Associate `value` with `key`.
    ///
    /// Replaces in place and returns the previous value when the key is
    /// already present.
    pub fn put(&mut self, key: TypeKey, value: V) -> Option<V> {
        let index = self.bucket(key.hash_value());
        let mut cursor = &mut self.table[index];
        while let Some(node) = cursor {
            if node.key == key {
                return Some(std::mem::replace(&mut node.value, value));
            }
            cursor = &mut node.next;
        }
        *cursor = Some(Box::new(Node {
            key,
            value,
            next: None,
        }));
        self.len += 1;
        None
    }

    /// Look up the value for `key`.
    pub fn get(&self, key: &TypeKey) -> Option<&V> {
        let index = self.bucket(key.hash_value());
        let mut cursor = &self.table[index];
        while let Some(node) = cursor {
            if node.key == *key {
                return Some(&node.value);
            }
            cursor = &node.next;
        }
        None
    }

    /// Look up by key components without constructing a key.
    pub fn get_by_type(
        &self,
        return_id: TypeId,
        argument_id: Option<TypeId>,
        qualifier: Option<&Qualifier>,
    ) -> Option<&V> {
        let hash = hash_parts(return_id, argument_id, qualifier);
        let index = self.bucket(hash);
        let mut cursor = &self.table[index];
        while let Some(node) = cursor {
            if node.key.return_id() == return_id
                && node.key.argument_id() == argument_id
                && node.key.qualifier() == qualifier
            {
                return Some(&node.value);
            }
            cursor = &node.next;
        }
        None
    }

    /// True if `key` is present.
    pub fn contains_key(&self, key: &TypeKey) -> bool {
        self.get(key).is_some()
    }

    /// Remove and return the value for `key`.
    pub fn remove(&mut self, key: &TypeKey) -> Option<V> {
        let index = self.bucket(key.hash_value());
        let mut cursor = &mut self.table[index];
        loop {
            let matches = match cursor {
                Some(node) => node.key == *key,
                None => return None,
            };
            if matches {
                let mut node = cursor.take()?;
                *cursor = node.next.take();
                self.len -= 1;
                return Some(node.value);
            }
            cursor = match cursor {
                Some(node) => &mut node.next,
                None => return None,
            };
        }
    }

    /// Run `action` for every key/value pair.
    pub fn for_each(&self, mut action: impl FnMut(&TypeKey, &V)) {
        for slot in self.table.iter() {
            let mut cursor = slot;
            while let Some(node) = cursor {
                action(&node.key, &node.value);
                cursor = &node.next;
            }
        }
    }

    /// Collect all keys.
    pub fn keys(&self) -> Vec<TypeKey> {
        let mut keys = Vec::with_capacity(self.len);
        self.for_each(|key, _| keys.push(key.clone()));
        keys
    }
}

impl<V: Clone> Clone for KeyedRegistry<V> {
    fn clone(&self) -> Self {
        let mut copy = Self::with_capacity(self.len);
        self.for_each(|key, value| {
            copy.put(key.clone(), value.clone());
        });
        copy
    }
}

impl<V> std::fmt::Debug for KeyedRegistry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedRegistry")
            .field("len", &self.len)
            .field("table_size", &self.table.len())
            .finish()
    }
}
