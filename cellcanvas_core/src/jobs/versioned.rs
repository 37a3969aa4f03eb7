//! Immutable published values.
//!
//! Readers take an `Arc` to the current value and keep using it while a newer
//! one is published; nothing is ever mutated in place.

use std::sync::Arc;

use parking_lot::RwLock;

/// A value tagged with the generation of the job that produced it.
#[derive(Debug)]
pub struct Versioned<T: ?Sized> {
    pub generation: u64,
    pub value: Arc<T>,
}

impl<T: ?Sized> Clone for Versioned<T> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            value: Arc::clone(&self.value),
        }
    }
}

/// Slot holding the latest [`Versioned`] value of one kind.
#[derive(Debug)]
pub struct Published<T: ?Sized> {
    current: RwLock<Option<Versioned<T>>>,
}

impl<T: ?Sized> Default for Published<T> {
    fn default() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }
}

impl<T: ?Sized> Published<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the value unless an equal or newer generation is already
    /// published. Returns whether the value was taken.
    pub fn publish(&self, generation: u64, value: Arc<T>) -> bool {
        let mut current = self.current.write();
        if current
            .as_ref()
            .is_some_and(|existing| existing.generation >= generation)
        {
            return false;
        }
        *current = Some(Versioned { generation, value });
        true
    }

    pub fn current(&self) -> Option<Versioned<T>> {
        self.current.read().clone()
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.current.read().as_ref().map(|v| Arc::clone(&v.value))
    }

    pub fn generation(&self) -> Option<u64> {
        self.current.read().as_ref().map(|v| v.generation)
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_generation_replaces() {
        let slot = Published::new();
        assert!(slot.is_empty());
        assert!(slot.publish(1, Arc::new("first")));
        assert!(slot.publish(3, Arc::new("third")));
        assert_eq!(*slot.get().unwrap(), "third");
        assert_eq!(slot.generation(), Some(3));
    }

    #[test]
    fn older_generation_is_ignored() {
        let slot = Published::new();
        slot.publish(5, Arc::new(5));
        assert!(!slot.publish(4, Arc::new(4)));
        assert!(!slot.publish(5, Arc::new(50)));
        assert_eq!(*slot.get().unwrap(), 5);
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let slot = Published::new();
        slot.publish(1, Arc::new(vec![1, 2]));
        let held = slot.get().unwrap();
        slot.publish(2, Arc::new(vec![3]));
        assert_eq!(*held, vec![1, 2]);
        assert_eq!(slot.current().unwrap().generation, 2);
    }
}
