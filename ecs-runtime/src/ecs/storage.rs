// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Per-type component storage
//!
//! [`ComponentStorage`] keeps records in a dense array with a parallel array
//! of owners, plus a sparse table mapping entity slot indices to dense
//! positions. Removal swaps the last record into the hole, so positions are
//! not stable across a flush and records must never be referenced by address
//! across ticks.
//!
//! # Example
//!
//! ```
//! use ecs_runtime::ecs::{Component, ComponentStorage, Entity};
//!
//! struct Health(u32);
//! impl Component for Health {}
//!
//! let mut storage = ComponentStorage::<Health>::new();
//! let entity = Entity::new(1, 0);
//!
//! storage.insert(entity, Health(10));
//! assert!(storage.contains(entity));
//! assert_eq!(storage.get(entity).map(|h| h.0), Some(10));
//! ```

use crate::ecs::{Component, Entity};
use crate::error::{Result, RuntimeError};
use std::any::Any;

const EMPTY: u32 = u32::MAX;

/// Dense storage for one component type
pub struct ComponentStorage<T: Component> {
    /// Entity slot index to dense position, `EMPTY` when absent
    sparse: Vec<u32>,
    /// Owner of each dense record (for swap_remove and generation checks)
    owners: Vec<Entity>,
    values: Vec<T>,
}

impl<T: Component> ComponentStorage<T> {
    /// Create a new empty storage
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a new storage with room for `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        ComponentStorage {
            sparse: Vec::new(),
            owners: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    fn position(&self, entity: Entity) -> Option<usize> {
        let dense = *self.sparse.get(entity.index() as usize)?;
        if dense == EMPTY {
            return None;
        }
        let dense = dense as usize;
        (self.owners[dense] == entity).then_some(dense)
    }

    /// Insert or replace the record of `entity`, returning the previous value
    ///
    /// A record left behind by an older generation of the same slot is
    /// overwritten and not returned.
    pub fn insert(&mut self, entity: Entity, value: T) -> Option<T> {
        let slot = entity.index() as usize;
        if slot >= self.sparse.len() {
            self.sparse.resize(slot + 1, EMPTY);
        }

        let dense = self.sparse[slot];
        if dense != EMPTY {
            let dense = dense as usize;
            let previous = std::mem::replace(&mut self.values[dense], value);
            if self.owners[dense] == entity {
                return Some(previous);
            }
            self.owners[dense] = entity;
            return None;
        }

        self.sparse[slot] = self.values.len() as u32;
        self.values.push(value);
        self.owners.push(entity);

        debug_assert_eq!(self.owners.len(), self.values.len());
        None
    }

    /// Remove the record of `entity`
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let dense = self.position(entity)?;
        let last = self.values.len() - 1;
        if dense != last {
            let moved = self.owners[last];
            self.sparse[moved.index() as usize] = dense as u32;
        }
        self.sparse[entity.index() as usize] = EMPTY;
        self.owners.swap_remove(dense);
        let value = self.values.swap_remove(dense);

        debug_assert_eq!(self.owners.len(), self.values.len());
        Some(value)
    }

    /// Get a reference to the record of `entity`
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.position(entity).map(|dense| &self.values[dense])
    }

    /// Get a mutable reference to the record of `entity`
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.position(entity).map(move |dense| &mut self.values[dense])
    }

    /// Check if an entity has this component
    pub fn contains(&self, entity: Entity) -> bool {
        self.position(entity).is_some()
    }

    /// Get the number of records stored
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the storage is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over `(owner, record)` pairs in dense order
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> + '_ {
        self.owners.iter().copied().zip(self.values.iter())
    }

    /// Iterate mutably over `(owner, record)` pairs in dense order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> + '_ {
        self.owners.iter().copied().zip(self.values.iter_mut())
    }

    /// Owners of every stored record
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.owners.iter().copied()
    }

    /// Dense record slice
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Mutable dense record slice, for bulk updates
    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Remove every record, returning the owners that had one
    pub fn clear(&mut self) -> Vec<Entity> {
        for owner in &self.owners {
            self.sparse[owner.index() as usize] = EMPTY;
        }
        self.values.clear();
        std::mem::take(&mut self.owners)
    }
}

impl<T: Component> Default for ComponentStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased view of a [`ComponentStorage`] used by the flush
pub trait ErasedStorage: Send + Sync {
    /// Upcast for typed access
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for typed access
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Insert a boxed record; returns true when the entity had none before
    fn insert_boxed(&mut self, entity: Entity, value: Box<dyn Any + Send>) -> Result<bool>;

    /// Remove the record of `entity`; returns true when one existed
    fn remove_entity(&mut self, entity: Entity) -> bool;

    /// Check if an entity has a record
    fn contains_entity(&self, entity: Entity) -> bool;

    /// Number of records
    fn len(&self) -> usize;

    /// Check if there are no records
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every record, returning the owners that had one
    fn clear_all(&mut self) -> Vec<Entity>;
}

impl<T: Component> ErasedStorage for ComponentStorage<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn insert_boxed(&mut self, entity: Entity, value: Box<dyn Any + Send>) -> Result<bool> {
        let value = value
            .downcast::<T>()
            .map_err(|_| RuntimeError::PayloadMismatch(std::any::type_name::<T>()))?;
        let existed = self.contains(entity);
        self.insert(entity, *value);
        Ok(!existed)
    }

    fn remove_entity(&mut self, entity: Entity) -> bool {
        self.remove(entity).is_some()
    }

    fn contains_entity(&self, entity: Entity) -> bool {
        self.contains(entity)
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn clear_all(&mut self) -> Vec<Entity> {
        self.clear()
    }
}

/// Constructor stored alongside requirements so declaring a type can register it
pub(crate) fn erased_storage<T: Component>() -> Box<dyn ErasedStorage> {
    Box::new(ComponentStorage::<T>::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct TestComponent {
        x: f32,
        y: f32,
    }

    impl Component for TestComponent {}

    #[test]
    fn test_storage_basic() {
        let mut storage = ComponentStorage::<TestComponent>::new();
        let entity = Entity::new(1, 0);

        let comp = TestComponent { x: 10.0, y: 20.0 };
        assert_eq!(storage.insert(entity, comp), None);

        assert!(storage.contains(entity));
        assert_eq!(storage.get(entity).unwrap().x, 10.0);
        assert_eq!(storage.get(entity).unwrap().y, 20.0);

        let removed = storage.remove(entity);
        assert_eq!(removed, Some(comp));
        assert!(!storage.contains(entity));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_storage_multiple_entities() {
        let mut storage = ComponentStorage::<TestComponent>::new();
        let e1 = Entity::new(1, 0);
        let e2 = Entity::new(2, 0);
        let e3 = Entity::new(3, 0);

        storage.insert(e1, TestComponent { x: 1.0, y: 2.0 });
        storage.insert(e2, TestComponent { x: 3.0, y: 4.0 });
        storage.insert(e3, TestComponent { x: 5.0, y: 6.0 });
        assert_eq!(storage.len(), 3);

        // Remove middle element (swap_remove behavior)
        storage.remove(e2);
        assert_eq!(storage.len(), 2);
        assert!(!storage.contains(e2));
        assert_eq!(storage.get(e1).unwrap().x, 1.0);
        assert_eq!(storage.get(e3).unwrap().x, 5.0);

        let owners: Vec<_> = storage.entities().collect();
        assert_eq!(owners, vec![e1, e3]);
    }

    #[test]
    fn test_storage_update_returns_previous() {
        let mut storage = ComponentStorage::<TestComponent>::new();
        let entity = Entity::new(1, 0);

        storage.insert(entity, TestComponent { x: 1.0, y: 2.0 });
        let previous = storage.insert(entity, TestComponent { x: 10.0, y: 20.0 });

        assert_eq!(previous, Some(TestComponent { x: 1.0, y: 2.0 }));
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get(entity).unwrap().x, 10.0);
    }

    #[test]
    fn test_stale_handle_never_matches() {
        let mut storage = ComponentStorage::<TestComponent>::new();
        let old = Entity::new(4, 0);
        let new = Entity::new(4, 1);

        storage.insert(old, TestComponent { x: 1.0, y: 1.0 });
        assert!(!storage.contains(new));
        assert!(storage.get(new).is_none());
        assert!(storage.remove(new).is_none());

        // New generation takes over the slot
        assert_eq!(storage.insert(new, TestComponent { x: 2.0, y: 2.0 }), None);
        assert!(!storage.contains(old));
        assert_eq!(storage.get(new).unwrap().x, 2.0);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_storage_get_mut_and_iter_mut() {
        let mut storage = ComponentStorage::<TestComponent>::new();
        let a = Entity::new(0, 0);
        let b = Entity::new(1, 0);
        storage.insert(a, TestComponent { x: 1.0, y: 2.0 });
        storage.insert(b, TestComponent { x: 3.0, y: 4.0 });

        if let Some(comp) = storage.get_mut(a) {
            comp.x = 100.0;
        }
        for (_, comp) in storage.iter_mut() {
            comp.y += 1.0;
        }

        assert_eq!(storage.get(a), Some(&TestComponent { x: 100.0, y: 3.0 }));
        assert_eq!(storage.get(b), Some(&TestComponent { x: 3.0, y: 5.0 }));
    }

    #[test]
    fn test_storage_clear_returns_owners() {
        let mut storage = ComponentStorage::<TestComponent>::new();
        let a = Entity::new(0, 0);
        let b = Entity::new(5, 2);
        storage.insert(a, TestComponent { x: 0.0, y: 0.0 });
        storage.insert(b, TestComponent { x: 0.0, y: 0.0 });

        let owners = storage.clear();
        assert_eq!(owners, vec![a, b]);
        assert!(storage.is_empty());
        assert!(!storage.contains(a));

        storage.insert(b, TestComponent { x: 1.0, y: 1.0 });
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_erased_insert_and_mismatch() {
        let mut storage: Box<dyn ErasedStorage> = erased_storage::<TestComponent>();
        let entity = Entity::new(2, 0);

        let added = storage
            .insert_boxed(entity, Box::new(TestComponent { x: 1.0, y: 1.0 }))
            .unwrap();
        assert!(added);
        let added = storage
            .insert_boxed(entity, Box::new(TestComponent { x: 2.0, y: 2.0 }))
            .unwrap();
        assert!(!added);

        let wrong = storage.insert_boxed(entity, Box::new(5u32));
        assert!(matches!(wrong, Err(RuntimeError::PayloadMismatch(_))));

        let typed = storage
            .as_any()
            .downcast_ref::<ComponentStorage<TestComponent>>()
            .unwrap();
        assert_eq!(typed.get(entity).unwrap().x, 2.0);

        assert!(storage.remove_entity(entity));
        assert!(!storage.contains_entity(entity));
        assert!(storage.is_empty());
    }
}
