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
//! System requirements
//!
//! A system declares, once at registration, which component types it reads
//! and which it writes. The declaration drives two things: the checked
//! storage access handed to the system at run time, and conflict detection
//! in the batching algorithm. Two requirement sets conflict as soon as they
//! name the same component type, whatever the access modes.

use crate::ecs::storage::{erased_storage, ErasedStorage};
use crate::ecs::{Component, ComponentId};
use std::any::TypeId;
use std::fmt;

/// Access mode of a requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Access {
    /// Shared access to existing records
    ReadOnly,
    /// Exclusive access to existing records
    ReadWrite,
}

/// Unresolved `(component type, access)` declaration
#[derive(Clone, Copy)]
pub struct Requirement {
    type_id: TypeId,
    type_name: &'static str,
    access: Access,
    make_storage: fn() -> Box<dyn ErasedStorage>,
}

impl Requirement {
    /// Read-only requirement on `T`
    pub fn read<T: Component>() -> Self {
        Self::with_access::<T>(Access::ReadOnly)
    }

    /// Read-write requirement on `T`
    pub fn write<T: Component>() -> Self {
        Self::with_access::<T>(Access::ReadWrite)
    }

    fn with_access<T: Component>(access: Access) -> Self {
        Requirement {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            access,
            make_storage: erased_storage::<T>,
        }
    }

    /// Type id of the required component
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name of the required component
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Declared access mode
    pub fn access(&self) -> Access {
        self.access
    }

    pub(crate) fn make_storage(&self) -> Box<dyn ErasedStorage> {
        (self.make_storage)()
    }
}

impl fmt::Debug for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requirement")
            .field("type_name", &self.type_name)
            .field("access", &self.access)
            .finish()
    }
}

/// Resolved, immutable set of `(ComponentId, Access)` pairs
///
/// Entries are sorted by id. A type declared twice keeps the stronger access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementSet {
    entries: Vec<(ComponentId, Access)>,
}

impl RequirementSet {
    /// Build a set from resolved pairs
    pub fn new(entries: impl IntoIterator<Item = (ComponentId, Access)>) -> Self {
        let mut entries: Vec<_> = entries.into_iter().collect();
        // ReadWrite sorts after ReadOnly, so the last entry per id wins
        entries.sort();
        entries.reverse();
        entries.dedup_by_key(|(id, _)| *id);
        entries.reverse();
        RequirementSet { entries }
    }

    /// Number of distinct component types
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no component type is declared
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the pairs in id order
    pub fn iter(&self) -> impl Iterator<Item = (ComponentId, Access)> + '_ {
        self.entries.iter().copied()
    }

    /// Declared component ids in ascending order
    pub fn ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    /// Declared access for `id`
    pub fn access(&self, id: ComponentId) -> Option<Access> {
        self.entries
            .binary_search_by_key(&id, |(entry, _)| *entry)
            .ok()
            .map(|pos| self.entries[pos].1)
    }

    /// Whether the two sets name any common component type
    pub fn conflicts_with(&self, other: &RequirementSet) -> bool {
        let (mut a, mut b) = (self.entries.iter(), other.entries.iter());
        let (mut x, mut y) = (a.next(), b.next());
        while let (Some((left, _)), Some((right, _))) = (x, y) {
            match left.cmp(right) {
                std::cmp::Ordering::Less => x = a.next(),
                std::cmp::Ordering::Greater => y = b.next(),
                std::cmp::Ordering::Equal => return true,
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position;
    impl Component for Position {}

    fn id(n: u16) -> ComponentId {
        ComponentId::new(n)
    }

    #[test]
    fn test_requirement_constructors() {
        let read = Requirement::read::<Position>();
        let write = Requirement::write::<Position>();
        assert_eq!(read.access(), Access::ReadOnly);
        assert_eq!(write.access(), Access::ReadWrite);
        assert_eq!(read.type_id(), TypeId::of::<Position>());
        assert!(read.type_name().ends_with("Position"));
        assert!(read.make_storage().is_empty());
    }

    #[test]
    fn test_set_sorted_and_merged() {
        let set = RequirementSet::new([
            (id(3), Access::ReadOnly),
            (id(1), Access::ReadOnly),
            (id(3), Access::ReadWrite),
            (id(1), Access::ReadOnly),
        ]);

        assert_eq!(set.len(), 2);
        assert_eq!(set.ids().collect::<Vec<_>>(), vec![id(1), id(3)]);
        assert_eq!(set.access(id(1)), Some(Access::ReadOnly));
        assert_eq!(set.access(id(3)), Some(Access::ReadWrite));
        assert_eq!(set.access(id(2)), None);
    }

    #[test]
    fn test_conflicts() {
        let a = RequirementSet::new([(id(0), Access::ReadOnly), (id(1), Access::ReadWrite)]);
        let b = RequirementSet::new([(id(1), Access::ReadOnly), (id(2), Access::ReadWrite)]);
        let c = RequirementSet::new([(id(3), Access::ReadOnly)]);

        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));
        assert!(!a.conflicts_with(&c));
        assert!(!c.conflicts_with(&RequirementSet::default()));
    }

    #[test]
    fn test_read_read_still_conflicts() {
        let a = RequirementSet::new([(id(5), Access::ReadOnly)]);
        let b = RequirementSet::new([(id(5), Access::ReadOnly)]);
        assert!(a.conflicts_with(&b));
    }
}
