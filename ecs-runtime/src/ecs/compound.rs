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
//! Compound sets
//!
//! A compound is the sorted list of component ids an entity currently has.
//! Sets are small (bounded by the number of component types on one entity),
//! so positional insertion into a sorted vector beats any tree or hash.

use crate::ecs::ComponentId;

/// Sorted set of component ids owned by one entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound {
    ids: Vec<ComponentId>,
}

impl Compound {
    /// Create an empty compound
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `id`; returns false if it was already present
    pub fn insert(&mut self, id: ComponentId) -> bool {
        match self.ids.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.ids.insert(pos, id);
                true
            }
        }
    }

    /// Remove `id`; returns false if it was absent
    pub fn remove(&mut self, id: ComponentId) -> bool {
        match self.ids.binary_search(&id) {
            Ok(pos) => {
                self.ids.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Check membership of a single id
    pub fn contains(&self, id: ComponentId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Check that every id of the sorted slice `required` is present
    pub fn contains_all(&self, required: &[ComponentId]) -> bool {
        debug_assert!(required.windows(2).all(|w| w[0] <= w[1]));
        let mut own = self.ids.iter();
        'outer: for wanted in required {
            for id in own.by_ref() {
                if id == wanted {
                    continue 'outer;
                }
                if id > wanted {
                    return false;
                }
            }
            return false;
        }
        true
    }

    /// Number of ids
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Check if the entity has no components
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in ascending order
    pub fn as_slice(&self) -> &[ComponentId] {
        &self.ids
    }
}
