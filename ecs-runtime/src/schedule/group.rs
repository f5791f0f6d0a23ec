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
//! Conflict batching
//!
//! A [`SystemGroup`] partitions its systems into an ordered sequence of
//! batches such that no two systems in one batch share a component type.
//! Batch `k + 1` only starts once every system of batch `k` has returned.
//!
//! Placement works on a forest stored in an index arena:
//!
//! 1. Count how many systems reference each component type.
//! 2. Order systems by descending contention, the sum of `count - 1` over
//!    their types. Ties keep insertion order.
//! 3. Place each system one layer below the deepest placed system it
//!    conflicts with, as that system's child. A system conflicting with
//!    nothing starts a new top-level lineage. When several conflicting
//!    systems share the deepest layer, the one with the shortest subtree
//!    becomes the parent, which keeps lineages balanced.
//!
//! Batch `k` is layer `k` of the forest. Two conflicting systems always end
//! up on different layers, because the later one is placed strictly below
//! the earlier one.

use crate::ecs::{RequirementSet, SystemId};
use crate::error::{Result, RuntimeError};
use std::collections::HashMap;
use std::fmt;

/// Evaluation order of a group within a stage
///
/// Groups run front first, then explicit priorities in ascending order, then
/// the append group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Priority(i64);

impl Priority {
    /// Runs before every other group
    pub const FRONT: Priority = Priority(-1);
    /// Runs after every other group; the default
    pub const APPEND: Priority = Priority(99_999_999);

    /// Explicit priority; 0 selects [`Priority::APPEND`]
    ///
    /// Values outside `FRONT..=APPEND` are clamped.
    pub fn new(value: i64) -> Self {
        if value == 0 {
            return Self::APPEND;
        }
        if value < Self::FRONT.0 {
            tracing::warn!(value, "priority below front, clamping");
            return Self::FRONT;
        }
        if value > Self::APPEND.0 {
            tracing::warn!(value, "priority above append, clamping");
            return Self::APPEND;
        }
        Priority(value)
    }

    /// Raw value
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::APPEND
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::FRONT => write!(f, "front"),
            Self::APPEND => write!(f, "append"),
            Priority(value) => write!(f, "{value}"),
        }
    }
}

struct Member {
    id: SystemId,
    requirements: RequirementSet,
}

struct Node {
    member: usize,
    depth: usize,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Number of layers in the subtree rooted here
    height: usize,
}

/// Systems of one stage and priority, with their batch forest
#[derive(Default)]
pub struct SystemGroup {
    members: Vec<Member>,
    nodes: Vec<Node>,
    roots: Vec<usize>,
    dirty: bool,
}

impl SystemGroup {
    /// Create an empty group
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a system; the forest is rebuilt before the next walk
    pub fn insert(&mut self, id: SystemId, requirements: RequirementSet) -> Result<()> {
        if requirements.is_empty() {
            return Err(RuntimeError::EmptyRequirements(id.to_string()));
        }
        if self.contains(id) {
            return Err(RuntimeError::DuplicateSystem(id.to_string()));
        }
        self.members.push(Member { id, requirements });
        self.dirty = true;
        Ok(())
    }

    /// Remove a system; returns false if it was not a member
    pub fn remove(&mut self, id: SystemId) -> bool {
        let before = self.members.len();
        self.members.retain(|member| member.id != id);
        let removed = self.members.len() != before;
        self.dirty |= removed;
        removed
    }

    /// Check if `id` is a member
    pub fn contains(&self, id: SystemId) -> bool {
        self.members.iter().any(|member| member.id == id)
    }

    /// Number of systems
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the group has no systems
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Rebuild the forest if a system was inserted or removed since the last build
    pub fn rebuild(&mut self) {
        if !self.dirty {
            return;
        }
        self.nodes.clear();
        self.roots.clear();

        let mut refcount: HashMap<_, usize> = HashMap::new();
        for member in &self.members {
            for id in member.requirements.ids() {
                *refcount.entry(id).or_default() += 1;
            }
        }

        let contention = |member: &Member| -> usize {
            member
                .requirements
                .ids()
                .map(|id| refcount.get(&id).copied().unwrap_or(1) - 1)
                .sum()
        };
        let mut order: Vec<usize> = (0..self.members.len()).collect();
        order.sort_by_key(|&index| std::cmp::Reverse(contention(&self.members[index])));

        for member in order {
            self.place(member);
        }
        self.dirty = false;
    }

    fn place(&mut self, member: usize) {
        let requirements = &self.members[member].requirements;

        // Deepest conflicting node, shortest subtree among equals
        let mut parent: Option<usize> = None;
        for (index, node) in self.nodes.iter().enumerate() {
            if !self.members[node.member].requirements.conflicts_with(requirements) {
                continue;
            }
            parent = match parent {
                None => Some(index),
                Some(best) => {
                    let current = &self.nodes[best];
                    if node.depth > current.depth
                        || (node.depth == current.depth && node.height < current.height)
                    {
                        Some(index)
                    } else {
                        Some(best)
                    }
                }
            };
        }

        let index = self.nodes.len();
        let depth = parent.map_or(0, |p| self.nodes[p].depth + 1);
        self.nodes.push(Node {
            member,
            depth,
            parent,
            children: Vec::new(),
            height: 1,
        });

        match parent {
            None => self.roots.push(index),
            Some(p) => {
                self.nodes[p].children.push(index);
                let mut child_height = 1;
                let mut cursor = Some(p);
                while let Some(at) = cursor {
                    let node = &mut self.nodes[at];
                    if node.height > child_height {
                        break;
                    }
                    node.height = child_height + 1;
                    child_height = node.height;
                    cursor = node.parent;
                }
            }
        }
    }

    /// Lazy sequence of batches, rebuilding first if needed
    ///
    /// Walking does not consume anything; call again for another walk.
    pub fn batches(&mut self) -> Batches<'_> {
        self.rebuild();
        Batches {
            group: self,
            frontier: None,
        }
    }

    /// Number of batches the group currently produces
    pub fn batch_count(&mut self) -> usize {
        self.rebuild();
        self.nodes.iter().map(|node| node.depth + 1).max().unwrap_or(0)
    }

    /// Systems and their requirements, in insertion order
    pub fn members(&self) -> impl Iterator<Item = (SystemId, &RequirementSet)> + '_ {
        self.members.iter().map(|member| (member.id, &member.requirements))
    }
}

/// Iterator over the batches of a [`SystemGroup`]
///
/// Batch 0 is the set of top-level nodes; batch `k + 1` holds the children
/// of every node in batch `k`. Iteration ends at the first empty batch.
pub struct Batches<'a> {
    group: &'a SystemGroup,
    frontier: Option<Vec<usize>>,
}

impl<'a> Iterator for Batches<'a> {
    type Item = Vec<SystemId>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = match self.frontier.take() {
            None => self.group.roots.clone(),
            Some(frontier) => frontier
                .iter()
                .flat_map(|&index| self.group.nodes[index].children.iter().copied())
                .collect(),
        };
        if next.is_empty() {
            self.frontier = Some(next);
            return None;
        }
        let batch = next
            .iter()
            .map(|&index| self.group.members[self.group.nodes[index].member].id)
            .collect();
        self.frontier = Some(next);
        Some(batch)
    }
}
