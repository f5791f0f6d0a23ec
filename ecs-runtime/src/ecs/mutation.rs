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
//! Deferred mutation log
//!
//! Structural changes issued during a tick are not applied immediately.
//! They are appended to a task list for their component type and applied in
//! submission order by the next flush, which runs before any system of that
//! tick executes. Each type has its own lock, so systems touching different
//! types never contend while logging.

use crate::ecs::{Component, ComponentId, Entity};
use crate::pool::{BufferPool, PoolConfig, PooledBuffer};
use parking_lot::{Mutex, RwLock};
use std::any::Any;

/// A structural change to one component of one entity
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation<T> {
    /// Attach `T`, replacing an existing record
    Add(T),
    /// Detach `T` if present
    Remove,
}

/// Type-erased operation of an [`OpTask`]
pub enum Op {
    /// Add with the boxed record
    Add(Box<dyn Any + Send>),
    /// Remove
    Remove,
}

/// One queued operation
pub struct OpTask {
    /// Target entity
    pub entity: Entity,
    /// Operation to apply
    pub op: Op,
}

impl OpTask {
    /// Erase a typed mutation into a task
    pub fn new<T: Component>(entity: Entity, mutation: Mutation<T>) -> Self {
        let op = match mutation {
            Mutation::Add(value) => Op::Add(Box::new(value)),
            Mutation::Remove => Op::Remove,
        };
        OpTask { entity, op }
    }

    /// Whether this is an add
    pub fn is_add(&self) -> bool {
        matches!(self.op, Op::Add(_))
    }
}

impl std::fmt::Debug for OpTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = if self.is_add() { "Add" } else { "Remove" };
        f.debug_struct("OpTask")
            .field("entity", &self.entity)
            .field("op", &op)
            .finish()
    }
}

/// Per-type task lists plus the destroy queue
pub struct MutationLog {
    lists: RwLock<Vec<Mutex<PooledBuffer<OpTask>>>>,
    destroys: Mutex<Vec<Entity>>,
    buffers: BufferPool<OpTask>,
}

impl MutationLog {
    /// Create an empty log recycling its lists through a pool built from `config`
    pub fn new(config: PoolConfig) -> Self {
        MutationLog {
            lists: RwLock::new(Vec::new()),
            destroys: Mutex::new(Vec::new()),
            buffers: BufferPool::with_config(config),
        }
    }

    /// Append a task to the list of component type `id`
    pub fn push(&self, id: ComponentId, task: OpTask) {
        {
            let lists = self.lists.read();
            if let Some(list) = lists.get(id.index()) {
                list.lock().push(task);
                return;
            }
        }

        let mut lists = self.lists.write();
        while lists.len() <= id.index() {
            lists.push(Mutex::new(self.buffers.acquire()));
        }
        lists[id.index()].lock().push(task);
    }

    /// Queue the destruction of `entity`
    pub fn request_destroy(&self, entity: Entity) {
        self.destroys.lock().push(entity);
    }

    /// Take every non-empty task list, leaving fresh pooled lists behind
    ///
    /// Lists are returned in component id order.
    pub fn drain(&self) -> Vec<(ComponentId, PooledBuffer<OpTask>)> {
        let lists = self.lists.read();
        let mut drained = Vec::new();
        for (index, list) in lists.iter().enumerate() {
            let mut list = list.lock();
            if list.is_empty() {
                continue;
            }
            let taken = std::mem::replace(&mut *list, self.buffers.acquire());
            drained.push((ComponentId::new(index as u16), taken));
        }
        drained
    }

    /// Take the destroy queue, in request order
    pub fn drain_destroys(&self) -> Vec<Entity> {
        std::mem::take(&mut *self.destroys.lock())
    }

    /// Number of queued tasks and destroy requests
    pub fn pending(&self) -> usize {
        let tasks: usize = self.lists.read().iter().map(|list| list.lock().len()).sum();
        tasks + self.destroys.lock().len()
    }

    /// Recycling statistics of the task buffers
    pub fn buffer_stats(&self) -> crate::pool::PoolStats {
        self.buffers.stats()
    }
}
