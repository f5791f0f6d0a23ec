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
//! World management
//!
//! The World is the central container for all ECS data: the component
//! table, entity lifecycles, the deferred mutation log and the membership
//! index. It is shared behind an `Arc` between the runtime, the flush jobs
//! and the systems running on the worker pool.

use crate::ecs::component::short_type_name;
use crate::ecs::membership::{MembershipEvent, MembershipIndex};
use crate::ecs::mutation::{Mutation, MutationLog, Op, OpTask};
use crate::ecs::storage::{ComponentStorage, ErasedStorage};
use crate::ecs::{
    Component, ComponentId, ComponentInfo, ComponentKind, Entity, EntityAllocator, Requirement,
    RequirementSet,
};
use crate::error::{Result, RuntimeError};
use crate::pool::{PoolConfig, PooledBuffer};
use crate::worker::{TaskGroup, WorkerPool};
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Storage of one registered component type
pub struct ComponentColumn {
    info: ComponentInfo,
    pub(crate) storage: RwLock<Box<dyn ErasedStorage>>,
}

impl ComponentColumn {
    /// Registration record of this column
    pub fn info(&self) -> &ComponentInfo {
        &self.info
    }

    /// Number of records currently stored
    pub fn len(&self) -> usize {
        self.storage.read().len()
    }

    /// Check if the column holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Component types with at least one queued task
    pub types: usize,
    /// Tasks applied to storage
    pub applied: usize,
    /// Tasks dropped because their entity was dead or the payload was invalid
    pub skipped: usize,
    /// Entities destroyed
    pub destroyed: usize,
}

#[derive(Default)]
struct FlushCounters {
    applied: AtomicUsize,
    skipped: AtomicUsize,
}

/// The main ECS world container
pub struct World {
    columns: RwLock<Vec<Arc<ComponentColumn>>>,
    type_ids: RwLock<HashMap<TypeId, ComponentId>>,
    entities: RwLock<EntityAllocator>,
    log: MutationLog,
    membership: MembershipIndex,
}

impl World {
    /// Create an empty world whose mutation log recycles buffers per `task_buffers`
    pub fn new(task_buffers: PoolConfig) -> Self {
        World {
            columns: RwLock::new(Vec::new()),
            type_ids: RwLock::new(HashMap::new()),
            entities: RwLock::new(EntityAllocator::new()),
            log: MutationLog::new(task_buffers),
            membership: MembershipIndex::new(),
        }
    }

    /// Register component type `T`, returning its id
    ///
    /// Registering a type again returns the existing id and keeps its kind.
    pub fn register_component<T: Component>(&self, kind: ComponentKind) -> Result<ComponentId> {
        self.register_with(
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
            kind,
            || Box::new(ComponentStorage::<T>::new()),
        )
    }

    /// Register the component type named by a requirement
    pub fn register_requirement(&self, requirement: &Requirement) -> Result<ComponentId> {
        self.register_with(
            requirement.type_id(),
            requirement.type_name(),
            ComponentKind::Normal,
            || requirement.make_storage(),
        )
    }

    fn register_with(
        &self,
        type_id: TypeId,
        name: &'static str,
        kind: ComponentKind,
        make_storage: impl FnOnce() -> Box<dyn ErasedStorage>,
    ) -> Result<ComponentId> {
        if let Some(id) = self.type_ids.read().get(&type_id) {
            return Ok(self.check_kind(*id, kind));
        }

        // LOCK ORDERING: type_ids before columns
        let mut type_ids = self.type_ids.write();
        if let Some(id) = type_ids.get(&type_id) {
            return Ok(self.check_kind(*id, kind));
        }
        let mut columns = self.columns.write();
        if columns.len() >= ComponentId::MAX {
            return Err(RuntimeError::InvalidConfig(format!(
                "cannot register {name}: component id space exhausted"
            )));
        }

        let id = ComponentId::new(columns.len() as u16);
        columns.push(Arc::new(ComponentColumn {
            info: ComponentInfo { id, name, kind },
            storage: RwLock::new(make_storage()),
        }));
        type_ids.insert(type_id, id);
        tracing::debug!(component = short_type_name(name), %id, ?kind, "component registered");
        Ok(id)
    }

    fn check_kind(&self, id: ComponentId, kind: ComponentKind) -> ComponentId {
        if let Some(column) = self.column(id) {
            if column.info.kind != kind && kind != ComponentKind::Normal {
                tracing::warn!(
                    component = column.info.name,
                    "already registered as {:?}, ignoring {:?}",
                    column.info.kind,
                    kind
                );
            }
        }
        id
    }

    /// Resolve declared requirements into a set, registering unseen types
    pub fn resolve(&self, requirements: &[Requirement]) -> Result<RequirementSet> {
        let mut entries = Vec::with_capacity(requirements.len());
        for requirement in requirements {
            entries.push((self.register_requirement(requirement)?, requirement.access()));
        }
        Ok(RequirementSet::new(entries))
    }

    /// Id of `T`, if registered
    pub fn component_id<T: Component>(&self) -> Option<ComponentId> {
        self.type_ids.read().get(&TypeId::of::<T>()).copied()
    }

    /// Registration record of `id`
    pub fn component_info(&self, id: ComponentId) -> Option<ComponentInfo> {
        self.column(id).map(|column| column.info.clone())
    }

    /// Number of registered component types
    pub fn component_count(&self) -> usize {
        self.columns.read().len()
    }

    /// Column of `id`
    pub fn column(&self, id: ComponentId) -> Option<Arc<ComponentColumn>> {
        self.columns.read().get(id.index()).cloned()
    }

    /// Every column, indexed by component id
    pub fn columns(&self) -> Vec<Arc<ComponentColumn>> {
        self.columns.read().clone()
    }

    /// Run `f` against the storage of `T`
    pub fn with_storage<T: Component, R>(&self, f: impl FnOnce(&ComponentStorage<T>) -> R) -> Result<R> {
        let type_name = std::any::type_name::<T>();
        let id = self
            .component_id::<T>()
            .ok_or(RuntimeError::UnknownComponent(type_name))?;
        let column = self.column(id).ok_or(RuntimeError::UnknownComponent(type_name))?;
        let storage = column.storage.read();
        let typed = storage
            .as_any()
            .downcast_ref::<ComponentStorage<T>>()
            .ok_or(RuntimeError::PayloadMismatch(type_name))?;
        Ok(f(typed))
    }

    /// Allocate a new entity
    ///
    /// Allocation is immediate; only destruction is deferred to the flush.
    pub fn spawn(&self) -> Entity {
        self.entities.write().allocate()
    }

    /// Check if an entity is alive
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.read().is_alive(entity)
    }

    /// Number of live entities
    pub fn entity_count(&self) -> usize {
        self.entities.read().alive_count()
    }

    /// Live entities, in slot order
    pub fn entities(&self) -> Vec<Entity> {
        self.entities.read().iter().collect()
    }

    /// Queue a structural change of `T` on `entity` for the next flush
    ///
    /// Unregistered component types are registered as [`ComponentKind::Normal`].
    pub fn enqueue<T: Component>(&self, entity: Entity, mutation: Mutation<T>) -> Result<()> {
        if !self.is_alive(entity) {
            return Err(RuntimeError::DeadEntity(entity));
        }
        let id = match self.component_id::<T>() {
            Some(id) => id,
            None => self.register_component::<T>(ComponentKind::Normal)?,
        };
        self.log.push(id, OpTask::new(entity, mutation));
        Ok(())
    }

    /// Queue the destruction of `entity` for the next flush
    pub fn request_destroy(&self, entity: Entity) -> Result<()> {
        if !self.is_alive(entity) {
            return Err(RuntimeError::DeadEntity(entity));
        }
        self.log.request_destroy(entity);
        Ok(())
    }

    /// Number of queued mutations and destroy requests
    pub fn pending_mutations(&self) -> usize {
        self.log.pending()
    }

    /// The deferred mutation log
    pub fn mutation_log(&self) -> &MutationLog {
        &self.log
    }

    /// The compound membership index
    pub fn membership(&self) -> &MembershipIndex {
        &self.membership
    }

    /// Apply every queued mutation
    ///
    /// One job per component type is submitted to `pool`, keyed by the type
    /// id, and the call blocks until all of them finished. Destroy requests
    /// are applied afterwards on the calling thread.
    pub fn flush(self: &Arc<Self>, pool: &WorkerPool) -> Result<FlushStats> {
        let lists = self.log.drain();
        let destroys = self.log.drain_destroys();
        let mut stats = FlushStats {
            types: lists.len(),
            ..FlushStats::default()
        };

        if !lists.is_empty() {
            let counters = Arc::new(FlushCounters::default());
            let group = TaskGroup::new();
            let mut dispatch_error = None;
            for (id, tasks) in lists {
                if dispatch_error.is_some() {
                    tracing::error!(%id, "dropping {} tasks after dispatch failure", tasks.len());
                    counters.skipped.fetch_add(tasks.len(), Ordering::Relaxed);
                    continue;
                }
                let Some(column) = self.column(id) else {
                    tracing::error!(%id, "dropping {} tasks for unregistered component", tasks.len());
                    counters.skipped.fetch_add(tasks.len(), Ordering::Relaxed);
                    continue;
                };
                let world = Arc::clone(self);
                let job_counters = Arc::clone(&counters);
                let job = group.wrap(move || world.apply_tasks(&column, tasks, &job_counters));
                if let Err(err) = pool.execute_keyed(id.index() as u64, job) {
                    tracing::error!(%id, "could not dispatch flush job: {err}");
                    dispatch_error = Some(err);
                }
            }
            // Jobs already handed to the pool must finish before the flush returns
            group.wait();
            if let Some(err) = dispatch_error {
                for entity in destroys {
                    self.log.request_destroy(entity);
                }
                return Err(err);
            }
            stats.applied = counters.applied.load(Ordering::Relaxed);
            stats.skipped = counters.skipped.load(Ordering::Relaxed);
        }

        let mut seen = HashSet::with_capacity(destroys.len());
        for entity in destroys {
            if seen.insert(entity) && self.destroy_now(entity) {
                stats.destroyed += 1;
            }
        }

        tracing::trace!(
            types = stats.types,
            applied = stats.applied,
            skipped = stats.skipped,
            destroyed = stats.destroyed,
            "flush complete"
        );
        Ok(stats)
    }

    fn apply_tasks(&self, column: &ComponentColumn, mut tasks: PooledBuffer<OpTask>, counters: &FlushCounters) {
        let entities = self.entities.read();
        let mut storage = column.storage.write();
        let (mut applied, mut skipped) = (0, 0);

        for task in tasks.drain(..) {
            let entity = task.entity;
            if !entities.is_alive(entity) {
                tracing::warn!(component = column.info.name, %entity, "dropping mutation for dead entity");
                skipped += 1;
                continue;
            }
            match task.op {
                Op::Add(value) => match storage.insert_boxed(entity, value) {
                    Ok(added) => {
                        if added {
                            self.membership.emit(MembershipEvent::Added(entity, column.info.id));
                        }
                        applied += 1;
                    }
                    Err(err) => {
                        tracing::error!(%entity, "mutation rejected: {err}");
                        skipped += 1;
                    }
                },
                Op::Remove => {
                    if storage.remove_entity(entity) {
                        self.membership.emit(MembershipEvent::Removed(entity, column.info.id));
                    }
                    applied += 1;
                }
            }
        }

        counters.applied.fetch_add(applied, Ordering::Relaxed);
        counters.skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    fn destroy_now(&self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        for column in self.columns() {
            column.storage.write().remove_entity(entity);
        }
        let freed = self.entities.write().free(entity);
        if freed {
            self.membership.emit(MembershipEvent::Destroyed(entity));
        }
        freed
    }

    /// Remove every record of disposable component types
    ///
    /// Returns the number of records removed.
    pub fn clear_disposable(&self) -> usize {
        let mut cleared = 0;
        for column in self.columns() {
            if column.info.kind != ComponentKind::Disposable {
                continue;
            }
            let owners = column.storage.write().clear_all();
            cleared += owners.len();
            for owner in owners {
                self.membership.emit(MembershipEvent::Removed(owner, column.info.id));
            }
        }
        cleared
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
