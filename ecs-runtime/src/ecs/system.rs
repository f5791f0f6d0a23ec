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
//! System execution framework
//!
//! Systems contain the per-tick logic. Each system declares its component
//! requirements and the pipeline stages it implements; both are read once at
//! registration. At run time a system receives a [`SystemContext`] giving
//! checked access to the storages it declared and a deferred path for
//! structural changes.

use crate::ecs::mutation::Mutation;
use crate::ecs::storage::ComponentStorage;
use crate::ecs::world::{ComponentColumn, World};
use crate::ecs::{Access, Component, ComponentId, Entity, Requirement, RequirementSet};
use crate::error::{Result, RuntimeError};
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Fixed stages of one tick, in execution order
///
/// Every phase is bracketed by a synchronous "before" and "after" stage that
/// runs on the thread driving the tick. The main stage of a phase runs its
/// batches on the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Before the start phase
    SyncBeforeStart,
    /// First tick of a system
    Start,
    /// After the start phase
    SyncAfterStart,
    /// Before the pre-update phase
    SyncBeforePreUpdate,
    /// Pre-update phase
    PreUpdate,
    /// After the pre-update phase
    SyncAfterPreUpdate,
    /// Before the update phase
    SyncBeforeUpdate,
    /// Update phase
    Update,
    /// After the update phase
    SyncAfterUpdate,
    /// Before the post-update phase
    SyncBeforePostUpdate,
    /// Post-update phase
    PostUpdate,
    /// After the post-update phase
    SyncAfterPostUpdate,
    /// Before the destroy phase
    SyncBeforeDestroy,
    /// Last tick of a system
    Destroy,
    /// After the destroy phase
    SyncAfterDestroy,
}

/// Logical phase a stage belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Runs once for newly registered systems
    Start,
    /// Runs every tick before update
    PreUpdate,
    /// Runs every tick
    Update,
    /// Runs every tick after update
    PostUpdate,
    /// Runs once for stopped systems
    Destroy,
}

impl Stage {
    /// Every stage in execution order
    pub const ALL: [Stage; 15] = [
        Stage::SyncBeforeStart,
        Stage::Start,
        Stage::SyncAfterStart,
        Stage::SyncBeforePreUpdate,
        Stage::PreUpdate,
        Stage::SyncAfterPreUpdate,
        Stage::SyncBeforeUpdate,
        Stage::Update,
        Stage::SyncAfterUpdate,
        Stage::SyncBeforePostUpdate,
        Stage::PostUpdate,
        Stage::SyncAfterPostUpdate,
        Stage::SyncBeforeDestroy,
        Stage::Destroy,
        Stage::SyncAfterDestroy,
    ];

    /// Position in [`Stage::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether this stage runs on the calling thread
    pub fn is_sync(self) -> bool {
        !matches!(
            self,
            Stage::Start | Stage::PreUpdate | Stage::Update | Stage::PostUpdate | Stage::Destroy
        )
    }

    /// Phase this stage belongs to
    pub fn phase(self) -> Phase {
        match self {
            Stage::SyncBeforeStart | Stage::Start | Stage::SyncAfterStart => Phase::Start,
            Stage::SyncBeforePreUpdate | Stage::PreUpdate | Stage::SyncAfterPreUpdate => Phase::PreUpdate,
            Stage::SyncBeforeUpdate | Stage::Update | Stage::SyncAfterUpdate => Phase::Update,
            Stage::SyncBeforePostUpdate | Stage::PostUpdate | Stage::SyncAfterPostUpdate => {
                Phase::PostUpdate
            }
            Stage::SyncBeforeDestroy | Stage::Destroy | Stage::SyncAfterDestroy => Phase::Destroy,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Bitmask of the stages a system implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct StageSet(u16);

impl StageSet {
    /// No stage
    pub const EMPTY: StageSet = StageSet(0);

    /// Set holding the given stages
    pub fn of(stages: &[Stage]) -> Self {
        stages.iter().fold(Self::EMPTY, |set, stage| set.with(*stage))
    }

    /// Copy of this set with `stage` added
    pub fn with(self, stage: Stage) -> Self {
        StageSet(self.0 | (1 << stage.index()))
    }

    /// Check whether `stage` is in the set
    pub fn contains(self, stage: Stage) -> bool {
        self.0 & (1 << stage.index()) != 0
    }

    /// Check if the set is empty
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Stages in the set, in execution order
    pub fn iter(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |stage| self.contains(*stage))
    }
}

impl FromIterator<Stage> for StageSet {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, StageSet::with)
    }
}

/// Identifier assigned to a system at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(u64);

impl SystemId {
    /// Create an id from its raw value
    pub fn new(raw: u64) -> Self {
        SystemId(raw)
    }

    /// Raw value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "System({})", self.0)
    }
}

/// Lifecycle of a registered system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemState {
    /// Registered; runs the start phase on its first tick
    Initializing,
    /// Runs the update phases every tick
    Updating,
    /// Skips the update phases until resumed
    Paused,
    /// Runs the destroy phase on the next tick
    Destroying,
    /// Finished; removed at the end of the tick
    Destroyed,
}

impl SystemState {
    /// Whether a system in this state runs stages of `phase`
    pub fn runs(self, phase: Phase) -> bool {
        match phase {
            Phase::Start => self == SystemState::Initializing,
            Phase::PreUpdate | Phase::Update | Phase::PostUpdate => self == SystemState::Updating,
            Phase::Destroy => self == SystemState::Destroying,
        }
    }
}

/// Lifecycle change requested for a system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Updating to Paused
    Pause,
    /// Paused to Updating
    Resume,
    /// Any live state to Destroying
    Stop,
}

/// Trait for systems run by the stage pipeline
///
/// `requirements` and `stages` are read once, at registration.
pub trait System: Send + 'static {
    /// Component types this system reads or writes
    fn requirements(&self) -> Vec<Requirement>;

    /// Stages this system implements
    fn stages(&self) -> StageSet;

    /// Execute the system for `stage`
    fn run(&mut self, stage: Stage, ctx: &SystemContext<'_>) -> Result<()>;

    /// Get the name of this system; must be unique within a runtime
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

type Callback = Box<dyn FnMut(&SystemContext<'_>) -> Result<()> + Send>;

/// Closure-based system
///
/// ```
/// use ecs_runtime::ecs::{Component, FnSystem, Stage};
///
/// struct Velocity(f32);
/// impl Component for Velocity {}
///
/// let system = FnSystem::new("damping")
///     .write::<Velocity>()
///     .on(Stage::Update, |ctx| {
///         for (_, v) in ctx.write::<Velocity>()?.iter_mut() {
///             v.0 *= 0.9;
///         }
///         Ok(())
///     });
/// ```
pub struct FnSystem {
    name: String,
    requirements: Vec<Requirement>,
    callbacks: Vec<(Stage, Callback)>,
}

impl FnSystem {
    /// Create a system with no requirements and no callbacks
    pub fn new(name: impl Into<String>) -> Self {
        FnSystem {
            name: name.into(),
            requirements: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    /// Declare read-only access to `T`
    pub fn read<T: Component>(mut self) -> Self {
        self.requirements.push(Requirement::read::<T>());
        self
    }

    /// Declare read-write access to `T`
    pub fn write<T: Component>(mut self) -> Self {
        self.requirements.push(Requirement::write::<T>());
        self
    }

    /// Set the callback of `stage`, replacing an earlier one
    pub fn on<F>(mut self, stage: Stage, callback: F) -> Self
    where
        F: FnMut(&SystemContext<'_>) -> Result<()> + Send + 'static,
    {
        self.callbacks.retain(|(existing, _)| *existing != stage);
        self.callbacks.push((stage, Box::new(callback)));
        self
    }
}

impl System for FnSystem {
    fn requirements(&self) -> Vec<Requirement> {
        self.requirements.clone()
    }

    fn stages(&self) -> StageSet {
        self.callbacks.iter().map(|(stage, _)| *stage).collect()
    }

    fn run(&mut self, stage: Stage, ctx: &SystemContext<'_>) -> Result<()> {
        match self.callbacks.iter_mut().find(|(s, _)| *s == stage) {
            Some((_, callback)) => callback(ctx),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Registration data the pipeline keeps next to each system
#[derive(Debug)]
pub(crate) struct SystemMeta {
    pub(crate) id: SystemId,
    pub(crate) name: String,
    pub(crate) requirements: RequirementSet,
}

/// Control requests queued by systems, applied at the start of the next tick
pub(crate) type ControlQueue = Arc<Mutex<Vec<(SystemId, ControlRequest)>>>;

/// State shared by every system call of one tick
pub(crate) struct FrameScope {
    pub(crate) world: Arc<World>,
    columns: Vec<Arc<ComponentColumn>>,
    pub(crate) frame: u64,
    pub(crate) delta: Duration,
    control: ControlQueue,
}

impl FrameScope {
    pub(crate) fn new(world: Arc<World>, frame: u64, delta: Duration, control: ControlQueue) -> Self {
        let columns = world.columns();
        FrameScope {
            world,
            columns,
            frame,
            delta,
            control,
        }
    }
}

/// View of the world handed to a running system
///
/// Storage access is checked against the system's declared requirements.
/// Holding two write guards on the same type from one system deadlocks.
pub struct SystemContext<'a> {
    meta: &'a SystemMeta,
    scope: &'a FrameScope,
    stage: Stage,
}

impl<'a> SystemContext<'a> {
    pub(crate) fn new(meta: &'a SystemMeta, scope: &'a FrameScope, stage: Stage) -> Self {
        SystemContext { meta, scope, stage }
    }

    /// Current frame number, starting at 1
    pub fn frame(&self) -> u64 {
        self.scope.frame
    }

    /// Time elapsed since the previous tick
    pub fn delta(&self) -> Duration {
        self.scope.delta
    }

    /// Stage being executed
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Id of the running system
    pub fn system_id(&self) -> SystemId {
        self.meta.id
    }

    /// Name of the running system
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Id of `T`, if registered
    pub fn component_id<T: Component>(&self) -> Option<ComponentId> {
        self.scope.world.component_id::<T>()
    }

    fn column_for<T: Component>(&self, needed: Access) -> Result<&'a ComponentColumn> {
        let scope: &'a FrameScope = self.scope;
        let component = std::any::type_name::<T>();
        let undeclared = || RuntimeError::UndeclaredAccess {
            system: self.meta.name.clone(),
            component,
        };

        let id = scope.world.component_id::<T>().ok_or_else(undeclared)?;
        let declared = self.meta.requirements.access(id).ok_or_else(undeclared)?;
        if needed == Access::ReadWrite && declared == Access::ReadOnly {
            return Err(RuntimeError::ReadOnlyAccess {
                system: self.meta.name.clone(),
                component,
            });
        }
        scope
            .columns
            .get(id.index())
            .map(|column| column.as_ref())
            .ok_or(RuntimeError::UnknownComponent(component))
    }

    /// Shared access to the storage of `T`
    pub fn read<T: Component>(&self) -> Result<MappedRwLockReadGuard<'a, ComponentStorage<T>>> {
        let column = self.column_for::<T>(Access::ReadOnly)?;
        RwLockReadGuard::try_map(column.storage.read(), |storage| {
            storage.as_any().downcast_ref::<ComponentStorage<T>>()
        })
        .map_err(|_| RuntimeError::PayloadMismatch(std::any::type_name::<T>()))
    }

    /// Exclusive access to the storage of `T`; requires a read-write declaration
    pub fn write<T: Component>(&self) -> Result<MappedRwLockWriteGuard<'a, ComponentStorage<T>>> {
        let column = self.column_for::<T>(Access::ReadWrite)?;
        RwLockWriteGuard::try_map(column.storage.write(), |storage| {
            storage.as_any_mut().downcast_mut::<ComponentStorage<T>>()
        })
        .map_err(|_| RuntimeError::PayloadMismatch(std::any::type_name::<T>()))
    }

    /// Queue adding `value` to `entity`
    pub fn add<T: Component>(&self, entity: Entity, value: T) -> Result<()> {
        self.scope.world.enqueue(entity, Mutation::Add(value))
    }

    /// Queue removing `T` from `entity`
    pub fn remove<T: Component>(&self, entity: Entity) -> Result<()> {
        self.scope.world.enqueue::<T>(entity, Mutation::Remove)
    }

    /// Allocate a new entity; its components arrive with the next flush
    pub fn spawn(&self) -> Entity {
        self.scope.world.spawn()
    }

    /// Queue the destruction of `entity`
    pub fn destroy(&self, entity: Entity) -> Result<()> {
        self.scope.world.request_destroy(entity)
    }

    /// Check if an entity is alive
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.scope.world.is_alive(entity)
    }

    /// Membership lookup of `T` on `entity`; may be stale while the collector runs
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        match self.component_id::<T>() {
            Some(id) => self.scope.world.membership().contains(entity, &[id]),
            None => false,
        }
    }

    /// Membership lookup of several types at once
    pub fn has_all(&self, entity: Entity, ids: &[ComponentId]) -> bool {
        self.scope.world.membership().contains(entity, ids)
    }

    /// Ask the pipeline to stop this system; it runs its destroy stages next tick
    pub fn request_stop(&self) {
        self.scope.control.lock().push((self.meta.id, ControlRequest::Stop));
    }

    /// Ask the pipeline to pause this system from the next tick on
    pub fn request_pause(&self) {
        self.scope.control.lock().push((self.meta.id, ControlRequest::Pause));
    }
}
