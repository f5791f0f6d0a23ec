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
//! Runtime façade
//!
//! [`Runtime`] ties the pieces together: it owns the world, the worker pool
//! and the stage pipeline, and drives one tick at a time:
//!
//! 1. flush the deferred mutation log
//! 2. run every pipeline stage
//! 3. housekeeping: clear disposable components, drop destroyed systems,
//!    resume the membership collector
//!
//! # Example
//!
//! ```
//! use ecs_runtime::{Component, FnSystem, Priority, Runtime, RuntimeConfig, Stage};
//! use std::time::Duration;
//!
//! struct Counter(u32);
//! impl Component for Counter {}
//!
//! let mut runtime = Runtime::new(RuntimeConfig::new().with_worker_threads(2)).unwrap();
//! let entity = runtime.spawn();
//! runtime.add(entity, Counter(0)).unwrap();
//!
//! runtime
//!     .register_system(
//!         FnSystem::new("count").write::<Counter>().on(Stage::Update, |ctx| {
//!             for (_, counter) in ctx.write::<Counter>()?.iter_mut() {
//!                 counter.0 += 1;
//!             }
//!             Ok(())
//!         }),
//!         Priority::default(),
//!     )
//!     .unwrap();
//!
//! runtime.tick(Duration::from_millis(16)).unwrap();
//! let value = runtime.read::<Counter, _>(|s| s.get(entity).map(|c| c.0)).unwrap();
//! assert_eq!(value, Some(1));
//! ```

use crate::config::RuntimeConfig;
use crate::ecs::{
    Component, ComponentId, ComponentKind, ComponentStorage, ControlRequest, Entity, FlushStats,
    FrameScope, MembershipEvent, Mutation, System, SystemId, SystemState, World,
};
use crate::error::{Result, RuntimeError};
use crate::schedule::{Priority, SystemFlow};
use crate::worker::WorkerPool;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Initialized,
    Running,
    Stopped,
}

/// Summary of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Frame number of the tick, starting at 1
    pub frame: u64,
    /// Delta passed to the systems
    pub delta: Duration,
    /// Result of the flush that opened the tick
    pub flush: FlushStats,
    /// System callbacks invoked
    pub systems_run: usize,
    /// Callbacks that panicked or returned an error
    pub faults: usize,
    /// Disposable records cleared during housekeeping
    pub cleared_disposable: usize,
    /// Systems removed after running their destroy stages
    pub systems_removed: usize,
}

/// A self-contained ECS runtime instance
pub struct Runtime {
    config: RuntimeConfig,
    world: Arc<World>,
    pool: WorkerPool,
    flow: SystemFlow,
    lifecycle: Lifecycle,
    frame: u64,
    last_update: Option<Instant>,
}

impl Runtime {
    /// Create a runtime; the configuration is validated first
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let config = config.validate()?;
        let pool = WorkerPool::new(config.worker_threads, config.job_queue_size)?;
        let world = Arc::new(World::new(config.task_buffers.clone()));
        Ok(Runtime {
            config,
            world,
            pool,
            flow: SystemFlow::new(),
            lifecycle: Lifecycle::Initialized,
            frame: 0,
            last_update: None,
        })
    }

    /// Effective configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The world shared with running systems
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// Register component type `T`
    pub fn register_component<T: Component>(&self) -> Result<ComponentId> {
        self.world.register_component::<T>(ComponentKind::Normal)
    }

    /// Register `T` as disposable: its records are cleared at the end of every tick
    pub fn register_disposable<T: Component>(&self) -> Result<ComponentId> {
        self.world.register_component::<T>(ComponentKind::Disposable)
    }

    /// Id of `T`, if registered
    pub fn component_id<T: Component>(&self) -> Option<ComponentId> {
        self.world.component_id::<T>()
    }

    /// Register a system with the pipeline
    ///
    /// Component types named by its requirements are registered on the way.
    pub fn register_system<S: System>(&mut self, system: S, priority: Priority) -> Result<SystemId> {
        if self.lifecycle == Lifecycle::Stopped {
            return Err(RuntimeError::Stopped);
        }
        let requirements = self.world.resolve(&system.requirements())?;
        let id = self.flow.register(Box::new(system), requirements, priority)?;
        tracing::debug!(system = self.flow.name_of(id).unwrap_or_default(), %id, %priority, "system registered");
        Ok(id)
    }

    /// Start the runtime; called implicitly by the first tick
    pub fn start(&mut self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Running => return Ok(()),
            Lifecycle::Stopped => return Err(RuntimeError::Stopped),
            Lifecycle::Initialized => {}
        }
        if self.config.collector_enabled {
            self.world.membership().start_collector()?;
        }
        if self.config.print_schedule {
            tracing::info!("schedule:\n{}", self.flow.describe());
        }
        self.lifecycle = Lifecycle::Running;
        tracing::info!(
            workers = self.pool.workers(),
            systems = self.flow.len(),
            "runtime started"
        );
        Ok(())
    }

    /// Run one tick: flush, stage pipeline, housekeeping
    pub fn tick(&mut self, delta: Duration) -> Result<TickReport> {
        match self.lifecycle {
            Lifecycle::Stopped => return Err(RuntimeError::Stopped),
            Lifecycle::Initialized => self.start()?,
            Lifecycle::Running => {}
        }
        self.run_tick(delta)
    }

    fn run_tick(&mut self, delta: Duration) -> Result<TickReport> {
        self.frame += 1;
        let frame = self.frame;

        let flush = self.world.flush(&self.pool)?;
        self.world.membership().emit(MembershipEvent::Epoch(frame));

        let scope = Arc::new(FrameScope::new(
            Arc::clone(&self.world),
            frame,
            delta,
            self.flow.control(),
        ));
        let stages = self.flow.run(&scope, &self.pool);
        drop(scope);

        let cleared_disposable = self.world.clear_disposable();
        let systems_removed = self.flow.remove_destroyed().len();
        if self.config.collector_enabled
            && self.lifecycle == Lifecycle::Running
            && !self.world.membership().is_collecting()
        {
            self.world.membership().start_collector()?;
        }

        let report = TickReport {
            frame,
            delta,
            flush,
            systems_run: stages.systems_run,
            faults: stages.faults,
            cleared_disposable,
            systems_removed,
        };
        tracing::trace!(?report, "tick complete");
        Ok(report)
    }

    /// Tick with the wall-clock time elapsed since the previous `update`
    pub fn update(&mut self) -> Result<TickReport> {
        let now = Instant::now();
        let delta = self
            .last_update
            .map(|last| now.duration_since(last))
            .unwrap_or_default();
        self.last_update = Some(now);
        self.tick(delta)
    }

    /// Allocate a new entity
    pub fn spawn(&self) -> Entity {
        self.world.spawn()
    }

    /// Queue the destruction of `entity` for the next flush
    pub fn destroy(&self, entity: Entity) -> Result<()> {
        self.world.request_destroy(entity)
    }

    /// Check if an entity is alive
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.world.is_alive(entity)
    }

    /// Queue a structural change; applied by the next flush
    pub fn enqueue_mutation<T: Component>(&self, entity: Entity, mutation: Mutation<T>) -> Result<()> {
        self.world.enqueue(entity, mutation)
    }

    /// Queue adding `value` to `entity`
    pub fn add<T: Component>(&self, entity: Entity, value: T) -> Result<()> {
        self.enqueue_mutation(entity, Mutation::Add(value))
    }

    /// Queue removing `T` from `entity`
    pub fn remove<T: Component>(&self, entity: Entity) -> Result<()> {
        self.enqueue_mutation::<T>(entity, Mutation::Remove)
    }

    /// Whether `entity` has every type in `ids`, per the membership index
    ///
    /// May be stale while the collector runs; call
    /// [`pause_collector`](Self::pause_collector) first for an exact answer.
    pub fn query_membership(&self, entity: Entity, ids: &[ComponentId]) -> bool {
        self.world.membership().contains(entity, ids)
    }

    /// Entities owning every type in `ids`, per the membership index
    pub fn query_matching(&self, ids: &[ComponentId]) -> Vec<Entity> {
        self.world.membership().matching(ids)
    }

    /// Drain pending membership events and park the collector
    ///
    /// The next tick restarts it when the collector is enabled.
    pub fn pause_collector(&self) {
        self.world.membership().pause_collector();
    }

    /// Restart the membership collector
    pub fn start_collector(&self) -> Result<()> {
        self.world.membership().start_collector()
    }

    /// Run `f` against the storage of `T` between ticks
    pub fn read<T: Component, R>(&self, f: impl FnOnce(&ComponentStorage<T>) -> R) -> Result<R> {
        self.world.with_storage(f)
    }

    /// Lifecycle state of system `id`
    pub fn system_state(&self, id: SystemId) -> Option<SystemState> {
        self.flow.state(id)
    }

    /// Skip the update stages of `id` until resumed
    pub fn pause_system(&mut self, id: SystemId) -> Result<()> {
        self.flow.transition(id, ControlRequest::Pause)
    }

    /// Resume a paused system
    pub fn resume_system(&mut self, id: SystemId) -> Result<()> {
        self.flow.transition(id, ControlRequest::Resume)
    }

    /// Stop `id`; it runs its destroy stages next tick and is then removed
    pub fn stop_system(&mut self, id: SystemId) -> Result<()> {
        self.flow.transition(id, ControlRequest::Stop)
    }

    /// Stage, group and batch layout of the pipeline
    pub fn describe_schedule(&mut self) -> String {
        self.flow.describe()
    }

    /// Number of ticks run so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Whether [`shutdown`](Self::shutdown) has completed
    pub fn is_stopped(&self) -> bool {
        self.lifecycle == Lifecycle::Stopped
    }

    /// Stop every system, run a final tick for their destroy stages, and
    /// release the collector and the worker pool
    ///
    /// Returns the report of the final tick, or `None` if already stopped.
    pub fn shutdown(&mut self) -> Result<Option<TickReport>> {
        if self.lifecycle == Lifecycle::Stopped {
            return Ok(None);
        }
        if self.lifecycle == Lifecycle::Initialized {
            self.start()?;
        }

        self.flow.stop_all();
        let report = self.run_tick(Duration::ZERO);
        self.lifecycle = Lifecycle::Stopped;
        self.world.membership().pause_collector();
        self.pool.shutdown();
        tracing::info!(frames = self.frame, "runtime stopped");
        report.map(Some)
    }
}
