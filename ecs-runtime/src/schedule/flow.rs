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
//! Stage pipeline
//!
//! [`SystemFlow`] owns every registered system and, for each of the fixed
//! [`Stage`]s, an ordered list of [`SystemGroup`]s keyed by [`Priority`].
//! One run walks the stages in order. Synchronous stages call their systems
//! on the driving thread. Main stages submit each batch to the worker pool
//! and wait for the whole batch before pulling the next one.
//!
//! System state only changes here: control requests are applied at the
//! start of a run, new systems leave `Initializing` once the start phase is
//! over, and stopped systems become `Destroyed` after the destroy phase.

use crate::ecs::{
    ControlQueue, ControlRequest, FrameScope, RequirementSet, Stage, StageSet, System, SystemContext,
    SystemId, SystemMeta, SystemState,
};
use crate::error::{Result, RuntimeError};
use crate::schedule::{Priority, SystemGroup};
use crate::worker::{panic_message, TaskGroup, WorkerPool};
use parking_lot::Mutex;
use std::backtrace::Backtrace;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type SharedSystem = Arc<Mutex<Box<dyn System>>>;

struct SystemEntry {
    meta: Arc<SystemMeta>,
    system: SharedSystem,
    state: SystemState,
    stages: StageSet,
    priority: Priority,
}

/// Counts of one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    /// System callbacks invoked
    pub systems_run: usize,
    /// Callbacks that panicked or returned an error
    pub faults: usize,
}

#[derive(Default)]
struct RunCounters {
    run: AtomicUsize,
    faults: AtomicUsize,
}

/// The fixed stage pipeline and its registered systems
pub struct SystemFlow {
    systems: BTreeMap<SystemId, SystemEntry>,
    names: HashMap<String, SystemId>,
    stages: Vec<BTreeMap<Priority, SystemGroup>>,
    next_id: u64,
    control: ControlQueue,
}

impl SystemFlow {
    /// Create an empty pipeline
    pub fn new() -> Self {
        SystemFlow {
            systems: BTreeMap::new(),
            names: HashMap::new(),
            stages: Stage::ALL.iter().map(|_| BTreeMap::new()).collect(),
            next_id: 1,
            control: ControlQueue::default(),
        }
    }

    /// Register a system whose requirements were already resolved
    ///
    /// The system joins the group of `priority` in every stage it implements.
    pub fn register(
        &mut self,
        system: Box<dyn System>,
        requirements: RequirementSet,
        priority: Priority,
    ) -> Result<SystemId> {
        let name = system.name().to_string();
        if requirements.is_empty() {
            return Err(RuntimeError::EmptyRequirements(name));
        }
        if self.names.contains_key(&name) {
            return Err(RuntimeError::DuplicateSystem(name));
        }

        let id = SystemId::new(self.next_id);
        let stages = system.stages();
        if stages.is_empty() {
            tracing::warn!(system = %name, "system implements no stage and will never run");
        }
        for stage in stages.iter() {
            self.stages[stage.index()]
                .entry(priority)
                .or_default()
                .insert(id, requirements.clone())?;
        }

        self.next_id += 1;
        self.names.insert(name.clone(), id);
        self.systems.insert(
            id,
            SystemEntry {
                meta: Arc::new(SystemMeta {
                    id,
                    name,
                    requirements,
                }),
                system: Arc::new(Mutex::new(system)),
                state: SystemState::Initializing,
                stages,
                priority,
            },
        );
        Ok(id)
    }

    /// Number of registered systems, destroyed ones included until removed
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Check if no system is registered
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Lifecycle state of `id`
    pub fn state(&self, id: SystemId) -> Option<SystemState> {
        self.systems.get(&id).map(|entry| entry.state)
    }

    /// Id of the system registered under `name`
    pub fn id_of(&self, name: &str) -> Option<SystemId> {
        self.names.get(name).copied()
    }

    /// Name of `id`
    pub fn name_of(&self, id: SystemId) -> Option<&str> {
        self.systems.get(&id).map(|entry| entry.meta.name.as_str())
    }

    /// Queue through which running systems request lifecycle changes
    pub(crate) fn control(&self) -> ControlQueue {
        Arc::clone(&self.control)
    }

    /// Apply a lifecycle change to `id` now
    pub fn transition(&mut self, id: SystemId, request: ControlRequest) -> Result<()> {
        let entry = self
            .systems
            .get_mut(&id)
            .ok_or(RuntimeError::UnknownSystem(id))?;
        let from = entry.state;
        let to = match (request, from) {
            (ControlRequest::Pause, SystemState::Updating) => SystemState::Paused,
            (ControlRequest::Resume, SystemState::Paused) => SystemState::Updating,
            (
                ControlRequest::Stop,
                SystemState::Initializing | SystemState::Updating | SystemState::Paused,
            ) => SystemState::Destroying,
            (ControlRequest::Pause, _) => {
                return Err(RuntimeError::InvalidTransition { id, from, to: SystemState::Paused })
            }
            (ControlRequest::Resume, _) => {
                return Err(RuntimeError::InvalidTransition { id, from, to: SystemState::Updating })
            }
            (ControlRequest::Stop, _) => {
                return Err(RuntimeError::InvalidTransition { id, from, to: SystemState::Destroying })
            }
        };
        entry.state = to;
        tracing::debug!(system = %entry.meta.name, ?from, ?to, "system state changed");
        Ok(())
    }

    /// Move every live system to `Destroying`
    pub fn stop_all(&mut self) {
        for entry in self.systems.values_mut() {
            if matches!(
                entry.state,
                SystemState::Initializing | SystemState::Updating | SystemState::Paused
            ) {
                entry.state = SystemState::Destroying;
            }
        }
    }

    fn apply_control(&mut self) {
        let requests = std::mem::take(&mut *self.control.lock());
        for (id, request) in requests {
            if let Err(err) = self.transition(id, request) {
                tracing::warn!(?request, "ignoring control request: {err}");
            }
        }
    }

    fn advance(&mut self, from: SystemState, to: SystemState) {
        for entry in self.systems.values_mut().filter(|entry| entry.state == from) {
            entry.state = to;
        }
    }

    /// Run every stage once
    pub(crate) fn run(&mut self, scope: &Arc<FrameScope>, pool: &WorkerPool) -> StageReport {
        self.apply_control();
        let counters = Arc::new(RunCounters::default());

        for stage in Stage::ALL {
            if stage == Stage::SyncBeforePreUpdate {
                self.advance(SystemState::Initializing, SystemState::Updating);
            }
            self.run_stage(stage, scope, pool, &counters);
            if stage == Stage::SyncAfterDestroy {
                self.advance(SystemState::Destroying, SystemState::Destroyed);
            }
        }

        StageReport {
            systems_run: counters.run.load(Ordering::Relaxed),
            faults: counters.faults.load(Ordering::Relaxed),
        }
    }

    fn run_stage(
        &mut self,
        stage: Stage,
        scope: &Arc<FrameScope>,
        pool: &WorkerPool,
        counters: &Arc<RunCounters>,
    ) {
        let SystemFlow {
            systems, stages, ..
        } = self;
        let phase = stage.phase();

        for group in stages[stage.index()].values_mut() {
            for batch in group.batches() {
                let runnable: Vec<&SystemEntry> = batch
                    .iter()
                    .filter_map(|id| systems.get(id))
                    .filter(|entry| entry.state.runs(phase))
                    .collect();
                if runnable.is_empty() {
                    continue;
                }

                if stage.is_sync() {
                    for entry in runnable {
                        run_system(&entry.meta, &entry.system, stage, scope, counters);
                    }
                    continue;
                }

                let tasks = TaskGroup::new();
                for entry in runnable {
                    let meta = Arc::clone(&entry.meta);
                    let system = Arc::clone(&entry.system);
                    let scope = Arc::clone(scope);
                    let job_counters = Arc::clone(counters);
                    let job = tasks.wrap(move || {
                        run_system(&meta, &system, stage, &scope, &job_counters)
                    });
                    if let Err(err) = pool.execute(job) {
                        tracing::error!(system = %entry.meta.name, %stage, "could not dispatch: {err}");
                        counters.faults.fetch_add(1, Ordering::Relaxed);
                    }
                }
                tasks.wait();
            }
        }
    }

    /// Drop every `Destroyed` system, returning their ids
    pub fn remove_destroyed(&mut self) -> Vec<SystemId> {
        let destroyed: Vec<SystemId> = self
            .systems
            .iter()
            .filter(|(_, entry)| entry.state == SystemState::Destroyed)
            .map(|(id, _)| *id)
            .collect();

        for id in &destroyed {
            if let Some(entry) = self.systems.remove(id) {
                self.names.remove(&entry.meta.name);
                for stage in entry.stages.iter() {
                    if let Some(group) = self.stages[stage.index()].get_mut(&entry.priority) {
                        group.remove(*id);
                    }
                }
                tracing::debug!(system = %entry.meta.name, "system removed");
            }
        }
        destroyed
    }

    /// Human-readable stage, group and batch layout
    pub fn describe(&mut self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.write_layout(&mut out);
        out
    }

    fn write_layout(&mut self, out: &mut String) -> fmt::Result {
        let SystemFlow {
            systems, stages, ..
        } = self;
        for stage in Stage::ALL {
            let groups = &mut stages[stage.index()];
            if groups.values().all(SystemGroup::is_empty) {
                continue;
            }
            writeln!(out, "{stage}")?;
            for (priority, group) in groups.iter_mut() {
                if group.is_empty() {
                    continue;
                }
                writeln!(out, "  group {priority}")?;
                for (index, batch) in group.batches().enumerate() {
                    let names: Vec<&str> = batch
                        .iter()
                        .filter_map(|id| systems.get(id))
                        .map(|entry| short_type_name_or(&entry.meta.name))
                        .collect();
                    writeln!(out, "    batch {index}: [{}]", names.join(", "))?;
                }
            }
        }
        Ok(())
    }
}

impl Default for SystemFlow {
    fn default() -> Self {
        Self::new()
    }
}

/// Names defaulting to a type path are shortened for display
fn short_type_name_or(name: &str) -> &str {
    if name.contains("::") && !name.contains('<') {
        name.rsplit("::").next().unwrap_or(name)
    } else {
        name
    }
}

fn run_system(
    meta: &SystemMeta,
    system: &Mutex<Box<dyn System>>,
    stage: Stage,
    scope: &FrameScope,
    counters: &RunCounters,
) {
    let ctx = SystemContext::new(meta, scope, stage);
    let mut system = system.lock();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| system.run(stage, &ctx)));
    counters.run.fetch_add(1, Ordering::Relaxed);

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            counters.faults.fetch_add(1, Ordering::Relaxed);
            tracing::error!(system = %meta.name, %stage, frame = scope.frame, "system failed: {err}");
        }
        Err(payload) => {
            counters.faults.fetch_add(1, Ordering::Relaxed);
            let backtrace = Backtrace::capture();
            tracing::error!(
                system = %meta.name,
                %stage,
                frame = scope.frame,
                "system panicked: {}\n{backtrace}",
                panic_message(payload.as_ref())
            );
        }
    }
}
