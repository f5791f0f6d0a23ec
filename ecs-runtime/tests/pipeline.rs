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
//! Stage pipeline tests
//!
//! Tests registration errors, stage ordering, fault isolation, system
//! lifecycle and the frame loop through the public runtime API.

use ecs_runtime::{
    Component, FnSystem, FrameLoop, Priority, Requirement, Runtime, RuntimeConfig, RuntimeError,
    Stage, StageSet, System, SystemContext, SystemState,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position(f32);
impl Component for Position {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity(f32);
impl Component for Velocity {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Collision;
impl Component for Collision {}

type Trace = Arc<Mutex<Vec<String>>>;

fn runtime() -> Runtime {
    Runtime::new(RuntimeConfig::new().with_worker_threads(4)).unwrap()
}

/// Records every stage it runs, with the name of the executing thread
struct Recorder {
    trace: Trace,
}

impl System for Recorder {
    fn requirements(&self) -> Vec<Requirement> {
        vec![Requirement::read::<Position>()]
    }

    fn stages(&self) -> StageSet {
        Stage::ALL.iter().copied().collect()
    }

    fn run(&mut self, stage: Stage, _ctx: &SystemContext<'_>) -> ecs_runtime::Result<()> {
        let thread = thread::current().name().unwrap_or("unnamed").to_string();
        self.trace.lock().push(format!("{stage}@{thread}"));
        Ok(())
    }

    fn name(&self) -> &str {
        "recorder"
    }
}

#[test]
fn test_registration_errors() {
    let mut runtime = runtime();
    let empty = runtime.register_system(
        FnSystem::new("empty").on(Stage::Update, |_| Ok(())),
        Priority::default(),
    );
    assert!(matches!(empty, Err(RuntimeError::EmptyRequirements(name)) if name == "empty"));

    runtime
        .register_system(
            FnSystem::new("mover").write::<Position>().on(Stage::Update, |_| Ok(())),
            Priority::default(),
        )
        .unwrap();
    let duplicate = runtime.register_system(
        FnSystem::new("mover").read::<Velocity>().on(Stage::Update, |_| Ok(())),
        Priority::FRONT,
    );
    assert!(matches!(duplicate, Err(RuntimeError::DuplicateSystem(name)) if name == "mover"));
}

#[test]
fn test_stage_order_and_threads() {
    let mut runtime = runtime();
    let trace = Trace::default();
    runtime
        .register_system(Recorder { trace: Arc::clone(&trace) }, Priority::default())
        .unwrap();
    let driver = thread::current().name().unwrap_or("unnamed").to_string();

    runtime.tick(Duration::ZERO).unwrap();
    let first: Vec<String> = std::mem::take(&mut *trace.lock());
    let stages: Vec<&str> = first.iter().map(|e| e.split('@').next().unwrap()).collect();
    // Start phase on the first tick, then the update phases
    assert_eq!(
        stages,
        vec![
            "SyncBeforeStart",
            "Start",
            "SyncAfterStart",
            "SyncBeforePreUpdate",
            "PreUpdate",
            "SyncAfterPreUpdate",
            "SyncBeforeUpdate",
            "Update",
            "SyncAfterUpdate",
            "SyncBeforePostUpdate",
            "PostUpdate",
            "SyncAfterPostUpdate",
        ]
    );
    for entry in &first {
        let (stage, thread) = entry.split_once('@').unwrap();
        if stage.starts_with("Sync") {
            assert_eq!(thread, driver, "{stage} left the driving thread");
        } else {
            assert!(thread.starts_with("ecs-worker-"), "{stage} ran on {thread}");
        }
    }

    runtime.tick(Duration::ZERO).unwrap();
    assert_eq!(trace.lock().len(), 9);
    assert!(!trace.lock().iter().any(|e| e.contains("Start")));

    let report = runtime.shutdown().unwrap().unwrap();
    assert_eq!(report.systems_removed, 1);
    let last: Vec<String> = trace.lock().drain(..).collect();
    assert_eq!(
        last[9..].iter().map(|e| e.split('@').next().unwrap()).collect::<Vec<_>>(),
        vec!["SyncBeforeDestroy", "Destroy", "SyncAfterDestroy"]
    );
}

#[test]
fn test_access_checked_against_declaration() {
    let mut runtime = runtime();
    runtime.register_component::<Collision>().unwrap();
    let errors = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&errors);
    runtime
        .register_system(
            FnSystem::new("reader").read::<Position>().on(Stage::Update, move |ctx| {
                let read = ctx.read::<Position>().map(|_| ());
                let write = ctx.write::<Position>().map(|_| ());
                let undeclared = ctx.read::<Collision>().map(|_| ());
                sink.lock().push((read, write, undeclared));
                Ok(())
            }),
            Priority::default(),
        )
        .unwrap();

    runtime.tick(Duration::ZERO).unwrap();
    let errors = errors.lock();
    let (read, write, undeclared) = &errors[0];
    assert!(read.is_ok());
    assert!(matches!(write, Err(RuntimeError::ReadOnlyAccess { system, .. }) if system == "reader"));
    assert!(matches!(undeclared, Err(RuntimeError::UndeclaredAccess { .. })));
}

#[test]
fn test_faulty_systems_do_not_stop_the_tick() {
    let mut runtime = runtime();
    let healthy = Arc::new(AtomicUsize::new(0));

    runtime
        .register_system(
            FnSystem::new("panicking").read::<Position>().on(Stage::Update, |_| {
                panic!("system failure");
            }),
            Priority::default(),
        )
        .unwrap();
    runtime
        .register_system(
            FnSystem::new("failing").read::<Velocity>().on(Stage::Update, |ctx| {
                ctx.write::<Velocity>().map(drop)
            }),
            Priority::default(),
        )
        .unwrap();
    let counter = Arc::clone(&healthy);
    let sibling = runtime
        .register_system(
            FnSystem::new("healthy").read::<Position>().on(Stage::Update, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            Priority::default(),
        )
        .unwrap();

    for _ in 0..3 {
        let report = runtime.tick(Duration::ZERO).unwrap();
        assert_eq!(report.faults, 2);
        assert_eq!(report.systems_run, 3);
    }
    assert_eq!(healthy.load(Ordering::SeqCst), 3);
    assert_eq!(runtime.system_state(sibling), Some(SystemState::Updating));
    let schedule = runtime.describe_schedule();
    assert!(schedule.contains("panicking"));
    assert!(schedule.contains("failing"));
}

#[test]
fn test_priority_groups_run_in_order() {
    let mut runtime = runtime();
    let trace = Trace::default();

    for (name, priority) in [
        ("last", Priority::APPEND),
        ("middle", Priority::new(10)),
        ("first", Priority::FRONT),
    ] {
        let trace = Arc::clone(&trace);
        runtime
            .register_system(
                FnSystem::new(name).read::<Position>().on(Stage::Update, move |ctx| {
                    trace.lock().push(ctx.name().to_string());
                    Ok(())
                }),
                priority,
            )
            .unwrap();
    }

    runtime.tick(Duration::ZERO).unwrap();
    assert_eq!(*trace.lock(), vec!["first", "middle", "last"]);
}

#[test]
fn test_conflicting_systems_never_overlap() {
    let mut runtime = runtime();
    let active = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    for n in 0..4 {
        let active = Arc::clone(&active);
        let overlaps = Arc::clone(&overlaps);
        runtime
            .register_system(
                FnSystem::new(format!("writer{n}"))
                    .write::<Position>()
                    .on(Stage::Update, move |ctx| {
                        if active.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        for (_, position) in ctx.write::<Position>()?.iter_mut() {
                            position.0 += 1.0;
                        }
                        thread::sleep(Duration::from_millis(2));
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }),
                Priority::default(),
            )
            .unwrap();
    }

    let entity = runtime.spawn();
    runtime.add(entity, Position(0.0)).unwrap();
    for _ in 0..5 {
        runtime.tick(Duration::ZERO).unwrap();
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    let value = runtime.read::<Position, _>(|s| s.get(entity).map(|p| p.0)).unwrap();
    assert_eq!(value, Some(20.0));
}

#[test]
fn test_systems_request_pause_and_stop() {
    let mut runtime = runtime();
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&runs);
    let pauser = runtime
        .register_system(
            FnSystem::new("pauser").read::<Position>().on(Stage::Update, move |ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                ctx.request_pause();
                Ok(())
            }),
            Priority::default(),
        )
        .unwrap();
    let stopper = runtime
        .register_system(
            FnSystem::new("stopper")
                .read::<Velocity>()
                .on(Stage::Update, |ctx| {
                    ctx.request_stop();
                    Ok(())
                })
                .on(Stage::Destroy, |_| Ok(())),
            Priority::default(),
        )
        .unwrap();

    let first = runtime.tick(Duration::ZERO).unwrap();
    assert_eq!(first.systems_run, 2);
    assert_eq!(runtime.system_state(pauser), Some(SystemState::Updating));

    // Requests apply at the start of the next tick
    let second = runtime.tick(Duration::ZERO).unwrap();
    assert_eq!(second.systems_run, 1);
    assert_eq!(second.systems_removed, 1);
    assert_eq!(runtime.system_state(pauser), Some(SystemState::Paused));
    assert_eq!(runtime.system_state(stopper), None);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    runtime.resume_system(pauser).unwrap();
    runtime.tick(Duration::ZERO).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(matches!(
        runtime.resume_system(pauser),
        Err(RuntimeError::InvalidTransition { .. })
    ));
}

#[test]
fn test_disposable_components_live_one_tick() {
    let mut runtime = runtime();
    runtime.register_disposable::<Collision>().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    runtime
        .register_system(
            FnSystem::new("detector")
                .read::<Position>()
                .on(Stage::PreUpdate, |ctx| {
                    let positions = ctx.read::<Position>()?;
                    for (entity, _) in positions.iter() {
                        ctx.add(entity, Collision)?;
                    }
                    Ok(())
                }),
            Priority::default(),
        )
        .unwrap();
    runtime
        .register_system(
            FnSystem::new("responder").read::<Collision>().on(Stage::Update, move |ctx| {
                sink.lock().push(ctx.read::<Collision>()?.len());
                Ok(())
            }),
            Priority::default(),
        )
        .unwrap();

    let entity = runtime.spawn();
    runtime.add(entity, Position(0.0)).unwrap();
    for _ in 0..3 {
        runtime.tick(Duration::ZERO).unwrap();
    }
    // Collisions queued in one tick are flushed at the next and cleared at its end
    assert_eq!(*seen.lock(), vec![0, 1, 1]);
    assert_eq!(runtime.read::<Collision, _>(|s| s.len()).unwrap(), 0);
}

#[test]
fn test_runtimes_are_independent() {
    let mut first = runtime();
    let mut second = runtime();

    let a = first.spawn();
    first.add(a, Position(1.0)).unwrap();
    first.tick(Duration::ZERO).unwrap();
    second.tick(Duration::ZERO).unwrap();

    assert_eq!(first.read::<Position, _>(|s| s.len()).unwrap(), 1);
    assert!(matches!(
        second.read::<Position, _>(|s| s.len()),
        Err(RuntimeError::UnknownComponent(_))
    ));
    assert_eq!(second.world().entity_count(), 0);

    first.shutdown().unwrap();
    assert!(second.tick(Duration::ZERO).is_ok());
}

#[test]
fn test_frame_loop_drives_systems() {
    let mut runtime = Runtime::new(
        RuntimeConfig::new()
            .with_worker_threads(2)
            .with_frame_interval(Duration::from_millis(2)),
    )
    .unwrap();
    runtime
        .register_system(
            FnSystem::new("integrate")
                .read::<Velocity>()
                .write::<Position>()
                .on(Stage::Update, |ctx| {
                    let velocities = ctx.read::<Velocity>()?;
                    let mut positions = ctx.write::<Position>()?;
                    for (entity, velocity) in velocities.iter() {
                        if let Some(position) = positions.get_mut(entity) {
                            position.0 += velocity.0;
                        }
                    }
                    Ok(())
                }),
            Priority::default(),
        )
        .unwrap();

    let handle = FrameLoop::spawn(runtime).unwrap();
    let entity = handle
        .wait(|rt| {
            let entity = rt.spawn();
            rt.add(entity, Position(0.0)).unwrap();
            rt.add(entity, Velocity(1.0)).unwrap();
            entity
        })
        .unwrap();
    for _ in 0..5 {
        handle.wait(|_| ()).unwrap();
    }

    let runtime = handle.stop().unwrap();
    let position = runtime
        .read::<Position, _>(|s| s.get(entity).map(|p| p.0))
        .unwrap()
        .unwrap();
    assert!(position >= 4.0);
}
