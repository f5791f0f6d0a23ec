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
//! Basic example of the ECS runtime
//!
//! Registers a few movement systems, spawns entities through deferred
//! mutations, prints the resulting schedule and drives the runtime first
//! manually and then on its own frame loop.
//!
//! Run with `RUST_LOG=ecs_runtime=debug` to see scheduling logs.

use ecs_runtime::{
    Component, FnSystem, FrameLoop, Priority, Runtime, RuntimeConfig, Stage,
};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
}
impl Component for Position {}

#[derive(Debug, Clone, Copy)]
struct Velocity {
    dx: f32,
    dy: f32,
}
impl Component for Velocity {}

#[derive(Debug, Clone, Copy)]
struct Gravity(f32);
impl Component for Gravity {}

// Cleared at the end of every tick
#[derive(Debug, Clone, Copy)]
struct Landed;
impl Component for Landed {}

fn main() -> ecs_runtime::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("ECS Runtime - Basic Example");
    println!("===========================\n");

    let config = RuntimeConfig::new()
        .with_worker_threads(4)
        .with_frame_interval(Duration::from_millis(16));
    let mut runtime = Runtime::new(config)?;
    runtime.register_disposable::<Landed>()?;

    runtime.register_system(
        FnSystem::new("gravity")
            .read::<Gravity>()
            .write::<Velocity>()
            .on(Stage::PreUpdate, |ctx| {
                let gravity = ctx.read::<Gravity>()?;
                let mut velocities = ctx.write::<Velocity>()?;
                for (entity, g) in gravity.iter() {
                    if let Some(velocity) = velocities.get_mut(entity) {
                        velocity.dy -= g.0 * ctx.delta().as_secs_f32();
                    }
                }
                Ok(())
            }),
        Priority::default(),
    )?;

    runtime.register_system(
        FnSystem::new("movement")
            .read::<Velocity>()
            .write::<Position>()
            .on(Stage::Update, |ctx| {
                let velocities = ctx.read::<Velocity>()?;
                let mut positions = ctx.write::<Position>()?;
                let dt = ctx.delta().as_secs_f32();
                for (entity, velocity) in velocities.iter() {
                    if let Some(position) = positions.get_mut(entity) {
                        position.x += velocity.dx * dt;
                        position.y += velocity.dy * dt;
                    }
                }
                Ok(())
            }),
        Priority::default(),
    )?;

    runtime.register_system(
        FnSystem::new("ground")
            .read::<Position>()
            .on(Stage::PostUpdate, |ctx| {
                let positions = ctx.read::<Position>()?;
                for (entity, position) in positions.iter() {
                    if position.y <= 0.0 {
                        ctx.add(entity, Landed)?;
                    }
                }
                Ok(())
            }),
        Priority::APPEND,
    )?;

    runtime.register_system(
        FnSystem::new("reporter")
            .read::<Landed>()
            .on(Stage::SyncBeforeUpdate, |ctx| {
                let landed = ctx.read::<Landed>()?.len();
                if landed > 0 {
                    println!("  frame {}: {landed} entities on the ground", ctx.frame());
                }
                Ok(())
            })
            .on(Stage::Destroy, |ctx| {
                println!("  reporter shutting down at frame {}", ctx.frame());
                Ok(())
            }),
        Priority::FRONT,
    )?;

    println!("Schedule:\n{}", runtime.describe_schedule());

    for i in 0..8 {
        let entity = runtime.spawn();
        runtime.add(entity, Position { x: i as f32, y: 1.0 + i as f32 * 0.5 })?;
        runtime.add(entity, Velocity { dx: 0.5, dy: 0.0 })?;
        runtime.add(entity, Gravity(9.81))?;
    }
    println!("Spawned 8 entities\n");

    println!("Manual ticks:");
    for _ in 0..5 {
        let report = runtime.tick(Duration::from_millis(100))?;
        println!(
            "  frame {}: applied {} mutations, ran {} systems, {} faults",
            report.frame, report.flush.applied, report.systems_run, report.faults
        );
    }

    println!("\nFrame loop:");
    let handle = FrameLoop::spawn(runtime)?;
    std::thread::sleep(Duration::from_millis(200));
    let frame = handle.wait(|rt| rt.frame())?;
    println!("  reached frame {frame}");
    let mut runtime = handle.stop()?;

    runtime.pause_collector();
    if let (Some(position), Some(velocity)) = (
        runtime.component_id::<Position>(),
        runtime.component_id::<Velocity>(),
    ) {
        let moving = runtime.query_matching(&[position, velocity]);
        println!("  {} entities have a position and a velocity", moving.len());
    }

    let report = runtime.shutdown()?;
    if let Some(report) = report {
        println!("\nShut down after frame {} ({} systems removed)", report.frame, report.systems_removed);
    }

    Ok(())
}
