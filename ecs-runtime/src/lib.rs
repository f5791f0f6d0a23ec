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
//! # ECS Runtime
//!
//! A data-oriented runtime that stores components keyed by entity handles
//! and runs registered systems once per tick, discovering on its own which
//! systems may run concurrently.
//!
//! ## Features
//!
//! - **Conflict batching**: systems sharing a component type never run in the same batch
//! - **Stage pipeline**: fifteen fixed stages around start, pre-update, update, post-update and destroy
//! - **Deferred mutations**: structural changes are logged per type and applied at one flush per tick
//! - **Membership index**: per-entity sorted type sets maintained by a pausable background collector
//! - **Worker pool**: fixed threads with shared and key-routed queues
//! - **Parallelization**: optional Rayon integration for index scans
//!
//! ## Example
//!
//! ```rust
//! use ecs_runtime::{Component, FnSystem, Priority, Runtime, RuntimeConfig, Stage};
//! use std::time::Duration;
//!
//! struct Position(f32);
//! struct Velocity(f32);
//! impl Component for Position {}
//! impl Component for Velocity {}
//!
//! let mut runtime = Runtime::new(RuntimeConfig::default()).unwrap();
//!
//! runtime
//!     .register_system(
//!         FnSystem::new("movement")
//!             .read::<Velocity>()
//!             .write::<Position>()
//!             .on(Stage::Update, |ctx| {
//!                 let velocities = ctx.read::<Velocity>()?;
//!                 let mut positions = ctx.write::<Position>()?;
//!                 for (entity, position) in positions.iter_mut() {
//!                     if let Some(velocity) = velocities.get(entity) {
//!                         position.0 += velocity.0 * ctx.delta().as_secs_f32();
//!                     }
//!                 }
//!                 Ok(())
//!             }),
//!         Priority::default(),
//!     )
//!     .unwrap();
//!
//! let entity = runtime.spawn();
//! runtime.add(entity, Position(0.0)).unwrap();
//! runtime.add(entity, Velocity(2.0)).unwrap();
//! runtime.tick(Duration::from_secs(1)).unwrap();
//!
//! let x = runtime.read::<Position, _>(|s| s.get(entity).map(|p| p.0)).unwrap();
//! assert_eq!(x, Some(2.0));
//! ```

#![warn(missing_docs)]

/// Runtime configuration
pub mod config;

/// Entity Component System implementation
pub mod ecs;

/// Error types
pub mod error;

/// Paced asynchronous frame loop
pub mod frame_loop;

/// Memory pooling for reducing allocation churn
pub mod pool;

/// Runtime façade
pub mod runtime;

/// Conflict batching and the stage pipeline
pub mod schedule;

/// Worker pool and completion latch
pub mod worker;

pub use config::RuntimeConfig;
pub use ecs::{
    Access, Component, ComponentId, ComponentKind, Entity, FnSystem, Mutation, Requirement, Stage,
    StageSet, System, SystemContext, SystemId, SystemState,
};
pub use error::{Result, RuntimeError};
pub use frame_loop::{FrameLoop, FrameLoopHandle};
pub use runtime::{Runtime, TickReport};
pub use schedule::Priority;
