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
//! Entity Component System (ECS) core
//!
//! This module provides the data side of the runtime:
//! - Entity handles and allocation
//! - Per-type component storage and the component table
//! - System requirements, lifecycle and execution context
//! - The deferred mutation log and its flush
//! - The compound membership index

mod component;
mod compound;
mod entity;
pub mod membership;
pub mod mutation;
mod requirement;
mod storage;
mod system;
mod world;

pub use component::{Component, ComponentId, ComponentInfo, ComponentKind};
pub use compound::Compound;
pub use entity::{Entity, EntityAllocator};
pub use membership::{MembershipEvent, MembershipIndex};
pub use mutation::{Mutation, MutationLog, OpTask};
pub use requirement::{Access, Requirement, RequirementSet};
pub use storage::{ComponentStorage, ErasedStorage};
pub use system::{
    ControlRequest, FnSystem, Phase, Stage, StageSet, System, SystemContext, SystemId, SystemState,
};
pub use world::{ComponentColumn, FlushStats, World};

pub(crate) use system::{ControlQueue, FrameScope, SystemMeta};
