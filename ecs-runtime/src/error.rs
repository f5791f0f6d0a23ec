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
//! Error types for the runtime
//!
//! Configuration errors are reported at registration or startup and are
//! never retried. Ordering-invariant violations (touching storage outside a
//! system's declared requirements) are returned to the offending system so
//! they surface immediately instead of racing silently.

use crate::ecs::{Entity, SystemId, SystemState};
use thiserror::Error;

/// Errors produced by the runtime and its collaborators
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A system was registered without declaring any component requirement
    #[error("system '{0}' declares no component requirements")]
    EmptyRequirements(String),

    /// A system with the same name is already registered
    #[error("system '{0}' is already registered")]
    DuplicateSystem(String),

    /// A component type was used before being registered with the runtime
    #[error("component type '{0}' is not registered")]
    UnknownComponent(&'static str),

    /// A system touched a component type it did not declare
    #[error("system '{system}' accessed component '{component}' without declaring it")]
    UndeclaredAccess {
        /// Name of the offending system
        system: String,
        /// Name of the component type
        component: &'static str,
    },

    /// A system asked for write access through a read-only requirement
    #[error("system '{system}' requested write access to read-only component '{component}'")]
    ReadOnlyAccess {
        /// Name of the offending system
        system: String,
        /// Name of the component type
        component: &'static str,
    },

    /// A deferred payload did not match the storage it was routed to
    #[error("mutation payload does not match component '{0}'")]
    PayloadMismatch(&'static str),

    /// The entity handle is stale or was never allocated
    #[error("{0} is not alive")]
    DeadEntity(Entity),

    /// No system is registered under this id
    #[error("no system registered as {0}")]
    UnknownSystem(SystemId),

    /// A control request does not apply to the system's current state
    #[error("system {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        /// Target system
        id: SystemId,
        /// Current state
        from: SystemState,
        /// Requested state
        to: SystemState,
    },

    /// The worker pool no longer accepts jobs
    #[error("worker pool has shut down")]
    PoolClosed,

    /// The runtime was shut down and cannot tick again
    #[error("runtime has been shut down")]
    Stopped,

    /// A configuration value is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration file could not be parsed
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Spawning a thread or reading a file failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, RuntimeError>;
