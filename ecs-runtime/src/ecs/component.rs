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
//! Component types and identifiers
//!
//! Components are plain data records attached to entities. Each component
//! type registered with a runtime receives a dense [`ComponentId`] from that
//! runtime's own table; ids are not shared between runtimes.

use std::fmt;

/// Trait that all components must implement
///
/// Components should be plain data structures without behavior.
pub trait Component: 'static + Send + Sync {}

/// Dense per-runtime identifier of a component type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u16);

impl ComponentId {
    /// Largest number of component types a runtime can register
    pub const MAX: usize = u16::MAX as usize;

    /// Create an id from its raw index
    pub fn new(index: u16) -> Self {
        ComponentId(index)
    }

    /// Raw index, usable for dense tables
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.0)
    }
}

/// How long a component's records live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComponentKind {
    /// Records persist until removed
    #[default]
    Normal,
    /// Records are cleared during the housekeeping step of every tick
    Disposable,
}

/// Registration record of one component type
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Dense id assigned at registration
    pub id: ComponentId,
    /// Rust type name, for diagnostics
    pub name: &'static str,
    /// Lifetime policy of the records
    pub kind: ComponentKind,
}

/// Strip the module path from a type name for compact diagnostics
pub(crate) fn short_type_name(name: &'static str) -> &'static str {
    if name.contains('<') {
        return name;
    }
    name.rsplit("::").next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_id() {
        let id = ComponentId::new(4);
        assert_eq!(id.index(), 4);
        assert_eq!(id.to_string(), "Component(4)");
        assert!(ComponentId::new(1) < ComponentId::new(2));
    }

    #[test]
    fn test_default_kind() {
        assert_eq!(ComponentKind::default(), ComponentKind::Normal);
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("my_game::physics::Velocity"), "Velocity");
        assert_eq!(short_type_name("Velocity"), "Velocity");
        assert_eq!(
            short_type_name("alloc::vec::Vec<my_game::Item>"),
            "alloc::vec::Vec<my_game::Item>"
        );
    }
}
