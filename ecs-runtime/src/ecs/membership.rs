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
//! Compound membership index
//!
//! The index answers "does entity E currently have component types {..}"
//! without touching per-type storage. It is fed by membership events emitted
//! while the flush applies mutations, and a background collector thread folds
//! those events into per-entity [`Compound`] sets.
//!
//! The index is eventually consistent: while the collector runs, queries may
//! miss events still sitting in the queue. Callers that need an exact answer
//! call [`MembershipIndex::pause_collector`] first; it returns only once every
//! event queued before the call has been applied and the collector is parked.
//! [`MembershipIndex::start_collector`] resumes background collection.

use crate::ecs::{ComponentId, Compound, Entity};
use crate::error::Result;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Events folded into the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEvent {
    /// The entity gained a component type
    Added(Entity, ComponentId),
    /// The entity lost a component type
    Removed(Entity, ComponentId),
    /// The entity was destroyed; its whole compound is dropped
    Destroyed(Entity),
    /// Marker recording that every earlier event belongs to frames up to this one
    Epoch(u64),
}

/// Most events applied under one hold of the write lock
const APPLY_CHUNK: usize = 1024;

enum Control {
    Pause(Sender<()>),
}

#[derive(Default)]
struct IndexState {
    sets: RwLock<HashMap<Entity, Compound>>,
    epoch: AtomicU64,
}

impl IndexState {
    fn apply(&self, sets: &mut HashMap<Entity, Compound>, event: MembershipEvent) {
        match event {
            MembershipEvent::Added(entity, id) => {
                sets.entry(entity).or_default().insert(id);
            }
            MembershipEvent::Removed(entity, id) => {
                if let Some(compound) = sets.get_mut(&entity) {
                    compound.remove(id);
                    if compound.is_empty() {
                        sets.remove(&entity);
                    }
                }
            }
            MembershipEvent::Destroyed(entity) => {
                sets.remove(&entity);
            }
            MembershipEvent::Epoch(epoch) => {
                self.epoch.store(epoch, Ordering::Release);
            }
        }
    }

    /// Apply `first` plus up to `limit` queued events
    ///
    /// The write lock is released every [`APPLY_CHUNK`] events so readers
    /// are never held off for a whole backlog.
    fn apply_queued(&self, first: Option<MembershipEvent>, events: &Receiver<MembershipEvent>, limit: usize) -> usize {
        let mut applied = 0;
        if let Some(event) = first {
            self.apply(&mut self.sets.write(), event);
            applied += 1;
        }

        let mut remaining = limit;
        while remaining > 0 {
            let mut sets = self.sets.write();
            let mut taken = 0;
            while taken < remaining.min(APPLY_CHUNK) {
                match events.try_recv() {
                    Ok(event) => {
                        self.apply(&mut sets, event);
                        taken += 1;
                    }
                    Err(_) => break,
                }
            }
            drop(sets);
            applied += taken;
            if taken < remaining.min(APPLY_CHUNK) {
                break;
            }
            remaining -= taken;
        }
        applied
    }
}

/// Per-entity compound sets maintained from membership events
pub struct MembershipIndex {
    state: Arc<IndexState>,
    events_tx: Sender<MembershipEvent>,
    events_rx: Receiver<MembershipEvent>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    collector: Mutex<Option<JoinHandle<()>>>,
}

impl MembershipIndex {
    /// Create an index with no collector running
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded();
        let (control_tx, control_rx) = bounded(1);
        MembershipIndex {
            state: Arc::new(IndexState::default()),
            events_tx,
            events_rx,
            control_tx,
            control_rx,
            collector: Mutex::new(None),
        }
    }

    /// Queue an event for the collector
    pub fn emit(&self, event: MembershipEvent) {
        // The index owns a receiver, so the channel cannot be disconnected
        let _ = self.events_tx.send(event);
    }

    /// Start the background collector; no-op when it is already running
    pub fn start_collector(&self) -> Result<()> {
        let mut collector = self.collector.lock();
        if collector.is_some() {
            return Ok(());
        }
        // Drop a pause request left behind by a collector that died before reading it
        while self.control_rx.try_recv().is_ok() {}

        let state = Arc::clone(&self.state);
        let events = self.events_rx.clone();
        let control = self.control_rx.clone();
        let handle = thread::Builder::new()
            .name("membership-collector".to_string())
            .spawn(move || collect(state, events, control))?;
        *collector = Some(handle);
        tracing::trace!("membership collector started");
        Ok(())
    }

    /// Drain every queued event and park the collector
    ///
    /// When no collector runs the caller drains the queue itself, so on return
    /// every event emitted before the call is visible to queries. Events
    /// emitted concurrently with the call are left queued.
    pub fn pause_collector(&self) {
        let mut collector = self.collector.lock();
        let backlog = self.events_rx.len();
        if let Some(handle) = collector.take() {
            let (ack_tx, ack_rx) = bounded(1);
            let acked = self.control_tx.send(Control::Pause(ack_tx)).is_ok() && ack_rx.recv().is_ok();
            if handle.join().is_err() {
                tracing::error!("membership collector terminated abnormally");
            }
            tracing::trace!("membership collector paused");
            if acked {
                return;
            }
        }
        self.state.apply_queued(None, &self.events_rx, backlog);
    }

    /// Whether the background collector is running
    pub fn is_collecting(&self) -> bool {
        self.collector.lock().is_some()
    }

    /// Number of events not yet applied
    pub fn pending(&self) -> usize {
        self.events_rx.len()
    }

    /// Latest epoch marker applied
    pub fn epoch(&self) -> u64 {
        self.state.epoch.load(Ordering::Acquire)
    }

    /// Whether `entity` has every component in `ids`
    ///
    /// May be stale while the collector runs.
    pub fn contains(&self, entity: Entity, ids: &[ComponentId]) -> bool {
        let mut required = ids.to_vec();
        required.sort_unstable();
        required.dedup();
        let sets = self.state.sets.read();
        match sets.get(&entity) {
            Some(compound) => compound.contains_all(&required),
            None => required.is_empty(),
        }
    }

    /// Snapshot of the compound of `entity`
    pub fn compound_of(&self, entity: Entity) -> Option<Compound> {
        self.state.sets.read().get(&entity).cloned()
    }

    /// Number of entities with a non-empty compound
    pub fn len(&self) -> usize {
        self.state.sets.read().len()
    }

    /// Check if no entity has a compound
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every entity owning all of `ids`, in ascending handle order
    pub fn matching(&self, ids: &[ComponentId]) -> Vec<Entity> {
        let mut required = ids.to_vec();
        required.sort_unstable();
        required.dedup();
        let sets = self.state.sets.read();

        #[cfg(feature = "parallel")]
        let mut found: Vec<Entity> = {
            use rayon::prelude::*;
            sets.par_iter()
                .filter(|(_, compound)| compound.contains_all(&required))
                .map(|(entity, _)| *entity)
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let mut found: Vec<Entity> = sets
            .iter()
            .filter(|(_, compound)| compound.contains_all(&required))
            .map(|(entity, _)| *entity)
            .collect();

        found.sort_unstable();
        found
    }
}

impl Default for MembershipIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MembershipIndex {
    fn drop(&mut self) {
        self.pause_collector();
    }
}

fn collect(state: Arc<IndexState>, events: Receiver<MembershipEvent>, control: Receiver<Control>) {
    loop {
        select! {
            recv(control) -> msg => {
                if let Ok(Control::Pause(ack)) = msg {
                    // Everything emitted before the request is already queued
                    let backlog = events.len();
                    state.apply_queued(None, &events, backlog);
                    let _ = ack.send(());
                }
                return;
            }
            recv(events) -> event => match event {
                Ok(event) => {
                    state.apply_queued(Some(event), &events, APPLY_CHUNK - 1);
                }
                Err(_) => return,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u16) -> ComponentId {
        ComponentId::new(n)
    }

    #[test]
    fn test_inline_drain_without_collector() {
        let index = MembershipIndex::new();
        let e = Entity::new(1, 0);
        index.emit(MembershipEvent::Added(e, id(2)));
        index.emit(MembershipEvent::Added(e, id(0)));

        // Stale until drained
        assert!(!index.contains(e, &[id(2)]));
        assert_eq!(index.pending(), 2);

        index.pause_collector();
        assert_eq!(index.pending(), 0);
        assert!(index.contains(e, &[id(2), id(0)]));
        assert_eq!(index.compound_of(e).unwrap().as_slice(), &[id(0), id(2)]);
    }

    #[test]
    fn test_removed_and_destroyed() {
        let index = MembershipIndex::new();
        let a = Entity::new(1, 0);
        let b = Entity::new(2, 0);
        index.emit(MembershipEvent::Added(a, id(1)));
        index.emit(MembershipEvent::Added(a, id(2)));
        index.emit(MembershipEvent::Added(b, id(1)));
        index.emit(MembershipEvent::Removed(a, id(1)));
        index.emit(MembershipEvent::Destroyed(b));
        index.pause_collector();

        assert!(index.contains(a, &[id(2)]));
        assert!(!index.contains(a, &[id(1)]));
        assert!(index.compound_of(b).is_none());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_collector_start_pause_cycle() {
        let index = MembershipIndex::new();
        index.start_collector().unwrap();
        index.start_collector().unwrap();
        assert!(index.is_collecting());

        let e = Entity::new(3, 0);
        for n in 0..50 {
            index.emit(MembershipEvent::Added(e, id(n)));
        }
        index.pause_collector();
        assert!(!index.is_collecting());
        assert_eq!(index.compound_of(e).unwrap().len(), 50);

        index.start_collector().unwrap();
        index.emit(MembershipEvent::Removed(e, id(0)));
        index.pause_collector();
        assert_eq!(index.compound_of(e).unwrap().len(), 49);
    }

    #[test]
    fn test_epoch_marker() {
        let index = MembershipIndex::new();
        index.emit(MembershipEvent::Epoch(7));
        index.pause_collector();
        assert_eq!(index.epoch(), 7);
    }

    #[test]
    fn test_matching_sorted() {
        let index = MembershipIndex::new();
        for n in (0..20u32).rev() {
            let e = Entity::new(n, 0);
            index.emit(MembershipEvent::Added(e, id(0)));
            if n % 2 == 0 {
                index.emit(MembershipEvent::Added(e, id(1)));
            }
        }
        index.pause_collector();

        let both = index.matching(&[id(1), id(0)]);
        let expected: Vec<_> = (0..20u32).step_by(2).map(|n| Entity::new(n, 0)).collect();
        assert_eq!(both, expected);
        assert_eq!(index.matching(&[id(0)]).len(), 20);
        assert!(index.matching(&[id(9)]).is_empty());
    }

    #[test]
    fn test_readers_and_pause_not_starved_by_producers() {
        use std::sync::atomic::AtomicBool;
        use std::time::{Duration, Instant};

        let index = Arc::new(MembershipIndex::new());
        index.start_collector().unwrap();
        let running = Arc::new(AtomicBool::new(true));

        let producers: Vec<_> = (0..2u32)
            .map(|lane| {
                let index = Arc::clone(&index);
                let running = Arc::clone(&running);
                thread::spawn(move || {
                    let mut n = 0u32;
                    while running.load(Ordering::Relaxed) {
                        index.emit(MembershipEvent::Added(Entity::new(n % 100_000, lane), id(0)));
                        n = n.wrapping_add(1);
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(300));
        let started = Instant::now();
        for n in 0..10 {
            index.contains(Entity::new(n, 0), &[id(0)]);
        }
        let reads = started.elapsed();

        let started = Instant::now();
        index.pause_collector();
        let pause = started.elapsed();

        running.store(false, Ordering::Relaxed);
        for producer in producers {
            producer.join().unwrap();
        }

        assert!(reads < Duration::from_secs(1), "reads blocked for {reads:?}");
        assert!(pause < Duration::from_secs(5), "pause took {pause:?}");
        assert!(!index.is_collecting());
    }

    #[test]
    fn test_apply_queued_respects_limit() {
        let index = MembershipIndex::new();
        for n in 0..(APPLY_CHUNK as u32 * 2 + 10) {
            index.emit(MembershipEvent::Added(Entity::new(n, 0), id(0)));
        }

        let applied = index.state.apply_queued(None, &index.events_rx, APPLY_CHUNK + 5);
        assert_eq!(applied, APPLY_CHUNK + 5);
        assert_eq!(index.pending(), APPLY_CHUNK - 5 + 10);

        let applied = index.state.apply_queued(None, &index.events_rx, usize::MAX);
        assert_eq!(applied, APPLY_CHUNK + 5);
        assert_eq!(index.pending(), 0);
        assert_eq!(index.len(), APPLY_CHUNK * 2 + 10);
    }
}
