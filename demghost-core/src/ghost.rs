//! Ghost synthesis
//!
//! A ghost is another recording's view entity replayed inside the base
//! demo under a fresh entity id. This module allocates those ids and turns
//! a trajectory into baseline and update records.

use serde::Serialize;

use crate::error::DemoError;
use crate::protocol::{EntityState, EntityUpdate, SpawnBaseline};
use crate::tracker::TrajectorySample;

/// Hands out entity ids above the base stream's highest one
#[derive(Debug, Clone)]
pub struct EntityAllocator {
    next: u32,
    limit: usize,
}

impl EntityAllocator {
    pub fn new(max_used: u16, max_entities: usize) -> Self {
        EntityAllocator {
            next: max_used as u32 + 1,
            limit: max_entities,
        }
    }

    pub fn allocate(&mut self) -> Result<u16, DemoError> {
        if self.next as usize >= self.limit || self.next > u16::MAX as u32 {
            return Err(DemoError::EntityIdExhaustion { limit: self.limit });
        }
        let id = self.next as u16;
        self.next += 1;
        Ok(id)
    }
}

/// A ghost ready for injection: models already remapped into the merged
/// precache, samples still carrying the entity id they were recorded under
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GhostTrack {
    /// Entity id assigned in the merged demo
    pub entity: u16,
    pub source_entity: u16,
    pub baseline: EntityState,
    pub trajectory: Vec<TrajectorySample>,
}

/// One update per sample, each a delta against `baseline`
pub fn synthesize(
    trajectory: &[TrajectorySample],
    baseline: &EntityState,
    entity: u16,
) -> Vec<EntityUpdate> {
    trajectory
        .iter()
        .map(|s| EntityUpdate::delta(entity, baseline, &s.state, s.no_lerp))
        .collect()
}

/// Playback cursor over one ghost's synthesized updates
#[derive(Debug, Clone)]
pub struct GhostSynthesizer {
    entity: u16,
    baseline: EntityState,
    times: Vec<f32>,
    updates: Vec<EntityUpdate>,
    frozen: bool,
}

impl GhostSynthesizer {
    pub fn new(track: &GhostTrack) -> Self {
        GhostSynthesizer {
            entity: track.entity,
            baseline: track.baseline,
            times: track.trajectory.iter().map(|s| s.time).collect(),
            updates: synthesize(&track.trajectory, &track.baseline, track.entity),
            frozen: track.trajectory.is_empty(),
        }
    }

    pub fn baseline_record(&self) -> SpawnBaseline {
        SpawnBaseline {
            entity: self.entity,
            state: self.baseline,
        }
    }

    /// Update for a base block at time `t`: the last sample at or before
    /// `t`. Nothing before the first sample, nothing after the last one
    /// went out.
    pub fn update_at(&mut self, t: f32) -> Option<EntityUpdate> {
        if self.frozen {
            return None;
        }
        let idx = self.times.partition_point(|&time| time <= t);
        if idx == 0 {
            return None;
        }
        if idx == self.updates.len() {
            self.frozen = true;
        }
        self.updates.get(idx - 1).copied()
    }
}
