//! Protocol State Tracking
//!
//! Replays a decoded stream's records to learn what the merge needs: the
//! level's server info, which entity the camera follows, every entity's
//! baseline, the highest entity id in use, and the followed entity's
//! trajectory.

use serde::Serialize;

use crate::error::{DemoError, Error};
use crate::protocol::{EntityState, EntityUpdate, Record, ServerInfo};
use crate::stream::Stream;

/// Which entity's updates make up the trajectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    /// Whatever the last `SetView` bound the camera to
    #[default]
    ViewEntity,
    Entity(u16),
}

/// Followed entity state at one server time
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectorySample {
    pub time: f32,
    pub entity: u16,
    pub state: EntityState,
    pub no_lerp: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    baseline: EntityState,
    current: EntityState,
    baselined: bool,
}

/// Dense entity table indexed by entity id
#[derive(Debug, Clone)]
pub struct EntityTable {
    slots: Vec<Option<Slot>>,
}

impl EntityTable {
    pub fn new(max_entities: usize) -> Self {
        EntityTable {
            slots: vec![None; max_entities],
        }
    }

    pub fn limit(&self) -> usize {
        self.slots.len()
    }

    fn slot_mut(&mut self, entity: u16) -> Result<&mut Option<Slot>, DemoError> {
        let limit = self.slots.len();
        self.slots
            .get_mut(entity as usize)
            .ok_or(DemoError::EntityOutOfRange { entity, limit })
    }

    fn slot(&self, entity: u16) -> Option<&Slot> {
        self.slots.get(entity as usize).and_then(Option::as_ref)
    }

    pub fn set_baseline(&mut self, entity: u16, state: EntityState) -> Result<(), DemoError> {
        *self.slot_mut(entity)? = Some(Slot {
            baseline: state,
            current: state,
            baselined: true,
        });
        Ok(())
    }

    /// Apply a fast update and return the entity's new state. Entities
    /// never baselined resolve against an all-zero baseline.
    pub fn apply(&mut self, update: &EntityUpdate) -> Result<EntityState, DemoError> {
        let slot = self.slot_mut(update.entity)?.get_or_insert_with(Slot::default);
        slot.current = update.resolve(&slot.baseline);
        Ok(slot.current)
    }

    pub fn baseline(&self, entity: u16) -> Option<&EntityState> {
        self.slot(entity)
            .filter(|s| s.baselined)
            .map(|s| &s.baseline)
    }

    pub fn current(&self, entity: u16) -> Option<&EntityState> {
        self.slot(entity).map(|s| &s.current)
    }

    pub fn is_baselined(&self, entity: u16) -> bool {
        self.slot(entity).is_some_and(|s| s.baselined)
    }
}

/// What one pass over a stream found out
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    pub server_info: ServerInfo,
    /// Entity bound by the last `SetView`
    pub view_entity: Option<u16>,
    /// Entity the trajectory follows at the end of the stream
    pub followed: Option<u16>,
    pub followed_baseline: Option<EntityState>,
    /// Highest entity id any baseline, update or set-view referenced
    pub max_entity_id: u16,
    pub trajectory: Vec<TrajectorySample>,
}

/// Consumes records in stream order
#[derive(Debug, Clone)]
pub struct ProtocolStateTracker {
    target: Target,
    entities: EntityTable,
    server_info: Option<ServerInfo>,
    view_entity: Option<u16>,
    time: Option<f32>,
    max_entity_id: u16,
    trajectory: Vec<TrajectorySample>,
}

impl ProtocolStateTracker {
    pub fn new(max_entities: usize, target: Target) -> Self {
        ProtocolStateTracker {
            target,
            entities: EntityTable::new(max_entities),
            server_info: None,
            view_entity: None,
            time: None,
            max_entity_id: 0,
            trajectory: Vec::new(),
        }
    }

    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    fn followed(&self) -> Option<u16> {
        match self.target {
            Target::ViewEntity => self.view_entity,
            Target::Entity(entity) => Some(entity),
        }
    }

    fn check_range(&self, entity: u16) -> Result<(), DemoError> {
        let limit = self.entities.limit();
        if entity as usize >= limit {
            return Err(DemoError::EntityOutOfRange { entity, limit });
        }
        Ok(())
    }

    pub fn observe(&mut self, record: &Record) -> Result<(), DemoError> {
        match record {
            Record::ServerInfo(info) => {
                if self.server_info.is_some() {
                    return Err(DemoError::MultiLevelDemo);
                }
                self.server_info = Some(info.clone());
            }
            Record::Baseline(b) => {
                self.entities.set_baseline(b.entity, b.state)?;
                self.max_entity_id = self.max_entity_id.max(b.entity);
            }
            Record::EntityUpdate(update) => {
                let followed = self.followed() == Some(update.entity);
                if followed && !self.entities.is_baselined(update.entity) {
                    self.check_range(update.entity)?;
                    return Err(DemoError::UninitializedEntity {
                        entity: update.entity,
                    });
                }
                let state = self.entities.apply(update)?;
                self.max_entity_id = self.max_entity_id.max(update.entity);

                if let (true, Some(time)) = (followed, self.time) {
                    let sample = TrajectorySample {
                        time,
                        entity: update.entity,
                        state,
                        no_lerp: update.no_lerp(),
                    };
                    match self.trajectory.last_mut() {
                        Some(last) if last.time == time => *last = sample,
                        _ => self.trajectory.push(sample),
                    }
                }
            }
            Record::SetView(entity) => {
                self.check_range(*entity)?;
                self.view_entity = Some(*entity);
                self.max_entity_id = self.max_entity_id.max(*entity);
            }
            Record::Time(t) => self.time = Some(*t),
            Record::PlayerState(_) | Record::SpawnStatic(_) | Record::Opaque(_) => {}
        }
        Ok(())
    }

    pub fn finish(self) -> Result<StreamSummary, DemoError> {
        let followed = self.followed();
        let followed_baseline = followed.and_then(|e| self.entities.baseline(e).copied());
        let server_info = self.server_info.ok_or(DemoError::MissingServerInfo)?;
        Ok(StreamSummary {
            server_info,
            view_entity: self.view_entity,
            followed,
            followed_baseline,
            max_entity_id: self.max_entity_id,
            trajectory: self.trajectory,
        })
    }
}

/// Track a whole stream. Errors carry the block index they occurred in.
pub fn track(stream: &Stream, max_entities: usize, target: Target) -> Result<StreamSummary, Error> {
    let mut tracker = ProtocolStateTracker::new(max_entities, target);
    for (index, block) in stream.blocks.iter().enumerate() {
        for record in &block.records {
            tracker
                .observe(record)
                .map_err(|kind| Error::in_block(index, kind))?;
        }
    }
    Ok(tracker.finish()?)
}
