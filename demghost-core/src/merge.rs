//! Stream merging
//!
//! The base demo is the timeline of record. Each ghost is parsed, tracked
//! and reduced to a [`GhostTrack`]; the base is then rewritten with one
//! extra baseline per ghost and, in every timed block, one update per
//! ghost after the base's own records.

use serde::Serialize;

use crate::error::{DemoError, Error, StreamId};
use crate::ghost::{EntityAllocator, GhostSynthesizer, GhostTrack};
use crate::models::ModelTable;
use crate::protocol::{lossy, Record, ServerInfo, DEFAULT_MAX_ENTITIES, MAX_MESSAGE_LEN};
use crate::stream::{Block, Stream};
use crate::tracker::{track, StreamSummary, Target, TrajectorySample};

/// Merge settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Entity table size; ghost ids must stay below it
    pub max_entities: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            max_entities: DEFAULT_MAX_ENTITIES,
        }
    }
}

/// Where a ghost ended up
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GhostPlacement {
    /// Position in the ghost input list
    pub index: usize,
    /// World model of the level the ghost was recorded on
    pub map: String,
    #[serde(flatten)]
    pub track: GhostTrack,
}

/// A block over the classic client's message size limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OversizedBlock {
    pub index: usize,
    pub len: usize,
}

/// Result of a merge
#[derive(Debug, Clone)]
pub struct Merged {
    pub bytes: Vec<u8>,
    /// World model of the base demo's level
    pub map: String,
    pub ghosts: Vec<GhostPlacement>,
    pub oversized_blocks: Vec<OversizedBlock>,
}

/// Stepwise merge: base first, then ghosts in order, then [`finish`](Merger::finish)
#[derive(Debug)]
pub struct Merger {
    options: MergeOptions,
    base: Stream,
    base_summary: StreamSummary,
    models: ModelTable,
    allocator: EntityAllocator,
    ghosts: Vec<GhostPlacement>,
}

fn map_name(info: &ServerInfo) -> String {
    lossy(info.map().unwrap_or(info.level_name.as_slice()))
}

impl Merger {
    pub fn new(base: &[u8], options: MergeOptions) -> Result<Self, Error> {
        let located = |e: Error| e.in_stream(StreamId::Base);

        let stream = Stream::parse(base).map_err(located)?;
        let summary = track(&stream, options.max_entities, Target::ViewEntity).map_err(located)?;
        let models = ModelTable::new(&summary.server_info.models)
            .map_err(|kind| located(kind.into()))?;
        let allocator = EntityAllocator::new(summary.max_entity_id, options.max_entities);

        Ok(Merger {
            options,
            base: stream,
            base_summary: summary,
            models,
            allocator,
            ghosts: Vec::new(),
        })
    }

    pub fn base_summary(&self) -> &StreamSummary {
        &self.base_summary
    }

    pub fn ghosts(&self) -> &[GhostPlacement] {
        &self.ghosts
    }

    /// Parse and track one ghost demo. On error the merger is left as it
    /// was before the call.
    pub fn add_ghost(&mut self, bytes: &[u8]) -> Result<&GhostPlacement, Error> {
        let index = self.ghosts.len();
        let located = |e: Error| e.in_stream(StreamId::Ghost(index));

        let summary = {
            let stream = Stream::parse(bytes).map_err(located)?;
            track(&stream, self.options.max_entities, Target::ViewEntity).map_err(located)?
        };

        let map = map_name(&summary.server_info);
        let mut models = self.models.clone();
        let mut allocator = self.allocator.clone();
        let track = build_track(summary, &mut models, &mut allocator)
            .map_err(|kind| located(kind.into()))?;

        self.models = models;
        self.allocator = allocator;
        self.ghosts.push(GhostPlacement { index, map, track });
        Ok(&self.ghosts[index])
    }

    /// Rewrite the base demo with every ghost added so far
    pub fn finish(self) -> Result<Merged, Error> {
        let Merger {
            mut base,
            base_summary,
            models,
            ghosts,
            ..
        } = self;
        let located = |e: Error| e.in_stream(StreamId::Base);

        if !ghosts.is_empty() {
            if models.grew() {
                for record in base.blocks.iter_mut().flat_map(|b| b.records.iter_mut()) {
                    if let Record::ServerInfo(info) = record {
                        info.models = models.names().to_vec();
                    }
                }
            }

            let inject_at = base
                .blocks
                .iter()
                .position(Block::has_baseline)
                .or_else(|| base.blocks.iter().position(Block::has_server_info))
                .ok_or_else(|| located(DemoError::MissingServerInfo.into()))?;

            let mut synths: Vec<GhostSynthesizer> =
                ghosts.iter().map(|g| GhostSynthesizer::new(&g.track)).collect();

            base.blocks[inject_at]
                .records
                .extend(synths.iter().map(|s| Record::Baseline(s.baseline_record())));

            for block in &mut base.blocks[inject_at..] {
                let Some(t) = block.time() else {
                    continue;
                };
                let updates: Vec<Record> = synths
                    .iter_mut()
                    .filter_map(|s| s.update_at(t))
                    .map(Record::EntityUpdate)
                    .collect();
                block.records.extend(updates);
            }
        }

        let file = base.encode();
        let oversized_blocks = file
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.payload.len() > MAX_MESSAGE_LEN)
            .map(|(index, b)| OversizedBlock {
                index,
                len: b.payload.len(),
            })
            .collect();
        let bytes = file.write().map_err(located)?;

        Ok(Merged {
            bytes,
            map: map_name(&base_summary.server_info),
            ghosts,
            oversized_blocks,
        })
    }
}

fn build_track(
    summary: StreamSummary,
    models: &mut ModelTable,
    allocator: &mut EntityAllocator,
) -> Result<GhostTrack, DemoError> {
    let source_entity = summary.view_entity.ok_or(DemoError::MissingViewEntity)?;
    let baseline = summary
        .followed_baseline
        .ok_or(DemoError::UninitializedEntity {
            entity: source_entity,
        })?;

    let remap = models.add(&summary.server_info.models)?;
    let baseline = remap.apply_state(&baseline)?;
    let trajectory = summary
        .trajectory
        .iter()
        .map(|s| {
            Ok(TrajectorySample {
                state: remap.apply_state(&s.state)?,
                ..*s
            })
        })
        .collect::<Result<Vec<_>, DemoError>>()?;
    let entity = allocator.allocate()?;

    Ok(GhostTrack {
        entity,
        source_entity,
        baseline,
        trajectory,
    })
}

/// Merge `ghosts` into `base` with default options
pub fn merge<G: AsRef<[u8]>>(base: &[u8], ghosts: &[G]) -> Result<Vec<u8>, Error> {
    let mut merger = Merger::new(base, MergeOptions::default())?;
    for ghost in ghosts {
        merger.add_ghost(ghost.as_ref())?;
    }
    Ok(merger.finish()?.bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EntityState, EntityUpdate};
    use crate::testutil::{player_state, DemoBuilder};

    const MAP: &str = "maps/e1m1.bsp";

    fn time(i: usize) -> f32 {
        i as f32 / 10.0
    }

    fn base_demo(blocks: usize) -> Vec<u8> {
        let mut demo = DemoBuilder::new(MAP).baseline(5, EntityState::default());
        for i in 1..blocks {
            demo = demo.block(move |b| {
                b.time(time(i))
                    .update_origin(1, [i as i16 * 8, 0, 0])
                    .nop()
            });
        }
        demo.build()
    }

    fn ghost_demo(map: &str, blocks: usize) -> Vec<u8> {
        let mut demo = DemoBuilder::new(map)
            .view(3)
            .no_baselines()
            .baseline(3, player_state());
        for i in 1..blocks {
            demo = demo.block(move |b| {
                b.time(time(i))
                    .update_origin(2, [1, 1, 1])
                    .update_origin(3, [0, i as i16 * 8, 16])
            });
        }
        demo.build()
    }

    fn record_counts(bytes: &[u8]) -> Vec<usize> {
        Stream::parse(bytes)
            .unwrap()
            .blocks
            .iter()
            .map(|b| b.records.len())
            .collect()
    }

    #[test]
    fn test_end_to_end_hundred_blocks() {
        let base = base_demo(100);
        let ghost = ghost_demo(MAP, 100);
        let merged = merge(&base, &[&ghost]).unwrap();

        let base_counts = record_counts(&base);
        let merged_counts = record_counts(&merged);
        assert_eq!(merged_counts.len(), 100);
        for (b, m) in base_counts.iter().zip(&merged_counts) {
            assert_eq!(*m, b + 1);
        }

        // base uses ids up to 5, so the ghost lands on 6
        let merged_stream = Stream::parse(&merged).unwrap();
        let replayed = track(&merged_stream, DEFAULT_MAX_ENTITIES, Target::Entity(6)).unwrap();
        let recorded = track(
            &Stream::parse(&ghost).unwrap(),
            DEFAULT_MAX_ENTITIES,
            Target::ViewEntity,
        )
        .unwrap();

        let states = |s: &StreamSummary| -> Vec<(f32, EntityState)> {
            s.trajectory.iter().map(|t| (t.time, t.state)).collect()
        };
        assert_eq!(recorded.trajectory.len(), 99);
        assert_eq!(states(&replayed), states(&recorded));
        assert_eq!(replayed.followed_baseline, recorded.followed_baseline);
    }

    #[test]
    fn test_merged_stream_still_tracks_base_view() {
        let base = base_demo(10);
        let merged = merge(&base, &[ghost_demo(MAP, 10)]).unwrap();

        let before = track(&Stream::parse(&base).unwrap(), DEFAULT_MAX_ENTITIES, Target::ViewEntity)
            .unwrap();
        let after = track(&Stream::parse(&merged).unwrap(), DEFAULT_MAX_ENTITIES, Target::ViewEntity)
            .unwrap();
        assert_eq!(before.trajectory, after.trajectory);
        assert_eq!(after.max_entity_id, 6);
    }

    #[test]
    fn test_no_ghosts_is_identity() {
        let base = base_demo(20);
        let merged = merge::<Vec<u8>>(&base, &[]).unwrap();
        assert_eq!(merged, base);
    }

    #[test]
    fn test_ghosts_get_distinct_ids_in_order() {
        let base = base_demo(10);
        let mut merger = Merger::new(&base, MergeOptions::default()).unwrap();
        assert_eq!(merger.add_ghost(&ghost_demo(MAP, 10)).unwrap().track.entity, 6);
        assert_eq!(merger.add_ghost(&ghost_demo(MAP, 10)).unwrap().track.entity, 7);
        assert_eq!(merger.ghosts().len(), 2);

        let merged = merger.finish().unwrap();
        let stream = Stream::parse(&merged.bytes).unwrap();
        let baselines: Vec<u16> = stream.blocks[0]
            .records
            .iter()
            .filter_map(|r| match r {
                Record::Baseline(b) => Some(b.entity),
                _ => None,
            })
            .collect();
        assert_eq!(baselines, vec![1, 5, 6, 7]);

        // base records first, then ghost 6, then ghost 7
        let last = stream.blocks[1].records.len();
        let tail: Vec<u16> = stream.blocks[1].records[last - 2..]
            .iter()
            .filter_map(|r| match r {
                Record::EntityUpdate(u) => Some(u.entity),
                _ => None,
            })
            .collect();
        assert_eq!(tail, vec![6, 7]);
    }

    #[test]
    fn test_ghost_freezes_when_trajectory_ends() {
        let base = base_demo(10);
        let ghost = ghost_demo(MAP, 4);
        let merged = merge(&base, &[ghost]).unwrap();

        let extra: Vec<usize> = record_counts(&merged)
            .iter()
            .zip(record_counts(&base))
            .map(|(m, b)| m - b)
            .collect();
        assert_eq!(extra, vec![1, 1, 1, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_ghost_models_appended() {
        let base = DemoBuilder::new(MAP)
            .models(&["progs/grenade.mdl"])
            .block(|b| b.time(0.1))
            .build();
        let ghost = DemoBuilder::new(MAP)
            .models(&["progs/eyes.mdl"])
            .no_baselines()
            .baseline(
                1,
                EntityState {
                    model: 3,
                    ..player_state()
                },
            )
            .block(|b| b.time(0.1).update_origin(1, [8, 8, 8]))
            .build();

        let mut merger = Merger::new(&base, MergeOptions::default()).unwrap();
        let placement = merger.add_ghost(&ghost).unwrap();
        assert_eq!(placement.track.baseline.model, 4);
        assert_eq!(placement.track.trajectory[0].state.model, 4);
        let merged = merger.finish().unwrap();

        let stream = Stream::parse(&merged.bytes).unwrap();
        let Record::ServerInfo(info) = &stream.blocks[0].records[0] else {
            panic!("expected server info first");
        };
        let names: Vec<&[u8]> = info.models.iter().map(Vec::as_slice).collect();
        assert_eq!(
            names,
            vec![
                MAP.as_bytes(),
                b"progs/player.mdl".as_slice(),
                b"progs/grenade.mdl".as_slice(),
                b"progs/eyes.mdl".as_slice(),
            ]
        );
    }

    #[test]
    fn test_ghost_level_reported() {
        let merged = {
            let mut merger = Merger::new(&base_demo(5), MergeOptions::default()).unwrap();
            merger.add_ghost(&ghost_demo("maps/e1m2.bsp", 5)).unwrap();
            merger.finish().unwrap()
        };
        assert_eq!(merged.map, MAP);
        assert_eq!(merged.ghosts[0].map, "maps/e1m2.bsp");
    }

    #[test]
    fn test_oversized_block_reported() {
        let mut print = vec![8u8];
        print.extend(std::iter::repeat_n(b'a', MAX_MESSAGE_LEN));
        print.push(0);
        let base = DemoBuilder::new(MAP)
            .block(|b| b.time(0.1))
            .block(move |b| b.time(0.2).opaque(&print))
            .build();

        let mut merger = Merger::new(&base, MergeOptions::default()).unwrap();
        merger.add_ghost(&ghost_demo(MAP, 3)).unwrap();
        let merged = merger.finish().unwrap();
        assert_eq!(merged.oversized_blocks.len(), 1);
        assert_eq!(merged.oversized_blocks[0].index, 2);
        assert!(merged.oversized_blocks[0].len > MAX_MESSAGE_LEN);
    }

    #[test]
    fn test_entity_id_exhaustion() {
        let base = base_demo(5);
        let options = MergeOptions { max_entities: 7 };
        let mut merger = Merger::new(&base, options).unwrap();
        merger.add_ghost(&ghost_demo(MAP, 5)).unwrap();

        let err = merger.add_ghost(&ghost_demo(MAP, 5)).unwrap_err();
        assert_eq!(err.stream, Some(StreamId::Ghost(1)));
        assert_eq!(err.kind, DemoError::EntityIdExhaustion { limit: 7 });
        // the failed ghost left nothing behind
        assert_eq!(merger.ghosts().len(), 1);
    }

    #[test]
    fn test_ghost_without_view_entity() {
        let ghost = DemoBuilder::new(MAP).no_view().block(|b| b.time(0.1)).build();
        let err = merge(&base_demo(5), &[ghost_demo(MAP, 5), ghost]).unwrap_err();
        assert_eq!(err.stream, Some(StreamId::Ghost(1)));
        assert_eq!(err.kind, DemoError::MissingViewEntity);
    }

    #[test]
    fn test_ghost_view_entity_without_baseline() {
        let ghost = DemoBuilder::new(MAP)
            .no_baselines()
            .block(|b| b.time(0.1).nop())
            .build();
        let err = merge(&base_demo(5), &[ghost]).unwrap_err();
        assert_eq!(err.stream, Some(StreamId::Ghost(0)));
        assert_eq!(err.block, None);
        assert_eq!(err.kind, DemoError::UninitializedEntity { entity: 1 });
        assert_eq!(err.to_string(), "ghost demo #1: Entity 1 has no baseline");
    }

    #[test]
    fn test_ghost_baseline_model_outside_precache() {
        // the ghost's own precache only has two entries
        let ghost = DemoBuilder::new(MAP)
            .no_baselines()
            .baseline(
                1,
                EntityState {
                    model: 9,
                    ..player_state()
                },
            )
            .block(|b| b.time(0.1).update_origin(1, [8, 8, 8]))
            .build();
        let err = merge(&base_demo(5), &[ghost_demo(MAP, 5), ghost]).unwrap_err();
        assert_eq!(err.stream, Some(StreamId::Ghost(1)));
        assert_eq!(err.kind, DemoError::UnknownModel { index: 9, count: 2 });
    }

    #[test]
    fn test_ghost_sample_model_outside_precache() {
        let ghost = DemoBuilder::new(MAP)
            .block(|b| b.time(0.1).update_origin(1, [8, 8, 8]))
            .block(|b| {
                b.time(0.2).update(EntityUpdate {
                    entity: 1,
                    model: Some(4),
                    ..Default::default()
                })
            })
            .build();

        let mut merger = Merger::new(&base_demo(5), MergeOptions::default()).unwrap();
        let err = merger.add_ghost(&ghost).unwrap_err();
        assert_eq!(err.stream, Some(StreamId::Ghost(0)));
        assert_eq!(err.kind, DemoError::UnknownModel { index: 4, count: 2 });
        assert!(merger.ghosts().is_empty());
    }

    #[test]
    fn test_ghost_errors_located() {
        let ghost = DemoBuilder::new(MAP)
            .block(|b| b.time(0.1))
            .block(|b| b.time(0.2).server_info("maps/e1m2.bsp"))
            .build();
        let err = merge(&base_demo(5), &[ghost]).unwrap_err();
        assert_eq!(err.stream, Some(StreamId::Ghost(0)));
        assert_eq!(err.block, Some(2));
        assert_eq!(err.kind, DemoError::MultiLevelDemo);
        assert_eq!(
            err.to_string(),
            "ghost demo #1, block 2: Demo spans more than one level"
        );
    }

    #[test]
    fn test_base_errors_located() {
        let mut base = base_demo(5);
        base.truncate(base.len() - 3);
        let err = merge(&base, &[ghost_demo(MAP, 5)]).unwrap_err();
        assert_eq!(err.stream, Some(StreamId::Base));
        assert_eq!(err.block, Some(4));
        assert!(matches!(err.kind, DemoError::TruncatedInput { .. }));
    }
}
