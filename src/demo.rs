//! Match-3 style scoring simulation
//!
//! Every tick the board is refilled with pieces, some pieces are marked for
//! destruction, and marked pieces are destroyed. A scoring system listening
//! for destroyed entities adds each piece's value to the unique `Score`.

use std::collections::HashSet;

use glam::IVec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use retinue_ecs::{
    ComponentIndex, Entity, Group, Matcher, SubscriptionId, World, WorldConfig, WorldError,
};
use tracing::{debug, info, warn};

use crate::settings::{BoardSettings, DemoSettings};

pub const POSITION: ComponentIndex = 0;
pub const SCORE_VALUE: ComponentIndex = 1;
pub const DESTROY: ComponentIndex = 2;
pub const SCORE: ComponentIndex = 3;

pub const COMPONENT_NAMES: [&str; 4] = ["Position", "ScoreValue", "Destroy", "Score"];

/// Board cell of a piece
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Position(pub IVec2);

/// Points a piece is worth when destroyed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScoreValue(pub u32);

/// Marks a piece for destruction at the end of the tick
#[derive(Debug, Default, Clone, Copy)]
pub struct Destroy;

/// Running total, held by a single entity
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Score(pub u32);

/// What happened during one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub filled: usize,
    pub destroyed: usize,
    pub points: u32,
    pub score: u32,
}

pub struct Board {
    world: World,
    settings: BoardSettings,
    rng: StdRng,
    pieces: Group,
    doomed: Group,
    score_system: SubscriptionId,
    ticks: u32,
}

impl Board {
    pub fn new(settings: &DemoSettings) -> Result<Self, WorldError> {
        let config = WorldConfig {
            name: settings.world_name.clone(),
            component_names: COMPONENT_NAMES.iter().map(|name| name.to_string()).collect(),
            start_creation_index: 0,
        };
        let world = World::from_config(&config)?;

        let pieces = world.get_group(
            &Matcher::builder()
                .all_of([POSITION, SCORE_VALUE])
                .with_metadata(world.metadata())
                .build(),
        )?;
        let doomed = world.get_group(&world.index_matcher(DESTROY)?)?;
        let score_system = install_score_system(&world);
        world.set_unique_with(SCORE, |score: &mut Score| score.0 = 0)?;

        debug!("Board {}x{} ready", settings.board.width, settings.board.height);
        Ok(Self {
            world,
            settings: settings.board.clone(),
            rng: StdRng::seed_from_u64(settings.seed),
            pieces,
            doomed,
            score_system,
            ticks: 0,
        })
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn pieces(&self) -> &Group {
        &self.pieces
    }

    /// Refill, mark and destroy, then report the new score.
    pub fn tick(&mut self) -> Result<TickReport, WorldError> {
        let filled = self.fill()?;
        self.mark()?;
        let (destroyed, points) = self.destroy_marked()?;
        let score = self.score()?;
        self.ticks += 1;
        info!(
            "Tick {}: filled {}, destroyed {} (+{}), score {}",
            self.ticks, filled, destroyed, points, score
        );
        Ok(TickReport {
            filled,
            destroyed,
            points,
            score,
        })
    }

    pub fn score(&self) -> Result<u32, WorldError> {
        self.world.with_unique(SCORE, |score: &Score| score.0)
    }

    /// Detach the scoring system and tear the world down, failing if any
    /// entity is still retained.
    pub fn shutdown(self) -> Result<(), WorldError> {
        self.world
            .events()
            .entity_will_be_destroyed
            .unsubscribe(self.score_system);
        self.world.reset()?;
        self.world.clear_component_pools();
        info!("'{}' shut down after {} ticks", self.world, self.ticks);
        Ok(())
    }

    /// Put a new piece on every empty cell.
    fn fill(&mut self) -> Result<usize, WorldError> {
        let occupied: HashSet<IVec2> = self
            .pieces
            .get_entities()
            .iter()
            .filter_map(|piece| piece.with_component(POSITION, |p: &Position| p.0).ok())
            .collect();

        let max_value = self.settings.max_piece_value.max(1);
        let mut filled = 0;
        for y in 0..self.settings.height {
            for x in 0..self.settings.width {
                let cell = IVec2::new(x, y);
                if occupied.contains(&cell) {
                    continue;
                }
                let value = self.rng.gen_range(1..=max_value);
                self.world
                    .create_entity()
                    .add_with(POSITION, |p: &mut Position| p.0 = cell)?
                    .add_with(SCORE_VALUE, |v: &mut ScoreValue| v.0 = value)?;
                filled += 1;
            }
        }
        Ok(filled)
    }

    fn mark(&mut self) -> Result<(), WorldError> {
        let chance = self.settings.destroy_chance.clamp(0.0, 1.0);
        for piece in in_creation_order(&self.pieces) {
            if !piece.has_component(DESTROY) && self.rng.gen_bool(chance) {
                piece.add_with(DESTROY, |_: &mut Destroy| {})?;
            }
        }
        Ok(())
    }

    /// Destroy every marked piece. Returns how many went and what they were
    /// worth.
    fn destroy_marked(&mut self) -> Result<(usize, u32), WorldError> {
        let doomed = in_creation_order(&self.doomed);
        let mut points = 0;
        for piece in &doomed {
            points += piece
                .with_component(SCORE_VALUE, |v: &ScoreValue| v.0)
                .unwrap_or(0);
            self.world.destroy_entity(piece)?;
        }
        Ok((doomed.len(), points))
    }
}

/// Group members sorted by creation index. Group iteration order is
/// unspecified, and seeded runs draw from the rng per member.
fn in_creation_order(group: &Group) -> Vec<Entity> {
    let mut entities = group.get_entities().to_vec();
    entities.sort_by_key(Entity::creation_index);
    entities
}

/// Add the value of every destroyed piece to the unique score.
fn install_score_system(world: &World) -> SubscriptionId {
    world.on_entity_will_be_destroyed(|world, entity| {
        let Ok(value) = entity.with_component(SCORE_VALUE, |v: &ScoreValue| v.0) else {
            return;
        };
        let current = world.with_unique(SCORE, |score: &Score| score.0).unwrap_or(0);
        if let Err(err) = world.replace_unique_with(SCORE, |score: &mut Score| {
            score.0 = current + value;
        }) {
            warn!("Could not update score: {} ({})", err, err.hint());
        }
    })
}
