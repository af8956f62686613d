//! Reference arena builder and a default map

use glam::Vec3;
use std::collections::HashMap;

use super::collab::{Aabb, Arena, ArenaBuilder, CollisionWorld, MapData};
use super::error::ArenaError;
use super::rules::{GameMode, TeamLayout};

/// Gravity used by every built arena
pub const ARENA_GRAVITY: f32 = 20.0;

/// Builds a flat-floored arena with box cover from [`MapData`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatArena;

impl ArenaBuilder for FlatArena {
    fn build(&self, map: &MapData, mode: &GameMode) -> Result<Arena, ArenaError> {
        if !(map.half_extent.is_finite() && map.half_extent > 1.0) {
            return Err(ArenaError::InvalidSize(map.half_extent));
        }
        if map.spawn_points.is_empty() {
            return Err(ArenaError::NoSpawnPoints);
        }

        let mut team_spawns = map.team_spawns.clone();
        if let TeamLayout::Teams(count) = mode.teams {
            for team in 1..=count {
                if team_spawns.get(&team).map_or(true, Vec::is_empty) {
                    // Split the shared points between teams when the map has none
                    let points: Vec<Vec3> = map
                        .spawn_points
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| (*i % count as usize) + 1 == team as usize)
                        .map(|(_, p)| *p)
                        .collect();
                    if points.is_empty() {
                        return Err(ArenaError::NoTeamSpawns(team));
                    }
                    team_spawns.insert(team, points);
                }
            }
        }

        Ok(Arena {
            world: CollisionWorld {
                floor_y: map.floor_y,
                half_extent: map.half_extent,
                gravity: ARENA_GRAVITY,
                blocks: map.blocks.clone(),
            },
            spawn_points: map.spawn_points.clone(),
            team_spawns,
        })
    }
}

impl MapData {
    /// Square courtyard with four pillars and eight spawn points on a ring
    pub fn courtyard() -> Self {
        let spawn_points = (0..8)
            .map(|i| {
                let angle = i as f32 * std::f32::consts::TAU / 8.0;
                Vec3::new(angle.cos() * 28.0, 0.0, angle.sin() * 28.0)
            })
            .collect();
        let blocks = [(-10.0, -10.0), (10.0, -10.0), (-10.0, 10.0), (10.0, 10.0)]
            .into_iter()
            .map(|(x, z)| Aabb {
                min: Vec3::new(x - 1.5, 0.0, z - 1.5),
                max: Vec3::new(x + 1.5, 4.0, z + 1.5),
            })
            .collect();
        Self {
            name: "courtyard".to_string(),
            half_extent: 40.0,
            floor_y: 0.0,
            spawn_points,
            team_spawns: HashMap::new(),
            blocks,
        }
    }
}
