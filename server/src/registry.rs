//! Authoritative store of live snakes and food
//!
//! The registry is shared between the per-connection session handling and the
//! tick driver. Every public operation holds the world lock for its whole
//! duration, so a reader never sees a half-applied join, leave or direction
//! change. Snakes are kept in join order; that order is the iteration order
//! used by the simulation and the scoreboard.

use crate::error::GameError;
use crate::random::RandomGenerator;
use log::{debug, info, warn};
use shared::{
    ConnectionId, Field, Food, Position, Snake, SnekPart, MAX_NAME_LEN, SNAKE_DIRECTION, SNAKE_SPEED,
};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Spawn parameters applied to new snakes and the initial food supply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistrySettings {
    /// Food items kept on the field. Values below one are raised to one.
    pub food_count: usize,
    pub speed: i32,
    pub direction: f64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            food_count: 100,
            speed: SNAKE_SPEED,
            direction: SNAKE_DIRECTION,
        }
    }
}

/// Point-in-time copy of the registry contents.
#[derive(Debug, Clone, Default)]
pub struct WorldSnapshot {
    pub snakes: Vec<Snake>,
    pub food: Vec<Food>,
}

impl WorldSnapshot {
    pub fn snake(&self, connection_id: &ConnectionId) -> Option<&Snake> {
        self.snakes
            .iter()
            .find(|snake| &snake.connection_id == connection_id)
    }

    /// Every segment of every snake, in registry order.
    pub fn segments(&self) -> Vec<SnekPart> {
        self.snakes
            .iter()
            .flat_map(|snake| snake.segments.iter().cloned())
            .collect()
    }
}

/// Mutable world state guarded by the registry lock.
#[derive(Debug)]
pub struct World {
    pub(crate) field: Field,
    pub(crate) snakes: Vec<Snake>,
    pub(crate) food: Vec<Food>,
}

impl World {
    fn index_of(&self, connection_id: &ConnectionId) -> Option<usize> {
        self.snakes
            .iter()
            .position(|snake| &snake.connection_id == connection_id)
    }

    fn snake_mut(&mut self, connection_id: &ConnectionId) -> Result<&mut Snake, GameError> {
        match self.index_of(connection_id) {
            Some(index) => Ok(&mut self.snakes[index]),
            None => Err(GameError::UnknownConnection(connection_id.clone())),
        }
    }

    /// True if any snake segment or food item sits on `position`.
    pub(crate) fn is_occupied(&self, position: Position) -> bool {
        self.food.iter().any(|food| food.position == position)
            || self
                .snakes
                .iter()
                .any(|snake| snake.segments.iter().any(|part| part.position == position))
    }

    /// Places one food item on a random free cell and returns where it went.
    pub(crate) fn spawn_food(&mut self) -> Position {
        let generator = RandomGenerator::instance();
        let position = generator.random_free_position(self.field, |p| self.is_occupied(p));
        self.food.push(Food {
            position,
            color: generator.random_color(),
        });
        position
    }
}

pub struct Registry {
    world: RwLock<World>,
    settings: RegistrySettings,
}

impl Registry {
    /// Creates a registry for `field` and seeds the food supply.
    pub fn new(field: Field, settings: RegistrySettings) -> Self {
        let mut world = World {
            field,
            snakes: Vec::new(),
            food: Vec::new(),
        };

        let food_count = settings.food_count.max(1);
        for _ in 0..food_count {
            world.spawn_food();
        }
        info!(
            "Registry created for {}x{} field with {} food",
            field.width, field.height, food_count
        );

        Self {
            world: RwLock::new(world),
            settings,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, World> {
        self.world.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, World> {
        self.world.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a snake for `connection_id` on a random free cell.
    ///
    /// A second join for a connection that already owns a live snake is
    /// rejected and leaves the existing snake untouched.
    pub fn join(&self, connection_id: &ConnectionId, name: &str) -> Result<Snake, GameError> {
        let mut world = self.write();
        if world.index_of(connection_id).is_some() {
            return Err(GameError::DuplicateConnection(connection_id.clone()));
        }
        let spawn = RandomGenerator::instance()
            .random_free_position(world.field, |p| world.is_occupied(p));
        Ok(self.insert_snake(&mut world, connection_id, name, spawn))
    }

    /// Like [`Registry::join`] but spawns on `position`, clamped into the field.
    pub fn join_at(
        &self,
        connection_id: &ConnectionId,
        name: &str,
        position: Position,
    ) -> Result<Snake, GameError> {
        let mut world = self.write();
        if world.index_of(connection_id).is_some() {
            return Err(GameError::DuplicateConnection(connection_id.clone()));
        }
        let spawn = world.field.clamp(position);
        Ok(self.insert_snake(&mut world, connection_id, name, spawn))
    }

    fn insert_snake(
        &self,
        world: &mut World,
        connection_id: &ConnectionId,
        name: &str,
        spawn: Position,
    ) -> Snake {
        let color = RandomGenerator::instance().random_color();
        let name: String = name.chars().take(MAX_NAME_LEN).collect();
        let mut snake = Snake::new(connection_id.clone(), &name, &color, spawn);
        snake.speed = self.settings.speed;
        snake.boost_speed = self.settings.speed.saturating_mul(2);
        snake.direction = normalize_direction(self.settings.direction).unwrap_or(SNAKE_DIRECTION);

        info!(
            "Snake '{}' joined for {} at ({}, {})",
            name, connection_id, spawn.x, spawn.y
        );
        world.snakes.push(snake.clone());
        snake
    }

    /// Removes the connection's snake. Unknown connections are a no-op.
    pub fn leave(&self, connection_id: &ConnectionId) -> Option<Snake> {
        let mut world = self.write();
        let index = world.index_of(connection_id)?;
        let snake = world.snakes.remove(index);
        info!("Snake '{}' left ({})", snake.name, connection_id);
        Some(snake)
    }

    /// Sets the heading, normalized into `[0, 360)`. Returns the stored value.
    pub fn set_direction(
        &self,
        connection_id: &ConnectionId,
        degrees: f64,
    ) -> Result<f64, GameError> {
        let direction = normalize_direction(degrees)?;
        let mut world = self.write();
        let snake = world.snake_mut(connection_id)?;
        snake.direction = direction;
        Ok(direction)
    }

    /// Flips `fast` and re-evaluates the movement strategy. Returns the new flag.
    pub fn toggle_speed(&self, connection_id: &ConnectionId) -> Result<bool, GameError> {
        let mut world = self.write();
        let snake = world.snake_mut(connection_id)?;
        snake.fast = !snake.fast;
        snake.toggle_movement_strategy();
        debug!(
            "Snake '{}' switched to {:?}",
            snake.name, snake.movement_strategy
        );
        Ok(snake.fast)
    }

    /// Adds one segment on the snake's tail cell. Returns the new length.
    pub fn grow(&self, connection_id: &ConnectionId) -> Result<usize, GameError> {
        let mut world = self.write();
        let snake = world.snake_mut(connection_id)?;
        if snake.is_empty() {
            warn!("Cannot grow snake '{}' with no segments", snake.name);
            return Err(GameError::NoSegments(connection_id.clone()));
        }
        Ok(snake.grow())
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        let world = self.read();
        WorldSnapshot {
            snakes: world.snakes.clone(),
            food: world.food.clone(),
        }
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<Snake> {
        let world = self.read();
        world
            .index_of(connection_id)
            .map(|index| world.snakes[index].clone())
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.read().index_of(connection_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.read().snakes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().snakes.is_empty()
    }

    pub fn field(&self) -> Field {
        self.read().field
    }

    pub fn food_count(&self) -> usize {
        self.read().food.len()
    }

    /// Places a food item at `position`, clamped into the field.
    pub fn add_food(&self, position: Position) {
        let mut world = self.write();
        let position = world.field.clamp(position);
        world.food.push(Food {
            position,
            color: RandomGenerator::instance().random_color(),
        });
    }

    /// Runs `f` with exclusive access to the world.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        let mut world = self.write();
        f(&mut world)
    }
}

/// Maps any finite angle into `[0, 360)`.
pub fn normalize_direction(degrees: f64) -> Result<f64, GameError> {
    if !degrees.is_finite() {
        return Err(GameError::InvalidDirection(degrees));
    }
    let normalized = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if normalized >= 360.0 {
        Ok(0.0)
    } else {
        Ok(normalized)
    }
}
