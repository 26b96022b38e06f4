//! Per-tick world update: movement, body following, food and collisions.
//!
//! Every snake is judged against the positions the world had when the tick
//! started, so processing order never decides who dies. Two heads landing on
//! the same cell in the same tick kill both snakes.

use crate::observer::ObserverBus;
use crate::registry::{Registry, World};
use clap::ValueEnum;
use log::{debug, error};
use shared::{ConnectionId, Field, Food, Position, Snake, SnekPart};
use std::collections::HashMap;

/// What happens when a head is moved outside the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BoundaryPolicy {
    /// Re-enter from the opposite edge.
    #[default]
    Wrap,
    /// Stop on the edge cell.
    Clamp,
    /// Leaving the field is fatal.
    Kill,
}

impl BoundaryPolicy {
    /// Returns the in-bounds head position, or `None` if the snake dies.
    pub fn resolve(&self, field: Field, position: Position) -> Option<Position> {
        if field.contains(position) {
            return Some(position);
        }
        match self {
            BoundaryPolicy::Wrap => Some(field.wrap(position)),
            BoundaryPolicy::Clamp => Some(field.clamp(position)),
            BoundaryPolicy::Kill => None,
        }
    }
}

/// Summary of one [`Simulation::step`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub moved: usize,
    pub grown: usize,
    pub died: Vec<ConnectionId>,
    /// Snakes left untouched because their state was invalid.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Fate {
    Skip,
    Die(DeathCause),
    Move {
        head: Position,
        food: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DeathCause {
    OutOfBounds,
    Collision,
    HeadOn,
}

pub struct Simulation {
    policy: BoundaryPolicy,
    tick: u64,
}

impl Simulation {
    pub fn new(policy: BoundaryPolicy) -> Self {
        Self { policy, tick: 0 }
    }

    pub fn policy(&self) -> BoundaryPolicy {
        self.policy
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Advances the world by one tick and publishes the results.
    ///
    /// The registry stays locked for the whole update. Events are published
    /// only after the lock is released.
    pub fn step(&mut self, registry: &Registry, bus: &ObserverBus) -> TickReport {
        self.tick += 1;
        let policy = self.policy;
        let outcome = registry.update(|world| advance(world, policy));

        for snake in &outcome.died {
            bus.publish_died(snake);
        }
        for snake in &outcome.updated {
            bus.publish_updated(snake);
        }

        let mut report = outcome.report;
        report.tick = self.tick;
        report
    }
}

struct Outcome {
    died: Vec<Snake>,
    updated: Vec<Snake>,
    report: TickReport,
}

fn advance(world: &mut World, policy: BoundaryPolicy) -> Outcome {
    let occupancy = occupancy(&world.snakes);
    let mut fates: Vec<Fate> = world
        .snakes
        .iter()
        .map(|snake| plan(snake, world.field, &world.food, &occupancy, policy))
        .collect();
    resolve_head_on(&mut fates);

    let mut report = TickReport::default();
    let mut died = Vec::new();
    let mut updated = Vec::new();
    let mut eaten = Vec::new();

    let snakes = std::mem::take(&mut world.snakes);
    for (mut snake, fate) in snakes.into_iter().zip(fates) {
        match fate {
            Fate::Skip => {
                error!(
                    "Snake '{}' ({}) has no segments, skipping",
                    snake.name, snake.connection_id
                );
                report.skipped += 1;
                world.snakes.push(snake);
            }
            Fate::Die(cause) => {
                debug!("Snake '{}' died: {:?}", snake.name, cause);
                report.died.push(snake.connection_id.clone());
                died.push(snake);
            }
            Fate::Move { head, food } => {
                shift_body(&mut snake, head, food.is_some());
                if let Some(index) = food {
                    eaten.push(index);
                    report.grown += 1;
                }
                report.moved += 1;
                updated.push(snake.clone());
                world.snakes.push(snake);
            }
        }
    }

    eaten.sort_unstable();
    eaten.dedup();
    for index in eaten.iter().rev() {
        world.food.remove(*index);
    }
    for _ in &eaten {
        world.spawn_food();
    }

    Outcome {
        died,
        updated,
        report,
    }
}

/// How many pre-tick segments sit on each cell.
fn occupancy(snakes: &[Snake]) -> HashMap<Position, usize> {
    let mut cells = HashMap::new();
    for part in snakes.iter().flat_map(|snake| snake.segments.iter()) {
        *cells.entry(part.position).or_insert(0) += 1;
    }
    cells
}

fn plan(
    snake: &Snake,
    field: Field,
    food: &[Food],
    occupancy: &HashMap<Position, usize>,
    policy: BoundaryPolicy,
) -> Fate {
    let Some(proposed) = snake.next_head() else {
        return Fate::Skip;
    };
    let Some(head) = policy.resolve(field, proposed) else {
        return Fate::Die(DeathCause::OutOfBounds);
    };

    let food = food.iter().position(|item| item.position == head);

    let mut hits = occupancy.get(&head).copied().unwrap_or(0);
    // the tail moves away this tick unless the snake grows
    if food.is_none() && snake.tail() == Some(head) {
        hits = hits.saturating_sub(1);
    }
    if hits > 0 {
        return Fate::Die(DeathCause::Collision);
    }

    Fate::Move { head, food }
}

fn resolve_head_on(fates: &mut [Fate]) {
    let mut heads: HashMap<Position, usize> = HashMap::new();
    for fate in fates.iter() {
        if let Fate::Move { head, .. } = fate {
            *heads.entry(*head).or_insert(0) += 1;
        }
    }

    for fate in fates.iter_mut() {
        if let Fate::Move { head, .. } = fate {
            if heads.get(head).copied().unwrap_or(0) > 1 {
                *fate = Fate::Die(DeathCause::HeadOn);
            }
        }
    }
}

/// Follow-the-leader: each segment takes its predecessor's cell and the head
/// takes `head`. A growing snake keeps a new segment on the old tail cell.
fn shift_body(snake: &mut Snake, head: Position, grows: bool) {
    let old_tail = snake.tail();
    for i in (1..snake.segments.len()).rev() {
        snake.segments[i].position = snake.segments[i - 1].position;
    }
    if let Some(first) = snake.segments.first_mut() {
        first.position = head;
    }

    if let (true, Some(tail)) = (grows, old_tail) {
        snake.segments.push(SnekPart {
            position: tail,
            color: snake.color.clone(),
            name: snake.name.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::EventLog;
    use crate::registry::RegistrySettings;
    use std::sync::Arc;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    /// Registry whose only food sits in the corner, away from every test.
    fn test_registry(field: Field) -> Registry {
        let registry = Registry::new(
            field,
            RegistrySettings {
                food_count: 1,
                ..RegistrySettings::default()
            },
        );
        registry.update(|world| {
            world.food.clear();
            world.food.push(Food {
                position: Position::new(0, 0),
                color: "#FFFFFF".to_string(),
            });
        });
        registry
    }

    /// Adds a snake with the given body, heading and speed.
    fn place(registry: &Registry, id: &str, body: &[(i32, i32)], direction: f64, speed: i32) {
        let (x, y) = body[0];
        registry.join_at(&conn(id), id, Position::new(x, y)).unwrap();
        registry.update(|world| {
            let snake = world
                .snakes
                .iter_mut()
                .find(|s| s.connection_id == conn(id))
                .unwrap();
            snake.segments = body
                .iter()
                .map(|&(x, y)| SnekPart {
                    position: Position::new(x, y),
                    color: snake.color.clone(),
                    name: snake.name.clone(),
                })
                .collect();
            snake.direction = direction;
            snake.speed = speed;
        });
    }

    fn positions(registry: &Registry, id: &str) -> Vec<(i32, i32)> {
        registry
            .get(&conn(id))
            .unwrap()
            .segments
            .iter()
            .map(|part| (part.position.x, part.position.y))
            .collect()
    }

    #[test]
    fn test_head_moves_by_strategy() {
        let registry = test_registry(Field::new(200, 200));
        let bus = ObserverBus::new();
        place(&registry, "a", &[(100, 100)], 90.0, 4);

        let mut simulation = Simulation::new(BoundaryPolicy::Wrap);
        let report = simulation.step(&registry, &bus);

        assert_eq!(report.tick, 1);
        assert_eq!(report.moved, 1);
        assert_eq!(positions(&registry, "a"), vec![(100, 104)]);
    }

    #[test]
    fn test_boost_moves_twice_as_far() {
        let registry = test_registry(Field::new(200, 200));
        let bus = ObserverBus::new();
        place(&registry, "a", &[(100, 100)], 0.0, 4);
        registry.toggle_speed(&conn("a")).unwrap();

        Simulation::new(BoundaryPolicy::Wrap).step(&registry, &bus);

        assert_eq!(positions(&registry, "a"), vec![(108, 100)]);
    }

    #[test]
    fn test_body_follows_head() {
        let registry = test_registry(Field::new(200, 200));
        let bus = ObserverBus::new();
        place(&registry, "a", &[(100, 100), (96, 100), (92, 100)], 0.0, 4);

        Simulation::new(BoundaryPolicy::Wrap).step(&registry, &bus);

        assert_eq!(
            positions(&registry, "a"),
            vec![(104, 100), (100, 100), (96, 100)]
        );
    }

    #[test]
    fn test_eating_grows_and_replaces_food() {
        let registry = test_registry(Field::new(200, 200));
        let bus = ObserverBus::new();
        place(&registry, "a", &[(100, 100), (96, 100)], 0.0, 4);
        registry.add_food(Position::new(104, 100));
        assert_eq!(registry.food_count(), 2);

        let report = Simulation::new(BoundaryPolicy::Wrap).step(&registry, &bus);

        assert_eq!(report.grown, 1);
        assert_eq!(
            positions(&registry, "a"),
            vec![(104, 100), (100, 100), (96, 100)]
        );
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.food.len(), 2);
        assert!(snapshot
            .food
            .iter()
            .all(|food| food.position != Position::new(104, 100)));
        assert!(snapshot
            .food
            .iter()
            .all(|food| registry.field().contains(food.position)));
    }

    #[test]
    fn test_self_collision_kills() {
        let registry = test_registry(Field::new(200, 200));
        let bus = ObserverBus::new();
        place(
            &registry,
            "a",
            &[(100, 100), (100, 96), (104, 96), (104, 100), (104, 104)],
            0.0,
            4,
        );

        let report = Simulation::new(BoundaryPolicy::Wrap).step(&registry, &bus);

        assert_eq!(report.died, vec![conn("a")]);
        assert!(registry.get(&conn("a")).is_none());
    }

    #[test]
    fn test_moving_onto_own_tail_is_safe() {
        let registry = test_registry(Field::new(200, 200));
        let bus = ObserverBus::new();
        place(
            &registry,
            "a",
            &[(100, 100), (100, 96), (104, 96), (104, 100)],
            0.0,
            4,
        );

        let report = Simulation::new(BoundaryPolicy::Wrap).step(&registry, &bus);

        assert!(report.died.is_empty());
        assert_eq!(
            positions(&registry, "a"),
            vec![(104, 100), (100, 100), (100, 96), (104, 96)]
        );
    }

    #[test]
    fn test_collision_with_other_snake_is_order_independent() {
        for a_first in [true, false] {
            let registry = test_registry(Field::new(200, 200));
            let bus = ObserverBus::new();
            let join_a = || place(&registry, "a", &[(100, 100)], 0.0, 4);
            let join_b = || place(&registry, "b", &[(104, 100), (104, 96)], 90.0, 4);
            if a_first {
                join_a();
                join_b();
            } else {
                join_b();
                join_a();
            }

            let report = Simulation::new(BoundaryPolicy::Wrap).step(&registry, &bus);

            assert_eq!(report.died, vec![conn("a")], "a_first = {}", a_first);
            assert_eq!(positions(&registry, "b"), vec![(104, 104), (104, 100)]);
        }
    }

    #[test]
    fn test_other_snakes_vacated_tail_still_counts() {
        for a_first in [true, false] {
            let registry = test_registry(Field::new(200, 200));
            let bus = ObserverBus::new();
            let join_a = || place(&registry, "a", &[(100, 100)], 0.0, 4);
            let join_b = || place(&registry, "b", &[(104, 92), (104, 96), (104, 100)], 270.0, 4);
            if a_first {
                join_a();
                join_b();
            } else {
                join_b();
                join_a();
            }

            let report = Simulation::new(BoundaryPolicy::Wrap).step(&registry, &bus);

            assert_eq!(report.died, vec![conn("a")], "a_first = {}", a_first);
            assert!(registry.get(&conn("b")).is_some());
        }
    }

    #[test]
    fn test_head_on_kills_both() {
        let registry = test_registry(Field::new(200, 200));
        let bus = ObserverBus::new();
        place(&registry, "a", &[(100, 100)], 0.0, 4);
        place(&registry, "b", &[(108, 100)], 180.0, 4);

        let report = Simulation::new(BoundaryPolicy::Wrap).step(&registry, &bus);

        assert_eq!(report.died, vec![conn("a"), conn("b")]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_boundary_wrap() {
        let registry = test_registry(Field::new(100, 100));
        let bus = ObserverBus::new();
        place(&registry, "a", &[(98, 50)], 0.0, 4);

        Simulation::new(BoundaryPolicy::Wrap).step(&registry, &bus);

        assert_eq!(positions(&registry, "a"), vec![(2, 50)]);
    }

    #[test]
    fn test_boundary_clamp() {
        let registry = test_registry(Field::new(100, 100));
        let bus = ObserverBus::new();
        place(&registry, "a", &[(98, 50)], 0.0, 4);

        Simulation::new(BoundaryPolicy::Clamp).step(&registry, &bus);

        assert_eq!(positions(&registry, "a"), vec![(99, 50)]);
    }

    #[test]
    fn test_boundary_kill() {
        let registry = test_registry(Field::new(100, 100));
        let bus = ObserverBus::new();
        place(&registry, "a", &[(98, 50)], 0.0, 4);
        place(&registry, "b", &[(10, 50)], 0.0, 4);

        let report = Simulation::new(BoundaryPolicy::Kill).step(&registry, &bus);

        assert_eq!(report.died, vec![conn("a")]);
        assert_eq!(positions(&registry, "b"), vec![(14, 50)]);
    }

    #[test]
    fn test_resolve_keeps_in_bounds_positions() {
        let field = Field::new(10, 10);
        let inside = Position::new(3, 4);
        for policy in [BoundaryPolicy::Wrap, BoundaryPolicy::Clamp, BoundaryPolicy::Kill] {
            assert_eq!(policy.resolve(field, inside), Some(inside));
        }
    }

    #[test]
    fn test_broken_snake_is_skipped() {
        let registry = test_registry(Field::new(200, 200));
        let bus = ObserverBus::new();
        place(&registry, "a", &[(100, 100)], 0.0, 4);
        place(&registry, "b", &[(50, 50)], 0.0, 4);
        registry.update(|world| world.snakes[0].segments.clear());

        let report = Simulation::new(BoundaryPolicy::Wrap).step(&registry, &bus);

        assert_eq!(report.skipped, 1);
        assert_eq!(report.moved, 1);
        assert!(registry.get(&conn("a")).is_some());
        assert_eq!(positions(&registry, "b"), vec![(54, 50)]);
    }

    #[test]
    fn test_events_are_published() {
        let registry = test_registry(Field::new(200, 200));
        let bus = ObserverBus::new();
        let log = Arc::new(EventLog::new());
        bus.subscribe(log.clone());

        place(&registry, "a", &[(100, 100)], 0.0, 4);
        place(&registry, "b", &[(108, 100)], 180.0, 4);
        place(&registry, "c", &[(50, 50)], 90.0, 4);

        let mut simulation = Simulation::new(BoundaryPolicy::Wrap);
        simulation.step(&registry, &bus);
        assert_eq!(log.deaths(), 2);
        assert_eq!(log.updates(), 1);

        simulation.step(&registry, &bus);
        assert_eq!(log.updates(), 2);
        assert_eq!(simulation.tick(), 2);
    }

    #[test]
    fn test_segment_count_is_preserved() {
        let registry = test_registry(Field::new(300, 300));
        let bus = ObserverBus::new();
        place(&registry, "a", &[(100, 100), (96, 100), (92, 100), (88, 100)], 45.0, 4);

        let mut simulation = Simulation::new(BoundaryPolicy::Wrap);
        for _ in 0..10 {
            simulation.step(&registry, &bus);
            assert_eq!(registry.get(&conn("a")).unwrap().len(), 4);
        }
    }
}
