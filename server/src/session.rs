//! Maps client calls onto registry operations and shapes the replies.
//!
//! Mutating calls are fire-and-forget: a stale or invalid call (late message
//! after a death, duplicate join) is logged and dropped. Snapshot and score
//! requests reply to the caller only.

use crate::registry::{Registry, WorldSnapshot};
use crate::scoreboard;
use log::{debug, info};
use shared::{ConnectionId, Food, Packet, Position, SnakeView, MAX_DATAGRAM};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A call a connected client can make.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    Join { name: String },
    SetDirection { degrees: f64 },
    ToggleSpeed,
    RequestSnapshot,
    RequestScores,
    Disconnect,
}

impl SessionCall {
    /// Returns `None` for packets that are not client calls.
    pub fn from_packet(packet: Packet) -> Option<Self> {
        match packet {
            Packet::Join { name } => Some(SessionCall::Join { name }),
            Packet::SetDirection { degrees } => Some(SessionCall::SetDirection { degrees }),
            Packet::ToggleSpeed => Some(SessionCall::ToggleSpeed),
            Packet::RequestSnapshot => Some(SessionCall::RequestSnapshot),
            Packet::RequestScores => Some(SessionCall::RequestScores),
            Packet::Disconnect => Some(SessionCall::Disconnect),
            _ => None,
        }
    }
}

/// Room left in each datagram for the snapshot header fields.
const PART_BUDGET: usize = MAX_DATAGRAM - 512;
/// Encoded size of one [`Position`].
const POSITION_SIZE: usize = 8;
/// Length prefix bincode writes before a string or sequence.
const LEN_PREFIX: usize = 8;

/// Encoded size of a [`SnakeView`] without its body cells.
fn view_overhead(name: &str, color: &str) -> usize {
    3 * LEN_PREFIX + name.len() + color.len() + 4
}

fn food_size(food: &Food) -> usize {
    POSITION_SIZE + LEN_PREFIX + food.color.len()
}

#[derive(Debug, Clone, Default)]
struct Part {
    snakes: Vec<SnakeView>,
    food: Vec<Food>,
    size: usize,
}

impl Part {
    fn is_empty(&self) -> bool {
        self.snakes.is_empty() && self.food.is_empty()
    }
}

/// Greedily fills parts up to [`PART_BUDGET`].
#[derive(Default)]
struct PartPacker {
    parts: Vec<Part>,
    current: Part,
}

impl PartPacker {
    fn make_room(&mut self, size: usize) {
        if self.current.size + size > PART_BUDGET && !self.current.is_empty() {
            self.parts.push(std::mem::take(&mut self.current));
        }
        self.current.size += size;
    }

    fn push_snake(&mut self, view: SnakeView, size: usize) {
        self.make_room(size);
        self.current.snakes.push(view);
    }

    fn push_food(&mut self, food: Food) {
        self.make_room(food_size(&food));
        self.current.food.push(food);
    }

    /// Always yields at least one part so an empty world still reaches clients.
    fn finish(mut self) -> Vec<Part> {
        if !self.current.is_empty() || self.parts.is_empty() {
            self.parts.push(self.current);
        }
        self.parts
    }
}

/// World state encoded once per tick and specialised per recipient.
///
/// Every snake is sent as a [`SnakeView`]; a body too long for one datagram
/// is cut into several views. The result is split into as many `Snapshot`
/// parts as needed so each fits in [`MAX_DATAGRAM`].
#[derive(Debug, Clone)]
pub struct SnapshotFrame {
    tick: u64,
    parts: Vec<Part>,
    heads: HashMap<ConnectionId, Position>,
}

impl SnapshotFrame {
    pub fn new(tick: u64, snapshot: &WorldSnapshot) -> Self {
        let mut packer = PartPacker::default();

        for snake in &snapshot.snakes {
            let overhead = view_overhead(&snake.name, &snake.color);
            let per_view = (PART_BUDGET.saturating_sub(overhead) / POSITION_SIZE).max(1);
            for (index, cells) in snake.segments.chunks(per_view).enumerate() {
                let view = SnakeView {
                    name: snake.name.clone(),
                    color: snake.color.clone(),
                    offset: (index * per_view) as u32,
                    body: cells.iter().map(|part| part.position).collect(),
                };
                packer.push_snake(view, overhead + cells.len() * POSITION_SIZE);
            }
        }
        for food in &snapshot.food {
            packer.push_food(food.clone());
        }

        let heads = snapshot
            .snakes
            .iter()
            .filter_map(|snake| snake.head().map(|head| (snake.connection_id.clone(), head)))
            .collect();

        Self {
            tick,
            parts: packer.finish(),
            heads,
        }
    }

    pub fn parts(&self) -> usize {
        self.parts.len()
    }

    /// `own_head` is `None` when the recipient has no live snake.
    pub fn packets_for(&self, connection_id: &ConnectionId) -> Vec<Packet> {
        let own_head = self.heads.get(connection_id).copied();
        let parts = self.parts.len().min(u16::MAX as usize);

        self.parts
            .iter()
            .take(parts)
            .enumerate()
            .map(|(index, part)| Packet::Snapshot {
                tick: self.tick,
                part: index as u16,
                parts: parts as u16,
                snakes: part.snakes.clone(),
                own_head,
                food: part.food.clone(),
            })
            .collect()
    }
}

/// Snapshot packets for a single recipient.
pub fn snapshot_for(
    connection_id: &ConnectionId,
    tick: u64,
    snapshot: &WorldSnapshot,
) -> Vec<Packet> {
    SnapshotFrame::new(tick, snapshot).packets_for(connection_id)
}

pub struct SessionHandler {
    registry: Arc<Registry>,
    tick: AtomicU64,
}

impl SessionHandler {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            tick: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Records the latest simulated tick, stamped on snapshot replies.
    pub fn set_tick(&self, tick: u64) {
        self.tick.store(tick, Ordering::Relaxed);
    }

    /// Applies `call` on behalf of `connection_id` and returns the replies
    /// for the caller. Most calls have none.
    pub fn handle(&self, connection_id: &ConnectionId, call: SessionCall) -> Vec<Packet> {
        match call {
            SessionCall::Join { name } => {
                if let Err(e) = self.registry.join(connection_id, &name) {
                    debug!("Ignoring join from {}: {}", connection_id, e);
                }
                Vec::new()
            }
            SessionCall::SetDirection { degrees } => {
                if let Err(e) = self.registry.set_direction(connection_id, degrees) {
                    debug!("Ignoring direction from {}: {}", connection_id, e);
                }
                Vec::new()
            }
            SessionCall::ToggleSpeed => {
                if let Err(e) = self.registry.toggle_speed(connection_id) {
                    debug!("Ignoring speed toggle from {}: {}", connection_id, e);
                }
                Vec::new()
            }
            SessionCall::RequestSnapshot => {
                let tick = self.tick.load(Ordering::Relaxed);
                snapshot_for(connection_id, tick, &self.registry.snapshot())
            }
            SessionCall::RequestScores => vec![Packet::Scores {
                entries: scoreboard::scores(&self.registry),
            }],
            SessionCall::Disconnect => {
                self.disconnect(connection_id);
                Vec::new()
            }
        }
    }

    /// Transport-level disconnect. Safe to call any number of times.
    pub fn disconnect(&self, connection_id: &ConnectionId) {
        if self.registry.leave(connection_id).is_some() {
            info!("Removed snake for disconnected {}", connection_id);
        }
    }
}
