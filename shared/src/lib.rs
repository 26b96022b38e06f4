use serde::{Deserialize, Serialize};
use std::fmt;

pub mod movement;

pub use movement::MovementStrategy;

pub const PROTOCOL_VERSION: u32 = 1;
pub const FIELD_WIDTH: i32 = 3000;
pub const FIELD_HEIGHT: i32 = 3000;
pub const SNAKE_SPEED: i32 = 4;
pub const SNAKE_BOOST_SPEED: i32 = SNAKE_SPEED * 2;
pub const SNAKE_DIRECTION: f64 = 5.0;
pub const SNAKE_WIDTH: i32 = 10;
/// Names longer than this are cut when a snake joins.
pub const MAX_NAME_LEN: usize = 32;
/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Join {
        name: String,
    },
    SetDirection {
        degrees: f64,
    },
    ToggleSpeed,
    RequestSnapshot,
    RequestScores,
    /// Keep-alive for clients that have nothing else to send.
    Ping,
    Disconnect,

    Connected {
        connection_id: ConnectionId,
    },
    /// One datagram of a tick's world state. A tick is split into `parts`
    /// packets numbered from 0; `own_head` is repeated in each.
    Snapshot {
        tick: u64,
        part: u16,
        parts: u16,
        snakes: Vec<SnakeView>,
        own_head: Option<Position>,
        food: Vec<Food>,
    },
    Scores {
        entries: Vec<ScoreEntry>,
    },
    Died,
    Disconnected {
        reason: String,
    },
}

/// Identity of one client session; the registry key for its snake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
        }
    }
}

/// Play-area bounds. Valid cells are `0..width` by `0..height`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub width: i32,
    pub height: i32,
}

impl Field {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn contains(&self, position: Position) -> bool {
        (0..self.width).contains(&position.x) && (0..self.height).contains(&position.y)
    }

    pub fn wrap(&self, position: Position) -> Position {
        Position {
            x: position.x.rem_euclid(self.width),
            y: position.y.rem_euclid(self.height),
        }
    }

    pub fn clamp(&self, position: Position) -> Position {
        Position {
            x: position.x.clamp(0, self.width - 1),
            y: position.y.clamp(0, self.height - 1),
        }
    }

    pub fn center(&self) -> Position {
        Position::new(self.width / 2, self.height / 2)
    }
}

impl Default for Field {
    fn default() -> Self {
        Self::new(FIELD_WIDTH, FIELD_HEIGHT)
    }
}

/// One cell of a snake's body.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct SnekPart {
    pub position: Position,
    pub color: String,
    pub name: String,
}

/// A snake's body as sent to clients, name and color carried once.
///
/// Long bodies are split over several snapshot parts; `offset` is the index
/// of `body[0]` in the whole snake.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct SnakeView {
    pub name: String,
    pub color: String,
    pub offset: u32,
    pub body: Vec<Position>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Food {
    pub position: Position,
    pub color: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ScoreEntry {
    pub snake_name: String,
    pub length: usize,
}

/// A player's snake. `segments[0]` is the head.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Snake {
    pub connection_id: ConnectionId,
    pub name: String,
    pub color: String,
    /// Heading in degrees, kept in `[0, 360)` by the registry.
    pub direction: f64,
    pub speed: i32,
    pub boost_speed: i32,
    pub fast: bool,
    pub movement_strategy: MovementStrategy,
    pub segments: Vec<SnekPart>,
    pub width: i32,
}

impl Snake {
    pub fn new(connection_id: ConnectionId, name: &str, color: &str, head: Position) -> Self {
        let head = SnekPart {
            position: head,
            color: color.to_string(),
            name: name.to_string(),
        };

        Self {
            connection_id,
            name: name.to_string(),
            color: color.to_string(),
            direction: SNAKE_DIRECTION,
            speed: SNAKE_SPEED,
            boost_speed: SNAKE_BOOST_SPEED,
            fast: false,
            movement_strategy: MovementStrategy::Normal,
            segments: vec![head],
            width: SNAKE_WIDTH,
        }
    }

    /// Re-reads `fast` and installs the matching strategy.
    ///
    /// Changing `fast` on its own does not switch strategies; this call is the
    /// only place the two are brought back in line.
    pub fn toggle_movement_strategy(&mut self) {
        self.movement_strategy = MovementStrategy::for_fast(self.fast);
    }

    pub fn head(&self) -> Option<Position> {
        self.segments.first().map(|part| part.position)
    }

    pub fn tail(&self) -> Option<Position> {
        self.segments.last().map(|part| part.position)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Where the head would land next with the current strategy.
    pub fn next_head(&self) -> Option<Position> {
        self.head()
            .map(|head| self.movement_strategy.move_position(head, self.direction, self.speed))
    }

    /// Appends a segment on the tail cell. Returns the new length.
    pub fn grow(&mut self) -> usize {
        if let Some(tail) = self.segments.last().cloned() {
            self.segments.push(tail);
        }
        self.segments.len()
    }
}
