//! Error types for the game server.
//!
//! Snake deaths are game events and never show up here. Everything in
//! [`GameError`] is recoverable: the session layer logs it and carries on.

use shared::ConnectionId;

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GameError {
    /// A second join arrived for a connection that already owns a live snake.
    #[error("connection {0} already has a snake")]
    DuplicateConnection(ConnectionId),

    /// A mutation named a connection with no live snake.
    #[error("no snake registered for connection {0}")]
    UnknownConnection(ConnectionId),

    /// A direction that cannot be normalized (NaN or infinite).
    #[error("invalid direction {0}")]
    InvalidDirection(f64),

    /// The snake has lost every segment and cannot be acted on.
    #[error("snake for connection {0} has no segments")]
    NoSegments(ConnectionId),
}

/// Errors raised while validating server configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("tick rate must be greater than zero")]
    ZeroTickRate,

    #[error("field must be at least 1x1, got {width}x{height}")]
    InvalidField { width: i32, height: i32 },

    #[error("at least one food item is required")]
    NoFood,

    #[error("max clients must be greater than zero")]
    ZeroMaxClients,

    #[error("client timeout must be greater than zero")]
    ZeroClientTimeout,
}
