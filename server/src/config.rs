//! Command line configuration for the server binary.

use crate::error::ConfigError;
use crate::registry::RegistrySettings;
use crate::simulation::BoundaryPolicy;
use clap::{Args, Parser};
use shared::{Field, FIELD_HEIGHT, FIELD_WIDTH, SNAKE_DIRECTION, SNAKE_SPEED};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Authoritative multiplayer snake server")]
pub struct ServerConfig {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value_t = 30)]
    pub tick_rate: u32,

    /// Maximum number of concurrent clients
    #[arg(short, long, default_value_t = 64)]
    pub max_clients: usize,

    /// Seconds without a packet before a client is dropped
    #[arg(long, default_value_t = 5)]
    pub client_timeout: u64,

    #[command(flatten)]
    pub game: GameConfig,
}

#[derive(Args, Debug, Clone)]
pub struct GameConfig {
    /// Play-field width
    #[arg(long, default_value_t = FIELD_WIDTH)]
    pub field_width: i32,

    /// Play-field height
    #[arg(long, default_value_t = FIELD_HEIGHT)]
    pub field_height: i32,

    /// Number of food items kept on the field
    #[arg(long, default_value_t = 100)]
    pub food_count: usize,

    /// What happens when a head leaves the field
    #[arg(long, value_enum, default_value_t = BoundaryPolicy::Wrap)]
    pub boundary: BoundaryPolicy,

    /// Base speed of newly spawned snakes
    #[arg(long, default_value_t = SNAKE_SPEED)]
    pub speed: i32,

    /// Initial heading of newly spawned snakes, in degrees
    #[arg(long, default_value_t = SNAKE_DIRECTION, allow_negative_numbers = true)]
    pub direction: f64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            field_width: FIELD_WIDTH,
            field_height: FIELD_HEIGHT,
            food_count: 100,
            boundary: BoundaryPolicy::Wrap,
            speed: SNAKE_SPEED,
            direction: SNAKE_DIRECTION,
        }
    }
}

impl GameConfig {
    pub fn field(&self) -> Field {
        Field::new(self.field_width, self.field_height)
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            food_count: self.food_count,
            speed: self.speed,
            direction: self.direction,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            tick_rate: 30,
            max_clients: 64,
            client_timeout: 5,
            game: GameConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.max_clients == 0 {
            return Err(ConfigError::ZeroMaxClients);
        }
        if self.client_timeout == 0 {
            return Err(ConfigError::ZeroClientTimeout);
        }
        if self.game.field_width < 1 || self.game.field_height < 1 {
            return Err(ConfigError::InvalidField {
                width: self.game.field_width,
                height: self.game.field_height,
            });
        }
        if self.game.food_count == 0 {
            return Err(ConfigError::NoFood);
        }
        Ok(())
    }
}
