//! # Snake Arena Server Library
//!
//! This library provides the authoritative server for a multiplayer snake
//! game. It owns the canonical set of snakes and food, advances them on a
//! fixed tick, and pushes the resulting world to every connected client.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Snakes only move on the server. Clients steer (direction, speed toggle)
//! and render whatever snapshot arrives; they never report positions.
//!
//! ### Client Management
//! Handles the complete lifecycle of client connections including:
//! - Connection establishment and connection id assignment
//! - Mapping client calls onto the registry
//! - Disconnection and timeout cleanup, which also removes the snake
//!
//! ### State Broadcasting
//! After every tick each client receives a snapshot of all snakes and food,
//! plus the position of its own head when it has a live snake. Large worlds
//! are split into several parts that each fit in one datagram.
//!
//! ## Module Organization
//!
//! - `registry`: the lock-guarded set of snakes and food, and every mutation on it
//! - `simulation`: one tick of movement, boundary handling, collisions and eating
//! - `observer`: subscribers notified when a snake moves or dies
//! - `scoreboard`: leaderboard ordered by snake length
//! - `session`: per-connection calls and the replies they produce
//! - `client_manager`: UDP peer tracking and timeouts
//! - `network`: the socket tasks and the tick loop tying it all together
//! - `random`: process-wide colour and position source
//! - `config`: command line options
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use clap::Parser;
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::parse();
//!     let mut server = Server::new(&config).await?;
//!
//!     // Runs until a Shutdown message arrives on `server.shutdown_handle()`
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! The server uses an event-driven architecture with internal async tasks that handle:
//! - **Network Receiver**: Continuously listens for incoming packets
//! - **Network Sender**: Processes the outgoing packet queue
//! - **Timeout Checker**: Drops silent clients and their snakes
//! - **Main Game Loop**: Applies client calls, steps the simulation and queues snapshots

pub mod client_manager;
pub mod config;
pub mod error;
pub mod network;
pub mod observer;
pub mod random;
pub mod registry;
pub mod scoreboard;
pub mod session;
pub mod simulation;
