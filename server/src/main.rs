use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::{Server, ServerMessage};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::parse();

    info!("Starting snake server on {}", config.address());
    info!(
        "Tick rate: {} Hz, field {}x{}, {} food, boundary {:?}",
        config.tick_rate,
        config.game.field_width,
        config.game.field_height,
        config.game.food_count,
        config.game.boundary
    );

    let mut server = Server::new(&config).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            if let Err(e) = shutdown.send(ServerMessage::Shutdown) {
                error!("Failed to signal shutdown: {}", e);
            }
        }
    });

    server.run().await?;

    Ok(())
}
