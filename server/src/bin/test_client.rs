//! Scripted bot that connects, joins and steers in a circle.
//!
//! Useful for poking a running server by hand:
//! `RUST_LOG=info cargo run --bin test_client -- --name Bot`

use bincode::{deserialize, serialize};
use clap::Parser;
use log::{info, warn};
use shared::{Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

#[derive(Parser, Debug)]
#[command(author, version, about = "Scripted snake bot", long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Name shown on the scoreboard
    #[arg(short, long, default_value = "Bot")]
    name: String,

    /// Number of steering steps before disconnecting
    #[arg(long, default_value_t = 10)]
    steps: u32,
}

async fn send(
    socket: &UdpSocket,
    server: SocketAddr,
    packet: &Packet,
) -> Result<(), Box<dyn std::error::Error>> {
    socket.send_to(&serialize(packet)?, server).await?;
    Ok(())
}

/// Waits up to `wait` for the next packet matching `accept`, skipping snapshots.
async fn recv_matching(
    socket: &UdpSocket,
    buf: &mut [u8],
    wait: Duration,
    accept: impl Fn(&Packet) -> bool,
) -> Option<Packet> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let (len, _) = timeout(remaining, socket.recv_from(buf)).await.ok()?.ok()?;
        match deserialize::<Packet>(&buf[..len]) {
            Ok(packet) if accept(&packet) => return Some(packet),
            Ok(_) => continue,
            Err(e) => warn!("Failed to deserialize packet: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server: SocketAddr = args.server.parse()?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    info!("Client socket bound to {}", socket.local_addr()?);

    // Snapshots can be large; size for a full datagram
    let mut buf = vec![0u8; 65_536];

    send(
        &socket,
        server,
        &Packet::Connect {
            client_version: PROTOCOL_VERSION,
        },
    )
    .await?;

    let connection_id = match recv_matching(&socket, &mut buf, Duration::from_secs(2), |p| {
        matches!(p, Packet::Connected { .. } | Packet::Disconnected { .. })
    })
    .await
    {
        Some(Packet::Connected { connection_id }) => connection_id,
        Some(other) => return Err(format!("Connection refused: {:?}", other).into()),
        None => return Err("No response from server".into()),
    };
    info!("Connected as {}", connection_id);

    send(&socket, server, &Packet::Join { name: args.name }).await?;

    for step in 0..args.steps {
        let degrees = (step * 36 % 360) as f64;
        send(&socket, server, &Packet::SetDirection { degrees }).await?;
        if step % 4 == 3 {
            send(&socket, server, &Packet::ToggleSpeed).await?;
        }

        // Keeps the connection alive even if nothing else were sent
        send(&socket, server, &Packet::Ping).await?;

        send(&socket, server, &Packet::RequestSnapshot).await?;
        match recv_matching(&socket, &mut buf, Duration::from_secs(1), |p| {
            matches!(p, Packet::Snapshot { .. } | Packet::Died)
        })
        .await
        {
            Some(Packet::Snapshot {
                tick,
                part,
                parts,
                snakes,
                own_head,
                food,
            }) => {
                let cells: usize = snakes.iter().map(|view| view.body.len()).sum();
                info!(
                    "Tick {} part {}/{}: {} snakes, {} cells, {} food, head {:?}",
                    tick,
                    part + 1,
                    parts,
                    snakes.len(),
                    cells,
                    food.len(),
                    own_head
                );
                if own_head.is_none() {
                    info!("Our snake is gone");
                    break;
                }
            }
            Some(Packet::Died) => {
                info!("Our snake died");
                break;
            }
            _ => {}
        }

        sleep(Duration::from_millis(500)).await;
    }

    send(&socket, server, &Packet::RequestScores).await?;
    if let Some(Packet::Scores { entries }) =
        recv_matching(&socket, &mut buf, Duration::from_secs(1), |p| {
            matches!(p, Packet::Scores { .. })
        })
        .await
    {
        for (rank, entry) in entries.iter().enumerate() {
            info!("{}. {} ({})", rank + 1, entry.snake_name, entry.length);
        }
    }

    send(&socket, server, &Packet::Disconnect).await?;
    info!("Test client finished");

    Ok(())
}
