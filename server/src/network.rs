//! Server network layer handling UDP communications and the tick driver

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::observer::{EventLog, ObserverBus, SnakeObserver};
use crate::registry::Registry;
use crate::session::{SessionCall, SessionHandler, SnapshotFrame};
use crate::simulation::Simulation;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{ConnectionId, Packet, Snake, MAX_DATAGRAM, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// How often the tick loop logs a status report.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { connection_id: ConnectionId },
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    /// Resolved to an address by the sender task; dropped if the client is gone.
    SendToConnection {
        packet: Packet,
        connection_id: ConnectionId,
    },
}

/// Queues a `Died` push for the owner of every snake that dies.
pub struct DeathNotifier {
    game_tx: mpsc::UnboundedSender<GameMessage>,
}

impl DeathNotifier {
    pub fn new(game_tx: mpsc::UnboundedSender<GameMessage>) -> Self {
        Self { game_tx }
    }
}

impl SnakeObserver for DeathNotifier {
    fn on_snake_updated(&self, _snake: &Snake) {}

    fn on_snake_died(&self, snake: &Snake) {
        if let Err(e) = self.game_tx.send(GameMessage::SendToConnection {
            packet: Packet::Died,
            connection_id: snake.connection_id.clone(),
        }) {
            error!("Failed to queue death notice: {}", e);
        }
    }
}

/// Main server coordinating networking and game simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    registry: Arc<Registry>,
    sessions: SessionHandler,
    simulation: Simulation,
    bus: ObserverBus,
    event_log: Arc<EventLog>,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(config: &ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;

        let address = config.address();
        let socket = Arc::new(UdpSocket::bind(&address).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        let registry = Arc::new(Registry::new(
            config.game.field(),
            config.game.registry_settings(),
        ));

        let bus = ObserverBus::new();
        let event_log = Arc::new(EventLog::new());
        bus.subscribe(event_log.clone());
        bus.subscribe(Arc::new(DeathNotifier::new(game_tx.clone())));

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.client_timeout(),
            ))),
            sessions: SessionHandler::new(Arc::clone(&registry)),
            registry,
            simulation: Simulation::new(config.game.boundary),
            bus,
            event_log,
            tick_duration: config.tick_duration(),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Sending [`ServerMessage::Shutdown`] on this channel stops [`Server::run`].
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::SendToConnection {
                        packet,
                        connection_id,
                    } => {
                        let addr = clients.read().await.addr_of(&connection_id);
                        match addr {
                            Some(addr) => {
                                if let Err(e) =
                                    Self::send_packet_impl(&socket, &packet, addr).await
                                {
                                    error!("Failed to send to client {}: {}", connection_id, e);
                                }
                            }
                            None => debug!("Dropping packet for departed {}", connection_id),
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for connection_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { connection_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        if data.len() > MAX_DATAGRAM {
            return Err(format!("packet of {} bytes exceeds datagram size", data.len()).into());
        }
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Drops the connection and its snake. Safe to repeat.
    async fn drop_client(&self, connection_id: &ConnectionId) {
        self.clients.write().await.remove_client(connection_id);
        self.sessions.disconnect(connection_id);
    }

    /// Processes incoming packets and updates game state
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        if let Packet::Connect { client_version } = packet {
            info!(
                "Client connecting from {} (version: {})",
                addr, client_version
            );

            if client_version != PROTOCOL_VERSION {
                self.send_packet(
                    Packet::Disconnected {
                        reason: "Protocol version mismatch".to_string(),
                    },
                    addr,
                );
                return;
            }

            // Remove existing connection if present
            let existing = self.clients.read().await.find_client_by_addr(addr);
            if let Some(existing) = existing {
                info!("Replacing existing client {} from {}", existing, addr);
                self.drop_client(&existing).await;
            }

            let connection_id = self.clients.write().await.add_client(addr);
            let response = match connection_id {
                Some(connection_id) => Packet::Connected { connection_id },
                None => Packet::Disconnected {
                    reason: "Server full".to_string(),
                },
            };
            self.send_packet(response, addr);
            return;
        }

        let connection_id = {
            let mut clients = self.clients.write().await;
            let connection_id = clients.find_client_by_addr(addr);
            if let Some(id) = &connection_id {
                clients.touch(id);
            }
            connection_id
        };
        let Some(connection_id) = connection_id else {
            debug!("Ignoring packet from unconnected {}", addr);
            return;
        };

        // Already touched above; nothing else to do
        if packet == Packet::Ping {
            return;
        }

        let Some(call) = SessionCall::from_packet(packet) else {
            warn!("Unexpected packet type from client at {}", addr);
            return;
        };

        if call == SessionCall::Disconnect {
            self.drop_client(&connection_id).await;
            return;
        }

        for reply in self.sessions.handle(&connection_id, call) {
            self.send_packet(reply, addr);
        }
    }

    /// Advances the simulation one tick and queues a snapshot for every client.
    ///
    /// The registry is only read for the snapshot copy; nothing here waits on
    /// the socket. Large worlds go out as several datagrams per client.
    async fn tick(&mut self) {
        let report = self.simulation.step(&self.registry, &self.bus);
        self.sessions.set_tick(report.tick);

        let client_addrs = self.clients.read().await.get_client_addrs();
        if client_addrs.is_empty() {
            return;
        }

        let frame = SnapshotFrame::new(report.tick, &self.registry.snapshot());
        if frame.parts() > 1 {
            debug!("Tick {} snapshot split into {} parts", report.tick, frame.parts());
        }
        for (connection_id, addr) in client_addrs {
            for packet in frame.packets_for(&connection_id) {
                self.send_packet(packet, addr);
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let report_every =
            (REPORT_INTERVAL.as_secs_f64() / self.tick_duration.as_secs_f64()).max(1.0) as u64;

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { connection_id }) => {
                            info!("Client {} timed out", connection_id);
                            self.sessions.disconnect(&connection_id);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Handle server tick events
                _ = tick_interval.tick() => {
                    self.tick().await;

                    let tick = self.simulation.tick();
                    if tick % report_every == 0 {
                        let client_count = self.clients.read().await.len();
                        debug!(
                            "Tick {}: {} clients, {} snakes, {} updates, {} deaths",
                            tick,
                            client_count,
                            self.registry.len(),
                            self.event_log.updates(),
                            self.event_log.deaths()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            game: GameConfig {
                food_count: 2,
                ..GameConfig::default()
            },
            ..ServerConfig::default()
        }
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    fn next_sent(server: &mut Server) -> (Packet, SocketAddr) {
        match server.game_rx.try_recv() {
            Ok(GameMessage::SendPacket { packet, addr }) => (packet, addr),
            other => panic!("Unexpected outbound message: {:?}", other),
        }
    }

    async fn connect(server: &mut Server, addr: SocketAddr) -> ConnectionId {
        server
            .handle_packet(Packet::Connect { client_version: PROTOCOL_VERSION }, addr)
            .await;
        match next_sent(server) {
            (Packet::Connected { connection_id }, to) => {
                assert_eq!(to, addr);
                connection_id
            }
            (other, _) => panic!("Expected Connected, got {:?}", other),
        }
    }

    #[test]
    fn test_death_notifier_queues_died() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = DeathNotifier::new(tx);
        let snake = Snake::new("client-3".into(), "Snek", "#000000", Default::default());

        notifier.on_snake_updated(&snake);
        assert!(rx.try_recv().is_err());

        notifier.on_snake_died(&snake);
        match rx.try_recv() {
            Ok(GameMessage::SendToConnection {
                packet,
                connection_id,
            }) => {
                assert_eq!(packet, Packet::Died);
                assert_eq!(connection_id.as_str(), "client-3");
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let mut config = test_config();
        config.tick_rate = 0;
        assert!(Server::new(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = tokio_test::assert_ok!(Server::new(&test_config()).await);
        let addr = tokio_test::assert_ok!(server.local_addr());
        assert_ne!(addr.port(), 0);
        assert_eq!(server.registry().food_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_and_join() {
        let mut server = Server::new(&test_config()).await.unwrap();
        let addr = peer(40001);

        let connection_id = connect(&mut server, addr).await;
        server
            .handle_packet(
                Packet::Join {
                    name: "TestSnake".to_string(),
                },
                addr,
            )
            .await;

        let snake = server.registry.get(&connection_id).unwrap();
        assert_eq!(snake.name, "TestSnake");
        assert!(server.game_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_version_mismatch_is_refused() {
        let mut server = Server::new(&test_config()).await.unwrap();
        let addr = peer(40002);

        server
            .handle_packet(Packet::Connect { client_version: 99 }, addr)
            .await;

        match next_sent(&mut server) {
            (Packet::Disconnected { reason }, _) => {
                assert_eq!(reason, "Protocol version mismatch")
            }
            (other, _) => panic!("Unexpected packet: {:?}", other),
        }
        assert!(server.clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_server_full() {
        let mut config = test_config();
        config.max_clients = 1;
        let mut server = Server::new(&config).await.unwrap();

        connect(&mut server, peer(40003)).await;
        server
            .handle_packet(Packet::Connect { client_version: 1 }, peer(40004))
            .await;

        match next_sent(&mut server) {
            (Packet::Disconnected { reason }, addr) => {
                assert_eq!(reason, "Server full");
                assert_eq!(addr, peer(40004));
            }
            (other, _) => panic!("Unexpected packet: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reconnect_replaces_snake() {
        let mut server = Server::new(&test_config()).await.unwrap();
        let addr = peer(40005);

        let first = connect(&mut server, addr).await;
        server
            .handle_packet(Packet::Join { name: "A".to_string() }, addr)
            .await;
        let second = connect(&mut server, addr).await;

        assert_ne!(first, second);
        assert!(server.registry.get(&first).is_none());
        assert_eq!(server.clients.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_packets_from_unknown_peers_are_ignored() {
        let mut server = Server::new(&test_config()).await.unwrap();

        server
            .handle_packet(Packet::Join { name: "x".to_string() }, peer(40006))
            .await;

        assert!(server.registry.is_empty());
        assert!(server.game_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_scores_reply_goes_to_caller() {
        let mut server = Server::new(&test_config()).await.unwrap();
        let addr = peer(40007);
        connect(&mut server, addr).await;
        server
            .handle_packet(Packet::Join { name: "A".to_string() }, addr)
            .await;

        server.handle_packet(Packet::RequestScores, addr).await;

        match next_sent(&mut server) {
            (Packet::Scores { entries }, to) => {
                assert_eq!(to, addr);
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].snake_name, "A");
            }
            (other, _) => panic!("Unexpected packet: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_removes_client_and_snake() {
        let mut server = Server::new(&test_config()).await.unwrap();
        let addr = peer(40008);
        let connection_id = connect(&mut server, addr).await;
        server
            .handle_packet(Packet::Join { name: "A".to_string() }, addr)
            .await;

        server.handle_packet(Packet::Disconnect, addr).await;
        server.handle_packet(Packet::Disconnect, addr).await;

        assert!(server.registry.get(&connection_id).is_none());
        assert!(server.clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_tick_queues_snapshot_per_client() {
        let mut server = Server::new(&test_config()).await.unwrap();
        let player = peer(40009);
        let watcher = peer(40010);
        let player_id = connect(&mut server, player).await;
        connect(&mut server, watcher).await;
        server
            .handle_packet(Packet::Join { name: "A".to_string() }, player)
            .await;

        server.tick().await;

        let expected_head = server.registry.get(&player_id).unwrap().head();
        let mut seen = Vec::new();
        while let Ok(GameMessage::SendPacket { packet, addr }) = server.game_rx.try_recv() {
            match packet {
                Packet::Snapshot {
                    tick,
                    parts,
                    own_head,
                    snakes,
                    food,
                    ..
                } => {
                    assert_eq!(tick, 1);
                    assert_eq!(parts, 1);
                    assert_eq!(snakes.len(), 1);
                    assert_eq!(snakes[0].body.len(), 1);
                    assert_eq!(food.len(), 2);
                    if addr == player {
                        assert_eq!(own_head, expected_head);
                    } else {
                        assert_eq!(own_head, None);
                    }
                    seen.push(addr);
                }
                other => panic!("Unexpected packet: {:?}", other),
            }
        }
        seen.sort();
        let mut expected = vec![player, watcher];
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_tick_splits_large_world() {
        let mut server = Server::new(&test_config()).await.unwrap();
        let watcher = peer(40011);
        connect(&mut server, watcher).await;

        for i in 0..64 {
            let id = ConnectionId::new(format!("bot-{}", i));
            server
                .registry
                .join_at(&id, "Bot", shared::Position::new(10, i * 40 + 10))
                .unwrap();
            server.registry.set_direction(&id, 0.0).unwrap();
            for _ in 0..199 {
                server.registry.grow(&id).unwrap();
            }
        }

        server.tick().await;

        let mut parts_seen = Vec::new();
        let mut cells = 0;
        while let Ok(GameMessage::SendPacket { packet, .. }) = server.game_rx.try_recv() {
            assert!(serialize(&packet).unwrap().len() <= MAX_DATAGRAM);
            if let Packet::Snapshot {
                part,
                parts,
                snakes,
                ..
            } = packet
            {
                assert!(parts > 1);
                parts_seen.push(part);
                cells += snakes.iter().map(|view| view.body.len()).sum::<usize>();
            }
        }
        assert_eq!(cells, 64 * 200);
        assert_eq!(parts_seen, (0..parts_seen.len() as u16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_ping_only_refreshes_client() {
        let mut server = Server::new(&test_config()).await.unwrap();
        let addr = peer(40012);
        let connection_id = connect(&mut server, addr).await;
        server
            .handle_packet(Packet::Join { name: "A".to_string() }, addr)
            .await;

        server.handle_packet(Packet::Ping, addr).await;
        server.handle_packet(Packet::Ping, peer(40013)).await;

        assert!(server.game_rx.try_recv().is_err());
        assert!(server.registry.get(&connection_id).is_some());
        assert_eq!(server.clients.read().await.len(), 1);
    }
}
