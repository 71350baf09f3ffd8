//! Shared server state and the handlers that act on it.
//!
//! One [`ServerContext`] lives behind an `Arc` for the whole process. The
//! connection tasks, the UDP receiver, the tick and the admin surfaces all
//! go through it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use log::{debug, info, warn};
use protocol::opcodes::KickReason;
use protocol::packets::{
    CarConnected, CarDisconnected, CarListEntry, ChatMessage, ClientTcpMessage, ClientUdpMessage,
    CspClientMessage, HandshakeRejection, HandshakeRequest, HandshakeResponse, KickCar,
    PingRequest, SERVER_SESSION_ID,
};
use protocol::plugin::{PluginConnection, PluginEvent};
use protocol::{CspFeatures, OutgoingPacket, PROTOCOL_VERSION};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::ai::{self, AiTraffic};
use crate::broadcast::send_datagram;
use crate::checksum::ChecksumManager;
use crate::client_manager::ClientManager;
use crate::commands::{self, Caller, COMMAND_PREFIX};
use crate::config::ServerConfig;
use crate::connection::{ChecksumStatus, ClientHandle, ConnectionState};
use crate::entry_car::{validate_update, EntryCar};
use crate::error::{Error, Result};
use crate::filters::{FilterChain, FilterResult, SteamTicketValidator};
use crate::session::SessionManager;
use crate::udp_plugin::PluginBridge;

pub struct ServerContext {
    pub config: ServerConfig,
    /// Car slots indexed by session id.
    pub cars: Vec<EntryCar>,
    pub clients: RwLock<ClientManager>,
    pub filters: FilterChain,
    pub checksums: ChecksumManager,
    pub session: SessionManager,
    pub ai: Option<AiTraffic>,
    pub plugin: Option<PluginBridge>,
    pub udp: UdpSocket,
    /// Root token; every connection holds a child of it.
    pub shutdown: CancellationToken,
    started: Instant,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        udp: UdpSocket,
        plugin: Option<PluginBridge>,
        steam: Option<Arc<dyn SteamTicketValidator>>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let cars = EntryCar::from_config(&config.entries);
        let filters = FilterChain::from_config(&config, steam)?;
        let checksums = ChecksumManager::load(&config.checksum_files)?;
        let ai = ai::load_traffic(&config.ai, &cars)?;
        let session = SessionManager::new(config.sessions.clone());

        Ok(Self {
            clients: RwLock::new(ClientManager::new(cars.len())),
            cars,
            filters,
            checksums,
            session,
            ai,
            plugin,
            udp,
            shutdown,
            started: Instant::now(),
            config,
        })
    }

    /// Milliseconds since the server started, wrapping.
    pub fn server_time(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    /// Validates a handshake and assigns a car slot.
    ///
    /// Checks run in order: protocol version, blacklist, password, slot
    /// filters, then slot allocation. The first failure is returned for the
    /// caller to send before closing the socket.
    pub async fn admit(
        &self,
        request: &HandshakeRequest,
        addr: SocketAddr,
        outgoing: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> std::result::Result<Arc<ClientHandle>, HandshakeRejection> {
        if request.client_version != PROTOCOL_VERSION {
            return Err(HandshakeRejection::UnsupportedProtocol {
                required_version: PROTOCOL_VERSION,
            });
        }
        if self.config.is_blacklisted(request.guid) {
            return Err(HandshakeRejection::Blacklisted);
        }

        let is_admin = self
            .config
            .admin_password
            .as_deref()
            .map_or(false, |password| password == request.password);
        if !is_admin {
            if let Some(password) = self.config.password.as_deref() {
                if password != request.password {
                    return Err(HandshakeRejection::WrongPassword);
                }
            }
        }

        if let FilterResult::Reject(reason) = self.filters.check(request, addr).await {
            return Err(HandshakeRejection::AuthFailed { reason });
        }

        let (client, cars) = {
            let mut clients = self.clients.write().await;
            let car = self
                .cars
                .iter()
                .find(|car| {
                    car.accepts(&request.requested_car, request.guid)
                        && !clients.is_occupied(car.session_id)
                })
                .ok_or(HandshakeRejection::NoSlotsAvailable)?;

            let client = Arc::new(ClientHandle::new(car.session_id, request, addr, outgoing, cancel));
            client.set_admin(is_admin);
            if !clients.add_client(Arc::clone(&client)) {
                return Err(HandshakeRejection::NoSlotsAvailable);
            }
            car.occupy();
            (client, self.car_list(&clients))
        };

        self.session.reset_car(client.session_id);
        if let Err(e) = client.send(&self.handshake_response(&client, cars)) {
            warn!("Failed to queue handshake response for {}: {}", client.session_id, e);
        }

        if self.checksums.is_empty() {
            client.set_checksum_status(ChecksumStatus::Passed);
            self.activate(&client).await;
        } else {
            client.set_state(ConnectionState::ChecksumExchange);
        }
        Ok(client)
    }

    fn car_list(&self, clients: &ClientManager) -> Vec<CarListEntry> {
        self.cars
            .iter()
            .map(|car| {
                let driver = clients.get(car.session_id);
                car.list_entry(driver.as_deref().map(|client| client.name.as_str()))
            })
            .collect()
    }

    fn handshake_response(&self, client: &ClientHandle, cars: Vec<CarListEntry>) -> HandshakeResponse {
        let car = &self.cars[client.session_id as usize];
        let (_, session) = self.session.current();
        HandshakeResponse {
            server_name: self.config.name.clone(),
            udp_port: self.udp.local_addr().map_or(self.config.udp_port, |addr| addr.port()),
            refresh_rate_hz: self.config.tick_rate_hz.min(u8::MAX as u32) as u8,
            track: self.config.track.clone(),
            track_config: self.config.track_config.clone(),
            car_model: car.model.clone(),
            car_skin: car.skin.clone(),
            sun_angle: self.config.sun_angle,
            allowed_tyres_out: 2,
            tyre_blankets_allowed: true,
            tyre_consumption_rate: 1,
            fuel_consumption_rate: 1,
            damage_multiplier: 1,
            abs_allowed: 1,
            traction_control_allowed: 1,
            stability_control_allowed: false,
            auto_clutch_allowed: true,
            ballast_kg: car.ballast_kg,
            restrictor: car.restrictor,
            session_id: client.session_id,
            session_type: session.kind.wire(),
            session_time_minutes: session.time_minutes,
            session_laps: session.laps,
            server_time: self.server_time(),
            checksum_count: self.checksums.len().min(u8::MAX as usize) as u8,
            cars,
        }
    }

    /// Puts a client into the steady state and announces it.
    pub async fn activate(&self, client: &ClientHandle) {
        client.set_state(ConnectionState::Active);
        info!(
            "Client {} ({}) is active in {}",
            client.session_id, client.name, self.cars[client.session_id as usize].model
        );
        self.broadcast(
            &CarConnected {
                session_id: client.session_id,
                name: client.name.clone(),
                nation: client.nation.clone(),
            },
            Some(client.session_id),
        )
        .await;
        self.notify_plugin(|| PluginEvent::NewConnection(self.plugin_connection(client)));
        self.notify_plugin(|| PluginEvent::ClientLoaded {
            car_id: client.session_id,
        });
    }

    /// Sends `KickCar` with the checksum reason and disconnects the client.
    pub fn fail_checksum(&self, client: &ClientHandle) {
        client.set_checksum_status(ChecksumStatus::Failed);
        let kick = KickCar {
            session_id: client.session_id,
            reason: KickReason::ChecksumFailed,
        };
        if let Err(e) = client.send(&kick) {
            debug!("Failed to queue checksum kick for {}: {}", client.session_id, e);
        }
        client.disconnect("checksum failed");
    }

    /// Dispatches one decoded TCP message from an admitted client.
    pub async fn handle_tcp_message(&self, client: &ClientHandle, message: ClientTcpMessage) -> Result<()> {
        match message {
            ClientTcpMessage::Handshake(_) => {
                return Err(Error::Protocol("handshake after admission".to_string()));
            }
            ClientTcpMessage::Checksum(packet) => {
                if client.state() != ConnectionState::ChecksumExchange {
                    debug!("Ignoring checksums from client {} in {:?}", client.session_id, client.state());
                    return Ok(());
                }
                match self.checksums.verify(&packet) {
                    Ok(()) => {
                        info!("Client {} passed checksum verification", client.session_id);
                        client.set_checksum_status(ChecksumStatus::Passed);
                        self.activate(client).await;
                    }
                    Err(mismatch) => {
                        info!("Client {} failed checksums: {}", client.session_id, mismatch);
                        self.fail_checksum(client);
                    }
                }
            }
            ClientTcpMessage::Chat(chat) if client.is_active() => self.handle_chat(client, chat).await,
            ClientTcpMessage::LapCompleted(lap) if client.is_active() => {
                let packet = self.session.record_lap(client.session_id, &lap);
                info!(
                    "Client {} completed a lap in {} ms with {} cuts",
                    client.session_id, lap.lap_time, lap.cuts
                );
                self.notify_plugin(|| PluginEvent::LapCompleted {
                    car_id: client.session_id,
                    lap_time: packet.lap_time,
                    cuts: packet.cuts,
                    leaderboard: self.session.plugin_leaderboard(),
                    grip_level: packet.track_grip,
                });
                self.broadcast(&packet, None).await;
            }
            ClientTcpMessage::CleanExitDrive => client.disconnect("clean exit"),
            ClientTcpMessage::CspClientMessage(message) if client.is_active() => {
                self.relay_csp_message(client, message).await?;
            }
            ClientTcpMessage::Ignored(opcode) => {
                debug!("Ignoring {:?} from client {}", opcode, client.session_id);
            }
            other => debug!(
                "Dropping {:?} from client {} in {:?}",
                other,
                client.session_id,
                client.state()
            ),
        }
        Ok(())
    }

    async fn handle_chat(&self, client: &ClientHandle, chat: ChatMessage) {
        let text = chat.message.trim();
        if text.is_empty() {
            return;
        }
        if text.starts_with(COMMAND_PREFIX) {
            for reply in commands::execute(self, Caller::Player(client), text).await {
                if client.send(&ChatMessage::from_server(reply)).is_err() {
                    break;
                }
            }
            return;
        }

        info!("CHAT {} ({}): {}", client.name, client.session_id, text);
        self.notify_plugin(|| PluginEvent::Chat {
            car_id: client.session_id,
            message: text.to_string(),
        });
        self.broadcast(
            &ChatMessage {
                session_id: client.session_id,
                message: text.to_string(),
            },
            None,
        )
        .await;
    }

    /// Relays a CSP client message to peers that understand them. The
    /// incoming session id names the target; 255 targets everyone.
    async fn relay_csp_message(&self, client: &ClientHandle, mut message: CspClientMessage) -> Result<()> {
        if !client.csp.contains(CspFeatures::CLIENT_MESSAGES) {
            debug!("Client {} sent a CSP message without support", client.session_id);
            return Ok(());
        }
        let target = message.session_id;
        message.session_id = client.session_id;
        let frame = message.to_frame()?;

        let peers = self.clients.read().await.active();
        for peer in peers {
            if peer.session_id == client.session_id
                || !peer.csp.contains(CspFeatures::CLIENT_MESSAGES)
                || (target != SERVER_SESSION_ID && target != peer.session_id)
            {
                continue;
            }
            let _ = peer.send_frame(frame.clone());
        }
        Ok(())
    }

    /// Routes one UDP datagram by its source address.
    pub async fn handle_datagram(&self, payload: &[u8], addr: SocketAddr) {
        let message = match ClientUdpMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                debug!("Malformed datagram from {}: {}", addr, e);
                return;
            }
        };

        if let ClientUdpMessage::CarConnect(connect) = message {
            let bound = self.clients.write().await.bind_udp(connect.session_id, addr);
            if bound {
                debug!("Client {} associated UDP {}", connect.session_id, addr);
                send_datagram(self, &connect, addr).await;
            } else {
                debug!("Rejected UDP association for {} from {}", connect.session_id, addr);
            }
            return;
        }

        let Some(client) = self.clients.read().await.find_client_by_addr(addr) else {
            debug!("Datagram from unknown address {}", addr);
            return;
        };
        match message {
            ClientUdpMessage::PositionUpdate(update) => {
                if !client.is_active() {
                    return;
                }
                if !validate_update(&update, &self.config.validation) {
                    debug!("Dropped invalid position update from client {}", client.session_id);
                    return;
                }
                if let Some(car) = self.cars.get(client.session_id as usize) {
                    car.apply_update(&update);
                }
            }
            ClientUdpMessage::Pong(pong) => client.record_pong(self.server_time(), &pong),
            ClientUdpMessage::CarConnect(_) => {}
        }
    }

    /// Sends a UDP ping to every client with a known endpoint.
    pub async fn send_pings(&self) {
        let clients = self.clients.read().await.all();
        let server_time = self.server_time();
        for client in clients {
            if let Some(addr) = client.udp_addr() {
                let ping = PingRequest {
                    server_time,
                    last_ping: client.ping(),
                };
                send_datagram(self, &ping, addr).await;
            }
        }
    }

    /// Disconnects clients that stopped answering pings.
    pub async fn check_timeouts(&self) {
        let timed_out = self
            .clients
            .read()
            .await
            .check_timeouts(self.config.ping_timeout());
        for client in timed_out {
            info!("Client {} ({}) timed out", client.session_id, client.name);
            client.disconnect("ping timeout");
        }
    }

    /// Releases a client's slot and tells everyone. Safe to call more than
    /// once; only the first call does the cleanup.
    pub async fn disconnect(&self, client: &ClientHandle, reason: &str) {
        client.disconnect(reason);
        let removed = {
            let mut clients = self.clients.write().await;
            match clients.get(client.session_id) {
                Some(registered) if std::ptr::eq(Arc::as_ptr(&registered), client) => {
                    clients.remove_client(client.session_id)
                }
                _ => None,
            }
        };
        let Some(removed) = removed else {
            return;
        };

        let was_active = removed.is_active();
        removed.set_state(ConnectionState::Disconnecting);
        if let Some(car) = self.cars.get(removed.session_id as usize) {
            car.release();
        }
        info!(
            "Client {} ({}) disconnected: {}",
            removed.session_id,
            removed.name,
            removed.close_reason().as_deref().unwrap_or(reason)
        );

        if was_active {
            self.broadcast(
                &CarDisconnected {
                    session_id: removed.session_id,
                },
                None,
            )
            .await;
            self.notify_plugin(|| PluginEvent::ConnectionClosed(self.plugin_connection(&removed)));
        }
        removed.set_state(ConnectionState::Closed);
    }

    /// Kicks a connected client. Returns its name, or `None` if the slot
    /// has no driver.
    pub async fn kick(&self, session_id: u8, reason: KickReason) -> Option<String> {
        let client = self.clients.read().await.get(session_id)?;
        let kick = KickCar { session_id, reason };
        if let Err(e) = client.send(&kick) {
            debug!("Failed to queue kick for {}: {}", session_id, e);
        }
        self.broadcast(&kick, Some(session_id)).await;
        client.disconnect(&format!("kicked ({:?})", reason));
        Some(client.name.clone())
    }

    /// Queues a packet for every active client except `exclude`.
    pub async fn broadcast<P: OutgoingPacket>(&self, packet: &P, exclude: Option<u8>) {
        let frame = match packet.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode broadcast: {}", e);
                return;
            }
        };
        let clients = self.clients.read().await.active();
        for client in clients {
            if Some(client.session_id) == exclude {
                continue;
            }
            if let Err(e) = client.send_frame(frame.clone()) {
                debug!("Broadcast to client {} failed: {}", client.session_id, e);
            }
        }
    }

    /// Tells clients and the plugin that the current session changed.
    pub async fn announce_session(&self) {
        let (index, session) = self.session.current();
        if let Some(ai) = &self.ai {
            ai.clear();
        }
        self.notify_plugin(|| {
            match self.session.plugin_info(&self.config, Some(index)) {
                Some(info) => PluginEvent::NewSession(info),
                None => PluginEvent::Error(format!("no session with index {}", index)),
            }
        });
        self.broadcast(
            &ChatMessage::from_server(format!("Session {} ({}) started", index, session.name)),
            None,
        )
        .await;
    }

    fn plugin_connection(&self, client: &ClientHandle) -> PluginConnection {
        let car = self.cars.get(client.session_id as usize);
        PluginConnection {
            driver_name: client.name.clone(),
            driver_guid: client.guid.to_string(),
            car_id: client.session_id,
            car_model: car.map(|car| car.model.clone()).unwrap_or_default(),
            car_skin: car.map(|car| car.skin.clone()).unwrap_or_default(),
        }
    }

    fn notify_plugin(&self, event: impl FnOnce() -> PluginEvent) {
        if let Some(plugin) = &self.plugin {
            plugin.send(&event());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{md5_digest, ChecksumEntry};
    use crate::config::EntryConfig;
    use protocol::packets::{ChecksumPacket, PositionUpdateIn, ServerTcpMessage};
    use protocol::{decode_frame, LengthPrefix, Vector3, MAX_TCP_FRAME};

    fn config() -> ServerConfig {
        ServerConfig {
            password: Some("pw".into()),
            admin_password: Some("admin".into()),
            blacklist: vec![666],
            entries: vec![
                EntryConfig {
                    model: "car_a".into(),
                    ..Default::default()
                },
                EntryConfig {
                    model: "car_a".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    async fn context(config: ServerConfig) -> ServerContext {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        ServerContext::new(config, udp, None, None, CancellationToken::new()).unwrap()
    }

    fn request(guid: u64, password: &str) -> HandshakeRequest {
        HandshakeRequest {
            client_version: PROTOCOL_VERSION,
            guid,
            name: format!("driver{}", guid),
            team: String::new(),
            nation: "GER".into(),
            requested_car: "car_a".into(),
            password: password.into(),
            features: None,
            session_ticket: None,
        }
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn decode(frame: &Bytes) -> ServerTcpMessage {
        let (payload, _) = decode_frame(frame, LengthPrefix::U16, MAX_TCP_FRAME)
            .unwrap()
            .unwrap();
        ServerTcpMessage::decode(payload).unwrap()
    }

    async fn admit(
        ctx: &ServerContext,
        guid: u64,
        password: &str,
    ) -> (std::result::Result<Arc<ClientHandle>, HandshakeRejection>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(16);
        let result = ctx
            .admit(&request(guid, password), addr(), tx, CancellationToken::new())
            .await;
        (result, rx)
    }

    #[tokio::test]
    async fn test_admit_rejections() {
        let ctx = context(config()).await;

        let (result, _rx) = admit(&ctx, 1, "wrong").await;
        assert_eq!(result.err(), Some(HandshakeRejection::WrongPassword));

        let (result, _rx) = admit(&ctx, 666, "pw").await;
        assert_eq!(result.err(), Some(HandshakeRejection::Blacklisted));

        let (tx, _rx) = mpsc::channel(4);
        let mut old = request(2, "pw");
        old.client_version = 100;
        let result = ctx.admit(&old, addr(), tx, CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(HandshakeRejection::UnsupportedProtocol { required_version: PROTOCOL_VERSION })
        ));
        assert!(ctx.clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_admit_assigns_slots_and_activates() {
        let ctx = context(config()).await;

        let (first, mut rx) = admit(&ctx, 1, "pw").await;
        let first = first.unwrap();
        assert_eq!(first.session_id, 0);
        assert!(first.is_active());
        assert!(!first.is_admin());
        match decode(&rx.try_recv().unwrap()) {
            ServerTcpMessage::HandshakeResponse(response) => {
                assert_eq!(response.session_id, 0);
                assert_eq!(response.cars.len(), 2);
                assert!(response.cars[0].connected);
                assert_eq!(response.cars[0].driver_name, "driver1");
                assert!(!response.cars[1].connected);
            }
            other => panic!("unexpected {:?}", other),
        }

        let (second, _rx2) = admit(&ctx, 2, "admin").await;
        let second = second.unwrap();
        assert_eq!(second.session_id, 1);
        assert!(second.is_admin());
        match decode(&rx.try_recv().unwrap()) {
            ServerTcpMessage::CarConnected(connected) => assert_eq!(connected.session_id, 1),
            other => panic!("unexpected {:?}", other),
        }

        let (third, _rx3) = admit(&ctx, 3, "pw").await;
        assert_eq!(third.err(), Some(HandshakeRejection::NoSlotsAvailable));
    }

    #[tokio::test]
    async fn test_disconnect_releases_slot_once() {
        let ctx = context(config()).await;
        let (first, _rx) = admit(&ctx, 1, "pw").await;
        let first = first.unwrap();
        let (second, mut rx2) = admit(&ctx, 2, "pw").await;
        let _second = second.unwrap();
        while rx2.try_recv().is_ok() {}

        ctx.disconnect(&first, "test").await;
        ctx.disconnect(&first, "again").await;
        assert_eq!(first.state(), ConnectionState::Closed);
        assert_eq!(first.close_reason().as_deref(), Some("test"));
        assert!(!ctx.clients.read().await.is_occupied(0));

        match decode(&rx2.try_recv().unwrap()) {
            ServerTcpMessage::CarDisconnected(gone) => assert_eq!(gone.session_id, 0),
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx2.try_recv().is_err());

        let (again, _rx) = admit(&ctx, 3, "pw").await;
        assert_eq!(again.unwrap().session_id, 0);
    }

    #[tokio::test]
    async fn test_checksum_exchange() {
        let mut ctx = context(config()).await;
        ctx.checksums = ChecksumManager::from_entries(vec![ChecksumEntry {
            path: "surfaces.ini".into(),
            digest: md5_digest(b"surfaces"),
        }]);

        let (good, _rx) = admit(&ctx, 1, "pw").await;
        let good = good.unwrap();
        assert_eq!(good.state(), ConnectionState::ChecksumExchange);
        let packet = ChecksumPacket {
            digests: vec![md5_digest(b"surfaces")],
        };
        ctx.handle_tcp_message(&good, ClientTcpMessage::Checksum(packet))
            .await
            .unwrap();
        assert!(good.is_active());
        assert_eq!(good.checksum_status(), ChecksumStatus::Passed);

        let (bad, mut rx) = admit(&ctx, 2, "pw").await;
        let bad = bad.unwrap();
        rx.try_recv().unwrap();
        let packet = ChecksumPacket {
            digests: vec![md5_digest(b"modded")],
        };
        ctx.handle_tcp_message(&bad, ClientTcpMessage::Checksum(packet))
            .await
            .unwrap();
        assert_eq!(bad.checksum_status(), ChecksumStatus::Failed);
        assert!(bad.is_disconnecting());
        match decode(&rx.try_recv().unwrap()) {
            ServerTcpMessage::KickCar(kick) => assert_eq!(kick.reason, KickReason::ChecksumFailed),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_broadcast_and_command_reply() {
        let ctx = context(config()).await;
        let (first, mut rx1) = admit(&ctx, 1, "pw").await;
        let first = first.unwrap();
        let (_second, mut rx2) = admit(&ctx, 2, "pw").await;
        while rx1.try_recv().is_ok() {}
        while rx2.try_recv().is_ok() {}

        let chat = ChatMessage {
            session_id: 9,
            message: "hello".into(),
        };
        ctx.handle_tcp_message(&first, ClientTcpMessage::Chat(chat)).await.unwrap();
        match decode(&rx2.try_recv().unwrap()) {
            ServerTcpMessage::Chat(chat) => {
                assert_eq!(chat.session_id, 0);
                assert_eq!(chat.message, "hello");
            }
            other => panic!("unexpected {:?}", other),
        }
        rx1.try_recv().unwrap();

        let command = ChatMessage {
            session_id: 0,
            message: "/say hi".into(),
        };
        ctx.handle_tcp_message(&first, ClientTcpMessage::Chat(command)).await.unwrap();
        match decode(&rx1.try_recv().unwrap()) {
            ServerTcpMessage::Chat(chat) => {
                assert_eq!(chat.session_id, SERVER_SESSION_ID);
                assert_eq!(chat.message, "You are not an admin");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_datagram_requires_association_and_validation() {
        let ctx = context(config()).await;
        let (first, _rx) = admit(&ctx, 1, "pw").await;
        let first = first.unwrap();
        let udp: SocketAddr = "127.0.0.1:4100".parse().unwrap();

        let update = PositionUpdateIn {
            pak_sequence_id: 1,
            position: Vector3::new(1.0, 0.0, 0.0),
            ..Default::default()
        };
        ctx.handle_datagram(&update.to_datagram().unwrap(), udp).await;
        assert!(!ctx.cars[0].take_update());

        ctx.clients.write().await.bind_udp(first.session_id, udp);
        let mut nan = update;
        nan.velocity.x = f32::NAN;
        ctx.handle_datagram(&nan.to_datagram().unwrap(), udp).await;
        assert!(!ctx.cars[0].take_update());

        ctx.handle_datagram(&update.to_datagram().unwrap(), udp).await;
        assert!(ctx.cars[0].take_update());
        assert_eq!(ctx.cars[0].status().position.x, 1.0);
    }

    #[tokio::test]
    async fn test_kick_unknown_slot() {
        let ctx = context(config()).await;
        assert!(ctx.kick(1, KickReason::Kicked).await.is_none());
    }
}
