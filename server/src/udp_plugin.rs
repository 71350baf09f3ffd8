//! Bridge to an external telemetry plugin over UDP.
//!
//! Events are fire-and-forget; a full socket buffer drops them. Requests
//! are only accepted from the configured plugin address.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use protocol::opcodes::{KickReason, UDP_PLUGIN_PROTOCOL_VERSION};
use protocol::packets::ChatMessage;
use protocol::plugin::{PluginEvent, PluginRequest};
use protocol::{OutgoingPacket, MAX_DATAGRAM};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::commands::{self, Caller};
use crate::config::{SessionConfig, SessionKind, UdpPluginConfig};
use crate::context::ServerContext;
use crate::error::Result;

/// Poll period while realtime updates are off.
const IDLE_POLL: Duration = Duration::from_secs(1);

pub struct PluginBridge {
    socket: UdpSocket,
    target: SocketAddr,
    realtime_interval_ms: AtomicU16,
}

impl PluginBridge {
    /// Binds the local plugin socket, or returns `None` without a target.
    pub async fn bind(config: &UdpPluginConfig) -> Result<Option<Self>> {
        let Some(target) = config.address else {
            return Ok(None);
        };
        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], config.local_port).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, config.local_port).into()
        };
        let socket = UdpSocket::bind(local).await?;
        info!("UDP plugin bridge on {} sending to {}", socket.local_addr()?, target);
        Ok(Some(Self {
            socket,
            target,
            realtime_interval_ms: AtomicU16::new(0),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn send(&self, event: &PluginEvent) {
        let bytes = match event.to_datagram() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode plugin event {:?}: {}", event.opcode(), e);
                return;
            }
        };
        if let Err(e) = self.socket.try_send_to(&bytes, self.target) {
            debug!("Dropped plugin event {:?}: {}", event.opcode(), e);
        }
    }

    /// `None` while realtime car updates are disabled.
    pub fn realtime_interval(&self) -> Option<Duration> {
        match self.realtime_interval_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Duration::from_millis(ms as u64)),
        }
    }

    fn set_realtime_interval(&self, interval_ms: u16) {
        self.realtime_interval_ms.store(interval_ms, Ordering::Relaxed);
    }
}

/// Receives plugin requests and emits realtime car updates until shutdown.
pub async fn run_plugin(ctx: Arc<ServerContext>) -> Result<()> {
    let Some(plugin) = ctx.plugin.as_ref() else {
        return Ok(());
    };

    plugin.send(&PluginEvent::Version(UDP_PLUGIN_PROTOCOL_VERSION));
    if let Some(info) = ctx.session.plugin_info(&ctx.config, None) {
        plugin.send(&PluginEvent::NewSession(info));
    }

    let mut buffer = vec![0u8; MAX_DATAGRAM];
    let next_update = tokio::time::sleep(IDLE_POLL);
    tokio::pin!(next_update);

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = &mut next_update => {
                if plugin.realtime_interval().is_some() {
                    send_car_updates(&ctx, plugin).await;
                }
                let wait = plugin.realtime_interval().unwrap_or(IDLE_POLL);
                next_update.as_mut().reset(Instant::now() + wait);
            }
            received = plugin.socket.recv_from(&mut buffer) => {
                let (len, addr) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        debug!("Plugin socket receive error: {}", e);
                        continue;
                    }
                };
                if addr.ip() != plugin.target.ip() {
                    debug!("Ignoring plugin datagram from {}", addr);
                    continue;
                }
                match PluginRequest::decode(&buffer[..len]) {
                    Ok(request) => {
                        let previous = plugin.realtime_interval();
                        handle_request(&ctx, plugin, request).await;
                        if plugin.realtime_interval() != previous {
                            let wait = plugin.realtime_interval().unwrap_or(IDLE_POLL);
                            next_update.as_mut().reset(Instant::now() + wait);
                        }
                    }
                    Err(e) => {
                        debug!("Malformed plugin request from {}: {}", addr, e);
                        plugin.send(&PluginEvent::Error(format!("malformed request: {}", e)));
                    }
                }
            }
        }
    }
    Ok(())
}

async fn send_car_updates(ctx: &ServerContext, plugin: &PluginBridge) {
    let clients = ctx.clients.read().await.active();
    for client in clients {
        let Some(car) = ctx.cars.get(client.session_id as usize) else {
            continue;
        };
        let status = car.status();
        plugin.send(&PluginEvent::CarUpdate {
            car_id: client.session_id,
            position: status.position,
            velocity: status.velocity,
            gear: status.gear,
            engine_rpm: status.engine_rpm,
            normalized_position: status.normalized_position,
        });
    }
}

pub async fn handle_request(ctx: &ServerContext, plugin: &PluginBridge, request: PluginRequest) {
    debug!("Plugin request {:?}", request.opcode());
    match request {
        PluginRequest::RealtimePosInterval { interval_ms } => {
            plugin.set_realtime_interval(interval_ms);
        }
        PluginRequest::GetCarInfo { car_id } => match ctx.cars.get(car_id as usize) {
            Some(car) => {
                let client = ctx.clients.read().await.get(car_id);
                plugin.send(&PluginEvent::CarInfo {
                    car_id,
                    is_connected: client.is_some(),
                    car_model: car.model.clone(),
                    car_skin: car.skin.clone(),
                    driver_name: client.as_ref().map(|c| c.name.clone()).unwrap_or_default(),
                    driver_team: client.as_ref().map(|c| c.team.clone()).unwrap_or_default(),
                    driver_guid: client.as_ref().map(|c| c.guid.to_string()).unwrap_or_default(),
                });
            }
            None => plugin.send(&PluginEvent::Error(format!("no car with id {}", car_id))),
        },
        PluginRequest::SendChat { car_id, message } => {
            let client = ctx.clients.read().await.get(car_id);
            match client {
                Some(client) => {
                    if let Err(e) = client.send(&ChatMessage::from_server(message)) {
                        debug!("Plugin chat to {} failed: {}", car_id, e);
                    }
                }
                None => plugin.send(&PluginEvent::Error(format!("car {} is not connected", car_id))),
            }
        }
        PluginRequest::BroadcastChat { message } => {
            ctx.broadcast(&ChatMessage::from_server(message), None).await;
        }
        PluginRequest::GetSessionInfo { session_index } => {
            let index = usize::try_from(session_index).ok();
            match ctx.session.plugin_info(&ctx.config, index) {
                Some(info) => plugin.send(&PluginEvent::SessionInfo(info)),
                None => plugin.send(&PluginEvent::Error(format!(
                    "no session with index {}",
                    session_index
                ))),
            }
        }
        PluginRequest::SetSessionInfo {
            session_index,
            name,
            session_type,
            laps,
            time_seconds,
            wait_time_seconds,
        } => {
            let Some(kind) = SessionKind::from_wire(session_type) else {
                plugin.send(&PluginEvent::Error(format!("unknown session type {}", session_type)));
                return;
            };
            let session = SessionConfig {
                name,
                kind,
                time_minutes: (time_seconds / 60).min(u16::MAX as u32) as u16,
                laps: laps.min(u16::MAX as u32) as u16,
                wait_time_seconds: wait_time_seconds.min(u16::MAX as u32) as u16,
            };
            if !ctx.session.set_session(session_index as usize, session) {
                plugin.send(&PluginEvent::Error(format!(
                    "no session with index {}",
                    session_index
                )));
            }
        }
        PluginRequest::KickUser { car_id } => {
            if ctx.kick(car_id, KickReason::Kicked).await.is_none() {
                plugin.send(&PluginEvent::Error(format!("car {} is not connected", car_id)));
            }
        }
        PluginRequest::NextSession => {
            ctx.session.next_session();
            ctx.announce_session().await;
        }
        PluginRequest::RestartSession => {
            ctx.session.restart_session();
            ctx.announce_session().await;
        }
        PluginRequest::AdminCommand { command } => {
            for line in commands::execute(ctx, Caller::Console, &command).await {
                info!("Plugin command {:?}: {}", command, line);
            }
        }
    }
}
