//! Position relay with interest management.
//!
//! Every tick each active client with a UDP endpoint receives the fresh
//! snapshots of the cars it is interested in. Cars inside the network
//! bubble are sent every tick, cars outside it only every few ticks.

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, warn};
use protocol::packets::{BatchedPositionUpdate, PositionUpdateOut, MAX_UPDATES_PER_BATCH};
use protocol::{OutgoingPacket, Vector3};

use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::entry_car::CarStatus;

/// Decides whether a destination gets a source car this tick.
#[derive(Debug, Clone, Copy)]
pub struct InterestFilter {
    bubble_sq: Option<f32>,
    /// Send cars outside the bubble every this many ticks.
    outside_every: Option<u64>,
}

impl InterestFilter {
    pub fn new(bubble_distance: Option<f32>, tick_interval: Duration, outside_interval: Option<Duration>) -> Self {
        let outside_every = outside_interval.map(|interval| {
            let ticks = interval.as_secs_f64() / tick_interval.as_secs_f64().max(f64::EPSILON);
            (ticks.round() as u64).max(1)
        });
        Self {
            bubble_sq: bubble_distance.map(|d| d * d),
            outside_every,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.network_bubble_distance,
            config.tick_interval(),
            config.outside_bubble_interval(),
        )
    }

    /// Relays everything every tick.
    pub fn sees_all() -> Self {
        Self {
            bubble_sq: None,
            outside_every: None,
        }
    }

    pub fn should_send(&self, destination: Vector3, source: Vector3, tick: u64) -> bool {
        match self.bubble_sq {
            None => true,
            Some(bubble_sq) if destination.distance_squared(source) <= bubble_sq => true,
            Some(_) => self.outside_every.map_or(false, |every| tick % every == 0),
        }
    }
}

/// One car's snapshot offered for relay this tick.
#[derive(Debug, Clone, Copy)]
pub struct Relay {
    pub session_id: u8,
    pub status: CarStatus,
    pub ping: u16,
}

impl Relay {
    fn is_sane(&self) -> bool {
        self.status.position.is_finite()
            && self.status.rotation.is_finite()
            && self.status.velocity.is_finite()
    }
}

/// Picks the relays a destination gets and splits them into datagrams of
/// at most [`MAX_UPDATES_PER_BATCH`] updates.
pub fn plan_batches(
    destination: u8,
    position: Vector3,
    relays: &[Relay],
    filter: &InterestFilter,
    tick: u64,
    server_time: u32,
    last_ping: u16,
) -> Vec<BatchedPositionUpdate> {
    let updates: Vec<PositionUpdateOut> = relays
        .iter()
        .filter(|relay| relay.session_id != destination && relay.is_sane())
        .filter(|relay| filter.should_send(position, relay.status.position, tick))
        .map(|relay| relay.status.to_update(relay.session_id, relay.ping))
        .collect();

    updates
        .chunks(MAX_UPDATES_PER_BATCH)
        .map(|chunk| BatchedPositionUpdate {
            server_time,
            last_ping,
            updates: chunk.to_vec(),
        })
        .collect()
}

/// Runs one relay tick over every active client.
pub async fn broadcast_tick(ctx: &ServerContext, filter: &InterestFilter, tick: u64) {
    let clients = ctx.clients.read().await.active();
    if clients.is_empty() {
        return;
    }

    let mut human = Vec::with_capacity(clients.len());
    for client in &clients {
        let Some(car) = ctx.cars.get(client.session_id as usize) else {
            continue;
        };
        if car.take_update() {
            human.push(Relay {
                session_id: client.session_id,
                status: car.status(),
                ping: client.ping(),
            });
        }
    }

    let ai_slots: Vec<u8> = match &ctx.ai {
        Some(_) => ctx
            .cars
            .iter()
            .filter(|car| car.is_ai_controlled())
            .map(|car| car.session_id)
            .collect(),
        None => Vec::new(),
    };

    let server_time = ctx.server_time();
    let mut sent = 0usize;
    for client in &clients {
        let Some(udp_addr) = client.udp_addr() else {
            continue;
        };
        let position = ctx
            .cars
            .get(client.session_id as usize)
            .map(|car| car.status().position)
            .unwrap_or(Vector3::ZERO);

        let mut relays = human.clone();
        if let Some(ai) = &ctx.ai {
            relays.extend(ai_slots.iter().filter_map(|&session_id| {
                ai.relay_status(session_id, client.session_id, position).map(|status| Relay {
                    session_id,
                    status,
                    ping: 0,
                })
            }));
        }

        let batches = plan_batches(
            client.session_id,
            position,
            &relays,
            filter,
            tick,
            server_time,
            client.ping(),
        );
        for batch in batches {
            sent += batch.updates.len();
            send_datagram(ctx, &batch, udp_addr).await;
        }
    }

    if tick % 200 == 0 {
        debug!(
            "Tick {}: {} active clients, {} updates relayed",
            tick,
            clients.len(),
            sent
        );
    }
}

pub async fn send_datagram<P: OutgoingPacket>(ctx: &ServerContext, packet: &P, addr: SocketAddr) {
    let bytes = match packet.to_datagram() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to encode datagram for {}: {}", addr, e);
            return;
        }
    };
    if let Err(e) = ctx.udp.send_to(&bytes, addr).await {
        debug!("Failed to send datagram to {}: {}", addr, e);
    }
}
