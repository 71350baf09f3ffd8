//! Server configuration.
//!
//! Loaded from an optional JSON file where every field has a default, then
//! patched with command line overrides by the binary. The core only reads it.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use protocol::opcodes::SessionType;
use serde::Deserialize;

use crate::entry_car::AiMode;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub tick_rate_hz: u32,
    pub password: Option<String>,
    pub admin_password: Option<String>,
    pub track: String,
    pub track_config: String,
    pub sun_angle: f32,
    pub sessions: Vec<SessionConfig>,
    pub entries: Vec<EntryConfig>,
    pub checksum_files: Vec<PathBuf>,
    pub whitelist_enabled: bool,
    pub whitelist: Vec<u64>,
    pub blacklist: Vec<u64>,
    pub steam_auth: bool,
    pub steam_auth_timeout_ms: u64,
    /// Cars further than this from a client are outside its network bubble.
    /// `None` relays every car every tick.
    pub network_bubble_distance: Option<f32>,
    /// Rate at which cars outside the bubble are still relayed. Zero never sends them.
    pub outside_bubble_refresh_rate_hz: u32,
    pub validation: ValidationConfig,
    pub handshake_timeout_ms: u64,
    pub checksum_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    pub send_queue_capacity: usize,
    pub shutdown_grace_ms: u64,
    pub rcon: RconConfig,
    pub udp_plugin: UdpPluginConfig,
    pub ai: AiConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "AC Server".to_string(),
            host: "0.0.0.0".to_string(),
            tcp_port: 9600,
            udp_port: 9600,
            tick_rate_hz: 20,
            password: None,
            admin_password: None,
            track: "track".to_string(),
            track_config: String::new(),
            sun_angle: 48.0,
            sessions: vec![SessionConfig::default()],
            entries: Vec::new(),
            checksum_files: Vec::new(),
            whitelist_enabled: false,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            steam_auth: false,
            steam_auth_timeout_ms: 5000,
            network_bubble_distance: Some(500.0),
            outside_bubble_refresh_rate_hz: 4,
            validation: ValidationConfig::default(),
            handshake_timeout_ms: 10_000,
            checksum_timeout_ms: 10_000,
            ping_interval_ms: 1000,
            ping_timeout_ms: 30_000,
            send_queue_capacity: 256,
            shutdown_grace_ms: 2000,
            rcon: RconConfig::default(),
            udp_plugin: UdpPluginConfig::default(),
            ai: AiConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads the JSON file at `path`, or returns defaults when there is none.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                info!("Loaded configuration from {}", path.display());
                serde_json::from_str(&text)?
            }
            None => ServerConfig::default(),
        };
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(Error::config("entry list is empty"));
        }
        // Session id 255 is reserved for server messages.
        if self.entries.len() > u8::MAX as usize {
            return Err(Error::config(format!(
                "{} entries configured, at most {} are supported",
                self.entries.len(),
                u8::MAX
            )));
        }
        if self.tick_rate_hz == 0 || self.tick_rate_hz > 255 {
            return Err(Error::config("tick rate must be between 1 and 255 Hz"));
        }
        if self.sessions.is_empty() {
            return Err(Error::config("at least one session is required"));
        }
        if self.send_queue_capacity == 0 {
            return Err(Error::config("send queue capacity must be positive"));
        }
        if self.ai.enabled && self.ai.spline_dir.is_none() {
            return Err(Error::config("AI traffic enabled without a spline directory"));
        }
        if self.ai.enabled && self.ai.states_per_slot == 0 {
            return Err(Error::config("AI traffic needs at least one state per slot"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz as f64)
    }

    pub fn outside_bubble_interval(&self) -> Option<Duration> {
        match self.outside_bubble_refresh_rate_hz {
            0 => None,
            hz => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn checksum_timeout(&self) -> Duration {
        Duration::from_millis(self.checksum_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn steam_auth_timeout(&self) -> Duration {
        Duration::from_millis(self.steam_auth_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn whitelist_set(&self) -> HashSet<u64> {
        self.whitelist.iter().copied().collect()
    }

    pub fn is_blacklisted(&self, guid: u64) -> bool {
        self.blacklist.contains(&guid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Booking,
    Practice,
    Qualifying,
    Race,
}

impl SessionKind {
    pub fn wire(self) -> SessionType {
        match self {
            SessionKind::Booking => SessionType::Booking,
            SessionKind::Practice => SessionType::Practice,
            SessionKind::Qualifying => SessionType::Qualifying,
            SessionKind::Race => SessionType::Race,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match SessionType::from_repr(value)? {
            SessionType::Booking => Some(SessionKind::Booking),
            SessionType::Practice => Some(SessionKind::Practice),
            SessionType::Qualifying => Some(SessionKind::Qualifying),
            SessionType::Race => Some(SessionKind::Race),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub name: String,
    pub kind: SessionKind,
    pub time_minutes: u16,
    /// Race length in laps; zero means timed.
    pub laps: u16,
    pub wait_time_seconds: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "Practice".to_string(),
            kind: SessionKind::Practice,
            time_minutes: 60,
            laps: 0,
            wait_time_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EntryConfig {
    pub model: String,
    pub skin: String,
    pub ballast_kg: f32,
    pub restrictor: f32,
    pub ai: AiMode,
    /// Drivers allowed to take this slot. Empty allows anyone.
    pub guids: Vec<u64>,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            skin: String::new(),
            ballast_kg: 0.0,
            restrictor: 0.0,
            ai: AiMode::None,
            guids: Vec::new(),
        }
    }
}

/// Sanity bounds applied to incoming position updates.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_position: f32,
    pub max_velocity: f32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_position: 100_000.0,
            max_velocity: 500.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RconConfig {
    pub port: Option<u16>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UdpPluginConfig {
    pub address: Option<SocketAddr>,
    pub local_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub enabled: bool,
    /// Directory holding `fast_lane*.ai` files and an optional `junctions.json`.
    pub spline_dir: Option<PathBuf>,
    pub cache_dir: PathBuf,
    pub lane_width: f32,
    pub max_speed_kmh: f32,
    pub min_spawn_distance: f32,
    pub max_spawn_distance: f32,
    pub despawn_distance: f32,
    pub min_state_distance: f32,
    pub states_per_slot: usize,
    pub acceleration: f32,
    pub deceleration: f32,
    pub corner_lateral_g: f32,
    pub seed: Option<u64>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            spline_dir: None,
            cache_dir: PathBuf::from("cache"),
            lane_width: 3.0,
            max_speed_kmh: 80.0,
            min_spawn_distance: 100.0,
            max_spawn_distance: 400.0,
            despawn_distance: 600.0,
            min_state_distance: 200.0,
            states_per_slot: 2,
            acceleration: 2.5,
            deceleration: 8.5,
            corner_lateral_g: 0.8,
            seed: None,
        }
    }
}

impl AiConfig {
    pub fn max_speed(&self) -> f32 {
        self.max_speed_kmh / 3.6
    }
}
