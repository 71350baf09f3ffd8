//! Admission filters run against every handshake before a slot is assigned.
//!
//! Filters run in a fixed order and the first rejection wins. Its reason is
//! sent to the client in an `AuthFailed` packet.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use protocol::packets::HandshakeRequest;

use crate::config::{EntryConfig, ServerConfig};
use crate::entry_car::AiMode;
use crate::error::{Error, Result};

pub const NOT_WHITELISTED: &str = "You are not whitelisted on this server";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterResult {
    Accept,
    Reject(String),
}

impl FilterResult {
    pub fn reject(reason: impl Into<String>) -> Self {
        FilterResult::Reject(reason.into())
    }
}

#[async_trait]
pub trait SlotFilter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, request: &HandshakeRequest, addr: SocketAddr) -> FilterResult;
}

/// Checks a Steam session ticket. Implemented outside the server.
#[async_trait]
pub trait SteamTicketValidator: Send + Sync {
    /// `Ok(true)` grants access, `Ok(false)` denies it.
    async fn validate(&self, guid: u64, ticket: &[u8]) -> std::result::Result<bool, String>;
}

pub struct WhitelistFilter {
    allowed: HashSet<u64>,
}

impl WhitelistFilter {
    pub fn new(allowed: HashSet<u64>) -> Self {
        Self { allowed }
    }
}

#[async_trait]
impl SlotFilter for WhitelistFilter {
    fn name(&self) -> &'static str {
        "whitelist"
    }

    async fn check(&self, request: &HandshakeRequest, _addr: SocketAddr) -> FilterResult {
        if self.allowed.contains(&request.guid) {
            FilterResult::Accept
        } else {
            FilterResult::reject(NOT_WHITELISTED)
        }
    }
}

pub struct SteamTicketFilter {
    validator: Arc<dyn SteamTicketValidator>,
    timeout: Duration,
}

impl SteamTicketFilter {
    pub fn new(validator: Arc<dyn SteamTicketValidator>, timeout: Duration) -> Self {
        Self { validator, timeout }
    }
}

#[async_trait]
impl SlotFilter for SteamTicketFilter {
    fn name(&self) -> &'static str {
        "steam"
    }

    async fn check(&self, request: &HandshakeRequest, _addr: SocketAddr) -> FilterResult {
        let ticket = match request.session_ticket.as_deref() {
            Some(ticket) if !ticket.is_empty() => ticket,
            _ => return FilterResult::reject("Steam authentication required"),
        };

        match tokio::time::timeout(self.timeout, self.validator.validate(request.guid, ticket)).await {
            Ok(Ok(true)) => FilterResult::Accept,
            Ok(Ok(false)) => FilterResult::reject("Steam authentication failed"),
            Ok(Err(e)) => FilterResult::reject(format!("Steam authentication failed: {}", e)),
            Err(_) => FilterResult::reject("Steam authentication timed out"),
        }
    }
}

/// Rejects cars whose every slot is reserved for AI traffic.
pub struct AiSlotFilter {
    human_models: HashSet<String>,
    ai_models: HashSet<String>,
}

impl AiSlotFilter {
    pub fn new(entries: &[EntryConfig]) -> Self {
        let mut human_models = HashSet::new();
        let mut ai_models = HashSet::new();
        for entry in entries {
            if entry.ai == AiMode::Fixed {
                ai_models.insert(entry.model.clone());
            } else {
                human_models.insert(entry.model.clone());
            }
        }
        Self {
            human_models,
            ai_models,
        }
    }
}

#[async_trait]
impl SlotFilter for AiSlotFilter {
    fn name(&self) -> &'static str {
        "ai_slots"
    }

    async fn check(&self, request: &HandshakeRequest, _addr: SocketAddr) -> FilterResult {
        let model = &request.requested_car;
        if self.ai_models.contains(model) && !self.human_models.contains(model) {
            FilterResult::reject("This car is reserved for AI traffic")
        } else {
            FilterResult::Accept
        }
    }
}

/// Enforces per-slot GUID reservations from the entry list.
pub struct GuidAllowListFilter {
    entries: Vec<(String, Vec<u64>)>,
}

impl GuidAllowListFilter {
    pub fn new(entries: &[EntryConfig]) -> Self {
        Self {
            entries: entries
                .iter()
                .filter(|entry| entry.ai != AiMode::Fixed)
                .map(|entry| (entry.model.clone(), entry.guids.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl SlotFilter for GuidAllowListFilter {
    fn name(&self) -> &'static str {
        "guid_allow_list"
    }

    async fn check(&self, request: &HandshakeRequest, _addr: SocketAddr) -> FilterResult {
        let mut matching = self
            .entries
            .iter()
            .filter(|(model, _)| *model == request.requested_car)
            .peekable();
        if matching.peek().is_none() {
            // Unknown cars are answered with NoSlotsAvailable later on.
            return FilterResult::Accept;
        }
        if matching.any(|(_, guids)| guids.is_empty() || guids.contains(&request.guid)) {
            FilterResult::Accept
        } else {
            FilterResult::reject("This car is reserved for other drivers")
        }
    }
}

#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn SlotFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the chain in its fixed order: whitelist, Steam ticket, AI
    /// slot exclusion, GUID allow-list.
    pub fn from_config(
        config: &ServerConfig,
        steam: Option<Arc<dyn SteamTicketValidator>>,
    ) -> Result<Self> {
        let mut chain = FilterChain::new();
        if config.whitelist_enabled {
            chain.push(WhitelistFilter::new(config.whitelist_set()));
        }
        if config.steam_auth {
            let validator = steam.ok_or_else(|| {
                Error::config("steam_auth is enabled but no ticket validator is installed")
            })?;
            chain.push(SteamTicketFilter::new(validator, config.steam_auth_timeout()));
        }
        chain.push(AiSlotFilter::new(&config.entries));
        chain.push(GuidAllowListFilter::new(&config.entries));
        Ok(chain)
    }

    pub fn push<F: SlotFilter + 'static>(&mut self, filter: F) {
        self.filters.push(Box::new(filter));
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub async fn check(&self, request: &HandshakeRequest, addr: SocketAddr) -> FilterResult {
        for filter in &self.filters {
            match filter.check(request, addr).await {
                FilterResult::Accept => debug!("{} accepted {}", filter.name(), request.guid),
                FilterResult::Reject(reason) => {
                    info!(
                        "{} rejected {} ({}) from {}: {}",
                        filter.name(),
                        request.name,
                        request.guid,
                        addr,
                        reason
                    );
                    return FilterResult::Reject(reason);
                }
            }
        }
        FilterResult::Accept
    }
}
