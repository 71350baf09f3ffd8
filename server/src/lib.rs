//! # Race Server Library
//!
//! This library provides a multiplayer racing server speaking the binary game
//! protocol from the `protocol` crate. It admits drivers into configured car
//! slots over TCP, relays their car state to each other over UDP, and can fill
//! empty slots with AI traffic driving along a recorded racing line.
//!
//! ## Core Responsibilities
//!
//! ### Admission
//! Every TCP connection starts with a handshake. The server checks the client
//! version, the blacklist, the password and the configured admission filters,
//! then assigns a free slot matching the requested car model and replies with
//! the session parameters and the full car list.
//!
//! ### Client Lifecycle
//! Handles the complete lifecycle of client connections including:
//! - Handshake and slot assignment
//! - Content checksum verification
//! - UDP endpoint association and ping based clock sync
//! - Timeouts, kicks and clean exits
//!
//! ### State Relay
//! A fixed rate tick batches the latest state of every car into one datagram
//! per destination. Cars outside a client's network bubble are sent at a
//! reduced rate.
//!
//! ## Architecture Design
//!
//! ### Task Per Concern
//! The server runs a small set of long lived async tasks sharing one
//! [`context::ServerContext`]: the TCP acceptor, the UDP receiver, the relay
//! tick, the ping checker, and optionally RCON and the UDP plugin bridge. A
//! failing task cancels the shared shutdown token and stops the others.
//!
//! ### Connection Tasks
//! Each TCP client gets a receive loop and a send loop joined by a bounded
//! queue. A full queue disconnects the client instead of blocking the tick.
//!
//! ## Module Organization
//!
//! ### Connection Module (`connection`)
//! Per-client handle and the TCP receive and send loops.
//!
//! ### Client Manager Module (`client_manager`)
//! Tracks connected clients by session id and by UDP endpoint.
//!
//! ### Context Module (`context`)
//! Admission, packet handling, disconnects and broadcasts.
//!
//! ### Broadcast Module (`broadcast`)
//! Interest filtering and position batching for the relay tick.
//!
//! ### AI Module (`ai`)
//! Racing line loading, spatial lookup and the traffic driver.
//!
//! ### Network Module (`network`)
//! Binds every socket and supervises the background tasks.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{Server, ServerConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::load(Some(Path::new("server.json")))?;
//!     let server = Server::bind(config).await?;
//!
//!     let shutdown = server.shutdown_token();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.cancel();
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Considerations
//!
//! ### Input Validation
//! Position updates with non-finite or out of range values are dropped before
//! they reach the car state, so they are never relayed to other clients.
//!
//! ### Admin Rights
//! Kicking and server announcements need admin rights, granted by the admin
//! password at handshake time or through the `/admin` command. RCON and the
//! UDP plugin always act as admin.

pub mod ai;
pub mod broadcast;
pub mod checksum;
pub mod client_manager;
pub mod commands;
pub mod config;
pub mod connection;
pub mod context;
pub mod entry_car;
pub mod error;
pub mod filters;
pub mod network;
pub mod rcon;
pub mod session;
pub mod udp_plugin;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use network::Server;
