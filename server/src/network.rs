//! Server network layer: listeners, the relay tick and background tasks

use crate::broadcast::{self, InterestFilter};
use crate::config::ServerConfig;
use crate::connection::serve_connection;
use crate::context::ServerContext;
use crate::error::{Error, Result};
use crate::filters::SteamTicketValidator;
use crate::rcon::run_rcon;
use crate::udp_plugin::{run_plugin, PluginBridge};
use log::{debug, error, info, warn};
use protocol::MAX_DATAGRAM;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Longest time step handed to the AI after a stall
const MAX_AI_STEP: f32 = 0.5;

/// Main server coordinating listeners, the tick and background tasks
pub struct Server {
    ctx: Arc<ServerContext>,
    tcp: TcpListener,
    rcon: Option<TcpListener>,
}

impl Server {
    /// Binds every socket named in the configuration
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        Self::bind_with(config, None).await
    }

    /// Like [`Server::bind`], with a Steam ticket validator for `steam_auth`
    pub async fn bind_with(
        config: ServerConfig,
        steam: Option<Arc<dyn SteamTicketValidator>>,
    ) -> Result<Self> {
        config.validate()?;
        let tcp = TcpListener::bind((config.host.as_str(), config.tcp_port)).await?;
        let udp = UdpSocket::bind((config.host.as_str(), config.udp_port)).await?;
        let rcon = match config.rcon.port {
            Some(port) => Some(TcpListener::bind((config.host.as_str(), port)).await?),
            None => None,
        };
        let plugin = PluginBridge::bind(&config.udp_plugin).await?;

        info!(
            "Server '{}' listening on TCP {} and UDP {}",
            config.name,
            tcp.local_addr()?,
            udp.local_addr()?
        );
        if let Some(rcon) = &rcon {
            info!("RCON listening on {}", rcon.local_addr()?);
        }

        let ctx = ServerContext::new(config, udp, plugin, steam, CancellationToken::new())?;
        Ok(Server {
            ctx: Arc::new(ctx),
            tcp,
            rcon,
        })
    }

    pub fn tcp_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    pub fn udp_addr(&self) -> Result<SocketAddr> {
        Ok(self.ctx.udp.local_addr()?)
    }

    pub fn rcon_addr(&self) -> Option<SocketAddr> {
        self.rcon.as_ref().and_then(|rcon| rcon.local_addr().ok())
    }

    pub fn plugin_addr(&self) -> Option<SocketAddr> {
        self.ctx.plugin.as_ref().and_then(|plugin| plugin.local_addr().ok())
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Cancelling this token stops the server
    pub fn shutdown_token(&self) -> CancellationToken {
        self.ctx.shutdown.clone()
    }

    /// Spawns task that accepts TCP clients and runs one connection each
    fn spawn_tcp_acceptor(ctx: &Arc<ServerContext>, tasks: &mut JoinSet<Result<()>>, listener: TcpListener) {
        let ctx = Arc::clone(ctx);

        tasks.spawn(async move {
            let mut connections = JoinSet::new();

            loop {
                tokio::select! {
                    _ = ctx.shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            debug!("Accepted TCP connection from {}", addr);
                            let ctx = Arc::clone(&ctx);
                            connections.spawn(async move {
                                if let Err(e) = serve_connection(ctx, stream, addr).await {
                                    debug!("Connection {} ended with: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            warn!("Error accepting connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    },
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}
                }
            }

            // Connections see the cancelled token and flush their queues
            let grace = ctx.config.shutdown_grace() + Duration::from_millis(500);
            let drained = tokio::time::timeout(grace, async {
                while connections.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!("Aborting {} connections after grace period", connections.len());
                connections.shutdown().await;
            }
            Ok(())
        });
    }

    /// Spawns task that continuously receives UDP datagrams
    fn spawn_udp_receiver(ctx: &Arc<ServerContext>, tasks: &mut JoinSet<Result<()>>) {
        let ctx = Arc::clone(ctx);

        tasks.spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM];

            loop {
                tokio::select! {
                    _ = ctx.shutdown.cancelled() => break,
                    received = ctx.udp.recv_from(&mut buffer) => match received {
                        Ok((len, addr)) => ctx.handle_datagram(&buffer[..len], addr).await,
                        Err(e) => {
                            debug!("Error receiving datagram: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    },
                }
            }
            Ok(())
        });
    }

    /// Spawns the fixed rate tick: AI movement, then position relay
    fn spawn_tick(ctx: &Arc<ServerContext>, tasks: &mut JoinSet<Result<()>>) {
        let ctx = Arc::clone(ctx);

        tasks.spawn(async move {
            let filter = InterestFilter::from_config(&ctx.config);
            let mut tick_interval = interval(ctx.config.tick_interval());
            tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_tick = Instant::now();
            let mut tick: u64 = 0;

            loop {
                tokio::select! {
                    _ = ctx.shutdown.cancelled() => break,
                    _ = tick_interval.tick() => {
                        let now = Instant::now();
                        let dt = now.duration_since(last_tick).as_secs_f32().min(MAX_AI_STEP);
                        last_tick = now;

                        if let Some(ai) = &ctx.ai {
                            let players: Vec<_> = ctx
                                .clients
                                .read()
                                .await
                                .active()
                                .iter()
                                .filter_map(|client| ctx.cars.get(client.session_id as usize))
                                .map(|car| car.status().position)
                                .collect();
                            ai.update(&ctx.cars, &players, dt, ctx.server_time());
                        }

                        broadcast::broadcast_tick(&ctx, &filter, tick).await;
                        tick += 1;

                        let elapsed = now.elapsed();
                        if elapsed > ctx.config.tick_interval() {
                            warn!("Tick {} took {:?}", tick, elapsed);
                        }
                    }
                }
            }
            Ok(())
        });
    }

    /// Spawns task that pings clients and drops silent ones
    fn spawn_ping_checker(ctx: &Arc<ServerContext>, tasks: &mut JoinSet<Result<()>>) {
        let ctx = Arc::clone(ctx);

        tasks.spawn(async move {
            let mut ping_interval = interval(ctx.config.ping_interval());
            ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ctx.shutdown.cancelled() => break,
                    _ = ping_interval.tick() => {
                        ctx.send_pings().await;
                        ctx.check_timeouts().await;
                    }
                }
            }
            Ok(())
        });
    }

    /// Runs until the shutdown token is cancelled or a core task fails
    pub async fn run(self) -> Result<()> {
        let Server { ctx, tcp, rcon } = self;
        let mut tasks = JoinSet::new();
        Self::spawn_tcp_acceptor(&ctx, &mut tasks, tcp);
        Self::spawn_udp_receiver(&ctx, &mut tasks);
        Self::spawn_tick(&ctx, &mut tasks);
        Self::spawn_ping_checker(&ctx, &mut tasks);
        if let Some(listener) = rcon {
            tasks.spawn(run_rcon(Arc::clone(&ctx), listener));
        }
        if ctx.plugin.is_some() {
            tasks.spawn(run_plugin(Arc::clone(&ctx)));
        }

        info!("Server started successfully");
        let shutdown = ctx.shutdown.clone();
        let mut failure = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                joined = tasks.join_next() => match joined {
                    Some(Ok(Ok(()))) => {
                        if !shutdown.is_cancelled() {
                            error!("A server task stopped unexpectedly");
                            failure = Some(Error::Task("server task stopped".to_string()));
                            shutdown.cancel();
                        }
                    }
                    Some(Ok(Err(e))) => {
                        error!("Server task failed: {}", e);
                        failure = Some(e);
                        shutdown.cancel();
                    }
                    Some(Err(e)) => {
                        error!("Server task panicked: {}", e);
                        failure = Some(Error::Task(e.to_string()));
                        shutdown.cancel();
                    }
                    None => break,
                },
            }
        }

        info!("Server shutting down");
        let grace = ctx.config.shutdown_grace() + Duration::from_secs(1);
        let finished = tokio::time::timeout(grace, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Err(e)) => warn!("Server task ended with: {}", e),
                    Err(e) => warn!("Server task panicked during shutdown: {}", e),
                    Ok(Ok(())) => {}
                }
            }
        })
        .await;
        if finished.is_err() {
            warn!("Background tasks did not stop in time, aborting");
            tasks.shutdown().await;
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EntryConfig;

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            tcp_port: 0,
            udp_port: 0,
            entries: vec![EntryConfig {
                model: "car_a".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bind_ephemeral_ports() {
        let server = Server::bind(test_config()).await.unwrap();
        assert_ne!(server.tcp_addr().unwrap().port(), 0);
        assert_ne!(server.udp_addr().unwrap().port(), 0);
        assert!(server.rcon_addr().is_none());
        assert!(server.plugin_addr().is_none());
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = ServerConfig {
            entries: Vec::new(),
            ..test_config()
        };
        assert!(matches!(Server::bind(config).await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut config = test_config();
        config.rcon.port = Some(0);
        config.shutdown_grace_ms = 100;
        let server = Server::bind(config).await.unwrap();
        assert!(server.rcon_addr().is_some());
        let token = server.shutdown_token();

        let handle = tokio::spawn(server.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
