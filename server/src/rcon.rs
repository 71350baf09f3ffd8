//! Remote console over TCP.
//!
//! A connection must authenticate before anything else; any other first
//! request, or a wrong password, closes it.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use protocol::opcodes::RconRequestType;
use protocol::rcon::{RconPacket, MAX_RCON_FRAME};
use protocol::{FrameReader, LengthPrefix};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::commands::{self, Caller};
use crate::context::ServerContext;
use crate::error::Result;

/// Accepts RCON connections until shutdown.
pub async fn run_rcon(ctx: Arc<ServerContext>, listener: TcpListener) -> Result<()> {
    let mut sessions = JoinSet::new();
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let ctx = Arc::clone(&ctx);
                    sessions.spawn(async move {
                        if let Err(e) = serve_rcon(ctx, stream, addr).await {
                            debug!("RCON connection {} ended: {}", addr, e);
                        }
                    });
                }
                Err(e) => warn!("RCON accept failed: {}", e),
            },
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }
    sessions.shutdown().await;
    Ok(())
}

async fn serve_rcon(ctx: Arc<ServerContext>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
    info!("RCON connection from {}", addr);
    let (read_half, write_half) = stream.into_split();
    let reader = FrameReader::new(read_half, LengthPrefix::U32, MAX_RCON_FRAME);
    tokio::select! {
        _ = ctx.shutdown.cancelled() => Ok(()),
        result = rcon_session(&ctx, reader, write_half) => result,
    }
}

/// Handles requests from one RCON peer until it disconnects or fails auth.
pub async fn rcon_session<R, W>(ctx: &ServerContext, mut reader: FrameReader<R>, mut writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut authenticated = false;
    while let Some(payload) = reader.read_frame().await? {
        let request = RconPacket::decode(payload)?;
        match request.request_type() {
            Some(RconRequestType::Auth) => {
                authenticated = ctx
                    .config
                    .rcon
                    .password
                    .as_deref()
                    .map_or(false, |password| password == request.body);
                writer
                    .write_all(&RconPacket::auth_response(request.request_id, authenticated).to_frame()?)
                    .await?;
                if !authenticated {
                    info!("RCON authentication failed");
                    break;
                }
            }
            Some(RconRequestType::ExecCommand) if authenticated => {
                info!("RCON command: {}", request.body);
                let replies = commands::execute(ctx, Caller::Console, &request.body).await;
                let response = RconPacket::response_value(request.request_id, replies.join("\n"));
                writer.write_all(&response.to_frame()?).await?;
            }
            _ => {
                debug!("Unauthenticated or unknown RCON request type {}", request.kind);
                break;
            }
        }
    }
    writer.shutdown().await?;
    Ok(())
}
