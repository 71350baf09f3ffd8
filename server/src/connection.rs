//! Per-client connection state and the TCP lifecycle.
//!
//! Every accepted socket gets one receive loop (this module's
//! [`serve_connection`]) and one send task draining a bounded queue. Other
//! tasks only ever enqueue frames through the [`ClientHandle`], so a socket
//! has exactly one writer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, warn};
use parking_lot::Mutex;
use protocol::packets::{ClientTcpMessage, HandshakeRequest, PongResponse};
use protocol::{CspFeatures, FrameReader, LengthPrefix, OutgoingPacket, MAX_TCP_FRAME};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::context::ServerContext;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP accepted and no session id assigned yet. This stage ends before a
    /// [`ClientHandle`] exists, so a handle never reports it.
    Connecting,
    HandshakeReceived,
    ChecksumExchange,
    Active,
    Disconnecting,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumStatus {
    Pending,
    Passed,
    Failed,
}

/// Shared view of one admitted client.
///
/// Held by the client table and by any task that needs to reach the
/// client; the socket itself stays with the connection's own tasks.
pub struct ClientHandle {
    pub session_id: u8,
    pub guid: u64,
    pub name: String,
    pub team: String,
    pub nation: String,
    pub addr: SocketAddr,
    pub csp: CspFeatures,
    state: Mutex<ConnectionState>,
    checksum: Mutex<ChecksumStatus>,
    admin: AtomicBool,
    ping: AtomicU16,
    time_offset: AtomicI32,
    last_pong: Mutex<Instant>,
    udp_addr: Mutex<Option<SocketAddr>>,
    close_reason: Mutex<Option<String>>,
    outgoing: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

impl ClientHandle {
    pub fn new(
        session_id: u8,
        request: &HandshakeRequest,
        addr: SocketAddr,
        outgoing: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            guid: request.guid,
            name: request.name.clone(),
            team: request.team.clone(),
            nation: request.nation.clone(),
            addr,
            csp: request
                .features
                .as_deref()
                .map(CspFeatures::parse)
                .unwrap_or_default(),
            state: Mutex::new(ConnectionState::HandshakeReceived),
            checksum: Mutex::new(ChecksumStatus::Pending),
            admin: AtomicBool::new(false),
            ping: AtomicU16::new(0),
            time_offset: AtomicI32::new(0),
            last_pong: Mutex::new(Instant::now()),
            udp_addr: Mutex::new(None),
            close_reason: Mutex::new(None),
            outgoing,
            cancel,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Client {} {:?} -> {:?}", self.session_id, *current, state);
            *current = state;
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    pub fn checksum_status(&self) -> ChecksumStatus {
        *self.checksum.lock()
    }

    pub fn set_checksum_status(&self, status: ChecksumStatus) {
        *self.checksum.lock() = status;
    }

    pub fn is_admin(&self) -> bool {
        self.admin.load(Ordering::Acquire)
    }

    pub fn set_admin(&self, admin: bool) {
        self.admin.store(admin, Ordering::Release);
    }

    /// Round trip time in milliseconds from the last pong.
    pub fn ping(&self) -> u16 {
        self.ping.load(Ordering::Relaxed)
    }

    /// Server time minus client time, in milliseconds.
    pub fn time_offset(&self) -> i32 {
        self.time_offset.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self, now: u32, pong: &PongResponse) {
        let rtt = now.wrapping_sub(pong.server_time);
        self.ping
            .store(rtt.min(u16::MAX as u32) as u16, Ordering::Relaxed);
        let offset = i64::from(now) - i64::from(rtt / 2) - i64::from(pong.client_time);
        self.time_offset.store(
            offset.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32,
            Ordering::Relaxed,
        );
        *self.last_pong.lock() = Instant::now();
    }

    pub fn since_last_pong(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    pub fn udp_addr(&self) -> Option<SocketAddr> {
        *self.udp_addr.lock()
    }

    pub fn set_udp_addr(&self, addr: SocketAddr) {
        *self.udp_addr.lock() = Some(addr);
    }

    /// Queues a packet for the send task.
    pub fn send<P: OutgoingPacket>(&self, packet: &P) -> Result<()> {
        self.send_frame(packet.to_frame()?)
    }

    /// Queues an already encoded frame. A full queue means the peer stopped
    /// reading; the client is disconnected.
    pub fn send_frame(&self, frame: Bytes) -> Result<()> {
        match self.outgoing.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("Outgoing queue of client {} is full, disconnecting", self.session_id);
                self.disconnect("outgoing queue full");
                Err(Error::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(Error::ChannelClosed),
        }
    }

    /// Asks the connection tasks to stop. The first reason wins.
    pub fn disconnect(&self, reason: &str) {
        {
            let mut close_reason = self.close_reason.lock();
            if close_reason.is_none() {
                *close_reason = Some(reason.to_string());
            }
        }
        self.cancel.cancel();
    }

    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().clone()
    }

    pub fn is_disconnecting(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Writes queued frames to the socket until cancelled, then drains what is
/// left for at most `grace`.
///
/// A write still blocked when the token fires is abandoned. The stream is
/// then mid-frame, so nothing more is drained onto it.
pub async fn send_loop<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
    grace: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        tokio::select! {
            biased;
            result = writer.write_all(&frame) => result?,
            _ = cancel.cancelled() => {
                debug!("Dropping a partially written frame of {} bytes", frame.len());
                return Ok(());
            }
        }
    }

    rx.close();
    let drain = async {
        while let Some(frame) = rx.recv().await {
            writer.write_all(&frame).await?;
        }
        writer.flush().await?;
        writer.shutdown().await
    };
    match tokio::time::timeout(grace, drain).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => {
            debug!("Send queue not drained within {:?}", grace);
            Ok(())
        }
    }
}

/// Extra time the send task gets past its drain grace before it is aborted.
const SEND_TASK_SLACK: Duration = Duration::from_secs(1);

async fn read_handshake<R>(
    ctx: &ServerContext,
    reader: &mut FrameReader<R>,
) -> Result<Option<HandshakeRequest>>
where
    R: AsyncRead + Unpin,
{
    let wait = async {
        match reader.read_frame().await? {
            Some(payload) => match ClientTcpMessage::decode(payload)? {
                ClientTcpMessage::Handshake(request) => Ok(Some(request)),
                other => Err(Error::Protocol(format!("expected handshake, got {:?}", other))),
            },
            None => Ok(None),
        }
    };

    tokio::select! {
        _ = ctx.shutdown.cancelled() => Ok(None),
        result = tokio::time::timeout(ctx.config.handshake_timeout(), wait) => {
            result.map_err(|_| Error::Timeout("handshake"))?
        }
    }
}

/// Runs one TCP client from accept to close.
pub async fn serve_connection(ctx: Arc<ServerContext>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, LengthPrefix::U16, MAX_TCP_FRAME);

    let request = match read_handshake(&ctx, &mut reader).await? {
        Some(request) => request,
        None => return Ok(()),
    };
    debug!(
        "Handshake from {} ({}, guid {}, car {})",
        addr, request.name, request.guid, request.requested_car
    );

    let (tx, rx) = mpsc::channel(ctx.config.send_queue_capacity.max(1));
    let cancel = ctx.shutdown.child_token();
    let client = match ctx.admit(&request, addr, tx, cancel.clone()).await {
        Ok(client) => client,
        Err(rejection) => {
            info!("Rejected {} from {}: {:?}", request.name, addr, rejection);
            write_half.write_all(&rejection.to_frame()?).await?;
            write_half.shutdown().await?;
            return Ok(());
        }
    };

    let mut sender = tokio::spawn(send_loop(write_half, rx, cancel, ctx.config.shutdown_grace()));
    let result = receive_loop(&ctx, &client, &mut reader).await;
    let reason = match result {
        Ok(()) => client
            .close_reason()
            .unwrap_or_else(|| "connection closed".to_string()),
        Err(e) => e.to_string(),
    };
    ctx.disconnect(&client, &reason).await;

    match tokio::time::timeout(ctx.config.shutdown_grace() + SEND_TASK_SLACK, &mut sender).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => debug!("Send task of client {} ended with: {}", client.session_id, e),
        Ok(Err(e)) => warn!("Send task of client {} failed: {}", client.session_id, e),
        Err(_) => {
            warn!("Send task of client {} did not stop, aborting", client.session_id);
            sender.abort();
        }
    }
    Ok(())
}

async fn receive_loop<R>(
    ctx: &ServerContext,
    client: &ClientHandle,
    reader: &mut FrameReader<R>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let checksum_deadline = tokio::time::sleep(ctx.config.checksum_timeout());
    tokio::pin!(checksum_deadline);

    loop {
        let awaiting_checksums = client.state() == ConnectionState::ChecksumExchange;
        tokio::select! {
            _ = client.cancelled() => return Ok(()),
            _ = &mut checksum_deadline, if awaiting_checksums => {
                info!("Client {} did not send checksums in time", client.session_id);
                ctx.fail_checksum(client);
                return Ok(());
            }
            frame = reader.read_frame() => {
                let payload = match frame? {
                    Some(payload) => payload,
                    None => {
                        client.disconnect("connection closed by peer");
                        return Ok(());
                    }
                };
                let message = ClientTcpMessage::decode(payload)?;
                ctx.handle_tcp_message(client, message).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::packets::ChatMessage;
    use tokio::io::AsyncReadExt;

    fn request() -> HandshakeRequest {
        HandshakeRequest {
            client_version: protocol::PROTOCOL_VERSION,
            guid: 7,
            name: "Driver".into(),
            team: "Team".into(),
            nation: "ITA".into(),
            requested_car: "car_a".into(),
            password: String::new(),
            features: Some("SPECTATING_AWARE,CLIENT_MESSAGES".into()),
            session_ticket: None,
        }
    }

    fn handle(capacity: usize) -> (ClientHandle, mpsc::Receiver<Bytes>, CancellationToken) {
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let addr = "127.0.0.1:5000".parse().unwrap();
        (ClientHandle::new(3, &request(), addr, tx, cancel.clone()), rx, cancel)
    }

    #[test]
    fn test_handle_from_request() {
        let (client, _rx, _cancel) = handle(4);
        assert_eq!(client.session_id, 3);
        assert_eq!(client.guid, 7);
        assert_eq!(client.state(), ConnectionState::HandshakeReceived);
        assert_eq!(client.checksum_status(), ChecksumStatus::Pending);
        assert!(client.csp.contains(CspFeatures::CLIENT_MESSAGES));
        assert!(!client.is_admin());
    }

    #[test]
    fn test_full_queue_disconnects() {
        let (client, _rx, cancel) = handle(2);
        let chat = ChatMessage::from_server("hello");
        assert!(client.send(&chat).is_ok());
        assert!(client.send(&chat).is_ok());
        assert!(matches!(client.send(&chat), Err(Error::QueueFull)));
        assert!(cancel.is_cancelled());
        assert_eq!(client.close_reason().as_deref(), Some("outgoing queue full"));
    }

    #[test]
    fn test_first_disconnect_reason_wins() {
        let (client, _rx, _cancel) = handle(2);
        client.disconnect("kicked");
        client.disconnect("connection closed by peer");
        assert_eq!(client.close_reason().as_deref(), Some("kicked"));
        assert!(client.is_disconnecting());
    }

    #[test]
    fn test_record_pong() {
        let (client, _rx, _cancel) = handle(2);
        client.record_pong(
            1_100,
            &PongResponse {
                server_time: 1_000,
                client_time: 400,
            },
        );
        assert_eq!(client.ping(), 100);
        // 1100 - 50 - 400
        assert_eq!(client.time_offset(), 650);
        assert!(client.since_last_pong() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_send_loop_preserves_order_and_drains() {
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let (client_end, mut server_end) = tokio::io::duplex(1024);

        for i in 0..5u8 {
            tx.send(Bytes::from(vec![i])).await.unwrap();
        }
        cancel.cancel();
        send_loop(client_end, rx, cancel, Duration::from_secs(1))
            .await
            .unwrap();

        let mut received = Vec::new();
        server_end.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_send_loop_ends_when_senders_drop() {
        let (tx, rx) = mpsc::channel(8);
        let (client_end, mut server_end) = tokio::io::duplex(64);
        tx.send(Bytes::from_static(b"ab")).await.unwrap();
        drop(tx);

        send_loop(client_end, rx, CancellationToken::new(), Duration::from_secs(1))
            .await
            .unwrap();
        let mut received = Vec::new();
        server_end.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"ab");
    }

    #[tokio::test]
    async fn test_send_loop_stops_on_cancel_while_write_blocked() {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        // The peer end never reads, so the write stalls after 8 bytes
        let (client_end, _server_end) = tokio::io::duplex(8);
        tx.send(Bytes::from(vec![0xAB; 64])).await.unwrap();
        tx.send(Bytes::from(vec![0xCD; 64])).await.unwrap();

        let task = tokio::spawn(send_loop(client_end, rx, cancel.clone(), Duration::from_millis(100)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), task).await;
        tokio_test::assert_ok!(result.expect("send loop ignored cancellation").unwrap());
    }

    #[tokio::test]
    async fn test_send_loop_writes_each_frame_whole() {
        let writer = tokio_test::io::Builder::new()
            .write(b"\x02\x00hi")
            .write(b"\x01\x00!")
            .build();
        let (tx, rx) = mpsc::channel(4);
        tx.send(Bytes::from_static(b"\x02\x00hi")).await.unwrap();
        tx.send(Bytes::from_static(b"\x01\x00!")).await.unwrap();
        drop(tx);

        tokio_test::assert_ok!(send_loop(writer, rx, CancellationToken::new(), Duration::from_secs(1)).await);
    }
}
