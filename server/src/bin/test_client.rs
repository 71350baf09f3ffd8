use clap::Parser;
use protocol::packets::{
    CarConnect, ChatMessage, ChecksumPacket, HandshakeRequest, PongResponse, ServerTcpMessage,
    ServerUdpMessage,
};
use protocol::{FrameReader, LengthPrefix, OutgoingPacket, MAX_DATAGRAM, MAX_TCP_FRAME, PROTOCOL_VERSION};
use server::checksum::md5_digest;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

/// Headless client that joins a server, answers pings and prints what it receives
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server TCP address
    #[clap(short, long, default_value = "127.0.0.1:9600")]
    server: SocketAddr,
    /// Driver name
    #[clap(short, long, default_value = "probe")]
    name: String,
    /// Car model to request
    #[clap(short, long, default_value = "car_a")]
    car: String,
    /// Steam id reported in the handshake
    #[clap(long, default_value = "76561198000000000")]
    guid: u64,
    /// Server password
    #[clap(short, long, default_value = "")]
    password: String,
    /// Content files to checksum, in the server's order
    #[clap(long)]
    checksum: Vec<PathBuf>,
    /// Chat message sent once connected
    #[clap(long)]
    chat: Option<String>,
    /// Seconds to stay connected
    #[clap(short, long, default_value = "10")]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let stream = TcpStream::connect(args.server).await?;
    println!("Connected to {}", args.server);
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, LengthPrefix::U16, MAX_TCP_FRAME);

    let handshake = HandshakeRequest {
        client_version: PROTOCOL_VERSION,
        guid: args.guid,
        name: args.name.clone(),
        team: String::new(),
        nation: "ITA".to_string(),
        requested_car: args.car.clone(),
        password: args.password.clone(),
        features: None,
        session_ticket: None,
    };
    write_half.write_all(&handshake.to_frame()?).await?;

    let response = match reader.read_frame().await? {
        Some(payload) => ServerTcpMessage::decode(payload)?,
        None => return Err("server closed the connection during handshake".into()),
    };
    let response = match response {
        ServerTcpMessage::HandshakeResponse(response) => response,
        ServerTcpMessage::Rejected(rejection) => {
            println!("Handshake rejected: {:?}", rejection);
            return Ok(());
        }
        other => return Err(format!("unexpected handshake reply: {:?}", other).into()),
    };

    println!(
        "Joined '{}' on {} as session {} in {} ({} cars, {} checksums)",
        response.server_name,
        response.track,
        response.session_id,
        response.car_model,
        response.cars.len(),
        response.checksum_count
    );
    for car in &response.cars {
        println!(
            "  slot {}: {} {}",
            car.session_id,
            car.model,
            if car.connected { car.driver_name.as_str() } else { "(free)" }
        );
    }

    if response.checksum_count > 0 {
        let mut digests = Vec::with_capacity(args.checksum.len());
        for path in &args.checksum {
            digests.push(md5_digest(&std::fs::read(path)?));
        }
        write_half.write_all(&ChecksumPacket { digests }.to_frame()?).await?;
    }

    let udp_target = SocketAddr::new(args.server.ip(), response.udp_port);
    let udp = UdpSocket::bind(if udp_target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }).await?;
    udp.send_to(
        &CarConnect { session_id: response.session_id }.to_datagram()?,
        udp_target,
    )
    .await?;

    if let Some(message) = &args.chat {
        let chat = ChatMessage {
            session_id: response.session_id,
            message: message.clone(),
        };
        write_half.write_all(&chat.to_frame()?).await?;
    }

    let started = Instant::now();
    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);
    let mut buffer = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            frame = reader.read_frame() => {
                let Some(payload) = frame? else {
                    println!("Server closed the connection");
                    break;
                };
                match ServerTcpMessage::decode(payload) {
                    Ok(ServerTcpMessage::KickCar(kick)) if kick.session_id == response.session_id => {
                        println!("Kicked: {:?}", kick.reason);
                    }
                    Ok(message) => println!("TCP: {:?}", message),
                    Err(e) => println!("Undecodable TCP frame: {}", e),
                }
            }
            received = udp.recv_from(&mut buffer) => {
                let (len, _) = received?;
                match ServerUdpMessage::decode(&buffer[..len]) {
                    Ok(ServerUdpMessage::Ping(ping)) => {
                        let pong = PongResponse {
                            server_time: ping.server_time,
                            client_time: started.elapsed().as_millis() as u32,
                        };
                        udp.send_to(&pong.to_datagram()?, udp_target).await?;
                        println!("Ping: server time {} ms, last ping {} ms", ping.server_time, ping.last_ping);
                    }
                    Ok(ServerUdpMessage::CarConnect(connect)) => {
                        println!("UDP associated for session {}", connect.session_id);
                    }
                    Ok(ServerUdpMessage::Positions(batch)) => {
                        println!("Positions: {} cars at {} ms", batch.updates.len(), batch.server_time);
                    }
                    Err(e) => println!("Undecodable datagram: {}", e),
                }
            }
        }
    }

    write_half.shutdown().await?;
    println!("Disconnected");
    Ok(())
}
