//! UDP and TCP DNS listeners, shared between both proxy roles. A single
//! `Arc<dyn FragmentHandler>` is registered for both transports; each
//! incoming datagram or connection is serviced on its own spawned task, per
//! the stateless-and-re-entrant handler model.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};

use crate::access::AccessList;
use crate::dns::Message;
use crate::handler::FragmentHandler;

const MAX_UDP_DATAGRAM: usize = 65535;

/// Bind a UDP socket at `bind_addr` and service datagrams until the process
/// exits or the socket errors out irrecoverably.
pub async fn run_udp(
    bind_addr: SocketAddr,
    access: Arc<AccessList>,
    handler: Arc<dyn FragmentHandler>,
) -> std::io::Result<()> {
    let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
    log::info!("UDP listener bound on {}", bind_addr);

    let mut buf = vec![0u8; MAX_UDP_DATAGRAM];
    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                log::error!("UDP recv_from error on {}: {}", bind_addr, e);
                continue;
            }
        };

        if !access.allows(src.ip()) {
            log::debug!("dropping UDP query from disallowed source {}", src);
            continue;
        }

        let query = match Message::parse(&buf[..len]) {
            Ok(m) => m,
            Err(e) => {
                log::debug!("discarding malformed UDP query from {}: {}", src, e);
                continue;
            }
        };

        let socket = socket.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            for reply in handler.handle(query, src).await {
                if let Err(e) = socket.send_to(&reply.to_bytes(), src).await {
                    log::error!("UDP send_to {} failed: {}", src, e);
                }
            }
        });
    }
}

/// Accept TCP connections at `bind_addr` and service each with the same
/// handler, using the 2-byte length-prefixed framing of RFC 1035 §4.2.2.
pub async fn run_tcp(
    bind_addr: SocketAddr,
    access: Arc<AccessList>,
    handler: Arc<dyn FragmentHandler>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    log::info!("TCP listener bound on {}", bind_addr);

    loop {
        let (stream, src) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                log::error!("TCP accept error on {}: {}", bind_addr, e);
                continue;
            }
        };

        if !access.allows(src.ip()) {
            log::debug!("closing TCP connection from disallowed source {}", src);
            continue;
        }

        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_tcp_connection(stream, src, handler).await {
                log::debug!("TCP connection from {} ended: {}", src, e);
            }
        });
    }
}

async fn handle_tcp_connection(
    mut stream: tokio::net::TcpStream,
    src: SocketAddr,
    handler: Arc<dyn FragmentHandler>,
) -> std::io::Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return Ok(());
        }
        let len = u16::from_be_bytes(len_buf) as usize;

        let mut msg_buf = vec![0u8; len];
        stream.read_exact(&mut msg_buf).await?;

        let Ok(query) = Message::parse(&msg_buf) else {
            log::debug!("discarding malformed TCP query from {}", src);
            continue;
        };

        for reply in handler.handle(query, src).await {
            let wire = reply.to_bytes();
            stream.write_all(&(wire.len() as u16).to_be_bytes()).await?;
            stream.write_all(&wire).await?;
        }
    }
}
