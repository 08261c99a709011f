//! The two `FragmentHandler` implementations. The listener code in
//! `listener` is generic over `Arc<dyn FragmentHandler>`, so the same
//! UDP/TCP bootstrap serves both proxy roles.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::dns::Message;
use crate::fragment::fragment;
use crate::reassemble::forward_and_reassemble;
use crate::signal::consume_capability;
use crate::upstream::UpstreamSelector;

/// A stateless, re-entrant query handler. Every invocation runs the full
/// pipeline against a fresh backend connection; no per-request state is
/// shared across calls.
#[async_trait]
pub trait FragmentHandler: Send + Sync {
    /// Handle one incoming query from `src` and return the wire messages to
    /// send back, in order. A non-fragmenting handler always returns exactly
    /// one message; the server-side fragmenter may return several.
    async fn handle(&self, query: Message, src: SocketAddr) -> Vec<Message>;
}

/// Client-proxy side: marks the query fragmentation-capable, forwards it to
/// one of the configured upstreams, and reassembles the reply.
pub struct ClientHandler {
    pub upstreams: Vec<SocketAddr>,
    pub selector: Box<dyn UpstreamSelector>,
    pub timeout: Duration,
}

#[async_trait]
impl FragmentHandler for ClientHandler {
    async fn handle(&self, query: Message, _src: SocketAddr) -> Vec<Message> {
        let upstream = *self.selector.select(&self.upstreams);
        let reply = forward_and_reassemble(upstream, query, self.timeout).await;
        vec![reply]
    }
}

/// Server-proxy side: strips the capability signal from the query (if
/// present), forwards to the backend resolver, and fragments an oversize
/// reply when the query asked for it.
pub struct ServerHandler {
    pub upstreams: Vec<SocketAddr>,
    pub selector: Box<dyn UpstreamSelector>,
    pub timeout: Duration,
}

#[async_trait]
impl FragmentHandler for ServerHandler {
    async fn handle(&self, mut query: Message, _src: SocketAddr) -> Vec<Message> {
        let query_id = query.header.id;
        let capable = consume_capability(&mut query);
        let upstream = *self.selector.select(&self.upstreams);

        let reply = match exchange_once(upstream, &query, self.timeout).await {
            Some(reply) => reply,
            None => return vec![Message::servfail(query_id)],
        };

        if !capable {
            return vec![reply];
        }

        match fragment(&reply) {
            Ok(frags) => frags,
            Err(_) => vec![reply],
        }
    }
}

/// A single request/reply exchange over a dedicated ephemeral socket,
/// bounded by `deadline`. Returns `None` on I/O failure, timeout, or a
/// mismatched/malformed reply.
async fn exchange_once(upstream: SocketAddr, query: &Message, deadline: Duration) -> Option<Message> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await.ok()?;
    let wire = query.to_bytes();

    tokio::time::timeout(deadline, async {
        socket.send_to(&wire, upstream).await?;
        let mut buf = vec![0u8; 65535];
        loop {
            let (len, _) = socket.recv_from(&mut buf).await?;
            if let Ok(reply) = Message::parse(&buf[..len]) {
                if reply.header.id == query.header.id && reply.header.is_response() {
                    return Ok::<_, std::io::Error>(reply);
                }
            }
        }
    })
    .await
    .ok()?
    .ok()
}
