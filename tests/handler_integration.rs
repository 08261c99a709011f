// End-to-end tests for `ClientHandler` and `ServerHandler` over real
// loopback UDP sockets, covering the Open-Question decisions recorded in
// DESIGN.md that `FragmentHandler::handle` encodes: capability transparency,
// the missing-backend-OPT fallback, and the fragmenting happy path.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use dnsfrag::dns::{EdnsOption, Header, Message, OptRecord, Question, ResourceRecord};
use dnsfrag::handler::{ClientHandler, FragmentHandler, ServerHandler};
use dnsfrag::signal::{read_fragment_descriptor, CAPABILITY_CODE};
use dnsfrag::upstream::RandomSelector;

async fn mock_backend() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

fn client_src() -> SocketAddr {
    "127.0.0.1:9".parse().unwrap()
}

fn question() -> Question {
    Question {
        qname: "example.com".to_string(),
        qtype: 28,
        qclass: 1,
    }
}

fn aaaa_rr(tag: u8) -> ResourceRecord {
    ResourceRecord {
        name: "example.com".to_string(),
        rtype: 28,
        rclass: 1,
        ttl: 300,
        rdata: vec![tag; 16],
    }
}

fn server_handler(backend: SocketAddr) -> ServerHandler {
    ServerHandler {
        upstreams: vec![backend],
        selector: Box::new(RandomSelector),
        timeout: Duration::from_secs(2),
    }
}

fn client_handler(upstream: SocketAddr) -> ClientHandler {
    ClientHandler {
        upstreams: vec![upstream],
        selector: Box::new(RandomSelector),
        timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn server_handler_forwards_unfragmented_when_query_lacks_capability() {
    let (backend, backend_addr) = mock_backend().await;

    let responder = tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        let (len, client_addr) = backend.recv_from(&mut buf).await.unwrap();
        let received = Message::parse(&buf[..len]).unwrap();
        // The backend never sees CAP_CODE: the client proxy didn't add one.
        assert!(received.opt().is_none());

        let mut reply = Message::new(Header {
            id: received.header.id,
            flags: 0x8180,
            qdcount: 1,
            ancount: 1,
            nscount: 0,
            arcount: 0,
        });
        reply.question.push(question());
        reply.answer.push(aaaa_rr(1));
        backend.send_to(&reply.to_bytes(), client_addr).await.unwrap();
    });

    let mut query = Message::new(Header {
        id: 0x10,
        flags: 0x0100,
        qdcount: 1,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    });
    query.question.push(question());
    assert!(query.opt().is_none());

    let handler = server_handler(backend_addr);
    let replies = handler.handle(query, client_src()).await;
    responder.await.unwrap();

    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].answer, vec![aaaa_rr(1)]);
    assert!(read_fragment_descriptor(&replies[0]).is_none());
}

#[tokio::test]
async fn server_handler_forwards_raw_reply_when_backend_opt_is_missing() {
    let (backend, backend_addr) = mock_backend().await;

    let responder = tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        let (len, client_addr) = backend.recv_from(&mut buf).await.unwrap();
        let received = Message::parse(&buf[..len]).unwrap();
        // The incoming query carried CAP_CODE, consumed by the handler
        // before forwarding, so the backend never sees it either.
        assert!(received.opt().is_none());

        let mut reply = Message::new(Header {
            id: received.header.id,
            flags: 0x8180,
            qdcount: 1,
            ancount: 1,
            nscount: 0,
            arcount: 0,
        });
        reply.question.push(question());
        reply.answer.push(aaaa_rr(2));
        // No OPT record at all: fragment() must decline with MissingOpt.
        backend.send_to(&reply.to_bytes(), client_addr).await.unwrap();
    });

    let mut query = Message::new(Header {
        id: 0x20,
        flags: 0x0100,
        qdcount: 1,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    });
    query.question.push(question());
    let mut opt = OptRecord::new(512);
    opt.options.push(EdnsOption {
        code: CAPABILITY_CODE,
        data: vec![],
    });
    query.set_opt(&opt);

    let handler = server_handler(backend_addr);
    let replies = handler.handle(query, client_src()).await;
    responder.await.unwrap();

    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].answer, vec![aaaa_rr(2)]);
    assert!(read_fragment_descriptor(&replies[0]).is_none());
}

#[tokio::test]
async fn server_handler_fragments_oversize_reply_when_query_is_capable() {
    let (backend, backend_addr) = mock_backend().await;

    let responder = tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        let (len, client_addr) = backend.recv_from(&mut buf).await.unwrap();
        let received = Message::parse(&buf[..len]).unwrap();

        let mut reply = Message::new(Header {
            id: received.header.id,
            flags: 0x8180,
            qdcount: 1,
            ancount: 20,
            nscount: 0,
            arcount: 1,
        });
        reply.question.push(question());
        reply.answer = (0..20u8).map(aaaa_rr).collect();
        reply.set_opt(&OptRecord::new(65535));
        backend.send_to(&reply.to_bytes(), client_addr).await.unwrap();
    });

    let mut query = Message::new(Header {
        id: 0x30,
        flags: 0x0100,
        qdcount: 1,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    });
    query.question.push(question());
    let mut opt = OptRecord::new(512);
    opt.options.push(EdnsOption {
        code: CAPABILITY_CODE,
        data: vec![],
    });
    query.set_opt(&opt);

    let handler = server_handler(backend_addr);
    let replies = handler.handle(query, client_src()).await;
    responder.await.unwrap();

    assert!(replies.len() > 1);
    let total = replies.len() as u8;
    for reply in &replies {
        assert!(reply.encoded_len() <= 512);
        let (t, _) = read_fragment_descriptor(reply).unwrap();
        assert_eq!(t, total);
    }
}

#[tokio::test]
async fn client_handler_marks_query_and_reassembles_reply() {
    let (upstream, upstream_addr) = mock_backend().await;

    let responder = tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        let (len, client_addr) = upstream.recv_from(&mut buf).await.unwrap();
        let received = Message::parse(&buf[..len]).unwrap();
        assert!(received
            .opt()
            .unwrap()
            .options
            .iter()
            .any(|o| o.code == CAPABILITY_CODE));

        let mut reply = Message::new(Header {
            id: received.header.id,
            flags: 0x8180,
            qdcount: 1,
            ancount: 1,
            nscount: 0,
            arcount: 0,
        });
        reply.question.push(question());
        reply.answer.push(aaaa_rr(5));
        upstream.send_to(&reply.to_bytes(), client_addr).await.unwrap();
    });

    let mut query = Message::new(Header {
        id: 0x40,
        flags: 0x0100,
        qdcount: 1,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    });
    query.question.push(question());

    let handler = client_handler(upstream_addr);
    let replies = handler.handle(query, client_src()).await;
    responder.await.unwrap();

    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].answer, vec![aaaa_rr(5)]);
}
