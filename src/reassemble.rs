//! The reassembler (client side): stitches a sequence of reply fragments
//! back into a single DNS message, matching RFC 1035 query ID, and enforces
//! the requesting client's own advertised buffer size.

use std::collections::HashMap;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::dns::Message;
use crate::error::FragError;
use crate::signal::{mark_query, read_fragment_descriptor, strip_fragment_descriptor};

/// Sparse collection of a single reply's fragments, indexed by sequence
/// number. `total` is learned from the first fragment received and cross
/// checked against every subsequent one.
#[derive(Debug, Default)]
struct FragmentSet {
    total: Option<u8>,
    frags: HashMap<u8, Message>,
}

impl FragmentSet {
    fn insert(&mut self, total: u8, seq: u8, msg: Message) {
        self.total.get_or_insert(total);
        self.frags.insert(seq, msg);
    }

    fn is_complete(&self) -> bool {
        match self.total {
            Some(total) => (0..total).all(|seq| self.frags.contains_key(&seq)),
            None => false,
        }
    }

    /// Stitch all fragments into one message: fragment 0 supplies the header,
    /// question, and OPT record (its `FRAGMENT_CODE` option already stripped
    /// by the caller); every fragment contributes its answer/authority RRs,
    /// and fragments `1..total` additionally contribute their additional-
    /// section RRs minus OPT (each fragment's OPT beyond the first was
    /// synthesized only for transport and carries no information of its own).
    fn stitch(mut self) -> Option<Message> {
        let total = self.total?;
        let base = self.frags.remove(&0)?;
        let mut out = Message::new(base.header);
        out.question = base.question;
        out.answer = base.answer;
        out.authority = base.authority;
        out.additional = base.additional;

        for seq in 1..total {
            let frag = self.frags.remove(&seq)?;
            out.answer.extend(frag.answer);
            out.authority.extend(frag.authority);
            out.additional
                .extend(frag.additional.into_iter().filter(|rr| !rr.is_opt()));
        }

        Some(out)
    }
}

/// Fold a batch of already-received reply datagrams (all sharing one query's
/// ID) into the final, client-ready message. Pure function over parsed
/// messages; the async I/O loop that collects them lives in
/// [`forward_and_reassemble`].
///
/// - If none of the datagrams carry a `FRAGMENT_CODE` descriptor, the first
///   one is returned unfragmented.
/// - If any does, all datagrams must form a complete set (matching `total`,
///   every `seq` in `0..total` present) or [`FragError::MissingFragment`] is
///   returned.
/// - The stitched reply is checked against `client_buffer`; if it would
///   exceed it, an empty TC-truncated reply is returned instead — this is
///   the caller-visible contract, independent of transport.
fn reassemble_replies(replies: Vec<Message>, client_buffer: u16) -> Result<Message, FragError> {
    let mut unfragmented = None;
    let mut set = FragmentSet::default();
    let mut saw_fragment = false;

    for mut reply in replies {
        match read_fragment_descriptor(&reply) {
            Some((total, seq)) => {
                saw_fragment = true;
                strip_fragment_descriptor(&mut reply);
                set.insert(total, seq, reply);
            }
            None => {
                if unfragmented.is_none() {
                    unfragmented = Some(reply);
                }
            }
        }
    }

    let mut stitched = if saw_fragment {
        if !set.is_complete() {
            let missing = set
                .total
                .map(|total| (0..total).find(|seq| !set.frags.contains_key(seq)).unwrap_or(0))
                .unwrap_or(0);
            return Err(FragError::MissingFragment(missing));
        }
        set.stitch().ok_or(FragError::MissingFragment(0))?
    } else {
        unfragmented.ok_or(FragError::Timeout)?
    };

    if stitched.encoded_len() > client_buffer as usize {
        stitched.truncate_empty();
    }

    Ok(stitched)
}

/// Send `query` to `upstream`, marking it fragmentation-capable, and collect
/// reply datagrams until either a complete (possibly single, unfragmented)
/// reply has been assembled or `deadline` elapses. A fresh UDP socket is
/// bound for this call alone and dropped on every exit path, so concurrent
/// transactions never share a socket and cannot collide on DNS ID. On
/// timeout or any I/O failure, returns a SERVFAIL carrying the query's
/// original ID.
pub async fn forward_and_reassemble(
    upstream: std::net::SocketAddr,
    mut query: Message,
    deadline: Duration,
) -> Message {
    let query_id = query.header.id;
    let client_buffer = mark_query(&mut query);

    let result = timeout(deadline, exchange(upstream, &query)).await;

    match result {
        Ok(Ok(replies)) => match reassemble_replies(replies, client_buffer) {
            Ok(msg) => msg,
            Err(_) => Message::servfail(query_id),
        },
        Ok(Err(_)) | Err(_) => Message::servfail(query_id),
    }
}

async fn exchange(upstream: std::net::SocketAddr, query: &Message) -> std::io::Result<Vec<Message>> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    collect_replies(&socket, upstream, query).await
}

/// Send `query` once and read datagrams from `upstream` until a complete set
/// of fragments (or a single unfragmented reply) has arrived, matching the
/// query's DNS ID. No per-datagram timeout is applied here; the caller wraps
/// the whole exchange in one overall deadline.
async fn collect_replies(
    socket: &UdpSocket,
    upstream: std::net::SocketAddr,
    query: &Message,
) -> std::io::Result<Vec<Message>> {
    let wire = query.to_bytes();
    socket.send_to(&wire, upstream).await?;

    let query_id = query.header.id;
    let mut buf = vec![0u8; 65535];
    let mut seen: HashMap<u8, Message> = HashMap::new();

    loop {
        let (len, _) = socket.recv_from(&mut buf).await?;
        let Ok(reply) = Message::parse(&buf[..len]) else {
            continue;
        };
        if reply.header.id != query_id || !reply.header.is_response() {
            continue;
        }

        match read_fragment_descriptor(&reply) {
            Some((total, seq)) => {
                seen.insert(seq, reply);
                if seen.len() >= total as usize {
                    return Ok(seen.into_values().collect());
                }
            }
            None => return Ok(vec![reply]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{EdnsOption, Header, OptRecord, Question, ResourceRecord};
    use crate::signal::FRAGMENT_CODE;

    fn header(id: u16) -> Header {
        Header {
            id,
            flags: 0x8180,
            qdcount: 1,
            ancount: 0,
            nscount: 0,
            arcount: 0,
        }
    }

    fn question() -> Question {
        Question {
            qname: "example.com".to_string(),
            qtype: 28,
            qclass: 1,
        }
    }

    fn fragment_msg(id: u16, total: u8, seq: u8, rrs: Vec<ResourceRecord>) -> Message {
        let mut msg = Message::new(header(id));
        msg.question.push(question());
        msg.answer = rrs;
        let mut opt = OptRecord::new(4096);
        opt.options.push(EdnsOption {
            code: FRAGMENT_CODE,
            data: vec![total, seq],
        });
        msg.set_opt(&opt);
        msg
    }

    fn rr(tag: u8) -> ResourceRecord {
        ResourceRecord {
            name: "example.com".into(),
            rtype: 28,
            rclass: 1,
            ttl: 300,
            rdata: vec![tag; 16],
        }
    }

    #[test]
    fn unfragmented_reply_passes_through() {
        let mut msg = Message::new(header(1));
        msg.question.push(question());
        msg.answer.push(rr(1));
        let stitched = reassemble_replies(vec![msg.clone()], 4096).unwrap();
        assert_eq!(stitched.answer, msg.answer);
    }

    #[test]
    fn complete_fragment_set_stitches_in_order() {
        let f0 = fragment_msg(1, 3, 0, vec![rr(0)]);
        let f1 = fragment_msg(1, 3, 1, vec![rr(1)]);
        let f2 = fragment_msg(1, 3, 2, vec![rr(2)]);
        let stitched = reassemble_replies(vec![f2, f0, f1], 4096).unwrap();
        assert_eq!(stitched.answer, vec![rr(0), rr(1), rr(2)]);
        assert!(!stitched.header.truncated());
        assert!(read_fragment_descriptor(&stitched).is_none());
    }

    #[test]
    fn missing_fragment_zero_is_reported() {
        let f1 = fragment_msg(1, 2, 1, vec![rr(1)]);
        let err = reassemble_replies(vec![f1], 4096).unwrap_err();
        assert!(matches!(err, FragError::MissingFragment(0)));
    }

    #[test]
    fn missing_middle_fragment_is_reported() {
        let f0 = fragment_msg(1, 3, 0, vec![rr(0)]);
        let f2 = fragment_msg(1, 3, 2, vec![rr(2)]);
        let err = reassemble_replies(vec![f0, f2], 4096).unwrap_err();
        assert!(matches!(err, FragError::MissingFragment(1)));
    }

    #[test]
    fn duplicate_fragment_keeps_latest() {
        let f0 = fragment_msg(1, 2, 0, vec![rr(0)]);
        let f1a = fragment_msg(1, 2, 1, vec![rr(1)]);
        let f1b = fragment_msg(1, 2, 1, vec![rr(9)]);
        let stitched = reassemble_replies(vec![f0, f1a, f1b], 4096).unwrap();
        assert_eq!(stitched.answer, vec![rr(0), rr(9)]);
    }

    #[test]
    fn stitched_reply_keeps_backend_opt_minus_fragment_code() {
        let f0 = fragment_msg(1, 2, 0, vec![rr(0)]);
        let f1 = fragment_msg(1, 2, 1, vec![rr(1)]);
        let stitched = reassemble_replies(vec![f0, f1], 4096).unwrap();
        let opt = stitched.opt().expect("backend OPT must survive reassembly");
        assert_eq!(opt.udp_payload_size, 4096);
        assert!(read_fragment_descriptor(&stitched).is_none());
    }

    #[test]
    fn oversize_stitched_reply_is_truncated_to_client_buffer() {
        let f0 = fragment_msg(1, 1, 0, vec![rr(0)]);
        let stitched = reassemble_replies(vec![f0], 16).unwrap();
        assert!(stitched.header.truncated());
        assert!(stitched.answer.is_empty());
    }
}
