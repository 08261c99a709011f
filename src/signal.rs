//! The fragmentation capability signal: a single EDNS0 local-use option used
//! in two roles — a zero-length capability marker on queries, and a
//! 2-octet fragment descriptor on reply fragments.
//!
//! `CAPABILITY_CODE` and `FRAGMENT_CODE` are taken from IANA's EDNS0
//! local/experimental range (65001-65534); `FRAGMENT_CODE` is defined as
//! `CAPABILITY_CODE + 1`.

use crate::dns::{EdnsOption, Message, OptRecord};

/// "I support reassembly of fragmented replies." Present with empty data on
/// queries sent upstream by the client proxy.
pub const CAPABILITY_CODE: u16 = 65001;

/// Fragment descriptor: exactly two octets, `[total_fragments, sequence_number]`.
pub const FRAGMENT_CODE: u16 = CAPABILITY_CODE + 1;

/// Default UDP payload size to advertise for a client proxy's own OPT record
/// when the query carried none.
const DEFAULT_CLIENT_UDP_SIZE: u16 = 512;

/// Raised UDP payload size advertised to the backend once capability is
/// consumed, so the backend resolver returns the complete unfragmented
/// answer rather than truncating at 512.
const BACKEND_UDP_SIZE: u16 = 65535;

/// Mark `msg` (a query) as fragmentation-capable: ensure it carries an OPT
/// record and append a `CAPABILITY_CODE` option with empty data.
///
/// Returns the UDP payload size the message advertised *before* this call —
/// the client's own declared buffer, defaulting to 512 if no OPT was
/// present — so the caller (the reassembler) can later enforce it against
/// the reassembled reply.
pub fn mark_query(msg: &mut Message) -> u16 {
    let mut opt = msg.opt().unwrap_or_else(|| OptRecord::new(DEFAULT_CLIENT_UDP_SIZE));
    let client_buffer = opt.udp_payload_size;
    opt.options.push(EdnsOption {
        code: CAPABILITY_CODE,
        data: Vec::new(),
    });
    msg.set_opt(&opt);
    client_buffer
}

/// Scan `msg`'s OPT options for a `CAPABILITY_CODE` entry. If present, remove
/// it (only the first) and raise the OPT's advertised UDP size to
/// `BACKEND_UDP_SIZE`, returning `true`. Otherwise return `false` and leave
/// `msg` untouched.
pub fn consume_capability(msg: &mut Message) -> bool {
    let Some(mut opt) = msg.opt() else {
        return false;
    };
    let Some(pos) = opt.options.iter().position(|o| o.code == CAPABILITY_CODE) else {
        return false;
    };
    opt.options.remove(pos);
    opt.udp_payload_size = BACKEND_UDP_SIZE;
    msg.set_opt(&opt);
    true
}

/// Scan `msg`'s OPT options for a `FRAGMENT_CODE` entry and parse its two
/// data octets as `(total_fragments, sequence_number)`.
pub fn read_fragment_descriptor(msg: &Message) -> Option<(u8, u8)> {
    let opt = msg.opt()?;
    let frag = opt.options.iter().find(|o| o.code == FRAGMENT_CODE)?;
    if frag.data.len() != 2 {
        return None;
    }
    Some((frag.data[0], frag.data[1]))
}

/// Remove the `FRAGMENT_CODE` option from `msg`'s OPT record, if present.
/// Used by the reassembler before delivering the stitched-together reply.
pub fn strip_fragment_descriptor(msg: &mut Message) {
    let Some(mut opt) = msg.opt() else {
        return;
    };
    let before = opt.options.len();
    opt.options.retain(|o| o.code != FRAGMENT_CODE);
    if opt.options.len() != before {
        msg.set_opt(&opt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::Header;

    fn query() -> Message {
        Message::new(Header {
            id: 1,
            flags: 0x0100,
            qdcount: 0,
            ancount: 0,
            nscount: 0,
            arcount: 0,
        })
    }

    #[test]
    fn mark_query_adds_opt_and_capability_option() {
        let mut msg = query();
        let buffer = mark_query(&mut msg);
        assert_eq!(buffer, DEFAULT_CLIENT_UDP_SIZE);
        let opt = msg.opt().unwrap();
        assert!(opt.options.iter().any(|o| o.code == CAPABILITY_CODE && o.data.is_empty()));
    }

    #[test]
    fn mark_query_preserves_existing_client_buffer() {
        let mut msg = query();
        msg.set_opt(&OptRecord::new(4096));
        let buffer = mark_query(&mut msg);
        assert_eq!(buffer, 4096);
    }

    #[test]
    fn consume_capability_removes_option_and_raises_udp_size() {
        let mut msg = query();
        mark_query(&mut msg);
        assert!(consume_capability(&mut msg));
        let opt = msg.opt().unwrap();
        assert!(!opt.options.iter().any(|o| o.code == CAPABILITY_CODE));
        assert_eq!(opt.udp_payload_size, BACKEND_UDP_SIZE);
    }

    #[test]
    fn consume_capability_false_when_absent() {
        let mut msg = query();
        assert!(!consume_capability(&mut msg));
    }

    #[test]
    fn read_fragment_descriptor_round_trip() {
        let mut msg = query();
        let mut opt = OptRecord::new(512);
        opt.options.push(EdnsOption {
            code: FRAGMENT_CODE,
            data: vec![3, 1],
        });
        msg.set_opt(&opt);
        assert_eq!(read_fragment_descriptor(&msg), Some((3, 1)));
    }

    #[test]
    fn read_fragment_descriptor_none_without_opt() {
        let msg = query();
        assert_eq!(read_fragment_descriptor(&msg), None);
    }

    #[test]
    fn strip_fragment_descriptor_removes_only_frag_option() {
        let mut msg = query();
        let mut opt = OptRecord::new(512);
        opt.options.push(EdnsOption {
            code: FRAGMENT_CODE,
            data: vec![1, 0],
        });
        opt.options.push(EdnsOption {
            code: CAPABILITY_CODE,
            data: vec![],
        });
        msg.set_opt(&opt);
        strip_fragment_descriptor(&mut msg);
        let opt = msg.opt().unwrap();
        assert!(!opt.options.iter().any(|o| o.code == FRAGMENT_CODE));
        assert!(opt.options.iter().any(|o| o.code == CAPABILITY_CODE));
    }
}
