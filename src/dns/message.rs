//! DNS message header, question, resource record, and OPT pseudo-RR codec.
//!
//! Parsing happens over a `Cursor` positioned on the *whole* message buffer
//! (not just the remaining tail) so that name-compression pointers, which
//! are absolute offsets from the start of the message, can be followed by
//! seeking the cursor. Names are written without compression — the crate
//! deliberately does not attempt RFC 1035 §4.1.4 compression on the write
//! path (see `SPEC_FULL.md` §1).

use bytes::{Buf, BufMut, BytesMut};
use std::io::Cursor;
use thiserror::Error;

/// OPT pseudo-RR type (RFC 6891).
pub const OPT_RTYPE: u16 = 41;

const MAX_LABEL_HOPS: usize = 32;

#[derive(Debug, Error)]
pub enum DnsMessageError {
    #[error("truncated message: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },
    #[error("domain name exceeds compression-hop limit")]
    NameTooManyHops,
    #[error("label length byte {0:#x} is neither a length nor a compression pointer")]
    BadLabel(u8),
}

type Result<T> = std::result::Result<T, DnsMessageError>;

/// The 12-byte DNS message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub flags: u16,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

const FLAG_QR: u16 = 0x8000;
const FLAG_TC: u16 = 0x0200;
const FLAG_RCODE_MASK: u16 = 0x000f;

impl Header {
    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }

    pub fn truncated(&self) -> bool {
        self.flags & FLAG_TC != 0
    }

    pub fn set_truncated(&mut self, tc: bool) {
        if tc {
            self.flags |= FLAG_TC;
        } else {
            self.flags &= !FLAG_TC;
        }
    }

    pub fn rcode(&self) -> u8 {
        (self.flags & FLAG_RCODE_MASK) as u8
    }

    pub fn set_rcode(&mut self, rcode: u8) {
        self.flags = (self.flags & !FLAG_RCODE_MASK) | (rcode as u16 & FLAG_RCODE_MASK);
    }

    fn parse(buf: &mut Cursor<&[u8]>) -> Result<Self> {
        need(buf, 12)?;
        Ok(Self {
            id: buf.get_u16(),
            flags: buf.get_u16(),
            qdcount: buf.get_u16(),
            ancount: buf.get_u16(),
            nscount: buf.get_u16(),
            arcount: buf.get_u16(),
        })
    }

    fn write(&self, out: &mut BytesMut) {
        out.put_u16(self.id);
        out.put_u16(self.flags);
        out.put_u16(self.qdcount);
        out.put_u16(self.ancount);
        out.put_u16(self.nscount);
        out.put_u16(self.arcount);
    }
}

/// A question-section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl Question {
    fn parse(whole: &[u8], buf: &mut Cursor<&[u8]>) -> Result<Self> {
        let qname = read_name(whole, buf)?;
        need(buf, 4)?;
        Ok(Self {
            qname,
            qtype: buf.get_u16(),
            qclass: buf.get_u16(),
        })
    }

    fn write(&self, out: &mut BytesMut) {
        write_name(&self.qname, out);
        out.put_u16(self.qtype);
        out.put_u16(self.qclass);
    }
}

/// A generic resource record. RDATA is carried opaquely — the fragmenter and
/// reassembler move whole RRs between sections without interpreting them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: String,
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl ResourceRecord {
    fn parse(whole: &[u8], buf: &mut Cursor<&[u8]>) -> Result<Self> {
        let name = read_name(whole, buf)?;
        need(buf, 10)?;
        let rtype = buf.get_u16();
        let rclass = buf.get_u16();
        let ttl = buf.get_u32();
        let rdlen = buf.get_u16() as usize;
        need(buf, rdlen)?;
        let mut rdata = vec![0u8; rdlen];
        buf.copy_to_slice(&mut rdata);
        Ok(Self {
            name,
            rtype,
            rclass,
            ttl,
            rdata,
        })
    }

    fn write(&self, out: &mut BytesMut) {
        write_name(&self.name, out);
        out.put_u16(self.rtype);
        out.put_u16(self.rclass);
        out.put_u32(self.ttl);
        out.put_u16(self.rdata.len() as u16);
        out.put_slice(&self.rdata);
    }

    /// Encoded size of this RR if it were appended to a message, in octets.
    pub fn encoded_len(&self) -> usize {
        let mut out = BytesMut::new();
        self.write(&mut out);
        out.len()
    }

    pub fn is_opt(&self) -> bool {
        self.rtype == OPT_RTYPE
    }
}

/// A single EDNS0 option: `(code, data)` per RFC 6891 §6.1.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdnsOption {
    pub code: u16,
    pub data: Vec<u8>,
}

/// Structured view of the OPT pseudo-RR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptRecord {
    pub udp_payload_size: u16,
    pub extended_rcode: u8,
    pub version: u8,
    pub dnssec_ok: bool,
    pub options: Vec<EdnsOption>,
}

impl Default for OptRecord {
    fn default() -> Self {
        Self {
            udp_payload_size: 512,
            extended_rcode: 0,
            version: 0,
            dnssec_ok: false,
            options: Vec::new(),
        }
    }
}

impl OptRecord {
    pub fn new(udp_payload_size: u16) -> Self {
        Self {
            udp_payload_size,
            ..Default::default()
        }
    }

    /// Encode this OPT record's TTL field (extended RCODE + version + flags).
    fn ttl(&self) -> u32 {
        let mut ttl = (self.extended_rcode as u32) << 24 | (self.version as u32) << 16;
        if self.dnssec_ok {
            ttl |= 0x8000;
        }
        ttl
    }

    fn rdata(&self) -> Vec<u8> {
        let mut data = Vec::new();
        for opt in &self.options {
            data.extend_from_slice(&opt.code.to_be_bytes());
            data.extend_from_slice(&(opt.data.len() as u16).to_be_bytes());
            data.extend_from_slice(&opt.data);
        }
        data
    }

    pub fn to_rr(&self) -> ResourceRecord {
        ResourceRecord {
            name: String::new(),
            rtype: OPT_RTYPE,
            rclass: self.udp_payload_size,
            ttl: self.ttl(),
            rdata: self.rdata(),
        }
    }

    pub fn from_rr(rr: &ResourceRecord) -> Option<Self> {
        if rr.rtype != OPT_RTYPE {
            return None;
        }
        let extended_rcode = ((rr.ttl >> 24) & 0xff) as u8;
        let version = ((rr.ttl >> 16) & 0xff) as u8;
        let dnssec_ok = rr.ttl & 0x8000 != 0;
        let mut options = Vec::new();
        let mut i = 0usize;
        while i + 4 <= rr.rdata.len() {
            let code = u16::from_be_bytes([rr.rdata[i], rr.rdata[i + 1]]);
            let len = u16::from_be_bytes([rr.rdata[i + 2], rr.rdata[i + 3]]) as usize;
            i += 4;
            if i + len > rr.rdata.len() {
                break;
            }
            options.push(EdnsOption {
                code,
                data: rr.rdata[i..i + len].to_vec(),
            });
            i += len;
        }
        Some(Self {
            udp_payload_size: rr.rclass,
            extended_rcode,
            version,
            dnssec_ok,
            options,
        })
    }
}

/// A parsed DNS message. Only the question and the three RR sections are
/// kept as structured vectors; the additional section includes the OPT RR
/// (if any) like any other RR — use [`Message::opt`]/[`Message::set_opt`] to
/// work with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub question: Vec<Question>,
    pub answer: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Message {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            question: Vec::new(),
            answer: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let mut header = Header::parse(&mut cursor)?;

        let mut question = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            question.push(Question::parse(data, &mut cursor)?);
        }
        let mut answer = Vec::with_capacity(header.ancount as usize);
        for _ in 0..header.ancount {
            answer.push(ResourceRecord::parse(data, &mut cursor)?);
        }
        let mut authority = Vec::with_capacity(header.nscount as usize);
        for _ in 0..header.nscount {
            authority.push(ResourceRecord::parse(data, &mut cursor)?);
        }
        let mut additional = Vec::with_capacity(header.arcount as usize);
        for _ in 0..header.arcount {
            additional.push(ResourceRecord::parse(data, &mut cursor)?);
        }

        // Counts are recomputed on write; the parsed values only drive the
        // loop bounds above.
        header.qdcount = question.len() as u16;
        header.ancount = answer.len() as u16;
        header.nscount = authority.len() as u16;
        header.arcount = additional.len() as u16;

        Ok(Self {
            header,
            question,
            answer,
            authority,
            additional,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(512);
        let mut header = self.header;
        header.qdcount = self.question.len() as u16;
        header.ancount = self.answer.len() as u16;
        header.nscount = self.authority.len() as u16;
        header.arcount = self.additional.len() as u16;
        header.write(&mut out);

        for q in &self.question {
            q.write(&mut out);
        }
        for rr in &self.answer {
            rr.write(&mut out);
        }
        for rr in &self.authority {
            rr.write(&mut out);
        }
        for rr in &self.additional {
            rr.write(&mut out);
        }
        out.to_vec()
    }

    /// Total encoded length in octets.
    pub fn encoded_len(&self) -> usize {
        self.to_bytes().len()
    }

    /// The OPT record carried in the additional section, if any.
    pub fn opt(&self) -> Option<OptRecord> {
        self.additional.iter().find(|rr| rr.is_opt()).and_then(OptRecord::from_rr)
    }

    /// Replace (or insert) the OPT record in the additional section.
    pub fn set_opt(&mut self, opt: &OptRecord) {
        let rr = opt.to_rr();
        if let Some(slot) = self.additional.iter_mut().find(|rr| rr.is_opt()) {
            *slot = rr;
        } else {
            self.additional.push(rr);
        }
    }

    /// Remove the OPT record from the additional section, if present.
    pub fn remove_opt(&mut self) {
        self.additional.retain(|rr| !rr.is_opt());
    }

    /// Clear all RR sections and set TC, used for both the fragmenter's
    /// single-RR-overflow case and the reassembler's buffer-overflow case.
    pub fn truncate_empty(&mut self) {
        self.answer.clear();
        self.authority.clear();
        self.additional.clear();
        self.header.set_truncated(true);
    }

    /// A SERVFAIL response carrying the original ID and an empty body.
    pub fn servfail(query_id: u16) -> Self {
        let mut header = Header {
            id: query_id,
            flags: FLAG_QR,
            qdcount: 0,
            ancount: 0,
            nscount: 0,
            arcount: 0,
        };
        header.set_rcode(2);
        Self::new(header)
    }
}

fn need(buf: &Cursor<&[u8]>, n: usize) -> Result<()> {
    if buf.remaining() < n {
        Err(DnsMessageError::Truncated {
            needed: n,
            available: buf.remaining(),
        })
    } else {
        Ok(())
    }
}

/// Read a (possibly compressed) domain name, returning the dot-joined label
/// sequence (without a trailing dot; the root name is the empty string).
fn read_name(whole: &[u8], buf: &mut Cursor<&[u8]>) -> Result<String> {
    let mut labels: Vec<String> = Vec::new();
    let mut hops = 0usize;
    // Track whether we've jumped via a pointer; the cursor only needs to be
    // restored past the *first* pointer (later pointers are jumps within a
    // jump and don't need unwinding).
    let mut return_to: Option<u64> = None;

    loop {
        need(buf, 1)?;
        let len = buf.get_u8();

        if len == 0 {
            break;
        } else if len & 0xc0 == 0xc0 {
            need(buf, 1)?;
            let lo = buf.get_u8();
            let pointer = (((len & 0x3f) as u16) << 8 | lo as u16) as usize;
            if return_to.is_none() {
                return_to = Some(buf.position());
            }
            hops += 1;
            if hops > MAX_LABEL_HOPS {
                return Err(DnsMessageError::NameTooManyHops);
            }
            if pointer >= whole.len() {
                return Err(DnsMessageError::Truncated {
                    needed: pointer + 1,
                    available: whole.len(),
                });
            }
            *buf = Cursor::new(whole);
            buf.set_position(pointer as u64);
        } else if len & 0xc0 != 0 {
            return Err(DnsMessageError::BadLabel(len));
        } else {
            let label_len = len as usize;
            need(buf, label_len)?;
            let mut label = vec![0u8; label_len];
            buf.copy_to_slice(&mut label);
            labels.push(String::from_utf8_lossy(&label).into_owned());
        }
    }

    if let Some(pos) = return_to {
        *buf = Cursor::new(whole);
        buf.set_position(pos);
    }

    Ok(labels.join("."))
}

/// Write a domain name without compression.
fn write_name(name: &str, out: &mut BytesMut) {
    if !name.is_empty() {
        for label in name.split('.') {
            out.put_u8(label.len() as u8);
            out.put_slice(label.as_bytes());
        }
    }
    out.put_u8(0);
}
