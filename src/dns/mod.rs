//! Minimal DNS wire codec: header, questions, resource records, and the
//! EDNS0 OPT pseudo-RR, with encoded-length accounting.
//!
//! The fragmenter and reassembler never interpret RDATA, so RRs are carried
//! as opaque blobs; only the OPT record gets structured treatment since the
//! fragmentation capability signal lives inside it.

pub mod message;

pub use message::{EdnsOption, Header, Message, OptRecord, Question, ResourceRecord};
