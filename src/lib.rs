//! dnsfrag: application-level DNS message fragmentation
//!
//! Large DNS replies (DNSSEC, AAAA sets) exceed common MTU boundaries and
//! suffer IP-layer fragmentation, which middleboxes frequently drop. This
//! crate fragments *inside* the DNS protocol instead: an oversize reply is
//! split into a sequence of self-contained DNS messages, each carrying a
//! custom EDNS0 option describing its place in the sequence, so every
//! on-wire packet stays small enough to traverse the network unfragmented.
//!
//! The crate is the shared library behind two binaries:
//!
//! - `fragproxy-client` sits near stub resolvers, signals fragmentation
//!   capability on outbound queries, and reassembles fragmented replies.
//! - `fragproxy-server` sits in front of a backend resolver, strips the
//!   capability signal from incoming queries, and fragments oversize
//!   replies when the querier asked for it.
//!
//! ## Module map
//!
//! - [`dns`] — the wire codec (header, question, RR, OPT pseudo-RR).
//! - [`signal`] — the capability/fragment-descriptor EDNS0 option.
//! - [`fragment`] — the server-side greedy linear packer.
//! - [`reassemble`] — the client-side fragment collector and stitcher.
//! - [`handler`] — `FragmentHandler` and its client/server implementations.
//! - [`listener`] — the UDP/TCP bootstrap shared by both proxy roles.
//! - [`access`] — the source-CIDR allow-list.
//! - [`upstream`] — backend-selection strategies.
//! - [`config`] — CLI endpoint-list parsing shared by both binaries.
//! - [`error`] — the library-level error type.

pub mod access;
pub mod config;
pub mod dns;
pub mod error;
pub mod fragment;
pub mod handler;
pub mod listener;
pub mod reassemble;
pub mod signal;
pub mod upstream;

pub use error::FragError;
pub use handler::{ClientHandler, FragmentHandler, ServerHandler};
