//! Library error type. Binaries wrap this in `anyhow` at the top level;
//! internal fallible operations return `Result<_, FragError>` so callers can
//! match on the specific failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FragError {
    #[error("malformed DNS message: {0}")]
    Wire(#[from] crate::dns::message::DnsMessageError),

    #[error("backend reply carries no OPT record")]
    MissingOpt,

    #[error("upstream I/O failed: {0}")]
    Upstream(#[from] std::io::Error),

    #[error("upstream did not respond within the deadline")]
    Timeout,

    #[error("missing fragment {0}")]
    MissingFragment(u8),
}
