use std::sync::Arc;
use thiserror::Error;

use crate::dns::WireError;
use crate::dns::enums::Rcode;
use crate::tsig::TsigError;

pub type Result<T> = std::result::Result<T, DnsError>;

/// Unified error type for the server.
///
/// Components return these; only the dispatcher translates them into
/// RCODEs or HTTP statuses.
#[derive(Debug, Clone, Error)]
pub enum DnsError {
    // Protocol errors: answered in the DNS header, never logged loudly
    #[error("malformed packet: {0}")]
    Wire(#[from] WireError),
    #[error("unsupported opcode {0}")]
    NotImplemented(u8),
    #[error("query has no question")]
    EmptyQuestion,

    // Authentication errors
    #[error("not authoritative for {0}")]
    NotAuth(String),
    #[error("refused: {0}")]
    Refused(String),
    #[error("TSIG: {0}")]
    Tsig(#[from] TsigError),

    // Prerequisite errors (RFC 2136) carry the exact RCODE to answer with
    #[error("prerequisite not satisfied ({0:?})")]
    Prereq(Rcode),

    // Resource errors
    #[error("repository failure: {0}")]
    Repository(String),
    #[error("signing failure: {0}")]
    Signing(String),
    #[error("zone {0} not found")]
    ZoneNotFound(String),

    // Transport errors: dropped, not surfaced to the client
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
    #[error("operation timed out")]
    Timeout,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("server is shutting down")]
    Shutdown,

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for DnsError {
    fn from(err: std::io::Error) -> Self {
        DnsError::Io(Arc::new(err))
    }
}

impl DnsError {
    /// The RCODE a response carrying this failure should advertise.
    pub fn rcode(&self) -> Rcode {
        match self {
            DnsError::Wire(_) | DnsError::EmptyQuestion => Rcode::FormErr,
            DnsError::NotImplemented(_) => Rcode::NotImp,
            DnsError::NotAuth(_) | DnsError::Tsig(_) => Rcode::NotAuth,
            DnsError::Refused(_) | DnsError::RateLimited => Rcode::Refused,
            DnsError::Prereq(rcode) => *rcode,
            DnsError::ZoneNotFound(_) => Rcode::NxDomain,
            _ => Rcode::ServFail,
        }
    }
}
