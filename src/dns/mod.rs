pub mod edns;
pub mod enums;
pub mod header;
pub mod name;
pub mod packet;
pub mod question;
pub mod rdata;
pub mod resource;

pub use edns::{Edns, EdnsOption};
pub use header::Header;
pub use packet::{Packet, TsigView};
pub use question::Question;
pub use rdata::{RData, SoaData, TsigData};
pub use resource::ResourceRecord;

use thiserror::Error;

/// Typed wire-format failures.
///
/// Parse-side variants map to FORMERR at the dispatcher; `BufferFull` is
/// serialize-side and surfaces as SERVFAIL. The codec never panics on
/// malformed input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("label exceeds 63 octets")]
    LabelTooLong,
    #[error("name exceeds 255 octets")]
    NameTooLong,
    #[error("compression pointer loop")]
    PointerLoop,
    #[error("truncated packet")]
    Truncated,
    #[error("rdata shorter or longer than its declared length")]
    RdataLength,
    #[error("more than one OPT record in additional section")]
    DuplicateOpt,
    #[error("record after TSIG in additional section")]
    TsigNotLast,
    #[error("invalid character string")]
    InvalidText,
    #[error("buffer full")]
    BufferFull,
}
