//! DNSSEC signing: key lifecycle, RRSIG generation, authenticated denial.
//!
//! The server signs with ECDSA P-256/SHA-256 (algorithm 13) only. Signing
//! is CPU-bound and runs without holding any cache or limiter lock.

pub mod denial;
pub mod digest;
pub mod key_tag;
pub mod keys;
pub mod signer;

pub use digest::compute_ds;
pub use key_tag::calculate_key_tag;
pub use keys::{ActiveKey, DnssecConfig, KeyManager};

/// ECDSA P-256 with SHA-256 (RFC 6605).
pub const ALGORITHM_ECDSA_P256: u8 = 13;
/// DNSKEY protocol field is always 3 (RFC 4034 §2.1.2).
pub const DNSKEY_PROTOCOL: u8 = 3;
