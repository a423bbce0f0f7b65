use ring::digest;

use crate::dns::name;

/// DS digest over the owner name in lowercased wire form followed by the
/// DNSKEY RDATA (RFC 4034 §5.1.4). Digest type 1 is SHA-1, 2 is SHA-256.
pub fn compute_ds(
    owner: &[String],
    flags: u16,
    protocol: u8,
    algorithm: u8,
    public_key: &[u8],
    digest_type: u8,
) -> Option<Vec<u8>> {
    let mut message = name::canonical_wire(owner);
    message.extend_from_slice(&flags.to_be_bytes());
    message.push(protocol);
    message.push(algorithm);
    message.extend_from_slice(public_key);

    let alg = match digest_type {
        1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
        2 => &digest::SHA256,
        _ => return None,
    };
    Some(digest::digest(alg, &message).as_ref().to_vec())
}
