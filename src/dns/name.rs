//! Domain name wire format: length-prefixed labels, compression pointers,
//! and the RFC 4034 canonical ordering used by DNSSEC denial.

use std::cmp::Ordering;

use super::WireError;
use crate::pool::PacketBuffer;

/// Parser-side bound on compression pointer chases.
const MAX_POINTER_JUMPS: usize = 5;
/// A name occupies at most 255 octets on the wire.
const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;

/// Split a presentation-form name into labels. Trailing dots and empty
/// labels are dropped, so `"www.example.com."` and `"www.example.com"`
/// produce the same labels.
pub fn labels_from(name: &str) -> Vec<String> {
    name.split('.')
        .filter(|label| !label.is_empty())
        .map(|label| label.to_string())
        .collect()
}

/// Join labels into the lowercased form used as cache and lookup keys.
pub fn display_name(labels: &[String]) -> String {
    if labels.is_empty() {
        return ".".to_string();
    }
    labels.join(".").to_lowercase()
}

/// Fully qualified form with the trailing dot, as zones store names.
pub fn fqdn(labels: &[String]) -> String {
    if labels.is_empty() {
        return ".".to_string();
    }
    let mut name = labels.join(".").to_lowercase();
    name.push('.');
    name
}

/// Read a name at the cursor, chasing compression pointers. The cursor
/// lands just past the name as it appears in the record being parsed.
pub fn read_name(buf: &mut PacketBuffer) -> Result<Vec<String>, WireError> {
    let mut labels = Vec::new();
    let mut wire_len = 0usize;
    let mut jumps = 0usize;
    // Position to restore once the first pointer is followed.
    let mut return_pos: Option<usize> = None;
    let mut pos = buf.pos();

    loop {
        let len = buf.byte_at(pos)? as usize;

        if len & 0xC0 == 0xC0 {
            if jumps >= MAX_POINTER_JUMPS {
                return Err(WireError::PointerLoop);
            }
            jumps += 1;
            let low = buf.byte_at(pos + 1)? as usize;
            if return_pos.is_none() {
                return_pos = Some(pos + 2);
            }
            pos = ((len & 0x3F) << 8) | low;
            continue;
        }

        if len == 0 {
            pos += 1;
            break;
        }

        if len > MAX_LABEL_LEN {
            return Err(WireError::LabelTooLong);
        }
        wire_len += len + 1;
        if wire_len + 1 > MAX_NAME_LEN {
            return Err(WireError::NameTooLong);
        }

        let mut label = String::with_capacity(len);
        for i in 0..len {
            let byte = buf.byte_at(pos + 1 + i)?;
            // Wire labels are octets; keep them as-is, replacing anything
            // outside printable ASCII so the String stays valid.
            label.push(if byte.is_ascii() { byte as char } else { '?' });
        }
        labels.push(label);
        pos += len + 1;
    }

    buf.seek(return_pos.unwrap_or(pos))?;
    Ok(labels)
}

/// Write a name at the cursor. When `compress` is set, the longest known
/// suffix is emitted as a 14-bit pointer and fresh labels are remembered
/// for later names.
pub fn write_name(
    buf: &mut PacketBuffer,
    labels: &[String],
    compress: bool,
) -> Result<(), WireError> {
    let wire_len: usize = labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1;
    if wire_len > MAX_NAME_LEN {
        return Err(WireError::NameTooLong);
    }

    for idx in 0..labels.len() {
        let suffix = labels[idx..].join(".").to_lowercase();

        if compress {
            if let Some(offset) = buf.compression_offset(&suffix) {
                return buf.write_u16(0xC000 | offset);
            }
            if buf.pos() <= 0x3FFF {
                let offset = buf.pos() as u16;
                buf.remember_suffix(suffix, offset);
            }
        }

        let label = &labels[idx];
        if label.len() > MAX_LABEL_LEN {
            return Err(WireError::LabelTooLong);
        }
        buf.write_u8(label.len() as u8)?;
        buf.write_bytes(label.as_bytes())?;
    }

    buf.write_u8(0)
}

/// Uncompressed, lowercased wire form. This is the canonical form DNSSEC
/// signs over and DS digests incorporate.
pub fn canonical_wire(labels: &[String]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(MAX_NAME_LEN);
    for label in labels {
        wire.push(label.len() as u8);
        wire.extend(label.to_lowercase().into_bytes());
    }
    wire.push(0);
    wire
}

/// RFC 4034 §6.1 canonical name ordering: labels compared right to left,
/// each label octet-wise and case-insensitively, with the shorter name
/// sorting first when one is a suffix of the other.
pub fn canonical_cmp(a: &[String], b: &[String]) -> Ordering {
    let mut left = a.iter().rev();
    let mut right = b.iter().rev();

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(la), Some(lb)) => {
                let la = la.to_lowercase();
                let lb = lb.to_lowercase();
                match la.as_bytes().cmp(lb.as_bytes()) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(name: &str) -> Vec<String> {
        labels_from(name)
    }

    #[test]
    fn simple_round_trip() {
        let mut buf = PacketBuffer::new();
        write_name(&mut buf, &labels("www.example.com"), true).unwrap();
        let bytes = buf.as_slice().to_vec();
        assert_eq!(bytes[0], 3);
        assert_eq!(&bytes[1..4], b"www");
        assert_eq!(*bytes.last().unwrap(), 0);

        let mut parse = PacketBuffer::new();
        parse.load(&bytes).unwrap();
        assert_eq!(read_name(&mut parse).unwrap(), labels("www.example.com"));
    }

    #[test]
    fn root_name_is_a_single_zero() {
        let mut buf = PacketBuffer::new();
        write_name(&mut buf, &[], true).unwrap();
        assert_eq!(buf.as_slice(), &[0]);
    }

    #[test]
    fn suffix_compression_emits_pointer() {
        let mut buf = PacketBuffer::new();
        write_name(&mut buf, &labels("www.example.com"), true).unwrap();
        let first_len = buf.len();
        write_name(&mut buf, &labels("mail.example.com"), true).unwrap();

        // Second name: "mail" label raw (5 bytes) + 2-byte pointer.
        assert_eq!(buf.len(), first_len + 5 + 2);

        let bytes = buf.as_slice().to_vec();
        let mut parse = PacketBuffer::new();
        parse.load(&bytes).unwrap();
        assert_eq!(read_name(&mut parse).unwrap(), labels("www.example.com"));
        assert_eq!(read_name(&mut parse).unwrap(), labels("mail.example.com"));
    }

    #[test]
    fn full_name_match_is_a_bare_pointer() {
        let mut buf = PacketBuffer::new();
        write_name(&mut buf, &labels("example.com"), true).unwrap();
        let first_len = buf.len();
        write_name(&mut buf, &labels("EXAMPLE.com"), true).unwrap();
        assert_eq!(buf.len(), first_len + 2);
    }

    #[test]
    fn pointer_loop_is_rejected() {
        // A pointer that targets itself.
        let mut buf = PacketBuffer::new();
        buf.load(&[0xC0, 0x00]).unwrap();
        assert_eq!(read_name(&mut buf), Err(WireError::PointerLoop));
    }

    #[test]
    fn oversized_label_is_rejected() {
        let long = "a".repeat(64);
        let mut buf = PacketBuffer::new();
        assert_eq!(
            write_name(&mut buf, &[long], false),
            Err(WireError::LabelTooLong)
        );
    }

    #[test]
    fn oversized_name_is_rejected() {
        let label = "a".repeat(63);
        let name: Vec<String> = (0..5).map(|_| label.clone()).collect();
        let mut buf = PacketBuffer::new();
        assert_eq!(
            write_name(&mut buf, &name, false),
            Err(WireError::NameTooLong)
        );
    }

    #[test]
    fn canonical_order_compares_right_to_left() {
        // Example ordering from RFC 4034 §6.1.
        let mut names = vec![
            labels("example"),
            labels("a.example"),
            labels("yljkjljk.a.example"),
            labels("Z.a.example"),
            labels("zABC.a.EXAMPLE"),
            labels("z.example"),
        ];
        let expected = names.clone();
        names.reverse();
        names.sort_by(|a, b| canonical_cmp(a, b));
        assert_eq!(names, expected);
    }

    #[test]
    fn display_forms() {
        assert_eq!(display_name(&labels("WWW.Example.COM")), "www.example.com");
        assert_eq!(fqdn(&labels("example.com")), "example.com.");
        assert_eq!(fqdn(&[]), ".");
    }
}
