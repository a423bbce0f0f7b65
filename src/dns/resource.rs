use super::WireError;
use super::enums::{RecordClass, RecordType};
use super::name;
use super::rdata::RData;
use crate::pool::PacketBuffer;

/// One resource record in any section. The class keeps its wire value so
/// the ANY/NONE update semantics survive parsing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceRecord {
    pub labels: Vec<String>,
    pub rtype: RecordType,
    pub rclass: RecordClass,
    pub ttl: u32,
    pub rdata: RData,
}

impl ResourceRecord {
    pub fn new(owner: &str, rtype: RecordType, ttl: u32, rdata: RData) -> Self {
        Self {
            labels: name::labels_from(owner),
            rtype,
            rclass: RecordClass::IN,
            ttl,
            rdata,
        }
    }

    /// Lowercased presentation name without the trailing dot.
    pub fn name(&self) -> String {
        name::display_name(&self.labels)
    }

    pub fn fqdn(&self) -> String {
        name::fqdn(&self.labels)
    }

    pub fn parse(buf: &mut PacketBuffer) -> Result<Self, WireError> {
        let labels = name::read_name(buf)?;
        let rtype: RecordType = buf.read_u16()?.into();
        let rclass: RecordClass = buf.read_u16()?.into();
        let ttl = buf.read_u32()?;
        let rdlen = buf.read_u16()? as usize;
        let rdata = RData::parse(rtype, rdlen, buf)?;
        Ok(Self {
            labels,
            rtype,
            rclass,
            ttl,
            rdata,
        })
    }

    pub fn serialize(&self, buf: &mut PacketBuffer) -> Result<(), WireError> {
        name::write_name(buf, &self.labels, true)?;
        buf.write_u16(self.rtype.into())?;
        buf.write_u16(self.rclass.into())?;
        buf.write_u32(self.ttl)?;

        // Length placeholder, patched once the RDATA is in place.
        let len_at = buf.pos();
        buf.write_u16(0)?;
        let rdata_start = buf.pos();
        self.rdata.serialize(buf, self.rtype.compressible())?;
        let rdlen = buf.pos() - rdata_start;
        buf.patch_u16(len_at, rdlen as u16)
    }

    /// Canonical owner name in wire form (lowercased, uncompressed).
    pub fn canonical_owner(&self) -> Vec<u8> {
        name::canonical_wire(&self.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip() {
        let rr = ResourceRecord::new(
            "www.example.com",
            RecordType::A,
            300,
            RData::A("1.2.3.4".parse().unwrap()),
        );

        let mut buf = PacketBuffer::new();
        rr.serialize(&mut buf).unwrap();
        let bytes = buf.as_slice().to_vec();

        let mut parse = PacketBuffer::new();
        parse.load(&bytes).unwrap();
        let parsed = ResourceRecord::parse(&mut parse).unwrap();
        assert_eq!(parsed, rr);
        assert_eq!(parse.remaining(), 0);
    }

    #[test]
    fn rdlength_is_patched() {
        let rr = ResourceRecord::new(
            "example.com",
            RecordType::TXT,
            60,
            RData::Txt(vec!["abc".to_string()]),
        );
        let mut buf = PacketBuffer::new();
        rr.serialize(&mut buf).unwrap();
        let bytes = buf.as_slice();
        // name(13) + type(2) + class(2) + ttl(4) => rdlength at offset 21.
        let rdlen = u16::from_be_bytes([bytes[21], bytes[22]]);
        assert_eq!(rdlen, 4); // len byte + "abc"
    }
}
