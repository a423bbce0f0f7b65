use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};

use super::WireError;
use crate::pool::PacketBuffer;

/// DNS message header. Flag bits are packed and unpacked with a bit-level
/// reader over the two flag octets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: bool,
    pub ad: bool,
    pub cd: bool,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    pub fn parse(buf: &mut PacketBuffer) -> Result<Self, WireError> {
        let id = buf.read_u16()?;
        let flags = buf.read_bytes(2)?.to_vec();

        let mut reader = BitReader::endian(flags.as_slice(), BigEndian);
        let mut read = || -> Result<Header, std::io::Error> {
            Ok(Header {
                id,
                qr: reader.read_var::<u8>(1)? == 1,
                opcode: reader.read_var::<u8>(4)?,
                aa: reader.read_var::<u8>(1)? == 1,
                tc: reader.read_var::<u8>(1)? == 1,
                rd: reader.read_var::<u8>(1)? == 1,
                ra: reader.read_var::<u8>(1)? == 1,
                z: reader.read_var::<u8>(1)? == 1,
                ad: reader.read_var::<u8>(1)? == 1,
                cd: reader.read_var::<u8>(1)? == 1,
                rcode: reader.read_var::<u8>(4)?,
                ..Header::default()
            })
        };
        let mut header = read().map_err(|_| WireError::Truncated)?;

        header.qdcount = buf.read_u16()?;
        header.ancount = buf.read_u16()?;
        header.nscount = buf.read_u16()?;
        header.arcount = buf.read_u16()?;
        Ok(header)
    }

    pub fn serialize(&self, buf: &mut PacketBuffer) -> Result<(), WireError> {
        buf.write_u16(self.id)?;

        let mut flags = Vec::with_capacity(2);
        {
            let mut writer = BitWriter::endian(&mut flags, BigEndian);
            let mut write = || -> Result<(), std::io::Error> {
                writer.write_var::<u8>(1, self.qr as u8)?;
                writer.write_var::<u8>(4, self.opcode)?;
                writer.write_var::<u8>(1, self.aa as u8)?;
                writer.write_var::<u8>(1, self.tc as u8)?;
                writer.write_var::<u8>(1, self.rd as u8)?;
                writer.write_var::<u8>(1, self.ra as u8)?;
                writer.write_var::<u8>(1, self.z as u8)?;
                writer.write_var::<u8>(1, self.ad as u8)?;
                writer.write_var::<u8>(1, self.cd as u8)?;
                writer.write_var::<u8>(4, self.rcode)?;
                Ok(())
            };
            write().map_err(|_| WireError::BufferFull)?;
        }
        buf.write_bytes(&flags)?;

        buf.write_u16(self.qdcount)?;
        buf.write_u16(self.ancount)?;
        buf.write_u16(self.nscount)?;
        buf.write_u16(self.arcount)?;
        Ok(())
    }
}
