use super::WireError;
use super::enums::{RecordClass, RecordType};
use super::name;
use crate::pool::PacketBuffer;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Question {
    pub labels: Vec<String>,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl Question {
    pub fn new(name: &str, qtype: RecordType) -> Self {
        Self {
            labels: name::labels_from(name),
            qtype,
            qclass: RecordClass::IN,
        }
    }

    /// Lowercased presentation name without the trailing dot.
    pub fn name(&self) -> String {
        name::display_name(&self.labels)
    }

    /// Key into the L1/L2 response caches.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.name(), u16::from(self.qtype))
    }

    pub fn parse(buf: &mut PacketBuffer) -> Result<Self, WireError> {
        let labels = name::read_name(buf)?;
        let qtype = buf.read_u16()?.into();
        let qclass = buf.read_u16()?.into();
        Ok(Self {
            labels,
            qtype,
            qclass,
        })
    }

    pub fn serialize(&self, buf: &mut PacketBuffer) -> Result<(), WireError> {
        name::write_name(buf, &self.labels, true)?;
        buf.write_u16(self.qtype.into())?;
        buf.write_u16(self.qclass.into())?;
        Ok(())
    }
}
