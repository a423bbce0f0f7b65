use super::WireError;
use super::edns::Edns;
use super::enums::{Opcode, Rcode, RecordClass, RecordType};
use super::header::Header;
use super::name;
use super::question::Question;
use super::rdata::RData;
use super::resource::ResourceRecord;
use crate::pool::PacketBuffer;

/// A TSIG record pulled out of the additional section, together with the
/// byte offset it started at in the original message. Verification needs
/// the offset to reconstruct the exact signed bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TsigView {
    pub record: ResourceRecord,
    pub wire_offset: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
    pub edns: Option<Edns>,
    pub tsig: Option<TsigView>,
}

impl Packet {
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        let mut buf = PacketBuffer::new();
        buf.load(bytes)?;
        Self::parse_from(&mut buf)
    }

    pub fn parse_from(buf: &mut PacketBuffer) -> Result<Self, WireError> {
        let header = Header::parse(buf)?;
        let mut packet = Packet {
            header,
            ..Packet::default()
        };

        for _ in 0..packet.header.qdcount {
            packet.questions.push(Question::parse(buf)?);
        }
        for _ in 0..packet.header.ancount {
            packet.answers.push(ResourceRecord::parse(buf)?);
        }
        for _ in 0..packet.header.nscount {
            packet.authorities.push(ResourceRecord::parse(buf)?);
        }

        for _ in 0..packet.header.arcount {
            if packet.tsig.is_some() {
                return Err(WireError::TsigNotLast);
            }

            let rr_start = buf.pos();
            let labels = name::read_name(buf)?;
            let rtype: RecordType = buf.read_u16()?.into();

            if rtype == RecordType::OPT {
                if packet.edns.is_some() {
                    return Err(WireError::DuplicateOpt);
                }
                packet.edns = Some(Edns::parse(buf)?);
                continue;
            }

            let rclass: RecordClass = buf.read_u16()?.into();
            let ttl = buf.read_u32()?;
            let rdlen = buf.read_u16()? as usize;
            let rdata = RData::parse(rtype, rdlen, buf)?;
            let record = ResourceRecord {
                labels,
                rtype,
                rclass,
                ttl,
                rdata,
            };

            if rtype == RecordType::TSIG {
                packet.tsig = Some(TsigView {
                    record,
                    wire_offset: rr_start,
                });
            } else {
                packet.additionals.push(record);
            }
        }

        Ok(packet)
    }

    /// Serialize into a buffer and return the wire bytes. Section counts
    /// are derived from the actual section lengths.
    pub fn serialize<'a>(&self, buf: &'a mut PacketBuffer) -> Result<&'a [u8], WireError> {
        buf.reset();

        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answers.len() as u16;
        header.nscount = self.authorities.len() as u16;
        header.arcount = self.additionals.len() as u16
            + self.edns.is_some() as u16
            + self.tsig.is_some() as u16;
        header.serialize(buf)?;

        for question in &self.questions {
            question.serialize(buf)?;
        }
        for record in &self.answers {
            record.serialize(buf)?;
        }
        for record in &self.authorities {
            record.serialize(buf)?;
        }
        for record in &self.additionals {
            record.serialize(buf)?;
        }
        if let Some(edns) = &self.edns {
            edns.serialize(buf)?;
        }
        // TSIG is always the last record in the message.
        if let Some(tsig) = &self.tsig {
            tsig.record.serialize(buf)?;
        }

        Ok(buf.as_slice())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = PacketBuffer::new();
        Ok(self.serialize(&mut buf)?.to_vec())
    }

    /// Start a response to this query: same id and opcode, question echoed.
    pub fn response(&self) -> Packet {
        Packet {
            header: Header {
                id: self.header.id,
                qr: true,
                opcode: self.header.opcode,
                aa: false,
                tc: false,
                rd: self.header.rd,
                ra: false,
                z: false,
                ad: false,
                cd: false,
                rcode: Rcode::NoError.to_u8(),
                ..Header::default()
            },
            questions: self.questions.clone(),
            ..Packet::default()
        }
    }

    /// Minimal error reply carrying only the transaction id, used when the
    /// query could not be parsed past its header.
    pub fn error_response(id: u16, rcode: Rcode) -> Packet {
        Packet {
            header: Header {
                id,
                qr: true,
                rcode: rcode.to_u8(),
                ..Header::default()
            },
            ..Packet::default()
        }
    }

    /// Truncated variant for UDP replies exceeding the client's payload
    /// limit: TC set, answer and authority sections dropped, question and
    /// OPT retained.
    pub fn truncated(&self) -> Packet {
        let mut packet = Packet {
            header: self.header.clone(),
            questions: self.questions.clone(),
            edns: self.edns.clone(),
            ..Packet::default()
        };
        packet.header.tc = true;
        packet
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.header.opcode)
    }

    pub fn dnssec_ok(&self) -> bool {
        self.edns.as_ref().is_some_and(|edns| edns.dnssec_ok())
    }

    /// The largest UDP reply this client accepts: EDNS advertised size
    /// clamped to [512, 65535], or 512 without EDNS.
    pub fn max_udp_payload(&self) -> u16 {
        self.edns
            .as_ref()
            .map(|edns| edns.effective_payload())
            .unwrap_or(super::edns::MIN_UDP_PAYLOAD)
    }

    /// Smallest TTL across answer records, for cache lifetimes.
    pub fn min_answer_ttl(&self) -> Option<u32> {
        self.answers.iter().map(|rr| rr.ttl).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::edns::EdnsOption;

    fn sample_query() -> Packet {
        let mut packet = Packet::default();
        packet.header.id = 0x1234;
        packet.header.rd = true;
        packet
            .questions
            .push(Question::new("www.example.com", RecordType::A));
        packet
    }

    #[test]
    fn query_round_trip() {
        let query = sample_query();
        let bytes = query.to_bytes().unwrap();
        let parsed = Packet::parse(&bytes).unwrap();
        assert_eq!(parsed.header.id, 0x1234);
        assert!(parsed.header.rd);
        assert_eq!(parsed.questions.len(), 1);
        assert_eq!(parsed.questions[0].name(), "www.example.com");
    }

    #[test]
    fn response_round_trip_with_answers() {
        let mut response = sample_query().response();
        response.header.aa = true;
        response.answers.push(ResourceRecord::new(
            "www.example.com",
            RecordType::A,
            300,
            RData::A("1.2.3.4".parse().unwrap()),
        ));
        response.answers.push(ResourceRecord::new(
            "www.example.com",
            RecordType::A,
            300,
            RData::A("5.6.7.8".parse().unwrap()),
        ));

        let bytes = response.to_bytes().unwrap();
        let parsed = Packet::parse(&bytes).unwrap();
        assert!(parsed.header.qr);
        assert!(parsed.header.aa);
        assert_eq!(parsed.header.ancount, 2);
        assert_eq!(parsed.answers, response.answers);
    }

    #[test]
    fn edns_is_lifted_out_of_additionals() {
        let mut query = sample_query();
        query.edns = Some(Edns {
            payload_size: 4096,
            options: vec![EdnsOption {
                code: 10,
                data: vec![0xde, 0xad],
            }],
            ..Edns::default()
        });

        let bytes = query.to_bytes().unwrap();
        let parsed = Packet::parse(&bytes).unwrap();
        assert!(parsed.additionals.is_empty());
        let edns = parsed.edns.unwrap();
        assert_eq!(edns.payload_size, 4096);
        assert_eq!(edns.options.len(), 1);
    }

    #[test]
    fn duplicate_opt_is_rejected() {
        let mut query = sample_query();
        query.edns = Some(Edns::default());
        let mut bytes = query.to_bytes().unwrap();

        // Append a second OPT record by hand and bump arcount.
        bytes.extend_from_slice(&[0, 0, 41, 0x10, 0, 0, 0, 0, 0, 0, 0]);
        bytes[11] = 2;
        assert_eq!(Packet::parse(&bytes), Err(WireError::DuplicateOpt));
    }

    #[test]
    fn truncated_reply_keeps_question_and_opt() {
        let mut response = sample_query().response();
        response.edns = Some(Edns::default());
        response.answers.push(ResourceRecord::new(
            "www.example.com",
            RecordType::A,
            300,
            RData::A("1.2.3.4".parse().unwrap()),
        ));

        let truncated = response.truncated();
        assert!(truncated.header.tc);
        assert!(truncated.answers.is_empty());
        assert!(truncated.authorities.is_empty());
        assert_eq!(truncated.questions.len(), 1);
        assert!(truncated.edns.is_some());
    }

    #[test]
    fn payload_defaults_to_512_without_edns() {
        assert_eq!(sample_query().max_udp_payload(), 512);
    }
}
