//! Prerequisite checks and update operations (RFC 2136 §2.4, §2.5).
//!
//! Both are decoded from resource records whose class carries the meaning:
//! ANY is value-independent, NONE negates or deletes, IN carries data.

use crate::dns::enums::{RecordClass, RecordType, Rcode};
use crate::dns::{ResourceRecord, rdata::RData};
use crate::error::{DnsError, Result};
use crate::model::Record;

#[derive(Debug, Clone, PartialEq)]
pub enum Prerequisite {
    /// ANY class, concrete type: an RRset of this type exists at the name.
    RrsetExists { name: String, rtype: RecordType },
    /// IN class: this exact record exists.
    RecordExists {
        name: String,
        rtype: RecordType,
        content: String,
    },
    /// ANY class, ANY type: the name has at least one record.
    NameExists { name: String },
    /// NONE class, concrete type: no RRset of this type at the name.
    RrsetAbsent { name: String, rtype: RecordType },
    /// NONE class, ANY type: the name has no records at all.
    NameAbsent { name: String },
}

impl Prerequisite {
    /// Decode one record from the prerequisite (answer) section.
    pub fn from_rr(rr: &ResourceRecord) -> Result<Self> {
        if rr.ttl != 0 {
            return Err(DnsError::Wire(crate::dns::WireError::RdataLength));
        }
        let name = rr.name();
        Ok(match (rr.rclass, rr.rtype) {
            (RecordClass::ANY, RecordType::ANY) => Prerequisite::NameExists { name },
            (RecordClass::ANY, rtype) => Prerequisite::RrsetExists { name, rtype },
            (RecordClass::NONE, RecordType::ANY) => Prerequisite::NameAbsent { name },
            (RecordClass::NONE, rtype) => Prerequisite::RrsetAbsent { name, rtype },
            (RecordClass::IN, rtype) => Prerequisite::RecordExists {
                name,
                rtype,
                content: rr.rdata.presentation(),
            },
            _ => return Err(DnsError::Refused("bad prerequisite class".into())),
        })
    }

    /// Evaluate against the zone's records, yielding the RCODE to answer
    /// with when the condition fails.
    pub fn check(&self, records: &[Record]) -> std::result::Result<(), Rcode> {
        fn at<'a>(records: &'a [Record], name: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
            records.iter().filter(move |r| r.name == *name)
        }
        match self {
            Prerequisite::RrsetExists { name, rtype } => {
                if at(records, name).any(|r| r.rtype == *rtype) {
                    Ok(())
                } else {
                    Err(Rcode::NxRrset)
                }
            }
            Prerequisite::RecordExists {
                name,
                rtype,
                content,
            } => {
                if at(records, name).any(|r| r.rtype == *rtype && r.content == *content) {
                    Ok(())
                } else {
                    Err(Rcode::NxRrset)
                }
            }
            Prerequisite::NameExists { name } => {
                if at(records, name).next().is_some() {
                    Ok(())
                } else {
                    Err(Rcode::NxDomain)
                }
            }
            Prerequisite::RrsetAbsent { name, rtype } => {
                if at(records, name).any(|r| r.rtype == *rtype) {
                    Err(Rcode::YxRrset)
                } else {
                    Ok(())
                }
            }
            Prerequisite::NameAbsent { name } => {
                if at(records, name).next().is_some() {
                    Err(Rcode::YxDomain)
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// IN class: add the record (a no-op when an identical one exists).
    Add {
        name: String,
        rtype: RecordType,
        content: String,
        ttl: u32,
    },
    /// ANY class, concrete type: delete the whole RRset.
    DeleteRrset { name: String, rtype: RecordType },
    /// ANY class, ANY type: delete every record at the name.
    DeleteName { name: String },
    /// NONE class: delete the one matching record.
    DeleteRecord {
        name: String,
        rtype: RecordType,
        content: String,
    },
}

impl UpdateOp {
    /// Decode one record from the update (authority) section.
    pub fn from_rr(rr: &ResourceRecord) -> Result<Self> {
        let name = rr.name();
        Ok(match (rr.rclass, rr.rtype) {
            (RecordClass::IN, rtype) => {
                if rtype.is_meta() {
                    return Err(DnsError::Refused("meta type in update".into()));
                }
                UpdateOp::Add {
                    name,
                    rtype,
                    content: rr.rdata.presentation(),
                    ttl: rr.ttl,
                }
            }
            (RecordClass::ANY, RecordType::ANY) => {
                if rr.rdata != RData::Empty {
                    return Err(DnsError::Wire(crate::dns::WireError::RdataLength));
                }
                UpdateOp::DeleteName { name }
            }
            (RecordClass::ANY, rtype) => {
                if rr.rdata != RData::Empty {
                    return Err(DnsError::Wire(crate::dns::WireError::RdataLength));
                }
                UpdateOp::DeleteRrset { name, rtype }
            }
            (RecordClass::NONE, rtype) => UpdateOp::DeleteRecord {
                name,
                rtype,
                content: rr.rdata.presentation(),
            },
            _ => return Err(DnsError::Refused("bad update class".into())),
        })
    }

    /// The RRset this operation touches, for cache invalidation.
    pub fn touched(&self) -> (&str, RecordType) {
        match self {
            UpdateOp::Add { name, rtype, .. } => (name, *rtype),
            UpdateOp::DeleteRrset { name, rtype } => (name, *rtype),
            UpdateOp::DeleteName { name } => (name, RecordType::ANY),
            UpdateOp::DeleteRecord { name, rtype, .. } => (name, *rtype),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::name::labels_from;
    use uuid::Uuid;

    fn rr(class: RecordClass, rtype: RecordType, ttl: u32, rdata: RData) -> ResourceRecord {
        ResourceRecord {
            labels: labels_from("dyn.rfc.test"),
            rtype,
            rclass: class,
            ttl,
            rdata,
        }
    }

    #[test]
    fn prerequisite_decoding() {
        let exists = Prerequisite::from_rr(&rr(RecordClass::ANY, RecordType::A, 0, RData::Empty)).unwrap();
        assert_eq!(
            exists,
            Prerequisite::RrsetExists {
                name: "dyn.rfc.test".into(),
                rtype: RecordType::A
            }
        );

        let absent =
            Prerequisite::from_rr(&rr(RecordClass::NONE, RecordType::ANY, 0, RData::Empty)).unwrap();
        assert_eq!(absent, Prerequisite::NameAbsent { name: "dyn.rfc.test".into() });

        // Prerequisites must carry TTL zero.
        assert!(Prerequisite::from_rr(&rr(RecordClass::ANY, RecordType::A, 5, RData::Empty)).is_err());
    }

    #[test]
    fn prerequisite_evaluation() {
        let zone_id = Uuid::new_v4();
        let records = vec![Record::new(zone_id, "dyn.rfc.test", RecordType::A, "5.5.5.5", 300)];

        let ok = Prerequisite::RrsetExists {
            name: "dyn.rfc.test".into(),
            rtype: RecordType::A,
        };
        assert!(ok.check(&records).is_ok());

        let missing = Prerequisite::RrsetExists {
            name: "dyn.rfc.test".into(),
            rtype: RecordType::AAAA,
        };
        assert_eq!(missing.check(&records), Err(Rcode::NxRrset));

        let absent = Prerequisite::NameAbsent {
            name: "dyn.rfc.test".into(),
        };
        assert_eq!(absent.check(&records), Err(Rcode::YxDomain));

        let gone = Prerequisite::NameExists {
            name: "other.rfc.test".into(),
        };
        assert_eq!(gone.check(&records), Err(Rcode::NxDomain));
    }

    #[test]
    fn update_decoding() {
        let add = UpdateOp::from_rr(&rr(
            RecordClass::IN,
            RecordType::A,
            300,
            RData::A("5.5.5.5".parse().unwrap()),
        ))
        .unwrap();
        assert_eq!(
            add,
            UpdateOp::Add {
                name: "dyn.rfc.test".into(),
                rtype: RecordType::A,
                content: "5.5.5.5".into(),
                ttl: 300
            }
        );

        let del_all = UpdateOp::from_rr(&rr(RecordClass::ANY, RecordType::ANY, 0, RData::Empty)).unwrap();
        assert_eq!(del_all, UpdateOp::DeleteName { name: "dyn.rfc.test".into() });

        // ANY-class deletes must carry empty RDATA.
        assert!(
            UpdateOp::from_rr(&rr(
                RecordClass::ANY,
                RecordType::A,
                0,
                RData::A("1.2.3.4".parse().unwrap())
            ))
            .is_err()
        );
    }
}
