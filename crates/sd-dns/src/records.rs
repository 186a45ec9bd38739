//! Resource records as the proxy sees them. A records are inspected by the
//! answer filter; every other record only has to survive re-encoding.

use std::fmt;
use std::net::Ipv4Addr;

/// Wire value of a record or question type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordType(pub u16);

impl RecordType {
    pub const A: Self = Self(1);
    pub const NS: Self = Self(2);
    pub const CNAME: Self = Self(5);
    pub const SOA: Self = Self(6);
    pub const PTR: Self = Self(12);
    pub const MX: Self = Self(15);
    pub const AAAA: Self = Self(28);
    pub const SRV: Self = Self(33);
    /// EDNS0 pseudo-record; its class carries the UDP payload size
    pub const OPT: Self = Self(41);
}

/// Mnemonics used in logs. Anything else prints as `TYPEn` (RFC 3597).
const MNEMONICS: &[(u16, &str)] = &[
    (1, "A"),
    (2, "NS"),
    (5, "CNAME"),
    (6, "SOA"),
    (12, "PTR"),
    (15, "MX"),
    (16, "TXT"),
    (28, "AAAA"),
    (33, "SRV"),
    (41, "OPT"),
    (64, "SVCB"),
    (65, "HTTPS"),
    (255, "ANY"),
];

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match MNEMONICS.iter().find(|(v, _)| *v == self.0) {
            Some((_, name)) => f.write_str(name),
            None => write!(f, "TYPE{}", self.0),
        }
    }
}

/// One field of an RDATA layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    Octets(usize),
    Name,
}

/// RDATA layout of the types whose embedded names may be compressed
/// (RFC 3597 section 4). Those names must be expanded before the record can
/// be written into a different message.
pub(crate) fn name_layout(rtype: RecordType) -> Option<&'static [Field]> {
    use Field::{Name, Octets};
    match rtype {
        RecordType::CNAME | RecordType::NS | RecordType::PTR => Some(&[Name]),
        RecordType::MX => Some(&[Octets(2), Name]),
        RecordType::SOA => Some(&[Name, Name, Octets(20)]),
        RecordType::SRV => Some(&[Octets(6), Name]),
        _ => None,
    }
}

/// Piece of an expanded RDATA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RDataPart {
    Octets(Vec<u8>),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    /// Address of a well-formed A record
    A(Ipv4Addr),
    /// RDATA split around its domain names, see `name_layout`
    Expanded(Vec<RDataPart>),
    /// Anything else, as received
    Opaque(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    /// Owner name in presentation form, see `packet::parse_name`
    pub name: String,
    pub rtype: RecordType,
    pub class: u16,
    pub ttl: u32,
    pub rdata: RData,
}

impl DnsRecord {
    /// The address of an IPv4 address record; `None` for every other record.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match (self.rtype, &self.rdata) {
            (RecordType::A, RData::A(ip)) => Some(*ip),
            _ => None,
        }
    }
}
