//! DNS wire format (RFC 1035): query parsing, full response parsing and
//! re-encoding.

use std::fmt::Write;
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::records::{DnsRecord, Field, RData, RDataPart, RecordType, name_layout};

#[derive(Error, Debug)]
pub enum DnsParseError {
    #[error("Packet truncated at offset {0}")]
    Truncated(usize),
    #[error("Name compression loop detected")]
    CompressionLoop,
    #[error("Packet too short: {0} bytes")]
    TooShort(usize),
    #[error("Name too long (exceeds 255 bytes)")]
    NameTooLong,
    #[error("Label too long: {0} bytes (max 63)")]
    LabelTooLong(usize),
}

pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_FORMERR: u8 = 1;
pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_NXDOMAIN: u8 = 3;

const FLAG_QR: u16 = 0x8000;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;

/// Classic DNS-over-UDP limit without EDNS0.
pub const MIN_UDP_PAYLOAD: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
    pub qd_count: u16,
    pub an_count: u16,
    pub ns_count: u16,
    pub ar_count: u16,
}

impl DnsHeader {
    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }
    pub fn opcode(&self) -> u8 {
        ((self.flags >> 11) & 0xF) as u8
    }
    pub fn is_truncated(&self) -> bool {
        self.flags & FLAG_TC != 0
    }
    pub fn recursion_desired(&self) -> bool {
        self.flags & FLAG_RD != 0
    }
    pub fn rcode(&self) -> u8 {
        (self.flags & 0xF) as u8
    }

    fn write(&self, buf: &mut Vec<u8>) {
        for field in [self.id, self.flags, self.qd_count, self.an_count, self.ns_count, self.ar_count] {
            buf.extend_from_slice(&field.to_be_bytes());
        }
    }
}

#[derive(Debug, Clone)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: RecordType,
    pub qclass: u16,
}

/// A parsed client query
#[derive(Debug, Clone)]
pub struct DnsQuery {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    /// Question section exactly as received, copied into responses
    pub raw_question_bytes: Vec<u8>,
    /// Largest UDP response the client accepts (EDNS0 OPT or 512)
    pub udp_payload_size: usize,
}

/// A full DNS message with every section decoded.
///
/// A message parsed from the wire remembers the bytes it came from and
/// `to_bytes` hands them back unchanged until `set_answers` replaces the
/// answer section.
#[derive(Debug, Clone)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub raw_question_bytes: Vec<u8>,
    pub answers: Vec<DnsRecord>,
    pub authority: Vec<DnsRecord>,
    pub additional: Vec<DnsRecord>,
    wire: Option<Vec<u8>>,
}

/// Parse a DNS name with pointer compression support.
/// Returns (name, offset just past the name at its original position).
///
/// Labels are arbitrary octets. The name is returned in presentation form:
/// `.` and `\` inside a label are backslash-escaped and bytes outside
/// printable ASCII become `\DDD`, so `encode_name` restores the exact wire
/// labels.
pub fn parse_name(buf: &[u8], mut offset: usize) -> Result<(String, usize), DnsParseError> {
    const MAX_JUMPS: usize = 10;
    let mut name = String::with_capacity(64);
    let mut end_offset = None;
    let mut jumps = 0;
    let mut wire_len = 1;

    loop {
        let len = *buf.get(offset).ok_or(DnsParseError::Truncated(offset))? as usize;

        if len & 0xC0 == 0xC0 {
            let low = *buf.get(offset + 1).ok_or(DnsParseError::Truncated(offset))? as usize;
            end_offset.get_or_insert(offset + 2);
            offset = ((len & 0x3F) << 8) | low;
            jumps += 1;
            if jumps > MAX_JUMPS {
                return Err(DnsParseError::CompressionLoop);
            }
            continue;
        }

        if len == 0 {
            end_offset.get_or_insert(offset + 1);
            break;
        }

        if len > 63 {
            return Err(DnsParseError::LabelTooLong(len));
        }

        wire_len += len + 1;
        if wire_len > 255 {
            return Err(DnsParseError::NameTooLong);
        }

        offset += 1;
        let label = buf
            .get(offset..offset + len)
            .ok_or(DnsParseError::Truncated(offset))?;
        if !name.is_empty() {
            name.push('.');
        }
        push_label(&mut name, label);
        offset += len;
    }

    Ok((name, end_offset.unwrap_or(offset)))
}

fn push_label(name: &mut String, label: &[u8]) {
    for &b in label {
        match b {
            b'.' | b'\\' => {
                name.push('\\');
                name.push(b as char);
            }
            0x21..=0x7E => name.push(b as char),
            _ => {
                let _ = write!(name, "\\{:03}", b);
            }
        }
    }
}

/// Encode a presentation-form name into uncompressed wire labels.
pub fn encode_name(name: &str, buf: &mut Vec<u8>) {
    let src = name.as_bytes();
    let mut label = Vec::with_capacity(63);
    let mut i = 0;

    while i < src.len() {
        match src[i] {
            b'.' => {
                flush_label(&mut label, buf);
                i += 1;
            }
            b'\\' => match src.get(i + 1..i + 4).filter(|d| d.iter().all(u8::is_ascii_digit)) {
                Some(digits) => {
                    let value = digits.iter().fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
                    label.push(value.min(255) as u8);
                    i += 4;
                }
                None => {
                    if let Some(&escaped) = src.get(i + 1) {
                        label.push(escaped);
                    }
                    i += 2;
                }
            },
            b => {
                label.push(b);
                i += 1;
            }
        }
    }
    flush_label(&mut label, buf);
    buf.push(0);
}

fn flush_label(label: &mut Vec<u8>, buf: &mut Vec<u8>) {
    if label.is_empty() {
        return;
    }
    let len = label.len().min(63);
    buf.push(len as u8);
    buf.extend_from_slice(&label[..len]);
    label.clear();
}

fn read_u16(buf: &[u8], offset: usize) -> Result<u16, DnsParseError> {
    buf.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(DnsParseError::Truncated(offset))
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, DnsParseError> {
    buf.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(DnsParseError::Truncated(offset))
}

fn parse_header(buf: &[u8]) -> Result<DnsHeader, DnsParseError> {
    if buf.len() < 12 {
        return Err(DnsParseError::TooShort(buf.len()));
    }
    Ok(DnsHeader {
        id: read_u16(buf, 0)?,
        flags: read_u16(buf, 2)?,
        qd_count: read_u16(buf, 4)?,
        an_count: read_u16(buf, 6)?,
        ns_count: read_u16(buf, 8)?,
        ar_count: read_u16(buf, 10)?,
    })
}

/// Parse the question section. Returns the questions and the offset after it.
fn parse_questions(buf: &[u8], header: &DnsHeader) -> Result<(Vec<DnsQuestion>, usize), DnsParseError> {
    let mut offset = 12;
    let mut questions = Vec::with_capacity(header.qd_count as usize);

    for _ in 0..header.qd_count {
        let (name, new_offset) = parse_name(buf, offset)?;
        offset = new_offset;
        let qtype = RecordType(read_u16(buf, offset)?);
        let qclass = read_u16(buf, offset + 2)?;
        offset += 4;
        questions.push(DnsQuestion {
            name: name.to_lowercase(),
            qtype,
            qclass,
        });
    }

    Ok((questions, offset))
}

/// Parse a DNS query packet from a client.
pub fn parse_query(buf: &[u8]) -> Result<DnsQuery, DnsParseError> {
    let header = parse_header(buf)?;
    let (questions, offset) = parse_questions(buf, &header)?;

    // EDNS0: a malformed record section only costs the client its larger
    // payload size, so parse errors here fall back to 512.
    let record_count = header.an_count as usize + header.ns_count as usize + header.ar_count as usize;
    let udp_payload_size = parse_records(buf, offset, record_count)
        .ok()
        .and_then(|(records, _)| {
            records
                .iter()
                .find(|r| r.rtype == RecordType::OPT)
                .map(|opt| opt.class as usize)
        })
        .map_or(MIN_UDP_PAYLOAD, |size| size.max(MIN_UDP_PAYLOAD));

    Ok(DnsQuery {
        raw_question_bytes: buf[12..offset].to_vec(),
        header,
        questions,
        udp_payload_size,
    })
}

/// Parse a complete response message, keeping every section in order.
pub fn parse_message(buf: &[u8]) -> Result<DnsMessage, DnsParseError> {
    let header = parse_header(buf)?;
    let (_, question_end) = parse_questions(buf, &header)?;

    let (answers, offset) = parse_records(buf, question_end, header.an_count as usize)?;
    let (authority, offset) = parse_records(buf, offset, header.ns_count as usize)?;
    let (additional, _) = parse_records(buf, offset, header.ar_count as usize)?;

    Ok(DnsMessage {
        raw_question_bytes: buf[12..question_end].to_vec(),
        header,
        answers,
        authority,
        additional,
        wire: Some(buf.to_vec()),
    })
}

fn parse_records(
    buf: &[u8],
    mut offset: usize,
    count: usize,
) -> Result<(Vec<DnsRecord>, usize), DnsParseError> {
    let mut records = Vec::with_capacity(count);

    for _ in 0..count {
        let (name, new_offset) = parse_name(buf, offset)?;
        offset = new_offset;

        let rtype = RecordType(read_u16(buf, offset)?);
        let class = read_u16(buf, offset + 2)?;
        let ttl = read_u32(buf, offset + 4)?;
        let rdlength = read_u16(buf, offset + 8)? as usize;
        offset += 10;

        if offset + rdlength > buf.len() {
            return Err(DnsParseError::Truncated(offset));
        }

        let rdata = parse_rdata(buf, offset, rdlength, rtype);
        offset += rdlength;

        records.push(DnsRecord {
            name,
            rtype,
            class,
            ttl,
            rdata,
        });
    }

    Ok((records, offset))
}

fn parse_rdata(buf: &[u8], offset: usize, rdlength: usize, rtype: RecordType) -> RData {
    let raw = &buf[offset..offset + rdlength];
    if rtype == RecordType::A && rdlength == 4 {
        return RData::A(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]));
    }
    name_layout(rtype)
        .and_then(|layout| expand_rdata(buf, offset, offset + rdlength, layout))
        .unwrap_or_else(|| RData::Opaque(raw.to_vec()))
}

/// Split `buf[offset..end]` according to `layout`, following compression
/// pointers. `None` when the RDATA does not match the layout exactly.
fn expand_rdata(buf: &[u8], offset: usize, end: usize, layout: &[Field]) -> Option<RData> {
    let mut pos = offset;
    let mut parts = Vec::with_capacity(layout.len());

    for field in layout {
        match *field {
            Field::Octets(n) => {
                if pos + n > end {
                    return None;
                }
                parts.push(RDataPart::Octets(buf[pos..pos + n].to_vec()));
                pos += n;
            }
            Field::Name => {
                let (name, next) = parse_name(buf, pos).ok()?;
                if next > end {
                    return None;
                }
                parts.push(RDataPart::Name(name));
                pos = next;
            }
        }
    }

    (pos == end).then_some(RData::Expanded(parts))
}

fn encode_record(record: &DnsRecord, buf: &mut Vec<u8>) {
    encode_name(&record.name, buf);
    buf.extend_from_slice(&record.rtype.0.to_be_bytes());
    buf.extend_from_slice(&record.class.to_be_bytes());
    buf.extend_from_slice(&record.ttl.to_be_bytes());

    let mut rdata = Vec::new();
    match &record.rdata {
        RData::A(ip) => rdata.extend_from_slice(&ip.octets()),
        RData::Expanded(parts) => {
            for part in parts {
                match part {
                    RDataPart::Octets(octets) => rdata.extend_from_slice(octets),
                    RDataPart::Name(name) => encode_name(name, &mut rdata),
                }
            }
        }
        RData::Opaque(data) => rdata.extend_from_slice(data),
    }

    buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    buf.extend_from_slice(&rdata);
}

impl DnsMessage {
    /// An empty response to `query` carrying only a response code.
    pub fn error_for(query: &DnsQuery, rcode: u8) -> Self {
        let flags = FLAG_QR
            | (query.header.flags & 0x7800) // opcode
            | (query.header.flags & FLAG_RD)
            | FLAG_RA
            | (rcode as u16 & 0xF);
        Self {
            header: DnsHeader {
                id: query.header.id,
                flags,
                qd_count: query.header.qd_count,
                an_count: 0,
                ns_count: 0,
                ar_count: 0,
            },
            raw_question_bytes: query.raw_question_bytes.clone(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
            wire: None,
        }
    }

    /// FORMERR for a packet whose question section could not be parsed.
    pub fn format_error(id: u16, request_flags: u16) -> Self {
        Self {
            header: DnsHeader {
                id,
                flags: FLAG_QR | (request_flags & (0x7800 | FLAG_RD)) | RCODE_FORMERR as u16,
                qd_count: 0,
                an_count: 0,
                ns_count: 0,
                ar_count: 0,
            },
            raw_question_bytes: Vec::new(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
            wire: None,
        }
    }

    /// A reply whose sections could not be decoded. Only the header is
    /// read; the bytes are kept so the reply can still be relayed as-is.
    pub fn unparsed(buf: Vec<u8>) -> Result<Self, DnsParseError> {
        let header = parse_header(&buf)?;
        Ok(Self {
            header,
            raw_question_bytes: Vec::new(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
            wire: Some(buf),
        })
    }

    pub fn rcode(&self) -> u8 {
        self.header.rcode()
    }

    /// Whether `to_bytes` still returns the bytes the message was parsed from.
    pub fn is_verbatim(&self) -> bool {
        self.wire.is_some()
    }

    /// Replace the answer section. The message is re-encoded from then on.
    pub fn set_answers(&mut self, answers: Vec<DnsRecord>) {
        self.answers = answers;
        self.wire = None;
    }

    /// The received bytes for an untouched parsed message, otherwise a fresh
    /// encoding. Section counts come from the record vectors.
    pub fn to_bytes(&self) -> Vec<u8> {
        if let Some(wire) = &self.wire {
            return wire.clone();
        }

        let mut buf = Vec::with_capacity(512);
        let header = DnsHeader {
            an_count: self.answers.len() as u16,
            ns_count: self.authority.len() as u16,
            ar_count: self.additional.len() as u16,
            ..self.header.clone()
        };
        header.write(&mut buf);
        buf.extend_from_slice(&self.raw_question_bytes);
        for record in self.answers.iter().chain(&self.authority).chain(&self.additional) {
            encode_record(record, &mut buf);
        }
        buf
    }

    /// Encode for a UDP client accepting at most `max_size` bytes. An
    /// oversized message is replaced by header + question + OPT with TC set,
    /// so the client retries over TCP.
    pub fn to_udp_bytes(&self, max_size: usize) -> Vec<u8> {
        let full = self.to_bytes();
        if full.len() <= max_size {
            return full;
        }

        let qd_count = if self.raw_question_bytes.is_empty() { 0 } else { self.header.qd_count };
        let truncated = Self {
            header: DnsHeader {
                flags: self.header.flags | FLAG_TC,
                qd_count,
                ..self.header.clone()
            },
            raw_question_bytes: self.raw_question_bytes.clone(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: self
                .additional
                .iter()
                .filter(|r| r.rtype == RecordType::OPT)
                .cloned()
                .collect(),
            wire: None,
        };
        truncated.to_bytes()
    }
}
