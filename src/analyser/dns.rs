//! DNS message decoding and the DNS classifier.
//!
//! Decoding covers the header, the question section and the answer section
//! (RFC 1035 wire format with name compression). A message that fails to
//! decode anywhere in those sections is treated as not being DNS at all.
use super::containers::{DnsAnswer, DnsQuery};
use super::utils::to_printable;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

const HEADER_LEN: usize = 12;
/// Compression pointers followed before a name is considered looping.
const MAX_POINTER_JUMPS: usize = 32;
const MAX_NAME_LEN: usize = 255;

pub const TYPE_A: u16 = 1;
pub const TYPE_NS: u16 = 2;
pub const TYPE_CNAME: u16 = 5;
pub const TYPE_SOA: u16 = 6;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_HINFO: u16 = 13;
pub const TYPE_MX: u16 = 15;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;

const OPCODE_QUERY: u8 = 0;
const RCODE_NOERROR: u8 = 0;

lazy_static! {
    static ref TYPE_LABELS: HashMap<u16, &'static str> = HashMap::from([
        (TYPE_A, "A"),
        (TYPE_AAAA, "AAAA"),
        (TYPE_MX, "MX"),
        (TYPE_NS, "NS"),
        (TYPE_TXT, "TXT"),
        (TYPE_CNAME, "CNAME"),
        (TYPE_PTR, "PTR"),
        (TYPE_SOA, "SOA"),
        (TYPE_SRV, "SRV"),
        (TYPE_HINFO, "HINFO"),
    ]);
}

pub fn type_label(rtype: u16) -> Option<&'static str> {
    TYPE_LABELS.get(&rtype).copied()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Question {
    pub name: Vec<u8>,
    pub qtype: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RData {
    A(Vec<u8>),
    Aaaa(Vec<u8>),
    Name(Vec<u8>),
    Soa {
        mname: Vec<u8>,
        rname: Vec<u8>,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    Texts(Vec<Vec<u8>>),
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRecord {
    pub rtype: u16,
    pub rdata: RData,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub qr: bool,
    pub opcode: u8,
    pub rcode: u8,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
}

impl Message {
    /// Loose acceptance check: any one of these is enough.
    fn looks_clean(&self) -> bool {
        self.opcode == OPCODE_QUERY || self.rcode == RCODE_NOERROR || self.qr
    }
}

/// Reason a message failed to decode. Only ever logged.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    Truncated(usize),
    BadLabel(usize),
    PointerLoop,
    NameTooLong,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeError::Truncated(at) => write!(f, "message truncated at offset {at}"),
            DecodeError::BadLabel(at) => write!(f, "bad label at offset {at}"),
            DecodeError::PointerLoop => write!(f, "compression pointer loop"),
            DecodeError::NameTooLong => write!(f, "name longer than {MAX_NAME_LEN} bytes"),
        }
    }
}

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Truncated(self.pos))?;
        let bytes = self.buf.get(self.pos..end).ok_or(DecodeError::Truncated(self.pos))?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> DecodeResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> DecodeResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> DecodeResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a possibly-compressed domain name. Pointers resolve against the
    /// whole message; the cursor ends just past the name as it appears here.
    fn name(&mut self) -> DecodeResult<Vec<u8>> {
        let mut name = Vec::new();
        let mut pos = self.pos;
        let mut resume = None;
        let mut jumps = 0;

        loop {
            let len = *self.buf.get(pos).ok_or(DecodeError::Truncated(pos))?;
            match len & 0xc0 {
                0x00 if len == 0 => {
                    pos += 1;
                    break;
                }
                0x00 => {
                    let label_len = usize::from(len);
                    let label = self
                        .buf
                        .get(pos + 1..pos + 1 + label_len)
                        .ok_or(DecodeError::Truncated(pos))?;
                    if !name.is_empty() {
                        name.push(b'.');
                    }
                    name.extend_from_slice(label);
                    if name.len() > MAX_NAME_LEN {
                        return Err(DecodeError::NameTooLong);
                    }
                    pos += 1 + label_len;
                }
                0xc0 => {
                    let low = *self.buf.get(pos + 1).ok_or(DecodeError::Truncated(pos))?;
                    jumps += 1;
                    if jumps > MAX_POINTER_JUMPS {
                        return Err(DecodeError::PointerLoop);
                    }
                    resume.get_or_insert(pos + 2);
                    pos = usize::from(u16::from_be_bytes([len & 0x3f, low]));
                }
                _ => return Err(DecodeError::BadLabel(pos)),
            }
        }

        self.pos = resume.unwrap_or(pos);
        Ok(name)
    }

    /// Sequence of length-prefixed character strings filling `data`.
    fn character_strings(data: &[u8]) -> DecodeResult<Vec<Vec<u8>>> {
        let mut cursor = Cursor::new(data);
        let mut texts = Vec::new();
        while cursor.pos < data.len() {
            let len = usize::from(cursor.u8()?);
            texts.push(cursor.take(len)?.to_vec());
        }
        Ok(texts)
    }

    fn record(&mut self) -> DecodeResult<ResourceRecord> {
        let _owner = self.name()?;
        let rtype = self.u16()?;
        let _class = self.u16()?;
        let _ttl = self.u32()?;
        let rdlength = usize::from(self.u16()?);
        let rdata_start = self.pos;
        let raw = self.take(rdlength)?;

        // Names inside rdata may point anywhere in the message
        let mut inner = Cursor { buf: self.buf, pos: rdata_start };
        let rdata = match rtype {
            TYPE_A => RData::A(raw.to_vec()),
            TYPE_AAAA => RData::Aaaa(raw.to_vec()),
            TYPE_NS | TYPE_CNAME | TYPE_PTR => RData::Name(inner.name()?),
            TYPE_MX => {
                let _preference = inner.u16()?;
                RData::Name(inner.name()?)
            }
            TYPE_SOA => RData::Soa {
                mname: inner.name()?,
                rname: inner.name()?,
                serial: inner.u32()?,
                refresh: inner.u32()?,
                retry: inner.u32()?,
                expire: inner.u32()?,
                minimum: inner.u32()?,
            },
            TYPE_TXT | TYPE_HINFO => RData::Texts(Self::character_strings(raw)?),
            _ => RData::Other,
        };

        Ok(ResourceRecord { rtype, rdata })
    }
}

/// Decodes header, questions and answers of a DNS message.
pub fn decode_message(data: &[u8]) -> DecodeResult<Message> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::Truncated(data.len()));
    }
    let mut cursor = Cursor::new(data);
    let _id = cursor.u16()?;
    let flags = cursor.u16()?;
    let qdcount = cursor.u16()?;
    let ancount = cursor.u16()?;
    let _nscount = cursor.u16()?;
    let _arcount = cursor.u16()?;

    let mut questions = Vec::with_capacity(usize::from(qdcount).min(16));
    for _ in 0..qdcount {
        let name = cursor.name()?;
        let qtype = cursor.u16()?;
        let _qclass = cursor.u16()?;
        questions.push(Question { name, qtype });
    }

    let mut answers = Vec::with_capacity(usize::from(ancount).min(64));
    for _ in 0..ancount {
        answers.push(cursor.record()?);
    }

    Ok(Message {
        qr: flags & 0x8000 != 0,
        opcode: ((flags >> 11) & 0x0f) as u8,
        rcode: (flags & 0x000f) as u8,
        questions,
        answers,
    })
}

fn answer_entry(record: &ResourceRecord) -> Option<DnsAnswer> {
    let rtype = type_label(record.rtype)?;
    let data = match &record.rdata {
        RData::A(bytes) => {
            let octets: [u8; 4] = bytes.as_slice().try_into().ok()?;
            Ipv4Addr::from(octets).to_string()
        }
        RData::Aaaa(bytes) => {
            let octets: [u8; 16] = bytes.as_slice().try_into().ok()?;
            Ipv6Addr::from(octets).to_string()
        }
        RData::Soa { mname, rname, serial, refresh, retry, expire, minimum } => [
            to_printable(mname),
            to_printable(rname),
            serial.to_string(),
            minimum.to_string(),
            refresh.to_string(),
            retry.to_string(),
            expire.to_string(),
        ]
        .join(","),
        RData::Name(name) => to_printable(name),
        RData::Texts(texts) => {
            texts.iter().map(|t| to_printable(t)).collect::<Vec<_>>().join(" ")
        }
        // SRV carries a label but no answer entry
        RData::Other => return None,
    };

    Some(DnsAnswer { rtype, data })
}

/// Returns the query summary for a UDP payload that decodes as DNS.
pub fn scan_for_dns(payload: &[u8]) -> Option<DnsQuery> {
    let message = match decode_message(payload) {
        Ok(message) => message,
        Err(e) => {
            log::trace!("Not a DNS message: {e}");
            return None;
        }
    };

    if !message.looks_clean() {
        return None;
    }

    let question = message.questions.first()?;
    let answers = message.answers.iter().filter_map(answer_entry).collect();

    Some(DnsQuery {
        request: to_printable(&question.name),
        qtype: type_label(question.qtype),
        answers,
    })
}
