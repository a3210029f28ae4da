use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Append-only set that remembers first-seen order.
#[derive(Clone, Debug, Default)]
pub struct OrderedSet {
    seen: HashSet<String>,
    items: Vec<String>,
}

impl OrderedSet {
    /// Returns true if the value was not present before.
    pub fn insert(&mut self, value: &str) -> bool {
        if self.contains(value) {
            return false;
        }
        self.seen.insert(value.to_string());
        self.items.push(value.to_string());
        true
    }

    pub fn contains(&self, value: &str) -> bool {
        self.seen.contains(value)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.items.iter()
    }
}

impl Serialize for OrderedSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

/// Network layer of a decoded record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

/// Transport layer of a decoded record, borrowing the record's bytes.
#[derive(Clone, Copy, Debug)]
pub enum Transport<'a> {
    Tcp { spt: u16, dpt: u16, payload: &'a [u8] },
    Udp { spt: u16, dpt: u16, payload: &'a [u8] },
    Icmp,
    Other,
}

/// Result of running the frame decoder over one capture record.
#[derive(Clone, Debug)]
pub enum DecodedFrame<'a> {
    Ip {
        version: IpVersion,
        src: String,
        dst: String,
        transport: Transport<'a>,
    },
    Unknown,
}

/// Everything a classifier gets to see about one packet.
#[derive(Clone, Copy, Debug)]
pub struct PacketContext<'a> {
    pub timestamp: f64,
    pub src: &'a str,
    pub dst: &'a str,
    pub spt: u16,
    pub dpt: u16,
    pub payload: &'a [u8],
}

impl<'a> PacketContext<'a> {
    pub fn flow(&self) -> FlowRecord {
        FlowRecord {
            timestamp: self.timestamp,
            src: self.src.to_string(),
            dst: self.dst.to_string(),
            spt: self.spt,
            dpt: self.dpt,
        }
    }

    pub fn either_port(&self, port: u16) -> bool {
        self.spt == port || self.dpt == port
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FlowRecord {
    pub timestamp: f64,
    pub src: String,
    pub dst: String,
    pub spt: u16,
    pub dpt: u16,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HttpRequest {
    pub host: Option<String>,
    pub port: u16,
    pub payload: String,
    pub uri: String,
    pub body: String,
    pub path: String,
    #[serde(rename = "user-agent")]
    pub user_agent: Option<String>,
    pub version: String,
    pub method: String,
    pub src: String,
    pub dst: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DnsAnswer {
    #[serde(rename = "type")]
    pub rtype: &'static str,
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DnsQuery {
    pub request: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub qtype: Option<&'static str>,
    pub answers: Vec<DnsAnswer>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SshRole {
    Server,
    Client,
}

impl fmt::Display for SshRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SshRole::Server => write!(f, "Potential SSH v2 Server Response"),
            SshRole::Client => write!(f, "Potential SSH v2 Client Connection"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SshBanner {
    pub timestamp: f64,
    pub description: String,
    pub role: SshRole,
    pub src: String,
    pub dst: String,
    pub spt: u16,
    pub dpt: u16,
    pub banner: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TlsKind {
    StreamInitialization,
    NonStandardPort,
    NonTlsOn443,
}

impl fmt::Display for TlsKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TlsKind::StreamInitialization => write!(f, "TLS stream initialization"),
            TlsKind::NonStandardPort => write!(f, "TLS over non-standard port"),
            TlsKind::NonTlsOn443 => write!(f, "non-TLS traffic on port 443"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TlsObservation {
    pub timestamp: f64,
    pub description: String,
    pub kind: TlsKind,
    pub src: String,
    pub dst: String,
    pub spt: u16,
    pub dpt: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StratumLogin {
    pub timestamp: f64,
    pub src: String,
    pub dst: String,
    pub user: String,
    pub pass: String,
    pub payload: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SmtpSession {
    pub dest: String,
    pub payload: String,
}

/// The summary of one capture. Serialized field names are fixed.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Report {
    pub hosts: OrderedSet,
    pub domains: OrderedSet,
    pub dns: Vec<DnsQuery>,
    pub http: Vec<HttpRequest>,
    pub tcp_connections: Vec<FlowRecord>,
    pub udp_connections: Vec<FlowRecord>,
    /// Reserved, never populated.
    pub icmp_requests: Vec<serde_json::Value>,
    pub smtp: Vec<SmtpSession>,
    /// Reserved, never populated.
    pub irc: Vec<serde_json::Value>,
    pub stratum: Vec<StratumLogin>,
    pub ssl: Vec<TlsObservation>,
    pub ssh: Vec<SshBanner>,
}

impl Report {
    pub fn add_hosts(&mut self, src: &str, dst: &str) {
        self.hosts.insert(src);
        self.hosts.insert(dst);
    }

    pub fn add_domain(&mut self, domain: &str) {
        self.domains.insert(domain);
    }

    /// Every address mentioned by a flow or finding.
    #[cfg(test)]
    pub fn referenced_addresses(&self) -> Vec<&str> {
        let mut addrs = Vec::new();
        for flow in self.tcp_connections.iter().chain(self.udp_connections.iter()) {
            addrs.push(flow.src.as_str());
            addrs.push(flow.dst.as_str());
        }
        for h in &self.http {
            addrs.push(h.src.as_str());
            addrs.push(h.dst.as_str());
        }
        for s in &self.ssh {
            addrs.push(s.src.as_str());
            addrs.push(s.dst.as_str());
        }
        for t in &self.ssl {
            addrs.push(t.src.as_str());
            addrs.push(t.dst.as_str());
        }
        for s in &self.stratum {
            addrs.push(s.src.as_str());
            addrs.push(s.dst.as_str());
        }
        for s in &self.smtp {
            addrs.push(s.dest.as_str());
        }
        addrs
    }
}
