//! Single-packet TCP classifiers.
//!
//! Every scanner looks at one payload and either produces a finding or
//! nothing. None of them fail: a payload that doesn't look like the protocol
//! is simply not that protocol.
use super::containers::{
    HttpRequest, PacketContext, SshBanner, SshRole, StratumLogin, TlsKind, TlsObservation,
};
use super::utils::to_printable;
use lazy_static::lazy_static;
use regex::bytes::Regex;

pub const HTTPS_PORT: u16 = 443;

/// Request methods accepted on an HTTP/1.x request line.
const HTTP_METHODS: &[&str] = &[
    "GET", "PUT", "ICY", "COPY", "HEAD", "LOCK", "MOVE", "POLL", "POST", "BCOPY", "BMOVE",
    "MKCOL", "TRACE", "LABEL", "MERGE", "DELETE", "SEARCH", "UNLOCK", "REPORT", "UPDATE",
    "NOTIFY", "BDELETE", "CONNECT", "OPTIONS", "CHECKIN", "PROPFIND", "CHECKOUT", "CCM_POST",
    "SUBSCRIBE", "PROPPATCH", "BPROPFIND", "BPROPPATCH", "UNCHECKOUT", "MKACTIVITY",
    "MKWORKSPACE", "UNSUBSCRIBE", "RPC_CONNECT", "VERSION-CONTROL", "BASELINE-CONTROL",
];

/// TLS record content types, change_cipher_spec through heartbeat.
const TLS_CONTENT_TYPES: std::ops::RangeInclusive<u8> = 20..=24;
/// Upper bound on a record length: 2^14 plaintext plus expansion.
const TLS_MAX_RECORD_LEN: usize = 16384 + 2048;
const TLS_HEADER_LEN: usize = 5;

lazy_static! {
    /// Banner followed by a comment segment, as sent by servers.
    static ref SSH_SERVER_RE: Regex =
        Regex::new(r"(?-u)^SSH.*-OpenSSH_\d.*\s.*-.*\r\n$").expect("valid ssh server regex");
    static ref SSH_CLIENT_RE: Regex =
        Regex::new(r"(?-u)^SSH.*-OpenSSH_\d.*\r\n$").expect("valid ssh client regex");
    static ref STRATUM_AUTH_RE: Regex = Regex::new(
        r#"(?-u)^\s*\{.*"method"\s*:\s*"mining\.authorize".*\[\s*"([^"]*)"\s*,\s*"([^"]*)"\s*\]"#
    )
    .expect("valid stratum regex");
}

/// Request line and headers of an HTTP/1.x request.
#[derive(Debug, Default, PartialEq)]
struct ParsedRequest<'a> {
    method: &'a [u8],
    uri: &'a [u8],
    version: &'a [u8],
    headers: Vec<(&'a [u8], &'a [u8])>,
    body: &'a [u8],
}

impl<'a> ParsedRequest<'a> {
    fn header(&self, name: &str) -> Option<&'a [u8]> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| *v)
    }
}

/// Splits off one line, accepting either CRLF or a bare LF terminator.
fn split_line(data: &[u8]) -> (&[u8], Option<&[u8]>) {
    match data.iter().position(|&b| b == b'\n') {
        Some(pos) => {
            let line = &data[..pos];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            (line, Some(&data[pos + 1..]))
        }
        None => (data, None),
    }
}

fn trim(mut s: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = s {
        if first.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = s {
        if last.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    s
}

/// Parses as much of an HTTP request as the payload holds.
///
/// Returns None unless the request line is complete and sane. Headers are
/// taken up to the blank line, end of data, or the first malformed line.
fn parse_http_request(data: &[u8]) -> Option<ParsedRequest<'_>> {
    let (line, mut rest) = split_line(data);
    let mut tokens = line.split(|b| b.is_ascii_whitespace()).filter(|t| !t.is_empty());
    let method = tokens.next()?;
    let uri = tokens.next()?;
    let version = tokens.next()?;
    if tokens.next().is_some() {
        return None;
    }

    let method_str = std::str::from_utf8(method).ok()?;
    if !HTTP_METHODS.contains(&method_str) || !version.starts_with(b"HTTP/") {
        return None;
    }

    let mut request = ParsedRequest { method, uri, version, ..Default::default() };

    while let Some(remaining) = rest {
        let (line, next) = split_line(remaining);
        if line.is_empty() {
            request.body = next.unwrap_or_default();
            break;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            log::trace!("Malformed HTTP header line, stopping header parse");
            break;
        };
        request.headers.push((trim(&line[..colon]), trim(&line[colon + 1..])));
        rest = next;
    }

    let declared_len = request
        .header("content-length")
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|v| v.trim().parse::<usize>().ok());
    if let Some(len) = declared_len {
        request.body = &request.body[..len.min(request.body.len())];
    }

    Some(request)
}

/// Rebuilds `http://host/path` the way a URL library would from its parts.
fn build_uri(host: &str, path: &str) -> String {
    if !path.is_empty() && !path.starts_with('/') {
        format!("http://{host}/{path}")
    } else {
        format!("http://{host}{path}")
    }
}

pub fn scan_for_http(ctx: &PacketContext) -> Option<HttpRequest> {
    let request = parse_http_request(ctx.payload)?;
    let host = request.header("host").map(to_printable);
    let path = to_printable(request.uri);
    let uri = build_uri(host.as_deref().unwrap_or_default(), &path);

    Some(HttpRequest {
        uri,
        host,
        port: ctx.spt,
        payload: to_printable(ctx.payload),
        body: to_printable(request.body),
        path,
        user_agent: request.header("user-agent").map(to_printable),
        version: to_printable(request.version),
        method: to_printable(request.method),
        src: ctx.src.to_string(),
        dst: ctx.dst.to_string(),
    })
}

/// Matches OpenSSH identification strings. The server pattern is strictly
/// more specific, so it is always tried first.
pub fn scan_for_ssh_banner(ctx: &PacketContext) -> Option<SshBanner> {
    let role = if SSH_SERVER_RE.is_match(ctx.payload) {
        SshRole::Server
    } else if SSH_CLIENT_RE.is_match(ctx.payload) {
        SshRole::Client
    } else {
        return None;
    };

    Some(SshBanner {
        timestamp: ctx.timestamp,
        description: role.to_string(),
        role,
        src: ctx.src.to_string(),
        dst: ctx.dst.to_string(),
        spt: ctx.spt,
        dpt: ctx.dpt,
        banner: to_printable(ctx.payload),
    })
}

/// TLS record layer header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlsRecordHeader {
    pub content_type: u8,
    pub version: u16,
    pub length: usize,
}

/// Interprets the start of `data` as a TLS record header.
pub fn parse_tls_record(data: &[u8]) -> Option<TlsRecordHeader> {
    let header = data.get(..TLS_HEADER_LEN)?;
    let content_type = header[0];
    let version = u16::from_be_bytes([header[1], header[2]]);
    let length = usize::from(u16::from_be_bytes([header[3], header[4]]));

    if !TLS_CONTENT_TYPES.contains(&content_type) {
        return None;
    }
    if !(0x0300..=0x0304).contains(&version) {
        return None;
    }
    if length == 0 || length > TLS_MAX_RECORD_LEN {
        return None;
    }

    Some(TlsRecordHeader { content_type, version, length })
}

pub fn tls_version_label(version: u16) -> &'static str {
    match version {
        0x0300 => "SSL 3.0",
        0x0301 => "TLS 1.0",
        0x0302 => "TLS 1.1",
        0x0303 => "TLS 1.2",
        0x0304 => "TLS 1.3",
        _ => "unknown",
    }
}

pub fn scan_for_tls(ctx: &PacketContext) -> Option<TlsObservation> {
    let on_443 = ctx.either_port(HTTPS_PORT);

    let record = parse_tls_record(ctx.payload);
    if let Some(r) = record {
        log::trace!("TLS record type {} length {} from {}", r.content_type, r.length, ctx.src);
    }

    let (kind, record) = match record {
        Some(record) if on_443 => (TlsKind::StreamInitialization, Some(record)),
        Some(record) => (TlsKind::NonStandardPort, Some(record)),
        None if on_443 => (TlsKind::NonTlsOn443, None),
        None => return None,
    };

    Some(TlsObservation {
        timestamp: ctx.timestamp,
        description: match kind {
            TlsKind::NonStandardPort => format!("{kind} spt: {} dpt: {}", ctx.spt, ctx.dpt),
            _ => kind.to_string(),
        },
        kind,
        src: ctx.src.to_string(),
        dst: ctx.dst.to_string(),
        spt: ctx.spt,
        dpt: ctx.dpt,
        content_type: record.map(|r| r.content_type),
        version: record.map(|r| tls_version_label(r.version)),
        payload: record.is_none().then(|| to_printable(ctx.payload)),
    })
}

/// Textual match for a `mining.authorize` JSON-RPC call; no JSON parsing.
pub fn scan_for_stratum(ctx: &PacketContext) -> Option<StratumLogin> {
    let caps = STRATUM_AUTH_RE.captures(ctx.payload)?;
    let user = caps.get(1)?.as_bytes();
    let pass = caps.get(2)?.as_bytes();

    Some(StratumLogin {
        timestamp: ctx.timestamp,
        src: ctx.src.to_string(),
        dst: ctx.dst.to_string(),
        user: to_printable(user),
        pass: to_printable(pass),
        payload: to_printable(ctx.payload),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(payload: &[u8], spt: u16, dpt: u16) -> PacketContext<'_> {
        PacketContext {
            timestamp: 1.5,
            src: "10.0.0.1",
            dst: "10.0.0.2",
            spt,
            dpt,
            payload,
        }
    }

    #[test]
    fn http_get_with_host() {
        let payload = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nUser-Agent: curl/8.0\r\n\r\n";
        let http = scan_for_http(&ctx(payload, 40000, 80)).unwrap();
        assert_eq!(http.method, "GET");
        assert_eq!(http.version, "HTTP/1.1");
        assert_eq!(http.path, "/index.html");
        assert_eq!(http.host.as_deref(), Some("example.com"));
        assert_eq!(http.user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(http.uri, "http://example.com/index.html");
        assert_eq!(http.port, 40000);
        assert_eq!(http.body, "");
    }

    #[test]
    fn http_without_host_leaves_it_empty() {
        let http = scan_for_http(&ctx(b"HEAD /a HTTP/1.0\r\n\r\n", 1, 80)).unwrap();
        assert_eq!(http.host, None);
        assert_eq!(http.uri, "http:///a");
    }

    #[test]
    fn http_body_honours_content_length() {
        let payload = b"POST /login HTTP/1.1\r\nhost: h\r\ncontent-length: 7\r\n\r\nuser=me&extra";
        let http = scan_for_http(&ctx(payload, 1, 80)).unwrap();
        assert_eq!(http.body, "user=me");
        assert_eq!(http.host.as_deref(), Some("h"));
    }

    #[test]
    fn http_truncated_headers_still_reported() {
        let http = scan_for_http(&ctx(b"GET /x HTTP/1.1\r\nHost: a.b\r\nAccept: te", 1, 80)).unwrap();
        assert_eq!(http.host.as_deref(), Some("a.b"));
        assert_eq!(http.uri, "http://a.b/x");
    }

    #[test]
    fn http_rejects_non_requests() {
        for payload in [
            &b"HTTP/1.1 200 OK\r\n\r\n"[..],
            b"continuation of a body",
            b"FETCH / HTTP/1.1\r\n",
            b"GET / SPDY/3\r\n",
            b"GET /\r\n",
            b"\x16\x03\x01\x00\x05hello",
        ] {
            assert!(scan_for_http(&ctx(payload, 1, 80)).is_none());
        }
    }

    #[test]
    fn http_fields_are_sanitized() {
        let http = scan_for_http(&ctx(b"GET /\xff HTTP/1.1\r\nHost: ex\x00\r\n\r\n", 1, 80)).unwrap();
        assert_eq!(http.path, "/\\xff");
        assert_eq!(http.host.as_deref(), Some("ex\\x00"));
        assert!(http.payload.is_ascii());
    }

    #[test]
    fn uri_inserts_missing_slash() {
        assert_eq!(build_uri("h", "x"), "http://h/x");
        assert_eq!(build_uri("h", ""), "http://h");
        assert_eq!(build_uri("", "/p"), "http:///p");
    }

    #[test]
    fn ssh_server_banner_takes_precedence() {
        let payload = b"SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.1\r\n";
        // Both patterns match this banner
        assert!(SSH_CLIENT_RE.is_match(payload));
        let ssh = scan_for_ssh_banner(&ctx(payload, 22, 50000)).unwrap();
        assert_eq!(ssh.role, SshRole::Server);
        assert_eq!(ssh.description, "Potential SSH v2 Server Response");
    }

    #[test]
    fn ssh_client_banner() {
        let ssh = scan_for_ssh_banner(&ctx(b"SSH-2.0-OpenSSH_9.6\r\n", 50000, 22)).unwrap();
        assert_eq!(ssh.role, SshRole::Client);
        assert_eq!(ssh.banner, "SSH-2.0-OpenSSH_9.6\r\n");
    }

    #[test]
    fn ssh_requires_openssh_and_crlf() {
        assert!(scan_for_ssh_banner(&ctx(b"SSH-2.0-dropbear_2022.83\r\n", 1, 22)).is_none());
        assert!(scan_for_ssh_banner(&ctx(b"SSH-2.0-OpenSSH_9.6\n", 1, 22)).is_none());
        assert!(scan_for_ssh_banner(&ctx(b"hello SSH-2.0-OpenSSH_9.6\r\n", 1, 22)).is_none());
    }

    const CLIENT_HELLO_START: &[u8] = b"\x16\x03\x01\x02\x00\x01\x00\x01\xfc\x03\x03";

    #[test]
    fn tls_record_header() {
        let record = parse_tls_record(CLIENT_HELLO_START).unwrap();
        assert_eq!(record.content_type, 0x16);
        assert_eq!(record.version, 0x0301);
        assert_eq!(record.length, 512);

        assert!(parse_tls_record(b"\x16\x03").is_none());
        assert!(parse_tls_record(b"\x10\x03\x01\x00\x10").is_none());
        assert!(parse_tls_record(b"\x17\x02\x00\x00\x10").is_none());
        assert!(parse_tls_record(b"\x17\x03\x03\xff\xff").is_none());
    }

    #[test]
    fn tls_on_443() {
        let tls = scan_for_tls(&ctx(CLIENT_HELLO_START, 50000, 443)).unwrap();
        assert_eq!(tls.kind, TlsKind::StreamInitialization);
        assert_eq!(tls.description, "TLS stream initialization");
        assert_eq!(tls.version, Some("TLS 1.0"));
        assert_eq!(tls.payload, None);
    }

    #[test]
    fn tls_on_other_port_records_ports() {
        let tls = scan_for_tls(&ctx(CLIENT_HELLO_START, 50000, 8443)).unwrap();
        assert_eq!(tls.kind, TlsKind::NonStandardPort);
        assert_eq!(tls.description, "TLS over non-standard port spt: 50000 dpt: 8443");
        assert_eq!((tls.spt, tls.dpt), (50000, 8443));
    }

    #[test]
    fn non_tls_on_443_is_flagged() {
        let tls = scan_for_tls(&ctx(b"GET / HTTP/1.1\r\n\x01", 443, 50000)).unwrap();
        assert_eq!(tls.kind, TlsKind::NonTlsOn443);
        assert_eq!(tls.payload.as_deref(), Some("GET / HTTP/1.1\r\n\\x01"));
        assert_eq!(tls.content_type, None);

        assert!(scan_for_tls(&ctx(b"GET / HTTP/1.1\r\n", 80, 50000)).is_none());
    }

    #[test]
    fn stratum_authorize() {
        let payload = br#"{"params": ["wallet.worker1", "x"], "id": 2, "method": "mining.authorize"}"#;
        // Parameter array ahead of the method isn't the call shape we look for
        assert!(scan_for_stratum(&ctx(payload, 1, 3333)).is_none());

        let payload = br#"{"method": "mining.authorize", "params": ["wallet.worker1", "x"], "id": 2}"#;
        let login = scan_for_stratum(&ctx(payload, 1, 3333)).unwrap();
        assert_eq!(login.user, "wallet.worker1");
        assert_eq!(login.pass, "x");

        let compact = br#"{"id":2,"method":"mining.authorize","params":["u","p"]}"#;
        let login = scan_for_stratum(&ctx(compact, 1, 3333)).unwrap();
        assert_eq!((login.user.as_str(), login.pass.as_str()), ("u", "p"));
    }

    #[test]
    fn stratum_ignores_other_methods() {
        let payload = br#"{"id": 1, "method": "mining.subscribe", "params": ["a", "b"]}"#;
        assert!(scan_for_stratum(&ctx(payload, 1, 3333)).is_none());
    }
}
