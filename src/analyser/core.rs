//! The engine: one pass over the capture, feeding every record through the
//! host tracker and the protocol classifiers.
use super::capture::{decode_frame, CaptureReader, CaptureRecord};
use super::containers::{DecodedFrame, IpVersion, PacketContext, Report, Transport};
use super::dns;
use super::error::Result;
use super::scan;
use super::smtp::{SmtpAccumulator, DEFAULT_BUFFER_LIMIT, SMTP_PORT};
use super::utils::{self, TimePrecision};
use chrono::{DateTime, Utc};
use pcap_parser::Linktype;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Byte cap on each per-destination SMTP buffer.
    pub smtp_buffer_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { smtp_buffer_limit: DEFAULT_BUFFER_LIMIT }
    }
}

/// Counters kept over one run, only used for logging.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunStats {
    pub records: usize,
    pub undecodable: usize,
    pub ipv6: usize,
    pub tcp: usize,
    pub udp: usize,
    pub icmp: usize,
    pub empty: usize,
    pub first_seen: Option<f64>,
    pub last_seen: Option<f64>,
}

impl RunStats {
    fn see(&mut self, timestamp: f64) {
        self.records += 1;
        self.first_seen.get_or_insert(timestamp);
        self.last_seen = Some(timestamp);
    }
}

fn format_timestamp(ts: Option<f64>) -> String {
    ts.and_then(|ts| DateTime::<Utc>::from_timestamp(ts.trunc() as i64, (ts.fract() * 1e9) as u32))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

/// A validated capture, ready to be analysed exactly once.
#[derive(Debug)]
pub struct Engine {
    path: PathBuf,
    precision: TimePrecision,
    config: EngineConfig,
}

impl Engine {
    /// Checks the capture file. Nothing is read past the magic number yet.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let path = path.as_ref();
        let precision = utils::validate_capture(path)?;
        log::info!("Validated capture {} ({precision:?}second timestamps)", path.display());
        Ok(Self { path: path.to_path_buf(), precision, config })
    }

    /// Streams every record, finalizes the SMTP sessions and hands back the report.
    pub fn run(self) -> Result<Report> {
        log::info!("Starting analysis.");
        let mut reader = CaptureReader::open(&self.path, self.precision)?;
        let mut pass = Pass::new(&self.config);

        while let Some(record) = reader.next_record()? {
            pass.process(reader.linktype(), &record);
        }

        let (report, stats) = pass.finalize();
        log::info!(
            "Processed {} records ({} ipv6, {} tcp, {} udp, {} icmp, {} empty, {} undecodable) between {} and {}",
            stats.records,
            stats.ipv6,
            stats.tcp,
            stats.udp,
            stats.icmp,
            stats.empty,
            stats.undecodable,
            format_timestamp(stats.first_seen),
            format_timestamp(stats.last_seen),
        );
        log::info!(
            "Found {} hosts, {} domains, {} http, {} dns, {} ssh, {} ssl, {} stratum, {} smtp",
            report.hosts.len(),
            report.domains.len(),
            report.http.len(),
            report.dns.len(),
            report.ssh.len(),
            report.ssl.len(),
            report.stratum.len(),
            report.smtp.len(),
        );
        Ok(report)
    }
}

/// State of the streaming pass.
struct Pass {
    report: Report,
    smtp: SmtpAccumulator,
    stats: RunStats,
}

impl Pass {
    fn new(config: &EngineConfig) -> Self {
        Self {
            report: Report::default(),
            smtp: SmtpAccumulator::new(config.smtp_buffer_limit),
            stats: RunStats::default(),
        }
    }

    fn process(&mut self, linktype: Linktype, record: &CaptureRecord) {
        self.stats.see(record.timestamp);

        let (src, dst, transport) = match decode_frame(linktype, &record.data) {
            DecodedFrame::Ip { version, src, dst, transport } => {
                if version == IpVersion::V6 {
                    self.stats.ipv6 += 1;
                }
                (src, dst, transport)
            }
            DecodedFrame::Unknown => {
                self.stats.undecodable += 1;
                return;
            }
        };

        self.report.add_hosts(&src, &dst);

        let (spt, dpt, payload, is_tcp) = match transport {
            Transport::Tcp { spt, dpt, payload } => (spt, dpt, payload, true),
            Transport::Udp { spt, dpt, payload } => (spt, dpt, payload, false),
            Transport::Icmp => {
                self.stats.icmp += 1;
                return;
            }
            Transport::Other => return,
        };

        if payload.is_empty() {
            self.stats.empty += 1;
            return;
        }

        let ctx = PacketContext {
            timestamp: record.timestamp,
            src: &src,
            dst: &dst,
            spt,
            dpt,
            payload,
        };

        if is_tcp {
            self.process_tcp(&ctx);
        } else {
            self.process_udp(&ctx);
        }
    }

    fn process_tcp(&mut self, ctx: &PacketContext) {
        self.stats.tcp += 1;
        self.report.tcp_connections.push(ctx.flow());

        if let Some(http) = scan::scan_for_http(ctx) {
            log::debug!("HTTP {} {} from {}", http.method, http.uri, ctx.src);
            self.report.http.push(http);
        }
        if let Some(ssh) = scan::scan_for_ssh_banner(ctx) {
            log::debug!("{} {} -> {}", ssh.description, ctx.src, ctx.dst);
            self.report.ssh.push(ssh);
        }
        if let Some(tls) = scan::scan_for_tls(ctx) {
            log::debug!("{} {}:{} -> {}:{}", tls.description, ctx.src, ctx.spt, ctx.dst, ctx.dpt);
            self.report.ssl.push(tls);
        }
        if let Some(login) = scan::scan_for_stratum(ctx) {
            log::debug!("Stratum login for {} to {}", login.user, ctx.dst);
            self.report.stratum.push(login);
        }
        if ctx.dpt == SMTP_PORT {
            self.smtp.accumulate(ctx.dst, ctx.payload);
        }
    }

    fn process_udp(&mut self, ctx: &PacketContext) {
        self.stats.udp += 1;
        self.report.udp_connections.push(ctx.flow());

        if let Some(query) = dns::scan_for_dns(ctx.payload) {
            log::debug!("DNS {} ({} answers)", query.request, query.answers.len());
            self.report.add_domain(&query.request);
            self.report.dns.push(query);
        }
    }

    fn finalize(self) -> (Report, RunStats) {
        let Pass { mut report, smtp, stats } = self;
        log::debug!("Finalizing {} buffered SMTP destinations", smtp.len());
        report.smtp = smtp.finalize();
        (report, stats)
    }
}
