//! Reading capture records off disk and decoding their headers.
use super::containers::{DecodedFrame, IpVersion, Transport};
use super::error::{CaptureError, Result};
use super::utils::TimePrecision;
use etherparse::{LaxNetSlice, LaxSlicedPacket, TransportSlice};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, Linktype, PcapBlockOwned, PcapError};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Reader buffer size; must hold the largest single record.
const READER_CAPACITY: usize = 1 << 18;

const LINUX_SLL_HEADER_LEN: usize = 16;
const BSD_LOOPBACK_HEADER_LEN: usize = 4;

/// One timestamped raw packet.
#[derive(Clone, Debug)]
pub struct CaptureRecord {
    pub timestamp: f64,
    pub data: Vec<u8>,
}

/// Sequential reader over the records of a legacy pcap file.
pub struct CaptureReader {
    reader: LegacyPcapReader<BufReader<File>>,
    precision: TimePrecision,
    linktype: Linktype,
    finished: bool,
}

impl CaptureReader {
    pub fn open(path: &Path, precision: TimePrecision) -> Result<Self> {
        let file = File::open(path)
            .map_err(|source| CaptureError::Unreadable { path: path.to_path_buf(), source })?;
        let reader = LegacyPcapReader::new(READER_CAPACITY, BufReader::new(file)).map_err(|e| {
            CaptureError::BadHeader { path: path.to_path_buf(), reason: format!("{e:?}") }
        })?;

        log::info!("Reading from {}", path.display());

        Ok(Self {
            reader,
            precision,
            linktype: Linktype::ETHERNET,
            finished: false,
        })
    }

    pub fn linktype(&self) -> Linktype {
        self.linktype
    }

    /// Returns the next packet record, `Ok(None)` once the capture is exhausted.
    ///
    /// A record cut short at the end of the file ends the capture rather than
    /// failing it.
    pub fn next_record(&mut self) -> Result<Option<CaptureRecord>> {
        while !self.finished {
            let record = match self.reader.next() {
                Ok((offset, block)) => {
                    let record = match block {
                        PcapBlockOwned::LegacyHeader(header) => {
                            log::debug!("Capture link type {:?}", header.network);
                            self.linktype = header.network;
                            None
                        }
                        PcapBlockOwned::Legacy(packet) => Some(CaptureRecord {
                            timestamp: self.precision.timestamp(packet.ts_sec, packet.ts_usec),
                            data: packet.data.to_vec(),
                        }),
                        PcapBlockOwned::NG(_) => {
                            log::warn!("pcapng block encountered in a legacy capture, skipping");
                            None
                        }
                    };
                    self.reader.consume(offset);
                    record
                }
                Err(PcapError::Eof) => {
                    self.finished = true;
                    None
                }
                Err(PcapError::UnexpectedEof) => {
                    log::warn!("Capture ends with a truncated record, ignoring it");
                    self.finished = true;
                    None
                }
                Err(PcapError::Incomplete(_)) => {
                    if let Err(e) = self.reader.refill() {
                        return Err(CaptureError::Read(format!("refill error: {e:?}")));
                    }
                    None
                }
                Err(e) => return Err(CaptureError::Read(format!("{e:?}"))),
            };

            if record.is_some() {
                return Ok(record);
            }
        }
        Ok(None)
    }
}

fn slice_ip(data: &[u8]) -> std::result::Result<LaxSlicedPacket<'_>, String> {
    LaxSlicedPacket::from_ip(data).map_err(|e| e.to_string())
}

/// Runs the link, network and transport decoders over one record.
///
/// Decoding is lax about lengths: a record cut short by the capture snaplen
/// still yields its headers and whatever payload was captured. Anything that
/// cannot be decoded down to an IP header comes back as [DecodedFrame::Unknown].
pub fn decode_frame(linktype: Linktype, data: &[u8]) -> DecodedFrame<'_> {
    let sliced = match linktype {
        Linktype::ETHERNET => LaxSlicedPacket::from_ethernet(data).map_err(|e| e.to_string()),
        Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => slice_ip(data),
        Linktype::NULL => slice_ip(data.get(BSD_LOOPBACK_HEADER_LEN..).unwrap_or_default()),
        Linktype::LINUX_SLL => slice_ip(data.get(LINUX_SLL_HEADER_LEN..).unwrap_or_default()),
        other => {
            log::trace!("Unsupported link type {other:?}");
            return DecodedFrame::Unknown;
        }
    };

    let packet = match sliced {
        Ok(packet) => packet,
        Err(e) => {
            log::trace!("Frame decode failed: {e}");
            return DecodedFrame::Unknown;
        }
    };
    if let Some((err, layer)) = &packet.stop_err {
        log::trace!("Frame decode stopped at {layer:?}: {err}");
    }

    let (version, src, dst) = match &packet.net {
        Some(LaxNetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            (IpVersion::V4, header.source_addr().to_string(), header.destination_addr().to_string())
        }
        Some(LaxNetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            (IpVersion::V6, header.source_addr().to_string(), header.destination_addr().to_string())
        }
        None => return DecodedFrame::Unknown,
    };

    let transport = match packet.transport {
        Some(TransportSlice::Tcp(tcp)) => Transport::Tcp {
            spt: tcp.source_port(),
            dpt: tcp.destination_port(),
            payload: tcp.payload(),
        },
        Some(TransportSlice::Udp(udp)) => Transport::Udp {
            spt: udp.source_port(),
            dpt: udp.destination_port(),
            payload: udp.payload(),
        },
        Some(TransportSlice::Icmpv4(_)) | Some(TransportSlice::Icmpv6(_)) => Transport::Icmp,
        _ => Transport::Other,
    };

    DecodedFrame::Ip { version, src, dst, transport }
}
