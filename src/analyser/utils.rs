//! Contains utilities and helper functions shared by the classifiers and the engine.
use super::error::{CaptureError, Result};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

/// Legacy pcap magic numbers as they appear on disk.
const PCAP_MAGIC_US_BE: [u8; 4] = [0xa1, 0xb2, 0xc3, 0xd4];
const PCAP_MAGIC_US_LE: [u8; 4] = [0xd4, 0xc3, 0xb2, 0xa1];
const PCAP_MAGIC_NS_BE: [u8; 4] = [0xa1, 0xb2, 0x3c, 0x4d];
const PCAP_MAGIC_NS_LE: [u8; 4] = [0x4d, 0x3c, 0xb2, 0xa1];
const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];

/// Resolution of the record timestamps in a capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimePrecision {
    Micro,
    Nano,
}

impl TimePrecision {
    pub fn timestamp(self, ts_sec: u32, ts_frac: u32) -> f64 {
        let divisor = match self {
            TimePrecision::Micro => 1_000_000.0,
            TimePrecision::Nano => 1_000_000_000.0,
        };
        f64::from(ts_sec) + f64::from(ts_frac) / divisor
    }
}

/// Checks that `path` names an existing, non-empty legacy pcap file.
///
/// Only the magic number is inspected; the remainder of the global header is
/// left to the pcap reader.
pub fn validate_capture(path: &Path) -> Result<TimePrecision> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CaptureError::NotFound(path.to_path_buf()))
        }
        Err(source) => return Err(CaptureError::Unreadable { path: path.to_path_buf(), source }),
    };

    if !meta.is_file() {
        return Err(CaptureError::NotAFile(path.to_path_buf()));
    }
    if meta.len() == 0 {
        return Err(CaptureError::Empty(path.to_path_buf()));
    }

    let mut magic = [0u8; 4];
    let read = File::open(path)
        .and_then(|mut f| f.read(&mut magic))
        .map_err(|source| CaptureError::Unreadable { path: path.to_path_buf(), source })?;

    match magic {
        _ if read < magic.len() => Err(CaptureError::BadMagic {
            path: path.to_path_buf(),
            magic: hex::encode(&magic[..read]),
        }),
        PCAP_MAGIC_US_BE | PCAP_MAGIC_US_LE => Ok(TimePrecision::Micro),
        PCAP_MAGIC_NS_BE | PCAP_MAGIC_NS_LE => Ok(TimePrecision::Nano),
        PCAPNG_MAGIC => Err(CaptureError::PcapNg(path.to_path_buf())),
        other => Err(CaptureError::BadMagic { path: path.to_path_buf(), magic: hex::encode(other) }),
    }
}

/// Printable in the sense of ASCII letters, digits, punctuation and whitespace.
/// The backslash is excluded so escapes stay unambiguous.
fn is_printable(b: u8) -> bool {
    (b.is_ascii_graphic() && b != b'\\') || matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

/// Converts raw bytes into a display-safe string, replacing every byte that
/// isn't printable with a `\xNN` escape.
pub fn to_printable(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        if is_printable(b) {
            out.push(char::from(b));
        } else {
            out.push_str("\\x");
            out.push_str(&hex::encode([b]));
        }
    }
    out
}
