//! Run-aborting failures. Anything that goes wrong inside a single record is
//! absorbed by the engine and never surfaces here.
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture file {} doesn't exist", .0.display())]
    NotFound(PathBuf),

    #[error("{} is not a regular file", .0.display())]
    NotAFile(PathBuf),

    #[error("capture file {} is zero bytes in size", .0.display())]
    Empty(PathBuf),

    #[error("{} is not a pcap capture (magic 0x{magic})", .path.display())]
    BadMagic { path: PathBuf, magic: String },

    #[error("{} has an unusable pcap global header: {reason}", .path.display())]
    BadHeader { path: PathBuf, reason: String },

    #[error("{} is a pcapng capture, only legacy pcap is supported", .0.display())]
    PcapNg(PathBuf),

    #[error("unable to open or read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed reading capture records: {0}")]
    Read(String),
}

impl CaptureError {
    /// Process exit code: 1 for input validation, 2 for read failures.
    pub fn exit_code(&self) -> u8 {
        match self {
            CaptureError::Read(_) => 2,
            _ => 1,
        }
    }
}
