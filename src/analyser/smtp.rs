//! SMTP session reassembly.
//!
//! Payloads headed for port 25 are buffered per destination address (not per
//! flow, so concurrent sessions to one server share a buffer). Nothing is
//! reported until [SmtpAccumulator::finalize] runs after the last packet.
use super::containers::SmtpSession;
use super::utils::to_printable;
use std::collections::HashMap;

pub const SMTP_PORT: u16 = 25;
pub const DEFAULT_BUFFER_LIMIT: usize = 1 << 20;

const SESSION_START: &[u8] = b"HELO";

#[derive(Debug)]
pub struct SmtpAccumulator {
    index: HashMap<String, usize>,
    buffers: Vec<(String, Vec<u8>)>,
    limit: usize,
}

impl SmtpAccumulator {
    pub fn new(limit: usize) -> Self {
        Self { index: HashMap::new(), buffers: Vec::new(), limit }
    }

    /// Appends `payload` to the buffer for `dest`, up to the byte limit.
    pub fn accumulate(&mut self, dest: &str, payload: &[u8]) {
        let slot = match self.index.get(dest) {
            Some(&slot) => slot,
            None => {
                self.index.insert(dest.to_string(), self.buffers.len());
                self.buffers.push((dest.to_string(), Vec::new()));
                self.buffers.len() - 1
            }
        };

        let buffer = &mut self.buffers[slot].1;
        let room = self.limit.saturating_sub(buffer.len());
        if payload.len() > room {
            log::debug!("SMTP buffer for {dest} full, dropping {} bytes", payload.len() - room);
        }
        buffer.extend_from_slice(&payload[..payload.len().min(room)]);
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Emits one session per buffer that opens with `HELO`, in first-seen order.
    pub fn finalize(self) -> Vec<SmtpSession> {
        let total = self.buffers.len();
        let sessions: Vec<SmtpSession> = self
            .buffers
            .into_iter()
            .filter(|(_, data)| data.starts_with(SESSION_START))
            .map(|(dest, data)| SmtpSession { dest, payload: to_printable(&data) })
            .collect();

        log::debug!("SMTP: {} of {total} buffered destinations look like sessions", sessions.len());
        sessions
    }
}

impl Default for SmtpAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_LIMIT)
    }
}
