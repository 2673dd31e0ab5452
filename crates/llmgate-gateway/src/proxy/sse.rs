//! Incremental Server-Sent-Events decoder
//!
//! Splits an upstream byte stream into event payloads (`data:` lines joined
//! with `\n`). Comments and non-data fields are dropped.

use bytes::{Buf, BytesMut};

/// End of stream in the middle of an event that cannot stand on its own
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upstream stream ended mid-event ({pending} bytes pending)")]
pub struct TruncatedFrame {
    pub pending: usize,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
    /// Prefix of `buf` already known to hold no newline
    scanned: usize,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk; returns every event completed by it, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(self.scanned + offset);
            self.buf.advance(1);
            self.scanned = 0;
            if let Some(event) = self.line(&line) {
                events.push(event);
            }
        }
        self.scanned = self.buf.len();
        events
    }

    /// Flush at end of stream.
    ///
    /// A final event without its blank-line terminator is accepted when it is
    /// complete on its own (`[DONE]` or a full JSON document).
    pub fn finish(mut self) -> Result<Option<String>, TruncatedFrame> {
        if !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            if let Some(event) = self.line(&line) {
                return Ok(Some(event));
            }
        }

        if self.data.is_empty() {
            return Ok(None);
        }

        let event = self.data.join("\n");
        if event == "[DONE]" || serde_json::from_str::<serde::de::IgnoredAny>(&event).is_ok() {
            Ok(Some(event))
        } else {
            Err(TruncatedFrame {
                pending: event.len(),
            })
        }
    }

    fn line(&mut self, raw: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(raw);
        let line = line.strip_suffix('\r').unwrap_or(&line);

        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let event = self.data.join("\n");
            self.data.clear();
            return Some(event);
        }

        if line.starts_with(':') {
            return None;
        }

        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        None
    }
}
