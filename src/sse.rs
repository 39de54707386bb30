//! SSE helpers: splitting upstream bytes into lines, classifying `data:` lines,
//! and framing outbound events.

use bytes::Bytes;
use serde::Serialize;

use crate::error::Error;
use crate::models::duckchat::DuckChatEvent;

pub const DONE_SENTINEL: &str = "[DONE]";

/// Longest upstream line accepted before the body is rejected.
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// Incremental line splitter for an SSE body arriving in arbitrary chunks.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to hold no newline.
    scanned: usize,
}

impl LineDecoder {
    /// Feed a chunk and return every line it completed (without the line terminator).
    ///
    /// Fails with [`Error::Parse`] once an unterminated line grows past [`MAX_LINE_LEN`].
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, Error> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(off) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + off;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
            self.scanned = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > MAX_LINE_LEN {
            return Err(Error::Parse(format!(
                "upstream line longer than {MAX_LINE_LEN} bytes"
            )));
        }
        Ok(lines)
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.buf.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buf);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Meaning of one upstream body line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamLine {
    Fragment(String),
    Done,
    Skip,
}

/// Classify a single upstream line.
///
/// Non-`data:` lines and events without a `message` are skipped; undecodable
/// JSON is reported as [`Error::Parse`] so the caller can log it and move on.
pub fn classify_line(line: &str) -> Result<UpstreamLine, Error> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(UpstreamLine::Skip);
    };
    let data = data.trim();
    if data == DONE_SENTINEL {
        return Ok(UpstreamLine::Done);
    }
    if data.is_empty() {
        return Ok(UpstreamLine::Skip);
    }
    let event: DuckChatEvent =
        serde_json::from_str(data).map_err(|e| Error::Parse(format!("{e}: {data}")))?;
    Ok(match event.message {
        Some(text) => UpstreamLine::Fragment(text),
        None => UpstreamLine::Skip,
    })
}

/// Frame a serializable payload as `data: <json>\n\n`.
pub fn data_frame<T: Serialize>(payload: &T) -> Result<Bytes, Error> {
    let json = serde_json::to_string(payload)?;
    Ok(Bytes::from(format!("data: {json}\n\n")))
}

pub fn done_frame() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}
