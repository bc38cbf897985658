//! Byte-stream framing for the daemon's JSON-RPC socket.
//!
//! The daemon writes JSON objects back to back, separated by optional
//! whitespace. Each complete top-level object or array is one frame. A
//! syntax error does not poison the stream: the bad bytes up to the next
//! newline are dropped and reported as a `Frame::Malformed`, and decoding
//! resumes after them.

use std::io;

use bytes::{Buf, BytesMut};
use serde::Serialize;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

/// Largest single frame accepted from the daemon (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// How much of a malformed frame is kept for diagnostics.
const MALFORMED_PREVIEW_LEN: usize = 120;

/// One decoded unit of the inbound stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(Value),
    Malformed(String),
}

/// JSON frame codec.
///
/// Decodes concatenated JSON objects or arrays; encodes any `Serialize` as
/// compact JSON followed by a newline.
///
/// Incoming bytes are scanned once: bracket depth and string state carry
/// over between `decode` calls, and serde_json only sees a frame once its
/// closing bracket has arrived.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_len: usize,
    scan: FrameScan,
    #[cfg(test)]
    parse_attempts: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    /// Creates a codec with a custom frame limit.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            scan: FrameScan::default(),
            #[cfg(test)]
            parse_attempts: 0,
        }
    }

    /// Drops bytes from the front of `src` through the first newline at or
    /// after `from`. Without a newline, drops `from` bytes, or the whole
    /// buffer when `from` is zero.
    fn take_malformed(
        &mut self,
        src: &mut BytesMut,
        from: usize,
        reason: impl std::fmt::Display,
    ) -> Frame {
        self.scan = FrameScan::default();
        let from = from.min(src.len());
        let fallback = if from == 0 { src.len() } else { from };
        let cut = src
            .get(from..)
            .and_then(|rest| rest.iter().position(|b| *b == b'\n'))
            .map_or(fallback, |pos| from.saturating_add(pos).saturating_add(1));
        let preview_end = cut.min(MALFORMED_PREVIEW_LEN);
        let preview = String::from_utf8_lossy(src.get(..preview_end).unwrap_or_default())
            .trim()
            .to_string();
        src.advance(cut);
        Frame::Malformed(format!("{reason} (near {preview:?})"))
    }

    fn parse(&mut self, bytes: &[u8]) -> serde_json::Result<Value> {
        #[cfg(test)]
        {
            self.parse_attempts += 1;
        }
        serde_json::from_slice(bytes)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if !self.scan.started() {
            match src.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(start) => src.advance(start),
                None => {
                    src.clear();
                    return Ok(None);
                }
            }
            if !matches!(src.first().copied(), Some(b'{' | b'[')) {
                return Ok(Some(self.take_malformed(src, 0, "expected a JSON object or array")));
            }
        }

        let Some(end) = self.scan.advance(src) else {
            if src.len() > self.max_frame_len {
                let len = src.len();
                src.clear();
                self.scan = FrameScan::default();
                return Ok(Some(Frame::Malformed(format!(
                    "frame exceeds {} bytes (buffered {len})",
                    self.max_frame_len
                ))));
            }
            return Ok(None);
        };

        let parsed = self.parse(src.get(..end).unwrap_or_default());
        match parsed {
            Ok(value) => {
                src.advance(end);
                self.scan = FrameScan::default();
                Ok(Some(Frame::Message(value)))
            }
            Err(err) => Ok(Some(self.take_malformed(src, end, err))),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.iter().any(|b| !b.is_ascii_whitespace()) => {
                let len = src.len();
                Ok(Some(self.take_malformed(src, len, "truncated frame at end of stream")))
            }
            None => Ok(None),
        }
    }
}

// ============================================================================
// Frame Boundary Scan
// ============================================================================

/// Resumable scan for the end of one top-level JSON object or array.
#[derive(Debug, Clone, Default)]
struct FrameScan {
    /// Bytes of the current frame already examined.
    offset: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl FrameScan {
    fn started(&self) -> bool {
        self.offset > 0
    }

    /// Examines the bytes not seen yet and returns the frame length once
    /// the outermost bracket closes.
    fn advance(&mut self, buf: &[u8]) -> Option<usize> {
        let unseen = buf.get(self.offset..).unwrap_or_default();
        for (i, &byte) in unseen.iter().enumerate() {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth = self.depth.saturating_add(1),
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        let end = self.offset.saturating_add(i).saturating_add(1);
                        self.offset = end;
                        return Some(end);
                    }
                }
                _ => {}
            }
        }
        self.offset = buf.len();
        None
    }
}

impl<T: Serialize> Encoder<T> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), io::Error> {
        let json = serde_json::to_vec(&item).map_err(io::Error::from)?;
        dst.reserve(json.len().saturating_add(1));
        dst.extend_from_slice(&json);
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}
