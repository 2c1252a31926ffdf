//! Bounded output capture.
//!
//! Job output can be arbitrarily large. Runs keep the most recent bytes since
//! the end of a log (final result, error message) is what an operator looks
//! at first. When bytes are dropped a one-line marker is prepended.

use std::collections::VecDeque;

/// Default maximum bytes retained per run (16 KiB).
pub const DEFAULT_MAX_BYTES: usize = 16 * 1024;

/// Ring buffer that keeps the last `cap` bytes written to it.
#[derive(Debug)]
pub struct TailBuffer {
    buf: VecDeque<u8>,
    cap: usize,
    dropped: usize,
}

impl TailBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(cap.min(DEFAULT_MAX_BYTES)),
            cap,
            dropped: 0,
        }
    }

    /// Append `chunk`, evicting the oldest bytes once `cap` is exceeded.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.cap == 0 {
            self.dropped += chunk.len();
            return;
        }
        // Only the tail of an oversized chunk can survive.
        let chunk = if chunk.len() > self.cap {
            let skip = chunk.len() - self.cap;
            self.dropped += skip;
            &chunk[skip..]
        } else {
            chunk
        };
        let overflow = (self.buf.len() + chunk.len()).saturating_sub(self.cap);
        if overflow > 0 {
            self.buf.drain(..overflow);
            self.dropped += overflow;
        }
        self.buf.extend(chunk);
    }

    /// Number of bytes evicted so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Render the retained bytes as text.
    ///
    /// ANSI escapes are stripped. If eviction split a multi-byte UTF-8
    /// sequence, the orphaned continuation bytes at the front are skipped.
    pub fn to_text(&self) -> String {
        let (front, back) = self.buf.as_slices();
        let mut raw = Vec::with_capacity(self.buf.len());
        raw.extend_from_slice(front);
        raw.extend_from_slice(back);

        let start = if self.dropped > 0 {
            raw.iter().take_while(|b| (**b & 0xC0) == 0x80).count()
        } else {
            0
        };
        let clean = strip_ansi_escapes::strip(&raw[start..]);
        let text = String::from_utf8_lossy(&clean).into_owned();

        if self.dropped > 0 {
            format!("[output truncated: {} earlier bytes dropped]\n{text}", self.dropped)
        } else {
            text
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
