//! Incremental decoder for the unframed Docker event stream.
//!
//! The daemon writes event documents back to back with no length prefix or
//! delimiter we can rely on, so records are recovered by brace-depth
//! tracking. A record is the exact span from a top-level `{` to its matching
//! `}`; bytes between records (newlines, whitespace) are skipped.
//!
//! Braces inside JSON string literals do not move the depth counter: the
//! scanner tracks whether it is inside a string and whether the previous
//! byte was a backslash escape.
//!
//! ```text
//!   AsyncRead ──chunk──► EventDecoder::feed(byte) ──► RawEventRecord
//!       ▲                                                   │
//!   cancel ─── select! ─┘                        decode_records() stream
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::io;

use futures::Stream;
use futures::stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

/// Bytes requested from the reader per read call.
const READ_CHUNK_SIZE: usize = 4096;

/// One syntactically complete event document lifted from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEventRecord {
    text: String,
}

impl RawEventRecord {
    /// Wrap already-delimited record text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// The record text, braces included.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consume the record, returning its text.
    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for RawEventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Streaming bracket-matching scanner.
///
/// Feed it bytes one at a time; it returns a record each time the depth
/// returns to zero. Depth is zero between records and never goes negative:
/// a stray `}` outside a record is skipped like any other inter-record byte.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl EventDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current brace depth (zero between records).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether a partial record is buffered.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Drop any partial record and return to depth zero.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }

    /// Consume one byte, returning a record if it closed one.
    pub fn feed(&mut self, byte: u8) -> Option<RawEventRecord> {
        if self.depth == 0 && byte != b'{' {
            return None;
        }

        self.buffer.push(byte);

        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return None;
        }

        match byte {
            b'"' => self.in_string = true,
            b'{' => self.depth += 1,
            b'}' => {
                self.depth -= 1;
                if self.depth == 0 {
                    return Some(self.take_record());
                }
            }
            _ => {}
        }

        None
    }

    /// Feed a slice, collecting every record it completes.
    pub fn feed_slice(&mut self, bytes: &[u8]) -> Vec<RawEventRecord> {
        bytes.iter().filter_map(|&b| self.feed(b)).collect()
    }

    fn take_record(&mut self) -> RawEventRecord {
        let bytes = std::mem::take(&mut self.buffer);
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        RawEventRecord { text }
    }
}

struct RecordStream<R> {
    reader: R,
    decoder: EventDecoder,
    pending: VecDeque<RawEventRecord>,
    chunk: Box<[u8]>,
    cancel: CancellationToken,
    finished: bool,
}

/// Turn a live byte stream into a lazy stream of event records.
///
/// The stream ends when the reader reports end of data or `cancel` fires;
/// in both cases a partially buffered record is discarded without error.
/// A read failure is yielded once as `Err` and then the stream ends.
pub fn decode_records<R>(
    reader: R,
    cancel: CancellationToken,
) -> impl Stream<Item = io::Result<RawEventRecord>> + Send
where
    R: AsyncRead + Unpin + Send,
{
    let state = RecordStream {
        reader,
        decoder: EventDecoder::new(),
        pending: VecDeque::new(),
        chunk: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
        cancel,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.cancel.is_cancelled() {
                state.discard_partial("cancelled");
                return None;
            }
            if let Some(record) = state.pending.pop_front() {
                return Some((Ok(record), state));
            }
            if state.finished {
                return None;
            }

            let read = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => {
                    state.discard_partial("cancelled");
                    return None;
                }
                read = state.reader.read(&mut state.chunk) => read,
            };

            match read {
                Ok(0) => {
                    state.discard_partial("end of stream");
                    state.finished = true;
                }
                Ok(n) => {
                    let records = state.decoder.feed_slice(&state.chunk[..n]);
                    state.pending.extend(records);
                }
                Err(e) => {
                    state.discard_partial("read error");
                    state.finished = true;
                    return Some((Err(e), state));
                }
            }
        }
    })
}

impl<R> RecordStream<R> {
    fn discard_partial(&mut self, reason: &str) {
        if self.decoder.has_partial() {
            tracing::trace!(
                depth = self.decoder.depth(),
                reason,
                "Discarding partial event record"
            );
        }
        self.decoder.reset();
    }
}
