//! Delimiter framing for the event stream
//!
//! The server writes JSON documents back to back, each terminated by the
//! ASCII record separator (`0x1E`). Chunks from the network split documents
//! at arbitrary points, so the framer keeps the trailing partial segment
//! until its delimiter arrives.

use crate::error::{FeedError, Result};
use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::time::Duration;

/// Record separator between documents
pub const DELIMITER: u8 = 0x1E;

/// How long a read may block before the stream counts as stalled
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(65);

/// Incremental splitter for one connection's byte stream
///
/// A framer belongs to exactly one connection attempt and is dropped with it;
/// leftover bytes never leak into the next connection.
#[derive(Debug, Default)]
pub struct StreamFramer {
    buffer: BytesMut,
    /// Prefix of `buffer` already known to contain no delimiter
    scanned: usize,
}

impl StreamFramer {
    /// Create an empty framer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk read from the network
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Decode the next complete document, if one is buffered
    ///
    /// Returns `None` once only a partial segment remains.
    pub fn next_document(&mut self) -> Option<Result<serde_json::Value>> {
        loop {
            let offset = self.buffer[self.scanned..]
                .iter()
                .position(|b| *b == DELIMITER);

            let Some(offset) = offset else {
                self.scanned = self.buffer.len();
                return None;
            };

            let segment = self.buffer.split_to(self.scanned + offset);
            self.buffer.advance(1);
            self.scanned = 0;

            // Adjacent delimiters carry nothing
            if segment.is_empty() {
                continue;
            }

            return Some(serde_json::from_slice(&segment).map_err(|e| {
                FeedError::Malformed(format!("{} (segment of {} bytes)", e, segment.len()))
            }));
        }
    }

    /// Number of buffered bytes not yet terminated by a delimiter
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Turn a chunk source into a lazy sequence of decoded documents
///
/// Each read waits at most `idle_timeout`; a longer silence yields
/// `FeedError::Stalled` and ends the sequence. An empty chunk or the end of
/// the source ends the sequence cleanly. Source errors and decode failures
/// are yielded once, after which the sequence is finished.
pub fn frames<S>(
    source: S,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<serde_json::Value>> + Send
where
    S: Stream<Item = Result<Bytes>> + Send + Unpin,
{
    futures::stream::try_unfold(
        (source, StreamFramer::new()),
        move |(mut source, mut framer)| async move {
            loop {
                if let Some(document) = framer.next_document() {
                    return Ok(Some((document?, (source, framer))));
                }

                let chunk = match tokio::time::timeout(idle_timeout, source.next()).await {
                    Err(_) => return Err(FeedError::Stalled(idle_timeout)),
                    Ok(next) => next.transpose()?,
                };

                match chunk {
                    Some(chunk) if !chunk.is_empty() => framer.extend(&chunk),
                    _ => {
                        if framer.pending() > 0 {
                            tracing::debug!(
                                discarded = framer.pending(),
                                "Stream ended with an unterminated segment"
                            );
                        }
                        return Ok(None);
                    }
                }
            }
        },
    )
}
