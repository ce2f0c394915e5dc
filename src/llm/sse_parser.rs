// ABOUTME: Line-buffered Server-Sent Events decoder for streaming model responses
// ABOUTME: Reassembles lines split across network reads and yields every event in a read
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! # SSE Stream Parser
//!
//! Network reads do not line up with SSE event boundaries: one read may carry
//! several `data:` lines, and one JSON payload may be split across two reads.
//! [`SseLineBuffer`] keeps the unterminated tail between reads so each complete
//! line is decoded exactly once. [`sse_chunk_stream`] wraps a byte stream with the
//! buffer and a provider-specific payload decoder.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::mem;

use super::{ChatStream, StreamChunk};
use crate::errors::AppError;

const DONE_SENTINEL: &str = "[DONE]";

/// A decoded SSE line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the prefix stripped
    Data(String),
    /// The `[DONE]` termination sentinel
    Done,
}

/// Buffer that turns arbitrary byte reads into complete SSE events
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a read and return the events completed by it
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever remains when the byte stream ends without a final newline
    pub fn flush(&mut self) -> Option<SseEvent> {
        let rest = mem::take(&mut self.pending);
        decode_line(&rest)
    }
}

// Buffering raw bytes keeps multi-byte UTF-8 characters intact when a read
// splits them; lines are only decoded once complete.
fn decode_line(raw: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim_end_matches(['\n', '\r']);

    // Comments, event:, id: and retry: fields carry nothing for the relay
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == DONE_SENTINEL {
        return Some(SseEvent::Done);
    }
    if payload.trim().is_empty() {
        return None;
    }
    Some(SseEvent::Data(payload.to_owned()))
}

/// Wrap a provider byte stream into a [`ChatStream`]
///
/// `decode` turns one `data:` payload into a chunk, or `None` for payloads that
/// carry no output (role announcements, usage frames). Empty non-final deltas are
/// dropped. A `[DONE]` sentinel becomes a final chunk and ends the stream.
pub fn sse_chunk_stream<S, F>(byte_stream: S, decode: F, provider: &'static str) -> ChatStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    F: Fn(&str) -> Option<Result<StreamChunk, AppError>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut buffer = SseLineBuffer::new();
        let mut bytes = Box::pin(byte_stream);

        'read: loop {
            let events = match bytes.next().await {
                Some(Ok(read)) => buffer.feed(&read),
                Some(Err(e)) => {
                    yield Err(AppError::external_service(
                        provider,
                        format!("Stream read error: {e}"),
                    ));
                    break 'read;
                }
                None => {
                    let tail: Vec<SseEvent> = buffer.flush().into_iter().collect();
                    for event in tail {
                        match event {
                            SseEvent::Done => yield Ok(StreamChunk::finished("stop")),
                            SseEvent::Data(payload) => {
                                if let Some(item) = decode(&payload) {
                                    if keep(&item) {
                                        yield item;
                                    }
                                }
                            }
                        }
                    }
                    break 'read;
                }
            };

            for event in events {
                match event {
                    SseEvent::Done => {
                        yield Ok(StreamChunk::finished("stop"));
                        break 'read;
                    }
                    SseEvent::Data(payload) => {
                        if let Some(item) = decode(&payload) {
                            if keep(&item) {
                                yield item;
                            }
                        }
                    }
                }
            }
        }
    };

    Box::pin(stream)
}

fn keep(item: &Result<StreamChunk, AppError>) -> bool {
    item.as_ref()
        .map_or(true, |chunk| !chunk.delta.is_empty() || chunk.is_final)
}
