//! Server-Sent Events framing for streaming provider responses.
//!
//! Network chunks do not align with events, so data lines are buffered until a
//! full line has arrived.

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::VecDeque;

use crate::error::{PgChatError, Result};

use super::types::ModelEvent;

/// Provider-specific translation of SSE payloads into model events.
pub trait EventParser: Send + 'static {
    /// Handles one `data:` payload.
    fn on_data(&mut self, data: &str) -> Result<Vec<ModelEvent>>;

    /// Called once when the body ends; flushes buffered state.
    fn on_end(&mut self) -> Result<Vec<ModelEvent>>;
}

struct EventStreamState<P> {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    parser: P,
    pending: VecDeque<Result<ModelEvent>>,
    finished: bool,
}

impl<P: EventParser> EventStreamState<P> {
    fn queue(&mut self, events: Result<Vec<ModelEvent>>) {
        match events {
            Ok(events) => self.pending.extend(events.into_iter().map(Ok)),
            Err(e) => {
                self.pending.push_back(Err(e));
                self.finished = true;
            }
        }
    }
}

/// Turns a streaming HTTP response into model events using `parser`.
///
/// The stream stops after the first error.
pub fn event_stream<P: EventParser>(
    response: reqwest::Response,
    parser: P,
) -> BoxStream<'static, Result<ModelEvent>> {
    let state = EventStreamState {
        body: response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed(),
        decoder: SseDecoder::new(),
        parser,
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    for data in state.decoder.push(&bytes) {
                        let events = state.parser.on_data(&data);
                        state.queue(events);
                        if state.finished {
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    state
                        .pending
                        .push_back(Err(PgChatError::llm(format!("Stream error: {}", e))));
                    state.finished = true;
                }
                None => {
                    if let Some(data) = state.decoder.finish() {
                        let events = state.parser.on_data(&data);
                        state.queue(events);
                    }
                    if !state.finished {
                        let events = state.parser.on_end();
                        state.queue(events);
                    }
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// Incremental SSE decoder yielding the payload of each `data:` line.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the data payloads it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = data_payload(&String::from_utf8_lossy(&line)) {
                payloads.push(data);
            }
        }

        payloads
    }

    /// Returns the payload of a trailing line without a newline, if any.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        data_payload(&String::from_utf8_lossy(&rest))
    }
}

fn data_payload(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    line.strip_prefix("data:")
        .map(|data| data.trim_start().to_string())
}
