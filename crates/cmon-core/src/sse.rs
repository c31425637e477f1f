use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_BUFFER_BYTES: usize = 256 * 1024;
pub const DEFAULT_EVENT_NAME: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("event data exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("buffer exceeds max size without delimiter: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
    #[error("line is not valid utf-8: {0}")]
    Encoding(String),
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DecodeReport {
    pub events: Vec<SseEvent>,
    pub errors: Vec<FrameError>,
}

impl DecodeReport {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.errors.is_empty()
    }
}

/// Incremental `text/event-stream` decoder. Bytes may be split anywhere;
/// a blank line dispatches the event accumulated so far.
pub struct SseFrameDecoder {
    max_buffer_bytes: usize,
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    discarding: bool,
    last_event_id: Option<String>,
}

impl SseFrameDecoder {
    pub fn new(max_buffer_bytes: usize) -> Self {
        Self {
            max_buffer_bytes,
            pending: Vec::new(),
            event: None,
            data: Vec::new(),
            data_len: 0,
            discarding: false,
            last_event_id: None,
        }
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport {
        let mut report = DecodeReport::default();
        if !chunk.is_empty() {
            self.pending.extend_from_slice(chunk);
        }

        while let Some(newline_idx) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut line = self.pending.drain(..=newline_idx).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
            self.process_line(&line, &mut report);
        }

        if self.pending.len() > self.max_buffer_bytes {
            report.errors.push(FrameError::OversizedBuffer {
                size: self.pending.len(),
                max: self.max_buffer_bytes,
            });
            self.pending.clear();
            self.reset_event();
            self.discarding = true;
        }

        report
    }

    /// Flushes a trailing unterminated line and any event still being built.
    pub fn finish(&mut self) -> DecodeReport {
        let mut report = DecodeReport::default();
        if !self.pending.is_empty() {
            let mut line = std::mem::take(&mut self.pending);
            if line.ends_with(b"\r") {
                line.pop();
            }
            self.process_line(&line, &mut report);
        }
        self.dispatch(&mut report);
        report
    }

    fn process_line(&mut self, line: &[u8], report: &mut DecodeReport) {
        if line.is_empty() {
            self.dispatch(report);
            return;
        }
        if self.discarding || line.starts_with(b":") {
            return;
        }
        let line = match std::str::from_utf8(line) {
            Ok(line) => line,
            Err(err) => {
                report.errors.push(FrameError::Encoding(err.to_string()));
                return;
            }
        };
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data_len += value.len() + 1;
                if self.data_len > self.max_buffer_bytes {
                    report.errors.push(FrameError::OversizedFrame {
                        size: self.data_len,
                        max: self.max_buffer_bytes,
                    });
                    self.reset_event();
                    self.discarding = true;
                    return;
                }
                self.data.push(value.to_string());
            }
            "id" if !value.contains('\0') => self.last_event_id = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self, report: &mut DecodeReport) {
        if self.discarding {
            self.discarding = false;
            self.reset_event();
            return;
        }
        if self.data.is_empty() {
            self.reset_event();
            return;
        }
        let event = self
            .event
            .take()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string());
        report.events.push(SseEvent {
            event,
            data: self.data.join("\n"),
            id: self.last_event_id.clone(),
        });
        self.reset_event();
    }

    fn reset_event(&mut self) {
        self.event = None;
        self.data.clear();
        self.data_len = 0;
    }
}

impl Default for SseFrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_BYTES)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(8),
        }
    }
}

/// Reconnect delays for the live stream: `min(max, base * 2^attempt)`,
/// counting attempts from the first failure.
#[derive(Debug, Clone, Default)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.config
            .base
            .checked_mul(factor)
            .map_or(self.config.max, |delay| delay.min(self.config.max))
    }

    /// Records a failure and returns how long to wait before reconnecting.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.delay_for(self.attempt)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
