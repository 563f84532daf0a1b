use crate::envelope::Envelope;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
    pub retry_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("buffer exceeds max size without delimiter: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
    #[error("frame carries no data")]
    MissingData,
    #[error("frame decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct DecodeReport<T> {
    pub frames: Vec<T>,
    pub errors: Vec<FrameError>,
}

impl<T> Default for DecodeReport<T> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> DecodeReport<T> {
    fn push_frame(&mut self, frame: T) {
        self.frames.push(frame);
    }

    fn push_error(&mut self, error: FrameError) {
        self.errors.push(error);
    }

    fn extend(&mut self, other: DecodeReport<T>) {
        self.frames.extend(other.frames);
        self.errors.extend(other.errors);
    }
}

/// Parses the JSON envelope carried in a frame's data field.
pub fn decode_envelope(frame: &SseFrame) -> Result<Envelope, FrameError> {
    if frame.data.trim().is_empty() {
        return Err(FrameError::MissingData);
    }
    let envelope: Envelope =
        serde_json::from_str(&frame.data).map_err(|err| FrameError::Decode(err.to_string()))?;
    Ok(envelope.normalized(frame.event.as_deref()))
}

#[derive(Debug, Default)]
struct PendingFrame {
    id: Option<String>,
    event: Option<String>,
    data: String,
    has_data: bool,
    retry_ms: Option<u64>,
    size: usize,
}

/// Incremental `text/event-stream` decoder. Bytes may arrive split at any
/// point; frames are emitted once their terminating blank line is seen.
pub struct SseFrameDecoder {
    max_frame_bytes: usize,
    pending_line: Vec<u8>,
    frame: PendingFrame,
    discarding: bool,
}

impl SseFrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending_line: Vec::new(),
            frame: PendingFrame::default(),
            discarding: false,
        }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport<SseFrame> {
        let mut report = DecodeReport::default();
        if !chunk.is_empty() {
            self.pending_line.extend_from_slice(chunk);
        }

        while let Some(newline_idx) = self.pending_line.iter().position(|byte| *byte == b'\n') {
            let mut line = self.pending_line.drain(..=newline_idx).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
            self.process_line(&line, &mut report);
        }

        if self.pending_line.len() > self.max_frame_bytes {
            report.push_error(FrameError::OversizedBuffer {
                size: self.pending_line.len(),
                max: self.max_frame_bytes,
            });
            self.pending_line.clear();
            self.frame = PendingFrame::default();
            self.discarding = true;
        }

        report
    }

    /// Flushes a trailing frame that was never terminated by a blank line.
    pub fn finish(&mut self) -> DecodeReport<SseFrame> {
        let mut report = DecodeReport::default();
        if !self.pending_line.is_empty() {
            let mut line = std::mem::take(&mut self.pending_line);
            if line.ends_with(b"\r") {
                line.pop();
            }
            self.process_line(&line, &mut report);
        }
        let mut tail = DecodeReport::default();
        self.dispatch(&mut tail);
        report.extend(tail);
        report
    }

    fn process_line(&mut self, line: &[u8], report: &mut DecodeReport<SseFrame>) {
        if line.is_empty() {
            self.dispatch(report);
            return;
        }
        if self.discarding || line[0] == b':' {
            return;
        }

        self.frame.size += line.len();
        if self.frame.size > self.max_frame_bytes {
            report.push_error(FrameError::OversizedFrame {
                size: self.frame.size,
                max: self.max_frame_bytes,
            });
            self.frame = PendingFrame::default();
            self.discarding = true;
            return;
        }

        let text = String::from_utf8_lossy(line);
        let (field, value) = match text.find(':') {
            Some(idx) => {
                let value = &text[idx + 1..];
                (&text[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (&text[..], ""),
        };
        match field {
            "data" => {
                if self.frame.has_data {
                    self.frame.data.push('\n');
                }
                self.frame.data.push_str(value);
                self.frame.has_data = true;
            }
            "event" => self.frame.event = Some(value.to_string()),
            "id" if !value.contains('\0') => self.frame.id = Some(value.to_string()),
            "retry" => self.frame.retry_ms = value.trim().parse().ok(),
            _ => {}
        }
    }

    fn dispatch(&mut self, report: &mut DecodeReport<SseFrame>) {
        let frame = std::mem::take(&mut self.frame);
        if self.discarding {
            self.discarding = false;
            return;
        }
        if !frame.has_data {
            return;
        }
        report.push_frame(SseFrame {
            id: frame.id,
            event: frame.event,
            data: frame.data,
            retry_ms: frame.retry_ms,
        });
    }
}

impl Default for SseFrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

/// Renders a frame in wire form; used by tooling and tests that play the
/// upstream role.
pub fn encode_frame(frame: &SseFrame) -> String {
    let mut out = String::new();
    if let Some(id) = &frame.id {
        out.push_str(&format!("id: {id}\n"));
    }
    if let Some(event) = &frame.event {
        out.push_str(&format!("event: {event}\n"));
    }
    if let Some(retry) = frame.retry_ms {
        out.push_str(&format!("retry: {retry}\n"));
    }
    for line in frame.data.split('\n') {
        out.push_str(&format!("data: {line}\n"));
    }
    out.push('\n');
    out
}
