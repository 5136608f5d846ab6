// src/job/sse.rs
// Incremental decoder for the `text/event-stream` framing

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Feeds raw body chunks in, gets complete frames out.
///
/// Chunks may split anywhere, including inside a line terminator or a
/// multi-byte character: lines are only cut on `\n`, `\r\n` or `\r`, which
/// never occur inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: String,
    event: Option<String>,
    last_id: Option<String>,
    retry_ms: Option<u64>,
    started: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconnection delay advertised by the server, if any
    pub fn retry_ms(&self) -> Option<u64> {
        self.retry_ms
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let terminator_len = if self.buf[pos] == b'\r' {
                match self.buf.get(pos + 1) {
                    Some(b'\n') => 2,
                    Some(_) => 1,
                    // `\r` at the chunk edge: the `\n` may still be coming
                    None => break,
                }
            } else {
                1
            };

            let raw: Vec<u8> = self.buf.drain(..pos + terminator_len).collect();
            let line = String::from_utf8_lossy(&raw[..pos]).into_owned();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flush at end of body. An event without its terminating blank line is
    /// incomplete and is discarded.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let mut dispatched = None;
        if self.buf.last() == Some(&b'\r') {
            let raw = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            dispatched = self.process_line(&line);
        }

        if !self.data.is_empty() || !self.buf.is_empty() {
            tracing::debug!("Discarding unterminated event at end of stream");
        }
        self.buf.clear();
        self.data.clear();
        self.event = None;
        dispatched
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        let line = if self.started {
            line
        } else {
            self.started = true;
            line.strip_prefix('\u{feff}').unwrap_or(line)
        };

        if line.is_empty() {
            return self.dispatch();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "event" => self.event = Some(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.last_id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry_ms = Some(ms);
                }
            }
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        let mut data = std::mem::take(&mut self.data);
        if data.ends_with('\n') {
            data.pop();
        }

        Some(SseFrame {
            event,
            data,
            id: self.last_id.clone(),
        })
    }
}
