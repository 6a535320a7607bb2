/// One decoded `data:` line. Non-data lines (comments, event names,
/// keep-alive blanks) are consumed by the parser and never surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub data: String,
}

/// Incremental newline-delimited frame decoder. A frame boundary may split
/// across two network reads, so bytes are buffered and only complete lines
/// are parsed; the trailing partial line is retained for the next read.
#[derive(Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&line[..line.len() - 1]) {
                events.push(event);
            }
        }
        events
    }

    /// Flushes a trailing unterminated line at end of stream.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest).into_iter().collect()
    }
}

fn parse_line(line: &[u8]) -> Option<SseEvent> {
    let mut line = line;
    if line.ends_with(b"\r") {
        line = &line[..line.len() - 1];
    }
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    let data = text.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        return None;
    }
    Some(SseEvent { data: data.to_string() })
}
