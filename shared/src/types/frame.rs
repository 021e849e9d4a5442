// shared/src/types/frame.rs
// Text event-stream framing: one `data:` line per envelope, blank line terminated

/// An SSE comment frame. Ignored by consumers; useful to flush headers.
pub fn encode_comment(text: &str) -> String {
    format!(": {}\n\n", text)
}

/// Incremental decoder for a text event stream.
///
/// Bytes arrive in arbitrary chunks; [`SseDecoder::feed`] buffers partial
/// lines and returns the `data` payload of every event completed by the
/// chunk. Multiple `data:` lines in one event are joined with `\n`.
/// Comments (`:`) and the `event`, `id` and `retry` fields are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(payload) = self.process_line(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Bytes held back waiting for a line terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let payload = self.data.join("\n");
            self.data.clear();
            return Some(payload);
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }
}
