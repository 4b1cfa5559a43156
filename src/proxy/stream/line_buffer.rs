use bytes::BytesMut;

/// Accumulates arbitrary byte chunks and yields complete `\n`-terminated
/// lines; the unterminated tail is carried into the next append. Line
/// terminators are stripped, empty lines are preserved for the parser.
#[derive(Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line_raw = self.buf.split_to(pos + 1);
            let mut line = String::from_utf8_lossy(&line_raw).into_owned();
            if line.ends_with('\n') {
                line.pop();
            }
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Whatever is still buffered after the stream ends.
    pub fn remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split();
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}
