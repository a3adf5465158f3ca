//! Line framing for the `data: {...}` event stream

/// Prefix that marks a data frame. Lines without it are ignored.
pub const DATA_PREFIX: &str = "data: ";

/// Incremental decoder that turns raw transport chunks into frame bodies.
///
/// Bytes are buffered until a `\n` is seen, so a frame split across any
/// number of chunks (including in the middle of a multi-byte character)
/// is emitted exactly once, whole. A decoder belongs to a single session.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the bodies of every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        complete
            .split(|b| *b == b'\n')
            .filter_map(frame_body)
            .collect()
    }

    /// Flush the dangling fragment once the transport reports end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.buffer);
        if tail.is_empty() {
            return None;
        }
        frame_body(&tail)
    }

    /// Bytes held back waiting for a line boundary.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn frame_body(line: &[u8]) -> Option<String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.is_empty() {
        return None;
    }

    let text = match std::str::from_utf8(line) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Skipping frame with invalid UTF-8: {}", e);
            return None;
        }
    };

    match text.strip_prefix(DATA_PREFIX) {
        Some(body) => Some(body.to_string()),
        None => {
            tracing::debug!("Ignoring non-data line: {}", text);
            None
        }
    }
}
