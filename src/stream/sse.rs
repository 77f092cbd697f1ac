use bytes::Bytes;
use memchr::memmem;

const DONE_FRAME: &str = "data: [DONE]\n\n";
const DONE_MARKER: &[u8] = b"data: [DONE]";
const CONTENT_FIELD: &[u8] = b"\"content\"";

/// The synthetic terminal event written at the end of every relayed stream.
#[must_use]
pub fn done_frame() -> Bytes {
    Bytes::from_static(DONE_FRAME.as_bytes())
}

/// Whether the text carries an OpenAI-style `data: [DONE]` end marker.
#[must_use]
pub fn contains_done_marker(text: &str) -> bool {
    memmem::find(text.as_bytes(), DONE_MARKER).is_some()
}

/// Whether the text mentions a JSON `"content"` field anywhere.
#[must_use]
pub fn has_content_field(text: &str) -> bool {
    memmem::find(text.as_bytes(), CONTENT_FIELD).is_some()
}

/// First chunk ends the stream without delivering any payload.
#[must_use]
pub fn is_payloadless_close(first_chunk: &str) -> bool {
    contains_done_marker(first_chunk) && !has_content_field(first_chunk)
}

/// Tracks whether emitted text currently sits on an event boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameBoundary {
    tail: [u8; 4],
    len: usize,
}

impl FrameBoundary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, emitted: &[u8]) {
        for &byte in emitted.iter().skip(emitted.len().saturating_sub(4)) {
            self.tail.copy_within(1.., 0);
            self.tail[3] = byte;
            self.len = (self.len + 1).min(4);
        }
    }

    /// Bytes needed before another event can start cleanly.
    #[must_use]
    pub fn separator_needed(&self) -> &'static str {
        let tail = &self.tail[4 - self.len..];
        if tail.is_empty() || tail.ends_with(b"\n\n") || tail.ends_with(b"\r\n\r\n") {
            ""
        } else if tail.ends_with(b"\n") {
            "\n"
        } else {
            "\n\n"
        }
    }
}
