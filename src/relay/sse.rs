//! Server-Sent Events decoding for upstream model streams.
//!
//! Network chunks can split both SSE events and multi-byte UTF-8 sequences,
//! so both the text and the event framing are buffered across `feed` calls.

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event_type: Option<String>,
    /// Concatenated `data:` lines.
    pub data: String,
}

impl SseEvent {
    /// `[DONE]` sentinel used by OpenAI-style streams.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Decodes bytes to text, holding back an incomplete trailing UTF-8 sequence
/// until the rest of it arrives.
#[derive(Debug, Default)]
pub struct Utf8Buffer {
    pending: Vec<u8>,
}

impl Utf8Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + chunk` as forms complete characters.
    ///
    /// Invalid sequences (as opposed to truncated ones) are replaced with
    /// U+FFFD rather than stalling the stream.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let bytes = std::mem::take(&mut self.pending);

        match std::str::from_utf8(&bytes) {
            Ok(text) => text.to_string(),
            Err(e) => {
                let valid = e.valid_up_to();
                match e.error_len() {
                    // Truncated sequence at the end: keep it for the next chunk.
                    None => {
                        let text = String::from_utf8_lossy(&bytes[..valid]).into_owned();
                        self.pending = bytes[valid..].to_vec();
                        text
                    }
                    Some(_) => String::from_utf8_lossy(&bytes).into_owned(),
                }
            }
        }
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

/// Buffered SSE decoder.
///
/// ```text
/// event: content_block_delta
/// data: {"type":"content_block_delta", ...}
///
/// ```
///
/// Events are separated by a blank line; `\r\n` line endings are accepted.
#[derive(Debug, Default)]
pub struct SseDecoder {
    utf8: Utf8Buffer,
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every event completed by them.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&self.utf8.push(chunk));
        // A lone trailing '\r' is normalized once its '\n' arrives.
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            if let Some(event) = Self::parse_block(&block) {
                events.push(event);
            }
        }
        events
    }

    fn parse_block(block: &str) -> Option<SseEvent> {
        let mut event_type = None;
        let mut data_lines: Vec<&str> = Vec::new();

        for line in block.lines() {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => event_type = Some(value.to_string()),
                "data" => data_lines.push(value),
                _ => {}
            }
        }

        if data_lines.is_empty() {
            return None;
        }

        Some(SseEvent {
            event_type,
            data: data_lines.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"event: ping\ndata: {\"a\":1}\n\n");

        assert_eq!(
            events,
            vec![SseEvent {
                event_type: Some("ping".into()),
                data: "{\"a\":1}".into(),
            }]
        );
    }

    #[test]
    fn buffers_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();

        assert!(decoder.feed(b"data: hel").is_empty());
        assert!(decoder.feed(b"lo\n").is_empty());
        let events = decoder.feed(b"\ndata: next\n\n");

        let data: Vec<_> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, ["hello", "next"]);
    }

    #[test]
    fn joins_multiline_data_and_skips_comments() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keepalive\ndata: one\ndata: two\n\n");
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[test]
    fn accepts_crlf_line_endings() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: x\r\n\r\ndata: y\r\n\r\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].data, "y");
    }

    #[test]
    fn ignores_blocks_without_data() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: lonely\n\n").is_empty());
    }

    #[test]
    fn detects_done_marker() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: [DONE]\n\n");
        assert!(events[0].is_done());
    }

    #[test]
    fn utf8_split_across_chunks() {
        let bytes = "héllo 🌱".as_bytes();
        // Split inside the 4-byte emoji.
        let cut = bytes.len() - 2;

        let mut buffer = Utf8Buffer::new();
        let first = buffer.push(&bytes[..cut]);
        let second = buffer.push(&bytes[cut..]);

        assert_eq!(first, "héllo ");
        assert_eq!(format!("{first}{second}"), "héllo 🌱");
        assert_eq!(buffer.finish(), "");
    }

    #[test]
    fn utf8_invalid_bytes_are_replaced() {
        let mut buffer = Utf8Buffer::new();
        let text = buffer.push(&[b'a', 0xFF, b'b']);
        assert_eq!(text, "a\u{FFFD}b");
    }
}
