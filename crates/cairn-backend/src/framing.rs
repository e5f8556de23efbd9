//! Content-Length framing
//!
//! Frames look like `Content-Length: <n>\r\n\r\n<n bytes>`, where `n` counts
//! UTF-8 bytes of the payload. [`FrameDecoder`] is fed raw reads and yields
//! complete payloads; it keeps partial frames across reads and, on a
//! malformed header, discards input up to the next `Content-Length:`.

/// Header name that starts every frame.
pub const CONTENT_LENGTH: &[u8] = b"Content-Length:";

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Headers longer than this without a terminator are treated as garbage.
const MAX_HEADER_LEN: usize = 1024;

/// Largest payload accepted. A bigger Content-Length is a malformed header.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Frame `payload` with a Content-Length header. The length is the UTF-8
/// byte count, not the character count.
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let mut frame = format!("Content-Length: {}\r\n\r\n", payload.len()).into_bytes();
    frame.extend_from_slice(payload.as_bytes());
    frame
}

/// One unit of decoder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete payload.
    Frame(Vec<u8>),
    /// Input discarded while resynchronizing to the next header.
    Garbage { discarded: usize, reason: String },
}

/// Restartable decoder for Content-Length framed streams.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes from a read.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes held waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next decoded unit, or `None` when more input is needed.
    pub fn next_frame(&mut self) -> Option<Decoded> {
        if self.buf.is_empty() {
            return None;
        }

        if !self.buf.starts_with(CONTENT_LENGTH) {
            return self.skip_to_header();
        }

        let Some(terminator) = find(&self.buf, HEADER_TERMINATOR) else {
            if self.buf.len() > MAX_HEADER_LEN {
                return Some(self.discard(CONTENT_LENGTH.len(), "unterminated header"));
            }
            return None;
        };

        let length = match parse_content_length(&self.buf[..terminator]) {
            Ok(length) => length,
            Err(reason) => return Some(self.discard(CONTENT_LENGTH.len(), &reason)),
        };

        let body_start = terminator + HEADER_TERMINATOR.len();
        let body_end = match body_start.checked_add(length) {
            Some(end) if length <= MAX_FRAME_LEN => end,
            _ => {
                let reason = format!("Content-Length {} exceeds {} bytes", length, MAX_FRAME_LEN);
                return Some(self.discard(CONTENT_LENGTH.len(), &reason));
            }
        };
        if self.buf.len() < body_end {
            return None;
        }

        let payload = self.buf[body_start..body_end].to_vec();
        self.buf.drain(..body_end);
        Some(Decoded::Frame(payload))
    }

    /// Drop leading bytes that cannot start a header. A trailing partial
    /// `Content-Length:` prefix is kept for the next read.
    fn skip_to_header(&mut self) -> Option<Decoded> {
        let discard = match find(&self.buf, CONTENT_LENGTH) {
            Some(start) => start,
            None => self.buf.len() - partial_header_suffix(&self.buf),
        };
        if discard == 0 {
            return None;
        }
        Some(self.discard(discard, "data before header"))
    }

    fn discard(&mut self, count: usize, reason: &str) -> Decoded {
        let count = count.min(self.buf.len());
        self.buf.drain(..count);
        // Resume at the next header candidate within what's left
        if !self.buf.starts_with(CONTENT_LENGTH) {
            let more = find(&self.buf, CONTENT_LENGTH)
                .unwrap_or(self.buf.len() - partial_header_suffix(&self.buf));
            self.buf.drain(..more);
            return Decoded::Garbage {
                discarded: count + more,
                reason: reason.to_string(),
            };
        }
        Decoded::Garbage {
            discarded: count,
            reason: reason.to_string(),
        }
    }
}

fn parse_content_length(header: &[u8]) -> Result<usize, String> {
    let text = std::str::from_utf8(header).map_err(|_| "header is not UTF-8".to_string())?;
    for line in text.split("\r\n") {
        if let Some(value) = line.strip_prefix("Content-Length:") {
            return value
                .trim()
                .parse()
                .map_err(|_| format!("invalid Content-Length: {}", value.trim()));
        }
    }
    Err("missing Content-Length".to_string())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Length of the longest suffix of `buf` that is a proper prefix of the
/// header name.
fn partial_header_suffix(buf: &[u8]) -> usize {
    let max = (CONTENT_LENGTH.len() - 1).min(buf.len());
    (1..=max)
        .rev()
        .find(|&n| buf[buf.len() - n..] == CONTENT_LENGTH[..n])
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frames(decoder: &mut FrameDecoder) -> Vec<Decoded> {
        std::iter::from_fn(|| decoder.next_frame()).collect()
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&encode_frame(r#"{"seq":1}"#));
        assert_eq!(
            frames(&mut decoder),
            vec![Decoded::Frame(br#"{"seq":1}"#.to_vec())]
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_partial_frame_waits_for_rest() {
        let frame = encode_frame(r#"{"seq":2,"type":"event"}"#);
        let (head, tail) = frame.split_at(22);

        let mut decoder = FrameDecoder::new();
        decoder.feed(head);
        assert_eq!(decoder.next_frame(), None);
        decoder.feed(tail);
        assert!(matches!(decoder.next_frame(), Some(Decoded::Frame(_))));
    }

    #[test]
    fn test_split_inside_header_name() {
        let frame = encode_frame("{}");
        let mut decoder = FrameDecoder::new();
        decoder.feed(&frame[..7]);
        assert_eq!(decoder.next_frame(), None);
        decoder.feed(&frame[7..]);
        assert_eq!(decoder.next_frame(), Some(Decoded::Frame(b"{}".to_vec())));
    }

    #[test]
    fn test_garbage_before_header_is_skipped() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"Debugger listening on ws://127.0.0.1\n");
        decoder.feed(&encode_frame("{}"));

        let out = frames(&mut decoder);
        assert!(matches!(out[0], Decoded::Garbage { discarded: 37, .. }));
        assert_eq!(out[1], Decoded::Frame(b"{}".to_vec()));
    }

    #[test]
    fn test_invalid_length_resynchronizes() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"Content-Length: abc\r\n\r\nnoise");
        decoder.feed(&encode_frame(r#"{"ok":true}"#));

        let out = frames(&mut decoder);
        assert!(matches!(&out[0], Decoded::Garbage { reason, .. } if reason.contains("abc")));
        assert_eq!(out.last(), Some(&Decoded::Frame(br#"{"ok":true}"#.to_vec())));
    }

    #[test]
    fn test_utf8_byte_length() {
        let payload = r#"{"output":"héllo ✓"}"#;
        let frame = encode_frame(payload);
        let header = String::from_utf8(frame[..frame.len() - payload.len()].to_vec()).unwrap();
        assert_eq!(header, format!("Content-Length: {}\r\n\r\n", payload.len()));
        assert!(payload.len() > payload.chars().count());

        let mut decoder = FrameDecoder::new();
        decoder.feed(&frame);
        assert_eq!(
            decoder.next_frame(),
            Some(Decoded::Frame(payload.as_bytes().to_vec()))
        );
    }

    #[test]
    fn test_overflowing_length_is_garbage() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"Content-Length: 18446744073709551615\r\n\r\nx");

        let out = frames(&mut decoder);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Decoded::Garbage { .. }));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_oversized_length_does_not_swallow_next_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"Content-Length: 99999999999\r\n\r\n{}");
        decoder.feed(&encode_frame(r#"{"ok":1}"#));

        let out = frames(&mut decoder);
        assert!(matches!(out[0], Decoded::Garbage { .. }));
        assert_eq!(out.last(), Some(&Decoded::Frame(br#"{"ok":1}"#.to_vec())));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_extra_headers_are_ignored() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"Content-Length: 2\r\nContent-Type: application/json\r\n\r\n{}");
        assert_eq!(decoder.next_frame(), Some(Decoded::Frame(b"{}".to_vec())));
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = encode_frame("[1]");
        bytes.extend(encode_frame("[2]"));
        decoder.feed(&bytes);
        assert_eq!(
            frames(&mut decoder),
            vec![
                Decoded::Frame(b"[1]".to_vec()),
                Decoded::Frame(b"[2]".to_vec())
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_any_read_split_yields_same_frames(
            payloads in proptest::collection::vec("[a-z0-9é✓ ]{0,40}", 1..6),
            chunk in 1usize..17,
        ) {
            let mut stream = Vec::new();
            for payload in &payloads {
                stream.extend(encode_frame(payload));
            }

            let mut decoder = FrameDecoder::new();
            let mut decoded = Vec::new();
            for piece in stream.chunks(chunk) {
                decoder.feed(piece);
                while let Some(unit) = decoder.next_frame() {
                    decoded.push(unit);
                }
            }

            let expected: Vec<Decoded> = payloads
                .iter()
                .map(|p| Decoded::Frame(p.as_bytes().to_vec()))
                .collect();
            prop_assert_eq!(decoded, expected);
        }
    }
}
