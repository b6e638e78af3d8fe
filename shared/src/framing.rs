//! Delimiter framing and stream reassembly
//!
//! Every message on the wire is `DELIMITER + body + DELIMITER`. The stream
//! transport additionally terminates each frame with a line break. There is
//! no escaping, so a body containing the delimiter is rejected up front by
//! [`wrap_frame`] rather than silently corrupting the stream.

use thiserror::Error;

/// Marker written on both sides of every frame.
pub const DELIMITER: &str = "::=::";

#[derive(Error, Debug, PartialEq)]
pub enum FrameError {
    #[error("frame body contains the delimiter sequence")]
    DelimiterInBody,
}

pub fn wrap_frame(body: &str) -> Result<String, FrameError> {
    if body.contains(DELIMITER) {
        return Err(FrameError::DelimiterInBody);
    }

    let mut frame = String::with_capacity(body.len() + DELIMITER.len() * 2);
    frame.push_str(DELIMITER);
    frame.push_str(body);
    frame.push_str(DELIMITER);
    Ok(frame)
}

/// Accumulates partial data across receive events and extracts complete
/// frames.
///
/// Frames are matched left to right and non-overlapping: a body runs from an
/// opening delimiter to the next delimiter after it. Anything after the last
/// closing delimiter stays buffered until a later chunk completes it.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Appends `chunk` and returns every body completed by it, trimmed, in
    /// arrival order.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut bodies = Vec::new();
        let mut consumed = 0;

        while let Some(open) = self.buffer[consumed..].find(DELIMITER) {
            let body_start = consumed + open + DELIMITER.len();
            let Some(close) = self.buffer[body_start..].find(DELIMITER) else {
                break;
            };

            let body_end = body_start + close;
            bodies.push(self.buffer[body_start..body_end].trim().to_string());
            consumed = body_end + DELIMITER.len();
        }

        if consumed > 0 {
            self.buffer.drain(..consumed);
        }

        bodies
    }

    /// Data received but not yet part of a complete frame.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(bodies: &[&str]) -> String {
        bodies
            .iter()
            .map(|b| wrap_frame(b).unwrap())
            .collect::<Vec<_>>()
            .concat()
    }

    #[test]
    fn test_wrap_frame() {
        assert_eq!(wrap_frame("abc").unwrap(), "::=::abc::=::");
        assert_eq!(wrap_frame("").unwrap(), "::=::::=::");
    }

    #[test]
    fn test_wrap_frame_rejects_delimiter_in_body() {
        assert_eq!(
            wrap_frame("before::=::after"),
            Err(FrameError::DelimiterInBody)
        );
    }

    #[test]
    fn test_feed_single_frame() {
        let mut buffer = FrameBuffer::new();
        assert_eq!(buffer.feed("::=::hello::=::"), vec!["hello".to_string()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_feed_multiple_frames_in_one_chunk() {
        let mut buffer = FrameBuffer::new();
        let bodies = buffer.feed(&stream_of(&["one", "two", "three"]));
        assert_eq!(bodies, vec!["one", "two", "three"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_feed_without_complete_frame_grows_buffer() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.feed("::=::partial").is_empty());
        assert!(buffer.feed(" still going").is_empty());
        assert_eq!(buffer.pending(), "::=::partial still going");

        assert_eq!(buffer.feed("::=::"), vec!["partial still going"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_feed_keeps_trailing_partial_frame() {
        let mut buffer = FrameBuffer::new();
        let bodies = buffer.feed("::=::a::=::::=::b");
        assert_eq!(bodies, vec!["a"]);
        assert_eq!(buffer.pending(), "::=::b");

        assert_eq!(buffer.feed("::=::"), vec!["b"]);
    }

    #[test]
    fn test_feed_trims_bodies() {
        let mut buffer = FrameBuffer::new();
        assert_eq!(buffer.feed("::=::  padded \n::=::"), vec!["padded"]);
    }

    #[test]
    fn test_feed_ignores_line_breaks_between_frames() {
        let mut buffer = FrameBuffer::new();
        let mut bodies = buffer.feed("::=::first::=::\n");
        bodies.extend(buffer.feed("::=::second::=::\n"));
        assert_eq!(bodies, vec!["first", "second"]);
    }

    #[test]
    fn test_any_two_way_split_yields_all_frames() {
        let expected = vec!["{\"id\":1}", "second", "", "last one"];
        let stream = stream_of(&expected);

        for split in 0..=stream.len() {
            let mut buffer = FrameBuffer::new();
            let mut bodies = buffer.feed(&stream[..split]);
            bodies.extend(buffer.feed(&stream[split..]));
            assert_eq!(bodies, expected, "split at {}", split);
        }
    }

    #[test]
    fn test_byte_by_byte_feed_yields_all_frames() {
        let expected = vec!["alpha", "beta", "gamma"];
        let stream = stream_of(&expected);

        let mut buffer = FrameBuffer::new();
        let mut bodies = Vec::new();
        for i in 0..stream.len() {
            bodies.extend(buffer.feed(&stream[i..i + 1]));
        }

        assert_eq!(bodies, expected);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_three_way_splits_including_mid_delimiter() {
        let expected = vec!["x", "yy"];
        let stream = stream_of(&expected);

        for a in 0..=stream.len() {
            for b in a..=stream.len() {
                let mut buffer = FrameBuffer::new();
                let mut bodies = buffer.feed(&stream[..a]);
                bodies.extend(buffer.feed(&stream[a..b]));
                bodies.extend(buffer.feed(&stream[b..]));
                assert_eq!(bodies, expected, "splits at {} and {}", a, b);
            }
        }
    }

    #[test]
    fn test_clear_discards_pending_data() {
        let mut buffer = FrameBuffer::new();
        buffer.feed("::=::half");
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.feed("::=::").is_empty());
    }
}
