//! Line-oriented reader for the `data:` subset of server-sent events.
//!
//! Only `data:` lines carry payload; `event:`, `id:`, `retry:`, comments and
//! blank lines are dropped. Each data line is one complete JSON document, so no
//! multi-line event assembly is attempted.

use std::fmt::Display;

use futures::{Stream, StreamExt};

const DATA_PREFIX: &str = "data:";

/// Longest line accepted before the stream is treated as broken.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Accumulates raw bytes and hands out complete lines.
///
/// Bytes stay buffered until a `\n` arrives, which keeps multi-byte UTF-8
/// sequences split across chunks intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line without its `\n` or `\r\n` terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Bytes held for a line whose terminator has not arrived yet.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Whatever is left after the stream ended without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let mut rest = std::mem::take(&mut self.buf);
        if rest.last() == Some(&b'\r') {
            rest.pop();
        }
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Payload of a `data:` line, trimmed. `None` for every other line kind and
/// for data lines with nothing after the prefix.
pub fn data_payload(line: &str) -> Option<&str> {
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

/// Turns a byte stream into the sequence of `data:` payloads it carries.
///
/// The returned stream ends on EOF, on the first read error, or when a line
/// grows past [`MAX_LINE_BYTES`]; all mean the connection is unusable and are
/// not distinguished further.
pub fn data_lines<S, B, E>(body: S) -> impl Stream<Item = String>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    data_lines_with_limit(body, MAX_LINE_BYTES)
}

pub fn data_lines_with_limit<S, B, E>(body: S, max_line_bytes: usize) -> impl Stream<Item = String>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    async_stream::stream! {
        let mut buffer = LineBuffer::new();
        let mut overflowed = false;
        futures::pin_mut!(body);

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    buffer.push(bytes.as_ref());
                    while let Some(line) = buffer.next_line() {
                        if let Some(payload) = data_payload(&line) {
                            yield payload.to_string();
                        }
                    }
                    if buffer.pending() > max_line_bytes {
                        tracing::warn!(
                            "SSE line exceeds {} bytes without a newline; dropping connection",
                            max_line_bytes
                        );
                        overflowed = true;
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("SSE read error: {}", e);
                    break;
                }
            }
        }

        if !overflowed {
            if let Some(line) = buffer.finish() {
                if let Some(payload) = data_payload(&line) {
                    yield payload.to_string();
                }
            }
        }
        tracing::debug!("SSE stream ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    async fn collect<B: AsRef<[u8]>>(chunks: Vec<Result<B, &'static str>>) -> Vec<String> {
        data_lines(stream::iter(chunks)).collect().await
    }

    #[test]
    fn data_payload_filters_line_kinds() {
        assert_eq!(data_payload("data: {\"a\":1}  "), Some("{\"a\":1}"));
        assert_eq!(data_payload("data:{}"), Some("{}"));
        assert_eq!(data_payload("data:   "), None);
        assert_eq!(data_payload(": keepalive"), None);
        assert_eq!(data_payload("event: message"), None);
        assert_eq!(data_payload("id: 7"), None);
        assert_eq!(data_payload("retry: 1000"), None);
        assert_eq!(data_payload(""), None);
    }

    #[tokio::test]
    async fn yields_only_data_lines() {
        let body: &'static [u8] =
            b": hello\nevent: x\nid: 1\nretry: 10\ndata: {\"type\":\"a\"}\n\ndata: {\"type\":\"b\"}\r\n\r\n";
        let lines = collect(vec![Ok(body)]).await;
        assert_eq!(lines, vec![r#"{"type":"a"}"#, r#"{"type":"b"}"#]);
    }

    #[tokio::test]
    async fn joins_lines_split_across_chunks() {
        let lines = collect(vec![
            Ok(b"da".as_slice()),
            Ok(b"ta: {\"type\":".as_slice()),
            Ok(b"\"x\"}\ndata: {}\n".as_slice()),
        ])
        .await;
        assert_eq!(lines, vec![r#"{"type":"x"}"#, "{}"]);
    }

    #[tokio::test]
    async fn keeps_multibyte_characters_split_across_chunks() {
        let text = "data: {\"text\":\"héllo 世界\"}\n".as_bytes();
        // split inside the 3-byte encoding of '世'
        let split = text.len() - 8;
        let (a, b) = text.split_at(split);
        let lines = collect(vec![Ok(a.to_vec()), Ok(b.to_vec())]).await;
        assert_eq!(lines, vec!["{\"text\":\"héllo 世界\"}"]);
    }

    #[tokio::test]
    async fn final_unterminated_line_is_considered() {
        let lines = collect(vec![Ok(b"data: {\"type\":\"last\"}".as_slice())]).await;
        assert_eq!(lines, vec![r#"{"type":"last"}"#]);
    }

    #[tokio::test]
    async fn read_error_ends_the_stream() {
        let lines = collect(vec![
            Ok(b"data: 1\n".as_slice()),
            Err("connection reset"),
            Ok(b"data: 2\n".as_slice()),
        ])
        .await;
        assert_eq!(lines, vec!["1"]);
    }

    #[tokio::test]
    async fn oversized_line_ends_the_stream() {
        let chunks: Vec<Result<&[u8], &'static str>> = vec![
            Ok(b"data: 1\ndata: 0123".as_slice()),
            Ok(b"456789abcdef0123456789".as_slice()),
            Ok(b"\ndata: 2\n".as_slice()),
        ];
        let lines: Vec<String> = data_lines_with_limit(stream::iter(chunks), 16)
            .collect()
            .await;
        assert_eq!(lines, vec!["1"]);
    }

    #[tokio::test]
    async fn lines_at_the_limit_are_kept() {
        let chunks: Vec<Result<&[u8], &'static str>> =
            vec![Ok(b"data: 0123456789".as_slice()), Ok(b"\n".as_slice())];
        let lines: Vec<String> = data_lines_with_limit(stream::iter(chunks), 16)
            .collect()
            .await;
        assert_eq!(lines, vec!["0123456789"]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"data: \xff\xfe\n");
        let line = buffer.next_line().unwrap();
        assert!(line.starts_with("data: "));
        assert!(line.contains('\u{FFFD}'));
        assert!(buffer.next_line().is_none());
        assert!(buffer.finish().is_none());
    }
}
