//! Wire format for captured calls crossing the child -> parent pipe.
//!
//! A message is a JSON array of `[target, detail]` pairs followed immediately
//! by the literal sentinel `EODATA`. There is no length prefix: the sentinel is
//! the only terminator, so the encoder guarantees it never appears in the
//! payload. Outside of strings JSON text cannot spell `EODATA`, and inside a
//! string the leading `E` is written as the escape `\u0045`, which any JSON
//! parser reads back as the same character.

use crate::errors::IsolateError;
use crate::types::{CallDetail, CapturedCall, Target};

pub const SENTINEL: &[u8] = b"EODATA";

const SENTINEL_TEXT: &str = "EODATA";
const ESCAPED_SENTINEL_TEXT: &str = "\\u0045ODATA";

pub fn encode(records: &[CapturedCall]) -> Result<Vec<u8>, IsolateError> {
    let wire = records
        .iter()
        .map(|record| (&record.target, &record.detail))
        .collect::<Vec<_>>();
    let text = serde_json::to_string(&wire).map_err(encode_error)?;
    let mut bytes = text
        .replace(SENTINEL_TEXT, ESCAPED_SENTINEL_TEXT)
        .into_bytes();
    bytes.extend_from_slice(SENTINEL);
    Ok(bytes)
}

fn encode_error(err: serde_json::Error) -> IsolateError {
    IsolateError::Encode(err.to_string())
}

pub fn decode(bytes: &[u8]) -> Result<Vec<CapturedCall>, IsolateError> {
    let end = find_sentinel(bytes, 0).ok_or_else(|| {
        IsolateError::Truncated(format!(
            "no sentinel in {} bytes of message data",
            bytes.len()
        ))
    })?;
    let trailing = &bytes[end + SENTINEL.len()..];
    if !trailing.iter().all(u8::is_ascii_whitespace) {
        return Err(IsolateError::Decode(format!(
            "{} unexpected bytes after sentinel",
            trailing.len()
        )));
    }
    let wire: Vec<(Target, CallDetail)> =
        serde_json::from_slice(&bytes[..end]).map_err(|e| IsolateError::Decode(e.to_string()))?;
    Ok(wire
        .into_iter()
        .map(|(target, detail)| CapturedCall { target, detail })
        .collect())
}

fn find_sentinel(haystack: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(SENTINEL.len())
        .position(|window| window == SENTINEL)
        .map(|pos| from + pos)
}

/// A complete message as read off the channel, sentinel included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message: Vec<u8>,
    /// Bytes that arrived after the sentinel and were dropped.
    pub discarded: usize,
}

/// Buffers partial reads until the sentinel has been seen.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
    scanned: usize,
    end: Option<usize>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        if self.end.is_some() {
            self.buffer.extend_from_slice(chunk);
            return true;
        }
        self.buffer.extend_from_slice(chunk);
        // The sentinel may straddle the previous chunk boundary.
        let from = self.scanned.saturating_sub(SENTINEL.len() - 1);
        match find_sentinel(&self.buffer, from) {
            Some(pos) => {
                self.end = Some(pos + SENTINEL.len());
                true
            }
            None => {
                self.scanned = self.buffer.len();
                false
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.end.is_some()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Consumes the reader; fails if the channel closed before the sentinel.
    pub fn finish(mut self) -> Result<Frame, IsolateError> {
        let Some(end) = self.end else {
            return Err(IsolateError::Truncated(format!(
                "channel closed after {} bytes without sentinel",
                self.buffer.len()
            )));
        };
        let discarded = self.buffer.len() - end;
        self.buffer.truncate(end);
        Ok(Frame {
            message: self.buffer,
            discarded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallSite;
    use serde_json::json;

    fn record(name: &str, args: Vec<serde_json::Value>, line: u32) -> CapturedCall {
        CapturedCall::new(
            Target::new("main", name),
            CallSite {
                caller: "main".to_string(),
                file: "tests/scenario.rs".to_string(),
                line,
                column: 9,
            },
            args,
        )
    }

    #[test]
    fn empty_sequence_encodes_to_bare_array_and_sentinel() {
        let bytes = encode(&[]).expect("encode");
        assert_eq!(bytes, b"[]EODATA");
        assert!(decode(&bytes).expect("decode").is_empty());
    }

    #[test]
    fn wire_shape_is_array_of_target_detail_pairs() {
        let bytes = encode(&[record("ok", vec![json!(true), json!("basic")], 12)]).expect("encode");
        let payload = &bytes[..bytes.len() - SENTINEL.len()];
        let value: serde_json::Value = serde_json::from_slice(payload).expect("json");
        assert_eq!(value[0][0], json!({"context": "main", "name": "ok"}));
        assert_eq!(value[0][1]["call_site"]["line"], 12);
        assert_eq!(value[0][1]["args"], json!([true, "basic"]));
    }

    #[test]
    fn sentinel_inside_arguments_is_escaped_and_restored() {
        let records = vec![
            record("is", vec![json!("EODATA"), json!("xEODATAEODATAy")], 3),
            record("ok", vec![json!({"EODATA": ["EODATA"]})], 4),
        ];
        let bytes = encode(&records).expect("encode");
        let payload = &bytes[..bytes.len() - SENTINEL.len()];
        assert_eq!(find_sentinel(payload, 0), None);
        assert_eq!(decode(&bytes).expect("decode"), records);
    }

    #[test]
    fn nested_plain_values_survive_encoding() {
        let records = vec![record(
            "is_deeply",
            vec![
                json!({"a": [1, 2.5, null], "b": {"c": false}}),
                json!({"a": [1, 2.5, null], "b": {"c": false}}),
                json!("unicode: \u{2603} \n tab\t"),
            ],
            40,
        )];
        assert_eq!(decode(&encode(&records).expect("encode")).expect("decode"), records);
    }

    #[test]
    fn serializer_failures_are_encode_errors() {
        let unserializable = std::collections::HashMap::from([((1, 2), 3)]);
        let err = serde_json::to_string(&unserializable).expect_err("tuple keys");
        let mapped = encode_error(err);
        assert!(matches!(mapped, IsolateError::Encode(_)));
        assert!(mapped.to_string().starts_with("encode error: "));
    }

    #[test]
    fn decode_without_sentinel_is_truncated() {
        let err = decode(br#"[[{"context":"main","name":"ok"}"#).expect_err("truncated");
        assert!(matches!(err, IsolateError::Truncated(_)));
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        for bad in [
            &b"{\"not\":\"a list\"}EODATA"[..],
            &b"[[1,2,3]]EODATA"[..],
            &b"[[{\"context\":\"main\",\"name\":\"ok\"}]]EODATA"[..],
            &b"[[{\"context\":\"main\",\"name\":\"ok\"},{\"args\":[]}]]EODATA"[..],
            &b"not json at allEODATA"[..],
        ] {
            let err = decode(bad).expect_err("shape error");
            assert!(matches!(err, IsolateError::Decode(_)), "{err}");
        }
    }

    #[test]
    fn decode_tolerates_trailing_newline_but_not_garbage() {
        assert!(decode(b"[]EODATA\n").expect("decode").is_empty());
        let err = decode(b"[]EODATAjunk").expect_err("garbage");
        assert!(matches!(err, IsolateError::Decode(_)));
    }

    #[test]
    fn frame_reader_finds_sentinel_split_across_chunks() {
        let bytes = encode(&[record("pass", vec![json!("split")], 7)]).expect("encode");
        let split = bytes.len() - 3;
        let mut reader = FrameReader::new();
        for byte in &bytes[..split] {
            assert!(!reader.feed(std::slice::from_ref(byte)));
        }
        assert!(reader.feed(&bytes[split..]));
        let frame = reader.finish().expect("frame");
        assert_eq!(frame.message, bytes);
        assert_eq!(frame.discarded, 0);
    }

    #[test]
    fn frame_reader_drops_bytes_after_sentinel() {
        let mut reader = FrameReader::new();
        assert!(reader.feed(b"[]EODATAextra"));
        let frame = reader.finish().expect("frame");
        assert_eq!(frame.message, b"[]EODATA");
        assert_eq!(frame.discarded, 5);
    }

    #[test]
    fn frame_reader_without_sentinel_reports_truncation() {
        let mut reader = FrameReader::new();
        assert!(!reader.feed(b"[[{\"context\""));
        assert!(!reader.is_complete());
        let err = reader.finish().expect_err("truncated");
        assert!(matches!(err, IsolateError::Truncated(_)));
    }
}
