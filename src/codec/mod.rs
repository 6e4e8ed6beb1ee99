//! Span wire codecs.
//!
//! Four encodings are supported: the legacy thrift and JSON v1 formats and
//! the JSON and protobuf v2 formats. [`encode`] and [`decode`] translate
//! between byte payloads and [`Span`] values; [`detect`] sniffs the
//! encoding of an arbitrary payload and [`convert`] re-encodes one payload
//! as another format without the caller touching the span model.

pub(crate) mod v1;
pub(crate) mod v2;

use crate::error::{Error, Result};
use crate::model::Span;

/// A supported span batch encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Thrift compact-protocol list of v1 spans.
    V1Thrift,
    /// JSON array of v1 spans.
    V1Json,
    /// JSON array of v2 spans.
    V2Json,
    /// Protobuf `ListOfSpans` of v2 spans.
    V2Proto,
}

// Worst case for the thrift list header: one type byte plus a 5-byte
// varint count.
const THRIFT_LIST_HEADER_MAX: usize = 6;

impl Encoding {
    /// Encode one span as a batch piece.
    ///
    /// Pieces are the unit of batch-size accounting: JSON and thrift pieces
    /// are bare span encodings joined under a single frame, protobuf pieces
    /// carry their own field frame and simply concatenate.
    pub(crate) fn encode_piece(self, span: &Span) -> Result<Vec<u8>> {
        match self {
            Encoding::V1Thrift => Ok(v1::thrift::encode_span(span)),
            Encoding::V1Json => v1::json::encode_span(span),
            Encoding::V2Json => serde_json::to_vec(span)
                .map_err(|e| Error::encoding(Encoding::V2Json, e.to_string())),
            Encoding::V2Proto => Ok(v2::proto::encode_span(span)),
        }
    }

    /// Frame already-encoded pieces into one payload.
    pub(crate) fn join_pieces(self, pieces: &[Vec<u8>]) -> Vec<u8> {
        match self {
            Encoding::V1Json | Encoding::V2Json => {
                let size: usize = pieces.iter().map(Vec::len).sum();
                let mut out = Vec::with_capacity(2 + size + pieces.len());
                out.push(b'[');
                for (i, piece) in pieces.iter().enumerate() {
                    if i > 0 {
                        out.push(b',');
                    }
                    out.extend_from_slice(piece);
                }
                out.push(b']');
                out
            }
            Encoding::V1Thrift => v1::thrift::join_spans(pieces),
            Encoding::V2Proto => pieces.concat(),
        }
    }

    /// Whether a batch of `count` pieces totalling `size` bytes still fits
    /// under `max_payload` after adding a piece of `next` bytes, counting
    /// this encoding's framing overhead.
    pub(crate) fn fits(
        self,
        count: usize,
        size: usize,
        next: usize,
        max_payload: Option<usize>,
    ) -> bool {
        let Some(max) = max_payload else { return true };
        match self {
            // brackets plus one comma per extra element
            Encoding::V1Json | Encoding::V2Json => 2 + count + size + next <= max,
            Encoding::V1Thrift => THRIFT_LIST_HEADER_MAX + size + next <= max,
            // pieces are self-framed
            Encoding::V2Proto => size + next <= max,
        }
    }
}

/// Encode a batch of spans as one payload in the given encoding.
pub fn encode(spans: &[Span], encoding: Encoding) -> Result<Vec<u8>> {
    let pieces = spans
        .iter()
        .map(|span| encoding.encode_piece(span))
        .collect::<Result<Vec<_>>>()?;
    Ok(encoding.join_pieces(&pieces))
}

/// Decode a payload of the given encoding into spans.
///
/// Decoding is batch-atomic: any malformed span fails the whole call with
/// [`Error::Decoding`].
pub fn decode(bytes: &[u8], encoding: Encoding) -> Result<Vec<Span>> {
    match encoding {
        Encoding::V1Thrift => v1::thrift::decode_spans(bytes),
        Encoding::V1Json => v1::json::decode_spans(bytes),
        Encoding::V2Json => v2::json::decode_spans(bytes),
        Encoding::V2Proto => v2::proto::decode_spans(bytes),
    }
}

/// Sniff the encoding of a span batch payload.
///
/// JSON is recognized first: a payload that parses as a JSON array of
/// objects is classified v1 or v2 by its keys, preferring v2 when nothing
/// distinguishes them. Binary payloads are tried as protobuf, then thrift.
/// Payloads shorter than two bytes or matching nothing fail with
/// [`Error::UnknownEncoding`].
pub fn detect(bytes: &[u8]) -> Result<Encoding> {
    if bytes.len() < 2 {
        return Err(Error::UnknownEncoding);
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
            return classify_json(&value).ok_or(Error::UnknownEncoding);
        }
    }
    if v2::proto::decode_spans(bytes).is_ok() {
        return Ok(Encoding::V2Proto);
    }
    if v1::thrift::decode_spans(bytes).is_ok() {
        return Ok(Encoding::V1Thrift);
    }
    Err(Error::UnknownEncoding)
}

fn classify_json(value: &serde_json::Value) -> Option<Encoding> {
    const V2_ONLY_KEYS: [&str; 5] = ["tags", "localEndpoint", "remoteEndpoint", "shared", "kind"];

    let spans = value.as_array()?;
    for span in spans {
        let object = span.as_object()?;
        if V2_ONLY_KEYS.iter().any(|key| object.contains_key(*key)) {
            return Some(Encoding::V2Json);
        }
        if object.contains_key("binaryAnnotations") {
            return Some(Encoding::V1Json);
        }
        // v1 annotations nest an endpoint; v2 annotations never do
        let has_v1_annotation = object
            .get("annotations")
            .and_then(serde_json::Value::as_array)
            .is_some_and(|annotations| {
                annotations.iter().any(|a| {
                    a.as_object()
                        .is_some_and(|object| object.contains_key("endpoint"))
                })
            });
        if has_v1_annotation {
            return Some(Encoding::V1Json);
        }
    }
    // an empty array or one with only ambiguous spans reads as current
    Some(Encoding::V2Json)
}

/// Re-encode a payload from one encoding to another.
///
/// With `input` unset the source encoding is [detected](detect). Converting
/// a payload to its own encoding returns the input bytes unchanged.
pub fn convert(bytes: &[u8], input: Option<Encoding>, output: Encoding) -> Result<Vec<u8>> {
    let input = match input {
        Some(encoding) => encoding,
        None => detect(bytes)?,
    };
    if input == output {
        return Ok(bytes.to_vec());
    }
    let spans = decode(bytes, input)?;
    encode(&spans, output)
}

/// Append `value` as a ULEB128 varint.
pub(crate) fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}
