//! Thrift compact-protocol codec for v1 spans.
//!
//! The payload is a compact-protocol list of `Span` structs from the
//! classic `zipkinCore.thrift` schema. Only the subset of the protocol
//! that schema needs is implemented: varint/zigzag integers, binary
//! fields, nested structs and lists, plus enough `skip` support to step
//! over fields this crate does not model.

use super::{V1Annotation, V1BinaryAnnotation, V1Span, V1Value};
use crate::codec::{put_uvarint, Encoding};
use crate::error::{Error, Result};
use crate::model::{Endpoint, Span, SpanId, TraceId};
use std::net::{Ipv4Addr, Ipv6Addr};

// Compact-protocol wire types.
const STOP: u8 = 0;
const BOOL_TRUE: u8 = 1;
const BOOL_FALSE: u8 = 2;
const BYTE: u8 = 3;
const I16: u8 = 4;
const I32: u8 = 5;
const I64: u8 = 6;
const DOUBLE: u8 = 7;
const BINARY: u8 = 8;
const LIST: u8 = 9;
const SET: u8 = 10;
const MAP: u8 = 11;
const STRUCT: u8 = 12;

// `AnnotationType` values from zipkinCore.thrift.
const TYPE_BOOL: i32 = 0;
const TYPE_BYTES: i32 = 1;
const TYPE_I16: i32 = 2;
const TYPE_I32: i32 = 3;
const TYPE_I64: i32 = 4;
const TYPE_DOUBLE: i32 = 5;
const TYPE_STRING: i32 = 6;

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn err(message: impl Into<String>) -> Error {
    Error::decoding(Encoding::V1Thrift, message)
}

struct CompactWriter {
    buf: Vec<u8>,
    last_id: i16,
    nested: Vec<i16>,
}

impl CompactWriter {
    fn new() -> Self {
        CompactWriter {
            buf: Vec::new(),
            last_id: 0,
            nested: Vec::new(),
        }
    }

    fn field_header(&mut self, id: i16, wire_type: u8) {
        let delta = id.wrapping_sub(self.last_id);
        if (1..=15).contains(&delta) {
            self.buf.push(((delta as u8) << 4) | wire_type);
        } else {
            self.buf.push(wire_type);
            put_uvarint(&mut self.buf, zigzag(id.into()));
        }
        self.last_id = id;
    }

    fn bool_field(&mut self, id: i16, value: bool) {
        self.field_header(id, if value { BOOL_TRUE } else { BOOL_FALSE });
    }

    fn i16_field(&mut self, id: i16, value: i16) {
        self.field_header(id, I16);
        put_uvarint(&mut self.buf, zigzag(value.into()));
    }

    fn i32_field(&mut self, id: i16, value: i32) {
        self.field_header(id, I32);
        put_uvarint(&mut self.buf, zigzag(value.into()));
    }

    fn i64_field(&mut self, id: i16, value: i64) {
        self.field_header(id, I64);
        put_uvarint(&mut self.buf, zigzag(value));
    }

    fn binary_field(&mut self, id: i16, value: &[u8]) {
        self.field_header(id, BINARY);
        put_uvarint(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(value);
    }

    fn list_field(&mut self, id: i16, elem_type: u8, len: usize) {
        self.field_header(id, LIST);
        list_header(&mut self.buf, elem_type, len);
    }

    fn struct_begin(&mut self) {
        self.nested.push(self.last_id);
        self.last_id = 0;
    }

    fn struct_end(&mut self) {
        self.buf.push(STOP);
        self.last_id = self.nested.pop().unwrap_or(0);
    }
}

fn list_header(buf: &mut Vec<u8>, elem_type: u8, len: usize) {
    if len < 15 {
        buf.push(((len as u8) << 4) | elem_type);
    } else {
        buf.push(0xF0 | elem_type);
        put_uvarint(buf, len as u64);
    }
}

fn write_endpoint(w: &mut CompactWriter, field_id: i16, endpoint: &Endpoint) {
    w.field_header(field_id, STRUCT);
    w.struct_begin();
    if let Some(ipv4) = endpoint.ipv4 {
        w.i32_field(1, u32::from(ipv4) as i32);
    }
    if let Some(port) = endpoint.port {
        w.i16_field(2, port as i16);
    }
    if let Some(name) = &endpoint.service_name {
        w.binary_field(3, name.as_bytes());
    }
    if let Some(ipv6) = endpoint.ipv6 {
        w.binary_field(4, &ipv6.octets());
    }
    w.struct_end();
}

fn write_span(w: &mut CompactWriter, span: &V1Span) {
    w.struct_begin();
    w.i64_field(1, span.trace_id.low_u64() as i64);
    w.binary_field(3, span.name.as_bytes());
    w.i64_field(4, span.id.to_u64() as i64);
    if let Some(parent_id) = span.parent_id {
        w.i64_field(5, parent_id.to_u64() as i64);
    }

    w.list_field(6, STRUCT, span.annotations.len());
    for annotation in &span.annotations {
        w.struct_begin();
        w.i64_field(1, annotation.timestamp as i64);
        w.binary_field(2, annotation.value.as_bytes());
        if let Some(endpoint) = &annotation.endpoint {
            write_endpoint(w, 3, endpoint);
        }
        w.struct_end();
    }

    w.list_field(8, STRUCT, span.binary_annotations.len());
    for binary in &span.binary_annotations {
        w.struct_begin();
        w.binary_field(1, binary.key.as_bytes());
        let (bytes, annotation_type) = match &binary.value {
            V1Value::Bool(b) => (vec![u8::from(*b)], TYPE_BOOL),
            V1Value::Str(s) => (s.clone().into_bytes(), TYPE_STRING),
        };
        w.binary_field(2, &bytes);
        w.i32_field(3, annotation_type);
        if let Some(endpoint) = &binary.endpoint {
            write_endpoint(w, 4, endpoint);
        }
        w.struct_end();
    }

    if span.debug {
        w.bool_field(9, true);
    }
    if let Some(timestamp) = span.timestamp {
        w.i64_field(10, timestamp as i64);
    }
    if let Some(duration) = span.duration {
        w.i64_field(11, duration as i64);
    }
    if let Some(high) = span.trace_id.high_u64() {
        w.i64_field(12, high as i64);
    }
    w.struct_end();
}

/// Encode one span as a bare struct, without the surrounding list frame.
pub(crate) fn encode_span(span: &Span) -> Vec<u8> {
    let mut w = CompactWriter::new();
    write_span(&mut w, &super::to_v1(span));
    w.buf
}

/// Wrap encoded span structs in the batch list frame.
pub(crate) fn join_spans(pieces: &[Vec<u8>]) -> Vec<u8> {
    let size: usize = pieces.iter().map(Vec::len).sum();
    let mut buf = Vec::with_capacity(size + 6);
    list_header(&mut buf, STRUCT, pieces.len());
    for piece in pieces {
        buf.extend_from_slice(piece);
    }
    buf
}

struct FieldHeader {
    id: i16,
    wire_type: u8,
    bool_value: Option<bool>,
}

struct CompactReader<'a> {
    buf: &'a [u8],
    pos: usize,
    last_id: i16,
    nested: Vec<i16>,
}

impl<'a> CompactReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        CompactReader {
            buf,
            pos: 0,
            last_id: 0,
            nested: Vec::new(),
        }
    }

    fn byte(&mut self) -> Result<u8> {
        let b = *self.buf.get(self.pos).ok_or_else(|| err("truncated payload"))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| err("truncated payload"))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn uvarint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let b = self.byte()?;
            value |= u64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(err("varint longer than 64 bits"))
    }

    fn zigzag_int(&mut self) -> Result<i64> {
        Ok(unzigzag(self.uvarint()?))
    }

    fn binary(&mut self) -> Result<&'a [u8]> {
        let len = self.uvarint()?;
        let len = usize::try_from(len).map_err(|_| err("binary field too long"))?;
        self.take(len)
    }

    fn string(&mut self) -> Result<String> {
        let bytes = self.binary()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| err("string field is not UTF-8"))
    }

    /// Read the next field header, or `None` at the enclosing STOP.
    fn field_header(&mut self) -> Result<Option<FieldHeader>> {
        let b = self.byte()?;
        if b == STOP {
            return Ok(None);
        }
        let wire_type = b & 0x0f;
        let delta = (b >> 4) as i16;
        let id = if delta == 0 {
            let id = self.zigzag_int()?;
            i16::try_from(id).map_err(|_| err("field id out of range"))?
        } else {
            self.last_id.wrapping_add(delta)
        };
        self.last_id = id;
        let bool_value = match wire_type {
            BOOL_TRUE => Some(true),
            BOOL_FALSE => Some(false),
            _ => None,
        };
        Ok(Some(FieldHeader {
            id,
            wire_type,
            bool_value,
        }))
    }

    fn list_header(&mut self) -> Result<(u8, usize)> {
        let b = self.byte()?;
        let elem_type = b & 0x0f;
        let len = if b >> 4 == 0x0f {
            usize::try_from(self.uvarint()?).map_err(|_| err("list too long"))?
        } else {
            (b >> 4) as usize
        };
        Ok((elem_type, len))
    }

    fn struct_begin(&mut self) {
        self.nested.push(self.last_id);
        self.last_id = 0;
    }

    fn struct_end(&mut self) {
        self.last_id = self.nested.pop().unwrap_or(0);
    }

    /// Step over one value of the given wire type.
    fn skip(&mut self, wire_type: u8) -> Result<()> {
        match wire_type {
            BOOL_TRUE | BOOL_FALSE => {}
            BYTE => {
                self.byte()?;
            }
            I16 | I32 | I64 => {
                self.uvarint()?;
            }
            DOUBLE => {
                self.take(8)?;
            }
            BINARY => {
                self.binary()?;
            }
            LIST | SET => {
                let (elem_type, len) = self.list_header()?;
                for _ in 0..len {
                    // list elements of bool type occupy one byte each
                    match elem_type {
                        BOOL_TRUE | BOOL_FALSE => {
                            self.byte()?;
                        }
                        other => self.skip(other)?,
                    }
                }
            }
            MAP => {
                let len = usize::try_from(self.uvarint()?).map_err(|_| err("map too long"))?;
                if len > 0 {
                    let types = self.byte()?;
                    for _ in 0..len {
                        self.skip(types >> 4)?;
                        self.skip(types & 0x0f)?;
                    }
                }
            }
            STRUCT => {
                self.struct_begin();
                while let Some(field) = self.field_header()? {
                    self.skip(field.wire_type)?;
                }
                self.struct_end();
            }
            other => return Err(err(format!("unknown wire type {other}"))),
        }
        Ok(())
    }
}

fn read_endpoint(r: &mut CompactReader<'_>) -> Result<Option<Endpoint>> {
    let mut endpoint = Endpoint::default();
    r.struct_begin();
    while let Some(field) = r.field_header()? {
        match (field.id, field.wire_type) {
            (1, I32) => {
                let packed = i32::try_from(r.zigzag_int()?)
                    .map_err(|_| err("endpoint ipv4 out of range"))?;
                if packed != 0 {
                    endpoint.ipv4 = Some(Ipv4Addr::from(packed as u32));
                }
            }
            (2, I16) => {
                let port = i16::try_from(r.zigzag_int()?)
                    .map_err(|_| err("endpoint port out of range"))?;
                if port != 0 {
                    endpoint.port = Some(port as u16);
                }
            }
            (3, BINARY) => {
                let name = r.string()?;
                if !name.is_empty() {
                    endpoint.service_name = Some(name);
                }
            }
            (4, BINARY) => {
                let bytes = r.binary()?;
                let octets: [u8; 16] = bytes
                    .try_into()
                    .map_err(|_| err("endpoint ipv6 is not 16 bytes"))?;
                endpoint.ipv6 = Some(Ipv6Addr::from(octets));
            }
            _ => r.skip(field.wire_type)?,
        }
    }
    r.struct_end();
    Ok((!endpoint.is_empty()).then_some(endpoint))
}

fn read_annotation(r: &mut CompactReader<'_>) -> Result<V1Annotation> {
    let mut annotation = V1Annotation {
        timestamp: 0,
        value: String::new(),
        endpoint: None,
    };
    r.struct_begin();
    while let Some(field) = r.field_header()? {
        match (field.id, field.wire_type) {
            (1, I64) => annotation.timestamp = r.zigzag_int()? as u64,
            (2, BINARY) => annotation.value = r.string()?,
            (3, STRUCT) => annotation.endpoint = read_endpoint(r)?,
            _ => r.skip(field.wire_type)?,
        }
    }
    r.struct_end();
    Ok(annotation)
}

/// Coerce a typed binary-annotation value to this crate's model.
///
/// Bool and string survive as-is; the numeric legacy types render as
/// decimal text and raw bytes as lower-case hex, since tags are strings
/// in the current model.
fn coerce_value(annotation_type: i32, bytes: &[u8]) -> Result<V1Value> {
    fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
        bytes
            .try_into()
            .map_err(|_| err(format!("binary annotation value is not {N} bytes")))
    }
    Ok(match annotation_type {
        TYPE_BOOL => V1Value::Bool(fixed::<1>(bytes)?[0] != 0),
        TYPE_STRING => V1Value::Str(
            String::from_utf8(bytes.to_vec())
                .map_err(|_| err("string annotation is not UTF-8"))?,
        ),
        TYPE_I16 => V1Value::Str(i16::from_be_bytes(fixed(bytes)?).to_string()),
        TYPE_I32 => V1Value::Str(i32::from_be_bytes(fixed(bytes)?).to_string()),
        TYPE_I64 => V1Value::Str(i64::from_be_bytes(fixed(bytes)?).to_string()),
        TYPE_DOUBLE => V1Value::Str(f64::from_be_bytes(fixed(bytes)?).to_string()),
        TYPE_BYTES => {
            tracing::warn!(len = bytes.len(), "coercing BYTES binary annotation to hex");
            V1Value::Str(bytes.iter().map(|b| format!("{b:02x}")).collect())
        }
        other => return Err(err(format!("unknown annotation type {other}"))),
    })
}

fn read_binary_annotation(r: &mut CompactReader<'_>) -> Result<V1BinaryAnnotation> {
    let mut key = String::new();
    let mut value_bytes: Vec<u8> = Vec::new();
    let mut annotation_type = TYPE_STRING;
    let mut endpoint = None;
    r.struct_begin();
    while let Some(field) = r.field_header()? {
        match (field.id, field.wire_type) {
            (1, BINARY) => key = r.string()?,
            (2, BINARY) => value_bytes = r.binary()?.to_vec(),
            (3, I32) => {
                annotation_type = i32::try_from(r.zigzag_int()?)
                    .map_err(|_| err("annotation type out of range"))?;
            }
            (4, STRUCT) => endpoint = read_endpoint(r)?,
            _ => r.skip(field.wire_type)?,
        }
    }
    r.struct_end();
    Ok(V1BinaryAnnotation {
        key,
        value: coerce_value(annotation_type, &value_bytes)?,
        endpoint,
    })
}

fn read_span(r: &mut CompactReader<'_>) -> Result<V1Span> {
    let mut trace_lo = 0u64;
    let mut trace_hi: Option<u64> = None;
    let mut span = V1Span {
        trace_id: TraceId::from_u64(0),
        id: SpanId::from_u64(0),
        parent_id: None,
        name: String::new(),
        timestamp: None,
        duration: None,
        debug: false,
        annotations: Vec::new(),
        binary_annotations: Vec::new(),
    };
    r.struct_begin();
    while let Some(field) = r.field_header()? {
        match (field.id, field.wire_type) {
            (1, I64) => trace_lo = r.zigzag_int()? as u64,
            (3, BINARY) => span.name = r.string()?,
            (4, I64) => span.id = SpanId::from_u64(r.zigzag_int()? as u64),
            (5, I64) => span.parent_id = Some(SpanId::from_u64(r.zigzag_int()? as u64)),
            (6, LIST) => {
                let (elem_type, len) = r.list_header()?;
                if elem_type != STRUCT {
                    return Err(err("annotations list does not hold structs"));
                }
                for _ in 0..len {
                    span.annotations.push(read_annotation(r)?);
                }
            }
            (8, LIST) => {
                let (elem_type, len) = r.list_header()?;
                if elem_type != STRUCT {
                    return Err(err("binary annotations list does not hold structs"));
                }
                for _ in 0..len {
                    span.binary_annotations.push(read_binary_annotation(r)?);
                }
            }
            (9, BOOL_TRUE | BOOL_FALSE) => {
                span.debug = field.bool_value.unwrap_or(false);
            }
            (10, I64) => span.timestamp = Some(r.zigzag_int()? as u64),
            (11, I64) => span.duration = Some(r.zigzag_int()? as u64),
            (12, I64) => trace_hi = Some(r.zigzag_int()? as u64),
            _ => r.skip(field.wire_type)?,
        }
    }
    r.struct_end();
    span.trace_id = match trace_hi {
        Some(hi) => TraceId::from_u128((u128::from(hi) << 64) | u128::from(trace_lo)),
        None => TraceId::from_u64(trace_lo),
    };
    Ok(span)
}

/// Decode a compact-protocol span list.
///
/// The payload must be exactly one list of span structs with nothing
/// trailing; anything else is malformed.
pub(crate) fn decode_spans(bytes: &[u8]) -> Result<Vec<Span>> {
    let mut r = CompactReader::new(bytes);
    let (elem_type, len) = r.list_header()?;
    if elem_type != STRUCT {
        return Err(err("payload is not a list of span structs"));
    }
    let mut spans = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        spans.push(super::from_v1(read_span(&mut r)?));
    }
    if r.pos != bytes.len() {
        return Err(err("trailing bytes after span list"));
    }
    Ok(spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Kind;
    use std::collections::HashMap;

    fn span() -> Span {
        let mut tags = HashMap::new();
        tags.insert("peer.service".to_owned(), "db".to_owned());
        Span::builder()
            .trace_id(TraceId::from_u64(0x0eb1_40d1_4a2a_f27f))
            .id(SpanId::from_u64(0x51))
            .parent_id(SpanId::from_u64(0x50))
            .name("query")
            .kind(Kind::Client)
            .timestamp(1_472_470_996_199_000)
            .duration(207_000)
            .local_endpoint(
                Endpoint::builder()
                    .service_name("frontend")
                    .ipv4(Ipv4Addr::new(127, 0, 0, 1))
                    .build(),
            )
            .tags(tags)
            .debug(true)
            .build()
    }

    #[test]
    fn round_trip() {
        let spans = vec![span()];
        let payload = join_spans(&[encode_span(&spans[0])]);
        assert_eq!(decode_spans(&payload).unwrap(), spans);
    }

    #[test]
    fn round_trip_128bit_trace_id() {
        let wide = Span::builder()
            .trace_id(TraceId::from_u128(0x4e44_1824_ec2b_6a44_ffdc_9bb9_a645_3df3))
            .id(SpanId::from_u64(9))
            .timestamp(1_000)
            .build();
        let payload = join_spans(&[encode_span(&wide)]);
        let back = decode_spans(&payload).unwrap();
        assert_eq!(back[0].trace_id, wide.trace_id);
        assert!(back[0].trace_id.is_wide());
    }

    #[test]
    fn batch_frame_counts_spans() {
        let pieces = vec![encode_span(&span()), encode_span(&span())];
        let payload = join_spans(&pieces);
        // list header: size 2, element type struct
        assert_eq!(payload[0], 0x2c);
        assert_eq!(decode_spans(&payload).unwrap().len(), 2);
    }

    #[test]
    fn numeric_binary_annotations_coerce_to_text() {
        assert_eq!(
            coerce_value(TYPE_I16, &300i16.to_be_bytes()).unwrap(),
            V1Value::Str("300".to_owned()),
        );
        assert_eq!(
            coerce_value(TYPE_I64, &(-7i64).to_be_bytes()).unwrap(),
            V1Value::Str("-7".to_owned()),
        );
        assert_eq!(
            coerce_value(TYPE_DOUBLE, &1.5f64.to_be_bytes()).unwrap(),
            V1Value::Str("1.5".to_owned()),
        );
        assert_eq!(
            coerce_value(TYPE_BYTES, &[0xde, 0xad]).unwrap(),
            V1Value::Str("dead".to_owned()),
        );
        assert!(coerce_value(TYPE_I32, &[0, 1]).is_err());
        assert!(coerce_value(99, b"x").is_err());
    }

    #[test]
    fn unknown_fields_are_skipped() {
        // span struct with an extra i64 field 20 and a binary field 21
        let mut w = CompactWriter::new();
        w.struct_begin();
        w.i64_field(1, 7);
        w.binary_field(3, b"op");
        w.i64_field(4, 8);
        w.i64_field(20, 42);
        w.binary_field(21, b"ignored");
        w.struct_end();
        let payload = join_spans(&[w.buf]);
        let spans = decode_spans(&payload).unwrap();
        assert_eq!(spans[0].name.as_deref(), Some("op"));
        assert_eq!(spans[0].id, SpanId::from_u64(8));
    }

    #[test]
    fn truncation_and_trailing_bytes_are_rejected() {
        let mut payload = join_spans(&[encode_span(&span())]);
        payload.push(0x00);
        assert!(decode_spans(&payload).is_err());
        payload.pop();
        payload.truncate(payload.len() - 4);
        assert!(decode_spans(&payload).is_err());
    }

    #[test]
    fn long_form_field_header_round_trips() {
        let mut w = CompactWriter::new();
        w.struct_begin();
        w.i64_field(1, 1);
        w.i64_field(4, 2);
        w.i64_field(100, 5); // delta > 15 forces the long form
        w.struct_end();
        let spans = decode_spans(&join_spans(&[w.buf])).unwrap();
        assert_eq!(spans[0].id, SpanId::from_u64(2));
    }
}
