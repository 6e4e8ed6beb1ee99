//! Protobuf codec for v2 spans, after the `zipkin.proto3` schema.
//!
//! The messages are written out by hand rather than generated, since the
//! schema is four small messages and freezing it in source keeps the build
//! free of a protoc step. Field numbers and types follow the published
//! schema exactly.

use crate::codec::{put_uvarint, Encoding};
use crate::error::{Error, Result};
use crate::model::{Annotation, Endpoint, Kind, Span, SpanId, TraceId};
use prost::Message;
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Clone, PartialEq, Message)]
struct ListOfSpans {
    #[prost(message, repeated, tag = "1")]
    spans: Vec<ProtoSpan>,
}

#[derive(Clone, PartialEq, Message)]
struct ProtoSpan {
    #[prost(bytes = "vec", tag = "1")]
    trace_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    parent_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    id: Vec<u8>,
    #[prost(enumeration = "ProtoKind", tag = "4")]
    kind: i32,
    #[prost(string, tag = "5")]
    name: String,
    #[prost(fixed64, tag = "6")]
    timestamp: u64,
    #[prost(uint64, tag = "7")]
    duration: u64,
    #[prost(message, optional, tag = "8")]
    local_endpoint: Option<ProtoEndpoint>,
    #[prost(message, optional, tag = "9")]
    remote_endpoint: Option<ProtoEndpoint>,
    #[prost(message, repeated, tag = "10")]
    annotations: Vec<ProtoAnnotation>,
    #[prost(map = "string, string", tag = "11")]
    tags: HashMap<String, String>,
    #[prost(bool, tag = "12")]
    debug: bool,
    #[prost(bool, tag = "13")]
    shared: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum ProtoKind {
    SpanKindUnspecified = 0,
    Client = 1,
    Server = 2,
    Producer = 3,
    Consumer = 4,
}

#[derive(Clone, PartialEq, Message)]
struct ProtoEndpoint {
    #[prost(string, tag = "1")]
    service_name: String,
    #[prost(bytes = "vec", tag = "2")]
    ipv4: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    ipv6: Vec<u8>,
    #[prost(int32, tag = "4")]
    port: i32,
}

#[derive(Clone, PartialEq, Message)]
struct ProtoAnnotation {
    #[prost(fixed64, tag = "1")]
    timestamp: u64,
    #[prost(string, tag = "2")]
    value: String,
}

fn err(message: impl Into<String>) -> Error {
    Error::decoding(Encoding::V2Proto, message)
}

impl From<&Endpoint> for ProtoEndpoint {
    fn from(endpoint: &Endpoint) -> Self {
        ProtoEndpoint {
            service_name: endpoint.service_name.clone().unwrap_or_default(),
            ipv4: endpoint.ipv4.map_or_else(Vec::new, |ip| ip.octets().to_vec()),
            ipv6: endpoint.ipv6.map_or_else(Vec::new, |ip| ip.octets().to_vec()),
            port: endpoint.port.map_or(0, i32::from),
        }
    }
}

impl TryFrom<ProtoEndpoint> for Endpoint {
    type Error = Error;

    fn try_from(proto: ProtoEndpoint) -> Result<Self> {
        let ipv4 = match proto.ipv4.len() {
            0 => None,
            4 => {
                let octets: [u8; 4] = proto.ipv4[..].try_into().unwrap_or_default();
                Some(Ipv4Addr::from(octets))
            }
            other => return Err(err(format!("endpoint ipv4 is {other} bytes"))),
        };
        let ipv6 = match proto.ipv6.len() {
            0 => None,
            16 => {
                let octets: [u8; 16] = proto.ipv6[..].try_into().unwrap_or_default();
                Some(Ipv6Addr::from(octets))
            }
            other => return Err(err(format!("endpoint ipv6 is {other} bytes"))),
        };
        let port = u16::try_from(proto.port).map_err(|_| err("endpoint port out of range"))?;
        Ok(Endpoint {
            service_name: (!proto.service_name.is_empty()).then_some(proto.service_name),
            ipv4,
            ipv6,
            port: (port != 0).then_some(port),
        })
    }
}

fn from_model(span: &Span) -> ProtoSpan {
    ProtoSpan {
        trace_id: span.trace_id.to_bytes(),
        parent_id: span.parent_id.map_or_else(Vec::new, |id| id.to_bytes().to_vec()),
        id: span.id.to_bytes().to_vec(),
        kind: match span.kind {
            None => ProtoKind::SpanKindUnspecified,
            Some(Kind::Client) => ProtoKind::Client,
            Some(Kind::Server) => ProtoKind::Server,
            Some(Kind::Producer) => ProtoKind::Producer,
            Some(Kind::Consumer) => ProtoKind::Consumer,
        } as i32,
        name: span.name.clone().unwrap_or_default(),
        timestamp: span.timestamp.unwrap_or(0),
        duration: span.duration.unwrap_or(0),
        local_endpoint: span.local_endpoint.as_ref().map(ProtoEndpoint::from),
        remote_endpoint: span.remote_endpoint.as_ref().map(ProtoEndpoint::from),
        annotations: span
            .annotations
            .iter()
            .map(|a| ProtoAnnotation {
                timestamp: a.timestamp,
                value: a.value.clone(),
            })
            .collect(),
        tags: span.tags.clone(),
        debug: span.debug,
        shared: span.shared,
    }
}

fn to_model(proto: ProtoSpan) -> Result<Span> {
    let trace_id = TraceId::from_bytes(&proto.trace_id)
        .map_err(|_| err(format!("trace id is {} bytes", proto.trace_id.len())))?;
    let id = SpanId::from_bytes(&proto.id)
        .map_err(|_| err(format!("span id is {} bytes", proto.id.len())))?;
    let parent_id = if proto.parent_id.is_empty() {
        None
    } else {
        Some(
            SpanId::from_bytes(&proto.parent_id)
                .map_err(|_| err(format!("parent id is {} bytes", proto.parent_id.len())))?,
        )
    };
    let kind = match ProtoKind::try_from(proto.kind)
        .map_err(|_| err(format!("unknown span kind {}", proto.kind)))?
    {
        ProtoKind::SpanKindUnspecified => None,
        ProtoKind::Client => Some(Kind::Client),
        ProtoKind::Server => Some(Kind::Server),
        ProtoKind::Producer => Some(Kind::Producer),
        ProtoKind::Consumer => Some(Kind::Consumer),
    };
    let local_endpoint = proto
        .local_endpoint
        .map(Endpoint::try_from)
        .transpose()?
        .filter(|e| !e.is_empty());
    let remote_endpoint = proto
        .remote_endpoint
        .map(Endpoint::try_from)
        .transpose()?
        .filter(|e| !e.is_empty());
    Ok(Span {
        trace_id,
        id,
        parent_id,
        name: (!proto.name.is_empty()).then_some(proto.name),
        kind,
        timestamp: (proto.timestamp != 0).then_some(proto.timestamp),
        duration: (proto.duration != 0).then_some(proto.duration),
        local_endpoint,
        remote_endpoint,
        annotations: proto
            .annotations
            .into_iter()
            .map(|a| Annotation::new(a.timestamp, a.value))
            .collect(),
        tags: proto.tags,
        debug: proto.debug,
        shared: proto.shared,
    })
}

/// Encode one span as a self-framed `ListOfSpans` element.
///
/// The piece carries its own repeated-field frame, so a batch payload is
/// the plain concatenation of pieces.
pub(crate) fn encode_span(span: &Span) -> Vec<u8> {
    let message = from_model(span).encode_to_vec();
    let mut piece = Vec::with_capacity(message.len() + 6);
    piece.push(0x0a); // ListOfSpans.spans, wire type LEN
    put_uvarint(&mut piece, message.len() as u64);
    piece.extend_from_slice(&message);
    piece
}

pub(crate) fn decode_spans(bytes: &[u8]) -> Result<Vec<Span>> {
    let list = ListOfSpans::decode(bytes).map_err(|e| err(e.to_string()))?;
    list.spans.into_iter().map(to_model).collect()
}
