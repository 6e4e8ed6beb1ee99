//! JSON codec for v1 spans.
//!
//! The wire structs below are the literal v1 JSON shape; conversion to and
//! from the span model goes through the shared [`V1Span`] mapping. Binary
//! annotation values are typed in v1 JSON, so decoding coerces non-string
//! values to text the same way the thrift codec does.

use super::{V1Annotation, V1BinaryAnnotation, V1Span, V1Value};
use crate::codec::Encoding;
use crate::error::{Error, Result};
use crate::model::{Endpoint, Span, SpanId, TraceId};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonSpan {
    trace_id: TraceId,
    #[serde(default)]
    name: String,
    id: SpanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_id: Option<SpanId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    debug: bool,
    #[serde(default)]
    annotations: Vec<JsonAnnotation>,
    #[serde(default)]
    binary_annotations: Vec<JsonBinaryAnnotation>,
}

#[derive(Serialize, Deserialize)]
struct JsonAnnotation {
    timestamp: u64,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    endpoint: Option<JsonEndpoint>,
}

#[derive(Serialize, Deserialize)]
struct JsonBinaryAnnotation {
    key: String,
    value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    endpoint: Option<JsonEndpoint>,
}

// v1 endpoints always carry serviceName, "" standing in for unknown.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonEndpoint {
    #[serde(default)]
    service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ipv4: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ipv6: Option<Ipv6Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
}

impl From<&Endpoint> for JsonEndpoint {
    fn from(endpoint: &Endpoint) -> Self {
        JsonEndpoint {
            service_name: endpoint.service_name.clone().unwrap_or_default(),
            ipv4: endpoint.ipv4,
            ipv6: endpoint.ipv6,
            port: endpoint.port,
        }
    }
}

impl From<JsonEndpoint> for Endpoint {
    fn from(endpoint: JsonEndpoint) -> Self {
        Endpoint {
            service_name: (!endpoint.service_name.is_empty()).then_some(endpoint.service_name),
            ipv4: endpoint.ipv4,
            ipv6: endpoint.ipv6,
            port: endpoint.port,
        }
    }
}

fn from_model(v1: V1Span) -> JsonSpan {
    JsonSpan {
        trace_id: v1.trace_id,
        name: v1.name,
        id: v1.id,
        parent_id: v1.parent_id,
        timestamp: v1.timestamp,
        duration: v1.duration,
        debug: v1.debug,
        annotations: v1
            .annotations
            .into_iter()
            .map(|a| JsonAnnotation {
                timestamp: a.timestamp,
                value: a.value,
                endpoint: a.endpoint.as_ref().map(JsonEndpoint::from),
            })
            .collect(),
        binary_annotations: v1
            .binary_annotations
            .into_iter()
            .map(|b| JsonBinaryAnnotation {
                key: b.key,
                value: match b.value {
                    V1Value::Bool(v) => serde_json::Value::Bool(v),
                    V1Value::Str(v) => serde_json::Value::String(v),
                },
                endpoint: b.endpoint.as_ref().map(JsonEndpoint::from),
            })
            .collect(),
    }
}

/// Coerce a typed v1 JSON binary-annotation value to the string model.
///
/// Structured values (arrays, objects, null) have no tag rendering; they
/// fail as [`Error::AnnotationValue`] and the caller falls back to raw
/// JSON text.
fn coerce_value(value: &serde_json::Value) -> Result<V1Value> {
    match value {
        serde_json::Value::Bool(v) => Ok(V1Value::Bool(*v)),
        serde_json::Value::String(v) => Ok(V1Value::Str(v.clone())),
        serde_json::Value::Number(v) => Ok(V1Value::Str(v.to_string())),
        other => Err(Error::AnnotationValue(format!(
            "structured value {other} in binary annotation"
        ))),
    }
}

fn to_model(span: JsonSpan) -> V1Span {
    V1Span {
        trace_id: span.trace_id,
        id: span.id,
        parent_id: span.parent_id,
        name: span.name,
        timestamp: span.timestamp,
        duration: span.duration,
        debug: span.debug,
        annotations: span
            .annotations
            .into_iter()
            .map(|a| V1Annotation {
                timestamp: a.timestamp,
                value: a.value,
                endpoint: a.endpoint.map(Endpoint::from),
            })
            .collect(),
        binary_annotations: span
            .binary_annotations
            .into_iter()
            .map(|b| {
                let value = coerce_value(&b.value).unwrap_or_else(|error| {
                    tracing::warn!(key = %b.key, %error, "coercing binary annotation to raw JSON");
                    V1Value::Str(b.value.to_string())
                });
                V1BinaryAnnotation {
                    key: b.key,
                    value,
                    endpoint: b.endpoint.map(Endpoint::from),
                }
            })
            .collect(),
    }
}

pub(crate) fn encode_span(span: &Span) -> Result<Vec<u8>> {
    serde_json::to_vec(&from_model(super::to_v1(span)))
        .map_err(|e| Error::encoding(Encoding::V1Json, e.to_string()))
}

pub(crate) fn decode_spans(bytes: &[u8]) -> Result<Vec<Span>> {
    let spans: Vec<JsonSpan> = serde_json::from_slice(bytes)
        .map_err(|e| Error::decoding(Encoding::V1Json, e.to_string()))?;
    Ok(spans
        .into_iter()
        .map(|span| super::from_v1(to_model(span)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Kind;

    #[test]
    fn golden_client_span() {
        let span = Span::builder()
            .trace_id(TraceId::from_u64(0x1))
            .id(SpanId::from_u64(0x2))
            .name("get")
            .kind(Kind::Client)
            .timestamp(1_000)
            .duration(100)
            .local_endpoint(Endpoint::builder().service_name("web").build())
            .build();
        let text = String::from_utf8(encode_span(&span).unwrap()).unwrap();
        assert_eq!(
            text,
            "{\"traceId\":\"0000000000000001\",\
             \"name\":\"get\",\
             \"id\":\"0000000000000002\",\
             \"timestamp\":1000,\
             \"duration\":100,\
             \"annotations\":[\
             {\"timestamp\":1000,\"value\":\"cs\",\"endpoint\":{\"serviceName\":\"web\"}},\
             {\"timestamp\":1100,\"value\":\"cr\",\"endpoint\":{\"serviceName\":\"web\"}}],\
             \"binaryAnnotations\":[]}",
        );
    }

    #[test]
    fn wide_trace_ids_survive_the_round_trip() {
        let span = Span::builder()
            .trace_id(TraceId::from_u128(u128::MAX))
            .id(SpanId::from_u64(0x2))
            .name("get")
            .kind(Kind::Client)
            .timestamp(1_000)
            .duration(100)
            .local_endpoint(Endpoint::builder().service_name("web").build())
            .build();
        let encoded = encode_span(&span).unwrap();
        let text = String::from_utf8(encoded.clone()).unwrap();
        assert!(text.contains("\"traceId\":\"ffffffffffffffffffffffffffffffff\""));
        let payload = [b"[" as &[u8], &encoded, b"]"].concat();
        let decoded = decode_spans(&payload).unwrap();
        assert_eq!(decoded, vec![span]);
    }

    #[test]
    fn decodes_typed_binary_annotations() {
        let payload = br#"[{
            "traceId": "0000000000000001",
            "name": "get",
            "id": "0000000000000002",
            "timestamp": 1000,
            "binaryAnnotations": [
                {"key": "http.status_code", "value": 500, "endpoint": {"serviceName": "web"}},
                {"key": "error", "value": true},
                {"key": "blob", "value": {"nested": 1}}
            ]
        }]"#;
        let spans = decode_spans(payload).unwrap();
        let tags = &spans[0].tags;
        assert_eq!(tags.get("http.status_code").map(String::as_str), Some("500"));
        assert_eq!(tags.get("error").map(String::as_str), Some("true"));
        assert_eq!(tags.get("blob").map(String::as_str), Some("{\"nested\":1}"));
        assert_eq!(
            spans[0].local_endpoint,
            Some(Endpoint::builder().service_name("web").build()),
        );
    }

    #[test]
    fn empty_service_name_reads_as_unset() {
        let payload = br#"[{
            "traceId": "0000000000000001",
            "id": "0000000000000002",
            "annotations": [{"timestamp": 5, "value": "sr", "endpoint": {"serviceName": ""}}]
        }]"#;
        let spans = decode_spans(payload).unwrap();
        assert_eq!(spans[0].kind, Some(Kind::Server));
        assert_eq!(spans[0].local_endpoint, None);
        assert!(spans[0].shared);
    }

    #[test]
    fn malformed_document_fails() {
        assert!(matches!(
            decode_spans(b"[{\"id\":\"1\"}]"),
            Err(Error::Decoding { .. })
        ));
        assert!(decode_spans(b"{}").is_err());
    }
}
