//! The legacy v1 data model and its mapping to the v2 span model.
//!
//! v1 has no `kind`, `timestamp`/`duration` semantics or structured tags:
//! timing travels as the conventional `cs`/`cr` (client) and `sr`/`ss`
//! (server) annotation pairs and tags as typed "binary annotations". The
//! mapping lives here once and is shared by the thrift and JSON v1 codecs.

pub(crate) mod json;
pub(crate) mod thrift;

use crate::model::{Annotation, Endpoint, Kind, Span, SpanId, TraceId};
use std::collections::HashMap;

pub(crate) const CLIENT_SEND: &str = "cs";
pub(crate) const CLIENT_RECV: &str = "cr";
pub(crate) const SERVER_RECV: &str = "sr";
pub(crate) const SERVER_SEND: &str = "ss";
// No standard two-letter pair exists for messaging spans in v1; `ms`/`mr`
// follow the openzipkin message-send/message-receive convention.
pub(crate) const MESSAGE_SEND: &str = "ms";
pub(crate) const MESSAGE_RECV: &str = "mr";
pub(crate) const SERVER_ADDR: &str = "sa";
pub(crate) const CLIENT_ADDR: &str = "ca";

const TIMING_VALUES: [&str; 6] = [
    CLIENT_SEND,
    CLIENT_RECV,
    SERVER_RECV,
    SERVER_SEND,
    MESSAGE_SEND,
    MESSAGE_RECV,
];

/// A span in the legacy symmetric annotation-list model.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct V1Span {
    pub(crate) trace_id: TraceId,
    pub(crate) id: SpanId,
    pub(crate) parent_id: Option<SpanId>,
    pub(crate) name: String,
    pub(crate) timestamp: Option<u64>,
    pub(crate) duration: Option<u64>,
    pub(crate) debug: bool,
    pub(crate) annotations: Vec<V1Annotation>,
    pub(crate) binary_annotations: Vec<V1BinaryAnnotation>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct V1Annotation {
    pub(crate) timestamp: u64,
    pub(crate) value: String,
    pub(crate) endpoint: Option<Endpoint>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct V1BinaryAnnotation {
    pub(crate) key: String,
    pub(crate) value: V1Value,
    pub(crate) endpoint: Option<Endpoint>,
}

/// Binary-annotation values this crate emits. Decoders coerce the other
/// legacy value types (bytes, integers, doubles) to strings.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum V1Value {
    Bool(bool),
    Str(String),
}

impl V1Value {
    pub(crate) fn into_text(self) -> String {
        match self {
            V1Value::Bool(true) => "true".to_owned(),
            V1Value::Bool(false) => "false".to_owned(),
            V1Value::Str(s) => s,
        }
    }
}

/// Render a v2 span in the v1 model.
///
/// Timing annotations are synthesized from `kind` + `timestamp` +
/// `duration`; tags become string binary annotations carrying the local
/// endpoint; the remote endpoint becomes a bool `sa` (seen from a client)
/// or `ca` (seen from a server) entry. Shared server spans omit the
/// top-level timestamp and duration, leaving the receiving side's
/// annotations authoritative.
pub(crate) fn to_v1(span: &Span) -> V1Span {
    let mut annotations = Vec::new();
    let local = span.local_endpoint.clone();

    if let Some(ts) = span.timestamp {
        let end = span.duration.map(|d| ts.saturating_add(d));
        let mut timing = |value: &str, at: u64| {
            annotations.push(V1Annotation {
                timestamp: at,
                value: value.to_owned(),
                endpoint: local.clone(),
            });
        };
        match span.kind {
            Some(Kind::Client) => {
                timing(CLIENT_SEND, ts);
                if let Some(end) = end {
                    timing(CLIENT_RECV, end);
                }
            }
            Some(Kind::Server) => {
                timing(SERVER_RECV, ts);
                if let Some(end) = end {
                    timing(SERVER_SEND, end);
                }
            }
            Some(Kind::Producer) => timing(MESSAGE_SEND, ts),
            Some(Kind::Consumer) => timing(MESSAGE_RECV, ts),
            // a local span simulates both halves of an in-process call
            None => {
                timing(CLIENT_SEND, ts);
                timing(SERVER_RECV, ts);
                if let Some(end) = end {
                    timing(SERVER_SEND, end);
                    timing(CLIENT_RECV, end);
                }
            }
        }
    }

    for annotation in &span.annotations {
        annotations.push(V1Annotation {
            timestamp: annotation.timestamp,
            value: annotation.value.clone(),
            endpoint: local.clone(),
        });
    }

    let mut binary_annotations = Vec::new();
    let mut tags: Vec<_> = span.tags.iter().collect();
    tags.sort();
    for (key, value) in tags {
        binary_annotations.push(V1BinaryAnnotation {
            key: key.clone(),
            value: V1Value::Str(value.clone()),
            endpoint: local.clone(),
        });
    }

    if let Some(remote) = &span.remote_endpoint {
        let key = match span.kind {
            Some(Kind::Server) => CLIENT_ADDR,
            _ => SERVER_ADDR,
        };
        binary_annotations.push(V1BinaryAnnotation {
            key: key.to_owned(),
            value: V1Value::Bool(true),
            endpoint: Some(remote.clone()),
        });
    }

    let (timestamp, duration) = if span.shared {
        (None, None)
    } else {
        (span.timestamp, span.duration)
    };

    V1Span {
        trace_id: span.trace_id,
        id: span.id,
        parent_id: span.parent_id,
        name: span.name.clone().unwrap_or_default(),
        timestamp,
        duration,
        debug: span.debug,
        annotations,
        binary_annotations,
    }
}

/// Recover a v2 span from the v1 model.
///
/// Recognizes the conventional timing pairs to synthesize `kind`,
/// `timestamp` and `duration`, drops those annotations, and maps the rest
/// back. Server spans without a top-level timestamp are marked `shared`.
pub(crate) fn from_v1(v1: V1Span) -> Span {
    let mut timing: HashMap<&str, u64> = HashMap::new();
    let mut local_endpoint: Option<Endpoint> = None;

    for annotation in &v1.annotations {
        if let Some(endpoint) = &annotation.endpoint {
            if !endpoint.is_empty() {
                local_endpoint = Some(endpoint.clone());
            }
        }
        if let Some(value) = TIMING_VALUES.iter().find(|v| **v == annotation.value) {
            timing.insert(value, annotation.timestamp);
        }
    }

    let client_send = timing.get(CLIENT_SEND).copied();
    let server_recv = timing.get(SERVER_RECV).copied();
    let (kind, timestamp, duration) = match (client_send, server_recv) {
        (Some(cs), None) => (
            Some(Kind::Client),
            Some(cs),
            timing.get(CLIENT_RECV).and_then(|cr| cr.checked_sub(cs)),
        ),
        (None, Some(sr)) => (
            Some(Kind::Server),
            Some(sr),
            timing.get(SERVER_SEND).and_then(|ss| ss.checked_sub(sr)),
        ),
        (Some(_), Some(_)) => (None, None, None),
        (None, None) => {
            if let Some(ms) = timing.get(MESSAGE_SEND) {
                (Some(Kind::Producer), Some(*ms), None)
            } else if let Some(mr) = timing.get(MESSAGE_RECV) {
                (Some(Kind::Consumer), Some(*mr), None)
            } else {
                (None, None, None)
            }
        }
    };

    let annotations: Vec<Annotation> = v1
        .annotations
        .into_iter()
        .filter(|a| !TIMING_VALUES.contains(&a.value.as_str()))
        .map(|a| Annotation::new(a.timestamp, a.value))
        .collect();

    let mut tags = HashMap::new();
    let mut remote_endpoint = None;
    for binary in v1.binary_annotations {
        let is_address = matches!(
            (binary.key.as_str(), &binary.value),
            (SERVER_ADDR | CLIENT_ADDR, V1Value::Bool(_))
        );
        if is_address {
            remote_endpoint = binary.endpoint.filter(|e| !e.is_empty());
        } else {
            if let Some(endpoint) = binary.endpoint.filter(|e| !e.is_empty()) {
                local_endpoint = Some(endpoint);
            }
            tags.insert(binary.key, binary.value.into_text());
        }
    }

    let shared = kind == Some(Kind::Server) && v1.timestamp.is_none();

    Span {
        trace_id: v1.trace_id,
        id: v1.id,
        parent_id: v1.parent_id,
        name: (!v1.name.is_empty()).then_some(v1.name),
        kind,
        timestamp: timestamp.or(v1.timestamp),
        duration: duration.or(v1.duration),
        local_endpoint,
        remote_endpoint,
        annotations,
        tags,
        debug: v1.debug,
        shared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn endpoint(name: &str) -> Endpoint {
        Endpoint::builder()
            .service_name(name)
            .ipv4(Ipv4Addr::new(10, 0, 0, 1))
            .build()
    }

    fn client_span() -> Span {
        let mut tags = HashMap::new();
        tags.insert("http.method".to_owned(), "GET".to_owned());
        Span::builder()
            .trace_id(TraceId::from_u64(0x17133d482ba4f605))
            .id(SpanId::from_u64(0x1))
            .name("get")
            .kind(Kind::Client)
            .timestamp(1_000_000)
            .duration(500)
            .local_endpoint(endpoint("frontend"))
            .remote_endpoint(endpoint("backend"))
            .tags(tags)
            .build()
    }

    #[test]
    fn client_timing_pair() {
        let v1 = to_v1(&client_span());
        let values: Vec<_> = v1.annotations.iter().map(|a| a.value.as_str()).collect();
        assert_eq!(values, vec![CLIENT_SEND, CLIENT_RECV]);
        assert_eq!(v1.annotations[0].timestamp, 1_000_000);
        assert_eq!(v1.annotations[1].timestamp, 1_000_500);
        // sa entry carries the remote endpoint
        let sa = v1.binary_annotations.last().unwrap();
        assert_eq!(sa.key, SERVER_ADDR);
        assert_eq!(sa.value, V1Value::Bool(true));
        assert_eq!(sa.endpoint, Some(endpoint("backend")));
    }

    #[test]
    fn client_round_trip() {
        let span = client_span();
        assert_eq!(from_v1(to_v1(&span)), span);
    }

    #[test]
    fn local_round_trip() {
        let span = Span::builder()
            .trace_id(TraceId::from_u64(3))
            .id(SpanId::from_u64(4))
            .name("compute")
            .timestamp(5_000)
            .duration(10)
            .local_endpoint(endpoint("worker"))
            .annotations(vec![Annotation::new(5_003, "checkpoint")])
            .build();
        let v1 = to_v1(&span);
        assert_eq!(v1.annotations.len(), 5); // cs sr ss cr + user
        assert_eq!(from_v1(v1), span);
    }

    #[test]
    fn shared_server_round_trip() {
        let span = Span::builder()
            .trace_id(TraceId::from_u64(9))
            .id(SpanId::from_u64(10))
            .parent_id(SpanId::from_u64(2))
            .name("handle")
            .kind(Kind::Server)
            .timestamp(7_000)
            .duration(40)
            .local_endpoint(endpoint("backend"))
            .shared(true)
            .build();
        let v1 = to_v1(&span);
        assert_eq!(v1.timestamp, None);
        assert_eq!(v1.duration, None);
        assert_eq!(from_v1(v1), span);
    }

    #[test]
    fn producer_uses_message_send() {
        let span = Span::builder()
            .trace_id(TraceId::from_u64(11))
            .id(SpanId::from_u64(12))
            .kind(Kind::Producer)
            .timestamp(9_000)
            .local_endpoint(endpoint("publisher"))
            .build();
        let v1 = to_v1(&span);
        assert_eq!(v1.annotations[0].value, MESSAGE_SEND);
        assert_eq!(from_v1(v1), span);
    }

    #[test]
    fn sa_named_tag_is_not_a_remote_endpoint() {
        let mut tags = HashMap::new();
        tags.insert("sa".to_owned(), "not-an-address".to_owned());
        let span = Span::builder()
            .trace_id(TraceId::from_u64(13))
            .id(SpanId::from_u64(14))
            .tags(tags)
            .build();
        let back = from_v1(to_v1(&span));
        assert_eq!(back.remote_endpoint, None);
        assert_eq!(back.tags.get("sa").map(String::as_str), Some("not-an-address"));
    }
}
