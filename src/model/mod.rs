//! In-memory span model shared by every wire encoding.
//!
//! [`Span`] is the frozen, immutable record of one unit of work. Its serde
//! derives double as the v2 JSON wire form; the other codecs convert from
//! this model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use typed_builder::TypedBuilder;

mod annotation;
mod endpoint;
mod id;

pub use annotation::Annotation;
pub use endpoint::Endpoint;
pub use id::{InvalidId, SpanId, TraceId};

/// The role of a span in an RPC or messaging exchange.
///
/// Local spans carry no kind: they are modeled as `Option<Kind>` with `None`
/// meaning local/unspecified, matching the wire formats which omit the field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Kind {
    /// Initiator of an RPC; timestamp is the moment the request was sent.
    Client,
    /// Receiver of an RPC; timestamp is the moment the request was received.
    Server,
    /// Sender of a message to a broker.
    Producer,
    /// Receiver of a message from a broker.
    Consumer,
}

/// A single completed unit of work within a trace.
///
/// Spans are immutable once frozen by the close of their owning operation;
/// encoders and decoders treat them as plain values. Equality is structural,
/// which the round-trip tests rely on.
#[derive(TypedBuilder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    /// Trace this span belongs to.
    pub trace_id: TraceId,
    /// Unique id of this span within the trace.
    pub id: SpanId,
    /// Parent span id; `None` only for the root span of a trace.
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<SpanId>,
    /// Logical operation name, lower-case by convention.
    #[builder(default, setter(strip_option, into))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// RPC/messaging role, absent for local spans.
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Kind>,
    /// Start time in microseconds since epoch.
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Duration in microseconds.
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// The host that recorded this span.
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_endpoint: Option<Endpoint>,
    /// The other side of the connection, when known.
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_endpoint: Option<Endpoint>,
    /// Events within the span, in insertion order.
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    /// Key/value metadata; keys unique, last write wins.
    #[builder(default)]
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
    /// Request to store this span even if it overrides the sampling policy.
    #[builder(default)]
    #[serde(default, skip_serializing_if = "is_false")]
    pub debug: bool,
    /// True when client and server report this span as one shared entry.
    #[builder(default)]
    #[serde(default, skip_serializing_if = "is_false")]
    pub shared: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}
