//! Core tracing instrumentation: span lifecycle, trace-context
//! propagation, deterministic sampling and the span wire codecs.
//!
//! An operation is instrumented by opening a span around it. The outermost
//! span of a process decides, deterministically from the trace id, whether
//! the trace is reported; nested spans attach to it through a context
//! stack and report through its transport when it closes. Trace identity
//! crosses process boundaries as B3 headers, and span batches travel in
//! any of four wire encodings (thrift, JSON v1, JSON v2, protobuf) with
//! detection and conversion between them.
//!
//! # Getting started
//!
//! ```
//! use zipkin_core::{decode, Encoding, InMemoryTransport, Kind, SpanBuilder, Tracer};
//!
//! let transport = InMemoryTransport::new();
//! let tracer = Tracer::new();
//! {
//!     let mut span = SpanBuilder::new("frontend", "get /")
//!         .kind(Kind::Server)
//!         .sample_rate(100.0)
//!         .transport(transport.clone())
//!         .start_with(&tracer);
//!     span.tag("http.status_code", "200");
//! }
//!
//! let payloads = transport.payloads();
//! let spans = decode(&payloads[0], Encoding::V2Json).unwrap();
//! assert_eq!(spans[0].name.as_deref(), Some("get /"));
//! # assert_eq!(spans.len(), 1);
//! ```
//!
//! # Sampling
//!
//! The sampling decision is a pure function of the low 64 bits of the
//! trace id and the rate, so every service in a deployment keeps or drops
//! the same traces without coordination. A firehose transport bypasses the
//! decision and receives everything.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]

mod codec;
mod context;
mod error;
mod model;
pub mod propagation;
mod sample;
mod tracer;
mod transport;

pub use codec::{convert, decode, detect, encode, Encoding};
pub use context::{ContextStack, ScopedStack, ThreadLocalStack, TraceAttrs};
pub use error::{Error, Result};
pub use model::{Annotation, Endpoint, InvalidId, Kind, Span, SpanId, TraceId};
pub use sample::sample;
pub use tracer::{default_tracer, OpenSpan, SpanBuilder, Tracer};
pub use transport::{InMemoryTransport, Transport};
