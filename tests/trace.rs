//! End-to-end tests over the public API: spans opened around simulated
//! workloads, delivered through in-memory transports and read back
//! through the codecs.

use std::collections::HashMap;

use zipkin_core::propagation::{extract_b3, inject_b3};
use zipkin_core::{
    convert, decode, detect, ContextStack, Encoding, Error, InMemoryTransport, Kind, ScopedStack,
    SpanBuilder, TraceAttrs, Tracer,
};

#[test]
fn nested_spans_share_a_trace() {
    let transport = InMemoryTransport::new();
    let tracer = Tracer::new();
    {
        let mut root = SpanBuilder::new("frontend", "get /home")
            .kind(Kind::Server)
            .sample_rate(100.0)
            .transport(transport.clone())
            .start_with(&tracer);
        root.tag("http.path", "/home");
        {
            let mut child = SpanBuilder::new("frontend", "memcached.get")
                .kind(Kind::Client)
                .start_with(&tracer);
            child.annotate("cache miss");
        }
    }

    let payloads = transport.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(detect(&payloads[0]).unwrap(), Encoding::V2Json);
    let spans = decode(&payloads[0], Encoding::V2Json).unwrap();
    assert_eq!(spans.len(), 2);

    let child = &spans[0];
    let root = &spans[1];
    assert_eq!(child.trace_id, root.trace_id);
    assert_eq!(child.parent_id, Some(root.id));
    assert_eq!(root.parent_id, None);
    assert_eq!(child.annotations[0].value, "cache miss");
    assert_eq!(
        root.local_endpoint.as_ref().and_then(|e| e.service_name.as_deref()),
        Some("frontend"),
    );
}

#[test]
fn b3_headers_carry_the_trace_across_processes() {
    let client_transport = InMemoryTransport::new();
    let client_tracer = Tracer::new();
    let mut headers: HashMap<String, String> = HashMap::new();
    {
        let client = SpanBuilder::new("frontend", "call backend")
            .kind(Kind::Client)
            .sample_rate(100.0)
            .transport(client_transport.clone())
            .start_with(&client_tracer);
        inject_b3(&mut headers, client.context().unwrap(), false);
    }

    // the "server" process
    let server_transport = InMemoryTransport::new();
    let server_tracer = Tracer::new();
    let attrs = extract_b3(&headers, 0.0, false).unwrap();
    SpanBuilder::new("backend", "handle")
        .kind(Kind::Server)
        .attrs(attrs)
        .transport(server_transport.clone())
        .start_with(&server_tracer);

    let client_spans = decode(&client_transport.payloads()[0], Encoding::V2Json).unwrap();
    let server_spans = decode(&server_transport.payloads()[0], Encoding::V2Json).unwrap();
    assert_eq!(server_spans[0].trace_id, client_spans[0].trace_id);
    assert_eq!(server_spans[0].id, client_spans[0].id);
    assert!(server_spans[0].shared);
    assert!(!client_spans[0].shared);
}

#[test]
fn firehose_sees_what_sampling_drops() {
    let transport = InMemoryTransport::new();
    let firehose = InMemoryTransport::new();
    let tracer = Tracer::new();
    for _ in 0..5 {
        SpanBuilder::new("svc", "op")
            .sample_rate(0.0)
            .transport(transport.clone())
            .firehose(firehose.clone())
            .start_with(&tracer);
    }
    assert!(transport.payloads().is_empty());
    assert_eq!(firehose.payloads().len(), 5);
}

#[test]
fn thrift_payloads_convert_to_v2_json() {
    let transport = InMemoryTransport::new();
    let tracer = Tracer::new();
    SpanBuilder::new("legacy", "index")
        .kind(Kind::Server)
        .sample_rate(100.0)
        .encoding(Encoding::V1Thrift)
        .transport(transport.clone())
        .start_with(&tracer);

    let payload = &transport.payloads()[0];
    assert_eq!(detect(payload).unwrap(), Encoding::V1Thrift);
    let json = convert(payload, None, Encoding::V2Json).unwrap();
    let spans = decode(&json, Encoding::V2Json).unwrap();
    assert_eq!(spans[0].name.as_deref(), Some("index"));
    assert_eq!(spans[0].kind, Some(Kind::Server));
}

#[test]
fn payload_ceiling_splits_emitted_batches() {
    let transport = InMemoryTransport::with_max_payload_bytes(256);
    let tracer = Tracer::new();
    {
        let _root = SpanBuilder::new("svc", "root")
            .sample_rate(100.0)
            .transport(transport.clone())
            .start_with(&tracer);
        for i in 0..20 {
            SpanBuilder::new("svc", format!("child-{i}")).start_with(&tracer);
        }
    }
    let payloads = transport.payloads();
    assert!(payloads.len() > 1);
    let mut total = 0;
    for payload in &payloads {
        assert!(payload.len() <= 256);
        total += decode(payload, Encoding::V2Json).unwrap().len();
    }
    assert_eq!(total, 21);
}

#[test]
fn max_span_batch_size_caps_batches() {
    let transport = InMemoryTransport::new();
    let tracer = Tracer::new();
    {
        let _root = SpanBuilder::new("svc", "root")
            .sample_rate(100.0)
            .max_span_batch_size(2)
            .transport(transport.clone())
            .start_with(&tracer);
        for _ in 0..4 {
            SpanBuilder::new("svc", "child").start_with(&tracer);
        }
    }
    let payloads = transport.payloads();
    assert_eq!(payloads.len(), 3);
    for payload in &payloads[..2] {
        assert_eq!(decode(payload, Encoding::V2Json).unwrap().len(), 2);
    }
    assert_eq!(decode(&payloads[2], Encoding::V2Json).unwrap().len(), 1);
}

#[test]
fn debug_contexts_report_even_at_rate_zero() {
    let transport = InMemoryTransport::new();
    let tracer = Tracer::new();
    let mut headers = HashMap::new();
    headers.insert("X-B3-TraceId".to_owned(), "0000000000000007".to_owned());
    headers.insert("X-B3-SpanId".to_owned(), "0000000000000008".to_owned());
    headers.insert("X-B3-Flags".to_owned(), "1".to_owned());
    let attrs = extract_b3(&headers, 0.0, false).unwrap();
    SpanBuilder::new("svc", "op")
        .attrs(attrs)
        .transport(transport.clone())
        .start_with(&tracer);
    let spans = decode(&transport.payloads()[0], Encoding::V2Json).unwrap();
    assert!(spans[0].debug);
}

#[test]
fn truncated_payload_yields_no_partial_batch() {
    assert!(matches!(
        decode(b"[{\"", Encoding::V2Json),
        Err(Error::Decoding { .. })
    ));
}

#[test]
fn unbalanced_pop_reports_underflow() {
    let stack = ScopedStack::new();
    stack.push(TraceAttrs::new_root(100.0, None, false, false));
    assert!(stack.pop().is_ok());
    assert!(matches!(stack.pop(), Err(Error::StackUnderflow)));
    // the stack stays usable
    stack.push(TraceAttrs::new_root(100.0, None, false, false));
    assert!(stack.pop().is_ok());
}

#[test]
fn tracer_state_is_clean_after_a_trace() {
    let transport = InMemoryTransport::new();
    let tracer = Tracer::new();
    {
        let _root = SpanBuilder::new("svc", "first")
            .sample_rate(100.0)
            .transport(transport.clone())
            .start_with(&tracer);
        SpanBuilder::new("svc", "child").start_with(&tracer);
    }
    assert!(tracer.current_context().is_none());
    {
        let _root = SpanBuilder::new("svc", "second")
            .sample_rate(100.0)
            .transport(transport.clone())
            .start_with(&tracer);
    }
    let payloads = transport.payloads();
    assert_eq!(payloads.len(), 2);
    // the second trace does not pick up spans from the first
    assert_eq!(decode(&payloads[1], Encoding::V2Json).unwrap().len(), 1);
}
