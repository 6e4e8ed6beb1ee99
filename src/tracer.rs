//! Span lifecycle: opening, mutating and closing instrumented operations.
//!
//! A [`SpanBuilder`] configures one operation and [`SpanBuilder::start`]
//! opens it, pushing its context onto the tracer's stack and returning an
//! [`OpenSpan`] guard. Closing the guard, explicitly or by drop, freezes
//! the span. The outermost span of a process (the local root) owns
//! emission: it drains every span its subtree buffered and hands encoded
//! batches to the configured transports. Everything that can go wrong
//! during close is logged and swallowed so instrumentation never takes
//! down the workload it measures.

use crate::codec::Encoding;
use crate::context::{ContextStack, ScopedStack, TraceAttrs};
use crate::model::{Annotation, Endpoint, Kind, Span};
use crate::transport::{send_batched, Transport};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

fn epoch_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[derive(Debug)]
struct TracerInner {
    stack: Box<dyn ContextStack + Send>,
    spans: Vec<Span>,
    active_roots: usize,
}

/// Shared per-execution-context state: the context stack and the buffer of
/// closed spans awaiting the local root's flush.
///
/// Clones share state. The [default](default_tracer) tracer is per-thread;
/// callers under cooperative scheduling can instead create one tracer per
/// task and thread it through explicitly.
#[derive(Clone, Debug)]
pub struct Tracer {
    inner: Arc<Mutex<TracerInner>>,
}

impl Tracer {
    /// Create a tracer with its own private context stack.
    pub fn new() -> Self {
        Tracer::with_stack(ScopedStack::new())
    }

    /// Create a tracer over a caller-provided context stack.
    pub fn with_stack(stack: impl ContextStack + Send + 'static) -> Self {
        Tracer {
            inner: Arc::new(Mutex::new(TracerInner {
                stack: Box::new(stack),
                spans: Vec::new(),
                active_roots: 0,
            })),
        }
    }

    /// The context of the innermost open span, if any.
    pub fn current_context(&self) -> Option<TraceAttrs> {
        self.with(|inner| inner.stack.peek())
    }

    fn with<T>(&self, f: impl FnOnce(&mut TracerInner) -> T) -> T {
        f(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn push(&self, attrs: TraceAttrs) {
        self.with(|inner| inner.stack.push(attrs));
    }

    fn pop(&self) -> crate::error::Result<TraceAttrs> {
        self.with(|inner| inner.stack.pop())
    }

    fn add_span(&self, span: Span) {
        self.with(|inner| inner.spans.push(span));
    }

    fn drain(&self) -> Vec<Span> {
        self.with(|inner| std::mem::take(&mut inner.spans))
    }

    fn root_opened(&self) {
        self.with(|inner| inner.active_roots += 1);
    }

    fn root_closed(&self) {
        self.with(|inner| inner.active_roots = inner.active_roots.saturating_sub(1));
    }

    /// Whether some open local root will eventually flush buffered spans.
    fn buffering(&self) -> bool {
        self.with(|inner| inner.active_roots > 0)
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Tracer::new()
    }
}

thread_local! {
    static DEFAULT_TRACER: Tracer = Tracer::new();
}

/// The tracer spans on this thread use unless one is passed explicitly.
pub fn default_tracer() -> Tracer {
    DEFAULT_TRACER.with(Tracer::clone)
}

struct Emitter {
    transport: Option<Box<dyn Transport>>,
    firehose: Option<Box<dyn Transport>>,
    encoding: Encoding,
    max_batch_count: Option<usize>,
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("transport", &self.transport.is_some())
            .field("firehose", &self.firehose.is_some())
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// Configuration for one instrumented operation.
///
/// Exactly one of three things makes the resulting span a local root that
/// owns emission: a sample rate, explicit [attrs](SpanBuilder::attrs)
/// extracted from an upstream request, or a firehose transport. Without
/// any of them the span attaches as a child of whatever is on the stack,
/// and with an empty stack it is inert.
#[derive(Debug)]
pub struct SpanBuilder {
    service_name: String,
    span_name: String,
    kind: Option<Kind>,
    sample_rate: Option<f64>,
    attrs: Option<TraceAttrs>,
    transport: Option<Box<dyn Transport>>,
    firehose: Option<Box<dyn Transport>>,
    encoding: Encoding,
    port: u16,
    host: Option<IpAddr>,
    tags: HashMap<String, String>,
    annotations: Vec<Annotation>,
    timestamp: Option<u64>,
    duration: Option<u64>,
    use_128bit_trace_id: bool,
    max_batch_count: Option<usize>,
}

impl SpanBuilder {
    /// Start configuring a span for `span_name` recorded by
    /// `service_name`.
    pub fn new(service_name: impl Into<String>, span_name: impl Into<String>) -> Self {
        SpanBuilder {
            service_name: service_name.into(),
            span_name: span_name.into(),
            kind: None,
            sample_rate: None,
            attrs: None,
            transport: None,
            firehose: None,
            encoding: Encoding::V2Json,
            port: 0,
            host: None,
            tags: HashMap::new(),
            annotations: Vec::new(),
            timestamp: None,
            duration: None,
            use_128bit_trace_id: false,
            max_batch_count: None,
        }
    }

    /// RPC/messaging role of the span.
    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Percentage of traces to report, `0.0..=100.0`. Setting a rate makes
    /// this span a local root. Out-of-range values are clamped at start.
    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    /// Adopt trace context extracted from an upstream request. Makes this
    /// span a local root continuing the caller's trace.
    pub fn attrs(mut self, attrs: TraceAttrs) -> Self {
        self.attrs = Some(attrs);
        self
    }

    /// Transport that receives the encoded batch when the trace is
    /// sampled.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Transport that receives every trace regardless of the sampling
    /// decision. Configuring one makes this span a local root.
    pub fn firehose(mut self, transport: impl Transport + 'static) -> Self {
        self.firehose = Some(Box::new(transport));
        self
    }

    /// Wire encoding for emitted batches. Defaults to v2 JSON.
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Port reported in the local endpoint.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Host address reported in the local endpoint.
    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = Some(host);
        self
    }

    /// Add a tag up front; more can be added on the open span.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a pre-recorded timestamped event; more can be added on the open
    /// span.
    pub fn annotation(mut self, timestamp: u64, value: impl Into<String>) -> Self {
        self.annotations.push(Annotation::new(timestamp, value));
        self
    }

    /// Report a caller-measured start time (epoch microseconds) instead of
    /// the wall clock at open.
    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Report a caller-measured duration (microseconds) instead of the
    /// elapsed time at close.
    pub fn duration(mut self, duration: u64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Generate 128-bit ids for traces this span starts.
    pub fn use_128bit_trace_id(mut self, enable: bool) -> Self {
        self.use_128bit_trace_id = enable;
        self
    }

    /// Cap the number of spans per emitted payload.
    pub fn max_span_batch_size(mut self, count: usize) -> Self {
        self.max_batch_count = Some(count);
        self
    }

    /// Open the span on this thread's [default tracer](default_tracer).
    pub fn start(self) -> OpenSpan {
        let tracer = default_tracer();
        self.start_with(&tracer)
    }

    /// Open the span on an explicit tracer.
    pub fn start_with(mut self, tracer: &Tracer) -> OpenSpan {
        let sample_rate = self.sample_rate.map(|rate| {
            if (0.0..=100.0).contains(&rate) {
                rate
            } else {
                tracing::warn!(rate, "sample rate out of range, clamping");
                rate.clamp(0.0, 100.0)
            }
        });

        let inherited = self.attrs.take();
        let from_headers = inherited.is_some();
        let is_local_root =
            sample_rate.is_some() || from_headers || self.firehose.is_some();

        let attrs = if let Some(rate) = sample_rate {
            Some(match inherited {
                // honor an upstream positive decision as-is
                Some(upstream) if upstream.is_sampled => upstream,
                // re-decide at our own rate, keeping the trace id
                Some(upstream) => TraceAttrs::new_root(
                    rate,
                    Some(upstream.trace_id),
                    self.use_128bit_trace_id,
                    upstream.is_debug,
                ),
                None => TraceAttrs::new_root(rate, None, self.use_128bit_trace_id, false),
            })
        } else if let Some(upstream) = inherited {
            Some(upstream)
        } else if self.firehose.is_some() {
            // firehose alone reports everything but samples nothing
            Some(TraceAttrs::new_root(
                0.0,
                None,
                self.use_128bit_trace_id,
                false,
            ))
        } else {
            tracer.current_context().map(|parent| parent.child())
        };

        let emitter = if is_local_root {
            if self.transport.is_none() && self.firehose.is_none() {
                tracing::warn!(
                    span = %self.span_name,
                    "local root span has no transport, nothing will be reported"
                );
                None
            } else {
                Some(Emitter {
                    transport: self.transport.take(),
                    firehose: self.firehose.take(),
                    encoding: self.encoding,
                    max_batch_count: self.max_batch_count,
                })
            }
        } else {
            None
        };

        if let Some(attrs) = &attrs {
            tracer.push(attrs.clone());
        }
        if emitter.is_some() {
            tracer.root_opened();
        }

        OpenSpan {
            tracer: tracer.clone(),
            attrs,
            emitter,
            service_name: self.service_name,
            name: self.span_name,
            kind: self.kind,
            local_endpoint_port: self.port,
            local_endpoint_host: self.host,
            remote_endpoint: None,
            tags: self.tags,
            annotations: self.annotations,
            timestamp: self.timestamp.unwrap_or_else(epoch_micros),
            duration_override: self.duration,
            started: Instant::now(),
            from_headers,
            finished: false,
        }
    }
}

/// An open span; a RAII guard over one instrumented operation.
///
/// Mutators on an inert span (one opened with nothing on the stack and no
/// root-making configuration) are accepted and discarded. Dropping the
/// guard closes the span exactly as [`OpenSpan::finish`] does.
#[derive(Debug)]
pub struct OpenSpan {
    tracer: Tracer,
    attrs: Option<TraceAttrs>,
    emitter: Option<Emitter>,
    service_name: String,
    name: String,
    kind: Option<Kind>,
    local_endpoint_port: u16,
    local_endpoint_host: Option<IpAddr>,
    remote_endpoint: Option<Endpoint>,
    tags: HashMap<String, String>,
    annotations: Vec<Annotation>,
    timestamp: u64,
    duration_override: Option<u64>,
    started: Instant,
    from_headers: bool,
    finished: bool,
}

impl OpenSpan {
    /// The trace context of this span, for propagation to downstream
    /// requests. `None` for inert spans.
    pub fn context(&self) -> Option<&TraceAttrs> {
        self.attrs.as_ref()
    }

    /// Set one tag; last write per key wins.
    pub fn tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Record a timestamped event at the current wall clock.
    pub fn annotate(&mut self, value: impl Into<String>) {
        self.annotations.push(Annotation::new(epoch_micros(), value));
    }

    /// Record a timestamped event at an explicit epoch-microsecond time.
    pub fn annotate_at(&mut self, timestamp: u64, value: impl Into<String>) {
        self.annotations.push(Annotation::new(timestamp, value));
    }

    /// Replace the operation name chosen at open.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Set the role of the span after open.
    pub fn set_kind(&mut self, kind: Kind) {
        self.kind = Some(kind);
    }

    /// Record the other side of the call.
    pub fn set_remote_endpoint(&mut self, endpoint: Endpoint) {
        self.remote_endpoint = Some(endpoint);
    }

    /// Tag the span with an error message under the conventional `error`
    /// key.
    pub fn record_error(&mut self, error: &dyn fmt::Display) {
        self.tags.insert("error".to_owned(), error.to_string());
    }

    /// Close the span now instead of at end of scope.
    pub fn finish(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let Some(attrs) = self.attrs.take() else {
            return; // inert span
        };

        match self.tracer.pop() {
            Ok(popped) if popped == attrs => {}
            Ok(_) => tracing::warn!("span closed out of order"),
            Err(error) => tracing::warn!(%error, "context stack out of balance"),
        }

        // an operation torn down by unwinding failed even if nobody tagged it
        if std::thread::panicking() && !self.tags.contains_key("error") {
            self.tags.insert("error".to_owned(), "panic".to_owned());
        }

        let duration = self
            .duration_override
            .unwrap_or_else(|| self.started.elapsed().as_micros() as u64);
        let local_endpoint = Endpoint::from_parts(
            std::mem::take(&mut self.service_name),
            self.local_endpoint_port,
            self.local_endpoint_host,
        );
        let name = std::mem::take(&mut self.name);
        let span = Span {
            trace_id: attrs.trace_id,
            id: attrs.span_id,
            parent_id: attrs.parent_span_id,
            name: (!name.is_empty()).then_some(name),
            kind: self.kind,
            timestamp: Some(self.timestamp),
            duration: Some(duration),
            local_endpoint: Some(local_endpoint),
            remote_endpoint: self.remote_endpoint.take(),
            annotations: std::mem::take(&mut self.annotations),
            tags: std::mem::take(&mut self.tags),
            debug: attrs.is_debug,
            // the kind can change after open, so shared is decided here
            shared: self.from_headers && self.kind == Some(Kind::Server),
        };

        match self.emitter.take() {
            Some(mut emitter) => {
                self.tracer.root_closed();
                let mut spans = self.tracer.drain();
                spans.push(span);
                if let Some(firehose) = emitter.firehose.as_mut() {
                    send_batched(
                        firehose.as_mut(),
                        emitter.encoding,
                        &spans,
                        emitter.max_batch_count,
                    );
                }
                if attrs.is_sampled {
                    if let Some(transport) = emitter.transport.as_mut() {
                        send_batched(
                            transport.as_mut(),
                            emitter.encoding,
                            &spans,
                            emitter.max_batch_count,
                        );
                    }
                }
            }
            None => {
                // only buffer while a local root is around to flush
                if self.tracer.buffering() {
                    self.tracer.add_span(span);
                }
            }
        }
    }
}

impl Drop for OpenSpan {
    fn drop(&mut self) {
        self.close();
    }
}
