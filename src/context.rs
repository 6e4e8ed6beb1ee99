//! Trace contexts and the stack that threads them through nested spans.
//!
//! A [`TraceAttrs`] value pins down one point in a trace: ids, parentage and
//! the sampling flags. Opening a span pushes a context onto a
//! [`ContextStack`]; closing it pops. The stack storage is pluggable so
//! callers under cooperative scheduling can pass an explicit
//! [`ScopedStack`] handle instead of relying on per-thread storage.

use crate::error::{Error, Result};
use crate::model::{SpanId, TraceId};
use crate::sample::sample;
use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// The identity of a span within a trace, fixed at span open.
///
/// Contexts are immutable: opening a child span derives a new value with
/// [`TraceAttrs::child`] rather than editing the parent's.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceAttrs {
    /// Trace the span belongs to.
    pub trace_id: TraceId,
    /// Id of the span itself.
    pub span_id: SpanId,
    /// Id of the parent span; `None` only for the root span of a trace.
    pub parent_span_id: Option<SpanId>,
    /// Pre-computed decision whether this trace is reported.
    pub is_sampled: bool,
    /// Debug flag; forces sampling and is preserved through the trace.
    pub is_debug: bool,
}

impl TraceAttrs {
    /// Create attributes for a new root span.
    ///
    /// When `trace_id` is `None` a fresh id is generated, 128-bit if
    /// `wide_trace_id` is set. The sampling decision is made here, exactly
    /// once per trace, with the deterministic rate algorithm; `is_debug`
    /// forces it to true.
    pub fn new_root(
        sample_rate: f64,
        trace_id: Option<TraceId>,
        wide_trace_id: bool,
        is_debug: bool,
    ) -> Self {
        let trace_id = trace_id.unwrap_or_else(|| {
            if wide_trace_id {
                TraceId::random_128()
            } else {
                TraceId::random()
            }
        });
        TraceAttrs {
            is_sampled: is_debug || sample(&trace_id, sample_rate),
            trace_id,
            span_id: SpanId::random(),
            parent_span_id: None,
            is_debug,
        }
    }

    /// Derive the context for a child span: same trace, fresh span id,
    /// parent set to this span, flags inherited unconditionally.
    pub fn child(&self) -> Self {
        TraceAttrs {
            trace_id: self.trace_id,
            span_id: SpanId::random(),
            parent_span_id: Some(self.span_id),
            is_sampled: self.is_sampled,
            is_debug: self.is_debug,
        }
    }
}

/// An ordered stack of trace contexts for one logical execution context.
///
/// Pushes and pops are strictly paired with span opens and closes; a pop on
/// an empty stack is a caller bug and fails with
/// [`Error::StackUnderflow`] without corrupting the stack. Implementations
/// use interior mutability; sharing one stack between concurrent executions
/// is undefined behavior unless the caller deliberately arranges it (e.g.
/// in tests).
pub trait ContextStack: fmt::Debug {
    /// Push the context of a newly opened span.
    fn push(&self, attrs: TraceAttrs);

    /// Pop the context of the span being closed.
    fn pop(&self) -> Result<TraceAttrs>;

    /// The currently active context, if any.
    fn peek(&self) -> Option<TraceAttrs>;
}

/// An explicit, cloneable context stack handle.
///
/// Clones share storage, which lets a caller under a cooperative scheduler
/// carry the stack through its task instead of relying on thread identity.
#[derive(Clone, Debug, Default)]
pub struct ScopedStack {
    inner: Arc<Mutex<Vec<TraceAttrs>>>,
}

impl ScopedStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        ScopedStack::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Vec<TraceAttrs>) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl ContextStack for ScopedStack {
    fn push(&self, attrs: TraceAttrs) {
        self.with(|stack| stack.push(attrs));
    }

    fn pop(&self) -> Result<TraceAttrs> {
        self.with(|stack| stack.pop()).ok_or(Error::StackUnderflow)
    }

    fn peek(&self) -> Option<TraceAttrs> {
        self.with(|stack| stack.last().cloned())
    }
}

thread_local! {
    static THREAD_ATTRS: RefCell<Vec<TraceAttrs>> = const { RefCell::new(Vec::new()) };
}

/// A context stack backed by per-thread storage.
///
/// The storage is reached lazily on every call, so the thread invoking a
/// method matters, not the thread that created the value; every instance on
/// one thread shares the same stack.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadLocalStack;

impl ThreadLocalStack {
    /// Create a handle to the current thread's stack.
    pub fn new() -> Self {
        ThreadLocalStack
    }
}

impl ContextStack for ThreadLocalStack {
    fn push(&self, attrs: TraceAttrs) {
        THREAD_ATTRS.with(|stack| stack.borrow_mut().push(attrs));
    }

    fn pop(&self) -> Result<TraceAttrs> {
        THREAD_ATTRS
            .with(|stack| stack.borrow_mut().pop())
            .ok_or(Error::StackUnderflow)
    }

    fn peek(&self) -> Option<TraceAttrs> {
        THREAD_ATTRS.with(|stack| stack.borrow().last().cloned())
    }
}
