//! B3 propagation of trace context over HTTP-style header maps.
//!
//! Injection writes the multi-header form (`X-B3-*`). Extraction accepts
//! both the multi-header form and the single `b3` header, the single
//! header winning when both are present. Header carriers are abstracted
//! behind [`Injector`] and [`Extractor`] so any header map can plug in.

use crate::context::TraceAttrs;
use crate::model::{SpanId, TraceId};
use std::collections::HashMap;

/// Trace id header of the multi-header B3 format.
pub const TRACE_ID_HEADER: &str = "X-B3-TraceId";
/// Span id header of the multi-header B3 format.
pub const SPAN_ID_HEADER: &str = "X-B3-SpanId";
/// Parent span id header of the multi-header B3 format.
pub const PARENT_SPAN_ID_HEADER: &str = "X-B3-ParentSpanId";
/// Sampling decision header, `"1"` or `"0"`.
pub const SAMPLED_HEADER: &str = "X-B3-Sampled";
/// Debug flag header; `"1"` forces sampling downstream.
pub const FLAGS_HEADER: &str = "X-B3-Flags";
/// The single-header B3 format: `{trace}-{span}[-{state}[-{parent}]]`.
pub const B3_SINGLE_HEADER: &str = "b3";

/// Writes propagation headers into a carrier.
pub trait Injector {
    /// Set one header.
    fn set(&mut self, key: &str, value: String);
}

/// Reads propagation headers from a carrier.
///
/// Lookups should be case-insensitive where the carrier allows it; the
/// `HashMap` implementation falls back to an all-lowercase key.
pub trait Extractor {
    /// Get one header value.
    fn get(&self, key: &str) -> Option<&str>;
}

impl Injector for HashMap<String, String> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_owned(), value);
    }
}

impl Extractor for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, key)
            .or_else(|| HashMap::get(self, &key.to_lowercase()))
            .map(String::as_str)
    }
}

/// Write B3 headers describing `attrs` for a downstream request.
///
/// With `new_span_id` set the downstream side is addressed as a fresh
/// child of the current span: a new span id is generated and the current
/// span becomes the parent. Otherwise the headers name the current span
/// itself, which produces a shared span on a server that honors them.
pub fn inject_b3(injector: &mut dyn Injector, attrs: &TraceAttrs, new_span_id: bool) {
    let (span_id, parent_span_id) = if new_span_id {
        (SpanId::random(), Some(attrs.span_id))
    } else {
        (attrs.span_id, attrs.parent_span_id)
    };
    injector.set(TRACE_ID_HEADER, attrs.trace_id.to_string());
    injector.set(SPAN_ID_HEADER, span_id.to_string());
    if let Some(parent) = parent_span_id {
        injector.set(PARENT_SPAN_ID_HEADER, parent.to_string());
    }
    if attrs.is_debug {
        injector.set(FLAGS_HEADER, "1".to_owned());
    } else {
        injector.set(
            SAMPLED_HEADER,
            if attrs.is_sampled { "1" } else { "0" }.to_owned(),
        );
    }
}

#[derive(Default)]
struct ExtractedState {
    trace_id: Option<String>,
    span_id: Option<String>,
    parent_span_id: Option<String>,
    sampled: Option<bool>,
    debug: bool,
}

fn read_single(value: &str) -> Option<ExtractedState> {
    let mut state = ExtractedState::default();
    let parts: Vec<&str> = value.split('-').collect();
    match parts.as_slice() {
        // a lone sampling decision, e.g. "b3: 0"
        [decision] => match *decision {
            "d" => state.debug = true,
            "1" => state.sampled = Some(true),
            "0" => state.sampled = Some(false),
            _ => return None,
        },
        [trace_id, span_id, rest @ ..] => {
            state.trace_id = Some((*trace_id).to_owned());
            state.span_id = Some((*span_id).to_owned());
            if let Some(decision) = rest.first() {
                match *decision {
                    "d" => state.debug = true,
                    "1" => state.sampled = Some(true),
                    "0" => state.sampled = Some(false),
                    _ => return None,
                }
            }
            if let Some(parent) = rest.get(1) {
                state.parent_span_id = Some((*parent).to_owned());
            }
        }
        [] => return None,
    }
    Some(state)
}

fn read_multi(extractor: &dyn Extractor) -> ExtractedState {
    ExtractedState {
        trace_id: extractor.get(TRACE_ID_HEADER).map(str::to_owned),
        span_id: extractor.get(SPAN_ID_HEADER).map(str::to_owned),
        parent_span_id: extractor.get(PARENT_SPAN_ID_HEADER).map(str::to_owned),
        sampled: match extractor.get(SAMPLED_HEADER) {
            Some("1") | Some("true") => Some(true),
            Some(_) => Some(false),
            None => None,
        },
        debug: extractor.get(FLAGS_HEADER) == Some("1"),
    }
}

/// Recover trace context from incoming B3 headers.
///
/// Returns `None` when no B3 headers are present or when present headers
/// are malformed (logged). A sampling decision without ids starts a fresh
/// trace that honors the decision; ids without a decision defer to the
/// deterministic rate algorithm so every tier of a deployment samples the
/// same traces.
pub fn extract_b3(
    extractor: &dyn Extractor,
    sample_rate: f64,
    use_128bit_trace_id: bool,
) -> Option<TraceAttrs> {
    let state = match extractor.get(B3_SINGLE_HEADER) {
        Some(value) => {
            let parsed = read_single(value);
            if parsed.is_none() {
                tracing::warn!(value, "malformed b3 single header");
            }
            parsed?
        }
        None => read_multi(extractor),
    };

    match (&state.trace_id, &state.span_id) {
        (None, None) => {
            if !state.debug && state.sampled.is_none() {
                return None; // no B3 headers at all
            }
            // decision without ids: start our own trace under that decision
            let forced_rate = match state.sampled {
                Some(true) => 100.0,
                Some(false) => 0.0,
                None => 100.0, // debug alone
            };
            Some(TraceAttrs::new_root(
                forced_rate,
                None,
                use_128bit_trace_id,
                state.debug,
            ))
        }
        (Some(trace_id), Some(span_id)) => {
            let parent = state
                .parent_span_id
                .as_deref()
                .map(str::parse::<SpanId>)
                .transpose();
            let (Ok(trace_id), Ok(span_id), Ok(parent_span_id)) =
                (trace_id.parse::<TraceId>(), span_id.parse::<SpanId>(), parent)
            else {
                tracing::warn!("malformed id in b3 headers");
                return None;
            };
            let is_sampled = state
                .sampled
                .unwrap_or_else(|| crate::sample::sample(&trace_id, sample_rate));
            Some(TraceAttrs {
                trace_id,
                span_id,
                parent_span_id,
                is_sampled: state.debug || is_sampled,
                is_debug: state.debug,
            })
        }
        _ => {
            tracing::warn!("b3 headers carry only one of trace id and span id");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn inject_then_extract_round_trips() {
        let attrs = TraceAttrs::new_root(100.0, None, true, false);
        let mut carrier = HashMap::new();
        inject_b3(&mut carrier, &attrs, false);
        let extracted = extract_b3(&carrier, 100.0, true).unwrap();
        assert_eq!(extracted, attrs);
    }

    #[test]
    fn inject_with_new_span_id_parents_the_current_span() {
        let attrs = TraceAttrs::new_root(100.0, None, false, false);
        let mut carrier = HashMap::new();
        inject_b3(&mut carrier, &attrs, true);
        let extracted = extract_b3(&carrier, 100.0, false).unwrap();
        assert_eq!(extracted.trace_id, attrs.trace_id);
        assert_eq!(extracted.parent_span_id, Some(attrs.span_id));
        assert_ne!(extracted.span_id, attrs.span_id);
    }

    #[test]
    fn debug_flag_forces_sampling() {
        let carrier = headers(&[
            (TRACE_ID_HEADER, "0000000000000001"),
            (SPAN_ID_HEADER, "0000000000000002"),
            (FLAGS_HEADER, "1"),
        ]);
        let attrs = extract_b3(&carrier, 0.0, false).unwrap();
        assert!(attrs.is_debug);
        assert!(attrs.is_sampled);
    }

    #[test]
    fn deferred_decision_uses_the_deterministic_sampler() {
        let carrier = headers(&[
            (TRACE_ID_HEADER, "0000000000000001"),
            (SPAN_ID_HEADER, "0000000000000002"),
        ]);
        let attrs = extract_b3(&carrier, 100.0, false).unwrap();
        assert!(attrs.is_sampled);
        let attrs = extract_b3(&carrier, 0.0, false).unwrap();
        assert!(!attrs.is_sampled);
    }

    #[test]
    fn lone_decision_starts_a_fresh_trace() {
        let carrier = headers(&[(SAMPLED_HEADER, "0")]);
        let attrs = extract_b3(&carrier, 100.0, false).unwrap();
        assert!(!attrs.is_sampled);
        assert_eq!(attrs.parent_span_id, None);
    }

    #[test]
    fn single_header_form() {
        let carrier = headers(&[(
            B3_SINGLE_HEADER,
            "80f198ee56343ba864fe8b2a57d3eff7-e457b5a2e4d86bd1-1-05e3ac9a4f6e3b90",
        )]);
        let attrs = extract_b3(&carrier, 0.0, true).unwrap();
        assert_eq!(
            attrs.trace_id,
            TraceId::from_u128(0x80f198ee56343ba864fe8b2a57d3eff7),
        );
        assert_eq!(attrs.span_id, SpanId::from_u64(0xe457b5a2e4d86bd1));
        assert_eq!(attrs.parent_span_id, Some(SpanId::from_u64(0x05e3ac9a4f6e3b90)));
        assert!(attrs.is_sampled);
    }

    #[test]
    fn malformed_headers_extract_nothing() {
        let carrier = headers(&[
            (TRACE_ID_HEADER, "not-hex"),
            (SPAN_ID_HEADER, "0000000000000002"),
        ]);
        assert!(extract_b3(&carrier, 100.0, false).is_none());
        let carrier = headers(&[(B3_SINGLE_HEADER, "zz")]);
        assert!(extract_b3(&carrier, 100.0, false).is_none());
        assert!(extract_b3(&HashMap::new(), 100.0, false).is_none());
    }

    #[test]
    fn lowercase_header_names_are_accepted() {
        let carrier = headers(&[
            ("x-b3-traceid", "0000000000000001"),
            ("x-b3-spanid", "0000000000000002"),
            ("x-b3-sampled", "1"),
        ]);
        let attrs = extract_b3(&carrier, 0.0, false).unwrap();
        assert!(attrs.is_sampled);
        assert_eq!(attrs.trace_id, TraceId::from_u64(1));
    }
}
