//! Delivery of encoded span batches.
//!
//! A [`Transport`] takes fully encoded payloads; it never sees spans. The
//! batching driver lives here too: it packs encoded spans greedily under
//! the transport's payload ceiling and an optional span-count cap, and it
//! is fail-open — delivery problems are logged, never raised into the
//! instrumented workload.

use crate::codec::Encoding;
use crate::error::Result;
use crate::model::Span;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Delivers encoded span payloads to a collector.
///
/// `max_payload_bytes` bounds one payload; `None` means unbounded and is
/// the default. Implementations are driven from whichever thread closes
/// the root span.
pub trait Transport: Send + fmt::Debug {
    /// Largest payload this transport accepts, if bounded.
    fn max_payload_bytes(&self) -> Option<usize> {
        None
    }

    /// Deliver one encoded payload.
    fn send(&mut self, payload: Vec<u8>) -> Result<()>;
}

/// Encode `spans` and deliver them through `transport` in as few payloads
/// as fit.
///
/// A span whose lone encoding already exceeds the ceiling is sent as an
/// oversized single-span payload rather than dropped. Encode and send
/// failures are logged per batch and do not stop the remaining batches.
pub(crate) fn send_batched(
    transport: &mut dyn Transport,
    encoding: Encoding,
    spans: &[Span],
    max_batch_count: Option<usize>,
) {
    let max_payload = transport.max_payload_bytes();
    let mut pieces: Vec<Vec<u8>> = Vec::new();
    let mut size = 0usize;

    let mut flush = |pieces: &mut Vec<Vec<u8>>, size: &mut usize| {
        if pieces.is_empty() {
            return;
        }
        let payload = encoding.join_pieces(pieces);
        if let Err(error) = transport.send(payload) {
            tracing::warn!(%error, spans = pieces.len(), "failed to deliver span batch");
        }
        pieces.clear();
        *size = 0;
    };

    for span in spans {
        let piece = match encoding.encode_piece(span) {
            Ok(piece) => piece,
            Err(error) => {
                tracing::warn!(%error, "failed to encode span, dropping it");
                continue;
            }
        };
        let over_count = max_batch_count.is_some_and(|max| pieces.len() >= max);
        if over_count || !encoding.fits(pieces.len(), size, piece.len(), max_payload) {
            flush(&mut pieces, &mut size);
        }
        if !encoding.fits(0, 0, piece.len(), max_payload) {
            tracing::warn!(bytes = piece.len(), "span exceeds the payload ceiling on its own");
        }
        size += piece.len();
        pieces.push(piece);
    }
    flush(&mut pieces, &mut size);
}

/// A transport that buffers payloads in memory, for tests and local
/// inspection.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTransport {
    payloads: Arc<Mutex<Vec<Vec<u8>>>>,
    max_payload_bytes: Option<usize>,
}

impl InMemoryTransport {
    /// Create an unbounded in-memory transport.
    pub fn new() -> Self {
        InMemoryTransport::default()
    }

    /// Create a transport that rejects nothing but advertises a payload
    /// ceiling to the batching driver.
    pub fn with_max_payload_bytes(limit: usize) -> Self {
        InMemoryTransport {
            payloads: Arc::default(),
            max_payload_bytes: Some(limit),
        }
    }

    /// Payloads delivered so far, oldest first.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for InMemoryTransport {
    fn max_payload_bytes(&self) -> Option<usize> {
        self.max_payload_bytes
    }

    fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);
        Ok(())
    }
}
