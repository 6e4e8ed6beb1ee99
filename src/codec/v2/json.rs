//! JSON codec for v2 spans.
//!
//! [`Span`]'s serde derives are the v2 JSON wire form, so decoding is a
//! direct `serde_json` parse of the batch array. Encoding lives in the
//! dispatcher since it is a plain `serde_json::to_vec` per span.

use crate::codec::Encoding;
use crate::error::{Error, Result};
use crate::model::Span;

pub(crate) fn decode_spans(bytes: &[u8]) -> Result<Vec<Span>> {
    serde_json::from_slice(bytes).map_err(|e| Error::decoding(Encoding::V2Json, e.to_string()))
}
