//! Deterministic rate-based sampling.
//!
//! The decision is a pure function of the trace id, never a fresh random
//! draw: a downstream service that receives only a trace id can re-evaluate
//! the same rate and reach the same conclusion.

use crate::model::TraceId;

/// Decide whether a trace should be sampled at the given rate.
///
/// `rate` is a percentage in `[0.0, 100.0]`; values outside the range are
/// clamped. The low 64 bits of the trace id (shifted right once, since many
/// id generators reserve the top bit) are compared against a threshold
/// derived from the rate, so repeated calls for the same id and rate always
/// agree.
///
/// The debug flag is handled at context creation and forces sampling
/// regardless of this decision.
pub fn sample(trace_id: &TraceId, rate: f64) -> bool {
    if rate >= 100.0 {
        return true;
    }
    if rate <= 0.0 {
        return false;
    }
    let upper_bound = (rate / 100.0 * (1u64 << 63) as f64) as u64;
    (trace_id.low_u64() >> 1) < upper_bound
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread_id(i: u64) -> TraceId {
        // multiplicative hashing gives ids uniform over the u64 range
        TraceId::from_u64(i.wrapping_mul(0x9e37_79b9_7f4a_7c15))
    }

    #[test]
    fn zero_rate_never_samples() {
        for i in 0..1_000 {
            assert!(!sample(&spread_id(i), 0.0));
        }
    }

    #[test]
    fn full_rate_always_samples() {
        for i in 0..1_000 {
            assert!(sample(&spread_id(i), 100.0));
        }
    }

    #[test]
    fn decision_is_deterministic() {
        let id = TraceId::from_u64(0xb6db_b1c2_b362_bf51);
        let first = sample(&id, 37.5);
        for _ in 0..100 {
            assert_eq!(sample(&id, 37.5), first);
        }
    }

    #[test]
    fn wide_ids_use_low_bits() {
        let narrow = TraceId::from_u64(0x1234_5678_9abc_def0);
        let wide = TraceId::from_u128(0xdead_beef_0000_0000_1234_5678_9abc_def0);
        for rate in [1.0, 25.0, 50.0, 99.0] {
            assert_eq!(sample(&narrow, rate), sample(&wide, rate));
        }
    }

    #[test]
    fn rate_tracks_population() {
        let sampled = (0..10_000).filter(|i| sample(&spread_id(*i), 25.0)).count();
        // 25% of 10k with a generous tolerance
        assert!((2_000..3_000).contains(&sampled), "sampled {sampled}");
    }

    #[test]
    fn out_of_range_rates_clamp() {
        assert!(sample(&spread_id(7), 150.0));
        assert!(!sample(&spread_id(7), -3.0));
    }
}
