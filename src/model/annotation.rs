use serde::{Deserialize, Serialize};

/// A timestamped event that explains latency within a span.
///
/// Annotation order within one span is insertion order and is preserved by
/// every encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Microseconds since epoch at which the event happened.
    pub timestamp: u64,
    /// Short description of the event, usually a word or two.
    pub value: String,
}

impl Annotation {
    /// Create an annotation at the given epoch-microsecond timestamp.
    pub fn new(timestamp: u64, value: impl Into<String>) -> Self {
        Annotation {
            timestamp,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_form() {
        let annotation = Annotation::new(1_502_787_600_000_000, "cache miss");
        assert_eq!(
            serde_json::to_string(&annotation).unwrap(),
            "{\"timestamp\":1502787600000000,\"value\":\"cache miss\"}",
        );
        let back: Annotation =
            serde_json::from_str("{\"timestamp\":1502787600000000,\"value\":\"cache miss\"}")
                .unwrap();
        assert_eq!(back, annotation);
    }
}
