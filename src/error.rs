use crate::codec::Encoding;
use thiserror::Error;

/// A specialized `Result` type for tracing operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the tracing core.
///
/// Errors raised while a span body runs (transport failures, annotation
/// coercions) are caught and reported internally and never interrupt the
/// instrumented workload. The pure codec entry points ([`decode`],
/// [`detect`], [`convert`]) return these errors directly since they have no
/// fail-open semantics.
///
/// [`decode`]: crate::decode
/// [`detect`]: crate::detect
/// [`convert`]: crate::convert
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The context stack was popped while empty.
    ///
    /// This is a programming error in the caller: pushes and pops must be
    /// strictly paired with span opens and closes. The stack itself is left
    /// untouched.
    #[error("context stack popped while empty")]
    StackUnderflow,

    /// Wire bytes could not be decoded as the requested encoding.
    ///
    /// Decoding is batch-atomic: one malformed span invalidates the whole
    /// call and no partial span list is returned.
    #[error("malformed {encoding:?} payload: {message}")]
    Decoding {
        /// Encoding the payload was parsed as.
        encoding: Encoding,
        /// Description of the malformation.
        message: String,
    },

    /// A span batch could not be serialized in the requested encoding.
    #[error("failed to encode {encoding:?} payload: {message}")]
    Encoding {
        /// Encoding the batch was serialized as.
        encoding: Encoding,
        /// Description of the failure.
        message: String,
    },

    /// No supported encoding matched the supplied bytes.
    #[error("unable to detect span encoding")]
    UnknownEncoding,

    /// The requested conversion pair is not defined.
    ///
    /// All pairs among the current four encodings convert; the variant is
    /// part of the closed taxonomy so additional formats can report a
    /// missing codec without widening the error type.
    #[error("conversion from {from:?} to {to:?} is not supported")]
    UnsupportedConversion {
        /// Source encoding.
        from: Encoding,
        /// Destination encoding.
        to: Encoding,
    },

    /// A transport failed to deliver an encoded batch.
    #[error("transport error: {0}")]
    Transport(String),

    /// An annotation or tag value cannot be rendered as the target format
    /// requires. Callers coerce the field to a textual fallback instead of
    /// dropping the span.
    #[error("annotation value cannot be rendered: {0}")]
    AnnotationValue(String),
}

impl Error {
    pub(crate) fn decoding(encoding: Encoding, message: impl Into<String>) -> Self {
        Error::Decoding {
            encoding,
            message: message.into(),
        }
    }

    pub(crate) fn encoding(encoding: Encoding, message: impl Into<String>) -> Self {
        Error::Encoding {
            encoding,
            message: message.into(),
        }
    }
}
