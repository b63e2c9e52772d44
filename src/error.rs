use std::fmt;

use thiserror::Error;

/// A kind of value that can overflow the serialized module format.
///
/// Serialized maps address their contents with 32-bit offsets; a module
/// large enough to exceed them cannot be serialized and the failing value
/// class is reported through [`SymbolError::ValueTooLarge`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ValueKind {
    /// A source file entry.
    File,
    /// A function record including its line and inline tables.
    Function,
    /// A public symbol record.
    PublicSymbol,
    /// A Windows frame info record.
    FrameInfo,
    /// A CFI rule string.
    CfiRules,
    /// An inline origin record.
    InlineOrigin,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ValueKind::File => write!(f, "file"),
            ValueKind::Function => write!(f, "function"),
            ValueKind::PublicSymbol => write!(f, "public symbol"),
            ValueKind::FrameInfo => write!(f, "frame info record"),
            ValueKind::CfiRules => write!(f, "cfi rules"),
            ValueKind::InlineOrigin => write!(f, "inline origin"),
        }
    }
}

/// An error produced while parsing, serializing or loading a symbol module.
///
/// Everything a caller can recover from (unknown modules, missing file or
/// origin ids, absent frame info) is reported as an empty or absent query
/// result instead. Only load-time corruption and serializer overflows
/// surface through this type.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SymbolError {
    /// The `MODULE` header record is missing or malformed.
    #[error("missing or malformed MODULE header")]
    MalformedHeader,

    /// The serialized buffer's declared map sizes do not add up to its length.
    #[error("serialized module size mismatch: expected {expected} bytes, found {found}")]
    BufferSizeMismatch {
        /// Total byte length declared by the buffer header.
        expected: usize,
        /// Actual byte length of the buffer.
        found: usize,
    },

    /// The serialized buffer is truncated or structurally malformed.
    #[error("serialized module buffer is truncated or malformed")]
    BadFormat,

    /// A value does not fit the serialized format's 32-bit offsets.
    #[error("{0} too large for serialized module format")]
    ValueTooLarge(ValueKind),
}
