//! Error types.

use thiserror::Error;

use crate::observable::PropKey;

/// Failures of mutating observable operations.
///
/// Tracking and triggering never fail; only writes through a wrapper can be
/// rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReactiveError {
    /// A write, delete or clear was attempted through a readonly view.
    #[error("cannot {op} key `{key}`: target is readonly")]
    Readonly { op: &'static str, key: PropKey },

    /// The operation does not apply to this kind of value.
    #[error("`{op}` is not supported on {kind} values")]
    Unsupported { op: &'static str, kind: &'static str },

    /// An array `length` was assigned something that is not a valid length.
    #[error("invalid array length {0}")]
    InvalidLength(f64),
}

pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;
