//! Error taxonomy for the store, decoder, matcher and query layers (spec §7).

use std::path::PathBuf;

use thiserror::Error;

/// The single error type returned by all public GeoDesk entry points.
/// Internal plumbing bottoms out in one of these variants directly (no
/// intermediate boxed-error type), so embedding applications can match on a
/// closed, stable set of failure kinds at every module boundary.
#[derive(Debug, Error)]
pub enum GeodeskError {
    /// Underlying file or mmap failure. Never silently retried.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bad magic, bad CRC, malformed varint, or out-of-range offset.
    #[error("corrupt GOL data at byte {offset}: {message}")]
    Corrupt { offset: u64, message: String },

    /// The GOL's major version is not supported by this build.
    #[error("unsupported GOL version {found} (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    /// The exclusive writer lock is held by another process.
    #[error("store is locked for writing by another process")]
    LockConflict,

    /// A tag-expression failed to compile; `offset` is a byte index into
    /// the source expression and `token` is the offending substring.
    #[error("invalid tag expression at byte {offset} (near {token:?}): {message}")]
    BadExpression {
        offset: usize,
        token: String,
        message: String,
    },

    /// `one()` was called on a feature set that produced more than one result.
    #[error("query produced more than one result")]
    TooManyResults,

    /// A relation-member traversal revisited a feature already on the
    /// current traversal stack.
    #[error("relation member cycle detected at feature {feature_id}")]
    RecursionCycle { feature_id: u64 },
}

impl GeodeskError {
    pub fn corrupt(offset: u64, message: impl Into<String>) -> Self {
        GeodeskError::Corrupt {
            offset,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GeodeskError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, GeodeskError>;

/// `StaleTile` is not surfaced to callers (spec §7: "query skips the tile,
/// no error to caller") so it is not a `GeodeskError` variant; it is instead
/// an internal control-flow signal used by the tile decoder and the query
/// executor. See [`crate::feature_store::tile_index::TileStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StaleTile;
