use bytes::Bytes;
use std::io;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed varint: {0}")]
    MalformedVarint(&'static str),

    #[error("corrupt block: {0}")]
    CorruptBlock(String),

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// Bad magic, unknown version or unknown compression identifier.
    #[error("invalid table format: {0}")]
    InvalidFormat(String),

    #[error("truncated table file: {len} bytes, at least {required} required")]
    TruncatedFile { len: u64, required: u64 },

    #[error("key {key:?} is not greater than the previous key {last:?}")]
    OutOfOrderKey { key: Bytes, last: Bytes },

    #[error("keys must not be empty")]
    EmptyKey,

    /// Finalized, or closed by an earlier failure.
    #[error("writer is closed")]
    WriterClosed,

    /// An earlier error left buffered entries unwritten, so nothing further is accepted.
    #[error("sorter failed earlier and accepts no more work")]
    SorterFailed,

    #[error("merge function failed: {0}")]
    MergeFunction(#[source] crate::BoxError),

    #[error("entry of {size} bytes does not fit into the sorter memory budget of {budget} bytes")]
    OutOfMemory { size: usize, budget: usize },

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// True when the file is not a valid table at all.
    pub fn is_format_error(&self) -> bool {
        matches!(self, Error::InvalidFormat(_) | Error::TruncatedFile { .. })
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::CorruptBlock(_) | Error::CorruptIndex(_))
    }
}

/// Attaches the name of the failing operation to an I/O error.
pub(crate) trait IoContext<T> {
    fn io_context(self, context: &'static str) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, context: &'static str) -> Result<T> {
        self.map_err(|source| Error::Io { context, source })
    }
}
