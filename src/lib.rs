pub mod compression;
pub mod config;
pub mod error;
pub mod merge;
pub mod sorter;
pub mod sstable;
mod storage;
pub mod varint;

pub use compression::Compression;
pub use config::{ReaderOptions, SorterOptions, WriterOptions};
pub use error::{Error, Result};
pub use merge::{MergeIter, Merger};
pub use sorter::{SortedIter, Sorter};
pub use sstable::reader::{Direction, Reader, TableIter};
pub use sstable::writer::Writer;

use bytes::Bytes;

/// A single key/value pair. Keys are compared as unsigned bytes.
pub type Entry = (Bytes, Bytes);

/// Error type a caller's merge function may fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type MergeResult = std::result::Result<Bytes, BoxError>;

/// Reconciles two values stored under the same key. The value seen earlier is
/// always passed first.
pub type MergeFn = Box<dyn FnMut(&[u8], &[u8], &[u8]) -> MergeResult + Send>;

/// Anything that accepts a sorted stream of entries.
pub trait Sink {
    fn put(&mut self, key: Bytes, value: Bytes) -> Result<()>;
}

impl Sink for Writer {
    fn put(&mut self, key: Bytes, value: Bytes) -> Result<()> {
        self.add(key, value)
    }
}

impl Sink for Vec<Entry> {
    fn put(&mut self, key: Bytes, value: Bytes) -> Result<()> {
        self.push((key, value));
        Ok(())
    }
}
