use super::block::Block;
use super::cache::BlockCache;
use super::trailer::{Trailer, TRAILER_SIZE};
use super::{IndexEntry, TableIndex};
use crate::error::IoContext;
use crate::{Compression, Entry, Error, ReaderOptions, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

/// An open, finalized table. Cloning is cheap and clones share the file handle,
/// the index and the block cache. All file access is positional, so any number
/// of cursors may run over one reader without affecting each other.
#[derive(Debug, Clone)]
pub struct Reader {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    file: File,
    path: PathBuf,
    trailer: Trailer,
    index: TableIndex,
    cache: Mutex<BlockCache>,
}

impl Reader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ReaderOptions::default())
    }

    /// Reads the trailer from the end of the file, validates it and loads the
    /// index into memory.
    pub fn open_with(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).io_context("opening table")?;
        let len = file.metadata().io_context("reading table metadata")?.len();

        if len < TRAILER_SIZE as u64 {
            return Err(Error::TruncatedFile {
                len,
                required: TRAILER_SIZE as u64,
            });
        }

        let data_end = len - TRAILER_SIZE as u64;
        let raw = read_at(&file, data_end, TRAILER_SIZE as u64, "reading trailer")?;
        let trailer = Trailer::decode(&raw)?;

        match trailer.index_offset.checked_add(trailer.index_length) {
            Some(end) if end == data_end => {}
            Some(end) if end > data_end => {
                return Err(Error::TruncatedFile {
                    len,
                    required: end + TRAILER_SIZE as u64,
                });
            }
            _ => {
                return Err(Error::InvalidFormat(format!(
                    "index at {}+{} does not end where the trailer starts ({data_end})",
                    trailer.index_offset, trailer.index_length
                )));
            }
        }

        let stored = read_at(
            &file,
            trailer.index_offset,
            trailer.index_length,
            "reading index",
        )?;
        if crc32fast::hash(&stored) != trailer.index_checksum {
            return Err(Error::CorruptIndex("checksum mismatch".to_string()));
        }
        let raw_index = trailer
            .compression
            .decompress(&stored)
            .map_err(Error::CorruptIndex)?;
        let index = TableIndex::decode(&raw_index, trailer.index_offset)?;

        if index.is_empty() != (trailer.entry_count == 0) {
            return Err(Error::CorruptIndex(format!(
                "{} blocks for {} entries",
                index.len(),
                trailer.entry_count
            )));
        }

        debug!(
            path = %path.display(),
            entries = trailer.entry_count,
            blocks = index.len(),
            compression = %trailer.compression,
            "table opened"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                file,
                path,
                trailer,
                index,
                cache: Mutex::new(BlockCache::new(options.block_cache_capacity)),
            }),
        })
    }

    /// Point lookup. Only the one block that could hold the key is read.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        match self.inner.index.find(key) {
            Some(i) => Ok(self.cached_block(i)?.get(key)),
            None => Ok(None),
        }
    }

    pub fn has_key(&self, key: &[u8]) -> Result<bool> {
        match self.inner.index.find(key) {
            Some(i) => Ok(self.cached_block(i)?.find(key).is_some()),
            None => Ok(false),
        }
    }

    /// All entries in key order.
    pub fn iter(&self) -> TableIter {
        self.iterate(None, Direction::Forward)
    }

    /// A fresh cursor starting at the first key >= `from` (forward) or the last
    /// key <= `from` (backward). Without `from` it starts at the respective end.
    pub fn iterate(&self, from: Option<&[u8]>, direction: Direction) -> TableIter {
        TableIter::new(self.clone(), from, direction, Stop::End)
    }

    /// Entries with `start <= key <= end`, in key order.
    pub fn range(&self, start: &[u8], end: &[u8]) -> TableIter {
        TableIter::new(
            self.clone(),
            Some(start),
            Direction::Forward,
            Stop::Through(Bytes::copy_from_slice(end)),
        )
    }

    /// Entries whose key starts with `prefix`, in key order.
    pub fn prefix(&self, prefix: &[u8]) -> TableIter {
        TableIter::new(
            self.clone(),
            Some(prefix),
            Direction::Forward,
            Stop::Prefix(Bytes::copy_from_slice(prefix)),
        )
    }

    /// Number of entries in the table.
    pub fn len(&self) -> u64 {
        self.inner.trailer.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn compression(&self) -> Compression {
        self.inner.trailer.compression
    }

    /// Uncompressed size of all data blocks.
    pub fn data_size(&self) -> u64 {
        self.inner.trailer.data_size
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn trailer(&self) -> &Trailer {
        &self.inner.trailer
    }

    pub fn index_entries(&self) -> &[IndexEntry] {
        self.inner.index.entries()
    }

    pub fn block_count(&self) -> usize {
        self.inner.index.len()
    }

    /// Decoded blocks currently held by the lookup cache.
    pub fn cached_blocks(&self) -> usize {
        self.inner.cache.lock().len()
    }

    /// Reads and decodes block `i` straight from the file, bypassing the cache.
    pub fn read_block(&self, i: usize) -> Result<Block> {
        let Some(entry) = self.inner.index.entries().get(i) else {
            return Err(Error::CorruptIndex(format!(
                "block {i} requested, table has {}",
                self.block_count()
            )));
        };

        let raw = read_at(&self.inner.file, entry.offset, entry.length, "reading block")?;
        let block = Block::decode(&raw, self.compression()).map_err(|e| match e {
            Error::CorruptBlock(msg) => {
                Error::CorruptBlock(format!("block {i} at offset {}: {msg}", entry.offset))
            }
            other => other,
        })?;

        if block.first_key() != Some(&entry.first_key[..]) {
            return Err(Error::CorruptBlock(format!(
                "block {i} at offset {}: first key does not match the index",
                entry.offset
            )));
        }

        // Blocks must not overlap: the last key stays below the next block's first.
        if let Some(next) = self.inner.index.entries().get(i + 1) {
            if block.last_key() >= Some(&next.first_key[..]) {
                return Err(Error::CorruptBlock(format!(
                    "block {i} at offset {}: last key reaches into block {}",
                    entry.offset,
                    i + 1
                )));
            }
        }

        Ok(block)
    }

    fn cached_block(&self, i: usize) -> Result<Arc<Block>> {
        if let Some(block) = self.inner.cache.lock().get(i) {
            return Ok(block);
        }

        // Read without holding the lock, a racing reader just decodes twice.
        let block = Arc::new(self.read_block(i)?);
        self.inner.cache.lock().insert(i, block.clone());

        Ok(block)
    }
}

fn read_at(file: &File, offset: u64, len: u64, context: &'static str) -> Result<Vec<u8>> {
    let mut data = vec![0; len as usize];
    file.read_exact_at(&mut data, offset).io_context(context)?;
    Ok(data)
}

#[derive(Debug, Clone)]
enum Stop {
    End,
    /// Inclusive upper bound.
    Through(Bytes),
    Prefix(Bytes),
}

impl Stop {
    fn passed(&self, key: &[u8]) -> bool {
        match self {
            Stop::End => false,
            Stop::Through(end) => key > &end[..],
            Stop::Prefix(prefix) => !key.starts_with(prefix),
        }
    }
}

/// A single-pass cursor over one table. Blocks are read one at a time as the
/// cursor crosses into them. An error ends the iteration.
#[derive(Debug)]
pub struct TableIter {
    reader: Reader,
    direction: Direction,
    stop: Stop,
    block_idx: usize,
    block: Option<Block>,
    /// Forward: next position to yield. Backward: one past it.
    pos: usize,
    /// Key to position on once the first block is loaded.
    seek: Option<Bytes>,
    done: bool,
}

impl TableIter {
    fn new(reader: Reader, from: Option<&[u8]>, direction: Direction, stop: Stop) -> Self {
        let blocks = reader.block_count();
        let (block_idx, done) = match (direction, from) {
            _ if blocks == 0 => (0, true),
            (Direction::Forward, None) => (0, false),
            (Direction::Forward, Some(key)) => (reader.inner.index.find(key).unwrap_or(0), false),
            (Direction::Backward, None) => (blocks - 1, false),
            // Every key in the table is greater than `from`.
            (Direction::Backward, Some(key)) => match reader.inner.index.find(key) {
                Some(i) => (i, false),
                None => (0, true),
            },
        };

        Self {
            reader,
            direction,
            stop,
            block_idx,
            block: None,
            pos: 0,
            seek: from.map(Bytes::copy_from_slice),
            done,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn load(&mut self) -> Result<()> {
        let block = self.reader.read_block(self.block_idx)?;
        self.pos = match (self.direction, self.seek.take()) {
            (Direction::Forward, Some(key)) => block.lower_bound(&key),
            (Direction::Forward, None) => 0,
            (Direction::Backward, Some(key)) => block.upper_bound(&key),
            (Direction::Backward, None) => block.len(),
        };
        self.block = Some(block);
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<Entry>> {
        loop {
            if self.block.is_none() {
                self.load()?;
            }
            let Some(block) = &self.block else {
                return Ok(None);
            };

            match self.direction {
                Direction::Forward => {
                    if self.pos < block.len() {
                        let entry = block.entry(self.pos);
                        self.pos += 1;
                        return Ok(Some(entry));
                    }
                    if self.block_idx + 1 >= self.reader.block_count() {
                        return Ok(None);
                    }
                    self.block_idx += 1;
                }
                Direction::Backward => {
                    if self.pos > 0 {
                        self.pos -= 1;
                        return Ok(Some(block.entry(self.pos)));
                    }
                    if self.block_idx == 0 {
                        return Ok(None);
                    }
                    self.block_idx -= 1;
                }
            }
            self.block = None;
        }
    }
}

impl Iterator for TableIter {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.advance() {
            Ok(Some(entry)) if !self.stop.passed(&entry.0) => Some(Ok(entry)),
            Ok(_) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for TableIter {}
