use super::block::BlockBuilder;
use super::trailer::Trailer;
use super::{IndexEntry, TableIndex};
use crate::error::IoContext;
use crate::{Error, Result, WriterOptions};
use bytes::Bytes;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Created, nothing added yet.
    Open,
    Writing,
    Finalized,
    /// An I/O or compression error closed the writer before finalize.
    Failed,
}

/// Writer is meant to be used the following way: create -> add (many, in strictly
/// increasing key order) -> finalize, after which the file can be opened by any
/// number of readers. The file at `path` is created or truncated on create; if
/// anything fails before finalize it is left unusable.
#[derive(Debug)]
pub struct Writer {
    file: Option<BufWriter<File>>,
    path: PathBuf,
    options: WriterOptions,
    block: BlockBuilder,
    index: TableIndex,
    last_key: Option<Bytes>,
    /// Where the next block lands in the file.
    offset: u64,
    entry_count: u64,
    data_size: u64,
    failed: bool,
}

impl Writer {
    pub fn create(path: impl AsRef<Path>, options: WriterOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).io_context("creating table file")?;

        Ok(Self {
            file: Some(BufWriter::new(file)),
            path,
            options,
            block: BlockBuilder::new(),
            index: TableIndex::new(),
            last_key: None,
            offset: 0,
            entry_count: 0,
            data_size: 0,
            failed: false,
        })
    }

    /// Appends an entry. Keys must be non-empty and strictly greater than the
    /// previously added key; duplicates are rejected like any other out of
    /// order key.
    pub fn add(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::WriterClosed);
        }

        let key = key.into();
        let value = value.into();

        if key.is_empty() {
            return Err(Error::EmptyKey);
        }

        if let Some(last) = &self.last_key {
            if key <= *last {
                return Err(Error::OutOfOrderKey {
                    key,
                    last: last.clone(),
                });
            }
        }

        self.block.add(&key, &value);
        self.entry_count += 1;
        self.last_key = Some(key);

        if self.block.size() >= self.options.block_size {
            if let Err(e) = self.flush_block() {
                self.fail(&e);
                return Err(e);
            }
        }

        Ok(())
    }

    /// Writes the partial trailing block, the index and the trailer, then syncs
    /// the file. The writer accepts nothing afterwards.
    pub fn finalize(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::WriterClosed);
        }

        self.write_tail().inspect_err(|e| self.fail(e))
    }

    fn write_tail(&mut self) -> Result<()> {
        self.flush_block()?;

        let index_block = self.options.compression.compress(&self.index.encode())?;
        let trailer = Trailer {
            compression: self.options.compression,
            entry_count: self.entry_count,
            index_offset: self.offset,
            index_length: index_block.len() as u64,
            data_size: self.data_size,
            index_checksum: crc32fast::hash(&index_block),
        };

        let Some(mut file) = self.file.take() else {
            return Err(Error::WriterClosed);
        };
        file.write_all(&index_block).io_context("writing index")?;
        file.write_all(&trailer.encode()).io_context("writing trailer")?;
        let file = file
            .into_inner()
            .map_err(|e| e.into_error())
            .io_context("flushing table")?;
        file.sync_all().io_context("syncing table")?;

        info!(
            path = %self.path.display(),
            entries = self.entry_count,
            blocks = self.index.len(),
            bytes = trailer.index_offset + trailer.index_length + super::trailer::TRAILER_SIZE as u64,
            "table finalized"
        );

        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        let Some(block) = self.block.finish(self.options.compression)? else {
            return Ok(());
        };
        let file = self.file.as_mut().ok_or(Error::WriterClosed)?;
        file.write_all(&block.compressed).io_context("writing block")?;

        let length = block.compressed.len() as u64;
        debug!(
            offset = self.offset,
            length,
            raw_size = block.raw_size,
            entries = block.count,
            "flushed block"
        );

        self.index.push(IndexEntry {
            first_key: block.first_key,
            offset: self.offset,
            length,
        });
        self.offset += length;
        self.data_size += block.raw_size as u64;

        Ok(())
    }

    /// Drops the file handle. Whatever was written so far is not a table.
    fn fail(&mut self, err: &Error) {
        warn!(path = %self.path.display(), error = %err, "table writer failed");
        self.file = None;
        self.failed = true;
    }

    pub fn state(&self) -> State {
        match self.file {
            None if self.failed => State::Failed,
            None => State::Finalized,
            Some(_) if self.entry_count == 0 => State::Open,
            Some(_) => State::Writing,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries added so far.
    pub fn len(&self) -> u64 {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }
}
