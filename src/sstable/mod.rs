pub mod block;
mod cache;
pub mod reader;
pub mod trailer;
pub mod writer;

use crate::{varint, Error, Result};
use bytes::{BufMut, Bytes};

/*
Table layout schema. The trailer is read first, everything else is located from it.
-------------------------------------------------------------------------
|              Data Blocks              |  Index Block  |    Trailer    |
-------------------------------------------------------------------------
| Block #1 | Block #2 | ... | Block #N  |  compressed   |  46 Bytes     |
-------------------------------------------------------------------------

Index block layout (before compression). One entry per data block, in block order.
---------------------------------------------------------------------------------
|                                Entry #1                                 | ... |
---------------------------------------------------------------------------------
| first_key_len (varint) | first_key | offset (varint) | block_len (varint) | ... |
---------------------------------------------------------------------------------

Individual block layout is given where Block is defined, the trailer where Trailer is.
*/

/// Location of a single data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub first_key: Bytes,
    /// Offset of the block from the start of the file.
    pub offset: u64,
    /// Compressed length of the block.
    pub length: u64,
}

/// Sparse index with one entry per block, held in memory while a table is open.
#[derive(Debug, Clone, Default)]
pub struct TableIndex(Vec<IndexEntry>);

impl TableIndex {
    pub fn new() -> Self {
        TableIndex(Vec::new())
    }

    pub fn push(&mut self, entry: IndexEntry) {
        self.0.push(entry);
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The block whose key range could hold `key`: the last one whose first key
    /// is <= `key`. None when `key` sorts before the whole table.
    pub fn find(&self, key: &[u8]) -> Option<usize> {
        self.0
            .partition_point(|e| &e.first_key[..] <= key)
            .checked_sub(1)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for entry in &self.0 {
            varint::put(&mut buf, entry.first_key.len() as u64);
            buf.put_slice(&entry.first_key);
            varint::put(&mut buf, entry.offset);
            varint::put(&mut buf, entry.length);
        }
        buf
    }

    /// Parses an uncompressed index. Blocks must tile `[0, data_end)` exactly
    /// and first keys must be strictly increasing.
    pub fn decode(raw: &[u8], data_end: u64) -> Result<Self> {
        let mut index = TableIndex::new();
        let mut rest = raw;
        let mut next_offset = 0u64;

        while !rest.is_empty() {
            let n = index.len();
            let key_len = varint::take(&mut rest).map_err(|e| corrupt(n, e))?;
            if key_len == 0 || key_len > rest.len() as u64 {
                return Err(Error::CorruptIndex(format!(
                    "entry {n}: bad first key length {key_len}"
                )));
            }
            let first_key = Bytes::copy_from_slice(&rest[..key_len as usize]);
            rest = &rest[key_len as usize..];
            let offset = varint::take(&mut rest).map_err(|e| corrupt(n, e))?;
            let length = varint::take(&mut rest).map_err(|e| corrupt(n, e))?;

            if offset != next_offset {
                return Err(Error::CorruptIndex(format!(
                    "entry {n}: block at offset {offset}, expected {next_offset}"
                )));
            }
            next_offset = offset
                .checked_add(length)
                .ok_or_else(|| Error::CorruptIndex(format!("entry {n}: length overflows")))?;

            if let Some(prev) = index.0.last() {
                if prev.first_key >= first_key {
                    return Err(Error::CorruptIndex(format!(
                        "entry {n}: first keys are not strictly increasing"
                    )));
                }
            }

            index.push(IndexEntry {
                first_key,
                offset,
                length,
            });
        }

        if next_offset != data_end {
            return Err(Error::CorruptIndex(format!(
                "blocks end at {next_offset}, index starts at {data_end}"
            )));
        }

        Ok(index)
    }
}

fn corrupt(entry: usize, err: Error) -> Error {
    Error::CorruptIndex(format!("entry {entry}: {err}"))
}
