use crate::{varint, Compression, Entry, Error, Result};
use bytes::{BufMut, Bytes};

/*
Block layout schema. The body is compressed as a whole with the table-wide algorithm.
------------------------------------------------------------------
|                           Entry #1                       | ... |
------------------------------------------------------------------
| key_len (varint) | key | value_len (varint) | value      | ... |
------------------------------------------------------------------
*/

/// Bytes a single k/v pair adds to an uncompressed block.
pub fn entry_size(key: &[u8], value: &[u8]) -> usize {
    varint::encoded_len(key.len() as u64)
        + key.len()
        + varint::encoded_len(value.len() as u64)
        + value.len()
}

fn put_entry(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    varint::put(buf, key.len() as u64);
    buf.put_slice(key);
    varint::put(buf, value.len() as u64);
    buf.put_slice(value);
}

/// Serializes an already sorted run of entries into one compressed block.
pub fn encode_block(entries: &[Entry], compression: Compression) -> Result<Vec<u8>> {
    let size = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
    let mut raw = Vec::with_capacity(size);
    for (key, value) in entries {
        put_entry(&mut raw, key, value);
    }
    compression.compress(&raw)
}

pub fn decode_block(raw: &[u8], compression: Compression) -> Result<Block> {
    Block::decode(raw, compression)
}

/// Accumulates the uncompressed body of the block currently being written.
#[derive(Debug, Default)]
pub struct BlockBuilder {
    data: Vec<u8>,
    first_key: Option<Bytes>,
    count: usize,
}

/// A block taken out of a builder, ready to be written.
#[derive(Debug)]
pub struct FinishedBlock {
    pub first_key: Bytes,
    pub compressed: Vec<u8>,
    pub raw_size: usize,
    pub count: usize,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The caller is responsible for key order.
    pub fn add(&mut self, key: &Bytes, value: &[u8]) {
        if self.first_key.is_none() {
            self.first_key = Some(key.clone());
        }
        put_entry(&mut self.data, key, value);
        self.count += 1;
    }

    /// Uncompressed size of everything added so far.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Compresses the buffered entries and resets the builder. Returns None
    /// when nothing was added.
    pub fn finish(&mut self, compression: Compression) -> Result<Option<FinishedBlock>> {
        let Some(first_key) = self.first_key.take() else {
            return Ok(None);
        };

        let compressed = compression.compress(&self.data)?;
        let finished = FinishedBlock {
            first_key,
            compressed,
            raw_size: self.data.len(),
            count: self.count,
        };

        self.data.clear();
        self.count = 0;

        Ok(Some(finished))
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    key: usize,
    key_len: usize,
    value: usize,
    value_len: usize,
}

impl Slot {
    fn key_end(&self) -> usize {
        self.key + self.key_len
    }

    fn value_end(&self) -> usize {
        self.value + self.value_len
    }
}

/// A decoded block. Keys and values are zero-copy slices of the decompressed body.
#[derive(Debug, Clone)]
pub struct Block {
    data: Bytes,
    slots: Vec<Slot>,
}

impl Block {
    /// Decompresses and parses a block, checking that every length stays inside
    /// the body and that keys are strictly increasing.
    pub fn decode(raw: &[u8], compression: Compression) -> Result<Self> {
        let data = compression.decompress(raw).map_err(Error::CorruptBlock)?;
        Self::parse(Bytes::from(data))
    }

    fn parse(data: Bytes) -> Result<Self> {
        let mut slots: Vec<Slot> = Vec::new();
        let mut rest: &[u8] = &data;

        while !rest.is_empty() {
            let n = slots.len();
            let key_len = take_len(&mut rest, n, "key")?;
            if key_len == 0 {
                return Err(Error::CorruptBlock(format!("entry {n} has an empty key")));
            }
            let key = data.len() - rest.len();
            rest = &rest[key_len..];

            let value_len = take_len(&mut rest, n, "value")?;
            let value = data.len() - rest.len();
            rest = &rest[value_len..];

            let slot = Slot {
                key,
                key_len,
                value,
                value_len,
            };
            if let Some(prev) = slots.last() {
                if data[prev.key..prev.key_end()] >= data[slot.key..slot.key_end()] {
                    return Err(Error::CorruptBlock(format!(
                        "keys are not strictly increasing at entry {n}"
                    )));
                }
            }
            slots.push(slot);
        }

        Ok(Self { data, slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Size of the decompressed body.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn key(&self, i: usize) -> &[u8] {
        let slot = &self.slots[i];
        &self.data[slot.key..slot.key_end()]
    }

    pub fn value(&self, i: usize) -> Bytes {
        let slot = &self.slots[i];
        self.data.slice(slot.value..slot.value_end())
    }

    pub fn entry(&self, i: usize) -> Entry {
        let slot = &self.slots[i];
        (
            self.data.slice(slot.key..slot.key_end()),
            self.value(i),
        )
    }

    pub fn first_key(&self) -> Option<&[u8]> {
        (!self.is_empty()).then(|| self.key(0))
    }

    pub fn last_key(&self) -> Option<&[u8]> {
        (!self.is_empty()).then(|| self.key(self.len() - 1))
    }

    /// Position of the exact key, if present.
    pub fn find(&self, key: &[u8]) -> Option<usize> {
        let i = self.lower_bound(key);
        (i < self.len() && self.key(i) == key).then_some(i)
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.find(key).map(|i| self.value(i))
    }

    /// First position whose key is >= `key`.
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        self.partition_point(|k| k < key)
    }

    /// First position whose key is > `key`.
    pub fn upper_bound(&self, key: &[u8]) -> usize {
        self.partition_point(|k| k <= key)
    }

    fn partition_point(&self, pred: impl Fn(&[u8]) -> bool) -> usize {
        self.slots
            .partition_point(|slot| pred(&self.data[slot.key..slot.key_end()]))
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Entry> + '_ {
        (0..self.len()).map(|i| self.entry(i))
    }
}

fn take_len(rest: &mut &[u8], entry: usize, what: &str) -> Result<usize> {
    let len = varint::take(rest)
        .map_err(|e| Error::CorruptBlock(format!("entry {entry}: {what} length: {e}")))?;
    if len > rest.len() as u64 {
        return Err(Error::CorruptBlock(format!(
            "entry {entry}: {what} of {len} bytes runs past the end of the block"
        )));
    }
    Ok(len as usize)
}
