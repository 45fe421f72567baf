use crate::{Compression, Error, Result};
use bytes::{Buf, BufMut};

/// Identifies a table file. Starts with a non-ASCII byte so text files never match.
pub const MAGIC: [u8; 8] = *b"\x89TBLKIT\n";

pub const VERSION: u8 = 1;

pub const TRAILER_SIZE: usize = 8 + 1 + 1 + 8 + 8 + 8 + 8 + 4; // 46.

/*
Trailer layout schema. Always the last TRAILER_SIZE bytes of the file, integers are little-endian.
---------------------------------------------------------------------------------------------------
| Magic | Version | Compression | Entry count | Index offset | Index length | Data size | Index CRC |
---------------------------------------------------------------------------------------------------
|  8B   |   1B    |     1B      |     8B      |      8B      |      8B      |    8B     |    4B     |
---------------------------------------------------------------------------------------------------

Data size is the uncompressed size of all data blocks. Index CRC is crc32 of the
stored (compressed) index block.
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub compression: Compression,
    pub entry_count: u64,
    pub index_offset: u64,
    pub index_length: u64,
    pub data_size: u64,
    pub index_checksum: u32,
}

impl Trailer {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TRAILER_SIZE);
        buf.put_slice(&MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(self.compression.id());
        buf.put_u64_le(self.entry_count);
        buf.put_u64_le(self.index_offset);
        buf.put_u64_le(self.index_length);
        buf.put_u64_le(self.data_size);
        buf.put_u32_le(self.index_checksum);

        debug_assert_eq!(buf.len(), TRAILER_SIZE, "trailer encoded to a wrong size");

        buf
    }

    pub fn decode(mut raw: &[u8]) -> Result<Self> {
        if raw.len() < TRAILER_SIZE {
            return Err(Error::TruncatedFile {
                len: raw.len() as u64,
                required: TRAILER_SIZE as u64,
            });
        }

        if raw[..MAGIC.len()] != MAGIC {
            return Err(Error::InvalidFormat(format!(
                "bad magic {:02x?}",
                &raw[..MAGIC.len()]
            )));
        }
        raw.advance(MAGIC.len());

        let version = raw.get_u8();
        if version != VERSION {
            return Err(Error::InvalidFormat(format!(
                "unsupported version {version}, expected {VERSION}"
            )));
        }

        let compression = Compression::from_id(raw.get_u8())?;

        Ok(Self {
            compression,
            entry_count: raw.get_u64_le(),
            index_offset: raw.get_u64_le(),
            index_length: raw.get_u64_le(),
            data_size: raw.get_u64_le(),
            index_checksum: raw.get_u32_le(),
        })
    }
}
