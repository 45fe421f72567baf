use crate::error::IoContext;
use crate::{Error, Result};
use flate2::read::{ZlibDecoder, ZlibEncoder};
use std::io::{self, Read};
use strum::{Display, EnumIter, EnumString};

/// Level used for both zlib and zstd.
const LEVEL: u32 = 3;

/// Upper bound of the lz4 expansion ratio. A size header claiming more than this
/// is damaged and must not drive the output allocation.
const LZ4_MAX_RATIO: usize = 256;

/// Compression algorithm applied to every block of a table. The discriminant is
/// the identifier byte stored in the trailer and must never change.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    Snappy = 1,
    #[default]
    Zlib = 2,
    Lz4 = 3,
    // 4 is reserved.
    Zstd = 5,
}

impl Compression {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Self::None),
            1 => Ok(Self::Snappy),
            2 => Ok(Self::Zlib),
            3 => Ok(Self::Lz4),
            5 => Ok(Self::Zstd),
            _ => Err(Error::InvalidFormat(format!(
                "unknown compression identifier {id}"
            ))),
        }
    }

    pub fn compress(self, raw: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(raw.to_vec()),
            Self::Snappy => snap::raw::Encoder::new()
                .compress_vec(raw)
                .map_err(io::Error::other)
                .io_context("snappy compression"),
            Self::Zlib => {
                let mut encoder = ZlibEncoder::new(raw, flate2::Compression::new(LEVEL));
                let mut out = Vec::new();
                encoder.read_to_end(&mut out).io_context("zlib compression")?;
                Ok(out)
            }
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(raw)),
            Self::Zstd => zstd::encode_all(raw, LEVEL as i32).io_context("zstd compression"),
        }
    }

    /// Any failure here means the stored bytes are damaged, so errors are
    /// returned as plain messages for the caller to classify.
    pub fn decompress(self, data: &[u8]) -> std::result::Result<Vec<u8>, String> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Snappy => snap::raw::Decoder::new()
                .decompress_vec(data)
                .map_err(|e| format!("snappy: {e}")),
            Self::Zlib => {
                let mut out = Vec::new();
                ZlibDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| format!("zlib: {e}"))?;
                Ok(out)
            }
            Self::Lz4 => {
                let (header, body) = data
                    .split_first_chunk::<4>()
                    .ok_or_else(|| "lz4: missing size header".to_string())?;
                let size = u32::from_le_bytes(*header) as usize;
                if size > body.len().saturating_mul(LZ4_MAX_RATIO) + 64 {
                    return Err(format!(
                        "lz4: size header of {size} bytes for a {} byte body",
                        body.len()
                    ));
                }
                lz4_flex::decompress(body, size).map_err(|e| format!("lz4: {e}"))
            }
            Self::Zstd => zstd::decode_all(data).map_err(|e| format!("zstd: {e}")),
        }
    }
}
