use crate::Compression;
use std::path::PathBuf;

/// Options for building a table.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Algorithm applied to every data block and the index (default: zlib)
    pub compression: Compression,

    /// Uncompressed size at which a block is flushed (default: 8KB)
    pub block_size: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            block_size: 8 * 1024, // 8KB
        }
    }
}

impl WriterOptions {
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Zero is treated as one byte, which puts every entry in its own block.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size.max(1);
        self
    }
}

/// Options for opening a table.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Decoded blocks kept around for point lookups, zero disables the cache (default: 32)
    pub block_cache_capacity: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            block_cache_capacity: 32,
        }
    }
}

impl ReaderOptions {
    pub fn block_cache_capacity(mut self, blocks: usize) -> Self {
        self.block_cache_capacity = blocks;
        self
    }
}

/// Options for the external sorter.
#[derive(Debug, Clone)]
pub struct SorterOptions {
    /// Buffered key and value bytes before a run is spilled to disk (default: 1GB)
    pub max_memory: usize,

    /// Parent directory of the spill directory (default: system temp dir)
    pub temp_dir: PathBuf,

    /// How spilled runs are written. They never outlive the sorter, so the
    /// default favours speed (snappy, 64KB blocks).
    pub spill: WriterOptions,
}

impl Default for SorterOptions {
    fn default() -> Self {
        Self {
            max_memory: 1024 * 1024 * 1024, // 1GB
            temp_dir: std::env::temp_dir(),
            spill: WriterOptions::default()
                .compression(Compression::Snappy)
                .block_size(64 * 1024),
        }
    }
}

impl SorterOptions {
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn spill(mut self, options: WriterOptions) -> Self {
        self.spill = options;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let w = WriterOptions::default();
        assert_eq!(w.compression, Compression::Zlib);
        assert_eq!(w.block_size, 8 * 1024);

        assert_eq!(ReaderOptions::default().block_cache_capacity, 32);

        let s = SorterOptions::default();
        assert_eq!(s.max_memory, 1024 * 1024 * 1024);
        assert_eq!(s.temp_dir, std::env::temp_dir());
        assert_eq!(s.spill.compression, Compression::Snappy);
        assert_eq!(s.spill.block_size, 64 * 1024);
    }

    #[test]
    fn test_builders() {
        let w = WriterOptions::default()
            .compression(Compression::None)
            .block_size(0);
        assert_eq!(w.compression, Compression::None);
        assert_eq!(w.block_size, 1);

        let s = SorterOptions::default()
            .max_memory(4096)
            .temp_dir("/tmp/spills")
            .spill(WriterOptions::default().compression(Compression::Lz4));
        assert_eq!(s.max_memory, 4096);
        assert_eq!(s.temp_dir, PathBuf::from("/tmp/spills"));
        assert_eq!(s.spill.compression, Compression::Lz4);
    }
}
