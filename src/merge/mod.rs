pub mod func;

use crate::{Entry, Error, MergeFn, MergeResult, Reader, Result, Sink};
use bytes::Bytes;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use tracing::{debug, info};

/// A sorted stream of entries the merger can fan in.
pub type Source = Box<dyn Iterator<Item = Result<Entry>> + Send>;

/// Combines several sorted sources into one sorted stream with unique keys.
/// Values found under the same key in more than one source are folded with the
/// merge function, in the order the sources were added.
pub struct Merger {
    sources: Vec<Source>,
    merge: MergeFn,
}

impl std::fmt::Debug for Merger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merger")
            .field("sources", &self.sources.len())
            .finish_non_exhaustive()
    }
}

impl Merger {
    pub fn new<F>(merge: F) -> Self
    where
        F: FnMut(&[u8], &[u8], &[u8]) -> MergeResult + Send + 'static,
    {
        Self {
            sources: Vec::new(),
            merge: Box::new(merge),
        }
    }

    /// Adds a fresh forward cursor over the whole table.
    pub fn add_reader(&mut self, reader: &Reader) {
        self.add_source(reader.iter());
    }

    /// Adds any stream of entries. It has to be sorted by key without
    /// duplicates, otherwise iteration fails with OutOfOrderKey.
    pub fn add_source<I>(&mut self, source: I)
    where
        I: IntoIterator<Item = Result<Entry>>,
        I::IntoIter: Send + 'static,
    {
        self.sources.push(Box::new(source.into_iter()));
    }

    /// Number of sources added so far.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Pull interface. Sources are not touched until the first call to next.
    pub fn iter(self) -> MergeIter {
        debug!(sources = self.sources.len(), "merging");
        MergeIter {
            heap: BinaryHeap::with_capacity(self.sources.len()),
            sources: self.sources,
            merge: self.merge,
            primed: false,
            done: false,
        }
    }

    /// Push interface. Streams the merged entries into `sink` and returns how
    /// many were written. The sink is not finalized.
    pub fn write<S: Sink + ?Sized>(self, sink: &mut S) -> Result<u64> {
        let sources = self.sources.len();
        let mut written = 0;
        for entry in self.iter() {
            let (key, value) = entry?;
            sink.put(key, value)?;
            written += 1;
        }

        info!(sources, entries = written, "merge written");

        Ok(written)
    }
}

/// Current entry of one source, ordered by key and then by source position so
/// that equal keys come out of the heap in the order their sources were added.
#[derive(Debug)]
struct Head {
    key: Bytes,
    value: Bytes,
    source: usize,
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then(self.source.cmp(&other.source))
    }
}

/// Lazy merged stream. Yields every distinct key once in increasing order; the
/// first error ends it.
pub struct MergeIter {
    sources: Vec<Source>,
    heap: BinaryHeap<Reverse<Head>>,
    merge: MergeFn,
    primed: bool,
    done: bool,
}

impl std::fmt::Debug for MergeIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeIter")
            .field("sources", &self.sources.len())
            .field("pending", &self.heap.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl MergeIter {
    /// Moves `source` one step forward and pushes its new head, if any.
    /// `prev` is the key the source yielded before, used to check its order.
    fn pull(&mut self, source: usize, prev: Option<&Bytes>) -> Result<()> {
        let Some(entry) = self.sources[source].next() else {
            return Ok(());
        };
        let (key, value) = entry?;

        if let Some(prev) = prev {
            if key <= *prev {
                return Err(Error::OutOfOrderKey {
                    key,
                    last: prev.clone(),
                });
            }
        }

        self.heap.push(Reverse(Head { key, value, source }));
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<Entry>> {
        if !self.primed {
            self.primed = true;
            for source in 0..self.sources.len() {
                self.pull(source, None)?;
            }
        }

        let Some(Reverse(head)) = self.heap.pop() else {
            return Ok(None);
        };
        let Head {
            key,
            mut value,
            source,
        } = head;
        self.pull(source, Some(&key))?;

        while let Some(Reverse(next)) = self.heap.peek() {
            if next.key != key {
                break;
            }
            let Some(Reverse(next)) = self.heap.pop() else {
                break;
            };
            value = (self.merge)(&key[..], &value[..], &next.value[..])
                .map_err(Error::MergeFunction)?;
            self.pull(next.source, Some(&next.key))?;
        }

        Ok(Some((key, value)))
    }
}

impl Iterator for MergeIter {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
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

impl std::iter::FusedIterator for MergeIter {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Compression, Writer, WriterOptions};
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::path::Path;
    use tempfile::tempdir;

    fn table(path: &Path, entries: &[(&str, &str)]) -> Reader {
        let mut w = Writer::create(path, WriterOptions::default()).unwrap();
        for (k, v) in entries {
            w.add(k.to_string(), v.to_string()).unwrap();
        }
        w.finalize().unwrap();
        Reader::open(path).unwrap()
    }

    fn source(entries: &[(&str, &str)]) -> Vec<Result<Entry>> {
        entries
            .iter()
            .map(|(k, v)| Ok((Bytes::from(k.to_string()), Bytes::from(v.to_string()))))
            .collect()
    }

    fn strings(entries: Vec<Entry>) -> Vec<(String, String)> {
        entries
            .into_iter()
            .map(|(k, v)| {
                (
                    String::from_utf8(k.to_vec()).unwrap(),
                    String::from_utf8(v.to_vec()).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_merge_readers() {
        let dir = tempdir().unwrap();
        let one = table(&dir.path().join("1"), &[("a", "x"), ("b", "y")]);
        let two = table(&dir.path().join("2"), &[("a", "z"), ("c", "w")]);

        let mut merger = Merger::new(func::concat);
        merger.add_reader(&one);
        merger.add_reader(&two);
        assert_eq!(merger.len(), 2);

        let merged: Vec<Entry> = merger.iter().collect::<Result<_>>().unwrap();
        assert_eq!(
            strings(merged),
            vec![
                ("a".to_string(), "xz".to_string()),
                ("b".to_string(), "y".to_string()),
                ("c".to_string(), "w".to_string()),
            ]
        );
    }

    #[test]
    fn test_left_fold_in_insertion_order() {
        let mut merger = Merger::new(func::concat);
        merger.add_source(source(&[("k", "1"), ("z", "a")]));
        merger.add_source(source(&[("k", "2")]));
        merger.add_source(source(&[("a", "-"), ("k", "3"), ("z", "b")]));

        let merged: Vec<Entry> = merger.iter().collect::<Result<_>>().unwrap();
        assert_eq!(
            strings(merged),
            vec![
                ("a".to_string(), "-".to_string()),
                ("k".to_string(), "123".to_string()),
                ("z".to_string(), "ab".to_string()),
            ]
        );
    }

    #[test]
    fn test_write_into_table() {
        let dir = tempdir().unwrap();
        let one = table(&dir.path().join("1"), &[("a", "1"), ("c", "3")]);
        let two = table(&dir.path().join("2"), &[("b", "2"), ("c", "4")]);

        let mut merger = Merger::new(func::keep_last);
        merger.add_reader(&one);
        merger.add_reader(&two);

        let out = dir.path().join("out");
        let mut w = Writer::create(
            &out,
            WriterOptions::default().compression(Compression::Zstd),
        )
        .unwrap();
        assert_eq!(merger.write(&mut w).unwrap(), 3);
        w.finalize().unwrap();

        let merged = Reader::open(&out).unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get(b"c").unwrap(), Some(Bytes::from("4")));
    }

    #[test]
    fn test_no_sources() {
        let merger = Merger::new(func::concat);
        assert!(merger.is_empty());
        assert_eq!(merger.iter().count(), 0);
    }

    #[test]
    fn test_merge_function_error() {
        let mut merger = Merger::new(|_key: &[u8], _a: &[u8], _b: &[u8]| -> MergeResult {
            Err("values do not agree".into())
        });
        merger.add_source(source(&[("a", "1"), ("b", "1")]));
        merger.add_source(source(&[("b", "2")]));

        let mut iter = merger.iter();
        assert_eq!(iter.next().unwrap().unwrap().0, Bytes::from("a"));
        let err = iter.next().unwrap().unwrap_err();
        assert!(matches!(err, Error::MergeFunction(_)), "{err}");
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_source_error() {
        let mut merger = Merger::new(func::concat);
        merger.add_source(vec![
            Ok((Bytes::from("a"), Bytes::new())),
            Err(Error::CorruptBlock("broken".to_string())),
        ]);

        let mut sink: Vec<Entry> = Vec::new();
        let err = merger.write(&mut sink).unwrap_err();
        assert!(err.is_corruption(), "{err}");
    }

    #[test]
    fn test_unsorted_source() {
        let mut merger = Merger::new(func::concat);
        merger.add_source(source(&[("b", "1"), ("a", "2")]));
        let results: Vec<_> = merger.iter().collect();
        assert!(matches!(results.last(), Some(Err(Error::OutOfOrderKey { .. }))));
    }

    proptest! {
        #[test]
        fn prop_merge_equals_fold(
            tables in prop::collection::vec(
                prop::collection::btree_map(
                    prop::collection::vec(any::<u8>(), 1..4),
                    prop::collection::vec(any::<u8>(), 0..4),
                    0..20,
                ),
                0..5,
            )
        ) {
            let mut expected: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
            let mut merger = Merger::new(func::concat);
            for table in &tables {
                for (k, v) in table {
                    expected.entry(k.clone()).or_default().extend_from_slice(v);
                }
                let entries: Vec<Result<Entry>> = table
                    .iter()
                    .map(|(k, v)| Ok((Bytes::from(k.clone()), Bytes::from(v.clone()))))
                    .collect();
                merger.add_source(entries);
            }

            let merged: Vec<(Vec<u8>, Vec<u8>)> = merger
                .iter()
                .map(|e| e.map(|(k, v)| (k.to_vec(), v.to_vec())))
                .collect::<Result<_>>()
                .unwrap();
            let expected: Vec<(Vec<u8>, Vec<u8>)> = expected.into_iter().collect();
            prop_assert_eq!(merged, expected);
        }
    }
}
