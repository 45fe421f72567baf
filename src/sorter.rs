use crate::merge::{MergeIter, Merger};
use crate::storage::SpillDir;
use crate::{Entry, Error, MergeFn, MergeResult, Reader, Result, Sink, SorterOptions, Writer};
use bytes::Bytes;
use tracing::{debug, info, warn};

/// Sorts entries that arrive in any order, with duplicates, into one sorted stream
/// with unique keys.
///
/// Entries are buffered until `max_memory` key and value bytes are reached, then
/// the buffer is sorted, reduced and spilled to a temporary table. Finishing
/// merges all spilled runs plus whatever is still buffered. Values under equal
/// keys are folded left to right in arrival order.
pub struct Sorter {
    options: SorterOptions,
    merge: MergeFn,
    buffer: Vec<Entry>,
    /// Key and value bytes in `buffer`.
    buffered: usize,
    spill: SpillDir,
    /// Set once a spill fails. The buffer is gone at that point.
    failed: bool,
}

impl std::fmt::Debug for Sorter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sorter")
            .field("options", &self.options)
            .field("buffered", &self.buffered)
            .field("spill", &self.spill)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl Sorter {
    pub fn new<F>(options: SorterOptions, merge: F) -> Self
    where
        F: FnMut(&[u8], &[u8], &[u8]) -> MergeResult + Send + 'static,
    {
        Self {
            spill: SpillDir::new(&options.temp_dir),
            options,
            merge: Box::new(merge),
            buffer: Vec::new(),
            buffered: 0,
            failed: false,
        }
    }

    /// Any error other than an empty or oversized entry is fatal: the sorter
    /// refuses every later call.
    pub fn put(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        if self.failed {
            return Err(Error::SorterFailed);
        }

        let key = key.into();
        let value = value.into();

        if key.is_empty() {
            return Err(Error::EmptyKey);
        }

        let size = key.len() + value.len();
        if size > self.options.max_memory {
            return Err(Error::OutOfMemory {
                size,
                budget: self.options.max_memory,
            });
        }

        if self.buffered + size > self.options.max_memory {
            if let Err(e) = self.spill_run() {
                warn!(error = %e, "spill failed, sorter closed");
                self.failed = true;
                return Err(e);
            }
        }

        self.buffer.push((key, value));
        self.buffered += size;

        Ok(())
    }

    /// Entries currently held in memory.
    pub fn len_buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Key and value bytes currently held in memory.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered
    }

    /// Temporary tables written so far.
    pub fn spilled_runs(&self) -> usize {
        self.spill.len()
    }

    /// Pull interface. The returned iterator owns the temporary tables and
    /// deletes them once it is exhausted or dropped.
    pub fn sorted(mut self) -> Result<SortedIter> {
        if self.failed {
            return Err(Error::SorterFailed);
        }

        let run = self.sorted_run()?;
        let Sorter { merge, spill, .. } = self;

        info!(
            runs = spill.len(),
            buffered = run.len(),
            "merging sorted runs"
        );

        let mut merger = Merger::new(merge);
        for path in spill.runs() {
            merger.add_reader(&Reader::open(path)?);
        }
        // Arrived last, so it is folded last.
        merger.add_source(run.into_iter().map(Ok));

        Ok(SortedIter {
            iter: merger.iter(),
            spill,
        })
    }

    /// Push interface. Streams the sorted, reduced entries into `sink` and
    /// returns how many were written. The sink is not finalized.
    pub fn finish<S: Sink + ?Sized>(self, sink: &mut S) -> Result<u64> {
        let mut written = 0;
        for entry in self.sorted()? {
            let (key, value) = entry?;
            sink.put(key, value)?;
            written += 1;
        }

        info!(entries = written, "sort finished");

        Ok(written)
    }

    /// Drops everything buffered and deletes the temporary tables.
    pub fn abort(mut self) {
        debug!(
            runs = self.spill.len(),
            path = %self.spill.path().display(),
            "sort aborted"
        );
        self.spill.clear();
    }

    /// Sorts and reduces the buffer, leaving it empty.
    fn sorted_run(&mut self) -> Result<Vec<Entry>> {
        let mut entries = std::mem::take(&mut self.buffer);
        self.buffered = 0;

        // Stable, so equal keys stay in arrival order.
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        reduce(entries, &mut self.merge)
    }

    fn spill_run(&mut self) -> Result<()> {
        let bytes = self.buffered;
        let run = self.sorted_run()?;
        if run.is_empty() {
            return Ok(());
        }

        let path = self.spill.next_run()?;
        let mut writer = Writer::create(&path, self.options.spill.clone())?;
        let entries = run.len();
        for (key, value) in run {
            writer.add(key, value)?;
        }
        writer.finalize()?;

        info!(
            run = self.spill.len(),
            entries,
            bytes,
            path = %path.display(),
            "spilled sorted run"
        );

        Ok(())
    }
}

/// Folds adjacent entries with equal keys of a sorted run.
fn reduce(entries: Vec<Entry>, merge: &mut MergeFn) -> Result<Vec<Entry>> {
    let mut out: Vec<Entry> = Vec::with_capacity(entries.len());

    for (key, value) in entries {
        if let Some((last, acc)) = out.last_mut() {
            if *last == key {
                *acc = merge(&key[..], &acc[..], &value[..]).map_err(Error::MergeFunction)?;
                continue;
            }
        }
        out.push((key, value));
    }

    Ok(out)
}

/// Final merged output of a `Sorter`.
#[derive(Debug)]
pub struct SortedIter {
    // Declared before `spill` so the readers close before their files go.
    iter: MergeIter,
    spill: SpillDir,
}

impl Iterator for SortedIter {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.iter.next();
        if next.is_none() {
            self.spill.clear();
        }
        next
    }
}

impl std::iter::FusedIterator for SortedIter {}
