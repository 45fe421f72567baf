use bytes::Bytes;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::Path;
use tablekit::merge::func;
use tablekit::{
    varint, Compression, Direction, Entry, Merger, Reader, Result, Sorter, SorterOptions, Writer,
    WriterOptions,
};
use tempfile::tempdir;

fn write_table(path: &Path, options: WriterOptions, entries: &BTreeMap<Vec<u8>, Vec<u8>>) {
    let mut writer = Writer::create(path, options).unwrap();
    for (key, value) in entries {
        writer.add(key.clone(), value.clone()).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn test_million_keys_block_layout() {
    const THRESHOLD: usize = 64 * 1024;
    const KEYS: u64 = 1_000_000;

    let dir = tempdir().unwrap();
    let path = dir.path().join("million");
    let options = WriterOptions::default()
        .compression(Compression::Snappy)
        .block_size(THRESHOLD);

    let mut writer = Writer::create(&path, options).unwrap();
    let value = Bytes::from(vec![b'v'; 20]);
    for i in 0..KEYS {
        writer.add(format!("{i:010}"), value.clone()).unwrap();
    }
    writer.finalize().unwrap();

    let reader = Reader::open(&path).unwrap();
    assert_eq!(reader.len(), KEYS);
    // Every entry takes 1 + 10 + 1 + 20 = 32 bytes, so blocks fill up exactly.
    assert_eq!(reader.data_size(), KEYS * 32);
    let expected_blocks = reader.data_size().div_ceil(THRESHOLD as u64);
    assert_eq!(reader.block_count() as u64, expected_blocks);
    assert_eq!(reader.block_count(), 489);

    let mut prev_last: Option<Bytes> = None;
    let mut total = 0;
    for i in 0..reader.block_count() {
        let block = reader.read_block(i).unwrap();
        let first = Bytes::copy_from_slice(block.first_key().unwrap());
        let last = Bytes::copy_from_slice(block.last_key().unwrap());
        assert!(first <= last);
        if let Some(prev) = prev_last {
            assert!(prev < first, "block {i} overlaps its predecessor");
        }
        prev_last = Some(last);
        total += block.len();
    }
    assert_eq!(total as u64, KEYS);

    assert_eq!(reader.get(b"0000999999").unwrap(), Some(value.clone()));
    assert_eq!(reader.get(b"0001000000").unwrap(), None);
    let tail: Vec<Bytes> = reader
        .iterate(Some(b"0000999997"), Direction::Forward)
        .map(|e| e.unwrap().0)
        .collect();
    assert_eq!(tail, vec!["0000999997", "0000999998", "0000999999"]);
}

#[test]
fn test_truncated_table_fails_to_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("truncated");
    let entries: BTreeMap<Vec<u8>, Vec<u8>> = (0..10_000u32)
        .map(|i| (format!("key-{i:06}").into_bytes(), i.to_le_bytes().to_vec()))
        .collect();
    write_table(&path, WriterOptions::default(), &entries);

    let len = std::fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len / 2).unwrap();
    drop(file);

    let err = Reader::open(&path).unwrap_err();
    assert!(err.is_format_error(), "{err}");

    // Shorter than a trailer.
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(10).unwrap();
    drop(file);
    let err = Reader::open(&path).unwrap_err();
    assert!(err.is_format_error(), "{err}");
}

#[test]
fn test_trailing_bytes_lost() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("short");
    let entries: BTreeMap<Vec<u8>, Vec<u8>> = (0..100u32)
        .map(|i| (format!("{i:03}").into_bytes(), vec![b'x'; 10]))
        .collect();
    write_table(&path, WriterOptions::default(), &entries);

    // Dropping the tail cuts off the trailer, the rest is not a table.
    let data = std::fs::read(&path).unwrap();
    std::fs::write(&path, &data[..data.len() - 1]).unwrap();
    let err = Reader::open(&path).unwrap_err();
    assert!(err.is_format_error(), "{err}");
}

/// Word counts split over several sorters, one table each, then merged into one.
#[test]
fn test_sort_then_merge_pipeline() {
    let dir = tempdir().unwrap();
    let texts = [
        "the quick brown fox jumps over the lazy dog",
        "the dog barks and the fox runs",
        "a lazy afternoon for the dog",
    ];

    let mut expected: BTreeMap<String, u64> = BTreeMap::new();
    let mut tables = Vec::new();
    for (n, text) in texts.iter().enumerate() {
        let options = SorterOptions::default()
            .temp_dir(dir.path())
            .max_memory(32);
        let mut sorter = Sorter::new(options, func::varint_sum);
        for word in text.split_whitespace() {
            *expected.entry(word.to_string()).or_default() += 1;
            sorter.put(word.to_string(), varint::encode(1)).unwrap();
        }

        let path = dir.path().join(format!("part-{n}"));
        let mut writer = Writer::create(&path, WriterOptions::default()).unwrap();
        sorter.finish(&mut writer).unwrap();
        writer.finalize().unwrap();
        tables.push(Reader::open(&path).unwrap());
    }

    let mut merger = Merger::new(func::varint_sum);
    for table in &tables {
        merger.add_reader(table);
    }
    let path = dir.path().join("total");
    let mut writer = Writer::create(&path, WriterOptions::default()).unwrap();
    let written = merger.write(&mut writer).unwrap();
    writer.finalize().unwrap();
    assert_eq!(written, expected.len() as u64);

    let total = Reader::open(&path).unwrap();
    let counts: BTreeMap<String, u64> = total
        .iter()
        .map(|e| {
            let (k, v) = e.unwrap();
            (
                String::from_utf8(k.to_vec()).unwrap(),
                varint::decode(&v).unwrap().0,
            )
        })
        .collect();
    assert_eq!(counts, expected);
    assert_eq!(
        total.get(b"the").unwrap(),
        Some(Bytes::from(varint::encode(5)))
    );

    // Only the part tables and the total are left behind.
    let mut files: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files, vec!["part-0", "part-1", "part-2", "total"]);
}

#[test]
fn test_merge_pull_matches_push() {
    let dir = tempdir().unwrap();
    let mut readers = Vec::new();
    for n in 0..4u32 {
        let entries: BTreeMap<Vec<u8>, Vec<u8>> = (0..500u32)
            .filter(|i| i % (n + 2) == 0)
            .map(|i| (format!("{i:04}").into_bytes(), n.to_string().into_bytes()))
            .collect();
        let path = dir.path().join(n.to_string());
        write_table(&path, WriterOptions::default().block_size(256), &entries);
        readers.push(Reader::open(&path).unwrap());
    }

    let merger = || {
        let mut merger = Merger::new(func::concat_with(","));
        for reader in &readers {
            merger.add_reader(reader);
        }
        merger
    };

    let pulled: Vec<Entry> = merger().iter().collect::<Result<_>>().unwrap();
    let mut pushed: Vec<Entry> = Vec::new();
    merger().write(&mut pushed).unwrap();
    assert_eq!(pulled, pushed);

    // 0 is divisible by everything, so all four tables contribute in order.
    assert_eq!(pulled[0], (Bytes::from("0000"), Bytes::from("0,1,2,3")));
    assert!(pulled.windows(2).all(|w| w[0].0 < w[1].0));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_round_trip(
        entries in prop::collection::btree_map(
            prop::collection::vec(any::<u8>(), 1..16),
            prop::collection::vec(any::<u8>(), 0..64),
            0..300,
        ),
        queries in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..16), 0..50),
        block_size in 1usize..512,
        compression in prop::sample::select(vec![
            Compression::None,
            Compression::Snappy,
            Compression::Zlib,
            Compression::Lz4,
            Compression::Zstd,
        ]),
    ) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table");
        let options = WriterOptions::default().compression(compression).block_size(block_size);
        write_table(&path, options, &entries);

        let reader = Reader::open(&path).unwrap();
        prop_assert_eq!(reader.len(), entries.len() as u64);

        for (key, value) in &entries {
            prop_assert_eq!(reader.get(key).unwrap(), Some(Bytes::from(value.clone())));
        }
        for query in &queries {
            let expected = entries.get(query).map(|v| Bytes::from(v.clone()));
            prop_assert_eq!(reader.get(query).unwrap(), expected);
        }

        let forward: Vec<(Vec<u8>, Vec<u8>)> = reader
            .iter()
            .map(|e| e.map(|(k, v)| (k.to_vec(), v.to_vec())))
            .collect::<Result<_>>()
            .unwrap();
        let expected: Vec<(Vec<u8>, Vec<u8>)> = entries.clone().into_iter().collect();
        prop_assert_eq!(&forward, &expected);

        let mut backward: Vec<(Vec<u8>, Vec<u8>)> = reader
            .iterate(None, Direction::Backward)
            .map(|e| e.map(|(k, v)| (k.to_vec(), v.to_vec())))
            .collect::<Result<_>>()
            .unwrap();
        backward.reverse();
        prop_assert_eq!(&backward, &expected);

        for query in &queries {
            let from: Vec<Vec<u8>> = reader
                .iterate(Some(query.as_slice()), Direction::Forward)
                .map(|e| e.unwrap().0.to_vec())
                .collect();
            let expected: Vec<Vec<u8>> = entries.range(query.clone()..).map(|(k, _)| k.clone()).collect();
            prop_assert_eq!(from, expected);

            let from: Vec<Vec<u8>> = reader
                .iterate(Some(query.as_slice()), Direction::Backward)
                .map(|e| e.unwrap().0.to_vec())
                .collect();
            let expected: Vec<Vec<u8>> = entries
                .range(..=query.clone())
                .rev()
                .map(|(k, _)| k.clone())
                .collect();
            prop_assert_eq!(from, expected);
        }
    }
}
