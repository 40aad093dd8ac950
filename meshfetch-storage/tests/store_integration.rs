// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Integration tests for the record store

use meshfetch_core::{PingMinimumTransform, ProbeIdFilter, Record};
use meshfetch_storage::{
    index_path, read_all, read_glob, read_index, Dictionary, IndexedStore, ReaderOptions,
    RecordReader, RecordWriter, StoreError, StoreFormat, WriteMode, WriterOptions,
};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn result(msm_id: u64, prb_id: u64, min: f64) -> Record {
    json!({
        "type": "ping",
        "msm_id": msm_id,
        "prb_id": prb_id,
        "timestamp": 1546300800,
        "min": min,
        "result": [{"rtt": min}],
    })
}

fn write_records(path: &Path, options: WriterOptions, records: &[Record]) {
    let mut writer = RecordWriter::open(path, options).unwrap();
    writer.write_all(records).unwrap();
    writer.finish().unwrap();
}

fn read_records(path: &Path) -> Vec<Record> {
    RecordReader::open(path, ReaderOptions::new()).unwrap().collect()
}

/// Zero, one, and many records read back identically in both formats
#[test]
fn test_roundtrip_both_formats() {
    let dir = TempDir::new().unwrap();
    for count in [0u64, 1, 25] {
        let records: Vec<Record> = (0..count).map(|i| result(1001, i, i as f64)).collect();
        for compressed in [false, true] {
            let path = dir.path().join(format!("{}_{}.ndjson", count, compressed));
            write_records(&path, WriterOptions::new().compressed(compressed), &records);
            assert_eq!(read_records(&path), records, "count={} compressed={}", count, compressed);
        }
    }
}

/// Compressed store decompresses to the plain format byte for byte
#[test]
fn test_compressed_stream_is_plain_ndjson() {
    let dir = TempDir::new().unwrap();
    let records: Vec<Record> = (0..10).map(|i| result(1001, i, 1.0)).collect();
    let plain = dir.path().join("a.ndjson");
    let compressed = dir.path().join("a.ndjson.zst");
    write_records(&plain, WriterOptions::new(), &records);
    write_records(&compressed, WriterOptions::new().compressed(true), &records);

    let decoded = zstd::stream::decode_all(fs::File::open(&compressed).unwrap()).unwrap();
    assert_eq!(decoded, fs::read(&plain).unwrap());
}

/// Writing a batch and writing one by one produce the same bytes
#[test]
fn test_batch_and_single_writes_identical() {
    let dir = TempDir::new().unwrap();
    let records: Vec<Record> = (0..10).map(|i| result(1001, i, 2.5)).collect();
    let batch = dir.path().join("batch.ndjson.zst");
    let single = dir.path().join("single.ndjson.zst");

    write_records(&batch, WriterOptions::new().compressed(true), &records);

    let mut writer = RecordWriter::open(&single, WriterOptions::new().compressed(true)).unwrap();
    for record in &records {
        writer.write(record).unwrap();
    }
    writer.finish().unwrap();

    assert_eq!(fs::read(&batch).unwrap(), fs::read(&single).unwrap());
    assert_eq!(fs::read(index_path(&batch)).unwrap(), fs::read(index_path(&single)).unwrap());
}

/// Index entries cover every frame with its key
#[test]
fn test_index_matches_frames() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x.ndjson.zst");
    let records: Vec<Record> = (0..5).map(|i| result(1001, 6000 + i, 1.0)).collect();
    write_records(&path, WriterOptions::new().compressed(true), &records);

    let entries = read_index(&index_path(&path)).unwrap();
    assert_eq!(entries.len(), 5);
    let total: u64 = entries.iter().map(|e| e.frame_len).sum();
    assert_eq!(total, fs::metadata(&path).unwrap().len());
    assert!(entries.iter().all(|e| e.msm_id == 1001));
    assert_eq!(entries[3].prb_id, 6003);
}

/// Random access by index returns the right record
#[test]
fn test_indexed_random_access() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x.ndjson.zst");
    let records: Vec<Record> = (0..20).map(|i| result(1001, 6000 + i % 4, i as f64)).collect();
    write_records(&path, WriterOptions::new().compressed(true), &records);

    let mut store = IndexedStore::open(&path, None).unwrap();
    assert_eq!(store.len(), 20);
    assert_eq!(store.get(7).unwrap(), Some(records[7].clone()));
    assert_eq!(store.get(0).unwrap(), Some(records[0].clone()));
    assert_eq!(store.get(20).unwrap(), None);

    let probe = store.records_for_probe(6001).unwrap();
    assert_eq!(probe.len(), 5);
    assert!(probe.iter().all(|r| r["prb_id"] == 6001));
    assert_eq!(store.counts_by_key().get(&(1001, 6002)), Some(&5));
    assert_eq!(store.probe_ids().len(), 4);
    assert_eq!(store.offset_of(0), Some(0));
}

/// Random access rejects an index that does not cover the data file
#[test]
fn test_indexed_rejects_stale_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x.ndjson.zst");
    write_records(&path, WriterOptions::new().compressed(true), &[result(1, 1, 1.0)]);

    // Append without the index.
    write_records(
        &path,
        WriterOptions::new().compressed(true).mode(WriteMode::Append).with_index(false),
        &[result(1, 2, 1.0)],
    );

    assert!(matches!(
        IndexedStore::open(&path, None),
        Err(StoreError::IndexMismatch { .. })
    ));
}

/// A shared dictionary is needed for reading and works across frames
#[test]
fn test_dictionary_store() {
    let dir = TempDir::new().unwrap();
    let samples: Vec<Record> = (0..300).map(|i| result(1001, i, i as f64 / 3.0)).collect();
    let dict = Dictionary::train(&samples, 8 * 1024).unwrap();
    let dict_path = dir.path().join("ping.dict");
    dict.save(&dict_path).unwrap();
    let dict = Dictionary::load(&dict_path).unwrap();

    let path = dir.path().join("x.ndjson.zst");
    write_records(
        &path,
        WriterOptions::new().compressed(true).with_dictionary(Some(dict.clone())),
        &samples[..50],
    );

    let options = ReaderOptions::new().with_dictionary(Some(dict.clone()));
    let records: Vec<Record> = RecordReader::open(&path, options).unwrap().collect();
    assert_eq!(records, samples[..50].to_vec());

    let mut store = IndexedStore::open(&path, Some(dict)).unwrap();
    assert_eq!(store.get(49).unwrap(), Some(samples[49].clone()));
}

/// Rejected records produce zero bytes
#[test]
fn test_filtered_records_write_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x.ndjson.zst");
    let options = WriterOptions::new()
        .compressed(true)
        .with_filter(Arc::new(ProbeIdFilter::new([42])));

    let mut writer = RecordWriter::open(&path, options).unwrap();
    writer
        .write_all(&[result(1, 1, 1.0), result(1, 2, 1.0), result(1, 3, 1.0)])
        .unwrap();
    let stats = writer.finish().unwrap();

    assert_eq!(stats.written, 0);
    assert_eq!(stats.filtered, 3);
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    assert_eq!(fs::metadata(index_path(&path)).unwrap().len(), 0);
}

/// Failure inside a create-mode scope deletes the store and its index
#[test]
fn test_scoped_create_failure_removes_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x.ndjson.zst");

    let outcome: Result<((), _), StoreError> =
        RecordWriter::scoped(&path, WriterOptions::new().compressed(true), |writer| {
            writer.write(&result(1, 1, 1.0))?;
            Err(StoreError::Dictionary("interrupted".into()))
        });

    assert!(outcome.is_err());
    assert!(!path.exists());
    assert!(!index_path(&path).exists());
}

/// Failure inside an append-mode scope keeps earlier and partial data
#[test]
fn test_scoped_append_failure_keeps_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x.ndjson");
    write_records(&path, WriterOptions::new(), &[result(1, 1, 1.0)]);

    let outcome: Result<((), _), StoreError> =
        RecordWriter::scoped(&path, WriterOptions::new().mode(WriteMode::Append), |writer| {
            writer.write(&result(1, 2, 1.0))?;
            Err(StoreError::Dictionary("interrupted".into()))
        });

    assert!(outcome.is_err());
    assert_eq!(read_records(&path).len(), 2);
}

/// A panic inside a create-mode scope still removes the files
#[test]
fn test_panic_removes_created_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x.ndjson.zst");
    let panic_path = path.clone();

    let outcome = std::panic::catch_unwind(move || {
        let _: Result<((), _), StoreError> =
            RecordWriter::scoped(&panic_path, WriterOptions::new().compressed(true), |writer| {
                writer.write(&result(1, 1, 1.0))?;
                panic!("worker died");
            });
    });

    assert!(outcome.is_err());
    assert!(!path.exists());
    assert!(!index_path(&path).exists());
}

/// Append mode adds to existing content
#[test]
fn test_append_mode_extends() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x.ndjson.zst");
    let first: Vec<Record> = (0..3).map(|i| result(1, i, 1.0)).collect();
    let second: Vec<Record> = (3..5).map(|i| result(1, i, 1.0)).collect();

    write_records(&path, WriterOptions::new().compressed(true), &first);
    write_records(&path, WriterOptions::new().compressed(true).mode(WriteMode::Append), &second);

    let all = read_records(&path);
    assert_eq!(all, [first, second].concat());
    assert_eq!(IndexedStore::open(&path, None).unwrap().len(), 5);
}

/// Reading applies filters before transforms
#[test]
fn test_reader_filters_then_transforms() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x.ndjson");
    write_records(
        &path,
        WriterOptions::new(),
        &[result(1, 1, 1.0), result(1, 2, 2.0), result(1, 3, 3.0)],
    );

    // The transform drops prb_id, so the filter must see the original record.
    let options = ReaderOptions::new()
        .with_filter(Arc::new(ProbeIdFilter::new([2])))
        .with_transform(Arc::new(PingMinimumTransform));
    let records: Vec<Record> = RecordReader::open(&path, options).unwrap().collect();

    assert_eq!(records, vec![json!({"timestamp": 1546300800, "min": 2.0})]);
}

/// Multiple files and formats are concatenated in order
#[test]
fn test_read_all_and_glob() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("ping_a.ndjson");
    let b = dir.path().join("ping_b.ndjson.zst");
    write_records(&a, WriterOptions::new(), &[result(1, 1, 1.0)]);
    write_records(&b, WriterOptions::new().compressed(true), &[result(1, 2, 1.0)]);
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    assert_eq!(StoreFormat::detect(&b).unwrap(), StoreFormat::Compressed);

    let records: Vec<Record> = read_all([&b, &a], ReaderOptions::new())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(records, vec![result(1, 2, 1.0), result(1, 1, 1.0)]);

    let globbed: Vec<Record> = read_glob(dir.path(), "ping_*.ndjson*", ReaderOptions::new())
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(globbed, vec![result(1, 1, 1.0), result(1, 2, 1.0)]);
}

/// A corrupt frame in an indexed store costs only its own record
#[test]
fn test_corrupt_frame_skipped_with_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x.ndjson.zst");
    let records: Vec<Record> = (0..5).map(|i| result(1001, i, i as f64)).collect();
    write_records(
        &path,
        WriterOptions::new().compressed(true).with_index(true),
        &records,
    );

    let entries = read_index(&index_path(&path)).unwrap();
    let mut data = fs::read(&path).unwrap();
    data[entries[0].frame_len as usize] ^= 0xFF;
    fs::write(&path, &data).unwrap();

    let mut reader = RecordReader::open(&path, ReaderOptions::new()).unwrap();
    assert!(reader.is_indexed());
    let read: Vec<Record> = reader.by_ref().collect();
    assert_eq!(read.len(), 4);
    assert!(!read.contains(&records[1]));
    assert_eq!(read[0], records[0]);
    assert_eq!(read[1..], records[2..]);
    assert_eq!(reader.skipped(), 1);

    // Without the index the stream cannot resynchronise past the bad frame.
    fs::remove_file(index_path(&path)).unwrap();
    let reader = RecordReader::open(&path, ReaderOptions::new()).unwrap();
    assert!(!reader.is_indexed());
    assert!(reader.count() < 5);
}

/// An index that does not cover the data file is ignored by sequential reads
#[test]
fn test_reader_ignores_stale_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x.ndjson.zst");
    let records: Vec<Record> = (0..3).map(|i| result(1001, i, 1.0)).collect();
    write_records(
        &path,
        WriterOptions::new().compressed(true).with_index(true),
        &records,
    );
    let index = fs::read(index_path(&path)).unwrap();
    fs::write(index_path(&path), &index[..index.len() - 24]).unwrap();

    let reader = RecordReader::open(&path, ReaderOptions::new()).unwrap();
    assert!(!reader.is_indexed());
    assert_eq!(reader.collect::<Vec<_>>(), records);
}

/// Files are opened only when iteration reaches them
#[test]
fn test_files_open_on_demand() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.ndjson");
    let b = dir.path().join("b.ndjson");
    write_records(&a, WriterOptions::new(), &[result(1, 1, 1.0)]);

    let mut reader = read_all([&a, &b], ReaderOptions::new());
    assert_eq!(reader.next().unwrap().unwrap(), result(1, 1, 1.0));

    // `b` did not exist when the reader was built.
    write_records(&b, WriterOptions::new(), &[result(1, 2, 1.0)]);
    assert_eq!(reader.next().unwrap().unwrap(), result(1, 2, 1.0));
    assert!(reader.next().is_none());
}
