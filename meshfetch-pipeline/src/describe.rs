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

//! Store summaries for `meshfetch describe`

use crate::error::Result;
use meshfetch_core::{error_chain, RecordKey, ResultsMeta};
use meshfetch_storage::index::INDEX_SUFFIX;
use meshfetch_storage::{
    glob_files, index_path, Dictionary, IndexedStore, ReaderOptions, RecordReader, StoreFormat,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSummary {
    pub path: PathBuf,
    /// Parsed from the file name, when it is a results file
    pub meta: Option<ResultsMeta>,
    pub format: StoreFormat,
    pub records: usize,
    pub probes: usize,
    /// Counts came from the index rather than a full scan
    pub indexed: bool,
}

/// Summarize one store, using its index when present and valid.
pub fn describe_file(path: &Path, dictionary: Option<&Dictionary>) -> Result<StoreSummary> {
    let meta = ResultsMeta::from_filename(path).ok();
    let format = StoreFormat::detect(path)?;

    if index_path(path).exists() {
        match IndexedStore::open(path, dictionary.cloned()) {
            Ok(store) => {
                return Ok(StoreSummary {
                    path: path.to_path_buf(),
                    meta,
                    format,
                    records: store.len(),
                    probes: store.probe_ids().len(),
                    indexed: true,
                })
            }
            Err(e) => tracing::warn!("Ignoring index of {:?}: {}", path, error_chain(&e)),
        }
    }

    let options = ReaderOptions::new().with_dictionary(dictionary.cloned());
    let reader = RecordReader::open(path, options)?;
    let mut records = 0;
    let mut probes = BTreeSet::new();
    for record in reader.records() {
        records += 1;
        if let Some(key) = RecordKey::extract(&record) {
            probes.insert(key.prb_id);
        }
    }

    Ok(StoreSummary {
        path: path.to_path_buf(),
        meta,
        format,
        records,
        probes: probes.len(),
        indexed: false,
    })
}

/// Summarize a store file, or every store in a directory.
pub fn describe_path(path: &Path, dictionary: Option<&Dictionary>) -> Result<Vec<StoreSummary>> {
    if !path.is_dir() {
        return Ok(vec![describe_file(path, dictionary)?]);
    }
    glob_files(path, "*.ndjson*")?
        .into_iter()
        .filter(|p| !p.to_string_lossy().ends_with(INDEX_SUFFIX))
        .map(|p| describe_file(&p, dictionary))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshfetch_storage::{RecordWriter, WriterOptions};
    use serde_json::json;
    use tempfile::TempDir;

    fn write(path: &Path, compressed: bool) {
        let records: Vec<_> = [1, 2, 2, 3]
            .into_iter()
            .map(|prb| json!({"msm_id": 1001, "prb_id": prb}))
            .collect();
        let options = WriterOptions::new().compressed(compressed);
        let mut writer = RecordWriter::open(path, options).unwrap();
        writer.write_all(&records).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_describe_indexed_and_plain() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("ping_v4_1546300800_1546304400_1001.ndjson.zst"), true);
        write(&dir.path().join("notes.ndjson"), false);

        let summaries = describe_path(dir.path(), None).unwrap();
        assert_eq!(summaries.len(), 2);

        let plain = &summaries[0];
        assert!(plain.meta.is_none());
        assert!(!plain.indexed);
        assert_eq!((plain.records, plain.probes), (4, 3));

        let compressed = &summaries[1];
        assert_eq!(compressed.meta.map(|m| m.msm_id), Some(1001));
        assert_eq!(compressed.format, StoreFormat::Compressed);
        assert!(compressed.indexed);
        assert_eq!((compressed.records, compressed.probes), (4, 3));
    }
}
