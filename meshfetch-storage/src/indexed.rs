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

//! Random access to an indexed store
//!
//! Uses the `.log` sidecar to locate individual frames without decoding
//! the frames before them.

use crate::codec::{Dictionary, RecordCodec, StoreFormat, DEFAULT_LEVEL};
use crate::error::{Result, StoreError};
use crate::index::{frame_offsets, index_path, read_index, LogEntry};
use meshfetch_core::Record;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub struct IndexedStore {
    path: PathBuf,
    file: File,
    codec: RecordCodec,
    entries: Vec<LogEntry>,
    offsets: Vec<u64>,
}

impl IndexedStore {
    /// Open a store and its index. The index must cover the data file exactly.
    pub fn open(path: impl AsRef<Path>, dictionary: Option<Dictionary>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = read_index(&index_path(&path))?;
        let offsets = frame_offsets(&entries);

        let indexed: u64 = entries.iter().map(|e| e.frame_len).sum();
        let actual = fs::metadata(&path)?.len();
        if indexed != actual {
            return Err(StoreError::IndexMismatch {
                path,
                indexed,
                actual,
            });
        }

        let format = StoreFormat::detect(&path)?;
        let codec = RecordCodec::for_format(format, DEFAULT_LEVEL, dictionary)?;
        let file = File::open(&path)?;

        Ok(Self {
            path,
            file,
            codec,
            entries,
            offsets,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Byte offset of frame `i` in the data file
    pub fn offset_of(&self, i: usize) -> Option<u64> {
        self.offsets.get(i).copied()
    }

    /// Raw bytes of frame `i`
    pub fn frame(&mut self, i: usize) -> Result<Option<Vec<u8>>> {
        let (Some(offset), Some(entry)) = (self.offset_of(i), self.entries.get(i)) else {
            return Ok(None);
        };
        let mut buf = vec![0u8; entry.frame_len as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(Some(buf))
    }

    /// Decode record `i`. Out-of-range and undecodable frames yield `None`.
    pub fn get(&mut self, i: usize) -> Result<Option<Record>> {
        Ok(self.frame(i)?.and_then(|frame| self.codec.decode(&frame)))
    }

    /// Distinct probe ids present in the store
    pub fn probe_ids(&self) -> BTreeSet<u64> {
        self.entries.iter().map(|e| e.prb_id).collect()
    }

    /// Decoded records of one probe, in write order.
    pub fn records_for_probe(&mut self, prb_id: u64) -> Result<Vec<Record>> {
        let positions: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.prb_id == prb_id)
            .map(|(i, _)| i)
            .collect();

        let mut records = Vec::with_capacity(positions.len());
        for i in positions {
            if let Some(record) = self.get(i)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Frame count per (msm_id, prb_id) pair.
    pub fn counts_by_key(&self) -> BTreeMap<(u64, u64), usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry((entry.msm_id, entry.prb_id)).or_insert(0) += 1;
        }
        counts
    }
}
