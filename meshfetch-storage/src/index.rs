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

//! Frame index ("log") file
//!
//! Sidecar of a store file, named `<datafile>.log`. One fixed-size entry per
//! written frame, in write order:
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┐
//! │ frame_len u64│  msm_id u64  │  prb_id u64  │   little-endian, 24 bytes
//! └──────────────┴──────────────┴──────────────┘
//! ```
//!
//! The offset of frame `i` is the sum of the lengths of frames `0..i`.

use crate::error::{Result, StoreError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use meshfetch_core::RecordKey;
use std::ffi::OsString;
use std::fs;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

pub const INDEX_SUFFIX: &str = ".log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogEntry {
    pub frame_len: u64,
    pub msm_id: u64,
    pub prb_id: u64,
}

impl LogEntry {
    pub const SIZE: usize = 24;

    pub fn new(frame_len: u64, key: RecordKey) -> Self {
        Self {
            frame_len,
            msm_id: key.msm_id,
            prb_id: key.prb_id,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.msm_id, self.prb_id)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.frame_len)?;
        writer.write_u64::<LittleEndian>(self.msm_id)?;
        writer.write_u64::<LittleEndian>(self.prb_id)?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            frame_len: reader.read_u64::<LittleEndian>()?,
            msm_id: reader.read_u64::<LittleEndian>()?,
            prb_id: reader.read_u64::<LittleEndian>()?,
        })
    }
}

/// `<datafile>.log`
pub fn index_path(data_path: &Path) -> PathBuf {
    let mut name = OsString::from(data_path.as_os_str());
    name.push(INDEX_SUFFIX);
    PathBuf::from(name)
}

/// Read every entry of an index file.
pub fn read_index(path: &Path) -> Result<Vec<LogEntry>> {
    let len = fs::metadata(path)?.len();
    if len % LogEntry::SIZE as u64 != 0 {
        return Err(StoreError::CorruptIndex {
            path: path.to_path_buf(),
            len,
        });
    }

    let count = (len / LogEntry::SIZE as u64) as usize;
    let mut reader = BufReader::new(fs::File::open(path)?);
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(LogEntry::read_from(&mut reader)?);
    }
    Ok(entries)
}

/// Cumulative byte offsets of each frame.
pub fn frame_offsets(entries: &[LogEntry]) -> Vec<u64> {
    entries
        .iter()
        .scan(0u64, |offset, entry| {
            let start = *offset;
            *offset += entry.frame_len;
            Some(start)
        })
        .collect()
}
