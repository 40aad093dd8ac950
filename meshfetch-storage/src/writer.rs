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

//! Record writer
//!
//! Writes records to a store file, one frame per record, with an optional
//! index sidecar. Records are run through the filter chain first; rejected
//! records produce no bytes.
//!
//! A writer opened in [`WriteMode::Create`] owns its output: if it is dropped
//! without [`RecordWriter::finish`] (an error was propagated, the task was
//! cancelled, or a panic unwound through it), the data and index files are
//! deleted. [`WriteMode::Append`] writers keep whatever was written.

use crate::codec::{Dictionary, RecordCodec, DEFAULT_LEVEL};
use crate::error::{Result, StoreError};
use crate::index::{index_path, LogEntry};
use meshfetch_core::{keep_all, Record, RecordKey, RecordPredicate};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Truncate existing files; delete them on failure
    Create,
    /// Append to existing files; keep them on failure
    Append,
}

#[derive(Clone)]
pub struct WriterOptions {
    pub mode: WriteMode,
    pub compressed: bool,
    /// Write the index sidecar of a compressed store (default on).
    /// Plain stores are never indexed.
    pub index: Option<bool>,
    pub level: i32,
    pub dictionary: Option<Dictionary>,
    pub filters: Vec<RecordPredicate>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            mode: WriteMode::Create,
            compressed: false,
            index: None,
            level: DEFAULT_LEVEL,
            dictionary: None,
            filters: Vec::new(),
        }
    }
}

impl WriterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn with_index(mut self, index: bool) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn with_dictionary(mut self, dictionary: Option<Dictionary>) -> Self {
        self.dictionary = dictionary;
        self
    }

    pub fn with_filter(mut self, filter: RecordPredicate) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_filters(mut self, filters: impl IntoIterator<Item = RecordPredicate>) -> Self {
        self.filters.extend(filters);
        self
    }

    fn index_enabled(&self) -> bool {
        self.compressed && self.index.unwrap_or(true)
    }
}

/// Counters of a finished writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub written: u64,
    pub filtered: u64,
    pub bytes: u64,
}

pub struct RecordWriter {
    path: PathBuf,
    index_path: Option<PathBuf>,
    mode: WriteMode,
    codec: RecordCodec,
    filters: Vec<RecordPredicate>,
    data: Option<BufWriter<File>>,
    index: Option<BufWriter<File>>,
    stats: WriterStats,
    finished: bool,
}

impl RecordWriter {
    pub fn open(path: impl AsRef<Path>, options: WriterOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let codec = if options.compressed {
            RecordCodec::compressed(options.level, options.dictionary.clone())?
        } else {
            RecordCodec::plain()
        };

        let index_path = options.index_enabled().then(|| index_path(&path));
        if options.mode == WriteMode::Append {
            if let Some(index_path) = &index_path {
                let has_data = fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
                if has_data && !index_path.exists() {
                    tracing::warn!(
                        "Appending to {:?} which has no index; \
                         the new index will not cover earlier frames",
                        path
                    );
                }
            }
        }

        // Built before opening so a partial open is cleaned up by Drop.
        let mut writer = Self {
            path,
            index_path,
            mode: options.mode,
            codec,
            filters: options.filters,
            data: None,
            index: None,
            stats: WriterStats::default(),
            finished: false,
        };
        writer.data = Some(BufWriter::new(open_file(&writer.path, writer.mode)?));
        if let Some(index_path) = &writer.index_path {
            writer.index = Some(BufWriter::new(open_file(index_path, writer.mode)?));
        }

        tracing::debug!(
            "Opened {:?} ({:?}, {:?})",
            writer.path,
            writer.mode,
            writer.codec.format()
        );
        Ok(writer)
    }

    /// Open a writer, run `f` on it, and finish it.
    ///
    /// When `f` fails, the writer is discarded (and in create mode its
    /// files deleted) before the error is returned.
    pub fn scoped<T, E, F>(
        path: impl AsRef<Path>,
        options: WriterOptions,
        f: F,
    ) -> std::result::Result<(T, WriterStats), E>
    where
        F: FnOnce(&mut RecordWriter) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let mut writer = Self::open(path, options)?;
        let value = f(&mut writer)?;
        let stats = writer.finish()?;
        Ok((value, stats))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Write one record. Returns `false` if a filter rejected it.
    pub fn write(&mut self, record: &Record) -> Result<bool> {
        if !keep_all(&self.filters, record) {
            self.stats.filtered += 1;
            return Ok(false);
        }

        let frame = self.codec.encode(record)?;

        if let Some(index) = self.index.as_mut() {
            let key = RecordKey::extract(record).ok_or_else(|| StoreError::MissingKey {
                path: self.path.clone(),
            })?;
            LogEntry::new(frame.len() as u64, key).write_to(index)?;
        }

        if let Some(data) = self.data.as_mut() {
            data.write_all(&frame)?;
        }
        self.stats.written += 1;
        self.stats.bytes += frame.len() as u64;
        Ok(true)
    }

    /// Write every record; returns the number actually written.
    pub fn write_all<'a, I>(&mut self, records: I) -> Result<u64>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let before = self.stats.written;
        for record in records {
            self.write(record)?;
        }
        Ok(self.stats.written - before)
    }

    /// Flush and close the files, keeping them.
    pub fn finish(mut self) -> Result<WriterStats> {
        if let Some(mut data) = self.data.take() {
            data.flush()?;
        }
        if let Some(mut index) = self.index.take() {
            index.flush()?;
        }
        self.finished = true;
        tracing::debug!(
            "Closed {:?}: {} written, {} filtered, {} bytes",
            self.path,
            self.stats.written,
            self.stats.filtered,
            self.stats.bytes
        );
        Ok(self.stats)
    }

    fn discard(&mut self) {
        self.data = None;
        self.index = None;
        if let Err(e) = remove_store(&self.path) {
            tracing::warn!("Failed to remove incomplete {:?}: {}", self.path, e);
        } else {
            tracing::debug!("Removed incomplete {:?}", self.path);
        }
    }
}

impl Drop for RecordWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.mode {
            WriteMode::Create => self.discard(),
            WriteMode::Append => {
                for file in [self.data.as_mut(), self.index.as_mut()].into_iter().flatten() {
                    if let Err(e) = file.flush() {
                        tracing::warn!("Failed to flush {:?}: {}", self.path, e);
                    }
                }
            }
        }
    }
}

fn open_file(path: &Path, mode: WriteMode) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        WriteMode::Create => options.write(true).truncate(true),
        WriteMode::Append => options.append(true),
    };
    options.open(path)
}

/// Delete a store file and its index, ignoring missing files.
pub fn remove_store(path: &Path) -> std::io::Result<()> {
    for target in [path.to_path_buf(), index_path(path)] {
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
