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

//! Sequential record reader
//!
//! The container format is detected from the file header, so plain and
//! compressed files can be mixed. Undecodable records are skipped; filters
//! run before transforms.

use crate::codec::{decode_line, frame_stream, Dictionary, FrameDecoder, StoreFormat};
use crate::error::{Result, StoreError};
use crate::index::{index_path, read_index};
use meshfetch_core::{
    apply_all, error_chain, keep_all, Record, RecordPredicate, RecordTransform,
};
use regex::Regex;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

#[derive(Clone, Default)]
pub struct ReaderOptions {
    pub filters: Vec<RecordPredicate>,
    pub transforms: Vec<RecordTransform>,
    pub dictionary: Option<Dictionary>,
}

impl ReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: RecordPredicate) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_transform(mut self, transform: RecordTransform) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn with_dictionary(mut self, dictionary: Option<Dictionary>) -> Self {
        self.dictionary = dictionary;
        self
    }
}

/// Where decoded lines come from.
enum Source {
    /// Newline-delimited text, plain or from one streaming decompressor.
    Lines {
        reader: Box<dyn BufRead + Send>,
        line: Vec<u8>,
    },
    /// Compressed frames located through the `.log` index, decoded one by one.
    Frames {
        file: BufReader<File>,
        lengths: std::vec::IntoIter<u64>,
        decoder: FrameDecoder,
        frame: Vec<u8>,
    },
}

/// Lazy iterator over the records of one file.
///
/// Compressed files with a matching index are read frame by frame, so a
/// corrupt frame costs only its own record. Without an index a corrupt
/// frame ends the file.
pub struct RecordReader {
    path: PathBuf,
    format: StoreFormat,
    source: Source,
    options: ReaderOptions,
    skipped: u64,
    done: bool,
}

impl RecordReader {
    pub fn open(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let format = StoreFormat::detect(&path)?;
        let file = BufReader::new(File::open(&path)?);
        let source = match format {
            StoreFormat::Plain => Source::Lines {
                reader: Box::new(file),
                line: Vec::new(),
            },
            StoreFormat::Compressed => match indexed_frame_lengths(&path) {
                Some(lengths) => Source::Frames {
                    file,
                    lengths: lengths.into_iter(),
                    decoder: FrameDecoder::new(options.dictionary.as_ref())?,
                    frame: Vec::new(),
                },
                None => Source::Lines {
                    reader: frame_stream(file, options.dictionary.as_ref())?,
                    line: Vec::new(),
                },
            },
        };

        Ok(Self {
            path,
            format,
            source,
            options,
            skipped: 0,
            done: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> StoreFormat {
        self.format
    }

    /// Whether records are located through the frame index
    pub fn is_indexed(&self) -> bool {
        matches!(self.source, Source::Frames { .. })
    }

    /// Lazy, single-pass iterator over the decoded records
    pub fn records(self) -> impl Iterator<Item = Record> {
        self
    }

    /// Records that could not be decoded so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Next raw entry: `None` at the end, `Some(None)` for an undecodable one.
    fn next_decoded(&mut self) -> Option<Option<Record>> {
        match &mut self.source {
            Source::Lines { reader, line } => {
                line.clear();
                match reader.read_until(b'\n', line) {
                    Ok(0) => None,
                    Ok(_) => Some(decode_line(line)),
                    Err(e) => {
                        tracing::warn!("Stopped reading {:?}: {}", self.path, e);
                        None
                    }
                }
            }
            Source::Frames {
                file,
                lengths,
                decoder,
                frame,
            } => {
                let len = lengths.next()?;
                frame.resize(len as usize, 0);
                if let Err(e) = file.read_exact(frame) {
                    tracing::warn!("Stopped reading {:?}: {}", self.path, e);
                    return None;
                }
                Some(decoder.decode(frame))
            }
        }
    }
}

/// Frame lengths from the index of `path`, if it has one covering the file exactly.
fn indexed_frame_lengths(path: &Path) -> Option<Vec<u64>> {
    let index = index_path(path);
    if !index.exists() {
        return None;
    }
    let entries = match read_index(&index) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Ignoring index of {:?}: {}", path, error_chain(&e));
            return None;
        }
    };
    let indexed: u64 = entries.iter().map(|e| e.frame_len).sum();
    let actual = fs::metadata(path).map(|m| m.len()).ok()?;
    if indexed != actual {
        tracing::warn!(
            "Ignoring index of {:?}: covers {} bytes, file has {}",
            path,
            indexed,
            actual
        );
        return None;
    }
    Some(entries.into_iter().map(|e| e.frame_len).collect())
}

impl Iterator for RecordReader {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        while !self.done {
            let Some(decoded) = self.next_decoded() else {
                self.done = true;
                if self.skipped > 0 {
                    tracing::debug!(
                        "Skipped {} undecodable records in {:?}",
                        self.skipped,
                        self.path
                    );
                }
                break;
            };
            let Some(record) = decoded else {
                self.skipped += 1;
                continue;
            };
            if !keep_all(&self.options.filters, &record) {
                continue;
            }
            return Some(apply_all(&self.options.transforms, record));
        }
        None
    }
}

/// Records of several files, in file order.
///
/// Files are opened lazily; a file that cannot be opened yields one `Err`
/// and iteration moves on to the next file.
pub struct MultiFileReader {
    files: std::vec::IntoIter<PathBuf>,
    options: ReaderOptions,
    current: Option<RecordReader>,
}

impl MultiFileReader {
    pub fn new(files: impl IntoIterator<Item = PathBuf>, options: ReaderOptions) -> Self {
        Self {
            files: files.into_iter().collect::<Vec<_>>().into_iter(),
            options,
            current: None,
        }
    }
}

impl Iterator for MultiFileReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(reader) = self.current.as_mut() {
                if let Some(record) = reader.next() {
                    return Some(Ok(record));
                }
                self.current = None;
            }
            let path = self.files.next()?;
            match RecordReader::open(&path, self.options.clone()) {
                Ok(reader) => self.current = Some(reader),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Concatenate the records of `files`, in order.
pub fn read_all<P: AsRef<Path>>(
    files: impl IntoIterator<Item = P>,
    options: ReaderOptions,
) -> MultiFileReader {
    MultiFileReader::new(files.into_iter().map(|p| p.as_ref().to_path_buf()), options)
}

/// Concatenate the records of the files of `dir` matching `pattern`.
pub fn read_glob(
    dir: impl AsRef<Path>,
    pattern: &str,
    options: ReaderOptions,
) -> Result<MultiFileReader> {
    Ok(MultiFileReader::new(glob_files(dir, pattern)?, options))
}

/// Files of `dir` whose name matches a `*`/`?` wildcard pattern, sorted by name.
pub fn glob_files(dir: impl AsRef<Path>, pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher = glob_regex(pattern)?;
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_str().is_some_and(|name| matcher.is_match(name)) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn glob_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| StoreError::InvalidPattern(format!("{}: {}", pattern, e)))
}
