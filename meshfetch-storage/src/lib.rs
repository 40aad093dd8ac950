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

//! Meshfetch Storage
//!
//! Record store for measurement results: newline-delimited JSON, either
//! plain or as independently compressed zstd frames with an optional shared
//! dictionary and a `.log` frame index for random access.

pub mod codec;
pub mod error;
pub mod index;
pub mod indexed;
pub mod reader;
pub mod writer;

pub use codec::{Dictionary, FrameDecoder, RecordCodec, StoreFormat, DEFAULT_LEVEL, ZSTD_MAGIC};
pub use error::{Result, StoreError};
pub use index::{index_path, read_index, LogEntry};
pub use indexed::IndexedStore;
pub use reader::{glob_files, read_all, read_glob, MultiFileReader, ReaderOptions, RecordReader};
pub use writer::{remove_store, RecordWriter, WriteMode, WriterOptions, WriterStats};
