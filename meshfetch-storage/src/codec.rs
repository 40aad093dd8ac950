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

//! Record codec
//!
//! Two container formats are supported:
//!
//! - **Plain**: one JSON document per line.
//! - **Compressed**: each record (JSON + `\n`) is compressed on its own into
//!   a zstd frame, optionally with a shared dictionary. Frames are
//!   concatenated without separator, so decompressing the whole file in
//!   sequence yields the plain format back, and any single frame can be
//!   decoded given its offset and length (see [`crate::index`]).
//!
//! Decoding never fails: undecodable input yields `None`.

use crate::error::{Result, StoreError};
use meshfetch_core::Record;
use std::fs;
use std::io::{BufRead, Read};
use std::path::Path;
use std::sync::Arc;

/// zstd frame magic number, as it appears on disk
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Default zstd compression level
pub const DEFAULT_LEVEL: i32 = 3;

/// On-disk container format of a store file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    Plain,
    Compressed,
}

impl StoreFormat {
    /// Detect the format from the first bytes of a file.
    pub fn sniff(header: &[u8]) -> Self {
        if header.starts_with(&ZSTD_MAGIC) {
            StoreFormat::Compressed
        } else {
            StoreFormat::Plain
        }
    }

    /// Detect the format of a file by reading its header.
    pub fn detect(path: &Path) -> Result<Self> {
        let mut header = [0u8; 4];
        let mut file = fs::File::open(path)?;
        let mut filled = 0;
        while filled < header.len() {
            let n = file.read(&mut header[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(Self::sniff(&header[..filled]))
    }
}

/// Pre-trained zstd dictionary shared by every frame of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dictionary {
    bytes: Arc<Vec<u8>>,
}

impl Dictionary {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_bytes(fs::read(path)?))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.bytes.as_slice())?;
        Ok(())
    }

    /// Train a dictionary on sample records.
    pub fn train(samples: &[Record], max_size: usize) -> Result<Self> {
        let encoded = samples
            .iter()
            .map(encode_line)
            .collect::<Result<Vec<_>>>()?;
        let bytes = zstd::dict::from_samples(&encoded, max_size)
            .map_err(|e| StoreError::Dictionary(e.to_string()))?;
        Ok(Self::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Serialize a record as one JSON line.
pub fn encode_line(record: &Record) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(record)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse one JSON line; malformed input yields `None`.
pub fn decode_line(line: &[u8]) -> Option<Record> {
    let line = trim_newline(line);
    if line.is_empty() {
        return None;
    }
    match serde_json::from_slice(line) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::debug!("Skipping undecodable record: {}", e);
            None
        }
    }
}

fn trim_newline(mut line: &[u8]) -> &[u8] {
    while let Some((&last, rest)) = line.split_last() {
        if last == b'\n' || last == b'\r' {
            line = rest;
        } else {
            break;
        }
    }
    line
}

/// Encoder/decoder for single records in one of the store formats.
pub struct RecordCodec {
    format: StoreFormat,
    dictionary: Option<Dictionary>,
    compressor: Option<zstd::bulk::Compressor<'static>>,
}

impl RecordCodec {
    pub fn plain() -> Self {
        Self {
            format: StoreFormat::Plain,
            dictionary: None,
            compressor: None,
        }
    }

    pub fn compressed(level: i32, dictionary: Option<Dictionary>) -> Result<Self> {
        let compressor = match &dictionary {
            Some(dict) => zstd::bulk::Compressor::with_dictionary(level, dict.as_bytes())?,
            None => zstd::bulk::Compressor::new(level)?,
        };
        Ok(Self {
            format: StoreFormat::Compressed,
            dictionary,
            compressor: Some(compressor),
        })
    }

    pub fn for_format(
        format: StoreFormat,
        level: i32,
        dictionary: Option<Dictionary>,
    ) -> Result<Self> {
        match format {
            StoreFormat::Plain => Ok(Self::plain()),
            StoreFormat::Compressed => Self::compressed(level, dictionary),
        }
    }

    pub fn format(&self) -> StoreFormat {
        self.format
    }

    /// Encode one record into a self-delimited frame.
    pub fn encode(&mut self, record: &Record) -> Result<Vec<u8>> {
        let line = encode_line(record)?;
        match self.compressor.as_mut() {
            Some(compressor) => Ok(compressor.compress(&line)?),
            None => Ok(line),
        }
    }

    /// Decode one frame. Undecodable frames yield `None`.
    pub fn decode(&self, frame: &[u8]) -> Option<Record> {
        match self.format {
            StoreFormat::Plain => decode_line(frame),
            StoreFormat::Compressed => {
                let line = decompress_frame(frame, self.dictionary.as_ref())?;
                decode_line(&line)
            }
        }
    }
}

fn decompress_frame(frame: &[u8], dictionary: Option<&Dictionary>) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let result = match dictionary {
        Some(dict) => zstd::stream::read::Decoder::with_dictionary(frame, dict.as_bytes())
            .and_then(|mut d| d.read_to_end(&mut out)),
        None => zstd::stream::read::Decoder::with_buffer(frame)
            .and_then(|mut d| d.read_to_end(&mut out)),
    };
    match result {
        Ok(_) => Some(out),
        Err(e) => {
            tracing::debug!("Skipping undecodable frame: {}", e);
            None
        }
    }
}

/// Largest decompressed frame accepted by [`FrameDecoder`]
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Decoder for individual compressed frames, reusing one decompression
/// context (and its dictionary) across frames.
pub struct FrameDecoder {
    decompressor: zstd::bulk::Decompressor<'static>,
}

impl FrameDecoder {
    pub fn new(dictionary: Option<&Dictionary>) -> Result<Self> {
        let decompressor = match dictionary {
            Some(dict) => zstd::bulk::Decompressor::with_dictionary(dict.as_bytes())?,
            None => zstd::bulk::Decompressor::new()?,
        };
        Ok(Self { decompressor })
    }

    /// Decode one frame. Corrupt frames yield `None`.
    pub fn decode(&mut self, frame: &[u8]) -> Option<Record> {
        let capacity = match zstd::zstd_safe::get_frame_content_size(frame) {
            Ok(Some(size)) if size as usize <= MAX_FRAME_SIZE => size as usize,
            Ok(_) => {
                tracing::debug!("Skipping frame without a usable content size");
                return None;
            }
            Err(_) => {
                tracing::debug!("Skipping frame with an invalid header");
                return None;
            }
        };
        match self.decompressor.decompress(frame, capacity) {
            Ok(line) => decode_line(&line),
            Err(e) => {
                tracing::debug!("Skipping undecodable frame: {}", e);
                None
            }
        }
    }
}

/// Wrap a compressed stream of concatenated frames into a line reader.
///
/// A single decompression context is kept for the whole stream, with the
/// dictionary loaded once and reused for every frame.
pub fn frame_stream<R>(
    reader: R,
    dictionary: Option<&Dictionary>,
) -> Result<Box<dyn BufRead + Send>>
where
    R: BufRead + Send + 'static,
{
    let decoder = match dictionary {
        Some(dict) => zstd::stream::read::Decoder::with_dictionary(reader, dict.as_bytes())?,
        None => zstd::stream::read::Decoder::with_buffer(reader)?,
    };
    Ok(Box::new(std::io::BufReader::new(decoder)))
}
