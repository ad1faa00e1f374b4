// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The LZ4 block stream used for compressed pack entries.
//!
//! ```text
//! header   "LZB1" | flags: u8 | 0u8 x3 | raw_size: u64 LE
//! checksum blake3(raw) x32            (only if flags & CHECKSUM)
//! block*   raw_len: u32 LE | comp_len: u32 LE | lz4 block [comp_len]
//! ```
//!
//! Every block decodes to at most [`BLOCK_SIZE`] bytes and the blocks together decode
//! to exactly `raw_size` bytes.

use larder_core::{DecompressError, Decompressor, Progress};

/// Stream signature.
pub const STREAM_MAGIC: [u8; 4] = *b"LZB1";
/// Largest decoded size of a single block.
pub const BLOCK_SIZE: usize = 64 * 1024;
/// Flag bit: a blake3 hash of the raw data follows the header.
pub const FLAG_CHECKSUM: u8 = 0x01;

const HEADER_LEN: usize = 16;
const CHECKSUM_LEN: usize = 32;
const BLOCK_HEADER_LEN: usize = 8;

/// Compresses `raw` into a complete stream.
pub fn compress_stream(raw: &[u8], checksum: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + raw.len() / 2);
    out.extend_from_slice(&STREAM_MAGIC);
    out.push(if checksum { FLAG_CHECKSUM } else { 0 });
    out.extend_from_slice(&[0; 3]);
    out.extend_from_slice(&(raw.len() as u64).to_le_bytes());
    if checksum {
        out.extend_from_slice(blake3::hash(raw).as_bytes());
    }

    for block in raw.chunks(BLOCK_SIZE) {
        let packed = lz4_flex::block::compress(block);
        out.extend_from_slice(&(block.len() as u32).to_le_bytes());
        out.extend_from_slice(&(packed.len() as u32).to_le_bytes());
        out.extend_from_slice(&packed);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Header,
    Checksum,
    BlockHeader,
    Block { raw_len: usize, comp_len: usize },
    Done,
}

/// Push-based decoder for streams written by [`compress_stream`].
///
/// Input can arrive in chunks of any size; bytes belonging to an incomplete header or
/// block are kept until the rest arrives.
pub struct LzBlockDecompressor {
    expected: u64,
    produced: u64,
    stage: Stage,
    pending: Vec<u8>,
    checksum: Option<[u8; CHECKSUM_LEN]>,
    hasher: Option<blake3::Hasher>,
}

impl LzBlockDecompressor {
    /// Starts decoding a stream expected to decode to `expected` bytes.
    pub fn new(expected: u64) -> Self {
        Self {
            expected,
            produced: 0,
            stage: Stage::Header,
            pending: Vec::new(),
            checksum: None,
            hasher: None,
        }
    }

    /// Number of bytes decoded so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn stage_len(&self) -> usize {
        match self.stage {
            Stage::Header => HEADER_LEN,
            Stage::Checksum => CHECKSUM_LEN,
            Stage::BlockHeader => BLOCK_HEADER_LEN,
            Stage::Block { comp_len, .. } => comp_len,
            Stage::Done => 0,
        }
    }

    fn after_payload(&mut self) -> Result<Stage, DecompressError> {
        if self.produced < self.expected {
            return Ok(Stage::BlockHeader);
        }
        if let (Some(stored), Some(hasher)) = (self.checksum, self.hasher.take()) {
            if hasher.finalize().as_bytes() != &stored {
                return Err(DecompressError::ChecksumMismatch);
            }
        }
        Ok(Stage::Done)
    }

    fn consume(&mut self, unit: &[u8], output: &mut Vec<u8>) -> Result<Stage, DecompressError> {
        match self.stage {
            Stage::Header => {
                if unit[..4] != STREAM_MAGIC {
                    return Err(DecompressError::BadSignature);
                }
                let flags = unit[4];
                if flags & !FLAG_CHECKSUM != 0 || unit[5..8] != [0; 3] {
                    return Err(DecompressError::BadFlags(flags));
                }
                let declared = u64::from_le_bytes(read_array(&unit[8..16]));
                if declared != self.expected {
                    return Err(DecompressError::SizeMismatch {
                        declared,
                        expected: self.expected,
                    });
                }
                if flags & FLAG_CHECKSUM != 0 {
                    self.hasher = Some(blake3::Hasher::new());
                    return Ok(Stage::Checksum);
                }
                self.after_payload()
            }
            Stage::Checksum => {
                self.checksum = Some(read_array(unit));
                self.after_payload()
            }
            Stage::BlockHeader => {
                let raw_len = u32::from_le_bytes(read_array(&unit[..4])) as usize;
                let comp_len = u32::from_le_bytes(read_array(&unit[4..8])) as usize;
                if raw_len == 0
                    || raw_len > BLOCK_SIZE
                    || self.produced + raw_len as u64 > self.expected
                {
                    return Err(DecompressError::CorruptBlock(self.produced));
                }
                Ok(Stage::Block { raw_len, comp_len })
            }
            Stage::Block { raw_len, .. } => {
                let start = output.len();
                output.resize(start + raw_len, 0);
                let written = lz4_flex::block::decompress_into(unit, &mut output[start..])
                    .map_err(|_| DecompressError::CorruptBlock(self.produced))?;
                if written != raw_len {
                    return Err(DecompressError::CorruptBlock(self.produced));
                }
                if let Some(hasher) = self.hasher.as_mut() {
                    hasher.update(&output[start..]);
                }
                self.produced += raw_len as u64;
                self.after_payload()
            }
            Stage::Done => Err(DecompressError::TrailingData),
        }
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut array = [0; N];
    array.copy_from_slice(&bytes[..N]);
    array
}

impl Decompressor for LzBlockDecompressor {
    fn decompress(
        &mut self,
        mut input: &[u8],
        output: &mut Vec<u8>,
    ) -> Result<Progress, DecompressError> {
        loop {
            if self.stage == Stage::Done {
                return if input.is_empty() {
                    Ok(Progress::Done)
                } else {
                    Err(DecompressError::TrailingData)
                };
            }

            let need = self.stage_len();
            let next = if self.pending.is_empty() && input.len() >= need {
                let (unit, rest) = input.split_at(need);
                input = rest;
                self.consume(unit, output)?
            } else {
                let take = (need - self.pending.len()).min(input.len());
                self.pending.extend_from_slice(&input[..take]);
                input = &input[take..];
                if self.pending.len() < need {
                    return Ok(Progress::NeedInput);
                }
                let unit = std::mem::take(&mut self.pending);
                let next = self.consume(&unit, output)?;
                self.pending = unit;
                self.pending.clear();
                next
            };
            self.stage = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8 ^ (i / 1000) as u8).collect()
    }

    fn decode_in_chunks(stream: &[u8], expected: u64, chunk: usize) -> Result<Vec<u8>, DecompressError> {
        let mut decoder = LzBlockDecompressor::new(expected);
        let mut output = Vec::with_capacity(expected as usize);
        let mut progress = Progress::NeedInput;
        for piece in stream.chunks(chunk.max(1)) {
            progress = decoder.decompress(piece, &mut output)?;
        }
        if progress == Progress::NeedInput {
            progress = decoder.decompress(&[], &mut output)?;
        }
        match progress {
            Progress::Done => Ok(output),
            Progress::NeedInput => Err(DecompressError::Truncated(decoder.produced())),
        }
    }

    #[test]
    fn chunk_size_does_not_change_output() {
        let raw = sample(3 * BLOCK_SIZE + 17);
        let stream = compress_stream(&raw, true);
        for chunk in [1, 7, 4096, stream.len()] {
            assert_eq!(decode_in_chunks(&stream, raw.len() as u64, chunk).unwrap(), raw);
        }
    }

    #[test]
    fn empty_stream_is_done_after_header() {
        let stream = compress_stream(&[], false);
        assert_eq!(decode_in_chunks(&stream, 0, 3).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn corrupt_signature_and_flags_are_rejected() {
        let raw = sample(100);
        let mut stream = compress_stream(&raw, false);
        stream[0] = b'X';
        assert_eq!(decode_in_chunks(&stream, 100, 64), Err(DecompressError::BadSignature));

        let mut stream = compress_stream(&raw, false);
        stream[4] = 0x80;
        assert_eq!(decode_in_chunks(&stream, 100, 64), Err(DecompressError::BadFlags(0x80)));
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let raw = sample(5000);
        let mut stream = compress_stream(&raw, true);
        stream[HEADER_LEN] ^= 0xFF;
        assert_eq!(
            decode_in_chunks(&stream, 5000, 512),
            Err(DecompressError::ChecksumMismatch)
        );
    }

    #[test]
    fn truncated_stream_and_trailing_data_are_errors() {
        let raw = sample(BLOCK_SIZE + 10);
        let stream = compress_stream(&raw, false);
        let cut = &stream[..stream.len() - 5];
        assert!(matches!(
            decode_in_chunks(cut, raw.len() as u64, 1024),
            Err(DecompressError::Truncated(_))
        ));

        let mut padded = stream.clone();
        padded.push(0);
        assert_eq!(
            decode_in_chunks(&padded, raw.len() as u64, padded.len()),
            Err(DecompressError::TrailingData)
        );
    }

    #[test]
    fn declared_size_must_match() {
        let stream = compress_stream(&sample(10), false);
        assert_eq!(
            decode_in_chunks(&stream, 11, 64),
            Err(DecompressError::SizeMismatch { declared: 10, expected: 11 })
        );
    }
}
